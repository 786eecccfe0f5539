//! Text-layer index for a single page.
//!
//! pdfium exposes the text layer as segments with bottom-left-origin
//! bounds; this module flips them to top-left page coordinates and layers a
//! case-insensitive substring search on top. Sub-span hits are located by
//! proportional interpolation over the segment's width, which is accurate
//! enough for the harvester's nearest-to-hint selection.
//!
//! The same pass collects long vertical vector rules from the page's path
//! objects; the legend harvester uses them as column boundaries.

use std::path::Path;

use pdfium_render::prelude::*;
use pipedoc_core::{Error, Result};

use crate::geometry::Rect;
use crate::render::PageRenderer;

/// One text run with its page-space bounds.
#[derive(Debug, Clone, PartialEq)]
pub struct TextSpan {
    pub rect: Rect,
    pub text: String,
}

/// Positioned text layer of one page plus its vertical vector rules.
#[derive(Debug, Clone, Default)]
pub struct PageTextIndex {
    pub page_width: f32,
    pub page_height: f32,
    /// Text runs sorted top-to-bottom, left-to-right.
    pub spans: Vec<TextSpan>,
    /// Concatenated page text (segment order).
    pub full_text: String,
    /// X positions of vector lines spanning more than 30 % of the page
    /// height, sorted ascending.
    pub vertical_rules: Vec<f32>,
}

impl PageTextIndex {
    /// Build the index for a 1-indexed page.
    ///
    /// # Errors
    ///
    /// Returns [`Error::PageRenderFailure`] when the document or page
    /// cannot be loaded.
    pub fn load(renderer: &PageRenderer, pdf_path: &Path, page_no: u32) -> Result<Self> {
        renderer.with_page(pdf_path, page_no, |page| Ok(Self::from_page(page)))
    }

    pub(crate) fn from_page(page: &PdfPage<'_>) -> Self {
        let page_width = page.width().value;
        let page_height = page.height().value;

        let mut spans = Vec::new();
        let mut full_text = String::new();
        if let Ok(text) = page.text() {
            for segment in text.segments().iter() {
                let content = segment.text();
                let trimmed = content.trim();
                if trimmed.is_empty() {
                    continue;
                }
                let bounds = segment.bounds();
                // Flip from bottom-left to top-left origin.
                let rect = Rect::new(
                    bounds.left().value,
                    page_height - bounds.top().value,
                    bounds.right().value,
                    page_height - bounds.bottom().value,
                );
                if !full_text.is_empty() {
                    full_text.push('\n');
                }
                full_text.push_str(trimmed);
                spans.push(TextSpan {
                    rect,
                    text: trimmed.to_string(),
                });
            }
        }

        spans.sort_by(|a, b| {
            (a.rect.y0, a.rect.x0)
                .partial_cmp(&(b.rect.y0, b.rect.x0))
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        let vertical_rules = collect_vertical_rules(page, page_height);

        Self {
            page_width,
            page_height,
            spans,
            full_text,
            vertical_rules,
        }
    }

    /// Case-insensitive substring search over the span texts.
    ///
    /// Returns one rect per hit, horizontally interpolated to the matched
    /// substring within its span.
    #[must_use]
    pub fn search(&self, needle: &str) -> Vec<Rect> {
        let needle_upper = needle.trim().to_uppercase();
        if needle_upper.is_empty() {
            return Vec::new();
        }
        let mut hits = Vec::new();
        for span in &self.spans {
            let hay = span.text.to_uppercase();
            let Some(byte_idx) = hay.find(&needle_upper) else {
                continue;
            };
            let char_start = hay[..byte_idx].chars().count() as f32;
            let char_len = hay.chars().count().max(1) as f32;
            let needle_chars = needle_upper.chars().count() as f32;
            let width = span.rect.width();
            let x0 = span.rect.x0 + width * (char_start / char_len);
            let x1 = span.rect.x0 + width * ((char_start + needle_chars).min(char_len) / char_len);
            hits.push(Rect::new(x0, span.rect.y0, x1, span.rect.y1));
        }
        hits
    }
}

fn collect_vertical_rules(page: &PdfPage<'_>, page_height: f32) -> Vec<f32> {
    let mut rules: Vec<f32> = Vec::new();
    for object in page.objects().iter() {
        if object.object_type() != PdfPageObjectType::Path {
            continue;
        }
        let Ok(bounds) = object.bounds() else {
            continue;
        };
        let width = (bounds.right().value - bounds.left().value).abs();
        let height = (bounds.top().value - bounds.bottom().value).abs();
        if width < 1.0 && height > page_height * 0.3 {
            rules.push((bounds.left().value + bounds.right().value) / 2.0);
        }
    }
    // Dedupe to 0.1 pt.
    rules.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    rules.dedup_by(|a, b| (*a - *b).abs() < 0.1);
    rules
}

impl PageRenderer {
    /// Run `f` against a loaded 1-indexed page. The document handle does not
    /// outlive the call.
    ///
    /// # Errors
    ///
    /// Returns [`Error::PageRenderFailure`] when loading fails, otherwise
    /// whatever `f` returns.
    pub fn with_page<T>(
        &self,
        pdf_path: &Path,
        page_no: u32,
        f: impl FnOnce(&PdfPage<'_>) -> Result<T>,
    ) -> Result<T> {
        let document = self
            .pdfium_handle()
            .load_pdf_from_file(pdf_path, None)
            .map_err(|e| Error::PageRenderFailure(format!("load {}: {e}", pdf_path.display())))?;
        let index = page_no
            .checked_sub(1)
            .ok_or_else(|| Error::PageRenderFailure("page numbers are 1-indexed".into()))?;
        let page = document
            .pages()
            .get(index as u16)
            .map_err(|e| Error::PageRenderFailure(format!("page {page_no} not found: {e}")))?;
        f(&page)
    }

    /// Text index for every page of the document, in page order.
    ///
    /// # Errors
    ///
    /// Returns an error when the document cannot be loaded.
    pub fn text_indexes(&self, pdf_path: &Path) -> Result<Vec<PageTextIndex>> {
        let document = self
            .pdfium_handle()
            .load_pdf_from_file(pdf_path, None)
            .map_err(|e| Error::PageRenderFailure(format!("load {}: {e}", pdf_path.display())))?;
        let mut indexes = Vec::with_capacity(document.pages().len() as usize);
        for page in document.pages().iter() {
            indexes.push(PageTextIndex::from_page(&page));
        }
        Ok(indexes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn index_with(spans: Vec<TextSpan>) -> PageTextIndex {
        PageTextIndex {
            page_width: 1000.0,
            page_height: 700.0,
            spans,
            full_text: String::new(),
            vertical_rules: Vec::new(),
        }
    }

    #[test]
    fn search_is_case_insensitive() {
        let index = index_with(vec![TextSpan {
            rect: Rect::new(100.0, 50.0, 200.0, 58.0),
            text: "Ball Valve (Open)".into(),
        }]);
        assert_eq!(index.search("BALL VALVE").len(), 1);
        assert_eq!(index.search("ball valve (open)").len(), 1);
        assert!(index.search("GATE VALVE").is_empty());
    }

    #[test]
    fn search_interpolates_substring_position() {
        // "ABCDEFGHIJ" spanning x 0..100: "FGHIJ" occupies the right half.
        let index = index_with(vec![TextSpan {
            rect: Rect::new(0.0, 0.0, 100.0, 10.0),
            text: "ABCDEFGHIJ".into(),
        }]);
        let hits = index.search("FGHIJ");
        assert_eq!(hits.len(), 1);
        assert!((hits[0].x0 - 50.0).abs() < 1.0);
        assert!((hits[0].x1 - 100.0).abs() < 1.0);
    }

    #[test]
    fn search_returns_every_matching_span() {
        let index = index_with(vec![
            TextSpan {
                rect: Rect::new(10.0, 10.0, 80.0, 18.0),
                text: "GATE VALVE (OPEN)".into(),
            },
            TextSpan {
                rect: Rect::new(10.0, 40.0, 80.0, 48.0),
                text: "GATE VALVE (CLOSED)".into(),
            },
        ]);
        assert_eq!(index.search("GATE VALVE").len(), 2);
    }
}
