//! Text-layout fallback extractor.
//!
//! When the vision phase fails, the legend's printed section headers still
//! segment the page: each header starts a column of small-font description
//! rows, and the symbol graphic sits in the band left of each row's text.
//! The fallback produces complete entries with crude rectangle crops and no
//! model bounding boxes.

use std::path::Path;

use image::GenericImageView;
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{info, warn};

use pipedoc_core::{Result, SymbolCategory, SymbolEntry};
use pipedoc_pdf::{Rect, TextSpan};

use crate::harvester::LegendPageContext;
use crate::validate::is_garbage;

/// Section headers in reading order, including the misspelled variants
/// seen on real drawings.
const SECTION_HEADERS: [(&str, SymbolCategory); 9] = [
    ("PIPING SYMBOLS", SymbolCategory::Piping),
    ("VALVE SYMBOLS", SymbolCategory::Valve),
    ("ACTURATORS", SymbolCategory::Actuator),
    ("ACTUATORS", SymbolCategory::Actuator),
    ("ACTURATED VALVES", SymbolCategory::ActuatedValve),
    ("ACTUATED VALVES", SymbolCategory::ActuatedValve),
    ("SAFETY DEVICE SYMBOLS", SymbolCategory::SafetyDevice),
    ("OTHER SYMBOLS", SymbolCategory::Other),
    ("INSTRUMENT VALVE BODIES", SymbolCategory::ActuatedValve),
];

/// Description rows print in a small font; span height is the proxy.
const DESC_MAX_HEIGHT_PT: f32 = 7.0;

static GRID_LABEL: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-K]$|^1[0-6]$|^[1-9]$").unwrap());

#[derive(Debug)]
struct Section {
    category: SymbolCategory,
    rect: Rect,
}

/// Extract symbols from the legend page using text layout only.
///
/// # Errors
///
/// Returns an error when the hires render cannot be reopened.
pub fn extract_text_fallback(
    context: &LegendPageContext,
    symbols_dir: &Path,
) -> Result<Vec<SymbolEntry>> {
    let (pw, ph) = (context.renders.page_width_pt, context.renders.page_height_pt);
    let scale = context.renders.hires_scale;
    let hires = image::open(&context.renders.hires_path)
        .map_err(|e| pipedoc_core::Error::LegendExtractionFailure(format!("reopen hires: {e}")))?;

    // Identify section headers.
    let mut sections: Vec<Section> = Vec::new();
    for span in &context.text.spans {
        let upper = span.text.to_uppercase();
        for (header, category) in SECTION_HEADERS {
            if upper.contains(header) {
                sections.push(Section {
                    category,
                    rect: span.rect,
                });
                break;
            }
        }
    }
    sections.sort_by(|a, b| {
        (a.rect.x0, a.rect.y0)
            .partial_cmp(&(b.rect.x0, b.rect.y0))
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    info!(sections = sections.len(), "fallback located section headers");

    let mut symbols: Vec<SymbolEntry> = Vec::new();
    let mut seen = std::collections::HashSet::new();

    for section in &sections {
        let x_left = section.rect.x0 - 60.0;
        let mut x_right = section.rect.x1 + 40.0;
        // Stop the column before the next section to the right.
        for other in &sections {
            if other.rect.x0 > section.rect.x1 + 50.0 {
                x_right = x_right.min(other.rect.x0 - 10.0);
                break;
            }
        }

        let y_start = section.rect.y1 + 5.0;
        let mut y_end = ph - 50.0;
        // Stop above the next section stacked in the same column.
        for other in &sections {
            if other.rect.y0 > section.rect.y1 + 20.0
                && (other.rect.x0 - section.rect.x0).abs() < 80.0
            {
                y_end = y_end.min(other.rect.y0 - 5.0);
            }
        }

        let mut desc_lines: Vec<&TextSpan> = context
            .text
            .spans
            .iter()
            .filter(|span| {
                let upper = span.text.to_uppercase();
                span.rect.x0 >= x_left - 20.0
                    && span.rect.x0 <= x_right + 60.0
                    && span.rect.y0 >= y_start
                    && span.rect.y0 <= y_end
                    && span.rect.height() < DESC_MAX_HEIGHT_PT
                    && !matches!(upper.as_str(), "SYMBOL" | "DESCRIPTION" | "SYMBOLS")
            })
            .collect();
        desc_lines.sort_by(|a, b| {
            let ka = ((a.rect.y0 / 3.0).round() * 3.0, a.rect.x0);
            let kb = ((b.rect.y0 / 3.0).round() * 3.0, b.rect.x0);
            ka.partial_cmp(&kb).unwrap_or(std::cmp::Ordering::Equal)
        });

        // Group spans into rows by y proximity.
        let mut rows: Vec<Vec<&TextSpan>> = Vec::new();
        let mut prev_y = -100.0f32;
        for span in desc_lines {
            if (span.rect.y0 - prev_y).abs() > 4.0 || rows.is_empty() {
                rows.push(vec![span]);
            } else {
                rows.last_mut().expect("rows is non-empty").push(span);
            }
            prev_y = span.rect.y0;
        }

        for mut row in rows {
            row.sort_by(|a, b| {
                a.rect
                    .x0
                    .partial_cmp(&b.rect.x0)
                    .unwrap_or(std::cmp::Ordering::Equal)
            });
            let full_text = row
                .iter()
                .map(|s| s.text.as_str())
                .collect::<Vec<_>>()
                .join(" ")
                .trim()
                .to_string();
            if full_text.len() < 3 || GRID_LABEL.is_match(&full_text) || is_garbage(&full_text) {
                continue;
            }
            if !seen.insert(full_text.to_uppercase()) {
                continue;
            }

            // A short leading token followed by a long tail is a symbol code.
            let (symbol_name, description) = if row.len() >= 2
                && row[0].text.len() <= 8
                && row[row.len() - 1].text.len() > 8
            {
                (
                    row[0].text.trim().to_string(),
                    row[1..]
                        .iter()
                        .map(|s| s.text.as_str())
                        .collect::<Vec<_>>()
                        .join(" ")
                        .trim()
                        .to_string(),
                )
            } else {
                (String::new(), full_text.clone())
            };

            let row_y_min = row
                .iter()
                .map(|s| s.rect.y0)
                .fold(f32::INFINITY, f32::min)
                - 3.0;
            let row_y_max = row
                .iter()
                .map(|s| s.rect.y1)
                .fold(f32::NEG_INFINITY, f32::max)
                + 3.0;
            let row_x_min = row.iter().map(|s| s.rect.x0).fold(f32::INFINITY, f32::min);

            let sym_x0 = (x_left - 10.0).max(0.0);
            let sym_y0 = (row_y_min - 2.0).max(0.0);
            let sym_x1 = (row_x_min - 2.0).min(pw);
            let sym_y1 = (row_y_max + 2.0).min(ph);

            let ordinal = symbols.len() as u32 + 1;
            let mut entry = SymbolEntry {
                id: ordinal,
                category: section.category,
                symbol_name,
                description,
                image_path: None,
                image_filename: None,
                bbox_pct: Some([
                    f64::from(sym_x0 / pw),
                    f64::from(sym_y0 / ph),
                    f64::from(sym_x1 / pw),
                    f64::from(sym_y1 / ph),
                ]),
            };

            let px0 = (sym_x0 * scale) as u32;
            let py0 = (sym_y0 * scale) as u32;
            let px1 = ((sym_x1 * scale) as u32).min(hires.width());
            let py1 = ((sym_y1 * scale) as u32).min(hires.height());
            if px1.saturating_sub(px0) > 10 && py1.saturating_sub(py0) > 5 {
                let filename = format!(
                    "symbol_{ordinal:03}_{}.png",
                    section.category.as_str().to_lowercase()
                );
                let path = symbols_dir.join(&filename);
                let crop = hires.crop_imm(px0, py0, px1 - px0, py1 - py0);
                match crop.save_with_format(&path, image::ImageFormat::Png) {
                    Ok(()) => {
                        entry.image_path = Some(path.display().to_string());
                        entry.image_filename = Some(filename);
                    }
                    Err(e) => warn!(ordinal, error = %e, "fallback crop failed"),
                }
            }

            symbols.push(entry);
        }
    }

    info!(count = symbols.len(), "fallback extraction complete");
    Ok(symbols)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pipedoc_pdf::{LegendRenders, PageTextIndex};
    use std::path::PathBuf;

    fn context(spans: Vec<(&str, Rect)>, hires_path: PathBuf) -> LegendPageContext {
        LegendPageContext {
            renders: LegendRenders {
                hires_path,
                vlm_path: PathBuf::new(),
                page_width_pt: 800.0,
                page_height_pt: 600.0,
                hires_scale: 300.0 / 72.0,
            },
            text: PageTextIndex {
                page_width: 800.0,
                page_height: 600.0,
                spans: spans
                    .into_iter()
                    .map(|(t, rect)| TextSpan {
                        rect,
                        text: t.to_string(),
                    })
                    .collect(),
                full_text: String::new(),
                vertical_rules: Vec::new(),
            },
        }
    }

    #[test]
    fn fallback_groups_rows_under_section_headers() {
        let dir = tempfile::tempdir().unwrap();
        let hires = image::DynamicImage::ImageLuma8(image::GrayImage::from_pixel(
            3333, 2500, image::Luma([255u8]),
        ));
        let hires_path = dir.path().join("legend_page_full.png");
        hires.save(&hires_path).unwrap();

        let context = context(
            vec![
                // Section header (taller font).
                ("VALVE SYMBOLS", Rect::new(100.0, 40.0, 220.0, 52.0)),
                // Two description rows in a small font.
                ("BALL VALVE (OPEN)", Rect::new(160.0, 80.0, 280.0, 86.0)),
                ("GATE VALVE (OPEN)", Rect::new(160.0, 110.0, 280.0, 116.0)),
                // Grid label noise.
                ("C", Rect::new(10.0, 95.0, 16.0, 101.0)),
            ],
            hires_path,
        );

        let symbols = extract_text_fallback(&context, dir.path()).unwrap();
        assert_eq!(symbols.len(), 2);
        assert!(symbols.iter().all(|s| s.category == SymbolCategory::Valve));
        assert_eq!(symbols[0].description, "BALL VALVE (OPEN)");
        assert_eq!(symbols[0].id, 1);
        assert!(symbols[0].image_filename.is_some());
        assert!(symbols[0].bbox_pct.is_some());
    }
}
