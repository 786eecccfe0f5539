//! Page rasterization with adaptive resolution.
//!
//! Resolutions are derived from a maximum pixel extent so vision-model
//! inputs stay within token/memory budgets:
//!
//! - full isometric pages: ≤7500 px, 120–250 DPI
//! - BOM table crops (rightmost 30 %): ≤7500 px over the crop, 150–300 DPI
//! - legend page: 300 DPI master for cropping plus a ≤5000 px model copy
//! - bulk previews: DPI stepped down by page count (200/150/120)

use std::path::{Path, PathBuf};

use image::{DynamicImage, GenericImageView};
use pdfium_render::prelude::*;
use pipedoc_core::{Error, Result};
use tracing::{debug, warn};

/// PDF points per inch.
const PDF_POINTS_PER_INCH: f32 = 72.0;

/// Fraction of the page width where the BOM table area begins.
const TABLE_CROP_X_RATIO: f32 = 0.70;

/// Pixel budget for full-page model renders.
const VLM_MAX_PX: f32 = 7500.0;

/// Pixel budget for P&ID sheet renders.
const PID_MAX_PX: f32 = 6000.0;

/// Pixel budget for the legend's model copy.
const LEGEND_VLM_MAX_PX: f32 = 5000.0;

/// Derive a DPI from a pixel budget: `max_px / max(page_dim_pt) · 72`,
/// clamped to `[min_dpi, ceiling]`.
#[must_use]
pub fn adaptive_dpi(max_px: f32, page_w_pt: f32, page_h_pt: f32, min_dpi: u32, ceiling: u32) -> u32 {
    let max_dim = page_w_pt.max(page_h_pt).max(1.0);
    let dpi = (max_px / max_dim * PDF_POINTS_PER_INCH).floor() as u32;
    dpi.clamp(min_dpi, ceiling)
}

/// DPI for bulk preview renders, stepped down as the page count grows so the
/// full set stays within a memory budget.
#[must_use]
pub const fn bulk_render_dpi(page_count: usize) -> u32 {
    if page_count <= 10 {
        200
    } else if page_count <= 30 {
        150
    } else {
        120
    }
}

/// Rendered legend page assets.
#[derive(Debug, Clone)]
pub struct LegendRenders {
    /// 300 DPI master used for symbol cropping.
    pub hires_path: PathBuf,
    /// Reduced copy sent to the vision model.
    pub vlm_path: PathBuf,
    pub page_width_pt: f32,
    pub page_height_pt: f32,
    /// Pixels per point of the hires master.
    pub hires_scale: f32,
}

/// Rasterizes PDF pages. The document is loaded per operation.
pub struct PageRenderer {
    pdfium: Pdfium,
}

impl PageRenderer {
    /// Create a renderer bound to the system pdfium library.
    ///
    /// # Errors
    ///
    /// This function currently never returns an error.
    pub fn new() -> Result<Self> {
        Ok(Self {
            pdfium: Pdfium::default(),
        })
    }

    pub(crate) fn pdfium_handle(&self) -> &Pdfium {
        &self.pdfium
    }

    fn load(&self, pdf_path: &Path) -> Result<PdfDocument<'_>> {
        self.pdfium
            .load_pdf_from_file(pdf_path, None)
            .map_err(|e| Error::PageRenderFailure(format!("load {}: {e}", pdf_path.display())))
    }

    /// Number of pages in the document.
    ///
    /// # Errors
    ///
    /// Returns an error if the PDF cannot be loaded.
    pub fn page_count(&self, pdf_path: &Path) -> Result<usize> {
        Ok(self.load(pdf_path)?.pages().len() as usize)
    }

    /// Page dimensions in points for a 1-indexed page.
    ///
    /// # Errors
    ///
    /// Returns an error if the PDF cannot be loaded or the page is missing.
    pub fn page_size(&self, pdf_path: &Path, page_no: u32) -> Result<(f32, f32)> {
        let document = self.load(pdf_path)?;
        let page = get_page(&document, page_no)?;
        Ok((page.width().value, page.height().value))
    }

    /// Render a 1-indexed page at the given DPI.
    ///
    /// # Errors
    ///
    /// Returns [`Error::PageRenderFailure`] on load or render failure.
    pub fn render_page(&self, pdf_path: &Path, page_no: u32, dpi: u32) -> Result<DynamicImage> {
        let document = self.load(pdf_path)?;
        let page = get_page(&document, page_no)?;
        render_page_image(&page, dpi).map_err(|e| {
            Error::PageRenderFailure(format!("page {page_no} at {dpi} dpi: {e}"))
        })
    }

    /// Render a page straight to a PNG file.
    ///
    /// # Errors
    ///
    /// Returns an error on render or encode failure.
    pub fn render_page_to_file(
        &self,
        pdf_path: &Path,
        page_no: u32,
        dpi: u32,
        out_path: &Path,
    ) -> Result<()> {
        let image = self.render_page(pdf_path, page_no, dpi)?;
        save_png(&image, out_path)
    }

    /// Render every page as `bom_page{n}.png` at a DPI chosen from the page
    /// count (or `dpi` when given). Each raster is dropped before the next
    /// page renders.
    ///
    /// # Errors
    ///
    /// Returns an error if the PDF cannot be loaded or any page fails.
    pub fn render_bom_pages(
        &self,
        pdf_path: &Path,
        out_dir: &Path,
        dpi: Option<u32>,
    ) -> Result<Vec<PathBuf>> {
        let document = self.load(pdf_path)?;
        let total = document.pages().len() as usize;
        let dpi = dpi.unwrap_or_else(|| bulk_render_dpi(total));
        debug!(total, dpi, "bulk rendering BOM pages");

        let mut results = Vec::with_capacity(total);
        for (idx, page) in document.pages().iter().enumerate() {
            let out_path = out_dir.join(format!("bom_page{}.png", idx + 1));
            let image = render_page_image(&page, dpi).map_err(|e| {
                Error::PageRenderFailure(format!("bom page {} at {dpi} dpi: {e}", idx + 1))
            })?;
            save_png(&image, &out_path)?;
            results.push(out_path);
        }
        Ok(results)
    }

    /// Render one isometric page for the two-pass analysis: the full page
    /// plus a higher-DPI crop of the rightmost 30 % where the BOM table and
    /// title block sit.
    ///
    /// A failed table crop is downgraded to a warning and `None`; the
    /// drawing pass proceeds without it.
    ///
    /// # Errors
    ///
    /// Returns an error only when the full-page render fails.
    pub fn render_page_for_vlm(
        &self,
        pdf_path: &Path,
        page_no: u32,
        out_dir: &Path,
    ) -> Result<(PathBuf, Option<PathBuf>)> {
        let document = self.load(pdf_path)?;
        let page = get_page(&document, page_no)?;
        let (pw, ph) = (page.width().value, page.height().value);

        let dpi = adaptive_dpi(VLM_MAX_PX, pw, ph, 120, 250);
        let full_image = render_page_image(&page, dpi)
            .map_err(|e| Error::PageRenderFailure(format!("page {page_no} at {dpi} dpi: {e}")))?;
        let full_path = out_dir.join(format!("vlm_page_{page_no:03}.png"));
        save_png(&full_image, &full_path)?;
        debug!(
            page_no,
            dpi,
            width = full_image.width(),
            height = full_image.height(),
            "rendered full page for analysis"
        );
        drop(full_image);

        let table_path = out_dir.join(format!("vlm_table_{page_no:03}.png"));
        match self.render_table_crop(&page, &table_path) {
            Ok(()) => Ok((full_path, Some(table_path))),
            Err(e) => {
                warn!(page_no, error = %e, "table crop failed; drawing pass continues");
                Ok((full_path, None))
            }
        }
    }

    /// Clipped regions render at a higher DPI because they are smaller; the
    /// clip itself is taken on the raster.
    fn render_table_crop(&self, page: &PdfPage<'_>, out_path: &Path) -> Result<()> {
        let (pw, ph) = (page.width().value, page.height().value);
        let crop_w = pw * (1.0 - TABLE_CROP_X_RATIO);
        let table_dpi = adaptive_dpi(VLM_MAX_PX, crop_w, ph, 150, 300);

        let image = render_page_image(page, table_dpi)
            .map_err(|e| Error::TableCropFailure(format!("render at {table_dpi} dpi: {e}")))?;
        let x0 = (image.width() as f32 * TABLE_CROP_X_RATIO) as u32;
        let crop_width = image.width().saturating_sub(x0);
        if crop_width < 10 {
            return Err(Error::TableCropFailure("crop region too narrow".into()));
        }
        let cropped = image.crop_imm(x0, 0, crop_width, image.height());
        debug!(
            dpi = table_dpi,
            width = cropped.width(),
            height = cropped.height(),
            "rendered table crop"
        );
        save_png(&cropped, out_path).map_err(|e| Error::TableCropFailure(e.to_string()))
    }

    /// Render the legend page (page 1) twice: a 300 DPI master for cropping
    /// and a reduced copy for the vision model.
    ///
    /// # Errors
    ///
    /// Returns [`Error::PageRenderFailure`] on any failure.
    pub fn render_legend_page(&self, pdf_path: &Path, out_dir: &Path) -> Result<LegendRenders> {
        let document = self.load(pdf_path)?;
        let page = get_page(&document, 1)?;
        let (pw, ph) = (page.width().value, page.height().value);

        let hires_dpi = 300;
        let hires = render_page_image(&page, hires_dpi)
            .map_err(|e| Error::PageRenderFailure(format!("legend hires: {e}")))?;
        let hires_path = out_dir.join("legend_page_full.png");
        save_png(&hires, &hires_path)?;

        let vlm_dpi = adaptive_dpi(LEGEND_VLM_MAX_PX, pw, ph, 72, 200);
        let vlm = render_page_image(&page, vlm_dpi)
            .map_err(|e| Error::PageRenderFailure(format!("legend vlm copy: {e}")))?;
        let vlm_path = out_dir.join("legend_page_vlm.png");
        save_png(&vlm, &vlm_path)?;

        debug!(
            hires_w = hires.width(),
            hires_h = hires.height(),
            vlm_w = vlm.width(),
            vlm_h = vlm.height(),
            "legend renders complete"
        );

        Ok(LegendRenders {
            hires_path,
            vlm_path,
            page_width_pt: pw,
            page_height_pt: ph,
            hires_scale: hires_dpi as f32 / PDF_POINTS_PER_INCH,
        })
    }

    /// Render one P&ID sheet for analysis as `pid_vlm_page_{n}.png`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::PageRenderFailure`] on any failure.
    pub fn render_pid_page(&self, pdf_path: &Path, page_no: u32, out_dir: &Path) -> Result<PathBuf> {
        let document = self.load(pdf_path)?;
        let page = get_page(&document, page_no)?;
        let (pw, ph) = (page.width().value, page.height().value);
        let dpi = adaptive_dpi(PID_MAX_PX, pw, ph, 150, 250);

        let image = render_page_image(&page, dpi)
            .map_err(|e| Error::PageRenderFailure(format!("pid page {page_no}: {e}")))?;
        let out_path = out_dir.join(format!("pid_vlm_page_{page_no}.png"));
        save_png(&image, &out_path)?;
        Ok(out_path)
    }
}

fn get_page<'a>(document: &'a PdfDocument<'_>, page_no: u32) -> Result<PdfPage<'a>> {
    let index = page_no
        .checked_sub(1)
        .ok_or_else(|| Error::PageRenderFailure("page numbers are 1-indexed".into()))?;
    document
        .pages()
        .get(index as u16)
        .map_err(|e| Error::PageRenderFailure(format!("page {page_no} not found: {e}")))
}

fn render_page_image(
    page: &PdfPage<'_>,
    dpi: u32,
) -> std::result::Result<DynamicImage, PdfiumError> {
    let width = page.width().value;
    let height = page.height().value;
    let config = PdfRenderConfig::new()
        .set_target_width((width * dpi as f32 / PDF_POINTS_PER_INCH) as i32)
        .set_target_height((height * dpi as f32 / PDF_POINTS_PER_INCH) as i32);
    Ok(page.render_with_config(&config)?.as_image())
}

fn save_png(image: &DynamicImage, out_path: &Path) -> Result<()> {
    if let Some(parent) = out_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    image
        .save_with_format(out_path, image::ImageFormat::Png)
        .map_err(|e| Error::PageRenderFailure(format!("write {}: {e}", out_path.display())))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn adaptive_dpi_honours_budget_and_bounds() {
        // A1-ish legend sheet: 2384 x 1684 pt. 5000 px over 2384 pt = 151 dpi.
        assert_eq!(adaptive_dpi(5000.0, 2384.0, 1684.0, 72, 200), 151);
        // Small page hits the ceiling.
        assert_eq!(adaptive_dpi(7500.0, 595.0, 842.0, 120, 250), 250);
        // Huge page hits the floor.
        assert_eq!(adaptive_dpi(5000.0, 10_000.0, 5000.0, 120, 250), 120);
    }

    #[test]
    fn bulk_dpi_steps_down_with_page_count() {
        assert_eq!(bulk_render_dpi(5), 200);
        assert_eq!(bulk_render_dpi(10), 200);
        assert_eq!(bulk_render_dpi(11), 150);
        assert_eq!(bulk_render_dpi(30), 150);
        assert_eq!(bulk_render_dpi(31), 120);
    }
}
