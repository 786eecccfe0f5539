//! Legend harvest orchestration.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use image::{DynamicImage, GenericImageView};
use tracing::{debug, info, warn};

use pipedoc_core::{Error, Result, SymbolCategory, SymbolEntry};
use pipedoc_pdf::{LegendRenders, PageRenderer, PageTextIndex, Rect};
use pipedoc_vlm::{prompts, recovery, PacedVlm};

use crate::crop::{auto_crop_to_content, trim_grid_borders, whiten_gray_background};
use crate::fallback;
use crate::locate::{
    column_left_boundaries, detect_left_margin, find_text_on_page, group_columns, header_rects,
    row_bounds, SYM_WIDTH_PT,
};
use crate::validate::{validate_and_clean, CleanSymbol, RawSymbol};

/// Crop height bounds in points. Compound symbols (double block and bleed)
/// need the generous maximum.
const MIN_HEIGHT_PT: f32 = 15.0;
const MAX_HEIGHT_PT: f32 = 120.0;
/// Inset before the description text so it does not bleed into the crop.
const RIGHT_INSET_PT: f32 = 12.0;

const LEGEND_MAX_TOKENS: u32 = 16_384;

/// Everything phase 4 needs, precomputed so no PDF handle survives into the
/// async phase.
#[derive(Debug)]
pub struct LegendPageContext {
    pub renders: LegendRenders,
    pub text: PageTextIndex,
}

/// Phase 1: render the legend page and index its text layer.
///
/// # Errors
///
/// Returns [`Error::PageRenderFailure`] when the page cannot be rendered.
pub fn prepare_legend_page(
    renderer: &PageRenderer,
    pdf_path: &Path,
    out_dir: &Path,
) -> Result<LegendPageContext> {
    let renders = renderer.render_legend_page(pdf_path, out_dir)?;
    let text = PageTextIndex::load(renderer, pdf_path, 1)?;
    info!(
        page_w = renders.page_width_pt,
        page_h = renders.page_height_pt,
        spans = text.spans.len(),
        rules = text.vertical_rules.len(),
        "legend page prepared"
    );
    Ok(LegendPageContext { renders, text })
}

/// Phase 2: one vision call over the reduced render.
async fn analyze_legend_with_vlm(vlm: &PacedVlm, vlm_image: &Path) -> Result<Vec<RawSymbol>> {
    let response = vlm
        .chat(
            &[(vlm_image, "image/png")],
            prompts::legend_analysis_prompt(),
            LEGEND_MAX_TOKENS,
        )
        .await
        .map_err(Error::from)?;
    let values = recovery::recover_array(&response)?;
    let symbols: Vec<RawSymbol> = values
        .into_iter()
        .filter_map(|v| serde_json::from_value(v).ok())
        .collect();
    info!(count = symbols.len(), "model reported raw symbols");
    Ok(symbols)
}

/// Run the full harvest: render, analyze, validate, crop; write
/// `symbols_legend.json`. Vision failure (or zero usable rows) degrades to
/// the text-layout fallback.
///
/// # Errors
///
/// Returns an error when the page itself cannot be prepared or outputs
/// cannot be written; model failures are absorbed by the fallback.
pub async fn extract_symbols_from_legend(
    vlm: &PacedVlm,
    pdf_path: &Path,
    out_dir: &Path,
) -> Result<Vec<SymbolEntry>> {
    std::fs::create_dir_all(out_dir)?;
    let symbols_dir = out_dir.join("symbols");
    std::fs::create_dir_all(&symbols_dir)?;

    let context = {
        let renderer = PageRenderer::new()?;
        prepare_legend_page(&renderer, pdf_path, out_dir)?
    };

    let symbols = match analyze_legend_with_vlm(vlm, &context.renders.vlm_path).await {
        Ok(raw) => {
            let clean = validate_and_clean(raw);
            info!(count = clean.len(), "symbols after cleanup");
            if clean.is_empty() {
                warn!("model returned no usable symbols; using text-layout fallback");
                fallback::extract_text_fallback(&context, &symbols_dir)?
            } else {
                crop_symbol_images(clean, &context, &symbols_dir)
            }
        }
        Err(e) => {
            warn!(error = %e, "legend analysis failed; using text-layout fallback");
            fallback::extract_text_fallback(&context, &symbols_dir)?
        }
    };

    let json_path = out_dir.join("symbols_legend.json");
    std::fs::write(&json_path, serde_json::to_string_pretty(&symbols)?)?;

    let mut by_category: HashMap<SymbolCategory, usize> = HashMap::new();
    for s in &symbols {
        *by_category.entry(s.category).or_default() += 1;
    }
    info!(total = symbols.len(), ?by_category, "symbol harvest complete");

    Ok(symbols)
}

/// Phase 4: locate, bound, and cut one raster per validated symbol.
///
/// Symbols whose description cannot be found and whose model bbox is
/// unusable keep a null image reference.
#[must_use]
pub fn crop_symbol_images(
    symbols: Vec<CleanSymbol>,
    context: &LegendPageContext,
    symbols_dir: &Path,
) -> Vec<SymbolEntry> {
    let hires = match image::open(&context.renders.hires_path) {
        Ok(img) => img,
        Err(e) => {
            warn!(error = %e, "cannot reopen hires legend render; skipping crops");
            return symbols
                .into_iter()
                .enumerate()
                .map(|(idx, s)| entry_without_image(idx as u32 + 1, &s))
                .collect();
        }
    };
    let (img_w, img_h) = (hires.width(), hires.height());
    let (pw, ph) = (context.renders.page_width_pt, context.renders.page_height_pt);
    let scale_x = img_w as f32 / pw;
    let scale_y = img_h as f32 / ph;

    // First pass: locate every description, hinted by the model bbox centre.
    let mut text_rects: HashMap<usize, Rect> = HashMap::new();
    for (idx, sym) in symbols.iter().enumerate() {
        let hint = sym
            .bbox_pct
            .map(|b| ((b[0] + b[2]) / 2.0, (b[1] + b[3]) / 2.0));
        if let Some(rect) = find_text_on_page(&context.text, &sym.description, hint) {
            text_rects.insert(idx, rect);
        }
    }
    debug!(
        located = text_rects.len(),
        total = symbols.len(),
        "description relocation complete"
    );

    let columns = group_columns(&text_rects);
    let left_margin = detect_left_margin(&context.text);
    let col_left = column_left_boundaries(&columns, &context.text.vertical_rules, left_margin);
    let headers = header_rects(&context.text);
    let (bounds, col_of) = row_bounds(&columns, &headers, ph);

    let mut entries = Vec::with_capacity(symbols.len());
    for (idx, sym) in symbols.iter().enumerate() {
        let ordinal = idx as u32 + 1;

        let crop_rect_pt = if let Some(text_rect) = text_rects.get(&idx) {
            let (mut y_top, mut y_bottom) = bounds.get(&idx).copied().unwrap_or((
                (text_rect.y0 - 10.0).max(0.0),
                (text_rect.y1 + 10.0).min(ph),
            ));

            let height = y_bottom - y_top;
            if height < MIN_HEIGHT_PT {
                let cy = (y_top + y_bottom) / 2.0;
                y_top = (cy - MIN_HEIGHT_PT / 2.0).max(0.0);
                y_bottom = (cy + MIN_HEIGHT_PT / 2.0).min(ph);
            } else if height > MAX_HEIGHT_PT {
                let cy = (text_rect.y0 + text_rect.y1) / 2.0;
                y_top = (cy - MAX_HEIGHT_PT / 2.0).max(0.0);
                y_bottom = (cy + MAX_HEIGHT_PT / 2.0).min(ph);
            }

            let column_left = col_of
                .get(&idx)
                .and_then(|ci| col_left.get(*ci).copied())
                .unwrap_or(left_margin);
            let x0 = column_left.max(text_rect.x0 - SYM_WIDTH_PT);

            // The right edge stops short of the nearest description text in
            // this row band so neighbouring rows cannot bleed in.
            let mut right_clamp = text_rect.x0;
            for (other_idx, other) in &text_rects {
                if *other_idx == idx {
                    continue;
                }
                if other.y_overlaps(y_top, y_bottom) && (other.x0 - text_rect.x0).abs() < 60.0 {
                    right_clamp = right_clamp.min(other.x0);
                }
            }
            let x1 = (right_clamp - RIGHT_INSET_PT).max(x0 + 10.0);
            Some(Rect::new(x0, y_top, x1, y_bottom))
        } else if let Some(bbox) = sym.bbox_pct {
            // No text hit: fall back to the model bbox with generous padding.
            let mut y0 = (bbox[1] as f32 * ph - 15.0).max(0.0);
            let mut y1 = (bbox[3] as f32 * ph + 15.0).min(ph);
            let height = y1 - y0;
            if height < MIN_HEIGHT_PT {
                let cy = (y0 + y1) / 2.0;
                y0 = (cy - MIN_HEIGHT_PT / 2.0).max(0.0);
                y1 = (cy + MIN_HEIGHT_PT / 2.0).min(ph);
            } else if height > MAX_HEIGHT_PT {
                let cy = (y0 + y1) / 2.0;
                y0 = (cy - MAX_HEIGHT_PT / 2.0).max(0.0);
                y1 = (cy + MAX_HEIGHT_PT / 2.0).min(ph);
            }
            let x0 = (bbox[0] as f32 * pw - 10.0).max(0.0);
            let x1 = (bbox[2] as f32 * pw + 10.0).min(pw);
            Some(Rect::new(x0, y0, x1, y1))
        } else {
            None
        };

        let image_file = crop_rect_pt.and_then(|rect| {
            let px0 = (rect.x0 * scale_x).max(0.0) as u32;
            let py0 = (rect.y0 * scale_y).max(0.0) as u32;
            let px1 = ((rect.x1 * scale_x) as u32).min(img_w);
            let py1 = ((rect.y1 * scale_y) as u32).min(img_h);
            if px1.saturating_sub(px0) < 15 || py1.saturating_sub(py0) < 10 {
                return None;
            }
            save_symbol_crop(&hires, px0, py0, px1, py1, ordinal, sym.category, symbols_dir)
        });

        let mut entry = entry_without_image(ordinal, sym);
        if let Some((path, filename)) = image_file {
            entry.image_path = Some(path.display().to_string());
            entry.image_filename = Some(filename);
        }
        entries.push(entry);
    }

    let cropped = entries.iter().filter(|e| e.image_filename.is_some()).count();
    info!(cropped, total = entries.len(), "symbol crops written");
    entries
}

fn entry_without_image(ordinal: u32, sym: &CleanSymbol) -> SymbolEntry {
    SymbolEntry {
        id: ordinal,
        category: sym.category,
        symbol_name: sym.symbol_name.clone(),
        description: sym.description.clone(),
        image_path: None,
        image_filename: None,
        bbox_pct: sym.bbox_pct,
    }
}

fn save_symbol_crop(
    hires: &DynamicImage,
    px0: u32,
    py0: u32,
    px1: u32,
    py1: u32,
    ordinal: u32,
    category: SymbolCategory,
    symbols_dir: &Path,
) -> Option<(PathBuf, String)> {
    let crop = hires.crop_imm(px0, py0, px1 - px0, py1 - py0);
    let crop = whiten_gray_background(crop);
    let crop = trim_grid_borders(crop);
    let crop = auto_crop_to_content(crop, 6);

    let filename = format!(
        "symbol_{ordinal:03}_{}.png",
        category.as_str().to_lowercase()
    );
    let path = symbols_dir.join(&filename);
    match crop.save_with_format(&path, image::ImageFormat::Png) {
        Ok(()) => Some((path, filename)),
        Err(e) => {
            warn!(ordinal, error = %e, "symbol crop failed");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pipedoc_pdf::TextSpan;

    fn context_with(spans: Vec<(&str, Rect)>, hires_path: PathBuf) -> LegendPageContext {
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
                vertical_rules: vec![110.0],
            },
        }
    }

    fn clean(category: SymbolCategory, desc: &str) -> CleanSymbol {
        CleanSymbol {
            category,
            symbol_name: String::new(),
            description: desc.to_string(),
            bbox_pct: None,
        }
    }

    #[test]
    fn crop_produces_images_and_ordinals() {
        let dir = tempfile::tempdir().unwrap();
        // Synthetic white hires page at the scale implied by 800x600 pt.
        let hires = image::DynamicImage::ImageLuma8(image::GrayImage::from_pixel(
            3333, 2500, image::Luma([255u8]),
        ));
        let hires_path = dir.path().join("legend_page_full.png");
        hires.save(&hires_path).unwrap();

        let context = context_with(
            vec![
                ("BALL VALVE (OPEN)", Rect::new(200.0, 100.0, 330.0, 108.0)),
                ("GATE VALVE (OPEN)", Rect::new(200.0, 140.0, 330.0, 148.0)),
            ],
            hires_path,
        );
        let symbols = vec![
            clean(SymbolCategory::Valve, "BALL VALVE (OPEN)"),
            clean(SymbolCategory::Valve, "GATE VALVE (OPEN)"),
            clean(SymbolCategory::Other, "NOT ON THE PAGE ANYWHERE"),
        ];

        let entries = crop_symbol_images(symbols, &context, dir.path());
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].id, 1);
        assert_eq!(entries[2].id, 3);
        // Located symbols carry a written image; the unlocated one does not.
        assert!(entries[0].image_filename.as_deref().unwrap().starts_with("symbol_001_valve"));
        assert!(dir
            .path()
            .join(entries[0].image_filename.as_deref().unwrap())
            .exists());
        assert!(entries[2].image_filename.is_none());
    }
}
