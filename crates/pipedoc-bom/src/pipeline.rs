//! Two-pass per-page BOM extraction.
//!
//! Each isometric page is analyzed twice: the full drawing view (pipes,
//! welds, dimensions, components), then the cropped BOM table at higher
//! resolution. Pages run strictly sequentially; the paced client keeps a
//! half-second gap between model calls. A page failure marks that page and
//! moves on.

use std::path::Path;

use serde_json::Value;
use tracing::{error, info, warn};

use pipedoc_core::{
    CancelFlag, Component, DimensionMm, PageBomRecord, PipePiece, Result, WeldKind, WeldPoint,
};
use pipedoc_extract::TextPageExtract;
use pipedoc_pdf::PageRenderer;
use pipedoc_vlm::{prompts, recovery, PacedVlm};

use crate::merge::merge_text_and_vlm;
use crate::normalize::{as_array, as_bool, as_f64, as_string, as_u32};
use crate::postprocess::postprocess_table;
use crate::stats::compute_extraction_stats;

const DRAWING_MAX_TOKENS: u32 = 4096;
const TABLE_MAX_TOKENS: u32 = 8000;

/// Fold the drawing-pass payload onto the page record.
fn apply_drawing_pass(record: &mut PageBomRecord, payload: &Value) {
    record.drawing_number = as_string(payload.get("drawing_number"));
    record.pipe_group = as_string(payload.get("pipe_group"));
    record.line_no = as_string(payload.get("line_no"));
    record.pipe_no = as_string(payload.get("pipe_no"));
    record.line_description = as_string(payload.get("line_description"));
    record.notes = as_string(payload.get("notes"));
    record.confidence = as_f64(payload.get("confidence"));
    record.has_loose_parts = as_bool(payload.get("has_loose_parts"));
    record.total_weld_count = as_u32(payload.get("total_weld_count"));
    record.shop_weld_count = as_u32(payload.get("shop_weld_count"));
    record.field_weld_count = as_u32(payload.get("field_weld_count"));

    record.pipe_pieces = as_array(payload.get("pipe_pieces"))
        .iter()
        .filter_map(|p| match p {
            Value::String(id) if !id.trim().is_empty() => Some(PipePiece {
                id: id.trim().to_string(),
                ..Default::default()
            }),
            Value::Object(_) => {
                let id = as_string(p.get("id"));
                if id.is_empty() {
                    None
                } else {
                    Some(PipePiece {
                        id,
                        size: as_string(p.get("size")),
                        schedule: as_string(p.get("schedule")),
                        material: as_string(p.get("material")),
                        source: String::new(),
                    })
                }
            }
            _ => None,
        })
        .collect();

    record.components = as_array(payload.get("components"))
        .iter()
        .filter(|c| c.is_object())
        .map(|c| Component {
            kind: as_string(c.get("type")).to_lowercase(),
            subtype: as_string(c.get("subtype")).to_lowercase(),
            size: as_string(c.get("size")),
            description: as_string(c.get("description")),
            tag: as_string(c.get("tag")),
            quantity: {
                let q = as_f64(c.get("quantity"));
                if q > 0.0 {
                    q
                } else {
                    1.0
                }
            },
        })
        .collect();

    record.weld_points = as_array(payload.get("weld_points"))
        .iter()
        .filter_map(|w| {
            let id = as_string(w.get("id"));
            if id.is_empty() {
                return None;
            }
            let kind = match as_string(w.get("type")).as_str() {
                "field_fit_weld" => WeldKind::FieldFitWeld,
                "shop_weld" => WeldKind::ShopWeld,
                _ => WeldKind::from_id(&id),
            };
            Some(WeldPoint { id, kind })
        })
        .collect();

    record.dimensions_mm = as_array(payload.get("dimensions_mm"))
        .iter()
        .filter_map(|d| match d {
            Value::Number(n) => n.as_f64().map(|length_mm| DimensionMm {
                length_mm,
                ..Default::default()
            }),
            Value::Object(_) => {
                let length_mm = as_f64(d.get("length_mm"));
                if length_mm <= 0.0 {
                    return None;
                }
                Some(DimensionMm {
                    from_point: as_string(d.get("from_point")),
                    to_point: as_string(d.get("to_point")),
                    length_mm,
                    direction: as_string(d.get("direction")),
                    source: String::new(),
                })
            }
            _ => None,
        })
        .collect();
}

/// Title-block fields from the table pass fill whatever the drawing pass
/// left blank.
fn enrich_from_drawing_info(record: &mut PageBomRecord) {
    let Some(info) = record.drawing_info.clone() else {
        return;
    };
    if record.drawing_number.is_empty() {
        record.drawing_number = info.drawing_number;
    }
    if record.line_no.is_empty() {
        record.line_no = info.line_no;
    }
    if record.pipe_no.is_empty() {
        record.pipe_no = info.pipe_no;
    }
    if record.line_description.is_empty() {
        record.line_description = info.line_description;
    }
}

/// Two-pass analysis of a single page.
async fn analyze_single_page(
    vlm: &PacedVlm,
    full_img: &Path,
    table_img: Option<&Path>,
    page_no: u32,
    symbol_ref: Option<&str>,
    cancel: &CancelFlag,
) -> Result<PageBomRecord> {
    let mut record = PageBomRecord {
        page: page_no,
        vlm_source: vlm.model().to_string(),
        ..Default::default()
    };

    // Pass 1: the full drawing view.
    let prompt = prompts::drawing_analysis_prompt(page_no, symbol_ref);
    match vlm
        .chat(&[(full_img, "image/png")], &prompt, DRAWING_MAX_TOKENS)
        .await
    {
        Ok(text) => match recovery::recover_object(&text) {
            Ok(payload) => {
                apply_drawing_pass(&mut record, &payload);
                record.drawing_analysis_ok = true;
            }
            Err(e) => {
                warn!(page_no, error = %e, "drawing pass returned unparseable output");
                record.error = Some(e.to_string());
            }
        },
        Err(e) => {
            error!(page_no, error = %e, "drawing pass failed");
            record.error = Some(e.to_string());
        }
    }

    cancel.check()?;

    // Pass 2: the table crop, when the crop rendered.
    if let Some(table_img) = table_img {
        let table_prompt = prompts::table_analysis_prompt(page_no);
        match vlm
            .chat(&[(table_img, "image/png")], &table_prompt, TABLE_MAX_TOKENS)
            .await
        {
            Ok(text) => match recovery::recover_object(&text) {
                Ok(payload) => {
                    let table = postprocess_table(&payload);
                    record.bom_table = table.bom_items;
                    record.cut_lengths = table.cut_lengths;
                    record.drawing_info = table.drawing_info;
                    record.bom_totals = table.bom_totals;
                    record.table_analysis_ok = true;
                }
                Err(e) => {
                    warn!(page_no, error = %e, "table pass returned unparseable output");
                }
            },
            Err(e) => {
                error!(page_no, error = %e, "table pass failed");
            }
        }
    }

    enrich_from_drawing_info(&mut record);
    Ok(record)
}

/// Run the full pipeline over a BOM PDF: render, analyze, merge, dump.
///
/// `symbol_ref` is the legend reference block from a previous P&ID session;
/// it is an explicit parameter, resolved by the caller. `text_pages` is the
/// regex extraction to cross-check against (index = page - 1).
///
/// Writes `vlm_bom_data.json` and `vlm_extraction_stats.json` under
/// `out_dir`; both are byte-stable given identical model responses.
///
/// # Errors
///
/// Returns an error on cancellation, when the PDF cannot be opened, or
/// when outputs cannot be written. Page-level failures are recorded on the
/// page and do not abort the run.
pub async fn run_bom_pipeline(
    vlm: &PacedVlm,
    pdf_path: &Path,
    out_dir: &Path,
    symbol_ref: Option<&str>,
    text_pages: Option<&[TextPageExtract]>,
    cancel: &CancelFlag,
) -> Result<Vec<PageBomRecord>> {
    std::fs::create_dir_all(out_dir)?;
    let total_pages = {
        let renderer = PageRenderer::new()?;
        renderer.page_count(pdf_path)? as u32
    };
    info!(total_pages, path = %pdf_path.display(), "starting BOM analysis");
    let run_start = std::time::Instant::now();

    let mut records: Vec<PageBomRecord> = Vec::with_capacity(total_pages as usize);
    for page_no in 1..=total_pages {
        cancel.check()?;
        let page_start = std::time::Instant::now();

        // Render inside a scope so the PDF handle never crosses an await.
        let rendered = {
            let renderer = PageRenderer::new()?;
            renderer.render_page_for_vlm(pdf_path, page_no, out_dir)
        };
        let mut record = match rendered {
            Ok((full_img, table_img)) => {
                analyze_single_page(
                    vlm,
                    &full_img,
                    table_img.as_deref(),
                    page_no,
                    symbol_ref,
                    cancel,
                )
                .await?
            }
            Err(e) if e.is_session_fatal() => return Err(e),
            Err(e) => {
                error!(page_no, error = %e, "page render failed");
                PageBomRecord {
                    page: page_no,
                    vlm_source: vlm.model().to_string(),
                    error: Some(e.to_string()),
                    ..Default::default()
                }
            }
        };

        if let Some(text_pages) = text_pages {
            if let Some(text_page) = text_pages.get(page_no as usize - 1) {
                record = merge_text_and_vlm(text_page, record);
                record.is_cover = text_page.is_cover;
            }
        }

        info!(
            page_no,
            total_pages,
            elapsed_s = format!("{:.1}", page_start.elapsed().as_secs_f64()),
            drawing_ok = record.drawing_analysis_ok,
            table_ok = record.table_analysis_ok,
            bom_items = record.bom_table.len(),
            cuts = record.cut_lengths.len(),
            "page analyzed"
        );
        records.push(record);
    }

    cancel.check()?;
    let json_path = out_dir.join("vlm_bom_data.json");
    std::fs::write(&json_path, serde_json::to_string_pretty(&records)?)?;

    let stats = compute_extraction_stats(&records);
    let stats_path = out_dir.join("vlm_extraction_stats.json");
    std::fs::write(&stats_path, serde_json::to_string_pretty(&stats)?)?;

    info!(
        total_pages,
        elapsed_s = format!("{:.1}", run_start.elapsed().as_secs_f64()),
        coverage_pct = stats.analysis_coverage_pct,
        "BOM analysis complete"
    );
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn drawing_pass_normalizes_loose_payload() {
        let payload = json!({
            "drawing_number": "1-125.629.021",
            "pipe_group": "PG119",
            "line_no": 119,
            "pipe_pieces": [
                {"id": "PG119-1", "size": "6\"", "schedule": "Sch80S", "material": "SS304"},
                "PG119-2"
            ],
            "components": [
                {"type": "Fitting", "subtype": "Elbow_90_LR", "quantity": "2"},
                {"type": "valve", "subtype": "gate"}
            ],
            "weld_points": [
                {"id": "W1", "type": "shop_weld"},
                {"id": "FFW1"}
            ],
            "dimensions_mm": [
                {"from_point": "W1", "to_point": "W2", "length_mm": 500, "direction": "horizontal"},
                736
            ],
            "total_weld_count": 16,
            "shop_weld_count": 14,
            "field_weld_count": 2,
            "has_loose_parts": true,
            "confidence": 0.95
        });
        let mut record = PageBomRecord {
            page: 3,
            ..Default::default()
        };
        apply_drawing_pass(&mut record, &payload);

        assert_eq!(record.line_no, "119");
        assert_eq!(record.pipe_pieces.len(), 2);
        assert_eq!(record.pipe_pieces[1].id, "PG119-2");
        assert_eq!(record.components.len(), 2);
        assert_eq!(record.components[0].kind, "fitting");
        assert_eq!(record.components[0].subtype, "elbow_90_lr");
        assert!((record.components[0].quantity - 2.0).abs() < f64::EPSILON);
        assert!((record.components[1].quantity - 1.0).abs() < f64::EPSILON);
        // Untyped weld point classified by its id prefix.
        assert_eq!(record.weld_points[1].kind, WeldKind::FieldFitWeld);
        assert_eq!(record.dimensions_mm.len(), 2);
        assert!((record.dimensions_mm[1].length_mm - 736.0).abs() < f64::EPSILON);
        assert!(record.has_loose_parts);
        let (shop, field) = record.weld_partition();
        assert!(shop + field <= record.total_weld_count);
    }

    #[test]
    fn drawing_info_fills_blank_fields_only() {
        let mut record = PageBomRecord {
            page: 4,
            drawing_number: "FROM-DRAWING".into(),
            drawing_info: Some(pipedoc_core::DrawingInfo {
                drawing_number: "FROM-TABLE".into(),
                line_no: "120".into(),
                pipe_no: "G_D4-3".into(),
                line_description: "DISCHARGE LINE 4TH STAGE".into(),
                ..Default::default()
            }),
            ..Default::default()
        };
        enrich_from_drawing_info(&mut record);
        assert_eq!(record.drawing_number, "FROM-DRAWING");
        assert_eq!(record.line_no, "120");
        assert_eq!(record.pipe_no, "G_D4-3");
        assert_eq!(record.line_description, "DISCHARGE LINE 4TH STAGE");
    }
}
