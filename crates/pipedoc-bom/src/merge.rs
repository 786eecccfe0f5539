//! Cross-checking the vision record against the regex text extraction.

use pipedoc_core::{DimensionMm, PageBomRecord, PipePiece};
use pipedoc_extract::TextPageExtract;

/// Fold a page's text extraction into its vision record:
///
/// - pipe pieces the text layer found but the model missed are appended
///   with provenance `text_extraction`
/// - both weld counts are retained (`weld_count_text` / `weld_count_vlm`);
///   the maximum becomes the canonical `total_weld_count`
/// - text dimensions are adopted (tagged `text`) only when the model
///   produced none
///
/// The fold is idempotent, and folding into an empty vision record yields
/// the text record's content.
#[must_use]
pub fn merge_text_and_vlm(text: &TextPageExtract, vlm: PageBomRecord) -> PageBomRecord {
    let mut merged = vlm;

    let existing: std::collections::HashSet<String> =
        merged.pipe_pieces.iter().map(|p| p.id.clone()).collect();
    for piece_id in &text.pipe_pieces {
        if !existing.contains(piece_id) {
            merged.pipe_pieces.push(PipePiece {
                id: piece_id.clone(),
                source: "text_extraction".to_string(),
                ..Default::default()
            });
        }
    }

    if text.weld_count > 0 {
        if merged.total_weld_count > 0 {
            merged.weld_count_text = Some(text.weld_count);
            merged.weld_count_vlm = Some(
                merged
                    .weld_count_vlm
                    .unwrap_or(merged.total_weld_count),
            );
            merged.total_weld_count = merged.total_weld_count.max(text.weld_count);
        } else {
            // Empty vision result: the text count stands alone.
            merged.weld_count_text = Some(text.weld_count);
            merged.total_weld_count = text.weld_count;
        }
    }

    if merged.dimensions_mm.is_empty() && !text.dimensions_mm.is_empty() {
        merged.dimensions_mm = text
            .dimensions_mm
            .iter()
            .map(|&length_mm| DimensionMm {
                length_mm,
                source: "text".to_string(),
                ..Default::default()
            })
            .collect();
    }

    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use pipedoc_core::WeldKind;
    use pipedoc_core::WeldPoint;

    fn text_page() -> TextPageExtract {
        TextPageExtract {
            page: 2,
            pipe_pieces: vec!["PG101-1".into(), "PG101-2".into()],
            weld_items: vec!["W1".into(), "W2".into(), "FFW1".into()],
            weld_count: 3,
            dimensions_mm: vec![500.0, 736.0],
            ..Default::default()
        }
    }

    fn vlm_page() -> PageBomRecord {
        PageBomRecord {
            page: 2,
            pipe_pieces: vec![PipePiece {
                id: "PG101-1".into(),
                size: "6\"".into(),
                ..Default::default()
            }],
            weld_points: vec![
                WeldPoint {
                    id: "W1".into(),
                    kind: WeldKind::ShopWeld,
                },
                WeldPoint {
                    id: "FFW1".into(),
                    kind: WeldKind::FieldFitWeld,
                },
            ],
            total_weld_count: 2,
            dimensions_mm: vec![],
            drawing_analysis_ok: true,
            table_analysis_ok: true,
            ..Default::default()
        }
    }

    #[test]
    fn text_only_pieces_are_appended_with_provenance() {
        let merged = merge_text_and_vlm(&text_page(), vlm_page());
        assert_eq!(merged.pipe_pieces.len(), 2);
        let added = &merged.pipe_pieces[1];
        assert_eq!(added.id, "PG101-2");
        assert_eq!(added.source, "text_extraction");
        // The model's own piece keeps its metadata.
        assert_eq!(merged.pipe_pieces[0].size, "6\"");
    }

    #[test]
    fn weld_counts_cross_check_with_max_as_canonical() {
        let merged = merge_text_and_vlm(&text_page(), vlm_page());
        assert_eq!(merged.weld_count_text, Some(3));
        assert_eq!(merged.weld_count_vlm, Some(2));
        assert_eq!(merged.total_weld_count, 3);
    }

    #[test]
    fn text_dimensions_adopted_only_when_model_has_none() {
        let merged = merge_text_and_vlm(&text_page(), vlm_page());
        assert_eq!(merged.dimensions_mm.len(), 2);
        assert_eq!(merged.dimensions_mm[0].source, "text");

        let mut with_dims = vlm_page();
        with_dims.dimensions_mm = vec![DimensionMm {
            from_point: "W1".into(),
            to_point: "W2".into(),
            length_mm: 500.0,
            direction: "horizontal".into(),
            source: String::new(),
        }];
        let merged = merge_text_and_vlm(&text_page(), with_dims);
        assert_eq!(merged.dimensions_mm.len(), 1);
        assert_eq!(merged.dimensions_mm[0].from_point, "W1");
    }

    #[test]
    fn merge_is_idempotent() {
        let text = text_page();
        let once = merge_text_and_vlm(&text, vlm_page());
        let twice = merge_text_and_vlm(&text, once.clone());
        assert_eq!(once, twice);
    }

    #[test]
    fn empty_vision_record_yields_text_content() {
        let text = text_page();
        let empty = PageBomRecord {
            page: 2,
            ..Default::default()
        };
        let merged = merge_text_and_vlm(&text, empty);
        assert_eq!(merged.pipe_pieces.len(), 2);
        assert!(merged
            .pipe_pieces
            .iter()
            .all(|p| p.source == "text_extraction"));
        assert_eq!(merged.total_weld_count, 3);
        assert_eq!(merged.weld_count_text, Some(3));
        assert_eq!(merged.weld_count_vlm, None);
        assert_eq!(merged.dimensions_mm.len(), 2);
    }
}
