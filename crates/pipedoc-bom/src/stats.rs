//! Aggregate extraction statistics over a document's page records.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use pipedoc_core::PageBomRecord;

/// Summary written to `vlm_extraction_stats.json`. Maps are ordered so
/// re-runs over identical inputs serialize byte-identically.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExtractionStats {
    pub total_pages: usize,
    pub pages_with_data: usize,
    pub drawing_analysis_success: usize,
    pub table_analysis_success: usize,
    pub total_pipe_pieces: usize,
    pub total_components: usize,
    pub total_weld_points: usize,
    pub total_bom_items: usize,
    pub total_cut_lengths: usize,
    pub total_dimensions: usize,
    pub valve_types: BTreeMap<String, f64>,
    pub fitting_types: BTreeMap<String, f64>,
    pub unique_line_nos: Vec<String>,
    pub analysis_coverage_pct: f64,
}

/// Compute the summary for a full document.
#[must_use]
pub fn compute_extraction_stats(pages: &[PageBomRecord]) -> ExtractionStats {
    let mut stats = ExtractionStats {
        total_pages: pages.len(),
        ..Default::default()
    };
    let mut line_nos: BTreeSet<String> = BTreeSet::new();

    for page in pages {
        if page.drawing_analysis_ok {
            stats.drawing_analysis_success += 1;
        }
        if page.table_analysis_ok {
            stats.table_analysis_success += 1;
        }
        if !page.pipe_pieces.is_empty() || !page.bom_table.is_empty() {
            stats.pages_with_data += 1;
        }
        if !page.line_no.is_empty() {
            line_nos.insert(page.line_no.clone());
        }

        stats.total_pipe_pieces += page.pipe_pieces.len();
        stats.total_components += page.components.len();
        for comp in &page.components {
            let subtype = if comp.subtype.is_empty() {
                "unknown".to_string()
            } else {
                comp.subtype.clone()
            };
            match comp.kind.as_str() {
                "valve" => *stats.valve_types.entry(subtype).or_insert(0.0) += comp.quantity,
                "fitting" => *stats.fitting_types.entry(subtype).or_insert(0.0) += comp.quantity,
                _ => {}
            }
        }
        stats.total_weld_points += page.weld_points.len();
        stats.total_bom_items += page.bom_table.len();
        stats.total_cut_lengths += page.cut_lengths.len();
        stats.total_dimensions += page.dimensions_mm.len();
    }

    stats.unique_line_nos = line_nos.into_iter().collect();
    stats.analysis_coverage_pct = if pages.is_empty() {
        0.0
    } else {
        (stats.pages_with_data as f64 / pages.len() as f64 * 1000.0).round() / 10.0
    };
    stats
}

#[cfg(test)]
mod tests {
    use super::*;
    use pipedoc_core::{BomItem, Component};

    #[test]
    fn stats_aggregate_types_and_coverage() {
        let pages = vec![
            PageBomRecord {
                page: 1,
                is_cover: true,
                ..Default::default()
            },
            PageBomRecord {
                page: 2,
                line_no: "119".into(),
                drawing_analysis_ok: true,
                table_analysis_ok: true,
                components: vec![
                    Component {
                        kind: "valve".into(),
                        subtype: "gate".into(),
                        quantity: 2.0,
                        ..Default::default()
                    },
                    Component {
                        kind: "fitting".into(),
                        subtype: "tee".into(),
                        quantity: 1.0,
                        ..Default::default()
                    },
                ],
                bom_table: vec![BomItem::default()],
                ..Default::default()
            },
        ];
        let stats = compute_extraction_stats(&pages);
        assert_eq!(stats.total_pages, 2);
        assert_eq!(stats.pages_with_data, 1);
        assert_eq!(stats.drawing_analysis_success, 1);
        assert!((stats.valve_types["gate"] - 2.0).abs() < f64::EPSILON);
        assert!((stats.fitting_types["tee"] - 1.0).abs() < f64::EPSILON);
        assert_eq!(stats.unique_line_nos, vec!["119"]);
        assert!((stats.analysis_coverage_pct - 50.0).abs() < f64::EPSILON);
    }

    #[test]
    fn stats_serialize_deterministically() {
        let pages = vec![PageBomRecord {
            page: 2,
            components: vec![
                Component {
                    kind: "valve".into(),
                    subtype: "globe".into(),
                    quantity: 1.0,
                    ..Default::default()
                },
                Component {
                    kind: "valve".into(),
                    subtype: "ball".into(),
                    quantity: 1.0,
                    ..Default::default()
                },
            ],
            ..Default::default()
        }];
        let a = serde_json::to_string(&compute_extraction_stats(&pages)).unwrap();
        let b = serde_json::to_string(&compute_extraction_stats(&pages)).unwrap();
        assert_eq!(a, b);
        // BTreeMap ordering: ball before globe.
        assert!(a.find("ball").unwrap() < a.find("globe").unwrap());
    }
}
