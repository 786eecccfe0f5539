//! Per-page records for isometric BOM extraction.
//!
//! These are the deserialization targets for vision-model output, so every
//! list field defaults to empty and component kinds stay open strings. The
//! reconciler in `pipedoc-bom` maps kinds onto its closed taxonomy.

use serde::{Deserialize, Serialize};

/// A red-tagged pipe piece on the isometric routing (e.g. `PG119-1`).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PipePiece {
    pub id: String,
    /// Nominal size, e.g. `6"`.
    #[serde(default)]
    pub size: String,
    /// Pipe schedule, e.g. `Sch80S`.
    #[serde(default)]
    pub schedule: String,
    #[serde(default)]
    pub material: String,
    /// `text_extraction` for pieces recovered from the text layer only.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub source: String,
}

/// A drawing component (valve, fitting, flange, support, instrument).
///
/// `kind` and `subtype` are open strings because model responses
/// occasionally return novel values; the reconciler degrades such rows to a
/// type-only match.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Component {
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub subtype: String,
    #[serde(default)]
    pub size: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub tag: String,
    #[serde(default = "default_quantity")]
    pub quantity: f64,
}

const fn default_quantity() -> f64 {
    1.0
}

/// Weld kinds. Weld ids prefixed `FFW` are field fits; all others are shop
/// welds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WeldKind {
    ShopWeld,
    FieldFitWeld,
}

impl WeldKind {
    /// Classify a weld id by its prefix.
    #[must_use]
    pub fn from_id(id: &str) -> Self {
        if id.trim_start().to_uppercase().starts_with("FFW") {
            Self::FieldFitWeld
        } else {
            Self::ShopWeld
        }
    }
}

/// A weld point on the routing (`W1`, `FFW2`, …).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WeldPoint {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: WeldKind,
}

/// A dimension annotation between two weld points.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DimensionMm {
    #[serde(default)]
    pub from_point: String,
    #[serde(default)]
    pub to_point: String,
    pub length_mm: f64,
    /// `horizontal`, `vertical`, or `angled`.
    #[serde(default)]
    pub direction: String,
    /// `text` for dimensions recovered from the text layer.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub source: String,
}

/// One fabrication cut length (`736 MM <1>`).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CutLength {
    pub cut_no: u32,
    pub length_mm: f64,
}

/// One row of the BOM items table.
///
/// Every row carries either a letter code (`A`…) or, on the cover sheet's
/// numbered layout, the item number in the same slot. Quantities stay
/// strings because pipe quantities carry units (`9.5 M`).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BomItem {
    #[serde(default)]
    pub letter_code: String,
    #[serde(default)]
    pub quantity: String,
    #[serde(default)]
    pub size_inches: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub material_spec: String,
    #[serde(default)]
    pub weight_kg: f64,
    #[serde(default)]
    pub remarks: String,
}

/// Title-block fields read during the table pass.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DrawingInfo {
    #[serde(default)]
    pub drawing_number: String,
    #[serde(default)]
    pub revision: String,
    #[serde(default)]
    pub date: String,
    #[serde(default)]
    pub scale: String,
    #[serde(default)]
    pub project: String,
    #[serde(default)]
    pub line_description: String,
    #[serde(default)]
    pub line_no: String,
    #[serde(default)]
    pub pipe_no: String,
}

/// Totals row of the BOM table, when printed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct BomTotals {
    #[serde(default)]
    pub total_weight_kg: f64,
    #[serde(default)]
    pub total_pipe_length_m: f64,
}

/// Full extraction result for one isometric page after both vision passes
/// and the text-layer merge.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PageBomRecord {
    /// 1-indexed page number.
    pub page: u32,
    #[serde(default)]
    pub drawing_number: String,
    #[serde(default)]
    pub pipe_group: String,
    #[serde(default)]
    pub line_no: String,
    #[serde(default)]
    pub pipe_no: String,
    #[serde(default)]
    pub line_description: String,
    #[serde(default)]
    pub pipe_pieces: Vec<PipePiece>,
    #[serde(default)]
    pub components: Vec<Component>,
    #[serde(default)]
    pub weld_points: Vec<WeldPoint>,
    #[serde(default)]
    pub dimensions_mm: Vec<DimensionMm>,
    #[serde(default)]
    pub bom_table: Vec<BomItem>,
    #[serde(default)]
    pub cut_lengths: Vec<CutLength>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub drawing_info: Option<DrawingInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bom_totals: Option<BomTotals>,
    #[serde(default)]
    pub total_weld_count: u32,
    #[serde(default)]
    pub shop_weld_count: u32,
    #[serde(default)]
    pub field_weld_count: u32,
    /// Weld count seen by the text extractor, kept alongside the model's for
    /// cross-checking.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weld_count_text: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weld_count_vlm: Option<u32>,
    #[serde(default)]
    pub has_loose_parts: bool,
    #[serde(default)]
    pub notes: String,
    #[serde(default)]
    pub confidence: f64,
    /// True when the page is a cover/index sheet; all list fields stay
    /// empty.
    #[serde(default)]
    pub is_cover: bool,
    pub drawing_analysis_ok: bool,
    pub table_analysis_ok: bool,
    /// Short failure message when a pass failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Model identifier the page was analyzed with.
    #[serde(default)]
    pub vlm_source: String,
}

impl PageBomRecord {
    /// Recompute the shop/field weld partition from `weld_points`.
    ///
    /// Returns `(shop, field)`. The derived counts always partition the
    /// weld point list; `total_weld_count` may exceed their sum when the
    /// model counted welds it did not enumerate.
    #[must_use]
    pub fn weld_partition(&self) -> (u32, u32) {
        let field = self
            .weld_points
            .iter()
            .filter(|w| w.kind == WeldKind::FieldFitWeld)
            .count() as u32;
        let shop = self.weld_points.len() as u32 - field;
        (shop, field)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn weld_kind_from_prefix() {
        assert_eq!(WeldKind::from_id("W12"), WeldKind::ShopWeld);
        assert_eq!(WeldKind::from_id("FFW1"), WeldKind::FieldFitWeld);
        assert_eq!(WeldKind::from_id("ffw3"), WeldKind::FieldFitWeld);
    }

    #[test]
    fn weld_partition_splits_by_prefix_kind() {
        let record = PageBomRecord {
            page: 2,
            weld_points: vec![
                WeldPoint {
                    id: "W1".into(),
                    kind: WeldKind::ShopWeld,
                },
                WeldPoint {
                    id: "W2".into(),
                    kind: WeldKind::ShopWeld,
                },
                WeldPoint {
                    id: "FFW1".into(),
                    kind: WeldKind::FieldFitWeld,
                },
            ],
            total_weld_count: 16,
            ..Default::default()
        };
        let (shop, field) = record.weld_partition();
        assert_eq!((shop, field), (2, 1));
        assert!(shop + field <= record.total_weld_count);
    }

    #[test]
    fn record_tolerates_sparse_model_output() {
        // Only a page number and one half-filled component: everything else
        // must default.
        let json = r#"{
            "page": 4,
            "components": [{"type": "fitting", "subtype": "tee"}],
            "drawing_analysis_ok": true,
            "table_analysis_ok": false
        }"#;
        let record: PageBomRecord = serde_json::from_str(json).unwrap();
        assert_eq!(record.page, 4);
        assert_eq!(record.components.len(), 1);
        assert!((record.components[0].quantity - 1.0).abs() < f64::EPSILON);
        assert!(record.pipe_pieces.is_empty());
        assert!(record.drawing_info.is_none());
    }
}
