//! BOM-vs-drawing comparison results.

use serde::{Deserialize, Serialize};

/// Verdict for one reconciled BOM row or orphan drawing component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MatchStatus {
    #[serde(rename = "MATCH")]
    Match,
    #[serde(rename = "MISMATCH")]
    Mismatch,
    /// The BOM row found no drawing counterpart.
    #[serde(rename = "BOM_ONLY")]
    BomOnly,
    /// A drawing component group no BOM row consumed.
    #[serde(rename = "DRAWING_ONLY")]
    DrawingOnly,
    /// Deliberately skipped: gaskets, bolts, paint, metre-priced pipe.
    #[serde(rename = "N/A")]
    NotApplicable,
}

impl std::fmt::Display for MatchStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Match => "MATCH",
            Self::Mismatch => "MISMATCH",
            Self::BomOnly => "BOM_ONLY",
            Self::DrawingOnly => "DRAWING_ONLY",
            Self::NotApplicable => "N/A",
        };
        f.write_str(s)
    }
}

/// One comparison line: the BOM side, the drawing side, and the verdict.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComparisonItem {
    #[serde(default)]
    pub bom_letter: String,
    #[serde(default)]
    pub bom_description: String,
    /// Quantity as printed in the BOM (may carry units, e.g. `9.5 M`).
    #[serde(default)]
    pub bom_quantity: String,
    #[serde(default)]
    pub bom_size: String,
    /// Drawing taxonomy key `type:subtype`, empty when unmapped.
    #[serde(default)]
    pub drawing_component: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub drawing_quantity: Option<f64>,
    pub match_status: MatchStatus,
    /// Drawing quantity minus BOM quantity.
    #[serde(default)]
    pub quantity_diff: f64,
    #[serde(default)]
    pub notes: String,
}

/// Per-page verdict counts.
///
/// `comparable_items` excludes N/A rows; `match_rate` is
/// `matched / comparable` as a percentage rounded to one decimal, 0 when
/// nothing was comparable.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ComparisonSummary {
    pub total_bom_items: usize,
    pub comparable_items: usize,
    pub matched: usize,
    pub mismatched: usize,
    pub bom_only: usize,
    pub drawing_only: usize,
    pub na_items: usize,
    pub match_rate: f64,
}

impl ComparisonSummary {
    /// Tally verdicts over a page's comparison items.
    #[must_use]
    pub fn tally(total_bom_items: usize, items: &[ComparisonItem]) -> Self {
        let count = |status: MatchStatus| items.iter().filter(|i| i.match_status == status).count();
        let matched = count(MatchStatus::Match);
        let mismatched = count(MatchStatus::Mismatch);
        let bom_only = count(MatchStatus::BomOnly);
        let drawing_only = count(MatchStatus::DrawingOnly);
        let na_items = count(MatchStatus::NotApplicable);
        let comparable = matched + mismatched + bom_only + drawing_only;
        let match_rate = if comparable == 0 {
            0.0
        } else {
            (matched as f64 / comparable as f64 * 1000.0).round() / 10.0
        };
        Self {
            total_bom_items,
            comparable_items: comparable,
            matched,
            mismatched,
            bom_only,
            drawing_only,
            na_items,
            match_rate,
        }
    }
}

/// Reconciliation result for one page.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageComparison {
    pub page: u32,
    #[serde(default)]
    pub drawing_number: String,
    #[serde(default)]
    pub line_no: String,
    pub comparison_items: Vec<ComparisonItem>,
    pub summary: ComparisonSummary,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(status: MatchStatus) -> ComparisonItem {
        ComparisonItem {
            bom_letter: String::new(),
            bom_description: String::new(),
            bom_quantity: String::new(),
            bom_size: String::new(),
            drawing_component: String::new(),
            drawing_quantity: None,
            match_status: status,
            quantity_diff: 0.0,
            notes: String::new(),
        }
    }

    #[test]
    fn tally_partitions_all_items() {
        let items = vec![
            item(MatchStatus::Match),
            item(MatchStatus::Match),
            item(MatchStatus::Mismatch),
            item(MatchStatus::BomOnly),
            item(MatchStatus::NotApplicable),
        ];
        let summary = ComparisonSummary::tally(4, &items);
        assert_eq!(
            summary.matched
                + summary.mismatched
                + summary.bom_only
                + summary.drawing_only
                + summary.na_items,
            items.len()
        );
        assert_eq!(summary.comparable_items, 4);
        assert!((summary.match_rate - 50.0).abs() < f64::EPSILON);
    }

    #[test]
    fn match_rate_is_zero_without_comparable_items() {
        let items = vec![item(MatchStatus::NotApplicable)];
        let summary = ComparisonSummary::tally(1, &items);
        assert_eq!(summary.comparable_items, 0);
        assert!((summary.match_rate - 0.0).abs() < f64::EPSILON);
    }

    #[test]
    fn match_rate_rounds_to_one_decimal() {
        let items = vec![
            item(MatchStatus::Match),
            item(MatchStatus::Mismatch),
            item(MatchStatus::Mismatch),
        ];
        // 1/3 => 33.3%
        let summary = ComparisonSummary::tally(3, &items);
        assert!((summary.match_rate - 33.3).abs() < f64::EPSILON);
    }

    #[test]
    fn status_serializes_with_original_labels() {
        assert_eq!(
            serde_json::to_string(&MatchStatus::NotApplicable).unwrap(),
            "\"N/A\""
        );
        assert_eq!(
            serde_json::to_string(&MatchStatus::DrawingOnly).unwrap(),
            "\"DRAWING_ONLY\""
        );
    }
}
