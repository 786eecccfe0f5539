//! BOM↔drawing reconciliation.
//!
//! Drawing components aggregate into `type:subtype` groups; each BOM row
//! maps onto the taxonomy via its description keywords (longest key first)
//! with the letter-code table as fallback, then looks its group up exactly
//! and, failing that, by a same-type subtype substring match. Rows the
//! taxonomy deliberately skips (gaskets, bolts, paint, metre-priced pipe)
//! reconcile as N/A; unconsumed drawing groups become DRAWING_ONLY items.

use std::collections::{BTreeMap, HashSet};

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{info, warn};

use pipedoc_core::{
    BomItem, ComparisonItem, ComparisonSummary, MatchStatus, PageBomRecord, PageComparison,
};

/// Letter code → (component type, default subtypes in preference order).
const LETTER_TAXONOMY: [(&str, &str, &[&str]); 14] = [
    ("A", "pipe", &["pipe"]),
    ("B", "pipe", &["pipe"]),
    ("C", "fitting", &["tee", "reducing_tee", "equal_tee"]),
    ("D", "fitting", &["reducer_con", "reducer_ecc", "reducer"]),
    ("E", "fitting", &["sockolet", "weldolet"]),
    ("F", "flange", &["wn_flange"]),
    ("G", "flange", &["wn_flange"]),
    ("H", "flange", &["blind_flange", "wn_flange"]),
    ("I", "flange", &["orifice_flange"]),
    ("J", "fitting", &["elbow_90", "elbow_90_lr", "elbow_45"]),
    ("K", "fitting", &["cap", "coupling"]),
    ("L", "fitting", &["elbow_90", "elbow_90_lr"]),
    ("M", "flange", &["wn_flange"]),
    ("N", "flange", &["blind_flange"]),
];

/// Letter codes the drawing never symbolizes (gaskets, bolts, supports…).
const SKIP_LETTERS: [&str; 12] = ["O", "P", "Q", "R", "S", "T", "U", "V", "W", "X", "Y", "Z"];

/// Description keywords whose presence skips the row outright.
const SKIP_KEYWORDS: [&str; 6] = ["GASKET", "BOLT", "NUT", "STUD", "PAINT", "GALVAN"];

/// Description keyword → component subtype, matched longest key first.
const SUBTYPE_KEYWORDS: [(&str, &str); 27] = [
    ("PIPE", "pipe"),
    ("ELBOW 90 LR", "elbow_90_lr"),
    ("ELBOW 90", "elbow_90"),
    ("ELBOW 45", "elbow_45"),
    ("EQUAL TEE", "tee"),
    ("REDUCING TEE", "reducing_tee"),
    ("TEE", "tee"),
    ("REDUCER CON", "reducer_con"),
    ("REDUCER ECC", "reducer_ecc"),
    ("REDUCER ECCENTRIC", "reducer_ecc"),
    ("REDUCER CONCENTRIC", "reducer_con"),
    ("REDUCER", "reducer_con"),
    ("WN FLANGE", "wn_flange"),
    ("FLANGE WN", "wn_flange"),
    ("BLIND FLANGE", "blind_flange"),
    ("ORIFICE FLANGE", "orifice_flange"),
    ("SOCKOLET", "sockolet"),
    ("WELDOLET", "weldolet"),
    ("GATE VALVE", "gate"),
    ("GLOBE VALVE", "globe"),
    ("BALL VALVE", "ball"),
    ("CHECK VALVE", "check"),
    ("NEEDLE VALVE", "needle"),
    ("NON RETURN", "non_return"),
    ("BUTTERFLY", "butterfly"),
    ("CLAMP", "clamp"),
    ("SUPPORT", "support"),
];

/// Description keyword → component type; `skip` marks consumables excluded
/// from drawing comparison.
const TYPE_KEYWORDS: [(&str, &str); 17] = [
    ("PIPE", "pipe"),
    ("ELBOW", "fitting"),
    ("TEE", "fitting"),
    ("REDUCER", "fitting"),
    ("SOCKOLET", "fitting"),
    ("WELDOLET", "fitting"),
    ("CAP", "fitting"),
    ("COUPLING", "fitting"),
    ("FLANGE", "flange"),
    ("VALVE", "valve"),
    ("GASKET", "gasket"),
    ("BOLT", "bolt"),
    ("NUT", "bolt"),
    ("STUD", "bolt"),
    ("CLAMP", "support"),
    ("SUPPORT", "support"),
    ("PAINT", "skip"),
];

static FIRST_NUMBER: Lazy<Regex> = Lazy::new(|| Regex::new(r"[\d.]+").unwrap());

fn longest_first<'a>(pairs: &'a [(&'a str, &'a str)]) -> Vec<(&'a str, &'a str)> {
    let mut sorted: Vec<(&str, &str)> = pairs.to_vec();
    sorted.sort_by(|a, b| b.0.len().cmp(&a.0.len()));
    sorted
}

static SUBTYPE_BY_LENGTH: Lazy<Vec<(&str, &str)>> = Lazy::new(|| longest_first(&SUBTYPE_KEYWORDS));
static TYPE_BY_LENGTH: Lazy<Vec<(&str, &str)>> = Lazy::new(|| longest_first(&TYPE_KEYWORDS));

/// Infer `(component_type, subtype, skip)` for a BOM row.
fn component_info_from_bom(item: &BomItem) -> (String, String, bool) {
    let letter = item.letter_code.trim().to_uppercase();
    let desc = item.description.trim().to_uppercase();

    if SKIP_LETTERS.contains(&letter.as_str()) {
        return (String::new(), String::new(), true);
    }
    if SKIP_KEYWORDS.iter().any(|kw| desc.contains(kw)) {
        return (String::new(), String::new(), true);
    }

    let mut subtype = String::new();
    for (kw, st) in SUBTYPE_BY_LENGTH.iter() {
        if desc.contains(kw) {
            subtype = (*st).to_string();
            break;
        }
    }

    let mut comp_type = String::new();
    for (kw, ct) in TYPE_BY_LENGTH.iter() {
        if desc.contains(kw) {
            comp_type = (*ct).to_string();
            break;
        }
    }

    let letter_entry = LETTER_TAXONOMY.iter().find(|(l, _, _)| *l == letter);
    if subtype.is_empty() {
        if let Some((_, lt, subtypes)) = letter_entry {
            if comp_type.is_empty() {
                comp_type = (*lt).to_string();
            }
            subtype = subtypes.first().map_or_else(String::new, |s| (*s).to_string());
        }
    }
    if comp_type.is_empty() {
        if let Some((_, lt, _)) = letter_entry {
            comp_type = (*lt).to_string();
        }
    }

    if matches!(comp_type.as_str(), "skip" | "gasket" | "bolt") {
        return (String::new(), String::new(), true);
    }

    (comp_type, subtype, false)
}

/// Parse a BOM quantity to a number: `"2"`, `"9.5 M"`, `"0.2 M"`.
fn parse_bom_quantity(quantity: &str) -> f64 {
    FIRST_NUMBER
        .find(quantity)
        .and_then(|m| m.as_str().parse::<f64>().ok())
        .unwrap_or(0.0)
}

/// Pipe quantities priced in metres cannot be compared against symbol
/// counts.
fn is_pipe_length_qty(quantity: &str) -> bool {
    quantity.to_uppercase().contains('M')
}

fn na_item(item: &BomItem, drawing_component: String, notes: &str) -> ComparisonItem {
    ComparisonItem {
        bom_letter: item.letter_code.trim().to_string(),
        bom_description: item.description.trim().to_string(),
        bom_quantity: item.quantity.trim().to_string(),
        bom_size: item.size_inches.trim().to_string(),
        drawing_component,
        drawing_quantity: None,
        match_status: MatchStatus::NotApplicable,
        quantity_diff: 0.0,
        notes: notes.to_string(),
    }
}

/// Reconcile one page's BOM table against its drawing components.
#[must_use]
pub fn compare_single_page(page: &PageBomRecord) -> PageComparison {
    // 1. Aggregate drawing components by type:subtype. BTreeMap keeps the
    // DRAWING_ONLY emission order deterministic across runs.
    let mut drawing_groups: BTreeMap<String, f64> = BTreeMap::new();
    for comp in &page.components {
        let key = format!(
            "{}:{}",
            comp.kind.trim().to_lowercase(),
            comp.subtype.trim().to_lowercase()
        );
        *drawing_groups.entry(key).or_insert(0.0) += comp.quantity;
    }

    let mut items: Vec<ComparisonItem> = Vec::new();
    let mut consumed: HashSet<String> = HashSet::new();

    // 2. Each BOM row gets a verdict.
    for item in &page.bom_table {
        let (comp_type, subtype, skip) = component_info_from_bom(item);

        if skip {
            items.push(na_item(
                item,
                String::new(),
                "not compared (gasket/bolt/paint)",
            ));
            continue;
        }
        if comp_type.is_empty() && subtype.is_empty() {
            items.push(na_item(item, String::new(), "no taxonomy mapping"));
            continue;
        }

        if is_pipe_length_qty(&item.quantity) {
            items.push(na_item(
                item,
                format!("{comp_type}:{subtype}"),
                "pipe length (M) - quantity not comparable",
            ));
            continue;
        }

        let bom_qty = parse_bom_quantity(&item.quantity);
        let exact_key = format!("{comp_type}:{subtype}");

        // Exact key first, then one relaxed pass within the same type.
        let mut matched_key: Option<String> = None;
        if drawing_groups.contains_key(&exact_key) {
            matched_key = Some(exact_key.clone());
        } else if !subtype.is_empty() {
            for key in drawing_groups.keys() {
                let (dt, ds) = key.split_once(':').unwrap_or((key.as_str(), ""));
                if dt == comp_type && !ds.is_empty() && (ds.contains(&subtype) || subtype.contains(ds))
                {
                    matched_key = Some(key.clone());
                    break;
                }
            }
        }

        let drawing_qty = matched_key.as_ref().map(|k| drawing_groups[k]);
        if let Some(key) = &matched_key {
            consumed.insert(key.clone());
        }

        let (status, diff) = match drawing_qty {
            None => (MatchStatus::BomOnly, 0.0),
            Some(dq) if (bom_qty - dq).abs() < 0.01 => (MatchStatus::Match, 0.0),
            Some(dq) => (MatchStatus::Mismatch, dq - bom_qty),
        };

        let bom_quantity = if item.quantity.trim().is_empty() {
            format!("{}", bom_qty as i64)
        } else {
            item.quantity.trim().to_string()
        };

        items.push(ComparisonItem {
            bom_letter: item.letter_code.trim().to_string(),
            bom_description: item.description.trim().to_string(),
            bom_quantity,
            bom_size: item.size_inches.trim().to_string(),
            drawing_component: exact_key,
            drawing_quantity: drawing_qty,
            match_status: status,
            quantity_diff: diff,
            notes: String::new(),
        });
    }

    // 3. Drawing groups no BOM row consumed. Supports and instruments are
    // never listed in these BOM tables, so they are not flagged.
    for (key, qty) in &drawing_groups {
        if consumed.contains(key) {
            continue;
        }
        let (dt, ds) = key.split_once(':').unwrap_or((key.as_str(), ""));
        if dt == "support" || dt == "instrument" {
            continue;
        }
        items.push(ComparisonItem {
            bom_letter: String::new(),
            bom_description: String::new(),
            bom_quantity: String::new(),
            bom_size: String::new(),
            drawing_component: key.clone(),
            drawing_quantity: Some(*qty),
            match_status: MatchStatus::DrawingOnly,
            quantity_diff: *qty,
            notes: format!("drawing only: {ds} x{qty}"),
        });
    }

    let summary = ComparisonSummary::tally(page.bom_table.len(), &items);
    PageComparison {
        page: page.page,
        drawing_number: page.drawing_number.clone(),
        line_no: page.line_no.clone(),
        comparison_items: items,
        summary,
        error: None,
    }
}

/// Reconcile every page that carries a BOM table or drawing components.
#[must_use]
pub fn compare_all_pages(pages: &[PageBomRecord]) -> Vec<PageComparison> {
    let mut results = Vec::new();
    for page in pages {
        if page.bom_table.is_empty() && page.components.is_empty() {
            continue;
        }
        results.push(compare_single_page(page));
    }

    let total_matched: usize = results.iter().map(|c| c.summary.matched).sum();
    let total_mismatched: usize = results.iter().map(|c| c.summary.mismatched).sum();
    let total_comparable: usize = results.iter().map(|c| c.summary.comparable_items).sum();
    if total_comparable == 0 && !results.is_empty() {
        warn!("comparison produced no comparable items");
    }
    info!(
        pages = results.len(),
        matched = total_matched,
        mismatched = total_mismatched,
        rate = format!(
            "{:.1}%",
            total_matched as f64 / total_comparable.max(1) as f64 * 100.0
        ),
        "BOM comparison complete"
    );
    results
}

#[cfg(test)]
mod tests {
    use super::*;
    use pipedoc_core::Component;

    fn bom_item(letter: &str, qty: &str, desc: &str, size: &str) -> BomItem {
        BomItem {
            letter_code: letter.into(),
            quantity: qty.into(),
            size_inches: size.into(),
            description: desc.into(),
            ..Default::default()
        }
    }

    fn component(kind: &str, subtype: &str, qty: f64) -> Component {
        Component {
            kind: kind.into(),
            subtype: subtype.into(),
            quantity: qty,
            ..Default::default()
        }
    }

    fn page(bom: Vec<BomItem>, components: Vec<Component>) -> PageBomRecord {
        PageBomRecord {
            page: 3,
            bom_table: bom,
            components,
            ..Default::default()
        }
    }

    #[test]
    fn metre_quantity_pipe_is_not_applicable() {
        let page = page(
            vec![bom_item("A", "9.5 M", "PIPE SMLS ASME B36.19M", "6\"")],
            vec![component("pipe", "pipe", 1.0)],
        );
        let result = compare_single_page(&page);
        assert_eq!(result.comparison_items.len(), 2); // N/A row + drawing-only pipe
        let row = &result.comparison_items[0];
        assert_eq!(row.match_status, MatchStatus::NotApplicable);
        assert!(row.notes.contains("pipe length"));
        assert_eq!(row.drawing_component, "pipe:pipe");
    }

    #[test]
    fn exact_quantity_match() {
        let page = page(
            vec![bom_item("J", "4", "ELBOW 90 LR", "6\"")],
            vec![component("fitting", "elbow_90_lr", 4.0)],
        );
        let result = compare_single_page(&page);
        let row = &result.comparison_items[0];
        assert_eq!(row.match_status, MatchStatus::Match);
        assert!((row.quantity_diff - 0.0).abs() < f64::EPSILON);
        assert_eq!(row.drawing_component, "fitting:elbow_90_lr");
        assert!((result.summary.match_rate - 100.0).abs() < f64::EPSILON);
    }

    #[test]
    fn quantity_mismatch_reports_drawing_minus_bom() {
        let page = page(
            vec![bom_item("F", "2", "WN FLANGE", "")],
            vec![component("flange", "wn_flange", 3.0)],
        );
        let result = compare_single_page(&page);
        let row = &result.comparison_items[0];
        assert_eq!(row.match_status, MatchStatus::Mismatch);
        assert!((row.quantity_diff - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn skip_letters_and_consumables_reconcile_as_na() {
        let page = page(
            vec![
                bom_item("O", "2", "SPIRAL WOUND GASKET", ""),
                bom_item("Q", "16", "STUD BOLT", ""),
                bom_item("", "1", "PAINTING EPOXY", ""),
            ],
            vec![],
        );
        let result = compare_single_page(&page);
        assert!(result
            .comparison_items
            .iter()
            .all(|i| i.match_status == MatchStatus::NotApplicable));
        assert_eq!(result.summary.na_items, 3);
        assert_eq!(result.summary.comparable_items, 0);
        assert!((result.summary.match_rate - 0.0).abs() < f64::EPSILON);
    }

    #[test]
    fn drawing_only_components_are_flagged() {
        let page = page(vec![], vec![component("fitting", "tee", 3.0)]);
        let result = compare_single_page(&page);
        assert_eq!(result.comparison_items.len(), 1);
        let row = &result.comparison_items[0];
        assert_eq!(row.match_status, MatchStatus::DrawingOnly);
        assert_eq!(row.drawing_component, "fitting:tee");
        assert_eq!(row.drawing_quantity, Some(3.0));
        assert!((row.quantity_diff - 3.0).abs() < f64::EPSILON);
    }

    #[test]
    fn supports_and_instruments_never_emit_drawing_only() {
        let page = page(
            vec![],
            vec![
                component("support", "clamp", 2.0),
                component("instrument", "gauge", 1.0),
            ],
        );
        let result = compare_single_page(&page);
        assert!(result.comparison_items.is_empty());
    }

    #[test]
    fn relaxed_subtype_match_within_same_type() {
        // The model reported a free-form subtype "elbow_90_long_radius";
        // the BOM maps to elbow_90_lr. Substring relaxation links them.
        let page = page(
            vec![bom_item("J", "4", "ELBOW 90", "")],
            vec![component("fitting", "elbow_90_long_radius", 4.0)],
        );
        let result = compare_single_page(&page);
        let row = &result.comparison_items[0];
        assert_eq!(row.match_status, MatchStatus::Match);
    }

    #[test]
    fn unmatched_bom_row_is_bom_only() {
        let page = page(
            vec![bom_item("C", "1", "REDUCING TEE", "")],
            vec![component("flange", "wn_flange", 2.0)],
        );
        let result = compare_single_page(&page);
        assert_eq!(result.comparison_items[0].match_status, MatchStatus::BomOnly);
        // The flange group was never consumed.
        assert!(result
            .comparison_items
            .iter()
            .any(|i| i.match_status == MatchStatus::DrawingOnly));
    }

    #[test]
    fn letter_fallback_maps_codes_without_keywords() {
        let page = page(
            vec![bom_item("N", "1", "ASME B16.5 CL150", "")],
            vec![component("flange", "blind_flange", 1.0)],
        );
        let result = compare_single_page(&page);
        assert_eq!(result.comparison_items[0].match_status, MatchStatus::Match);
    }

    #[test]
    fn verdict_counts_partition_all_items() {
        let page = page(
            vec![
                bom_item("A", "9.5 M", "PIPE SMLS", "6\""),
                bom_item("J", "4", "ELBOW 90 LR", ""),
                bom_item("F", "2", "WN FLANGE", ""),
                bom_item("O", "2", "GASKET", ""),
                bom_item("C", "1", "REDUCING TEE", ""),
            ],
            vec![
                component("pipe", "pipe", 1.0),
                component("fitting", "elbow_90_lr", 4.0),
                component("flange", "wn_flange", 3.0),
                component("fitting", "tee", 2.0),
            ],
        );
        let result = compare_single_page(&page);
        let s = result.summary;
        assert_eq!(
            s.matched + s.mismatched + s.bom_only + s.drawing_only + s.na_items,
            result.comparison_items.len()
        );
        assert_eq!(s.total_bom_items, 5);
    }

    #[test]
    fn pages_without_tables_or_components_are_skipped() {
        let pages = vec![
            PageBomRecord {
                page: 1,
                ..Default::default()
            },
            page(vec![], vec![component("fitting", "tee", 1.0)]),
        ];
        let results = compare_all_pages(&pages);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].page, 3);
    }
}
