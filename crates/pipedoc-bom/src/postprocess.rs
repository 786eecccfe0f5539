//! Table-pass post-processing.
//!
//! The table pass returns a loose JSON object with `bom_items`,
//! `cut_lengths`, `drawing_info` and `bom_totals`. Normalization here:
//!
//! - letter codes recovered from the front of descriptions (`"A PIPE SMLS"`)
//! - header rows (`LENGTH`/`CUT`) dropped
//! - cut-length rows that leaked into the BOM (`"736 MM <1>"`) reclassified
//! - weights coerced to floats; quantities kept as strings because pipe
//!   quantities carry units (`"9.5 M"`)
//! - cut numbers integerized, deduplicated and sorted

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

use pipedoc_core::{BomItem, BomTotals, CutLength, DrawingInfo};

use crate::normalize::{as_array, as_f64, as_string, as_u32};

static LETTER_PREFIX: Lazy<Regex> = Lazy::new(|| Regex::new(r"^([A-Z])\s+(.+)").unwrap());
static CUT_ROW: Lazy<Regex> = Lazy::new(|| Regex::new(r"^(\d+)\s*MM\s*(?:<(\d+)>)?").unwrap());
static CUT_LETTER: Lazy<Regex> = Lazy::new(|| Regex::new(r"^(\d+)\s*MM").unwrap());

/// Normalized table-pass payload.
#[derive(Debug, Clone, Default)]
pub struct TablePassData {
    pub bom_items: Vec<BomItem>,
    pub cut_lengths: Vec<CutLength>,
    pub drawing_info: Option<DrawingInfo>,
    pub bom_totals: Option<BomTotals>,
}

/// Normalize a raw table-pass response object.
#[must_use]
pub fn postprocess_table(response: &Value) -> TablePassData {
    let raw_items = {
        let primary = as_array(response.get("bom_items"));
        if primary.is_empty() {
            as_array(response.get("items"))
        } else {
            primary
        }
    };

    let mut cuts: Vec<(u32, f64)> = Vec::new();

    // Explicit cut_lengths array first.
    for cut in as_array(response.get("cut_lengths")) {
        let length = as_f64(cut.get("length_mm"));
        if length > 0.0 {
            cuts.push((as_u32(cut.get("cut_no")), length));
        }
    }

    let mut bom_items = Vec::new();
    for item in raw_items {
        if !item.is_object() {
            continue;
        }

        let mut letter = as_string(item.get("letter_code"));
        if letter.is_empty() {
            letter = as_string(item.get("item_no"));
        }
        let mut desc = as_string(item.get("description"));

        // Recover a missing letter code from the description front.
        if letter.is_empty() {
            if let Some(caps) = LETTER_PREFIX.captures(&desc) {
                letter = caps[1].to_string();
                desc = caps[2].trim().to_string();
            }
        }

        if letter.is_empty() && desc.is_empty() {
            continue;
        }
        // Header rows of the cut-lengths section.
        let letter_upper = letter.to_uppercase();
        if letter_upper == "LENGTH" || letter_upper == "CUT" {
            continue;
        }

        // Cut rows mixed into the BOM get reclassified, not dropped.
        if let Some(caps) = CUT_ROW.captures(&desc) {
            let length: f64 = caps[1].parse().unwrap_or(0.0);
            let cut_no = caps
                .get(2)
                .and_then(|m| m.as_str().parse::<u32>().ok())
                .unwrap_or(0);
            if length > 0.0 {
                cuts.push((cut_no, length));
            }
            continue;
        }
        if let Some(caps) = CUT_LETTER.captures(&letter) {
            let length: f64 = caps[1].parse().unwrap_or(0.0);
            if length > 0.0 {
                cuts.push((0, length));
            }
            continue;
        }

        bom_items.push(BomItem {
            letter_code: letter,
            quantity: as_string(item.get("quantity")),
            size_inches: as_string(item.get("size_inches")),
            description: desc,
            material_spec: as_string(item.get("material_spec")),
            weight_kg: as_f64(item.get("weight_kg")),
            remarks: as_string(item.get("remarks")),
        });
    }

    let drawing_info = response.get("drawing_info").filter(|v| v.is_object()).map(|di| {
        DrawingInfo {
            drawing_number: as_string(di.get("drawing_number")),
            revision: as_string(di.get("revision")),
            date: as_string(di.get("date")),
            scale: as_string(di.get("scale")),
            project: as_string(di.get("project")),
            line_description: as_string(di.get("line_description")),
            line_no: as_string(di.get("line_no")),
            pipe_no: as_string(di.get("pipe_no")),
        }
    });

    let bom_totals = response.get("bom_totals").filter(|v| v.is_object()).map(|bt| BomTotals {
        total_weight_kg: as_f64(bt.get("total_weight_kg")),
        total_pipe_length_m: as_f64(bt.get("total_pipe_length_m")),
    });

    TablePassData {
        bom_items,
        cut_lengths: finalize_cuts(cuts),
        drawing_info,
        bom_totals,
    }
}

/// Assign ordinals to unnumbered cuts, drop duplicate numbers (first wins),
/// and sort ascending. The result is a strictly positive, duplicate-free
/// set.
fn finalize_cuts(raw: Vec<(u32, f64)>) -> Vec<CutLength> {
    let mut taken: std::collections::HashSet<u32> = raw
        .iter()
        .filter(|(no, _)| *no > 0)
        .map(|(no, _)| *no)
        .collect();
    let mut seen: std::collections::HashSet<u32> = std::collections::HashSet::new();
    let mut next_free = 1u32;
    let mut cuts: Vec<CutLength> = Vec::with_capacity(raw.len());

    for (no, length) in raw {
        let cut_no = if no > 0 {
            if !seen.insert(no) {
                continue; // duplicate explicit number
            }
            no
        } else {
            while taken.contains(&next_free) || seen.contains(&next_free) {
                next_free += 1;
            }
            let assigned = next_free;
            seen.insert(assigned);
            taken.insert(assigned);
            assigned
        };
        cuts.push(CutLength {
            cut_no,
            length_mm: length,
        });
    }

    cuts.sort_by_key(|c| c.cut_no);
    cuts
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn letter_code_recovered_from_description() {
        let response = json!({
            "bom_items": [
                {"description": "A PIPE SMLS ASME B36.19M", "quantity": "9.5 M",
                 "size_inches": "6\"", "weight_kg": "491"}
            ]
        });
        let data = postprocess_table(&response);
        assert_eq!(data.bom_items.len(), 1);
        let item = &data.bom_items[0];
        assert_eq!(item.letter_code, "A");
        assert_eq!(item.description, "PIPE SMLS ASME B36.19M");
        assert_eq!(item.quantity, "9.5 M");
        assert!((item.weight_kg - 491.0).abs() < f64::EPSILON);
    }

    #[test]
    fn cut_row_in_bom_is_reclassified() {
        let response = json!({
            "bom_items": [
                {"letter_code": "A", "description": "PIPE SMLS", "quantity": "9.5 M"},
                {"description": "736 MM <1>"}
            ],
            "cut_lengths": []
        });
        let data = postprocess_table(&response);
        assert_eq!(data.bom_items.len(), 1);
        assert_eq!(data.cut_lengths.len(), 1);
        assert_eq!(data.cut_lengths[0].cut_no, 1);
        assert!((data.cut_lengths[0].length_mm - 736.0).abs() < f64::EPSILON);
    }

    #[test]
    fn header_rows_are_dropped() {
        let response = json!({
            "bom_items": [
                {"letter_code": "LENGTH", "description": "CUT"},
                {"letter_code": "CUT", "description": ""},
                {"letter_code": "B", "description": "PIPE SMLS"}
            ]
        });
        let data = postprocess_table(&response);
        assert_eq!(data.bom_items.len(), 1);
        assert_eq!(data.bom_items[0].letter_code, "B");
    }

    #[test]
    fn explicit_and_implicit_cut_numbers_merge_without_duplicates() {
        let response = json!({
            "bom_items": [
                {"description": "332 MM <6>"},
                {"description": "94 MM"}
            ],
            "cut_lengths": [
                {"cut_no": 1, "length_mm": 736},
                {"cut_no": "2", "length_mm": "729 MM"}
            ]
        });
        let data = postprocess_table(&response);
        let numbers: Vec<u32> = data.cut_lengths.iter().map(|c| c.cut_no).collect();
        // Sorted, positive, duplicate-free; the unnumbered row takes the
        // first free ordinal (3).
        assert_eq!(numbers, vec![1, 2, 3, 6]);
        let by_no: std::collections::HashMap<u32, f64> = data
            .cut_lengths
            .iter()
            .map(|c| (c.cut_no, c.length_mm))
            .collect();
        assert!((by_no[&3] - 94.0).abs() < f64::EPSILON);
        assert!((by_no[&2] - 729.0).abs() < f64::EPSILON);
    }

    #[test]
    fn items_alias_key_is_accepted() {
        let response = json!({
            "items": [{"item_no": 1, "description": "PIPE SMLS SCH 40", "quantity": 1}]
        });
        let data = postprocess_table(&response);
        assert_eq!(data.bom_items.len(), 1);
        // The cover sheet's numeric item number fills the letter slot.
        assert_eq!(data.bom_items[0].letter_code, "1");
        assert_eq!(data.bom_items[0].quantity, "1");
    }

    #[test]
    fn drawing_info_and_totals_are_lifted() {
        let response = json!({
            "bom_items": [],
            "drawing_info": {"drawing_number": "1-125.629.098", "line_no": 120, "pipe_no": "G_D4-3"},
            "bom_totals": {"total_weight_kg": 1295, "total_pipe_length_m": "9.5"}
        });
        let data = postprocess_table(&response);
        let di = data.drawing_info.unwrap();
        assert_eq!(di.drawing_number, "1-125.629.098");
        assert_eq!(di.line_no, "120");
        let bt = data.bom_totals.unwrap();
        assert!((bt.total_pipe_length_m - 9.5).abs() < f64::EPSILON);
    }
}
