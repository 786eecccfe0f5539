//! Regex valve extraction from P&ID text layers.
//!
//! Manual valve tags follow `<system><4 digits>` (CSW9112); control valves
//! use instrument prefixes (FCV/TCV/XV/LCV/PCV). Classification looks at a
//! ±500-character context window around each tag.

use std::path::Path;

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::info;

use pipedoc_core::{Provenance, Result, ValveExtract, ValveType};
use pipedoc_pdf::PageRenderer;

use crate::line_spec::system_fluid;

static VALVE_TAG_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?:CSW|SSW|CFW|FW)\d{4}[A-Z]?|(?:FCV|TCV|XV|LCV|PCV)\d{4}[A-Z]?").unwrap()
});

static CONTEXT_LINE_SPEC: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(\d+)"?\s*-\s*([A-Z]+)\s*-\s*(\w+)\s*-\s*(CS\d|SS\d|AL\d)\s*(?:-\s*(STD|40|80|XS|160|10|20))?"#)
        .unwrap()
});

const VALVE_TYPE_KEYWORDS: [(&str, ValveType); 8] = [
    ("BFV", ValveType::Butterfly),
    ("BUTTERFLY", ValveType::Butterfly),
    ("GATE", ValveType::Gate),
    ("GLOBE", ValveType::Globe),
    ("CHECK", ValveType::Check),
    ("BALL", ValveType::Ball),
    ("PLUG", ValveType::Plug),
    ("NEEDLE", ValveType::Needle),
];

fn context_window(text: &str, pos: usize, window: usize) -> &str {
    let start = pos.saturating_sub(window);
    let end = (pos + window).min(text.len());
    // Clamp to char boundaries.
    let start = (start..=pos).find(|&i| text.is_char_boundary(i)).unwrap_or(pos);
    let end = (pos..=end)
        .rev()
        .find(|&i| text.is_char_boundary(i))
        .unwrap_or(pos);
    &text[start..end]
}

fn detect_valve_type(tag: &str, context: &str) -> ValveType {
    if tag.starts_with("FCV")
        || tag.starts_with("TCV")
        || tag.starts_with("LCV")
        || tag.starts_with("PCV")
        || tag.starts_with("XV")
    {
        return ValveType::Control;
    }
    let upper = context.to_uppercase();
    for (kw, vtype) in VALVE_TYPE_KEYWORDS {
        if upper.contains(kw) {
            return vtype;
        }
    }
    ValveType::Butterfly
}

fn detect_fluid(tag: &str) -> &'static str {
    for prefix in ["SSW", "CSW", "CFW", "FW"] {
        if tag.starts_with(prefix) {
            return system_fluid(prefix);
        }
    }
    "SW"
}

fn detect_location(tag: &str) -> &'static str {
    if tag.starts_with("SSW") {
        "SPRAY SEA WATER SYSTEM"
    } else if tag.starts_with("CSW") {
        "COOLING SEA WATER SYSTEM"
    } else if tag.starts_with("CFW") {
        "COOLING FRESH WATER SYSTEM"
    } else if tag.starts_with("FW") {
        "FRESH WATER SYSTEM"
    } else {
        "GENERAL"
    }
}

fn control_subtype(tag: &str) -> &'static str {
    if tag.starts_with("FCV") {
        "FLOW CONTROL VALVE"
    } else if tag.starts_with("TCV") {
        "TEMPERATURE CONTROL VALVE"
    } else if tag.starts_with("XV") {
        "SHUTOFF VALVE"
    } else if tag.starts_with("LCV") {
        "LEVEL CONTROL VALVE"
    } else if tag.starts_with("PCV") {
        "PRESSURE CONTROL VALVE"
    } else {
        "CONTROL VALVE"
    }
}

fn build_valve(tag: &str, context: &str, sheet: u32) -> ValveExtract {
    let valve_type = detect_valve_type(tag, context);
    let mut valve = ValveExtract {
        tag: tag.to_string(),
        valve_type: Some(valve_type),
        piping_class: "CS3".to_string(),
        schedule: "STD".to_string(),
        pressure_rating: "150".to_string(),
        fluid: detect_fluid(tag).to_string(),
        location: detect_location(tag).to_string(),
        sheet,
        source: Provenance::Regex,
        ..Default::default()
    };

    if let Some(caps) = CONTEXT_LINE_SPEC.captures(context) {
        valve.size = caps[1].to_string();
        valve.line_spec = caps[0].to_string();
        valve.piping_class = caps
            .get(4)
            .map_or_else(|| "CS3".to_string(), |m| m.as_str().to_string());
        valve.schedule = caps
            .get(5)
            .map_or_else(|| "STD".to_string(), |m| m.as_str().to_string());
    }

    let size = valve.size.clone();
    match valve_type {
        ValveType::Control => {
            valve.valve_subtype = control_subtype(tag).to_string();
            valve.description = format!("{size}\" CONTROL VALVE ({})", valve.valve_subtype);
        }
        other => {
            valve.valve_subtype = format!("{other} VALVE");
            valve.description = format!("{size}\" {other} VALVE");
        }
    }
    valve
}

/// Extract every distinct valve tag from the document's text layer.
///
/// # Errors
///
/// Returns an error when the document cannot be opened.
pub fn extract_valves(renderer: &PageRenderer, pdf_path: &Path) -> Result<Vec<ValveExtract>> {
    let indexes = renderer.text_indexes(pdf_path)?;
    let mut valves = Vec::new();
    let mut seen = std::collections::HashSet::new();

    for (page_idx, index) in indexes.iter().enumerate() {
        let text = &index.full_text;
        for m in VALVE_TAG_PATTERN.find_iter(text) {
            let tag = m.as_str();
            if !seen.insert(tag.to_string()) {
                continue;
            }
            let context = context_window(text, m.start(), 500);
            valves.push(build_valve(tag, context, page_idx as u32 + 1));
        }
    }

    info!(count = valves.len(), path = %pdf_path.display(), "extracted valves");
    Ok(valves)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tags_match_manual_and_control_forms() {
        let text = "CSW9112 near FCV1234 and SSW9201A";
        let tags: Vec<&str> = VALVE_TAG_PATTERN.find_iter(text).map(|m| m.as_str()).collect();
        assert_eq!(tags, vec!["CSW9112", "FCV1234", "SSW9201A"]);
    }

    #[test]
    fn control_prefix_beats_context_keywords() {
        assert_eq!(
            detect_valve_type("FCV1234", "GATE VALVE nearby"),
            ValveType::Control
        );
        assert_eq!(detect_valve_type("CSW9112", "BFV spec"), ValveType::Butterfly);
        assert_eq!(detect_valve_type("CSW9112", "a GATE here"), ValveType::Gate);
        assert_eq!(detect_valve_type("CSW9112", "no keyword"), ValveType::Butterfly);
    }

    #[test]
    fn context_line_spec_fills_size_and_class() {
        let context = r#"12"-CSW-9112-CS3-STD main suction"#;
        let valve = build_valve("CSW9112", context, 2);
        assert_eq!(valve.size, "12");
        assert_eq!(valve.piping_class, "CS3");
        assert_eq!(valve.schedule, "STD");
        assert_eq!(valve.description, "12\" BUTTERFLY VALVE");
        assert_eq!(valve.sheet, 2);
        assert_eq!(valve.source, Provenance::Regex);
    }

    #[test]
    fn fluid_and_location_follow_tag_prefix() {
        let valve = build_valve("CFW8101", "", 1);
        assert_eq!(valve.fluid, "CFW");
        assert_eq!(valve.location, "COOLING FRESH WATER SYSTEM");

        let control = build_valve("TCV5678", "", 1);
        assert_eq!(control.valve_subtype, "TEMPERATURE CONTROL VALVE");
    }
}
