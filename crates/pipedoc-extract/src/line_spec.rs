//! Line-specification tag parsing.
//!
//! A full tag reads `10"-CSW-9103-CS3-40#150-NI`: size, system code, line
//! number, piping class, schedule, pressure rating and material code.

use once_cell::sync::Lazy;
use regex::Regex;

use pipedoc_core::{LineSpec, Provenance};

static LINE_SPEC_FULL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r#"(?x)
        (\d+)"?\s*[-–]\s*            # size in inches
        ([A-Z]{2,4})\s*[-–]\s*       # system code (CSW, SSW, CFW, FW)
        (\d{4})\s*[-–]\s*            # line number
        (CS\d|SS\d|AL\d)\s*[-–]?\s*  # piping class
        (\d+|STD|XS)\s*              # schedule
        (?:[\#]\s*(\d+))?\s*         # pressure rating (#150)
        [-–]?\s*([A-Z]{1,3})?        # material code
        "#,
    )
    .unwrap()
});

/// Fluid family for a system code.
#[must_use]
pub fn system_fluid(system_code: &str) -> &'static str {
    match system_code {
        "CSW" | "SSW" => "SW",
        "CFW" => "CFW",
        "FW" => "FW",
        _ => "SW",
    }
}

/// Parse one line-spec string into its components. Unparseable strings
/// yield a spec carrying only `full_spec`.
#[must_use]
pub fn parse_line_spec(full_spec: &str) -> LineSpec {
    let Some(caps) = LINE_SPEC_FULL.captures(full_spec) else {
        return LineSpec {
            full_spec: full_spec.trim().to_string(),
            ..Default::default()
        };
    };
    let system_code = caps[2].to_string();
    let line_number = caps[3].to_string();
    LineSpec {
        full_spec: full_spec.trim().to_string(),
        size: caps[1].to_string(),
        tag: format!("{system_code}{line_number}"),
        fluid: system_fluid(&system_code).to_string(),
        system_code,
        line_number,
        piping_class: caps[4].to_string(),
        schedule: caps[5].to_string(),
        pressure_rating: caps
            .get(6)
            .map_or_else(|| "150".to_string(), |m| m.as_str().to_string()),
        material_code: caps.get(7).map_or_else(String::new, |m| m.as_str().to_string()),
        sheet: 0,
        source: Provenance::Text,
    }
}

/// Find every distinct line spec in a page's text, tagged with provenance
/// `text`.
#[must_use]
pub fn extract_line_specs_from_text(text: &str) -> Vec<LineSpec> {
    let mut seen = std::collections::HashSet::new();
    let mut results = Vec::new();
    for m in LINE_SPEC_FULL.find_iter(text) {
        let spec = m.as_str().trim().to_string();
        if !seen.insert(spec.clone()) {
            continue;
        }
        results.push(parse_line_spec(&spec));
    }
    results
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_full_spec() {
        let spec = parse_line_spec(r#"10"-CSW-9103-CS3-40#150-NI"#);
        assert_eq!(spec.size, "10");
        assert_eq!(spec.system_code, "CSW");
        assert_eq!(spec.line_number, "9103");
        assert_eq!(spec.tag, "CSW9103");
        assert_eq!(spec.piping_class, "CS3");
        assert_eq!(spec.schedule, "40");
        assert_eq!(spec.pressure_rating, "150");
        assert_eq!(spec.material_code, "NI");
        assert_eq!(spec.fluid, "SW");
    }

    #[test]
    fn parses_std_schedule_and_defaults_rating() {
        let spec = parse_line_spec(r#"6"-CFW-8101-CS2-STD"#);
        assert_eq!(spec.schedule, "STD");
        assert_eq!(spec.pressure_rating, "150");
        assert_eq!(spec.fluid, "CFW");
    }

    #[test]
    fn unparseable_keeps_full_spec_only() {
        let spec = parse_line_spec("NOT A SPEC");
        assert_eq!(spec.full_spec, "NOT A SPEC");
        assert!(spec.tag.is_empty());
    }

    #[test]
    fn text_scan_dedupes() {
        let text = r#"main run 10"-CSW-9103-CS3-40#150-NI and again
                      10"-CSW-9103-CS3-40#150-NI plus 8"-SSW-9201-CS3-40#150-NI"#;
        let specs = extract_line_specs_from_text(text);
        assert_eq!(specs.len(), 2);
        assert_eq!(specs[0].tag, "CSW9103");
        assert_eq!(specs[1].tag, "SSW9201");
    }
}
