//! P&ID sheet analysis.
//!
//! Sheets after the legend (by default sheets 2-3, the pump-room drawings)
//! are rendered and analyzed with the legend's reference block. Line specs
//! recovered from the text layer backfill whatever the model missed, and
//! the regex valve extraction merges in afterwards with provenance
//! tracking.

use std::path::Path;

use serde_json::Value;
use tracing::{error, info, warn};

use pipedoc_core::{CancelFlag, LineSpec, Provenance, Result, ValveExtract, ValveType};
use pipedoc_extract::{extract_line_specs_from_text, parse_line_spec, system_fluid};
use pipedoc_pdf::{PageRenderer, PageTextIndex};
use pipedoc_vlm::{prompts, recovery, PacedVlm};

use crate::normalize::{as_array, as_string};

const PID_MAX_TOKENS: u32 = 8192;

/// Combined analysis over the selected P&ID sheets.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct PidAnalysis {
    pub pages_analyzed: Vec<u32>,
    pub line_specs: Vec<LineSpec>,
    pub valves: Vec<ValveExtract>,
    pub symbols_found: Vec<Value>,
    pub equipment: Vec<Value>,
    /// Raw per-page payloads for the JSON dump.
    pub page_details: Vec<Value>,
}

fn line_spec_from_value(value: &Value) -> LineSpec {
    let full_spec = as_string(value.get("full_spec"));
    let mut spec = LineSpec {
        full_spec: full_spec.clone(),
        size: as_string(value.get("size")),
        system_code: as_string(value.get("system_code")),
        line_number: as_string(value.get("line_number")),
        tag: as_string(value.get("tag")),
        piping_class: as_string(value.get("piping_class")),
        schedule: as_string(value.get("schedule")),
        pressure_rating: as_string(value.get("pressure_rating")),
        material_code: as_string(value.get("material_code")),
        fluid: as_string(value.get("fluid")),
        sheet: 0,
        source: Provenance::Vlm,
    };
    // Re-parse the full spec to fill whatever the model left blank.
    if !full_spec.is_empty() && spec.tag.is_empty() {
        let parsed = parse_line_spec(&full_spec);
        if spec.size.is_empty() {
            spec.size = parsed.size;
        }
        if spec.system_code.is_empty() {
            spec.system_code = parsed.system_code;
        }
        if spec.line_number.is_empty() {
            spec.line_number = parsed.line_number;
        }
        spec.tag = parsed.tag;
        if spec.piping_class.is_empty() {
            spec.piping_class = parsed.piping_class;
        }
        if spec.schedule.is_empty() {
            spec.schedule = parsed.schedule;
        }
        if spec.pressure_rating.is_empty() {
            spec.pressure_rating = parsed.pressure_rating;
        }
        if spec.material_code.is_empty() {
            spec.material_code = parsed.material_code;
        }
        if spec.fluid.is_empty() {
            spec.fluid = parsed.fluid;
        }
    }
    spec
}

fn valve_from_value(value: &Value) -> ValveExtract {
    let mut valve = ValveExtract {
        tag: as_string(value.get("tag")),
        valve_type: {
            let raw = as_string(value.get("valve_type"));
            if raw.is_empty() {
                None
            } else {
                Some(ValveType::parse_lenient(&raw))
            }
        },
        valve_subtype: as_string(value.get("valve_subtype")),
        actuator: as_string(value.get("actuator")),
        size: as_string(value.get("size")),
        line_spec: as_string(value.get("line_spec")),
        piping_class: as_string(value.get("piping_class")),
        schedule: as_string(value.get("schedule")),
        pressure_rating: as_string(value.get("pressure_rating")),
        material_code: as_string(value.get("material_code")),
        fluid: as_string(value.get("fluid")),
        location: as_string(value.get("location")),
        description: as_string(value.get("description")),
        sheet: 0,
        source: Provenance::Vlm,
    };

    // Tag backfill from the associated line spec.
    if valve.tag.is_empty() && !valve.line_spec.is_empty() {
        valve.tag = parse_line_spec(&valve.line_spec).tag;
    }
    if valve.fluid.is_empty() && !valve.tag.is_empty() {
        for prefix in ["CSW", "SSW", "CFW", "FW"] {
            if valve.tag.starts_with(prefix) {
                valve.fluid = system_fluid(prefix).to_string();
                break;
            }
        }
    }
    valve
}

/// Analyze one sheet: render, call the model, backfill from the text layer.
async fn analyze_single_pid_page(
    vlm: &PacedVlm,
    pdf_path: &Path,
    page_no: u32,
    out_dir: &Path,
    symbol_ref: &str,
) -> (Value, Vec<LineSpec>, Vec<ValveExtract>) {
    // Render and index inside a scope so no PDF handle crosses the await.
    let (image_path, text_specs) = {
        let renderer = match PageRenderer::new() {
            Ok(r) => r,
            Err(e) => {
                error!(page_no, error = %e, "renderer init failed");
                return (
                    serde_json::json!({"page": page_no, "vlm_ok": false, "error": e.to_string()}),
                    Vec::new(),
                    Vec::new(),
                );
            }
        };
        let image = match renderer.render_pid_page(pdf_path, page_no, out_dir) {
            Ok(path) => path,
            Err(e) => {
                error!(page_no, error = %e, "P&ID sheet render failed");
                return (
                    serde_json::json!({"page": page_no, "vlm_ok": false, "error": e.to_string()}),
                    Vec::new(),
                    Vec::new(),
                );
            }
        };
        let specs = PageTextIndex::load(&renderer, pdf_path, page_no)
            .map(|index| extract_line_specs_from_text(&index.full_text))
            .unwrap_or_default();
        (image, specs)
    };

    let prompt = prompts::pid_page_analysis_prompt(page_no, symbol_ref);
    let payload = match vlm
        .chat(&[(image_path.as_path(), "image/png")], &prompt, PID_MAX_TOKENS)
        .await
    {
        Ok(text) => match recovery::recover_object(&text) {
            Ok(mut value) => {
                value["page"] = serde_json::json!(page_no);
                value["vlm_ok"] = serde_json::json!(true);
                value
            }
            Err(e) => {
                warn!(page_no, error = %e, "sheet response unparseable");
                serde_json::json!({"page": page_no, "vlm_ok": false, "error": e.to_string()})
            }
        },
        Err(e) => {
            error!(page_no, error = %e, "sheet analysis failed");
            serde_json::json!({"page": page_no, "vlm_ok": false, "error": e.to_string()})
        }
    };

    let mut specs: Vec<LineSpec> = as_array(payload.get("line_specs"))
        .iter()
        .map(line_spec_from_value)
        .collect();

    // Text-layer specs the model missed.
    let model_tags: std::collections::HashSet<String> =
        specs.iter().map(|s| s.tag.clone()).collect();
    for ts in text_specs {
        if !ts.tag.is_empty() && !model_tags.contains(&ts.tag) {
            specs.push(ts);
        }
    }

    let valves: Vec<ValveExtract> = as_array(payload.get("valves"))
        .iter()
        .map(valve_from_value)
        .collect();

    (payload, specs, valves)
}

/// Analyze the given 1-indexed sheets (default: 2 and 3, when present).
///
/// # Errors
///
/// Returns an error on cancellation or when the document cannot be opened;
/// individual sheet failures are recorded in the page details and skipped.
pub async fn analyze_pid_pages(
    vlm: &PacedVlm,
    pdf_path: &Path,
    out_dir: &Path,
    symbol_ref: &str,
    pages: Option<Vec<u32>>,
    cancel: &CancelFlag,
) -> Result<PidAnalysis> {
    let total_pages = {
        let renderer = PageRenderer::new()?;
        renderer.page_count(pdf_path)? as u32
    };

    let pages = pages.unwrap_or_else(|| {
        [2u32, 3]
            .into_iter()
            .filter(|&p| p <= total_pages)
            .collect()
    });
    if pages.is_empty() {
        warn!("no P&ID sheets to analyze");
        return Ok(PidAnalysis::default());
    }

    info!(?pages, "starting P&ID sheet analysis");
    let mut analysis = PidAnalysis {
        pages_analyzed: pages.clone(),
        ..Default::default()
    };
    let mut seen_spec_tags = std::collections::HashSet::new();
    let mut seen_valve_tags = std::collections::HashSet::new();

    for &page_no in &pages {
        cancel.check()?;
        let (mut payload, specs, valves) =
            analyze_single_pid_page(vlm, pdf_path, page_no, out_dir, symbol_ref).await;

        for mut spec in specs {
            if !spec.tag.is_empty() && seen_spec_tags.insert(spec.tag.clone()) {
                spec.sheet = page_no;
                analysis.line_specs.push(spec);
            }
        }
        for mut valve in valves {
            if !valve.tag.is_empty() && seen_valve_tags.insert(valve.tag.clone()) {
                valve.sheet = page_no;
                analysis.valves.push(valve);
            }
        }
        for sym in as_array(payload.get("symbols_found")) {
            if sym.is_object() {
                let mut sym = sym.clone();
                sym["sheet"] = serde_json::json!(page_no);
                analysis.symbols_found.push(sym);
            }
        }
        for eq in as_array(payload.get("equipment")) {
            if eq.is_object() {
                let mut eq = eq.clone();
                eq["sheet"] = serde_json::json!(page_no);
                analysis.equipment.push(eq);
            }
        }

        info!(
            page_no,
            line_specs = analysis.line_specs.len(),
            valves = analysis.valves.len(),
            "sheet analyzed"
        );
        payload["sheet"] = serde_json::json!(page_no);
        analysis.page_details.push(payload);
    }

    info!(
        line_specs = analysis.line_specs.len(),
        valves = analysis.valves.len(),
        symbols = analysis.symbols_found.len(),
        "P&ID analysis complete"
    );
    Ok(analysis)
}

/// Merge regex-extracted valves with the sheet analysis. Model valves win;
/// regex-only tags are appended with line-spec backfill; tags found by both
/// get provenance `both` plus location/fluid backfill from the regex side.
#[must_use]
pub fn merge_regex_and_vlm(regex_valves: &[ValveExtract], analysis: &PidAnalysis) -> Vec<ValveExtract> {
    let model_tags: std::collections::HashSet<&str> =
        analysis.valves.iter().map(|v| v.tag.as_str()).collect();

    let mut enhanced: Vec<ValveExtract> = analysis
        .valves
        .iter()
        .cloned()
        .map(|mut v| {
            v.source = Provenance::Vlm;
            v
        })
        .collect();

    for rv in regex_valves {
        if rv.tag.is_empty() || model_tags.contains(rv.tag.as_str()) {
            continue;
        }
        let mut valve = rv.clone();
        valve.source = Provenance::Regex;
        // Backfill line-spec fields when a sheet spec carries the same tag.
        if let Some(ls) = analysis
            .line_specs
            .iter()
            .find(|ls| !ls.tag.is_empty() && (valve.tag == ls.tag || valve.tag.starts_with(&ls.tag)))
        {
            valve.line_spec = ls.full_spec.clone();
            if !ls.piping_class.is_empty() {
                valve.piping_class = ls.piping_class.clone();
            }
            if !ls.schedule.is_empty() {
                valve.schedule = ls.schedule.clone();
            }
            valve.pressure_rating = ls.pressure_rating.clone();
            valve.material_code = ls.material_code.clone();
        }
        enhanced.push(valve);
    }

    let regex_by_tag: std::collections::HashMap<&str, &ValveExtract> = regex_valves
        .iter()
        .filter(|v| !v.tag.is_empty())
        .map(|v| (v.tag.as_str(), v))
        .collect();
    for valve in &mut enhanced {
        if valve.source == Provenance::Vlm {
            if let Some(rv) = regex_by_tag.get(valve.tag.as_str()) {
                valve.source = Provenance::Both;
                if valve.location.is_empty() {
                    valve.location = rv.location.clone();
                }
                if valve.fluid.is_empty() {
                    valve.fluid = rv.fluid.clone();
                }
            }
        }
    }

    enhanced.sort_by(|a, b| a.tag.cmp(&b.tag));
    enhanced
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn line_spec_value_backfills_from_full_spec() {
        let value = json!({"full_spec": "10\"-CSW-9103-CS3-40#150-NI"});
        let spec = line_spec_from_value(&value);
        assert_eq!(spec.tag, "CSW9103");
        assert_eq!(spec.size, "10");
        assert_eq!(spec.fluid, "SW");
        assert_eq!(spec.source, Provenance::Vlm);
    }

    #[test]
    fn valve_value_backfills_tag_and_fluid() {
        let value = json!({
            "valve_type": "BUTTERFLY",
            "line_spec": "12\"-CSW-9112-CS3-STD#150-NI"
        });
        let valve = valve_from_value(&value);
        assert_eq!(valve.tag, "CSW9112");
        assert_eq!(valve.fluid, "SW");
        assert_eq!(valve.valve_type, Some(ValveType::Butterfly));
    }

    #[test]
    fn regex_merge_tracks_provenance() {
        let analysis = PidAnalysis {
            valves: vec![ValveExtract {
                tag: "CSW9112".into(),
                valve_type: Some(ValveType::Butterfly),
                ..Default::default()
            }],
            line_specs: vec![LineSpec {
                tag: "CSW9105".into(),
                full_spec: "10\"-CSW-9105-CS3-40#150-NI".into(),
                piping_class: "CS3".into(),
                schedule: "40".into(),
                pressure_rating: "150".into(),
                material_code: "NI".into(),
                ..Default::default()
            }],
            ..Default::default()
        };
        let regex_valves = vec![
            ValveExtract {
                tag: "CSW9112".into(),
                location: "COOLING SEA WATER SYSTEM".into(),
                fluid: "SW".into(),
                ..Default::default()
            },
            ValveExtract {
                tag: "CSW9105".into(),
                ..Default::default()
            },
        ];
        let merged = merge_regex_and_vlm(&regex_valves, &analysis);
        assert_eq!(merged.len(), 2);
        // Sorted by tag: CSW9105 (regex only, backfilled) then CSW9112 (both).
        assert_eq!(merged[0].tag, "CSW9105");
        assert_eq!(merged[0].source, Provenance::Regex);
        assert_eq!(merged[0].line_spec, "10\"-CSW-9105-CS3-40#150-NI");
        assert_eq!(merged[0].schedule, "40");
        assert_eq!(merged[1].tag, "CSW9112");
        assert_eq!(merged[1].source, Provenance::Both);
        assert_eq!(merged[1].location, "COOLING SEA WATER SYSTEM");
    }
}
