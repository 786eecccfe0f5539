//! Legend symbol entries harvested from a P&ID first page.

use serde::{Deserialize, Serialize};

/// The six legend sections a symbol can belong to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SymbolCategory {
    Piping,
    Valve,
    Actuator,
    ActuatedValve,
    SafetyDevice,
    Other,
}

impl SymbolCategory {
    pub const ALL: [Self; 6] = [
        Self::Piping,
        Self::Valve,
        Self::Actuator,
        Self::ActuatedValve,
        Self::SafetyDevice,
        Self::Other,
    ];

    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Piping => "PIPING",
            Self::Valve => "VALVE",
            Self::Actuator => "ACTUATOR",
            Self::ActuatedValve => "ACTUATED_VALVE",
            Self::SafetyDevice => "SAFETY_DEVICE",
            Self::Other => "OTHER",
        }
    }

    /// Normalize a model-reported category string onto the closed set.
    /// Whitespace becomes underscores; anything unrecognized is `OTHER`.
    #[must_use]
    pub fn normalize(raw: &str) -> Self {
        let canon = raw.trim().to_uppercase().replace(' ', "_");
        match canon.as_str() {
            "PIPING" => Self::Piping,
            "VALVE" => Self::Valve,
            "ACTUATOR" | "ACTUATORS" => Self::Actuator,
            "ACTUATED_VALVE" | "ACTUATED_VALVES" => Self::ActuatedValve,
            "SAFETY_DEVICE" | "SAFETY_DEVICES" => Self::SafetyDevice,
            _ => Self::Other,
        }
    }
}

impl std::fmt::Display for SymbolCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One harvested legend symbol.
///
/// Created during legend harvest, consumed as reference context by
/// downstream vision-model calls, never mutated after persistence.
/// Descriptions are unique within a session after case-folding.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SymbolEntry {
    /// Ordinal 1…N within the session, assigned after dedup in model-return
    /// order.
    pub id: u32,
    pub category: SymbolCategory,
    /// Short code shown inside or near the graphic ("TS", "M", …). Empty
    /// when the drawing shows none.
    #[serde(default)]
    pub symbol_name: String,
    /// Full description text as written on the drawing.
    pub description: String,
    /// Absolute path of the cropped symbol raster, when cropping succeeded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_path: Option<String>,
    /// Filename under the session's `symbols/` directory.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_filename: Option<String>,
    /// Model-reported bounding box of the graphic as fractional page
    /// coordinates `[x1, y1, x2, y2]` in `[0, 1]`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bbox_pct: Option<[f64; 4]>,
}

/// Render symbols as the reference block appended to downstream prompts.
///
/// Symbols are grouped per category with `name: description` bullets:
///
/// ```text
/// ### VALVE
///   - BALL VALVE (OPEN)
///   - TS: TEMPORARY STRAINER
/// ```
#[must_use]
pub fn symbol_reference_text(symbols: &[SymbolEntry]) -> String {
    let mut parts: Vec<String> = Vec::new();
    for category in SymbolCategory::ALL {
        let in_category: Vec<&SymbolEntry> =
            symbols.iter().filter(|s| s.category == category).collect();
        if in_category.is_empty() {
            continue;
        }
        parts.push(format!("\n### {category}"));
        for sym in in_category {
            if sym.symbol_name.is_empty() {
                parts.push(format!("  - {}", sym.description));
            } else {
                parts.push(format!("  - {}: {}", sym.symbol_name, sym.description));
            }
        }
    }
    parts.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(category: SymbolCategory, name: &str, desc: &str) -> SymbolEntry {
        SymbolEntry {
            id: 0,
            category,
            symbol_name: name.to_string(),
            description: desc.to_string(),
            image_path: None,
            image_filename: None,
            bbox_pct: None,
        }
    }

    #[test]
    fn category_normalization() {
        assert_eq!(
            SymbolCategory::normalize("actuated valve"),
            SymbolCategory::ActuatedValve
        );
        assert_eq!(
            SymbolCategory::normalize(" SAFETY_DEVICE "),
            SymbolCategory::SafetyDevice
        );
        assert_eq!(
            SymbolCategory::normalize("mystery"),
            SymbolCategory::Other
        );
    }

    #[test]
    fn reference_text_groups_by_category() {
        let symbols = vec![
            entry(SymbolCategory::Valve, "", "BALL VALVE (OPEN)"),
            entry(SymbolCategory::Piping, "TS", "TEMPORARY STRAINER"),
            entry(SymbolCategory::Valve, "", "GATE VALVE (CLOSED)"),
        ];
        let text = symbol_reference_text(&symbols);
        assert!(text.contains("### PIPING"));
        assert!(text.contains("  - TS: TEMPORARY STRAINER"));
        assert!(text.contains("### VALVE"));
        assert!(text.contains("  - BALL VALVE (OPEN)"));
        // PIPING section precedes VALVE in the fixed category order.
        assert!(text.find("PIPING").unwrap() < text.find("VALVE").unwrap());
    }
}
