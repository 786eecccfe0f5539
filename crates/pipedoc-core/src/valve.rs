//! Valves and line specifications extracted from P&ID sheets.

use serde::{Deserialize, Serialize};

/// Valve type classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ValveType {
    Butterfly,
    Gate,
    Globe,
    Check,
    Ball,
    Plug,
    Needle,
    Control,
}

impl ValveType {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Butterfly => "BUTTERFLY",
            Self::Gate => "GATE",
            Self::Globe => "GLOBE",
            Self::Check => "CHECK",
            Self::Ball => "BALL",
            Self::Plug => "PLUG",
            Self::Needle => "NEEDLE",
            Self::Control => "CONTROL",
        }
    }

    /// Parse a model- or keyword-reported type, defaulting unknown values to
    /// butterfly (the dominant valve kind on these drawings).
    #[must_use]
    pub fn parse_lenient(raw: &str) -> Self {
        match raw.trim().to_uppercase().as_str() {
            "GATE" => Self::Gate,
            "GLOBE" => Self::Globe,
            "CHECK" => Self::Check,
            "BALL" => Self::Ball,
            "PLUG" => Self::Plug,
            "NEEDLE" => Self::Needle,
            "CONTROL" => Self::Control,
            _ => Self::Butterfly,
        }
    }
}

impl std::fmt::Display for ValveType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where an extracted record came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Provenance {
    /// Found by the regex text extractor only.
    Regex,
    /// Found by the vision model only.
    #[default]
    Vlm,
    /// Confirmed by both.
    Both,
    /// Recovered from the PDF text layer (line specs).
    Text,
}

/// A parsed line specification like `10"-CSW-9103-CS3-40#150-NI`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LineSpec {
    pub full_spec: String,
    #[serde(default)]
    pub size: String,
    /// System code: CSW, SSW, CFW, FW.
    #[serde(default)]
    pub system_code: String,
    #[serde(default)]
    pub line_number: String,
    /// `system_code + line_number`, e.g. `CSW9103`.
    #[serde(default)]
    pub tag: String,
    #[serde(default)]
    pub piping_class: String,
    #[serde(default)]
    pub schedule: String,
    #[serde(default)]
    pub pressure_rating: String,
    #[serde(default)]
    pub material_code: String,
    /// Fluid family derived from the system code.
    #[serde(default)]
    pub fluid: String,
    /// 1-indexed source sheet.
    #[serde(default)]
    pub sheet: u32,
    #[serde(default)]
    pub source: Provenance,
}

/// One valve identified on a P&ID sheet.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ValveExtract {
    pub tag: String,
    pub valve_type: Option<ValveType>,
    #[serde(default)]
    pub valve_subtype: String,
    #[serde(default)]
    pub actuator: String,
    #[serde(default)]
    pub size: String,
    #[serde(default)]
    pub line_spec: String,
    #[serde(default)]
    pub piping_class: String,
    #[serde(default)]
    pub schedule: String,
    #[serde(default)]
    pub pressure_rating: String,
    #[serde(default)]
    pub material_code: String,
    #[serde(default)]
    pub fluid: String,
    #[serde(default)]
    pub location: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub sheet: u32,
    #[serde(default)]
    pub source: Provenance,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lenient_type_parse_defaults_to_butterfly() {
        assert_eq!(ValveType::parse_lenient("gate"), ValveType::Gate);
        assert_eq!(ValveType::parse_lenient("CONTROL"), ValveType::Control);
        assert_eq!(ValveType::parse_lenient("weird"), ValveType::Butterfly);
    }

    #[test]
    fn provenance_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&Provenance::Both).unwrap(), "\"both\"");
        assert_eq!(serde_json::to_string(&Provenance::Regex).unwrap(), "\"regex\"");
    }
}
