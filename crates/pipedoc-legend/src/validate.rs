//! Phase 3: garbage filtering, category normalization, dedup.

use once_cell::sync::Lazy;
use regex::RegexSet;
use serde::Deserialize;

use pipedoc_core::SymbolCategory;

/// One row as reported by the vision model, before validation.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawSymbol {
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub symbol_name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub bbox_pct: Option<Vec<f64>>,
}

/// Rows matching any of these are model noise, not symbols: grid labels,
/// column headers, section titles, title-block text, placeholder tokens.
static GARBAGE_PATTERNS: Lazy<RegexSet> = Lazy::new(|| {
    RegexSet::new([
        r"(?i)^[A-K]$",
        r"(?i)^1[0-6]$|^[1-9]$",
        r"(?i)^(SYMBOL|DESCRIPTION|DISCRIPTION|SYMBOLS?)$",
        r"(?i)^(SHIP NO|CLIENT|DRAWING|REV\b|DATE|SCALE|CHECKED|APPROVED)",
        r#"(?i)^(AA\s*AA|NAN\b|NN")"#,
        r"^\s*$",
        r"(?i)^INSTRUMENT$",
        r"(?i)^INSTRUMENT\s+VALVE\s+BODIES",
        r"(?i)^LEGEND SYMBOL",
        r"(?i)^MOTOR[\-\s]*HELMET",
        r"(?i)^(AA\s+)+",
        r#"(?i)^(NN"\s*)+$"#,
        r"(?i)^PIPING SYMBOLS",
        r"(?i)^VALVE SYMBOLS",
        r"(?i)^ACTUATORS?$",
        r"(?i)^ACTUATED\s+VALVES?$",
        r"(?i)^SAFETY\s+DEVICE",
        r"(?i)^OTHER\s+SYMBOLS?",
    ])
    .unwrap()
});

/// A validated row: normalized category, trimmed fields, sanitized bbox.
#[derive(Debug, Clone)]
pub struct CleanSymbol {
    pub category: SymbolCategory,
    pub symbol_name: String,
    pub description: String,
    pub bbox_pct: Option<[f64; 4]>,
}

/// True for descriptions that are legend furniture rather than symbols.
#[must_use]
pub fn is_garbage(description: &str) -> bool {
    GARBAGE_PATTERNS.is_match(description)
}

/// Drop garbage rows, normalize categories onto the closed set, and
/// collapse duplicates by case-folded description (first occurrence wins).
#[must_use]
pub fn validate_and_clean(raw: Vec<RawSymbol>) -> Vec<CleanSymbol> {
    let mut seen = std::collections::HashSet::new();
    let mut cleaned = Vec::new();

    for sym in raw {
        let desc = sym.description.trim().to_string();
        if desc.len() < 3 {
            continue;
        }
        if GARBAGE_PATTERNS.is_match(&desc) {
            continue;
        }

        let desc_key = desc.to_uppercase();
        if !seen.insert(desc_key) {
            continue;
        }

        let bbox_pct = sym.bbox_pct.as_deref().and_then(|b| {
            if b.len() >= 4 {
                Some([b[0], b[1], b[2], b[3]])
            } else {
                None
            }
        });

        cleaned.push(CleanSymbol {
            category: SymbolCategory::normalize(&sym.category),
            symbol_name: sym.symbol_name.trim().to_string(),
            description: desc,
            bbox_pct,
        });
    }

    cleaned
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(category: &str, desc: &str) -> RawSymbol {
        RawSymbol {
            category: category.into(),
            symbol_name: String::new(),
            description: desc.into(),
            bbox_pct: None,
        }
    }

    #[test]
    fn garbage_rows_are_dropped() {
        let input = vec![
            raw("VALVE", "A"),
            raw("VALVE", "12"),
            raw("VALVE", "SYMBOL"),
            raw("VALVE", "DISCRIPTION"),
            raw("OTHER", "SHIP NO. 1234"),
            raw("OTHER", "NN\" NN\""),
            raw("PIPING", "PIPING SYMBOLS"),
            raw("VALVE", "BALL VALVE (OPEN)"),
        ];
        let cleaned = validate_and_clean(input);
        assert_eq!(cleaned.len(), 1);
        assert_eq!(cleaned[0].description, "BALL VALVE (OPEN)");
    }

    #[test]
    fn duplicates_collapse_case_insensitively() {
        let input = vec![
            raw("VALVE", "Gate Valve (Open)"),
            raw("VALVE", "GATE VALVE (OPEN)"),
            raw("VALVE", "GATE VALVE (CLOSED)"),
        ];
        let cleaned = validate_and_clean(input);
        assert_eq!(cleaned.len(), 2);
        // First occurrence wins.
        assert_eq!(cleaned[0].description, "Gate Valve (Open)");
    }

    #[test]
    fn categories_normalize_onto_closed_set() {
        let input = vec![raw("actuated valves", "CONTROL VALVE (GENERAL), MODULATING")];
        let cleaned = validate_and_clean(input);
        assert_eq!(cleaned[0].category, SymbolCategory::ActuatedValve);

        let input = vec![raw("??", "SOME NEW GADGET")];
        let cleaned = validate_and_clean(input);
        assert_eq!(cleaned[0].category, SymbolCategory::Other);
    }

    #[test]
    fn short_bbox_is_discarded() {
        let mut sym = raw("VALVE", "NEEDLE VALVE (OPEN)");
        sym.bbox_pct = Some(vec![0.1, 0.2]);
        let cleaned = validate_and_clean(vec![sym]);
        assert!(cleaned[0].bbox_pct.is_none());
    }
}
