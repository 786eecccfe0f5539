//! Lenient readers over loosely-typed model JSON.
//!
//! Model responses interchange strings and numbers freely (`"quantity":
//! "2"` vs `2`, `"line_no": 101` vs `"101"`). Every schema is normalized
//! through these helpers exactly once, at its parse site.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

static FIRST_NUMBER: Lazy<Regex> = Lazy::new(|| Regex::new(r"[\d.]+").unwrap());

/// String field: accepts strings, numbers and null.
#[must_use]
pub fn as_string(value: Option<&Value>) -> String {
    match value {
        Some(Value::String(s)) => s.trim().to_string(),
        Some(Value::Number(n)) => n.to_string(),
        Some(Value::Bool(b)) => b.to_string(),
        _ => String::new(),
    }
}

/// Numeric field: accepts numbers and numeric strings ("491", "9.5 M"
/// yields 9.5).
#[must_use]
pub fn as_f64(value: Option<&Value>) -> f64 {
    match value {
        Some(Value::Number(n)) => n.as_f64().unwrap_or(0.0),
        Some(Value::String(s)) => FIRST_NUMBER
            .find(s)
            .and_then(|m| m.as_str().parse::<f64>().ok())
            .unwrap_or(0.0),
        _ => 0.0,
    }
}

#[must_use]
pub fn as_u32(value: Option<&Value>) -> u32 {
    as_f64(value).max(0.0) as u32
}

#[must_use]
pub fn as_bool(value: Option<&Value>) -> bool {
    match value {
        Some(Value::Bool(b)) => *b,
        Some(Value::String(s)) => s.eq_ignore_ascii_case("true"),
        Some(Value::Number(n)) => n.as_f64().unwrap_or(0.0) != 0.0,
        _ => false,
    }
}

/// Array field: missing or non-array yields empty.
#[must_use]
pub fn as_array(value: Option<&Value>) -> &[Value] {
    match value {
        Some(Value::Array(items)) => items,
        _ => &[],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn strings_accept_numbers() {
        let v = json!({"line_no": 101, "pipe_no": "6_S1-1"});
        assert_eq!(as_string(v.get("line_no")), "101");
        assert_eq!(as_string(v.get("pipe_no")), "6_S1-1");
        assert_eq!(as_string(v.get("missing")), "");
    }

    #[test]
    fn numbers_accept_unit_strings() {
        let v = json!({"w": "491 kg", "q": "9.5 M", "n": 3, "bad": "none"});
        assert!((as_f64(v.get("w")) - 491.0).abs() < f64::EPSILON);
        assert!((as_f64(v.get("q")) - 9.5).abs() < f64::EPSILON);
        assert!((as_f64(v.get("n")) - 3.0).abs() < f64::EPSILON);
        assert!((as_f64(v.get("bad")) - 0.0).abs() < f64::EPSILON);
    }

    #[test]
    fn bools_accept_loose_forms() {
        let v = json!({"a": true, "b": "true", "c": 1, "d": "no"});
        assert!(as_bool(v.get("a")));
        assert!(as_bool(v.get("b")));
        assert!(as_bool(v.get("c")));
        assert!(!as_bool(v.get("d")));
    }
}
