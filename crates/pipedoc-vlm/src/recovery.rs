//! JSON recovery from model output.
//!
//! Model responses are expected to be JSON but arrive fence-wrapped,
//! truncated at the token budget, or wrapped in a `{"symbols": […]}` dict.
//! Two recovery ladders mirror the two response shapes:
//!
//! - [`recover_object`]: fence strip → direct parse → outermost `{…}` span
//! - [`recover_array`]: fence strip → direct parse → truncate to the last
//!   balanced `}` and close the array → unwrap `symbols`/`data` keys
//!
//! Recovery of a well-formed fence-wrapped payload equals direct parsing of
//! the fence-stripped body.

use pipedoc_core::{Error, Result};
use serde_json::Value;

/// Strip leading/trailing triple-backtick fences, tolerating a `json` tag.
fn strip_fences(text: &str) -> &str {
    let mut text = text.trim();
    if let Some(rest) = text.strip_prefix("```") {
        let rest = rest.strip_prefix("json").unwrap_or(rest);
        text = rest.trim_start();
    }
    if let Some(rest) = text.strip_suffix("```") {
        text = rest.trim_end();
    }
    text
}

/// Recover a JSON object from model output.
///
/// # Errors
///
/// Returns [`Error::ParseFailure`] when no strategy yields an object.
pub fn recover_object(raw: &str) -> Result<Value> {
    let text = strip_fences(raw);

    if let Ok(value) = serde_json::from_str::<Value>(text) {
        if value.is_object() {
            return Ok(value);
        }
    }

    // Outermost {…} span: tolerates prose around the payload.
    if let (Some(start), Some(end)) = (text.find('{'), text.rfind('}')) {
        if start < end {
            if let Ok(value) = serde_json::from_str::<Value>(&text[start..=end]) {
                if value.is_object() {
                    return Ok(value);
                }
            }
        }
    }

    Err(Error::ParseFailure(preview(raw)))
}

/// Recover a JSON array from model output.
///
/// Truncated arrays are repaired by trimming to the last well-formed
/// element and closing the array; `{"symbols": […]}` and `{"data": […]}`
/// wrappers are unwrapped.
///
/// # Errors
///
/// Returns [`Error::ParseFailure`] when every strategy fails.
pub fn recover_array(raw: &str) -> Result<Vec<Value>> {
    let text = strip_fences(raw);

    if let Ok(value) = serde_json::from_str::<Value>(text) {
        if let Some(items) = unwrap_array(value) {
            return Ok(items);
        }
        return Err(Error::ParseFailure(preview(raw)));
    }

    // Truncated response: keep the prefix through the last complete object,
    // drop a trailing comma, and close the array.
    if let Some(last_close) = text.rfind('}') {
        let mut repaired = text[..=last_close].trim_end().to_string();
        if !repaired.ends_with(']') {
            repaired = repaired.trim_end_matches(',').to_string();
            repaired.push_str("\n]");
        }
        if let Ok(value) = serde_json::from_str::<Value>(&repaired) {
            if let Some(items) = unwrap_array(value) {
                return Ok(items);
            }
        }
    }

    Err(Error::ParseFailure(preview(raw)))
}

fn unwrap_array(value: Value) -> Option<Vec<Value>> {
    match value {
        Value::Array(items) => Some(items),
        Value::Object(mut map) => {
            for key in ["symbols", "data"] {
                if let Some(Value::Array(items)) = map.remove(key) {
                    return Some(items);
                }
            }
            None
        }
        _ => None,
    }
}

fn preview(raw: &str) -> String {
    let mut end = raw.len().min(300);
    while !raw.is_char_boundary(end) {
        end -= 1;
    }
    raw[..end].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn direct_object_parse() {
        let value = recover_object(r#"{"page": 3, "components": []}"#).unwrap();
        assert_eq!(value["page"], 3);
    }

    #[test]
    fn fenced_object_equals_direct_parse() {
        let body = r#"{"page": 3, "ok": true}"#;
        let fenced = format!("```json\n{body}\n```");
        assert_eq!(
            recover_object(&fenced).unwrap(),
            serde_json::from_str::<Value>(body).unwrap()
        );
    }

    #[test]
    fn object_span_recovers_prose_wrapped_payload() {
        let value =
            recover_object("Here is the extraction:\n{\"page\": 1}\nLet me know!").unwrap();
        assert_eq!(value["page"], 1);
    }

    #[test]
    fn truncated_array_keeps_complete_elements() {
        // Array truncated mid-third-object: the first two survive.
        let raw = r#"[{"id": 1, "description": "BALL VALVE"},
                      {"id": 2, "description": "GATE VALVE"},
                      {"id": 3, "descri"#;
        let items = recover_array(raw).unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[1]["id"], 2);
    }

    #[test]
    fn truncated_array_with_trailing_comma() {
        let raw = r#"[{"id": 1},"#;
        let items = recover_array(raw).unwrap();
        assert_eq!(items.len(), 1);
    }

    #[test]
    fn dict_wrapped_arrays_unwrap() {
        let items = recover_array(r#"{"symbols": [{"id": 1}, {"id": 2}]}"#).unwrap();
        assert_eq!(items.len(), 2);
        let items = recover_array(r#"{"data": [{"id": 9}]}"#).unwrap();
        assert_eq!(items[0]["id"], 9);
    }

    #[test]
    fn fenced_array_equals_direct_parse() {
        let body = r#"[{"id": 1}]"#;
        let fenced = format!("```\n{body}\n```");
        assert_eq!(
            recover_array(&fenced).unwrap(),
            serde_json::from_str::<Vec<Value>>(body).unwrap()
        );
    }

    #[test]
    fn hopeless_input_fails_with_parse_failure() {
        assert!(matches!(
            recover_array("no json here at all"),
            Err(Error::ParseFailure(_))
        ));
        assert!(matches!(
            recover_object("[]"),
            Err(Error::ParseFailure(_))
        ));
    }
}
