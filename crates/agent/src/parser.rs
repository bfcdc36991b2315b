//! Tolerant parsing of tool calls emitted as text.
//!
//! Models without native tool support are asked to answer with
//! `<tool_call>{"name": ..., "arguments": {...}}</tool_call>`. In practice
//! they mangle the markup and the JSON in predictable ways: dropped tag
//! characters, truncated closing tags, single quotes, unquoted keys,
//! trailing commas. The cascade here recovers all of those before giving up.

use std::sync::OnceLock;

use regex::Regex;
use serde_json::Value;
use thiserror::Error;

#[derive(Clone, Debug, PartialEq)]
pub struct ParsedToolCall {
    pub name: String,
    pub arguments: Value,
}

#[derive(Debug, Error, PartialEq)]
pub enum ParseError {
    /// The text contains no tool-call markup at all; treat it as a plain
    /// conversational answer.
    #[error("no tool call present")]
    NotFound,
    #[error("tool call payload is not valid JSON: {0}")]
    Json(String),
    /// Markup was present but the payload lacks a usable name or arguments.
    #[error("tool call payload is incomplete")]
    Incomplete,
}

fn patterns() -> &'static [Regex] {
    static PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        [
            // Well-formed markup.
            r"(?s)<tool_call>\s*(\{.*?\})\s*</tool_call>",
            // Mangled opening or closing tags (`<ool_call>`, `</tool_cal>`).
            r"(?s)<t?o?ol_call>\s*(\{.*?\})\s*</[a-z_]*>",
            // Truncated output: opening tag present, closing tag never came.
            r"(?s)<tool_call>\s*(\{.*\})",
        ]
        .iter()
        .map(|pattern| Regex::new(pattern).unwrap_or_else(|err| panic!("bad pattern: {err}")))
        .collect()
    })
}

/// Extract the first tool call from model output, repairing common JSON
/// damage along the way.
pub fn extract_tool_call(text: &str) -> Result<ParsedToolCall, ParseError> {
    for pattern in patterns() {
        if let Some(captures) = pattern.captures(text) {
            let raw = captures.get(1).map(|group| group.as_str()).unwrap_or_default();
            return parse_payload(raw);
        }
    }

    // Last resort: the model emitted bare JSON with a "name" key and no
    // markup at all.
    if let Some(raw) = bare_json_candidate(text) {
        return parse_payload(raw);
    }

    Err(ParseError::NotFound)
}

fn bare_json_candidate(text: &str) -> Option<&str> {
    if !text.contains("\"name\"") && !text.contains("'name'") {
        return None;
    }
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if end <= start {
        return None;
    }
    Some(&text[start..=end])
}

fn parse_payload(raw: &str) -> Result<ParsedToolCall, ParseError> {
    let value = match serde_json::from_str::<Value>(raw) {
        Ok(value) => value,
        Err(_) => {
            let repaired = repair(raw);
            serde_json::from_str::<Value>(&repaired)
                .map_err(|err| ParseError::Json(err.to_string()))?
        }
    };

    let name = value
        .get("name")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .ok_or(ParseError::Incomplete)?
        .to_string();
    // A call without arguments is never executed on a guess; the caller
    // asks the model to rephrase instead.
    let arguments = match value.get("arguments") {
        Some(arguments @ Value::Object(_)) => arguments.clone(),
        _ => return Err(ParseError::Incomplete),
    };

    Ok(ParsedToolCall { name, arguments })
}

/// Best-effort JSON repair: trim to the outermost braces, normalize single
/// quotes, drop trailing commas, and quote bare object keys.
fn repair(raw: &str) -> String {
    let start = raw.find('{').unwrap_or(0);
    let end = raw.rfind('}').map(|index| index + 1).unwrap_or(raw.len());
    let mut text = raw[start..end].replace('\'', "\"");

    static TRAILING_COMMA: OnceLock<Regex> = OnceLock::new();
    let trailing_comma = TRAILING_COMMA.get_or_init(|| {
        Regex::new(r",\s*([}\]])").unwrap_or_else(|err| panic!("bad pattern: {err}"))
    });
    text = trailing_comma.replace_all(&text, "$1").into_owned();

    static BARE_KEY: OnceLock<Regex> = OnceLock::new();
    let bare_key = BARE_KEY.get_or_init(|| {
        Regex::new(r#"([{,]\s*)([A-Za-z_][A-Za-z0-9_]*)\s*:"#)
            .unwrap_or_else(|err| panic!("bad pattern: {err}"))
    });
    text = bare_key.replace_all(&text, "$1\"$2\":").into_owned();

    text
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{extract_tool_call, ParseError};

    #[test]
    fn parses_well_formed_markup() {
        let text = r#"Let me look that up.
<tool_call>{"name": "find_suppliers", "arguments": {"part_description": "HX-200"}}</tool_call>"#;

        let call = extract_tool_call(text).expect("parse");
        assert_eq!(call.name, "find_suppliers");
        assert_eq!(call.arguments, json!({"part_description": "HX-200"}));
    }

    #[test]
    fn recovers_mangled_opening_tag() {
        let text = r#"<ool_call>{"name": "get_supplier_responses", "arguments": {}}</tool_call>"#;
        let call = extract_tool_call(text).expect("parse");
        assert_eq!(call.name, "get_supplier_responses");
    }

    #[test]
    fn recovers_truncated_closing_tag() {
        let text = r#"<tool_call>{"name": "search_parts_catalog", "arguments": {"query": "bearing"}}"#;
        let call = extract_tool_call(text).expect("parse");
        assert_eq!(call.name, "search_parts_catalog");
        assert_eq!(call.arguments["query"], "bearing");
    }

    #[test]
    fn repairs_single_quotes_and_bare_keys() {
        let text = "<tool_call>{name: 'find_suppliers', arguments: {part_description: 'valve gasket'}}</tool_call>";
        let call = extract_tool_call(text).expect("parse");
        assert_eq!(call.name, "find_suppliers");
        assert_eq!(call.arguments["part_description"], "valve gasket");
    }

    #[test]
    fn repairs_trailing_commas() {
        let text = r#"<tool_call>{"name": "place_order", "arguments": {"quantity": 5,},}</tool_call>"#;
        let call = extract_tool_call(text).expect("parse");
        assert_eq!(call.name, "place_order");
        assert_eq!(call.arguments["quantity"], 5);
    }

    #[test]
    fn accepts_bare_json_with_a_name_key() {
        let text = r#"{"name": "get_supplier_responses", "arguments": {}}"#;
        let call = extract_tool_call(text).expect("parse");
        assert_eq!(call.name, "get_supplier_responses");
    }

    #[test]
    fn missing_arguments_is_incomplete() {
        let text = r#"<tool_call>{"name": "get_supplier_responses"}</tool_call>"#;
        assert_eq!(extract_tool_call(text), Err(ParseError::Incomplete));
    }

    #[test]
    fn plain_prose_is_not_found() {
        assert_eq!(
            extract_tool_call("The best quote so far is $450 from Acme."),
            Err(ParseError::NotFound)
        );
    }

    #[test]
    fn prose_with_braces_but_no_name_is_not_found() {
        assert_eq!(
            extract_tool_call("Here is a JSON example: {\"price\": 450}"),
            Err(ParseError::NotFound)
        );
    }

    #[test]
    fn empty_name_is_incomplete() {
        let text = r#"<tool_call>{"name": "", "arguments": {}}</tool_call>"#;
        assert_eq!(extract_tool_call(text), Err(ParseError::Incomplete));
    }

    #[test]
    fn non_object_arguments_are_incomplete() {
        let text = r#"<tool_call>{"name": "place_order", "arguments": "five"}</tool_call>"#;
        assert_eq!(extract_tool_call(text), Err(ParseError::Incomplete));
    }

    #[test]
    fn unrecoverable_json_is_a_json_error() {
        let text = "<tool_call>{this is not json at all}</tool_call>";
        assert!(matches!(extract_tool_call(text), Err(ParseError::Json(_))));
    }

    #[test]
    fn first_call_wins_when_several_are_present() {
        let text = r#"
<tool_call>{"name": "find_suppliers", "arguments": {"part_description": "HX-200"}}</tool_call>
<tool_call>{"name": "place_order", "arguments": {}}</tool_call>"#;
        let call = extract_tool_call(text).expect("parse");
        assert_eq!(call.name, "find_suppliers");
    }
}
