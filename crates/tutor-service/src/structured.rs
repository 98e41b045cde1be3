//! Recovery of JSON objects from free-form model output.
//!
//! Models asked for "strict JSON" still wrap it in fences, prefix it with a
//! sentence, or trail off with commentary. [`parse_object`] runs an ordered
//! list of strategies and returns the first JSON object any of them yields.
//! Each strategy is a plain function so it can be tested alone.

use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use crate::completion::strip_code_fences;
use crate::error::{Result, TutorError};

/// A recovered JSON object.
pub type JsonObject = Map<String, Value>;

fn as_object(value: Value) -> Option<JsonObject> {
    match value {
        Value::Object(map) => Some(map),
        _ => None,
    }
}

/// Strategy 1: the whole (fence-stripped) text is an object.
pub fn parse_whole(text: &str) -> std::result::Result<JsonObject, String> {
    match serde_json::from_str::<Value>(text) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(other) => Err(format!("expected a JSON object, found {}", kind_of(&other))),
        Err(e) => Err(e.to_string()),
    }
}

/// Strategy 2: some line suffix is an object. Leading prose is skipped one
/// line at a time; the first suffix that parses wins.
pub fn parse_line_suffix(text: &str) -> Option<JsonObject> {
    let lines: Vec<&str> = text.lines().collect();
    (0..lines.len()).find_map(|start| {
        let candidate = lines[start..].join("\n");
        serde_json::from_str::<Value>(&candidate).ok().and_then(as_object)
    })
}

/// Strategy 3: a balanced `{ ... }` span parses as an object.
///
/// Depth tracking ignores braces inside string literals. Every `{` is tried
/// as a start position, in order, until one span parses.
pub fn parse_balanced_span(text: &str) -> Option<JsonObject> {
    text.char_indices()
        .filter(|&(_, c)| c == '{')
        .find_map(|(start, _)| {
            let end = matching_brace(&text[start..])?;
            serde_json::from_str::<Value>(&text[start..start + end])
                .ok()
                .and_then(as_object)
        })
}

/// Byte length of the balanced span opening at the start of `text`.
fn matching_brace(text: &str) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (idx, c) in text.char_indices() {
        if in_string {
            match (escaped, c) {
                (true, _) => escaped = false,
                (false, '\\') => escaped = true,
                (false, '"') => in_string = false,
                _ => {}
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return Some(idx + c.len_utf8());
                }
            }
            _ => {}
        }
    }
    None
}

/// Recovers a JSON object from model output.
///
/// # Errors
///
/// Returns [`TutorError::MalformedOutput`] carrying the first strategy's
/// parse error and the offending text when no strategy succeeds.
pub fn parse_object(text: &str) -> Result<JsonObject> {
    let stripped = strip_code_fences(text);
    let first_error = match parse_whole(&stripped) {
        Ok(map) => return Ok(map),
        Err(e) => e,
    };
    parse_line_suffix(&stripped)
        .or_else(|| parse_balanced_span(&stripped))
        .ok_or_else(|| TutorError::malformed(first_error, text))
}

/// Recovers a JSON object and deserializes it into `T`.
///
/// # Errors
///
/// Returns [`TutorError::MalformedOutput`] when no object can be recovered
/// or the object does not have the shape of `T`.
pub fn parse_as<T: DeserializeOwned>(text: &str) -> Result<T> {
    let object = parse_object(text)?;
    serde_json::from_value(Value::Object(object))
        .map_err(|e| TutorError::malformed(format!("unexpected shape: {e}"), text))
}

const fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
