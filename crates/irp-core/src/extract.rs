//! Field extraction from platform JSON and response headers.

use serde_json::Value;

use crate::error::{IrpError, Result};
use crate::http_client::HttpResponse;

/// Integer field `key`, accepting JSON numbers and numeric strings.
pub fn require_i64(value: &Value, key: &str, context: &str) -> Result<i64> {
    match value.get(key) {
        Some(Value::Number(number)) => number
            .as_i64()
            .ok_or_else(|| IrpError::api(format!("Field '{key}' is not an integer in {context}"))),
        Some(Value::String(text)) => text
            .trim()
            .parse()
            .map_err(|_| IrpError::api(format!("Field '{key}' is not an integer in {context}"))),
        _ => Err(IrpError::api(format!("Missing '{key}' in {context}"))),
    }
}

pub fn require_str<'a>(value: &'a Value, key: &str, context: &str) -> Result<&'a str> {
    value
        .get(key)
        .and_then(Value::as_str)
        .ok_or_else(|| IrpError::api(format!("Missing '{key}' in {context}")))
}

pub fn require<'a>(value: &'a Value, key: &str, context: &str) -> Result<&'a Value> {
    value
        .get(key)
        .ok_or_else(|| IrpError::api(format!("Missing '{key}' in {context}")))
}

/// The response body as a list; a single object becomes a one-element list
/// and `null` becomes empty.
pub fn into_list(value: Value) -> Vec<Value> {
    match value {
        Value::Array(items) => items,
        Value::Null => Vec::new(),
        other => vec![other],
    }
}

/// Entries under `key` (usually `items`), empty when absent.
pub fn list_at(value: &Value, key: &str) -> Vec<Value> {
    value
        .get(key)
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default()
}

/// First element of a list that must hold exactly one entry.
pub fn exactly_one(mut items: Vec<Value>, what: &str) -> Result<Value> {
    if items.len() != 1 {
        return Err(IrpError::api(format!(
            "Expected 1 {what}, found {}",
            items.len()
        )));
    }
    Ok(items.remove(0))
}

pub fn location_header<'a>(response: &'a HttpResponse, operation: &str) -> Result<&'a str> {
    response
        .header("location")
        .filter(|location| !location.trim().is_empty())
        .ok_or_else(|| {
            IrpError::api(format!(
                "{operation} succeeded but Location header is missing"
            ))
        })
}

/// Trailing path segment of the `Location` header, parsed as an id.
pub fn id_from_location(response: &HttpResponse, operation: &str) -> Result<i64> {
    let location = location_header(response, operation)?;
    let segment = location
        .trim_end_matches('/')
        .rsplit('/')
        .next()
        .unwrap_or_default();
    segment.parse().map_err(|_| {
        IrpError::api(format!(
            "{operation}: Location header '{location}' does not end in a numeric id"
        ))
    })
}

/// JSON body of a response; an empty body reads as `null`.
pub fn json_body(response: &HttpResponse) -> Result<Value> {
    if response.body.iter().all(u8::is_ascii_whitespace) {
        return Ok(Value::Null);
    }
    Ok(response.parse_json()?)
}

/// Comma-separated JSON string literals for `IN (...)` filters.
pub fn quoted_list<S: AsRef<str>>(values: &[S]) -> String {
    values
        .iter()
        .map(|value| Value::String(value.as_ref().to_owned()).to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

/// First `max` characters of `value`.
pub fn truncate_chars(value: &str, max: usize) -> String {
    value.chars().take(max).collect()
}
