//! Helpers for JSON that arrives wrapped in JSON strings.

use serde_json::Value;

/// Nested string layers unwrapped before giving up.
const MAX_UNWRAP_DEPTH: usize = 4;

/// Unwrap a value that is a JSON string holding JSON, possibly encoded more
/// than once. Strings that do not parse as JSON are returned unchanged.
///
/// ```
/// use live_assist::utils::unwrap_stringified_json;
/// use serde_json::json;
///
/// let twice = json!("\"{\\\"items\\\":[]}\"");
/// assert_eq!(unwrap_stringified_json(twice), json!({"items": []}));
/// assert_eq!(unwrap_stringified_json(json!("plain text")), json!("plain text"));
/// ```
pub fn unwrap_stringified_json(mut value: Value) -> Value {
    for _ in 0..MAX_UNWRAP_DEPTH {
        let Value::String(text) = &value else {
            break;
        };
        let trimmed = text.trim();
        let looks_like_json = trimmed.starts_with('{')
            || trimmed.starts_with('[')
            || (trimmed.starts_with('"') && trimmed.ends_with('"') && trimmed.len() >= 2);
        if !looks_like_json {
            break;
        }
        match serde_json::from_str::<Value>(trimmed) {
            Ok(inner) => value = inner,
            Err(_) => break,
        }
    }
    value
}

/// Parse `raw` as JSON and unwrap string layers. Returns `None` when the
/// outermost text is not JSON.
pub fn parse_stringified_json(raw: &str) -> Option<Value> {
    serde_json::from_str::<Value>(raw.trim())
        .ok()
        .map(unwrap_stringified_json)
}
