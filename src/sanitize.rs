//! JSON payload sanitation.
//!
//! Plugins occasionally hand back text that is JSON encoded one or more
//! times, sometimes with a leading byte-order mark. `sanitize_json` undoes
//! that so every pipeline stage sees structured values.

use serde_json::Value;

const BOM: char = '\u{FEFF}';

/// Recursively sanitize a JSON value.
///
/// - strings that look like JSON objects, arrays or quoted strings are parsed,
///   repeatedly, until they stop looking like JSON
/// - a leading BOM is stripped from every string
/// - arrays and objects are sanitized element by element
/// - anything that fails to parse is returned unchanged
pub fn sanitize_json(value: Value) -> Value {
    match value {
        Value::String(s) => sanitize_str(s),
        Value::Array(items) => Value::Array(items.into_iter().map(sanitize_json).collect()),
        Value::Object(map) => {
            Value::Object(map.into_iter().map(|(k, v)| (k, sanitize_json(v))).collect())
        }
        other => other,
    }
}

fn sanitize_str(raw: String) -> Value {
    let clean = raw.strip_prefix(BOM).unwrap_or(&raw);
    if !looks_like_json(clean.trim()) {
        return Value::String(raw);
    }
    match serde_json::from_str::<Value>(clean) {
        // Double-encoded: keep unwrapping.
        Ok(Value::String(inner)) => sanitize_str(inner),
        Ok(parsed) => parsed,
        Err(_) => Value::String(raw),
    }
}

fn looks_like_json(trimmed: &str) -> bool {
    let wrapped = |open: char, close: char| {
        trimmed.len() >= 2 && trimmed.starts_with(open) && trimmed.ends_with(close)
    };
    wrapped('{', '}') || wrapped('[', ']') || wrapped('"', '"')
}
