//! Built-in hydration filters, referenced from `#[sqlom(filter(...))]`.
//!
//! A filter receives the previous pipeline result and returns the next one;
//! non-string input passes through untouched so filters compose safely with
//! any declared kind.

use serde_json::Value;

pub fn trim(value: Value) -> Value {
    match value {
        Value::String(text) => Value::String(text.trim().to_string()),
        other => other,
    }
}

pub fn lower(value: Value) -> Value {
    match value {
        Value::String(text) => Value::String(text.to_lowercase()),
        other => other,
    }
}

pub fn upper(value: Value) -> Value {
    match value {
        Value::String(text) => Value::String(text.to_uppercase()),
        other => other,
    }
}
