//! Rule execution for the validation descriptors carried in metadata.

use email_address::EmailAddress;
use regex::Regex;
use serde_json::Value;
use url::Url;
use uuid::Uuid;

use crate::errors::ValidationIssue;
use crate::types::{FieldKind, PropertyMetadata, ValidationRule};

fn length_of(kind: FieldKind, value: &Value) -> Option<usize> {
    match kind {
        FieldKind::Array => value.as_array().map(Vec::len),
        _ => value.as_str().map(|text| text.chars().count()),
    }
}

fn numeric_of(value: &Value) -> Option<f64> {
    match value {
        Value::Number(number) => number.as_f64(),
        Value::String(text) => text.parse().ok(),
        _ => None,
    }
}

fn is_valid_email(value: &str) -> bool {
    EmailAddress::is_valid(value)
}

fn is_valid_url(value: &str) -> bool {
    Url::parse(value).is_ok()
}

fn is_valid_uuid(value: &str) -> bool {
    Uuid::parse_str(value).is_ok()
}

fn check_rule(meta: &PropertyMetadata, rule: &ValidationRule, value: &Value) -> Option<(String, String)> {
    match rule {
        ValidationRule::Length { min, max } => {
            let len = length_of(meta.kind, value)?;
            if let Some(min_len) = min
                && len < *min_len
            {
                return Some((
                    "validation.length".to_string(),
                    format!("length must be at least {min_len}"),
                ));
            }
            if let Some(max_len) = max
                && len > *max_len
            {
                return Some((
                    "validation.length".to_string(),
                    format!("length must be at most {max_len}"),
                ));
            }
            None
        }
        ValidationRule::Range { min, max } => {
            let candidate = numeric_of(value)?;
            if let Some(min_value) = min
                && candidate < *min_value
            {
                return Some((
                    "validation.range".to_string(),
                    format!("value must be at least {min_value}"),
                ));
            }
            if let Some(max_value) = max
                && candidate > *max_value
            {
                return Some((
                    "validation.range".to_string(),
                    format!("value must be at most {max_value}"),
                ));
            }
            None
        }
        ValidationRule::Regex { pattern } => {
            let candidate = value.as_str()?;
            let rejected = Regex::new(pattern)
                .map(|regex| !regex.is_match(candidate))
                .unwrap_or(false);
            rejected.then(|| {
                (
                    "validation.regex".to_string(),
                    format!("value does not match pattern {pattern}"),
                )
            })
        }
        ValidationRule::Email => {
            let candidate = value.as_str()?;
            (!is_valid_email(candidate)).then(|| {
                (
                    "validation.email".to_string(),
                    "value must be a valid email address".to_string(),
                )
            })
        }
        ValidationRule::Url => {
            let candidate = value.as_str()?;
            (!is_valid_url(candidate)).then(|| {
                (
                    "validation.url".to_string(),
                    "value must be a valid URL".to_string(),
                )
            })
        }
        ValidationRule::Uuid => {
            let candidate = value.as_str()?;
            (!is_valid_uuid(candidate)).then(|| {
                (
                    "validation.uuid".to_string(),
                    "value must be a valid UUID".to_string(),
                )
            })
        }
    }
}

/// Runs every validation descriptor on `meta` against an already-decoded
/// value. Null skips validation; optionality is a typing concern, not a
/// rule failure.
pub fn validate_value(meta: &PropertyMetadata, value: &Value) -> Vec<ValidationIssue> {
    if value.is_null() {
        return Vec::new();
    }
    let mut issues = Vec::new();
    for descriptor in &meta.validations {
        if let Some((code, default_message)) = check_rule(meta, &descriptor.rule, value) {
            let message = descriptor.message.clone().unwrap_or(default_message);
            issues.push(ValidationIssue::new(&meta.name, code, message));
        }
    }
    issues
}
