//! Local input validation.

use serde_json::Value;
use thiserror::Error;

pub const MAX_ID_LEN: usize = 128;
pub const MAX_CATEGORY_LEN: usize = 100;
pub const MAX_QUERY_LEN: usize = 500;
pub const MAX_POPULAR_LIMIT: u32 = 100;

/// Input rejected before any network call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid {field}: {message}")]
pub struct InvalidInput {
    pub field: &'static str,
    pub message: String,
}

impl InvalidInput {
    pub fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

/// An identifier that will be placed in a URL path segment. Anything URL
/// resolution could rewrite (dot segments, percent escapes) is rejected.
pub fn identifier(field: &'static str, value: &str) -> Result<String, InvalidInput> {
    let value = value.trim();
    if value.is_empty() {
        return Err(InvalidInput::new(field, "must not be empty"));
    }
    if value.chars().count() > MAX_ID_LEN {
        return Err(InvalidInput::new(field, format!("longer than {} characters", MAX_ID_LEN)));
    }
    if value.chars().any(|c| c.is_control() || c.is_whitespace() || matches!(c, '/' | '\\' | '?' | '#' | '%')) {
        return Err(InvalidInput::new(field, "contains reserved characters"));
    }
    if value == "." || value == ".." {
        return Err(InvalidInput::new(field, "must not be a dot segment"));
    }
    Ok(value.to_string())
}

/// Free text with surrounding whitespace removed and inner runs collapsed.
pub fn text(field: &'static str, value: &str, max_len: usize) -> Result<String, InvalidInput> {
    if value.chars().any(|c| c.is_control() && c != '\n' && c != '\t') {
        return Err(InvalidInput::new(field, "contains control characters"));
    }
    let collapsed = value.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.is_empty() {
        return Err(InvalidInput::new(field, "must not be empty"));
    }
    if collapsed.chars().count() > max_len {
        return Err(InvalidInput::new(field, format!("longer than {} characters", max_len)));
    }
    Ok(collapsed)
}

pub fn popular_limit(limit: u32) -> Result<u32, InvalidInput> {
    if limit == 0 || limit > MAX_POPULAR_LIMIT {
        return Err(InvalidInput::new("limit", format!("must be between 1 and {}", MAX_POPULAR_LIMIT)));
    }
    Ok(limit)
}

/// Payloads sent as request bodies must be JSON objects.
pub fn json_object(field: &'static str, value: &Value) -> Result<(), InvalidInput> {
    match value {
        Value::Object(map) if !map.is_empty() => Ok(()),
        Value::Object(_) => Err(InvalidInput::new(field, "must not be empty")),
        _ => Err(InvalidInput::new(field, "must be a JSON object")),
    }
}
