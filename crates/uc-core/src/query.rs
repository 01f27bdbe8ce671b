//! Query-string encoding, URL joining and HTTP error message extraction.
//!
//! These helpers are shared by every HTTP adapter so that parameter encoding
//! and error messages look the same regardless of the transport in use.

use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::Value;

/// A query parameter value.
#[derive(Debug, Clone, PartialEq)]
pub enum ParamValue {
    Str(String),
    Int(i64),
    Float(f64),
    Bool(bool),
    /// Encoded as ISO-8601 with millisecond precision.
    Date(DateTime<Utc>),
    /// Encoded as repeated `key[]=value` pairs.
    List(Vec<ParamValue>),
    /// Skipped when encoding.
    Null,
}

impl ParamValue {
    fn scalar(&self) -> Option<String> {
        match self {
            ParamValue::Str(s) => Some(s.clone()),
            ParamValue::Int(i) => Some(i.to_string()),
            ParamValue::Float(f) => Some(f.to_string()),
            ParamValue::Bool(b) => Some(b.to_string()),
            ParamValue::Date(d) => Some(d.to_rfc3339_opts(SecondsFormat::Millis, true)),
            ParamValue::List(_) | ParamValue::Null => None,
        }
    }
}

impl From<&str> for ParamValue {
    fn from(value: &str) -> Self {
        ParamValue::Str(value.to_string())
    }
}

impl From<String> for ParamValue {
    fn from(value: String) -> Self {
        ParamValue::Str(value)
    }
}

impl From<i64> for ParamValue {
    fn from(value: i64) -> Self {
        ParamValue::Int(value)
    }
}

impl From<i32> for ParamValue {
    fn from(value: i32) -> Self {
        ParamValue::Int(value.into())
    }
}

impl From<u32> for ParamValue {
    fn from(value: u32) -> Self {
        ParamValue::Int(value.into())
    }
}

impl From<f64> for ParamValue {
    fn from(value: f64) -> Self {
        ParamValue::Float(value)
    }
}

impl From<bool> for ParamValue {
    fn from(value: bool) -> Self {
        ParamValue::Bool(value)
    }
}

impl From<DateTime<Utc>> for ParamValue {
    fn from(value: DateTime<Utc>) -> Self {
        ParamValue::Date(value)
    }
}

impl<T: Into<ParamValue>> From<Vec<T>> for ParamValue {
    fn from(values: Vec<T>) -> Self {
        ParamValue::List(values.into_iter().map(Into::into).collect())
    }
}

impl<T: Into<ParamValue>> From<Option<T>> for ParamValue {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(ParamValue::Null)
    }
}

/// Encode parameters as an `application/x-www-form-urlencoded` query string.
///
/// Lists become repeated `key[]=value` entries, dates become ISO-8601 strings
/// and null values are omitted.
pub fn encode_query(params: &[(String, ParamValue)]) -> String {
    let mut serializer = url::form_urlencoded::Serializer::new(String::new());
    for (key, value) in params {
        match value {
            ParamValue::List(items) => {
                let list_key = format!("{key}[]");
                for item in items {
                    if let Some(encoded) = item.scalar() {
                        serializer.append_pair(&list_key, &encoded);
                    }
                }
            }
            other => {
                if let Some(encoded) = other.scalar() {
                    serializer.append_pair(key, &encoded);
                }
            }
        }
    }
    serializer.finish()
}

/// Append encoded parameters to a URL, respecting an existing query string.
pub fn append_query(url: &str, params: &[(String, ParamValue)]) -> String {
    let query = encode_query(params);
    if query.is_empty() {
        return url.to_string();
    }
    let separator = if url.contains('?') { '&' } else { '?' };
    format!("{url}{separator}{query}")
}

/// Returns true if the URL already carries a `scheme://` prefix.
pub fn is_absolute_url(url: &str) -> bool {
    let Some((scheme, _)) = url.split_once("://") else {
        return false;
    };
    let mut chars = scheme.chars();
    let starts_alpha = chars.next().is_some_and(|c| c.is_ascii_alphabetic());
    starts_alpha && chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'))
}

/// Join a base URL and a relative path with exactly one slash between them.
pub fn join_url(base: &str, path: &str) -> String {
    let base = base.trim_end_matches('/');
    let path = path.trim_start_matches('/');
    if path.is_empty() {
        base.to_string()
    } else if base.is_empty() {
        format!("/{path}")
    } else {
        format!("{base}/{path}")
    }
}

/// Human-readable message for a non-2xx response.
///
/// Priority: the JSON body's `error` field, then its `message` field, then
/// `HTTP <status>: <statusText>`.
pub fn error_message(status: u16, status_text: &str, body: &str) -> String {
    if let Ok(Value::Object(map)) = serde_json::from_str::<Value>(body) {
        for field in ["error", "message"] {
            match map.get(field) {
                Some(Value::String(s)) if !s.is_empty() => return s.clone(),
                Some(Value::String(_)) | Some(Value::Null) | None => {}
                Some(other) => return other.to_string(),
            }
        }
    }
    format!("HTTP {status}: {status_text}")
}
