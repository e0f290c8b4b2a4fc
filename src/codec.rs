//! Value codec.
//!
//! Converts [`Value`]s to and from the storable forms the backends need:
//! - JSON text for the relational backend and the JSON shelf protocol
//! - a compact binary form for the default shelf protocol
//!
//! JSON has no date/time type, so [`DateTimeStyle`] chooses how date/times
//! are written and recognised:
//!
//! ```text
//! Tagged: {"created": {"$date": "2021-03-04T05:06:07Z"}}
//! Iso:    {"created": "2021-03-04T05:06:07Z"}
//! ```
//!
//! `Iso` decoding is a heuristic: any string shaped like an ISO-8601 date/time
//! comes back as [`Value::DateTime`], including strings that were never
//! date/times. `Tagged` only converts single-field `$date` objects; a stored
//! object that would read back as a tag is wrapped as `{"$object": {...}}`.

use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

use chrono::{DateTime, NaiveDate, NaiveDateTime, SecondsFormat, Utc};
use regex::Regex;

use crate::error::{PreserveError, Result};
use crate::value::Value;

/// Field name marking a tagged date/time object.
pub const DATE_TAG: &str = "$date";

/// Field name wrapping a stored object that looks like a tag.
pub const OBJECT_TAG: &str = "$object";

static ISO_SHAPE: OnceLock<Regex> = OnceLock::new();

fn iso_shape() -> &'static Regex {
    ISO_SHAPE.get_or_init(|| {
        Regex::new(
            r"^\d{4}-\d{2}-\d{2}([T ]\d{2}:\d{2}(:\d{2}(\.\d{1,9})?)?(Z|[+-]\d{2}:?\d{2})?)?$",
        )
        .expect("static date/time pattern is valid")
    })
}

/// How date/times are represented inside JSON text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DateTimeStyle {
    /// `{"$date": "<rfc3339>"}` objects.
    #[default]
    Tagged,
    /// Bare ISO-8601 strings, recognised heuristically on decode.
    Iso,
}

impl DateTimeStyle {
    /// Canonical parameter spelling.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Tagged => "tagged",
            Self::Iso => "iso",
        }
    }
}

impl fmt::Display for DateTimeStyle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DateTimeStyle {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "tagged" => Ok(Self::Tagged),
            "iso" | "iso8601" => Ok(Self::Iso),
            other => Err(format!("expected 'tagged' or 'iso', got '{other}'")),
        }
    }
}

/// Formats a date/time the way every backend writes it.
#[must_use]
pub fn format_datetime(when: &DateTime<Utc>) -> String {
    when.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}

/// Parses an ISO-8601 date/time string.
///
/// Accepts RFC 3339, naive date/times (read as UTC), and bare dates
/// (midnight UTC). Returns `None` for anything else.
#[must_use]
pub fn parse_datetime(text: &str) -> Option<DateTime<Utc>> {
    if !iso_shape().is_match(text) {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Some(dt.with_timezone(&Utc));
    }
    for format in [
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%dT%H:%M",
        "%Y-%m-%d %H:%M",
    ] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(text, format) {
            return Some(naive.and_utc());
        }
    }
    NaiveDate::parse_from_str(text, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

/// Converts a value into a JSON tree.
///
/// # Errors
/// - `Serialization` if the value holds a non-finite float, which JSON
///   cannot encode.
pub fn to_json(value: &Value, style: DateTimeStyle) -> Result<serde_json::Value> {
    Ok(match value {
        Value::Null => serde_json::Value::Null,
        Value::Bool(b) => serde_json::Value::Bool(*b),
        Value::Int(i) => serde_json::Value::from(*i),
        Value::Float(f) => serde_json::Number::from_f64(*f)
            .map(serde_json::Value::Number)
            .ok_or_else(|| {
                PreserveError::serialization(format!("float {f} has no JSON encoding"))
            })?,
        Value::String(s) => serde_json::Value::String(s.clone()),
        Value::DateTime(dt) => match style {
            DateTimeStyle::Tagged => {
                let mut tagged = serde_json::Map::with_capacity(1);
                tagged.insert(DATE_TAG.to_string(), format_datetime(dt).into());
                serde_json::Value::Object(tagged)
            }
            DateTimeStyle::Iso => serde_json::Value::String(format_datetime(dt)),
        },
        Value::Array(items) => serde_json::Value::Array(
            items
                .iter()
                .map(|item| to_json(item, style))
                .collect::<Result<_>>()?,
        ),
        Value::Object(fields) => {
            let encoded: serde_json::Map<String, serde_json::Value> = fields
                .iter()
                .map(|(k, v)| Ok((k.clone(), to_json(v, style)?)))
                .collect::<Result<_>>()?;
            if style == DateTimeStyle::Tagged && is_tag_shaped(&encoded) {
                let mut wrapper = serde_json::Map::with_capacity(1);
                wrapper.insert(OBJECT_TAG.to_string(), serde_json::Value::Object(encoded));
                serde_json::Value::Object(wrapper)
            } else {
                serde_json::Value::Object(encoded)
            }
        }
    })
}

/// True for single-field objects keyed by one of the tags.
fn is_tag_shaped(fields: &serde_json::Map<String, serde_json::Value>) -> bool {
    fields.len() == 1 && (fields.contains_key(DATE_TAG) || fields.contains_key(OBJECT_TAG))
}

fn object_from_json(
    fields: serde_json::Map<String, serde_json::Value>,
    style: DateTimeStyle,
) -> Value {
    Value::Object(
        fields
            .into_iter()
            .map(|(k, v)| (k, from_json(v, style)))
            .collect(),
    )
}

/// Converts a JSON tree into a value, recognising date/times per `style`.
#[must_use]
pub fn from_json(json: serde_json::Value, style: DateTimeStyle) -> Value {
    match json {
        serde_json::Value::String(s) => match style {
            DateTimeStyle::Iso => parse_datetime(&s).map_or(Value::String(s), Value::DateTime),
            DateTimeStyle::Tagged => Value::String(s),
        },
        serde_json::Value::Array(items) => {
            Value::Array(items.into_iter().map(|item| from_json(item, style)).collect())
        }
        serde_json::Value::Object(mut fields) => {
            if style == DateTimeStyle::Tagged && fields.len() == 1 {
                if let Some(serde_json::Value::String(text)) = fields.get(DATE_TAG) {
                    if let Some(dt) = parse_datetime(text) {
                        return Value::DateTime(dt);
                    }
                }
                if matches!(fields.get(OBJECT_TAG), Some(serde_json::Value::Object(_))) {
                    if let Some(serde_json::Value::Object(inner)) = fields.remove(OBJECT_TAG) {
                        return object_from_json(inner, style);
                    }
                }
            }
            object_from_json(fields, style)
        }
        other => Value::from(other),
    }
}

/// Encodes a value as JSON text.
///
/// # Errors
/// - `Serialization` if the value has no JSON encoding.
pub fn encode_json(value: &Value, style: DateTimeStyle) -> Result<String> {
    let tree = to_json(value, style)?;
    serde_json::to_string(&tree)
        .map_err(|e| PreserveError::serialization_with("JSON encoding failed", e))
}

/// Decodes JSON text into a value.
///
/// # Errors
/// - `Serialization` if the text is not valid JSON.
pub fn decode_json(text: &str, style: DateTimeStyle) -> Result<Value> {
    let tree: serde_json::Value = serde_json::from_str(text)
        .map_err(|e| PreserveError::serialization_with("invalid JSON document", e))?;
    Ok(from_json(tree, style))
}

/// Encodes a value in the compact binary form.
///
/// # Errors
/// - `Serialization` if the binary encoder fails.
#[cfg(feature = "shelf")]
pub fn encode_binary(value: &Value) -> Result<Vec<u8>> {
    bincode::serialize(value)
        .map_err(|e| PreserveError::serialization_with("binary encoding failed", e))
}

/// Decodes a value from the compact binary form.
///
/// # Errors
/// - `Serialization` if the bytes are not a valid encoding.
#[cfg(feature = "shelf")]
pub fn decode_binary(bytes: &[u8]) -> Result<Value> {
    bincode::deserialize(bytes)
        .map_err(|e| PreserveError::serialization_with("invalid binary value", e))
}
