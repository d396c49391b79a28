//! Canonical value representation shared by records, filters and projections.

use std::fmt;

use time::format_description::well_known::Rfc3339;
use time::{Date, OffsetDateTime};

use crate::path::{FieldPath, PathSegment};
use crate::record::Record;

/// Typed value held by a [`Record`] field, a filter literal or a projected cell.
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    /// Missing or null value.
    Null,
    /// Boolean value.
    Bool(bool),
    /// Signed 64-bit integer.
    Int(i64),
    /// 64-bit float.
    Float(f64),
    /// UTF-8 string.
    String(String),
    /// Calendar date.
    Date(Date),
    /// Timestamp with offset.
    DateTime(OffsetDateTime),
    /// Nested sub-record.
    Record(Record),
    /// Ordered sequence of values.
    List(Vec<Value>),
}

impl Value {
    /// True for [`Value::Null`].
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Borrows the string payload.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// Returns the integer payload.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(v) => Some(*v),
            _ => None,
        }
    }

    /// Returns the date payload.
    pub fn as_date(&self) -> Option<Date> {
        match self {
            Value::Date(d) => Some(*d),
            _ => None,
        }
    }

    /// Borrows the nested record.
    pub fn as_record(&self) -> Option<&Record> {
        match self {
            Value::Record(r) => Some(r),
            _ => None,
        }
    }

    /// Borrows the sequence payload.
    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(items) => Some(items),
            _ => None,
        }
    }

    /// Follows `path` through nested records and sequences.
    pub fn get_path(&self, path: &FieldPath) -> Option<&Value> {
        let mut current = self;
        for seg in path.segments() {
            current = match (seg, current) {
                (PathSegment::Field(name), Value::Record(record)) => record.get(name)?,
                (PathSegment::Index(idx), Value::List(items)) => items.get(*idx)?,
                _ => return None,
            };
        }
        Some(current)
    }

    /// Converts the value to JSON. Dates render as `YYYY-MM-DD`, timestamps
    /// as RFC 3339 and records recurse through [`Record::as_dict`].
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Null => serde_json::Value::Null,
            Value::Bool(v) => serde_json::Value::Bool(*v),
            Value::Int(v) => serde_json::Value::from(*v),
            Value::Float(v) => serde_json::Number::from_f64(*v)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Value::String(v) => serde_json::Value::String(v.clone()),
            Value::Date(d) => serde_json::Value::String(d.to_string()),
            Value::DateTime(ts) => serde_json::Value::String(format_datetime(ts)),
            Value::Record(record) => serde_json::Value::Object(record.as_dict()),
            Value::List(items) => serde_json::Value::Array(items.iter().map(Value::to_json).collect()),
        }
    }

    /// Hashable, totally ordered key used for deduplication.
    pub fn key(&self) -> ValueKey {
        match self {
            Value::Null => ValueKey::Null,
            Value::Bool(v) => ValueKey::Bool(*v),
            Value::Int(v) => ValueKey::Int(*v),
            Value::Float(v) => ValueKey::Float(normalize_float_bits(*v)),
            Value::String(v) => ValueKey::String(v.clone()),
            Value::Date(d) => ValueKey::Date(d.to_julian_day()),
            Value::DateTime(ts) => ValueKey::DateTime(ts.unix_timestamp_nanos()),
            Value::Record(_) | Value::List(_) => ValueKey::Composite(self.to_json().to_string()),
        }
    }
}

fn format_datetime(ts: &OffsetDateTime) -> String {
    ts.format(&Rfc3339).unwrap_or_else(|_| ts.to_string())
}

fn normalize_float_bits(v: f64) -> u64 {
    if v == 0.0 {
        0.0f64.to_bits()
    } else if v.is_nan() {
        f64::NAN.to_bits()
    } else {
        v.to_bits()
    }
}

/// Dedup key for [`Value`]. Floats compare by normalized bit pattern and
/// composite values by their canonical JSON rendering.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ValueKey {
    /// Null key.
    Null,
    /// Boolean key.
    Bool(bool),
    /// Integer key.
    Int(i64),
    /// Float key (bit pattern).
    Float(u64),
    /// String key.
    String(String),
    /// Date key (Julian day).
    Date(i32),
    /// Timestamp key (Unix nanoseconds).
    DateTime(i128),
    /// Record or list key.
    Composite(String),
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("null"),
            Value::Bool(v) => write!(f, "{v}"),
            Value::Int(v) => write!(f, "{v}"),
            Value::Float(v) => write!(f, "{v}"),
            Value::String(v) => f.write_str(v),
            Value::Date(d) => write!(f, "{d}"),
            Value::DateTime(ts) => f.write_str(&format_datetime(ts)),
            Value::Record(_) | Value::List(_) => write!(f, "{}", self.to_json()),
        }
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::String(value.to_owned())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::String(value)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Int(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Value::Int(value as i64)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Float(value)
    }
}

impl From<Date> for Value {
    fn from(value: Date) -> Self {
        Value::Date(value)
    }
}

impl From<OffsetDateTime> for Value {
    fn from(value: OffsetDateTime) -> Self {
        Value::DateTime(value)
    }
}

impl From<Record> for Value {
    fn from(value: Record) -> Self {
        Value::Record(value)
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(value: Vec<T>) -> Self {
        Value::List(value.into_iter().map(Into::into).collect())
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(Value::Null)
    }
}
