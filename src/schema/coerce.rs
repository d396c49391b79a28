//! Coercions turning raw JSON values into typed [`Value`]s.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::Value as Json;
use time::format_description::well_known::Rfc3339;
use time::format_description::OwnedFormatItem;
use time::macros::format_description;
use time::{Date, OffsetDateTime, Time};

use crate::error::{QueryError, Result};
use crate::path::{FieldPath, PathSegment};
use crate::schema::Schema;
use crate::value::Value;

/// How a raw value becomes a typed field value.
#[derive(Clone, Debug)]
pub enum Coercion {
    /// Scalars and arrays of scalars as-is. Objects are rejected.
    Passthrough,
    /// Any scalar rendered as a string.
    String,
    /// Integer, accepting numeric strings and integral floats.
    Integer,
    /// Float, accepting numeric strings.
    Float,
    /// Boolean, accepting `true/false`, `yes/no`, `y/n` and `1/0`.
    Boolean,
    /// Calendar date.
    Date(DateFormat),
    /// RFC 3339 timestamp; a bare date is read as midnight UTC.
    DateTime,
    /// Normalization table for enumerated codes.
    Enum(EnumMap),
    /// Nested object materialized through another schema.
    Nested(Arc<Schema>),
    /// Array of objects materialized through another schema. A lone object is
    /// read as a one-element list.
    NestedList(Arc<Schema>),
    /// Array of scalars, each coerced with the inner coercion.
    List(Box<Coercion>),
}

/// Accepted date layouts.
#[derive(Clone, Debug)]
pub enum DateFormat {
    /// `YYYY-MM-DD`, optionally followed by a time part which is ignored.
    Iso,
    /// Layout described with `time` format description syntax,
    /// e.g. `[month]-[day]-[year]`.
    Custom {
        /// Source text of the description.
        description: String,
        /// Parsed description.
        format: OwnedFormatItem,
    },
}

impl DateFormat {
    /// Parses a `time` format description.
    pub fn custom(description: &str) -> Result<Self> {
        let format = time::format_description::parse_owned::<2>(description).map_err(|err| {
            QueryError::InvalidSchema(format!("date format '{description}' is invalid: {err}"))
        })?;
        Ok(DateFormat::Custom {
            description: description.to_owned(),
            format,
        })
    }

    fn parse(&self, input: &str) -> std::result::Result<Date, String> {
        match self {
            DateFormat::Iso => {
                let head = input.get(..10).unwrap_or(input);
                Date::parse(head, format_description!("[year]-[month]-[day]"))
                    .map_err(|err| err.to_string())
            }
            DateFormat::Custom { format, .. } => {
                Date::parse(input, format).map_err(|err| err.to_string())
            }
        }
    }
}

/// Maps raw enumerated codes (case-insensitive) to canonical values.
#[derive(Clone, Debug, Default)]
pub struct EnumMap {
    variants: BTreeMap<String, String>,
    lenient: bool,
}

impl EnumMap {
    /// Builds a strict table from `(raw, canonical)` pairs.
    pub fn new<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<String>,
    {
        Self {
            variants: pairs
                .into_iter()
                .map(|(raw, canonical)| (fold(raw.as_ref()), canonical.into()))
                .collect(),
            lenient: false,
        }
    }

    /// Keeps unknown codes (trimmed) instead of failing.
    pub fn lenient(mut self) -> Self {
        self.lenient = true;
        self
    }

    fn normalize(&self, raw: &str) -> Option<String> {
        match self.variants.get(&fold(raw)) {
            Some(canonical) => Some(canonical.clone()),
            None if self.lenient => Some(raw.trim().to_owned()),
            None => None,
        }
    }
}

fn fold(raw: &str) -> String {
    raw.trim().to_lowercase()
}

/// Context for error reporting while coercing one field.
pub(crate) struct CoerceCtx<'a> {
    pub schema: &'a str,
    pub path: FieldPath,
}

impl CoerceCtx<'_> {
    fn fail(&self, raw: &Json, reason: impl Into<String>) -> QueryError {
        QueryError::schema(self.schema, self.path.column_name(), raw, reason)
    }

    fn at(&self, segment: PathSegment) -> CoerceCtx<'_> {
        CoerceCtx {
            schema: self.schema,
            path: self.path.child(segment),
        }
    }
}

impl Coercion {
    /// Applies the coercion to a non-null raw value.
    pub(crate) fn apply(&self, raw: &Json, ctx: &CoerceCtx<'_>) -> Result<Value> {
        match self {
            Coercion::Passthrough => passthrough(raw, ctx),
            Coercion::String => match raw {
                Json::String(s) => Ok(Value::String(s.clone())),
                Json::Number(n) => Ok(Value::String(n.to_string())),
                Json::Bool(b) => Ok(Value::String(b.to_string())),
                _ => Err(ctx.fail(raw, "expected a string")),
            },
            Coercion::Integer => coerce_int(raw).ok_or_else(|| ctx.fail(raw, "expected an integer")),
            Coercion::Float => coerce_float(raw).ok_or_else(|| ctx.fail(raw, "expected a number")),
            Coercion::Boolean => coerce_bool(raw).ok_or_else(|| ctx.fail(raw, "expected a boolean")),
            Coercion::Date(format) => {
                let text = raw.as_str().ok_or_else(|| ctx.fail(raw, "expected a date string"))?;
                format
                    .parse(text.trim())
                    .map(Value::Date)
                    .map_err(|err| ctx.fail(raw, format!("is not a valid date: {err}")))
            }
            Coercion::DateTime => {
                let text = raw
                    .as_str()
                    .ok_or_else(|| ctx.fail(raw, "expected a timestamp string"))?
                    .trim();
                parse_datetime(text)
                    .map(Value::DateTime)
                    .ok_or_else(|| ctx.fail(raw, "is not an RFC 3339 timestamp"))
            }
            Coercion::Enum(table) => {
                let text = match raw {
                    Json::String(s) => s.clone(),
                    Json::Number(n) => n.to_string(),
                    _ => return Err(ctx.fail(raw, "expected an enumerated code")),
                };
                table
                    .normalize(&text)
                    .map(Value::String)
                    .ok_or_else(|| ctx.fail(raw, "is not a known enumerated code"))
            }
            Coercion::Nested(schema) => {
                if !raw.is_object() {
                    return Err(ctx.fail(raw, "expected an object"));
                }
                schema.materialize_at(raw, &ctx.path).map(Value::Record)
            }
            Coercion::NestedList(schema) => match raw {
                Json::Array(items) => items
                    .iter()
                    .enumerate()
                    .map(|(idx, item)| {
                        let item_ctx = ctx.at(PathSegment::Index(idx));
                        if !item.is_object() {
                            return Err(item_ctx.fail(item, "expected an object"));
                        }
                        schema.materialize_at(item, &item_ctx.path).map(Value::Record)
                    })
                    .collect::<Result<Vec<_>>>()
                    .map(Value::List),
                Json::Object(_) => {
                    let item_ctx = ctx.at(PathSegment::Index(0));
                    let record = schema.materialize_at(raw, &item_ctx.path)?;
                    Ok(Value::List(vec![Value::Record(record)]))
                }
                _ => Err(ctx.fail(raw, "expected a list of objects")),
            },
            Coercion::List(inner) => match raw {
                Json::Array(items) => items
                    .iter()
                    .enumerate()
                    .map(|(idx, item)| {
                        if item.is_null() {
                            Ok(Value::Null)
                        } else {
                            inner.apply(item, &ctx.at(PathSegment::Index(idx)))
                        }
                    })
                    .collect::<Result<Vec<_>>>()
                    .map(Value::List),
                other => Ok(Value::List(vec![inner.apply(other, &ctx.at(PathSegment::Index(0)))?])),
            },
        }
    }

    /// Nested schema reached through this coercion, if any.
    pub fn nested_schema(&self) -> Option<&Arc<Schema>> {
        match self {
            Coercion::Nested(schema) | Coercion::NestedList(schema) => Some(schema),
            _ => None,
        }
    }

    /// True when the coerced value is a sequence.
    pub fn is_sequence(&self) -> bool {
        matches!(self, Coercion::NestedList(_) | Coercion::List(_))
    }
}

fn passthrough(raw: &Json, ctx: &CoerceCtx<'_>) -> Result<Value> {
    match raw {
        Json::Null => Ok(Value::Null),
        Json::Bool(b) => Ok(Value::Bool(*b)),
        Json::Number(n) => Ok(n
            .as_i64()
            .map(Value::Int)
            .unwrap_or_else(|| Value::Float(n.as_f64().unwrap_or(f64::NAN)))),
        Json::String(s) => Ok(Value::String(s.clone())),
        Json::Array(items) => items
            .iter()
            .enumerate()
            .map(|(idx, item)| passthrough(item, &ctx.at(PathSegment::Index(idx))))
            .collect::<Result<Vec<_>>>()
            .map(Value::List),
        Json::Object(_) => Err(ctx.fail(raw, "is an object but the field declares no nested schema")),
    }
}

fn coerce_int(raw: &Json) -> Option<Value> {
    match raw {
        Json::Number(n) => n.as_i64().map(Value::Int).or_else(|| {
            let f = n.as_f64()?;
            (f.fract() == 0.0 && f.abs() < i64::MAX as f64).then_some(Value::Int(f as i64))
        }),
        Json::String(s) => s.trim().parse::<i64>().ok().map(Value::Int),
        _ => None,
    }
}

fn coerce_float(raw: &Json) -> Option<Value> {
    match raw {
        Json::Number(n) => n.as_f64().map(Value::Float),
        Json::String(s) => s.trim().parse::<f64>().ok().map(Value::Float),
        _ => None,
    }
}

fn coerce_bool(raw: &Json) -> Option<Value> {
    match raw {
        Json::Bool(b) => Some(Value::Bool(*b)),
        Json::Number(n) => match n.as_i64() {
            Some(0) => Some(Value::Bool(false)),
            Some(1) => Some(Value::Bool(true)),
            _ => None,
        },
        Json::String(s) => match fold(s).as_str() {
            "true" | "yes" | "y" | "1" => Some(Value::Bool(true)),
            "false" | "no" | "n" | "0" => Some(Value::Bool(false)),
            _ => None,
        },
        _ => None,
    }
}

fn parse_datetime(text: &str) -> Option<OffsetDateTime> {
    if let Ok(ts) = OffsetDateTime::parse(text, &Rfc3339) {
        return Some(ts);
    }
    let date = Date::parse(text, format_description!("[year]-[month]-[day]")).ok()?;
    Some(date.with_time(Time::MIDNIGHT).assume_utc())
}
