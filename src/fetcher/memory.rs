//! In-process page fetcher over a fixed list of raw fragments.
//!
//! Filters and ordering are evaluated against the raw fragments through the
//! source schema's path translation, the way a remote service would evaluate
//! them against its own field names. Every call is logged so tests can assert
//! on fetch counts and offsets; failures can be injected per offset.

use std::cmp::Ordering;
use std::collections::HashMap;

use parking_lot::Mutex;
use serde_json::Value as Json;
use tracing::trace;

use crate::error::{QueryError, Result};
use crate::fetcher::{Page, PageFetcher, PageRequest};
use crate::path::FieldPath;
use crate::query::{Filter, Operator, OrderKey};
use crate::schema::Schema;
use crate::value::Value;

/// One logged fetch.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FetchCall {
    /// Requested offset.
    pub offset: usize,
    /// Requested page size.
    pub page_size: usize,
}

/// Fetcher serving pages out of memory.
pub struct InMemoryFetcher {
    fragments: Vec<Json>,
    report_total: bool,
    calls: Mutex<Vec<FetchCall>>,
    failures: Mutex<HashMap<usize, QueryError>>,
}

impl InMemoryFetcher {
    /// Serves `fragments` in the given order.
    pub fn new(fragments: Vec<Json>) -> Self {
        Self {
            fragments,
            report_total: true,
            calls: Mutex::new(Vec::new()),
            failures: Mutex::new(HashMap::new()),
        }
    }

    /// Stops reporting the total match count, so the cursor must rely on
    /// short pages to detect the end.
    pub fn without_total(mut self) -> Self {
        self.report_total = false;
        self
    }

    /// Every fetch at `offset` fails with `err`.
    pub fn fail_at_offset(self, offset: usize, err: QueryError) -> Self {
        self.failures.lock().insert(offset, err);
        self
    }

    /// Removes an injected failure.
    pub fn heal(&self, offset: usize) {
        self.failures.lock().remove(&offset);
    }

    /// Logged calls in order.
    pub fn calls(&self) -> Vec<FetchCall> {
        self.calls.lock().clone()
    }

    /// Number of fetches so far.
    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    fn matching(&self, request: &PageRequest<'_>) -> Result<Vec<&Json>> {
        let filters = request
            .query
            .filters()
            .iter()
            .map(|f| Ok((raw_path(request, f)?, f)))
            .collect::<Result<Vec<_>>>()?;
        let mut matched = Vec::new();
        for fragment in &self.fragments {
            if filters.iter().all(|(path, f)| evaluate(fragment, path, f)) {
                matched.push(fragment);
            }
        }
        let keys = request
            .query
            .ordering()
            .iter()
            .map(|k| Ok((schema_path(request.schema, &k.path)?, k)))
            .collect::<Result<Vec<_>>>()?;
        if !keys.is_empty() {
            matched.sort_by(|a, b| compare_fragments(a, b, &keys));
        }
        Ok(matched)
    }
}

impl PageFetcher for InMemoryFetcher {
    fn fetch(&self, request: &PageRequest<'_>) -> Result<Page> {
        self.calls.lock().push(FetchCall {
            offset: request.offset,
            page_size: request.page_size,
        });
        if let Some(err) = self.failures.lock().get(&request.offset) {
            return Err(err.clone());
        }
        let matched = self.matching(request)?;
        let total = matched.len();
        let fragments: Vec<Json> = matched
            .into_iter()
            .skip(request.offset)
            .take(request.page_size)
            .cloned()
            .collect();
        trace!(
            source = request.source_id,
            offset = request.offset,
            returned = fragments.len(),
            total,
            "memory_fetcher.page"
        );
        Ok(Page {
            fragments,
            total: self.report_total.then_some(total),
        })
    }
}

fn raw_path(request: &PageRequest<'_>, filter: &Filter) -> Result<FieldPath> {
    match filter.path() {
        Some(path) => schema_path(request.schema, path),
        None => Err(QueryError::protocol(
            request.source_id,
            "primary-key filter reached the fetcher unresolved",
        )),
    }
}

fn schema_path(schema: &Schema, path: &FieldPath) -> Result<FieldPath> {
    schema.source_path(path).ok_or_else(|| QueryError::UnknownField {
        schema: schema.name().to_owned(),
        field: path.column_name(),
    })
}

fn candidates<'a>(fragment: &'a Json, path: &FieldPath) -> Vec<&'a Json> {
    let mut out = Vec::new();
    for found in path.lookup_json_all(fragment) {
        match found {
            Json::Array(items) => out.extend(items.iter()),
            other => out.push(other),
        }
    }
    out.retain(|v| !v.is_null());
    out
}

fn evaluate(fragment: &Json, path: &FieldPath, filter: &Filter) -> bool {
    let found = candidates(fragment, path);
    match filter.op {
        Operator::IsNull => {
            let want_null = !matches!(filter.value, Value::Bool(false));
            found.is_empty() == want_null
        }
        Operator::Ne => !found
            .iter()
            .any(|actual| compare(actual, &filter.value) == Some(Ordering::Equal)),
        Operator::In => match &filter.value {
            Value::List(options) => found.iter().any(|actual| {
                options
                    .iter()
                    .any(|opt| compare(actual, opt) == Some(Ordering::Equal))
            }),
            single => found
                .iter()
                .any(|actual| compare(actual, single) == Some(Ordering::Equal)),
        },
        Operator::Contains | Operator::IContains | Operator::StartsWith => {
            let needle = literal_text(&filter.value);
            found.iter().any(|actual| {
                let Some(hay) = json_text(actual) else {
                    return false;
                };
                match filter.op {
                    Operator::Contains => hay.contains(&needle),
                    Operator::IContains => hay.to_lowercase().contains(&needle.to_lowercase()),
                    _ => hay.starts_with(&needle),
                }
            })
        }
        op => found.iter().any(|actual| {
            let Some(ord) = compare(actual, &filter.value) else {
                return false;
            };
            match op {
                Operator::Eq => ord == Ordering::Equal,
                Operator::Lt => ord == Ordering::Less,
                Operator::Lte => ord != Ordering::Greater,
                Operator::Gt => ord == Ordering::Greater,
                Operator::Gte => ord != Ordering::Less,
                _ => false,
            }
        }),
    }
}

#[derive(Clone, Debug)]
enum Comparable {
    Bool(bool),
    Number(f64),
    Text(String),
}

fn comparable_json(value: &Json) -> Option<Comparable> {
    match value {
        Json::Bool(b) => Some(Comparable::Bool(*b)),
        Json::Number(n) => n.as_f64().map(Comparable::Number),
        Json::String(s) => Some(Comparable::Text(s.clone())),
        _ => None,
    }
}

fn comparable_literal(value: &Value) -> Option<Comparable> {
    match value {
        Value::Bool(b) => Some(Comparable::Bool(*b)),
        Value::Int(v) => Some(Comparable::Number(*v as f64)),
        Value::Float(v) => Some(Comparable::Number(*v)),
        Value::String(_) | Value::Date(_) | Value::DateTime(_) => {
            Some(Comparable::Text(literal_text(value)))
        }
        Value::Null | Value::Record(_) | Value::List(_) => None,
    }
}

fn compare_comparable(left: &Comparable, right: &Comparable) -> Option<Ordering> {
    match (left, right) {
        (Comparable::Bool(a), Comparable::Bool(b)) => Some(a.cmp(b)),
        (Comparable::Number(a), Comparable::Number(b)) => a.partial_cmp(b),
        (Comparable::Text(a), Comparable::Text(b)) => Some(a.cmp(b)),
        (Comparable::Text(a), Comparable::Number(b)) => a.trim().parse::<f64>().ok()?.partial_cmp(b),
        (Comparable::Number(a), Comparable::Text(b)) => a.partial_cmp(&b.trim().parse::<f64>().ok()?),
        _ => None,
    }
}

fn compare(actual: &Json, literal: &Value) -> Option<Ordering> {
    compare_comparable(&comparable_json(actual)?, &comparable_literal(literal)?)
}

fn literal_text(value: &Value) -> String {
    value.to_string()
}

fn json_text(value: &Json) -> Option<String> {
    match value {
        Json::String(s) => Some(s.clone()),
        Json::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn compare_fragments(a: &Json, b: &Json, keys: &[(FieldPath, &OrderKey)]) -> Ordering {
    for (path, key) in keys {
        let left = path.lookup_json(a).and_then(comparable_json);
        let right = path.lookup_json(b).and_then(comparable_json);
        let ord = match (left, right) {
            (None, None) => Ordering::Equal,
            (None, Some(_)) => Ordering::Greater,
            (Some(_), None) => Ordering::Less,
            (Some(l), Some(r)) => {
                let ord = compare_comparable(&l, &r).unwrap_or(Ordering::Equal);
                if key.descending {
                    ord.reverse()
                } else {
                    ord
                }
            }
        };
        if ord != Ordering::Equal {
            return ord;
        }
    }
    Ordering::Equal
}
