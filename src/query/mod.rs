#![forbid(unsafe_code)]

//! Immutable, chainable query values.
//!
//! A [`Query`] describes a filtered, ordered, windowed and projected view of
//! one source. Every combinator borrows the receiver and returns a new value,
//! so a base query can serve as a template for any number of derived ones.
//! Nothing touches the network until a [`ResultCursor`] is created.

/// Filter predicates and lookup parsing.
pub mod filter;

use std::ops::{Bound, RangeBounds};

use crate::cursor::ResultCursor;
use crate::error::{QueryError, Result};
use crate::path::FieldPath;
use crate::record::Record;
use crate::registry::Registry;
use crate::value::Value;

pub use filter::{parse_lookup, Filter, FilterField, Operator};

/// Output reshaping requested by `values` / `values_list`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Projection {
    /// Rows restricted to these paths, in order.
    Values(Vec<FieldPath>),
    /// Bare values of one path.
    ValuesList(FieldPath),
}

impl Projection {
    /// Projected paths in order.
    pub fn paths(&self) -> &[FieldPath] {
        match self {
            Projection::Values(paths) => paths,
            Projection::ValuesList(path) => std::slice::from_ref(path),
        }
    }

    /// The single projected path, when exactly one is requested.
    pub fn single(&self) -> Option<&FieldPath> {
        match self.paths() {
            [only] => Some(only),
            _ => None,
        }
    }
}

/// Sort key; `-field` parses as descending.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OrderKey {
    /// Sorted path.
    pub path: FieldPath,
    /// Descending when true.
    pub descending: bool,
}

impl OrderKey {
    /// Parses `field` or `-field`.
    pub fn parse(spec: &str) -> Self {
        match spec.trim().strip_prefix('-') {
            Some(rest) => OrderKey {
                path: FieldPath::parse(rest),
                descending: true,
            },
            None => OrderKey {
                path: FieldPath::parse(spec.trim().trim_start_matches('+')),
                descending: false,
            },
        }
    }
}

/// Offset/limit window of a query.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Window {
    /// Records skipped at the start of the remote ordering.
    pub offset: usize,
    /// Maximum number of records; `None` is unbounded.
    pub limit: Option<usize>,
}

/// Immutable specification of a view over one remote collection.
#[derive(Clone, Debug, PartialEq)]
pub struct Query {
    source_id: String,
    filters: Vec<Filter>,
    projection: Option<Projection>,
    order_by: Vec<OrderKey>,
    window: Window,
    explode: Option<FieldPath>,
}

impl Query {
    /// Unfiltered query over `source_id`. Use [`Registry::query`] to check the
    /// identifier up front.
    pub fn new(source_id: impl Into<String>) -> Self {
        Self {
            source_id: source_id.into(),
            filters: Vec::new(),
            projection: None,
            order_by: Vec::new(),
            window: Window::default(),
            explode: None,
        }
    }

    /// Target source identifier.
    pub fn source_id(&self) -> &str {
        &self.source_id
    }

    /// Predicates in declaration order.
    pub fn filters(&self) -> &[Filter] {
        &self.filters
    }

    /// Requested projection.
    pub fn projection(&self) -> Option<&Projection> {
        self.projection.as_ref()
    }

    /// Sort keys.
    pub fn ordering(&self) -> &[OrderKey] {
        &self.order_by
    }

    /// Offset and limit.
    pub fn window(&self) -> Window {
        self.window
    }

    /// Field flattened into one virtual row per element.
    pub fn exploded(&self) -> Option<&FieldPath> {
        self.explode.as_ref()
    }

    /// Appends a predicate on `field`.
    pub fn filter(&self, field: impl Into<FieldPath>, op: Operator, value: impl Into<Value>) -> Self {
        self.filter_on(FilterField::Path(field.into()), op, value)
    }

    /// Appends a predicate on an explicit [`FilterField`].
    pub fn filter_on(&self, field: FilterField, op: Operator, value: impl Into<Value>) -> Self {
        let mut next = self.clone();
        next.filters.push(Filter {
            field,
            op,
            value: value.into(),
        });
        next
    }

    /// Appends a predicate written as a lookup expression (`filing_date__gte`).
    pub fn filter_lookup(&self, expr: &str, value: impl Into<Value>) -> Self {
        let (path, op) = parse_lookup(expr);
        self.filter_on(FilterField::Path(path), op, value)
    }

    /// Filters on the source's primary identifier.
    pub fn key(&self, value: impl Into<Value>) -> Self {
        self.filter_on(FilterField::PrimaryKey, Operator::Eq, value)
    }

    /// Restricts output rows to `paths` (duplicates are dropped, order kept).
    /// An empty list clears the projection.
    pub fn values<I, P>(&self, paths: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<FieldPath>,
    {
        let mut unique: Vec<FieldPath> = Vec::new();
        for path in paths.into_iter().map(Into::into) {
            if !unique.contains(&path) {
                unique.push(path);
            }
        }
        let mut next = self.clone();
        next.projection = (!unique.is_empty()).then_some(Projection::Values(unique));
        next
    }

    /// Projects the bare values of one path.
    pub fn values_list(&self, path: impl Into<FieldPath>) -> Self {
        let mut next = self.clone();
        next.projection = Some(Projection::ValuesList(path.into()));
        next
    }

    /// [`Query::values_list`] for a dynamic list that must hold exactly one path.
    pub fn values_list_many<I, P>(&self, paths: I) -> Result<Self>
    where
        I: IntoIterator<Item = P>,
        P: Into<FieldPath>,
    {
        let mut paths: Vec<FieldPath> = paths.into_iter().map(Into::into).collect();
        if paths.len() != 1 {
            return Err(QueryError::InvalidProjection(
                "values_list requires exactly one field path",
            ));
        }
        Ok(self.values_list(paths.remove(0)))
    }

    /// Replaces the sort keys.
    pub fn order_by<I, S>(&self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut next = self.clone();
        next.order_by = keys.into_iter().map(|k| OrderKey::parse(k.as_ref())).collect();
        next
    }

    /// Sets the maximum number of records.
    pub fn limit(&self, limit: usize) -> Self {
        let mut next = self.clone();
        next.window.limit = Some(limit);
        next
    }

    /// Sets the number of leading records to skip.
    pub fn offset(&self, offset: usize) -> Self {
        let mut next = self.clone();
        next.window.offset = offset;
        next
    }

    /// Narrows the window relative to the current one, like slicing a
    /// sequence: `q.slice(5..10)` is records 5..10 of `q`. Reversed ranges
    /// produce an empty window.
    pub fn slice(&self, range: impl RangeBounds<usize>) -> Self {
        let start = match range.start_bound() {
            Bound::Included(&s) => s,
            Bound::Excluded(&s) => s.saturating_add(1),
            Bound::Unbounded => 0,
        };
        let end = match range.end_bound() {
            Bound::Included(&e) => Some(e.saturating_add(1)),
            Bound::Excluded(&e) => Some(e),
            Bound::Unbounded => None,
        };
        let remaining = self.window.limit.map(|limit| limit.saturating_sub(start));
        let requested = end.map(|end| end.saturating_sub(start));
        let limit = match (requested, remaining) {
            (Some(r), Some(rem)) => Some(r.min(rem)),
            (Some(r), None) => Some(r),
            (None, rem) => rem,
        };
        let mut next = self.clone();
        next.window = Window {
            offset: self.window.offset.saturating_add(start),
            limit,
        };
        next
    }

    /// Flattens a one-to-many field into one virtual row per element during
    /// projection. No effect on what is fetched. Only one field is exploded
    /// per query; a later call replaces the earlier path.
    pub fn explode(&self, path: impl Into<FieldPath>) -> Self {
        let mut next = self.clone();
        next.explode = Some(path.into());
        next
    }

    /// Opens a lazy cursor over this query.
    pub fn cursor(&self, registry: &Registry) -> Result<ResultCursor> {
        registry.cursor(self)
    }

    /// The single matching record; `NotFound` or `TooManyResults` otherwise.
    pub fn get(&self, registry: &Registry) -> Result<Record> {
        registry.get(self)
    }

    /// First matching record, fetching at most one page.
    pub fn first(&self, registry: &Registry) -> Result<Option<Record>> {
        let mut cursor = self.slice(..1).cursor(registry)?;
        Ok(cursor.get(0)?.cloned())
    }

    /// Every record path the query mentions, for validation.
    pub(crate) fn referenced_paths(&self) -> impl Iterator<Item = &FieldPath> {
        self.filters
            .iter()
            .filter_map(Filter::path)
            .chain(self.order_by.iter().map(|k| &k.path))
            .chain(self.explode.iter())
    }

    /// Rewrites primary-key filters to `key_path`.
    pub(crate) fn with_primary_key(&self, key_path: &FieldPath) -> Self {
        let mut next = self.clone();
        for filter in &mut next.filters {
            if filter.field == FilterField::PrimaryKey {
                filter.field = FilterField::Path(key_path.clone());
            }
        }
        next
    }
}
