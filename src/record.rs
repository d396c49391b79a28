//! Immutable typed records produced by schema materialization.

use std::fmt;
use std::sync::{Arc, OnceLock};

use crate::error::{QueryError, Result};
use crate::path::FieldPath;
use crate::query::Query;
use crate::registry::{Registry, SourceDef};
use crate::relation::Related;
use crate::schema::Schema;
use crate::value::Value;

/// Source context carried by top-level records so related fields can be
/// resolved lazily.
#[derive(Clone)]
pub(crate) struct RecordContext {
    pub registry: Registry,
    pub source: Arc<SourceDef>,
}

/// One materialized result row.
///
/// Cloning is cheap: clones share the field values and the per-relation
/// memo cells, so a related field resolved through one clone is resolved for
/// all of them.
#[derive(Clone)]
pub struct Record {
    inner: Arc<RecordInner>,
}

struct RecordInner {
    schema: Arc<Schema>,
    values: Vec<Value>,
    context: Option<RecordContext>,
    relations: Box<[OnceLock<Result<Related>>]>,
}

impl Record {
    pub(crate) fn from_parts(
        schema: Arc<Schema>,
        values: Vec<Value>,
        context: Option<RecordContext>,
    ) -> Self {
        debug_assert_eq!(values.len(), schema.fields().len());
        let relation_count = context
            .as_ref()
            .map(|ctx| ctx.source.relations().len())
            .unwrap_or(0);
        let relations = (0..relation_count).map(|_| OnceLock::new()).collect();
        Self {
            inner: Arc::new(RecordInner {
                schema,
                values,
                context,
                relations,
            }),
        }
    }

    /// Schema the record was materialized with.
    pub fn schema(&self) -> &Arc<Schema> {
        &self.inner.schema
    }

    /// Identifier of the originating source for top-level records.
    pub fn source_id(&self) -> Option<&str> {
        self.inner.context.as_ref().map(|ctx| ctx.source.id())
    }

    /// Field value by record name.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.inner
            .schema
            .index_of(name)
            .map(|idx| &self.inner.values[idx])
    }

    /// Field value by name, failing on undeclared names.
    pub fn value(&self, name: &str) -> Result<&Value> {
        self.get(name).ok_or_else(|| QueryError::UnknownField {
            schema: self.inner.schema.name().to_owned(),
            field: name.to_owned(),
        })
    }

    /// Follows a path through nested records and sequences.
    pub fn get_path(&self, path: &FieldPath) -> Option<&Value> {
        let head = path.head()?;
        let value = self.get(head)?;
        value.get_path(&path.tail())
    }

    /// Field names and values in schema order.
    pub fn fields(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.inner.schema.field_names().zip(self.inner.values.iter())
    }

    /// Field names in schema order.
    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.inner.schema.field_names()
    }

    /// Recursive conversion to a JSON object keyed by field name.
    pub fn as_dict(&self) -> serde_json::Map<String, serde_json::Value> {
        self.fields()
            .map(|(name, value)| (name.to_owned(), value.to_json()))
            .collect()
    }

    /// Primary identifier rendered as text, `<unkeyed>` for nested records.
    pub fn id(&self) -> String {
        self.inner
            .context
            .as_ref()
            .and_then(|ctx| self.get_path(ctx.source.primary_key()))
            .map(|value| value.to_string())
            .unwrap_or_else(|| "<unkeyed>".to_owned())
    }

    /// Resolves the named related field, memoizing the outcome.
    ///
    /// The first call performs whatever fetch the relation needs; later calls
    /// return the cached value or the cached error.
    pub fn related(&self, name: &str) -> Result<Related> {
        let (ctx, idx) = self.relation_slot(name)?;
        let relation = &ctx.source.relations()[idx];
        self.inner.relations[idx]
            .get_or_init(|| relation.resolve(self, &ctx.registry))
            .clone()
    }

    /// Resolves a cardinality-one related field.
    pub fn related_one(&self, name: &str) -> Result<Option<Record>> {
        match self.related(name)? {
            Related::One(record) => Ok(record),
            Related::Many(_) => Err(QueryError::InvalidQuery(format!(
                "relation '{name}' has cardinality many"
            ))),
        }
    }

    /// Resolves a cardinality-many related field to its lazy query.
    pub fn related_many(&self, name: &str) -> Result<Query> {
        match self.related(name)? {
            Related::Many(query) => Ok(query),
            Related::One(_) => Err(QueryError::InvalidQuery(format!(
                "relation '{name}' has cardinality one"
            ))),
        }
    }

    /// True once the named relation has been resolved (successfully or not).
    pub fn is_resolved(&self, name: &str) -> bool {
        self.relation_slot(name)
            .map(|(_, idx)| self.inner.relations[idx].get().is_some())
            .unwrap_or(false)
    }

    fn relation_slot(&self, name: &str) -> Result<(&RecordContext, usize)> {
        let unknown = || QueryError::UnknownRelation {
            source_id: self
                .source_id()
                .unwrap_or(self.inner.schema.name())
                .to_owned(),
            relation: name.to_owned(),
        };
        let ctx = self.inner.context.as_ref().ok_or_else(unknown)?;
        let idx = ctx.source.relation_index(name).ok_or_else(unknown)?;
        Ok((ctx, idx))
    }
}

impl PartialEq for Record {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
            || (self.inner.schema.name() == other.inner.schema.name()
                && self.inner.values == other.inner.values)
    }
}

impl fmt::Debug for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut map = f.debug_map();
        for (name, value) in self.fields() {
            map.entry(&name, value);
        }
        map.finish()
    }
}
