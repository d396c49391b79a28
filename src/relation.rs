#![forbid(unsafe_code)]

//! Related-field descriptors and their resolver.
//!
//! Each source declares a table of [`RelatedField`]s keyed by name. A record
//! resolves an entry on first access through [`RelatedField::resolve`]; the
//! outcome is memoized in the record itself (see [`Record::related`]).

use std::fmt;
use std::sync::Arc;

use tracing::debug;

use crate::error::{QueryError, Result};
use crate::path::FieldPath;
use crate::profile::{profile_timer, record_profile_timer, QueryProfileKind};
use crate::query::{FilterField, Operator, Query};
use crate::record::Record;
use crate::registry::Registry;
use crate::value::Value;

/// How many target records a relation yields.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Cardinality {
    /// Exactly one record (or none, when nullable).
    One,
    /// A lazy query over any number of records.
    Many,
}

/// Whether a cardinality-one relation may resolve to nothing.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Nullability {
    /// Missing local key or zero matches resolve to `None`.
    Nullable,
    /// Missing local key or zero matches is a resolution error.
    Required,
}

/// Builds the target query for one record; `Ok(None)` means "no target".
pub type QueryBuilderFn = dyn Fn(&Record) -> Result<Option<Query>> + Send + Sync;

/// How the target query is derived from the owning record.
#[derive(Clone)]
pub enum RelationTarget {
    /// Filter the target source on `remote` (its primary key when `None`)
    /// equal to the value at `local`. A list at `local` becomes an `in` filter.
    Lookup {
        /// Path on the owning record.
        local: FieldPath,
        /// Path on the target schema.
        remote: Option<FieldPath>,
    },
    /// Arbitrary query construction.
    Build(Arc<QueryBuilderFn>),
}

impl fmt::Debug for RelationTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RelationTarget::Lookup { local, remote } => f
                .debug_struct("Lookup")
                .field("local", local)
                .field("remote", remote)
                .finish(),
            RelationTarget::Build(_) => f.write_str("Build(..)"),
        }
    }
}

/// Outcome of resolving a related field.
#[derive(Clone, Debug)]
pub enum Related {
    /// Cardinality one.
    One(Option<Record>),
    /// Cardinality many; not fetched until the caller drives a cursor.
    Many(Query),
}

/// Declared link from records of one source to another source.
#[derive(Clone, Debug)]
pub struct RelatedField {
    name: String,
    cardinality: Cardinality,
    nullability: Nullability,
    target_source: String,
    target: RelationTarget,
}

impl RelatedField {
    /// Declares a cardinality-one relation. Nullability is always explicit.
    pub fn one(
        name: impl Into<String>,
        target_source: impl Into<String>,
        nullability: Nullability,
        target: RelationTarget,
    ) -> Self {
        Self {
            name: name.into(),
            cardinality: Cardinality::One,
            nullability,
            target_source: target_source.into(),
            target,
        }
    }

    /// Declares a cardinality-many relation.
    pub fn many(
        name: impl Into<String>,
        target_source: impl Into<String>,
        target: RelationTarget,
    ) -> Self {
        Self {
            name: name.into(),
            cardinality: Cardinality::Many,
            nullability: Nullability::Nullable,
            target_source: target_source.into(),
            target,
        }
    }

    /// Lookup target keyed on the target source's primary key.
    pub fn by_key(local: impl Into<FieldPath>) -> RelationTarget {
        RelationTarget::Lookup {
            local: local.into(),
            remote: None,
        }
    }

    /// Lookup target keyed on an arbitrary target field.
    pub fn by_field(local: impl Into<FieldPath>, remote: impl Into<FieldPath>) -> RelationTarget {
        RelationTarget::Lookup {
            local: local.into(),
            remote: Some(remote.into()),
        }
    }

    /// Target built by a closure.
    pub fn build<F>(builder: F) -> RelationTarget
    where
        F: Fn(&Record) -> Result<Option<Query>> + Send + Sync + 'static,
    {
        RelationTarget::Build(Arc::new(builder))
    }

    /// Relation name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Declared cardinality.
    pub fn cardinality(&self) -> Cardinality {
        self.cardinality
    }

    /// Declared nullability.
    pub fn nullability(&self) -> Nullability {
        self.nullability
    }

    /// Identifier of the target source.
    pub fn target_source(&self) -> &str {
        &self.target_source
    }

    /// Query derivation rule.
    pub fn target(&self) -> &RelationTarget {
        &self.target
    }

    /// Resolves the relation for `record`. Errors are tagged with the
    /// relation name and the record identifier.
    pub(crate) fn resolve(&self, record: &Record, registry: &Registry) -> Result<Related> {
        debug!(
            relation = %self.name,
            record_id = %record.id(),
            target = %self.target_source,
            "relation.resolve.start"
        );
        let timer = profile_timer();
        let outcome = self.resolve_inner(record, registry);
        record_profile_timer(QueryProfileKind::Relation, timer);
        if outcome.is_ok() {
            debug!(relation = %self.name, "relation.resolve.done");
        }
        outcome.map_err(|err| QueryError::relation(&self.name, record.id(), err))
    }

    fn resolve_inner(&self, record: &Record, registry: &Registry) -> Result<Related> {
        let query = self.target_query(record)?;
        match self.cardinality {
            Cardinality::Many => {
                let query = query.unwrap_or_else(|| Query::new(&self.target_source).limit(0));
                registry.prepare(&query)?;
                Ok(Related::Many(query))
            }
            Cardinality::One => {
                let Some(query) = query else {
                    return match self.nullability {
                        Nullability::Nullable => Ok(Related::One(None)),
                        Nullability::Required => Err(QueryError::NotFound {
                            source_id: self.target_source.clone(),
                        }),
                    };
                };
                match registry.get(&query) {
                    Ok(found) => Ok(Related::One(Some(found))),
                    Err(QueryError::NotFound { .. })
                        if self.nullability == Nullability::Nullable =>
                    {
                        Ok(Related::One(None))
                    }
                    Err(err) => Err(err),
                }
            }
        }
    }

    fn target_query(&self, record: &Record) -> Result<Option<Query>> {
        match &self.target {
            RelationTarget::Lookup { local, remote } => {
                let field = match remote {
                    Some(path) => FilterField::Path(path.clone()),
                    None => FilterField::PrimaryKey,
                };
                let value = record.get_path(local).cloned().unwrap_or(Value::Null);
                let query = Query::new(&self.target_source);
                match value {
                    Value::Null => Ok(None),
                    Value::List(items) => {
                        let items: Vec<Value> = items.into_iter().filter(|v| !v.is_null()).collect();
                        if items.is_empty() {
                            return Ok(None);
                        }
                        if self.cardinality == Cardinality::One && items.len() > 1 {
                            return Err(QueryError::InvalidQuery(format!(
                                "relation '{}' is cardinality one but '{}' holds {} keys",
                                self.name,
                                local,
                                items.len()
                            )));
                        }
                        Ok(Some(query.filter_on(field, Operator::In, Value::List(items))))
                    }
                    scalar => Ok(Some(query.filter_on(field, Operator::Eq, scalar))),
                }
            }
            RelationTarget::Build(builder) => {
                let query = builder(record)?;
                if let Some(query) = &query {
                    if query.source_id() != self.target_source {
                        return Err(QueryError::InvalidQuery(format!(
                            "relation '{}' built a query against '{}', declared target is '{}'",
                            self.name,
                            query.source_id(),
                            self.target_source
                        )));
                    }
                }
                Ok(query)
            }
        }
    }
}
