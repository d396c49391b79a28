#![forbid(unsafe_code)]

//! Source registry: the read-only catalog every query is resolved against.
//!
//! A [`SourceDef`] binds a source identifier to its schema, primary key,
//! related-field table, page fetcher and page size. The [`Registry`] is built
//! once, validates cross-source references up front and is shared by cheap
//! clones afterwards.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use tracing::debug;

use crate::cursor::ResultCursor;
use crate::error::{QueryError, Result};
use crate::fetcher::PageFetcher;
use crate::path::FieldPath;
use crate::query::Query;
use crate::record::Record;
use crate::relation::{RelatedField, RelationTarget};
use crate::schema::Schema;
use crate::value::Value;

/// Page size used when a source does not declare one.
pub const DEFAULT_PAGE_SIZE: usize = 100;

/// Everything the engine knows about one remote collection.
pub struct SourceDef {
    id: String,
    schema: Arc<Schema>,
    primary_key: FieldPath,
    relations: Vec<RelatedField>,
    fetcher: Arc<dyn PageFetcher>,
    page_size: usize,
}

impl SourceDef {
    /// Declares a source with the default page size and no relations.
    pub fn new(
        id: impl Into<String>,
        schema: Arc<Schema>,
        primary_key: impl Into<FieldPath>,
        fetcher: Arc<dyn PageFetcher>,
    ) -> Self {
        Self {
            id: id.into(),
            schema,
            primary_key: primary_key.into(),
            relations: Vec::new(),
            fetcher,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }

    /// Overrides the page size.
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size;
        self
    }

    /// Adds a related field.
    pub fn with_relation(mut self, relation: RelatedField) -> Self {
        self.relations.push(relation);
        self
    }

    /// Source identifier.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Schema applied to every fragment.
    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    /// Record path of the primary identifier.
    pub fn primary_key(&self) -> &FieldPath {
        &self.primary_key
    }

    /// Declared related fields.
    pub fn relations(&self) -> &[RelatedField] {
        &self.relations
    }

    /// Position of the named relation in [`SourceDef::relations`].
    pub fn relation_index(&self, name: &str) -> Option<usize> {
        self.relations.iter().position(|r| r.name() == name)
    }

    /// Page fetcher.
    pub fn fetcher(&self) -> &Arc<dyn PageFetcher> {
        &self.fetcher
    }

    /// Number of fragments requested per page.
    pub fn page_size(&self) -> usize {
        self.page_size
    }
}

impl fmt::Debug for SourceDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SourceDef")
            .field("id", &self.id)
            .field("schema", &self.schema.name())
            .field("primary_key", &self.primary_key)
            .field("relations", &self.relations)
            .field("page_size", &self.page_size)
            .finish_non_exhaustive()
    }
}

/// Shared, read-only catalog of sources.
#[derive(Clone)]
pub struct Registry {
    inner: Arc<RegistryInner>,
}

struct RegistryInner {
    sources: HashMap<String, Arc<SourceDef>>,
}

impl Registry {
    /// Starts an empty registry declaration.
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::default()
    }

    /// Looks up a source.
    pub fn source(&self, id: &str) -> Result<&Arc<SourceDef>> {
        self.inner
            .sources
            .get(id)
            .ok_or_else(|| QueryError::UnknownSource(id.to_owned()))
    }

    /// Registered source identifiers, sorted.
    pub fn source_ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.inner.sources.keys().map(String::as_str).collect();
        ids.sort_unstable();
        ids
    }

    /// Unfiltered query over a registered source.
    pub fn query(&self, id: &str) -> Result<Query> {
        self.source(id)?;
        Ok(Query::new(id))
    }

    /// Resolves the query's source, rewrites primary-key filters and checks
    /// every referenced path against the schema.
    pub fn prepare(&self, query: &Query) -> Result<(Arc<SourceDef>, Query)> {
        let source = Arc::clone(self.source(query.source_id())?);
        let resolved = query.with_primary_key(source.primary_key());
        let schema = source.schema();
        for path in resolved.referenced_paths() {
            schema.check_path(path)?;
        }
        if let Some(projection) = resolved.projection() {
            for path in projection.paths() {
                schema.check_path(path)?;
            }
        }
        Ok((source, resolved))
    }

    /// Opens a lazy cursor. Nothing is fetched until the cursor is read.
    pub fn cursor(&self, query: &Query) -> Result<ResultCursor> {
        let (source, resolved) = self.prepare(query)?;
        Ok(ResultCursor::new(query.clone(), resolved, source, self.clone()))
    }

    /// Exactly one matching record.
    ///
    /// Fetches at most the first two matches; a second match is
    /// `TooManyResults` carrying the source's match count when it reports one.
    pub fn get(&self, query: &Query) -> Result<Record> {
        let mut cursor = self.cursor(&query.slice(..2))?;
        let first = cursor.get(0)?.cloned();
        let Some(first) = first else {
            return Err(QueryError::NotFound {
                source_id: query.source_id().to_owned(),
            });
        };
        if cursor.get(1)?.is_some() {
            let window = query.window();
            let matched = cursor.total_hint().map(|total| {
                let after_offset = total.saturating_sub(window.offset);
                window.limit.map_or(after_offset, |limit| after_offset.min(limit))
            });
            debug!(source = query.source_id(), ?matched, "registry.get.ambiguous");
            return Err(QueryError::TooManyResults {
                source_id: query.source_id().to_owned(),
                matched,
            });
        }
        Ok(first)
    }

    /// `query(source).key(key).get()`.
    pub fn lookup(&self, source: &str, key: impl Into<Value>) -> Result<Record> {
        self.query(source)?.key(key).get(self)
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("sources", &self.source_ids())
            .finish()
    }
}

/// Collects source declarations; [`RegistryBuilder::build`] validates them.
#[derive(Default)]
pub struct RegistryBuilder {
    sources: Vec<SourceDef>,
}

impl RegistryBuilder {
    /// Adds a source.
    pub fn source(mut self, source: SourceDef) -> Self {
        self.sources.push(source);
        self
    }

    /// Validates identifiers, primary keys and relation targets.
    pub fn build(self) -> Result<Registry> {
        let mut sources: HashMap<String, Arc<SourceDef>> = HashMap::new();
        for source in self.sources {
            if source.page_size == 0 {
                return Err(QueryError::InvalidSchema(format!(
                    "source {} has a zero page size",
                    source.id
                )));
            }
            if !source.schema.has_path(&source.primary_key) {
                return Err(QueryError::InvalidSchema(format!(
                    "primary key '{}' of source {} is not a field of schema {}",
                    source.primary_key,
                    source.id,
                    source.schema.name()
                )));
            }
            for (idx, relation) in source.relations.iter().enumerate() {
                if source.relation_index(relation.name()) != Some(idx) {
                    return Err(QueryError::InvalidSchema(format!(
                        "source {} declares relation '{}' twice",
                        source.id,
                        relation.name()
                    )));
                }
            }
            let id = source.id.clone();
            if sources.insert(id.clone(), Arc::new(source)).is_some() {
                return Err(QueryError::InvalidSchema(format!(
                    "source {id} is declared twice"
                )));
            }
        }
        for source in sources.values() {
            for relation in source.relations() {
                validate_relation(&sources, source, relation)?;
            }
        }
        debug!(sources = sources.len(), "registry.build.done");
        Ok(Registry {
            inner: Arc::new(RegistryInner { sources }),
        })
    }
}

fn validate_relation(
    sources: &HashMap<String, Arc<SourceDef>>,
    owner: &SourceDef,
    relation: &RelatedField,
) -> Result<()> {
    let target = sources.get(relation.target_source()).ok_or_else(|| {
        QueryError::InvalidSchema(format!(
            "relation '{}' of source {} targets unknown source {}",
            relation.name(),
            owner.id,
            relation.target_source()
        ))
    })?;
    if let RelationTarget::Lookup { local, remote } = relation.target() {
        if !owner.schema.has_path(local) {
            return Err(QueryError::InvalidSchema(format!(
                "relation '{}' of source {} reads undeclared field '{local}'",
                relation.name(),
                owner.id
            )));
        }
        let remote = remote.as_ref().unwrap_or(&target.primary_key);
        if !target.schema.has_path(remote) {
            return Err(QueryError::InvalidSchema(format!(
                "relation '{}' of source {} matches undeclared field '{remote}' of {}",
                relation.name(),
                owner.id,
                target.id
            )));
        }
    }
    Ok(())
}
