//! Lazy, cacheable, chainable queries over paginated remote patent-data
//! services.
//!
//! Build an immutable [`Query`] against a source registered in a
//! [`Registry`], open a [`ResultCursor`] to pull pages on demand, and read
//! typed [`Record`]s whose related fields resolve lazily into further
//! queries or records.

#![warn(missing_docs)]

/// TOML catalog loading.
pub mod config;
/// Lazy pagination over one query.
pub mod cursor;
/// Error taxonomy.
pub mod error;
/// Page fetcher protocol and implementations.
pub mod fetcher;
/// Tracing subscriber setup.
pub mod logging;
/// Record and raw field paths.
pub mod path;
/// Opt-in fetch and decode counters.
pub mod profile;
/// Rows, tables and sets.
pub mod projection;
/// Query values.
pub mod query;
/// Materialized records.
pub mod record;
/// Source catalog.
pub mod registry;
/// Related-field declarations.
pub mod relation;
/// Schemas and coercions.
pub mod schema;
/// Record values.
pub mod value;

pub use config::{ConfigError, RegistryConfig};
pub use cursor::ResultCursor;
pub use error::{QueryError, Result};
pub use fetcher::{InMemoryFetcher, JsonHttpFetcher, Page, PageFetcher, PageRequest};
pub use path::FieldPath;
pub use projection::{Row, Table};
pub use query::{Operator, Query};
pub use record::Record;
pub use registry::{Registry, SourceDef};
pub use relation::{Cardinality, Nullability, Related, RelatedField};
pub use schema::{Coercion, Schema};
pub use value::Value;
