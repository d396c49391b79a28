#![forbid(unsafe_code)]
#![allow(missing_docs)]

use std::fmt;

use thiserror::Error;
use tracing::warn;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, QueryError>;

/// Structured errors emitted by queries, cursors, schemas and relations.
///
/// Errors are `Clone` so a failed cursor or a memoized relation can hand the
/// same outcome back on every later access.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum QueryError {
    /// `get()` matched zero records.
    #[error("no {source_id} record matches the query")]
    NotFound { source_id: String },
    /// `get()` matched more than one record.
    #[error("query against {source_id} matched {} records, expected exactly one", matched_display(.matched))]
    TooManyResults {
        source_id: String,
        /// Total reported by the source when it sent one.
        matched: Option<usize>,
    },
    /// A raw fragment could not be materialized into a record.
    #[error("schema {schema}: field '{path}' {reason} (raw value: {raw})")]
    Schema {
        schema: String,
        path: String,
        raw: serde_json::Value,
        reason: String,
    },
    /// The remote service could not be reached or refused to serve.
    #[error("source {source_id} unavailable: {message}")]
    SourceUnavailable { source_id: String, message: String },
    /// The remote service answered with something the fetcher cannot read.
    #[error("source {source_id} protocol error: {message}")]
    SourceProtocol { source_id: String, message: String },
    /// Resolving a related field failed.
    #[error("relation '{relation}' of record {record_id} failed: {source}")]
    RelationResolution {
        relation: String,
        record_id: String,
        source: Box<QueryError>,
    },
    /// A draining operation observed its cancellation flag.
    #[error("operation cancelled")]
    Cancelled,
    /// No source is registered under this identifier.
    #[error("unknown source '{0}'")]
    UnknownSource(String),
    /// Field path is not declared by the source schema.
    #[error("unknown field '{field}' on {schema}")]
    UnknownField { schema: String, field: String },
    /// Relation name is not declared for the source.
    #[error("unknown relation '{relation}' on {source_id}")]
    UnknownRelation { source_id: String, relation: String },
    /// Query components are inconsistent.
    #[error("invalid query: {0}")]
    InvalidQuery(String),
    /// Schema or relation declaration is inconsistent.
    #[error("invalid schema: {0}")]
    InvalidSchema(String),
    /// Projection is not usable by the requested terminal operation.
    #[error("invalid projection: {0}")]
    InvalidProjection(&'static str),
}

fn matched_display(matched: &Option<usize>) -> MatchedCount {
    MatchedCount(*matched)
}

struct MatchedCount(Option<usize>);

impl fmt::Display for MatchedCount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            Some(count) => write!(f, "{count}"),
            None => write!(f, "multiple"),
        }
    }
}

impl QueryError {
    /// Builds a [`QueryError::Schema`] for the offending field.
    pub fn schema(
        schema: impl Into<String>,
        path: impl Into<String>,
        raw: &serde_json::Value,
        reason: impl Into<String>,
    ) -> Self {
        QueryError::Schema {
            schema: schema.into(),
            path: path.into(),
            raw: raw.clone(),
            reason: reason.into(),
        }
    }

    /// Builds a [`QueryError::SourceUnavailable`].
    pub fn unavailable(source_id: impl Into<String>, message: impl fmt::Display) -> Self {
        QueryError::SourceUnavailable {
            source_id: source_id.into(),
            message: message.to_string(),
        }
    }

    /// Builds a [`QueryError::SourceProtocol`].
    pub fn protocol(source_id: impl Into<String>, message: impl fmt::Display) -> Self {
        QueryError::SourceProtocol {
            source_id: source_id.into(),
            message: message.to_string(),
        }
    }

    /// Wraps an error raised while resolving `relation` on the record `record_id`.
    pub fn relation(relation: &str, record_id: impl Into<String>, source: QueryError) -> Self {
        let record_id = record_id.into();
        warn!(relation, record_id = %record_id, err = %source, "relation.resolve.failed");
        QueryError::RelationResolution {
            relation: relation.to_owned(),
            record_id,
            source: Box::new(source),
        }
    }

    /// Returns a machine-readable code for the error variant.
    pub fn code(&self) -> &'static str {
        match self {
            QueryError::NotFound { .. } => "NotFound",
            QueryError::TooManyResults { .. } => "TooManyResults",
            QueryError::Schema { .. } => "SchemaError",
            QueryError::SourceUnavailable { .. } => "SourceUnavailable",
            QueryError::SourceProtocol { .. } => "SourceProtocolError",
            QueryError::RelationResolution { .. } => "RelationResolutionError",
            QueryError::Cancelled => "Cancelled",
            QueryError::UnknownSource(_) => "UnknownSource",
            QueryError::UnknownField { .. } => "UnknownField",
            QueryError::UnknownRelation { .. } => "UnknownRelation",
            QueryError::InvalidQuery(_) => "InvalidQuery",
            QueryError::InvalidSchema(_) => "InvalidSchema",
            QueryError::InvalidProjection(_) => "InvalidProjection",
        }
    }

    /// True for failures raised by a page fetcher.
    pub fn is_source_failure(&self) -> bool {
        matches!(
            self,
            QueryError::SourceUnavailable { .. } | QueryError::SourceProtocol { .. }
        )
    }
}

/// Convenience wrapper that formats errors with their codes.
pub struct QueryErrorWithCode<'a>(pub &'a QueryError);

impl fmt::Display for QueryErrorWithCode<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.0.code(), self.0)
    }
}
