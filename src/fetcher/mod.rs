#![forbid(unsafe_code)]

//! Page fetcher protocol: one network round trip for one window of results.
//!
//! The cursor is the only caller. It decides offsets and page sizes; a fetcher
//! translates the query into its source's request shape and hands back raw
//! JSON fragments. Fetchers never retry on the cursor's behalf.

/// JSON-over-HTTP fetcher.
pub mod http;
/// In-process fetcher over a fixed fragment list.
pub mod memory;

use crate::error::Result;
use crate::query::Query;
use crate::schema::Schema;

pub use http::{HttpFetcherOptions, JsonHttpFetcher};
pub use memory::{FetchCall, InMemoryFetcher};

/// Arguments of one page fetch.
#[derive(Clone, Copy, Debug)]
pub struct PageRequest<'a> {
    /// Source being queried.
    pub source_id: &'a str,
    /// Query with primary-key filters already resolved to paths.
    pub query: &'a Query,
    /// Schema of the source, for translating record paths to raw paths.
    pub schema: &'a Schema,
    /// Absolute offset into the remote ordering.
    pub offset: usize,
    /// Number of fragments requested.
    pub page_size: usize,
}

/// Raw result of one page fetch.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Page {
    /// Raw fragments, one per record, in remote order.
    pub fragments: Vec<serde_json::Value>,
    /// Total number of matches when the source reports it.
    pub total: Option<usize>,
}

/// Performs paginated fetches against one remote collection.
///
/// Implementations fail with `SourceUnavailable` for transport problems and
/// `SourceProtocol` for responses they cannot interpret.
pub trait PageFetcher: Send + Sync {
    /// Fetches one page.
    fn fetch(&self, request: &PageRequest<'_>) -> Result<Page>;
}
