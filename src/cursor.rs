#![forbid(unsafe_code)]

//! Lazy, page-at-a-time evaluation of a [`Query`].
//!
//! A [`ResultCursor`] owns an append-only cache of decoded records that is
//! always a prefix of the remote ordering. Reads are served from the cache;
//! a read past its end fetches exactly as many further pages as it needs.
//! Once the source signals the end (short page, reported total, or the
//! query's own limit) nothing is fetched again.
//!
//! A failed fetch or decode is remembered. Every later read that would need
//! another page returns the same error without touching the fetcher; records
//! cached before the failure stay readable.

use std::ops::RangeBounds;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::error::{QueryError, Result};
use crate::fetcher::PageRequest;
use crate::profile::{profile_timer, record_fragments, record_profile_timer, QueryProfileKind};
use crate::projection::{self, Row, Table};
use crate::query::Query;
use crate::record::{Record, RecordContext};
use crate::registry::{Registry, SourceDef};
use crate::value::Value;

/// Stateful iterator over the results of one query.
pub struct ResultCursor {
    query: Query,
    request: Query,
    source: Arc<SourceDef>,
    registry: Registry,
    cache: Vec<Record>,
    exhausted: bool,
    total_hint: Option<usize>,
    failure: Option<QueryError>,
    fetches: usize,
}

impl ResultCursor {
    /// `query` is what the caller asked for; `request` is the same query with
    /// primary-key filters resolved, as sent to the fetcher.
    pub(crate) fn new(query: Query, request: Query, source: Arc<SourceDef>, registry: Registry) -> Self {
        let exhausted = request.window().limit == Some(0);
        Self {
            query,
            request,
            source,
            registry,
            cache: Vec::new(),
            exhausted,
            total_hint: None,
            failure: None,
            fetches: 0,
        }
    }

    /// The query this cursor evaluates.
    pub fn query(&self) -> &Query {
        &self.query
    }

    /// Records fetched so far, in remote order.
    pub fn cached(&self) -> &[Record] {
        &self.cache
    }

    /// True once the source has signalled the end of the results.
    pub fn is_exhausted(&self) -> bool {
        self.exhausted
    }

    /// Total match count reported by the most recent page that carried one.
    pub fn total_hint(&self) -> Option<usize> {
        self.total_hint
    }

    /// The stored failure, if a fetch or decode has failed.
    pub fn failure(&self) -> Option<&QueryError> {
        self.failure.as_ref()
    }

    /// Number of pages requested from the fetcher by this cursor.
    pub fn fetch_count(&self) -> usize {
        self.fetches
    }

    /// Record at position `i` of the query window, fetching pages as needed.
    /// `Ok(None)` past the end.
    pub fn get(&mut self, i: usize) -> Result<Option<&Record>> {
        while self.cache.len() <= i {
            if !self.fetch_next()? {
                return Ok(None);
            }
        }
        Ok(self.cache.get(i))
    }

    /// New query over a sub-window of this cursor's query. Nothing is fetched.
    pub fn slice(&self, range: impl RangeBounds<usize>) -> Query {
        self.query.slice(range)
    }

    /// Iterates every record, fetching lazily. Re-iterating replays the cache.
    /// The iterator yields an error at most once and then stops.
    pub fn iter(&mut self) -> CursorIter<'_> {
        CursorIter {
            cursor: self,
            pos: 0,
            done: false,
        }
    }

    /// Fetches every remaining page. `cancel` is checked before each fetch;
    /// on cancellation the partial cache is kept.
    pub fn drain(&mut self, cancel: Option<&AtomicBool>) -> Result<&[Record]> {
        while !self.exhausted || self.failure.is_some() {
            if self.failure.is_none() && is_cancelled(cancel) {
                info!(
                    source = self.source.id(),
                    cached = self.cache.len(),
                    "cursor.drain.cancelled"
                );
                return Err(QueryError::Cancelled);
            }
            self.fetch_next()?;
        }
        Ok(&self.cache)
    }

    /// Drains and returns rows after `explode` and `values` projection.
    pub fn rows(&mut self, cancel: Option<&AtomicBool>) -> Result<Vec<Row>> {
        self.drain(cancel)?;
        Ok(projection::rows(
            &self.cache,
            self.query.projection(),
            self.query.exploded(),
        ))
    }

    /// Drains and flattens the rows into a table, expanding nested records
    /// and sequences down to `depth` levels.
    pub fn to_table(&mut self, depth: usize, cancel: Option<&AtomicBool>) -> Result<Table> {
        let rows = self.rows(cancel)?;
        let timer = profile_timer();
        let table = Table::from_rows(&rows, depth);
        record_profile_timer(QueryProfileKind::Table, timer);
        debug!(
            source = self.source.id(),
            rows = table.len(),
            columns = table.columns().len(),
            "cursor.to_table.done"
        );
        Ok(table)
    }

    /// Drains and returns the distinct values of the single projected field,
    /// in first-seen order.
    pub fn to_set(&mut self, cancel: Option<&AtomicBool>) -> Result<Vec<Value>> {
        let Some(path) = self.query.projection().and_then(|p| p.single()).cloned() else {
            return Err(QueryError::InvalidProjection(
                "to_set requires exactly one projected field",
            ));
        };
        let rows = self.rows(cancel)?;
        Ok(projection::distinct(&rows, &path.column_name()))
    }

    /// Fetches and decodes the next page. `Ok(false)` when nothing was
    /// appended because the results are exhausted.
    fn fetch_next(&mut self) -> Result<bool> {
        if let Some(err) = &self.failure {
            return Err(err.clone());
        }
        if self.exhausted {
            return Ok(false);
        }
        let window = self.request.window();
        let remaining = window.limit.map(|limit| limit.saturating_sub(self.cache.len()));
        let page_size = match remaining {
            Some(remaining) => remaining.min(self.source.page_size()),
            None => self.source.page_size(),
        };
        if page_size == 0 {
            self.exhausted = true;
            return Ok(false);
        }
        let offset = window.offset + self.cache.len();
        debug!(
            source = self.source.id(),
            offset,
            page_size,
            "cursor.fetch_page.start"
        );

        let timer = profile_timer();
        let fetched = self.source.fetcher().fetch(&PageRequest {
            source_id: self.source.id(),
            query: &self.request,
            schema: self.source.schema(),
            offset,
            page_size,
        });
        record_profile_timer(QueryProfileKind::Fetch, timer);
        self.fetches += 1;
        let mut page = match fetched {
            Ok(page) => page,
            Err(err) => return Err(self.fail(err)),
        };
        record_fragments(page.fragments.len());
        if page.fragments.len() > page_size {
            warn!(
                source = self.source.id(),
                requested = page_size,
                returned = page.fragments.len(),
                "cursor.fetch_page.oversized"
            );
            page.fragments.truncate(page_size);
        }

        let timer = profile_timer();
        let context = RecordContext {
            registry: self.registry.clone(),
            source: Arc::clone(&self.source),
        };
        let schema = self.source.schema();
        let decoded = page
            .fragments
            .iter()
            .map(|raw| schema.materialize_with(raw, context.clone()))
            .collect::<Result<Vec<_>>>();
        record_profile_timer(QueryProfileKind::Decode, timer);
        let records = match decoded {
            Ok(records) => records,
            Err(err) => return Err(self.fail(err)),
        };

        let returned = records.len();
        self.cache.extend(records);
        if page.total.is_some() {
            self.total_hint = page.total;
        }
        let short_page = returned < page_size;
        let total_reached = self
            .total_hint
            .is_some_and(|total| offset + returned >= total);
        let limit_reached = window
            .limit
            .is_some_and(|limit| self.cache.len() >= limit);
        self.exhausted = short_page || total_reached || limit_reached;
        debug!(
            source = self.source.id(),
            offset,
            returned,
            cached = self.cache.len(),
            total = ?self.total_hint,
            exhausted = self.exhausted,
            "cursor.fetch_page.done"
        );
        Ok(returned > 0)
    }

    fn fail(&mut self, err: QueryError) -> QueryError {
        warn!(
            source = self.source.id(),
            cached = self.cache.len(),
            code = err.code(),
            err = %err,
            "cursor.fetch_page.failed"
        );
        self.failure = Some(err.clone());
        err
    }
}

impl std::fmt::Debug for ResultCursor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResultCursor")
            .field("query", &self.query)
            .field("cached", &self.cache.len())
            .field("exhausted", &self.exhausted)
            .field("total_hint", &self.total_hint)
            .field("failure", &self.failure)
            .finish()
    }
}

fn is_cancelled(cancel: Option<&AtomicBool>) -> bool {
    cancel.is_some_and(|flag| flag.load(Ordering::SeqCst))
}

/// Borrowing iterator returned by [`ResultCursor::iter`].
pub struct CursorIter<'a> {
    cursor: &'a mut ResultCursor,
    pos: usize,
    done: bool,
}

impl Iterator for CursorIter<'_> {
    type Item = Result<Record>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.cursor.get(self.pos) {
            Ok(Some(record)) => {
                self.pos += 1;
                Some(Ok(record.clone()))
            }
            Ok(None) => {
                self.done = true;
                None
            }
            Err(err) => {
                self.done = true;
                Some(Err(err))
            }
        }
    }
}
