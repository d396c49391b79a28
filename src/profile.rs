use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::OnceLock;
use std::time::Instant;

/// A snapshot of query profiling metrics.
///
/// Profiling is enabled by setting the `PATENT_QUERY_PROFILE` environment
/// variable before the first query runs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueryProfileSnapshot {
    /// Total nanoseconds spent inside page fetchers.
    pub fetch_ns: u64,
    /// Number of page fetches.
    pub fetch_count: u64,
    /// Number of raw fragments returned by fetchers.
    pub fragment_count: u64,
    /// Total nanoseconds spent materializing pages into records.
    pub decode_ns: u64,
    /// Number of pages materialized.
    pub decode_count: u64,
    /// Total nanoseconds spent resolving related fields.
    pub relation_ns: u64,
    /// Number of related-field resolutions.
    pub relation_count: u64,
    /// Total nanoseconds spent building tables.
    pub table_ns: u64,
    /// Number of tables built.
    pub table_count: u64,
}

#[derive(Default)]
struct QueryProfileCounters {
    fetch_ns: AtomicU64,
    fetch_count: AtomicU64,
    fragment_count: AtomicU64,
    decode_ns: AtomicU64,
    decode_count: AtomicU64,
    relation_ns: AtomicU64,
    relation_count: AtomicU64,
    table_ns: AtomicU64,
    table_count: AtomicU64,
}

static PROFILE_ENABLED: OnceLock<bool> = OnceLock::new();
static PROFILE_COUNTERS: OnceLock<QueryProfileCounters> = OnceLock::new();

fn profiling_enabled() -> bool {
    *PROFILE_ENABLED.get_or_init(|| std::env::var_os("PATENT_QUERY_PROFILE").is_some())
}

fn counters() -> Option<&'static QueryProfileCounters> {
    profiling_enabled().then(|| PROFILE_COUNTERS.get_or_init(QueryProfileCounters::default))
}

pub(crate) fn profile_timer() -> Option<Instant> {
    profiling_enabled().then(Instant::now)
}

pub(crate) enum QueryProfileKind {
    /// One page fetch.
    Fetch,
    /// Materializing one page.
    Decode,
    /// One related-field resolution.
    Relation,
    /// One table projection.
    Table,
}

pub(crate) fn record_profile_timer(kind: QueryProfileKind, start: Option<Instant>) {
    let Some(start) = start else {
        return;
    };
    let Some(counters) = counters() else {
        return;
    };
    let nanos = start.elapsed().as_nanos().min(u64::MAX as u128) as u64;
    let (ns, count) = match kind {
        QueryProfileKind::Fetch => (&counters.fetch_ns, &counters.fetch_count),
        QueryProfileKind::Decode => (&counters.decode_ns, &counters.decode_count),
        QueryProfileKind::Relation => (&counters.relation_ns, &counters.relation_count),
        QueryProfileKind::Table => (&counters.table_ns, &counters.table_count),
    };
    ns.fetch_add(nanos, Ordering::Relaxed);
    count.fetch_add(1, Ordering::Relaxed);
}

pub(crate) fn record_fragments(count: usize) {
    if let Some(counters) = counters() {
        counters
            .fragment_count
            .fetch_add(count as u64, Ordering::Relaxed);
    }
}

/// Retrieves a snapshot of the profiling counters, resetting them when
/// `reset` is true. Returns `None` unless `PATENT_QUERY_PROFILE` is set.
///
/// ```no_run
/// use patent_query::profile::profile_snapshot;
///
/// if let Some(snapshot) = profile_snapshot(false) {
///     println!("{} pages fetched in {}ns", snapshot.fetch_count, snapshot.fetch_ns);
/// }
/// ```
pub fn profile_snapshot(reset: bool) -> Option<QueryProfileSnapshot> {
    let counters = counters()?;
    let load = |counter: &AtomicU64| {
        if reset {
            counter.swap(0, Ordering::Relaxed)
        } else {
            counter.load(Ordering::Relaxed)
        }
    };
    Some(QueryProfileSnapshot {
        fetch_ns: load(&counters.fetch_ns),
        fetch_count: load(&counters.fetch_count),
        fragment_count: load(&counters.fragment_count),
        decode_ns: load(&counters.decode_ns),
        decode_count: load(&counters.decode_count),
        relation_ns: load(&counters.relation_ns),
        relation_count: load(&counters.relation_count),
        table_ns: load(&counters.table_ns),
        table_count: load(&counters.table_count),
    })
}
