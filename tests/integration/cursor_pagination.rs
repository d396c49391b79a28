#![allow(missing_docs)]

use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use patent_query::fetcher::FetchCall;
use patent_query::schema::{Coercion, DateFormat};
use patent_query::{
    InMemoryFetcher, Operator, Query, QueryError, Registry, Result, Schema, SourceDef, Value,
};
use serde_json::json;

fn application_schema() -> Arc<Schema> {
    Schema::builder("application")
        .required("applId", Coercion::String)
        .field("filingDate", Coercion::Date(DateFormat::Iso))
        .field("examinerName", Coercion::String)
        .build()
        .expect("schema")
}

fn applications(count: usize) -> Vec<serde_json::Value> {
    (0..count)
        .map(|i| {
            json!({
                "applId": format!("16{i:06}"),
                "filingDate": format!("2020-01-{:02}", i % 28 + 1),
                "examinerName": if i % 2 == 0 { "SMITH" } else { "JONES" },
            })
        })
        .collect()
}

fn registry_with(fetcher: Arc<InMemoryFetcher>, page_size: usize) -> Registry {
    Registry::builder()
        .source(
            SourceDef::new("applications", application_schema(), "appl_id", fetcher)
                .with_page_size(page_size),
        )
        .build()
        .expect("registry")
}

fn ids(records: &[patent_query::Record]) -> Vec<String> {
    records.iter().map(|r| r.id()).collect()
}

#[test]
fn index_access_fetches_only_needed_pages() -> Result<()> {
    let fetcher = Arc::new(InMemoryFetcher::new(applications(25)));
    let registry = registry_with(fetcher.clone(), 10);
    let query = Query::new("applications").values_list("appl_id");
    let mut cursor = query.cursor(&registry)?;

    assert_eq!(fetcher.call_count(), 0, "cursor creation must not fetch");
    assert_eq!(cursor.get(5)?.map(|r| r.id()), Some("16000005".to_owned()));
    assert_eq!(fetcher.call_count(), 1);
    assert_eq!(cursor.get(15)?.map(|r| r.id()), Some("16000015".to_owned()));
    assert_eq!(fetcher.call_count(), 2);

    let set = cursor.to_set(None)?;
    assert_eq!(set.len(), 25);
    assert_eq!(
        fetcher.calls(),
        vec![
            FetchCall { offset: 0, page_size: 10 },
            FetchCall { offset: 10, page_size: 10 },
            FetchCall { offset: 20, page_size: 10 },
        ]
    );
    assert!(cursor.is_exhausted());
    assert_eq!(cursor.total_hint(), Some(25));
    Ok(())
}

#[test]
fn drained_cursor_replays_from_cache() -> Result<()> {
    let fetcher = Arc::new(InMemoryFetcher::new(applications(23)));
    let registry = registry_with(fetcher.clone(), 10);
    let mut cursor = registry.cursor(&Query::new("applications"))?;

    let first: Vec<_> = cursor.iter().collect::<Result<_>>()?;
    let calls = fetcher.call_count();
    let second: Vec<_> = cursor.iter().collect::<Result<_>>()?;
    assert_eq!(first, second);
    assert_eq!(first.len(), 23);
    assert_eq!(fetcher.call_count(), calls, "replay must not fetch");
    assert!(cursor.get(23)?.is_none());
    assert_eq!(fetcher.call_count(), calls);
    Ok(())
}

#[test]
fn short_page_ends_results_without_total() -> Result<()> {
    let fetcher = Arc::new(InMemoryFetcher::new(applications(20)).without_total());
    let registry = registry_with(fetcher.clone(), 10);
    let mut cursor = registry.cursor(&Query::new("applications"))?;
    assert_eq!(cursor.drain(None)?.len(), 20);
    // Two full pages, then an empty one to learn the end.
    assert_eq!(fetcher.call_count(), 3);
    assert_eq!(cursor.total_hint(), None);
    Ok(())
}

#[test]
fn slicing_matches_iteration() -> Result<()> {
    let fetcher = Arc::new(InMemoryFetcher::new(applications(25)));
    let registry = registry_with(fetcher, 10);
    let base = Query::new("applications").order_by(["-appl_id"]);

    let mut everything = base.cursor(&registry)?;
    let all = everything.drain(None)?.to_vec();

    let mut cursor = base.cursor(&registry)?;
    let sliced_query = cursor.slice(5..15);
    assert_eq!(sliced_query, base.slice(5..15));
    let mut sliced = sliced_query.cursor(&registry)?;
    assert_eq!(ids(sliced.drain(None)?), ids(&all[5..15]));

    let mut nested = base.slice(5..15).slice(2..4).cursor(&registry)?;
    assert_eq!(ids(nested.drain(None)?), ids(&all[7..9]));
    assert!(cursor.cached().is_empty(), "slice must not fetch");
    Ok(())
}

#[test]
fn failure_is_stored_and_not_refetched() -> Result<()> {
    let fetcher = Arc::new(
        InMemoryFetcher::new(applications(25))
            .fail_at_offset(10, QueryError::unavailable("applications", "gateway timeout")),
    );
    let registry = registry_with(fetcher.clone(), 10);
    let mut cursor = registry.cursor(&Query::new("applications"))?;

    let mut seen = Vec::new();
    let mut failure = None;
    for item in cursor.iter() {
        match item {
            Ok(record) => seen.push(record),
            Err(err) => failure = Some(err),
        }
    }
    assert_eq!(seen.len(), 10);
    let failure = failure.expect("second page fails");
    assert_eq!(failure.code(), "SourceUnavailable");
    assert_eq!(fetcher.call_count(), 2);

    assert_eq!(cursor.get(12).unwrap_err(), failure);
    assert_eq!(cursor.drain(None).unwrap_err(), failure);
    assert_eq!(fetcher.call_count(), 2, "stored failure must not re-fetch");

    assert_eq!(cursor.cached().len(), 10);
    assert!(cursor.get(3)?.is_some());
    assert_eq!(cursor.failure(), Some(&failure));

    fetcher.heal(10);
    let mut fresh = registry.cursor(&Query::new("applications"))?;
    assert_eq!(fresh.drain(None)?.len(), 25);
    Ok(())
}

#[test]
fn schema_error_rejects_whole_page() -> Result<()> {
    let mut fragments = applications(15);
    fragments[12] = json!({"filingDate": "2020-02-02"});
    let fetcher = Arc::new(InMemoryFetcher::new(fragments));
    let registry = registry_with(fetcher.clone(), 10);
    let mut cursor = registry.cursor(&Query::new("applications"))?;

    let err = cursor.drain(None).unwrap_err();
    match &err {
        QueryError::Schema { schema, path, .. } => {
            assert_eq!(schema, "application");
            assert_eq!(path, "appl_id");
        }
        other => panic!("unexpected error {other:?}"),
    }
    assert_eq!(cursor.cached().len(), 10);
    assert_eq!(cursor.get(11).unwrap_err(), err);
    assert_eq!(fetcher.call_count(), 2);
    Ok(())
}

#[test]
fn get_enforces_exactly_one_match() -> Result<()> {
    let fetcher = Arc::new(InMemoryFetcher::new(applications(6)));
    let registry = registry_with(fetcher, 10);

    let one = registry.get(&Query::new("applications").key("16000003"))?;
    assert_eq!(one.get("examiner_name"), Some(&Value::from("JONES")));

    let none = Query::new("applications")
        .filter("appl_id", Operator::Eq, "nope")
        .get(&registry)
        .unwrap_err();
    assert_eq!(none.code(), "NotFound");

    let many = Query::new("applications")
        .filter_lookup("examiner_name", "SMITH")
        .get(&registry)
        .unwrap_err();
    assert_eq!(
        many,
        QueryError::TooManyResults {
            source_id: "applications".into(),
            matched: Some(3),
        }
    );
    Ok(())
}

#[test]
fn first_reads_a_single_record() -> Result<()> {
    let fetcher = Arc::new(InMemoryFetcher::new(applications(30)));
    let registry = registry_with(fetcher.clone(), 10);
    let first = Query::new("applications")
        .order_by(["-appl_id"])
        .first(&registry)?
        .expect("non-empty");
    assert_eq!(first.id(), "16000029");
    assert_eq!(fetcher.calls(), vec![FetchCall { offset: 0, page_size: 1 }]);
    Ok(())
}

#[test]
fn cancelled_drain_reports_cancelled() -> Result<()> {
    let fetcher = Arc::new(InMemoryFetcher::new(applications(25)));
    let registry = registry_with(fetcher.clone(), 10);
    let mut cursor = registry.cursor(&Query::new("applications"))?;
    let cancel = AtomicBool::new(true);
    assert_eq!(cursor.to_table(1, Some(&cancel)).unwrap_err(), QueryError::Cancelled);
    assert_eq!(fetcher.call_count(), 0);
    Ok(())
}

#[test]
fn cursors_move_across_threads() -> Result<()> {
    let fetcher = Arc::new(InMemoryFetcher::new(applications(25)));
    let registry = registry_with(fetcher, 10);
    let handles: Vec<_> = (0..3)
        .map(|i| {
            let registry = registry.clone();
            std::thread::spawn(move || -> Result<usize> {
                let mut cursor = Query::new("applications").offset(i * 5).cursor(&registry)?;
                Ok(cursor.drain(None)?.len())
            })
        })
        .collect();
    let lens: Vec<usize> = handles
        .into_iter()
        .map(|h| h.join().expect("thread join"))
        .collect::<Result<_>>()?;
    assert_eq!(lens, vec![25, 20, 15]);
    Ok(())
}
