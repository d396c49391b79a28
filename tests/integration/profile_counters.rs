#![allow(missing_docs)]

use std::sync::Arc;

use patent_query::profile::profile_snapshot;
use patent_query::schema::Coercion;
use patent_query::{
    InMemoryFetcher, Nullability, Query, RelatedField, Registry, Result, Schema, SourceDef,
};
use serde_json::json;

fn registry() -> Registry {
    let schema = Schema::builder("numbers")
        .required("n", Coercion::Integer)
        .build()
        .expect("schema");
    let fetcher = Arc::new(InMemoryFetcher::new(
        (0..25).map(|i| json!({"n": i})).collect(),
    ));
    Registry::builder()
        .source(
            SourceDef::new("numbers", schema, "n", fetcher)
                .with_page_size(10)
                .with_relation(RelatedField::one(
                    "itself",
                    "numbers",
                    Nullability::Required,
                    RelatedField::by_key("n"),
                )),
        )
        .build()
        .expect("registry")
}

// The enable flag is read once per process, so every check lives in this
// one test binary and the variable is set before the first query.
#[test]
fn counters_track_fetches_decodes_relations_and_tables() -> Result<()> {
    std::env::set_var("PATENT_QUERY_PROFILE", "1");
    let registry = registry();
    assert_eq!(profile_snapshot(true).map(|s| s.fetch_count), Some(0));

    let mut cursor = Query::new("numbers").cursor(&registry)?;
    assert_eq!(cursor.drain(None)?.len(), 25);
    let drained = profile_snapshot(true).expect("profiling enabled");
    assert_eq!(drained.fetch_count, 3);
    assert_eq!(drained.fragment_count, 25);
    assert_eq!(drained.decode_count, 3);
    assert_eq!(drained.table_count, 0);
    assert_eq!(drained.relation_count, 0);

    let table = Query::new("numbers").slice(..5).cursor(&registry)?.to_table(0, None)?;
    assert_eq!(table.len(), 5);
    let tabled = profile_snapshot(true).expect("profiling enabled");
    assert_eq!(tabled.fetch_count, 1);
    assert_eq!(tabled.fragment_count, 5);
    assert_eq!(tabled.table_count, 1);

    let record = cursor.get(7)?.cloned().expect("cached record");
    let twin = record.related_one("itself")?.expect("same record");
    assert_eq!(twin.id(), record.id());
    let resolved = profile_snapshot(false).expect("profiling enabled");
    assert_eq!(resolved.relation_count, 1);
    assert!(resolved.fetch_count >= 1);

    let _ = record.related_one("itself")?;
    assert_eq!(profile_snapshot(false).map(|s| s.relation_count), Some(1));
    Ok(())
}
