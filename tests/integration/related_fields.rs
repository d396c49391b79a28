#![allow(missing_docs)]

use std::sync::Arc;

use patent_query::relation::Related;
use patent_query::schema::{Coercion, DateFormat};
use patent_query::{
    InMemoryFetcher, Nullability, Operator, Query, QueryError, Record, Registry, RelatedField,
    Result, Schema, SourceDef, Value,
};
use serde_json::json;

struct Fixture {
    registry: Registry,
    applications: Arc<InMemoryFetcher>,
    documents: Arc<InMemoryFetcher>,
}

fn fixture_with(applications: InMemoryFetcher) -> Fixture {
    let trial = Schema::builder("trial")
        .required("trialNumber", Coercion::String)
        .field("respondentApplicationNumberText", Coercion::String)
        .field("respondentPatentNumber", Coercion::String)
        .field("filingDate", Coercion::Date(DateFormat::Iso))
        .build()
        .expect("trial schema");
    let application = Schema::builder("application")
        .required("applId", Coercion::String)
        .field("patentNumber", Coercion::String)
        .field("inventionTitle", Coercion::String)
        .build()
        .expect("application schema");
    let document = Schema::builder("document")
        .required("documentIdentifier", Coercion::String)
        .required("trialNumber", Coercion::String)
        .field("documentTitleText", Coercion::String)
        .build()
        .expect("document schema");

    let trials = Arc::new(InMemoryFetcher::new(vec![
        json!({"trialNumber": "IPR2020-00001", "respondentApplicationNumberText": "14000001",
               "respondentPatentNumber": "9000001", "filingDate": "2019-10-01"}),
        json!({"trialNumber": "IPR2020-00002", "respondentPatentNumber": "9999999",
               "filingDate": "2019-10-01"}),
    ]));
    let applications = Arc::new(applications);
    let documents = Arc::new(InMemoryFetcher::new(vec![
        json!({"documentIdentifier": "d1", "trialNumber": "IPR2020-00001", "documentTitleText": "Petition"}),
        json!({"documentIdentifier": "d2", "trialNumber": "IPR2020-00002", "documentTitleText": "Petition"}),
        json!({"documentIdentifier": "d3", "trialNumber": "IPR2020-00001", "documentTitleText": "Decision"}),
    ]));

    let registry = Registry::builder()
        .source(
            SourceDef::new("ptab", trial, "trial_number", trials)
                .with_relation(RelatedField::one(
                    "application",
                    "applications",
                    Nullability::Nullable,
                    RelatedField::by_key("respondent_application_number_text"),
                ))
                .with_relation(RelatedField::one(
                    "patent",
                    "applications",
                    Nullability::Required,
                    RelatedField::by_field("respondent_patent_number", "patent_number"),
                ))
                .with_relation(RelatedField::many(
                    "documents",
                    "documents",
                    RelatedField::by_field("trial_number", "trial_number"),
                ))
                .with_relation(RelatedField::many(
                    "same_day_trials",
                    "ptab",
                    RelatedField::build(|trial: &Record| {
                        Ok(trial.get("filing_date").cloned().map(|date| {
                            Query::new("ptab").filter("filing_date", Operator::Eq, date)
                        }))
                    }),
                )),
        )
        .source(SourceDef::new("applications", application, "appl_id", applications.clone()))
        .source(SourceDef::new("documents", document, "document_identifier", documents.clone()))
        .build()
        .expect("registry");
    Fixture {
        registry,
        applications,
        documents,
    }
}

fn fixture() -> Fixture {
    fixture_with(InMemoryFetcher::new(vec![json!({
        "applId": "14000001",
        "patentNumber": "9000001",
        "inventionTitle": "Widget"
    })]))
}

fn trial(fx: &Fixture, number: &str) -> Result<Record> {
    fx.registry.lookup("ptab", number)
}

#[test]
fn one_relation_is_fetched_once_per_record() -> Result<()> {
    let fx = fixture();
    let record = trial(&fx, "IPR2020-00001")?;
    assert!(!record.is_resolved("application"));
    assert_eq!(fx.applications.call_count(), 0, "construction must not resolve");

    let first = record.related_one("application")?.expect("linked application");
    assert_eq!(first.id(), "14000001");
    let calls = fx.applications.call_count();

    let clone = record.clone();
    let again = clone.related_one("application")?.expect("memoized");
    assert_eq!(again, first);
    assert!(record.is_resolved("application"));
    assert_eq!(fx.applications.call_count(), calls);
    Ok(())
}

#[test]
fn nullable_relation_with_missing_key_is_none() -> Result<()> {
    let fx = fixture();
    let record = trial(&fx, "IPR2020-00002")?;
    assert_eq!(record.related_one("application")?, None);
    assert_eq!(fx.applications.call_count(), 0);
    Ok(())
}

#[test]
fn required_relation_without_match_is_an_error() -> Result<()> {
    let fx = fixture();
    let record = trial(&fx, "IPR2020-00002")?;
    let err = record.related_one("patent").unwrap_err();
    match &err {
        QueryError::RelationResolution {
            relation,
            record_id,
            source,
        } => {
            assert_eq!(relation, "patent");
            assert_eq!(record_id, "IPR2020-00002");
            assert_eq!(source.code(), "NotFound");
        }
        other => panic!("unexpected error {other:?}"),
    }
    let calls = fx.applications.call_count();
    assert_eq!(record.related_one("patent").unwrap_err(), err);
    assert_eq!(fx.applications.call_count(), calls, "errors are memoized too");

    let linked = trial(&fx, "IPR2020-00001")?.related_one("patent")?;
    assert_eq!(linked.map(|r| r.id()), Some("14000001".to_owned()));
    Ok(())
}

#[test]
fn source_failures_are_wrapped() -> Result<()> {
    let fx = fixture_with(
        InMemoryFetcher::new(vec![])
            .fail_at_offset(0, QueryError::unavailable("applications", "503 Service Unavailable")),
    );
    let record = trial(&fx, "IPR2020-00001")?;
    let err = record.related("application").unwrap_err();
    assert_eq!(err.code(), "RelationResolutionError");
    match err {
        QueryError::RelationResolution { source, .. } => {
            assert_eq!(source.code(), "SourceUnavailable");
        }
        other => panic!("unexpected error {other:?}"),
    }
    Ok(())
}

#[test]
fn many_relation_is_a_lazy_query() -> Result<()> {
    let fx = fixture();
    let record = trial(&fx, "IPR2020-00001")?;
    let documents = record.related_many("documents")?;
    assert_eq!(fx.documents.call_count(), 0, "many relations are not fetched eagerly");

    let titles = documents
        .values_list("document_title_text")
        .cursor(&fx.registry)?
        .to_set(None)?;
    assert_eq!(titles, vec![Value::from("Petition"), Value::from("Decision")]);
    assert_eq!(fx.documents.call_count(), 1);
    Ok(())
}

#[test]
fn built_relation_queries_its_target() -> Result<()> {
    let fx = fixture();
    let record = trial(&fx, "IPR2020-00002")?;
    let Related::Many(query) = record.related("same_day_trials")? else {
        panic!("expected a many relation");
    };
    let mut cursor = query.cursor(&fx.registry)?;
    assert_eq!(cursor.drain(None)?.len(), 2);
    Ok(())
}

#[test]
fn wrong_cardinality_and_unknown_names() -> Result<()> {
    let fx = fixture();
    let record = trial(&fx, "IPR2020-00001")?;
    assert_eq!(record.related_many("application").unwrap_err().code(), "InvalidQuery");
    assert_eq!(record.related("inventors").unwrap_err().code(), "UnknownRelation");
    Ok(())
}
