#![allow(missing_docs)]

use std::sync::Arc;

use patent_query::schema::{Coercion, DateFormat, EnumMap};
use patent_query::{InMemoryFetcher, Query, Registry, Result, Schema, SourceDef, Value};
use serde_json::json;
use time::macros::date;

fn registry() -> Registry {
    registry_from(vec![
        json!({
            "reelFrame": "012345/0001",
            "recordedDate": "2021-03-04",
            "assignors": [
                {"partyName": "Ada", "role": "pet"},
                {"partyName": "Grace", "role": "PO"}
            ],
            "assignee": {"partyName": "Acme Corp"},
            "properties": {"applNumbers": ["14000001", "14000002"]}
        }),
        json!({
            "reelFrame": "012345/0002",
            "recordedDate": "2021-05-06",
            "assignors": [],
            "assignee": {"partyName": "Globex"},
            "properties": {"applNumbers": ["14000001"]}
        }),
        json!({
            "reelFrame": "012345/0003",
            "assignors": [{"partyName": "Ada"}]
        }),
    ])
}

fn registry_from(fragments: Vec<serde_json::Value>) -> Registry {
    let party = Schema::builder("party")
        .required("partyName", Coercion::String)
        .field(
            "role",
            Coercion::Enum(EnumMap::new([("PET", "petitioner"), ("PO", "patent_owner")])),
        )
        .build()
        .expect("party schema");
    let assignment = Schema::builder("assignment")
        .required("reelFrame", Coercion::String)
        .field("recordedDate", Coercion::Date(DateFormat::Iso))
        .field("assignors", Coercion::NestedList(party.clone()))
        .field("assignee", Coercion::Nested(party))
        .field("properties.applNumbers", Coercion::List(Box::new(Coercion::String)))
        .build()
        .expect("assignment schema");
    let fetcher = Arc::new(InMemoryFetcher::new(fragments));
    Registry::builder()
        .source(SourceDef::new("assignments", assignment, "reel_frame", fetcher).with_page_size(2))
        .build()
        .expect("registry")
}

#[test]
fn explode_yields_one_row_per_element() -> Result<()> {
    let registry = registry();
    let rows = Query::new("assignments")
        .values(["reel_frame", "assignors__party_name", "assignors__role"])
        .explode("assignors")
        .cursor(&registry)?
        .rows(None)?;
    let flat: Vec<(Value, Value, Value)> = rows
        .iter()
        .map(|row| {
            (
                row.get("reel_frame").cloned().unwrap_or(Value::Null),
                row.get("assignors__party_name").cloned().unwrap_or(Value::Null),
                row.get("assignors__role").cloned().unwrap_or(Value::Null),
            )
        })
        .collect();
    let expected: Vec<(Value, Value, Value)> = vec![
        ("012345/0001".into(), "Ada".into(), "petitioner".into()),
        ("012345/0001".into(), "Grace".into(), "patent_owner".into()),
        ("012345/0002".into(), Value::Null, Value::Null),
        ("012345/0003".into(), "Ada".into(), Value::Null),
    ];
    assert_eq!(flat, expected);
    Ok(())
}

#[test]
fn explode_repeats_parent_fields_for_every_element() -> Result<()> {
    let registry = registry_from(vec![json!({
        "reelFrame": "054321/0009",
        "recordedDate": "2022-07-01",
        "assignors": [
            {"partyName": "Ada"},
            {"partyName": "Grace"},
            {"partyName": "Edsger"}
        ],
        "assignee": {"partyName": "Initech"}
    })]);
    let rows = Query::new("assignments")
        .values([
            "reel_frame",
            "recorded_date",
            "assignee__party_name",
            "assignors__party_name",
        ])
        .explode("assignors")
        .cursor(&registry)?
        .rows(None)?;
    assert_eq!(rows.len(), 3);
    let names: Vec<_> = rows
        .iter()
        .map(|row| row.get("assignors__party_name").cloned())
        .collect();
    assert_eq!(
        names,
        vec![
            Some(Value::from("Ada")),
            Some(Value::from("Grace")),
            Some(Value::from("Edsger")),
        ]
    );
    for row in &rows {
        assert_eq!(row.get("reel_frame"), Some(&Value::from("054321/0009")));
        assert_eq!(
            row.get("recorded_date"),
            Some(&Value::Date(date!(2022 - 07 - 01)))
        );
        assert_eq!(row.get("assignee__party_name"), Some(&Value::from("Initech")));
    }
    Ok(())
}

#[test]
fn table_flattens_nested_records_and_sequences() -> Result<()> {
    let registry = registry();
    let table = Query::new("assignments").cursor(&registry)?.to_table(2, None)?;
    assert_eq!(table.len(), 3);
    assert_eq!(
        table.columns(),
        &[
            "reel_frame",
            "recorded_date",
            "assignors__0__party_name",
            "assignors__0__role",
            "assignors__1__party_name",
            "assignors__1__role",
            "assignee__party_name",
            "assignee__role",
            "appl_numbers__0",
            "appl_numbers__1",
            "assignors",
            "assignee",
            "appl_numbers",
        ]
    );
    assert_eq!(
        table.cell(0, "recorded_date"),
        Some(&Value::Date(date!(2021 - 03 - 04)))
    );
    assert_eq!(table.cell(1, "assignors"), Some(&Value::Null));
    assert_eq!(table.cell(1, "appl_numbers__1"), Some(&Value::Null));
    assert_eq!(table.cell(2, "assignee"), Some(&Value::Null));
    assert_eq!(
        table.column("assignee__party_name"),
        Some(vec![
            &Value::from("Acme Corp"),
            &Value::from("Globex"),
            &Value::Null
        ])
    );
    Ok(())
}

#[test]
fn values_projection_selects_columns() -> Result<()> {
    let registry = registry();
    let table = Query::new("assignments")
        .values(["reel_frame", "assignee__party_name"])
        .order_by(["-reel_frame"])
        .cursor(&registry)?
        .to_table(0, None)?;
    assert_eq!(table.columns(), &["reel_frame", "assignee__party_name"]);
    assert_eq!(
        table.column("reel_frame"),
        Some(vec![
            &Value::from("012345/0003"),
            &Value::from("012345/0002"),
            &Value::from("012345/0001"),
        ])
    );
    Ok(())
}

#[test]
fn to_set_deduplicates_in_first_seen_order() -> Result<()> {
    let registry = registry();
    let names = Query::new("assignments")
        .values_list("assignors__party_name")
        .cursor(&registry)?
        .to_set(None)?;
    assert_eq!(names, vec![Value::from("Ada"), Value::from("Grace")]);

    let applications = Query::new("assignments")
        .values_list("appl_numbers")
        .cursor(&registry)?
        .to_set(None)?;
    assert_eq!(
        applications,
        vec![Value::from("14000001"), Value::from("14000002")]
    );
    Ok(())
}

#[test]
fn records_convert_to_json() -> Result<()> {
    let registry = registry();
    let record = registry.lookup("assignments", "012345/0002")?;
    assert_eq!(
        serde_json::Value::Object(record.as_dict()),
        json!({
            "reel_frame": "012345/0002",
            "recorded_date": "2021-05-06",
            "assignors": [],
            "assignee": {"party_name": "Globex", "role": null},
            "appl_numbers": ["14000001"]
        })
    );
    Ok(())
}
