#![allow(missing_docs)]

use std::collections::HashMap;
use std::fs;
use std::sync::Arc;

use patent_query::config::{default_config_path, ConfigError, RegistryConfig};
use patent_query::{InMemoryFetcher, PageFetcher, Query, Value};
use serde_json::json;
use tempfile::tempdir;

const CATALOG: &str = r#"
[defaults]
page_size = 2

[schemas.application]
fields = [
    { source = "applId", type = "string", required = true },
    { source = "patentNumber", type = "string" },
    { source = "filingDate", type = "date", format = "[month]/[day]/[year]" },
    { source = "appStatus", name = "status", type = "enum", values = { PATENTED = "patented", ABANDONED = "abandoned" }, lenient = true },
]

[schemas.trial]
fields = [
    { source = "trialNumber", type = "string", required = true },
    { source = "respondentApplicationNumberText", name = "appl_id", type = "string" },
]

[sources.applications]
schema = "application"
primary_key = "appl_id"

[sources.ptab]
schema = "trial"
primary_key = "trial_number"
page_size = 10

[[sources.ptab.relations]]
name = "application"
target = "applications"
cardinality = "one"
nullable = true
local = "appl_id"

[[sources.applications.relations]]
name = "trials"
target = "ptab"
cardinality = "many"
local = "appl_id"
remote = "appl_id"
"#;

fn fixtures() -> HashMap<&'static str, Vec<serde_json::Value>> {
    HashMap::from([
        (
            "applications",
            vec![
                json!({"applId": "14000001", "filingDate": "03/15/2014", "appStatus": "Patented"}),
                json!({"applId": "14000002", "filingDate": "04/01/2014", "appStatus": "Pending Review"}),
                json!({"applId": "14000003", "filingDate": "05/01/2014"}),
            ],
        ),
        (
            "ptab",
            vec![
                json!({"trialNumber": "IPR2020-00001", "respondentApplicationNumberText": "14000001"}),
                json!({"trialNumber": "IPR2020-00002", "respondentApplicationNumberText": "14000001"}),
            ],
        ),
    ])
}

#[test]
fn loads_catalog_from_file_and_builds_registry() -> Result<(), ConfigError> {
    let dir = tempdir().expect("tempdir");
    let path = dir.path().join("sources.toml");
    fs::write(&path, CATALOG).expect("write catalog");

    let config = RegistryConfig::load(Some(path.clone()))?;
    assert_eq!(config.path(), Some(path.as_path()));
    let ids: Vec<_> = config.sources().iter().map(|s| s.id.as_str()).collect();
    assert_eq!(ids, vec!["applications", "ptab"]);
    assert_eq!(config.sources()[0].page_size, 2);
    assert!(config.sources()[0].http.is_none());

    let mut data = fixtures();
    let registry = config.build_registry_with(|settings| {
        let rows = data.remove(settings.id.as_str()).unwrap_or_default();
        let fetcher: Arc<dyn PageFetcher> = Arc::new(InMemoryFetcher::new(rows));
        Ok(fetcher)
    })?;
    assert_eq!(registry.source("ptab")?.page_size(), 10);

    let application = registry.lookup("applications", "14000001")?;
    assert_eq!(application.get("status"), Some(&Value::from("patented")));
    assert_eq!(
        application.get("filing_date"),
        Some(&Value::Date(time::macros::date!(2014 - 03 - 15)))
    );
    let pending = registry.lookup("applications", "14000002")?;
    assert_eq!(pending.get("status"), Some(&Value::from("Pending Review")));

    let trials = application.related_many("trials")?;
    let mut cursor = trials.cursor(&registry)?;
    assert_eq!(cursor.drain(None)?.len(), 2);

    let trial = registry.lookup("ptab", "IPR2020-00002")?;
    let linked = trial.related_one("application")?.expect("linked application");
    assert_eq!(linked.id(), "14000001");

    let all = Query::new("applications").values_list("appl_id");
    assert_eq!(all.cursor(&registry)?.to_set(None)?.len(), 3);
    Ok(())
}

#[test]
fn http_sources_need_an_endpoint() {
    let config = RegistryConfig::from_toml(CATALOG).expect("catalog parses");
    let err = config.build_registry().unwrap_err();
    assert_eq!(err.code(), "MissingEndpoint");
}

#[test]
fn relation_to_unknown_source_fails_registry_build() {
    let toml = format!(
        "{CATALOG}\n[[sources.applications.relations]]\nname = \"documents\"\ntarget = \"documents\"\ncardinality = \"many\"\nlocal = \"appl_id\"\n"
    );
    let config = RegistryConfig::from_toml(&toml).expect("catalog parses");
    let err = config
        .build_registry_with(|_| {
            let fetcher: Arc<dyn PageFetcher> = Arc::new(InMemoryFetcher::new(vec![]));
            Ok(fetcher)
        })
        .unwrap_err();
    assert_eq!(err.code(), "InvalidSchema");
    assert!(err.to_string().contains("documents"));
}

#[test]
fn unreadable_files_report_their_path() {
    let dir = tempdir().expect("tempdir");
    let missing = dir.path().join("absent.toml");
    let err = RegistryConfig::load(Some(missing.clone())).unwrap_err();
    assert_eq!(err.code(), "ConfigRead");
    assert!(err.to_string().contains("absent.toml"));

    let broken = dir.path().join("broken.toml");
    fs::write(&broken, "[sources.x\nschema =").expect("write");
    let err = RegistryConfig::load(Some(broken)).unwrap_err();
    assert_eq!(err.code(), "ConfigParse");
}

#[test]
fn default_path_lives_under_config_dir() {
    if let Some(path) = default_config_path() {
        assert!(path.ends_with("patent-query/sources.toml"));
    }
}
