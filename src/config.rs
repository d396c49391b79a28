//! TOML source catalog.
//!
//! ```toml
//! [defaults]
//! page_size = 50
//!
//! [schemas.party]
//! fields = [
//!     { source = "partyName", type = "string", required = true },
//!     { source = "role", type = "enum", values = { PET = "petitioner", PO = "patent_owner" } },
//! ]
//!
//! [schemas.trial]
//! fields = [
//!     { source = "trialNumber", type = "string", required = true },
//!     { source = "filingDate", type = "date", format = "[month]/[day]/[year]" },
//!     { source = "parties", type = "nested_list", schema = "party" },
//! ]
//!
//! [sources.ptab]
//! schema = "trial"
//! primary_key = "trial_number"
//! endpoint = "https://example.invalid/ptab/trials"
//!
//! [[sources.ptab.relations]]
//! name = "application"
//! target = "applications"
//! cardinality = "one"
//! nullable = true
//! local = "appl_id"
//! ```
//!
//! The default location is `<config dir>/patent-query/sources.toml`,
//! overridden by an explicit path or the `PATENT_QUERY_CONFIG` variable.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, info};

use crate::error::QueryError;
use crate::fetcher::{HttpFetcherOptions, JsonHttpFetcher, PageFetcher};
use crate::path::FieldPath;
use crate::registry::{Registry, SourceDef, DEFAULT_PAGE_SIZE};
use crate::relation::{Nullability, RelatedField, RelationTarget};
use crate::schema::{Coercion, DateFormat, EnumMap, FieldSpec, Schema};

/// Environment variable naming the catalog file.
pub const CONFIG_ENV: &str = "PATENT_QUERY_CONFIG";

/// Errors raised while loading or interpreting a catalog.
#[derive(Debug, Error)]
#[allow(missing_docs)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse config {origin}: {source}")]
    Parse {
        origin: String,
        source: toml::de::Error,
    },
    #[error("no config file found; pass a path or set PATENT_QUERY_CONFIG")]
    NoConfigPath,
    #[error("schema '{name}' referenced by {referenced_by} is not declared")]
    UnknownSchema { name: String, referenced_by: String },
    #[error("schemas form a cycle through '{0}'")]
    SchemaCycle(String),
    #[error("schema '{schema}' field '{field}': {reason}")]
    InvalidField {
        schema: String,
        field: String,
        reason: String,
    },
    #[error("relation '{relation}' of source {source_id} is cardinality one and must declare `nullable`")]
    MissingNullability { source_id: String, relation: String },
    #[error("relation '{relation}' of source {source_id}: {reason}")]
    InvalidRelation {
        source_id: String,
        relation: String,
        reason: String,
    },
    #[error("source {source_id} has no endpoint")]
    MissingEndpoint { source_id: String },
    #[error("logging: {0}")]
    Logging(String),
    #[error(transparent)]
    Registry(#[from] QueryError),
}

impl ConfigError {
    /// Machine-readable code for the variant.
    pub fn code(&self) -> &'static str {
        match self {
            ConfigError::Read { .. } => "ConfigRead",
            ConfigError::Parse { .. } => "ConfigParse",
            ConfigError::NoConfigPath => "NoConfigPath",
            ConfigError::UnknownSchema { .. } => "UnknownSchema",
            ConfigError::SchemaCycle(_) => "SchemaCycle",
            ConfigError::InvalidField { .. } => "InvalidField",
            ConfigError::MissingNullability { .. } => "MissingNullability",
            ConfigError::InvalidRelation { .. } => "InvalidRelation",
            ConfigError::MissingEndpoint { .. } => "MissingEndpoint",
            ConfigError::Logging(_) => "LoggingInit",
            ConfigError::Registry(err) => err.code(),
        }
    }
}

/// Resolved settings of one source, handed to fetcher factories.
#[derive(Clone, Debug)]
pub struct SourceSettings {
    /// Source identifier.
    pub id: String,
    /// Name of the schema applied to the source.
    pub schema: String,
    /// Record path of the primary identifier.
    pub primary_key: FieldPath,
    /// Fragments requested per page.
    pub page_size: usize,
    /// HTTP layout; `None` when the source declares no endpoint.
    pub http: Option<HttpFetcherOptions>,
}

/// Parsed catalog: schemas, sources and relations.
#[derive(Debug)]
pub struct RegistryConfig {
    path: Option<PathBuf>,
    schemas: HashMap<String, Arc<Schema>>,
    sources: Vec<SourceSettings>,
    relations: HashMap<String, Vec<RelatedField>>,
}

impl RegistryConfig {
    /// Loads the catalog from `explicit`, else `PATENT_QUERY_CONFIG`, else
    /// the default location.
    pub fn load(explicit: Option<PathBuf>) -> Result<Self, ConfigError> {
        let path = explicit
            .or_else(|| std::env::var_os(CONFIG_ENV).map(PathBuf::from))
            .or_else(default_config_path)
            .ok_or(ConfigError::NoConfigPath)?;
        let contents = fs::read_to_string(&path).map_err(|source| ConfigError::Read {
            path: path.clone(),
            source,
        })?;
        let mut config = Self::parse(&contents, &path.display().to_string())?;
        info!(path = %path.display(), sources = config.sources.len(), "config.load.done");
        config.path = Some(path);
        Ok(config)
    }

    /// Parses a catalog held in memory.
    pub fn from_toml(contents: &str) -> Result<Self, ConfigError> {
        Self::parse(contents, "<inline>")
    }

    fn parse(contents: &str, origin: &str) -> Result<Self, ConfigError> {
        let raw: RawConfig = toml::from_str(contents).map_err(|source| ConfigError::Parse {
            origin: origin.to_owned(),
            source,
        })?;
        let schemas = build_schemas(&raw.schemas)?;
        let mut sources = Vec::with_capacity(raw.sources.len());
        let mut relations = HashMap::new();
        for (id, source) in &raw.sources {
            if !schemas.contains_key(&source.schema) {
                return Err(ConfigError::UnknownSchema {
                    name: source.schema.clone(),
                    referenced_by: format!("source {id}"),
                });
            }
            sources.push(source_settings(id, source, &raw.defaults));
            let declared = source
                .relations
                .iter()
                .map(|rel| convert_relation(id, rel))
                .collect::<Result<Vec<_>, _>>()?;
            relations.insert(id.clone(), declared);
        }
        debug!(
            schemas = schemas.len(),
            sources = sources.len(),
            "config.parse.done"
        );
        Ok(Self {
            path: None,
            schemas,
            sources,
            relations,
        })
    }

    /// File the catalog was read from.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Declared schema by name.
    pub fn schema(&self, name: &str) -> Option<&Arc<Schema>> {
        self.schemas.get(name)
    }

    /// Declared sources, sorted by identifier.
    pub fn sources(&self) -> &[SourceSettings] {
        &self.sources
    }

    /// Builds a registry fetching every source over HTTP.
    pub fn build_registry(&self) -> Result<Registry, ConfigError> {
        self.build_registry_with(|settings| {
            let options = settings
                .http
                .clone()
                .ok_or_else(|| ConfigError::MissingEndpoint {
                    source_id: settings.id.clone(),
                })?;
            let fetcher: Arc<dyn PageFetcher> = Arc::new(JsonHttpFetcher::new(options)?);
            Ok(fetcher)
        })
    }

    /// Builds a registry with fetchers supplied by `factory`.
    pub fn build_registry_with<F>(&self, mut factory: F) -> Result<Registry, ConfigError>
    where
        F: FnMut(&SourceSettings) -> Result<Arc<dyn PageFetcher>, ConfigError>,
    {
        let mut builder = Registry::builder();
        for settings in &self.sources {
            let schema = self
                .schemas
                .get(&settings.schema)
                .cloned()
                .ok_or_else(|| ConfigError::UnknownSchema {
                    name: settings.schema.clone(),
                    referenced_by: format!("source {}", settings.id),
                })?;
            let mut source = SourceDef::new(
                settings.id.clone(),
                schema,
                settings.primary_key.clone(),
                factory(settings)?,
            )
            .with_page_size(settings.page_size);
            for relation in self.relations.get(&settings.id).into_iter().flatten() {
                source = source.with_relation(relation.clone());
            }
            builder = builder.source(source);
        }
        Ok(builder.build()?)
    }
}

/// `<config dir>/patent-query/sources.toml`.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|base| base.join("patent-query").join("sources.toml"))
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawConfig {
    #[serde(default)]
    defaults: RawDefaults,
    #[serde(default)]
    schemas: BTreeMap<String, RawSchema>,
    #[serde(default)]
    sources: BTreeMap<String, RawSource>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawDefaults {
    page_size: Option<usize>,
    timeout_secs: Option<u64>,
    results_pointer: Option<String>,
    total_pointer: Option<String>,
    offset_param: Option<String>,
    limit_param: Option<String>,
    sort_param: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawSchema {
    fields: Vec<RawField>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawField {
    source: String,
    name: Option<String>,
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    required: bool,
    format: Option<String>,
    values: Option<BTreeMap<String, String>>,
    #[serde(default)]
    lenient: bool,
    schema: Option<String>,
    item: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawSource {
    schema: String,
    primary_key: String,
    page_size: Option<usize>,
    endpoint: Option<String>,
    timeout_secs: Option<u64>,
    results_pointer: Option<String>,
    total_pointer: Option<String>,
    offset_param: Option<String>,
    limit_param: Option<String>,
    sort_param: Option<String>,
    #[serde(default)]
    headers: BTreeMap<String, String>,
    #[serde(default)]
    relations: Vec<RawRelation>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "lowercase")]
enum RawCardinality {
    One,
    Many,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawRelation {
    name: String,
    target: String,
    cardinality: RawCardinality,
    nullable: Option<bool>,
    local: String,
    remote: Option<String>,
}

fn source_settings(id: &str, raw: &RawSource, defaults: &RawDefaults) -> SourceSettings {
    let http = raw.endpoint.as_ref().map(|endpoint| {
        let mut options = HttpFetcherOptions::new(endpoint.clone());
        if let Some(pointer) = raw.results_pointer.as_ref().or(defaults.results_pointer.as_ref()) {
            options.results_pointer = pointer.clone();
        }
        if let Some(pointer) = raw.total_pointer.as_ref().or(defaults.total_pointer.as_ref()) {
            options.total_pointer = (!pointer.is_empty()).then(|| pointer.clone());
        }
        if let Some(param) = raw.offset_param.as_ref().or(defaults.offset_param.as_ref()) {
            options.offset_param = param.clone();
        }
        if let Some(param) = raw.limit_param.as_ref().or(defaults.limit_param.as_ref()) {
            options.limit_param = param.clone();
        }
        if let Some(param) = raw.sort_param.as_ref().or(defaults.sort_param.as_ref()) {
            options.sort_param = (!param.is_empty()).then(|| param.clone());
        }
        if let Some(secs) = raw.timeout_secs.or(defaults.timeout_secs) {
            options.timeout = Duration::from_secs(secs);
        }
        options.headers = raw
            .headers
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        options
    });
    SourceSettings {
        id: id.to_owned(),
        schema: raw.schema.clone(),
        primary_key: FieldPath::parse(&raw.primary_key),
        page_size: raw
            .page_size
            .or(defaults.page_size)
            .unwrap_or(DEFAULT_PAGE_SIZE),
        http,
    }
}

fn convert_relation(source_id: &str, raw: &RawRelation) -> Result<RelatedField, ConfigError> {
    let target = RelationTarget::Lookup {
        local: FieldPath::parse(&raw.local),
        remote: raw.remote.as_deref().map(FieldPath::parse),
    };
    match raw.cardinality {
        RawCardinality::One => {
            let nullability = match raw.nullable {
                Some(true) => Nullability::Nullable,
                Some(false) => Nullability::Required,
                None => {
                    return Err(ConfigError::MissingNullability {
                        source_id: source_id.to_owned(),
                        relation: raw.name.clone(),
                    })
                }
            };
            Ok(RelatedField::one(&raw.name, &raw.target, nullability, target))
        }
        RawCardinality::Many => {
            if raw.nullable.is_some() {
                return Err(ConfigError::InvalidRelation {
                    source_id: source_id.to_owned(),
                    relation: raw.name.clone(),
                    reason: "`nullable` only applies to cardinality one".into(),
                });
            }
            Ok(RelatedField::many(&raw.name, &raw.target, target))
        }
    }
}

fn build_schemas(raw: &BTreeMap<String, RawSchema>) -> Result<HashMap<String, Arc<Schema>>, ConfigError> {
    let mut built = HashMap::new();
    let mut visiting = Vec::new();
    for name in raw.keys() {
        build_schema(name, raw, &mut built, &mut visiting)?;
    }
    Ok(built)
}

fn build_schema(
    name: &str,
    raw: &BTreeMap<String, RawSchema>,
    built: &mut HashMap<String, Arc<Schema>>,
    visiting: &mut Vec<String>,
) -> Result<Arc<Schema>, ConfigError> {
    if let Some(schema) = built.get(name) {
        return Ok(Arc::clone(schema));
    }
    if visiting.iter().any(|v| v == name) {
        return Err(ConfigError::SchemaCycle(name.to_owned()));
    }
    let declared = raw.get(name).ok_or_else(|| ConfigError::UnknownSchema {
        name: name.to_owned(),
        referenced_by: visiting
            .last()
            .map(|parent| format!("schema {parent}"))
            .unwrap_or_else(|| "<root>".into()),
    })?;
    visiting.push(name.to_owned());
    let mut builder = Schema::builder(name);
    for field in &declared.fields {
        let coercion = field_coercion(name, field, raw, built, visiting)?;
        let source = FieldPath::parse(&field.source);
        let field_name = match &field.name {
            Some(explicit) => explicit.clone(),
            None => source
                .last_field()
                .map(crate::path::normalize_field_name)
                .ok_or_else(|| invalid_field(name, &field.source, "source path names no field"))?,
        };
        builder = builder.push(FieldSpec {
            name: field_name,
            source,
            coercion,
            required: field.required,
        });
    }
    visiting.pop();
    let schema = builder.build()?;
    built.insert(name.to_owned(), Arc::clone(&schema));
    Ok(schema)
}

fn field_coercion(
    schema: &str,
    field: &RawField,
    raw: &BTreeMap<String, RawSchema>,
    built: &mut HashMap<String, Arc<Schema>>,
    visiting: &mut Vec<String>,
) -> Result<Coercion, ConfigError> {
    match field.kind.as_str() {
        "nested" | "nested_list" => {
            let target = field
                .schema
                .as_deref()
                .ok_or_else(|| invalid_field(schema, &field.source, "nested fields need `schema`"))?;
            let nested = build_schema(target, raw, built, visiting)?;
            Ok(if field.kind == "nested" {
                Coercion::Nested(nested)
            } else {
                Coercion::NestedList(nested)
            })
        }
        "list" => {
            let item = field
                .item
                .as_deref()
                .ok_or_else(|| invalid_field(schema, &field.source, "list fields need `item`"))?;
            Ok(Coercion::List(Box::new(scalar_coercion(schema, field, item)?)))
        }
        "enum" => {
            let values = field
                .values
                .as_ref()
                .ok_or_else(|| invalid_field(schema, &field.source, "enum fields need `values`"))?;
            let map = EnumMap::new(values.iter());
            Ok(Coercion::Enum(if field.lenient { map.lenient() } else { map }))
        }
        kind => scalar_coercion(schema, field, kind),
    }
}

fn scalar_coercion(schema: &str, field: &RawField, kind: &str) -> Result<Coercion, ConfigError> {
    Ok(match kind {
        "passthrough" => Coercion::Passthrough,
        "string" => Coercion::String,
        "integer" => Coercion::Integer,
        "float" => Coercion::Float,
        "boolean" => Coercion::Boolean,
        "datetime" => Coercion::DateTime,
        "date" => match &field.format {
            None => Coercion::Date(DateFormat::Iso),
            Some(format) => Coercion::Date(
                DateFormat::custom(format)
                    .map_err(|e| invalid_field(schema, &field.source, e.to_string()))?,
            ),
        },
        other => {
            return Err(invalid_field(
                schema,
                &field.source,
                format!("unknown type '{other}'"),
            ))
        }
    })
}

fn invalid_field(schema: &str, field: &str, reason: impl Into<String>) -> ConfigError {
    ConfigError::InvalidField {
        schema: schema.to_owned(),
        field: field.to_owned(),
        reason: reason.into(),
    }
}
