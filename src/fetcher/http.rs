//! Fetcher for JSON services that page with offset/limit query parameters.
//!
//! Request shape: `GET {endpoint}?{offset_param}=N&{limit_param}=M`, plus
//! one parameter per filter named after the raw field path (`a.b`, or
//! `a.b__gte` for non-equality operators) and an optional comma-separated
//! sort parameter (`-field` for descending). List values are comma-joined,
//! with `\` and `,` inside an element escaped by a backslash. The response
//! body is a JSON document; results and total are located with JSON pointers.
//!
//! A source configured without a sort parameter rejects ordered queries
//! rather than returning its natural order.

use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::StatusCode;
use serde_json::Value as Json;
use tracing::{debug, warn};

use crate::error::{QueryError, Result};
use crate::fetcher::{Page, PageFetcher, PageRequest};
use crate::path::FieldPath;
use crate::query::{Filter, Operator};
use crate::schema::Schema;
use crate::value::Value;

/// Request and response layout of one HTTP source.
#[derive(Clone, Debug, PartialEq)]
pub struct HttpFetcherOptions {
    /// Collection URL.
    pub endpoint: String,
    /// JSON pointer to the array of result fragments.
    pub results_pointer: String,
    /// JSON pointer to the total match count, when the service reports one.
    pub total_pointer: Option<String>,
    /// Name of the offset parameter.
    pub offset_param: String,
    /// Name of the page-size parameter.
    pub limit_param: String,
    /// Name of the sort parameter; `None` for services that cannot sort.
    pub sort_param: Option<String>,
    /// Per-request timeout.
    pub timeout: Duration,
    /// Extra headers sent with every request.
    pub headers: Vec<(String, String)>,
}

impl HttpFetcherOptions {
    /// Defaults for `endpoint`: results at `/results`, total at
    /// `/recordTotalQuantity`, `offset`/`limit`/`sort` parameters and a
    /// 30 second timeout.
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            results_pointer: "/results".into(),
            total_pointer: Some("/recordTotalQuantity".into()),
            offset_param: "offset".into(),
            limit_param: "limit".into(),
            sort_param: Some("sort".into()),
            timeout: Duration::from_secs(30),
            headers: Vec::new(),
        }
    }
}

/// Blocking JSON-over-HTTP page fetcher.
pub struct JsonHttpFetcher {
    options: HttpFetcherOptions,
    client: Client,
}

impl JsonHttpFetcher {
    /// Builds the HTTP client for `options`.
    pub fn new(options: HttpFetcherOptions) -> Result<Self> {
        let client = Client::builder()
            .timeout(options.timeout)
            .build()
            .map_err(|e| QueryError::unavailable(&options.endpoint, e))?;
        Ok(Self { options, client })
    }

    /// Request layout.
    pub fn options(&self) -> &HttpFetcherOptions {
        &self.options
    }

    /// Query parameters for one page request.
    pub fn params(&self, request: &PageRequest<'_>) -> Result<Vec<(String, String)>> {
        let mut params = vec![
            (self.options.offset_param.clone(), request.offset.to_string()),
            (self.options.limit_param.clone(), request.page_size.to_string()),
        ];
        for filter in request.query.filters() {
            params.push(filter_param(request, filter)?);
        }
        let ordering = request.query.ordering();
        if ordering.is_empty() {
            return Ok(params);
        }
        let Some(sort_param) = &self.options.sort_param else {
            return Err(QueryError::InvalidQuery(format!(
                "source {} does not support ordering",
                request.source_id
            )));
        };
        let keys = ordering
            .iter()
            .map(|key| {
                let raw = raw_path(request.schema, request.source_id, &key.path)?;
                Ok(if key.descending {
                    format!("-{}", raw.dotted())
                } else {
                    raw.dotted()
                })
            })
            .collect::<Result<Vec<_>>>()?;
        params.push((sort_param.clone(), keys.join(",")));
        Ok(params)
    }

    fn decode_body(&self, source_id: &str, body: &str) -> Result<Page> {
        let doc: Json = serde_json::from_str(body)
            .map_err(|e| QueryError::protocol(source_id, format!("response is not JSON: {e}")))?;
        let fragments = match doc.pointer(&self.options.results_pointer) {
            Some(Json::Array(items)) => items.clone(),
            Some(other) => {
                return Err(QueryError::protocol(
                    source_id,
                    format!(
                        "expected an array at '{}', found {}",
                        self.options.results_pointer,
                        json_kind(other)
                    ),
                ))
            }
            None => {
                return Err(QueryError::protocol(
                    source_id,
                    format!("response has no '{}'", self.options.results_pointer),
                ))
            }
        };
        let total = match &self.options.total_pointer {
            None => None,
            Some(pointer) => match doc.pointer(pointer) {
                None | Some(Json::Null) => None,
                Some(value) => Some(parse_total(value).ok_or_else(|| {
                    QueryError::protocol(
                        source_id,
                        format!("total at '{pointer}' is not a count: {value}"),
                    )
                })?),
            },
        };
        Ok(Page { fragments, total })
    }
}

impl PageFetcher for JsonHttpFetcher {
    fn fetch(&self, request: &PageRequest<'_>) -> Result<Page> {
        let params = self.params(request)?;
        debug!(
            source = request.source_id,
            endpoint = %self.options.endpoint,
            offset = request.offset,
            page_size = request.page_size,
            "http_fetcher.request"
        );
        let mut builder = self.client.get(&self.options.endpoint).query(&params);
        for (name, value) in &self.options.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        let response = builder.send().map_err(|e| {
            warn!(source = request.source_id, err = %e, "http_fetcher.transport_failed");
            QueryError::unavailable(request.source_id, e)
        })?;
        let status = response.status();
        if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
            return Err(QueryError::unavailable(
                request.source_id,
                format!("HTTP {status}"),
            ));
        }
        if !status.is_success() {
            return Err(QueryError::protocol(
                request.source_id,
                format!("HTTP {status}"),
            ));
        }
        let body = response
            .text()
            .map_err(|e| QueryError::unavailable(request.source_id, e))?;
        self.decode_body(request.source_id, &body)
    }
}

fn raw_path(schema: &Schema, source_id: &str, path: &FieldPath) -> Result<FieldPath> {
    schema.source_path(path).ok_or_else(|| {
        QueryError::protocol(
            source_id,
            format!("field '{path}' has no raw path on {}", schema.name()),
        )
    })
}

fn filter_param(request: &PageRequest<'_>, filter: &Filter) -> Result<(String, String)> {
    let path = filter.path().ok_or_else(|| {
        QueryError::protocol(request.source_id, "primary-key filter reached the fetcher unresolved")
    })?;
    let raw = raw_path(request.schema, request.source_id, path)?.dotted();
    let name = match filter.op {
        Operator::Eq => raw,
        op => format!("{raw}__{op}"),
    };
    Ok((name, literal_param(&filter.value)))
}

fn literal_param(value: &Value) -> String {
    match value {
        Value::List(items) => items
            .iter()
            .map(|item| escape_list_item(&item.to_string()))
            .collect::<Vec<_>>()
            .join(","),
        other => other.to_string(),
    }
}

fn escape_list_item(item: &str) -> String {
    let mut out = String::with_capacity(item.len());
    for ch in item.chars() {
        if ch == '\\' || ch == ',' {
            out.push('\\');
        }
        out.push(ch);
    }
    out
}

fn parse_total(value: &Json) -> Option<usize> {
    match value {
        Json::Number(n) => n.as_u64().and_then(|n| usize::try_from(n).ok()),
        Json::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn json_kind(value: &Json) -> &'static str {
    match value {
        Json::Null => "null",
        Json::Bool(_) => "a boolean",
        Json::Number(_) => "a number",
        Json::String(_) => "a string",
        Json::Array(_) => "an array",
        Json::Object(_) => "an object",
    }
}
