//! PostgREST-compatible adapter for the hosted document store.
//!
//! Reads use `GET /rest/v1/<table>` with `col=eq.value` filters and an
//! `or=(...)` group per [`Filter::AnyOf`]. Writes use `POST` with
//! `Prefer: return=representation`. Nothing is retried here; callers see the
//! first failure.

use std::time::Duration;

use questline_domain::ports::BoxFuture;
use questline_domain::ports::store::{Filter, RecordStore, Row, StoreError};
use reqwest::StatusCode;
use serde_json::Value;
use url::Url;

use crate::config::AppConfig;

const REST_PREFIX: &str = "rest/v1";
const API_KEY_HEADER: &str = "apikey";
const UNIQUE_VIOLATION_CODE: &str = "23505";

#[derive(Debug, Clone)]
pub struct RestRecordStore {
    http: reqwest::Client,
    base_url: Url,
    api_key: String,
}

impl RestRecordStore {
    pub fn from_config(config: &AppConfig) -> Result<Self, StoreError> {
        let api_key = config.store_api_key.trim().to_string();
        if api_key.is_empty() {
            return Err(StoreError::Unavailable(
                "store_api_key is required for the rest data backend".to_string(),
            ));
        }
        let timeout = Duration::from_millis(config.store_timeout_ms.max(1));
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|err| StoreError::Unavailable(err.to_string()))?;
        Self::new(http, &config.store_url, api_key)
    }

    pub fn new(
        http: reqwest::Client,
        base_url: &str,
        api_key: impl Into<String>,
    ) -> Result<Self, StoreError> {
        let base_url = base_url.trim();
        if base_url.is_empty() {
            return Err(StoreError::Unavailable(
                "store_url is required for the rest data backend".to_string(),
            ));
        }
        let base_url =
            Url::parse(&format!("{}/", base_url.trim_end_matches('/'))).map_err(|err| {
                StoreError::Unavailable(format!("invalid store url '{base_url}': {err}"))
            })?;
        Ok(Self {
            http,
            base_url,
            api_key: api_key.into(),
        })
    }

    fn table_url(&self, table: &str) -> Result<Url, StoreError> {
        self.base_url
            .join(&format!("{REST_PREFIX}/{table}"))
            .map_err(|err| StoreError::Operation(format!("invalid table '{table}': {err}")))
    }

    fn request(&self, method: reqwest::Method, url: Url) -> reqwest::RequestBuilder {
        self.http
            .request(method, url)
            .header(API_KEY_HEADER, &self.api_key)
            .bearer_auth(&self.api_key)
            .header("accept", "application/json")
    }
}

impl RecordStore for RestRecordStore {
    fn name(&self) -> &'static str {
        "rest"
    }

    fn find_one<'a>(
        &'a self,
        table: &'a str,
        filters: &'a [Filter],
    ) -> BoxFuture<'a, Result<Option<Row>, StoreError>> {
        Box::pin(async move {
            let mut url = self.table_url(table)?;
            {
                let mut query = url.query_pairs_mut();
                query.append_pair("select", "*");
                for (key, value) in filter_params(filters) {
                    query.append_pair(&key, &value);
                }
                query.append_pair("limit", "1");
            }

            let response = self
                .request(reqwest::Method::GET, url)
                .send()
                .await
                .map_err(|err| transport_failure(table, err))?;
            let status = response.status();
            let body = response
                .text()
                .await
                .map_err(|err| transport_failure(table, err))?;
            if !status.is_success() {
                return Err(rejected(table, status, &body));
            }
            first_row(&body)
        })
    }

    fn insert<'a>(&'a self, table: &'a str, row: Row) -> BoxFuture<'a, Result<Row, StoreError>> {
        Box::pin(async move {
            let url = self.table_url(table)?;
            let response = self
                .request(reqwest::Method::POST, url)
                .header("prefer", "return=representation")
                .json(&Value::Array(vec![Value::Object(row)]))
                .send()
                .await
                .map_err(|err| transport_failure(table, err))?;
            let status = response.status();
            let body = response
                .text()
                .await
                .map_err(|err| transport_failure(table, err))?;
            if !status.is_success() {
                return Err(rejected(table, status, &body));
            }
            first_row(&body)?.ok_or_else(|| {
                StoreError::Operation(format!("insert into {table} returned no representation"))
            })
        })
    }
}

pub(crate) fn filter_params(filters: &[Filter]) -> Vec<(String, String)> {
    filters
        .iter()
        .map(|filter| match filter {
            Filter::Eq { column, value } => (column.clone(), format!("eq.{value}")),
            Filter::AnyOf(pairs) => {
                let group = pairs
                    .iter()
                    .map(|(column, value)| format!("{column}.eq.{}", quote_value(value)))
                    .collect::<Vec<_>>()
                    .join(",");
                ("or".to_string(), format!("({group})"))
            }
        })
        .collect()
}

/// Values inside an `or=(...)` group must be double-quoted when they contain
/// PostgREST reserved characters.
pub(crate) fn quote_value(value: &str) -> String {
    let reserved = |ch: char| {
        matches!(ch, ',' | '.' | ':' | '(' | ')' | '"' | '\\') || ch.is_whitespace()
    };
    if !value.chars().any(reserved) {
        return value.to_string();
    }
    let escaped = value.replace('\\', "\\\\").replace('"', "\\\"");
    format!("\"{escaped}\"")
}

fn first_row(body: &str) -> Result<Option<Row>, StoreError> {
    let value: Value = serde_json::from_str(body)
        .map_err(|err| StoreError::Operation(format!("invalid store response: {err}")))?;
    match value {
        Value::Array(rows) => match rows.into_iter().next() {
            Some(Value::Object(row)) => Ok(Some(row)),
            Some(other) => Err(StoreError::Operation(format!(
                "unexpected row shape: {other}"
            ))),
            None => Ok(None),
        },
        Value::Object(row) => Ok(Some(row)),
        Value::Null => Ok(None),
        other => Err(StoreError::Operation(format!(
            "unexpected store response: {other}"
        ))),
    }
}

fn transport_failure(table: &str, err: reqwest::Error) -> StoreError {
    tracing::warn!(table, error = %err, timeout = err.is_timeout(), "store request failed");
    StoreError::Unavailable(err.to_string())
}

fn rejected(table: &str, status: StatusCode, body: &str) -> StoreError {
    let err = classify_failure(status, body);
    match &err {
        StoreError::Conflict(_) => {
            tracing::debug!(table, status = status.as_u16(), "store reported a conflict")
        }
        _ => tracing::warn!(table, status = status.as_u16(), error = %err, "store rejected request"),
    }
    err
}

pub(crate) fn classify_failure(status: StatusCode, body: &str) -> StoreError {
    let parsed = serde_json::from_str::<Value>(body).ok();
    let code = parsed
        .as_ref()
        .and_then(|value| value.get("code"))
        .and_then(Value::as_str);
    let message = parsed
        .as_ref()
        .and_then(|value| value.get("message"))
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| body.trim().to_string());

    if status == StatusCode::CONFLICT || code == Some(UNIQUE_VIOLATION_CODE) {
        return StoreError::Conflict(message);
    }
    if status.is_server_error() {
        return StoreError::Unavailable(format!("status {}: {message}", status.as_u16()));
    }
    StoreError::Operation(format!("status {}: {message}", status.as_u16()))
}
