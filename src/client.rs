//! Remote log-query transport.
//!
//! The warehouse is reached over SQL-over-HTTP: a `GET` carrying `project`,
//! `sql` and the optional time bounds, answered by `{result, error?}`.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::{Map, Value};

use crate::error::{ErrorPayload, QueryError};
use crate::results::ResultRow;
use crate::sql_compiler::CompiledQuery;

const REQUEST_TIMEOUT_SECS: u64 = 60;

/// One entry of a response's `result` array, before it is typed.
pub type Record = Map<String, Value>;

/// Executes compiled queries. Implemented by the HTTP client and by test doubles.
#[async_trait]
pub trait LogQueryClient: Send + Sync {
    /// Run `query` and return the untyped `result` records.
    async fn fetch(&self, query: &CompiledQuery) -> Result<Vec<Record>, QueryError>;

    /// Run a row query.
    async fn execute(&self, query: &CompiledQuery) -> Result<Vec<ResultRow>, QueryError> {
        rows_from_records(self.fetch(query).await?)
    }

    /// Run a count query and read its single `count` column.
    async fn count(&self, query: &CompiledQuery) -> Result<u64, QueryError> {
        count_from_records(&self.fetch(query).await?)
    }
}

pub fn rows_from_records(records: Vec<Record>) -> Result<Vec<ResultRow>, QueryError> {
    records
        .into_iter()
        .map(|record| {
            serde_json::from_value(Value::Object(record))
                .map_err(|e| QueryError::Decode(format!("invalid log row: {}", e)))
        })
        .collect()
}

/// An empty result counts as zero. The warehouse may send the count as a
/// number or as a numeric string.
pub fn count_from_records(records: &[Record]) -> Result<u64, QueryError> {
    let Some(record) = records.first() else {
        return Ok(0);
    };
    let count = match record.get("count") {
        Some(Value::Number(n)) => n.as_u64(),
        Some(Value::String(s)) => s.parse().ok(),
        _ => None,
    };
    count.ok_or_else(|| {
        QueryError::Decode(format!(
            "count result has no numeric `count`: {}",
            Value::Object(record.clone())
        ))
    })
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawError {
    Payload(ErrorPayload),
    Message(String),
}

impl From<RawError> for ErrorPayload {
    fn from(raw: RawError) -> Self {
        match raw {
            RawError::Payload(payload) => payload,
            RawError::Message(message) => ErrorPayload::new(message),
        }
    }
}

/// Body of a log-query response.
#[derive(Debug, Deserialize)]
pub struct LogQueryResponse {
    #[serde(default)]
    pub result: Vec<Record>,
    #[serde(default)]
    error: Option<RawError>,
}

impl LogQueryResponse {
    pub fn into_result(self) -> Result<Vec<Record>, QueryError> {
        match self.error {
            Some(raw) => Err(QueryError::from_payload(raw.into())),
            None => Ok(self.result),
        }
    }
}

/// Turn a status and body into rows or a classified error. A body carrying an
/// `error` fails even with a success status.
pub fn decode_response(status: StatusCode, body: &str) -> Result<Vec<Record>, QueryError> {
    match serde_json::from_str::<LogQueryResponse>(body) {
        Ok(response) if response.error.is_some() || status.is_success() => response.into_result(),
        Ok(_) => Err(QueryError::Execution(ErrorPayload::new(format!(
            "request failed with status {}",
            status
        )))),
        Err(_) if !status.is_success() => Err(QueryError::Execution(ErrorPayload::new(format!(
            "request failed with status {}: {}",
            status,
            body.trim()
        )))),
        Err(e) => Err(QueryError::Decode(e.to_string())),
    }
}

/// [`LogQueryClient`] backed by `reqwest`.
#[derive(Debug, Clone)]
pub struct HttpLogClient {
    client: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
}

impl HttpLogClient {
    pub fn new(endpoint: impl Into<String>, api_key: Option<String>) -> Result<Self, QueryError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .user_agent(concat!("logs-explorer/", env!("CARGO_PKG_VERSION")))
            .build()?;
        let endpoint = endpoint.into();

        tracing::debug!(endpoint = %endpoint, authenticated = api_key.is_some(), "Log query client initialized");
        Ok(Self {
            client,
            endpoint,
            api_key,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl LogQueryClient for HttpLogClient {
    async fn fetch(&self, query: &CompiledQuery) -> Result<Vec<Record>, QueryError> {
        let mut request = self.client.get(&self.endpoint).query(&query.query_pairs());
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let started = Instant::now();
        let response = request.send().await?;
        let status = response.status();
        let body = response.text().await?;
        let result = decode_response(status, &body);

        match &result {
            Ok(records) => tracing::debug!(
                status = %status,
                rows = records.len(),
                elapsed_ms = started.elapsed().as_millis() as u64,
                "Log query completed"
            ),
            Err(e) => tracing::warn!(status = %status, error = %e, "Log query failed"),
        }
        result
    }
}
