//! Outbound queries against the time-series backend's HTTP API.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::config::BackendConfig;
use crate::metrics;
use crate::models::{RawSample, TimeRange};
use crate::query::catalog::{BuiltQuery, QueryKind};

/// Decoded body of `/api/v1/query` and `/api/v1/query_range`.
///
/// Every level is optional so a partial payload still decodes; the normalizer
/// turns whatever is missing into an empty series.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryResponse {
    #[serde(default)]
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<QueryData>,
    #[serde(rename = "errorType", default, skip_serializing_if = "Option::is_none")]
    pub error_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryData {
    #[serde(rename = "resultType", default)]
    pub result_type: String,
    #[serde(default)]
    pub result: Vec<ResultSeries>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResultSeries {
    #[serde(default)]
    pub metric: HashMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<RawSample>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub values: Option<Vec<RawSample>>,
}

impl QueryResponse {
    pub fn results(&self) -> &[ResultSeries] {
        self.data.as_ref().map(|d| d.result.as_slice()).unwrap_or(&[])
    }

    /// An empty matrix, used when a passthrough query cannot be answered.
    pub fn empty_matrix() -> Self {
        Self {
            status: "success".to_string(),
            data: Some(QueryData {
                result_type: "matrix".to_string(),
                result: Vec::new(),
            }),
            error_type: None,
            error: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum QueryFailure {
    #[error("Backend timed out")]
    Timeout,

    #[error("Backend unreachable: {0}")]
    Connection(String),

    #[error("Backend error (status {status}): {body}")]
    Backend { status: u16, body: String },

    #[error("Malformed backend payload: {0}")]
    Decode(String),
}

impl QueryFailure {
    pub fn kind(&self) -> &'static str {
        match self {
            QueryFailure::Timeout => "timeout",
            QueryFailure::Connection(_) => "connection",
            QueryFailure::Backend { .. } => "backend",
            QueryFailure::Decode(_) => "decode",
        }
    }
}

pub type QueryResult = std::result::Result<QueryResponse, QueryFailure>;

/// A backend able to evaluate query expressions.
///
/// Implementations must be safe to share between concurrent requests.
#[async_trait]
pub trait QueryBackend: Send + Sync {
    async fn instant(&self, expression: &str) -> QueryResult;

    async fn range(&self, expression: &str, range: &TimeRange) -> QueryResult;
}

/// Runs a built query against `backend`, filling in the last hour when a
/// range query arrives without a window.
pub async fn execute(backend: &dyn QueryBackend, query: &BuiltQuery) -> QueryResult {
    match query.kind {
        QueryKind::Instant => backend.instant(&query.expression).await,
        QueryKind::Range => {
            let range = query
                .range
                .clone()
                .unwrap_or_else(|| TimeRange::last_hour(chrono::Utc::now().timestamp()));
            backend.range(&query.expression, &range).await
        }
    }
}

/// Prometheus-compatible HTTP client.
#[derive(Clone)]
pub struct PrometheusClient {
    base_url: String,
    http: reqwest::Client,
    instant_timeout: Duration,
    range_timeout: Duration,
}

impl PrometheusClient {
    pub fn new(config: &BackendConfig) -> Result<Self, QueryFailure> {
        let http = reqwest::Client::builder()
            .build()
            .map_err(|e| QueryFailure::Connection(e.to_string()))?;

        Ok(Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            http,
            instant_timeout: config.instant_timeout,
            range_timeout: config.range_timeout,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn get(
        &self,
        kind: QueryKind,
        path: &str,
        params: &[(&str, String)],
        timeout: Duration,
    ) -> QueryResult {
        let url = format!("{}{}", self.base_url, path);
        let started = Instant::now();

        let result = self.send(&url, params, timeout).await;

        metrics::observe_backend_query(kind.as_str(), started.elapsed().as_secs_f64());
        if let Err(failure) = &result {
            metrics::record_backend_failure(failure.kind());
            debug!("Backend {} query to {} failed: {}", kind.as_str(), url, failure);
        }
        result
    }

    async fn send(&self, url: &str, params: &[(&str, String)], timeout: Duration) -> QueryResult {
        let response = self
            .http
            .get(url)
            .query(params)
            .timeout(timeout)
            .send()
            .await
            .map_err(classify)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(QueryFailure::Backend {
                status: status.as_u16(),
                body,
            });
        }

        let bytes = response.bytes().await.map_err(classify)?;
        let decoded: QueryResponse =
            serde_json::from_slice(&bytes).map_err(|e| QueryFailure::Decode(e.to_string()))?;

        if decoded.status == "error" {
            return Err(QueryFailure::Backend {
                status: status.as_u16(),
                body: decoded.error.unwrap_or_default(),
            });
        }

        debug!(
            "Backend returned {} result series from {}",
            decoded.results().len(),
            url
        );
        Ok(decoded)
    }
}

fn classify(err: reqwest::Error) -> QueryFailure {
    if err.is_timeout() {
        QueryFailure::Timeout
    } else if err.is_decode() {
        QueryFailure::Decode(err.to_string())
    } else {
        QueryFailure::Connection(err.to_string())
    }
}

#[async_trait]
impl QueryBackend for PrometheusClient {
    async fn instant(&self, expression: &str) -> QueryResult {
        self.get(
            QueryKind::Instant,
            "/api/v1/query",
            &[("query", expression.to_string())],
            self.instant_timeout,
        )
        .await
    }

    async fn range(&self, expression: &str, range: &TimeRange) -> QueryResult {
        self.get(
            QueryKind::Range,
            "/api/v1/query_range",
            &[
                ("query", expression.to_string()),
                ("start", range.start.to_string()),
                ("end", range.end.to_string()),
                ("step", range.step.clone()),
            ],
            self.range_timeout,
        )
        .await
    }
}
