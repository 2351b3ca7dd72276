//! Prometheus HTTP API backend.
//!
//! Issues `GET /api/v1/query` with `query` and `time` parameters and
//! flattens the returned vector, matrix or scalar into [`Sample`]s.

use std::collections::BTreeMap;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use crate::backend::{BackendError, MetricsBackend, QueryResult, Sample};

/// Instant-query client for a Prometheus-compatible server.
#[derive(Debug, Clone)]
pub struct PrometheusBackend {
    client: reqwest::Client,
    query_url: String,
    timeout: Duration,
}

impl PrometheusBackend {
    /// Create a backend for the server at `address` (e.g. `http://prometheus:9090`).
    pub fn new(address: &str, timeout: Duration) -> Result<Self, BackendError> {
        let base = address.trim().trim_end_matches('/');
        let parsed =
            reqwest::Url::parse(base).map_err(|_| BackendError::Address(address.to_string()))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(BackendError::Address(address.to_string()));
        }

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| BackendError::Request(e.to_string()))?;

        Ok(Self {
            client,
            query_url: format!("{base}/api/v1/query"),
            timeout,
        })
    }
}

#[async_trait]
impl MetricsBackend for PrometheusBackend {
    async fn query_instant(&self, query: &str, at: SystemTime) -> Result<QueryResult, BackendError> {
        let time = format_time(at);
        let response = self
            .client
            .get(&self.query_url)
            .query(&[("query", query), ("time", time.as_str())])
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    BackendError::Timeout(self.timeout)
                } else {
                    BackendError::Request(e.to_string())
                }
            })?;

        let status = response.status();
        let body = response.bytes().await.map_err(|e| {
            if e.is_timeout() {
                BackendError::Timeout(self.timeout)
            } else {
                BackendError::Request(e.to_string())
            }
        })?;

        let result = decode_response(status.as_u16(), &body)?;
        debug!(%query, samples = result.len(), "instant query answered");
        Ok(result)
    }
}

/// Render a timestamp the way the query API expects it: Unix seconds with
/// millisecond precision.
fn format_time(at: SystemTime) -> String {
    let secs = at.duration_since(UNIX_EPOCH).unwrap_or_default().as_secs_f64();
    format!("{secs:.3}")
}

// ── Wire format ────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct ApiResponse {
    status: String,
    data: Option<QueryData>,
    #[serde(rename = "errorType")]
    error_type: Option<String>,
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "resultType", content = "result", rename_all = "lowercase")]
enum QueryData {
    Vector(Vec<VectorSample>),
    Matrix(Vec<MatrixSeries>),
    Scalar(RawPoint),
    String(RawPoint),
}

#[derive(Debug, Deserialize)]
struct VectorSample {
    #[serde(default)]
    metric: BTreeMap<String, String>,
    /// Absent for native histogram samples.
    value: Option<RawPoint>,
    histogram: Option<(f64, serde_json::Value)>,
}

#[derive(Debug, Deserialize)]
struct MatrixSeries {
    #[serde(default)]
    metric: BTreeMap<String, String>,
    #[serde(default)]
    values: Vec<RawPoint>,
}

/// `[<unix seconds>, "<value>"]`
type RawPoint = (f64, String);

fn parse_value(raw: &str) -> Result<f64, BackendError> {
    raw.parse::<f64>()
        .map_err(|_| BackendError::Decode(format!("invalid sample value {raw:?}")))
}

fn decode_response(status: u16, body: &[u8]) -> Result<QueryResult, BackendError> {
    let parsed: ApiResponse = match serde_json::from_slice(body) {
        Ok(parsed) => parsed,
        Err(e) => {
            if !(200..300).contains(&status) {
                return Err(BackendError::Status {
                    status,
                    body: String::from_utf8_lossy(body).chars().take(256).collect(),
                });
            }
            return Err(BackendError::Decode(e.to_string()));
        }
    };

    if parsed.status != "success" {
        return Err(BackendError::Api {
            error_type: parsed.error_type.unwrap_or_else(|| "unknown".to_string()),
            error: parsed.error.unwrap_or_else(|| format!("status {}", parsed.status)),
        });
    }

    let data = parsed
        .data
        .ok_or_else(|| BackendError::Decode("success response without data".to_string()))?;

    match data {
        QueryData::Vector(samples) => samples
            .into_iter()
            .map(|s| match (s.value, s.histogram) {
                (Some((timestamp, raw)), _) => Ok(Sample {
                    labels: s.metric,
                    timestamp,
                    value: parse_value(&raw)?,
                }),
                (None, Some((timestamp, _))) => Ok(Sample {
                    labels: s.metric,
                    timestamp,
                    value: f64::NAN,
                }),
                (None, None) => Err(BackendError::Decode("vector sample without value".to_string())),
            })
            .collect(),
        QueryData::Matrix(series) => series
            .into_iter()
            .filter_map(|s| {
                let (timestamp, raw) = s.values.last()?.clone();
                Some(parse_value(&raw).map(|value| Sample {
                    labels: s.metric,
                    timestamp,
                    value,
                }))
            })
            .collect(),
        QueryData::Scalar((timestamp, raw)) => Ok(vec![Sample {
            labels: BTreeMap::new(),
            timestamp,
            value: parse_value(&raw)?,
        }]),
        QueryData::String(_) => Err(BackendError::Decode(
            "string results cannot be evaluated as a condition".to_string(),
        )),
    }
}
