//! The metric backend seam.

use std::collections::BTreeMap;
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use thiserror::Error;

/// One sample of an instant query result.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    pub labels: BTreeMap<String, String>,
    /// Unix timestamp (seconds) of the sample.
    pub timestamp: f64,
    pub value: f64,
}

/// Result set of an instant query. Empty means the condition does not hold.
pub type QueryResult = Vec<Sample>;

/// Errors returned by a metric backend. None of them mean "condition false".
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("invalid backend address {0:?}")]
    Address(String),

    #[error("query timed out after {0:?}")]
    Timeout(Duration),

    #[error("request failed: {0}")]
    Request(String),

    #[error("backend returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("query failed ({error_type}): {error}")]
    Api { error_type: String, error: String },

    #[error("malformed response: {0}")]
    Decode(String),
}

/// A time-series backend able to answer instant queries.
#[async_trait]
pub trait MetricsBackend: Send + Sync {
    /// Evaluate `query` at time `at`.
    async fn query_instant(&self, query: &str, at: SystemTime) -> Result<QueryResult, BackendError>;
}
