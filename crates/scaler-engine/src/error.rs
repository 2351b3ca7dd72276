//! Engine error types.

use std::time::Duration;

use thiserror::Error;

/// Failure of a single HTTP attempt, classified for the retry policy.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// The attempt timed out; retryable.
    #[error("request timed out: {0}")]
    Timeout(String),

    /// Malformed request or non-timeout transport failure; never retried.
    #[error("request failed: {0}")]
    Terminal(String),
}

impl TransportError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, TransportError::Timeout(_))
    }
}

/// Final failure of an action after its retry policy ran out.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DispatchError {
    #[error("timed out on all {attempts} attempts, last error: {last}")]
    Exhausted { attempts: u32, last: String },

    #[error("terminal error on attempt {attempt}: {error}")]
    Terminal { attempt: u32, error: String },

    #[error("dispatch task aborted: {0}")]
    Aborted(String),
}

/// Errors from the cluster coordination gate.
#[derive(Debug, Error)]
pub enum GateError {
    /// The lease could not be obtained before the wait was cancelled.
    #[error("lock {key} unavailable (held by {holder})")]
    LockUnavailable { key: String, holder: String },

    #[error("coordination service error: {0}")]
    Service(String),

    #[error("lease ttl must be greater than zero, got {0:?}")]
    InvalidTtl(Duration),
}

impl From<scaler_state::StateError> for GateError {
    fn from(e: scaler_state::StateError) -> Self {
        GateError::Service(e.to_string())
    }
}
