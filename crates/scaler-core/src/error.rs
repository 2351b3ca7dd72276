//! Configuration error types.

use std::path::PathBuf;

use thiserror::Error;

/// Result type alias for configuration loading and validation.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Errors produced while parsing a duration string.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DurationError {
    #[error("empty duration")]
    Empty,

    #[error("negative duration: {0}")]
    Negative(String),

    #[error("missing unit in duration {0:?}")]
    MissingUnit(String),

    #[error("unknown unit {unit:?} in duration {input:?}")]
    UnknownUnit { unit: String, input: String },

    #[error("invalid duration {0:?}")]
    Invalid(String),

    #[error("duration out of range: {0}")]
    Overflow(String),
}

/// Errors that prevent a configuration (or a single scaler in it) from loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("scaler {scaler}: invalid {field} {value:?}: {source}")]
    Duration {
        scaler: String,
        field: &'static str,
        value: String,
        #[source]
        source: DurationError,
    },

    #[error("scaler {scaler}: {reason}")]
    InvalidScaler { scaler: String, reason: String },

    #[error("scaler {scaler}, action {index}: {reason}")]
    InvalidAction {
        scaler: String,
        index: usize,
        reason: String,
    },

    #[error("duplicate scaler id: {0}")]
    DuplicateId(String),

    #[error("invalid {field}: {reason}")]
    InvalidSetting { field: &'static str, reason: String },
}

impl ConfigError {
    /// The scaler this error belongs to, if it is scoped to one.
    pub fn scaler_id(&self) -> Option<&str> {
        match self {
            ConfigError::Duration { scaler, .. }
            | ConfigError::InvalidScaler { scaler, .. }
            | ConfigError::InvalidAction { scaler, .. } => Some(scaler),
            ConfigError::DuplicateId(id) => Some(id),
            _ => None,
        }
    }
}
