//! Validated scaler policy types shared across the scaler crates.
//!
//! These are produced by [`crate::ScalerConfig::validate`] and are immutable
//! once loaded. The raw, string-typed configuration lives in [`crate::config`].

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Unique identifier for a scaler policy.
pub type ScalerId = String;

/// How the delay between retry attempts of an action evolves.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DelayType {
    /// Constant delay between attempts.
    #[default]
    Fixed,
    /// Delay doubles after every attempt.
    Backoff,
}

impl FromStr for DelayType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "fixed" => Ok(DelayType::Fixed),
            "backoff" => Ok(DelayType::Backoff),
            other => Err(format!("unknown delay type {other:?} (expected fixed or backoff)")),
        }
    }
}

impl fmt::Display for DelayType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DelayType::Fixed => f.write_str("fixed"),
            DelayType::Backoff => f.write_str("backoff"),
        }
    }
}

/// One outbound HTTP call issued when a scaler fires.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionSpec {
    /// Absolute http/https URL.
    pub url: String,
    pub method: http::Method,
    /// Base delay between retries.
    pub delay: Duration,
    pub delay_type: DelayType,
    /// Maximum number of attempts, including the first one. Always >= 1.
    pub attempts: u32,
}

/// A validated scaling policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScalerSpec {
    pub id: ScalerId,
    /// Backend query; a non-empty result means the condition holds.
    pub query: String,
    /// Polling interval. Always > 0.
    pub interval: Duration,
    /// How long the condition must hold before firing.
    pub duration: Duration,
    /// Minimum spacing between two fires.
    pub cooldown: Duration,
    /// Whether the policy is evaluated at all.
    pub active: bool,
    pub actions: Vec<ActionSpec>,
}
