//! Persisted lease records.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

/// A time-bounded grant of exclusive ownership over a key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaseRecord {
    pub key: String,
    /// Session identifier of the owner.
    pub holder: String,
    /// Unix timestamp (milliseconds) when the current holder first acquired it.
    pub acquired_at_ms: u64,
    /// Unix timestamp (milliseconds) after which the lease is free.
    pub expires_at_ms: u64,
}

impl LeaseRecord {
    pub fn is_expired(&self, now_ms: u64) -> bool {
        now_ms >= self.expires_at_ms
    }

    pub fn remaining(&self, now_ms: u64) -> Duration {
        Duration::from_millis(self.expires_at_ms.saturating_sub(now_ms))
    }
}

/// Outcome of a lease acquisition attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LeaseGrant {
    /// The caller now holds the lease.
    Acquired(LeaseRecord),
    /// Someone else holds an unexpired lease.
    Held(LeaseRecord),
}

impl LeaseGrant {
    pub fn is_acquired(&self) -> bool {
        matches!(self, LeaseGrant::Acquired(_))
    }
}

pub fn epoch_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

pub(crate) fn ttl_millis(ttl: Duration) -> u64 {
    u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX)
}
