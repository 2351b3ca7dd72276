//! Coordination gate — cluster-wide mutual exclusion per scaler.
//!
//! A scaler only evaluates and dispatches while this instance holds the
//! lease keyed by its id. Leases are granted by a [`LockService`] with a
//! bounded TTL and kept alive by a background session task:
//!
//! ```text
//! acquire ──► LockService::try_acquire ──► Lease
//!                                           └── keepalive: renew every ttl/3
//!                                                 ├── renewed     → held
//!                                                 ├── refused     → lost (held = false)
//!                                                 └── unreachable → lost once a renewal
//!                                                                   could no longer land
//!                                                                   before the ttl
//! release ──► keepalive aborted ──► LockService::release
//! crash   ──► renewals stop ──► lease expires after ttl ──► next holder
//! ```
//!
//! [`PgLeaseStore`] is the cluster service: every instance talks to the
//! same Postgres table. [`StateStore`] only coordinates the scalers of a
//! single process.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use scaler_state::{LeaseGrant, LeaseRecord, PgLeaseStore, StateStore, epoch_millis};

use crate::error::GateError;

/// Floor for the keepalive period, so tiny TTLs cannot spin the session task.
const MIN_RENEW_PERIOD: Duration = Duration::from_millis(1);

/// Result of a single acquisition attempt against the coordination service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LockAttempt {
    Acquired,
    /// An unexpired lease belongs to someone else.
    HeldBy(String),
}

/// Coordination service granting TTL-bounded leases.
#[async_trait]
pub trait LockService: Send + Sync {
    /// Take `key` for `holder` if it is free, expired, or already `holder`'s.
    async fn try_acquire(&self, key: &str, holder: &str, ttl: Duration) -> Result<LockAttempt, GateError>;

    /// Extend `holder`'s lease by `ttl`. `false` once the lease is gone or
    /// belongs to someone else.
    async fn renew(&self, key: &str, holder: &str, ttl: Duration) -> Result<bool, GateError>;

    /// Drop `holder`'s lease on `key`. A no-op when it is not theirs.
    async fn release(&self, key: &str, holder: &str) -> Result<(), GateError>;

    /// Every lease the service knows about, for status reporting.
    async fn leases(&self) -> Result<Vec<LeaseRecord>, GateError> {
        Ok(Vec::new())
    }
}

#[async_trait]
impl LockService for StateStore {
    async fn try_acquire(&self, key: &str, holder: &str, ttl: Duration) -> Result<LockAttempt, GateError> {
        match self.try_acquire_lease(key, holder, ttl, epoch_millis())? {
            LeaseGrant::Acquired(_) => Ok(LockAttempt::Acquired),
            LeaseGrant::Held(current) => Ok(LockAttempt::HeldBy(current.holder)),
        }
    }

    async fn renew(&self, key: &str, holder: &str, ttl: Duration) -> Result<bool, GateError> {
        Ok(self.renew_lease(key, holder, ttl, epoch_millis())?.is_some())
    }

    async fn release(&self, key: &str, holder: &str) -> Result<(), GateError> {
        self.release_lease(key, holder)?;
        Ok(())
    }

    async fn leases(&self) -> Result<Vec<LeaseRecord>, GateError> {
        Ok(self.list_leases()?)
    }
}

#[async_trait]
impl LockService for PgLeaseStore {
    async fn try_acquire(&self, key: &str, holder: &str, ttl: Duration) -> Result<LockAttempt, GateError> {
        match self.try_acquire_lease(key, holder, ttl).await? {
            LeaseGrant::Acquired(_) => Ok(LockAttempt::Acquired),
            LeaseGrant::Held(current) => Ok(LockAttempt::HeldBy(current.holder)),
        }
    }

    async fn renew(&self, key: &str, holder: &str, ttl: Duration) -> Result<bool, GateError> {
        Ok(self.renew_lease(key, holder, ttl).await?.is_some())
    }

    async fn release(&self, key: &str, holder: &str) -> Result<(), GateError> {
        self.release_lease(key, holder).await?;
        Ok(())
    }

    async fn leases(&self) -> Result<Vec<LeaseRecord>, GateError> {
        Ok(self.list_leases().await?)
    }
}

/// Acquires leases on behalf of one session (one process on one node).
pub struct CoordinationGate {
    service: Arc<dyn LockService>,
    holder: String,
    ttl: Duration,
    retry_interval: Duration,
}

impl CoordinationGate {
    pub fn new(service: Arc<dyn LockService>, holder: impl Into<String>, ttl: Duration) -> Result<Self, GateError> {
        if ttl.is_zero() {
            return Err(GateError::InvalidTtl(ttl));
        }
        Ok(Self {
            service,
            holder: holder.into(),
            ttl,
            retry_interval: (ttl / 3).max(MIN_RENEW_PERIOD),
        })
    }

    /// How often a blocked `acquire` polls the service. Defaults to `ttl / 3`.
    pub fn with_retry_interval(mut self, interval: Duration) -> Self {
        self.retry_interval = interval.max(MIN_RENEW_PERIOD);
        self
    }

    /// Session id for a node: unique per process, so a restarted daemon
    /// never mistakes its predecessor's lease for its own.
    pub fn session_id(node_id: &str) -> String {
        format!("{node_id}-{}", std::process::id())
    }

    pub fn holder(&self) -> &str {
        &self.holder
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Single attempt. Fails with `LockUnavailable` if another session holds `key`.
    pub async fn try_acquire(&self, key: &str) -> Result<Lease, GateError> {
        // The service starts the ttl no earlier than this.
        let requested = Instant::now();
        match self.service.try_acquire(key, &self.holder, self.ttl).await? {
            LockAttempt::Acquired => {
                debug!(%key, holder = %self.holder, ttl = ?self.ttl, "lease acquired");
                Ok(Lease::start(key, &self.holder, self.ttl, requested, self.service.clone()))
            }
            LockAttempt::HeldBy(holder) => Err(GateError::LockUnavailable {
                key: key.to_string(),
                holder,
            }),
        }
    }

    /// Wait until `key` is held, or fail with `LockUnavailable` as soon as
    /// `cancelled` completes. Service errors are logged and retried.
    pub async fn acquire_until<F>(&self, key: &str, cancelled: F) -> Result<Lease, GateError>
    where
        F: Future,
    {
        tokio::pin!(cancelled);
        let mut last_holder = String::from("unknown");

        loop {
            match self.try_acquire(key).await {
                Ok(lease) => return Ok(lease),
                Err(GateError::LockUnavailable { holder, .. }) => last_holder = holder,
                Err(e) => warn!(%key, error = %e, "lease acquisition failed, retrying"),
            }

            tokio::select! {
                _ = &mut cancelled => {
                    return Err(GateError::LockUnavailable {
                        key: key.to_string(),
                        holder: last_holder,
                    });
                }
                _ = tokio::time::sleep(self.retry_interval) => {}
            }
        }
    }

    /// Wait at most `wait` for `key`.
    pub async fn acquire(&self, key: &str, wait: Duration) -> Result<Lease, GateError> {
        self.acquire_until(key, tokio::time::sleep(wait)).await
    }

    /// Release this session's lease on `key`, wherever the handle went.
    /// Safe when the lease already expired or moved to another holder.
    pub async fn release(&self, key: &str) -> Result<(), GateError> {
        self.service.release(key, &self.holder).await
    }
}

/// A held lease. Kept alive until [`Lease::release`] or until renewal fails.
///
/// Dropping a `Lease` stops its keepalive without releasing it; the lease
/// then lapses after its TTL, exactly as if the process had died.
pub struct Lease {
    key: String,
    holder: String,
    service: Arc<dyn LockService>,
    held: watch::Receiver<bool>,
    keepalive: JoinHandle<()>,
}

impl Lease {
    fn start(key: &str, holder: &str, ttl: Duration, granted_at: Instant, service: Arc<dyn LockService>) -> Self {
        let (held_tx, held) = watch::channel(true);
        let keepalive = tokio::spawn(run_keepalive(
            key.to_string(),
            holder.to_string(),
            ttl,
            granted_at,
            service.clone(),
            held_tx,
        ));
        Self {
            key: key.to_string(),
            holder: holder.to_string(),
            service,
            held,
            keepalive,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn holder(&self) -> &str {
        &self.holder
    }

    /// False once a renewal was refused, or the session lost contact long
    /// enough that the lease may expire before the next renewal.
    pub fn is_held(&self) -> bool {
        *self.held.borrow()
    }

    /// Stop renewing and give the lease back.
    pub async fn release(self) -> Result<(), GateError> {
        self.keepalive.abort();
        self.service.release(&self.key, &self.holder).await?;
        info!(key = %self.key, holder = %self.holder, "lease released");
        Ok(())
    }
}

impl Drop for Lease {
    fn drop(&mut self) {
        self.keepalive.abort();
    }
}

impl std::fmt::Debug for Lease {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Lease")
            .field("key", &self.key)
            .field("holder", &self.holder)
            .field("held", &self.is_held())
            .finish()
    }
}

/// Renew every `ttl / 3`. `renewed_at` is when the last successful
/// renewal was sent, a lower bound for the service-side expiry minus `ttl`.
/// After a failure the lease is given up once the next renewal would be
/// sent after `renewed_at + ttl - period`, since the service may already
/// have handed the key to someone else by the time it lands.
async fn run_keepalive(
    key: String,
    holder: String,
    ttl: Duration,
    granted_at: Instant,
    service: Arc<dyn LockService>,
    held: watch::Sender<bool>,
) {
    let period = (ttl / 3).max(MIN_RENEW_PERIOD);
    let deadline = ttl.saturating_sub(period);
    let mut renewed_at = granted_at;

    loop {
        tokio::time::sleep(period).await;
        let sent = Instant::now();
        let result = match tokio::time::timeout(period, service.renew(&key, &holder, ttl)).await {
            Ok(result) => result,
            Err(_) => Err(GateError::Service(format!("renewal timed out after {period:?}"))),
        };

        match result {
            Ok(true) => renewed_at = sent,
            Ok(false) => {
                warn!(%key, %holder, "lease renewal refused, lease lost");
                let _ = held.send(false);
                return;
            }
            Err(e) if renewed_at.elapsed() >= deadline => {
                warn!(%key, %holder, error = %e, "lease not renewed in time, lease lost");
                let _ = held.send(false);
                return;
            }
            Err(e) => debug!(%key, error = %e, "lease renewal failed, will retry"),
        }
    }
}
