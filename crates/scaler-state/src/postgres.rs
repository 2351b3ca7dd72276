//! PgLeaseStore — the cluster lease table, shared by every scalerd instance
//! through one Postgres database.
//!
//! ```text
//! scalerd A ──┐                       ┌───────────────── scaler_leases ─────────────────┐
//!             ├── PgPool ──► Postgres │ key │ holder │ acquired_at_ms │ expires_at_ms    │
//! scalerd B ──┘                       └──────────────────────────────────────────────────┘
//! ```
//!
//! Every mutation is one statement, so Postgres' row locks turn
//! acquire/renew/release into atomic compare-and-set operations across
//! processes and hosts. Lease times are read from the database clock
//! (`clock_timestamp()`), never from the caller, so skew between nodes
//! cannot produce two unexpired leases on one key.

use std::time::Duration;

use sqlx::Row;
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use tracing::{debug, info};

use crate::error::{StateError, StateResult, map_err};
use crate::types::{LeaseGrant, LeaseRecord};

/// Upper bound for a lease TTL sent to the database (about 35 years), so
/// `now + ttl` never overflows a `BIGINT`.
const MAX_TTL_MS: i64 = 1 << 40;

/// How many times an acquisition re-reads a key whose holder vanished
/// between the conditional upsert and the lookup.
const ACQUIRE_ROUNDS: usize = 3;

const CREATE_TABLE: &str = r#"
    CREATE TABLE IF NOT EXISTS scaler_leases (
        key            TEXT PRIMARY KEY,
        holder         TEXT NOT NULL,
        acquired_at_ms BIGINT NOT NULL,
        expires_at_ms  BIGINT NOT NULL
    )
"#;

/// Take the key when it is free, expired, or already ours. A foreign
/// unexpired row fails the `WHERE` and the statement returns nothing.
const ACQUIRE: &str = r#"
    WITH clock AS (SELECT (extract(epoch FROM clock_timestamp()) * 1000)::bigint AS now_ms)
    INSERT INTO scaler_leases (key, holder, acquired_at_ms, expires_at_ms)
    SELECT $1, $2, now_ms, now_ms + $3 FROM clock
    ON CONFLICT (key) DO UPDATE SET
        holder = EXCLUDED.holder,
        acquired_at_ms = CASE
            WHEN scaler_leases.holder = EXCLUDED.holder
             AND scaler_leases.expires_at_ms > EXCLUDED.acquired_at_ms
            THEN scaler_leases.acquired_at_ms
            ELSE EXCLUDED.acquired_at_ms
        END,
        expires_at_ms = EXCLUDED.expires_at_ms
    WHERE scaler_leases.holder = EXCLUDED.holder
       OR scaler_leases.expires_at_ms <= EXCLUDED.acquired_at_ms
    RETURNING key, holder, acquired_at_ms, expires_at_ms
"#;

/// An expired lease cannot be revived by renewing it.
const RENEW: &str = r#"
    WITH clock AS (SELECT (extract(epoch FROM clock_timestamp()) * 1000)::bigint AS now_ms)
    UPDATE scaler_leases SET expires_at_ms = clock.now_ms + $3
    FROM clock
    WHERE key = $1 AND holder = $2 AND expires_at_ms > clock.now_ms
    RETURNING key, holder, acquired_at_ms, expires_at_ms
"#;

const RELEASE: &str = "DELETE FROM scaler_leases WHERE key = $1 AND holder = $2";

const SELECT_ONE: &str =
    "SELECT key, holder, acquired_at_ms, expires_at_ms FROM scaler_leases WHERE key = $1";

const SELECT_ALL: &str =
    "SELECT key, holder, acquired_at_ms, expires_at_ms FROM scaler_leases ORDER BY key";

/// Connection settings for the cluster lease table.
#[derive(Debug, Clone)]
pub struct PgLeaseConfig {
    /// Database connection URL.
    pub database_url: String,

    /// Maximum number of connections in the pool.
    pub max_connections: u32,

    /// Minimum number of idle connections.
    pub min_connections: u32,

    /// Connection acquire timeout.
    pub acquire_timeout: Duration,

    /// Idle connection timeout.
    pub idle_timeout: Duration,

    /// Maximum lifetime of a connection.
    pub max_lifetime: Duration,
}

impl PgLeaseConfig {
    pub fn new(database_url: impl Into<String>) -> Self {
        Self {
            database_url: database_url.into(),
            max_connections: 4,
            min_connections: 1,
            acquire_timeout: Duration::from_secs(5),
            idle_timeout: Duration::from_secs(600),
            max_lifetime: Duration::from_secs(1800),
        }
    }
}

/// Lease table in a shared Postgres database. Cheap to clone.
#[derive(Clone)]
pub struct PgLeaseStore {
    pool: PgPool,
}

impl PgLeaseStore {
    /// Connect to the database. Call [`ensure_schema`](Self::ensure_schema)
    /// before the first lease operation.
    pub async fn connect(config: &PgLeaseConfig) -> StateResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(config.acquire_timeout)
            .idle_timeout(Some(config.idle_timeout))
            .max_lifetime(Some(config.max_lifetime))
            .connect(&config.database_url)
            .await
            .map_err(map_err!(Open))?;

        info!(max_connections = config.max_connections, "lease database connected");
        Ok(Self { pool })
    }

    /// Wrap an existing pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create the lease table if it does not exist yet.
    pub async fn ensure_schema(&self) -> StateResult<()> {
        sqlx::query(CREATE_TABLE)
            .execute(&self.pool)
            .await
            .map_err(map_err!(Table))?;
        Ok(())
    }

    /// Check database connectivity.
    pub async fn health_check(&self) -> StateResult<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(map_err!(Database))?;
        Ok(())
    }

    // ── Leases ─────────────────────────────────────────────────────

    /// Try to take the lease on `key` for `holder`. Same rules as
    /// [`StateStore::try_acquire_lease`](crate::StateStore::try_acquire_lease),
    /// timed by the database clock.
    pub async fn try_acquire_lease(&self, key: &str, holder: &str, ttl: Duration) -> StateResult<LeaseGrant> {
        for _ in 0..ACQUIRE_ROUNDS {
            let acquired = sqlx::query(ACQUIRE)
                .bind(key)
                .bind(holder)
                .bind(ttl_param(ttl))
                .fetch_optional(&self.pool)
                .await
                .map_err(map_err!(Write))?;
            if let Some(row) = acquired {
                debug!(%key, %holder, "lease acquired");
                return Ok(LeaseGrant::Acquired(lease_from_row(&row)?));
            }

            // The holder may release between the upsert and this read; go again.
            if let Some(current) = self.get_lease(key).await? {
                return Ok(LeaseGrant::Held(current));
            }
        }

        Err(StateError::Database(format!(
            "lease on {key} kept changing hands during acquisition"
        )))
    }

    /// Extend a lease held by `holder`. `None` when it is missing, expired,
    /// or owned by someone else.
    pub async fn renew_lease(&self, key: &str, holder: &str, ttl: Duration) -> StateResult<Option<LeaseRecord>> {
        let renewed = sqlx::query(RENEW)
            .bind(key)
            .bind(holder)
            .bind(ttl_param(ttl))
            .fetch_optional(&self.pool)
            .await
            .map_err(map_err!(Write))?;

        match renewed {
            Some(row) => Ok(Some(lease_from_row(&row)?)),
            None => {
                debug!(%key, %holder, "lease renewal refused");
                Ok(None)
            }
        }
    }

    /// Release a lease if `holder` still owns it. Returns true if a row was
    /// removed.
    pub async fn release_lease(&self, key: &str, holder: &str) -> StateResult<bool> {
        let result = sqlx::query(RELEASE)
            .bind(key)
            .bind(holder)
            .execute(&self.pool)
            .await
            .map_err(map_err!(Write))?;
        let removed = result.rows_affected() > 0;
        debug!(%key, %holder, removed, "lease released");
        Ok(removed)
    }

    /// Get the lease record for a key, expired or not.
    pub async fn get_lease(&self, key: &str) -> StateResult<Option<LeaseRecord>> {
        let row = sqlx::query(SELECT_ONE)
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_err!(Read))?;
        row.as_ref().map(lease_from_row).transpose()
    }

    /// List all lease records, sorted by key.
    pub async fn list_leases(&self) -> StateResult<Vec<LeaseRecord>> {
        let rows = sqlx::query(SELECT_ALL)
            .fetch_all(&self.pool)
            .await
            .map_err(map_err!(Read))?;
        rows.iter().map(lease_from_row).collect()
    }
}

fn ttl_param(ttl: Duration) -> i64 {
    i64::try_from(ttl.as_millis()).unwrap_or(MAX_TTL_MS).min(MAX_TTL_MS)
}

fn lease_from_row(row: &PgRow) -> StateResult<LeaseRecord> {
    let millis = |column: &str| -> StateResult<u64> {
        let value: i64 = row.try_get(column).map_err(map_err!(Deserialize))?;
        Ok(u64::try_from(value).unwrap_or(0))
    };

    Ok(LeaseRecord {
        key: row.try_get("key").map_err(map_err!(Deserialize))?,
        holder: row.try_get("holder").map_err(map_err!(Deserialize))?,
        acquired_at_ms: millis("acquired_at_ms")?,
        expires_at_ms: millis("expires_at_ms")?,
    })
}
