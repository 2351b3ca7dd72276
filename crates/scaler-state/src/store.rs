//! StateStore — redb-backed lease persistence for a single scalerd instance.
//!
//! A redb file can only be opened by one process, so this store coordinates
//! the scalers of one daemon and nothing more. Clusters use
//! [`PgLeaseStore`](crate::PgLeaseStore) instead. Each mutating operation reads
//! the current record and writes the new one inside one write transaction,
//! which makes acquire/renew/release atomic compare-and-set operations.
//! The store supports both on-disk and in-memory backends (the latter for
//! testing).

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use redb::{Database, ReadableDatabase, ReadableTable, Table};
use tracing::debug;

use crate::error::{StateResult, map_err};
use crate::tables::*;
use crate::types::*;

/// Thread-safe state store backed by redb.
#[derive(Clone)]
pub struct StateStore {
    db: Arc<Database>,
}

impl StateStore {
    /// Open (or create) a persistent state store at the given path.
    pub fn open(path: &Path) -> StateResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!(?path, "state store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory state store (for testing).
    pub fn open_in_memory() -> StateResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!("in-memory state store opened");
        Ok(store)
    }

    fn ensure_tables(&self) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        // Opening a table in a write transaction creates it if absent.
        txn.open_table(LEASES).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    // ── Leases ─────────────────────────────────────────────────────

    /// Try to take the lease on `key` for `holder`.
    ///
    /// Succeeds when the key is free, expired, or already held by `holder`
    /// (in which case the expiry is pushed out and `acquired_at_ms` kept).
    pub fn try_acquire_lease(
        &self,
        key: &str,
        holder: &str,
        ttl: Duration,
        now_ms: u64,
    ) -> StateResult<LeaseGrant> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let grant = {
            let mut table = txn.open_table(LEASES).map_err(map_err!(Table))?;
            match read_lease(&table, key)? {
                Some(lease) if lease.holder != holder && !lease.is_expired(now_ms) => {
                    LeaseGrant::Held(lease)
                }
                current => {
                    let acquired_at_ms = match current {
                        Some(lease) if !lease.is_expired(now_ms) => lease.acquired_at_ms,
                        _ => now_ms,
                    };
                    let record = LeaseRecord {
                        key: key.to_string(),
                        holder: holder.to_string(),
                        acquired_at_ms,
                        expires_at_ms: now_ms.saturating_add(ttl_millis(ttl)),
                    };
                    write_lease(&mut table, &record)?;
                    LeaseGrant::Acquired(record)
                }
            }
        };

        if grant.is_acquired() {
            txn.commit().map_err(map_err!(Transaction))?;
            debug!(%key, %holder, "lease acquired");
        } else {
            txn.abort().map_err(map_err!(Transaction))?;
        }
        Ok(grant)
    }

    /// Extend a lease held by `holder`.
    ///
    /// Returns `None` when the lease is missing, expired, or owned by
    /// someone else; an expired lease cannot be revived by renewing it.
    pub fn renew_lease(
        &self,
        key: &str,
        holder: &str,
        ttl: Duration,
        now_ms: u64,
    ) -> StateResult<Option<LeaseRecord>> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let renewed = {
            let mut table = txn.open_table(LEASES).map_err(map_err!(Table))?;
            match read_lease(&table, key)? {
                Some(mut lease) if lease.holder == holder && !lease.is_expired(now_ms) => {
                    lease.expires_at_ms = now_ms.saturating_add(ttl_millis(ttl));
                    write_lease(&mut table, &lease)?;
                    Some(lease)
                }
                _ => None,
            }
        };

        if renewed.is_some() {
            txn.commit().map_err(map_err!(Transaction))?;
        } else {
            txn.abort().map_err(map_err!(Transaction))?;
            debug!(%key, %holder, "lease renewal refused");
        }
        Ok(renewed)
    }

    /// Release a lease if `holder` still owns it. Returns true if a record
    /// was removed; releasing an expired or foreign lease is a no-op.
    pub fn release_lease(&self, key: &str, holder: &str) -> StateResult<bool> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let removed = {
            let mut table = txn.open_table(LEASES).map_err(map_err!(Table))?;
            match read_lease(&table, key)? {
                Some(lease) if lease.holder == holder => {
                    table.remove(key).map_err(map_err!(Write))?;
                    true
                }
                _ => false,
            }
        };
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(%key, %holder, removed, "lease released");
        Ok(removed)
    }

    /// Get the lease record for a key, expired or not.
    pub fn get_lease(&self, key: &str) -> StateResult<Option<LeaseRecord>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(LEASES).map_err(map_err!(Table))?;
        match table.get(key).map_err(map_err!(Read))? {
            Some(guard) => {
                let lease: LeaseRecord =
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                Ok(Some(lease))
            }
            None => Ok(None),
        }
    }

    /// List all lease records.
    pub fn list_leases(&self) -> StateResult<Vec<LeaseRecord>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(LEASES).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (_, value) = entry.map_err(map_err!(Read))?;
            let lease: LeaseRecord =
                serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
            results.push(lease);
        }
        Ok(results)
    }
}

type LeaseTable<'txn> = Table<'txn, &'static str, &'static [u8]>;

fn read_lease(table: &LeaseTable<'_>, key: &str) -> StateResult<Option<LeaseRecord>> {
    match table.get(key).map_err(map_err!(Read))? {
        Some(guard) => {
            let lease = serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
            Ok(Some(lease))
        }
        None => Ok(None),
    }
}

fn write_lease(table: &mut LeaseTable<'_>, lease: &LeaseRecord) -> StateResult<()> {
    let value = serde_json::to_vec(lease).map_err(map_err!(Serialize))?;
    table
        .insert(lease.key.as_str(), value.as_slice())
        .map_err(map_err!(Write))?;
    Ok(())
}
