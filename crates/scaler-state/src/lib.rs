//! scaler-state — lease tables for scalerd's coordination gate.
//!
//! A lease keeps a scaler's evaluation on one instance at a time. Two
//! stores hold them:
//!
//! - [`PgLeaseStore`]: a table in a shared Postgres database. Every daemon
//!   in a cluster points at the same database, and each lease mutation is a
//!   single conditional statement timed by the database clock.
//! - [`StateStore`]: an embedded [redb](https://docs.rs/redb) file for a
//!   single daemon. redb locks the file to one process, so it cannot
//!   coordinate more than one instance.
//!
//! # Architecture
//!
//! Both stores implement the same compare-and-set rules: acquire succeeds
//! when the key is free, expired, or already the caller's; renew only
//! extends an unexpired lease of the same holder; release is holder-scoped.
//! In redb, records are JSON-serialized into `&[u8]` value columns and each
//! mutation runs inside one write transaction.

pub mod error;
pub mod postgres;
pub mod store;
pub mod tables;
pub mod types;

pub use error::{StateError, StateResult};
pub use postgres::{PgLeaseConfig, PgLeaseStore};
pub use store::StateStore;
pub use types::*;
