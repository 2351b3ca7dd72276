//! scalerd — the scaler daemon.
//!
//! Assembles the scaler subsystems into one process:
//! - Lease service: shared Postgres table, or a local redb file for a
//!   single instance
//! - Prometheus metric backend
//! - HTTP action transport
//! - Coordination gate
//! - Scaler manager (one polling task per scaler)
//! - Status API
//!
//! # Usage
//!
//! ```text
//! scalerd run --config /etc/scaler/scalerd.toml --data-dir /var/lib/scaler
//! scalerd check --config /etc/scaler/scalerd.toml
//! ```

pub mod api;
pub mod daemon;
