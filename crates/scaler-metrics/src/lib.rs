//! scaler-metrics — metric backends consumed by the scaler control loop.
//!
//! A backend answers instant queries: given a query string and an
//! evaluation time it returns a (possibly empty) set of samples. The
//! control loop treats a non-empty result as "condition holds"; an error is
//! never interpreted as a false condition.
//!
//! # Architecture
//!
//! ```text
//! MetricsBackend (trait)
//!   └── PrometheusBackend → GET {address}/api/v1/query?query=..&time=..
//! ```

pub mod backend;
pub mod prometheus;

pub use backend::{BackendError, MetricsBackend, QueryResult, Sample};
pub use prometheus::PrometheusBackend;
