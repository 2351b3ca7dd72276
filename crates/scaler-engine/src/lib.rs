//! scaler-engine — the scaler control loop.
//!
//! Each registered scaler runs its own polling task. On every tick the task
//! makes sure this instance holds the scaler's cluster lease, queries the
//! metric backend, feeds the result into the scaler's alert state machine
//! and, once the condition has held for `duration` and the scaler is not
//! cooling down, dispatches all configured actions concurrently.
//!
//! # Architecture
//!
//! ```text
//! ScalerManager
//!   └── ScalerHandle (one per scaler)
//!         └── polling task
//!               ├── CoordinationGate → Lease (kept alive by a session task)
//!               ├── MetricsBackend::query_instant()
//!               ├── Alert (evaluation lock: tokio Mutex)
//!               └── ActionExecutor → ActionTransport (one task per action)
//! ```
//!
//! # Timing
//!
//! ```text
//! condition true ──► start()           started_at = now
//! now - started_at >= duration ──► fire eligible
//! now - fired_at  <= cooldown  ──► cooling, no dispatch
//! empty result ──► reset()           started_at, fired_at cleared
//! ```

pub mod alert;
pub mod error;
pub mod executor;
pub mod gate;
pub mod manager;
pub mod scaler;

pub use alert::{Alert, AlertPhase};
pub use error::{DispatchError, GateError, TransportError};
pub use executor::{ActionExecutor, ActionOutcome, ActionTransport, DispatchReport, HttpTransport, RetryPolicy};
pub use gate::{CoordinationGate, Lease, LockAttempt, LockService};
pub use manager::{ScalerManager, SyncSummary};
pub use scaler::{Scaler, ScalerHandle, ScalerStatus, TickOutcome};
