//! Action executor — concurrent dispatch of scale actions with retries.
//!
//! Every action of a firing scaler runs in its own task. Timeouts are
//! retried according to the action's [`RetryPolicy`]; any other error ends
//! that action immediately. Failures are isolated: one action giving up
//! never cancels or delays its siblings. [`ActionExecutor::execute`]
//! returns only after every action has reached a terminal outcome.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use scaler_core::{ActionSpec, DelayType};

use crate::error::{DispatchError, TransportError};

/// Sends a single attempt of an action.
#[async_trait]
pub trait ActionTransport: Send + Sync {
    async fn send(&self, action: &ActionSpec) -> Result<(), TransportError>;
}

/// Plain HTTP transport: method and URL from the action, no body, fixed
/// per-attempt timeout. Any response counts as delivered; the status code
/// and body are not inspected.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new(timeout: Duration) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| TransportError::Terminal(e.to_string()))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl ActionTransport for HttpTransport {
    async fn send(&self, action: &ActionSpec) -> Result<(), TransportError> {
        let response = self
            .client
            .request(action.method.clone(), action.url.as_str())
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    TransportError::Timeout(e.to_string())
                } else {
                    TransportError::Terminal(e.to_string())
                }
            })?;
        debug!(url = %action.url, status = %response.status(), "scale action response");
        Ok(())
    }
}

/// Retry schedule for one action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub attempts: u32,
    pub delay: Duration,
    pub delay_type: DelayType,
}

impl RetryPolicy {
    /// Delay before retry number `retry` (0-based).
    pub fn delay_for(&self, retry: u32) -> Duration {
        match self.delay_type {
            DelayType::Fixed => self.delay,
            DelayType::Backoff => {
                let factor = 1u32.checked_shl(retry).unwrap_or(u32::MAX);
                self.delay.saturating_mul(factor)
            }
        }
    }
}

impl From<&ActionSpec> for RetryPolicy {
    fn from(action: &ActionSpec) -> Self {
        Self {
            attempts: action.attempts.max(1),
            delay: action.delay,
            delay_type: action.delay_type,
        }
    }
}

/// Terminal outcome of one action.
#[derive(Debug, Clone)]
pub struct ActionOutcome {
    /// Position of the action in the scaler's configuration.
    pub index: usize,
    pub url: String,
    pub method: String,
    /// Attempts made.
    pub attempts: u32,
    /// Delivery instant on success.
    pub result: Result<Instant, DispatchError>,
}

impl ActionOutcome {
    pub fn delivered_at(&self) -> Option<Instant> {
        self.result.as_ref().ok().copied()
    }

    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }
}

/// Outcomes of one fire, in completion order.
#[derive(Debug, Clone, Default)]
pub struct DispatchReport {
    pub outcomes: Vec<ActionOutcome>,
}

impl DispatchReport {
    pub fn succeeded(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_success()).count()
    }

    pub fn failed(&self) -> usize {
        self.outcomes.len() - self.succeeded()
    }

    /// Delivery instants of the successful actions, in completion order.
    pub fn delivered_at(&self) -> impl Iterator<Item = Instant> + '_ {
        self.outcomes.iter().filter_map(ActionOutcome::delivered_at)
    }
}

/// Fans a scaler's actions out over a shared transport.
#[derive(Clone)]
pub struct ActionExecutor {
    transport: Arc<dyn ActionTransport>,
}

impl ActionExecutor {
    pub fn new(transport: Arc<dyn ActionTransport>) -> Self {
        Self { transport }
    }

    /// Dispatch all `actions` concurrently and wait for every one of them.
    pub async fn execute(&self, scaler_id: &str, actions: &[ActionSpec]) -> DispatchReport {
        // Each task joins the set as it is spawned, before any join happens.
        let mut tasks = JoinSet::new();
        for (index, action) in actions.iter().cloned().enumerate() {
            let transport = self.transport.clone();
            let scaler_id = scaler_id.to_string();
            tasks.spawn(async move { dispatch_one(transport.as_ref(), &scaler_id, index, action).await });
        }

        let mut outcomes = Vec::with_capacity(actions.len());
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(outcome) => outcomes.push(outcome),
                Err(e) => error!(scaler = %scaler_id, error = %e, "scale action task failed"),
            }
        }

        // Tasks that panicked never produced an outcome; report them too.
        for (index, action) in actions.iter().enumerate() {
            if !outcomes.iter().any(|o| o.index == index) {
                outcomes.push(ActionOutcome {
                    index,
                    url: action.url.clone(),
                    method: action.method.to_string(),
                    attempts: 0,
                    result: Err(DispatchError::Aborted("task did not complete".to_string())),
                });
            }
        }

        let report = DispatchReport { outcomes };
        info!(
            scaler = %scaler_id,
            succeeded = report.succeeded(),
            failed = report.failed(),
            "scale actions dispatched"
        );
        report
    }
}

async fn dispatch_one(
    transport: &dyn ActionTransport,
    scaler_id: &str,
    index: usize,
    action: ActionSpec,
) -> ActionOutcome {
    let policy = RetryPolicy::from(&action);
    let mut attempt = 0;

    let result = loop {
        attempt += 1;
        match transport.send(&action).await {
            Ok(()) => {
                info!(
                    scaler = %scaler_id,
                    url = %action.url,
                    method = %action.method,
                    attempt,
                    "scale action delivered"
                );
                break Ok(Instant::now());
            }
            Err(TransportError::Timeout(e)) if attempt < policy.attempts => {
                let delay = policy.delay_for(attempt - 1);
                warn!(
                    scaler = %scaler_id,
                    url = %action.url,
                    attempt,
                    retry_in = ?delay,
                    error = %e,
                    "scale action timed out, retrying"
                );
                tokio::time::sleep(delay).await;
            }
            Err(TransportError::Timeout(e)) => {
                break Err(DispatchError::Exhausted {
                    attempts: attempt,
                    last: e,
                });
            }
            Err(TransportError::Terminal(e)) => {
                break Err(DispatchError::Terminal { attempt, error: e });
            }
        }
    };

    if let Err(e) = &result {
        error!(scaler = %scaler_id, url = %action.url, error = %e, "scale action failed");
    }

    ActionOutcome {
        index,
        url: action.url.clone(),
        method: action.method.to_string(),
        attempts: attempt,
        result,
    }
}
