//! Scaler manager — owns the set of running scalers.
//!
//! The `ScalerManager` starts one [`Scaler`] task per registered policy and
//! keeps their handles keyed by scaler id. Configuration reloads go through
//! [`ScalerManager::sync`], which only restarts scalers whose policy changed.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::RwLock;
use tracing::{debug, info};

use scaler_core::ScalerSpec;
use scaler_metrics::MetricsBackend;

use crate::executor::ActionExecutor;
use crate::gate::CoordinationGate;
use crate::scaler::{Scaler, ScalerHandle, ScalerStatus};

/// What a [`ScalerManager::sync`] changed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncSummary {
    pub started: Vec<String>,
    pub restarted: Vec<String>,
    pub stopped: Vec<String>,
    pub unchanged: usize,
}

/// Manages the polling tasks of all configured scalers.
pub struct ScalerManager {
    backend: Arc<dyn MetricsBackend>,
    executor: ActionExecutor,
    gate: Option<Arc<CoordinationGate>>,
    /// Running scalers: scaler_id → handle.
    scalers: Arc<RwLock<HashMap<String, ScalerHandle>>>,
}

impl ScalerManager {
    pub fn new(backend: Arc<dyn MetricsBackend>, executor: ActionExecutor) -> Self {
        Self {
            backend,
            executor,
            gate: None,
            scalers: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Gate every scaler started from now on behind the cluster lease.
    pub fn with_gate(mut self, gate: Arc<CoordinationGate>) -> Self {
        self.gate = Some(gate);
        self
    }

    /// Start a scaler. An existing scaler with the same id is stopped first,
    /// and fully exits before its replacement starts.
    pub async fn register(&self, spec: ScalerSpec) {
        let id = spec.id.clone();
        self.stop_one(&id).await;

        let handle = self.build(spec).start();
        let previous = self.scalers.write().await.insert(id.clone(), handle);
        if let Some(previous) = previous {
            // Lost a race with a concurrent register of the same id.
            previous.stop().await;
        }
        info!(scaler = %id, "scaler registered");
    }

    /// Stop and forget a scaler. Returns false if it was not registered.
    pub async fn unregister(&self, id: &str) -> bool {
        let stopped = self.stop_one(id).await;
        if stopped {
            info!(scaler = %id, "scaler unregistered");
        }
        stopped
    }

    /// Converge on `specs`: start new scalers, restart changed ones, stop
    /// the ones that disappeared. Unchanged scalers keep their alert state.
    pub async fn sync(&self, specs: Vec<ScalerSpec>) -> SyncSummary {
        let mut summary = SyncSummary::default();
        let wanted: HashSet<String> = specs.iter().map(|s| s.id.clone()).collect();

        for id in self.ids().await {
            if !wanted.contains(&id) {
                self.stop_one(&id).await;
                summary.stopped.push(id);
            }
        }

        for spec in specs {
            let current = {
                let scalers = self.scalers.read().await;
                scalers.get(&spec.id).map(|h| h.spec().clone())
            };
            match current {
                Some(current) if current == spec => summary.unchanged += 1,
                Some(_) => {
                    summary.restarted.push(spec.id.clone());
                    self.register(spec).await;
                }
                None => {
                    summary.started.push(spec.id.clone());
                    self.register(spec).await;
                }
            }
        }

        info!(
            started = summary.started.len(),
            restarted = summary.restarted.len(),
            stopped = summary.stopped.len(),
            unchanged = summary.unchanged,
            "scalers synced"
        );
        summary
    }

    /// Stop every scaler (for graceful shutdown). Leases are released as
    /// each loop exits.
    pub async fn stop_all(&self) {
        let handles: Vec<ScalerHandle> = {
            let mut scalers = self.scalers.write().await;
            scalers.drain().map(|(_, h)| h).collect()
        };
        for handle in &handles {
            handle.stop().await;
            debug!(scaler = %handle.id(), "scaler stopped");
        }
        info!(count = handles.len(), "all scalers stopped");
    }

    /// Registered scaler ids, sorted.
    pub async fn ids(&self) -> Vec<String> {
        let scalers = self.scalers.read().await;
        let mut ids: Vec<String> = scalers.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub async fn is_registered(&self, id: &str) -> bool {
        self.scalers.read().await.contains_key(id)
    }

    /// Status of every scaler, sorted by id.
    pub async fn status(&self) -> Vec<ScalerStatus> {
        let scalers = self.scalers.read().await;
        let mut statuses: Vec<ScalerStatus> = scalers.values().map(ScalerHandle::status).collect();
        statuses.sort_by(|a, b| a.id.cmp(&b.id));
        statuses
    }

    pub async fn status_of(&self, id: &str) -> Option<ScalerStatus> {
        self.scalers.read().await.get(id).map(ScalerHandle::status)
    }

    fn build(&self, spec: ScalerSpec) -> Scaler {
        let scaler = Scaler::new(spec, self.backend.clone(), self.executor.clone());
        match &self.gate {
            Some(gate) => scaler.with_gate(gate.clone()),
            None => scaler,
        }
    }

    /// Remove a scaler from the map, then wait for it outside the lock.
    async fn stop_one(&self, id: &str) -> bool {
        let handle = self.scalers.write().await.remove(id);
        match handle {
            Some(handle) => {
                handle.stop().await;
                true
            }
            None => false,
        }
    }
}
