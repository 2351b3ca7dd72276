//! Scaler controller — the per-scaler polling loop.
//!
//! A [`Scaler`] owns one policy, its alert state and (optionally) its
//! cluster lease. [`Scaler::start`] moves it onto a tokio task and returns
//! a [`ScalerHandle`] used to observe and stop it.
//!
//! A gated scaler that does not own its lease waits for it in
//! [`CoordinationGate::acquire_until`] (cancelled by `stop`) instead of
//! ticking. Once it owns the lease, each tick:
//!
//! ```text
//! inactive? ──► skip
//! lease held (or acquired)? ──no──► skip (another instance evaluates)
//! lock alert
//!   query ──err──► skip, alert untouched
//!   empty ──► reset
//!   start window (no-op if open)
//!   held < duration ──► pending
//!   cooling ──► cooling
//!   lease still held? ──no──► reset, skip
//!   dispatch all actions, fire() per delivery
//! unlock alert
//! ```

use std::sync::Arc;
use std::time::SystemTime;

use serde::Serialize;
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use scaler_core::ScalerSpec;
use scaler_metrics::MetricsBackend;

use crate::alert::{Alert, AlertPhase};
use crate::error::GateError;
use crate::executor::{ActionExecutor, DispatchReport};
use crate::gate::{CoordinationGate, Lease};

/// What a single tick did.
#[derive(Debug)]
pub enum TickOutcome {
    /// Policy disabled; nothing was queried.
    Inactive,
    /// Another instance holds the scaler's lease.
    Skipped,
    /// Backend query failed; alert state unchanged.
    QueryFailed(String),
    /// Condition not observed; alert reset.
    Reset,
    /// Condition holds but not yet for `duration`.
    Pending,
    /// Fire suppressed by cooldown.
    Cooling,
    /// Actions dispatched.
    Fired(DispatchReport),
}

/// A scaling policy bound to its collaborators.
pub struct Scaler {
    spec: Arc<ScalerSpec>,
    alert: Arc<Mutex<Alert>>,
    backend: Arc<dyn MetricsBackend>,
    executor: ActionExecutor,
    gate: Option<Arc<CoordinationGate>>,
    lease: Option<Lease>,
}

impl Scaler {
    pub fn new(spec: ScalerSpec, backend: Arc<dyn MetricsBackend>, executor: ActionExecutor) -> Self {
        Self {
            spec: Arc::new(spec),
            alert: Arc::new(Mutex::new(Alert::new())),
            backend,
            executor,
            gate: None,
            lease: None,
        }
    }

    /// Only evaluate while holding the cluster lease keyed by the scaler id.
    pub fn with_gate(mut self, gate: Arc<CoordinationGate>) -> Self {
        self.gate = Some(gate);
        self
    }

    pub fn id(&self) -> &str {
        &self.spec.id
    }

    pub fn spec(&self) -> &ScalerSpec {
        &self.spec
    }

    /// Spawn the polling loop. The first tick happens one interval from now.
    pub fn start(self) -> ScalerHandle {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let spec = self.spec.clone();
        let alert = self.alert.clone();
        let task = tokio::spawn(self.run(shutdown_rx));

        info!(scaler = %spec.id, interval = ?spec.interval, active = spec.active, "scaler started");
        ScalerHandle {
            spec,
            alert,
            shutdown_tx,
            task: Mutex::new(Some(task)),
        }
    }

    async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        let period = self.spec.interval;
        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            if *shutdown.borrow() {
                break;
            }
            if !self.wait_for_lease(&mut shutdown).await {
                break;
            }
            tokio::select! {
                _ = ticker.tick() => {}
                _ = shutdown.changed() => break,
            }
            if *shutdown.borrow() {
                break;
            }
            self.tick().await;
        }

        self.release_lease().await;
        debug!(scaler = %self.spec.id, "scaler loop exited");
    }

    /// Run one evaluation step.
    pub async fn tick(&mut self) -> TickOutcome {
        if !self.spec.active {
            return TickOutcome::Inactive;
        }
        if !self.ensure_lease().await {
            return TickOutcome::Skipped;
        }

        let id = &self.spec.id;
        let alert = self.alert.clone();
        let mut alert = alert.lock().await;

        let result = match self.backend.query_instant(&self.spec.query, SystemTime::now()).await {
            Ok(result) => result,
            Err(e) => {
                warn!(scaler = %id, error = %e, "metric query failed, skipping tick");
                return TickOutcome::QueryFailed(e.to_string());
            }
        };

        let now = Instant::now();
        if result.is_empty() {
            if alert.is_active() {
                info!(scaler = %id, "condition cleared, alert reset");
            }
            alert.reset();
            return TickOutcome::Reset;
        }

        if !alert.is_active() {
            info!(scaler = %id, samples = result.len(), "condition observed, alert pending");
        }
        alert.start(now);

        if !alert.should_fire(self.spec.duration, now) {
            debug!(scaler = %id, "alert pending");
            return TickOutcome::Pending;
        }
        if alert.is_cooling_down(self.spec.cooldown, now) {
            debug!(scaler = %id, "alert cooling down");
            return TickOutcome::Cooling;
        }
        if !self.lease_held() {
            warn!(scaler = %id, "lease lost before dispatch, alert reset");
            alert.reset();
            return TickOutcome::Skipped;
        }

        info!(scaler = %id, actions = self.spec.actions.len(), "alert firing, dispatching actions");
        let report = self.executor.execute(id, &self.spec.actions).await;
        for delivered in report.delivered_at() {
            alert.fire(delivered);
        }
        TickOutcome::Fired(report)
    }

    fn lease_held(&self) -> bool {
        match (&self.gate, &self.lease) {
            (None, _) => true,
            (Some(_), Some(lease)) => lease.is_held(),
            (Some(_), None) => false,
        }
    }

    /// Block until this instance owns the scaler's lease. False when
    /// shutdown was requested first.
    async fn wait_for_lease(&mut self, shutdown: &mut watch::Receiver<bool>) -> bool {
        let Some(gate) = self.gate.clone() else {
            return true;
        };
        if !self.spec.active {
            return true;
        }
        self.drop_lost_lease().await;
        if self.lease.is_some() {
            return true;
        }

        debug!(scaler = %self.spec.id, "waiting for lease");
        match gate.acquire_until(&self.spec.id, shutdown.changed()).await {
            Ok(lease) => {
                self.adopt_lease(lease).await;
                true
            }
            Err(e) => {
                debug!(scaler = %self.spec.id, error = %e, "stopped while waiting for lease");
                false
            }
        }
    }

    /// Make sure this instance holds the scaler's lease, with a single
    /// attempt.
    async fn ensure_lease(&mut self) -> bool {
        let Some(gate) = self.gate.clone() else {
            return true;
        };
        self.drop_lost_lease().await;
        if self.lease.is_some() {
            return true;
        }

        match gate.try_acquire(&self.spec.id).await {
            Ok(lease) => {
                self.adopt_lease(lease).await;
                true
            }
            Err(GateError::LockUnavailable { holder, .. }) => {
                debug!(scaler = %self.spec.id, %holder, "lease held elsewhere, skipping tick");
                false
            }
            Err(e) => {
                warn!(scaler = %self.spec.id, error = %e, "lease acquisition failed, skipping tick");
                false
            }
        }
    }

    /// The alert restarts from scratch whenever ownership changes, since
    /// another instance may have evaluated the scaler in between.
    async fn adopt_lease(&mut self, lease: Lease) {
        info!(scaler = %self.spec.id, holder = %lease.holder(), "lease acquired");
        self.lease = Some(lease);
        self.alert.lock().await.reset();
    }

    async fn drop_lost_lease(&mut self) {
        if self.lease.as_ref().is_some_and(|lease| !lease.is_held()) {
            warn!(scaler = %self.spec.id, "lease lost, alert reset");
            self.lease = None;
            self.alert.lock().await.reset();
        }
    }

    async fn release_lease(&mut self) {
        if let Some(lease) = self.lease.take() {
            if let Err(e) = lease.release().await {
                warn!(scaler = %self.spec.id, error = %e, "failed to release lease");
            }
        }
    }
}

/// Point-in-time view of a running scaler.
#[derive(Debug, Clone, Serialize)]
pub struct ScalerStatus {
    pub id: String,
    pub query: String,
    pub active: bool,
    /// `None` while a tick holds the alert.
    pub phase: Option<AlertPhase>,
    /// Seconds since the condition was first observed in the current window.
    pub pending_secs: Option<f64>,
    pub since_fired_secs: Option<f64>,
    /// A tick is evaluating or dispatching right now.
    pub evaluating: bool,
}

/// Handle to a started scaler.
pub struct ScalerHandle {
    spec: Arc<ScalerSpec>,
    alert: Arc<Mutex<Alert>>,
    shutdown_tx: watch::Sender<bool>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl ScalerHandle {
    pub fn id(&self) -> &str {
        &self.spec.id
    }

    pub fn spec(&self) -> &ScalerSpec {
        &self.spec
    }

    /// Signal the loop to stop and wait until it has exited, including any
    /// tick in flight. Safe to call more than once, also concurrently.
    pub async fn stop(&self) {
        let _ = self.shutdown_tx.send(true);

        let mut task = self.task.lock().await;
        if let Some(handle) = task.take() {
            if let Err(e) = handle.await {
                error!(scaler = %self.spec.id, error = %e, "scaler task failed");
            }
            info!(scaler = %self.spec.id, "scaler stopped");
        }
    }

    pub fn is_stopped(&self) -> bool {
        *self.shutdown_tx.borrow()
    }

    pub fn status(&self) -> ScalerStatus {
        let now = Instant::now();
        let mut status = ScalerStatus {
            id: self.spec.id.clone(),
            query: self.spec.query.clone(),
            active: self.spec.active,
            phase: None,
            pending_secs: None,
            since_fired_secs: None,
            evaluating: true,
        };

        if let Ok(alert) = self.alert.try_lock() {
            status.evaluating = false;
            status.phase = Some(alert.phase(self.spec.duration, self.spec.cooldown, now));
            status.pending_secs = alert
                .started_at()
                .map(|t| now.saturating_duration_since(t).as_secs_f64());
            status.since_fired_secs = alert
                .fired_at()
                .map(|t| now.saturating_duration_since(t).as_secs_f64());
        }
        status
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    use std::collections::{BTreeMap, VecDeque};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;
    use scaler_core::DelayType;
    use scaler_metrics::{BackendError, QueryResult, Sample};
    use scaler_state::StateStore;

    use crate::executor::tests::{ScriptedTransport, action};

    /// Backend replaying a script; once exhausted it keeps answering with
    /// the last configured default.
    pub(crate) struct ScriptedBackend {
        script: std::sync::Mutex<VecDeque<Result<QueryResult, BackendError>>>,
        firing: std::sync::atomic::AtomicBool,
        latency: Duration,
        pub(crate) calls: AtomicUsize,
        pub(crate) completed: AtomicUsize,
    }

    impl ScriptedBackend {
        pub(crate) fn firing() -> Self {
            Self::with_default(true)
        }

        pub(crate) fn quiet() -> Self {
            Self::with_default(false)
        }

        fn with_default(firing: bool) -> Self {
            Self {
                script: std::sync::Mutex::new(VecDeque::new()),
                firing: std::sync::atomic::AtomicBool::new(firing),
                latency: Duration::ZERO,
                calls: AtomicUsize::new(0),
                completed: AtomicUsize::new(0),
            }
        }

        pub(crate) fn with_latency(mut self, latency: Duration) -> Self {
            self.latency = latency;
            self
        }

        pub(crate) fn push(&self, result: Result<QueryResult, BackendError>) {
            self.script.lock().unwrap().push_back(result);
        }

        pub(crate) fn set_firing(&self, firing: bool) {
            self.firing.store(firing, Ordering::SeqCst);
        }

        pub(crate) fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    pub(crate) fn sample() -> QueryResult {
        vec![Sample {
            labels: BTreeMap::from([("job".to_string(), "api".to_string())]),
            timestamp: 0.0,
            value: 1.0,
        }]
    }

    #[async_trait]
    impl MetricsBackend for ScriptedBackend {
        async fn query_instant(&self, _query: &str, _at: SystemTime) -> Result<QueryResult, BackendError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if !self.latency.is_zero() {
                tokio::time::sleep(self.latency).await;
            }
            let scripted = self.script.lock().unwrap().pop_front();
            let result = scripted.unwrap_or_else(|| {
                if self.firing.load(Ordering::SeqCst) {
                    Ok(sample())
                } else {
                    Ok(Vec::new())
                }
            });
            self.completed.fetch_add(1, Ordering::SeqCst);
            result
        }
    }

    pub(crate) fn spec(id: &str, interval: u64, duration: u64, cooldown: u64) -> ScalerSpec {
        ScalerSpec {
            id: id.to_string(),
            query: "cpu_usage > 0.8".to_string(),
            interval: Duration::from_secs(interval),
            duration: Duration::from_secs(duration),
            cooldown: Duration::from_secs(cooldown),
            active: true,
            actions: vec![action("http://scale/up", 1, Duration::from_secs(1), DelayType::Fixed)],
        }
    }

    fn scaler(spec: ScalerSpec, backend: &Arc<ScriptedBackend>, transport: &Arc<ScriptedTransport>) -> Scaler {
        Scaler::new(spec, backend.clone(), ActionExecutor::new(transport.clone()))
    }

    fn secs(n: u64) -> Duration {
        Duration::from_secs(n)
    }

    #[tokio::test(start_paused = true)]
    async fn fires_after_duration_and_respects_cooldown() {
        let backend = Arc::new(ScriptedBackend::firing());
        let transport = Arc::new(ScriptedTransport::default());
        let mut scaler = scaler(spec("s1", 10, 30, 60), &backend, &transport);
        let t0 = Instant::now();

        let mut outcomes = Vec::new();
        for t in (0..=100).step_by(10) {
            tokio::time::advance(t0 + secs(t) - Instant::now()).await;
            let fired = matches!(scaler.tick().await, TickOutcome::Fired(_));
            outcomes.push((t, fired));
        }

        let fired_at: Vec<u64> = outcomes.iter().filter(|(_, f)| *f).map(|(t, _)| *t).collect();
        // 30: first tick held >= 30s. 90 is still inside the inclusive cooldown.
        assert_eq!(fired_at, vec![30, 100]);
        assert_eq!(transport.calls_to("http://scale/up"), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn empty_result_restarts_window() {
        let backend = Arc::new(ScriptedBackend::firing());
        let transport = Arc::new(ScriptedTransport::default());
        let mut scaler = scaler(spec("s1", 10, 30, 60), &backend, &transport);
        let t0 = Instant::now();

        backend.push(Ok(sample()));
        backend.push(Ok(sample()));
        backend.push(Ok(Vec::new()));

        assert!(matches!(scaler.tick().await, TickOutcome::Pending));
        tokio::time::advance(secs(10)).await;
        assert!(matches!(scaler.tick().await, TickOutcome::Pending));
        tokio::time::advance(secs(10)).await;
        assert!(matches!(scaler.tick().await, TickOutcome::Reset));
        assert!(scaler.alert.lock().await.started_at().is_none());

        tokio::time::advance(secs(10)).await;
        assert!(matches!(scaler.tick().await, TickOutcome::Pending));
        assert_eq!(scaler.alert.lock().await.started_at(), Some(t0 + secs(30)));

        for _ in 0..2 {
            tokio::time::advance(secs(10)).await;
            assert!(matches!(scaler.tick().await, TickOutcome::Pending));
        }
        tokio::time::advance(secs(10)).await;
        assert!(matches!(scaler.tick().await, TickOutcome::Fired(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn query_error_leaves_alert_untouched() {
        let backend = Arc::new(ScriptedBackend::firing());
        let transport = Arc::new(ScriptedTransport::default());
        let mut scaler = scaler(spec("s1", 10, 30, 60), &backend, &transport);
        let t0 = Instant::now();

        assert!(matches!(scaler.tick().await, TickOutcome::Pending));
        backend.push(Err(BackendError::Timeout(secs(10))));
        tokio::time::advance(secs(10)).await;
        assert!(matches!(scaler.tick().await, TickOutcome::QueryFailed(_)));

        let alert = scaler.alert.lock().await;
        assert!(alert.is_active());
        assert_eq!(alert.started_at(), Some(t0));
    }

    #[tokio::test(start_paused = true)]
    async fn failed_dispatch_does_not_start_cooldown() {
        let backend = Arc::new(ScriptedBackend::firing());
        let transport = Arc::new(ScriptedTransport::default());
        transport.script(
            "http://scale/up",
            vec![Err(crate::TransportError::Terminal("refused".to_string()))],
        );
        let mut scaler = scaler(spec("s1", 10, 0, 60), &backend, &transport);

        match scaler.tick().await {
            TickOutcome::Fired(report) => assert_eq!(report.failed(), 1),
            other => panic!("unexpected: {other:?}"),
        }
        assert!(scaler.alert.lock().await.fired_at().is_none());

        tokio::time::advance(secs(10)).await;
        assert!(matches!(scaler.tick().await, TickOutcome::Fired(_)));
        assert!(scaler.alert.lock().await.fired_at().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn inactive_scaler_never_queries() {
        let backend = Arc::new(ScriptedBackend::firing());
        let transport = Arc::new(ScriptedTransport::default());
        let mut inactive = spec("s1", 10, 0, 0);
        inactive.active = false;

        let handle = scaler(inactive, &backend, &transport).start();
        tokio::time::sleep(secs(100)).await;
        handle.stop().await;

        assert_eq!(backend.calls(), 0);
        assert_eq!(transport.total_calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn loop_ticks_every_interval_and_stops() {
        let backend = Arc::new(ScriptedBackend::firing());
        let transport = Arc::new(ScriptedTransport::default());
        let handle = scaler(spec("s1", 10, 0, 0), &backend, &transport).start();

        tokio::time::sleep(secs(35)).await;
        handle.stop().await;
        assert_eq!(backend.calls(), 3);
        assert_eq!(transport.total_calls(), 3);
        assert!(handle.is_stopped());

        // No further ticks, and stopping again is a no-op.
        tokio::time::sleep(secs(100)).await;
        handle.stop().await;
        assert_eq!(backend.calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_waits_for_tick_in_flight() {
        let backend = Arc::new(ScriptedBackend::firing().with_latency(secs(5)));
        let transport = Arc::new(ScriptedTransport::default());
        let handle = scaler(spec("s1", 10, 0, 0), &backend, &transport).start();

        // The first tick starts at 10s and its query runs until 15s.
        tokio::time::sleep(secs(12)).await;
        assert_eq!(backend.calls(), 1);
        assert!(handle.status().evaluating);

        handle.stop().await;
        assert_eq!(backend.completed.load(Ordering::SeqCst), 1);
        assert_eq!(transport.total_calls(), 1);
        assert!(!handle.status().evaluating);
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_stops_both_return() {
        let backend = Arc::new(ScriptedBackend::quiet());
        let transport = Arc::new(ScriptedTransport::default());
        let handle = Arc::new(scaler(spec("s1", 10, 0, 0), &backend, &transport).start());

        let other = handle.clone();
        tokio::join!(handle.stop(), async move { other.stop().await });
        assert!(handle.is_stopped());
    }

    #[tokio::test(start_paused = true)]
    async fn status_reports_phase() {
        let backend = Arc::new(ScriptedBackend::firing());
        let transport = Arc::new(ScriptedTransport::default());
        let handle = scaler(spec("s1", 10, 30, 60), &backend, &transport).start();

        let status = handle.status();
        assert_eq!(status.phase, Some(AlertPhase::Inactive));
        assert!(status.pending_secs.is_none());

        tokio::time::sleep(secs(25)).await;
        let status = handle.status();
        assert_eq!(status.phase, Some(AlertPhase::Pending));
        let pending = status.pending_secs.unwrap();
        assert!((pending - 15.0).abs() < 0.01, "{pending}");
        assert!(!status.evaluating);

        backend.set_firing(false);
        tokio::time::sleep(secs(10)).await;
        assert_eq!(handle.status().phase, Some(AlertPhase::Inactive));
        handle.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn only_lease_holder_evaluates() {
        let store = Arc::new(StateStore::open_in_memory().unwrap());
        let gate_a = Arc::new(CoordinationGate::new(store.clone(), "node-a", secs(15)).unwrap());
        let gate_b = Arc::new(CoordinationGate::new(store.clone(), "node-b", secs(15)).unwrap());

        let backend_a = Arc::new(ScriptedBackend::firing());
        let backend_b = Arc::new(ScriptedBackend::firing());
        let transport = Arc::new(ScriptedTransport::default());
        let mut a = scaler(spec("s1", 10, 0, 60), &backend_a, &transport).with_gate(gate_a);
        let mut b = scaler(spec("s1", 10, 0, 60), &backend_b, &transport).with_gate(gate_b);

        assert!(matches!(a.tick().await, TickOutcome::Fired(_)));
        assert!(matches!(b.tick().await, TickOutcome::Skipped));
        assert_eq!(backend_b.calls(), 0);
        assert_eq!(transport.total_calls(), 1);

        // Ownership moves once the first instance lets go.
        a.release_lease().await;
        assert!(matches!(b.tick().await, TickOutcome::Fired(_)));
        assert!(matches!(a.tick().await, TickOutcome::Skipped));
        assert_eq!(transport.total_calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn stopping_releases_lease() {
        let store = Arc::new(StateStore::open_in_memory().unwrap());
        let gate = Arc::new(CoordinationGate::new(store.clone(), "node-a", secs(15)).unwrap());
        let backend = Arc::new(ScriptedBackend::quiet());
        let transport = Arc::new(ScriptedTransport::default());

        let handle = scaler(spec("s1", 10, 0, 0), &backend, &transport)
            .with_gate(gate)
            .start();
        tokio::time::sleep(secs(15)).await;
        assert_eq!(store.get_lease("s1").unwrap().unwrap().holder, "node-a");

        handle.stop().await;
        assert!(store.get_lease("s1").unwrap().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn standby_instance_takes_over_after_stop() {
        let store = Arc::new(StateStore::open_in_memory().unwrap());
        let gate_a = Arc::new(CoordinationGate::new(store.clone(), "node-a", secs(15)).unwrap());
        let gate_b = Arc::new(CoordinationGate::new(store.clone(), "node-b", secs(15)).unwrap());

        let backend_a = Arc::new(ScriptedBackend::firing());
        let backend_b = Arc::new(ScriptedBackend::firing());
        let transport = Arc::new(ScriptedTransport::default());

        let a = scaler(spec("s1", 10, 0, 60), &backend_a, &transport)
            .with_gate(gate_a)
            .start();
        tokio::time::sleep(Duration::from_millis(1)).await;
        let b = scaler(spec("s1", 10, 0, 60), &backend_b, &transport)
            .with_gate(gate_b)
            .start();

        tokio::time::sleep(secs(25)).await;
        assert_eq!(store.get_lease("s1").unwrap().unwrap().holder, "node-a");
        assert_eq!(backend_a.calls(), 2);
        assert_eq!(backend_b.calls(), 0);
        assert_eq!(transport.total_calls(), 1);

        // The waiting instance picks the lease up within one retry interval
        // (ttl / 3) and starts with a fresh alert.
        a.stop().await;
        tokio::time::sleep(secs(20)).await;
        assert_eq!(store.get_lease("s1").unwrap().unwrap().holder, "node-b");
        assert!(backend_b.calls() >= 1);
        assert_eq!(transport.total_calls(), 2);

        b.stop().await;
        assert!(store.get_lease("s1").unwrap().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn stop_cancels_wait_for_lease() {
        let store = Arc::new(StateStore::open_in_memory().unwrap());
        let owner = CoordinationGate::new(store.clone(), "node-a", secs(15)).unwrap();
        let _lease = owner.try_acquire("s1").await.unwrap();

        let gate = Arc::new(CoordinationGate::new(store.clone(), "node-b", secs(15)).unwrap());
        let backend = Arc::new(ScriptedBackend::firing());
        let transport = Arc::new(ScriptedTransport::default());
        let handle = scaler(spec("s1", 10, 0, 0), &backend, &transport)
            .with_gate(gate)
            .start();

        tokio::time::sleep(secs(30)).await;
        assert_eq!(backend.calls(), 0);

        assert!(tokio::time::timeout(secs(1), handle.stop()).await.is_ok());
        assert_eq!(store.get_lease("s1").unwrap().unwrap().holder, "node-a");
    }
}
