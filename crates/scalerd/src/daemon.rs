//! Daemon bootstrap: wires the lease service, metric backend, action
//! transport and coordination gate into a [`ScalerManager`], serves the
//! status API and handles reload/shutdown signals.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use tokio::sync::watch;
use tracing::{error, info, warn};

use scaler_core::{Config, ConfigError, ScalerSpec};
use scaler_engine::{ActionExecutor, CoordinationGate, HttpTransport, LockService, ScalerManager};
use scaler_metrics::PrometheusBackend;
use scaler_state::{PgLeaseConfig, PgLeaseStore, StateStore};

const STATE_FILE: &str = "scaler.redb";

/// Options for `scalerd run`.
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub config: PathBuf,
    pub data_dir: PathBuf,
    /// Overrides `http.listen`.
    pub listen: Option<String>,
}

/// Install the global tracing subscriber.
pub fn init_tracing(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,scalerd=debug,scaler_engine=debug"));

    if json {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

/// Load the configuration file and validate its scalers. Invalid scalers
/// are returned separately; a file that cannot be read or parsed is an error.
pub fn load_config(path: &Path) -> anyhow::Result<(Config, Vec<ScalerSpec>, Vec<ConfigError>)> {
    let config = Config::from_file(path).with_context(|| format!("loading {}", path.display()))?;
    let (specs, errors) = config.validate_scalers();
    Ok((config, specs, errors))
}

fn report_invalid(errors: &[ConfigError]) {
    for e in errors {
        error!(scaler = e.scaler_id().unwrap_or("-"), error = %e, "invalid scaler skipped");
    }
}

/// Run the daemon until Ctrl-C.
pub async fn run(opts: RunOptions) -> anyhow::Result<()> {
    info!(config = %opts.config.display(), "scalerd starting");

    let (config, specs, errors) = load_config(&opts.config)?;
    report_invalid(&errors);

    // ── Initialize subsystems ──────────────────────────────────

    let leases = open_lease_service(&config, &opts.data_dir).await?;

    let backend = PrometheusBackend::new(&config.backend.address, config.backend.timeout()?)?;
    info!(address = %config.backend.address, "metric backend configured");

    let transport = HttpTransport::new(config.http.action_timeout()?)?;

    let holder = CoordinationGate::session_id(config.cluster.node_id());
    let ttl = config.cluster.lease_ttl()?;
    let gate = CoordinationGate::new(leases.clone(), holder.clone(), ttl)?;
    info!(%holder, ?ttl, "coordination gate ready");

    let manager = Arc::new(
        ScalerManager::new(Arc::new(backend), ActionExecutor::new(Arc::new(transport)))
            .with_gate(Arc::new(gate)),
    );
    manager.sync(specs).await;

    // ── Shutdown signal ────────────────────────────────────────

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // ── Reload on SIGHUP ───────────────────────────────────────

    let reload_handle = tokio::spawn(reload_loop(opts.config.clone(), manager.clone(), shutdown_rx));

    // ── Start API server ───────────────────────────────────────

    let router = crate::api::build_router(manager.clone(), leases);
    let listen = opts.listen.unwrap_or_else(|| config.http.listen().to_string());
    let listener = tokio::net::TcpListener::bind(&listen)
        .await
        .with_context(|| format!("binding status API to {listen}"))?;
    info!(addr = %listen, "status API listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!(error = %e, "failed to listen for ctrl-c");
            }
            info!("shutdown signal received");
            let _ = shutdown_tx.send(true);
        })
        .await?;

    let _ = reload_handle.await;
    manager.stop_all().await;

    info!("scalerd stopped");
    Ok(())
}

/// Open the lease service: the shared Postgres table when
/// `cluster.database_url` is set, otherwise a redb file that only
/// coordinates this process.
async fn open_lease_service(config: &Config, data_dir: &Path) -> anyhow::Result<Arc<dyn LockService>> {
    if let Some(url) = config.cluster.database_url()? {
        let store = PgLeaseStore::connect(&PgLeaseConfig::new(url))
            .await
            .context("connecting to the lease database")?;
        store.ensure_schema().await.context("creating the lease table")?;
        info!("cluster leases stored in postgres");
        return Ok(Arc::new(store));
    }

    let state_path = config
        .cluster
        .state_path
        .clone()
        .unwrap_or_else(|| data_dir.join(STATE_FILE));
    if let Some(parent) = state_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("creating state directory {}", parent.display()))?;
    }
    let store = StateStore::open(&state_path)?;
    warn!(
        path = ?state_path,
        "cluster.database_url not set, leases are local to this instance; run only one"
    );
    Ok(Arc::new(store))
}

/// Re-read the configuration and converge the running scalers on it.
/// Backend, cluster and HTTP settings only take effect on restart.
pub async fn reload(path: &Path, manager: &ScalerManager) -> anyhow::Result<()> {
    let (_, specs, errors) = load_config(path)?;
    report_invalid(&errors);
    let summary = manager.sync(specs).await;
    info!(
        started = ?summary.started,
        restarted = ?summary.restarted,
        stopped = ?summary.stopped,
        "configuration reloaded"
    );
    Ok(())
}

#[cfg(unix)]
async fn reload_loop(path: PathBuf, manager: Arc<ScalerManager>, mut shutdown: watch::Receiver<bool>) {
    use tokio::signal::unix::{SignalKind, signal};

    let mut hangup = match signal(SignalKind::hangup()) {
        Ok(hangup) => hangup,
        Err(e) => {
            warn!(error = %e, "cannot install SIGHUP handler, reload disabled");
            return;
        }
    };

    loop {
        tokio::select! {
            _ = hangup.recv() => {
                if let Err(e) = reload(&path, &manager).await {
                    // Keep the running scalers when the new file is unusable.
                    error!(error = %e, "configuration reload failed");
                }
            }
            _ = shutdown.changed() => break,
        }
    }
}

#[cfg(not(unix))]
async fn reload_loop(_path: PathBuf, _manager: Arc<ScalerManager>, mut shutdown: watch::Receiver<bool>) {
    let _ = shutdown.changed().await;
}

/// Validate a configuration file and print what would run.
pub fn check(path: &Path) -> anyhow::Result<()> {
    let (config, specs, errors) = load_config(path)?;
    let mut problems = errors.len();

    let settings = [
        ("backend.timeout", config.backend.timeout().err()),
        ("cluster.lease_ttl", config.cluster.lease_ttl().err()),
        ("cluster.database_url", config.cluster.database_url().err()),
        ("http.action_timeout", config.http.action_timeout().err()),
    ];
    for (field, err) in settings {
        if let Some(e) = err {
            println!("invalid {field}: {e}");
            problems += 1;
        }
    }
    if let Err(e) = PrometheusBackend::new(&config.backend.address, std::time::Duration::from_secs(1)) {
        println!("invalid backend.address: {e}");
        problems += 1;
    }

    for spec in &specs {
        println!(
            "ok      {:<24} every {:?}, fire after {:?}, cooldown {:?}, {} action(s){}",
            spec.id,
            spec.interval,
            spec.duration,
            spec.cooldown,
            spec.actions.len(),
            if spec.active { "" } else { " (inactive)" }
        );
    }
    for e in &errors {
        println!("invalid {:<24} {e}", e.scaler_id().unwrap_or("-"));
    }

    if problems > 0 {
        anyhow::bail!("{problems} configuration problem(s) in {}", path.display());
    }
    Ok(())
}
