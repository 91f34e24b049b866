//! `hermod`: the worker/health-server binary (spec §6). The composition
//! root for every other crate in this workspace - it is the only crate
//! that wires a concrete `PlatformClient` and `WorkflowRuntime` to
//! `hermod_supervisor::Supervisor`, since both are deliberately left as
//! traits by that crate so its reconcile logic stays testable without a
//! network or a database.

mod cli;
mod health;
mod local_lease_store;
mod mesh_receiver;
mod platform_client;
mod service;
mod workflow_runtime;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use hermod_cli_common::{init_logging, OrBail};
use hermod_state::SqliteStateStore;
use hermod_supervisor::{LeaseStore, PlatformClient, Supervisor, SupervisorConfig};
use tokio::sync::Mutex as AsyncMutex;
use tracing::{error, info, warn};

use cli::{Args, EnvToggles, Mode};
use health::{HealthState, LeaseActivity};
use local_lease_store::{InMemoryLeaseStore, NullPlatformClient};
use platform_client::HttpPlatformClient;
use workflow_runtime::{EngineRuntime, UnconfiguredConnectorFactory};

const EXIT_CONFIG_ERROR: i32 = 1;
const EXIT_LEASE_IMPOSSIBLE: i32 = 2;
const EXIT_SIGNALLED: i32 = 130;

/// How long a reconcile tick's started engines are given to drain on
/// shutdown before `EngineRuntime` gives up waiting on the join handle.
const ENGINE_STOP_TIMEOUT: Duration = Duration::from_secs(30);
const RECONCILE_INTERVAL: Duration = Duration::from_secs(5);
const LEASE_TTL_SECONDS: i64 = 30;

enum RunOutcome {
    ShutdownSignalled,
    Completed,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    init_logging(&args.logging);
    let toggles = EnvToggles::from_env();

    if let Some(action) = args.service {
        match service::run(action) {
            Ok(()) => std::process::exit(0),
            Err(err) => {
                error!(%err, "service action failed");
                std::process::exit(EXIT_CONFIG_ERROR);
            }
        }
    }

    let result = match args.mode {
        Mode::Standalone => run_standalone(&args, &toggles).await,
        Mode::Worker => run_worker(&args, &toggles).await,
        Mode::Api => run_api(&args, &toggles).await,
    };

    match result {
        Ok(RunOutcome::ShutdownSignalled) => std::process::exit(EXIT_SIGNALLED),
        Ok(RunOutcome::Completed) => std::process::exit(0),
        Err(err) => {
            error!(%err, "fatal startup error");
            std::process::exit(EXIT_CONFIG_ERROR);
        }
    }
}

async fn wait_for_shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};
    let mut terminate = signal(SignalKind::terminate()).or_bail("failed to register SIGTERM handler");
    let mut interrupt = signal(SignalKind::interrupt()).or_bail("failed to register SIGINT handler");
    tokio::select! {
        _ = terminate.recv() => info!("received SIGTERM"),
        _ = interrupt.recv() => info!("received SIGINT"),
    }
}

fn health_bind_addr(args: &Args) -> anyhow::Result<SocketAddr> {
    format!("{}:{}", args.worker_host, args.worker_port)
        .parse()
        .map_err(|err| anyhow::anyhow!("invalid --worker-host/--worker-port: {err}"))
}

async fn spawn_health_server(addr: SocketAddr, state: Arc<HealthState>, with_mesh: bool) -> anyhow::Result<tokio::task::JoinHandle<()>> {
    let mut app = health::router(state);
    if with_mesh {
        app = app.merge(mesh_receiver::router());
    }
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "health server listening");
    Ok(tokio::spawn(async move {
        if let Err(err) = axum::serve(listener, app).await {
            error!(%err, "health server exited");
        }
    }))
}

/// Runs the supervisor entirely in-process: an in-memory lease store and a
/// platform client with no desired workflows. Demonstrates the reconcile
/// loop and health surface with no external dependencies (spec §6, "for
/// single-binary deployments").
async fn run_standalone(args: &Args, toggles: &EnvToggles) -> anyhow::Result<RunOutcome> {
    let state_store = Arc::new(SqliteStateStore::open_in_memory()?);
    let lease_store: Arc<dyn LeaseStore> = Arc::new(InMemoryLeaseStore::new());
    let platform: Arc<dyn PlatformClient> = Arc::new(NullPlatformClient);
    let engine_runtime = Arc::new(EngineRuntime::new(Arc::new(UnconfiguredConnectorFactory), ENGINE_STOP_TIMEOUT));

    let supervisor = Arc::new(Supervisor::new(
        SupervisorConfig {
            worker_id: args.worker_guid.clone().unwrap_or_else(|| "standalone".to_string()),
            total_workers: 1,
            worker_index: 0,
            lease_ttl: chrono::Duration::seconds(LEASE_TTL_SECONDS),
            hysteresis: 1.15,
        },
        lease_store,
        platform,
        engine_runtime.clone(),
    ));

    let lease_activity = Arc::new(AsyncMutex::new(LeaseActivity {
        ttl_seconds: LEASE_TTL_SECONDS as u64,
        ..Default::default()
    }));
    let reconcile_handle = spawn_reconcile_loop(supervisor, engine_runtime.clone(), lease_activity.clone());

    let recorder = hermod_metrics::install_recorder()?;
    let health_state = Arc::new(HealthState {
        version: env!("CARGO_PKG_VERSION"),
        db: state_store,
        lease_activity,
        ready_leases_required: toggles.ready_leases_required,
        recorder,
        registry: None,
        cors_allow_origins: toggles.cors_allow_origins.clone(),
        hsts_enable: toggles.hsts_enable,
    });
    let health_handle = spawn_health_server(health_bind_addr(args)?, health_state, true).await?;

    wait_for_shutdown_signal().await;
    reconcile_handle.abort();
    health_handle.abort();
    engine_runtime.stop_all().await;
    Ok(RunOutcome::ShutdownSignalled)
}

async fn run_worker(args: &Args, toggles: &EnvToggles) -> anyhow::Result<RunOutcome> {
    let platform_url = args
        .platform_url
        .clone()
        .ok_or_else(|| anyhow::anyhow!("--platform-url is required in worker mode"))?;
    let worker_token = args
        .worker_token
        .clone()
        .ok_or_else(|| anyhow::anyhow!("--worker-token is required in worker mode"))?;
    let worker_guid = args
        .worker_guid
        .clone()
        .ok_or_else(|| anyhow::anyhow!("--worker-guid is required in worker mode"))?;

    if args.total_workers == 0 {
        error!("--total-workers is 0: no worker index can ever own a workflow");
        std::process::exit(EXIT_LEASE_IMPOSSIBLE);
    }

    let database_url = std::env::var("HERMOD_DATABASE_URL")
        .map_err(|_| anyhow::anyhow!("HERMOD_DATABASE_URL must be set in worker mode"))?;
    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(10)
        .connect(&database_url)
        .await?;
    let lease_store: Arc<dyn LeaseStore> = {
        let store = hermod_supervisor::SqlLeaseStore::new(pool);
        store.ensure_schema().await?;
        Arc::new(store)
    };

    let platform: Arc<dyn PlatformClient> =
        Arc::new(HttpPlatformClient::new(&platform_url, &worker_guid, &worker_token)?);
    let registry_check_client = platform.clone();

    if let Some(reg_token) = &toggles.worker_reg_token {
        let client = reqwest::Client::new();
        if let Err(err) = platform_client::register_worker(
            &client,
            &platform_url,
            &worker_guid,
            &worker_token,
            &args.worker_host,
            args.worker_port,
            Some(reg_token),
        )
        .await
        {
            warn!(%err, "worker self-registration failed; continuing, the platform may already know this worker");
        }
    }

    let engine_runtime = Arc::new(EngineRuntime::new(Arc::new(UnconfiguredConnectorFactory), ENGINE_STOP_TIMEOUT));
    let worker_index = args.worker_id.unwrap_or(0);
    let supervisor = Arc::new(Supervisor::new(
        SupervisorConfig {
            worker_id: worker_guid,
            total_workers: args.total_workers,
            worker_index,
            lease_ttl: chrono::Duration::seconds(LEASE_TTL_SECONDS),
            hysteresis: 1.15,
        },
        lease_store,
        platform,
        engine_runtime.clone(),
    ));

    let lease_activity = Arc::new(AsyncMutex::new(LeaseActivity {
        ttl_seconds: LEASE_TTL_SECONDS as u64,
        ..Default::default()
    }));
    let reconcile_handle = spawn_reconcile_loop(supervisor, engine_runtime.clone(), lease_activity.clone());

    let state_store = Arc::new(SqliteStateStore::open_in_memory()?);
    let recorder = hermod_metrics::install_recorder()?;
    let health_state = Arc::new(HealthState {
        version: env!("CARGO_PKG_VERSION"),
        db: state_store,
        lease_activity,
        ready_leases_required: toggles.ready_leases_required,
        recorder,
        registry: Some(registry_check_client),
        cors_allow_origins: toggles.cors_allow_origins.clone(),
        hsts_enable: toggles.hsts_enable,
    });
    let health_handle = spawn_health_server(health_bind_addr(args)?, health_state, true).await?;

    wait_for_shutdown_signal().await;
    reconcile_handle.abort();
    health_handle.abort();
    engine_runtime.stop_all().await;
    Ok(RunOutcome::ShutdownSignalled)
}

/// `--mode api` serves only the health/metrics endpoints spec.md §6
/// documents; the administrative API server those endpoints were originally
/// described alongside is out of scope for this codebase (spec §1).
async fn run_api(args: &Args, toggles: &EnvToggles) -> anyhow::Result<RunOutcome> {
    let state_store = Arc::new(SqliteStateStore::open_in_memory()?);
    let recorder = hermod_metrics::install_recorder()?;
    let health_state = Arc::new(HealthState {
        version: env!("CARGO_PKG_VERSION"),
        db: state_store,
        lease_activity: Arc::new(AsyncMutex::new(LeaseActivity::default())),
        ready_leases_required: toggles.ready_leases_required,
        recorder,
        registry: None,
        cors_allow_origins: toggles.cors_allow_origins.clone(),
        hsts_enable: toggles.hsts_enable,
    });
    let health_handle = spawn_health_server(health_bind_addr(args)?, health_state, false).await?;

    wait_for_shutdown_signal().await;
    health_handle.abort();
    Ok(RunOutcome::ShutdownSignalled)
}

fn spawn_reconcile_loop(
    supervisor: Arc<Supervisor>,
    engine_runtime: Arc<EngineRuntime>,
    lease_activity: Arc<AsyncMutex<LeaseActivity>>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(RECONCILE_INTERVAL);
        loop {
            ticker.tick().await;
            if let Err(err) = supervisor.reconcile_once().await {
                warn!(%err, "reconcile tick failed");
            }
            let running = engine_runtime.running_count().await;
            let mut activity = lease_activity.lock().await;
            activity.recent = running as u64;
            activity.has_any_lease = running > 0;
        }
    })
}
