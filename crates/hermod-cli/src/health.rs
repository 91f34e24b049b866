//! `/livez`, `/readyz`, `/metrics` (spec §6). These are documented in the
//! spec alongside the platform process's own health surface, but since this
//! binary is the only one this codebase ships, it serves the same JSON
//! shape for its own worker/api process: `checks.db` reflects this
//! process's own state-store connectivity, `checks.registry` reflects
//! reachability of the platform this worker reports to (skipped entirely in
//! standalone mode), and `checks.workers` reports this process's own lease
//! activity rather than a cluster-wide view.

use std::sync::Arc;
use std::time::Instant;

use axum::extract::State;
use axum::http::{HeaderValue, StatusCode};
use axum::middleware::{self, Next};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use hermod_state::StateStore;
use hermod_supervisor::PlatformClient;
use metrics_exporter_prometheus::PrometheusHandle;
use serde::Serialize;
use tokio::sync::Mutex as AsyncMutex;
use tower_http::cors::{self, CorsLayer};

/// Lease activity as last observed by a reconcile tick; updated by the
/// supervisor loop in `main.rs` after each `reconcile_once`.
#[derive(Debug, Clone, Default)]
pub struct LeaseActivity {
    pub recent: u64,
    pub stale: u64,
    pub ttl_seconds: u64,
    pub has_any_lease: bool,
}

pub struct HealthState {
    pub version: &'static str,
    pub db: Arc<dyn StateStore>,
    pub lease_activity: Arc<AsyncMutex<LeaseActivity>>,
    pub ready_leases_required: bool,
    pub recorder: PrometheusHandle,
    /// `None` in standalone mode, where there is no platform to reach.
    pub registry: Option<Arc<dyn PlatformClient>>,
    pub cors_allow_origins: Option<String>,
    pub hsts_enable: bool,
}

#[derive(Serialize)]
struct CheckResult {
    ok: bool,
    duration_ms: u128,
}

#[derive(Serialize)]
struct WorkersCheck {
    recent: u64,
    stale: u64,
    ttl_seconds: u64,
}

#[derive(Serialize)]
struct ReadyChecks {
    db: CheckResult,
    #[serde(skip_serializing_if = "Option::is_none")]
    registry: Option<CheckResult>,
    workers: WorkersCheck,
    #[serde(skip_serializing_if = "Option::is_none")]
    leases: Option<CheckResult>,
}

#[derive(Serialize)]
struct ReadyBody {
    version: &'static str,
    status: &'static str,
    time: String,
    checks: ReadyChecks,
}

pub fn router(state: Arc<HealthState>) -> Router {
    let cors = cors_layer(state.cors_allow_origins.as_deref());
    let hsts_enable = state.hsts_enable;
    Router::new()
        .route("/livez", get(livez))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics))
        .layer(middleware::from_fn(move |req, next| hsts_header(hsts_enable, req, next)))
        .layer(cors)
        .with_state(state)
}

/// Spec §6 `HERMOD_CORS_ALLOW_ORIGINS`: a comma-separated allow-list, or
/// unset for no CORS headers at all (the default - this is a health/metrics
/// surface, not a browser-facing API).
fn cors_layer(allow_origins: Option<&str>) -> CorsLayer {
    match allow_origins {
        None => CorsLayer::new(),
        Some(origins) if origins.trim() == "*" => CorsLayer::new().allow_origin(cors::Any),
        Some(origins) => {
            let parsed: Vec<HeaderValue> = origins
                .split(',')
                .map(str::trim)
                .filter(|o| !o.is_empty())
                .filter_map(|o| o.parse().ok())
                .collect();
            CorsLayer::new().allow_origin(parsed)
        }
    }
}

async fn hsts_header(
    enabled: bool,
    req: axum::extract::Request,
    next: Next,
) -> axum::response::Response {
    let mut response = next.run(req).await;
    if enabled {
        response.headers_mut().insert(
            axum::http::header::STRICT_TRANSPORT_SECURITY,
            HeaderValue::from_static("max-age=63072000; includeSubDomains"),
        );
    }
    response
}

async fn livez() -> impl IntoResponse {
    StatusCode::OK
}

async fn readyz(State(state): State<Arc<HealthState>>) -> impl IntoResponse {
    let started = Instant::now();
    let db_ok = state.db.get("__readyz_probe__").await.is_ok();
    let db_check = CheckResult {
        ok: db_ok,
        duration_ms: started.elapsed().as_millis(),
    };

    let registry_check = match &state.registry {
        Some(platform) => {
            let started = Instant::now();
            let ok = platform.fetch_desired_workflows().await.is_ok();
            Some(CheckResult {
                ok,
                duration_ms: started.elapsed().as_millis(),
            })
        }
        None => None,
    };
    let registry_ok = registry_check.as_ref().map(|c| c.ok).unwrap_or(true);

    let activity = state.lease_activity.lock().await.clone();
    let workers = WorkersCheck {
        recent: activity.recent,
        stale: activity.stale,
        ttl_seconds: activity.ttl_seconds,
    };

    let leases_check = state.ready_leases_required.then(|| CheckResult {
        ok: activity.has_any_lease,
        duration_ms: 0,
    });
    let leases_ok = leases_check.as_ref().map(|c| c.ok).unwrap_or(true);

    let body = ReadyBody {
        version: state.version,
        status: if db_ok && registry_ok && leases_ok { "ok" } else { "degraded" },
        time: chrono::Utc::now().to_rfc3339(),
        checks: ReadyChecks {
            db: db_check,
            registry: registry_check,
            workers,
            leases: leases_check,
        },
    };

    // Spec §6: HTTP 503 only if the db check fails; the optional leases
    // gate is surfaced in the body's `status` field but does not itself
    // flip the status code.
    let status = if db_ok { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };
    (status, Json(body))
}

async fn metrics(State(state): State<Arc<HealthState>>) -> impl IntoResponse {
    state.recorder.render()
}
