use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::post;
use axum::Router as AxumRouter;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::info;

use crate::router::CLUSTER_ID_HEADER;

/// Shared state for the inbound mesh receiver: forwarded envelopes are
/// handed off to `inbound` for a workflow's source side to pick up, the
/// same way any other Source implementation feeds the engine.
#[derive(Clone)]
pub struct ReceiveState {
    inbound: mpsc::Sender<serde_json::Value>,
}

impl ReceiveState {
    pub fn new(inbound: mpsc::Sender<serde_json::Value>) -> Self {
        Self { inbound }
    }
}

/// Builds the `/api/mesh/receive` route (spec §4.6).
pub fn router(state: ReceiveState) -> AxumRouter {
    AxumRouter::new()
        .route("/api/mesh/receive", post(receive))
        .with_state(Arc::new(state))
}

async fn receive(
    State(state): State<Arc<ReceiveState>>,
    headers: HeaderMap,
    axum::Json(envelope): axum::Json<serde_json::Value>,
) -> impl IntoResponse {
    let cluster_id = headers
        .get(CLUSTER_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("unknown")
        .to_string();

    if state.inbound.send(envelope).await.is_err() {
        return StatusCode::SERVICE_UNAVAILABLE;
    }
    info!(%cluster_id, "accepted mesh-forwarded message");
    StatusCode::OK
}
