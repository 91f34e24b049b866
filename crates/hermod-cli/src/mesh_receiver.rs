//! Mounts the inter-cluster mesh receiver (spec §4.6,
//! `POST /api/mesh/receive`) onto the same listener as the health server.
//!
//! `hermod_mesh::receive::ReceiveState` hands accepted envelopes off to a
//! channel meant to feed a workflow's source side the same way any other
//! `Source` does. Since this binary cannot yet materialize a concrete
//! source/sink pair for a workflow (see `workflow_runtime::ConnectorFactory`),
//! there is nothing downstream to route a forwarded envelope into; the drain
//! task below only counts and logs what arrives; it does not invent a
//! routing destination.

use axum::Router;
use tokio::sync::mpsc;
use tracing::warn;

const INBOUND_CHANNEL_CAPACITY: usize = 1024;

pub fn router() -> Router {
    let (tx, mut rx) = mpsc::channel(INBOUND_CHANNEL_CAPACITY);
    tokio::spawn(async move {
        let mut accepted = 0u64;
        while rx.recv().await.is_some() {
            accepted += 1;
            warn!(accepted, "mesh-forwarded envelope received with no workflow routing configured to consume it");
        }
    });
    hermod_mesh::receive_router(hermod_mesh::ReceiveState::new(tx))
}
