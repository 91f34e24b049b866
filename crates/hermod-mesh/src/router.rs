use std::sync::Arc;

use hermod_message::Message;
use thiserror::Error;
use tracing::{info, warn};

use crate::registry::{EdgeFilters, PeerRegistry};

pub const CLUSTER_ID_HEADER: &str = "X-Hermod-Cluster-ID";

#[derive(Debug, Error)]
pub enum MeshError {
    #[error("no online peer cluster matched the message's routing metadata")]
    NoPeer,
    #[error("peer {cluster_id} responded with non-2xx status {status}")]
    PeerRejected { cluster_id: String, status: u16 },
    #[error(transparent)]
    Http(#[from] reqwest::Error),
}

/// Forwards messages tagged with `target_cluster`/`target_region`
/// metadata to a peer cluster over HTTP (spec §4.6).
pub struct Router {
    peers: Arc<PeerRegistry>,
    filters: Arc<EdgeFilters>,
    client: reqwest::Client,
}

impl Router {
    pub fn new(peers: Arc<PeerRegistry>, filters: Arc<EdgeFilters>) -> Self {
        Self {
            peers,
            filters,
            client: reqwest::Client::new(),
        }
    }

    /// Routes `message` if it carries routing metadata; `Ok(false)` means
    /// the message was not addressed to any peer and should continue
    /// through the normal sink path.
    pub async fn route(&self, message: &mut Message) -> Result<bool, MeshError> {
        let target_cluster = message.target_cluster().map(str::to_string);
        let target_region = message.target_region().map(str::to_string);
        if target_cluster.is_none() && target_region.is_none() {
            return Ok(false);
        }

        let Some(peer) = self.peers.select(target_cluster.as_deref(), target_region.as_deref()) else {
            return Err(MeshError::NoPeer);
        };

        if self.filters.blocks(&peer.cluster_id, message.id()) {
            info!(cluster_id = %peer.cluster_id, message_id = message.id(), "edge filter dropped message");
            return Ok(true);
        }

        let envelope = message.marshal_json();
        let url = format!("{}/api/mesh/receive", peer.endpoint.trim_end_matches('/'));
        let response = self
            .client
            .post(&url)
            .header(CLUSTER_ID_HEADER, &peer.cluster_id)
            .json(&envelope)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            warn!(cluster_id = %peer.cluster_id, status, "mesh peer rejected forwarded message");
            return Err(MeshError::PeerRejected {
                cluster_id: peer.cluster_id,
                status,
            });
        }

        Ok(true)
    }
}
