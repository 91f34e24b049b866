use std::collections::HashMap;
use std::sync::RwLock;

/// A peer cluster this router can forward to (spec §4.6).
#[derive(Debug, Clone)]
pub struct PeerCluster {
    pub cluster_id: String,
    pub region: String,
    pub endpoint: String,
    pub online: bool,
}

/// Substring (case-insensitive) edge filters registered per peer (spec
/// §4.6: "push-down filtering"). A message whose id contains a
/// registered filter string for the selected peer is dropped at source
/// rather than forwarded.
#[derive(Default)]
pub struct EdgeFilters {
    by_cluster: RwLock<HashMap<String, Vec<String>>>,
}

impl EdgeFilters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, cluster_id: &str, filter: impl Into<String>) {
        self.by_cluster
            .write()
            .expect("edge filter lock poisoned")
            .entry(cluster_id.to_string())
            .or_default()
            .push(filter.into().to_lowercase());
    }

    /// `true` if `message_id` should be dropped before forwarding to
    /// `cluster_id`.
    pub fn blocks(&self, cluster_id: &str, message_id: &str) -> bool {
        let filters = self.by_cluster.read().expect("edge filter lock poisoned");
        let Some(list) = filters.get(cluster_id) else {
            return false;
        };
        let id_lower = message_id.to_lowercase();
        list.iter().any(|f| id_lower.contains(f.as_str()))
    }
}

/// Registry of peer clusters the router selects forwarding targets from
/// (spec §4.6). Explicitly constructed and passed in rather than a
/// process-wide singleton (spec §9).
#[derive(Default)]
pub struct PeerRegistry {
    peers: RwLock<HashMap<String, PeerCluster>>,
}

impl PeerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn upsert(&self, peer: PeerCluster) {
        self.peers
            .write()
            .expect("peer registry lock poisoned")
            .insert(peer.cluster_id.clone(), peer);
    }

    /// Selects a peer by exact cluster id, or the first online peer
    /// whose region matches case-insensitively (spec §4.6).
    pub fn select(&self, target_cluster: Option<&str>, target_region: Option<&str>) -> Option<PeerCluster> {
        let peers = self.peers.read().expect("peer registry lock poisoned");
        if let Some(cluster_id) = target_cluster {
            if let Some(peer) = peers.get(cluster_id) {
                if peer.online {
                    return Some(peer.clone());
                }
            }
        }
        if let Some(region) = target_region {
            let region_lower = region.to_lowercase();
            return peers
                .values()
                .find(|p| p.online && p.region.to_lowercase() == region_lower)
                .cloned();
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn selects_exact_cluster_id_when_online() {
        let registry = PeerRegistry::new();
        registry.upsert(PeerCluster {
            cluster_id: "east-1".into(),
            region: "us-east".into(),
            endpoint: "http://east-1".into(),
            online: true,
        });
        let selected = registry.select(Some("east-1"), None).unwrap();
        assert_eq!(selected.cluster_id, "east-1");
    }

    #[test]
    fn falls_back_to_first_online_region_match() {
        let registry = PeerRegistry::new();
        registry.upsert(PeerCluster {
            cluster_id: "east-1".into(),
            region: "US-East".into(),
            endpoint: "http://east-1".into(),
            online: true,
        });
        let selected = registry.select(None, Some("us-east")).unwrap();
        assert_eq!(selected.cluster_id, "east-1");
    }

    #[test]
    fn offline_peer_is_never_selected() {
        let registry = PeerRegistry::new();
        registry.upsert(PeerCluster {
            cluster_id: "east-1".into(),
            region: "us-east".into(),
            endpoint: "http://east-1".into(),
            online: false,
        });
        assert!(registry.select(Some("east-1"), None).is_none());
    }

    #[test]
    fn edge_filter_blocks_substring_match_case_insensitively() {
        let filters = EdgeFilters::new();
        filters.register("east-1", "test-");
        assert!(filters.blocks("east-1", "TEST-123"));
        assert!(!filters.blocks("east-1", "prod-123"));
    }
}
