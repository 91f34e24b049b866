use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::IdempotencyStore;

struct Claim {
    claimed_at: Instant,
}

/// In-process idempotency store for tests and single-node dev runs (spec
/// §4.7). Not durable across restarts.
#[derive(Default)]
pub struct InMemoryIdempotencyStore {
    claims: Mutex<HashMap<(String, String), Claim>>,
}

impl InMemoryIdempotencyStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl IdempotencyStore for InMemoryIdempotencyStore {
    async fn claim(&self, namespace: &str, key: &str) -> anyhow::Result<bool> {
        let mut claims = self.claims.lock().await;
        let entry_key = (namespace.to_string(), key.to_string());
        if claims.contains_key(&entry_key) {
            return Ok(false);
        }
        claims.insert(
            entry_key,
            Claim {
                claimed_at: Instant::now(),
            },
        );
        Ok(true)
    }

    async fn mark_sent(&self, _namespace: &str, _key: &str) -> anyhow::Result<()> {
        // The in-memory store only needs to remember that a key is claimed;
        // there is no separate durable "sent" flag to flip.
        Ok(())
    }

    async fn cleanup_ttl(&self, ttl: Duration) -> anyhow::Result<u64> {
        let mut claims = self.claims.lock().await;
        let before = claims.len();
        let now = Instant::now();
        claims.retain(|_, claim| now.duration_since(claim.claimed_at) < ttl);
        Ok((before - claims.len()) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn second_claim_of_same_key_fails() {
        let store = InMemoryIdempotencyStore::new();
        assert!(store.claim("ns", "A").await.unwrap());
        assert!(!store.claim("ns", "A").await.unwrap());
    }

    #[tokio::test]
    async fn namespaces_are_isolated() {
        let store = InMemoryIdempotencyStore::new();
        assert!(store.claim("ns1", "A").await.unwrap());
        assert!(store.claim("ns2", "A").await.unwrap());
    }

    #[tokio::test]
    async fn cleanup_removes_expired_claims() {
        let store = InMemoryIdempotencyStore::new();
        store.claim("ns", "A").await.unwrap();
        let removed = store.cleanup_ttl(Duration::from_secs(0)).await.unwrap();
        assert_eq!(removed, 1);
        assert!(store.claim("ns", "A").await.unwrap());
    }
}
