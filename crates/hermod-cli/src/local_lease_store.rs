//! In-process `LeaseStore` used by `--mode standalone`, where there is no
//! shared platform database for `hermod_supervisor::SqlLeaseStore` to talk
//! to. Single-process, so "at most one live owner" is trivially true; kept
//! for parity with `SqlLeaseStore`'s steal-on-expiry semantics anyway so the
//! supervisor's reconcile loop behaves identically across modes.

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use hermod_supervisor::LeaseStore;

#[derive(Default)]
pub struct InMemoryLeaseStore {
    leases: Mutex<HashMap<String, (String, DateTime<Utc>)>>,
}

impl InMemoryLeaseStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl LeaseStore for InMemoryLeaseStore {
    async fn acquire(&self, workflow_id: &str, owner_id: &str, ttl: chrono::Duration) -> anyhow::Result<bool> {
        let mut leases = self.leases.lock().expect("lease map poisoned");
        let now = Utc::now();
        match leases.get(workflow_id) {
            Some((_, lease_until)) if *lease_until > now => Ok(false),
            _ => {
                leases.insert(workflow_id.to_string(), (owner_id.to_string(), now + ttl));
                Ok(true)
            }
        }
    }

    async fn renew(&self, workflow_id: &str, owner_id: &str, ttl: chrono::Duration) -> anyhow::Result<bool> {
        let mut leases = self.leases.lock().expect("lease map poisoned");
        match leases.get_mut(workflow_id) {
            Some((owner, lease_until)) if owner == owner_id => {
                *lease_until = Utc::now() + ttl;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn release(&self, workflow_id: &str, owner_id: &str) -> anyhow::Result<()> {
        let mut leases = self.leases.lock().expect("lease map poisoned");
        if leases.get(workflow_id).map(|(owner, _)| owner == owner_id).unwrap_or(false) {
            leases.remove(workflow_id);
        }
        Ok(())
    }
}

pub struct NullPlatformClient;

#[async_trait::async_trait]
impl hermod_supervisor::PlatformClient for NullPlatformClient {
    async fn fetch_desired_workflows(&self) -> anyhow::Result<Vec<hermod_supervisor::Workflow>> {
        Ok(Vec::new())
    }

    async fn fetch_worker_weights(&self) -> anyhow::Result<Vec<hermod_supervisor::WorkerWeight>> {
        Ok(Vec::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn acquire_then_acquire_by_another_owner_fails_until_expiry() {
        let store = InMemoryLeaseStore::new();
        assert!(store.acquire("wf-1", "a", chrono::Duration::milliseconds(20)).await.unwrap());
        assert!(!store.acquire("wf-1", "b", chrono::Duration::seconds(30)).await.unwrap());
        tokio::time::sleep(std::time::Duration::from_millis(40)).await;
        assert!(store.acquire("wf-1", "b", chrono::Duration::seconds(30)).await.unwrap());
    }

    #[tokio::test]
    async fn renew_fails_for_non_owner() {
        let store = InMemoryLeaseStore::new();
        store.acquire("wf-1", "a", chrono::Duration::seconds(30)).await.unwrap();
        assert!(!store.renew("wf-1", "b", chrono::Duration::seconds(30)).await.unwrap());
        assert!(store.renew("wf-1", "a", chrono::Duration::seconds(30)).await.unwrap());
    }
}
