use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::lease::LeaseStore;
use crate::rendezvous::{pick_owner, WorkerWeight};
use crate::sharding::owns_by_hash;

/// A workflow definition as fetched from the platform (spec §3,
/// "Workflow"). Source/sink refs are opaque connector identifiers; this
/// crate only needs enough to decide ownership and hand the id to a
/// `WorkflowRuntime`.
#[derive(Debug, Clone)]
pub struct Workflow {
    pub id: String,
    pub resource_hints: Option<ResourceHints>,
    /// Explicit worker pin (spec §4.5 step 1, option (a)). When set,
    /// ownership is decided by this field alone; rendezvous hashing only
    /// applies when it's `None`.
    pub owner_worker: Option<String>,
}

#[derive(Debug, Clone, Copy)]
pub struct ResourceHints {
    pub cpu_weight: f64,
    pub mem_weight: f64,
}

/// Collaborator that lists workflows desired cluster-wide and the live
/// weight of every candidate worker (spec §4.5 step 1). The concrete
/// implementation (an HTTP client against the platform API) is out of
/// scope for this crate (spec §1, "the administrative API server").
#[async_trait::async_trait]
pub trait PlatformClient: Send + Sync {
    async fn fetch_desired_workflows(&self) -> anyhow::Result<Vec<Workflow>>;
    async fn fetch_worker_weights(&self) -> anyhow::Result<Vec<WorkerWeight>>;
}

/// Collaborator that actually runs a workflow's Engine. Kept as a trait
/// rather than a direct `hermod-engine` dependency so the reconcile loop
/// stays testable with an in-memory double (spec §9: "avoid process-wide
/// singletons in tests").
#[async_trait::async_trait]
pub trait WorkflowRuntime: Send + Sync {
    async fn start(&self, workflow_id: &str) -> anyhow::Result<()>;
    async fn stop(&self, workflow_id: &str) -> anyhow::Result<()>;
}

pub struct SupervisorConfig {
    pub worker_id: String,
    pub total_workers: u32,
    pub worker_index: u32,
    pub lease_ttl: chrono::Duration,
    pub hysteresis: f64,
}

/// Owns the reconcile loop described in spec §4.5: fetch desired
/// workflows, decide ownership, acquire/renew/release leases, start/stop
/// Engines accordingly.
pub struct Supervisor {
    config: SupervisorConfig,
    lease_store: Arc<dyn LeaseStore>,
    platform: Arc<dyn PlatformClient>,
    runtime: Arc<dyn WorkflowRuntime>,
    running: Mutex<HashMap<String, DateTime<Utc>>>,
}

impl Supervisor {
    pub fn new(
        config: SupervisorConfig,
        lease_store: Arc<dyn LeaseStore>,
        platform: Arc<dyn PlatformClient>,
        runtime: Arc<dyn WorkflowRuntime>,
    ) -> Self {
        Self {
            config,
            lease_store,
            platform,
            runtime,
            running: Mutex::new(HashMap::new()),
        }
    }

    /// Runs a single reconcile tick (spec §4.5, steps 1-4).
    pub async fn reconcile_once(&self) -> anyhow::Result<()> {
        let start = std::time::Instant::now();
        let result = self.reconcile_inner().await;
        hermod_metrics::worker_sync_duration(start.elapsed().as_secs_f64());
        if result.is_err() {
            hermod_metrics::worker_sync_error();
        }
        result
    }

    async fn reconcile_inner(&self) -> anyhow::Result<()> {
        let desired = self.platform.fetch_desired_workflows().await?;
        let weights = self.platform.fetch_worker_weights().await.unwrap_or_default();

        let mut running = self.running.lock().await;
        let mut mine: Vec<String> = Vec::new();

        for workflow in &desired {
            let owns = if let Some(pinned) = &workflow.owner_worker {
                pinned == &self.config.worker_id
            } else if weights.is_empty() {
                owns_by_hash(&workflow.id, self.config.worker_index, self.config.total_workers)
            } else {
                let current_owner = running.contains_key(&workflow.id).then_some(self.config.worker_id.as_str());
                pick_owner(&workflow.id, &weights, current_owner, self.config.hysteresis)
                    .map(|w| w == self.config.worker_id)
                    .unwrap_or(false)
            };
            if owns {
                mine.push(workflow.id.clone());
            }
        }

        // Step 2: start newly desired workflows not yet running.
        for workflow_id in &mine {
            if running.contains_key(workflow_id) {
                continue;
            }
            match self
                .lease_store
                .acquire(workflow_id, &self.config.worker_id, self.config.lease_ttl)
                .await
            {
                Ok(true) => {
                    hermod_metrics::lease_acquire();
                    if let Err(err) = self.runtime.start(workflow_id).await {
                        warn!(%workflow_id, error = %err, "failed to start engine after lease acquire");
                        continue;
                    }
                    running.insert(
                        workflow_id.clone(),
                        Utc::now() + self.config.lease_ttl,
                    );
                    info!(%workflow_id, "acquired lease and started engine");
                }
                Ok(false) => {}
                Err(err) => warn!(%workflow_id, error = %err, "lease acquire failed"),
            }
        }

        // Step 3: renew leases nearing expiry for workflows we're running.
        let half_ttl = chrono::Duration::milliseconds(self.config.lease_ttl.num_milliseconds() / 2);
        for (workflow_id, lease_until) in running.clone().iter() {
            if !mine.contains(workflow_id) {
                continue;
            }
            if *lease_until - Utc::now() > half_ttl {
                continue;
            }
            match self
                .lease_store
                .renew(workflow_id, &self.config.worker_id, self.config.lease_ttl)
                .await
            {
                Ok(true) => {
                    running.insert(workflow_id.clone(), Utc::now() + self.config.lease_ttl);
                }
                Ok(false) => {
                    hermod_metrics::lease_renew_error();
                    warn!(%workflow_id, "lease lost, draining engine");
                    let _ = self.runtime.stop(workflow_id).await;
                    running.remove(workflow_id);
                }
                Err(err) => {
                    hermod_metrics::lease_renew_error();
                    warn!(%workflow_id, error = %err, "lease renew call failed");
                }
            }
        }

        // Step 4: stop engines no longer desired by this worker.
        let to_stop: Vec<String> = running
            .keys()
            .filter(|id| !mine.contains(id))
            .cloned()
            .collect();
        for workflow_id in to_stop {
            let _ = self.runtime.stop(&workflow_id).await;
            let _ = self.lease_store.release(&workflow_id, &self.config.worker_id).await;
            running.remove(&workflow_id);
        }

        hermod_metrics::worker_leases_owned(running.len() as u64);
        hermod_metrics::worker_active_workflows(running.len() as u64);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;

    struct FakeLeaseStore {
        leases: StdMutex<HashMap<String, String>>,
    }

    impl FakeLeaseStore {
        fn new() -> Self {
            Self {
                leases: StdMutex::new(HashMap::new()),
            }
        }
    }

    #[async_trait::async_trait]
    impl LeaseStore for FakeLeaseStore {
        async fn acquire(
            &self,
            workflow_id: &str,
            owner_id: &str,
            _ttl: chrono::Duration,
        ) -> anyhow::Result<bool> {
            let mut leases = self.leases.lock().unwrap();
            match leases.get(workflow_id) {
                Some(owner) if owner != owner_id => Ok(false),
                _ => {
                    leases.insert(workflow_id.to_string(), owner_id.to_string());
                    Ok(true)
                }
            }
        }

        async fn renew(
            &self,
            workflow_id: &str,
            owner_id: &str,
            _ttl: chrono::Duration,
        ) -> anyhow::Result<bool> {
            let leases = self.leases.lock().unwrap();
            Ok(leases.get(workflow_id).map(|o| o == owner_id).unwrap_or(false))
        }

        async fn release(&self, workflow_id: &str, owner_id: &str) -> anyhow::Result<()> {
            let mut leases = self.leases.lock().unwrap();
            if leases.get(workflow_id).map(|o| o == owner_id).unwrap_or(false) {
                leases.remove(workflow_id);
            }
            Ok(())
        }
    }

    struct FakePlatform {
        workflows: Vec<Workflow>,
    }

    #[async_trait::async_trait]
    impl PlatformClient for FakePlatform {
        async fn fetch_desired_workflows(&self) -> anyhow::Result<Vec<Workflow>> {
            Ok(self.workflows.clone())
        }
        async fn fetch_worker_weights(&self) -> anyhow::Result<Vec<WorkerWeight>> {
            Ok(Vec::new())
        }
    }

    #[derive(Default)]
    struct FakeRuntime {
        started: StdMutex<Vec<String>>,
        stopped: StdMutex<Vec<String>>,
    }

    #[async_trait::async_trait]
    impl WorkflowRuntime for FakeRuntime {
        async fn start(&self, workflow_id: &str) -> anyhow::Result<()> {
            self.started.lock().unwrap().push(workflow_id.to_string());
            Ok(())
        }
        async fn stop(&self, workflow_id: &str) -> anyhow::Result<()> {
            self.stopped.lock().unwrap().push(workflow_id.to_string());
            Ok(())
        }
    }

    fn supervisor_for(
        worker_index: u32,
        total_workers: u32,
        workflows: Vec<Workflow>,
    ) -> (Supervisor, Arc<FakeRuntime>) {
        let runtime = Arc::new(FakeRuntime::default());
        let supervisor = Supervisor::new(
            SupervisorConfig {
                worker_id: format!("worker-{worker_index}"),
                total_workers,
                worker_index,
                lease_ttl: chrono::Duration::seconds(30),
                hysteresis: 1.15,
            },
            Arc::new(FakeLeaseStore::new()),
            Arc::new(FakePlatform { workflows }),
            runtime.clone(),
        );
        (supervisor, runtime)
    }

    #[tokio::test]
    async fn owned_workflow_is_started_exactly_once() {
        let workflow = Workflow {
            id: "wf-1".into(),
            resource_hints: None,
            owner_worker: None,
        };
        // total_workers=1 guarantees worker 0 owns every workflow by hash.
        let (supervisor, runtime) = supervisor_for(0, 1, vec![workflow]);

        supervisor.reconcile_once().await.unwrap();
        supervisor.reconcile_once().await.unwrap();

        assert_eq!(runtime.started.lock().unwrap().as_slice(), ["wf-1"]);
    }

    #[tokio::test]
    async fn pinned_owner_bypasses_rendezvous_hashing() {
        let workflow = Workflow {
            id: "wf-1".into(),
            resource_hints: None,
            owner_worker: Some("worker-0".into()),
        };
        // total_workers=4 with worker_index=3 would not own "wf-1" by hash,
        // but the explicit pin must win regardless.
        let (supervisor, runtime) = supervisor_for(3, 4, vec![workflow]);

        supervisor.reconcile_once().await.unwrap();

        assert!(runtime.started.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn pinned_owner_is_started_even_against_the_hash() {
        let workflow = Workflow {
            id: "wf-1".into(),
            resource_hints: None,
            owner_worker: Some("worker-3".into()),
        };
        // total_workers=4 with worker_index=3: pin names this worker, so it
        // must start the workflow regardless of what the hash would say.
        let (supervisor, runtime) = supervisor_for(3, 4, vec![workflow]);

        supervisor.reconcile_once().await.unwrap();

        assert_eq!(runtime.started.lock().unwrap().as_slice(), ["wf-1"]);
    }

    #[tokio::test]
    async fn workflow_no_longer_desired_is_stopped() {
        let workflow = Workflow {
            id: "wf-1".into(),
            resource_hints: None,
            owner_worker: None,
        };
        let (supervisor, runtime) = supervisor_for(0, 1, vec![workflow]);
        supervisor.reconcile_once().await.unwrap();
        assert_eq!(runtime.started.lock().unwrap().as_slice(), ["wf-1"]);

        // Hash-based ownership for worker 0 of 2 depends on the hash of
        // "wf-1"; force the undesired path directly by emptying the
        // platform's desired set instead of depending on hash output.
        let empty_platform = Arc::new(FakePlatform { workflows: vec![] });
        let supervisor_again = Supervisor {
            config: SupervisorConfig {
                worker_id: "worker-0".into(),
                total_workers: 1,
                worker_index: 0,
                lease_ttl: chrono::Duration::seconds(30),
                hysteresis: 1.15,
            },
            lease_store: Arc::new(FakeLeaseStore::new()),
            platform: empty_platform,
            runtime: runtime.clone(),
            running: Mutex::new({
                let mut m = HashMap::new();
                m.insert("wf-1".to_string(), Utc::now() + chrono::Duration::seconds(30));
                m
            }),
        };
        supervisor_again.reconcile_once().await.unwrap();
        assert_eq!(runtime.stopped.lock().unwrap().as_slice(), ["wf-1"]);
    }
}
