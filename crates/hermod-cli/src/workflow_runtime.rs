//! Concrete `WorkflowRuntime` (spec §4.5): bridges the supervisor's
//! start/stop calls to spawning and draining `hermod_engine::Engine`
//! instances.
//!
//! Building an `Engine` for a workflow means resolving its source and sink
//! refs to concrete connectors, and concrete connector protocol handling
//! (Kafka, SQL CDC, S3, ...) is out of scope for this codebase (spec §1).
//! `ConnectorFactory` is the seam: anything that can turn a workflow id into
//! a fully wired `Engine` satisfies it. `main.rs` wires in whatever factory
//! the deployment has available; with none configured it uses
//! [`UnconfiguredConnectorFactory`], which fails loudly rather than silently
//! dropping workflows.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use hermod_engine::Engine;
use hermod_supervisor::WorkflowRuntime;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

#[async_trait]
pub trait ConnectorFactory: Send + Sync {
    async fn build(&self, workflow_id: &str) -> anyhow::Result<Engine>;
}

pub struct UnconfiguredConnectorFactory;

#[async_trait]
impl ConnectorFactory for UnconfiguredConnectorFactory {
    async fn build(&self, workflow_id: &str) -> anyhow::Result<Engine> {
        anyhow::bail!(
            "no connector factory is configured; workflow {workflow_id} cannot be \
             materialized into source/sink connectors from this binary alone"
        )
    }
}

struct RunningEngine {
    engine: Arc<Engine>,
    handle: JoinHandle<anyhow::Result<()>>,
}

/// Tracks one spawned `Engine` task per owned workflow id, and drives
/// graceful shutdown through `Engine::stop` + bounded join (spec §5).
pub struct EngineRuntime {
    factory: Arc<dyn ConnectorFactory>,
    running: Mutex<HashMap<String, RunningEngine>>,
    stop_timeout: std::time::Duration,
}

impl EngineRuntime {
    pub fn new(factory: Arc<dyn ConnectorFactory>, stop_timeout: std::time::Duration) -> Self {
        Self {
            factory,
            running: Mutex::new(HashMap::new()),
            stop_timeout,
        }
    }

    pub async fn running_count(&self) -> usize {
        self.running.lock().await.len()
    }

    /// Stops every tracked engine; used on process shutdown in addition to
    /// the supervisor's own per-workflow stop calls.
    pub async fn stop_all(&self) {
        let mut running = self.running.lock().await;
        for (workflow_id, entry) in running.drain() {
            entry.engine.stop();
            if tokio::time::timeout(self.stop_timeout, entry.handle).await.is_err() {
                warn!(%workflow_id, "engine did not stop within the shutdown timeout");
            }
        }
    }
}

#[async_trait]
impl WorkflowRuntime for EngineRuntime {
    async fn start(&self, workflow_id: &str) -> anyhow::Result<()> {
        let mut running = self.running.lock().await;
        if running.contains_key(workflow_id) {
            return Ok(());
        }
        let engine = Arc::new(self.factory.build(workflow_id).await?);
        let spawned = engine.clone();
        let handle = tokio::spawn(async move {
            let result = spawned.run().await;
            if let Err(err) = &result {
                error!(%err, "engine task exited with an error");
            }
            result
        });
        info!(%workflow_id, "engine task spawned");
        running.insert(workflow_id.to_string(), RunningEngine { engine, handle });
        Ok(())
    }

    async fn stop(&self, workflow_id: &str) -> anyhow::Result<()> {
        let entry = self.running.lock().await.remove(workflow_id);
        let Some(entry) = entry else {
            return Ok(());
        };
        entry.engine.stop();
        if tokio::time::timeout(self.stop_timeout, entry.handle).await.is_err() {
            warn!(%workflow_id, "engine did not stop within the shutdown timeout");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hermod_connector::{Context, Sink, SinkHandle, Source, SourceHandle, WriteOutcome};
    use hermod_engine::{EngineConfig, SinkWriter, SinkWriterConfig};
    use hermod_idempotency::InMemoryIdempotencyStore;
    use hermod_message::Message;
    use hermod_state::SqliteStateStore;

    struct IdleSource;
    #[async_trait]
    impl Source for IdleSource {
        async fn read(&self, _cx: &Context) -> anyhow::Result<Option<Message>> {
            Ok(None)
        }
        async fn ack(&self, _cx: &Context, _msg: &Message) -> anyhow::Result<()> {
            Ok(())
        }
        async fn ping(&self, _cx: &Context) -> anyhow::Result<()> {
            Ok(())
        }
        async fn close(&self) -> anyhow::Result<()> {
            Ok(())
        }
    }

    struct NoopSink;
    #[async_trait]
    impl Sink for NoopSink {
        async fn write(&self, _cx: &Context, _msg: &Message) -> anyhow::Result<WriteOutcome> {
            Ok(WriteOutcome::ok())
        }
        async fn ping(&self, _cx: &Context) -> anyhow::Result<()> {
            Ok(())
        }
        async fn close(&self) -> anyhow::Result<()> {
            Ok(())
        }
    }

    struct FakeFactory;
    #[async_trait]
    impl ConnectorFactory for FakeFactory {
        async fn build(&self, workflow_id: &str) -> anyhow::Result<Engine> {
            let sink = SinkHandle::new("primary", Arc::new(NoopSink));
            let writer = Arc::new(SinkWriter::new(sink, SinkWriterConfig::default())?);
            Ok(Engine::new(
                EngineConfig {
                    workflow_id: workflow_id.to_string(),
                    ..Default::default()
                },
                SourceHandle::new(Arc::new(IdleSource)),
                vec![writer],
                Arc::new(InMemoryIdempotencyStore::new()),
                Arc::new(SqliteStateStore::open_in_memory().unwrap()),
            ))
        }
    }

    #[tokio::test]
    async fn start_is_idempotent_for_an_already_running_workflow() {
        let runtime = EngineRuntime::new(Arc::new(FakeFactory), std::time::Duration::from_secs(2));
        runtime.start("wf-1").await.unwrap();
        runtime.start("wf-1").await.unwrap();
        assert_eq!(runtime.running.lock().await.len(), 1);
        runtime.stop_all().await;
    }

    #[tokio::test]
    async fn stop_removes_and_joins_the_engine_task() {
        let runtime = EngineRuntime::new(Arc::new(FakeFactory), std::time::Duration::from_secs(2));
        runtime.start("wf-1").await.unwrap();
        runtime.stop("wf-1").await.unwrap();
        assert!(runtime.running.lock().await.is_empty());
    }

    #[tokio::test]
    async fn unconfigured_factory_fails_loudly() {
        let err = UnconfiguredConnectorFactory.build("wf-1").await.unwrap_err();
        assert!(err.to_string().contains("wf-1"));
    }
}
