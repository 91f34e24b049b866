//! Per-workflow execution engine (spec §4.3): state machine, preflight,
//! main read/transform/write loop, and graceful draining.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use async_trait::async_trait;
use futures::future::join_all;
use hermod_connector::{Context, HermodError, SourceHandle, TwoPhaseSink};
use hermod_idempotency::IdempotencyStore;
use hermod_mesh::Router as MeshRouter;
use hermod_message::{Message, MessagePool};
use hermod_outbox::{OutboxItem, OutboxStorage};
use hermod_state::StateStore;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{error, info, instrument, warn};

use crate::writer::SinkWriter;

/// Lifecycle states a workflow engine moves through (spec §4.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Idle,
    Starting,
    Running,
    Draining,
    Stopped,
    Failed,
}

/// Outcome of a single transform application.
pub enum TransformOutcome {
    Keep(Message),
    /// Filtered out: not an error, just excluded from downstream delivery.
    Filtered,
}

/// A single step of a workflow's transform chain (spec §4.3). Implementations
/// own their own state-store key scheme via `self.id()` composed with the
/// engine's `workflow_id`.
#[async_trait]
pub trait Transform: Send + Sync {
    fn id(&self) -> &str;

    async fn apply(
        &self,
        cx: &Context,
        state: &dyn StateStore,
        workflow_id: &str,
        msg: Message,
    ) -> anyhow::Result<TransformOutcome>;
}

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub workflow_id: String,
    pub max_inflight: usize,
    pub preflight_timeout: Duration,
    pub drain_timeout: Duration,
    pub idempotency_namespace: String,
    pub consecutive_empty_threshold: u32,
    pub prioritize_dlq: bool,
    pub two_phase_commit: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            workflow_id: String::new(),
            max_inflight: 128,
            preflight_timeout: Duration::from_secs(10),
            drain_timeout: Duration::ZERO,
            idempotency_namespace: "default".into(),
            consecutive_empty_threshold: 5,
            prioritize_dlq: false,
            two_phase_commit: false,
        }
    }
}

struct Throughput {
    limit: AtomicUsize,
    max: usize,
    window_total: AtomicU64,
    window_errors: AtomicU64,
}

impl Throughput {
    fn new(max: usize) -> Self {
        Self {
            limit: AtomicUsize::new(max),
            max,
            window_total: AtomicU64::new(0),
            window_errors: AtomicU64::new(0),
        }
    }

    fn record(&self, failed: bool) {
        self.window_total.fetch_add(1, Ordering::Relaxed);
        if failed {
            self.window_errors.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Multiplicative decrease on elevated error rate, additive increase
    /// otherwise (spec §4.3, "adaptive throughput control").
    fn retune(&self, semaphore: &Semaphore) {
        let total = self.window_total.swap(0, Ordering::Relaxed);
        let errors = self.window_errors.swap(0, Ordering::Relaxed);
        if total < 10 {
            return;
        }
        let error_rate = errors as f64 / total as f64;
        let current = self.limit.load(Ordering::Relaxed);
        if error_rate > 0.1 {
            let next = (current / 2).max(1);
            let delta = current.saturating_sub(next);
            if delta > 0 {
                semaphore.forget_permits(delta);
                self.limit.store(next, Ordering::Relaxed);
                warn!(error_rate, next, "throughput control: backing off max_inflight");
            }
        } else if error_rate < 0.01 && current < self.max {
            let next = (current + 8).min(self.max);
            semaphore.add_permits(next - current);
            self.limit.store(next, Ordering::Relaxed);
        }
    }
}

/// The per-workflow execution engine (spec §4.3, §4.4).
pub struct Engine {
    config: EngineConfig,
    source: SourceHandle,
    dlq_source: Option<SourceHandle>,
    sinks: Vec<Arc<SinkWriter>>,
    dlq: Option<Arc<SinkWriter>>,
    two_phase_sinks: Vec<Arc<dyn TwoPhaseSink>>,
    idempotency: Arc<dyn IdempotencyStore>,
    state_store: Arc<dyn StateStore>,
    outbox: Option<Arc<dyn OutboxStorage>>,
    mesh: Option<Arc<MeshRouter>>,
    transforms: Vec<Arc<dyn Transform>>,
    state: StdMutex<EngineState>,
    cancel: Context,
    inflight: Arc<Semaphore>,
    throughput: Throughput,
    pool: Arc<MessagePool>,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("workflow_id", &self.config.workflow_id)
            .finish_non_exhaustive()
    }
}

impl Engine {
    pub fn new(
        config: EngineConfig,
        source: SourceHandle,
        sinks: Vec<Arc<SinkWriter>>,
        idempotency: Arc<dyn IdempotencyStore>,
        state_store: Arc<dyn StateStore>,
    ) -> Self {
        let max_inflight = config.max_inflight.max(1);
        Self {
            source,
            dlq_source: None,
            sinks,
            dlq: None,
            two_phase_sinks: Vec::new(),
            idempotency,
            state_store,
            outbox: None,
            mesh: None,
            transforms: Vec::new(),
            state: StdMutex::new(EngineState::Idle),
            cancel: Context::new(),
            inflight: Arc::new(Semaphore::new(max_inflight)),
            throughput: Throughput::new(max_inflight),
            pool: Arc::new(MessagePool::new()),
            config,
        }
    }

    pub fn with_dlq(mut self, dlq: Arc<SinkWriter>, dlq_source: Option<SourceHandle>) -> Self {
        self.dlq = Some(dlq);
        self.dlq_source = dlq_source;
        self
    }

    /// Enables two-phase commit: every sink listed here is driven via
    /// `prepare`/`commit_prepared`/`rollback_prepared` instead of going
    /// through a `SinkWriter`'s shard lanes (spec §4.3). Callers should
    /// only populate this when every configured sink for the workflow
    /// implements `TwoPhaseSink`.
    pub fn with_two_phase_sinks(mut self, sinks: Vec<Arc<dyn TwoPhaseSink>>) -> Self {
        self.two_phase_sinks = sinks;
        self
    }

    pub fn with_outbox(mut self, outbox: Arc<dyn OutboxStorage>) -> Self {
        self.outbox = Some(outbox);
        self
    }

    /// Routes any message carrying `target_cluster`/`target_region`
    /// metadata to a peer cluster instead of this workflow's configured
    /// sinks (spec §4.6). Messages without that metadata fall through to
    /// the normal sink write.
    pub fn with_mesh(mut self, mesh: Arc<MeshRouter>) -> Self {
        self.mesh = Some(mesh);
        self
    }

    pub fn with_transforms(mut self, transforms: Vec<Arc<dyn Transform>>) -> Self {
        self.transforms = transforms;
        self
    }

    pub fn state(&self) -> EngineState {
        *self.state.lock().expect("engine state mutex poisoned")
    }

    fn set_state(&self, next: EngineState) {
        *self.state.lock().expect("engine state mutex poisoned") = next;
    }

    /// Cancels the root context; the running loop observes this at its next
    /// suspension point and transitions to `Draining` (spec §5).
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    async fn preflight(&self) -> anyhow::Result<()> {
        let timeout = self.config.preflight_timeout;
        tokio::time::timeout(timeout, self.source.source.ping(&self.cancel))
            .await
            .map_err(|_| anyhow::anyhow!("preflight timed out pinging source"))??;
        for sink in &self.sinks {
            tokio::time::timeout(timeout, sink.ping(&self.cancel))
                .await
                .map_err(|_| anyhow::anyhow!("preflight timed out pinging sink"))??;
        }
        if let Some(dlq) = &self.dlq {
            tokio::time::timeout(timeout, dlq.ping(&self.cancel))
                .await
                .map_err(|_| anyhow::anyhow!("preflight timed out pinging dlq"))??;
        }
        Ok(())
    }

    /// Runs preflight, the main loop, and draining to completion. Intended
    /// to be spawned by a `WorkflowRuntime` and awaited (or abandoned) on
    /// `stop()`.
    #[instrument(skip(self), fields(workflow_id = %self.config.workflow_id))]
    pub async fn run(self: Arc<Self>) -> anyhow::Result<()> {
        self.set_state(EngineState::Starting);
        if let Err(err) = self.preflight().await {
            self.set_state(EngineState::Failed);
            return Err(err);
        }
        self.set_state(EngineState::Running);
        info!("engine running");

        let mut tasks = JoinSet::new();
        let mut consecutive_empty_dlq = 0u32;
        let mut retune_ticker = tokio::time::interval(Duration::from_secs(5));

        loop {
            if self.cancel.is_cancelled() {
                break;
            }

            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                _ = retune_ticker.tick() => {
                    self.throughput.retune(&self.inflight);
                    continue;
                }
                permit = self.inflight.clone().acquire_owned() => {
                    let permit = match permit {
                        Ok(p) => p,
                        Err(_) => break,
                    };

                    let read_from_dlq = self.config.prioritize_dlq
                        && self.dlq_source.is_some()
                        && consecutive_empty_dlq < self.config.consecutive_empty_threshold;

                    let msg = if read_from_dlq {
                        let dlq_source = self.dlq_source.as_ref().unwrap();
                        match dlq_source.source.read(&self.cancel).await {
                            Ok(Some(msg)) => {
                                consecutive_empty_dlq = 0;
                                Some(msg)
                            }
                            Ok(None) => {
                                consecutive_empty_dlq += 1;
                                None
                            }
                            Err(err) => {
                                warn!(%err, "dlq source read failed");
                                consecutive_empty_dlq += 1;
                                None
                            }
                        }
                    } else {
                        match self.source.source.read(&self.cancel).await {
                            Ok(Some(msg)) => Some(msg),
                            Ok(None) => None,
                            Err(err) => {
                                error!(%err, "source read failed");
                                None
                            }
                        }
                    };

                    match msg {
                        Some(msg) => {
                            // Spec §4.1: messages are acquired from a process-wide
                            // pool at source ingest rather than allocated fresh.
                            let msg = self.pool.acquire_from(msg);
                            let engine = self.clone();
                            tasks.spawn(async move {
                                let _permit = permit;
                                engine.process_one(msg).await;
                            });
                        }
                        None => {
                            drop(permit);
                            tokio::time::sleep(Duration::from_millis(50)).await;
                        }
                    }
                }
            }

            // Bound the in-memory task set so a long run doesn't accumulate
            // finished JoinHandles indefinitely.
            while tasks.len() > self.config.max_inflight.max(1) * 2 {
                tasks.join_next().await;
            }
        }

        self.set_state(EngineState::Draining);
        info!("engine draining");
        self.drain(&mut tasks).await;

        let _ = self.source.source.close().await;
        for sink in &self.sinks {
            let _ = sink.close_sink().await;
        }
        if let Some(dlq) = &self.dlq {
            let _ = dlq.close_sink().await;
        }

        self.set_state(EngineState::Stopped);
        info!("engine stopped");
        Ok(())
    }

    async fn drain(&self, tasks: &mut JoinSet<()>) {
        if self.config.drain_timeout.is_zero() {
            while tasks.join_next().await.is_some() {}
            return;
        }
        let _ = tokio::time::timeout(self.config.drain_timeout, async {
            while tasks.join_next().await.is_some() {}
        })
        .await;
        tasks.abort_all();
    }

    #[instrument(skip(self, msg), fields(workflow_id = %self.config.workflow_id, message_id = %msg.id()))]
    async fn process_one(self: Arc<Self>, msg: Message) {
        let started = std::time::Instant::now();
        let outcome = self.process_one_inner(msg).await;
        let failed = outcome.is_err();
        self.throughput.record(failed);
        hermod_metrics::processing_duration(started.elapsed().as_secs_f64());
        if let Err(err) = outcome {
            error!(%err, "message processing failed");
        }
    }

    async fn process_one_inner(&self, mut msg: Message) -> anyhow::Result<()> {
        // Kept alongside the in-flight `msg` so ack() always sees the
        // as-read message (offsets/partitions a real source tracks),
        // independent of whatever the transform chain does to the payload.
        let original = msg.clone();
        let key = msg.id().to_string();
        let claimed = self
            .idempotency
            .claim(&self.config.idempotency_namespace, &key)
            .await?;
        if !claimed {
            info!("duplicate delivery, skipping sink writes");
            self.source.source.ack(&self.cancel, &original).await?;
            self.pool.release(original);
            return Ok(());
        }

        for transform in &self.transforms {
            match transform
                .apply(&self.cancel, self.state_store.as_ref(), &self.config.workflow_id, msg)
                .await
            {
                Ok(TransformOutcome::Keep(next)) => msg = next,
                Ok(TransformOutcome::Filtered) => {
                    hermod_metrics::messages_filtered();
                    self.source.source.ack(&self.cancel, &original).await?;
                    self.pool.release(original);
                    return Ok(());
                }
                Err(err) => {
                    hermod_metrics::message_error("transform");
                    return self.route_to_dlq_or_fail(err, transform.id(), original).await;
                }
            }
        }

        if let Some(mesh) = &self.mesh {
            match mesh.route(&mut msg).await {
                Ok(true) => {
                    self.idempotency
                        .mark_sent(&self.config.idempotency_namespace, &key)
                        .await?;
                    self.source.source.ack(&self.cancel, &original).await?;
                    hermod_metrics::messages_processed();
                    self.pool.release(original);
                    return Ok(());
                }
                Ok(false) => {}
                Err(err) => {
                    hermod_metrics::message_error("mesh");
                    return self.route_to_dlq_or_fail(err.into(), "mesh", original).await;
                }
            }
        }

        if self.config.two_phase_commit && !self.two_phase_sinks.is_empty() {
            return self.process_two_phase(msg, original, &key).await;
        }

        let writes = self
            .sinks
            .iter()
            .map(|sink| {
                let msg = msg.clone();
                async move { sink.submit(msg).await }
            })
            .collect::<Vec<_>>();
        let mut results = join_all(writes).await;

        if let Some(idx) = results.iter().position(Result::is_err) {
            let failure = results.remove(idx).unwrap_err();
            hermod_metrics::message_error("sink");
            return self.route_classified_to_dlq_or_fail(failure, "sink", original).await;
        }

        self.idempotency
            .mark_sent(&self.config.idempotency_namespace, &key)
            .await?;
        self.source.source.ack(&self.cancel, &original).await?;
        hermod_metrics::messages_processed();
        self.pool.release(original);
        Ok(())
    }

    /// Prepares the message on every two-phase sink, durably records the
    /// prepared ids so a crash between prepare and commit can be resumed
    /// from the outbox, then commits (or rolls back all on any prepare
    /// failure).
    async fn process_two_phase(&self, msg: Message, original: Message, key: &str) -> anyhow::Result<()> {
        let msgs = [msg];
        let mut prepared = Vec::with_capacity(self.two_phase_sinks.len());

        for (idx, sink) in self.two_phase_sinks.iter().enumerate() {
            match sink.prepare(&self.cancel, &msgs).await {
                Ok(id) => prepared.push((idx, sink.clone(), id)),
                Err(err) => {
                    for (_, sink, id) in &prepared {
                        if let Err(rollback_err) = sink.rollback_prepared(&self.cancel, id).await {
                            error!(%rollback_err, "rollback of prepared txn failed");
                        }
                    }
                    return Err(err);
                }
            }
        }

        if let Some(outbox) = &self.outbox {
            for (idx, _, id) in &prepared {
                let mut metadata = BTreeMap::new();
                metadata.insert("prepared_txn_id".to_string(), id.0.clone());
                record_outbox_item(
                    outbox.as_ref(),
                    &self.config.workflow_id,
                    &idx.to_string(),
                    Vec::new(),
                    metadata,
                )
                .await?;
            }
        }

        for (_, sink, id) in &prepared {
            sink.commit_prepared(&self.cancel, id).await?;
        }

        self.idempotency
            .mark_sent(&self.config.idempotency_namespace, key)
            .await?;
        self.source.source.ack(&self.cancel, &original).await?;
        hermod_metrics::messages_processed();
        self.pool.release(original);
        Ok(())
    }

    async fn route_to_dlq_or_fail(&self, err: anyhow::Error, stage: &str, original: Message) -> anyhow::Result<()> {
        self.route_classified_to_dlq_or_fail(HermodError::classify(err), stage, original)
            .await
    }

    /// Routes a classified failure to the DLQ sink when eligible. A
    /// successful DLQ write acks the original message on the source -
    /// it has a durable home, so redelivery would only duplicate it there.
    /// Without a DLQ (or when ineligible), this returns `Err` unacked and
    /// leaves redelivery to the source's own mechanism.
    async fn route_classified_to_dlq_or_fail(
        &self,
        classified: HermodError,
        stage: &str,
        original: Message,
    ) -> anyhow::Result<()> {
        match &self.dlq {
            Some(dlq) if classified.is_dlq_eligible() || !classified.is_retryable() => {
                let mut dlq_msg = original.clone();
                dlq_msg.set_metadata("failed_stage", stage);
                dlq_msg.set_metadata("error", classified.to_string());
                if let Err(dlq_err) = dlq.submit(dlq_msg).await {
                    error!(%dlq_err, "dlq write itself failed");
                    return Err(anyhow::anyhow!(classified));
                }
                self.source.source.ack(&self.cancel, &original).await?;
                hermod_metrics::dead_letter();
                self.pool.release(original);
                Ok(())
            }
            _ => Err(anyhow::anyhow!(classified)),
        }
    }
}

/// Persists a prepared two-phase write to the outbox so a crash between
/// `prepare` and `commit_prepared` can be recovered by the sweeper.
async fn record_outbox_item(
    outbox: &dyn OutboxStorage,
    workflow_id: &str,
    sink_id: &str,
    payload: Vec<u8>,
    metadata: BTreeMap<String, String>,
) -> anyhow::Result<()> {
    let mut item = OutboxItem::new(uuid::Uuid::new_v4().to_string(), workflow_id, sink_id, payload);
    item.metadata = metadata;
    outbox.enqueue(item).await
}
