//! Per-sink writer fronting every configured `Sink` (spec §4.4): shard-keyed
//! ordering, adaptive batching, bounded per-lane backpressure, idempotency
//! reporting, and an optional pre-write validation hook.

use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use hermod_buffer::{Buffer, FileBuffer};
use hermod_connector::{Context, HermodError, SinkHandle, WriteOutcome};
use hermod_message::Message;
use tokio::sync::{oneshot, Notify};
use tracing::{info, warn};

use crate::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig};
use crate::retry::RetryPolicy;

/// Strategy applied when a lane's bounded queue is full (spec §4.4,
/// `SinkConfig.backpressure_strategy`).
#[derive(Debug, Clone)]
pub enum BackpressureStrategy {
    Block,
    DropOldest,
    DropNewest,
    /// Admits the new item with probability `p`; otherwise drops it.
    Sampling(f64),
    SpillToDisk(PathBuf),
}

#[derive(Debug, Clone)]
pub struct SinkWriterConfig {
    pub shard_count: usize,
    pub shard_key_meta: Option<String>,
    pub batch_size: usize,
    pub batch_bytes: usize,
    pub batch_timeout: Duration,
    pub backpressure_buffer: usize,
    pub backpressure_strategy: BackpressureStrategy,
    pub retry: RetryPolicy,
    pub circuit_breaker: CircuitBreakerConfig,
}

impl Default for SinkWriterConfig {
    fn default() -> Self {
        Self {
            shard_count: 1,
            shard_key_meta: None,
            batch_size: 100,
            batch_bytes: 1_000_000,
            batch_timeout: Duration::from_millis(250),
            backpressure_buffer: 1024,
            backpressure_strategy: BackpressureStrategy::Block,
            retry: RetryPolicy::default(),
            circuit_breaker: CircuitBreakerConfig::default(),
        }
    }
}

type Responder = oneshot::Sender<Result<WriteOutcome, HermodError>>;

struct Pending {
    message: Message,
    respond: Responder,
}

struct LaneState {
    queue: VecDeque<Pending>,
    closed: bool,
}

struct Lane {
    state: StdMutex<LaneState>,
    notify_items: Notify,
    notify_space: Notify,
    capacity: usize,
    overflow: Option<FileBuffer>,
    pending_by_id: StdMutex<HashMap<String, Responder>>,
}

impl Lane {
    fn new(capacity: usize, overflow: Option<FileBuffer>) -> Self {
        Self {
            state: StdMutex::new(LaneState {
                queue: VecDeque::new(),
                closed: false,
            }),
            notify_items: Notify::new(),
            notify_space: Notify::new(),
            capacity,
            overflow,
            pending_by_id: StdMutex::new(HashMap::new()),
        }
    }

    fn len(&self) -> usize {
        self.state.lock().expect("lane mutex poisoned").queue.len()
    }

    fn close(&self) {
        self.state.lock().expect("lane mutex poisoned").closed = true;
        self.notify_items.notify_waiters();
    }

    fn push_front_unchecked(&self, item: Pending) {
        self.state
            .lock()
            .expect("lane mutex poisoned")
            .queue
            .push_front(item);
        self.notify_items.notify_one();
    }

    fn push_back(&self, item: Pending) {
        self.state
            .lock()
            .expect("lane mutex poisoned")
            .queue
            .push_back(item);
        self.notify_items.notify_one();
    }

    fn pop_front(&self) -> Option<Pending> {
        let item = self
            .state
            .lock()
            .expect("lane mutex poisoned")
            .queue
            .pop_front();
        if item.is_some() {
            self.notify_space.notify_one();
        }
        item
    }

    fn pop_oldest_for_eviction(&self) -> Option<Pending> {
        self.state.lock().expect("lane mutex poisoned").queue.pop_front()
    }
}

/// Fronts one `Sink` with `shard_count` independently-ordered lanes
/// (spec §4.4).
pub struct SinkWriter {
    handle: SinkHandle,
    config: SinkWriterConfig,
    lanes: Vec<Arc<Lane>>,
    breaker: CircuitBreaker,
}

impl SinkWriter {
    pub fn new(handle: SinkHandle, config: SinkWriterConfig) -> anyhow::Result<Self> {
        let shard_count = config.shard_count.max(1);
        let overflow_base = match &config.backpressure_strategy {
            BackpressureStrategy::SpillToDisk(dir) => Some(dir.clone()),
            _ => None,
        };
        let mut lanes = Vec::with_capacity(shard_count);
        for i in 0..shard_count {
            let overflow = overflow_base
                .as_ref()
                .map(|dir| FileBuffer::open(dir.join(format!("lane-{i}")), config.backpressure_buffer))
                .transpose()?;
            lanes.push(Arc::new(Lane::new(config.backpressure_buffer, overflow)));
        }
        let breaker = CircuitBreaker::new(config.circuit_breaker.clone());

        let writer = Self {
            handle,
            config,
            lanes,
            breaker,
        };
        writer.spawn_lane_workers();
        Ok(writer)
    }

    pub async fn ping(&self, cx: &Context) -> anyhow::Result<()> {
        self.handle.sink.ping(cx).await
    }

    /// Closes every lane (draining their worker tasks) and the underlying
    /// sink connector.
    pub async fn close_sink(&self) -> anyhow::Result<()> {
        for lane in &self.lanes {
            lane.close();
            if let Some(overflow) = &lane.overflow {
                overflow.close().await;
            }
        }
        self.handle.sink.close().await
    }

    fn shard_index(&self, msg: &Message) -> usize {
        let key = self
            .config
            .shard_key_meta
            .as_deref()
            .and_then(|meta_key| msg.metadata_get(meta_key))
            .unwrap_or_else(|| msg.id());
        (fxhash::hash64(key.as_bytes()) % self.lanes.len() as u64) as usize
    }

    /// Hands `msg` to this sink's writer; resolves once the write (or its
    /// exhausted retries / drop) is final.
    pub async fn submit(&self, msg: Message) -> Result<WriteOutcome, HermodError> {
        let lane = self.lanes[self.shard_index(&msg)].clone();
        let (tx, rx) = oneshot::channel();
        let pending = Pending {
            message: msg,
            respond: tx,
        };

        if lane.len() < lane.capacity {
            lane.push_back(pending);
        } else {
            self.admit_over_capacity(&lane, pending).await?;
        }

        rx.await
            .unwrap_or_else(|_| Err(HermodError::Fatal(anyhow::anyhow!("writer lane dropped"))))
    }

    async fn admit_over_capacity(&self, lane: &Arc<Lane>, pending: Pending) -> Result<(), HermodError> {
        match &self.config.backpressure_strategy {
            BackpressureStrategy::Block => {
                loop {
                    if lane.len() < lane.capacity {
                        lane.push_back(pending);
                        return Ok(());
                    }
                    lane.notify_space.notified().await;
                }
            }
            BackpressureStrategy::DropNewest => {
                let _ = pending.respond.send(Err(HermodError::Transient(
                    anyhow::anyhow!("dropped: lane at capacity (drop_newest)"),
                )));
                Ok(())
            }
            BackpressureStrategy::DropOldest => {
                if let Some(evicted) = lane.pop_oldest_for_eviction() {
                    let _ = evicted.respond.send(Err(HermodError::Transient(
                        anyhow::anyhow!("dropped: lane at capacity (drop_oldest)"),
                    )));
                }
                lane.push_back(pending);
                Ok(())
            }
            BackpressureStrategy::Sampling(p) => {
                if rand::random::<f64>() < *p {
                    lane.push_back(pending);
                } else {
                    let _ = pending.respond.send(Err(HermodError::Transient(
                        anyhow::anyhow!("dropped: sampling strategy declined admission"),
                    )));
                }
                Ok(())
            }
            BackpressureStrategy::SpillToDisk(_) => {
                let overflow = lane
                    .overflow
                    .as_ref()
                    .expect("spill-to-disk lane missing overflow buffer");
                let message_id = pending.message.id().to_string();
                lane.pending_by_id
                    .lock()
                    .expect("pending_by_id mutex poisoned")
                    .insert(message_id, pending.respond);
                let cx = Context::new();
                overflow
                    .put(&cx, pending.message)
                    .await
                    .map_err(|err| HermodError::Fatal(err))?;
                Ok(())
            }
        }
    }

    fn spawn_lane_workers(&self) {
        for lane in &self.lanes {
            let lane = lane.clone();
            let handle = self.handle.clone();
            let config = self.config.clone();
            let breaker = self.breaker.clone();
            tokio::spawn(async move {
                lane_worker(lane, handle, config, breaker).await;
            });
        }

        for lane in &self.lanes {
            if lane.overflow.is_some() {
                let lane = lane.clone();
                tokio::spawn(async move {
                    unspill_worker(lane).await;
                });
            }
        }
    }
}

async fn unspill_worker(lane: Arc<Lane>) {
    let cx = Context::new();
    loop {
        if lane.len() >= lane.capacity {
            tokio::time::sleep(Duration::from_millis(50)).await;
            continue;
        }
        let overflow = lane.overflow.as_ref().expect("checked in spawn_lane_workers");
        match overflow.get(&cx).await {
            Ok(Some(message)) => {
                let message_id = message.id().to_string();
                let respond = lane
                    .pending_by_id
                    .lock()
                    .expect("pending_by_id mutex poisoned")
                    .remove(&message_id);
                if let Some(respond) = respond {
                    lane.push_front_unchecked(Pending { message, respond });
                }
            }
            Ok(None) => return,
            Err(_) => tokio::time::sleep(Duration::from_millis(50)).await,
        }
    }
}

async fn lane_worker(
    lane: Arc<Lane>,
    handle: SinkHandle,
    config: SinkWriterConfig,
    breaker: CircuitBreaker,
) {
    let cx = Context::new();
    loop {
        let mut batch = Vec::new();
        let deadline = tokio::time::sleep(config.batch_timeout);
        tokio::pin!(deadline);
        let mut bytes = 0usize;

        loop {
            if batch.len() >= config.batch_size.max(1) || bytes >= config.batch_bytes {
                break;
            }
            tokio::select! {
                biased;
                item = pop_or_wait(&lane) => {
                    match item {
                        Some(mut pending) => {
                            bytes += pending.message.after().len();
                            batch.push(pending);
                        }
                        None if batch.is_empty() => {
                            if lane.state.lock().expect("lane mutex poisoned").closed {
                                return;
                            }
                            continue;
                        }
                        None => break,
                    }
                }
                _ = &mut deadline, if !batch.is_empty() => break,
            }
        }

        if batch.is_empty() {
            continue;
        }

        if let Some(validator) = &handle.validate {
            let mut validated = Vec::with_capacity(batch.len());
            for pending in batch {
                match validator.validate(&cx, &pending.message).await {
                    Ok(()) => validated.push(pending),
                    Err(err) => {
                        let _ = pending
                            .respond
                            .send(Err(HermodError::Validation(err.to_string())));
                    }
                }
            }
            batch = validated;
            if batch.is_empty() {
                continue;
            }
        }

        write_batch_with_retry(&handle, &config, &breaker, batch, &cx).await;
    }
}

async fn pop_or_wait(lane: &Arc<Lane>) -> Option<Pending> {
    loop {
        if let Some(item) = lane.pop_front() {
            return Some(item);
        }
        if lane.state.lock().expect("lane mutex poisoned").closed {
            return None;
        }
        lane.notify_items.notified().await;
        if let Some(item) = lane.pop_front() {
            return Some(item);
        }
        return None;
    }
}

async fn write_batch_with_retry(
    handle: &SinkHandle,
    config: &SinkWriterConfig,
    breaker: &CircuitBreaker,
    batch: Vec<Pending>,
    cx: &Context,
) {
    let mut attempt = 0u32;
    let mut remaining = batch;

    loop {
        if !breaker.allow() {
            if let Some(delay) = config.retry.delay_for(attempt + 1) {
                attempt += 1;
                tokio::time::sleep(delay).await;
                continue;
            }
            fail_all(remaining, HermodError::Transient(anyhow::anyhow!("circuit open")));
            return;
        }

        let messages: Vec<Message> = remaining.iter().map(|p| p.message.clone()).collect();
        let outcome = if let Some(batcher) = &handle.batch {
            batcher.write_batch(cx, &messages).await
        } else {
            write_sequential(&handle.sink, &messages, cx).await
        };

        match outcome {
            Ok(outcomes) => {
                breaker.on_success();
                for (pending, outcome) in remaining.into_iter().zip(outcomes) {
                    if outcome.dedup {
                        info!(message_id = pending.message.id(), "sink reported dedup, counted as delivered");
                    }
                    hermod_metrics::sink_write(&handle.id);
                    let _ = pending.respond.send(Ok(outcome));
                }
                return;
            }
            Err(err) => {
                breaker.on_failure();
                hermod_metrics::sink_write_error(&handle.id);
                let classified = HermodError::classify(err);
                if classified.is_dlq_eligible() {
                    fail_all(remaining, classified);
                    return;
                }
                if !classified.is_retryable() {
                    fail_all(remaining, classified);
                    return;
                }
                attempt += 1;
                match config.retry.delay_for(attempt) {
                    Some(delay) => {
                        warn!(sink_id = %handle.id, attempt, "sink write failed, retrying");
                        tokio::time::sleep(delay).await;
                    }
                    None => {
                        fail_all(remaining, classified);
                        return;
                    }
                }
            }
        }
    }
}

async fn write_sequential(
    sink: &Arc<dyn hermod_connector::Sink>,
    messages: &[Message],
    cx: &Context,
) -> anyhow::Result<Vec<WriteOutcome>> {
    let mut outcomes = Vec::with_capacity(messages.len());
    for msg in messages {
        outcomes.push(sink.write(cx, msg).await?);
    }
    Ok(outcomes)
}

fn fail_all(batch: Vec<Pending>, err: HermodError) {
    let mut err = Some(err);
    let len = batch.len();
    for (i, pending) in batch.into_iter().enumerate() {
        let this_err = if i + 1 == len {
            err.take().unwrap()
        } else {
            match err.as_ref().unwrap() {
                HermodError::Transient(e) => HermodError::Transient(anyhow::anyhow!("{e}")),
                HermodError::Validation(m) => HermodError::Validation(m.clone()),
                HermodError::Fatal(e) => HermodError::Fatal(anyhow::anyhow!("{e}")),
                HermodError::Config(m) => HermodError::Config(m.clone()),
                HermodError::Idempotent(m) => HermodError::Idempotent(m.clone()),
                HermodError::LeaseLost { workflow_id } => HermodError::LeaseLost {
                    workflow_id: workflow_id.clone(),
                },
            }
        };
        let _ = pending.respond.send(Err(this_err));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hermod_connector::Sink;
    use std::sync::atomic::{AtomicU32, Ordering as AtomicOrdering};
    use std::sync::Mutex as StdSyncMutex;

    struct RecordingSink {
        written: StdSyncMutex<Vec<String>>,
        fail_first_n: AtomicU32,
    }

    impl RecordingSink {
        fn new(fail_first_n: u32) -> Self {
            Self {
                written: StdSyncMutex::new(Vec::new()),
                fail_first_n: AtomicU32::new(fail_first_n),
            }
        }
    }

    #[async_trait::async_trait]
    impl Sink for RecordingSink {
        async fn write(&self, _cx: &Context, msg: &Message) -> anyhow::Result<WriteOutcome> {
            let remaining = self.fail_first_n.load(AtomicOrdering::SeqCst);
            if remaining > 0 {
                self.fail_first_n.fetch_sub(1, AtomicOrdering::SeqCst);
                return Err(HermodError::Transient(anyhow::anyhow!("not yet")).into());
            }
            self.written.lock().unwrap().push(msg.id().to_string());
            Ok(WriteOutcome::ok())
        }

        async fn ping(&self, _cx: &Context) -> anyhow::Result<()> {
            Ok(())
        }

        async fn close(&self) -> anyhow::Result<()> {
            Ok(())
        }
    }

    fn fast_retry_policy() -> RetryPolicy {
        RetryPolicy {
            max_retries: 5,
            retry_interval: Duration::from_millis(1),
            max_interval: Duration::from_millis(5),
        }
    }

    #[tokio::test]
    async fn single_shard_preserves_submission_order() {
        let sink = Arc::new(RecordingSink::new(0));
        let handle = SinkHandle::new("sink-a", sink.clone());
        let writer = SinkWriter::new(
            handle,
            SinkWriterConfig {
                shard_count: 1,
                batch_size: 1,
                retry: fast_retry_policy(),
                ..Default::default()
            },
        )
        .unwrap();

        for i in 0..20 {
            writer.submit(Message::new(format!("m{i}"))).await.unwrap();
        }

        let written = sink.written.lock().unwrap();
        let expected: Vec<String> = (0..20).map(|i| format!("m{i}")).collect();
        assert_eq!(written.as_slice(), expected.as_slice());
    }

    #[tokio::test]
    async fn transient_failure_is_retried_then_succeeds() {
        let sink = Arc::new(RecordingSink::new(2));
        let handle = SinkHandle::new("sink-b", sink.clone());
        let writer = SinkWriter::new(
            handle,
            SinkWriterConfig {
                shard_count: 1,
                batch_size: 1,
                retry: fast_retry_policy(),
                circuit_breaker: CircuitBreakerConfig {
                    failure_threshold: 10,
                    cooldown: Duration::from_secs(30),
                },
                ..Default::default()
            },
        )
        .unwrap();

        let outcome = writer.submit(Message::new("m0")).await;
        assert!(outcome.is_ok());
        assert_eq!(sink.written.lock().unwrap().as_slice(), ["m0"]);
    }

    #[tokio::test]
    async fn drop_newest_rejects_admission_at_zero_capacity() {
        let sink = Arc::new(RecordingSink::new(0));
        let handle = SinkHandle::new("sink-c", sink.clone());
        // A zero-capacity lane means every submission finds the lane
        // already "full", exercising the over-capacity path deterministically.
        let writer = SinkWriter::new(
            handle,
            SinkWriterConfig {
                shard_count: 1,
                backpressure_buffer: 0,
                backpressure_strategy: BackpressureStrategy::DropNewest,
                ..Default::default()
            },
        )
        .unwrap();

        let result = writer.submit(Message::new("overflow")).await;
        assert!(result.is_err());
    }
}
