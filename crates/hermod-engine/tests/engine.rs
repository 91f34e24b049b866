//! End-to-end scenarios for `Engine` driven through fake source/sink
//! connectors: pass-through delivery, DLQ routing, duplicate-delivery
//! skip, and graceful shutdown (spec §8).

use std::collections::VecDeque;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use async_trait::async_trait;
use hermod_connector::{Context, HermodError, Sink, SinkHandle, Source, SourceHandle, WriteOutcome};
use hermod_engine::{Engine, EngineConfig, EngineState, SinkWriter, SinkWriterConfig};
use hermod_idempotency::{IdempotencyStore, InMemoryIdempotencyStore};
use hermod_mesh::{PeerCluster, PeerRegistry, Router as MeshRouter};
use hermod_message::Message;
use hermod_state::SqliteStateStore;
use tokio::sync::mpsc;

struct FakeSource {
    queue: StdMutex<VecDeque<Message>>,
    acked: StdMutex<Vec<String>>,
}

impl FakeSource {
    fn new(messages: Vec<Message>) -> Self {
        Self {
            queue: StdMutex::new(messages.into()),
            acked: StdMutex::new(Vec::new()),
        }
    }

    fn acked_ids(&self) -> Vec<String> {
        self.acked.lock().unwrap().clone()
    }
}

#[async_trait]
impl Source for FakeSource {
    async fn read(&self, _cx: &Context) -> anyhow::Result<Option<Message>> {
        Ok(self.queue.lock().unwrap().pop_front())
    }

    async fn ack(&self, _cx: &Context, msg: &Message) -> anyhow::Result<()> {
        self.acked.lock().unwrap().push(msg.id().to_string());
        Ok(())
    }

    async fn ping(&self, _cx: &Context) -> anyhow::Result<()> {
        Ok(())
    }

    async fn close(&self) -> anyhow::Result<()> {
        Ok(())
    }
}

enum SinkBehavior {
    Record,
    AlwaysValidationError,
}

struct FakeSink {
    behavior: SinkBehavior,
    written: StdMutex<Vec<String>>,
}

impl FakeSink {
    fn recording() -> Self {
        Self {
            behavior: SinkBehavior::Record,
            written: StdMutex::new(Vec::new()),
        }
    }

    fn always_invalid() -> Self {
        Self {
            behavior: SinkBehavior::AlwaysValidationError,
            written: StdMutex::new(Vec::new()),
        }
    }

    fn written_ids(&self) -> Vec<String> {
        self.written.lock().unwrap().clone()
    }
}

#[async_trait]
impl Sink for FakeSink {
    async fn write(&self, _cx: &Context, msg: &Message) -> anyhow::Result<WriteOutcome> {
        match self.behavior {
            SinkBehavior::Record => {
                self.written.lock().unwrap().push(msg.id().to_string());
                Ok(WriteOutcome::ok())
            }
            SinkBehavior::AlwaysValidationError => {
                Err(HermodError::Validation("payload rejected".into()).into())
            }
        }
    }

    async fn ping(&self, _cx: &Context) -> anyhow::Result<()> {
        Ok(())
    }

    async fn close(&self) -> anyhow::Result<()> {
        Ok(())
    }
}

fn fast_sink_writer(sink: Arc<FakeSink>, id: &str) -> Arc<SinkWriter> {
    let handle = SinkHandle::new(id, sink);
    Arc::new(
        SinkWriter::new(
            handle,
            SinkWriterConfig {
                shard_count: 1,
                batch_size: 1,
                batch_timeout: Duration::from_millis(10),
                ..Default::default()
            },
        )
        .unwrap(),
    )
}

/// Polls `predicate` until it holds or `timeout` elapses, to avoid fixed
/// sleeps racing the engine's background lane workers.
async fn wait_until<F: Fn() -> bool>(predicate: F, timeout: Duration) {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if predicate() {
            return;
        }
        if tokio::time::Instant::now() >= deadline {
            panic!("condition not met within timeout");
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

async fn stop_and_join(engine: Arc<Engine>, run_handle: tokio::task::JoinHandle<anyhow::Result<()>>) {
    engine.stop();
    tokio::time::timeout(Duration::from_secs(2), run_handle)
        .await
        .expect("engine run task timed out")
        .expect("engine run task panicked")
        .expect("engine run returned an error");
    assert_eq!(engine.state(), EngineState::Stopped);
}

#[tokio::test]
async fn pass_through_delivers_and_acks() {
    let source = Arc::new(FakeSource::new(vec![Message::new("m1")]));
    let sink = Arc::new(FakeSink::recording());
    let writer = fast_sink_writer(sink.clone(), "primary");

    let engine = Arc::new(Engine::new(
        EngineConfig {
            workflow_id: "wf-pass-through".into(),
            ..Default::default()
        },
        SourceHandle::new(source.clone()),
        vec![writer],
        Arc::new(InMemoryIdempotencyStore::new()),
        Arc::new(SqliteStateStore::open_in_memory().unwrap()),
    ));

    let run_handle = tokio::spawn(engine.clone().run());

    wait_until(|| sink.written_ids() == vec!["m1".to_string()], Duration::from_secs(2)).await;
    wait_until(|| source.acked_ids() == vec!["m1".to_string()], Duration::from_secs(2)).await;

    stop_and_join(engine, run_handle).await;
}

#[tokio::test]
async fn validation_failure_routes_to_dlq_and_acks_original() {
    let source = Arc::new(FakeSource::new(vec![Message::new("bad-1")]));
    let primary_sink = Arc::new(FakeSink::always_invalid());
    let primary_writer = fast_sink_writer(primary_sink.clone(), "primary");
    let dlq_sink = Arc::new(FakeSink::recording());
    let dlq_writer = fast_sink_writer(dlq_sink.clone(), "dlq");

    let engine = Arc::new(
        Engine::new(
            EngineConfig {
                workflow_id: "wf-dlq".into(),
                ..Default::default()
            },
            SourceHandle::new(source.clone()),
            vec![primary_writer],
            Arc::new(InMemoryIdempotencyStore::new()),
            Arc::new(SqliteStateStore::open_in_memory().unwrap()),
        )
        .with_dlq(dlq_writer, None),
    );

    let run_handle = tokio::spawn(engine.clone().run());

    wait_until(
        || dlq_sink.written_ids() == vec!["bad-1".to_string()],
        Duration::from_secs(2),
    )
    .await;
    wait_until(|| source.acked_ids() == vec!["bad-1".to_string()], Duration::from_secs(2)).await;

    assert!(primary_sink.written_ids().is_empty());

    stop_and_join(engine, run_handle).await;
}

#[tokio::test]
async fn duplicate_delivery_skips_sink_writes_but_still_acks() {
    let source = Arc::new(FakeSource::new(vec![Message::new("dup-1")]));
    let sink = Arc::new(FakeSink::recording());
    let writer = fast_sink_writer(sink.clone(), "primary");
    let idempotency = Arc::new(InMemoryIdempotencyStore::new());
    // Pre-claim the key so the engine's own claim attempt observes a
    // duplicate, as if another worker (or a prior crashed attempt) already
    // delivered this message.
    idempotency.claim("default", "dup-1").await.unwrap();

    let engine = Arc::new(Engine::new(
        EngineConfig {
            workflow_id: "wf-dup".into(),
            idempotency_namespace: "default".into(),
            ..Default::default()
        },
        SourceHandle::new(source.clone()),
        vec![writer],
        idempotency,
        Arc::new(SqliteStateStore::open_in_memory().unwrap()),
    ));

    let run_handle = tokio::spawn(engine.clone().run());

    wait_until(|| source.acked_ids() == vec!["dup-1".to_string()], Duration::from_secs(2)).await;

    stop_and_join(engine, run_handle).await;
    assert!(sink.written_ids().is_empty());
}

#[tokio::test]
async fn mesh_tagged_message_is_forwarded_instead_of_sink_written() {
    let (inbound_tx, mut inbound_rx) = mpsc::channel(8);
    let receiver = hermod_mesh::receive_router(hermod_mesh::ReceiveState::new(inbound_tx));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let peer_addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, receiver).await.unwrap();
    });

    let mut tagged = Message::new("peer-1");
    tagged.set_metadata(Message::META_TARGET_CLUSTER, "east-1");
    let source = Arc::new(FakeSource::new(vec![tagged]));
    let sink = Arc::new(FakeSink::recording());
    let writer = fast_sink_writer(sink.clone(), "primary");

    let registry = Arc::new(PeerRegistry::new());
    registry.upsert(PeerCluster {
        cluster_id: "east-1".into(),
        region: "us-east".into(),
        endpoint: format!("http://{peer_addr}"),
        online: true,
    });
    let mesh = Arc::new(MeshRouter::new(registry, Arc::new(hermod_mesh::EdgeFilters::new())));

    let engine = Arc::new(
        Engine::new(
            EngineConfig {
                workflow_id: "wf-mesh".into(),
                ..Default::default()
            },
            SourceHandle::new(source.clone()),
            vec![writer],
            Arc::new(InMemoryIdempotencyStore::new()),
            Arc::new(SqliteStateStore::open_in_memory().unwrap()),
        )
        .with_mesh(mesh),
    );

    let run_handle = tokio::spawn(engine.clone().run());

    wait_until(|| source.acked_ids() == vec!["peer-1".to_string()], Duration::from_secs(2)).await;
    let forwarded = tokio::time::timeout(Duration::from_secs(2), inbound_rx.recv())
        .await
        .expect("mesh receiver never got the forwarded envelope");
    assert!(forwarded.is_some());
    assert!(sink.written_ids().is_empty());

    stop_and_join(engine, run_handle).await;
}

#[tokio::test]
async fn stop_drains_in_flight_work_before_returning() {
    // An always-empty source: the engine idles in its poll loop until
    // stop() cancels it, exercising the Draining -> Stopped transition
    // with no in-flight messages to wait on.
    let source = Arc::new(FakeSource::new(Vec::new()));
    let sink = Arc::new(FakeSink::recording());
    let writer = fast_sink_writer(sink, "primary");

    let engine = Arc::new(Engine::new(
        EngineConfig {
            workflow_id: "wf-shutdown".into(),
            ..Default::default()
        },
        SourceHandle::new(source),
        vec![writer],
        Arc::new(InMemoryIdempotencyStore::new()),
        Arc::new(SqliteStateStore::open_in_memory().unwrap()),
    ));

    let run_handle = tokio::spawn(engine.clone().run());
    wait_until(|| engine.state() == EngineState::Running, Duration::from_secs(2)).await;

    stop_and_join(engine, run_handle).await;
}
