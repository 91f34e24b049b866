use async_trait::async_trait;
use hermod_message::Message;

use crate::context::Context;

/// Outcome of a single write, reported back so the sink writer can emit
/// accurate metrics (spec §4.4): a dedup skip still counts as delivery
/// success, while a conflict is surfaced but does not itself fail the
/// write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct WriteOutcome {
    pub dedup: bool,
    pub conflict: bool,
}

impl WriteOutcome {
    pub fn ok() -> Self {
        Self::default()
    }

    pub fn deduped() -> Self {
        Self {
            dedup: true,
            conflict: false,
        }
    }
}

/// The contract every sink connector implements (spec §4.4).
#[async_trait]
pub trait Sink: Send + Sync {
    async fn write(&self, cx: &Context, msg: &Message) -> anyhow::Result<WriteOutcome>;

    async fn ping(&self, cx: &Context) -> anyhow::Result<()>;

    async fn close(&self) -> anyhow::Result<()>;
}

/// Optional capability: sinks that can accept a unit-of-work batch more
/// efficiently than per-message writes.
#[async_trait]
pub trait BatchSink: Sink {
    async fn write_batch(&self, cx: &Context, msgs: &[Message]) -> anyhow::Result<Vec<WriteOutcome>>;
}

/// Optional capability: pre-write validation, checked before every write
/// (spec §4.4). A validation failure routes to DLQ if configured.
#[async_trait]
pub trait ValidatingSink: Sink {
    async fn validate(&self, cx: &Context, msg: &Message) -> anyhow::Result<()>;
}

/// Opaque prepared-transaction identifier persisted to the outbox across a
/// crash between prepare and commit (spec §4.3, §9).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreparedTxnId(pub String);

/// Optional capability: two-phase commit, used when every sink in a
/// workflow implements it (spec §4.3).
#[async_trait]
pub trait TwoPhaseSink: Sink {
    async fn prepare(&self, cx: &Context, msgs: &[Message]) -> anyhow::Result<PreparedTxnId>;
    async fn commit_prepared(&self, cx: &Context, id: &PreparedTxnId) -> anyhow::Result<()>;
    async fn rollback_prepared(&self, cx: &Context, id: &PreparedTxnId) -> anyhow::Result<()>;
}

/// A registered sink together with whichever optional capabilities its
/// connector implementation declared at construction time (spec §9,
/// "capability-set trait/interface with optional sub-capabilities checked
/// at registration").
#[derive(Clone)]
pub struct SinkHandle {
    pub id: String,
    pub sink: std::sync::Arc<dyn Sink>,
    pub batch: Option<std::sync::Arc<dyn BatchSink>>,
    pub validate: Option<std::sync::Arc<dyn ValidatingSink>>,
    pub two_phase: Option<std::sync::Arc<dyn TwoPhaseSink>>,
}

impl SinkHandle {
    pub fn new(id: impl Into<String>, sink: std::sync::Arc<dyn Sink>) -> Self {
        Self {
            id: id.into(),
            sink,
            batch: None,
            validate: None,
            two_phase: None,
        }
    }

    pub fn with_batch(mut self, cap: std::sync::Arc<dyn BatchSink>) -> Self {
        self.batch = Some(cap);
        self
    }

    pub fn with_validation(mut self, cap: std::sync::Arc<dyn ValidatingSink>) -> Self {
        self.validate = Some(cap);
        self
    }

    pub fn with_two_phase(mut self, cap: std::sync::Arc<dyn TwoPhaseSink>) -> Self {
        self.two_phase = Some(cap);
        self
    }

    pub fn supports_two_phase(&self) -> bool {
        self.two_phase.is_some()
    }
}
