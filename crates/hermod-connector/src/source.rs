use async_trait::async_trait;
use hermod_message::Message;

use crate::context::Context;

/// The contract every source connector implements (spec §4.4).
///
/// This is the mandatory capability; the optional ones below
/// (`Snapshottable`, `Discoverable`, `DeepReadiness`, `Checkpointable`) are
/// additional traits a connector may implement and are wired up explicitly
/// via [`SourceHandle`], never discovered through runtime introspection
/// (spec §9).
#[async_trait]
pub trait Source: Send + Sync {
    /// Reads the next message, or `None` if the source is momentarily
    /// exhausted (not an error — the engine will poll again).
    async fn read(&self, cx: &Context) -> anyhow::Result<Option<Message>>;

    /// Acknowledges successful delivery of `msg` to every configured sink.
    /// This is the at-least-once boundary (spec §8): it must only be
    /// called once all sinks have reported success for the message.
    async fn ack(&self, cx: &Context, msg: &Message) -> anyhow::Result<()>;

    /// Liveness check used during `Engine` preflight (spec §4.3).
    async fn ping(&self, cx: &Context) -> anyhow::Result<()>;

    async fn close(&self) -> anyhow::Result<()>;
}

/// Optional capability: bulk historical read for an initial sync.
#[async_trait]
pub trait Snapshottable: Source {
    async fn snapshot(&self, cx: &Context, tables: &[String]) -> anyhow::Result<()>;
}

/// Optional capability: schema discovery, used by workflow authoring
/// tooling (out of this spec's scope) but consumed here at the interface
/// level only.
#[async_trait]
pub trait Discoverable: Source {
    async fn discover_databases(&self, cx: &Context) -> anyhow::Result<Vec<String>>;
    async fn discover_tables(&self, cx: &Context, database: &str) -> anyhow::Result<Vec<String>>;
    async fn discover_columns(
        &self,
        cx: &Context,
        database: &str,
        table: &str,
    ) -> anyhow::Result<Vec<String>>;
    async fn sample(&self, cx: &Context, table: &str) -> anyhow::Result<Vec<Message>>;
}

/// Optional capability: readiness distinct from liveness (spec §4.4).
#[async_trait]
pub trait DeepReadiness: Source {
    async fn is_ready(&self, cx: &Context) -> anyhow::Result<bool>;
}

/// Optional capability: checkpoint serialization, for sources that track
/// their own resume position (offsets, LSN, resume tokens) independent of
/// per-message metadata.
#[async_trait]
pub trait Checkpointable: Source {
    async fn get_state(&self, cx: &Context) -> anyhow::Result<Vec<u8>>;
    async fn set_state(&self, cx: &Context, state: &[u8]) -> anyhow::Result<()>;
}

/// A registered source together with whichever optional capabilities its
/// connector implementation declared at construction time.
#[derive(Clone)]
pub struct SourceHandle {
    pub source: std::sync::Arc<dyn Source>,
    pub snapshot: Option<std::sync::Arc<dyn Snapshottable>>,
    pub discovery: Option<std::sync::Arc<dyn Discoverable>>,
    pub readiness: Option<std::sync::Arc<dyn DeepReadiness>>,
    pub checkpoint: Option<std::sync::Arc<dyn Checkpointable>>,
}

impl SourceHandle {
    pub fn new(source: std::sync::Arc<dyn Source>) -> Self {
        Self {
            source,
            snapshot: None,
            discovery: None,
            readiness: None,
            checkpoint: None,
        }
    }

    pub fn with_snapshot(mut self, cap: std::sync::Arc<dyn Snapshottable>) -> Self {
        self.snapshot = Some(cap);
        self
    }

    pub fn with_discovery(mut self, cap: std::sync::Arc<dyn Discoverable>) -> Self {
        self.discovery = Some(cap);
        self
    }

    pub fn with_readiness(mut self, cap: std::sync::Arc<dyn DeepReadiness>) -> Self {
        self.readiness = Some(cap);
        self
    }

    pub fn with_checkpoint(mut self, cap: std::sync::Arc<dyn Checkpointable>) -> Self {
        self.checkpoint = Some(cap);
        self
    }
}
