//! Durable pending-delivery queue backing exactly-once-effect sink writes
//! (spec §4.7, §3 "Outbox storage"). The engine writes an `OutboxItem`
//! before attempting a sink write and deletes it on success; a background
//! sweeper re-attempts items left `pending`/`failed` by a crash.

mod sqlite;
mod sweeper;

pub use sqlite::SqliteOutboxStorage;
pub use sweeper::{Sweeper, SweeperConfig};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle state of an `OutboxItem` (spec §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutboxStatus {
    Pending,
    Processing,
    Failed,
}

/// A durable pending-delivery record (spec §3, "OutboxItem").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboxItem {
    pub id: String,
    pub workflow_id: String,
    pub sink_id: String,
    pub payload: Vec<u8>,
    pub metadata: std::collections::BTreeMap<String, String>,
    pub created_at: DateTime<Utc>,
    pub attempts: u32,
    pub last_error: Option<String>,
    pub status: OutboxStatus,
}

impl OutboxItem {
    pub fn new(
        id: impl Into<String>,
        workflow_id: impl Into<String>,
        sink_id: impl Into<String>,
        payload: Vec<u8>,
    ) -> Self {
        Self {
            id: id.into(),
            workflow_id: workflow_id.into(),
            sink_id: sink_id.into(),
            payload,
            metadata: Default::default(),
            created_at: Utc::now(),
            attempts: 0,
            last_error: None,
            status: OutboxStatus::Pending,
        }
    }
}

/// Contract every outbox backend implements (spec §4.7).
#[async_trait]
pub trait OutboxStorage: Send + Sync {
    /// Durably records `item` before the engine attempts the sink write.
    async fn enqueue(&self, item: OutboxItem) -> anyhow::Result<()>;

    /// Removes `id` after a successful sink commit.
    async fn delete(&self, id: &str) -> anyhow::Result<()>;

    /// Records a failed attempt: increments `attempts`, stores `error`,
    /// and transitions to `Failed` once `max_attempts` is reached.
    async fn record_failure(
        &self,
        id: &str,
        error: &str,
        max_attempts: u32,
    ) -> anyhow::Result<()>;

    /// Claims up to `limit` items in `Pending` or `Failed` state for
    /// retry, marking them `Processing` so a concurrent sweeper does not
    /// double-claim them.
    async fn claim_for_retry(&self, limit: u32) -> anyhow::Result<Vec<OutboxItem>>;
}
