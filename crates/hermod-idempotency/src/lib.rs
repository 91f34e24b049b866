//! Claim/mark-sent keyed store with TTL, backing the engine's idempotency
//! assignment (spec §4.3, §4.7). A key is typically a message id or a
//! template-derived key; namespacing isolates workflows/sinks sharing one
//! backing store.

mod memory;
mod sqlite;

pub use memory::InMemoryIdempotencyStore;
pub use sqlite::SqliteIdempotencyStore;

use async_trait::async_trait;
use std::time::Duration;

/// Contract every idempotency backend implements (spec §4.7).
#[async_trait]
pub trait IdempotencyStore: Send + Sync {
    /// Atomically inserts `key`; returns `true` iff this call claimed it
    /// (i.e. no prior unexpired claim existed).
    async fn claim(&self, namespace: &str, key: &str) -> anyhow::Result<bool>;

    /// Records that a claimed key's delivery has completed successfully.
    async fn mark_sent(&self, namespace: &str, key: &str) -> anyhow::Result<()>;

    /// Removes claims older than `now - ttl`. Returns the number removed.
    async fn cleanup_ttl(&self, ttl: Duration) -> anyhow::Result<u64>;
}
