use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use rusqlite::{params, Connection};
use tokio::sync::Mutex;

use crate::IdempotencyStore;

/// SQLite-backed idempotency store (spec §4.7). A single table holds rows
/// for every namespace; namespacing is a column rather than one table per
/// namespace, which keeps TTL cleanup a single statement.
///
/// SQLite access is short and synchronous, guarded by a `tokio::Mutex`
/// rather than dispatched to a blocking pool: every statement here is a
/// single indexed row operation, so holding the async lock for its
/// duration is cheaper than the thread-hop `spawn_blocking` would cost.
pub struct SqliteIdempotencyStore {
    conn: Mutex<Connection>,
}

impl SqliteIdempotencyStore {
    pub fn open(path: impl AsRef<Path>, busy_timeout: Duration) -> anyhow::Result<Self> {
        let conn = Connection::open(path)?;
        conn.busy_timeout(busy_timeout)?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS idempotency_keys (
                namespace TEXT NOT NULL,
                key TEXT NOT NULL,
                claimed_at INTEGER NOT NULL,
                marked_sent_at INTEGER,
                PRIMARY KEY (namespace, key)
            );",
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn open_in_memory(busy_timeout: Duration) -> anyhow::Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.busy_timeout(busy_timeout)?;
        conn.execute_batch(
            "CREATE TABLE idempotency_keys (
                namespace TEXT NOT NULL,
                key TEXT NOT NULL,
                claimed_at INTEGER NOT NULL,
                marked_sent_at INTEGER,
                PRIMARY KEY (namespace, key)
            );",
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }
}

fn now_unix() -> i64 {
    chrono::Utc::now().timestamp()
}

#[async_trait]
impl IdempotencyStore for SqliteIdempotencyStore {
    async fn claim(&self, namespace: &str, key: &str) -> anyhow::Result<bool> {
        let conn = self.conn.lock().await;
        let inserted = conn.execute(
            "INSERT OR IGNORE INTO idempotency_keys (namespace, key, claimed_at) VALUES (?1, ?2, ?3)",
            params![namespace, key, now_unix()],
        )?;
        Ok(inserted == 1)
    }

    async fn mark_sent(&self, namespace: &str, key: &str) -> anyhow::Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "UPDATE idempotency_keys SET marked_sent_at = ?1 WHERE namespace = ?2 AND key = ?3",
            params![now_unix(), namespace, key],
        )?;
        Ok(())
    }

    async fn cleanup_ttl(&self, ttl: Duration) -> anyhow::Result<u64> {
        let conn = self.conn.lock().await;
        let cutoff = now_unix() - ttl.as_secs() as i64;
        let removed = conn.execute(
            "DELETE FROM idempotency_keys WHERE claimed_at < ?1",
            params![cutoff],
        )?;
        Ok(removed as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn second_claim_of_same_key_fails() {
        let store = SqliteIdempotencyStore::open_in_memory(Duration::from_millis(15_000)).unwrap();
        assert!(store.claim("ns", "A").await.unwrap());
        assert!(!store.claim("ns", "A").await.unwrap());
    }

    #[tokio::test]
    async fn namespaces_are_isolated() {
        let store = SqliteIdempotencyStore::open_in_memory(Duration::from_millis(15_000)).unwrap();
        assert!(store.claim("ns1", "A").await.unwrap());
        assert!(store.claim("ns2", "A").await.unwrap());
    }

    #[tokio::test]
    async fn cleanup_removes_expired_claims() {
        let store = SqliteIdempotencyStore::open_in_memory(Duration::from_millis(15_000)).unwrap();
        store.claim("ns", "A").await.unwrap();
        let removed = store.cleanup_ttl(Duration::from_secs(0)).await.unwrap();
        assert_eq!(removed, 1);
        assert!(store.claim("ns", "A").await.unwrap());
    }
}
