use std::collections::BTreeMap;
use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, Row};
use tokio::sync::Mutex;

use crate::{OutboxItem, OutboxStatus, OutboxStorage};

/// SQLite-backed outbox (spec §4.7). `claim_for_retry` uses an
/// `UPDATE ... RETURNING` statement rather than a separate select-then-
/// update pair (mirrors the atomic claim idiom this stack uses for its
/// task queue, adapted here from Postgres `FOR UPDATE SKIP LOCKED` to a
/// single mutex-guarded connection where lock contention cannot arise).
pub struct SqliteOutboxStorage {
    conn: Mutex<Connection>,
}

impl SqliteOutboxStorage {
    pub fn open(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let conn = Connection::open(path)?;
        Self::init(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn open_in_memory() -> anyhow::Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::init(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn init(conn: &Connection) -> anyhow::Result<()> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS outbox_items (
                id TEXT PRIMARY KEY,
                workflow_id TEXT NOT NULL,
                sink_id TEXT NOT NULL,
                payload BLOB NOT NULL,
                metadata TEXT NOT NULL,
                created_at TEXT NOT NULL,
                attempts INTEGER NOT NULL,
                last_error TEXT,
                status TEXT NOT NULL
            );",
        )?;
        Ok(())
    }
}

fn status_str(status: OutboxStatus) -> &'static str {
    match status {
        OutboxStatus::Pending => "pending",
        OutboxStatus::Processing => "processing",
        OutboxStatus::Failed => "failed",
    }
}

fn parse_status(s: &str) -> OutboxStatus {
    match s {
        "processing" => OutboxStatus::Processing,
        "failed" => OutboxStatus::Failed,
        _ => OutboxStatus::Pending,
    }
}

fn row_to_item(row: &Row) -> rusqlite::Result<OutboxItem> {
    let metadata_json: String = row.get("metadata")?;
    let metadata: BTreeMap<String, String> =
        serde_json::from_str(&metadata_json).unwrap_or_default();
    let created_at: String = row.get("created_at")?;
    Ok(OutboxItem {
        id: row.get("id")?,
        workflow_id: row.get("workflow_id")?,
        sink_id: row.get("sink_id")?,
        payload: row.get("payload")?,
        metadata,
        created_at: created_at
            .parse::<DateTime<Utc>>()
            .unwrap_or_else(|_| Utc::now()),
        attempts: row.get("attempts")?,
        last_error: row.get("last_error")?,
        status: parse_status(&row.get::<_, String>("status")?),
    })
}

#[async_trait]
impl OutboxStorage for SqliteOutboxStorage {
    async fn enqueue(&self, item: OutboxItem) -> anyhow::Result<()> {
        let conn = self.conn.lock().await;
        let metadata_json = serde_json::to_string(&item.metadata)?;
        conn.execute(
            "INSERT INTO outbox_items
                (id, workflow_id, sink_id, payload, metadata, created_at, attempts, last_error, status)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                item.id,
                item.workflow_id,
                item.sink_id,
                item.payload,
                metadata_json,
                item.created_at.to_rfc3339(),
                item.attempts,
                item.last_error,
                status_str(item.status),
            ],
        )?;
        Ok(())
    }

    async fn delete(&self, id: &str) -> anyhow::Result<()> {
        let conn = self.conn.lock().await;
        conn.execute("DELETE FROM outbox_items WHERE id = ?1", params![id])?;
        Ok(())
    }

    async fn record_failure(
        &self,
        id: &str,
        error: &str,
        max_attempts: u32,
    ) -> anyhow::Result<()> {
        let conn = self.conn.lock().await;
        let attempts: u32 = conn.query_row(
            "SELECT attempts FROM outbox_items WHERE id = ?1",
            params![id],
            |row| row.get(0),
        )?;
        let attempts = attempts + 1;
        let status = if attempts >= max_attempts {
            "failed"
        } else {
            "pending"
        };
        conn.execute(
            "UPDATE outbox_items SET attempts = ?1, last_error = ?2, status = ?3 WHERE id = ?4",
            params![attempts, error, status, id],
        )?;
        Ok(())
    }

    async fn claim_for_retry(&self, limit: u32) -> anyhow::Result<Vec<OutboxItem>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(
            "UPDATE outbox_items
             SET status = 'processing'
             WHERE id IN (
                 SELECT id FROM outbox_items
                 WHERE status IN ('pending', 'failed')
                 ORDER BY created_at
                 LIMIT ?1
             )
             RETURNING id, workflow_id, sink_id, payload, metadata, created_at, attempts, last_error, status",
        )?;
        let rows = stmt.query_map(params![limit], row_to_item)?;
        let mut items = Vec::new();
        for row in rows {
            items.push(row?);
        }
        Ok(items)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn enqueue_then_delete_removes_item() {
        let store = SqliteOutboxStorage::open_in_memory().unwrap();
        store
            .enqueue(OutboxItem::new("1", "wf", "sink-a", b"x".to_vec()))
            .await
            .unwrap();
        store.delete("1").await.unwrap();
        let claimed = store.claim_for_retry(10).await.unwrap();
        assert!(claimed.is_empty());
    }

    #[tokio::test]
    async fn claim_for_retry_marks_items_processing() {
        let store = SqliteOutboxStorage::open_in_memory().unwrap();
        store
            .enqueue(OutboxItem::new("1", "wf", "sink-a", b"x".to_vec()))
            .await
            .unwrap();
        let claimed = store.claim_for_retry(10).await.unwrap();
        assert_eq!(claimed.len(), 1);
        assert_eq!(claimed[0].status, OutboxStatus::Processing);

        // a second claim doesn't re-pick the now-processing item.
        let claimed_again = store.claim_for_retry(10).await.unwrap();
        assert!(claimed_again.is_empty());
    }

    #[tokio::test]
    async fn record_failure_transitions_to_failed_at_max_attempts() {
        let store = SqliteOutboxStorage::open_in_memory().unwrap();
        store
            .enqueue(OutboxItem::new("1", "wf", "sink-a", b"x".to_vec()))
            .await
            .unwrap();
        store.record_failure("1", "boom", 1).await.unwrap();

        let claimed = store.claim_for_retry(10).await.unwrap();
        assert_eq!(claimed.len(), 1);
        assert_eq!(claimed[0].status, OutboxStatus::Processing);
        assert_eq!(claimed[0].attempts, 1);
    }
}
