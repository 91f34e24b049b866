use async_trait::async_trait;
use redis::AsyncCommands;
use tokio::sync::Mutex;

use crate::StateStore;

/// Redis-backed state store (spec §3, "State store"), for deployments that
/// already run Redis for the key-value/stream sink idempotency path
/// (spec §4.7) and want one backend for both.
pub struct RedisStateStore {
    conn: Mutex<redis::aio::MultiplexedConnection>,
}

impl RedisStateStore {
    pub async fn connect(url: &str) -> anyhow::Result<Self> {
        let client = redis::Client::open(url)?;
        let conn = client.get_multiplexed_async_connection().await?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }
}

#[async_trait]
impl StateStore for RedisStateStore {
    async fn get(&self, key: &str) -> anyhow::Result<Option<Vec<u8>>> {
        let mut conn = self.conn.lock().await;
        let value: Option<Vec<u8>> = conn.get(key).await?;
        Ok(value)
    }

    async fn set(&self, key: &str, value: Vec<u8>) -> anyhow::Result<()> {
        let mut conn = self.conn.lock().await;
        let _: () = conn.set(key, value).await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> anyhow::Result<()> {
        let mut conn = self.conn.lock().await;
        let _: () = conn.del(key).await?;
        Ok(())
    }
}
