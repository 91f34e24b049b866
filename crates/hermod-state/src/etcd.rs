use etcd_client::Client;
use tokio::sync::Mutex;

use async_trait::async_trait;

use crate::StateStore;

/// Etcd-backed state store (spec §3, "State store"), for clusters that
/// already run etcd for lease/coordination and want transform state
/// co-located with it.
pub struct EtcdStateStore {
    client: Mutex<Client>,
}

impl EtcdStateStore {
    pub async fn connect(endpoints: &[String]) -> anyhow::Result<Self> {
        let client = Client::connect(endpoints, None).await?;
        Ok(Self {
            client: Mutex::new(client),
        })
    }
}

#[async_trait]
impl StateStore for EtcdStateStore {
    async fn get(&self, key: &str) -> anyhow::Result<Option<Vec<u8>>> {
        let mut client = self.client.lock().await;
        let resp = client.get(key, None).await?;
        Ok(resp.kvs().first().map(|kv| kv.value().to_vec()))
    }

    async fn set(&self, key: &str, value: Vec<u8>) -> anyhow::Result<()> {
        let mut client = self.client.lock().await;
        client.put(key, value, None).await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> anyhow::Result<()> {
        let mut client = self.client.lock().await;
        client.delete(key, None).await?;
        Ok(())
    }
}
