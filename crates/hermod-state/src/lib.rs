//! Key→bytes persistent map backing stateful transforms (spec §4.3, §3).
//! Keys are composed by callers as `workflow_id + transform_id +
//! user-provided key`; this crate treats the composed string opaquely.

mod etcd;
mod redis;
mod sqlite;

pub use crate::etcd::EtcdStateStore;
pub use crate::redis::RedisStateStore;
pub use crate::sqlite::SqliteStateStore;

use async_trait::async_trait;

/// Contract every state-store backend implements (spec §3, "State store").
#[async_trait]
pub trait StateStore: Send + Sync {
    async fn get(&self, key: &str) -> anyhow::Result<Option<Vec<u8>>>;
    async fn set(&self, key: &str, value: Vec<u8>) -> anyhow::Result<()>;
    async fn delete(&self, key: &str) -> anyhow::Result<()>;
}

/// Joins a workflow id, transform id, and caller key into the opaque key
/// every backend stores under (spec §4.3: "keyed by `workflow_id +
/// transform_id + user-provided key`").
pub fn compose_key(workflow_id: &str, transform_id: &str, user_key: &str) -> String {
    format!("{workflow_id}\u{1f}{transform_id}\u{1f}{user_key}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compose_key_is_unambiguous_across_boundaries() {
        let a = compose_key("wf", "t1", "k");
        let b = compose_key("w", "ft1", "k");
        assert_ne!(a, b);
    }
}
