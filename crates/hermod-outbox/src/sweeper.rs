use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use hermod_connector::Context;
use tracing::{info, warn};

use crate::{OutboxItem, OutboxStorage};

/// Tuning for the background outbox sweeper (spec §4.7: "a background
/// sweeper re-attempts pending and failed items with backoff bounded by
/// `max_attempts`").
#[derive(Debug, Clone)]
pub struct SweeperConfig {
    pub sweep_interval: Duration,
    pub claim_limit: u32,
    pub max_attempts: u32,
}

impl Default for SweeperConfig {
    fn default() -> Self {
        Self {
            sweep_interval: Duration::from_secs(5),
            claim_limit: 50,
            max_attempts: 10,
        }
    }
}

/// Retries durable outbox items against their sink until delivered or
/// `max_attempts` is exhausted (spec §4.7). One instance per engine.
pub struct Sweeper<S> {
    storage: Arc<S>,
    config: SweeperConfig,
}

impl<S: OutboxStorage + 'static> Sweeper<S> {
    pub fn new(storage: Arc<S>, config: SweeperConfig) -> Self {
        Self { storage, config }
    }

    /// Runs until `cx` is cancelled, periodically claiming items and
    /// handing each to `redeliver`. The jitter formula matches this
    /// stack's task-queue dequeue loop: `0.9 + rand::random::<f64>() *
    /// 0.2`, spreading concurrent sweepers across workers away from a
    /// thundering-herd tick.
    pub async fn run<F, Fut>(&self, cx: &Context, redeliver: F)
    where
        F: Fn(OutboxItem) -> Fut,
        Fut: Future<Output = anyhow::Result<()>>,
    {
        loop {
            let claimed = match self.storage.claim_for_retry(self.config.claim_limit).await {
                Ok(items) => items,
                Err(err) => {
                    warn!(error = %err, "outbox sweep claim failed");
                    Vec::new()
                }
            };

            for item in claimed {
                let id = item.id.clone();
                match redeliver(item).await {
                    Ok(()) => {
                        if let Err(err) = self.storage.delete(&id).await {
                            warn!(error = %err, item_id = %id, "failed to delete delivered outbox item");
                        } else {
                            info!(item_id = %id, "outbox item redelivered");
                        }
                    }
                    Err(err) => {
                        if let Err(inner) = self
                            .storage
                            .record_failure(&id, &err.to_string(), self.config.max_attempts)
                            .await
                        {
                            warn!(error = %inner, item_id = %id, "failed to record outbox failure");
                        }
                    }
                }
            }

            let jitter = 0.9 + rand::random::<f64>() * 0.2;
            tokio::select! {
                biased;
                _ = cx.cancelled() => return,
                _ = tokio::time::sleep(self.config.sweep_interval.mul_f64(jitter)) => {}
            }
        }
    }
}
