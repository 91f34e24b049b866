use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};

/// Time-bounded exclusive ownership claim on a workflow, recorded
/// centrally in the platform database (spec §3, "LeaseRecord").
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeaseRecord {
    pub workflow_id: String,
    pub owner_id: String,
    pub lease_until: DateTime<Utc>,
}

/// Cluster-wide lease ownership store (spec §4.5). Acquire/renew are
/// atomic against concurrent acquirers across workers.
#[async_trait::async_trait]
pub trait LeaseStore: Send + Sync {
    /// Succeeds if no row exists for `workflow_id` or its `lease_until`
    /// has passed ("steal"); fails if another owner still holds a live
    /// lease.
    async fn acquire(
        &self,
        workflow_id: &str,
        owner_id: &str,
        ttl: chrono::Duration,
    ) -> anyhow::Result<bool>;

    /// Extends `lease_until` for a lease currently owned by `owner_id`.
    /// Returns `false` (maps to `LeaseLost`, spec §7) if `owner_id` no
    /// longer owns it.
    async fn renew(
        &self,
        workflow_id: &str,
        owner_id: &str,
        ttl: chrono::Duration,
    ) -> anyhow::Result<bool>;

    async fn release(&self, workflow_id: &str, owner_id: &str) -> anyhow::Result<()>;
}

/// Postgres-backed lease store (spec §4.5), the platform database every
/// worker in a cluster shares.
pub struct SqlLeaseStore {
    pool: PgPool,
}

impl SqlLeaseStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn ensure_schema(&self) -> anyhow::Result<()> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS hermod_leases (
                workflow_id TEXT PRIMARY KEY,
                owner_id TEXT NOT NULL,
                lease_until TIMESTAMPTZ NOT NULL
            )",
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl LeaseStore for SqlLeaseStore {
    async fn acquire(
        &self,
        workflow_id: &str,
        owner_id: &str,
        ttl: chrono::Duration,
    ) -> anyhow::Result<bool> {
        // INSERT wins an absent row outright; ON CONFLICT only updates
        // when the existing lease has already expired, so a live owner
        // is never displaced (spec §3 invariant: at most one live owner).
        // `xmax = 0` is true only for the row version this statement
        // itself inserted, distinguishing a fresh acquire from a steal
        // of an expired lease (spec §6, hermod_lease_steal_total).
        let row = sqlx::query(
            "INSERT INTO hermod_leases (workflow_id, owner_id, lease_until)
             VALUES ($1, $2, NOW() + $3)
             ON CONFLICT (workflow_id) DO UPDATE
                SET owner_id = EXCLUDED.owner_id, lease_until = EXCLUDED.lease_until
                WHERE hermod_leases.lease_until < NOW()
             RETURNING (xmax = 0) AS inserted",
        )
        .bind(workflow_id)
        .bind(owner_id)
        .bind(ttl)
        .fetch_optional(&self.pool)
        .await?;
        match row {
            Some(row) => {
                let inserted: bool = row.try_get("inserted")?;
                if !inserted {
                    hermod_metrics::lease_steal();
                }
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn renew(
        &self,
        workflow_id: &str,
        owner_id: &str,
        ttl: chrono::Duration,
    ) -> anyhow::Result<bool> {
        let result = sqlx::query(
            "UPDATE hermod_leases SET lease_until = NOW() + $3
             WHERE workflow_id = $1 AND owner_id = $2",
        )
        .bind(workflow_id)
        .bind(owner_id)
        .bind(ttl)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn release(&self, workflow_id: &str, owner_id: &str) -> anyhow::Result<()> {
        sqlx::query("DELETE FROM hermod_leases WHERE workflow_id = $1 AND owner_id = $2")
            .bind(workflow_id)
            .bind(owner_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
