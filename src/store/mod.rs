// SQLite persistence: two ring tables (minute/hour) and three ledger tables
// (hour/day/month) plus the net-counter cursor. One pool shared by all
// writers so rotation and delta ticks serialize through transactions.

pub mod ledger;
mod migrate;
pub mod ring;

use crate::clock;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use std::str::FromStr;
use tracing::instrument;

/// Tables keyed by node_id, swept when a node leaves the registry.
const NODE_TABLES: [&str; 6] = [
    "ring_minute",
    "ring_hour",
    "ledger_hour",
    "ledger_day",
    "ledger_month",
    "net_cursor",
];

pub struct Store {
    pool: SqlitePool,
    retention_ms: i64,
}

impl Store {
    pub async fn connect(
        path: &str,
        max_pool_size: u32,
        retention_days: u32,
    ) -> anyhow::Result<Self> {
        if let Some(parent) = Path::new(path).parent() {
            std::fs::create_dir_all(parent)?;
        }
        let opts = SqliteConnectOptions::from_str(&format!("sqlite:{}", path))?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .busy_timeout(std::time::Duration::from_secs(5))
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal);
        let pool = SqlitePoolOptions::new()
            .max_connections(max_pool_size)
            .connect_with(opts)
            .await?;
        let retention_ms = (retention_days as i64) * 24 * 60 * 60 * 1000;
        Ok(Self { pool, retention_ms })
    }

    /// Runs pending schema migrations. A failure here aborts startup; partial
    /// migrations roll back with the transaction.
    pub async fn init(&self) -> anyhow::Result<()> {
        migrate::run(&self.pool).await
    }

    /// Expiry sweep: drop rows for nodes no longer registered, and ring rows
    /// whose recorded_at fell past retention.
    #[instrument(skip(self, registered_ids), fields(repo = "store", operation = "prune"))]
    pub async fn prune(&self, registered_ids: &[String]) -> anyhow::Result<u64> {
        let mut removed: u64 = 0;
        let mut tx = self.pool.begin().await?;

        for table in NODE_TABLES {
            let ids: Vec<String> =
                sqlx::query_scalar(&format!("SELECT DISTINCT node_id FROM {table}"))
                    .fetch_all(&mut *tx)
                    .await?;
            for id in ids.iter().filter(|id| !registered_ids.contains(id)) {
                let r = sqlx::query(&format!("DELETE FROM {table} WHERE node_id = $1"))
                    .bind(id)
                    .execute(&mut *tx)
                    .await?;
                removed += r.rows_affected();
            }
        }

        let cutoff = clock::now_ms() - self.retention_ms;
        for table in ["ring_minute", "ring_hour"] {
            let r = sqlx::query(&format!("DELETE FROM {table} WHERE recorded_at < $1"))
                .bind(cutoff)
                .execute(&mut *tx)
                .await?;
            removed += r.rows_affected();
        }

        tx.commit().await?;
        Ok(removed)
    }

    /// Reclaim space after deletes (run on the VACUUM schedule).
    #[instrument(skip(self), fields(repo = "store", operation = "vacuum"))]
    pub async fn vacuum(&self) -> anyhow::Result<()> {
        sqlx::query("VACUUM").execute(&self.pool).await?;
        Ok(())
    }

    pub(crate) fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}
