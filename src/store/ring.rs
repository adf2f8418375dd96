// Fixed-depth circular histories. Eviction orders by the monotonic row id,
// so every node holds exactly `depth` slots, oldest first.

use crate::models::RingEntry;
use crate::store::Store;
use sqlx::{Row, Sqlite, Transaction};
use tracing::instrument;

pub const DEPTH_MINUTE: usize = 60;
pub const DEPTH_HOUR: usize = 24;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RingResolution {
    Minute,
    Hour,
}

impl RingResolution {
    pub fn depth(self) -> usize {
        match self {
            RingResolution::Minute => DEPTH_MINUTE,
            RingResolution::Hour => DEPTH_HOUR,
        }
    }

    fn table(self) -> &'static str {
        match self {
            RingResolution::Minute => "ring_minute",
            RingResolution::Hour => "ring_hour",
        }
    }
}

impl Store {
    /// Insert one slot. A ring shorter than `depth` is first padded with
    /// empty slots (a freshly created node still reads as a full ring of
    /// no-data entries), then the oldest rows past `depth` are evicted.
    #[instrument(skip(self, entry), fields(repo = "ring", operation = "push_ring"))]
    pub async fn push_ring(
        &self,
        resolution: RingResolution,
        node_id: &str,
        entry: &RingEntry,
    ) -> anyhow::Result<()> {
        let table = resolution.table();
        let depth = resolution.depth() as i64;
        let mut tx = self.pool().begin().await?;

        let count: i64 =
            sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {table} WHERE node_id = $1"))
                .bind(node_id)
                .fetch_one(&mut *tx)
                .await?;
        let empty = RingEntry::empty(entry.recorded_at);
        for _ in count..(depth - 1) {
            insert_entry(&mut tx, table, node_id, &empty).await?;
        }
        insert_entry(&mut tx, table, node_id, entry).await?;

        sqlx::query(&format!(
            "DELETE FROM {table} WHERE node_id = $1 AND id NOT IN \
             (SELECT id FROM {table} WHERE node_id = $1 ORDER BY id DESC LIMIT $2)"
        ))
        .bind(node_id)
        .bind(depth)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    /// Full ring for one node, oldest slot first.
    pub async fn ring_history(
        &self,
        resolution: RingResolution,
        node_id: &str,
    ) -> anyhow::Result<Vec<RingEntry>> {
        let table = resolution.table();
        let rows = sqlx::query(&format!(
            "SELECT cpu, mem, swap, rx_rate, tx_rate, recorded_at FROM {table} \
             WHERE node_id = $1 ORDER BY id ASC"
        ))
        .bind(node_id)
        .fetch_all(self.pool())
        .await?;

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            out.push(RingEntry {
                cpu: row.try_get("cpu")?,
                mem: row.try_get("mem")?,
                swap: row.try_get("swap")?,
                rx_rate: row.try_get("rx_rate")?,
                tx_rate: row.try_get("tx_rate")?,
                recorded_at: row.try_get("recorded_at")?,
            });
        }
        Ok(out)
    }
}

async fn insert_entry(
    tx: &mut Transaction<'_, Sqlite>,
    table: &str,
    node_id: &str,
    entry: &RingEntry,
) -> anyhow::Result<()> {
    sqlx::query(&format!(
        "INSERT INTO {table} (node_id, cpu, mem, swap, rx_rate, tx_rate, recorded_at) \
         VALUES ($1, $2, $3, $4, $5, $6, $7)"
    ))
    .bind(node_id)
    .bind(entry.cpu)
    .bind(entry.mem)
    .bind(entry.swap)
    .bind(entry.rx_rate)
    .bind(entry.tx_rate)
    .bind(entry.recorded_at)
    .execute(&mut **tx)
    .await?;
    Ok(())
}
