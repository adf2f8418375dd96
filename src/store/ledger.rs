// Traffic ledger: per-horizon byte accumulators plus the persisted
// last-seen-counter cursor. Delta accounting and bucket rotation each run in
// their own transaction, so writers to the same bucket never race.

use crate::models::{LedgerBucket, NetCounters};
use crate::store::Store;
use chrono::{DateTime, Datelike, Local, TimeZone, Timelike};
use sqlx::Row;
use tracing::instrument;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LedgerHorizon {
    Hour,
    Day,
    Month,
}

impl LedgerHorizon {
    pub fn slots(self) -> u32 {
        match self {
            LedgerHorizon::Hour => 24,
            LedgerHorizon::Day => 31,
            LedgerHorizon::Month => 12,
        }
    }

    fn table(self) -> &'static str {
        match self {
            LedgerHorizon::Hour => "ledger_hour",
            LedgerHorizon::Day => "ledger_day",
            LedgerHorizon::Month => "ledger_month",
        }
    }

    /// Bucket index the instant `at` falls into: hour-of-day 0-23,
    /// day-of-month 1-31, month-of-year 1-12.
    pub fn current_bucket(self, at: DateTime<Local>) -> u32 {
        match self {
            LedgerHorizon::Hour => at.hour(),
            LedgerHorizon::Day => at.day(),
            LedgerHorizon::Month => at.month(),
        }
    }

    /// Start of the calendar period containing `at`, local epoch ms.
    pub fn period_start_ms(self, at: DateTime<Local>) -> i64 {
        let day = at.date_naive();
        let naive = match self {
            LedgerHorizon::Hour => day.and_hms_opt(at.hour(), 0, 0),
            LedgerHorizon::Day => day.and_hms_opt(0, 0, 0),
            LedgerHorizon::Month => day.with_day(1).and_then(|d| d.and_hms_opt(0, 0, 0)),
        };
        naive
            .and_then(|n| Local.from_local_datetime(&n).earliest())
            .map(|dt| dt.timestamp_millis())
            .unwrap_or_else(|| at.timestamp_millis())
    }
}

impl Store {
    /// Delta-accounting step for one node: compute the reset-safe delta
    /// against the persisted cursor, add it to the current hour/day/month
    /// buckets and advance the cursor, all in one transaction. The first
    /// observation of a node only seeds the cursor. Returns the applied delta.
    ///
    /// A bucket last written before the current period start still holds the
    /// previous period's value; the upsert replaces it instead of
    /// accumulating, so a delta that lands before the rotation tick never
    /// drags stale traffic into the new window.
    #[instrument(skip(self), fields(repo = "ledger", operation = "add_net_delta"))]
    pub async fn add_net_delta(
        &self,
        node_id: &str,
        counters: NetCounters,
        at: DateTime<Local>,
    ) -> anyhow::Result<NetCounters> {
        let mut tx = self.pool().begin().await?;

        let prev = sqlx::query("SELECT rx_last, tx_last FROM net_cursor WHERE node_id = $1")
            .bind(node_id)
            .fetch_optional(&mut *tx)
            .await?;
        let delta = match prev {
            Some(row) => {
                let rx_last: i64 = row.try_get("rx_last")?;
                let tx_last: i64 = row.try_get("tx_last")?;
                counters.delta_since(NetCounters {
                    rx_bytes: rx_last as u64,
                    tx_bytes: tx_last as u64,
                })
            }
            None => NetCounters::default(),
        };

        let at_ms = at.timestamp_millis();
        for horizon in [LedgerHorizon::Hour, LedgerHorizon::Day, LedgerHorizon::Month] {
            let table = horizon.table();
            sqlx::query(&format!(
                "INSERT INTO {table} (node_id, bucket, rx_bytes, tx_bytes, updated_at_ms) \
                 VALUES ($1, $2, $3, $4, $5) \
                 ON CONFLICT(node_id, bucket) DO UPDATE SET \
                 rx_bytes = CASE WHEN updated_at_ms < $6 THEN excluded.rx_bytes \
                            ELSE rx_bytes + excluded.rx_bytes END, \
                 tx_bytes = CASE WHEN updated_at_ms < $6 THEN excluded.tx_bytes \
                            ELSE tx_bytes + excluded.tx_bytes END, \
                 updated_at_ms = excluded.updated_at_ms"
            ))
            .bind(node_id)
            .bind(horizon.current_bucket(at) as i64)
            .bind(delta.rx_bytes as i64)
            .bind(delta.tx_bytes as i64)
            .bind(at_ms)
            .bind(horizon.period_start_ms(at))
            .execute(&mut *tx)
            .await?;
        }

        sqlx::query("INSERT OR REPLACE INTO net_cursor (node_id, rx_last, tx_last) VALUES ($1, $2, $3)")
            .bind(node_id)
            .bind(counters.rx_bytes as i64)
            .bind(counters.tx_bytes as i64)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(delta)
    }

    /// Rotation step: zero the bucket the window just rolled into, for every
    /// node. Only rows last written before `period_start_ms` are cleared, so
    /// a delta tick that already landed in the new period is never lost.
    /// Buckets of actively polled nodes rotate lazily in `add_net_delta`;
    /// this sweep catches the nodes that saw no delta since the boundary.
    #[instrument(skip(self), fields(repo = "ledger", operation = "rotate_ledger"))]
    pub async fn rotate_ledger(
        &self,
        horizon: LedgerHorizon,
        bucket: u32,
        period_start_ms: i64,
    ) -> anyhow::Result<u64> {
        let table = horizon.table();
        let r = sqlx::query(&format!(
            "UPDATE {table} SET rx_bytes = 0, tx_bytes = 0, updated_at_ms = $2 \
             WHERE bucket = $1 AND updated_at_ms < $2"
        ))
        .bind(bucket as i64)
        .bind(period_start_ms)
        .execute(self.pool())
        .await?;
        Ok(r.rows_affected())
    }

    /// All buckets for one node at the given horizon, ordered by index.
    /// Missing buckets simply don't appear; callers treat them as zero.
    pub async fn ledger_buckets(
        &self,
        horizon: LedgerHorizon,
        node_id: &str,
    ) -> anyhow::Result<Vec<LedgerBucket>> {
        let table = horizon.table();
        let rows = sqlx::query(&format!(
            "SELECT bucket, rx_bytes, tx_bytes FROM {table} WHERE node_id = $1 ORDER BY bucket ASC"
        ))
        .bind(node_id)
        .fetch_all(self.pool())
        .await?;

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            let bucket: i64 = row.try_get("bucket")?;
            let rx_bytes: i64 = row.try_get("rx_bytes")?;
            let tx_bytes: i64 = row.try_get("tx_bytes")?;
            out.push(LedgerBucket {
                bucket: bucket as u32,
                rx_bytes: rx_bytes as u64,
                tx_bytes: tx_bytes as u64,
            });
        }
        Ok(out)
    }
}
