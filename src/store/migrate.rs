// Versioned schema migrations. Each table family has an explicit version row
// in schema_version; pending steps run in order inside one transaction, so a
// failure rolls the whole upgrade back and startup aborts instead of running
// against a half-migrated schema.

use sqlx::{Sqlite, SqlitePool, Transaction};

const RING_FAMILY: &str = "ring";
const LEDGER_FAMILY: &str = "ledger";

pub(super) async fn run(pool: &SqlitePool) -> anyhow::Result<()> {
    sqlx::query(
        "CREATE TABLE IF NOT EXISTS schema_version (key TEXT PRIMARY KEY, value INTEGER NOT NULL)",
    )
    .execute(pool)
    .await?;

    let mut tx = pool.begin().await?;
    migrate_ring(&mut tx).await?;
    migrate_ledger(&mut tx).await?;
    tx.commit().await?;
    Ok(())
}

async fn version(tx: &mut Transaction<'_, Sqlite>, key: &str) -> anyhow::Result<i64> {
    let v: Option<i64> = sqlx::query_scalar("SELECT value FROM schema_version WHERE key = $1")
        .bind(key)
        .fetch_optional(&mut **tx)
        .await?;
    Ok(v.unwrap_or(0))
}

async fn set_version(tx: &mut Transaction<'_, Sqlite>, key: &str, value: i64) -> anyhow::Result<()> {
    sqlx::query("INSERT OR REPLACE INTO schema_version (key, value) VALUES ($1, $2)")
        .bind(key)
        .bind(value)
        .execute(&mut **tx)
        .await?;
    Ok(())
}

async fn table_exists(tx: &mut Transaction<'_, Sqlite>, name: &str) -> anyhow::Result<bool> {
    let found: Option<i64> =
        sqlx::query_scalar("SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = $1")
            .bind(name)
            .fetch_optional(&mut **tx)
            .await?;
    Ok(found.is_some())
}

/// v1: ring tables with a monotonic id used for FIFO ordering/eviction and
/// NULLable metric columns. A pre-versioned store (no id column, -1 sentinel
/// fields) is rebuilt in place: new shape, copy, drop, rename.
async fn migrate_ring(tx: &mut Transaction<'_, Sqlite>) -> anyhow::Result<()> {
    let v = version(tx, RING_FAMILY).await?;
    if v >= 1 {
        return Ok(());
    }

    for table in ["ring_minute", "ring_hour"] {
        if table_exists(tx, table).await? {
            rebuild_legacy_ring(tx, table).await?;
        } else {
            create_ring_table(tx, table).await?;
        }
    }
    set_version(tx, RING_FAMILY, 1).await
}

async fn create_ring_table(tx: &mut Transaction<'_, Sqlite>, table: &str) -> anyhow::Result<()> {
    sqlx::query(&format!(
        r#"
        CREATE TABLE {table} (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            node_id TEXT NOT NULL,
            cpu REAL,
            mem REAL,
            swap REAL,
            rx_rate REAL,
            tx_rate REAL,
            recorded_at INTEGER NOT NULL
        )
        "#
    ))
    .execute(&mut **tx)
    .await?;
    sqlx::query(&format!(
        "CREATE INDEX idx_{table}_node ON {table}(node_id, id)"
    ))
    .execute(&mut **tx)
    .await?;
    Ok(())
}

async fn rebuild_legacy_ring(tx: &mut Transaction<'_, Sqlite>, table: &str) -> anyhow::Result<()> {
    let tmp = format!("{table}_migrated");
    create_ring_table(tx, &tmp).await?;
    // legacy rows encode "no data" as -1 and carry no id; recorded_at order
    // becomes the new insertion order
    sqlx::query(&format!(
        r#"
        INSERT INTO {tmp} (node_id, cpu, mem, swap, rx_rate, tx_rate, recorded_at)
        SELECT node_id,
               CASE WHEN cpu < 0 THEN NULL ELSE cpu END,
               CASE WHEN mem < 0 THEN NULL ELSE mem END,
               CASE WHEN swap < 0 THEN NULL ELSE swap END,
               CASE WHEN rx_rate < 0 THEN NULL ELSE rx_rate END,
               CASE WHEN tx_rate < 0 THEN NULL ELSE tx_rate END,
               recorded_at
        FROM {table}
        ORDER BY recorded_at ASC
        "#
    ))
    .execute(&mut **tx)
    .await?;
    sqlx::query(&format!("DROP TABLE {table}"))
        .execute(&mut **tx)
        .await?;
    sqlx::query(&format!("DROP INDEX IF EXISTS idx_{tmp}_node"))
        .execute(&mut **tx)
        .await?;
    sqlx::query(&format!("ALTER TABLE {tmp} RENAME TO {table}"))
        .execute(&mut **tx)
        .await?;
    sqlx::query(&format!(
        "CREATE INDEX idx_{table}_node ON {table}(node_id, id)"
    ))
    .execute(&mut **tx)
    .await?;
    Ok(())
}

/// v1: fixed-slot ledger tables plus the persisted net-counter cursor.
/// A pre-versioned ledger (no updated_at_ms column) is rebuilt the same way
/// as the rings.
async fn migrate_ledger(tx: &mut Transaction<'_, Sqlite>) -> anyhow::Result<()> {
    let v = version(tx, LEDGER_FAMILY).await?;
    if v >= 1 {
        return Ok(());
    }

    for table in ["ledger_hour", "ledger_day", "ledger_month"] {
        if table_exists(tx, table).await? {
            rebuild_legacy_ledger(tx, table).await?;
        } else {
            create_ledger_table(tx, table).await?;
        }
    }
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS net_cursor (
            node_id TEXT PRIMARY KEY,
            rx_last INTEGER NOT NULL,
            tx_last INTEGER NOT NULL
        )
        "#,
    )
    .execute(&mut **tx)
    .await?;
    set_version(tx, LEDGER_FAMILY, 1).await
}

async fn create_ledger_table(tx: &mut Transaction<'_, Sqlite>, table: &str) -> anyhow::Result<()> {
    sqlx::query(&format!(
        r#"
        CREATE TABLE {table} (
            node_id TEXT NOT NULL,
            bucket INTEGER NOT NULL,
            rx_bytes INTEGER NOT NULL DEFAULT 0,
            tx_bytes INTEGER NOT NULL DEFAULT 0,
            updated_at_ms INTEGER NOT NULL DEFAULT 0,
            PRIMARY KEY (node_id, bucket)
        )
        "#
    ))
    .execute(&mut **tx)
    .await?;
    Ok(())
}

async fn rebuild_legacy_ledger(tx: &mut Transaction<'_, Sqlite>, table: &str) -> anyhow::Result<()> {
    let tmp = format!("{table}_migrated");
    create_ledger_table(tx, &tmp).await?;
    sqlx::query(&format!(
        "INSERT INTO {tmp} (node_id, bucket, rx_bytes, tx_bytes) SELECT node_id, bucket, rx_bytes, tx_bytes FROM {table}"
    ))
    .execute(&mut **tx)
    .await?;
    sqlx::query(&format!("DROP TABLE {table}"))
        .execute(&mut **tx)
        .await?;
    sqlx::query(&format!("ALTER TABLE {tmp} RENAME TO {table}"))
        .execute(&mut **tx)
        .await?;
    Ok(())
}
