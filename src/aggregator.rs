// Aggregation ticks: minute/hour ring rollups, the ledger delta tick, and
// calendar bucket rotations. Calendar boundaries come from cron schedules in
// local time; the delta and prune ticks are plain intervals. Every tick is
// idempotent and tolerates missing current-state data.

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use crate::clock;
use crate::models::{NodeHealth, RingEntry};
use crate::poller::PollerState;
use crate::registry::NodeRegistry;
use crate::store::Store;
use crate::store::ledger::LedgerHorizon;
use crate::store::ring::RingResolution;
use chrono::{DateTime, Local};
use tracing::{debug, info, warn};

const MINUTE_SCHEDULE: &str = "0 * * * * *";
const HOUR_SCHEDULE: &str = "0 0 * * * *";
const DAY_SCHEDULE: &str = "0 0 0 * * *";
const MONTH_SCHEDULE: &str = "0 0 0 1 * *";

pub struct AggregatorDeps {
    pub store: Arc<Store>,
    pub poller: Arc<PollerState>,
    pub registry: Arc<NodeRegistry>,
}

#[derive(Debug, Clone)]
pub struct AggregatorConfig {
    pub delta_interval_secs: u64,
    pub prune_interval_secs: u64,
    /// Optional cron expression for VACUUM (e.g. "0 0 3 * * *" = 03:00 daily). Uses local time.
    pub vacuum_schedule: Option<String>,
    /// Run VACUUM every N seconds when vacuum_schedule is not set.
    pub vacuum_interval_secs: u64,
}

/// Spawns the aggregation worker. Returns a join handle.
pub fn spawn(deps: AggregatorDeps, config: AggregatorConfig) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        run(deps, config).await;
    })
}

async fn run(deps: AggregatorDeps, config: AggregatorConfig) {
    let mut delta_tick = tokio::time::interval(Duration::from_secs(config.delta_interval_secs));
    delta_tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    let mut prune_tick = tokio::time::interval(Duration::from_secs(config.prune_interval_secs));
    prune_tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    let (minute_tx, mut minute_rx) = tokio::sync::mpsc::channel::<()>(1);
    tokio::spawn(cron_scheduler(MINUTE_SCHEDULE.into(), minute_tx));
    let (hour_tx, mut hour_rx) = tokio::sync::mpsc::channel::<()>(1);
    tokio::spawn(cron_scheduler(HOUR_SCHEDULE.into(), hour_tx));
    let (day_tx, mut day_rx) = tokio::sync::mpsc::channel::<()>(1);
    tokio::spawn(cron_scheduler(DAY_SCHEDULE.into(), day_tx));
    let (month_tx, mut month_rx) = tokio::sync::mpsc::channel::<()>(1);
    tokio::spawn(cron_scheduler(MONTH_SCHEDULE.into(), month_tx));
    let (vacuum_tx, mut vacuum_rx) = tokio::sync::mpsc::channel::<()>(1);
    tokio::spawn(vacuum_scheduler(
        config.vacuum_schedule.clone(),
        config.vacuum_interval_secs,
        vacuum_tx,
    ));

    loop {
        tokio::select! {
            _ = delta_tick.tick() => {
                if let Err(e) =
                    run_delta_tick(&deps.store, &deps.poller, &deps.registry, clock::now()).await
                {
                    warn!(error = %e, "ledger delta tick failed");
                }
            }
            Some(_) = minute_rx.recv() => {
                if let Err(e) =
                    run_minute_tick(&deps.store, &deps.poller, &deps.registry, clock::now_ms()).await
                {
                    warn!(error = %e, "minute ring tick failed");
                }
            }
            Some(_) = hour_rx.recv() => {
                if let Err(e) = run_hour_tick(&deps.store, &deps.registry, clock::now_ms()).await {
                    warn!(error = %e, "hour ring tick failed");
                }
                if let Err(e) = run_rotation(&deps.store, LedgerHorizon::Hour, clock::now()).await {
                    warn!(error = %e, "hour ledger rotation failed");
                }
            }
            Some(_) = day_rx.recv() => {
                if let Err(e) = run_rotation(&deps.store, LedgerHorizon::Day, clock::now()).await {
                    warn!(error = %e, "day ledger rotation failed");
                }
            }
            Some(_) = month_rx.recv() => {
                if let Err(e) = run_rotation(&deps.store, LedgerHorizon::Month, clock::now()).await {
                    warn!(error = %e, "month ledger rotation failed");
                }
            }
            _ = prune_tick.tick() => {
                let registered = deps.registry.list_ids();
                match deps.store.prune(&registered).await {
                    Ok(removed) => debug!(rows_removed = removed, "expiry sweep complete"),
                    Err(e) => warn!(error = %e, "expiry sweep failed"),
                }
            }
            Some(_) = vacuum_rx.recv() => {
                if let Err(e) = deps.store.vacuum().await {
                    warn!(error = %e, "vacuum failed");
                } else {
                    info!("vacuum complete");
                }
            }
        }
    }
}

/// Sends on `tx` at each boundary of the cron expression. Uses local time.
async fn cron_scheduler(expr: String, tx: tokio::sync::mpsc::Sender<()>) {
    let Ok(schedule) = cron::Schedule::from_str(&expr) else {
        warn!(cron = %expr, "invalid schedule; tick disabled");
        return;
    };
    loop {
        let now = Local::now();
        let next = schedule.after(&now).next();
        if let Some(next) = next {
            let delay = (next - now).to_std().unwrap_or(Duration::from_secs(1));
            tokio::time::sleep(delay).await;
            if tx.send(()).await.is_err() {
                break;
            }
        } else {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        }
    }
}

/// VACUUM at the cron schedule when set, otherwise every `interval_secs`.
async fn vacuum_scheduler(
    schedule: Option<String>,
    interval_secs: u64,
    tx: tokio::sync::mpsc::Sender<()>,
) {
    match schedule {
        Some(expr) => cron_scheduler(expr, tx).await,
        None => {
            let interval = Duration::from_secs(interval_secs);
            loop {
                tokio::time::sleep(interval).await;
                if tx.send(()).await.is_err() {
                    break;
                }
            }
        }
    }
}

/// Minute rollup: write the latest completed sample of every active node into
/// its minute ring, or an empty slot when the node is offline/unknown.
pub async fn run_minute_tick(
    store: &Store,
    poller: &PollerState,
    registry: &NodeRegistry,
    now_ms: i64,
) -> anyhow::Result<()> {
    for node in registry.list_active() {
        let entry = match poller.latest(&node.id) {
            (NodeHealth::Online, Some(s)) => RingEntry {
                cpu: Some(s.cpu_ratio),
                mem: Some(s.mem_ratio),
                swap: Some(s.swap_ratio),
                rx_rate: Some(s.rx_rate),
                tx_rate: Some(s.tx_rate),
                recorded_at: now_ms,
            },
            _ => RingEntry::empty(now_ms),
        };
        store
            .push_ring(RingResolution::Minute, &node.id, &entry)
            .await?;
    }
    Ok(())
}

/// Hour rollup: average each node's minute ring into the next hour slot.
pub async fn run_hour_tick(
    store: &Store,
    registry: &NodeRegistry,
    now_ms: i64,
) -> anyhow::Result<()> {
    for node in registry.list_active() {
        let minutes = store.ring_history(RingResolution::Minute, &node.id).await?;
        let entry = average_entries(&minutes, now_ms);
        store
            .push_ring(RingResolution::Hour, &node.id, &entry)
            .await?;
    }
    Ok(())
}

/// Field-wise mean excluding empty slots. All-empty input yields an empty
/// entry, never zeros.
pub fn average_entries(entries: &[RingEntry], recorded_at: i64) -> RingEntry {
    fn mean<I: Iterator<Item = Option<f64>>>(values: I) -> Option<f64> {
        let present: Vec<f64> = values.flatten().collect();
        if present.is_empty() {
            None
        } else {
            Some(present.iter().sum::<f64>() / present.len() as f64)
        }
    }
    RingEntry {
        cpu: mean(entries.iter().map(|e| e.cpu)),
        mem: mean(entries.iter().map(|e| e.mem)),
        swap: mean(entries.iter().map(|e| e.swap)),
        rx_rate: mean(entries.iter().map(|e| e.rx_rate)),
        tx_rate: mean(entries.iter().map(|e| e.tx_rate)),
        recorded_at,
    }
}

/// Ledger delta tick: account the latest counters of every online node.
/// Independent of the minute/hour ring cadence.
pub async fn run_delta_tick(
    store: &Store,
    poller: &PollerState,
    registry: &NodeRegistry,
    at: DateTime<Local>,
) -> anyhow::Result<()> {
    for node in registry.list_active() {
        if let (NodeHealth::Online, Some(s)) = poller.latest(&node.id) {
            store.add_net_delta(&node.id, s.counters, at).await?;
        }
    }
    Ok(())
}

/// Rotation tick: zero the bucket the window just rolled into.
pub async fn run_rotation(
    store: &Store,
    horizon: LedgerHorizon,
    at: DateTime<Local>,
) -> anyhow::Result<()> {
    let bucket = horizon.current_bucket(at);
    let cleared = store
        .rotate_ledger(horizon, bucket, horizon.period_start_ms(at))
        .await?;
    debug!(bucket, rows_cleared = cleared, "ledger rotation");
    Ok(())
}
