use anyhow::Result;
use fleetmon::*;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::time::FormatTime;

#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

struct LocalTimer;

impl FormatTime for LocalTimer {
    fn format_time(&self, w: &mut tracing_subscriber::fmt::format::Writer<'_>) -> std::fmt::Result {
        write!(
            w,
            "{}",
            chrono::Local::now().format("%Y-%m-%dT%H:%M:%S%.3f%:z")
        )
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_timer(LocalTimer)
        .with_env_filter(filter)
        .init();

    tracing::info!(name = version::NAME, version = version::VERSION, "starting");

    let app_config = config::AppConfig::load()?;

    let store = Arc::new(
        store::Store::connect(
            &app_config.database.path,
            app_config.database.max_pool_size,
            app_config.database.retention_days,
        )
        .await?,
    );
    // migration failure is fatal: never run against a half-migrated schema
    store.init().await?;

    let registry = Arc::new(registry::NodeRegistry::load(&app_config.registry.path)?);
    tracing::info!(
        nodes = registry.list_ids().len(),
        path = %app_config.registry.path,
        "node registry loaded"
    );
    let reloader_handle = registry::spawn_reloader(
        registry.clone(),
        app_config.registry.reload_interval_secs,
    );

    let (events_tx, events_rx) = broadcast::channel::<models::TransitionEvent>(64);
    let notifier_handle = spawn_transition_logger(events_rx);

    let poller = poller::Poller::new(
        registry.clone(),
        Arc::new(poller::fetch::HttpStatusFetcher::new()),
        events_tx,
        poller::PollerConfig {
            interval_ms: app_config.polling.interval_ms,
            timeout_ms: app_config.polling.timeout_ms,
            offline_threshold: app_config.polling.offline_threshold,
        },
    );
    let poller_state = poller.state();

    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel();
    let poller_handle = poller::spawn(
        poller,
        shutdown_rx,
        app_config.accounting.stats_log_interval_secs,
    );

    let aggregator_handle = aggregator::spawn(
        aggregator::AggregatorDeps {
            store: store.clone(),
            poller: poller_state,
            registry: registry.clone(),
        },
        aggregator::AggregatorConfig {
            delta_interval_secs: app_config.accounting.delta_interval_secs,
            prune_interval_secs: app_config.accounting.prune_interval_secs,
            vacuum_schedule: app_config.database.vacuum_schedule.clone(),
            vacuum_interval_secs: app_config.database.vacuum_interval_secs,
        },
    );

    wait_for_shutdown().await;
    tracing::info!("Received shutdown signal");
    let _ = shutdown_tx.send(());
    let _ = poller_handle.await;
    aggregator_handle.abort();
    reloader_handle.abort();
    notifier_handle.abort();

    Ok(())
}

/// Stand-in for the notification collaborator: logs every transition.
fn spawn_transition_logger(
    mut rx: broadcast::Receiver<models::TransitionEvent>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(event) => tracing::info!(
                    node_id = %event.node_id,
                    kind = ?event.kind,
                    at_ms = event.at_ms,
                    "node transition"
                ),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    tracing::warn!(missed = n, "transition logger lagged");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}

async fn wait_for_shutdown() {
    #[cfg(unix)]
    {
        let mut sigterm = match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(s) => s,
            Err(_) => {
                let _ = tokio::signal::ctrl_c().await;
                return;
            }
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
