// Poll scheduler: one bounded fetch per active node per tick, at most one in
// flight per node. Failure streaks debounce transient errors before a node is
// declared offline; a single success restores it.

pub mod fetch;

use crate::clock;
use crate::models::{LiveSample, LiveStatus, NetCounters, NodeHealth, TransitionEvent, TransitionKind};
use crate::registry::NodeRegistry;
use self::fetch::StatusFetcher;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::interval;
use tracing::{debug, info};

#[derive(Debug, Clone)]
pub struct PollerConfig {
    pub interval_ms: u64,
    pub timeout_ms: u64,
    /// Consecutive failures before the node flips to offline.
    pub offline_threshold: u32,
}

#[derive(Debug)]
struct NodeState {
    sample: Option<LiveSample>,
    health: NodeHealth,
    failure_streak: u32,
    in_flight: bool,
}

impl Default for NodeState {
    fn default() -> Self {
        Self {
            sample: None,
            health: NodeHealth::Unknown,
            failure_streak: 0,
            in_flight: false,
        }
    }
}

/// Per-node state table owned by the poller. Mutated only by the poll tasks;
/// aggregation and presentation read snapshots through the accessors.
pub struct PollerState {
    nodes: Mutex<HashMap<String, NodeState>>,
    events: broadcast::Sender<TransitionEvent>,
    polls_issued_total: AtomicU64,
    transitions_total: AtomicU64,
}

impl PollerState {
    pub fn new(events: broadcast::Sender<TransitionEvent>) -> Self {
        Self {
            nodes: Mutex::new(HashMap::new()),
            events,
            polls_issued_total: AtomicU64::new(0),
            transitions_total: AtomicU64::new(0),
        }
    }

    pub fn current_sample(&self, node_id: &str) -> Option<LiveSample> {
        self.lock()
            .get(node_id)
            .and_then(|s| s.sample.clone())
    }

    pub fn health(&self, node_id: &str) -> NodeHealth {
        self.lock()
            .get(node_id)
            .map(|s| s.health)
            .unwrap_or(NodeHealth::Unknown)
    }

    /// Health and latest sample in one read, for aggregation ticks.
    pub fn latest(&self, node_id: &str) -> (NodeHealth, Option<LiveSample>) {
        let nodes = self.lock();
        match nodes.get(node_id) {
            Some(s) => (s.health, s.sample.clone()),
            None => (NodeHealth::Unknown, None),
        }
    }

    pub fn failure_streak(&self, node_id: &str) -> u32 {
        self.lock().get(node_id).map(|s| s.failure_streak).unwrap_or(0)
    }

    /// Marks the node in flight. Returns false when a poll is already
    /// outstanding (the tick skips the node instead of piling up requests).
    pub fn begin_poll(&self, node_id: &str) -> bool {
        let mut nodes = self.lock();
        let state = nodes.entry(node_id.to_string()).or_default();
        if state.in_flight {
            return false;
        }
        state.in_flight = true;
        self.polls_issued_total.fetch_add(1, Ordering::Relaxed);
        true
    }

    /// Successful poll: reset the streak, transition to online, merge the new
    /// sample (deltas/rates computed against the previous one), release the guard.
    pub fn complete_success(
        &self,
        node_id: &str,
        status: &LiveStatus,
        counters: NetCounters,
        now_ms: i64,
    ) {
        let event = {
            let mut nodes = self.lock();
            let state = nodes.entry(node_id.to_string()).or_default();
            state.in_flight = false;
            state.failure_streak = 0;

            let (delta, rx_rate, tx_rate) = match &state.sample {
                Some(prev) => {
                    let delta = counters.delta_since(prev.counters);
                    let dt = (now_ms - prev.at_ms) as f64 / 1000.0;
                    if dt > 0.0 {
                        (
                            delta,
                            delta.rx_bytes as f64 / dt,
                            delta.tx_bytes as f64 / dt,
                        )
                    } else {
                        (delta, 0.0, 0.0)
                    }
                }
                None => (NetCounters::default(), 0.0, 0.0),
            };
            state.sample = Some(LiveSample {
                at_ms: now_ms,
                cpu_ratio: status.cpu_ratio,
                mem_ratio: status.mem_ratio,
                swap_ratio: status.swap_ratio,
                counters,
                delta,
                rx_rate,
                tx_rate,
            });

            match state.health {
                NodeHealth::Online => None,
                NodeHealth::Unknown => {
                    state.health = NodeHealth::Online;
                    Some(TransitionKind::Online)
                }
                NodeHealth::Offline => {
                    state.health = NodeHealth::Online;
                    Some(TransitionKind::Recovery)
                }
            }
        };
        if let Some(kind) = event {
            self.emit(node_id, kind, now_ms);
        }
    }

    /// Failed poll: bump the streak, flip to offline exactly once when the
    /// streak reaches the threshold, release the guard.
    pub fn complete_failure(&self, node_id: &str, offline_threshold: u32, now_ms: i64) {
        let event = {
            let mut nodes = self.lock();
            let state = nodes.entry(node_id.to_string()).or_default();
            state.in_flight = false;
            state.failure_streak = state.failure_streak.saturating_add(1);
            if state.health != NodeHealth::Offline && state.failure_streak >= offline_threshold {
                state.health = NodeHealth::Offline;
                Some(TransitionKind::Offline)
            } else {
                None
            }
        };
        if let Some(kind) = event {
            self.emit(node_id, kind, now_ms);
        }
    }

    /// Drops state for nodes no longer in the active set so stale entries
    /// never leak into aggregation.
    fn purge_missing(&self, active_ids: &HashSet<String>) {
        self.lock().retain(|id, _| active_ids.contains(id));
    }

    fn emit(&self, node_id: &str, kind: TransitionKind, at_ms: i64) {
        self.transitions_total.fetch_add(1, Ordering::Relaxed);
        // send fails only when no collaborator is subscribed
        let _ = self.events.send(TransitionEvent {
            node_id: node_id.to_string(),
            kind,
            at_ms,
        });
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, NodeState>> {
        self.nodes.lock().expect("poller state lock poisoned")
    }
}

pub struct Poller<F: StatusFetcher> {
    state: Arc<PollerState>,
    registry: Arc<NodeRegistry>,
    fetcher: Arc<F>,
    config: PollerConfig,
}

impl<F: StatusFetcher> Poller<F> {
    pub fn new(
        registry: Arc<NodeRegistry>,
        fetcher: Arc<F>,
        events: broadcast::Sender<TransitionEvent>,
        config: PollerConfig,
    ) -> Self {
        Self {
            state: Arc::new(PollerState::new(events)),
            registry,
            fetcher,
            config,
        }
    }

    pub fn state(&self) -> Arc<PollerState> {
        self.state.clone()
    }

    /// One scheduler pass: purge stale entries, then spawn one fetch task per
    /// active node that is not already in flight. Does not wait for the tasks;
    /// per-node serialization comes from the in-flight guard.
    pub fn tick(&self) {
        let nodes = self.registry.list_active();
        let active_ids: HashSet<String> = nodes.iter().map(|n| n.id.clone()).collect();
        self.state.purge_missing(&active_ids);

        for node in nodes {
            if !self.state.begin_poll(&node.id) {
                continue;
            }
            let state = self.state.clone();
            let fetcher = self.fetcher.clone();
            let timeout = Duration::from_millis(self.config.timeout_ms);
            let threshold = self.config.offline_threshold;
            tokio::spawn(async move {
                // outer timeout guarantees the guard is released even if the
                // fetcher misbehaves
                let result =
                    tokio::time::timeout(timeout, fetcher.fetch(&node.poll_target, timeout)).await;
                let now_ms = clock::now_ms();
                match result {
                    Ok(Ok(status)) => match status.counters_for(&node.device_name) {
                        Some(counters) => {
                            state.complete_success(&node.id, &status, counters, now_ms);
                        }
                        None => {
                            debug!(
                                node_id = %node.id,
                                device = %node.device_name,
                                "status payload missing tracked interface"
                            );
                            state.complete_failure(&node.id, threshold, now_ms);
                        }
                    },
                    Ok(Err(e)) => {
                        debug!(node_id = %node.id, error = %e, "poll failed");
                        state.complete_failure(&node.id, threshold, now_ms);
                    }
                    Err(_) => {
                        debug!(node_id = %node.id, "poll timed out");
                        state.complete_failure(&node.id, threshold, now_ms);
                    }
                }
            });
        }
    }
}

/// Spawns the poll loop. Shutdown via the oneshot channel, like the other workers.
pub fn spawn<F: StatusFetcher>(
    poller: Poller<F>,
    mut shutdown_rx: tokio::sync::oneshot::Receiver<()>,
    stats_log_interval_secs: u64,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut tick = interval(Duration::from_millis(poller.config.interval_ms));
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        let mut stats_log_tick = interval(Duration::from_secs(stats_log_interval_secs));
        stats_log_tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = tick.tick() => poller.tick(),
                _ = stats_log_tick.tick() => {
                    info!(
                        polls_issued_total = poller.state.polls_issued_total.load(Ordering::Relaxed),
                        transitions_total = poller.state.transitions_total.load(Ordering::Relaxed),
                        "app stats"
                    );
                }
                _ = &mut shutdown_rx => {
                    debug!("Poller shutting down");
                    break;
                }
            }
        }
    })
}
