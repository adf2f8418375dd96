// Poller tests: failure-streak debouncing, transitions, in-flight guard,
// purge of deregistered nodes

use fleetmon::models::{
    InterfaceCounters, LiveStatus, NetCounters, Node, NodeHealth, PollTarget, TransitionKind,
};
use fleetmon::poller::fetch::{FetchError, StatusFetcher};
use fleetmon::poller::{Poller, PollerConfig, PollerState};
use fleetmon::registry::NodeRegistry;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::broadcast;

fn node(id: &str, host: &str) -> Node {
    Node {
        id: id.into(),
        poll_target: PollTarget {
            host: host.into(),
            port: 9100,
            auth_token: None,
        },
        active: true,
        quota_bytes: 0,
        reset_day: 1,
        calibration: None,
        device_name: "eth0".into(),
    }
}

fn status(rx: u64, tx: u64) -> LiveStatus {
    LiveStatus {
        cpu_ratio: 0.2,
        mem_ratio: 0.4,
        swap_ratio: 0.0,
        interfaces: vec![InterfaceCounters {
            name: "eth0".into(),
            rx_bytes: rx,
            tx_bytes: tx,
        }],
    }
}

fn counters(rx: u64, tx: u64) -> NetCounters {
    NetCounters {
        rx_bytes: rx,
        tx_bytes: tx,
    }
}

#[derive(Clone, Copy)]
enum Behavior {
    Succeed,
    Fail,
    Hang,
    WrongDevice,
}

struct ScriptedFetcher {
    by_host: Mutex<HashMap<String, Behavior>>,
    counts: Mutex<HashMap<String, u32>>,
}

impl ScriptedFetcher {
    fn new(hosts: &[(&str, Behavior)]) -> Self {
        Self {
            by_host: Mutex::new(
                hosts
                    .iter()
                    .map(|(h, b)| (h.to_string(), *b))
                    .collect(),
            ),
            counts: Mutex::new(HashMap::new()),
        }
    }

    fn count(&self, host: &str) -> u32 {
        *self.counts.lock().unwrap().get(host).unwrap_or(&0)
    }
}

impl StatusFetcher for ScriptedFetcher {
    async fn fetch(
        &self,
        target: &PollTarget,
        _timeout: Duration,
    ) -> Result<LiveStatus, FetchError> {
        *self
            .counts
            .lock()
            .unwrap()
            .entry(target.host.clone())
            .or_default() += 1;
        let behavior = *self
            .by_host
            .lock()
            .unwrap()
            .get(&target.host)
            .unwrap_or(&Behavior::Fail);
        match behavior {
            Behavior::Succeed => Ok(status(1_000, 2_000)),
            Behavior::Fail => Err(FetchError::Connect("connection refused".into())),
            Behavior::Hang => {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Err(FetchError::Timeout)
            }
            Behavior::WrongDevice => Ok(LiveStatus {
                interfaces: vec![InterfaceCounters {
                    name: "wlan0".into(),
                    rx_bytes: 0,
                    tx_bytes: 0,
                }],
                ..status(0, 0)
            }),
        }
    }
}

#[test]
fn offline_after_exactly_ten_failures_and_only_once() {
    let (tx, mut rx) = broadcast::channel(16);
    let state = PollerState::new(tx);

    for i in 1..=9 {
        assert!(state.begin_poll("alpha"));
        state.complete_failure("alpha", 10, i);
        // still the pre-first-poll state, never offline early
        assert_eq!(state.health("alpha"), NodeHealth::Unknown);
    }
    assert!(rx.try_recv().is_err(), "no event before the threshold");

    assert!(state.begin_poll("alpha"));
    state.complete_failure("alpha", 10, 10);
    assert_eq!(state.health("alpha"), NodeHealth::Offline);
    let event = rx.try_recv().unwrap();
    assert_eq!(event.kind, TransitionKind::Offline);

    // further failures while offline emit nothing
    assert!(state.begin_poll("alpha"));
    state.complete_failure("alpha", 10, 11);
    assert!(rx.try_recv().is_err());
}

#[test]
fn single_success_restores_online_with_one_recovery_event() {
    let (tx, mut rx) = broadcast::channel(32);
    let state = PollerState::new(tx);

    for i in 1..=10 {
        state.begin_poll("alpha");
        state.complete_failure("alpha", 10, i);
    }
    assert_eq!(rx.try_recv().unwrap().kind, TransitionKind::Offline);

    state.begin_poll("alpha");
    state.complete_success("alpha", &status(100, 200), counters(100, 200), 11);
    assert_eq!(state.health("alpha"), NodeHealth::Online);
    assert_eq!(state.failure_streak("alpha"), 0);
    let event = rx.try_recv().unwrap();
    assert_eq!(event.kind, TransitionKind::Recovery);
    assert!(rx.try_recv().is_err(), "exactly one recovery event");
}

#[test]
fn first_success_emits_online_not_recovery() {
    let (tx, mut rx) = broadcast::channel(16);
    let state = PollerState::new(tx);

    state.begin_poll("alpha");
    state.complete_success("alpha", &status(1, 1), counters(1, 1), 1);
    assert_eq!(rx.try_recv().unwrap().kind, TransitionKind::Online);

    // staying online is not a transition
    state.begin_poll("alpha");
    state.complete_success("alpha", &status(2, 2), counters(2, 2), 2);
    assert!(rx.try_recv().is_err());
}

#[test]
fn success_merges_sample_with_reset_safe_delta_and_rates() {
    let (tx, _rx) = broadcast::channel(16);
    let state = PollerState::new(tx);

    state.complete_success("alpha", &status(10_000, 20_000), counters(10_000, 20_000), 1_000);
    // 2s later, counters grew by 2000/4000
    state.complete_success("alpha", &status(12_000, 24_000), counters(12_000, 24_000), 3_000);
    let sample = state.current_sample("alpha").unwrap();
    assert_eq!(sample.delta, counters(2_000, 4_000));
    assert_eq!(sample.rx_rate, 1_000.0);
    assert_eq!(sample.tx_rate, 2_000.0);

    // remote counter reset: delta is the new absolute value, not negative
    state.complete_success("alpha", &status(500, 700), counters(500, 700), 4_000);
    let sample = state.current_sample("alpha").unwrap();
    assert_eq!(sample.delta, counters(500, 700));
}

#[tokio::test]
async fn timeout_releases_guard_and_node_is_repolled_next_tick() {
    let registry = Arc::new(NodeRegistry::from_nodes(vec![
        node("slow", "slow.host"),
        node("ok", "ok.host"),
    ]));
    let fetcher = Arc::new(ScriptedFetcher::new(&[
        ("slow.host", Behavior::Hang),
        ("ok.host", Behavior::Succeed),
    ]));
    let (tx, _rx) = broadcast::channel(16);
    let poller = Poller::new(
        registry,
        fetcher.clone(),
        tx,
        PollerConfig {
            interval_ms: 1_000,
            timeout_ms: 50,
            offline_threshold: 10,
        },
    );
    let state = poller.state();

    poller.tick();
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert!(state.current_sample("ok").is_some());
    assert_eq!(state.failure_streak("slow"), 1);
    assert_eq!(state.health("slow"), NodeHealth::Unknown);

    // the guard was released on timeout, so the very next tick polls again
    poller.tick();
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(fetcher.count("slow.host"), 2);
    assert_eq!(state.failure_streak("slow"), 2);
}

#[tokio::test]
async fn in_flight_node_is_skipped_by_overlapping_tick() {
    let registry = Arc::new(NodeRegistry::from_nodes(vec![node("slow", "slow.host")]));
    let fetcher = Arc::new(ScriptedFetcher::new(&[("slow.host", Behavior::Hang)]));
    let (tx, _rx) = broadcast::channel(16);
    let poller = Poller::new(
        registry,
        fetcher.clone(),
        tx,
        PollerConfig {
            interval_ms: 1_000,
            timeout_ms: 500,
            offline_threshold: 10,
        },
    );

    poller.tick();
    tokio::time::sleep(Duration::from_millis(50)).await;
    poller.tick(); // poll still outstanding
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(fetcher.count("slow.host"), 1);
}

#[tokio::test]
async fn payload_without_tracked_interface_counts_as_failure() {
    let registry = Arc::new(NodeRegistry::from_nodes(vec![node("alpha", "a.host")]));
    let fetcher = Arc::new(ScriptedFetcher::new(&[("a.host", Behavior::WrongDevice)]));
    let (tx, _rx) = broadcast::channel(16);
    let poller = Poller::new(
        registry,
        fetcher,
        tx,
        PollerConfig {
            interval_ms: 1_000,
            timeout_ms: 100,
            offline_threshold: 10,
        },
    );
    let state = poller.state();

    poller.tick();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(state.failure_streak("alpha"), 1);
    assert!(state.current_sample("alpha").is_none());
}

#[tokio::test]
async fn nodes_removed_from_registry_are_purged() {
    let dir = tempfile::TempDir::new().unwrap();
    let path = dir.path().join("nodes.toml");
    std::fs::write(
        &path,
        r#"
[[nodes]]
id = "alpha"
pollTarget = { host = "a.host", port = 9100 }

[[nodes]]
id = "beta"
pollTarget = { host = "b.host", port = 9100 }
"#,
    )
    .unwrap();
    let registry = Arc::new(NodeRegistry::load(&path).unwrap());
    let fetcher = Arc::new(ScriptedFetcher::new(&[
        ("a.host", Behavior::Succeed),
        ("b.host", Behavior::Succeed),
    ]));
    let (tx, _rx) = broadcast::channel(16);
    let poller = Poller::new(
        registry.clone(),
        fetcher,
        tx,
        PollerConfig {
            interval_ms: 1_000,
            timeout_ms: 100,
            offline_threshold: 10,
        },
    );
    let state = poller.state();

    poller.tick();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(state.current_sample("alpha").is_some());
    assert!(state.current_sample("beta").is_some());

    std::fs::write(
        &path,
        "[[nodes]]\nid = \"alpha\"\npollTarget = { host = \"a.host\", port = 9100 }\n",
    )
    .unwrap();
    registry.reload().unwrap();

    poller.tick();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(state.current_sample("alpha").is_some());
    assert!(
        state.current_sample("beta").is_none(),
        "stale state must not leak into aggregation"
    );
}
