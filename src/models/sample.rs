// Live-status wire payload, per-node samples and health transitions

use serde::{Deserialize, Serialize};

/// Payload returned by a node's live-status endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LiveStatus {
    pub cpu_ratio: f64,
    pub mem_ratio: f64,
    pub swap_ratio: f64,
    pub interfaces: Vec<InterfaceCounters>,
}

impl LiveStatus {
    /// Monotonic counters for the named interface, if the node reported it.
    pub fn counters_for(&self, device_name: &str) -> Option<NetCounters> {
        self.interfaces
            .iter()
            .find(|i| i.name == device_name)
            .map(|i| NetCounters {
                rx_bytes: i.rx_bytes,
                tx_bytes: i.tx_bytes,
            })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InterfaceCounters {
    pub name: String,
    pub rx_bytes: u64,
    pub tx_bytes: u64,
}

/// Monotonic inbound/outbound byte counters as reported by a node.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetCounters {
    pub rx_bytes: u64,
    pub tx_bytes: u64,
}

impl NetCounters {
    /// Delta since `prev`, never negative: a counter numerically lower than
    /// before means the remote counter reset, and the delta is the new
    /// absolute value.
    pub fn delta_since(&self, prev: NetCounters) -> NetCounters {
        NetCounters {
            rx_bytes: if self.rx_bytes >= prev.rx_bytes {
                self.rx_bytes - prev.rx_bytes
            } else {
                self.rx_bytes
            },
            tx_bytes: if self.tx_bytes >= prev.tx_bytes {
                self.tx_bytes - prev.tx_bytes
            } else {
                self.tx_bytes
            },
        }
    }
}

/// Latest completed poll result for one node. Written only by the poller;
/// aggregation and presentation read the most recent snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LiveSample {
    pub at_ms: i64,
    pub cpu_ratio: f64,
    pub mem_ratio: f64,
    pub swap_ratio: f64,
    pub counters: NetCounters,
    /// Bytes since the previous poll (reset-safe, see NetCounters::delta_since).
    pub delta: NetCounters,
    /// Instantaneous rates in bytes/sec over the previous poll interval.
    pub rx_rate: f64,
    pub tx_rate: f64,
}

/// Per-node health state machine: `Unknown -> Online <-> Offline`.
/// Unknown is the pre-first-poll state and never implies a real outage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum NodeHealth {
    Unknown,
    Online,
    Offline,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TransitionKind {
    Online,
    Offline,
    Recovery,
}

/// Emitted exactly once per health transition, never per raw poll failure.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransitionEvent {
    pub node_id: String,
    pub kind: TransitionKind,
    pub at_ms: i64,
}
