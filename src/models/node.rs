// Node identity, poll target and quota configuration (owned by the registry)

use serde::{Deserialize, Serialize};

/// Where a node's live-status endpoint lives.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PollTarget {
    pub host: String,
    pub port: u16,
    #[serde(default)]
    pub auth_token: Option<String>,
}

impl PollTarget {
    pub fn status_url(&self) -> String {
        format!("http://{}:{}/status", self.host, self.port)
    }
}

/// Manually pinned absolute traffic value, used to correct for counter
/// anomalies or node migrations. Additive on top of in-window ledger data.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Calibration {
    pub at_ms: i64,
    pub baseline_bytes: u64,
}

/// A monitored remote host. Read-only for the monitoring core; mutation
/// happens through the CRUD collaborator that owns the registry file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Node {
    pub id: String,
    pub poll_target: PollTarget,
    #[serde(default = "default_active")]
    pub active: bool,
    /// Monthly traffic quota in bytes. 0 = unlimited.
    #[serde(default)]
    pub quota_bytes: u64,
    /// Day of month (1-31) on which the billing cycle restarts.
    #[serde(default = "default_reset_day")]
    pub reset_day: u8,
    #[serde(default)]
    pub calibration: Option<Calibration>,
    /// Network interface whose counters feed the traffic ledger.
    #[serde(default = "default_device_name")]
    pub device_name: String,
}

fn default_active() -> bool {
    true
}

fn default_reset_day() -> u8 {
    1
}

fn default_device_name() -> String {
    "eth0".into()
}
