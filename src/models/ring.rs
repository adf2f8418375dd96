// Ring slot model. Missing data is None (SQL NULL); the -1 sentinel written
// by older builds is rewritten to NULL by the schema migration.

use serde::{Deserialize, Serialize};

/// One slot of a minute or hour ring. A field of None means the node was
/// offline or unknown for that slot and must be excluded from averaging.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RingEntry {
    pub cpu: Option<f64>,
    pub mem: Option<f64>,
    pub swap: Option<f64>,
    pub rx_rate: Option<f64>,
    pub tx_rate: Option<f64>,
    pub recorded_at: i64,
}

impl RingEntry {
    /// Slot with no data (node offline/unknown at tick time).
    pub fn empty(recorded_at: i64) -> Self {
        Self {
            cpu: None,
            mem: None,
            swap: None,
            rx_rate: None,
            tx_rate: None,
            recorded_at,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.cpu.is_none()
            && self.mem.is_none()
            && self.swap.is_none()
            && self.rx_rate.is_none()
            && self.tx_rate.is_none()
    }
}
