// Ledger bucket rows and the derived monthly usage summary

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Inbound/outbound byte accumulator for one fixed calendar slot
/// (hour-of-day, day-of-month or month-of-year).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerBucket {
    pub bucket: u32,
    pub rx_bytes: u64,
    pub tx_bytes: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum UsageStatus {
    Normal,
    Warning,
    Critical,
}

/// Billing-cycle usage derived on demand from day-of-month ledger buckets.
/// Never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageSummary {
    pub used_bytes: u64,
    /// -1 = unlimited (quota_bytes == 0).
    pub remaining_bytes: i64,
    pub limit_bytes: u64,
    /// Percent of quota used, capped at 100. 0 when unlimited.
    pub ratio: f64,
    /// Configured reset day clamped to the current month's length.
    pub reset_day_effective: u8,
    pub next_reset_at: NaiveDate,
    pub status: UsageStatus,
}
