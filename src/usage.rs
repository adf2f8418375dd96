// Monthly usage calculator. Pure and total: every well-typed input yields a
// summary, edge cases resolve by policy (quota 0 = unlimited, short months
// clamp the reset day, missing buckets count as zero).

use crate::models::{Calibration, LedgerBucket, Node, UsageStatus, UsageSummary};
use crate::store::Store;
use crate::store::ledger::LedgerHorizon;
use chrono::{Datelike, Days, Local, NaiveDate, TimeZone};

const CRITICAL_RATIO: f64 = 90.0;
const WARNING_RATIO: f64 = 70.0;

/// Billing-cycle usage from day-of-month buckets, the calibration baseline
/// and the configured reset day, evaluated as of `today`.
pub fn compute_monthly_usage(
    day_buckets: &[LedgerBucket],
    reset_day: u8,
    quota_bytes: u64,
    calibration: Option<&Calibration>,
    today: NaiveDate,
) -> UsageSummary {
    let reset_day = reset_day.clamp(1, 31);
    let reset_day_effective = reset_day.min(days_in_month(today.year(), today.month()));
    let window_start = cycle_start(today, reset_day);

    // one flag per day-of-month index; each bucket counts at most once even
    // when the window wraps across a month boundary
    let mut in_window = [false; 32];
    let mut date = window_start;
    while date <= today {
        in_window[date.day() as usize] = true;
        date = match date.succ_opt() {
            Some(d) => d,
            None => break,
        };
    }

    let mut used_bytes: u64 = day_buckets
        .iter()
        .filter(|b| (1..=31).contains(&b.bucket) && in_window[b.bucket as usize])
        .map(|b| b.rx_bytes + b.tx_bytes)
        .sum();

    // calibration is additive on top of in-window data; anything pinned
    // before the cycle started belongs to a previous cycle and is ignored
    if let Some(cal) = calibration
        && let Some(at) = Local.timestamp_millis_opt(cal.at_ms).single()
        && at.date_naive() >= window_start
        && at.date_naive() <= today
    {
        used_bytes = used_bytes.saturating_add(cal.baseline_bytes);
    }

    let (remaining_bytes, ratio) = if quota_bytes > 0 {
        let remaining = quota_bytes.saturating_sub(used_bytes);
        let ratio = (used_bytes as f64 / quota_bytes as f64 * 100.0).min(100.0);
        (remaining as i64, ratio)
    } else {
        (-1, 0.0)
    };

    let status = if quota_bytes == 0 {
        UsageStatus::Normal
    } else if ratio >= CRITICAL_RATIO {
        UsageStatus::Critical
    } else if ratio >= WARNING_RATIO {
        UsageStatus::Warning
    } else {
        UsageStatus::Normal
    };

    UsageSummary {
        used_bytes,
        remaining_bytes,
        limit_bytes: quota_bytes,
        ratio,
        reset_day_effective,
        next_reset_at: next_reset(today, reset_day),
        status,
    }
}

/// First day of the billing cycle containing `today`: this month's reset day
/// when it has passed, otherwise last month's (clamped to that month's length).
fn cycle_start(today: NaiveDate, reset_day: u8) -> NaiveDate {
    let this_month_reset = reset_day.min(days_in_month(today.year(), today.month()));
    if today.day() >= this_month_reset as u32 {
        clamped_date(today.year(), today.month(), reset_day)
    } else {
        let (py, pm) = prev_month(today.year(), today.month());
        clamped_date(py, pm, reset_day)
    }
}

/// Next calendar occurrence of the reset day strictly after `today`, clamped
/// to the last valid day of short months.
fn next_reset(today: NaiveDate, reset_day: u8) -> NaiveDate {
    let candidate = clamped_date(today.year(), today.month(), reset_day);
    if candidate > today {
        candidate
    } else {
        let (ny, nm) = next_month(today.year(), today.month());
        clamped_date(ny, nm, reset_day)
    }
}

fn clamped_date(year: i32, month: u32, day: u8) -> NaiveDate {
    let day = (day as u32).min(days_in_month(year, month) as u32);
    // day is clamped to a valid day-of-month, construction cannot fail
    NaiveDate::from_ymd_opt(year, month, day.max(1))
        .unwrap_or(NaiveDate::MIN)
}

fn days_in_month(year: i32, month: u32) -> u8 {
    let (ny, nm) = next_month(year, month);
    NaiveDate::from_ymd_opt(ny, nm, 1)
        .and_then(|first_of_next| first_of_next.checked_sub_days(Days::new(1)))
        .map(|d| d.day() as u8)
        .unwrap_or(31)
}

fn prev_month(year: i32, month: u32) -> (i32, u32) {
    if month == 1 { (year - 1, 12) } else { (year, month - 1) }
}

fn next_month(year: i32, month: u32) -> (i32, u32) {
    if month == 12 { (year + 1, 1) } else { (year, month + 1) }
}

/// Read API for presentation/alerting: current cycle usage for one node.
pub async fn monthly_usage(
    store: &Store,
    node: &Node,
    today: NaiveDate,
) -> anyhow::Result<UsageSummary> {
    let buckets = store.ledger_buckets(LedgerHorizon::Day, &node.id).await?;
    Ok(compute_monthly_usage(
        &buckets,
        node.reset_day,
        node.quota_bytes,
        node.calibration.as_ref(),
        today,
    ))
}
