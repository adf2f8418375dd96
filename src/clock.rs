// Wall-clock helpers. Tick functions take explicit time arguments so tests
// can pin boundaries; this is the single production source.

use chrono::{DateTime, Local};

pub fn now() -> DateTime<Local> {
    Local::now()
}

pub fn now_ms() -> i64 {
    Local::now().timestamp_millis()
}
