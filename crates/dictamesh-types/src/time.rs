//! Wall-clock helpers. All persisted timestamps in DictaMesh are unix-epoch
//! milliseconds stored as `i64`, which keeps them SQLite- and JS-safe.

use std::time::{SystemTime, UNIX_EPOCH};

pub fn now_millis() -> i64 {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or(0);
    i64::try_from(millis).unwrap_or(i64::MAX)
}
