//! Epoch-seconds helpers.
//!
//! All persisted timestamps are UTC epoch seconds. Keeping the conversion in
//! one place avoids a dozen slightly-different `SystemTime` dances.

use std::time::{SystemTime, UNIX_EPOCH};

/// Current wall-clock time as UTC epoch seconds.
#[must_use]
pub fn epoch_now() -> i64 {
    i64::try_from(
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs(),
    )
    .unwrap_or(i64::MAX)
}

/// Ceil `now` to the next boundary of a window of `window_secs` seconds.
///
/// Used by the rate-limit planner: a violated sliding window defers work to
/// the start of the next window, `((now / w) + 1) * w`.
#[must_use]
pub const fn next_window_boundary(now: i64, window_secs: i64) -> i64 {
    ((now / window_secs) + 1) * window_secs
}
