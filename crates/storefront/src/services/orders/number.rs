//! Customer-facing order numbers.
//!
//! Numbers are `ORD` followed by the creation time in Unix milliseconds.
//! Within one process they are strictly increasing: a second order in the
//! same millisecond (or after a clock step backwards) takes the next free
//! millisecond instead of colliding.

use std::sync::atomic::{AtomicI64, Ordering};

const PREFIX: &str = "ORD";

/// Monotonic, time-derived order number issuer.
///
/// Owned by the order pipeline; one instance per app.
#[derive(Debug)]
pub struct OrderNumberGenerator {
    last: AtomicI64,
}

impl OrderNumberGenerator {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            last: AtomicI64::new(0),
        }
    }

    /// Issue a number for the current time.
    #[must_use]
    pub fn issue(&self) -> String {
        self.issue_at(chrono::Utc::now().timestamp_millis())
    }

    /// Issue a number for `now_millis`, bumped past the last one issued.
    #[must_use]
    pub fn issue_at(&self, now_millis: i64) -> String {
        let mut current = self.last.load(Ordering::Relaxed);
        loop {
            let candidate = now_millis.max(current + 1);
            match self.last.compare_exchange_weak(
                current,
                candidate,
                Ordering::AcqRel,
                Ordering::Relaxed,
            ) {
                Ok(_) => return format!("{PREFIX}{candidate}"),
                Err(actual) => current = actual,
            }
        }
    }
}

impl Default for OrderNumberGenerator {
    fn default() -> Self {
        Self::new()
    }
}
