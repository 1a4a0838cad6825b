use chrono::Utc;
use std::sync::atomic::{AtomicI64, Ordering};

/// Hands out write epochs: wall-clock nanoseconds, nudged forward so that
/// every token from one clock is strictly greater than the previous one.
#[derive(Debug)]
pub struct EpochClock {
    last: AtomicI64,
}

impl EpochClock {
    pub fn new() -> Self {
        Self {
            last: AtomicI64::new(0),
        }
    }

    pub fn next(&self) -> i64 {
        let physical = Utc::now().timestamp_nanos_opt().unwrap_or(i64::MAX);
        let mut prev = self.last.load(Ordering::SeqCst);
        loop {
            let candidate = physical.max(prev.saturating_add(1));
            match self
                .last
                .compare_exchange(prev, candidate, Ordering::SeqCst, Ordering::SeqCst)
            {
                Ok(_) => return candidate,
                Err(actual) => prev = actual,
            }
        }
    }

    /// The next epoch in its stored string form.
    pub fn next_token(&self) -> String {
        self.next().to_string()
    }
}

impl Default for EpochClock {
    fn default() -> Self {
        Self::new()
    }
}
