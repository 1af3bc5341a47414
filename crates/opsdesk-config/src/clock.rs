use std::sync::atomic::{AtomicI64, Ordering};

use chrono::Utc;

/// Writer-side source of logical timestamps.
///
/// Wall-clock milliseconds, bumped so that every value handed out by one
/// clock is strictly greater than the previous one.
#[derive(Debug, Default)]
pub struct LogicalClock {
    last: AtomicI64,
}

impl LogicalClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Never returns a value at or below `floor`; used when an existing
    /// generation carries a timestamp ahead of this machine's clock.
    pub fn next_after(&self, floor: i64) -> i64 {
        let now = Utc::now().timestamp_millis().max(floor.saturating_add(1));
        let mut prev = self.last.load(Ordering::SeqCst);
        loop {
            let candidate = now.max(prev.saturating_add(1));
            match self
                .last
                .compare_exchange(prev, candidate, Ordering::SeqCst, Ordering::SeqCst)
            {
                Ok(_) => return candidate,
                Err(actual) => prev = actual,
            }
        }
    }

    pub fn next(&self) -> i64 {
        self.next_after(i64::MIN + 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strictly_increasing() {
        let clock = LogicalClock::new();
        let a = clock.next();
        let b = clock.next();
        let c = clock.next();
        assert!(a < b && b < c);
    }

    #[test]
    fn respects_floor_from_future_generation() {
        let clock = LogicalClock::new();
        let future = Utc::now().timestamp_millis() + 60_000;
        assert!(clock.next_after(future) > future);
        assert!(clock.next() > future);
    }

    #[test]
    fn saturates_instead_of_overflowing() {
        let clock = LogicalClock::new();
        assert_eq!(clock.next_after(i64::MAX), i64::MAX);
        assert_eq!(clock.next(), i64::MAX);
    }
}
