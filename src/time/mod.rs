//! Logical Time
//!
//! A Lamport-style clock shared by all subsystems of a peer. Every message
//! carries the sender's current time and every receiver merges it, which
//! gives the coarse happens-before ordering the conflict checks rely on.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

/// A sample of a peer's logical clock. `LogicalTime(0)` is the "never"
/// sentinel: real samples start at 1.
#[derive(
    Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash,
)]
#[serde(transparent)]
pub struct LogicalTime(pub u64);

impl LogicalTime {
    pub fn is_valid(&self) -> bool {
        self.0 != 0
    }
}

impl std::fmt::Display for LogicalTime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The per-peer monotone counter behind [`LogicalTime`].
#[derive(Debug, Default)]
pub struct LogicalClock {
    counter: AtomicU64,
}

impl LogicalClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Advances the clock and returns the new value.
    pub fn sample(&self) -> LogicalTime {
        LogicalTime(self.counter.fetch_add(1, Ordering::SeqCst) + 1)
    }

    /// Reads the clock without advancing it.
    pub fn current(&self) -> LogicalTime {
        LogicalTime(self.counter.load(Ordering::SeqCst))
    }

    /// Sets the clock to `max(local, received) + 1`. Called once per
    /// received envelope and once per received reply.
    pub fn merge(&self, received: LogicalTime) -> LogicalTime {
        let mut local = self.counter.load(Ordering::SeqCst);
        loop {
            let merged = local.max(received.0) + 1;
            match self.counter.compare_exchange(
                local,
                merged,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => return LogicalTime(merged),
                Err(actual) => local = actual,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sample_is_strictly_monotone() {
        let clock = LogicalClock::new();
        let mut previous = clock.sample();
        for _ in 0..1000 {
            let next = clock.sample();
            assert!(previous < next);
            previous = next;
        }
    }

    #[test]
    fn merge_advances_past_both_clocks() {
        let clock = LogicalClock::new();
        clock.sample();
        let merged = clock.merge(LogicalTime(40));
        assert_eq!(merged, LogicalTime(41));
        // A remote time in the past still advances the local clock.
        let merged = clock.merge(LogicalTime(3));
        assert_eq!(merged, LogicalTime(42));
    }

    #[test]
    fn default_time_is_invalid() {
        assert!(!LogicalTime::default().is_valid());
        let clock = LogicalClock::new();
        assert!(clock.sample().is_valid());
    }
}
