//! Injectable wall-clock.
//!
//! Staleness and timestamps go through this port so tests can advance
//! time by hand. Sleeping and deadlines use `tokio::time`, which the
//! test harness pauses separately.

use std::sync::RwLock;
use std::sync::Arc;

use time::{Duration, OffsetDateTime};

pub trait Clock: Send + Sync {
    fn now(&self) -> OffsetDateTime;
}

/// Real wall-clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> OffsetDateTime {
        OffsetDateTime::now_utc()
    }
}

/// Hand-advanced clock for deterministic tests.
#[derive(Debug)]
pub struct ManualClock {
    now: RwLock<OffsetDateTime>,
}

impl ManualClock {
    pub fn new(start: OffsetDateTime) -> Arc<Self> {
        Arc::new(Self {
            now: RwLock::new(start),
        })
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.write().expect("manual clock lock");
        *now += by;
    }

    pub fn set(&self, to: OffsetDateTime) {
        let mut now = self.now.write().expect("manual clock lock");
        *now = to;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> OffsetDateTime {
        *self.now.read().expect("manual clock lock")
    }
}

#[cfg(test)]
mod tests {
    use time::macros::datetime;

    use super::*;

    #[test]
    fn manual_clock_advances() {
        let start = datetime!(2025-06-01 12:00 UTC);
        let clock = ManualClock::new(start);
        assert_eq!(clock.now(), start);

        clock.advance(Duration::seconds(45));
        assert_eq!(clock.now(), start + Duration::seconds(45));

        clock.set(start);
        assert_eq!(clock.now(), start);
    }
}
