//! Injectable time source.
//!
//! Freshness and rate-window math never reads the system clock directly;
//! components hold an `Arc<dyn Clock>` so tests can pin and advance time.

use std::sync::Mutex;
use std::time::Duration;

use crate::UtcDateTime;

/// Supplies the current instant.
pub trait Clock: Send + Sync {
    fn now(&self) -> UtcDateTime;
}

/// Wall clock backed by the operating system.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> UtcDateTime {
        UtcDateTime::now()
    }
}

/// Manually driven clock for deterministic tests and replays.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<UtcDateTime>,
}

impl ManualClock {
    pub fn new(start: UtcDateTime) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    pub fn set(&self, instant: UtcDateTime) {
        let mut now = self.now.lock().expect("manual clock lock is not poisoned");
        *now = instant;
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().expect("manual clock lock is not poisoned");
        *now = now.saturating_add(by);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> UtcDateTime {
        *self.now.lock().expect("manual clock lock is not poisoned")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manual_clock_advances_and_resets() {
        let start = UtcDateTime::parse("2024-01-01T00:00:00Z").expect("valid");
        let clock = ManualClock::new(start);

        clock.advance(Duration::from_secs(61));
        assert_eq!(clock.now().format_rfc3339(), "2024-01-01T00:01:01Z");

        clock.set(start);
        assert_eq!(clock.now(), start);
    }
}
