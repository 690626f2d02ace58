//! Coarse seconds-granularity clock for expiry checks.
//!
//! Expiry comparisons happen on every lookup and insertion, so they must not
//! cost a syscall. The clock caches unix seconds in an atomic that each
//! worker refreshes once per event-loop iteration.

use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// Shared coarse clock. Created once at startup and threaded through the
/// components that need it.
#[derive(Debug)]
pub struct CoarseClock {
    secs: AtomicU32,
}

impl CoarseClock {
    pub fn new() -> Self {
        let clock = Self {
            secs: AtomicU32::new(0),
        };
        clock.refresh();
        clock
    }

    /// Update the cached time. Monotonic: never moves backward even if the
    /// wall clock does.
    pub fn refresh(&self) {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs() as u32)
            .unwrap_or(0);
        self.secs.fetch_max(now, Ordering::Relaxed);
    }

    /// Current unix time in seconds, as of the last refresh.
    #[inline]
    pub fn now(&self) -> u32 {
        self.secs.load(Ordering::Relaxed)
    }
}

impl Default for CoarseClock {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_now_is_populated_at_creation() {
        let clock = CoarseClock::new();
        // Any date after 2020 is good enough to prove initialization happened.
        assert!(clock.now() > 1_577_836_800);
    }

    #[test]
    fn test_refresh_never_goes_backward() {
        let clock = CoarseClock::new();
        let before = clock.now();
        clock.refresh();
        assert!(clock.now() >= before);
    }
}
