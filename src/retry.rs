//! Fixed-delay retry policy

use crate::traits::{Clock, Watchdog};

/// Longest stretch we sleep without feeding the watchdog
const FEED_SLICE_MS: u64 = 1_000;

/// How many attempts a retry loop may make
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Attempts {
    Unbounded,
    Limited(u32),
}

/// Retry with a fixed pause between attempts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub delay_ms: u64,
    pub attempts: Attempts,
}

impl RetryPolicy {
    /// Keep trying, waiting `delay_ms` between attempts
    pub const fn forever(delay_ms: u64) -> Self {
        Self {
            delay_ms,
            attempts: Attempts::Unbounded,
        }
    }

    /// Give up after `attempts` failures
    pub const fn limited(delay_ms: u64, attempts: u32) -> Self {
        Self {
            delay_ms,
            attempts: Attempts::Limited(attempts),
        }
    }

    /// Whether another attempt is allowed after `failures` failed ones
    pub fn should_retry(&self, failures: u32) -> bool {
        match self.attempts {
            Attempts::Unbounded => true,
            Attempts::Limited(max) => failures < max,
        }
    }
}

/// Wait `ms` milliseconds while keeping the watchdog fed
pub async fn pause<C: Clock, W: Watchdog>(clock: &mut C, watchdog: &mut W, ms: u64) {
    let mut remaining = ms;
    loop {
        watchdog.feed();
        if remaining == 0 {
            break;
        }
        let slice = remaining.min(FEED_SLICE_MS);
        clock.delay_ms(slice).await;
        remaining -= slice;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use embassy_futures::block_on;

    struct Recorder {
        slept: Vec<u64>,
    }

    impl Clock for Recorder {
        fn now_ms(&self) -> u64 {
            self.slept.iter().sum()
        }

        async fn delay_ms(&mut self, ms: u64) {
            self.slept.push(ms);
        }

        async fn idle(&mut self) {}
    }

    struct Feeds(u32);

    impl Watchdog for Feeds {
        fn feed(&mut self) {
            self.0 += 1;
        }
    }

    #[test]
    fn unbounded_never_gives_up() {
        let policy = RetryPolicy::forever(5_000);
        assert!(policy.should_retry(0));
        assert!(policy.should_retry(u32::MAX));
    }

    #[test]
    fn limited_stops_at_budget() {
        let policy = RetryPolicy::limited(10, 3);
        assert!(policy.should_retry(2));
        assert!(!policy.should_retry(3));
    }

    #[test]
    fn pause_feeds_between_slices() {
        let mut clock = Recorder { slept: Vec::new() };
        let mut watchdog = Feeds(0);
        block_on(pause(&mut clock, &mut watchdog, 2_500));
        assert_eq!(clock.slept, vec![1_000, 1_000, 500]);
        assert_eq!(clock.now_ms(), 2_500);
        assert_eq!(watchdog.0, 4);
    }
}
