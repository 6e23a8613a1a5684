//! Business logic layer (hardware-independent)

/// Elapsed-time gate for the sample-publish cycle
///
/// Fires when strictly more than `delay_ms` has passed since the last time it
/// fired. The first reference point is boot (t = 0).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cadence {
    delay_ms: u64,
    last_ms: u64,
}

impl Cadence {
    pub fn new(delay_ms: u64) -> Self {
        Self {
            delay_ms,
            last_ms: 0,
        }
    }

    /// Check the gate at `now_ms`, arming the next period when it fires
    pub fn poll(&mut self, now_ms: u64) -> bool {
        if now_ms.saturating_sub(self.last_ms) > self.delay_ms {
            self.last_ms = now_ms;
            true
        } else {
            false
        }
    }

    /// Time of the last fire
    pub fn last_ms(&self) -> u64 {
        self.last_ms
    }

    pub fn delay_ms(&self) -> u64 {
        self.delay_ms
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn does_not_fire_at_exact_delay() {
        let mut cadence = Cadence::new(1_000);
        assert!(!cadence.poll(1_000));
        assert!(cadence.poll(1_001));
        assert_eq!(cadence.last_ms(), 1_001);
    }

    #[test]
    fn fires_once_per_crossing() {
        let mut cadence = Cadence::new(1_000);
        assert!(cadence.poll(1_500));
        assert!(!cadence.poll(1_500));
        assert!(!cadence.poll(2_500));
        assert!(cadence.poll(2_501));
    }

    #[test]
    fn large_jump_fires_single_cycle() {
        let mut cadence = Cadence::new(1_000);
        assert!(cadence.poll(10_000));
        assert!(!cadence.poll(10_999));
        assert!(!cadence.poll(11_000));
        assert!(cadence.poll(11_001));
    }

    #[test]
    fn arbitrary_increments_fire_iff_delay_exceeded() {
        let steps = [3u64, 250, 1, 999, 400, 17, 1_200, 0, 5, 640, 333, 2, 1_001];
        let mut cadence = Cadence::new(1_000);
        let mut now = 0;
        let mut last = 0;
        for step in steps.iter().cycle().take(200) {
            now += step;
            let expected = now - last > 1_000;
            assert_eq!(cadence.poll(now), expected, "at {}", now);
            if expected {
                last = now;
            }
        }
    }
}
