//! Exponential backoff: `delay = base × 2^attempt`, capped at `max`.

use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    pub base: Duration,
    pub max: Duration,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(1),
            max: Duration::from_secs(300),
        }
    }
}

impl Backoff {
    pub fn new(base: Duration, max: Duration) -> Self {
        Self { base, max }
    }

    /// Delay before attempt number `attempt` (0-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = 2u32.checked_pow(attempt);
        factor
            .and_then(|f| self.base.checked_mul(f))
            .map_or(self.max, |d| d.min(self.max))
    }

    /// Delay before re-delivering a message that has now failed
    /// `retry_count` times (`retry_count >= 1`): `base × 2^(retry_count − 1)`.
    pub fn delay_for_retry(&self, retry_count: u32) -> Duration {
        self.delay(retry_count.saturating_sub(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_doubles_per_attempt() {
        let backoff = Backoff::new(Duration::from_millis(1000), Duration::from_secs(60));
        assert_eq!(backoff.delay(0), Duration::from_millis(1000));
        assert_eq!(backoff.delay(1), Duration::from_millis(2000));
        assert_eq!(backoff.delay(3), Duration::from_millis(8000));
    }

    #[test]
    fn test_capped() {
        let backoff = Backoff::new(Duration::from_secs(1), Duration::from_secs(5));
        assert_eq!(backoff.delay(10), Duration::from_secs(5));
        // 2^40 overflows u32, still capped rather than panicking
        assert_eq!(backoff.delay(40), Duration::from_secs(5));
    }

    #[test]
    fn test_retry_delay_starts_at_base() {
        let backoff = Backoff::new(Duration::from_millis(1000), Duration::from_secs(300));
        assert_eq!(backoff.delay_for_retry(1), Duration::from_millis(1000));
        assert_eq!(backoff.delay_for_retry(2), Duration::from_millis(2000));
        assert_eq!(backoff.delay_for_retry(3), Duration::from_millis(4000));
    }
}
