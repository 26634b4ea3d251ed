//! Exponential backoff for polling loops

use std::time::Duration;

/// Exponential backoff with jitter between poll attempts
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    /// Delay returned by the next call
    current: Duration,
    /// Maximum delay
    max: Duration,
    /// Multiplier
    multiplier: f64,
    /// Jitter factor (0.0 to 1.0)
    jitter: f64,
}

impl ExponentialBackoff {
    pub fn new(initial: Duration, max: Duration, multiplier: f64, jitter: f64) -> Self {
        Self {
            current: initial,
            max,
            multiplier,
            jitter: jitter.clamp(0.0, 1.0),
        }
    }

    /// Backoff used by readiness probes: 50ms doubling up to 500ms
    pub fn probe() -> Self {
        Self::new(Duration::from_millis(50), Duration::from_millis(500), 2.0, 0.1)
    }

    /// Backoff used while waiting for a tunnel URL: 100ms doubling up to 1s
    pub fn tunnel_poll() -> Self {
        Self::new(Duration::from_millis(100), Duration::from_secs(1), 2.0, 0.2)
    }

    /// Get the next delay and advance the backoff
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;

        let next = Duration::from_secs_f64(self.current.as_secs_f64() * self.multiplier);
        self.current = std::cmp::min(next, self.max);

        let jitter_amount = delay.as_secs_f64() * self.jitter * rand::random::<f64>();
        delay + Duration::from_secs_f64(jitter_amount)
    }

    /// Next delay, but never past `remaining`
    pub fn next_delay_within(&mut self, remaining: Duration) -> Duration {
        std::cmp::min(self.next_delay(), remaining)
    }
}
