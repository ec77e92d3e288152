use std::time::Duration;

/// Capped exponential backoff between retries of a failing operation.
#[derive(Debug, Clone)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
    failures: u32,
}

impl Backoff {
    /// Creates a new backoff starting at `initial` and doubling up to `max`.
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self { initial, max: max.max(initial), failures: 0 }
    }

    /// Records a failure and returns how long to wait before the next attempt.
    pub fn next_delay(&mut self) -> Duration {
        // cap the exponent so the multiplication cannot overflow
        let exponent = self.failures.min(16);
        self.failures = self.failures.saturating_add(1);
        self.initial.saturating_mul(2_u32.saturating_pow(exponent)).min(self.max)
    }

    /// Number of consecutive failures since the last reset.
    pub fn failures(&self) -> u32 {
        self.failures
    }

    /// Resets after a success.
    pub fn reset(&mut self) {
        self.failures = 0;
    }
}
