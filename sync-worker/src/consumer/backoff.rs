use std::time::Duration;

/// Bounds of the exponential backoff applied after failed poll cycles
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffConfig {
    /// Delay after the first failure
    pub initial: Duration,
    /// Upper bound on any delay
    pub max: Duration,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial: Duration::from_millis(100),
            max: Duration::from_millis(30_000),
        }
    }
}

/// Doubling delay, capped at [`BackoffConfig::max`], reset after a success
#[derive(Debug)]
pub struct Backoff {
    config: BackoffConfig,
    next: Duration,
}

impl Backoff {
    #[must_use]
    pub fn new(config: BackoffConfig) -> Self {
        Self {
            next: config.initial.min(config.max),
            config,
        }
    }

    /// Returns the delay to wait now and doubles the following one
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.next;
        self.next = self.next.saturating_mul(2).min(self.config.max);
        delay
    }

    pub fn reset(&mut self) {
        self.next = self.config.initial.min(self.config.max);
    }
}
