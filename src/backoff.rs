// file: src/backoff.rs
// description: capped exponential reconnect backoff with bounded jitter

use crate::config::ReconnectConfig;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
    multiplier: f64,
    jitter: f64,
    max_attempts: Option<u32>,
    attempt: u32,
}

impl Backoff {
    pub fn new(config: &ReconnectConfig) -> Self {
        let multiplier = if config.multiplier.is_finite() {
            config.multiplier.max(1.0)
        } else {
            2.0
        };
        // Jitter above `multiplier - 1` could make a delay exceed the next one.
        let jitter = if config.jitter.is_finite() {
            config.jitter.clamp(0.0, multiplier - 1.0)
        } else {
            0.0
        };

        Self {
            initial: config.initial_delay,
            max: config.max_delay.max(config.initial_delay),
            multiplier,
            jitter,
            max_attempts: config.max_attempts,
            attempt: 0,
        }
    }

    /// Failed attempts since the last successful connection.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    /// Records a failed attempt (or a lost connection) and returns how long
    /// to wait before the next one.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.delay_for(self.attempt, fastrand::f64());
        self.attempt = self.attempt.saturating_add(1);
        delay
    }

    /// True once more than `max_attempts` consecutive failures were recorded.
    pub fn exhausted(&self) -> bool {
        self.max_attempts.is_some_and(|max| self.attempt > max)
    }

    /// Delay for the `index`-th consecutive failure with jitter sample `r`
    /// in `[0, 1)`.
    ///
    /// Jitter is added after the cap and the result clamped to `max`, so
    /// consecutive delays never decrease. The cost is that once the cap is
    /// reached every retry waits exactly `max`, with no spread between
    /// clients.
    pub fn delay_for(&self, index: u32, r: f64) -> Duration {
        let base = self.initial.as_secs_f64() * self.multiplier.powi(index.min(64) as i32);
        let capped = base.min(self.max.as_secs_f64());
        let jittered = capped * (1.0 + self.jitter * r.clamp(0.0, 1.0));
        Duration::from_secs_f64(jittered.min(self.max.as_secs_f64()))
    }
}
