//! Restart delay policy for watchers that stopped on their own.
//!
//! The delay for restart `n` (0-indexed) is `first × factor^n`, clamped to `max`.

use std::time::Duration;

/// Exponential backoff between watcher restarts
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BackoffPolicy {
    /// Delay before the first restart
    pub first: Duration,
    /// Upper bound for any delay
    pub max: Duration,
    /// Growth factor per consecutive restart
    pub factor: f64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            first: Duration::from_secs(1),
            max: Duration::from_secs(60),
            factor: 2.0,
        }
    }
}

impl BackoffPolicy {
    /// Delay before restart number `attempt` (0-indexed)
    pub fn next(&self, attempt: u32) -> Duration {
        let exp = attempt.min(i32::MAX as u32) as i32;
        let secs = self.first.as_secs_f64() * self.factor.powi(exp);

        if !secs.is_finite() || secs < 0.0 || secs > self.max.as_secs_f64() {
            self.max
        } else {
            Duration::from_secs_f64(secs)
        }
    }
}
