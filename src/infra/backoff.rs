//! Exponential backoff schedule for sync delivery retries
//!
//! The drain loop owns its retry loop (it has to interleave connectivity and
//! shutdown checks), so this module only provides the delay schedule:
//! exponential growth from a base delay up to a cap, with optional jitter to
//! spread a fleet of devices reconnecting at once.

use std::time::Duration;

use rand::Rng;

/// Backoff schedule configuration
#[derive(Debug, Clone)]
pub struct BackoffPolicy {
    /// Delay before the first retry
    pub base: Duration,
    /// Growth factor per consecutive failure (e.g. 2.0 = double each time)
    pub factor: f64,
    /// Ceiling the delay never exceeds
    pub cap: Duration,
    /// Jitter factor (0.0-1.0); 0.0 keeps the schedule exact
    pub jitter: f64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(1),
            factor: 2.0,
            cap: Duration::from_secs(60),
            jitter: 0.0,
        }
    }
}

impl BackoffPolicy {
    /// Set the base delay
    pub fn with_base(mut self, base: Duration) -> Self {
        self.base = base;
        self
    }

    /// Set the growth factor
    pub fn with_factor(mut self, factor: f64) -> Self {
        self.factor = factor;
        self
    }

    /// Set the delay ceiling
    pub fn with_cap(mut self, cap: Duration) -> Self {
        self.cap = cap;
        self
    }

    /// Set the jitter factor
    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter.clamp(0.0, 1.0);
        self
    }

    /// Delay before retry `attempt` (0-indexed: attempt 0 waits `base`).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let raw = self.base.as_secs_f64() * self.factor.powi(attempt.min(63) as i32);
        let capped = raw.min(self.cap.as_secs_f64());

        let delayed = if self.jitter > 0.0 {
            let spread = capped * self.jitter;
            let mut rng = rand::thread_rng();
            (capped + rng.gen_range(-spread..=spread)).max(0.0)
        } else {
            capped
        };

        Duration::from_secs_f64(delayed)
    }
}

// ============================================================================
// Tests
// ============================================================================
