//! # Default retry-delay policy.
//!
//! [`RetryPolicy`] computes the wait before a failed message's next
//! attempt from the number of attempts already made:
//! `delay(retried) = min(first × factor^retried, max)`, then jitter.
//!
//! It backs the processor's default retry-delay function; a user-supplied
//! [`RetryDelayFn`](crate::handler::RetryDelayFn) overrides it.
//!
//! # Example
//! ```
//! use std::time::Duration;
//! use relayq::{JitterPolicy, RetryPolicy};
//!
//! let policy = RetryPolicy {
//!     first: Duration::from_secs(1),
//!     max: Duration::from_secs(8),
//!     factor: 2.0,
//!     jitter: JitterPolicy::None,
//! };
//!
//! // First failure retries after `first`.
//! assert_eq!(policy.delay(0), Duration::from_secs(1));
//! // Growth is multiplicative per attempt.
//! assert_eq!(policy.delay(2), Duration::from_secs(4));
//! // And capped at `max`.
//! assert_eq!(policy.delay(10), Duration::from_secs(8));
//! ```

use std::time::Duration;

use crate::policies::jitter::JitterPolicy;

/// Retry delay policy with capped multiplicative growth.
#[derive(Clone, Copy, Debug)]
pub struct RetryPolicy {
    /// Delay before the first retry.
    pub first: Duration,
    /// Maximum delay cap.
    pub max: Duration,
    /// Multiplicative growth factor per attempt (`>= 1.0` recommended).
    pub factor: f64,
    /// Jitter policy to prevent thundering herd.
    pub jitter: JitterPolicy,
}

impl Default for RetryPolicy {
    /// Returns a policy with:
    /// - `first = 1s`;
    /// - `max = 10min`;
    /// - `factor = 2.0`;
    /// - `jitter = Equal`.
    fn default() -> Self {
        Self {
            first: Duration::from_secs(1),
            max: Duration::from_secs(600),
            factor: 2.0,
            jitter: JitterPolicy::Equal,
        }
    }
}

impl RetryPolicy {
    /// Computes the delay before attempt `retried + 1`.
    ///
    /// `retried` is the number of attempts already made, so the first
    /// failure (retried = 0) waits `first`.
    pub fn delay(&self, retried: u32) -> Duration {
        let grown = self.first.as_secs_f64() * self.factor.powi(retried.min(i32::MAX as u32) as i32);
        let base = if !grown.is_finite() || grown >= self.max.as_secs_f64() {
            self.max
        } else {
            Duration::from_secs_f64(grown)
        };
        self.jitter.apply(base)
    }
}
