//! # Jitter policy for retry delays.
//!
//! [`JitterPolicy`] adds randomness to retry delays to prevent thundering
//! herd effects when many messages retry simultaneously.
//!
//! - [`JitterPolicy::None`] no randomization, predictable delays
//! - [`JitterPolicy::Full`] random delay in [0, delay] (most aggressive)
//! - [`JitterPolicy::Equal`] delay/2 + random[0, delay/2] (balanced)

use rand::Rng;
use std::time::Duration;

/// Policy controlling randomization of retry delays.
///
/// Every variant keeps a fixed fraction of the computed delay and
/// randomizes the remainder uniformly.
///
/// ## Trade-offs
/// - **None**: Predictable, but risks thundering herd
/// - **Full**: Maximum randomness, aggressive load spreading
/// - **Equal**: Balanced (recommended for most use cases)
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum JitterPolicy {
    /// No jitter: use the exact computed delay.
    ///
    /// Use when:
    /// - Only one message retrying (no herd risk)
    /// - Predictable timing required
    /// - Testing/debugging
    #[default]
    None,

    /// Full jitter: random delay in [0, delay].
    ///
    /// Most aggressive jitter, can significantly reduce the delay.
    /// Use when maximum load spreading is needed.
    Full,

    /// Equal jitter: delay/2 + random[0, delay/2].
    ///
    /// Balances predictability with randomness.
    /// Preserves ~75% of the original delay on average.
    Equal,
}

impl JitterPolicy {
    /// Applies jitter to the given delay.
    pub fn apply(&self, delay: Duration) -> Duration {
        let keep = match self {
            JitterPolicy::None => return delay,
            JitterPolicy::Full => 0.0,
            JitterPolicy::Equal => 0.5,
        };
        jittered(delay, keep)
    }
}

/// Keeps `keep` (in [0, 1]) of `delay` and randomizes the rest uniformly,
/// so the result lands in [delay × keep, delay].
fn jittered(delay: Duration, keep: f64) -> Duration {
    if delay.is_zero() {
        return Duration::ZERO;
    }
    let fixed = delay.mul_f64(keep);
    let spread = delay.saturating_sub(fixed);
    if spread.is_zero() {
        return fixed;
    }
    let roll: f64 = rand::rng().random_range(0.0..=1.0);
    fixed + spread.mul_f64(roll)
}
