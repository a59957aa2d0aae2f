//! # Exponential Backoff
//!
//! Per-key exponential backoff used by the work queue's rate limiter.
//!
//! Each failure doubles the delay, starting from a base and capped at a
//! maximum: `base * 2^failures`. A successful reconcile forgets the key,
//! resetting its sequence.
//!
//! ## Usage
//!
//! ```rust
//! use clustersecret_controller::controller::backoff::ExponentialBackoff;
//! use std::time::Duration;
//!
//! let mut backoff = ExponentialBackoff::new(Duration::from_millis(5), Duration::from_secs(1));
//! assert_eq!(backoff.next_backoff(), Duration::from_millis(5));
//! assert_eq!(backoff.next_backoff(), Duration::from_millis(10));
//! assert_eq!(backoff.next_backoff(), Duration::from_millis(20));
//! ```

use std::collections::HashMap;
use std::hash::Hash;
use std::time::Duration;

/// Exponential backoff calculator
///
/// Generates `base, 2*base, 4*base, ...` capped at `max`.
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    base: Duration,
    max: Duration,
    /// Number of delays handed out since the last reset
    failures: u32,
}

impl ExponentialBackoff {
    /// Create a new backoff starting at `base` and never exceeding `max`
    #[must_use]
    pub fn new(base: Duration, max: Duration) -> Self {
        Self {
            base,
            max,
            failures: 0,
        }
    }

    /// Get the next delay and advance the sequence
    ///
    /// # Example
    ///
    /// ```
    /// use clustersecret_controller::controller::backoff::ExponentialBackoff;
    /// use std::time::Duration;
    ///
    /// let mut backoff = ExponentialBackoff::new(Duration::from_secs(1), Duration::from_secs(3));
    /// assert_eq!(backoff.next_backoff(), Duration::from_secs(1));
    /// assert_eq!(backoff.next_backoff(), Duration::from_secs(2));
    /// assert_eq!(backoff.next_backoff(), Duration::from_secs(3));
    /// ```
    pub fn next_backoff(&mut self) -> Duration {
        // 2^31 * base overflows any sensible max long before the exponent does
        let exponent = self.failures.min(31);
        self.failures = self.failures.saturating_add(1);

        self.base
            .checked_mul(1_u32 << exponent)
            .map_or(self.max, |delay| delay.min(self.max))
    }

    /// Number of delays handed out since the last reset
    #[must_use]
    pub fn failures(&self) -> u32 {
        self.failures
    }

    /// Reset the backoff to the initial state
    pub fn reset(&mut self) {
        self.failures = 0;
    }
}

/// Independent exponential backoff per key
///
/// Keys that never failed (or were forgotten) hold no state.
#[derive(Debug)]
pub struct ItemBackoff<T> {
    base: Duration,
    max: Duration,
    items: HashMap<T, ExponentialBackoff>,
}

impl<T: Eq + Hash + Clone> ItemBackoff<T> {
    #[must_use]
    pub fn new(base: Duration, max: Duration) -> Self {
        Self {
            base,
            max,
            items: HashMap::new(),
        }
    }

    /// Delay before `item` may be retried, advancing its sequence
    pub fn when(&mut self, item: &T) -> Duration {
        let (base, max) = (self.base, self.max);
        self.items
            .entry(item.clone())
            .or_insert_with(|| ExponentialBackoff::new(base, max))
            .next_backoff()
    }

    /// Number of times `item` has been rate limited since it was last forgotten
    #[must_use]
    pub fn retries(&self, item: &T) -> u32 {
        self.items.get(item).map_or(0, ExponentialBackoff::failures)
    }

    /// Drop all backoff state for `item`
    pub fn forget(&mut self, item: &T) {
        self.items.remove(item);
    }
}
