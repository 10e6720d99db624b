//! # Reconnect Backoff
//!
//! Exponential backoff between connection attempts: the first delay is the
//! base interval, each further failure doubles it, and the cap is never
//! exceeded. A successful authentication resets the sequence.

use std::time::Duration;

/// Exponential backoff policy with a cap
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Backoff {
    base: Duration,
    max: Duration,
    current: Option<Duration>,
}

impl Backoff {
    /// Create a policy doubling from `base` up to `max`
    ///
    /// A `max` below `base` is raised to `base`.
    ///
    /// # Examples
    ///
    /// ```
    /// use ble_ws_forwarder::connection::backoff::Backoff;
    /// use std::time::Duration;
    ///
    /// let mut backoff = Backoff::new(Duration::from_secs(1), Duration::from_secs(5));
    /// assert_eq!(backoff.next_delay(), Duration::from_secs(1));
    /// assert_eq!(backoff.next_delay(), Duration::from_secs(2));
    /// assert_eq!(backoff.next_delay(), Duration::from_secs(4));
    /// assert_eq!(backoff.next_delay(), Duration::from_secs(5));
    /// ```
    #[must_use]
    pub fn new(base: Duration, max: Duration) -> Self {
        Self {
            base,
            max: max.max(base),
            current: None,
        }
    }

    /// Delay to wait before the next attempt; advances the sequence
    pub fn next_delay(&mut self) -> Duration {
        let delay = match self.current {
            None => self.base,
            Some(prev) => prev.saturating_mul(2).min(self.max),
        };
        self.current = Some(delay);
        delay
    }

    /// Restart from the base delay
    pub fn reset(&mut self) {
        self.current = None;
    }

    pub fn base_delay(&self) -> Duration {
        self.base
    }

    pub fn max_delay(&self) -> Duration {
        self.max
    }
}
