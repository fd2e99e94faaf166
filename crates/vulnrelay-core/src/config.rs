//! Service configuration

use std::time::Duration;

/// Delivery service configuration
///
/// Defaults are the intervals the queue was tuned with in production:
/// breathe 15s after a backend outage, 5s before re-examining a head item
/// that was not ready, poll an empty queue every 3s, and give up on an item
/// after 12 hours.
#[derive(Debug, Clone)]
pub struct DeliveryConfig {
    /// Breathing delay before requeueing after a transient backend failure
    pub retry_backoff: Duration,
    /// Delay after requeueing a not-yet-ready item, so the worker does not
    /// busy-loop on the head of the queue
    pub skip_interval: Duration,
    /// Poll interval while the queue is empty or the service is paused
    pub idle_poll: Duration,
    /// Queue timeout applied to requests that do not carry their own
    pub default_timeout: Duration,
}

impl DeliveryConfig {
    /// Create default configuration
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// With retry backoff
    #[inline]
    #[must_use]
    pub fn with_retry_backoff(mut self, backoff: Duration) -> Self {
        self.retry_backoff = backoff;
        self
    }

    /// With skip interval
    #[inline]
    #[must_use]
    pub fn with_skip_interval(mut self, interval: Duration) -> Self {
        self.skip_interval = interval;
        self
    }

    /// With idle poll interval
    #[inline]
    #[must_use]
    pub fn with_idle_poll(mut self, interval: Duration) -> Self {
        self.idle_poll = interval;
        self
    }

    /// With default item timeout
    #[inline]
    #[must_use]
    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            retry_backoff: Duration::from_secs(15),
            skip_interval: Duration::from_secs(5),
            idle_poll: Duration::from_secs(3),
            default_timeout: Duration::from_secs(12 * 60 * 60),
        }
    }
}
