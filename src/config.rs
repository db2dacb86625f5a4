//! Configuration for change-feed processing and cross-partition queries.

use std::time::Duration;

/// Options for the per-partition change-feed processor and lease plumbing.
#[derive(Debug, Clone)]
pub struct ProcessorOptions {
    /// Maximum documents per change-feed page.
    pub page_size: usize,

    /// Delay between polls when the feed has no new changes.
    pub poll_interval: Duration,

    /// Interval between lease renewals.
    pub renew_interval: Duration,

    /// Maximum random jitter added to each renewal interval so a fleet of
    /// hosts does not renew in lockstep.
    pub renew_jitter: Duration,

    /// Fallback backoff when the service throttles without a hint.
    pub throttle_backoff: Duration,
}

impl Default for ProcessorOptions {
    fn default() -> Self {
        Self {
            page_size: 100,
            poll_interval: Duration::from_secs(5),
            renew_interval: Duration::from_secs(17),
            renew_jitter: Duration::from_secs(2),
            throttle_backoff: Duration::from_millis(500),
        }
    }
}

impl ProcessorOptions {
    /// Set the change-feed page size.
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size;
        self
    }

    /// Set the idle poll interval.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Set the lease renewal interval.
    pub fn with_renew_interval(mut self, interval: Duration) -> Self {
        self.renew_interval = interval;
        self
    }

    /// Set the renewal jitter bound.
    pub fn with_renew_jitter(mut self, jitter: Duration) -> Self {
        self.renew_jitter = jitter;
        self
    }

    /// Set the fallback throttle backoff.
    pub fn with_throttle_backoff(mut self, backoff: Duration) -> Self {
        self.throttle_backoff = backoff;
        self
    }
}

/// Options for cross-partition query enumeration.
#[derive(Debug, Clone)]
pub struct QueryOptions {
    /// Maximum documents per per-range page.
    pub page_size: usize,

    /// Whether per-range enumerators prefetch one page ahead while the
    /// caller consumes the current one.
    pub buffered: bool,
}

impl Default for QueryOptions {
    fn default() -> Self {
        Self {
            page_size: 100,
            buffered: true,
        }
    }
}

impl QueryOptions {
    /// Set the per-range page size.
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size;
        self
    }

    /// Enable or disable single-page read-ahead.
    pub fn with_buffering(mut self, buffered: bool) -> Self {
        self.buffered = buffered;
        self
    }
}
