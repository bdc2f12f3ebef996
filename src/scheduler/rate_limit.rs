//! Launch service rate-limit state.
//!
//! Every 429 from the launch service is recorded here: the wall-clock time of
//! the last hit plus an exponential backoff deadline. The dispatcher only
//! consults the deadline when `respect_launch_rate_limit` is enabled;
//! otherwise this is a record other policy can read.

use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};

/// Shared launch rate-limit state.
#[derive(Debug, Default)]
pub struct LaunchRateLimit {
    /// Wall-clock time of the most recent 429.
    pub last_429_at: Option<DateTime<Utc>>,
    /// When launching may resume (None = no active limit).
    pub backoff_until: Option<Instant>,
    /// Number of consecutive rate limit hits.
    pub consecutive_hits: u32,
    /// Lifetime count of 429 responses.
    pub total_hits: u64,
}

impl LaunchRateLimit {
    pub fn new() -> Self {
        Self::default()
    }

    /// Check if a backoff deadline is still in the future.
    pub fn is_rate_limited(&self) -> bool {
        self.backoff_until.map(|until| Instant::now() < until).unwrap_or(false)
    }

    /// Get remaining backoff duration if rate limited.
    pub fn remaining_backoff(&self) -> Option<Duration> {
        self.backoff_until.and_then(|until| {
            let now = Instant::now();
            if now < until { Some(until - now) } else { None }
        })
    }

    /// Record a 429.
    ///
    /// The backoff is the larger of the server's `retry-after` and
    /// 2^consecutive_hits seconds (capped at 64s).
    pub fn record_rate_limit(&mut self, retry_after: Option<Duration>) {
        self.consecutive_hits += 1;
        self.total_hits += 1;
        self.last_429_at = Some(Utc::now());

        let exp_backoff = Duration::from_secs(2u64.pow(self.consecutive_hits.min(6)));
        let delay = retry_after.unwrap_or_default().max(exp_backoff);
        self.backoff_until = Some(Instant::now() + delay);

        tracing::warn!(
            retry_after_secs = delay.as_secs(),
            consecutive_hits = self.consecutive_hits,
            "Launch service rate limited"
        );
    }

    /// Record a successful launch; clears the backoff but keeps `last_429_at`.
    pub fn record_success(&mut self) {
        self.consecutive_hits = 0;
        self.backoff_until = None;
    }
}
