//! # Sliding-Window Rate Limiter
//!
//! Admission control over a sliding time window. Accepted-request
//! timestamps are kept in arrival order; a background task prunes entries
//! that have slid out of the window so an idle limiter does not hold
//! memory for requests long past.

use crate::constants::rate_limiter::{
    DEFAULT_MAX_REQUESTS, DEFAULT_TIME_WINDOW, MAX_CLEANUP_INTERVAL, MAX_REQUESTS_LIMIT,
    MAX_TIME_WINDOW, MIN_TIME_WINDOW,
};
use crate::errors::{Error, Result};
use crate::validation::{validate_positive, validate_timeout_in};
use parking_lot::Mutex as StateLock;
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::debug;

/// Options for a [`RateLimiter`].
#[derive(Debug, Clone)]
pub struct RateLimiterConfig {
    /// Requests admitted per sliding window. Positive, at most 10,000.
    pub max_requests: u32,
    /// Window length. Between 100ms and one hour.
    pub time_window: Duration,
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self {
            max_requests: DEFAULT_MAX_REQUESTS,
            time_window: DEFAULT_TIME_WINDOW,
        }
    }
}

struct Inner {
    window: StateLock<VecDeque<Instant>>,
    disposed: AtomicBool,
    max_requests: u32,
    time_window: Duration,
}

impl Inner {
    /// Drops timestamps older than `now - time_window`. The sequence is
    /// non-decreasing, so pruning only touches the front.
    fn prune(&self) {
        let Some(cutoff) = Instant::now().checked_sub(self.time_window) else {
            return;
        };
        let mut window = self.window.lock();
        while window.front().is_some_and(|t| *t <= cutoff) {
            window.pop_front();
        }
    }

    fn check_disposed(&self) -> Result<()> {
        if self.disposed.load(Ordering::Acquire) {
            Err(Error::Disposed("RateLimiter"))
        } else {
            Ok(())
        }
    }
}

/// Sliding-window request admission control.
pub struct RateLimiter {
    inner: Arc<Inner>,
    cleanup_task: StateLock<Option<JoinHandle<()>>>,
}

impl RateLimiter {
    /// Create a limiter and start its periodic cleanup task.
    pub fn new(config: RateLimiterConfig) -> Result<Self> {
        validate_positive(u64::from(config.max_requests), "options.max_requests")?;
        if config.max_requests > MAX_REQUESTS_LIMIT {
            return Err(Error::Validation(format!(
                "options.max_requests cannot exceed {MAX_REQUESTS_LIMIT}"
            )));
        }
        validate_timeout_in(
            config.time_window,
            "options.time_window",
            MIN_TIME_WINDOW,
            MAX_TIME_WINDOW,
        )?;

        let inner = Arc::new(Inner {
            window: StateLock::new(VecDeque::new()),
            disposed: AtomicBool::new(false),
            max_requests: config.max_requests,
            time_window: config.time_window,
        });

        let cleanup = {
            let inner = Arc::clone(&inner);
            let period = config.time_window.min(MAX_CLEANUP_INTERVAL);
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(period);
                ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
                loop {
                    ticker.tick().await;
                    inner.prune();
                }
            })
        };

        Ok(Self {
            inner,
            cleanup_task: StateLock::new(Some(cleanup)),
        })
    }

    /// Admit one request or fail with a rate-limit-exceeded capacity
    /// error. Records the acceptance timestamp on success.
    pub fn check_limit(&self) -> Result<()> {
        self.inner.check_disposed()?;
        self.inner.prune();

        let mut window = self.inner.window.lock();
        if window.len() >= self.inner.max_requests as usize {
            debug!(
                current = window.len(),
                max = self.inner.max_requests,
                "Rate limit exceeded"
            );
            return Err(Error::RateLimitExceeded);
        }
        window.push_back(Instant::now());
        Ok(())
    }

    /// Non-failing admission check: prunes, re-checks, and returns whether
    /// the request was admitted. Fails only when disposed.
    pub fn try_acquire(&self) -> Result<bool> {
        self.inner.check_disposed()?;
        self.inner.prune();

        let mut window = self.inner.window.lock();
        if window.len() >= self.inner.max_requests as usize {
            return Ok(false);
        }
        window.push_back(Instant::now());
        Ok(true)
    }

    /// Stop the cleanup task and clear state. Idempotent; any subsequent
    /// admission call fails with a disposed error.
    pub fn dispose(&self) {
        self.inner.disposed.store(true, Ordering::Release);
        if let Some(task) = self.cleanup_task.lock().take() {
            task.abort();
        }
        self.inner.window.lock().clear();
    }

    /// Current occupancy and configuration, for monitoring only.
    pub fn stats(&self) -> RateLimiterStats {
        RateLimiterStats {
            current_requests: self.inner.window.lock().len(),
            max_requests: self.inner.max_requests,
            time_window_ms: self.inner.time_window.as_millis() as u64,
            is_disposed: self.inner.disposed.load(Ordering::Acquire),
        }
    }
}

impl Drop for RateLimiter {
    fn drop(&mut self) {
        if let Some(task) = self.cleanup_task.lock().take() {
            task.abort();
        }
    }
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let stats = self.stats();
        f.debug_struct("RateLimiter")
            .field("current_requests", &stats.current_requests)
            .field("max_requests", &stats.max_requests)
            .field("disposed", &stats.is_disposed)
            .finish()
    }
}

/// Monitoring snapshot returned by [`RateLimiter::stats`].
#[derive(Debug, Clone, Serialize)]
pub struct RateLimiterStats {
    pub current_requests: usize,
    pub max_requests: u32,
    pub time_window_ms: u64,
    pub is_disposed: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limiter(max_requests: u32, window_ms: u64) -> RateLimiter {
        RateLimiter::new(RateLimiterConfig {
            max_requests,
            time_window: Duration::from_millis(window_ms),
        })
        .unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn admits_up_to_capacity_then_rejects() {
        let limiter = limiter(2, 1000);
        assert!(limiter.try_acquire().unwrap());
        assert!(limiter.try_acquire().unwrap());
        assert!(!limiter.try_acquire().unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn window_slides_and_readmits() {
        let limiter = limiter(2, 1000);
        assert!(limiter.try_acquire().unwrap());
        assert!(limiter.try_acquire().unwrap());
        assert!(!limiter.try_acquire().unwrap());

        tokio::time::advance(Duration::from_millis(1001)).await;
        assert!(limiter.try_acquire().unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn check_limit_fails_with_capacity_error() {
        let limiter = limiter(1, 1000);
        limiter.check_limit().unwrap();
        assert!(matches!(
            limiter.check_limit(),
            Err(Error::RateLimitExceeded)
        ));
    }

    #[tokio::test]
    async fn construction_bounds() {
        assert!(RateLimiter::new(RateLimiterConfig {
            max_requests: 0,
            ..Default::default()
        })
        .is_err());
        assert!(RateLimiter::new(RateLimiterConfig {
            max_requests: 10_001,
            ..Default::default()
        })
        .is_err());
        assert!(RateLimiter::new(RateLimiterConfig {
            time_window: Duration::from_millis(99),
            ..Default::default()
        })
        .is_err());
        assert!(RateLimiter::new(RateLimiterConfig {
            time_window: Duration::from_millis(3_600_001),
            ..Default::default()
        })
        .is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn dispose_stops_admissions() {
        let limiter = limiter(5, 1000);
        limiter.check_limit().unwrap();
        limiter.dispose();
        limiter.dispose(); // idempotent

        assert!(matches!(
            limiter.check_limit(),
            Err(Error::Disposed("RateLimiter"))
        ));
        assert!(matches!(
            limiter.try_acquire(),
            Err(Error::Disposed("RateLimiter"))
        ));
        assert!(limiter.stats().is_disposed);
        assert_eq!(limiter.stats().current_requests, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn background_cleanup_prunes_idle_window() {
        let limiter = limiter(2, 1000);
        assert!(limiter.try_acquire().unwrap());
        assert!(limiter.try_acquire().unwrap());
        assert_eq!(limiter.stats().current_requests, 2);

        // No admission calls; the cleanup task alone must prune.
        tokio::time::sleep(Duration::from_millis(2100)).await;
        assert_eq!(limiter.stats().current_requests, 0);
    }
}
