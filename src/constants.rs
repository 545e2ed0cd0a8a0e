//! # System Constants
//!
//! Operational boundaries shared across the resilience and logging
//! components: timeout ranges, admission limits, and buffer sizing.

use std::time::Duration;

/// Bounds applied to every user-supplied timeout value.
pub mod timeouts {
    use super::Duration;

    /// Smallest accepted timeout for any component.
    pub const MIN_TIMEOUT: Duration = Duration::from_millis(100);
    /// Largest accepted timeout for any component.
    pub const MAX_TIMEOUT: Duration = Duration::from_millis(300_000);

    /// Default wait bound for a queued mutex acquisition.
    pub const DEFAULT_MUTEX_TIMEOUT: Duration = Duration::from_millis(30_000);
    /// Default bound on a single circuit-breaker-wrapped call.
    pub const DEFAULT_OPERATION_TIMEOUT: Duration = Duration::from_millis(10_000);
    /// Default wait in OPEN before a recovery attempt is allowed.
    pub const DEFAULT_RECOVERY_TIMEOUT: Duration = Duration::from_millis(5_000);
    /// Default bound on a worker round trip for one batch.
    pub const DEFAULT_WORKER_OPERATION_TIMEOUT: Duration = Duration::from_millis(30_000);
    /// Bound on the worker handshake self-test during initialization.
    pub const WORKER_TEST_TIMEOUT: Duration = Duration::from_millis(5_000);
    /// Bound on awaiting in-flight initialization during disposal.
    pub const DISPOSE_INIT_TIMEOUT: Duration = Duration::from_millis(5_000);
}

/// Sliding-window rate limiter bounds.
pub mod rate_limiter {
    use super::Duration;

    /// Hard cap on `max_requests`.
    pub const MAX_REQUESTS_LIMIT: u32 = 10_000;
    /// Smallest accepted sliding window.
    pub const MIN_TIME_WINDOW: Duration = Duration::from_millis(100);
    /// Largest accepted sliding window (one hour).
    pub const MAX_TIME_WINDOW: Duration = Duration::from_millis(3_600_000);
    /// Ceiling on the interval between cleanup passes.
    pub const MAX_CLEANUP_INTERVAL: Duration = Duration::from_millis(1_000);

    pub const DEFAULT_MAX_REQUESTS: u32 = 100;
    pub const DEFAULT_TIME_WINDOW: Duration = Duration::from_millis(1_000);
}

/// Log buffer sizing and flush cadence.
pub mod buffer {
    use super::Duration;

    pub const DEFAULT_MAX_SIZE: usize = 100;
    /// 1MB cap on a single formatted entry.
    pub const DEFAULT_MAX_ENTRY_SIZE: usize = 1024 * 1024;
    /// 50MB cap on the whole buffer.
    pub const DEFAULT_MAX_TOTAL_SIZE: usize = 50 * 1024 * 1024;
    /// Auto-flush cadence; constructor rejects anything under `MIN_FLUSH_INTERVAL`.
    pub const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_millis(5_000);
    pub const MIN_FLUSH_INTERVAL: Duration = Duration::from_millis(1_000);
    pub const DEFAULT_RETRY_ATTEMPTS: u32 = 3;
    pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_millis(1_000);
}

/// Worker manager limits and retry policy.
pub mod worker {
    use super::Duration;

    /// Hard cap on a serialized batch (10MB).
    pub const MAX_BATCH_BYTES: usize = 10 * 1024 * 1024;
    pub const DEFAULT_MAX_RETRIES: u32 = 3;
    pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_millis(1_000);
}

/// Logger input validation bounds.
pub mod logger {
    use super::Duration;

    /// Longest accepted log message, in characters.
    pub const MAX_MESSAGE_LENGTH: usize = 10_000;
    /// Deepest accepted context nesting.
    pub const MAX_CONTEXT_DEPTH: usize = 10;
    /// 1MB cap on serialized context.
    pub const MAX_CONTEXT_BYTES: usize = 1024 * 1024;

    pub const DEFAULT_BUFFER_SIZE: usize = 100;
    pub const DEFAULT_WORKER_TIMEOUT: Duration = Duration::from_millis(30_000);
    pub const DEFAULT_RETRY_ATTEMPTS: u32 = 3;
    /// Initialization retries before logging degrades to failure.
    pub const INIT_MAX_RETRIES: u32 = 3;
    /// Linear init backoff is capped at this delay.
    pub const INIT_BACKOFF_CAP: Duration = Duration::from_millis(5_000);
}

/// Cache quotas, retention windows, and retry policy.
pub mod cache {
    use super::Duration;

    pub const KEY_MIN_LENGTH: usize = 1;
    pub const KEY_MAX_LENGTH: usize = 128;
    /// 512KB cap per stored value.
    pub const MAX_VALUE_SIZE: usize = 512 * 1024;
    /// 5MB default total quota.
    pub const DEFAULT_TOTAL_QUOTA: usize = 5 * 1024 * 1024;
    /// Records older than this are retired regardless of use.
    pub const MAX_AGE: Duration = Duration::from_secs(7 * 24 * 60 * 60);
    /// Records unread for this long are retired.
    pub const UNUSED_AGE: Duration = Duration::from_secs(3 * 24 * 60 * 60);
    pub const CLEANUP_INTERVAL: Duration = Duration::from_secs(12 * 60 * 60);
    /// Eviction starts once usage crosses this fraction of the quota.
    pub const USAGE_THRESHOLD: f64 = 0.8;
    /// Records evicted per eviction batch.
    pub const EVICTION_BATCH_SIZE: usize = 50;
    /// Values at or above this size are compressed.
    pub const COMPRESSION_THRESHOLD: usize = 4 * 1024;
    pub const MAX_RETRY_ATTEMPTS: u32 = 3;
    pub const BASE_RETRY_DELAY: Duration = Duration::from_millis(100);
    pub const MAX_RETRY_DELAY: Duration = Duration::from_millis(1_000);
}
