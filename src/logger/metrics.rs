//! # Logger Metrics
//!
//! Aggregate counters for the logging pipeline: totals, failures, a
//! running average of processing latency, and the compression ratio of
//! entries that went through compression. Observability only; nothing
//! here drives control flow.

use crate::errors::{Error, Result};
use chrono::{DateTime, Utc};
use parking_lot::Mutex as StateLock;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

/// Aggregates are reset once the total approaches this bound.
const OVERFLOW_GUARD: u64 = u64::MAX - 1_000;

/// Periodic self-check interval for the overflow guard.
const CLEANUP_INTERVAL: Duration = Duration::from_secs(3_600);

#[derive(Debug)]
struct Aggregates {
    total_logs: u64,
    avg_processing_time_ms: f64,
    compression_ratio: f64,
    last_cleanup: DateTime<Utc>,
}

impl Aggregates {
    fn reset(&mut self) {
        self.total_logs = 0;
        self.avg_processing_time_ms = 0.0;
        self.compression_ratio = 0.0;
        self.last_cleanup = Utc::now();
    }
}

/// Pipeline metrics, safe to update from concurrent log calls.
pub struct LoggerMetrics {
    aggregates: StateLock<Aggregates>,
    failed_logs: AtomicU64,
    disposed: AtomicBool,
}

impl LoggerMetrics {
    pub fn new() -> Self {
        Self {
            aggregates: StateLock::new(Aggregates {
                total_logs: 0,
                avg_processing_time_ms: 0.0,
                compression_ratio: 0.0,
                last_cleanup: Utc::now(),
            }),
            failed_logs: AtomicU64::new(0),
            disposed: AtomicBool::new(false),
        }
    }

    /// Record one successful pipeline execution. `size`/`compressed_size`
    /// describe the entry before and after compression; pass zeros when
    /// compression was not involved.
    pub fn track_log_entry(
        &self,
        processing_time: Duration,
        size: usize,
        compressed_size: usize,
    ) -> Result<()> {
        if self.disposed.load(Ordering::Acquire) {
            return Err(Error::Disposed("LoggerMetrics"));
        }
        if compressed_size > size {
            return Err(Error::Validation(
                "compressed size cannot be larger than original size".to_string(),
            ));
        }

        let mut aggregates = self.aggregates.lock();
        if aggregates.total_logs >= OVERFLOW_GUARD {
            aggregates.reset();
        }

        aggregates.total_logs += 1;
        let elapsed_ms = processing_time.as_secs_f64() * 1_000.0;
        let previous_total =
            aggregates.avg_processing_time_ms * (aggregates.total_logs - 1) as f64;
        aggregates.avg_processing_time_ms =
            (previous_total + elapsed_ms) / aggregates.total_logs as f64;

        if size > 0 {
            aggregates.compression_ratio = (size - compressed_size) as f64 / size as f64;
        }

        self.cleanup_if_needed(&mut aggregates);
        Ok(())
    }

    /// Count one failed pipeline execution.
    pub fn record_failure(&self) {
        self.failed_logs.fetch_add(1, Ordering::Relaxed);
    }

    fn cleanup_if_needed(&self, aggregates: &mut Aggregates) {
        let now = Utc::now();
        let elapsed = now - aggregates.last_cleanup;
        if elapsed.num_seconds() >= CLEANUP_INTERVAL.as_secs() as i64 {
            aggregates.last_cleanup = now;
            if aggregates.total_logs >= OVERFLOW_GUARD {
                aggregates.reset();
            }
        }
    }

    /// Point-in-time snapshot.
    pub fn metrics(&self) -> Result<LoggerMetricsSnapshot> {
        if self.disposed.load(Ordering::Acquire) {
            return Err(Error::Disposed("LoggerMetrics"));
        }
        let aggregates = self.aggregates.lock();
        Ok(LoggerMetricsSnapshot {
            total_logs: aggregates.total_logs,
            failed_logs: self.failed_logs.load(Ordering::Relaxed),
            avg_processing_time_ms: aggregates.avg_processing_time_ms,
            compression_ratio: aggregates.compression_ratio,
            last_cleanup: aggregates.last_cleanup,
        })
    }

    pub fn dispose(&self) {
        self.disposed.store(true, Ordering::Release);
    }
}

impl Default for LoggerMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for LoggerMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoggerMetrics")
            .field("failed_logs", &self.failed_logs.load(Ordering::Relaxed))
            .field("disposed", &self.disposed.load(Ordering::Acquire))
            .finish()
    }
}

/// Snapshot returned by [`LoggerMetrics::metrics`].
#[derive(Debug, Clone, Serialize)]
pub struct LoggerMetricsSnapshot {
    pub total_logs: u64,
    pub failed_logs: u64,
    pub avg_processing_time_ms: f64,
    pub compression_ratio: f64,
    pub last_cleanup: DateTime<Utc>,
}
