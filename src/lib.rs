#![allow(clippy::doc_markdown)] // Allow technical terms like HalfOpen, zstd in docs
#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # Resilog
//!
//! Client-side resilience and structured logging toolkit.
//!
//! ## Overview
//!
//! Resilog packages the infrastructure an embedded client needs around
//! its outbound logging and flaky collaborators: a strictly-FIFO async
//! mutex, a sliding-window rate limiter, a three-state circuit breaker, a
//! managed background worker with correlated request/response processing,
//! a bounded batching log buffer, and the logger core that composes them
//! all behind one `log()` call. A quota-bounded cache with compression
//! and eviction rounds out the toolkit.
//!
//! ## Architecture
//!
//! A `log()` call flows through admission control and failure isolation
//! before anything is buffered:
//!
//! ```text
//! caller -> LoggerCore::log()
//!        -> RateLimiter::check_limit()
//!        -> CircuitBreaker::execute(critical section)
//!           -> validate / format -> LogBuffer::add()
//!        -> (on flush) WorkerManager::process_batch() -> worker
//! ```
//!
//! Every component owns its timers and background tasks, exposes a
//! monitoring snapshot, and has an explicit `dispose()` contract.
//!
//! ## Module Organization
//!
//! - [`sync`] - FIFO async mutex with per-waiter timeouts
//! - [`resilience`] - circuit breaker and sliding-window rate limiter
//! - [`worker`] - background worker transport and manager
//! - [`logger`] - log entries, buffer, metrics, and the logger core
//! - [`cache`] - quota-bounded cache with TTL retention and compression
//! - [`errors`] - structured error handling
//! - [`logging`] - opt-in `tracing` subscriber setup
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use resilog::logger::{LoggerCore, LoggerCoreConfig};
//! use resilog::logger::entry::{ContextValue, LogContext};
//!
//! # async fn example() -> resilog::Result<()> {
//! let logger = LoggerCore::new(LoggerCoreConfig::default())?;
//!
//! let mut context = LogContext::new();
//! context.insert("user_id".to_string(), ContextValue::from("u-123"));
//! logger.info("user logged in", context).await?;
//!
//! logger.flush().await?;
//! logger.dispose().await;
//! # Ok(())
//! # }
//! ```
//!
//! ## Concurrency Model
//!
//! All coordination happens on the tokio runtime. Invariants hold across
//! any interleaving of suspension points: the mutex grants strictly in
//! arrival order, the buffer preserves insertion order into each flushed
//! batch, and the worker manager correlates every response to its
//! operation regardless of completion order. Timers are tokio timers, so
//! the paused test clock drives every timing property deterministically.

pub mod cache;
pub mod constants;
pub mod errors;
pub mod logger;
pub mod logging;
pub mod resilience;
pub mod sync;
pub mod validation;
pub mod worker;

pub use cache::{Cache, CacheConfig, CacheStats};
pub use errors::{Error, ErrorKind, Result};
pub use logger::{
    ContextValue, LogBuffer, LogBufferConfig, LogContext, LogEntry, LogLevel, LoggerCore,
    LoggerCoreConfig, LoggerMetrics, LoggerMetricsSnapshot,
};
pub use logging::init_structured_logging;
pub use resilience::{
    CircuitBreaker, CircuitBreakerConfig, CircuitBreakerError, CircuitBreakerStats, CircuitState,
    RateLimiter, RateLimiterConfig, RateLimiterStats,
};
pub use sync::{Lock, Mutex, MutexConfig};
pub use worker::{
    BatchSink, InProcessTransport, TracingSink, WorkerManager, WorkerManagerConfig,
    WorkerTransport,
};
