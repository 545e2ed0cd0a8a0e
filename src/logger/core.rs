//! # Logger Core
//!
//! The single public logging surface. Each `log()` call runs the
//! pipeline: rate-limit admission, then the circuit-breaker-wrapped
//! critical section (await initialization, validate, format, buffer),
//! with flushed batches forwarded to the worker manager. The whole call
//! is raced against the worker timeout.

use crate::constants::logger::{
    DEFAULT_BUFFER_SIZE, DEFAULT_RETRY_ATTEMPTS, DEFAULT_WORKER_TIMEOUT, INIT_BACKOFF_CAP,
    INIT_MAX_RETRIES,
};
use crate::constants::timeouts::{DISPOSE_INIT_TIMEOUT, MAX_TIMEOUT};
use crate::errors::{Error, Result};
use crate::logger::buffer::{FlushHandler, LogBuffer, LogBufferConfig};
use crate::logger::entry::{
    validate_context, validate_message, LogContext, LogEntry, LogLevel,
};
use crate::logger::metrics::{LoggerMetrics, LoggerMetricsSnapshot};
use crate::resilience::{
    CircuitBreaker, CircuitBreakerConfig, CircuitBreakerStats, RateLimiter, RateLimiterConfig,
    RateLimiterStats,
};
use crate::validation::{validate_positive, validate_timeout_in};
use crate::worker::{InProcessTransport, WorkerManager, WorkerManagerConfig, WorkerTransport};
use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::FutureExt;
use parking_lot::Mutex as StateLock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// Options for a [`LoggerCore`].
#[derive(Debug, Clone)]
pub struct LoggerCoreConfig {
    /// Entry-count capacity of the log buffer.
    pub buffer_size: usize,
    /// Bound on the whole log pipeline per call, and on worker
    /// initialization. At least one second.
    pub worker_timeout: Duration,
    /// Retry attempts for worker dispatch and flush handlers. Zero means
    /// a single attempt with no retries.
    pub retry_attempts: u32,
    pub circuit_breaker: CircuitBreakerConfig,
    pub rate_limiter: RateLimiterConfig,
    pub buffer: LogBufferConfig,
    pub worker: WorkerManagerConfig,
}

impl Default for LoggerCoreConfig {
    fn default() -> Self {
        Self {
            buffer_size: DEFAULT_BUFFER_SIZE,
            worker_timeout: DEFAULT_WORKER_TIMEOUT,
            retry_attempts: DEFAULT_RETRY_ATTEMPTS,
            circuit_breaker: CircuitBreakerConfig::default(),
            rate_limiter: RateLimiterConfig::default(),
            buffer: LogBufferConfig::default(),
            worker: WorkerManagerConfig::default(),
        }
    }
}

impl LoggerCoreConfig {
    /// Validate configuration parameters
    pub fn validate(&self) -> Result<()> {
        validate_positive(self.buffer_size as u64, "options.buffer_size")?;
        validate_timeout_in(
            self.worker_timeout,
            "options.worker_timeout",
            Duration::from_millis(1_000),
            MAX_TIMEOUT,
        )?;
        // retry_attempts: any non-negative count is accepted.
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum InitStatus {
    Pending,
    Ready,
    Failed,
}

/// One formatted-but-unvalidated log request travelling through the
/// breaker-wrapped pipeline.
struct LogRequest {
    level: LogLevel,
    message: String,
    context: LogContext,
}

type PipelineOp = Box<dyn Fn(LogRequest) -> BoxFuture<'static, Result<()>> + Send + Sync>;

/// Forwards flushed batches to the worker manager.
struct WorkerFlushHandler {
    worker: Arc<WorkerManager>,
}

#[async_trait]
impl FlushHandler for WorkerFlushHandler {
    async fn on_batch(&self, batch: &[LogEntry]) -> Result<()> {
        self.worker.process_batch(batch).await.map(|_| ())
    }
}

struct LoggerInner {
    buffer: LogBuffer,
    worker: Arc<WorkerManager>,
    metrics: LoggerMetrics,
    init_rx: watch::Receiver<InitStatus>,
}

impl LoggerInner {
    async fn await_initialized(&self) -> Result<()> {
        let mut rx = self.init_rx.clone();
        loop {
            match *rx.borrow() {
                InitStatus::Ready => return Ok(()),
                InitStatus::Failed => return Err(Error::NotInitialized),
                InitStatus::Pending => {}
            }
            if rx.changed().await.is_err() {
                return Err(Error::NotInitialized);
            }
        }
    }

    /// The breaker-protected critical section: wait for initialization,
    /// validate, format, and buffer the entry.
    async fn critical_section(&self, request: LogRequest) -> Result<()> {
        self.await_initialized().await?;
        validate_message(&request.message)?;
        validate_context(&request.context)?;

        let entry = LogEntry::new(request.level, request.message, request.context);
        match self.buffer.add(entry).await {
            // Acceptable-loss condition: the caller's message is dropped,
            // the logger itself stays healthy.
            Err(Error::BufferFull) => {
                warn!("Log buffer full and flush failed, message dropped");
                Ok(())
            }
            other => other,
        }
    }
}

/// Structured logger composing rate limiting, circuit breaking,
/// buffering, and background batch processing.
///
/// ```rust,no_run
/// use resilog::logger::{LoggerCore, LoggerCoreConfig};
/// use resilog::logger::entry::LogContext;
///
/// # async fn example() -> resilog::Result<()> {
/// let logger = LoggerCore::new(LoggerCoreConfig::default())?;
/// logger.info("user logged in", LogContext::new()).await?;
/// logger.dispose().await;
/// # Ok(())
/// # }
/// ```
pub struct LoggerCore {
    inner: Arc<LoggerInner>,
    rate_limiter: RateLimiter,
    breaker: CircuitBreaker<PipelineOp>,
    worker_timeout: Duration,
    init_task: StateLock<Option<JoinHandle<()>>>,
    disposed: AtomicBool,
}

impl LoggerCore {
    /// Create a logger backed by the default in-process worker transport.
    pub fn new(config: LoggerCoreConfig) -> Result<Self> {
        Self::with_transport(config, Arc::new(InProcessTransport::default()))
    }

    /// Create a logger with an explicit worker transport. Initialization
    /// of the worker starts immediately in the background with bounded
    /// retry; if it never succeeds, logging degrades to failure.
    pub fn with_transport(
        config: LoggerCoreConfig,
        transport: Arc<dyn WorkerTransport>,
    ) -> Result<Self> {
        config.validate()?;

        let rate_limiter = RateLimiter::new(config.rate_limiter.clone())?;

        let attempts = config.retry_attempts.max(1);
        let buffer = LogBuffer::new(LogBufferConfig {
            max_size: config.buffer_size,
            retry_attempts: attempts,
            ..config.buffer.clone()
        })?;

        let worker = Arc::new(WorkerManager::new(
            transport,
            WorkerManagerConfig {
                max_retries: attempts,
                ..config.worker.clone()
            },
        ));

        let (init_tx, init_rx) = watch::channel(InitStatus::Pending);
        let inner = Arc::new(LoggerInner {
            buffer,
            worker: Arc::clone(&worker),
            metrics: LoggerMetrics::new(),
            init_rx,
        });

        let breaker = {
            let inner = Arc::clone(&inner);
            let operation: PipelineOp = Box::new(move |request: LogRequest| {
                let inner = Arc::clone(&inner);
                async move { inner.critical_section(request).await }.boxed()
            });
            CircuitBreaker::new(operation, config.circuit_breaker.clone())?
        };

        let init_task = Self::spawn_initialization(
            Arc::clone(&inner),
            init_tx,
            config.worker_timeout,
        );

        Ok(Self {
            inner,
            rate_limiter,
            breaker,
            worker_timeout: config.worker_timeout,
            init_task: StateLock::new(Some(init_task)),
            disposed: AtomicBool::new(false),
        })
    }

    /// Initialization with bounded retry and an overall timeout. On
    /// terminal failure the managers are cleaned up and the logger stays
    /// in the failed state.
    fn spawn_initialization(
        inner: Arc<LoggerInner>,
        init_tx: watch::Sender<InitStatus>,
        overall_timeout: Duration,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let attempt_loop = async {
                let mut attempt = 0u32;
                loop {
                    attempt += 1;
                    match inner.worker.initialize().await {
                        Ok(()) => return Ok(()),
                        Err(err) if attempt < INIT_MAX_RETRIES => {
                            warn!(
                                attempt,
                                error = %err,
                                "Worker initialization failed, retrying"
                            );
                            let backoff =
                                (Duration::from_millis(1_000) * attempt).min(INIT_BACKOFF_CAP);
                            tokio::time::sleep(backoff).await;
                        }
                        Err(err) => return Err(err),
                    }
                }
            };

            let outcome = match tokio::time::timeout(overall_timeout, attempt_loop).await {
                Ok(result) => result,
                Err(_) => Err(Error::InitializationTimeout),
            };

            match outcome {
                Ok(()) => {
                    // Wire flushed batches to the worker. The registration
                    // handle is intentionally dropped: the handler lives as
                    // long as the buffer.
                    let _ = inner.buffer.on_flush(Arc::new(WorkerFlushHandler {
                        worker: Arc::clone(&inner.worker),
                    }));
                    let _ = init_tx.send(InitStatus::Ready);
                    info!("Logger initialized");
                }
                Err(err) => {
                    error!(error = %err, "Logger initialization failed, cleaning up");
                    inner.worker.dispose().await;
                    inner.buffer.dispose().await;
                    let _ = init_tx.send(InitStatus::Failed);
                }
            }
        })
    }

    /// Log one message at `level`. The entire pipeline is bounded by the
    /// worker timeout; rate-limit rejections and validation failures
    /// surface without buffering anything.
    pub async fn log(
        &self,
        level: LogLevel,
        message: impl Into<String>,
        context: LogContext,
    ) -> Result<()> {
        if self.disposed.load(Ordering::Acquire) {
            return Err(Error::Disposed("LoggerCore"));
        }
        let request = LogRequest {
            level,
            message: message.into(),
            context,
        };
        match tokio::time::timeout(self.worker_timeout, self.inner_log(request)).await {
            Ok(result) => result,
            Err(_) => {
                self.inner.metrics.record_failure();
                Err(Error::LogOperationTimeout)
            }
        }
    }

    async fn inner_log(&self, request: LogRequest) -> Result<()> {
        self.rate_limiter.check_limit()?;

        let started = tokio::time::Instant::now();
        match self.breaker.execute(request).await {
            Ok(()) => {
                self.inner
                    .metrics
                    .track_log_entry(started.elapsed(), 0, 0)?;
                Ok(())
            }
            Err(err) => {
                self.inner.metrics.record_failure();
                Err(Error::from(err))
            }
        }
    }

    pub async fn debug(&self, message: impl Into<String>, context: LogContext) -> Result<()> {
        self.log(LogLevel::Debug, message, context).await
    }

    pub async fn info(&self, message: impl Into<String>, context: LogContext) -> Result<()> {
        self.log(LogLevel::Info, message, context).await
    }

    pub async fn warn(&self, message: impl Into<String>, context: LogContext) -> Result<()> {
        self.log(LogLevel::Warn, message, context).await
    }

    pub async fn error(&self, message: impl Into<String>, context: LogContext) -> Result<()> {
        self.log(LogLevel::Error, message, context).await
    }

    pub async fn fatal(&self, message: impl Into<String>, context: LogContext) -> Result<()> {
        self.log(LogLevel::Fatal, message, context).await
    }

    /// Deliver buffered entries now.
    pub async fn flush(&self) -> Result<()> {
        self.inner.buffer.flush().await
    }

    /// Await any in-flight initialization (bounded), flush, then tear
    /// down the worker manager, buffer, and the surrounding components.
    pub async fn dispose(&self) {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return;
        }

        let init_task = self.init_task.lock().take();
        if let Some(mut task) = init_task {
            tokio::select! {
                _ = &mut task => {}
                _ = tokio::time::sleep(DISPOSE_INIT_TIMEOUT) => {
                    warn!("Initialization did not settle before disposal, aborting it");
                    task.abort();
                }
            }
        }

        if let Err(err) = self.inner.buffer.flush().await {
            warn!(error = %err, "Flush during disposal failed");
        }
        self.inner.worker.dispose().await;
        self.inner.buffer.dispose().await;
        self.rate_limiter.dispose();
        self.breaker.dispose();
        self.inner.metrics.dispose();
        info!("Logger disposed");
    }

    /// Pipeline metrics snapshot.
    pub fn metrics(&self) -> Result<LoggerMetricsSnapshot> {
        self.inner.metrics.metrics()
    }

    /// Circuit breaker monitoring snapshot.
    pub fn circuit_breaker_stats(&self) -> CircuitBreakerStats {
        self.breaker.stats()
    }

    /// Rate limiter monitoring snapshot.
    pub fn rate_limiter_stats(&self) -> RateLimiterStats {
        self.rate_limiter.stats()
    }

    /// Entries currently buffered.
    pub fn buffered_entries(&self) -> usize {
        self.inner.buffer.len()
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }
}

impl std::fmt::Debug for LoggerCore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoggerCore")
            .field("buffered_entries", &self.buffered_entries())
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logger::entry::ContextValue;
    use crate::worker::{BatchSink, WorkerHandle, WorkerRequest, WorkerResponse};
    use tokio::sync::mpsc;

    /// Sink recording batches as message lists.
    struct RecordingSink {
        batches: StateLock<Vec<Vec<String>>>,
    }

    impl RecordingSink {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                batches: StateLock::new(Vec::new()),
            })
        }

        fn batches(&self) -> Vec<Vec<String>> {
            self.batches.lock().clone()
        }
    }

    #[async_trait]
    impl BatchSink for RecordingSink {
        async fn process(
            &self,
            batch: Vec<LogEntry>,
        ) -> std::result::Result<serde_json::Value, String> {
            let processed = batch.len();
            self.batches
                .lock()
                .push(batch.into_iter().map(|e| e.message).collect());
            Ok(serde_json::json!({ "processed": processed }))
        }
    }

    fn logger_with_sink(
        sink: Arc<RecordingSink>,
        configure: impl FnOnce(&mut LoggerCoreConfig),
    ) -> LoggerCore {
        let mut config = LoggerCoreConfig::default();
        configure(&mut config);
        LoggerCore::with_transport(config, Arc::new(InProcessTransport::new(sink))).unwrap()
    }

    fn nested_context(levels: usize) -> LogContext {
        let mut value = ContextValue::Map(LogContext::new());
        for _ in 1..levels {
            let mut map = LogContext::new();
            map.insert("inner".to_string(), value);
            value = ContextValue::Map(map);
        }
        let mut context = LogContext::new();
        context.insert("root".to_string(), value);
        context
    }

    #[tokio::test]
    async fn rejects_invalid_options() {
        assert!(LoggerCore::new(LoggerCoreConfig {
            buffer_size: 0,
            ..Default::default()
        })
        .is_err());
        assert!(LoggerCore::new(LoggerCoreConfig {
            worker_timeout: Duration::from_millis(999),
            ..Default::default()
        })
        .is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn buffer_size_two_flushes_on_third_entry() {
        let sink = RecordingSink::new();
        let logger = logger_with_sink(Arc::clone(&sink), |config| {
            config.buffer_size = 2;
        });

        logger.info("a", LogContext::new()).await.unwrap();
        logger.info("b", LogContext::new()).await.unwrap();
        assert!(sink.batches().is_empty());
        assert_eq!(logger.buffered_entries(), 2);

        logger.info("c", LogContext::new()).await.unwrap();
        assert_eq!(
            sink.batches(),
            vec![vec!["a".to_string(), "b".to_string()]]
        );
        assert_eq!(logger.buffered_entries(), 1);
        logger.dispose().await;
    }

    #[tokio::test(start_paused = true)]
    async fn validation_failures_do_not_buffer() {
        let sink = RecordingSink::new();
        let logger = logger_with_sink(Arc::clone(&sink), |_| {});

        let too_long = "x".repeat(10_001);
        assert!(matches!(
            logger.info(too_long, LogContext::new()).await,
            Err(Error::Validation(_))
        ));

        assert!(matches!(
            logger.info("deep", nested_context(11)).await,
            Err(Error::Validation(_))
        ));
        // Depth ten is within bounds.
        logger.info("ok", nested_context(10)).await.unwrap();

        assert_eq!(logger.buffered_entries(), 1);
        logger.dispose().await;
    }

    #[tokio::test(start_paused = true)]
    async fn textual_levels_go_through_from_str() {
        assert!("BOGUS".parse::<LogLevel>().is_err());
        let level: LogLevel = "WARN".parse().unwrap();
        assert_eq!(level, LogLevel::Warn);
    }

    #[tokio::test(start_paused = true)]
    async fn rate_limit_rejects_excess_calls() {
        let sink = RecordingSink::new();
        let logger = logger_with_sink(Arc::clone(&sink), |config| {
            config.rate_limiter = RateLimiterConfig {
                max_requests: 2,
                time_window: Duration::from_millis(1_000),
            };
        });

        logger.info("one", LogContext::new()).await.unwrap();
        logger.info("two", LogContext::new()).await.unwrap();
        assert!(matches!(
            logger.info("three", LogContext::new()).await,
            Err(Error::RateLimitExceeded)
        ));

        tokio::time::advance(Duration::from_millis(1_001)).await;
        logger.info("four", LogContext::new()).await.unwrap();
        logger.dispose().await;
    }

    #[tokio::test(start_paused = true)]
    async fn metrics_track_successes_and_failures() {
        let sink = RecordingSink::new();
        let logger = logger_with_sink(Arc::clone(&sink), |config| {
            config.rate_limiter = RateLimiterConfig {
                max_requests: 2,
                time_window: Duration::from_millis(1_000),
            };
        });

        logger.info("one", LogContext::new()).await.unwrap();
        logger.info("two", LogContext::new()).await.unwrap();
        let _ = logger.info("limited", LogContext::new()).await;

        let metrics = logger.metrics().unwrap();
        assert_eq!(metrics.total_logs, 2);
        // Rate-limit rejections happen before the measured pipeline.
        assert_eq!(metrics.failed_logs, 0);
        logger.dispose().await;
    }

    #[tokio::test(start_paused = true)]
    async fn failed_initialization_degrades_logging() {
        struct DeadTransport;

        #[async_trait]
        impl crate::worker::WorkerTransport for DeadTransport {
            async fn spawn(&self) -> Result<WorkerHandle> {
                let (request_tx, _request_rx) = mpsc::channel::<WorkerRequest>(1);
                let (_response_tx, response_rx) = mpsc::channel::<WorkerResponse>(1);
                // No worker task: the handshake can never be acknowledged.
                Ok(WorkerHandle {
                    requests: request_tx,
                    responses: response_rx,
                    task: None,
                })
            }
        }

        let config = LoggerCoreConfig {
            worker_timeout: Duration::from_millis(60_000),
            ..Default::default()
        };
        let logger = LoggerCore::with_transport(config, Arc::new(DeadTransport)).unwrap();

        let err = logger.info("lost", LogContext::new()).await.unwrap_err();
        assert!(matches!(err, Error::NotInitialized));
        assert!(logger.metrics().unwrap().failed_logs >= 1);
        logger.dispose().await;
    }

    #[tokio::test(start_paused = true)]
    async fn dispose_rejects_further_logging() {
        let sink = RecordingSink::new();
        let logger = logger_with_sink(Arc::clone(&sink), |_| {});

        logger.info("before", LogContext::new()).await.unwrap();
        logger.dispose().await;
        logger.dispose().await; // idempotent

        assert!(matches!(
            logger.info("after", LogContext::new()).await,
            Err(Error::Disposed("LoggerCore"))
        ));
        // The in-flight entry was flushed on disposal.
        assert_eq!(sink.batches(), vec![vec!["before".to_string()]]);
    }
}
