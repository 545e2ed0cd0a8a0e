//! # Log Buffer
//!
//! Bounded, size-aware batching queue for formatted log entries. Entries
//! accumulate until a flush is triggered by count, by the auto-flush
//! timer, or explicitly; every registered flush handler then receives the
//! whole batch in insertion order. Handler failure rolls the batch back to
//! the front of the buffer.
//!
//! Every external mutation (`add`, `flush`) is serialized through the
//! buffer's dedicated FIFO mutex, so two logical operations never
//! interleave their buffer mutations even across suspension points.

use crate::constants::buffer::{
    DEFAULT_FLUSH_INTERVAL, DEFAULT_MAX_ENTRY_SIZE, DEFAULT_MAX_SIZE, DEFAULT_MAX_TOTAL_SIZE,
    DEFAULT_RETRY_ATTEMPTS, DEFAULT_RETRY_DELAY, MIN_FLUSH_INTERVAL,
};
use crate::errors::{Error, Result};
use crate::logger::entry::LogEntry;
use crate::sync::{Mutex, MutexConfig};
use crate::validation::{validate_ordered, validate_positive};
use async_trait::async_trait;
use parking_lot::Mutex as StateLock;
use std::collections::VecDeque;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Options for a [`LogBuffer`].
#[derive(Debug, Clone)]
pub struct LogBufferConfig {
    /// Entry-count limit; reaching it triggers an immediate flush.
    pub max_size: usize,
    /// Auto-flush cadence. At least one second.
    pub flush_interval: Duration,
    /// Attempts per flush handler before it counts as failed.
    pub retry_attempts: u32,
    /// Base of the linear backoff between handler retries.
    pub retry_delay: Duration,
    /// Byte cap on a single entry.
    pub max_entry_size: usize,
    /// Byte cap on the whole buffer; older entries are evicted to fit.
    pub max_total_size: usize,
    /// Wait bound for the buffer's internal mutex.
    pub mutex_timeout: Duration,
}

impl Default for LogBufferConfig {
    fn default() -> Self {
        Self {
            max_size: DEFAULT_MAX_SIZE,
            flush_interval: DEFAULT_FLUSH_INTERVAL,
            retry_attempts: DEFAULT_RETRY_ATTEMPTS,
            retry_delay: DEFAULT_RETRY_DELAY,
            max_entry_size: DEFAULT_MAX_ENTRY_SIZE,
            max_total_size: DEFAULT_MAX_TOTAL_SIZE,
            mutex_timeout: Duration::from_millis(5_000),
        }
    }
}

impl LogBufferConfig {
    /// Validate configuration parameters
    pub fn validate(&self) -> Result<()> {
        validate_positive(self.max_size as u64, "options.max_size")?;
        validate_positive(self.max_entry_size as u64, "options.max_entry_size")?;
        validate_ordered(
            self.max_total_size,
            "options.max_total_size",
            self.max_entry_size,
            "options.max_entry_size",
        )?;
        validate_positive(u64::from(self.retry_attempts), "options.retry_attempts")?;
        if self.flush_interval < MIN_FLUSH_INTERVAL {
            return Err(Error::Validation(format!(
                "options.flush_interval must be at least {}ms",
                MIN_FLUSH_INTERVAL.as_millis()
            )));
        }
        Ok(())
    }
}

/// Consumer of flushed batches. Handlers must be idempotent-safe: a
/// failing handler is retried with the same batch.
#[async_trait]
pub trait FlushHandler: Send + Sync + 'static {
    async fn on_batch(&self, batch: &[LogEntry]) -> Result<()>;
}

struct FnHandler<F> {
    f: F,
}

#[async_trait]
impl<F, Fut> FlushHandler for FnHandler<F>
where
    F: Fn(Vec<LogEntry>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<()>> + Send,
{
    async fn on_batch(&self, batch: &[LogEntry]) -> Result<()> {
        (self.f)(batch.to_vec()).await
    }
}

/// Handle returned by [`LogBuffer::on_flush`]; consumes itself to remove
/// the handler.
pub struct FlushRegistration {
    id: u64,
    inner: Weak<Inner>,
}

impl FlushRegistration {
    pub fn unregister(self) {
        if let Some(inner) = self.inner.upgrade() {
            inner.handlers.lock().retain(|(id, _)| *id != self.id);
        }
    }
}

struct StoredEntry {
    entry: LogEntry,
    size: usize,
}

struct BufferState {
    entries: VecDeque<StoredEntry>,
    total_size: usize,
}

struct Inner {
    config: LogBufferConfig,
    mutex: Mutex,
    state: StateLock<BufferState>,
    handlers: StateLock<Vec<(u64, Arc<dyn FlushHandler>)>>,
    next_handler_id: AtomicU64,
    flush_timer: StateLock<Option<JoinHandle<()>>>,
    disposed: AtomicBool,
}

impl Inner {
    fn clear_flush_timer(&self) {
        if let Some(timer) = self.flush_timer.lock().take() {
            timer.abort();
        }
    }

    /// Arms the auto-flush timer if the buffer is non-empty and no timer
    /// is already pending.
    fn schedule_flush(inner: &Arc<Inner>) {
        let mut timer = inner.flush_timer.lock();
        if timer.is_some() || inner.state.lock().entries.is_empty() {
            return;
        }
        let inner = Arc::clone(inner);
        *timer = Some(tokio::spawn(async move {
            tokio::time::sleep(inner.config.flush_interval).await;
            // Drop our own handle first so the flush below does not abort
            // the very task performing it.
            let _ = inner.flush_timer.lock().take();
            if let Err(err) = inner.flush().await {
                warn!(error = %err, "Scheduled flush failed");
            }
        }));
    }

    async fn add(inner: &Arc<Inner>, entry: LogEntry) -> Result<()> {
        if inner.disposed.load(Ordering::Acquire) {
            return Err(Error::Disposed("LogBuffer"));
        }
        let lock = inner.mutex.acquire_as("add").await?;
        let result = Inner::add_locked(inner, entry).await;
        lock.release()?;
        result
    }

    async fn add_locked(inner: &Arc<Inner>, entry: LogEntry) -> Result<()> {
        let size = entry.serialized_size();
        if size > inner.config.max_entry_size {
            return Err(Error::EntryTooLarge {
                size,
                max_total: inner.config.max_entry_size,
            });
        }

        // Evict oldest-first until the new entry fits under the byte cap.
        {
            let mut state = inner.state.lock();
            while state.total_size + size > inner.config.max_total_size
                && !state.entries.is_empty()
            {
                if let Some(oldest) = state.entries.pop_front() {
                    state.total_size -= oldest.size;
                    debug!(
                        evicted_size = oldest.size,
                        total_size = state.total_size,
                        "Evicted oldest buffered entry"
                    );
                }
            }
            if state.total_size + size > inner.config.max_total_size {
                return Err(Error::EntryTooLarge {
                    size,
                    max_total: inner.config.max_total_size,
                });
            }
        }

        // At the count limit the buffer flushes before accepting more; if
        // that does not free capacity the entry is dropped by the caller.
        if inner.state.lock().entries.len() >= inner.config.max_size {
            let flushed = inner.flush_locked().await;
            if flushed.is_err() || inner.state.lock().entries.len() >= inner.config.max_size {
                return Err(Error::BufferFull);
            }
        }

        {
            let mut state = inner.state.lock();
            state.entries.push_back(StoredEntry { entry, size });
            state.total_size += size;
        }
        Inner::schedule_flush(inner);
        Ok(())
    }

    async fn flush(&self) -> Result<()> {
        if self.disposed.load(Ordering::Acquire) {
            return Err(Error::Disposed("LogBuffer"));
        }
        let lock = self.mutex.acquire_as("flush").await?;
        let result = self.flush_locked().await;
        lock.release()?;
        result
    }

    async fn flush_locked(&self) -> Result<()> {
        self.clear_flush_timer();

        let batch = {
            let mut state = self.state.lock();
            if state.entries.is_empty() {
                return Ok(());
            }
            state.total_size = 0;
            state.entries.drain(..).collect::<Vec<_>>()
        };
        let entries: Vec<LogEntry> = batch.iter().map(|stored| stored.entry.clone()).collect();

        let handlers: Vec<Arc<dyn FlushHandler>> = self
            .handlers
            .lock()
            .iter()
            .map(|(_, handler)| Arc::clone(handler))
            .collect();

        // Every handler receives the same batch, concurrently.
        let outcomes = futures::future::join_all(
            handlers
                .iter()
                .map(|handler| self.run_handler_with_retry(handler, &entries)),
        )
        .await;

        if let Some(err) = outcomes.into_iter().find_map(|outcome| outcome.err()) {
            // Roll the batch back to the front, original order first.
            let mut state = self.state.lock();
            for stored in batch.into_iter().rev() {
                state.total_size += stored.size;
                state.entries.push_front(stored);
            }
            warn!(
                restored = state.entries.len(),
                error = %err,
                "Flush failed, batch restored to buffer"
            );
            return Err(err);
        }

        debug!(flushed = entries.len(), "Buffer flushed");
        Ok(())
    }

    async fn run_handler_with_retry(
        &self,
        handler: &Arc<dyn FlushHandler>,
        batch: &[LogEntry],
    ) -> Result<()> {
        let attempts = self.config.retry_attempts.max(1);
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match handler.on_batch(batch).await {
                Ok(()) => return Ok(()),
                Err(err) if attempt < attempts => {
                    debug!(attempt, error = %err, "Flush handler failed, retrying");
                    tokio::time::sleep(self.config.retry_delay * attempt).await;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

/// Bounded batching queue delivering entries to registered flush
/// handlers.
pub struct LogBuffer {
    inner: Arc<Inner>,
}

impl LogBuffer {
    /// Create a buffer. Fails on out-of-range options.
    pub fn new(config: LogBufferConfig) -> Result<Self> {
        config.validate()?;
        let mutex = Mutex::new(MutexConfig {
            timeout: config.mutex_timeout,
        })?;
        Ok(Self {
            inner: Arc::new(Inner {
                config,
                mutex,
                state: StateLock::new(BufferState {
                    entries: VecDeque::new(),
                    total_size: 0,
                }),
                handlers: StateLock::new(Vec::new()),
                next_handler_id: AtomicU64::new(0),
                flush_timer: StateLock::new(None),
                disposed: AtomicBool::new(false),
            }),
        })
    }

    /// Append one entry, evicting oldest entries if the byte cap demands
    /// it and flushing first when the count limit is reached.
    ///
    /// Fails with [`Error::BufferFull`] when the buffer is at capacity and
    /// flushing did not help; the caller decides whether that drop is
    /// acceptable.
    pub async fn add(&self, entry: LogEntry) -> Result<()> {
        Inner::add(&self.inner, entry).await
    }

    /// Deliver all buffered entries to every registered handler and clear
    /// the buffer. Concurrent callers serialize on the internal mutex; on
    /// handler failure the batch is restored in original order and the
    /// error propagates.
    pub async fn flush(&self) -> Result<()> {
        self.inner.flush().await
    }

    /// Register a flush handler. All registered handlers receive each
    /// flushed batch.
    pub fn on_flush(&self, handler: Arc<dyn FlushHandler>) -> FlushRegistration {
        let id = self.inner.next_handler_id.fetch_add(1, Ordering::SeqCst) + 1;
        self.inner.handlers.lock().push((id, handler));
        FlushRegistration {
            id,
            inner: Arc::downgrade(&self.inner),
        }
    }

    /// Register a closure-based flush handler.
    pub fn on_flush_fn<F, Fut>(&self, f: F) -> FlushRegistration
    where
        F: Fn(Vec<LogEntry>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send,
    {
        self.on_flush(Arc::new(FnHandler { f }))
    }

    /// Best-effort final flush, then clears all state and the internal
    /// mutex. Idempotent.
    pub async fn dispose(&self) {
        if self.inner.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        // Final flush is best-effort; disposal proceeds regardless.
        match self.inner.mutex.acquire_as("dispose").await {
            Ok(lock) => {
                if let Err(err) = self.inner.flush_locked().await {
                    warn!(error = %err, "Final flush during disposal failed");
                }
                if let Err(err) = lock.release() {
                    warn!(error = %err, "Releasing buffer mutex during disposal failed");
                }
            }
            Err(err) => warn!(error = %err, "Could not lock buffer for final flush"),
        }
        self.inner.clear_flush_timer();
        self.inner.handlers.lock().clear();
        {
            let mut state = self.inner.state.lock();
            state.entries.clear();
            state.total_size = 0;
        }
        self.inner.mutex.dispose();
        debug!("Log buffer disposed");
    }

    pub fn len(&self) -> usize {
        self.inner.state.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Current byte total of buffered entries.
    pub fn total_size(&self) -> usize {
        self.inner.state.lock().total_size
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.disposed.load(Ordering::Acquire)
    }
}

impl std::fmt::Debug for LogBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogBuffer")
            .field("len", &self.len())
            .field("total_size", &self.total_size())
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logger::entry::{LogContext, LogLevel};
    use std::sync::atomic::AtomicU32;

    fn entry(message: &str) -> LogEntry {
        LogEntry::new(LogLevel::Info, message, LogContext::new())
    }

    /// Entry with a pinned whole-second timestamp so serialized sizes are
    /// identical across entries of equal message length.
    fn sized_entry(message: &str) -> LogEntry {
        LogEntry {
            level: LogLevel::Info,
            message: message.to_string(),
            context: LogContext::new(),
            timestamp: chrono::DateTime::parse_from_rfc3339("2026-01-01T00:00:00Z")
                .unwrap()
                .with_timezone(&chrono::Utc),
        }
    }

    fn config() -> LogBufferConfig {
        LogBufferConfig {
            retry_delay: Duration::from_millis(100),
            ..LogBufferConfig::default()
        }
    }

    /// Collects flushed batches; fails a scripted number of calls first.
    struct CollectingHandler {
        batches: StateLock<Vec<Vec<String>>>,
        failures_remaining: AtomicU32,
    }

    impl CollectingHandler {
        fn new(failures: u32) -> Arc<Self> {
            Arc::new(Self {
                batches: StateLock::new(Vec::new()),
                failures_remaining: AtomicU32::new(failures),
            })
        }

        fn messages(&self) -> Vec<Vec<String>> {
            self.batches.lock().clone()
        }
    }

    #[async_trait]
    impl FlushHandler for CollectingHandler {
        async fn on_batch(&self, batch: &[LogEntry]) -> Result<()> {
            let remaining = self.failures_remaining.load(Ordering::SeqCst);
            if remaining > 0 {
                self.failures_remaining.store(remaining - 1, Ordering::SeqCst);
                return Err(Error::Worker("scripted handler failure".to_string()));
            }
            self.batches
                .lock()
                .push(batch.iter().map(|e| e.message.clone()).collect());
            Ok(())
        }
    }

    #[tokio::test]
    async fn rejects_invalid_options() {
        assert!(LogBuffer::new(LogBufferConfig {
            max_size: 0,
            ..config()
        })
        .is_err());
        assert!(LogBuffer::new(LogBufferConfig {
            flush_interval: Duration::from_millis(999),
            ..config()
        })
        .is_err());
        assert!(LogBuffer::new(LogBufferConfig {
            max_total_size: 100,
            max_entry_size: 100,
            ..config()
        })
        .is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn size_cap_evicts_oldest_first() {
        let probe = sized_entry("0000").serialized_size();
        let buffer = LogBuffer::new(LogBufferConfig {
            max_entry_size: probe * 2,
            max_total_size: probe * 3 + 1,
            ..config()
        })
        .unwrap();

        for i in 0..5 {
            buffer.add(sized_entry(&format!("{i:04}"))).await.unwrap();
            assert!(buffer.total_size() <= probe * 3 + 1);
        }
        // Three fit; the two oldest were evicted.
        assert_eq!(buffer.len(), 3);

        let handler = CollectingHandler::new(0);
        let _reg = buffer.on_flush(handler.clone());
        buffer.flush().await.unwrap();
        assert_eq!(
            handler.messages(),
            vec![vec!["0002".to_string(), "0003".to_string(), "0004".to_string()]]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn entry_that_can_never_fit_is_rejected() {
        let buffer = LogBuffer::new(LogBufferConfig {
            max_entry_size: 128,
            max_total_size: 256,
            ..config()
        })
        .unwrap();

        let err = buffer.add(entry(&"x".repeat(1024))).await.unwrap_err();
        assert!(matches!(err, Error::EntryTooLarge { .. }));
        assert!(buffer.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn count_limit_flushes_before_accepting() {
        let buffer = LogBuffer::new(LogBufferConfig {
            max_size: 2,
            ..config()
        })
        .unwrap();
        let handler = CollectingHandler::new(0);
        let _reg = buffer.on_flush(handler.clone());

        buffer.add(entry("a")).await.unwrap();
        buffer.add(entry("b")).await.unwrap();
        assert!(handler.messages().is_empty());
        assert_eq!(buffer.len(), 2);

        buffer.add(entry("c")).await.unwrap();
        assert_eq!(
            handler.messages(),
            vec![vec!["a".to_string(), "b".to_string()]]
        );
        assert_eq!(buffer.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn failing_handler_rolls_batch_back_in_order() {
        let buffer = LogBuffer::new(LogBufferConfig {
            retry_attempts: 2,
            ..config()
        })
        .unwrap();
        // Fails both the initial call and its retry.
        let handler = CollectingHandler::new(2);
        let _reg = buffer.on_flush(handler.clone());

        buffer.add(entry("first")).await.unwrap();
        buffer.add(entry("second")).await.unwrap();

        let err = buffer.flush().await.unwrap_err();
        assert!(matches!(err, Error::Worker(_)));
        assert_eq!(buffer.len(), 2);

        // Handler healthy again: the restored batch flushes in order.
        buffer.flush().await.unwrap();
        assert_eq!(
            handler.messages(),
            vec![vec!["first".to_string(), "second".to_string()]]
        );
        assert!(buffer.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn handler_retry_succeeds_within_attempts() {
        let buffer = LogBuffer::new(LogBufferConfig {
            retry_attempts: 3,
            ..config()
        })
        .unwrap();
        let handler = CollectingHandler::new(2);
        let _reg = buffer.on_flush(handler.clone());

        buffer.add(entry("persistent")).await.unwrap();
        buffer.flush().await.unwrap();
        assert_eq!(handler.messages(), vec![vec!["persistent".to_string()]]);
    }

    #[tokio::test(start_paused = true)]
    async fn full_buffer_with_failing_flush_drops() {
        let buffer = LogBuffer::new(LogBufferConfig {
            max_size: 1,
            retry_attempts: 1,
            ..config()
        })
        .unwrap();
        let handler = CollectingHandler::new(u32::MAX);
        let _reg = buffer.on_flush(handler.clone());

        buffer.add(entry("kept")).await.unwrap();
        let err = buffer.add(entry("dropped")).await.unwrap_err();
        assert!(matches!(err, Error::BufferFull));
        assert_eq!(buffer.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn auto_flush_fires_on_interval() {
        let buffer = LogBuffer::new(LogBufferConfig {
            flush_interval: Duration::from_millis(1_000),
            ..config()
        })
        .unwrap();
        let handler = CollectingHandler::new(0);
        let _reg = buffer.on_flush(handler.clone());

        buffer.add(entry("timed")).await.unwrap();
        assert!(handler.messages().is_empty());

        tokio::time::sleep(Duration::from_millis(1_100)).await;
        assert_eq!(handler.messages(), vec![vec!["timed".to_string()]]);
        assert!(buffer.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn unregistered_handler_stops_receiving() {
        let buffer = LogBuffer::new(config()).unwrap();
        let keep = CollectingHandler::new(0);
        let drop_me = CollectingHandler::new(0);
        let _keep_reg = buffer.on_flush(keep.clone());
        let drop_reg = buffer.on_flush(drop_me.clone());

        drop_reg.unregister();
        buffer.add(entry("solo")).await.unwrap();
        buffer.flush().await.unwrap();

        assert_eq!(keep.messages(), vec![vec!["solo".to_string()]]);
        assert!(drop_me.messages().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn dispose_flushes_then_rejects() {
        let buffer = LogBuffer::new(config()).unwrap();
        let handler = CollectingHandler::new(0);
        let _reg = buffer.on_flush(handler.clone());

        buffer.add(entry("last words")).await.unwrap();
        buffer.dispose().await;
        buffer.dispose().await; // idempotent

        assert_eq!(handler.messages(), vec![vec!["last words".to_string()]]);
        assert!(buffer.is_disposed());
        assert!(matches!(
            buffer.add(entry("too late")).await,
            Err(Error::Disposed("LogBuffer"))
        ));
        assert!(matches!(
            buffer.flush().await,
            Err(Error::Disposed("LogBuffer"))
        ));
    }
}
