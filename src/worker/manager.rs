//! # Worker Manager
//!
//! Owns one background execution unit and mediates request/response
//! correlation: every dispatched batch gets a unique operation id, a
//! dedicated response handler, and an independent timeout. Failed
//! dispatches are retried with linear backoff before the last failure
//! propagates.

use crate::constants::timeouts::{DEFAULT_WORKER_OPERATION_TIMEOUT, WORKER_TEST_TIMEOUT};
use crate::constants::worker::{DEFAULT_MAX_RETRIES, DEFAULT_RETRY_DELAY, MAX_BATCH_BYTES};
use crate::errors::{Error, Result};
use crate::logger::entry::LogEntry;
use crate::worker::transport::{WorkerHandle, WorkerRequest, WorkerResponse, WorkerTransport};
use dashmap::DashMap;
use parking_lot::Mutex as StateLock;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Options for a [`WorkerManager`].
#[derive(Debug, Clone)]
pub struct WorkerManagerConfig {
    /// Dispatch attempts per batch before the last failure propagates.
    pub max_retries: u32,
    /// Base of the linear backoff between attempts.
    pub retry_delay: Duration,
    /// Independent bound on each worker round trip.
    pub operation_timeout: Duration,
    /// Bound on the handshake self-test during initialization.
    pub test_timeout: Duration,
}

impl Default for WorkerManagerConfig {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            retry_delay: DEFAULT_RETRY_DELAY,
            operation_timeout: DEFAULT_WORKER_OPERATION_TIMEOUT,
            test_timeout: WORKER_TEST_TIMEOUT,
        }
    }
}

type ResponseHandler = oneshot::Sender<Result<serde_json::Value>>;

struct ActiveWorker {
    requests: mpsc::Sender<WorkerRequest>,
    worker_task: Option<JoinHandle<()>>,
    dispatch_task: JoinHandle<()>,
}

/// Manages one background worker and correlates batches with responses.
pub struct WorkerManager {
    transport: Arc<dyn WorkerTransport>,
    config: WorkerManagerConfig,
    /// Initialization guard: concurrent `initialize` callers serialize
    /// here and all observe the one in-flight attempt's outcome.
    active: AsyncMutex<Option<ActiveWorker>>,
    handlers: Arc<DashMap<u64, ResponseHandler>>,
    test_ack: Arc<StateLock<Option<oneshot::Sender<bool>>>>,
    operation_counter: AtomicU64,
    initialized: AtomicBool,
    disposed: AtomicBool,
}

impl WorkerManager {
    pub fn new(transport: Arc<dyn WorkerTransport>, config: WorkerManagerConfig) -> Self {
        Self {
            transport,
            config,
            active: AsyncMutex::new(None),
            handlers: Arc::new(DashMap::new()),
            test_ack: Arc::new(StateLock::new(None)),
            operation_counter: AtomicU64::new(0),
            initialized: AtomicBool::new(false),
            disposed: AtomicBool::new(false),
        }
    }

    /// Spawn the worker, attach the response dispatch loop, and run the
    /// handshake self-test. Idempotent and safe to call concurrently; a
    /// handshake failure tears the worker down and surfaces the error.
    pub async fn initialize(&self) -> Result<()> {
        if self.disposed.load(Ordering::Acquire) {
            return Err(Error::Disposed("WorkerManager"));
        }
        let mut active = self.active.lock().await;
        if active.is_some() {
            return Ok(());
        }

        let WorkerHandle {
            requests,
            mut responses,
            task: worker_task,
        } = self.transport.spawn().await?;

        let handlers = Arc::clone(&self.handlers);
        let test_ack = Arc::clone(&self.test_ack);
        let dispatch_task = tokio::spawn(async move {
            while let Some(response) = responses.recv().await {
                match response {
                    WorkerResponse::Test { success } => {
                        match test_ack.lock().take() {
                            Some(ack) => {
                                let _ = ack.send(success);
                            }
                            None => warn!("Unsolicited worker test acknowledgment ignored"),
                        }
                    }
                    WorkerResponse::Completed {
                        operation_id,
                        result,
                    } => match handlers.remove(&operation_id) {
                        Some((_, handler)) => {
                            let _ = handler.send(Ok(result));
                        }
                        // Late responses after a timeout land here.
                        None => warn!(operation_id, "Received response for unknown operation"),
                    },
                    WorkerResponse::Failed {
                        operation_id,
                        error,
                    } => match handlers.remove(&operation_id) {
                        Some((_, handler)) => {
                            let _ = handler.send(Err(Error::Worker(error)));
                        }
                        None => warn!(operation_id, "Received failure for unknown operation"),
                    },
                }
            }
            debug!("Worker response channel closed");
        });

        let teardown = |worker_task: Option<JoinHandle<()>>, dispatch_task: JoinHandle<()>| {
            dispatch_task.abort();
            if let Some(task) = worker_task {
                task.abort();
            }
        };

        // Handshake: the worker must acknowledge a test message before the
        // manager reports itself initialized.
        let (ack_tx, ack_rx) = oneshot::channel();
        *self.test_ack.lock() = Some(ack_tx);
        if requests.send(WorkerRequest::Test).await.is_err() {
            let _ = self.test_ack.lock().take();
            teardown(worker_task, dispatch_task);
            return Err(Error::Transport(
                "worker rejected handshake message".to_string(),
            ));
        }

        match tokio::time::timeout(self.config.test_timeout, ack_rx).await {
            Ok(Ok(true)) => {}
            Ok(Ok(false)) => {
                teardown(worker_task, dispatch_task);
                return Err(Error::Worker("worker self-test failed".to_string()));
            }
            Ok(Err(_)) | Err(_) => {
                let _ = self.test_ack.lock().take();
                teardown(worker_task, dispatch_task);
                return Err(Error::Transport("worker self-test timed out".to_string()));
            }
        }

        *active = Some(ActiveWorker {
            requests,
            worker_task,
            dispatch_task,
        });
        self.initialized.store(true, Ordering::Release);
        info!("Worker manager initialized");
        Ok(())
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::Acquire)
    }

    /// Pending operations awaiting a worker response.
    pub fn pending_operations(&self) -> usize {
        self.handlers.len()
    }

    /// Send one batch to the worker and await its correlated response.
    ///
    /// The serialized batch must stay under the 10MB hard cap. Transient
    /// failures are retried up to `max_retries` with linear backoff
    /// (`retry_delay * attempt`); the last failure propagates.
    pub async fn process_batch(&self, batch: &[LogEntry]) -> Result<serde_json::Value> {
        if self.disposed.load(Ordering::Acquire) {
            return Err(Error::Disposed("WorkerManager"));
        }
        if !self.is_initialized() {
            return Err(Error::NotInitialized);
        }

        let serialized = serde_json::to_vec(batch)?;
        if serialized.len() > MAX_BATCH_BYTES {
            return Err(Error::BatchTooLarge {
                size: serialized.len(),
                max: MAX_BATCH_BYTES,
            });
        }

        let requests = {
            let active = self.active.lock().await;
            match active.as_ref() {
                Some(worker) => worker.requests.clone(),
                None => return Err(Error::NotInitialized),
            }
        };

        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match self.dispatch_once(&requests, batch).await {
                Ok(result) => return Ok(result),
                Err(err) if attempt < self.config.max_retries && err.is_retryable() => {
                    warn!(
                        attempt,
                        max_retries = self.config.max_retries,
                        error = %err,
                        "Batch dispatch failed, retrying"
                    );
                    tokio::time::sleep(self.config.retry_delay * attempt).await;
                }
                Err(err) => return Err(err),
            }
        }
    }

    async fn dispatch_once(
        &self,
        requests: &mpsc::Sender<WorkerRequest>,
        batch: &[LogEntry],
    ) -> Result<serde_json::Value> {
        let operation_id = self.operation_counter.fetch_add(1, Ordering::SeqCst) + 1;
        let (tx, rx) = oneshot::channel();
        self.handlers.insert(operation_id, tx);

        let request = WorkerRequest::Process {
            operation_id,
            data: batch.to_vec(),
        };
        if requests.send(request).await.is_err() {
            self.handlers.remove(&operation_id);
            return Err(Error::Transport("worker channel closed".to_string()));
        }

        match tokio::time::timeout(self.config.operation_timeout, rx).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => {
                // Handler dropped during disposal.
                self.handlers.remove(&operation_id);
                Err(Error::Disposed("WorkerManager"))
            }
            Err(_) => {
                // This operation's timer fired; unrelated operations keep
                // their handlers.
                self.handlers.remove(&operation_id);
                Err(Error::OperationTimeout)
            }
        }
    }

    /// Terminate the worker and fail every pending operation. Safe to
    /// call multiple times.
    pub async fn dispose(&self) {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.initialized.store(false, Ordering::Release);

        let mut active = self.active.lock().await;
        if let Some(worker) = active.take() {
            // Orderly stop if the channel still has room, then hard stop.
            let _ = worker.requests.try_send(WorkerRequest::Shutdown);
            worker.dispatch_task.abort();
            if let Some(task) = worker.worker_task {
                task.abort();
            }
        }
        let _ = self.test_ack.lock().take();

        let pending: Vec<u64> = self.handlers.iter().map(|entry| *entry.key()).collect();
        for operation_id in pending {
            if let Some((_, handler)) = self.handlers.remove(&operation_id) {
                let _ = handler.send(Err(Error::Disposed("WorkerManager")));
            }
        }
        debug!("Worker manager disposed");
    }
}

impl std::fmt::Debug for WorkerManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerManager")
            .field("initialized", &self.is_initialized())
            .field("pending_operations", &self.pending_operations())
            .field("disposed", &self.disposed.load(Ordering::Acquire))
            .finish()
    }
}
