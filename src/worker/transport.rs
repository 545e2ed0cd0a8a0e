//! # Worker Transport
//!
//! The bidirectional channel between the [`WorkerManager`] and its
//! background execution unit, plus the tagged protocol that travels over
//! it. Implementations are pluggable: [`InProcessTransport`] runs the
//! worker as a tokio task for embedded use and tests; an out-of-process
//! transport only needs to move the same messages.
//!
//! [`WorkerManager`]: crate::worker::WorkerManager

use crate::errors::Result;
use crate::logger::entry::{LogEntry, LogLevel};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Channel capacity on both directions of a worker connection.
const CHANNEL_CAPACITY: usize = 64;

/// Messages sent to the worker.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkerRequest {
    /// Handshake probe; the worker must acknowledge with a test response.
    Test,
    /// Process one batch of log entries.
    Process {
        operation_id: u64,
        data: Vec<LogEntry>,
    },
    /// Orderly stop; no response expected.
    Shutdown,
}

/// Messages received from the worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkerResponse {
    /// Handshake acknowledgment.
    Test { success: bool },
    /// A batch completed; `result` is worker-defined.
    Completed {
        operation_id: u64,
        result: serde_json::Value,
    },
    /// A batch failed.
    Failed { operation_id: u64, error: String },
}

/// A live worker connection: where to send requests, where responses
/// arrive, and the task to kill on termination.
pub struct WorkerHandle {
    pub requests: mpsc::Sender<WorkerRequest>,
    pub responses: mpsc::Receiver<WorkerResponse>,
    pub task: Option<JoinHandle<()>>,
}

/// Spawns the background execution unit.
#[async_trait]
pub trait WorkerTransport: Send + Sync + 'static {
    async fn spawn(&self) -> Result<WorkerHandle>;
}

/// What the in-process worker does with each batch. Implementations must
/// be idempotent-safe: the manager retries failed operations.
#[async_trait]
pub trait BatchSink: Send + Sync + 'static {
    async fn process(&self, batch: Vec<LogEntry>)
        -> std::result::Result<serde_json::Value, String>;
}

/// Default sink: re-emits each entry on the `tracing` backbone at its
/// level and reports how many entries were processed.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

#[async_trait]
impl BatchSink for TracingSink {
    async fn process(
        &self,
        batch: Vec<LogEntry>,
    ) -> std::result::Result<serde_json::Value, String> {
        let processed = batch.len();
        for entry in batch {
            let context =
                serde_json::to_string(&entry.context).unwrap_or_else(|_| "{}".to_string());
            match entry.level {
                LogLevel::Debug => {
                    tracing::debug!(context = %context, timestamp = %entry.timestamp, "{}", entry.message)
                }
                LogLevel::Info => {
                    tracing::info!(context = %context, timestamp = %entry.timestamp, "{}", entry.message)
                }
                LogLevel::Warn => {
                    tracing::warn!(context = %context, timestamp = %entry.timestamp, "{}", entry.message)
                }
                LogLevel::Error | LogLevel::Fatal => {
                    tracing::error!(context = %context, timestamp = %entry.timestamp, "{}", entry.message)
                }
            }
        }
        Ok(serde_json::json!({ "processed": processed }))
    }
}

/// In-process transport: the worker is a tokio task draining the request
/// channel and handing batches to a [`BatchSink`]. Operations run
/// concurrently, so responses may complete out of submission order.
pub struct InProcessTransport {
    sink: Arc<dyn BatchSink>,
}

impl InProcessTransport {
    pub fn new(sink: Arc<dyn BatchSink>) -> Self {
        Self { sink }
    }
}

impl Default for InProcessTransport {
    fn default() -> Self {
        Self::new(Arc::new(TracingSink))
    }
}

#[async_trait]
impl WorkerTransport for InProcessTransport {
    async fn spawn(&self) -> Result<WorkerHandle> {
        let (request_tx, mut request_rx) = mpsc::channel::<WorkerRequest>(CHANNEL_CAPACITY);
        let (response_tx, response_rx) = mpsc::channel::<WorkerResponse>(CHANNEL_CAPACITY);
        let sink = Arc::clone(&self.sink);

        let task = tokio::spawn(async move {
            while let Some(request) = request_rx.recv().await {
                match request {
                    WorkerRequest::Test => {
                        if response_tx
                            .send(WorkerResponse::Test { success: true })
                            .await
                            .is_err()
                        {
                            break;
                        }
                    }
                    WorkerRequest::Process { operation_id, data } => {
                        let sink = Arc::clone(&sink);
                        let response_tx = response_tx.clone();
                        tokio::spawn(async move {
                            let response = match sink.process(data).await {
                                Ok(result) => WorkerResponse::Completed {
                                    operation_id,
                                    result,
                                },
                                Err(error) => {
                                    warn!(operation_id, error = %error, "Batch sink failed");
                                    WorkerResponse::Failed {
                                        operation_id,
                                        error,
                                    }
                                }
                            };
                            // Manager may have torn the channel down already.
                            let _ = response_tx.send(response).await;
                        });
                    }
                    WorkerRequest::Shutdown => {
                        debug!("In-process worker shutting down");
                        break;
                    }
                }
            }
        });

        Ok(WorkerHandle {
            requests: request_tx,
            responses: response_rx,
            task: Some(task),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logger::entry::LogContext;

    #[tokio::test]
    async fn handshake_and_batch_roundtrip() {
        let transport = InProcessTransport::default();
        let mut handle = transport.spawn().await.unwrap();

        handle.requests.send(WorkerRequest::Test).await.unwrap();
        match handle.responses.recv().await.unwrap() {
            WorkerResponse::Test { success } => assert!(success),
            other => panic!("unexpected response: {other:?}"),
        }

        let batch = vec![LogEntry::new(LogLevel::Info, "hello", LogContext::new())];
        handle
            .requests
            .send(WorkerRequest::Process {
                operation_id: 7,
                data: batch,
            })
            .await
            .unwrap();
        match handle.responses.recv().await.unwrap() {
            WorkerResponse::Completed {
                operation_id,
                result,
            } => {
                assert_eq!(operation_id, 7);
                assert_eq!(result["processed"], 1);
            }
            other => panic!("unexpected response: {other:?}"),
        }

        handle.requests.send(WorkerRequest::Shutdown).await.unwrap();
        if let Some(task) = handle.task.take() {
            task.await.unwrap();
        }
    }

    #[test]
    fn protocol_messages_are_tagged() {
        let json = serde_json::to_value(WorkerRequest::Test).unwrap();
        assert_eq!(json["type"], "test");

        let json = serde_json::to_value(WorkerResponse::Failed {
            operation_id: 3,
            error: "boom".to_string(),
        })
        .unwrap();
        assert_eq!(json["type"], "failed");
        assert_eq!(json["operation_id"], 3);
    }
}
