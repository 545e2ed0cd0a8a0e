//! # Background Worker
//!
//! One background execution unit and the manager that bridges
//! request/response pairs to it with per-operation timeouts and retries.
//! The transport seam keeps the correlation and retry logic independent
//! of how the worker actually runs.

pub mod manager;
pub mod transport;

pub use manager::{WorkerManager, WorkerManagerConfig};
pub use transport::{
    BatchSink, InProcessTransport, TracingSink, WorkerHandle, WorkerRequest, WorkerResponse,
    WorkerTransport,
};
