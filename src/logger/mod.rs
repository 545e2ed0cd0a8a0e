//! # Structured Logger
//!
//! The buffered, resilience-wrapped logging pipeline: entries are
//! validated and formatted, accumulate in the [`buffer::LogBuffer`], and
//! flush in batches to the background worker. [`core::LoggerCore`] is the
//! public surface.

pub mod buffer;
pub mod core;
pub mod entry;
pub mod metrics;

pub use buffer::{FlushHandler, FlushRegistration, LogBuffer, LogBufferConfig};
pub use core::{LoggerCore, LoggerCoreConfig};
pub use entry::{ContextValue, LogContext, LogEntry, LogLevel};
pub use metrics::{LoggerMetrics, LoggerMetricsSnapshot};
