//! # Synchronization Primitives
//!
//! Strictly-ordered asynchronous locking used by the buffering and metrics
//! components, and available to embedding applications directly.

pub mod mutex;

pub use mutex::{AllLocks, Lock, Mutex, MutexConfig, MutexSnapshot, QueueEntry};
