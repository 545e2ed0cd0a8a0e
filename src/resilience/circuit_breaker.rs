//! # Circuit Breaker
//!
//! Three-state failure isolation around an asynchronous operation fixed at
//! construction: Closed (normal operation), Open (failing fast), and
//! HalfOpen (testing recovery), with a terminal Disposed state.
//!
//! Recovery has two cooperating paths: a scheduled task that moves the
//! circuit from Open to HalfOpen once the recovery timeout elapses, and a
//! lazy elapsed-time check on each call. The scheduled task is the
//! authoritative transition; the lazy check only covers the window before
//! the task has run. Whichever fires first produces the same state.

use crate::constants::timeouts::{DEFAULT_OPERATION_TIMEOUT, DEFAULT_RECOVERY_TIMEOUT};
use crate::errors::{Error, Result};
use crate::validation::{validate_positive, validate_timeout};
use parking_lot::Mutex as StateLock;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// Circuit breaker states representing the current operational mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitState {
    /// Normal operation - all calls are allowed through
    Closed = 0,
    /// Failure mode - all calls fail fast without executing
    Open = 1,
    /// Testing recovery - calls allowed to probe system health
    HalfOpen = 2,
    /// Terminal state after disposal
    Disposed = 3,
}

impl From<u8> for CircuitState {
    fn from(value: u8) -> Self {
        match value {
            0 => CircuitState::Closed,
            1 => CircuitState::Open,
            2 => CircuitState::HalfOpen,
            _ => CircuitState::Disposed,
        }
    }
}

/// Options for a [`CircuitBreaker`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures required to open the circuit.
    pub failure_threshold: u32,
    /// Time in Open before a recovery attempt is allowed.
    pub recovery_timeout: Duration,
    /// Bound on every allowed call; exceeding it counts as a failure.
    pub operation_timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            recovery_timeout: DEFAULT_RECOVERY_TIMEOUT,
            operation_timeout: DEFAULT_OPERATION_TIMEOUT,
        }
    }
}

impl CircuitBreakerConfig {
    /// Validate configuration parameters
    pub fn validate(&self) -> Result<()> {
        validate_positive(
            u64::from(self.failure_threshold),
            "options.failure_threshold",
        )?;
        validate_timeout(self.recovery_timeout, "options.recovery_timeout")?;
        validate_timeout(self.operation_timeout, "options.operation_timeout")?;
        Ok(())
    }
}

/// Errors surfaced by [`CircuitBreaker::execute`].
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CircuitBreakerError<E> {
    /// Circuit is open; the wrapped operation was not invoked.
    #[error("Circuit breaker is OPEN")]
    Open,
    /// The wrapped operation exceeded the operation timeout.
    #[error("Operation timeout")]
    Timeout,
    /// The breaker was disposed.
    #[error("Circuit breaker has been disposed")]
    Disposed,
    /// The wrapped operation itself failed.
    #[error("Operation failed: {0}")]
    Operation(E),
}

impl From<CircuitBreakerError<Error>> for Error {
    fn from(err: CircuitBreakerError<Error>) -> Self {
        match err {
            CircuitBreakerError::Open => Error::CircuitOpen,
            CircuitBreakerError::Timeout => Error::OperationTimeout,
            CircuitBreakerError::Disposed => Error::Disposed("Circuit breaker"),
            CircuitBreakerError::Operation(inner) => inner,
        }
    }
}

struct FailureState {
    failure_count: u32,
    last_failure_time: Option<Instant>,
}

struct Shared {
    state: AtomicU8,
    failures: StateLock<FailureState>,
    recovery_task: StateLock<Option<JoinHandle<()>>>,
    config: CircuitBreakerConfig,
}

impl Shared {
    fn state(&self) -> CircuitState {
        CircuitState::from(self.state.load(Ordering::Acquire))
    }

    /// Open -> HalfOpen, refusing to overwrite Disposed.
    fn try_half_open(&self) -> bool {
        self.state
            .compare_exchange(
                CircuitState::Open as u8,
                CircuitState::HalfOpen as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }
}

/// Circuit breaker around an asynchronous operation.
///
/// The operation is supplied at construction; [`CircuitBreaker::execute`]
/// invokes it under the current state rules with its input for the call.
pub struct CircuitBreaker<Op> {
    operation: Op,
    shared: Arc<Shared>,
}

impl<Op> CircuitBreaker<Op> {
    /// Create a breaker wrapping `operation`. Invalid options fail
    /// synchronously with a validation error.
    pub fn new(operation: Op, config: CircuitBreakerConfig) -> Result<Self> {
        config.validate()?;
        debug!(
            failure_threshold = config.failure_threshold,
            recovery_timeout_ms = config.recovery_timeout.as_millis() as u64,
            operation_timeout_ms = config.operation_timeout.as_millis() as u64,
            "Circuit breaker initialized"
        );
        Ok(Self {
            operation,
            shared: Arc::new(Shared {
                state: AtomicU8::new(CircuitState::Closed as u8),
                failures: StateLock::new(FailureState {
                    failure_count: 0,
                    last_failure_time: None,
                }),
                recovery_task: StateLock::new(None),
                config,
            }),
        })
    }

    /// Execute the wrapped operation under the current state rules.
    ///
    /// In Open, the call is allowed through only when the recovery timeout
    /// has elapsed since the last failure (transitioning to HalfOpen);
    /// otherwise it fails fast without invoking the operation. Every
    /// allowed call is bounded by the operation timeout.
    pub async fn execute<In, Fut, T, E>(&self, input: In) -> std::result::Result<T, CircuitBreakerError<E>>
    where
        Op: Fn(In) -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
    {
        match self.shared.state() {
            CircuitState::Disposed => return Err(CircuitBreakerError::Disposed),
            CircuitState::Open => {
                let recovered = {
                    let failures = self.shared.failures.lock();
                    failures
                        .last_failure_time
                        .is_some_and(|t| t.elapsed() >= self.shared.config.recovery_timeout)
                };
                if recovered {
                    if self.shared.try_half_open() {
                        info!("Circuit breaker half-open (testing recovery)");
                    }
                } else {
                    return Err(CircuitBreakerError::Open);
                }
            }
            CircuitState::Closed | CircuitState::HalfOpen => {}
        }

        match tokio::time::timeout(
            self.shared.config.operation_timeout,
            (self.operation)(input),
        )
        .await
        {
            Ok(Ok(value)) => {
                self.record_success();
                Ok(value)
            }
            Ok(Err(err)) => {
                self.record_failure();
                Err(CircuitBreakerError::Operation(err))
            }
            Err(_) => {
                self.record_failure();
                Err(CircuitBreakerError::Timeout)
            }
        }
    }

    fn record_success(&self) {
        {
            let mut failures = self.shared.failures.lock();
            failures.failure_count = 0;
            failures.last_failure_time = None;
        }
        let flipped = self
            .shared
            .state
            .compare_exchange(
                CircuitState::HalfOpen as u8,
                CircuitState::Closed as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok();
        if flipped {
            if let Some(task) = self.shared.recovery_task.lock().take() {
                task.abort();
            }
            info!("Circuit breaker closed (recovered)");
        }
    }

    fn record_failure(&self) {
        let should_open = {
            let mut failures = self.shared.failures.lock();
            failures.failure_count += 1;
            failures.last_failure_time = Some(Instant::now());
            failures.failure_count >= self.shared.config.failure_threshold
        };

        if should_open {
            match self.shared.state() {
                CircuitState::Closed | CircuitState::HalfOpen => {
                    self.shared
                        .state
                        .store(CircuitState::Open as u8, Ordering::Release);
                    error!(
                        failure_threshold = self.shared.config.failure_threshold,
                        recovery_timeout_ms =
                            self.shared.config.recovery_timeout.as_millis() as u64,
                        "Circuit breaker opened (failing fast)"
                    );
                    self.schedule_recovery();
                }
                CircuitState::Open | CircuitState::Disposed => {}
            }
        }
    }

    /// Spawns the authoritative Open -> HalfOpen transition.
    fn schedule_recovery(&self) {
        let shared = Arc::clone(&self.shared);
        let delay = self.shared.config.recovery_timeout;
        let task = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if shared.try_half_open() {
                info!("Circuit breaker half-open (testing recovery)");
            }
        });
        if let Some(previous) = self.shared.recovery_task.lock().replace(task) {
            previous.abort();
        }
    }

    /// Terminal: cancels pending timers and fails all further calls.
    pub fn dispose(&self) {
        let previous = self
            .shared
            .state
            .swap(CircuitState::Disposed as u8, Ordering::AcqRel);
        if let Some(task) = self.shared.recovery_task.lock().take() {
            task.abort();
        }
        if CircuitState::from(previous) != CircuitState::Disposed {
            debug!("Circuit breaker disposed");
        }
    }

    /// Force the circuit open, as after a failure burst. No-op once
    /// disposed.
    pub fn force_open(&self) {
        if self.shared.state() == CircuitState::Disposed {
            return;
        }
        warn!("Circuit breaker forced open");
        self.shared.failures.lock().last_failure_time = Some(Instant::now());
        self.shared
            .state
            .store(CircuitState::Open as u8, Ordering::Release);
    }

    /// Force the circuit into the recovery-probe state. No-op once
    /// disposed.
    pub fn force_half_open(&self) {
        if self.shared.state() == CircuitState::Disposed {
            return;
        }
        warn!("Circuit breaker forced half-open");
        self.shared
            .state
            .store(CircuitState::HalfOpen as u8, Ordering::Release);
    }

    /// Get current circuit state
    pub fn state(&self) -> CircuitState {
        self.shared.state()
    }

    /// Monitoring snapshot: state, failure count, age of last failure.
    pub fn stats(&self) -> CircuitBreakerStats {
        let failures = self.shared.failures.lock();
        let state = self.shared.state();
        CircuitBreakerStats {
            state,
            failure_count: failures.failure_count,
            last_failure_age_ms: failures
                .last_failure_time
                .map(|t| t.elapsed().as_millis() as u64),
            is_disposed: state == CircuitState::Disposed,
        }
    }
}

impl<Op> Drop for CircuitBreaker<Op> {
    fn drop(&mut self) {
        if let Some(task) = self.shared.recovery_task.lock().take() {
            task.abort();
        }
    }
}

impl<Op> std::fmt::Debug for CircuitBreaker<Op> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let stats = self.stats();
        f.debug_struct("CircuitBreaker")
            .field("state", &stats.state)
            .field("failure_count", &stats.failure_count)
            .finish()
    }
}

/// Monitoring snapshot returned by [`CircuitBreaker::stats`].
#[derive(Debug, Clone, Serialize)]
pub struct CircuitBreakerStats {
    pub state: CircuitState,
    pub failure_count: u32,
    pub last_failure_age_ms: Option<u64>,
    pub is_disposed: bool,
}
