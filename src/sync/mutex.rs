//! # FIFO Async Mutex
//!
//! An asynchronous mutex that grants the lock to waiters strictly in
//! arrival order, bounds every queued acquisition with an independent
//! timeout, and validates releases against the lock id issued at
//! acquisition time.
//!
//! The wait queue is only ever mutated inside a non-suspending
//! `parking_lot` critical section, so there is no window between "check
//! empty" and "enqueue" for another task to slip through. Grants travel
//! over a `oneshot` channel per waiter.

use crate::constants::timeouts::DEFAULT_MUTEX_TIMEOUT;
use crate::errors::{Error, Result};
use crate::validation::validate_timeout;
use parking_lot::Mutex as StateLock;
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::debug;

/// Options for a [`Mutex`].
#[derive(Debug, Clone)]
pub struct MutexConfig {
    /// Wait bound applied independently to every queued acquisition.
    pub timeout: Duration,
}

impl Default for MutexConfig {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_MUTEX_TIMEOUT,
        }
    }
}

/// A queued acquisition. The grant channel doubles as the waiter's
/// liveness signal: a send failure means the acquire future was dropped.
struct Waiter {
    lock_id: u64,
    owner: Option<String>,
    enqueued_at: Instant,
    grant: oneshot::Sender<Result<()>>,
}

struct State {
    locked: bool,
    disposed: bool,
    queue: VecDeque<Waiter>,
    next_lock_id: u64,
    current_lock_id: Option<u64>,
    owner: Option<String>,
    lock_time: Option<Instant>,
}

impl State {
    /// Hands the lock to the first live waiter. Must be called with the
    /// lock logically free.
    fn grant_next(&mut self) {
        while let Some(waiter) = self.queue.pop_front() {
            self.locked = true;
            self.current_lock_id = Some(waiter.lock_id);
            self.owner = waiter.owner.clone();
            self.lock_time = Some(Instant::now());
            if waiter.grant.send(Ok(())).is_ok() {
                return;
            }
            // Waiter vanished (acquire future dropped); roll back and try
            // the next one in order.
            self.locked = false;
            self.current_lock_id = None;
            self.owner = None;
            self.lock_time = None;
        }
    }
}

/// Strictly-FIFO asynchronous mutex with per-waiter timeouts.
///
/// ```rust,no_run
/// use resilog::sync::{Mutex, MutexConfig};
///
/// # async fn example() -> resilog::Result<()> {
/// let mutex = Mutex::new(MutexConfig::default())?;
/// let lock = mutex.acquire().await?;
/// // critical section
/// lock.release()?;
/// # Ok(())
/// # }
/// ```
pub struct Mutex {
    state: Arc<StateLock<State>>,
    timeout: Duration,
}

impl Mutex {
    /// Create a new mutex. Fails if the configured timeout is outside the
    /// accepted range (minimum 100ms).
    pub fn new(config: MutexConfig) -> Result<Self> {
        validate_timeout(config.timeout, "options.timeout")?;
        Ok(Self {
            state: Arc::new(StateLock::new(State {
                locked: false,
                disposed: false,
                queue: VecDeque::new(),
                next_lock_id: 0,
                current_lock_id: None,
                owner: None,
                lock_time: None,
            })),
            timeout: config.timeout,
        })
    }

    /// Acquire the lock without an owner tag.
    pub async fn acquire(&self) -> Result<Lock> {
        self.acquire_inner(None).await
    }

    /// Acquire the lock tagged with an owner identifier, visible in
    /// [`Mutex::snapshot`] and [`Mutex::queue_info`].
    pub async fn acquire_as(&self, owner: impl Into<String>) -> Result<Lock> {
        self.acquire_inner(Some(owner.into())).await
    }

    async fn acquire_inner(&self, owner: Option<String>) -> Result<Lock> {
        let (lock_id, waiting) = {
            let mut st = self.state.lock();
            if st.disposed {
                return Err(Error::Disposed("Mutex"));
            }
            st.next_lock_id += 1;
            let lock_id = st.next_lock_id;

            if !st.locked && st.queue.is_empty() {
                st.locked = true;
                st.current_lock_id = Some(lock_id);
                st.owner = owner;
                st.lock_time = Some(Instant::now());
                (lock_id, None)
            } else {
                let (tx, rx) = oneshot::channel();
                st.queue.push_back(Waiter {
                    lock_id,
                    owner,
                    enqueued_at: Instant::now(),
                    grant: tx,
                });
                (lock_id, Some(rx))
            }
        };

        if let Some(rx) = waiting {
            match tokio::time::timeout(self.timeout, rx).await {
                Ok(Ok(Ok(()))) => {}
                Ok(Ok(Err(err))) => return Err(err),
                // The sender only disappears with the state it lives in.
                Ok(Err(_)) => return Err(Error::Disposed("Mutex")),
                Err(_) => {
                    let mut st = self.state.lock();
                    if let Some(pos) = st.queue.iter().position(|w| w.lock_id == lock_id) {
                        let _ = st.queue.remove(pos);
                        debug!(
                            lock_id,
                            queue_length = st.queue.len(),
                            "Mutex acquisition timed out"
                        );
                        return Err(Error::AcquisitionTimeout("Mutex"));
                    }
                    // The grant raced the timer and won: the lock is ours.
                }
            }
        }

        Ok(Lock {
            state: Arc::clone(&self.state),
            lock_id,
            released: false,
        })
    }

    /// Run `f` while holding the lock; releases on completion and on
    /// panic (through the guard's drop).
    pub async fn with_lock<F, Fut, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = T>,
    {
        let lock = self.acquire().await?;
        let out = f().await;
        lock.release()?;
        Ok(out)
    }

    /// Release by explicit lock id. A stale or foreign id fails with an
    /// invalid-release error and leaves the lock held.
    pub fn release_id(&self, lock_id: u64) -> Result<()> {
        release_internal(&self.state, lock_id)
    }

    /// Acquire every mutex in the set and return one handle that releases
    /// them all. Acquisition order across the set is unspecified; locks
    /// already obtained are released if any acquisition fails.
    pub async fn acquire_all(mutexes: &[Mutex]) -> Result<AllLocks> {
        let locks =
            futures::future::try_join_all(mutexes.iter().map(|m| m.acquire())).await?;
        Ok(AllLocks { locks })
    }

    /// Return the first lock obtained among the set; fails only if every
    /// attempt fails.
    pub async fn acquire_race(mutexes: &[Mutex]) -> Result<Lock> {
        if mutexes.is_empty() {
            return Err(Error::Validation(
                "mutexes must be a non-empty array".to_string(),
            ));
        }
        let attempts = mutexes.iter().map(|m| Box::pin(m.acquire()));
        match futures::future::select_ok(attempts).await {
            Ok((lock, _remaining)) => Ok(lock),
            Err(err) => Err(err),
        }
    }

    /// Idempotent. Fails every queued and future acquisition with a
    /// disposed error. Waiter timers die with their acquire futures.
    pub fn dispose(&self) {
        let mut st = self.state.lock();
        if st.disposed {
            return;
        }
        st.disposed = true;
        st.locked = false;
        st.current_lock_id = None;
        st.owner = None;
        st.lock_time = None;
        for waiter in st.queue.drain(..) {
            // Best effort: a dropped acquire future has nothing to reject.
            let _ = waiter.grant.send(Err(Error::Disposed("Mutex")));
        }
    }

    pub fn is_locked(&self) -> bool {
        self.state.lock().locked
    }

    pub fn is_disposed(&self) -> bool {
        self.state.lock().disposed
    }

    pub fn queue_len(&self) -> usize {
        self.state.lock().queue.len()
    }

    /// Owner tag of the current holder, if any.
    pub fn owner(&self) -> Option<String> {
        self.state.lock().owner.clone()
    }

    /// How long the current holder has held the lock.
    pub fn lock_duration(&self) -> Duration {
        self.state
            .lock()
            .lock_time
            .map(|t| t.elapsed())
            .unwrap_or(Duration::ZERO)
    }

    /// Point-in-time view of the wait queue, in grant order.
    pub fn queue_info(&self) -> Vec<QueueEntry> {
        let st = self.state.lock();
        st.queue
            .iter()
            .map(|w| QueueEntry {
                lock_id: w.lock_id,
                owner: w.owner.clone(),
                wait_time_ms: w.enqueued_at.elapsed().as_millis() as u64,
            })
            .collect()
    }

    /// Full observability snapshot.
    pub fn snapshot(&self) -> MutexSnapshot {
        let st = self.state.lock();
        MutexSnapshot {
            is_locked: st.locked,
            lock_duration_ms: st
                .lock_time
                .map(|t| t.elapsed().as_millis() as u64)
                .unwrap_or(0),
            owner: st.owner.clone(),
            lock_id: st.next_lock_id,
            queue_length: st.queue.len(),
            is_disposed: st.disposed,
        }
    }
}

impl Default for Mutex {
    fn default() -> Self {
        Self::new(MutexConfig::default()).expect("default mutex config is valid")
    }
}

impl std::fmt::Debug for Mutex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let snap = self.snapshot();
        f.debug_struct("Mutex")
            .field("locked", &snap.is_locked)
            .field("queue_length", &snap.queue_length)
            .field("disposed", &snap.is_disposed)
            .finish()
    }
}

fn release_internal(state: &Arc<StateLock<State>>, lock_id: u64) -> Result<()> {
    let mut st = state.lock();
    if st.disposed {
        return Err(Error::Disposed("Mutex"));
    }
    if !st.locked {
        return Err(Error::NotLocked);
    }
    if st.current_lock_id != Some(lock_id) {
        return Err(Error::InvalidRelease);
    }
    st.locked = false;
    st.current_lock_id = None;
    st.owner = None;
    st.lock_time = None;
    st.grant_next();
    Ok(())
}

/// Lock handle issued by [`Mutex::acquire`]. Explicit [`Lock::release`]
/// consumes the handle; dropping an unreleased handle releases best-effort.
pub struct Lock {
    state: Arc<StateLock<State>>,
    lock_id: u64,
    released: bool,
}

impl Lock {
    /// The id issued at acquisition; releases are validated against it.
    pub fn lock_id(&self) -> u64 {
        self.lock_id
    }

    /// Release the lock, granting it to the next waiter in FIFO order.
    pub fn release(mut self) -> Result<()> {
        self.released = true;
        release_internal(&self.state, self.lock_id)
    }
}

impl Drop for Lock {
    fn drop(&mut self) {
        if !self.released {
            // Disposal or an earlier release_id may have beaten us here.
            let _ = release_internal(&self.state, self.lock_id);
        }
    }
}

impl std::fmt::Debug for Lock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Lock").field("lock_id", &self.lock_id).finish()
    }
}

/// Handle over a set of locks obtained by [`Mutex::acquire_all`].
pub struct AllLocks {
    locks: Vec<Lock>,
}

impl AllLocks {
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }

    /// Release every held lock, surfacing the first failure.
    pub fn release(self) -> Result<()> {
        let mut first_err = None;
        for lock in self.locks {
            if let Err(err) = lock.release() {
                first_err.get_or_insert(err);
            }
        }
        match first_err {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

/// One queued waiter as reported by [`Mutex::queue_info`].
#[derive(Debug, Clone, Serialize)]
pub struct QueueEntry {
    pub lock_id: u64,
    pub owner: Option<String>,
    pub wait_time_ms: u64,
}

/// Point-in-time mutex state for monitoring.
#[derive(Debug, Clone, Serialize)]
pub struct MutexSnapshot {
    pub is_locked: bool,
    pub lock_duration_ms: u64,
    pub owner: Option<String>,
    /// Most recently issued lock id.
    pub lock_id: u64,
    pub queue_length: usize,
    pub is_disposed: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc as StdArc;
    use tokio_test::assert_ok;

    #[tokio::test]
    async fn uncontended_acquire_grants_immediately() {
        let mutex = Mutex::default();
        let lock = mutex.acquire().await.unwrap();
        assert!(mutex.is_locked());
        lock.release().unwrap();
        assert!(!mutex.is_locked());
    }

    #[tokio::test]
    async fn rejects_timeout_below_minimum() {
        let result = Mutex::new(MutexConfig {
            timeout: Duration::from_millis(99),
        });
        assert!(matches!(result, Err(Error::Validation(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn grants_strictly_in_arrival_order() {
        let mutex = StdArc::new(Mutex::default());
        let holder = mutex.acquire().await.unwrap();

        let order = StdArc::new(parking_lot::Mutex::new(Vec::new()));
        let mut handles = Vec::new();
        for i in 0..5u32 {
            let mutex = StdArc::clone(&mutex);
            let order = StdArc::clone(&order);
            handles.push(tokio::spawn(async move {
                let lock = mutex.acquire().await.unwrap();
                order.lock().push(i);
                lock.release().unwrap();
            }));
            // Let the task park itself in the queue before spawning the next.
            tokio::task::yield_now().await;
        }
        assert_eq!(mutex.queue_len(), 5);

        holder.release().unwrap();
        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(*order.lock(), vec![0, 1, 2, 3, 4]);
    }

    #[tokio::test(start_paused = true)]
    async fn timed_out_waiter_leaves_queue_without_disturbing_order() {
        let mutex = StdArc::new(
            Mutex::new(MutexConfig {
                timeout: Duration::from_millis(200),
            })
            .unwrap(),
        );
        let holder = mutex.acquire().await.unwrap();

        let early = {
            let mutex = StdArc::clone(&mutex);
            tokio::spawn(async move { mutex.acquire().await.map(|l| l.lock_id()) })
        };
        tokio::task::yield_now().await;
        tokio::time::sleep(Duration::from_millis(100)).await;

        let late = {
            let mutex = StdArc::clone(&mutex);
            tokio::spawn(async move { mutex.acquire().await.map(|l| l.lock_id()) })
        };
        tokio::task::yield_now().await;
        assert_eq!(mutex.queue_len(), 2);

        // Cross the first waiter's deadline but not the second's.
        tokio::time::sleep(Duration::from_millis(110)).await;
        let early_result = early.await.unwrap();
        assert!(matches!(early_result, Err(Error::AcquisitionTimeout(_))));
        assert_eq!(mutex.queue_len(), 1);

        holder.release().unwrap();
        let late_result = late.await.unwrap();
        assert!(late_result.is_ok());
    }

    #[tokio::test]
    async fn release_validates_lock_id() {
        let mutex = Mutex::default();
        let lock = mutex.acquire().await.unwrap();
        let current = lock.lock_id();

        assert!(matches!(
            mutex.release_id(current + 100),
            Err(Error::InvalidRelease)
        ));
        assert!(mutex.is_locked());

        mutex.release_id(current).unwrap();
        assert!(!mutex.is_locked());
        assert!(matches!(mutex.release_id(current), Err(Error::NotLocked)));
        drop(lock);
    }

    #[tokio::test(start_paused = true)]
    async fn dispose_rejects_queued_and_future_acquisitions() {
        let mutex = StdArc::new(Mutex::default());
        let _holder = mutex.acquire().await.unwrap();

        let queued = {
            let mutex = StdArc::clone(&mutex);
            tokio::spawn(async move { mutex.acquire().await.map(|_| ()) })
        };
        tokio::task::yield_now().await;
        assert_eq!(mutex.queue_len(), 1);

        mutex.dispose();
        mutex.dispose(); // idempotent

        let queued_result = queued.await.unwrap();
        assert!(matches!(queued_result, Err(Error::Disposed("Mutex"))));
        assert!(matches!(
            mutex.acquire().await,
            Err(Error::Disposed("Mutex"))
        ));
        assert!(mutex.is_disposed());
    }

    #[tokio::test]
    async fn with_lock_releases_on_completion() {
        let mutex = Mutex::default();
        let value = assert_ok!(mutex.with_lock(|| async { 41 + 1 }).await);
        assert_eq!(value, 42);
        assert!(!mutex.is_locked());
    }

    #[tokio::test]
    async fn acquire_all_returns_one_release_handle() {
        let mutexes = vec![Mutex::default(), Mutex::default(), Mutex::default()];
        let all = Mutex::acquire_all(&mutexes).await.unwrap();
        assert_eq!(all.len(), 3);
        assert!(mutexes.iter().all(Mutex::is_locked));

        all.release().unwrap();
        assert!(mutexes.iter().all(|m| !m.is_locked()));
    }

    #[tokio::test]
    async fn acquire_race_returns_first_obtained() {
        let a = Mutex::default();
        let b = Mutex::default();
        let _held = a.acquire().await.unwrap();

        let mutexes = [a, b];
        let lock = Mutex::acquire_race(&mutexes).await.unwrap();
        // The free mutex wins.
        assert!(mutexes[1].is_locked());
        lock.release().unwrap();
    }

    #[tokio::test]
    async fn acquire_race_rejects_empty_set() {
        assert!(matches!(
            Mutex::acquire_race(&[]).await,
            Err(Error::Validation(_))
        ));
    }

    #[tokio::test]
    async fn owner_tags_are_visible() {
        let mutex = Mutex::default();
        let lock = mutex.acquire_as("flush-loop").await.unwrap();
        assert_eq!(mutex.owner().as_deref(), Some("flush-loop"));
        let snap = mutex.snapshot();
        assert!(snap.is_locked);
        assert_eq!(snap.owner.as_deref(), Some("flush-loop"));
        lock.release().unwrap();
    }
}
