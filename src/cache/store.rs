//! # Cache Store
//!
//! Owned in-memory store under an explicit byte quota. Values at or above
//! the compression threshold are stored zstd-compressed when that
//! actually saves space; decompression failures retire the record rather
//! than surfacing corrupt data. A background task retires records past
//! their retention windows and evicts in batches once usage crosses the
//! configured threshold.

use crate::constants::cache::{
    CLEANUP_INTERVAL, COMPRESSION_THRESHOLD, DEFAULT_TOTAL_QUOTA, EVICTION_BATCH_SIZE,
    KEY_MAX_LENGTH, KEY_MIN_LENGTH, MAX_AGE, MAX_VALUE_SIZE, UNUSED_AGE, USAGE_THRESHOLD,
};
use crate::errors::{Error, Result};
use crate::validation::validate_ordered;
use parking_lot::Mutex as StateLock;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Options for a [`Cache`].
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Byte cap on a single stored value (before compression).
    pub max_value_size: usize,
    /// Byte quota across all stored values (after compression).
    pub total_quota: usize,
    /// Records older than this are retired regardless of use.
    pub max_age: Duration,
    /// Records unread for this long are retired.
    pub unused_age: Duration,
    /// Cadence of the background retention pass.
    pub cleanup_interval: Duration,
    /// Fraction of the quota at which batch eviction starts.
    pub usage_threshold: f64,
    /// Records evicted per batch, least recently accessed first.
    pub eviction_batch_size: usize,
    /// Values at or above this size are candidates for compression.
    pub compression_threshold: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_value_size: MAX_VALUE_SIZE,
            total_quota: DEFAULT_TOTAL_QUOTA,
            max_age: MAX_AGE,
            unused_age: UNUSED_AGE,
            cleanup_interval: CLEANUP_INTERVAL,
            usage_threshold: USAGE_THRESHOLD,
            eviction_batch_size: EVICTION_BATCH_SIZE,
            compression_threshold: COMPRESSION_THRESHOLD,
        }
    }
}

impl CacheConfig {
    /// Validate configuration parameters
    pub fn validate(&self) -> Result<()> {
        validate_ordered(
            self.total_quota,
            "options.total_quota",
            self.max_value_size,
            "options.max_value_size",
        )?;
        if !(0.0..=1.0).contains(&self.usage_threshold) || self.usage_threshold == 0.0 {
            return Err(Error::Validation(
                "options.usage_threshold must be within (0, 1]".to_string(),
            ));
        }
        if self.eviction_batch_size == 0 {
            return Err(Error::Validation(
                "options.eviction_batch_size must be a positive integer".to_string(),
            ));
        }
        Ok(())
    }
}

enum StoredData {
    Raw(Vec<u8>),
    Compressed { data: Vec<u8>, original_len: usize },
}

impl StoredData {
    fn stored_len(&self) -> usize {
        match self {
            StoredData::Raw(data) => data.len(),
            StoredData::Compressed { data, .. } => data.len(),
        }
    }
}

struct Record {
    data: StoredData,
    created_at: Instant,
    last_access: Instant,
}

struct State {
    records: HashMap<String, Record>,
    used_bytes: usize,
}

struct Inner {
    config: CacheConfig,
    state: StateLock<State>,
    disposed: AtomicBool,
}

impl Inner {
    fn is_expired(&self, record: &Record, now: Instant) -> bool {
        now.duration_since(record.created_at) >= self.config.max_age
            || now.duration_since(record.last_access) >= self.config.unused_age
    }

    /// Retire expired records, then evict batches while usage sits above
    /// the threshold.
    fn run_retention(&self) {
        let now = Instant::now();
        let mut state = self.state.lock();

        let expired: Vec<String> = state
            .records
            .iter()
            .filter(|(_, record)| self.is_expired(record, now))
            .map(|(key, _)| key.clone())
            .collect();
        for key in &expired {
            if let Some(record) = state.records.remove(key) {
                state.used_bytes -= record.data.stored_len();
            }
        }
        if !expired.is_empty() {
            debug!(retired = expired.len(), "Cache retention retired records");
        }

        let watermark =
            (self.config.total_quota as f64 * self.config.usage_threshold) as usize;
        while state.used_bytes > watermark && !state.records.is_empty() {
            Self::evict_batch(&mut state, self.config.eviction_batch_size);
        }
    }

    /// Remove up to `batch_size` records, least recently accessed first.
    fn evict_batch(state: &mut State, batch_size: usize) {
        let mut keys: Vec<(String, Instant)> = state
            .records
            .iter()
            .map(|(key, record)| (key.clone(), record.last_access))
            .collect();
        keys.sort_by_key(|(_, last_access)| *last_access);

        for (key, _) in keys.into_iter().take(batch_size) {
            if let Some(record) = state.records.remove(&key) {
                state.used_bytes -= record.data.stored_len();
            }
        }
    }
}

/// Quota-bounded cache with TTL retention and value compression.
pub struct Cache {
    inner: Arc<Inner>,
    cleanup_task: StateLock<Option<JoinHandle<()>>>,
}

impl Cache {
    /// Create a cache and start its retention task.
    pub fn new(config: CacheConfig) -> Result<Self> {
        config.validate()?;
        let inner = Arc::new(Inner {
            config,
            state: StateLock::new(State {
                records: HashMap::new(),
                used_bytes: 0,
            }),
            disposed: AtomicBool::new(false),
        });

        let cleanup = {
            let inner = Arc::clone(&inner);
            let period = inner.config.cleanup_interval;
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(period);
                ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
                // The immediate first tick is a no-op on an empty cache.
                loop {
                    ticker.tick().await;
                    inner.run_retention();
                }
            })
        };

        Ok(Self {
            inner,
            cleanup_task: StateLock::new(Some(cleanup)),
        })
    }

    fn check_disposed(&self) -> Result<()> {
        if self.inner.disposed.load(Ordering::Acquire) {
            Err(Error::Disposed("Cache"))
        } else {
            Ok(())
        }
    }

    fn validate_key(key: &str) -> Result<()> {
        if key.len() < KEY_MIN_LENGTH || key.len() > KEY_MAX_LENGTH {
            return Err(Error::Validation(format!(
                "cache key length must be within {KEY_MIN_LENGTH}..={KEY_MAX_LENGTH}"
            )));
        }
        if key.chars().any(|c| c.is_control() || c.is_whitespace()) {
            return Err(Error::Validation(
                "cache key must not contain whitespace or control characters".to_string(),
            ));
        }
        Ok(())
    }

    /// Store a value, compressing it when that saves space and evicting
    /// least-recently-accessed records if the quota demands it.
    pub fn set(&self, key: &str, value: &[u8]) -> Result<()> {
        self.check_disposed()?;
        Self::validate_key(key)?;
        if value.len() > self.inner.config.max_value_size {
            return Err(Error::EntryTooLarge {
                size: value.len(),
                max_total: self.inner.config.max_value_size,
            });
        }

        let data = self.maybe_compress(value);
        let stored_len = data.stored_len();

        let now = Instant::now();
        let mut state = self.inner.state.lock();

        // Replacing a key returns its bytes to the budget first.
        if let Some(previous) = state.records.remove(key) {
            state.used_bytes -= previous.data.stored_len();
        }

        while state.used_bytes + stored_len > self.inner.config.total_quota
            && !state.records.is_empty()
        {
            Inner::evict_batch(&mut state, self.inner.config.eviction_batch_size);
        }
        if state.used_bytes + stored_len > self.inner.config.total_quota {
            return Err(Error::EntryTooLarge {
                size: stored_len,
                max_total: self.inner.config.total_quota,
            });
        }

        state.records.insert(
            key.to_string(),
            Record {
                data,
                created_at: now,
                last_access: now,
            },
        );
        state.used_bytes += stored_len;
        Ok(())
    }

    /// Fetch a value, refreshing its last-access time. Expired records
    /// are retired on the way out.
    pub fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        self.check_disposed()?;
        Self::validate_key(key)?;

        let now = Instant::now();
        let mut state = self.inner.state.lock();

        let fetched = match state.records.get_mut(key) {
            None => return Ok(None),
            Some(record) => {
                if self.inner.is_expired(record, now) {
                    None
                } else {
                    record.last_access = now;
                    match &record.data {
                        StoredData::Raw(data) => Some((data.clone(), None)),
                        StoredData::Compressed { data, original_len } => {
                            Some((data.clone(), Some(*original_len)))
                        }
                    }
                }
            }
        };

        match fetched {
            None => {
                // Expired: retire the record on the way out.
                if let Some(record) = state.records.remove(key) {
                    state.used_bytes -= record.data.stored_len();
                }
                Ok(None)
            }
            Some((data, None)) => Ok(Some(data)),
            Some((data, Some(original_len))) => {
                match zstd::bulk::decompress(&data, original_len) {
                    Ok(value) => Ok(Some(value)),
                    Err(err) => {
                        // Corrupt record: retire it instead of surfacing
                        // garbage.
                        warn!(key, error = %err, "Cache decompression failed, record removed");
                        if let Some(record) = state.records.remove(key) {
                            state.used_bytes -= record.data.stored_len();
                        }
                        Ok(None)
                    }
                }
            }
        }
    }

    /// Remove one record; returns whether it existed.
    pub fn remove(&self, key: &str) -> Result<bool> {
        self.check_disposed()?;
        Self::validate_key(key)?;
        let mut state = self.inner.state.lock();
        match state.records.remove(key) {
            Some(record) => {
                state.used_bytes -= record.data.stored_len();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Drop every record.
    pub fn clear(&self) -> Result<()> {
        self.check_disposed()?;
        let mut state = self.inner.state.lock();
        state.records.clear();
        state.used_bytes = 0;
        Ok(())
    }

    /// Stop the retention task and drop all records. Idempotent.
    pub fn dispose(&self) {
        self.inner.disposed.store(true, Ordering::Release);
        if let Some(task) = self.cleanup_task.lock().take() {
            task.abort();
        }
        let mut state = self.inner.state.lock();
        state.records.clear();
        state.used_bytes = 0;
    }

    /// Occupancy snapshot for monitoring.
    pub fn stats(&self) -> CacheStats {
        let state = self.inner.state.lock();
        CacheStats {
            items: state.records.len(),
            used_bytes: state.used_bytes,
            total_quota: self.inner.config.total_quota,
            usage: state.used_bytes as f64 / self.inner.config.total_quota as f64,
            is_disposed: self.inner.disposed.load(Ordering::Acquire),
        }
    }

    fn maybe_compress(&self, value: &[u8]) -> StoredData {
        if value.len() < self.inner.config.compression_threshold {
            return StoredData::Raw(value.to_vec());
        }
        match zstd::bulk::compress(value, 0) {
            Ok(compressed) if compressed.len() < value.len() => StoredData::Compressed {
                data: compressed,
                original_len: value.len(),
            },
            Ok(_) => StoredData::Raw(value.to_vec()),
            Err(err) => {
                // Compression is an optimization; storing raw is always valid.
                warn!(error = %err, "Cache compression failed, storing raw");
                StoredData::Raw(value.to_vec())
            }
        }
    }
}

impl Drop for Cache {
    fn drop(&mut self) {
        if let Some(task) = self.cleanup_task.lock().take() {
            task.abort();
        }
    }
}

impl std::fmt::Debug for Cache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let stats = self.stats();
        f.debug_struct("Cache")
            .field("items", &stats.items)
            .field("used_bytes", &stats.used_bytes)
            .field("disposed", &stats.is_disposed)
            .finish()
    }
}

/// Snapshot returned by [`Cache::stats`].
#[derive(Debug, Clone, Serialize)]
pub struct CacheStats {
    pub items: usize,
    pub used_bytes: usize,
    pub total_quota: usize,
    pub usage: f64,
    pub is_disposed: bool,
}
