use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use moka::future::Cache;
use moka::Expiry;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DedupStoreError {
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),
    #[error("stored value for {key} is not a timestamp: {value}")]
    InvalidValue { key: String, value: String },
    #[error("dedup store is unavailable")]
    Unavailable,
}

/// A keyed TTL cache of last-seen timestamps. Every call names its namespace, so a single
/// store can be shared by concurrent checks for different traffic classes.
#[async_trait]
pub trait DedupStore: Send + Sync {
    async fn get_timestamp(&self, namespace: &str, key: &str)
        -> Result<Option<i64>, DedupStoreError>;

    async fn set_timestamp(
        &self,
        namespace: &str,
        key: &str,
        value: i64,
        ttl: Duration,
    ) -> Result<(), DedupStoreError>;
}

/// In-process store used for local runs and tests. Entries are evicted once their own TTL
/// has passed, and the store never holds more than `max_capacity` records.
pub struct MemoryDedupStore {
    cache: Cache<String, StoredTimestamp>,
    unavailable: AtomicBool,
    calls: AtomicUsize,
}

#[derive(Debug, Clone, Copy)]
struct StoredTimestamp {
    value: i64,
    ttl: Duration,
}

/// Each record expires after the TTL it was last written with.
struct PerEntryTtl;

impl Expiry<String, StoredTimestamp> for PerEntryTtl {
    fn expire_after_create(
        &self,
        _key: &String,
        value: &StoredTimestamp,
        _created_at: std::time::Instant,
    ) -> Option<Duration> {
        Some(value.ttl)
    }

    fn expire_after_update(
        &self,
        _key: &String,
        value: &StoredTimestamp,
        _updated_at: std::time::Instant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        Some(value.ttl)
    }
}

impl MemoryDedupStore {
    pub const DEFAULT_MAX_CAPACITY: u64 = 1_000_000;

    pub fn new() -> Self {
        Self::with_max_capacity(Self::DEFAULT_MAX_CAPACITY)
    }

    pub fn with_max_capacity(max_capacity: u64) -> Self {
        let cache = Cache::builder()
            .max_capacity(max_capacity)
            .expire_after(PerEntryTtl)
            .build();

        Self {
            cache,
            unavailable: AtomicBool::new(false),
            calls: AtomicUsize::new(0),
        }
    }

    /// Make every subsequent call fail (or stop doing so).
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Number of get and set calls seen so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Records currently held, after running any pending evictions.
    pub async fn entry_count(&self) -> u64 {
        self.cache.run_pending_tasks().await;
        self.cache.entry_count()
    }

    fn record_call(&self) -> Result<(), DedupStoreError> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        if self.unavailable.load(Ordering::SeqCst) {
            Err(DedupStoreError::Unavailable)
        } else {
            Ok(())
        }
    }
}

impl Default for MemoryDedupStore {
    fn default() -> Self {
        Self::new()
    }
}

fn entry_key(namespace: &str, key: &str) -> String {
    format!("{namespace}:{key}")
}

#[async_trait]
impl DedupStore for MemoryDedupStore {
    async fn get_timestamp(
        &self,
        namespace: &str,
        key: &str,
    ) -> Result<Option<i64>, DedupStoreError> {
        self.record_call()?;

        Ok(self
            .cache
            .get(&entry_key(namespace, key))
            .await
            .map(|stored| stored.value))
    }

    async fn set_timestamp(
        &self,
        namespace: &str,
        key: &str,
        value: i64,
        ttl: Duration,
    ) -> Result<(), DedupStoreError> {
        self.record_call()?;

        self.cache
            .insert(entry_key(namespace, key), StoredTimestamp { value, ttl })
            .await;

        Ok(())
    }
}
