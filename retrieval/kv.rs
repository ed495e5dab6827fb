use std::{collections::HashMap, sync::Arc, time::Duration};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;

/// Errors surfaced by the shared key-value store.
///
/// Callers in this crate absorb these locally: the cache treats them as a
/// miss, the limiter fails open. They are never propagated to students.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The store could not be reached or timed out.
    #[error("key-value store unavailable: {0}")]
    Unavailable(String),
}

/// Time source seam so TTL expiry and bucket refill are testable.
pub trait Clock: Send + Sync {
    /// Current wall-clock time.
    fn now(&self) -> DateTime<Utc>;

    /// Current time as fractional seconds since the Unix epoch.
    fn epoch_secs(&self) -> f64 {
        let now = self.now();
        now.timestamp() as f64 + f64::from(now.timestamp_subsec_millis()) / 1000.0
    }
}

/// Production clock reading the system time.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Manually advanced clock for tests.
#[derive(Debug)]
pub struct ManualClock {
    offset_secs: Mutex<f64>,
    base: DateTime<Utc>,
}

impl ManualClock {
    /// Starts the clock at the current system time with zero offset.
    #[must_use]
    pub fn new() -> Self {
        Self {
            offset_secs: Mutex::new(0.0),
            base: Utc::now(),
        }
    }

    /// Advances the clock by `secs` seconds.
    pub fn advance(&self, secs: f64) {
        *self.offset_secs.lock() += secs;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        let offset = *self.offset_secs.lock();
        self.base + chrono::Duration::milliseconds((offset * 1000.0) as i64)
    }
}

/// Shared, multi-tenant key-value store: plain TTL-bound entries for the
/// response cache plus an atomic leaky-bucket token primitive for the rate
/// limiter. In production this is a networked store; every mutation of a
/// bucket must happen in a single round-trip.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Fetches a value; `None` when absent or expired.
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Stores a value with a time-to-live.
    async fn set_with_ttl(&self, key: &str, value: String, ttl: Duration)
        -> Result<(), StoreError>;

    /// Atomically refills and takes one token from the named bucket.
    ///
    /// The bucket refills at `refill_per_sec` up to `capacity`; a first call
    /// initializes it full. Returns whether a token was available. Idle
    /// buckets expire after `idle_expiry` of no calls.
    async fn take_token(
        &self,
        bucket: &str,
        capacity: f64,
        refill_per_sec: f64,
        idle_expiry: Duration,
    ) -> Result<bool, StoreError>;
}

#[derive(Debug, Clone)]
struct StoredValue {
    value: String,
    expires_at: f64,
}

#[derive(Debug, Clone, Copy)]
struct BucketState {
    tokens: f64,
    last_refill: f64,
    expires_at: f64,
}

/// In-memory store for wiring without a shared backend and for tests. The
/// bucket mutation runs under one lock, the in-process analog of the atomic
/// script a networked store would execute.
pub struct MemoryKeyValueStore {
    clock: Arc<dyn Clock>,
    entries: Mutex<HashMap<String, StoredValue>>,
    buckets: Mutex<HashMap<String, BucketState>>,
}

impl MemoryKeyValueStore {
    /// Creates a store reading the system clock.
    #[must_use]
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Creates a store with an injected clock.
    #[must_use]
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            entries: Mutex::new(HashMap::new()),
            buckets: Mutex::new(HashMap::new()),
        }
    }
}

impl Default for MemoryKeyValueStore {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for MemoryKeyValueStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryKeyValueStore")
            .field("entries", &self.entries.lock().len())
            .field("buckets", &self.buckets.lock().len())
            .finish()
    }
}

#[async_trait]
impl KeyValueStore for MemoryKeyValueStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let now = self.clock.epoch_secs();
        let mut entries = self.entries.lock();
        match entries.get(key) {
            Some(stored) if stored.expires_at > now => Ok(Some(stored.value.clone())),
            Some(_) => {
                entries.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn set_with_ttl(
        &self,
        key: &str,
        value: String,
        ttl: Duration,
    ) -> Result<(), StoreError> {
        let expires_at = self.clock.epoch_secs() + ttl.as_secs_f64();
        self.entries
            .lock()
            .insert(key.to_owned(), StoredValue { value, expires_at });
        Ok(())
    }

    async fn take_token(
        &self,
        bucket: &str,
        capacity: f64,
        refill_per_sec: f64,
        idle_expiry: Duration,
    ) -> Result<bool, StoreError> {
        let now = self.clock.epoch_secs();
        let mut buckets = self.buckets.lock();

        let state = buckets.get(bucket).copied().filter(|s| s.expires_at > now);
        let (mut tokens, last_refill) =
            state.map_or((capacity, now), |s| (s.tokens, s.last_refill));

        let elapsed = (now - last_refill).max(0.0);
        tokens = (tokens + elapsed * refill_per_sec).min(capacity);

        let allowed = tokens >= 1.0;
        if allowed {
            tokens -= 1.0;
        }

        buckets.insert(
            bucket.to_owned(),
            BucketState {
                tokens,
                last_refill: now,
                expires_at: now + idle_expiry.as_secs_f64(),
            },
        );
        Ok(allowed)
    }
}
