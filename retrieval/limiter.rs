use std::{sync::Arc, time::Duration};

use serde::{Deserialize, Serialize};

use crate::{client::CallerIdentity, kv::KeyValueStore};

/// Admission limits for backend-bound calls. `requests_per_minute == 0`
/// disables limiting entirely.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Sustained request budget per minute per caller.
    pub requests_per_minute: u32,
    /// Burst allowance (bucket capacity).
    pub burst: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests_per_minute: 30,
            burst: 5,
        }
    }
}

/// Leaky-bucket rate limiter keyed by caller identity.
///
/// Bucket state lives in the shared store and is mutated through the store's
/// atomic `take_token` primitive, so concurrent callers sharing one bucket
/// never race. A store failure fails open: an unreachable store must not
/// lock students out.
pub struct RateLimiter {
    store: Arc<dyn KeyValueStore>,
    config: RateLimitConfig,
}

/// Idle buckets are dropped from the store after this long without a call.
const BUCKET_IDLE_EXPIRY: Duration = Duration::from_secs(120);

impl RateLimiter {
    /// Creates a limiter over the shared store.
    #[must_use]
    pub fn new(store: Arc<dyn KeyValueStore>, config: RateLimitConfig) -> Self {
        Self { store, config }
    }

    /// Whether the caller may proceed with one backend-bound request.
    pub async fn check(&self, caller: &CallerIdentity) -> bool {
        if self.config.requests_per_minute == 0 {
            return true;
        }
        let refill_per_sec = f64::from(self.config.requests_per_minute) / 60.0;
        let key = caller.bucket_key();
        match self
            .store
            .take_token(
                &key,
                f64::from(self.config.burst),
                refill_per_sec,
                BUCKET_IDLE_EXPIRY,
            )
            .await
        {
            Ok(allowed) => {
                if !allowed {
                    tracing::info!(bucket = %key, "rate-limited");
                }
                allowed
            }
            Err(err) => {
                tracing::warn!(bucket = %key, %err, "rate-limiter store error, allowing request");
                true
            }
        }
    }
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("config", &self.config)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::{ManualClock, MemoryKeyValueStore, StoreError};
    use async_trait::async_trait;
    use uuid::Uuid;

    struct FailingStore;

    #[async_trait]
    impl KeyValueStore for FailingStore {
        async fn get(&self, _key: &str) -> Result<Option<String>, StoreError> {
            Err(StoreError::Unavailable("down".to_owned()))
        }

        async fn set_with_ttl(
            &self,
            _key: &str,
            _value: String,
            _ttl: Duration,
        ) -> Result<(), StoreError> {
            Err(StoreError::Unavailable("down".to_owned()))
        }

        async fn take_token(
            &self,
            _bucket: &str,
            _capacity: f64,
            _refill_per_sec: f64,
            _idle_expiry: Duration,
        ) -> Result<bool, StoreError> {
            Err(StoreError::Unavailable("down".to_owned()))
        }
    }

    fn limiter_with_clock(clock: Arc<ManualClock>, config: RateLimitConfig) -> RateLimiter {
        RateLimiter::new(Arc::new(MemoryKeyValueStore::with_clock(clock)), config)
    }

    #[tokio::test]
    async fn burst_then_reject_then_refill() {
        let clock = Arc::new(ManualClock::new());
        let limiter = limiter_with_clock(
            clock.clone(),
            RateLimitConfig {
                requests_per_minute: 30,
                burst: 5,
            },
        );
        let caller = CallerIdentity::User(Uuid::new_v4());

        for _ in 0..5 {
            assert!(limiter.check(&caller).await);
        }
        assert!(!limiter.check(&caller).await);

        // 30 rpm refills at 0.5 tokens/sec; two seconds buys one request back.
        clock.advance(2.0);
        assert!(limiter.check(&caller).await);
        assert!(!limiter.check(&caller).await);
    }

    #[tokio::test]
    async fn separate_callers_have_separate_buckets() {
        let clock = Arc::new(ManualClock::new());
        let limiter = limiter_with_clock(
            clock,
            RateLimitConfig {
                requests_per_minute: 30,
                burst: 1,
            },
        );
        let alice = CallerIdentity::User(Uuid::new_v4());
        let bob = CallerIdentity::Ip("10.0.0.9".to_owned());

        assert!(limiter.check(&alice).await);
        assert!(!limiter.check(&alice).await);
        assert!(limiter.check(&bob).await);
    }

    #[tokio::test]
    async fn zero_rpm_disables_limiting() {
        let limiter = RateLimiter::new(
            Arc::new(MemoryKeyValueStore::new()),
            RateLimitConfig {
                requests_per_minute: 0,
                burst: 0,
            },
        );
        let caller = CallerIdentity::Ip("198.51.100.7".to_owned());
        for _ in 0..50 {
            assert!(limiter.check(&caller).await);
        }
    }

    #[tokio::test]
    async fn store_failure_fails_open() {
        let limiter = RateLimiter::new(Arc::new(FailingStore), RateLimitConfig::default());
        let caller = CallerIdentity::User(Uuid::new_v4());
        assert!(limiter.check(&caller).await);
    }
}
