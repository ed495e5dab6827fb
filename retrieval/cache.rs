use std::{fmt::Write as _, sync::Arc, time::Duration};

use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::kv::KeyValueStore;

/// Content-addressed cache for backend responses.
///
/// Keys are `rag_cache:{op}:{digest}` where the digest is the first 16 hex
/// characters of the SHA-256 of the canonical JSON of the request parameters
/// (object keys sorted). Store failures are absorbed: a failed read is a
/// miss, a failed write is a no-op.
pub struct RetrievalCache {
    store: Arc<dyn KeyValueStore>,
    ttl: Duration,
    enabled: bool,
}

impl RetrievalCache {
    /// Creates a cache over the shared store.
    #[must_use]
    pub fn new(store: Arc<dyn KeyValueStore>, ttl: Duration, enabled: bool) -> Self {
        Self {
            store,
            ttl,
            enabled,
        }
    }

    /// Deterministic cache key for an operation and its parameters.
    ///
    /// Serializing through `serde_json::Value` sorts object keys, so two
    /// requests with identical parameters always share a key regardless of
    /// field order.
    #[must_use]
    pub fn cache_key<P: Serialize>(operation: &str, params: &P) -> String {
        let canonical = serde_json::to_value(params)
            .and_then(|value| serde_json::to_string(&value))
            .unwrap_or_default();
        let digest = Sha256::digest(canonical.as_bytes());
        let mut hex = String::with_capacity(16);
        for byte in digest.iter().take(8) {
            let _ = write!(hex, "{byte:02x}");
        }
        format!("rag_cache:{operation}:{hex}")
    }

    /// Looks up a cached response, deserializing the stored JSON.
    pub async fn get<P: Serialize, T: serde::de::DeserializeOwned>(
        &self,
        operation: &str,
        params: &P,
    ) -> Option<T> {
        if !self.enabled {
            return None;
        }
        let key = Self::cache_key(operation, params);
        match self.store.get(&key).await {
            Ok(Some(raw)) => match serde_json::from_str(&raw) {
                Ok(value) => {
                    tracing::debug!(%key, "retrieval cache hit");
                    Some(value)
                }
                Err(err) => {
                    tracing::warn!(%key, %err, "retrieval cache entry unreadable, treating as miss");
                    None
                }
            },
            Ok(None) => {
                tracing::debug!(%key, "retrieval cache miss");
                None
            }
            Err(err) => {
                tracing::warn!(%key, %err, "retrieval cache read failed (non-fatal)");
                None
            }
        }
    }

    /// Stores a response under the derived key.
    pub async fn put<P: Serialize, T: Serialize>(&self, operation: &str, params: &P, value: &T) {
        if !self.enabled {
            return;
        }
        let key = Self::cache_key(operation, params);
        let Ok(raw) = serde_json::to_string(value) else {
            return;
        };
        if let Err(err) = self.store.set_with_ttl(&key, raw, self.ttl).await {
            tracing::warn!(%key, %err, "retrieval cache write failed (non-fatal)");
        }
    }
}

impl std::fmt::Debug for RetrievalCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetrievalCache")
            .field("ttl", &self.ttl)
            .field("enabled", &self.enabled)
            .finish()
    }
}
