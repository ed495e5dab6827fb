use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use shared_logging::LogLevel;
use uuid::Uuid;

use crate::{
    backend::{
        BackendError, ChatTurn, ChunkHit, DirectAnswer, HttpRetrievalBackend, QueryOutcome,
        RetrievalBackend,
    },
    cache::RetrievalCache,
    condense::{condense_prompt, synthesis_prompt},
    kv::KeyValueStore,
    limiter::{RateLimitConfig, RateLimiter},
    telemetry::RetrievalTelemetry,
};

/// Identity a rate-limit bucket is keyed on: the authenticated student when
/// known, the client address otherwise.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallerIdentity {
    /// Authenticated user id.
    User(Uuid),
    /// Unauthenticated caller address.
    Ip(String),
}

impl CallerIdentity {
    /// Store key for this caller's bucket.
    #[must_use]
    pub fn bucket_key(&self) -> String {
        match self {
            Self::User(id) => format!("rl:rag:u:{id}"),
            Self::Ip(ip) => format!("rl:rag:ip:{ip}"),
        }
    }
}

/// Resolves chunk file names back to known document ids so supporting
/// sources can link to the page a student should open.
#[async_trait]
pub trait DocumentDirectory: Send + Sync {
    /// Document id for a chunk file name, if the file maps to a known document.
    async fn document_id_for(&self, file_name: &str) -> Option<Uuid>;
}

/// Client configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalConfig {
    /// Base URL of the RAG backend.
    pub base_url: String,
    /// Per-request timeout in seconds.
    pub timeout_secs: u64,
    /// Whether responses are cached at all.
    pub cache_enabled: bool,
    /// Cache entry time-to-live in seconds.
    pub cache_ttl_secs: u64,
    /// Admission limits for backend-bound calls.
    pub rate_limit: RateLimitConfig,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8001".to_owned(),
            timeout_secs: 60,
            cache_enabled: true,
            cache_ttl_secs: 3600,
            rate_limit: RateLimitConfig::default(),
        }
    }
}

/// Errors surfaced by client operations.
#[derive(Debug, thiserror::Error)]
pub enum RetrievalError {
    /// The caller exhausted its admission budget; retryable after a short delay.
    #[error("too many requests — please slow down")]
    RateLimited,
    /// The backend call itself failed.
    #[error(transparent)]
    Backend(#[from] BackendError),
}

#[derive(Debug, Serialize)]
struct RetrieveParams<'a> {
    query: &'a str,
    collection: &'a str,
    top_k: usize,
}

#[derive(Debug, Serialize)]
struct QueryParams<'a> {
    question: &'a str,
    collection: &'a str,
    top_k: usize,
}

/// Facade over the RAG backend: every operation is admission-checked, and
/// history-free `retrieve`/`query` calls go through the content-addressed
/// cache. Calls carrying chat history bypass the cache: their answers are
/// context-dependent and not safely reusable.
pub struct RetrievalClient {
    backend: Arc<dyn RetrievalBackend>,
    cache: RetrievalCache,
    limiter: RateLimiter,
    telemetry: Option<RetrievalTelemetry>,
}

impl RetrievalClient {
    /// Wraps an existing backend with caching and admission control.
    #[must_use]
    pub fn new(
        backend: Arc<dyn RetrievalBackend>,
        store: Arc<dyn KeyValueStore>,
        config: &RetrievalConfig,
    ) -> Self {
        let cache = RetrievalCache::new(
            Arc::clone(&store),
            Duration::from_secs(config.cache_ttl_secs),
            config.cache_enabled,
        );
        let limiter = RateLimiter::new(store, config.rate_limit);
        Self {
            backend,
            cache,
            limiter,
            telemetry: None,
        }
    }

    /// Builds the HTTP backend from config and wraps it.
    pub fn connect(
        config: &RetrievalConfig,
        store: Arc<dyn KeyValueStore>,
    ) -> Result<Self, RetrievalError> {
        let backend =
            HttpRetrievalBackend::new(&config.base_url, Duration::from_secs(config.timeout_secs))?;
        Ok(Self::new(Arc::new(backend), store, config))
    }

    /// Attaches telemetry.
    #[must_use]
    pub fn with_telemetry(mut self, telemetry: RetrievalTelemetry) -> Self {
        self.telemetry = Some(telemetry);
        self
    }

    async fn admit(&self, caller: &CallerIdentity) -> Result<(), RetrievalError> {
        if self.limiter.check(caller).await {
            Ok(())
        } else {
            if let Some(tel) = &self.telemetry {
                tel.log(
                    LogLevel::Info,
                    "retrieval.rate_limited",
                    json!({ "bucket": caller.bucket_key() }),
                );
            }
            Err(RetrievalError::RateLimited)
        }
    }

    /// Ranked-chunk retrieval, cached by (query, collection, top_k).
    pub async fn retrieve(
        &self,
        caller: &CallerIdentity,
        query: &str,
        collection: &str,
        top_k: usize,
    ) -> Result<Vec<ChunkHit>, RetrievalError> {
        self.admit(caller).await?;
        let params = RetrieveParams {
            query,
            collection,
            top_k,
        };
        if let Some(hit) = self.cache.get::<_, Vec<ChunkHit>>("retrieve", &params).await {
            return Ok(hit);
        }
        let chunks = self.backend.retrieve(query, collection, top_k).await?;
        self.cache.put("retrieve", &params, &chunks).await;
        Ok(chunks)
    }

    /// Retrieval-plus-synthesis. Without history the backend answers in one
    /// shot and the result is cached. With history, the follow-up is first
    /// condensed into a standalone query (used only for retrieval), and the
    /// final answer is synthesized from the original question, a short
    /// recent-history block, and the retrieved context.
    pub async fn query(
        &self,
        caller: &CallerIdentity,
        question: &str,
        collection: &str,
        top_k: usize,
        history: &[ChatTurn],
    ) -> Result<QueryOutcome, RetrievalError> {
        self.admit(caller).await?;

        if history.is_empty() {
            let params = QueryParams {
                question,
                collection,
                top_k,
            };
            if let Some(hit) = self.cache.get::<_, QueryOutcome>("query", &params).await {
                return Ok(hit);
            }
            let outcome = self.backend.query(question, collection, top_k).await?;
            self.cache.put("query", &params, &outcome).await;
            return Ok(outcome);
        }

        let condensed = self
            .backend
            .query_direct(&condense_prompt(question, history), None)
            .await?
            .answer
            .trim()
            .to_owned();
        tracing::debug!(original = question, condensed, "condensed follow-up for retrieval");

        let chunks = self.backend.retrieve(&condensed, collection, top_k).await?;
        let context = chunks
            .iter()
            .map(|chunk| chunk.content.as_str())
            .collect::<Vec<_>>()
            .join("\n\n---\n\n");
        let synthesized = self
            .backend
            .query_direct(&synthesis_prompt(question, history, &context), None)
            .await?;

        if let Some(tel) = &self.telemetry {
            tel.log(
                LogLevel::Info,
                "retrieval.query.condensed",
                json!({ "sources": chunks.len() }),
            );
        }
        Ok(QueryOutcome {
            answer: synthesized.answer.trim().to_owned(),
            sources: chunks,
            condensed_question: Some(condensed),
        })
    }

    /// Direct LLM completion; never cached.
    pub async fn query_direct(
        &self,
        caller: &CallerIdentity,
        question: &str,
        system_prompt: Option<&str>,
    ) -> Result<DirectAnswer, RetrievalError> {
        self.admit(caller).await?;
        Ok(self.backend.query_direct(question, system_prompt).await?)
    }

    /// Transcribes a handwritten answer image.
    pub async fn ocr(
        &self,
        caller: &CallerIdentity,
        image_base64: &str,
        prompt: &str,
    ) -> Result<String, RetrievalError> {
        self.admit(caller).await?;
        Ok(self.backend.ocr(image_base64, prompt).await?)
    }

    /// Whether the backend currently answers its liveness probe.
    pub async fn healthy(&self) -> bool {
        self.backend.healthy().await
    }
}

impl std::fmt::Debug for RetrievalClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetrievalClient")
            .field("cache", &self.cache)
            .field("limiter", &self.limiter)
            .finish()
    }
}
