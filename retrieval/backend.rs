use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Errors from the RAG backend boundary. Transport failures and timeouts are
/// `Unavailable`; HTTP error statuses carry their code; undecodable bodies
/// are `Malformed`. Nothing here is swallowed silently; callers decide
/// whether a failed tier falls through or surfaces.
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    /// The backend could not be reached or the request timed out.
    #[error("retrieval backend unavailable: {0}")]
    Unavailable(String),
    /// The backend answered with an error status.
    #[error("retrieval backend returned {code}: {message}")]
    Status {
        /// HTTP status code.
        code: u16,
        /// Response body or reason phrase.
        message: String,
    },
    /// The backend answered with a body this client cannot decode.
    #[error("retrieval backend response malformed: {0}")]
    Malformed(String),
}

/// One side of a tutoring conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    /// The student's turn (wire value `user`).
    User,
    /// The tutor's turn (wire value `assistant`).
    Assistant,
}

/// One prior turn of a multi-turn exchange.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatTurn {
    /// Speaker.
    pub role: ChatRole,
    /// Turn text.
    pub content: String,
}

impl ChatTurn {
    /// Convenience constructor for a student turn.
    #[must_use]
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }

    /// Convenience constructor for a tutor turn.
    #[must_use]
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: content.into(),
        }
    }
}

/// Metadata attached to a retrieved chunk by the ingestion pipeline.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChunkMetadata {
    /// Source file name, when the chunk came from an ingested document.
    #[serde(default)]
    pub file_name: Option<String>,
    /// Page the chunk was extracted from.
    #[serde(default)]
    pub page_number: Option<u32>,
    /// Any further producer-specific fields.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// One ranked retrieval result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkHit {
    /// Relevance score assigned by the backend.
    #[serde(default)]
    pub score: f32,
    /// Chunk text.
    pub content: String,
    /// Source metadata.
    #[serde(default)]
    pub metadata: ChunkMetadata,
}

/// Answer synthesized by the backend (or by this client when condensing).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryOutcome {
    /// Synthesized answer text.
    pub answer: String,
    /// Chunks the answer was grounded on.
    #[serde(default)]
    pub sources: Vec<ChunkHit>,
    /// Standalone rewrite of the question, present only on condensed calls.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condensed_question: Option<String>,
}

/// Plain completion with no index behind it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DirectAnswer {
    /// Completion text.
    pub answer: String,
}

/// A supporting source attached to a graded answer, derived from a chunk hit
/// with its document resolved back to a known id where possible.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceRef {
    /// Page within the source document.
    pub page_number: Option<u32>,
    /// Snippet of the supporting content.
    pub content: String,
    /// Relevance score of the underlying chunk.
    pub score: f32,
    /// Source document file name.
    pub document_name: Option<String>,
    /// Resolved document id, when the file name maps to a known document.
    pub document_id: Option<Uuid>,
}

/// Wire-level operations of the RAG backend.
#[async_trait]
pub trait RetrievalBackend: Send + Sync {
    /// Ranked-chunk retrieval from a collection.
    async fn retrieve(
        &self,
        query: &str,
        collection: &str,
        top_k: usize,
    ) -> Result<Vec<ChunkHit>, BackendError>;

    /// Single-shot retrieval-plus-synthesis against a collection.
    async fn query(
        &self,
        question: &str,
        collection: &str,
        top_k: usize,
    ) -> Result<QueryOutcome, BackendError>;

    /// Direct LLM completion, no index involved.
    async fn query_direct(
        &self,
        question: &str,
        system_prompt: Option<&str>,
    ) -> Result<DirectAnswer, BackendError>;

    /// Transcribes a handwritten answer image (base64-encoded).
    async fn ocr(&self, image_base64: &str, prompt: &str) -> Result<String, BackendError>;

    /// Liveness probe.
    async fn healthy(&self) -> bool;
}

#[derive(Debug, Serialize)]
struct RetrieveBody<'a> {
    query: &'a str,
    collection: &'a str,
    top_k: usize,
}

#[derive(Debug, Serialize)]
struct QueryBody<'a> {
    question: &'a str,
    collection: &'a str,
    top_k: usize,
}

#[derive(Debug, Serialize)]
struct DirectBody<'a> {
    question: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_prompt: Option<&'a str>,
}

#[derive(Debug, Serialize)]
struct OcrBody<'a> {
    image_base64: &'a str,
    prompt: &'a str,
}

#[derive(Debug, Deserialize)]
struct RetrieveWire {
    #[serde(default)]
    results: Vec<ChunkHit>,
}

#[derive(Debug, Deserialize)]
struct QueryWire {
    answer: String,
    #[serde(default)]
    sources: Vec<ChunkHit>,
}

#[derive(Debug, Deserialize)]
struct DirectWire {
    answer: String,
}

#[derive(Debug, Deserialize)]
struct OcrWire {
    #[serde(default)]
    text: String,
}

/// HTTP implementation of the backend protocol.
#[derive(Debug, Clone)]
pub struct HttpRetrievalBackend {
    http: reqwest::Client,
    base_url: String,
}

impl HttpRetrievalBackend {
    /// Builds a client against `base_url` with the given request timeout.
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, BackendError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|err| BackendError::Unavailable(err.to_string()))?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_owned(),
        })
    }

    async fn post_json<B: Serialize, T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, BackendError> {
        let url = format!("{}{path}", self.base_url);
        let response = self
            .http
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(map_transport_error)?;
        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(BackendError::Status {
                code: status.as_u16(),
                message,
            });
        }
        response
            .json::<T>()
            .await
            .map_err(|err| BackendError::Malformed(err.to_string()))
    }
}

fn map_transport_error(err: reqwest::Error) -> BackendError {
    BackendError::Unavailable(err.to_string())
}

#[async_trait]
impl RetrievalBackend for HttpRetrievalBackend {
    async fn retrieve(
        &self,
        query: &str,
        collection: &str,
        top_k: usize,
    ) -> Result<Vec<ChunkHit>, BackendError> {
        let wire: RetrieveWire = self
            .post_json(
                "/retrieve/",
                &RetrieveBody {
                    query,
                    collection,
                    top_k,
                },
            )
            .await?;
        Ok(wire.results)
    }

    async fn query(
        &self,
        question: &str,
        collection: &str,
        top_k: usize,
    ) -> Result<QueryOutcome, BackendError> {
        let wire: QueryWire = self
            .post_json(
                "/query/",
                &QueryBody {
                    question,
                    collection,
                    top_k,
                },
            )
            .await?;
        Ok(QueryOutcome {
            answer: wire.answer,
            sources: wire.sources,
            condensed_question: None,
        })
    }

    async fn query_direct(
        &self,
        question: &str,
        system_prompt: Option<&str>,
    ) -> Result<DirectAnswer, BackendError> {
        let wire: DirectWire = self
            .post_json(
                "/query/direct",
                &DirectBody {
                    question,
                    system_prompt,
                },
            )
            .await?;
        Ok(DirectAnswer {
            answer: wire.answer,
        })
    }

    async fn ocr(&self, image_base64: &str, prompt: &str) -> Result<String, BackendError> {
        let wire: OcrWire = self
            .post_json(
                "/ocr/handwritten",
                &OcrBody {
                    image_base64,
                    prompt,
                },
            )
            .await?;
        Ok(wire.text)
    }

    async fn healthy(&self) -> bool {
        let url = format!("{}/health", self.base_url);
        match self.http.get(&url).send().await {
            Ok(response) => response.status().is_success(),
            Err(_) => false,
        }
    }
}

/// Canned backend for offline wiring and tests: serves configured chunks,
/// answers direct queries from a queue, and records every call so tests can
/// assert on the prompts the engine actually sent. Flip `set_offline` to
/// make every operation fail like an unreachable service.
#[derive(Debug, Default)]
pub struct StaticRetrievalBackend {
    chunks: parking_lot::Mutex<Vec<ChunkHit>>,
    direct_answers: parking_lot::Mutex<std::collections::VecDeque<String>>,
    retrieve_queries: parking_lot::Mutex<Vec<String>>,
    direct_prompts: parking_lot::Mutex<Vec<String>>,
    query_calls: std::sync::atomic::AtomicUsize,
    offline: std::sync::atomic::AtomicBool,
}

impl StaticRetrievalBackend {
    /// Creates an empty backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the chunks served by `retrieve` and `query`.
    pub fn set_chunks(&self, chunks: Vec<ChunkHit>) {
        *self.chunks.lock() = chunks;
    }

    /// Queues the next direct-completion answer. When the queue is empty the
    /// backend answers with an empty string.
    pub fn push_direct_answer(&self, answer: impl Into<String>) {
        self.direct_answers.lock().push_back(answer.into());
    }

    /// Makes every operation fail as if the service were unreachable.
    pub fn set_offline(&self, offline: bool) {
        self.offline
            .store(offline, std::sync::atomic::Ordering::SeqCst);
    }

    /// Queries `retrieve` has been called with.
    #[must_use]
    pub fn retrieve_queries(&self) -> Vec<String> {
        self.retrieve_queries.lock().clone()
    }

    /// Prompts `query_direct` has been called with.
    #[must_use]
    pub fn direct_prompts(&self) -> Vec<String> {
        self.direct_prompts.lock().clone()
    }

    /// How many times `query` ran.
    #[must_use]
    pub fn query_calls(&self) -> usize {
        self.query_calls.load(std::sync::atomic::Ordering::SeqCst)
    }

    fn check_online(&self) -> Result<(), BackendError> {
        if self.offline.load(std::sync::atomic::Ordering::SeqCst) {
            Err(BackendError::Unavailable("backend offline".to_owned()))
        } else {
            Ok(())
        }
    }

    fn next_direct(&self) -> String {
        self.direct_answers.lock().pop_front().unwrap_or_default()
    }
}

#[async_trait]
impl RetrievalBackend for StaticRetrievalBackend {
    async fn retrieve(
        &self,
        query: &str,
        _collection: &str,
        _top_k: usize,
    ) -> Result<Vec<ChunkHit>, BackendError> {
        self.check_online()?;
        self.retrieve_queries.lock().push(query.to_owned());
        Ok(self.chunks.lock().clone())
    }

    async fn query(
        &self,
        _question: &str,
        _collection: &str,
        _top_k: usize,
    ) -> Result<QueryOutcome, BackendError> {
        self.check_online()?;
        self.query_calls
            .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        Ok(QueryOutcome {
            answer: self.next_direct(),
            sources: self.chunks.lock().clone(),
            condensed_question: None,
        })
    }

    async fn query_direct(
        &self,
        question: &str,
        _system_prompt: Option<&str>,
    ) -> Result<DirectAnswer, BackendError> {
        self.check_online()?;
        self.direct_prompts.lock().push(question.to_owned());
        Ok(DirectAnswer {
            answer: self.next_direct(),
        })
    }

    async fn ocr(&self, _image_base64: &str, _prompt: &str) -> Result<String, BackendError> {
        self.check_online()?;
        Ok(self.next_direct())
    }

    async fn healthy(&self) -> bool {
        !self.offline.load(std::sync::atomic::Ordering::SeqCst)
    }
}
