#![deny(
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    missing_docs,
    rust_2018_idioms
)]

//! Client layer for the external RAG backend: ranked-chunk retrieval,
//! LLM-synthesized answers (with multi-turn condensation), direct
//! completions, and handwriting OCR, wrapped in a content-addressed
//! response cache and gated by a leaky-bucket rate limiter, both backed by a
//! shared key-value store that is allowed to fail without taking the engine
//! down with it.

/// Shared key-value store and clock seams.
#[path = "../kv.rs"]
pub mod kv;

/// Content-addressed response cache.
#[path = "../cache.rs"]
pub mod cache;

/// Leaky-bucket admission control.
#[path = "../limiter.rs"]
pub mod limiter;

/// Wire-level backend trait and HTTP implementation.
#[path = "../backend.rs"]
pub mod backend;

/// Multi-turn question condensation and synthesis prompts.
#[path = "../condense.rs"]
pub mod condense;

/// Cache- and limiter-gated client facade.
#[path = "../client.rs"]
pub mod client;

/// Telemetry handle for retrieval events.
#[path = "../telemetry.rs"]
pub mod telemetry;

pub use backend::{
    BackendError, ChatRole, ChatTurn, ChunkHit, ChunkMetadata, DirectAnswer, HttpRetrievalBackend,
    QueryOutcome, RetrievalBackend, SourceRef, StaticRetrievalBackend,
};
pub use cache::RetrievalCache;
pub use client::{
    CallerIdentity, DocumentDirectory, RetrievalClient, RetrievalConfig, RetrievalError,
};
pub use kv::{Clock, KeyValueStore, ManualClock, MemoryKeyValueStore, StoreError, SystemClock};
pub use limiter::{RateLimitConfig, RateLimiter};
pub use telemetry::{RetrievalTelemetry, RetrievalTelemetryBuilder};
