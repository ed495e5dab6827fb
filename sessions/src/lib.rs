#![deny(
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    missing_docs,
    rust_2018_idioms
)]

//! The practice-session engine: a state machine walking one student through
//! a bounded sequence of exam questions, sourcing questions from ingested
//! document pools (or synthesizing them through the retrieval backend when
//! the pools run dry), grading each answer through the tiered pipeline, and
//! folding completed sessions into per-topic mastery statistics.

/// Domain types and serializable projections.
#[path = "../model.rs"]
pub mod model;

/// Engine error taxonomy.
#[path = "../error.rs"]
pub mod error;

/// Persistence seams and in-memory stores.
#[path = "../store.rs"]
pub mod store;

/// Question source resolution: pool draw, then RAG synthesis.
#[path = "../resolver.rs"]
pub mod resolver;

/// Per-topic progress aggregation and the mastery overview.
#[path = "../progress.rs"]
pub mod progress;

/// The session manager state machine.
#[path = "../manager.rs"]
pub mod manager;

/// Wiring helpers for embedding the engine.
#[path = "../runtime.rs"]
pub mod runtime;

/// Telemetry handle for session lifecycle events.
#[path = "../telemetry.rs"]
pub mod telemetry;

pub use error::EngineError;
pub use manager::{SessionConfig, SessionManager, SessionManagerBuilder};
pub use model::{
    AnswerOutcome, AnswerSubmission, Document, IngestionStatus, PoolQuestion, PracticeAnswer,
    PracticeSession, PracticeStatus, ProgressOverview, ProgressRecord, QuestionSourceRef,
    ServedQuestion, SessionDetail, SessionView, StartMode, StartRequest, Subject, Topic,
    TopicMetric,
};
pub use progress::ProgressAggregator;
pub use resolver::QuestionSourceResolver;
pub use runtime::PracticeRuntime;
pub use store::{
    CatalogDirectory, CatalogStore, MemoryCatalog, MemoryProgressStore, MemorySessionStore,
    PersistenceError, ProgressStore, SessionStore, TopicRegister,
};
pub use telemetry::{SessionTelemetry, SessionTelemetryBuilder};
