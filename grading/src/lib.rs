#![deny(
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    missing_docs,
    rust_2018_idioms
)]

//! Grading pipeline for practice answers: a fixed order of text-matching
//! tiers (exact choice, normalized match, token-set containment) with LLM
//! semantic grading behind them, and a context-aware path that retrieves
//! supporting chunks and asks the model for partial credit and feedback.
//! Every path degrades to a deterministic fallback, so a student-facing
//! grading call never fails outright.

/// Grading request/report types and the question-kind taxonomy.
#[path = "../model.rs"]
pub mod model;

/// Fence-tolerant extraction of grading JSON from model output.
#[path = "../parse.rs"]
pub mod parse;

/// Prompt templates for semantic grading.
#[path = "../prompts.rs"]
pub mod prompts;

/// The ordered text-tier strategies.
#[path = "../tiers.rs"]
pub mod tiers;

/// Pipeline orchestration.
#[path = "../pipeline.rs"]
pub mod pipeline;

pub use model::{GradeReport, GradeRequest, QuestionKind, TierOutcome};
pub use pipeline::{GradingError, GradingPipeline};
pub use tiers::TextTier;
