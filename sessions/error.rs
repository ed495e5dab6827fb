use examforge_grading::GradingError;
use examforge_retrieval::{BackendError, RetrievalError};

use crate::store::PersistenceError;

/// Errors surfaced by the session-engine operations.
///
/// `RateLimited` is retryable after a short delay. `Exhausted` and
/// `InvalidState` are terminal for the session and should not be retried.
/// `Backend` only reaches a caller when every fallback tier was also
/// unavailable; an ungradable answer is reported inside the answer
/// projection (`is_correct: None`) rather than as an error, so a student
/// never loses a submission to a backend outage.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// The referenced entity is absent or not visible to the caller.
    /// Cross-student access reports this, never "forbidden", to avoid
    /// leaking that the entity exists.
    #[error("{0} not found")]
    NotFound(&'static str),
    /// The operation is not valid for the session's current status.
    #[error("invalid state: {0}")]
    InvalidState(String),
    /// The question quota is reached and no further question exists.
    #[error("no more questions available for this practice session")]
    Exhausted,
    /// The submission itself is unusable.
    #[error("invalid input: {0}")]
    InvalidInput(String),
    /// Admission denied; retry after a short delay.
    #[error("too many requests — please slow down")]
    RateLimited,
    /// The retrieval backend failed and no fallback could stand in.
    #[error(transparent)]
    Backend(BackendError),
    /// The persistence layer failed.
    #[error(transparent)]
    Store(#[from] PersistenceError),
}

impl From<RetrievalError> for EngineError {
    fn from(err: RetrievalError) -> Self {
        match err {
            RetrievalError::RateLimited => Self::RateLimited,
            RetrievalError::Backend(inner) => Self::Backend(inner),
        }
    }
}

impl From<GradingError> for EngineError {
    fn from(err: GradingError) -> Self {
        match err {
            GradingError::RateLimited => Self::RateLimited,
        }
    }
}
