#![deny(
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    missing_docs,
    rust_2018_idioms
)]

//! Pure text-matching primitives used by the grading pipeline: aggressive
//! normalization, British/American spelling unification, and token-set
//! containment. No I/O, no async, no verdicts; callers decide what a match
//! means.

/// Normalization helpers.
#[path = "../normalize.rs"]
pub mod normalize;

/// Spelling-variant unification.
#[path = "../spelling.rs"]
pub mod spelling;

/// Tokenization and containment matching.
#[path = "../tokens.rs"]
pub mod tokens;

pub use normalize::{canonical, normalize, normalized_equal};
pub use spelling::unify_spelling;
pub use tokens::{containment_match, expand_plurals, key_tokens};
