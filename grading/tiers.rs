use examforge_matcher::{containment_match, normalized_equal};
use examforge_retrieval::{CallerIdentity, RetrievalClient};

use crate::{
    model::TierOutcome,
    parse::parse_semantic_json,
    prompts::{semantic_prompt, SEMANTIC_SYSTEM_PROMPT},
};

/// One strategy in the short-answer grading order. The pipeline walks its
/// tier list front to back and stops at the first tier that decides.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextTier {
    /// Equality after normalization and spelling unification.
    NormalizedMatch,
    /// Key-token containment with plural tolerance.
    TokenSetMatch,
    /// LLM comparison under the grading rubric.
    SemanticLlm,
}

impl TextTier {
    /// The default tier order.
    #[must_use]
    pub fn default_order() -> Vec<Self> {
        vec![Self::NormalizedMatch, Self::TokenSetMatch, Self::SemanticLlm]
    }

    /// Whether this tier needs the retrieval backend to run.
    #[must_use]
    pub const fn needs_backend(self) -> bool {
        matches!(self, Self::SemanticLlm)
    }

    /// Diagnostic label.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::NormalizedMatch => "normalized",
            Self::TokenSetMatch => "token-set",
            Self::SemanticLlm => "semantic",
        }
    }
}

/// Normalized-equality tier: a match decides correct, anything else falls
/// through.
#[must_use]
pub fn normalized_tier(student: &str, expected: &str) -> TierOutcome {
    if normalized_equal(student, expected) {
        TierOutcome::Decided(true)
    } else {
        TierOutcome::Unavailable
    }
}

/// Token-set containment tier: a match decides correct, anything else falls
/// through.
#[must_use]
pub fn token_set_tier(student: &str, expected: &str) -> TierOutcome {
    if containment_match(student, expected) {
        TierOutcome::Decided(true)
    } else {
        TierOutcome::Unavailable
    }
}

/// Semantic tier: asks the LLM to compare the answers under the rubric. A
/// malformed response or any call failure leaves the tier unavailable; it
/// never converts uncertainty into "incorrect".
pub async fn semantic_tier(
    client: &RetrievalClient,
    caller: &CallerIdentity,
    question_text: &str,
    expected: &str,
    student: &str,
) -> TierOutcome {
    let prompt = semantic_prompt(question_text, expected, student);
    match client
        .query_direct(caller, &prompt, Some(SEMANTIC_SYSTEM_PROMPT))
        .await
    {
        Ok(answer) => parse_semantic_json(&answer.answer).map_or_else(
            || {
                tracing::warn!("semantic grading response not parseable");
                TierOutcome::Unavailable
            },
            |verdict| {
                tracing::info!(
                    correct = verdict.correct,
                    reason = %verdict.reason,
                    "semantic grading verdict"
                );
                TierOutcome::Decided(verdict.correct)
            },
        ),
        Err(err) => {
            tracing::warn!(%err, "semantic grading unavailable");
            TierOutcome::Unavailable
        }
    }
}
