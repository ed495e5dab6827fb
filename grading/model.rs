use examforge_retrieval::SourceRef;
use serde::{Deserialize, Serialize};

/// Question formats the pipeline knows how to grade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum QuestionKind {
    /// Multiple choice, graded by letter comparison.
    #[serde(rename = "mcq")]
    MultipleChoice,
    /// Brief factual answer.
    #[serde(rename = "short-answer")]
    ShortAnswer,
    /// Free-form essay.
    #[serde(rename = "essay")]
    Essay,
    /// True-or-false statement.
    #[serde(rename = "true-or-false")]
    TrueFalse,
    /// Sentence with a blank to fill.
    #[serde(rename = "fill-in-the-blank")]
    FillInBlank,
}

impl QuestionKind {
    /// Wire label for this kind.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::MultipleChoice => "mcq",
            Self::ShortAnswer => "short-answer",
            Self::Essay => "essay",
            Self::TrueFalse => "true-or-false",
            Self::FillInBlank => "fill-in-the-blank",
        }
    }

    /// Parses a wire label, defaulting unknown labels to short answer the
    /// way the questionnaire treats untyped questions.
    #[must_use]
    pub fn parse_lenient(label: &str) -> Self {
        match label.trim() {
            "mcq" | "multiple-choice" => Self::MultipleChoice,
            "essay" => Self::Essay,
            "true-or-false" => Self::TrueFalse,
            "fill-in-the-blank" => Self::FillInBlank,
            _ => Self::ShortAnswer,
        }
    }
}

/// One answer to grade.
#[derive(Debug, Clone)]
pub struct GradeRequest {
    /// Question format.
    pub kind: QuestionKind,
    /// The question as shown to the student.
    pub question_text: String,
    /// The student's response text.
    pub student_answer: String,
    /// Canonical correct answer, when the question came from a marked pool.
    pub expected_answer: Option<String>,
    /// Retrieval collection for context grading, when the session has one.
    pub collection: Option<String>,
}

/// Result of grading one answer. `is_correct` is `None` when the answer
/// could not be graded at all (no expected answer, no usable tier).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GradeReport {
    /// Verdict; `None` means ungradable, not incorrect.
    pub is_correct: Option<bool>,
    /// Partial credit in `[0.0, 1.0]`.
    pub score: f32,
    /// Explanation shown to the student.
    pub feedback: String,
    /// Correct answer, from the pool or recovered from the grader.
    pub correct_answer: Option<String>,
    /// Supporting sources consulted while grading.
    pub sources: Vec<SourceRef>,
}

impl GradeReport {
    /// Report for an answer nothing could grade.
    #[must_use]
    pub fn needs_manual_review(sources: Vec<SourceRef>) -> Self {
        Self {
            is_correct: None,
            score: 0.0,
            feedback: "Unable to grade this answer automatically. Please review with your teacher."
                .to_owned(),
            correct_answer: None,
            sources,
        }
    }
}

/// What one text tier concluded about an answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TierOutcome {
    /// The tier reached a confident verdict.
    Decided(bool),
    /// The tier could not decide; control falls to the next tier.
    Unavailable,
}
