use chrono::{DateTime, Utc};
use examforge_grading::QuestionKind;
use examforge_retrieval::SourceRef;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle of a practice session. `Completed` and `Abandoned` are
/// terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PracticeStatus {
    /// The student is still answering.
    InProgress,
    /// The quota was reached or the student finished explicitly.
    Completed,
    /// The session was given up; set by external policy, never by the engine.
    Abandoned,
}

impl PracticeStatus {
    /// Whether no further transition is possible.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Abandoned)
    }
}

/// One student's timed walk through a bounded set of questions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PracticeSession {
    /// Session id.
    pub id: Uuid,
    /// Owning student; all reads are restricted to this student.
    pub student_id: Uuid,
    /// Subject under practice.
    pub subject_id: Option<Uuid>,
    /// Pinned document for single-paper (real-exam) sessions.
    pub document_id: Option<Uuid>,
    /// Retrieval collection questions and grading context come from.
    pub collection: Option<String>,
    /// Lifecycle status.
    pub status: PracticeStatus,
    /// Question quota for the session.
    pub total_questions: u32,
    /// Questions answered so far; never exceeds the quota.
    pub answered_count: u32,
    /// Of those, how many were graded correct.
    pub correct_count: u32,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Set exactly when the session reaches a terminal status.
    pub completed_at: Option<DateTime<Utc>>,
}

/// One graded response within a session. Immutable once appended.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PracticeAnswer {
    /// Answer id.
    pub id: Uuid,
    /// Owning session.
    pub session_id: Uuid,
    /// Pool question id; `None` for synthesized questions.
    pub question_id: Option<Uuid>,
    /// The question as asked.
    pub question_text: String,
    /// Question format.
    pub question_kind: QuestionKind,
    /// What was graded (the OCR transcript for handwritten answers).
    pub student_answer: String,
    /// Whether the answer arrived as a handwriting image.
    pub is_handwritten: bool,
    /// OCR transcript, when one was produced.
    pub ocr_text: Option<String>,
    /// Verdict; `None` means the answer was ungradable.
    pub is_correct: Option<bool>,
    /// Partial credit in `[0.0, 1.0]`.
    pub score: f32,
    /// Feedback shown to the student.
    pub feedback: String,
    /// Canonical correct answer, when known.
    pub correct_answer: Option<String>,
    /// Supporting sources consulted while grading.
    pub sources: Vec<SourceRef>,
    /// Submission timestamp.
    pub created_at: DateTime<Utc>,
}

/// How documents move through ingestion before their content is retrievable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IngestionStatus {
    /// Uploaded, not yet processed.
    Pending,
    /// Ingestion running.
    Processing,
    /// Content indexed and retrievable.
    Completed,
    /// Ingestion failed.
    Failed,
}

/// A subject students practice (e.g. `S6 Biology`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Subject {
    /// Subject id.
    pub id: Uuid,
    /// Subject name.
    pub name: String,
    /// Education level label.
    pub level: String,
}

impl Subject {
    /// Retrieval collection holding this subject's ingested content.
    #[must_use]
    pub fn collection_name(&self) -> String {
        format!("{}_{}", self.level, self.name).replace(' ', "_")
    }
}

/// An uploaded exam paper or study document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    /// Document id.
    pub id: Uuid,
    /// Original file name.
    pub filename: String,
    /// Storage path, when known.
    pub file_path: Option<String>,
    /// Linked subject, when the upload was attributed.
    pub subject_id: Option<Uuid>,
    /// Subject name carried on the upload itself.
    pub subject_name: String,
    /// Education level label.
    pub level: String,
    /// Ingestion state; only `Completed` documents serve questions.
    pub ingestion: IngestionStatus,
    /// Explicit collection override, when ingestion assigned one.
    pub collection_name: Option<String>,
}

impl Document {
    /// Retrieval collection for this document.
    #[must_use]
    pub fn collection(&self) -> String {
        self.collection_name.clone().unwrap_or_else(|| {
            format!("{}_{}", self.level, self.subject_name).replace(' ', "_")
        })
    }
}

/// A named topic within a subject, the unit progress is tracked against.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Topic {
    /// Topic id.
    pub id: Uuid,
    /// Owning subject name.
    pub subject_name: String,
    /// Topic name.
    pub name: String,
}

/// A pre-extracted question in a document's pool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolQuestion {
    /// Question id.
    pub id: Uuid,
    /// Source document.
    pub document_id: Uuid,
    /// Question text.
    pub text: String,
    /// Question format.
    pub kind: QuestionKind,
    /// Choice options for MCQ questions; empty otherwise.
    pub options: Vec<String>,
    /// Canonical correct answer, when the marking scheme supplied one.
    pub correct_answer: Option<String>,
    /// Topic the question belongs to, when classified.
    pub topic_id: Option<Uuid>,
    /// Difficulty label.
    pub difficulty: Option<String>,
}

/// Per-(student, topic) running mastery aggregate. `accuracy` is always
/// recomputed from the two counters, never stored independently.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressRecord {
    /// Student.
    pub student_id: Uuid,
    /// Topic.
    pub topic_id: Uuid,
    /// Total correct answers across all attempts.
    pub total_correct: u32,
    /// Total questions answered across all attempts.
    pub total_questions: u32,
    /// `total_correct / total_questions`, rounded to four decimals.
    pub accuracy: f32,
    /// Number of aggregated sessions touching this topic.
    pub attempt_count: u32,
    /// Last aggregation timestamp.
    pub last_attempted_at: Option<DateTime<Utc>>,
}

impl ProgressRecord {
    /// Fresh record with zeroed counters.
    #[must_use]
    pub const fn new(student_id: Uuid, topic_id: Uuid) -> Self {
        Self {
            student_id,
            topic_id,
            total_correct: 0,
            total_questions: 0,
            accuracy: 0.0,
            attempt_count: 0,
            last_attempted_at: None,
        }
    }
}

/// How a session draws its questions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StartMode {
    /// Subject-wide practice across every ingested paper.
    #[default]
    Practice,
    /// Simulate one randomly chosen exam paper.
    RealExam,
}

/// Request to start a session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartRequest {
    /// Subject to practice.
    pub subject_id: Uuid,
    /// Restrict to one paper (overrides `mode`).
    #[serde(default)]
    pub document_id: Option<Uuid>,
    /// Question quota.
    #[serde(default = "default_question_count")]
    pub question_count: u32,
    /// Drawing mode.
    #[serde(default)]
    pub mode: StartMode,
}

fn default_question_count() -> u32 {
    5
}

impl StartRequest {
    /// Subject-wide practice with the default quota.
    #[must_use]
    pub fn subject_practice(subject_id: Uuid) -> Self {
        Self {
            subject_id,
            document_id: None,
            question_count: default_question_count(),
            mode: StartMode::Practice,
        }
    }
}

/// One submitted answer: typed text, a handwriting image, or both.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AnswerSubmission {
    /// Pool question id, when the served question carried one.
    #[serde(default)]
    pub question_id: Option<Uuid>,
    /// Question text, required for synthesized questions with no stable id.
    #[serde(default)]
    pub question_text: Option<String>,
    /// Typed answer.
    #[serde(default)]
    pub answer_text: Option<String>,
    /// Base64-encoded photograph of a handwritten answer.
    #[serde(default)]
    pub answer_image_base64: Option<String>,
}

/// Source pointer attached to a served question so the student can open the
/// relevant document page.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuestionSourceRef {
    /// Page within the document.
    pub page_number: Option<u32>,
    /// Document file name.
    pub document_name: Option<String>,
    /// Resolved document id.
    pub document_id: Option<Uuid>,
    /// Brief excerpt for context.
    pub content_snippet: Option<String>,
}

/// A question served to the student.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServedQuestion {
    /// Pool question id, or a fresh random id for synthesized questions.
    pub id: Uuid,
    /// 1-based position within the session.
    pub question_number: u32,
    /// Question text.
    pub text: String,
    /// Question format.
    pub kind: QuestionKind,
    /// Choice options, for MCQ questions.
    pub options: Option<Vec<String>>,
    /// Topic label, when known.
    pub topic: Option<String>,
    /// Difficulty label, when known.
    pub difficulty: Option<String>,
    /// Session quota, echoed for display.
    pub total_questions: u32,
    /// Where the question came from.
    pub source_references: Vec<QuestionSourceRef>,
}

/// Result of grading one submitted answer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnswerOutcome {
    /// The question as graded.
    pub question_text: String,
    /// What was graded (the OCR transcript for handwritten answers).
    pub student_answer: String,
    /// Verdict; `None` means ungradable.
    pub is_correct: Option<bool>,
    /// Partial credit in `[0.0, 1.0]`.
    pub score: f32,
    /// Feedback shown to the student.
    pub feedback: String,
    /// Canonical correct answer, when known.
    pub correct_answer: Option<String>,
    /// Supporting sources consulted while grading.
    pub source_references: Vec<SourceRef>,
    /// Whether the submission was handwritten.
    pub was_handwritten: bool,
    /// OCR transcript, when one was produced.
    pub ocr_text: Option<String>,
}

/// Read projection of a session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionView {
    /// Session id.
    pub id: Uuid,
    /// Owning student.
    pub student_id: Uuid,
    /// Subject under practice.
    pub subject_id: Option<Uuid>,
    /// Pinned document, when in single-paper mode.
    pub document_id: Option<Uuid>,
    /// Lifecycle status.
    pub status: PracticeStatus,
    /// Question quota.
    pub total_questions: u32,
    /// Questions answered so far.
    pub answered_count: u32,
    /// Correct answers so far.
    pub correct_count: u32,
    /// `correct_count / answered_count`, rounded to four decimals.
    pub accuracy: f32,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Terminal timestamp, when reached.
    pub completed_at: Option<DateTime<Utc>>,
}

impl SessionView {
    /// Projects a session, deriving accuracy from the counters.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn from_session(session: &PracticeSession) -> Self {
        let accuracy = if session.answered_count > 0 {
            round4(session.correct_count as f32 / session.answered_count as f32)
        } else {
            0.0
        };
        Self {
            id: session.id,
            student_id: session.student_id,
            subject_id: session.subject_id,
            document_id: session.document_id,
            status: session.status,
            total_questions: session.total_questions,
            answered_count: session.answered_count,
            correct_count: session.correct_count,
            accuracy,
            created_at: session.created_at,
            completed_at: session.completed_at,
        }
    }
}

/// Session projection including every graded answer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionDetail {
    /// Summary projection.
    pub session: SessionView,
    /// Graded answers in submission order.
    pub answers: Vec<AnswerOutcome>,
}

/// Per-topic slice of a student's mastery overview.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopicMetric {
    /// Topic name.
    pub topic: String,
    /// Running accuracy for the topic.
    pub accuracy: f32,
    /// Aggregated attempts touching the topic.
    pub attempts: u32,
    /// Last aggregation timestamp.
    pub last_attempted: Option<DateTime<Utc>>,
}

/// A student's mastery overview across all topics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressOverview {
    /// Student.
    pub student_id: Uuid,
    /// Accuracy across every aggregated question.
    pub overall_accuracy: f32,
    /// Total aggregated attempts.
    pub total_attempts: u32,
    /// Per-topic metrics.
    pub topic_metrics: Vec<TopicMetric>,
    /// Topics below the weak-topic threshold.
    pub weak_topics: Vec<String>,
    /// Human-readable study recommendations.
    pub recommendations: Vec<String>,
    /// Most recent aggregation timestamp across all topics.
    pub last_attempt_at: Option<DateTime<Utc>>,
}

/// Rounds to four decimal places, the precision accuracy is reported at.
#[must_use]
pub fn round4(value: f32) -> f32 {
    (value * 10_000.0).round() / 10_000.0
}
