use std::sync::Arc;

use examforge_retrieval::{
    CallerIdentity, ChunkHit, DocumentDirectory, RetrievalClient, RetrievalError, SourceRef,
};

use crate::{
    model::{GradeReport, GradeRequest, QuestionKind, TierOutcome},
    parse::parse_grade_json,
    prompts::context_grade_prompt,
    tiers::{normalized_tier, semantic_tier, token_set_tier, TextTier},
};

/// The one condition grading refuses to paper over: admission denial. Every
/// backend failure degrades to a deterministic fallback instead, but a
/// rate-limited caller must be told to retry, not silently downgraded.
#[derive(Debug, thiserror::Error)]
pub enum GradingError {
    /// The caller exhausted its admission budget.
    #[error("too many requests — please slow down")]
    RateLimited,
}

/// Characters of chunk content kept in a grading source reference.
const SOURCE_SNIPPET_CHARS: usize = 200;

/// Orchestrates the grading tiers. The retrieval backend is an optional
/// capability: without it the pipeline still grades from the pure text
/// tiers, and an answer with no expected answer and no backend comes back
/// as needing manual review rather than failing.
pub struct GradingPipeline {
    client: Option<Arc<RetrievalClient>>,
    directory: Option<Arc<dyn DocumentDirectory>>,
    tiers: Vec<TextTier>,
    grading_top_k: usize,
}

impl GradingPipeline {
    /// Creates a pipeline with the default tier order.
    #[must_use]
    pub fn new(client: Option<Arc<RetrievalClient>>) -> Self {
        Self {
            client,
            directory: None,
            tiers: TextTier::default_order(),
            grading_top_k: 5,
        }
    }

    /// Attaches a document directory for resolving source references.
    #[must_use]
    pub fn with_directory(mut self, directory: Arc<dyn DocumentDirectory>) -> Self {
        self.directory = Some(directory);
        self
    }

    /// Overrides the tier order.
    #[must_use]
    pub fn with_tiers(mut self, tiers: Vec<TextTier>) -> Self {
        self.tiers = tiers;
        self
    }

    /// Overrides how many chunks context grading retrieves.
    #[must_use]
    pub fn with_grading_top_k(mut self, top_k: usize) -> Self {
        self.grading_top_k = top_k;
        self
    }

    /// Grades one answer with feedback, partial credit, and sources.
    ///
    /// MCQ answers with a known correct option are graded by letter and
    /// never reach the backend. Everything else retrieves context for
    /// `question + expected`, asks the LLM for a scored verdict, and on any
    /// backend failure degrades to the pure text tiers (or a manual-review
    /// report when no expected answer exists to compare against). Only
    /// admission denial surfaces as an error.
    pub async fn grade(
        &self,
        caller: &CallerIdentity,
        request: &GradeRequest,
    ) -> Result<GradeReport, GradingError> {
        if request.kind == QuestionKind::MultipleChoice {
            if let Some(expected) = &request.expected_answer {
                return Ok(Self::grade_choice(&request.student_answer, expected));
            }
        }

        let mut context = String::new();
        let mut sources = Vec::new();
        if let (Some(collection), Some(client)) = (&request.collection, &self.client) {
            let query = format!(
                "{} {}",
                request.question_text,
                request.expected_answer.as_deref().unwrap_or_default()
            );
            match client
                .retrieve(caller, &query, collection, self.grading_top_k)
                .await
            {
                Ok(chunks) => {
                    context = chunks
                        .iter()
                        .map(|chunk| chunk.content.as_str())
                        .collect::<Vec<_>>()
                        .join("\n\n");
                    sources = self.source_refs(&chunks).await;
                }
                Err(RetrievalError::RateLimited) => return Err(GradingError::RateLimited),
                Err(err) => {
                    tracing::warn!(%err, "context retrieval for grading failed");
                }
            }
        }

        if let Some(client) = &self.client {
            let prompt = context_grade_prompt(
                &request.question_text,
                request.expected_answer.as_deref(),
                &request.student_answer,
                &context,
            );
            match client.query_direct(caller, &prompt, None).await {
                Ok(answer) => {
                    let parsed = parse_grade_json(&answer.answer);
                    return Ok(GradeReport {
                        is_correct: Some(parsed.is_correct),
                        score: parsed.score.clamp(0.0, 1.0),
                        feedback: parsed.feedback,
                        correct_answer: request
                            .expected_answer
                            .clone()
                            .or(parsed.correct_answer),
                        sources,
                    });
                }
                Err(RetrievalError::RateLimited) => return Err(GradingError::RateLimited),
                Err(err) => {
                    tracing::warn!(%err, "LLM grading failed, falling back to text comparison");
                }
            }
        }

        Ok(self.fallback_report(request, sources))
    }

    /// Pure yes/no grading against the expected answer, walking the tier
    /// list in order and stopping at the first decision. Used by quiz-style
    /// callers that need a verdict without feedback.
    pub async fn grade_text(&self, caller: &CallerIdentity, request: &GradeRequest) -> bool {
        let Some(expected) = request.expected_answer.as_deref() else {
            return false;
        };
        let expected = expected.trim();
        let student = request.student_answer.trim();
        if student.is_empty() {
            return false;
        }
        if request.kind == QuestionKind::MultipleChoice {
            return student.eq_ignore_ascii_case(expected);
        }

        for tier in &self.tiers {
            let outcome = match tier {
                TextTier::NormalizedMatch => normalized_tier(student, expected),
                TextTier::TokenSetMatch => token_set_tier(student, expected),
                TextTier::SemanticLlm => match &self.client {
                    Some(client) => {
                        semantic_tier(client, caller, &request.question_text, expected, student)
                            .await
                    }
                    None => TierOutcome::Unavailable,
                },
            };
            if let TierOutcome::Decided(correct) = outcome {
                tracing::debug!(tier = tier.label(), correct, "text tier decided");
                return correct;
            }
        }
        false
    }

    fn grade_choice(student: &str, expected: &str) -> GradeReport {
        let correct = student.trim().eq_ignore_ascii_case(expected.trim());
        GradeReport {
            is_correct: Some(correct),
            score: if correct { 1.0 } else { 0.0 },
            feedback: if correct {
                format!("Correct! The answer is {expected}.")
            } else {
                format!("Incorrect. The correct answer is {expected}.")
            },
            correct_answer: Some(expected.to_owned()),
            sources: Vec::new(),
        }
    }

    fn fallback_report(&self, request: &GradeRequest, sources: Vec<SourceRef>) -> GradeReport {
        let Some(expected) = request.expected_answer.as_deref() else {
            return GradeReport::needs_manual_review(sources);
        };
        let student = request.student_answer.trim();
        let correct = if request.kind == QuestionKind::MultipleChoice {
            student.eq_ignore_ascii_case(expected.trim())
        } else {
            self.tiers
                .iter()
                .filter(|tier| !tier.needs_backend())
                .any(|tier| {
                    let outcome = match tier {
                        TextTier::NormalizedMatch => normalized_tier(student, expected),
                        TextTier::TokenSetMatch => token_set_tier(student, expected),
                        TextTier::SemanticLlm => TierOutcome::Unavailable,
                    };
                    outcome == TierOutcome::Decided(true)
                })
        };
        GradeReport {
            is_correct: Some(correct),
            score: if correct { 1.0 } else { 0.0 },
            feedback: if correct {
                "Correct!".to_owned()
            } else {
                format!("The expected answer is: {expected}")
            },
            correct_answer: Some(expected.to_owned()),
            sources,
        }
    }

    async fn source_refs(&self, chunks: &[ChunkHit]) -> Vec<SourceRef> {
        let mut refs = Vec::with_capacity(chunks.len());
        for chunk in chunks {
            let document_id = match (&self.directory, &chunk.metadata.file_name) {
                (Some(directory), Some(file_name)) => directory.document_id_for(file_name).await,
                _ => None,
            };
            refs.push(SourceRef {
                page_number: chunk.metadata.page_number,
                content: chunk.content.chars().take(SOURCE_SNIPPET_CHARS).collect(),
                score: chunk.score,
                document_name: chunk.metadata.file_name.clone(),
                document_id,
            });
        }
        refs
    }
}

impl std::fmt::Debug for GradingPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GradingPipeline")
            .field("tiers", &self.tiers)
            .field("grading_top_k", &self.grading_top_k)
            .field("backend", &self.client.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use examforge_retrieval::{
        ChunkMetadata, KeyValueStore, MemoryKeyValueStore, RateLimitConfig, RetrievalConfig,
        StaticRetrievalBackend,
    };
    use uuid::Uuid;

    struct StaticDirectory(Uuid);

    #[async_trait]
    impl DocumentDirectory for StaticDirectory {
        async fn document_id_for(&self, file_name: &str) -> Option<Uuid> {
            (file_name == "bio_2023.pdf").then_some(self.0)
        }
    }

    fn caller() -> CallerIdentity {
        CallerIdentity::Ip("test".to_owned())
    }

    fn client_over(backend: Arc<StaticRetrievalBackend>) -> Arc<RetrievalClient> {
        let store: Arc<dyn KeyValueStore> = Arc::new(MemoryKeyValueStore::new());
        let config = RetrievalConfig {
            cache_enabled: false,
            rate_limit: RateLimitConfig {
                requests_per_minute: 0,
                burst: 0,
            },
            ..RetrievalConfig::default()
        };
        Arc::new(RetrievalClient::new(backend, store, &config))
    }

    fn request(kind: QuestionKind, student: &str, expected: Option<&str>) -> GradeRequest {
        GradeRequest {
            kind,
            question_text: "What is the capital of Rwanda?".to_owned(),
            student_answer: student.to_owned(),
            expected_answer: expected.map(str::to_owned),
            collection: Some("S6_Geography".to_owned()),
        }
    }

    #[tokio::test]
    async fn mcq_grading_ignores_case_and_whitespace() {
        let pipeline = GradingPipeline::new(None);
        let report = pipeline
            .grade(&caller(), &request(QuestionKind::MultipleChoice, "b  ", Some("B")))
            .await
            .unwrap();
        assert_eq!(report.is_correct, Some(true));
        assert_eq!(report.score, 1.0);
    }

    #[tokio::test]
    async fn mcq_wrong_letter_scores_zero() {
        let pipeline = GradingPipeline::new(None);
        let report = pipeline
            .grade(&caller(), &request(QuestionKind::MultipleChoice, "c", Some("B")))
            .await
            .unwrap();
        assert_eq!(report.is_correct, Some(false));
        assert_eq!(report.score, 0.0);
        assert!(report.feedback.contains("correct answer is B"));
    }

    #[tokio::test]
    async fn offline_fallback_uses_text_tiers() {
        let pipeline = GradingPipeline::new(None);
        let report = pipeline
            .grade(
                &caller(),
                &request(QuestionKind::ShortAnswer, "organization", Some("organisation")),
            )
            .await
            .unwrap();
        assert_eq!(report.is_correct, Some(true));
        assert_eq!(report.score, 1.0);

        let wrong = pipeline
            .grade(
                &caller(),
                &request(QuestionKind::ShortAnswer, "Honesty, Integrity", Some("Understanding, Empathy")),
            )
            .await
            .unwrap();
        assert_eq!(wrong.is_correct, Some(false));
        assert!(wrong.feedback.contains("Understanding, Empathy"));
    }

    #[tokio::test]
    async fn no_expected_answer_and_no_backend_needs_manual_review() {
        let pipeline = GradingPipeline::new(None);
        let report = pipeline
            .grade(&caller(), &request(QuestionKind::ShortAnswer, "water moves", None))
            .await
            .unwrap();
        assert_eq!(report.is_correct, None);
        assert_eq!(report.score, 0.0);
        assert!(report.feedback.contains("review with your teacher"));
    }

    #[tokio::test]
    async fn context_grading_returns_score_feedback_and_sources() {
        let doc_id = Uuid::new_v4();
        let backend = Arc::new(StaticRetrievalBackend::new());
        backend.set_chunks(vec![ChunkHit {
            score: 0.91,
            content: "Kigali has been the capital since independence. ".repeat(10),
            metadata: ChunkMetadata {
                file_name: Some("bio_2023.pdf".to_owned()),
                page_number: Some(12),
                extra: serde_json::Map::new(),
            },
        }]);
        backend.push_direct_answer(
            r#"{"is_correct": true, "score": 0.9, "feedback": "Nearly perfect.", "correct_answer": "Kigali"}"#,
        );
        let pipeline = GradingPipeline::new(Some(client_over(backend)))
            .with_directory(Arc::new(StaticDirectory(doc_id)));

        let report = pipeline
            .grade(&caller(), &request(QuestionKind::ShortAnswer, "kigali", Some("Kigali")))
            .await
            .unwrap();

        assert_eq!(report.is_correct, Some(true));
        assert!((report.score - 0.9).abs() < f32::EPSILON);
        assert_eq!(report.feedback, "Nearly perfect.");
        assert_eq!(report.sources.len(), 1);
        let source = &report.sources[0];
        assert_eq!(source.document_id, Some(doc_id));
        assert_eq!(source.page_number, Some(12));
        assert!(source.content.chars().count() <= 200);
    }

    #[tokio::test]
    async fn backend_outage_degrades_to_text_comparison() {
        let backend = Arc::new(StaticRetrievalBackend::new());
        backend.set_offline(true);
        let pipeline = GradingPipeline::new(Some(client_over(backend)));
        let report = pipeline
            .grade(
                &caller(),
                &request(QuestionKind::ShortAnswer, "Food and shelter", Some("Food, Shelter")),
            )
            .await
            .unwrap();
        assert_eq!(report.is_correct, Some(true));
        assert_eq!(report.feedback, "Correct!");
    }

    #[tokio::test]
    async fn semantic_tier_verdict_is_honored_in_text_grading() {
        let backend = Arc::new(StaticRetrievalBackend::new());
        backend.push_direct_answer(r#"{"correct": false, "reason": "factually wrong"}"#);
        backend.push_direct_answer(r#"{"correct": true, "reason": "synonym phrasing"}"#);
        let pipeline = GradingPipeline::new(Some(client_over(backend)));
        let wrong = pipeline
            .grade_text(
                &caller(),
                &request(QuestionKind::ShortAnswer, "Lake Victoria", Some("Lake Kivu")),
            )
            .await;
        assert!(!wrong);

        // An answer only the semantic tier can accept proves the verdict
        // came from the model, not the pure tiers.
        let accepted = pipeline
            .grade_text(
                &caller(),
                &request(QuestionKind::ShortAnswer, "the big lake near Goma", Some("Lake Kivu")),
            )
            .await;
        assert!(accepted);
    }

    #[tokio::test]
    async fn malformed_semantic_response_defaults_to_incorrect_not_error() {
        let backend = Arc::new(StaticRetrievalBackend::new());
        backend.push_direct_answer("I think the student is right!");
        let pipeline = GradingPipeline::new(Some(client_over(backend)));
        let correct = pipeline
            .grade_text(
                &caller(),
                &request(QuestionKind::ShortAnswer, "Lake Victoria", Some("Lake Kivu")),
            )
            .await;
        assert!(!correct);
    }

    #[tokio::test]
    async fn grading_retrieves_context_for_question_and_expected() {
        let backend = Arc::new(StaticRetrievalBackend::new());
        backend.push_direct_answer(r#"{"is_correct": false, "score": 0.0, "feedback": "No."}"#);
        let pipeline = GradingPipeline::new(Some(client_over(backend.clone())));
        pipeline
            .grade(&caller(), &request(QuestionKind::ShortAnswer, "x", Some("Kigali")))
            .await
            .unwrap();
        assert_eq!(
            backend.retrieve_queries(),
            ["What is the capital of Rwanda? Kigali"]
        );
    }
}
