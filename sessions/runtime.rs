use std::sync::Arc;

use examforge_retrieval::RetrievalClient;

use crate::{
    manager::{SessionConfig, SessionManager},
    store::{MemoryCatalog, MemoryProgressStore, MemorySessionStore},
    telemetry::SessionTelemetry,
};

/// Fully wired engine over in-memory stores: the quickest way to embed the
/// practice engine in a process that brings its own persistence later, and
/// the harness the end-to-end tests drive.
pub struct PracticeRuntime {
    manager: Arc<SessionManager>,
    catalog: Arc<MemoryCatalog>,
    sessions: Arc<MemorySessionStore>,
    progress: Arc<MemoryProgressStore>,
}

impl PracticeRuntime {
    /// Bootstraps a runtime with no retrieval backend: pool questions only,
    /// pure text grading.
    #[must_use]
    pub fn bootstrap() -> Self {
        Self::assemble(None, None)
    }

    /// Bootstraps a runtime wired to a retrieval client, enabling question
    /// synthesis, context grading, and handwriting OCR.
    #[must_use]
    pub fn bootstrap_with_client(client: Arc<RetrievalClient>) -> Self {
        Self::assemble(Some(client), None)
    }

    fn assemble(
        client: Option<Arc<RetrievalClient>>,
        telemetry: Option<SessionTelemetry>,
    ) -> Self {
        // One topic register behind both stores, the way one topics table
        // backs the catalog and progress sides in a real deployment.
        let topics = Arc::new(crate::store::TopicRegister::new());
        let catalog = Arc::new(MemoryCatalog::with_topics(Arc::clone(&topics)));
        let sessions = Arc::new(MemorySessionStore::new());
        let progress = Arc::new(MemoryProgressStore::with_topics(topics));
        let mut builder = SessionManager::builder(
            Arc::clone(&sessions) as Arc<dyn crate::store::SessionStore>,
            Arc::clone(&catalog) as Arc<dyn crate::store::CatalogStore>,
            Arc::clone(&progress) as Arc<dyn crate::store::ProgressStore>,
        )
        .config(SessionConfig::default());
        if let Some(client) = client {
            builder = builder.retrieval(client);
        }
        if let Some(telemetry) = telemetry {
            builder = builder.telemetry(telemetry);
        }
        Self {
            manager: Arc::new(builder.build()),
            catalog,
            sessions,
            progress,
        }
    }

    /// The session manager.
    #[must_use]
    pub fn manager(&self) -> &Arc<SessionManager> {
        &self.manager
    }

    /// The in-memory catalog, for seeding subjects, documents, and pools.
    #[must_use]
    pub fn catalog(&self) -> &Arc<MemoryCatalog> {
        &self.catalog
    }

    /// The in-memory session store.
    #[must_use]
    pub fn sessions(&self) -> &Arc<MemorySessionStore> {
        &self.sessions
    }

    /// The in-memory progress store.
    #[must_use]
    pub fn progress(&self) -> &Arc<MemoryProgressStore> {
        &self.progress
    }
}

impl std::fmt::Debug for PracticeRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PracticeRuntime").finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use examforge_grading::QuestionKind;
    use examforge_retrieval::{
        ChunkHit, ChunkMetadata, KeyValueStore, MemoryKeyValueStore, RateLimitConfig,
        RetrievalConfig, StaticRetrievalBackend,
    };
    use uuid::Uuid;

    use crate::error::EngineError;
    use crate::model::{
        AnswerSubmission, Document, IngestionStatus, PoolQuestion, PracticeStatus, StartMode,
        StartRequest, Subject, Topic,
    };
    use crate::store::ProgressStore;

    fn seed_subject(runtime: &PracticeRuntime) -> Subject {
        let subject = Subject {
            id: Uuid::new_v4(),
            name: "Geography".to_owned(),
            level: "S6".to_owned(),
        };
        runtime.catalog().insert_subject(subject.clone());
        subject
    }

    fn seed_document(runtime: &PracticeRuntime, subject: &Subject) -> Document {
        let document = Document {
            id: Uuid::new_v4(),
            filename: "geo_2023.pdf".to_owned(),
            file_path: None,
            subject_id: Some(subject.id),
            subject_name: subject.name.clone(),
            level: subject.level.clone(),
            ingestion: IngestionStatus::Completed,
            collection_name: None,
        };
        runtime.catalog().insert_document(document.clone());
        document
    }

    fn seed_question(
        runtime: &PracticeRuntime,
        document: &Document,
        text: &str,
        correct: &str,
        topic_id: Option<Uuid>,
    ) -> PoolQuestion {
        let question = PoolQuestion {
            id: Uuid::new_v4(),
            document_id: document.id,
            text: text.to_owned(),
            kind: QuestionKind::ShortAnswer,
            options: Vec::new(),
            correct_answer: Some(correct.to_owned()),
            topic_id,
            difficulty: Some("easy".to_owned()),
        };
        runtime.catalog().insert_question(question.clone());
        question
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

    #[tokio::test]
    async fn single_question_session_completes_with_full_marks() {
        let runtime = PracticeRuntime::bootstrap();
        let subject = seed_subject(&runtime);
        let document = seed_document(&runtime, &subject);
        let topic = Topic {
            id: Uuid::new_v4(),
            subject_name: subject.name.clone(),
            name: "Capitals".to_owned(),
        };
        runtime.catalog().insert_topic(topic.clone());
        let question = seed_question(
            &runtime,
            &document,
            "What is the capital city of Rwanda?",
            "Kigali",
            Some(topic.id),
        );
        let student = Uuid::new_v4();

        let view = runtime
            .manager()
            .start(
                student,
                StartRequest {
                    subject_id: subject.id,
                    document_id: None,
                    question_count: 1,
                    mode: StartMode::Practice,
                },
            )
            .await
            .unwrap();
        assert_eq!(view.status, PracticeStatus::InProgress);

        let served = runtime.manager().next(student, view.id).await.unwrap();
        assert_eq!(served.id, question.id);
        assert_eq!(served.topic.as_deref(), Some("Capitals"));

        let outcome = runtime
            .manager()
            .answer(
                student,
                view.id,
                AnswerSubmission {
                    question_id: Some(question.id),
                    answer_text: Some("kigali".to_owned()),
                    ..AnswerSubmission::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(outcome.is_correct, Some(true));
        assert_eq!(outcome.score, 1.0);

        let detail = runtime.manager().get(student, view.id).await.unwrap();
        assert_eq!(detail.session.status, PracticeStatus::Completed);
        assert_eq!(detail.session.answered_count, 1);
        assert_eq!(detail.session.correct_count, 1);
        assert!(detail.session.completed_at.is_some());

        // Implicit completion folded the session into per-topic progress.
        let rows = runtime.progress().progress_for_student(student).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].1.name, "Capitals");
        assert_eq!(rows[0].0.total_correct, 1);
    }

    #[tokio::test]
    async fn counters_and_accuracy_track_a_mixed_session() {
        let runtime = PracticeRuntime::bootstrap();
        let subject = seed_subject(&runtime);
        let document = seed_document(&runtime, &subject);
        let q1 = seed_question(&runtime, &document, "Q1?", "alpha", None);
        let q2 = seed_question(&runtime, &document, "Q2?", "beta", None);
        let q3 = seed_question(&runtime, &document, "Q3?", "gamma", None);
        let student = Uuid::new_v4();

        let view = runtime
            .manager()
            .start(
                student,
                StartRequest {
                    subject_id: subject.id,
                    document_id: None,
                    question_count: 3,
                    mode: StartMode::Practice,
                },
            )
            .await
            .unwrap();

        for (question, answer_text) in
            [(&q1, "alpha"), (&q2, "beta"), (&q3, "totally wrong answer")]
        {
            runtime
                .manager()
                .answer(
                    student,
                    view.id,
                    AnswerSubmission {
                        question_id: Some(question.id),
                        answer_text: Some((*answer_text).to_owned()),
                        ..AnswerSubmission::default()
                    },
                )
                .await
                .unwrap();
        }

        let detail = runtime.manager().get(student, view.id).await.unwrap();
        assert_eq!(detail.session.answered_count, 3);
        assert_eq!(detail.session.correct_count, 2);
        assert!((detail.session.accuracy - 0.6667).abs() < 1e-6);
        assert_eq!(detail.session.status, PracticeStatus::Completed);
        assert_eq!(detail.answers.len(), 3);

        // The quota is spent: answering again is invalid, asking for more is
        // exhausted.
        let again = runtime
            .manager()
            .answer(
                student,
                view.id,
                AnswerSubmission {
                    question_id: Some(q1.id),
                    answer_text: Some("alpha".to_owned()),
                    ..AnswerSubmission::default()
                },
            )
            .await;
        assert!(matches!(again, Err(EngineError::InvalidState(_))));
        let more = runtime.manager().next(student, view.id).await;
        assert!(matches!(more, Err(EngineError::Exhausted)));
    }

    #[tokio::test]
    async fn foreign_sessions_read_as_absent() {
        let runtime = PracticeRuntime::bootstrap();
        let subject = seed_subject(&runtime);
        let document = seed_document(&runtime, &subject);
        seed_question(&runtime, &document, "Q?", "A", None);
        let owner = Uuid::new_v4();
        let stranger = Uuid::new_v4();

        let view = runtime
            .manager()
            .start(owner, StartRequest::subject_practice(subject.id))
            .await
            .unwrap();

        let get = runtime.manager().get(stranger, view.id).await;
        assert!(matches!(get, Err(EngineError::NotFound("practice session"))));
        let listed = runtime.manager().list(stranger, None, 0, 20).await.unwrap();
        assert!(listed.is_empty());
    }

    #[tokio::test]
    async fn explicit_completion_aggregates_progress_exactly_once() {
        let runtime = PracticeRuntime::bootstrap();
        let subject = seed_subject(&runtime);
        let document = seed_document(&runtime, &subject);
        let question = seed_question(&runtime, &document, "Q?", "alpha", None);
        let student = Uuid::new_v4();

        let view = runtime
            .manager()
            .start(student, StartRequest::subject_practice(subject.id))
            .await
            .unwrap();
        runtime
            .manager()
            .answer(
                student,
                view.id,
                AnswerSubmission {
                    question_id: Some(question.id),
                    answer_text: Some("alpha".to_owned()),
                    ..AnswerSubmission::default()
                },
            )
            .await
            .unwrap();

        let completed = runtime.manager().complete(student, view.id).await.unwrap();
        assert_eq!(completed.status, PracticeStatus::Completed);
        let first_stamp = completed.completed_at.unwrap();

        // Re-completing re-stamps the time but never re-aggregates.
        let again = runtime.manager().complete(student, view.id).await.unwrap();
        assert!(again.completed_at.unwrap() >= first_stamp);
        let rows = runtime.progress().progress_for_student(student).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].0.attempt_count, 1);
        assert_eq!(rows[0].0.total_questions, 1);
    }

    #[tokio::test]
    async fn real_exam_mode_pins_an_ingested_document() {
        let runtime = PracticeRuntime::bootstrap();
        let subject = seed_subject(&runtime);
        let student = Uuid::new_v4();

        let empty = runtime
            .manager()
            .start(
                student,
                StartRequest {
                    subject_id: subject.id,
                    document_id: None,
                    question_count: 5,
                    mode: StartMode::RealExam,
                },
            )
            .await;
        assert!(matches!(empty, Err(EngineError::NotFound(_))));

        let document = seed_document(&runtime, &subject);
        let view = runtime
            .manager()
            .start(
                student,
                StartRequest {
                    subject_id: subject.id,
                    document_id: None,
                    question_count: 5,
                    mode: StartMode::RealExam,
                },
            )
            .await
            .unwrap();
        assert_eq!(view.document_id, Some(document.id));
    }

    #[tokio::test]
    async fn start_validates_subject_and_document_state() {
        let runtime = PracticeRuntime::bootstrap();
        let student = Uuid::new_v4();

        let missing_subject = runtime
            .manager()
            .start(student, StartRequest::subject_practice(Uuid::new_v4()))
            .await;
        assert!(matches!(missing_subject, Err(EngineError::NotFound("subject"))));

        let subject = seed_subject(&runtime);
        let missing_document = runtime
            .manager()
            .start(
                student,
                StartRequest {
                    subject_id: subject.id,
                    document_id: Some(Uuid::new_v4()),
                    question_count: 5,
                    mode: StartMode::Practice,
                },
            )
            .await;
        assert!(matches!(missing_document, Err(EngineError::NotFound("document"))));

        let pending = Document {
            id: Uuid::new_v4(),
            filename: "pending.pdf".to_owned(),
            file_path: None,
            subject_id: Some(subject.id),
            subject_name: subject.name.clone(),
            level: subject.level.clone(),
            ingestion: IngestionStatus::Pending,
            collection_name: None,
        };
        runtime.catalog().insert_document(pending.clone());
        let not_ingested = runtime
            .manager()
            .start(
                student,
                StartRequest {
                    subject_id: subject.id,
                    document_id: Some(pending.id),
                    question_count: 5,
                    mode: StartMode::Practice,
                },
            )
            .await;
        assert!(matches!(not_ingested, Err(EngineError::InvalidState(_))));
    }

    #[tokio::test]
    async fn empty_submissions_are_rejected() {
        let runtime = PracticeRuntime::bootstrap();
        let subject = seed_subject(&runtime);
        let document = seed_document(&runtime, &subject);
        seed_question(&runtime, &document, "Q?", "A", None);
        let student = Uuid::new_v4();
        let view = runtime
            .manager()
            .start(student, StartRequest::subject_practice(subject.id))
            .await
            .unwrap();

        let rejected = runtime
            .manager()
            .answer(student, view.id, AnswerSubmission::default())
            .await;
        assert!(matches!(rejected, Err(EngineError::InvalidInput(_))));
    }

    #[tokio::test]
    async fn handwritten_answers_are_transcribed_before_grading() {
        let backend = Arc::new(StaticRetrievalBackend::new());
        backend.set_chunks(vec![ChunkHit {
            score: 0.8,
            content: "Kigali is the capital of Rwanda.".to_owned(),
            metadata: ChunkMetadata::default(),
        }]);
        // One queued answer per backend call, in engine order: OCR first,
        // then the grading verdict.
        backend.push_direct_answer("Kigali");
        backend.push_direct_answer(
            r#"{"is_correct": true, "score": 1.0, "feedback": "Transcribed and correct."}"#,
        );
        let runtime = PracticeRuntime::bootstrap_with_client(client_over(backend));
        let subject = seed_subject(&runtime);
        let document = seed_document(&runtime, &subject);
        let question = seed_question(
            &runtime,
            &document,
            "What is the capital city of Rwanda?",
            "Kigali",
            None,
        );
        let student = Uuid::new_v4();
        let view = runtime
            .manager()
            .start(student, StartRequest::subject_practice(subject.id))
            .await
            .unwrap();

        let outcome = runtime
            .manager()
            .answer(
                student,
                view.id,
                AnswerSubmission {
                    question_id: Some(question.id),
                    answer_image_base64: Some("aGFuZHdyaXR0ZW4=".to_owned()),
                    ..AnswerSubmission::default()
                },
            )
            .await
            .unwrap();

        assert!(outcome.was_handwritten);
        assert_eq!(outcome.ocr_text.as_deref(), Some("Kigali"));
        assert_eq!(outcome.student_answer, "Kigali");
        assert_eq!(outcome.is_correct, Some(true));
    }

    #[tokio::test]
    async fn synthesized_question_answers_grade_without_a_pool_entry() {
        let runtime = PracticeRuntime::bootstrap();
        let subject = seed_subject(&runtime);
        let document = seed_document(&runtime, &subject);
        seed_question(&runtime, &document, "Q?", "A", None);
        let student = Uuid::new_v4();
        let view = runtime
            .manager()
            .start(student, StartRequest::subject_practice(subject.id))
            .await
            .unwrap();

        // A synthesized question arrives with a random id the catalog does
        // not know; with no backend and no expected answer it lands in
        // manual review, and the verdict stays null rather than incorrect.
        let outcome = runtime
            .manager()
            .answer(
                student,
                view.id,
                AnswerSubmission {
                    question_id: Some(Uuid::new_v4()),
                    question_text: Some("Explain erosion.".to_owned()),
                    answer_text: Some("Wind and water wear rock away.".to_owned()),
                    ..AnswerSubmission::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(outcome.is_correct, None);
        assert_eq!(outcome.score, 0.0);

        let detail = runtime.manager().get(student, view.id).await.unwrap();
        assert_eq!(detail.session.answered_count, 1);
        assert_eq!(detail.session.correct_count, 0);
    }

    #[tokio::test]
    async fn concurrent_submissions_never_exceed_the_quota() {
        let runtime = PracticeRuntime::bootstrap();
        let subject = seed_subject(&runtime);
        let document = seed_document(&runtime, &subject);
        let question = seed_question(&runtime, &document, "Q?", "alpha", None);
        let student = Uuid::new_v4();
        let view = runtime
            .manager()
            .start(
                student,
                StartRequest {
                    subject_id: subject.id,
                    document_id: None,
                    question_count: 1,
                    mode: StartMode::Practice,
                },
            )
            .await
            .unwrap();

        let mut handles = Vec::new();
        for _ in 0..4 {
            let manager = Arc::clone(runtime.manager());
            let submission = AnswerSubmission {
                question_id: Some(question.id),
                answer_text: Some("alpha".to_owned()),
                ..AnswerSubmission::default()
            };
            handles.push(tokio::spawn(async move {
                manager.answer(student, view.id, submission).await
            }));
        }
        let mut accepted = 0;
        for handle in handles {
            if handle.await.unwrap().is_ok() {
                accepted += 1;
            }
        }
        assert_eq!(accepted, 1);

        let detail = runtime.manager().get(student, view.id).await.unwrap();
        assert_eq!(detail.session.answered_count, 1);
        assert_eq!(detail.session.status, PracticeStatus::Completed);
    }

    #[tokio::test]
    async fn unreadable_handwriting_grades_the_placeholder_text() {
        // No retrieval client means no OCR; the submission still goes
        // through with the placeholder transcript instead of failing.
        let runtime = PracticeRuntime::bootstrap();
        let subject = seed_subject(&runtime);
        let document = seed_document(&runtime, &subject);
        let question = seed_question(&runtime, &document, "Q?", "Kigali", None);
        let student = Uuid::new_v4();
        let view = runtime
            .manager()
            .start(student, StartRequest::subject_practice(subject.id))
            .await
            .unwrap();

        let outcome = runtime
            .manager()
            .answer(
                student,
                view.id,
                AnswerSubmission {
                    question_id: Some(question.id),
                    answer_image_base64: Some("aGFuZHdyaXR0ZW4=".to_owned()),
                    ..AnswerSubmission::default()
                },
            )
            .await
            .unwrap();
        assert!(outcome.was_handwritten);
        assert_eq!(outcome.student_answer, "[Could not read handwritten answer]");
        assert_eq!(outcome.is_correct, Some(false));
    }

    #[tokio::test]
    async fn progress_overview_reflects_completed_sessions() {
        let runtime = PracticeRuntime::bootstrap();
        let subject = seed_subject(&runtime);
        let document = seed_document(&runtime, &subject);
        let question = seed_question(&runtime, &document, "Q?", "alpha", None);
        let student = Uuid::new_v4();

        let view = runtime
            .manager()
            .start(
                student,
                StartRequest {
                    subject_id: subject.id,
                    document_id: None,
                    question_count: 1,
                    mode: StartMode::Practice,
                },
            )
            .await
            .unwrap();
        runtime
            .manager()
            .answer(
                student,
                view.id,
                AnswerSubmission {
                    question_id: Some(question.id),
                    answer_text: Some("alpha".to_owned()),
                    ..AnswerSubmission::default()
                },
            )
            .await
            .unwrap();

        let overview = runtime.manager().progress_overview(student).await.unwrap();
        assert_eq!(overview.total_attempts, 1);
        assert_eq!(overview.overall_accuracy, 1.0);
        assert!(overview.weak_topics.is_empty());
    }

    #[tokio::test]
    async fn abandoned_sessions_reject_completion() {
        let runtime = PracticeRuntime::bootstrap();
        let subject = seed_subject(&runtime);
        let document = seed_document(&runtime, &subject);
        seed_question(&runtime, &document, "Q?", "A", None);
        let student = Uuid::new_v4();
        let view = runtime
            .manager()
            .start(student, StartRequest::subject_practice(subject.id))
            .await
            .unwrap();

        let abandoned = runtime.manager().abandon(student, view.id).await.unwrap();
        assert_eq!(abandoned.status, PracticeStatus::Abandoned);
        assert!(abandoned.completed_at.is_some());

        let complete = runtime.manager().complete(student, view.id).await;
        assert!(matches!(complete, Err(EngineError::InvalidState(_))));
        // Abandonment never feeds progress.
        let rows = runtime.progress().progress_for_student(student).await.unwrap();
        assert!(rows.is_empty());
    }
}
