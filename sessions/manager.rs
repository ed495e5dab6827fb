use std::{collections::HashMap, sync::Arc};

use chrono::Utc;
use examforge_grading::{GradeRequest, GradingPipeline, QuestionKind};
use examforge_retrieval::{CallerIdentity, RetrievalClient, RetrievalError};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::json;
use shared_logging::LogLevel;
use uuid::Uuid;

use crate::{
    error::EngineError,
    model::{
        AnswerOutcome, AnswerSubmission, PracticeAnswer, PracticeSession, PracticeStatus,
        ProgressOverview, ServedQuestion, SessionDetail, SessionView, StartMode, StartRequest,
        Subject,
    },
    progress::ProgressAggregator,
    resolver::QuestionSourceResolver,
    store::{CatalogDirectory, CatalogStore, ProgressStore, SessionStore},
    telemetry::SessionTelemetry,
};

/// Engine-level tunables.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Question quota when a start request does not name one.
    pub default_question_count: u32,
    /// Accuracy below which a topic counts as weak in the overview.
    pub weak_topic_threshold: f32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            default_question_count: 5,
            weak_topic_threshold: 0.6,
        }
    }
}

/// Builder wiring the manager's collaborators.
pub struct SessionManagerBuilder {
    sessions: Arc<dyn SessionStore>,
    catalog: Arc<dyn CatalogStore>,
    progress: Arc<dyn ProgressStore>,
    client: Option<Arc<RetrievalClient>>,
    config: SessionConfig,
    seed: Option<u64>,
    telemetry: Option<SessionTelemetry>,
}

impl SessionManagerBuilder {
    /// Attaches the retrieval client, enabling question synthesis, context
    /// grading, and handwriting OCR.
    #[must_use]
    pub fn retrieval(mut self, client: Arc<RetrievalClient>) -> Self {
        self.client = Some(client);
        self
    }

    /// Overrides the engine config.
    #[must_use]
    pub fn config(mut self, config: SessionConfig) -> Self {
        self.config = config;
        self
    }

    /// Pins the random sequence used for document picks and question draws.
    #[must_use]
    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Attaches telemetry.
    #[must_use]
    pub fn telemetry(mut self, telemetry: SessionTelemetry) -> Self {
        self.telemetry = Some(telemetry);
        self
    }

    /// Finalizes the manager.
    #[must_use]
    pub fn build(self) -> SessionManager {
        let directory = Arc::new(CatalogDirectory::new(Arc::clone(&self.catalog)));
        let grading =
            GradingPipeline::new(self.client.clone()).with_directory(directory);
        let mut resolver =
            QuestionSourceResolver::new(Arc::clone(&self.catalog), self.client.clone());
        if let Some(seed) = self.seed {
            resolver = resolver.with_seed(seed);
        }
        let aggregator =
            ProgressAggregator::new(Arc::clone(&self.catalog), Arc::clone(&self.progress));
        SessionManager {
            sessions: self.sessions,
            catalog: self.catalog,
            resolver,
            grading,
            aggregator,
            client: self.client,
            config: self.config,
            locks: Mutex::new(HashMap::new()),
            telemetry: self.telemetry,
        }
    }
}

/// The practice-session state machine.
///
/// Operations are request-per-call; `answer` submissions against one session
/// are serialized through a per-session async mutex so the quota invariant
/// holds under concurrent requests from the same student. All reads are
/// restricted to the owning student; foreign sessions read as absent.
pub struct SessionManager {
    sessions: Arc<dyn SessionStore>,
    catalog: Arc<dyn CatalogStore>,
    resolver: QuestionSourceResolver,
    grading: GradingPipeline,
    aggregator: ProgressAggregator,
    client: Option<Arc<RetrievalClient>>,
    config: SessionConfig,
    locks: Mutex<HashMap<Uuid, Arc<tokio::sync::Mutex<()>>>>,
    telemetry: Option<SessionTelemetry>,
}

impl SessionManager {
    /// Starts wiring a manager over the given stores.
    #[must_use]
    pub fn builder(
        sessions: Arc<dyn SessionStore>,
        catalog: Arc<dyn CatalogStore>,
        progress: Arc<dyn ProgressStore>,
    ) -> SessionManagerBuilder {
        SessionManagerBuilder {
            sessions,
            catalog,
            progress,
            client: None,
            config: SessionConfig::default(),
            seed: None,
            telemetry: None,
        }
    }

    /// Starts a new session for the student.
    ///
    /// Subject-wide by default; pinned to one paper when `document_id` is
    /// given, or to a randomly drawn paper in real-exam mode. The referenced
    /// subject and document must exist, and a pinned document must have
    /// finished ingestion.
    pub async fn start(
        &self,
        student_id: Uuid,
        request: StartRequest,
    ) -> Result<SessionView, EngineError> {
        let question_count = if request.question_count == 0 {
            self.config.default_question_count
        } else {
            request.question_count
        };
        if question_count == 0 {
            return Err(EngineError::InvalidInput(
                "question count must be positive".to_owned(),
            ));
        }
        let subject = self
            .catalog
            .subject(request.subject_id)
            .await?
            .ok_or(EngineError::NotFound("subject"))?;

        let mut collection = subject.collection_name();
        let mut document_id = None;

        if let Some(requested_doc) = request.document_id {
            let document = self
                .catalog
                .document(requested_doc)
                .await?
                .ok_or(EngineError::NotFound("document"))?;
            if document.ingestion != crate::model::IngestionStatus::Completed {
                return Err(EngineError::InvalidState(
                    "document has not finished ingestion".to_owned(),
                ));
            }
            collection = document.collection();
            document_id = Some(document.id);
        } else if request.mode == StartMode::RealExam {
            let document = self
                .resolver
                .pick_document(&subject)
                .await?
                .ok_or(EngineError::NotFound("ingested exam paper for this subject"))?;
            collection = document.collection();
            document_id = Some(document.id);
        }

        let session = PracticeSession {
            id: Uuid::new_v4(),
            student_id,
            subject_id: Some(subject.id),
            document_id,
            collection: Some(collection),
            status: PracticeStatus::InProgress,
            total_questions: question_count,
            answered_count: 0,
            correct_count: 0,
            created_at: Utc::now(),
            completed_at: None,
        };
        self.sessions.insert_session(session.clone()).await?;
        self.emit(
            "practice.session.started",
            json!({
                "session_id": session.id,
                "subject": subject.name,
                "total_questions": session.total_questions,
                "mode": request.mode,
            }),
        );
        Ok(SessionView::from_session(&session))
    }

    /// Serves the next question, drawing from the pools first and
    /// synthesizing through the retrieval backend when they run dry.
    pub async fn next(
        &self,
        student_id: Uuid,
        session_id: Uuid,
    ) -> Result<ServedQuestion, EngineError> {
        let session = self.owned_session(student_id, session_id).await?;
        if session.answered_count >= session.total_questions {
            return Err(EngineError::Exhausted);
        }

        let answers = self.sessions.answers(session_id).await?;
        let answered_ids: Vec<Uuid> = answers.iter().filter_map(|a| a.question_id).collect();
        let answered_texts: Vec<String> = answers
            .iter()
            .filter(|a| !a.question_text.is_empty())
            .map(|a| a.question_text.clone())
            .collect();
        let question_number = session.answered_count + 1;
        let subject = self.session_subject(&session).await?;

        self.resolver
            .next_question(
                &CallerIdentity::User(student_id),
                &session,
                subject.as_ref(),
                &answered_ids,
                &answered_texts,
                question_number,
            )
            .await?
            .ok_or(EngineError::Exhausted)
    }

    /// Grades one submitted answer and advances the session, completing it
    /// implicitly when the quota is reached.
    pub async fn answer(
        &self,
        student_id: Uuid,
        session_id: Uuid,
        submission: AnswerSubmission,
    ) -> Result<AnswerOutcome, EngineError> {
        let lock = self.lock_for(session_id);
        let _guard = lock.lock().await;

        let mut session = self.owned_session(student_id, session_id).await?;
        if session.status != PracticeStatus::InProgress {
            return Err(EngineError::InvalidState(
                "practice session is not active".to_owned(),
            ));
        }
        let caller = CallerIdentity::User(student_id);

        // Resolve the graded question. Only ids that exist in the pool are
        // kept on the answer record; synthesized questions arrive with a
        // random id and grade from their submitted text.
        let mut question_text = submission.question_text.clone().unwrap_or_default();
        let mut expected_answer = None;
        let mut kind = QuestionKind::ShortAnswer;
        let mut pool_question_id = None;
        if let Some(question_id) = submission.question_id {
            if let Some(question) = self.catalog.question(question_id).await? {
                pool_question_id = Some(question.id);
                question_text = question.text;
                expected_answer = question.correct_answer;
                kind = question.kind;
            }
        }

        let mut student_answer = submission.answer_text.clone().unwrap_or_default();
        let mut is_handwritten = false;
        let mut ocr_text = None;
        if let Some(image) = &submission.answer_image_base64 {
            is_handwritten = true;
            ocr_text = self.transcribe(&caller, image, &question_text).await?;
            if let Some(transcript) = &ocr_text {
                if !transcript.trim().is_empty() {
                    student_answer = transcript.clone();
                }
            }
            if student_answer.trim().is_empty() {
                student_answer = "[Could not read handwritten answer]".to_owned();
            }
        }
        if student_answer.trim().is_empty() {
            return Err(EngineError::InvalidInput("no answer provided".to_owned()));
        }

        let report = self
            .grading
            .grade(
                &caller,
                &GradeRequest {
                    kind,
                    question_text: question_text.clone(),
                    student_answer: student_answer.clone(),
                    expected_answer: expected_answer.clone(),
                    collection: session.collection.clone(),
                },
            )
            .await?;

        let record = PracticeAnswer {
            id: Uuid::new_v4(),
            session_id: session.id,
            question_id: pool_question_id,
            question_text: question_text.clone(),
            question_kind: kind,
            student_answer: student_answer.clone(),
            is_handwritten,
            ocr_text: ocr_text.clone(),
            is_correct: report.is_correct,
            score: report.score,
            feedback: report.feedback.clone(),
            correct_answer: expected_answer.or_else(|| report.correct_answer.clone()),
            sources: report.sources.clone(),
            created_at: Utc::now(),
        };
        let correct_answer = record.correct_answer.clone();
        self.sessions.append_answer(record).await?;

        session.answered_count += 1;
        if report.is_correct == Some(true) {
            session.correct_count += 1;
        }
        if session.answered_count >= session.total_questions {
            self.complete_session(&mut session).await?;
        }
        self.sessions.update_session(&session).await?;

        self.emit(
            "practice.answer.graded",
            json!({
                "session_id": session.id,
                "answered": session.answered_count,
                "correct": report.is_correct,
                "score": report.score,
            }),
        );
        Ok(AnswerOutcome {
            question_text,
            student_answer,
            is_correct: report.is_correct,
            score: report.score,
            feedback: report.feedback,
            correct_answer,
            source_references: report.sources,
            was_handwritten: is_handwritten,
            ocr_text,
        })
    }

    /// Completes the session explicitly. Re-completing an already-completed
    /// session only re-stamps the completion time; progress is aggregated
    /// exactly once, on the transition out of `InProgress`.
    pub async fn complete(
        &self,
        student_id: Uuid,
        session_id: Uuid,
    ) -> Result<SessionView, EngineError> {
        let mut session = self.owned_session(student_id, session_id).await?;
        match session.status {
            PracticeStatus::InProgress => {
                self.complete_session(&mut session).await?;
                self.sessions.update_session(&session).await?;
            }
            PracticeStatus::Completed => {
                session.completed_at = Some(Utc::now());
                self.sessions.update_session(&session).await?;
            }
            PracticeStatus::Abandoned => {
                return Err(EngineError::InvalidState(
                    "practice session was abandoned".to_owned(),
                ));
            }
        }
        Ok(SessionView::from_session(&session))
    }

    /// Marks the session abandoned. The engine never does this on its own;
    /// abandonment is an external policy decision. Abandoned sessions do not
    /// feed progress.
    pub async fn abandon(
        &self,
        student_id: Uuid,
        session_id: Uuid,
    ) -> Result<SessionView, EngineError> {
        let mut session = self.owned_session(student_id, session_id).await?;
        if session.status.is_terminal() {
            return Err(EngineError::InvalidState(
                "practice session already finished".to_owned(),
            ));
        }
        session.status = PracticeStatus::Abandoned;
        session.completed_at = Some(Utc::now());
        self.sessions.update_session(&session).await?;
        self.emit(
            "practice.session.abandoned",
            json!({ "session_id": session.id }),
        );
        Ok(SessionView::from_session(&session))
    }

    /// Full session projection with every graded answer.
    pub async fn get(
        &self,
        student_id: Uuid,
        session_id: Uuid,
    ) -> Result<SessionDetail, EngineError> {
        let session = self.owned_session(student_id, session_id).await?;
        let answers = self
            .sessions
            .answers(session_id)
            .await?
            .into_iter()
            .map(|answer| AnswerOutcome {
                question_text: answer.question_text,
                student_answer: answer.student_answer,
                is_correct: answer.is_correct,
                score: answer.score,
                feedback: answer.feedback,
                correct_answer: answer.correct_answer,
                source_references: answer.sources,
                was_handwritten: answer.is_handwritten,
                ocr_text: answer.ocr_text,
            })
            .collect();
        Ok(SessionDetail {
            session: SessionView::from_session(&session),
            answers,
        })
    }

    /// The student's sessions, newest first, optionally filtered by subject.
    pub async fn list(
        &self,
        student_id: Uuid,
        subject_id: Option<Uuid>,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<SessionView>, EngineError> {
        let sessions = self
            .sessions
            .sessions_for_student(student_id, subject_id, offset, limit)
            .await?;
        Ok(sessions.iter().map(SessionView::from_session).collect())
    }

    /// The student's per-topic mastery overview.
    pub async fn progress_overview(
        &self,
        student_id: Uuid,
    ) -> Result<ProgressOverview, EngineError> {
        self.aggregator
            .overview(student_id, self.config.weak_topic_threshold)
            .await
    }

    async fn complete_session(&self, session: &mut PracticeSession) -> Result<(), EngineError> {
        session.status = PracticeStatus::Completed;
        session.completed_at = Some(Utc::now());
        let answers = self.sessions.answers(session.id).await?;
        let subject = self.session_subject(session).await?;
        self.aggregator
            .record_session(session, &answers, subject.as_ref())
            .await?;
        self.emit(
            "practice.session.completed",
            json!({
                "session_id": session.id,
                "answered": session.answered_count,
                "correct": session.correct_count,
            }),
        );
        Ok(())
    }

    async fn transcribe(
        &self,
        caller: &CallerIdentity,
        image_base64: &str,
        question_text: &str,
    ) -> Result<Option<String>, EngineError> {
        let Some(client) = &self.client else {
            return Ok(None);
        };
        match client
            .ocr(caller, image_base64, &ocr_prompt(question_text))
            .await
        {
            Ok(text) => Ok(Some(text)),
            Err(RetrievalError::RateLimited) => Err(EngineError::RateLimited),
            Err(err) => {
                tracing::error!(%err, "handwritten OCR failed");
                Ok(None)
            }
        }
    }

    async fn session_subject(
        &self,
        session: &PracticeSession,
    ) -> Result<Option<Subject>, EngineError> {
        match session.subject_id {
            Some(subject_id) => Ok(self.catalog.subject(subject_id).await?),
            None => Ok(None),
        }
    }

    async fn owned_session(
        &self,
        student_id: Uuid,
        session_id: Uuid,
    ) -> Result<PracticeSession, EngineError> {
        self.sessions
            .session(session_id)
            .await?
            .filter(|session| session.student_id == student_id)
            .ok_or(EngineError::NotFound("practice session"))
    }

    fn lock_for(&self, session_id: Uuid) -> Arc<tokio::sync::Mutex<()>> {
        Arc::clone(
            self.locks
                .lock()
                .entry(session_id)
                .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(()))),
        )
    }

    fn emit(&self, name: &str, payload: serde_json::Value) {
        if let Some(telemetry) = &self.telemetry {
            telemetry.log(LogLevel::Info, name, payload);
        }
    }
}

impl std::fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionManager")
            .field("config", &self.config)
            .field("backend", &self.client.is_some())
            .finish()
    }
}

fn ocr_prompt(question_text: &str) -> String {
    format!(
        "This is a photograph/scan of a student's handwritten answer to an exam question.\n\
         Please transcribe the handwritten text as accurately as possible.\n\
         Preserve mathematical notation where possible (use standard notation).\n\
         If parts are unclear, indicate with [unclear].\n\n\
         The question was: {question_text}\n\n\
         Transcribe the student's handwritten response:"
    )
}
