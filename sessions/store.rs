use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use examforge_retrieval::DocumentDirectory;
use parking_lot::RwLock;
use uuid::Uuid;

use crate::model::{
    Document, IngestionStatus, PoolQuestion, PracticeAnswer, PracticeSession, ProgressRecord,
    Subject, Topic,
};

/// Persistence-layer failure. The engine treats the stores as a networked
/// database; every operation can fail independently of the data it carries.
#[derive(Debug, thiserror::Error)]
#[error("persistence failure: {0}")]
pub struct PersistenceError(pub String);

/// Storage for sessions and their answers.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Persists a new session.
    async fn insert_session(&self, session: PracticeSession) -> Result<(), PersistenceError>;

    /// Loads a session by id.
    async fn session(&self, id: Uuid) -> Result<Option<PracticeSession>, PersistenceError>;

    /// Writes back a mutated session.
    async fn update_session(&self, session: &PracticeSession) -> Result<(), PersistenceError>;

    /// Appends one graded answer. Answers are immutable once appended.
    async fn append_answer(&self, answer: PracticeAnswer) -> Result<(), PersistenceError>;

    /// All answers of a session in submission order.
    async fn answers(&self, session_id: Uuid) -> Result<Vec<PracticeAnswer>, PersistenceError>;

    /// A student's sessions, newest first, optionally filtered by subject.
    async fn sessions_for_student(
        &self,
        student_id: Uuid,
        subject_id: Option<Uuid>,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<PracticeSession>, PersistenceError>;
}

/// Read-only lookup of subjects, documents, and question pools.
#[async_trait]
pub trait CatalogStore: Send + Sync {
    /// Subject by id.
    async fn subject(&self, id: Uuid) -> Result<Option<Subject>, PersistenceError>;

    /// Document by id.
    async fn document(&self, id: Uuid) -> Result<Option<Document>, PersistenceError>;

    /// Ingested documents of a subject: linked by subject id where the link
    /// exists, matched by subject name and level otherwise.
    async fn ingested_documents(&self, subject: &Subject)
        -> Result<Vec<Document>, PersistenceError>;

    /// Pool question by id.
    async fn question(&self, id: Uuid) -> Result<Option<PoolQuestion>, PersistenceError>;

    /// Pool questions across the given documents, excluding already-served ids.
    async fn questions_for_documents(
        &self,
        document_ids: &[Uuid],
        exclude: &[Uuid],
    ) -> Result<Vec<PoolQuestion>, PersistenceError>;

    /// Topic by id.
    async fn topic(&self, id: Uuid) -> Result<Option<Topic>, PersistenceError>;

    /// Document whose file name (or stored file-path basename, covering
    /// upload-prefixed names) matches a retrieved chunk's file name.
    async fn document_for_file(
        &self,
        file_name: &str,
    ) -> Result<Option<Document>, PersistenceError>;
}

/// Storage for per-topic mastery aggregates.
#[async_trait]
pub trait ProgressStore: Send + Sync {
    /// Finds a topic by subject and name, creating it on first use.
    async fn find_or_create_topic(
        &self,
        subject_name: &str,
        topic_name: &str,
    ) -> Result<Topic, PersistenceError>;

    /// Loads a student's record for one topic.
    async fn progress(
        &self,
        student_id: Uuid,
        topic_id: Uuid,
    ) -> Result<Option<ProgressRecord>, PersistenceError>;

    /// Inserts or replaces a record.
    async fn upsert_progress(&self, record: ProgressRecord) -> Result<(), PersistenceError>;

    /// Every record of a student, paired with its topic.
    async fn progress_for_student(
        &self,
        student_id: Uuid,
    ) -> Result<Vec<(ProgressRecord, Topic)>, PersistenceError>;
}

/// Adapts a catalog into the retrieval-side directory seam so grading and
/// question synthesis can link chunk file names back to document ids.
pub struct CatalogDirectory {
    catalog: Arc<dyn CatalogStore>,
}

impl CatalogDirectory {
    /// Wraps a catalog.
    #[must_use]
    pub fn new(catalog: Arc<dyn CatalogStore>) -> Self {
        Self { catalog }
    }
}

#[async_trait]
impl DocumentDirectory for CatalogDirectory {
    async fn document_id_for(&self, file_name: &str) -> Option<Uuid> {
        self.catalog
            .document_for_file(file_name)
            .await
            .ok()
            .flatten()
            .map(|document| document.id)
    }
}

/// Shared in-memory topics register, standing in for the single topics
/// table the catalog reads and the progress store writes. Both memory
/// stores must see the same register for topic joins to work.
#[derive(Debug, Default)]
pub struct TopicRegister {
    topics: RwLock<HashMap<Uuid, Topic>>,
}

impl TopicRegister {
    /// Creates an empty register.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a topic.
    pub fn insert(&self, topic: Topic) {
        self.topics.write().insert(topic.id, topic);
    }

    /// Topic by id.
    #[must_use]
    pub fn get(&self, id: Uuid) -> Option<Topic> {
        self.topics.read().get(&id).cloned()
    }

    /// Topic by subject and name.
    #[must_use]
    pub fn find(&self, subject_name: &str, topic_name: &str) -> Option<Topic> {
        self.topics
            .read()
            .values()
            .find(|topic| topic.subject_name == subject_name && topic.name == topic_name)
            .cloned()
    }
}

/// In-memory session store for wiring and tests.
#[derive(Debug, Default)]
pub struct MemorySessionStore {
    sessions: RwLock<HashMap<Uuid, PracticeSession>>,
    answers: RwLock<HashMap<Uuid, Vec<PracticeAnswer>>>,
}

impl MemorySessionStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn insert_session(&self, session: PracticeSession) -> Result<(), PersistenceError> {
        self.sessions.write().insert(session.id, session);
        Ok(())
    }

    async fn session(&self, id: Uuid) -> Result<Option<PracticeSession>, PersistenceError> {
        Ok(self.sessions.read().get(&id).cloned())
    }

    async fn update_session(&self, session: &PracticeSession) -> Result<(), PersistenceError> {
        self.sessions.write().insert(session.id, session.clone());
        Ok(())
    }

    async fn append_answer(&self, answer: PracticeAnswer) -> Result<(), PersistenceError> {
        self.answers
            .write()
            .entry(answer.session_id)
            .or_default()
            .push(answer);
        Ok(())
    }

    async fn answers(&self, session_id: Uuid) -> Result<Vec<PracticeAnswer>, PersistenceError> {
        Ok(self
            .answers
            .read()
            .get(&session_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn sessions_for_student(
        &self,
        student_id: Uuid,
        subject_id: Option<Uuid>,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<PracticeSession>, PersistenceError> {
        let mut sessions: Vec<PracticeSession> = self
            .sessions
            .read()
            .values()
            .filter(|session| session.student_id == student_id)
            .filter(|session| subject_id.is_none() || session.subject_id == subject_id)
            .cloned()
            .collect();
        sessions.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(sessions.into_iter().skip(offset).take(limit).collect())
    }
}

/// In-memory catalog for wiring and tests.
#[derive(Debug, Default)]
pub struct MemoryCatalog {
    subjects: RwLock<HashMap<Uuid, Subject>>,
    documents: RwLock<HashMap<Uuid, Document>>,
    questions: RwLock<HashMap<Uuid, PoolQuestion>>,
    topics: Arc<TopicRegister>,
}

impl MemoryCatalog {
    /// Creates a catalog with its own topic register.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a catalog over a shared topic register.
    #[must_use]
    pub fn with_topics(topics: Arc<TopicRegister>) -> Self {
        Self {
            topics,
            ..Self::default()
        }
    }

    /// Registers a subject.
    pub fn insert_subject(&self, subject: Subject) {
        self.subjects.write().insert(subject.id, subject);
    }

    /// Registers a document.
    pub fn insert_document(&self, document: Document) {
        self.documents.write().insert(document.id, document);
    }

    /// Registers a pool question.
    pub fn insert_question(&self, question: PoolQuestion) {
        self.questions.write().insert(question.id, question);
    }

    /// Registers a topic.
    pub fn insert_topic(&self, topic: Topic) {
        self.topics.insert(topic);
    }
}

#[async_trait]
impl CatalogStore for MemoryCatalog {
    async fn subject(&self, id: Uuid) -> Result<Option<Subject>, PersistenceError> {
        Ok(self.subjects.read().get(&id).cloned())
    }

    async fn document(&self, id: Uuid) -> Result<Option<Document>, PersistenceError> {
        Ok(self.documents.read().get(&id).cloned())
    }

    async fn ingested_documents(
        &self,
        subject: &Subject,
    ) -> Result<Vec<Document>, PersistenceError> {
        let documents = self.documents.read();
        let ingested = documents
            .values()
            .filter(|doc| doc.ingestion == IngestionStatus::Completed);

        let linked: Vec<Document> = ingested
            .clone()
            .filter(|doc| doc.subject_id == Some(subject.id))
            .cloned()
            .collect();
        if !linked.is_empty() {
            return Ok(linked);
        }
        Ok(ingested
            .filter(|doc| doc.subject_name == subject.name && doc.level == subject.level)
            .cloned()
            .collect())
    }

    async fn question(&self, id: Uuid) -> Result<Option<PoolQuestion>, PersistenceError> {
        Ok(self.questions.read().get(&id).cloned())
    }

    async fn questions_for_documents(
        &self,
        document_ids: &[Uuid],
        exclude: &[Uuid],
    ) -> Result<Vec<PoolQuestion>, PersistenceError> {
        Ok(self
            .questions
            .read()
            .values()
            .filter(|question| document_ids.contains(&question.document_id))
            .filter(|question| !exclude.contains(&question.id))
            .cloned()
            .collect())
    }

    async fn topic(&self, id: Uuid) -> Result<Option<Topic>, PersistenceError> {
        Ok(self.topics.get(id))
    }

    async fn document_for_file(
        &self,
        file_name: &str,
    ) -> Result<Option<Document>, PersistenceError> {
        let documents = self.documents.read();
        if let Some(doc) = documents.values().find(|doc| doc.filename == file_name) {
            return Ok(Some(doc.clone()));
        }
        Ok(documents
            .values()
            .find(|doc| {
                doc.file_path
                    .as_deref()
                    .and_then(|path| path.rsplit('/').next())
                    .is_some_and(|basename| basename == file_name)
            })
            .cloned())
    }
}

/// In-memory progress store for wiring and tests.
#[derive(Debug, Default)]
pub struct MemoryProgressStore {
    topics: Arc<TopicRegister>,
    records: RwLock<HashMap<(Uuid, Uuid), ProgressRecord>>,
}

impl MemoryProgressStore {
    /// Creates a store with its own topic register.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store over a shared topic register.
    #[must_use]
    pub fn with_topics(topics: Arc<TopicRegister>) -> Self {
        Self {
            topics,
            ..Self::default()
        }
    }
}

#[async_trait]
impl ProgressStore for MemoryProgressStore {
    async fn find_or_create_topic(
        &self,
        subject_name: &str,
        topic_name: &str,
    ) -> Result<Topic, PersistenceError> {
        if let Some(topic) = self.topics.find(subject_name, topic_name) {
            return Ok(topic);
        }
        let topic = Topic {
            id: Uuid::new_v4(),
            subject_name: subject_name.to_owned(),
            name: topic_name.to_owned(),
        };
        self.topics.insert(topic.clone());
        Ok(topic)
    }

    async fn progress(
        &self,
        student_id: Uuid,
        topic_id: Uuid,
    ) -> Result<Option<ProgressRecord>, PersistenceError> {
        Ok(self.records.read().get(&(student_id, topic_id)).cloned())
    }

    async fn upsert_progress(&self, record: ProgressRecord) -> Result<(), PersistenceError> {
        self.records
            .write()
            .insert((record.student_id, record.topic_id), record);
        Ok(())
    }

    async fn progress_for_student(
        &self,
        student_id: Uuid,
    ) -> Result<Vec<(ProgressRecord, Topic)>, PersistenceError> {
        Ok(self
            .records
            .read()
            .values()
            .filter(|record| record.student_id == student_id)
            .filter_map(|record| {
                self.topics
                    .get(record.topic_id)
                    .map(|topic| (record.clone(), topic))
            })
            .collect())
    }
}
