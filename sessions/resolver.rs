use std::sync::Arc;

use examforge_grading::{parse::extract_json_object, QuestionKind};
use examforge_retrieval::{CallerIdentity, ChunkHit, RetrievalClient, RetrievalError};
use parking_lot::Mutex;
use rand::{rngs::SmallRng, seq::SliceRandom, SeedableRng};
use serde::Deserialize;
use uuid::Uuid;

use crate::{
    error::EngineError,
    model::{Document, PracticeSession, QuestionSourceRef, ServedQuestion, Subject},
    store::CatalogStore,
};

/// Seed phrases mixed into the retrieval query so consecutive syntheses pull
/// different chunks from the collection.
pub const RETRIEVAL_SEEDS: [&str; 13] = [
    "important concepts and definitions",
    "key facts and figures",
    "practical applications",
    "cause and effect relationships",
    "comparisons and differences",
    "processes and procedures",
    "examples and illustrations",
    "principles and laws",
    "classifications and categories",
    "problems and solutions",
    "experiments and observations",
    "historical events and dates",
    "formulas and calculations",
];

struct QuestionTemplate {
    json_label: &'static str,
    instruction: &'static str,
}

const QUESTION_TEMPLATES: [QuestionTemplate; 5] = [
    QuestionTemplate {
        json_label: "short-answer",
        instruction: "The question should require a brief factual answer (1-3 sentences). \
             Set \"question_type\" to \"short-answer\".",
    },
    QuestionTemplate {
        json_label: "multiple-choice",
        instruction: "The question should be multiple-choice with 4 options (A, B, C, D). \
             Include the options as a list in the \"options\" field.",
    },
    QuestionTemplate {
        json_label: "fill-in-the-blank",
        instruction: "The question should have a blank (indicated by ___) that the student \
             fills in. Set \"question_type\" to \"fill-in-the-blank\".",
    },
    QuestionTemplate {
        json_label: "true-or-false",
        instruction: "The question should be a true-or-false statement. Set \"question_type\" \
             to \"true-or-false\" and \"correct_answer\" to \"True\" or \"False\".",
    },
    QuestionTemplate {
        json_label: "short-answer",
        instruction: "Ask the student to explain a concept or process. Set \"question_type\" \
             to \"short-answer\".",
    },
];

#[derive(Debug, Deserialize)]
struct GeneratedQuestion {
    #[serde(default)]
    text: String,
    #[serde(default)]
    question_type: Option<String>,
    #[serde(default)]
    topic: Option<String>,
    #[serde(default)]
    difficulty: Option<String>,
    #[serde(default)]
    options: Option<serde_json::Value>,
}

/// Picks the next question for a session: an unanswered pool question drawn
/// uniformly at random (from the pinned document, else from every ingested
/// document of the subject), falling back to RAG synthesis when the pools
/// run dry. Randomness is injectable so tests can pin the sequence.
pub struct QuestionSourceResolver {
    catalog: Arc<dyn CatalogStore>,
    client: Option<Arc<RetrievalClient>>,
    rng: Mutex<SmallRng>,
    synthesis_top_k: usize,
    chunk_limit: usize,
    avoid_window: usize,
}

impl QuestionSourceResolver {
    /// Creates a resolver seeded from entropy.
    #[must_use]
    pub fn new(catalog: Arc<dyn CatalogStore>, client: Option<Arc<RetrievalClient>>) -> Self {
        Self {
            catalog,
            client,
            rng: Mutex::new(SmallRng::from_entropy()),
            synthesis_top_k: 8,
            chunk_limit: 4,
            avoid_window: 10,
        }
    }

    /// Pins the random sequence, for deterministic tests.
    #[must_use]
    pub fn with_seed(self, seed: u64) -> Self {
        Self {
            rng: Mutex::new(SmallRng::seed_from_u64(seed)),
            ..self
        }
    }

    /// Draws one ingested document of the subject uniformly at random, for
    /// real-exam mode.
    pub async fn pick_document(
        &self,
        subject: &Subject,
    ) -> Result<Option<Document>, EngineError> {
        let documents = self.catalog.ingested_documents(subject).await?;
        Ok(documents.choose(&mut *self.rng.lock()).cloned())
    }

    /// Resolves the next question, or `None` when neither the pools nor
    /// synthesis can produce one.
    pub async fn next_question(
        &self,
        caller: &CallerIdentity,
        session: &PracticeSession,
        subject: Option<&Subject>,
        answered_ids: &[Uuid],
        answered_texts: &[String],
        question_number: u32,
    ) -> Result<Option<ServedQuestion>, EngineError> {
        if let Some(question) = self
            .pool_question(session, subject, answered_ids, question_number)
            .await?
        {
            return Ok(Some(question));
        }
        self.synthesize(caller, session, subject, answered_texts, question_number)
            .await
    }

    async fn pool_question(
        &self,
        session: &PracticeSession,
        subject: Option<&Subject>,
        answered_ids: &[Uuid],
        question_number: u32,
    ) -> Result<Option<ServedQuestion>, EngineError> {
        let document_ids: Vec<Uuid> = if let Some(document_id) = session.document_id {
            vec![document_id]
        } else if let Some(subject) = subject {
            self.catalog
                .ingested_documents(subject)
                .await?
                .into_iter()
                .map(|doc| doc.id)
                .collect()
        } else {
            Vec::new()
        };
        if document_ids.is_empty() {
            return Ok(None);
        }

        let candidates = self
            .catalog
            .questions_for_documents(&document_ids, answered_ids)
            .await?;
        let Some(question) = candidates.choose(&mut *self.rng.lock()).cloned() else {
            return Ok(None);
        };

        let mut source_references = Vec::new();
        if let Some(document) = self.catalog.document(question.document_id).await? {
            // Pool questions carry no page information.
            source_references.push(QuestionSourceRef {
                page_number: None,
                document_name: Some(document.filename),
                document_id: Some(document.id),
                content_snippet: None,
            });
        }
        let topic = match question.topic_id {
            Some(topic_id) => self.catalog.topic(topic_id).await?.map(|topic| topic.name),
            None => None,
        };

        Ok(Some(ServedQuestion {
            id: question.id,
            question_number,
            text: question.text,
            kind: question.kind,
            options: (!question.options.is_empty()).then_some(question.options),
            topic,
            difficulty: question.difficulty,
            total_questions: session.total_questions,
            source_references,
        }))
    }

    async fn synthesize(
        &self,
        caller: &CallerIdentity,
        session: &PracticeSession,
        subject: Option<&Subject>,
        answered_texts: &[String],
        question_number: u32,
    ) -> Result<Option<ServedQuestion>, EngineError> {
        let (Some(collection), Some(client)) = (session.collection.as_deref(), &self.client)
        else {
            return Ok(None);
        };

        let subject_label = subject.map_or_else(
            || collection.replace('_', " "),
            |subject| subject.name.clone(),
        );
        let (seed, template_index) = {
            let mut rng = self.rng.lock();
            let seed = RETRIEVAL_SEEDS.choose(&mut *rng).copied().unwrap_or(RETRIEVAL_SEEDS[0]);
            let template_index = rand::Rng::gen_range(&mut *rng, 0..QUESTION_TEMPLATES.len());
            (seed, template_index)
        };
        let template = &QUESTION_TEMPLATES[template_index];

        let retrieval_query = format!("{subject_label}: {seed}");
        let mut chunks = match client
            .retrieve(caller, &retrieval_query, collection, self.synthesis_top_k)
            .await
        {
            Ok(chunks) => chunks,
            Err(RetrievalError::RateLimited) => return Err(EngineError::RateLimited),
            Err(err) => {
                tracing::warn!(%err, "retrieval for question synthesis failed");
                Vec::new()
            }
        };
        if chunks.is_empty() {
            return Ok(None);
        }

        chunks.shuffle(&mut *self.rng.lock());
        chunks.truncate(self.chunk_limit);
        let context = chunks
            .iter()
            .map(|chunk| chunk.content.as_str())
            .collect::<Vec<_>>()
            .join("\n\n---\n\n");

        let prompt = generation_prompt(
            &subject_label,
            question_number,
            session.total_questions,
            template,
            &self.avoid_block(answered_texts),
            &context,
        );
        let source_references = self.source_refs(&chunks).await?;

        let raw = match client.query_direct(caller, &prompt, None).await {
            Ok(answer) => answer.answer,
            Err(RetrievalError::RateLimited) => return Err(EngineError::RateLimited),
            Err(err) => {
                tracing::error!(%err, "question synthesis failed");
                return Ok(None);
            }
        };
        let Some(parsed) = extract_json_object(&raw)
            .and_then(|object| serde_json::from_str::<GeneratedQuestion>(object).ok())
        else {
            tracing::warn!("synthesized question was not parseable");
            return Ok(None);
        };
        if parsed.text.is_empty() {
            return Ok(None);
        }

        Ok(Some(ServedQuestion {
            id: Uuid::new_v4(),
            question_number,
            text: parsed.text,
            kind: parsed
                .question_type
                .as_deref()
                .map_or(QuestionKind::ShortAnswer, QuestionKind::parse_lenient),
            options: parsed.options.and_then(normalize_options),
            topic: parsed.topic,
            difficulty: parsed.difficulty.or_else(|| Some("medium".to_owned())),
            total_questions: session.total_questions,
            source_references,
        }))
    }

    fn avoid_block(&self, answered_texts: &[String]) -> String {
        if answered_texts.is_empty() {
            return String::new();
        }
        let start = answered_texts.len().saturating_sub(self.avoid_window);
        let avoid_list = answered_texts[start..]
            .iter()
            .map(|text| format!("  - {text}"))
            .collect::<Vec<_>>()
            .join("\n");
        format!(
            "\n\nDo NOT repeat these already-asked questions:\n{avoid_list}\n\
             Generate a COMPLETELY DIFFERENT question about a different topic/concept.\n"
        )
    }

    /// Source references for the chunks a question was generated from, one
    /// per distinct (file, page) pair.
    async fn source_refs(
        &self,
        chunks: &[ChunkHit],
    ) -> Result<Vec<QuestionSourceRef>, EngineError> {
        let mut seen: Vec<(Option<String>, Option<u32>)> = Vec::new();
        let mut refs = Vec::new();
        for chunk in chunks {
            let key = (
                chunk.metadata.file_name.clone(),
                chunk.metadata.page_number,
            );
            if seen.contains(&key) {
                continue;
            }
            seen.push(key);
            let document_id = match &chunk.metadata.file_name {
                Some(file_name) => self
                    .catalog
                    .document_for_file(file_name)
                    .await?
                    .map(|doc| doc.id),
                None => None,
            };
            refs.push(QuestionSourceRef {
                page_number: chunk.metadata.page_number,
                document_name: chunk.metadata.file_name.clone(),
                document_id,
                content_snippet: Some(chunk.content.chars().take(120).collect()),
            });
        }
        Ok(refs)
    }
}

impl std::fmt::Debug for QuestionSourceResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QuestionSourceResolver")
            .field("synthesis_top_k", &self.synthesis_top_k)
            .field("chunk_limit", &self.chunk_limit)
            .field("backend", &self.client.is_some())
            .finish()
    }
}

fn generation_prompt(
    subject_label: &str,
    question_number: u32,
    total_questions: u32,
    template: &QuestionTemplate,
    avoid_block: &str,
    context: &str,
) -> String {
    let options_field = if template.json_label == "multiple-choice" {
        ", \"options\": [\"A. ...\", \"B. ...\", \"C. ...\", \"D. ...\"]"
    } else {
        ""
    };
    format!(
        "You are creating exam practice questions for {subject_label}.\n\
         This is question {question_number} of {total_questions} in a practice session.\n\n\
         Based on the following exam content, generate ONE practice question.\n\
         {instruction}\n\
         {avoid_block}\n\
         EXAM CONTENT:\n\
         {context}\n\n\
         Return ONLY a JSON object with these fields:\n\
         {{\n\
         \x20 \"text\": \"The question text\",\n\
         \x20 \"question_type\": \"{json_label}\",\n\
         \x20 \"correct_answer\": \"The correct answer\",\n\
         \x20 \"topic\": \"The topic this question covers\",\n\
         \x20 \"difficulty\": \"easy\" or \"medium\" or \"hard\"{options_field}\n\
         }}\n\n\
         IMPORTANT:\n\
         - The question MUST be directly based on the exam content above\n\
         - The question must be appropriate for the {subject_label} subject\n\
         - If the exam content references a diagram, figure, table, map, or image:\n\
         \x20 * Do NOT say \"in the diagram\" or \"refer to the figure\" without describing it\n\
         \x20 * Instead, DESCRIBE the visual element in words (e.g. \"Given a circuit with a 5Ω resistor connected to a 12V battery...\")\n\
         \x20 * Or ask about the concept the visual illustrates without requiring the student to see it\n\
         \x20 * The student can view the source document page, but the question should still be answerable with the text description\n\
         - Return ONLY valid JSON, no other text",
        instruction = template.instruction,
        json_label = template.json_label,
    )
}

/// The generator sometimes returns options as a `|`-joined string instead of
/// a list; both forms normalize to a list.
fn normalize_options(value: serde_json::Value) -> Option<Vec<String>> {
    match value {
        serde_json::Value::Array(items) => {
            let options: Vec<String> = items
                .into_iter()
                .filter_map(|item| item.as_str().map(str::to_owned))
                .collect();
            (!options.is_empty()).then_some(options)
        }
        serde_json::Value::String(joined) => {
            let options: Vec<String> = joined
                .split('|')
                .map(str::trim)
                .filter(|option| !option.is_empty())
                .map(str::to_owned)
                .collect();
            (!options.is_empty()).then_some(options)
        }
        _ => None,
    }
}
