use std::sync::Arc;

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use uuid::Uuid;

use crate::{
    error::EngineError,
    model::{
        round4, PracticeAnswer, PracticeSession, ProgressOverview, Subject, TopicMetric,
    },
    store::{CatalogStore, ProgressStore},
};

/// Fallback topic for answers that resolve to no topic at all.
const GENERAL_TOPIC: &str = "General";

#[derive(Debug, Default)]
struct Tally {
    correct: u32,
    total: u32,
    topic_id: Option<Uuid>,
}

/// Folds a completed session's answers into per-(student, topic) running
/// aggregates. Counters are strictly additive; accuracy is recomputed from
/// them on every update. Callers guarantee at-most-once aggregation per
/// session by invoking this only on the transition into `Completed`.
pub struct ProgressAggregator {
    catalog: Arc<dyn CatalogStore>,
    progress: Arc<dyn ProgressStore>,
}

impl ProgressAggregator {
    /// Creates an aggregator over the stores.
    #[must_use]
    pub fn new(catalog: Arc<dyn CatalogStore>, progress: Arc<dyn ProgressStore>) -> Self {
        Self { catalog, progress }
    }

    /// Buckets the session's answers by topic and upserts one progress
    /// record per bucket. Sessions with no answers are skipped.
    pub async fn record_session(
        &self,
        session: &PracticeSession,
        answers: &[PracticeAnswer],
        subject: Option<&Subject>,
    ) -> Result<(), EngineError> {
        if answers.is_empty() {
            return Ok(());
        }
        let subject_name = subject.map(|subject| subject.name.as_str());

        let mut tallies: IndexMap<String, Tally> = IndexMap::new();
        for answer in answers {
            let mut topic_name = GENERAL_TOPIC.to_owned();
            let mut topic_id = None;
            if let Some(question_id) = answer.question_id {
                // Pool question: take its classified topic when it has one.
                if let Some(question) = self.catalog.question(question_id).await? {
                    if let Some(id) = question.topic_id {
                        if let Some(topic) = self.catalog.topic(id).await? {
                            topic_name = topic.name;
                            topic_id = Some(id);
                        }
                    }
                }
            } else {
                // Synthesized question: the subject itself is the bucket.
                topic_name = subject_name.unwrap_or(GENERAL_TOPIC).to_owned();
            }

            let tally = tallies.entry(topic_name).or_default();
            tally.total += 1;
            if answer.is_correct == Some(true) {
                tally.correct += 1;
            }
            if tally.topic_id.is_none() {
                tally.topic_id = topic_id;
            }
        }

        let now = Utc::now();
        for (topic_name, tally) in tallies {
            let topic_id = match tally.topic_id {
                Some(id) => id,
                None => {
                    self.progress
                        .find_or_create_topic(subject_name.unwrap_or(GENERAL_TOPIC), &topic_name)
                        .await?
                        .id
                }
            };
            let mut record = self
                .progress
                .progress(session.student_id, topic_id)
                .await?
                .unwrap_or_else(|| crate::model::ProgressRecord::new(session.student_id, topic_id));

            record.total_correct += tally.correct;
            record.total_questions += tally.total;
            record.attempt_count += 1;
            #[allow(clippy::cast_precision_loss)]
            {
                record.accuracy = if record.total_questions > 0 {
                    round4(record.total_correct as f32 / record.total_questions as f32)
                } else {
                    0.0
                };
            }
            record.last_attempted_at = Some(now);
            self.progress.upsert_progress(record).await?;
        }
        Ok(())
    }

    /// Builds the student's mastery overview: per-topic metrics, overall
    /// accuracy, topics under the weak threshold, and study recommendations.
    #[allow(clippy::cast_precision_loss)]
    pub async fn overview(
        &self,
        student_id: Uuid,
        weak_threshold: f32,
    ) -> Result<ProgressOverview, EngineError> {
        let rows = self.progress.progress_for_student(student_id).await?;

        let mut topic_metrics = Vec::with_capacity(rows.len());
        let mut weak_topics = Vec::new();
        let mut total_correct: u32 = 0;
        let mut total_questions: u32 = 0;
        let mut total_attempts: u32 = 0;
        let mut last_attempt_at: Option<DateTime<Utc>> = None;

        for (record, topic) in rows {
            topic_metrics.push(TopicMetric {
                topic: topic.name.clone(),
                accuracy: record.accuracy,
                attempts: record.attempt_count,
                last_attempted: record.last_attempted_at,
            });
            if record.accuracy < weak_threshold {
                weak_topics.push(topic.name);
            }
            total_correct += record.total_correct;
            total_questions += record.total_questions;
            total_attempts += record.attempt_count;
            if let Some(stamp) = record.last_attempted_at {
                if last_attempt_at.map_or(true, |latest| stamp > latest) {
                    last_attempt_at = Some(stamp);
                }
            }
        }

        let overall_accuracy = if total_questions > 0 {
            round4(total_correct as f32 / total_questions as f32)
        } else {
            0.0
        };

        let mut recommendations: Vec<String> = weak_topics
            .iter()
            .map(|topic| {
                format!(
                    "Practice more {topic} questions — your accuracy is below {:.0}%.",
                    weak_threshold * 100.0
                )
            })
            .collect();
        if weak_topics.is_empty() && total_attempts > 0 {
            recommendations.push(
                "Great job! All topics are above the threshold. Try a real exam simulation!"
                    .to_owned(),
            );
        }

        Ok(ProgressOverview {
            student_id,
            overall_accuracy,
            total_attempts,
            topic_metrics,
            weak_topics,
            recommendations,
            last_attempt_at,
        })
    }
}

impl std::fmt::Debug for ProgressAggregator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProgressAggregator").finish()
    }
}
