use serde::Deserialize;

/// Grading verdict decoded from the context-grading prompt.
#[derive(Debug, Clone, Deserialize)]
pub struct GradeJson {
    /// Whether the grader judged the answer correct.
    #[serde(default)]
    pub is_correct: bool,
    /// Partial credit in `[0.0, 1.0]`.
    #[serde(default)]
    pub score: f32,
    /// Explanation text.
    #[serde(default)]
    pub feedback: String,
    /// Correct answer recovered by the grader, when it supplied one.
    #[serde(default)]
    pub correct_answer: Option<String>,
}

/// Verdict decoded from the semantic-tier rubric prompt.
#[derive(Debug, Clone, Deserialize)]
pub struct SemanticJson {
    /// Whether the answer conveys the expected meaning.
    #[serde(default)]
    pub correct: bool,
    /// Brief reason.
    #[serde(default)]
    pub reason: String,
}

/// Extracts the JSON object embedded in a model response, tolerating
/// markdown code fences and surrounding prose.
#[must_use]
pub fn extract_json_object(raw: &str) -> Option<&str> {
    let mut text = raw.trim();
    if text.contains("```") {
        for part in text.split("```") {
            let mut stripped = part.trim();
            if let Some(rest) = stripped.strip_prefix("json") {
                stripped = rest.trim();
            }
            if stripped.starts_with('{') {
                text = stripped;
                break;
            }
        }
    }
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (end >= start).then(|| &text[start..=end])
}

/// Decodes a context-grading response; undecodable responses fall back to an
/// incorrect verdict carrying the raw text as feedback, so the student still
/// sees what the grader said.
#[must_use]
pub fn parse_grade_json(raw: &str) -> GradeJson {
    extract_json_object(raw)
        .and_then(|object| serde_json::from_str(object).ok())
        .unwrap_or_else(|| GradeJson {
            is_correct: false,
            score: 0.0,
            feedback: raw.trim().to_owned(),
            correct_answer: None,
        })
}

/// Decodes a semantic-tier response; `None` when no verdict can be read.
#[must_use]
pub fn parse_semantic_json(raw: &str) -> Option<SemanticJson> {
    extract_json_object(raw).and_then(|object| serde_json::from_str(object).ok())
}
