/// System prompt pinning the semantic tier to a strict JSON verdict.
pub const SEMANTIC_SYSTEM_PROMPT: &str = "You are a strict but fair exam grader. \
     Respond ONLY with a JSON object: \
     {\"correct\": true/false, \"reason\": \"brief explanation\"}";

/// Rubric prompt for the semantic tier: compare a student answer against the
/// expected answer, tolerant of spelling/synonym/format variance but not of
/// factually wrong content.
#[must_use]
pub fn semantic_prompt(question_text: &str, expected_answer: &str, student_answer: &str) -> String {
    format!(
        "You are a fair and accurate exam grader. Grade the student's answer against the expected answer.\n\n\
         Question: {question_text}\n\
         Expected answer: {expected_answer}\n\
         Student's answer: {student_answer}\n\n\
         Grading rules:\n\
         - Accept spelling variations (British/American English: \"organisation\"/\"organization\")\n\
         - Accept equivalent phrasing or synonyms that convey the same meaning\n\
         - Accept answers that contain the correct information even if they include extra correct details\n\
         - For list-type questions, accept if the student provides at least the required number of valid items\n\
         - Partial abbreviation expansions should be marked correct if the key words are there\n\
         - Do NOT accept factually wrong answers even if they sound similar\n\
         - Be lenient with formatting (commas vs \"and\", capitalization, etc.)\n\n\
         Respond with ONLY a JSON object:\n\
         {{\"correct\": true/false, \"reason\": \"brief explanation\"}}"
    )
}

/// Context-grading prompt asking for a verdict, a partial-credit score, and
/// educational feedback, grounded on retrieved exam material.
#[must_use]
pub fn context_grade_prompt(
    question_text: &str,
    expected_answer: Option<&str>,
    student_answer: &str,
    context: &str,
) -> String {
    let expected = expected_answer.unwrap_or("Not provided — grade based on context");
    let context = if context.is_empty() {
        "No additional context available"
    } else {
        context
    };
    format!(
        "You are an expert exam grader. Grade the student's answer to this question.\n\n\
         Question: {question_text}\n\
         Expected/Correct Answer: {expected}\n\
         Student's Answer: {student_answer}\n\n\
         Context from exam materials:\n\
         {context}\n\n\
         Provide your assessment as JSON:\n\
         {{\n\
         \x20 \"is_correct\": true/false,\n\
         \x20 \"score\": 0.0 to 1.0 (0=wrong, 0.5=partial, 1.0=fully correct),\n\
         \x20 \"feedback\": \"Detailed explanation of why the answer is correct/incorrect. Explain the correct answer. Be encouraging and educational.\",\n\
         \x20 \"correct_answer\": \"Brief statement of the correct answer\"\n\
         }}\n\n\
         Important:\n\
         - For MCQ: check if the student picked the right option\n\
         - For short answers: accept different phrasings, spelling variants, partial credit\n\
         - For essays: evaluate key concepts, give partial credit\n\
         - Always explain WHY the correct answer is correct\n\
         - Return ONLY valid JSON, no other text"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn semantic_prompt_embeds_all_three_texts() {
        let prompt = semantic_prompt("Capital of Rwanda?", "Kigali", "kigali city");
        assert!(prompt.contains("Question: Capital of Rwanda?"));
        assert!(prompt.contains("Expected answer: Kigali"));
        assert!(prompt.contains("Student's answer: kigali city"));
    }

    #[test]
    fn context_prompt_substitutes_missing_pieces() {
        let prompt = context_grade_prompt("Explain osmosis.", None, "water moves", "");
        assert!(prompt.contains("Not provided — grade based on context"));
        assert!(prompt.contains("No additional context available"));
    }
}
