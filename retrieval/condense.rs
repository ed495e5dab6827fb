use crate::backend::{ChatRole, ChatTurn};

/// Turns considered when rewriting a follow-up into a standalone question.
pub const CONDENSE_HISTORY_TURNS: usize = 10;
/// Per-turn truncation for the condensation prompt.
pub const CONDENSE_TURN_CHARS: usize = 500;
/// Turns echoed into the final synthesis prompt.
pub const SYNTHESIS_HISTORY_TURNS: usize = 6;
/// Per-turn truncation for the synthesis prompt.
pub const SYNTHESIS_TURN_CHARS: usize = 400;

/// Renders the last `max_turns` turns as `Student:`/`Tutor:` lines, each
/// truncated to `max_chars` characters to bound prompt size.
#[must_use]
pub fn render_history(history: &[ChatTurn], max_turns: usize, max_chars: usize) -> String {
    let start = history.len().saturating_sub(max_turns);
    history[start..]
        .iter()
        .map(|turn| {
            let speaker = match turn.role {
                ChatRole::User => "Student",
                ChatRole::Assistant => "Tutor",
            };
            let content: String = turn.content.chars().take(max_chars).collect();
            format!("{speaker}: {content}")
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Prompt asking the LLM to rewrite a follow-up question so it stands alone.
///
/// A follow-up like "help me answer them" has zero useful keywords for
/// vector search; the rewrite exists purely to make retrieval work.
#[must_use]
pub fn condense_prompt(question: &str, history: &[ChatTurn]) -> String {
    let history_text = render_history(history, CONDENSE_HISTORY_TURNS, CONDENSE_TURN_CHARS);
    format!(
        "Given the following conversation between a student and an AI tutor, \
         and a follow-up question, rewrite the follow-up question as a \
         standalone question that includes all necessary context.\n\
         Do NOT answer the question — only rewrite it.\n\n\
         Chat History:\n{history_text}\n\n\
         Follow-Up Question: {question}\n\n\
         Standalone Question:"
    )
}

/// Prompt synthesizing the final answer from the ORIGINAL question, a short
/// recent-history block, and the retrieved context. The model is told to
/// answer only from the provided content and to admit when it cannot.
#[must_use]
pub fn synthesis_prompt(question: &str, history: &[ChatTurn], context: &str) -> String {
    let history_block = render_history(history, SYNTHESIS_HISTORY_TURNS, SYNTHESIS_TURN_CHARS);
    format!(
        "You are an expert exam tutor helping a student prepare for exams. \
         Use ONLY the exam paper content below to answer.\n\
         If the answer is not in the content, say: \
         'I could not find that information in the provided exam papers.'\n\
         Do not guess or use outside knowledge.\n\n\
         --- Exam Content ---\n{context}\n--- End Exam Content ---\n\n\
         --- Previous Conversation ---\n{history_block}\n--- End Previous Conversation ---\n\n\
         Student: {question}\n\
         Tutor:"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn long_history(len: usize) -> Vec<ChatTurn> {
        (0..len)
            .map(|i| {
                if i % 2 == 0 {
                    ChatTurn::user(format!("question {i}"))
                } else {
                    ChatTurn::assistant(format!("answer {i}"))
                }
            })
            .collect()
    }

    #[test]
    fn renders_only_the_most_recent_turns() {
        let rendered = render_history(&long_history(14), CONDENSE_HISTORY_TURNS, 500);
        assert_eq!(rendered.lines().count(), 10);
        assert!(rendered.starts_with("Student: question 4"));
        assert!(rendered.ends_with("Tutor: answer 13"));
    }

    #[test]
    fn truncates_long_turns() {
        let history = vec![ChatTurn::user("x".repeat(900))];
        let rendered = render_history(&history, 10, 500);
        assert_eq!(rendered.len(), "Student: ".len() + 500);
    }

    #[test]
    fn condense_prompt_forbids_answering() {
        let prompt = condense_prompt("help me answer them", &long_history(4));
        assert!(prompt.contains("only rewrite it"));
        assert!(prompt.contains("Follow-Up Question: help me answer them"));
    }

    #[test]
    fn synthesis_prompt_keeps_original_question() {
        let prompt = synthesis_prompt("help me answer them", &long_history(4), "chunk one");
        assert!(prompt.contains("Student: help me answer them"));
        assert!(prompt.contains("chunk one"));
        assert!(prompt.contains("could not find that information"));
    }
}
