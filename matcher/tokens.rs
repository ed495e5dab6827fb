use std::collections::HashSet;

use crate::normalize::canonical;

/// Filler words that carry no grading signal.
const STOP_WORDS: [&str; 11] = [
    "and", "or", "of", "for", "in", "to", "is", "are", "was", "were", "be",
];

/// Splits text into its key comparison tokens: canonical form, stop words and
/// single-character fragments (e.g. the `s` left by possessives) removed.
#[must_use]
pub fn key_tokens(text: &str) -> HashSet<String> {
    canonical(text)
        .split_whitespace()
        .filter(|token| token.chars().count() > 1 && !STOP_WORDS.contains(token))
        .map(str::to_owned)
        .collect()
}

/// Expands a token set with naive singular forms: every token ending in `s`
/// and longer than two characters also contributes its trailing-`s`-stripped
/// stem, so `childrens` can meet `children`.
#[must_use]
pub fn expand_plurals(tokens: &HashSet<String>) -> HashSet<String> {
    let mut expanded = tokens.clone();
    for token in tokens {
        if token.ends_with('s') && token.chars().count() > 2 {
            expanded.insert(token[..token.len() - 1].to_owned());
        }
    }
    expanded
}

/// Token-set containment: the student answer must cover every key token of
/// the correct answer (plural-tolerant), or the expanded correct set must be
/// covered by the expanded student set. Extra correct filler in the student
/// answer is tolerated; missing key terms are not. An empty correct key set
/// matches trivially.
#[must_use]
pub fn containment_match(student: &str, correct: &str) -> bool {
    let student_key = key_tokens(student);
    let correct_key = key_tokens(correct);

    if correct_key.is_empty() {
        return true;
    }

    let student_expanded = expand_plurals(&student_key);
    let correct_expanded = expand_plurals(&correct_key);

    correct_key.is_subset(&student_expanded) || correct_expanded.is_subset(&student_expanded)
}
