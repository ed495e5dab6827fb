use once_cell::sync::Lazy;
use regex::Regex;

use crate::spelling::unify_spelling;

static ARTICLES: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\b(the|a|an)\b").unwrap());
static PUNCTUATION: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^\w\s]").unwrap());
static MULTI_SPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());

/// Aggressively normalizes text for comparison: lowercases, strips the
/// articles `the`/`a`/`an`, strips punctuation, and collapses whitespace.
///
/// `"World Health Organisation"` becomes `"world health organisation"`,
/// `"Food, Shelter"` becomes `"food shelter"`.
#[must_use]
pub fn normalize(text: &str) -> String {
    let lowered = text.to_lowercase();
    let no_articles = ARTICLES.replace_all(lowered.trim(), " ");
    let no_punct = PUNCTUATION.replace_all(&no_articles, " ");
    MULTI_SPACE.replace_all(&no_punct, " ").trim().to_owned()
}

/// Normalization followed by spelling unification; the canonical comparison
/// form for short answers.
#[must_use]
pub fn canonical(text: &str) -> String {
    unify_spelling(&normalize(text))
}

/// Whether two answers are equal after canonicalization.
#[must_use]
pub fn normalized_equal(left: &str, right: &str) -> bool {
    canonical(left) == canonical(right)
}
