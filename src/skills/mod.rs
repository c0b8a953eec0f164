//! Built-in skill sets for the four core roles.
//!
//! - `language`: tokenize and analyze input text
//! - `knowledge`: answer "what is X" and learn "X is Y"
//! - `memory`: keep recent exchanges and key/value notes
//! - `response`: compose the final reply from other roles' results

pub mod knowledge;
pub mod language;
pub mod memory;
pub mod response;

use std::collections::HashSet;

const STOPWORDS: &[&str] = &[
    "a", "about", "an", "and", "are", "as", "at", "be", "but", "by", "can", "did", "do", "does",
    "for", "from", "had", "has", "have", "how", "i", "in", "is", "it", "its", "me", "my", "of",
    "on", "or", "so", "that", "the", "this", "to", "was", "we", "what", "when", "where", "which",
    "who", "why", "will", "with", "you", "your",
];

/// Lowercased word tokens. Apostrophes inside words are kept.
pub fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !(c.is_alphanumeric() || c == '\''))
        .map(|t| t.trim_matches('\'').to_lowercase())
        .filter(|t| !t.is_empty())
        .collect()
}

/// Distinct non-stopword tokens of three or more characters, in order.
pub fn keywords(tokens: &[String]) -> Vec<String> {
    let mut seen = HashSet::new();
    tokens
        .iter()
        .filter(|t| t.chars().count() >= 3 && !STOPWORDS.contains(&t.as_str()))
        .filter(|t| seen.insert(t.as_str()))
        .cloned()
        .collect()
}
