//! Small text utilities shared by the optimizer and the attribution
//! enhancer.

use once_cell::sync::Lazy;
use std::collections::HashSet;

/// Stopwords excluded from key-term extraction.
static TERM_STOPWORDS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        "a", "an", "the", "and", "or", "but", "if", "then", "else", "when", "at", "by", "for",
        "with", "about", "against", "between", "into", "through", "during", "before", "after",
        "above", "below", "to", "from", "up", "down", "in", "out", "on", "off", "over", "under",
        "again",
    ]
    .into_iter()
    .collect()
});

/// Split text into sentences on `.`, `?`, or `!` followed by whitespace.
///
/// The terminator stays with its sentence. Trailing text without a
/// terminator is returned as a final sentence.
pub fn split_sentences(text: &str) -> Vec<String> {
    let mut sentences = Vec::new();
    let mut start = 0;
    let mut chars = text.char_indices().peekable();

    while let Some((i, c)) = chars.next() {
        if matches!(c, '.' | '?' | '!') {
            let boundary = chars.peek().map_or(true, |&(_, next)| next.is_whitespace());
            if boundary {
                let end = i + c.len_utf8();
                let sentence = text[start..end].trim();
                if !sentence.is_empty() {
                    sentences.push(sentence.to_string());
                }
                start = end;
            }
        }
    }

    let tail = text[start..].trim();
    if !tail.is_empty() {
        sentences.push(tail.to_string());
    }

    sentences
}

/// Extract the set of key terms from a text: lowercased, punctuation
/// stripped, stopwords and short words (≤3 chars) removed.
pub fn extract_key_terms(text: &str) -> HashSet<String> {
    let cleaned: String = text
        .to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect();

    cleaned
        .split_whitespace()
        .filter(|w| w.len() > 3 && !TERM_STOPWORDS.contains(w))
        .map(str::to_string)
        .collect()
}

/// Truncate a string to at most `max_chars` characters on a char boundary.
pub fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}
