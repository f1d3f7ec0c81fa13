//! BM25 tokenization
//!
//! Lowercase, replace non-alphanumeric characters with whitespace, split,
//! and drop stopwords. Ships stopword lists for English and Turkish.

use once_cell::sync::Lazy;
use std::collections::HashSet;

static ENGLISH_STOPWORDS: &[&str] = &[
    "a", "an", "the", "and", "or", "but", "if", "then", "else", "when", "at", "by", "for", "with",
    "about", "against", "between", "into", "through", "during", "before", "after", "above",
    "below", "to", "from", "up", "down", "in", "out", "on", "off", "over", "under", "again",
    "further", "once", "here", "there", "where", "why", "how", "all", "any", "both", "each",
    "few", "more", "most", "other", "some", "such", "no", "nor", "not", "only", "own", "same",
    "so", "than", "too", "very", "s", "t", "can", "will", "just", "don", "should", "now", "d",
    "ll", "m", "o", "re", "ve", "y", "ain", "aren", "couldn", "didn", "doesn", "hadn", "hasn",
    "haven", "isn", "ma", "mightn", "mustn", "needn", "shan", "shouldn", "wasn", "weren", "won",
    "wouldn", "i", "me", "my", "myself", "we", "our", "ours", "ourselves", "you", "your",
    "yours", "yourself", "he", "him", "his", "himself", "she", "her", "hers", "herself", "it",
    "its", "itself", "they", "them", "their", "theirs", "themselves", "this", "that", "these",
    "those", "am", "is", "are", "was", "were", "be", "been", "being", "have", "has", "had",
    "having", "do", "does", "did", "doing", "of", "as", "until", "while",
];

static TURKISH_STOPWORDS: &[&str] = &[
    "acaba", "altı", "altmış", "ama", "bana", "bazı", "belki", "ben", "benden", "beni", "benim",
    "beş", "bin", "bir", "biri", "birkaç", "birkez", "birşey", "birşeyi", "biz", "bizden",
    "bize", "bizi", "bizim", "bu", "buna", "bunda", "bundan", "bunu", "bunun", "da", "daha",
    "dahi", "de", "defa", "diye", "doksan", "dokuz", "dolayı", "dolayısıyla", "dört", "elli",
    "en", "gibi", "hem", "hep", "hepsi", "her", "herhangi", "herkesin", "hiç", "iki", "ile",
    "ilgili", "ise", "işte", "itibaren", "itibariyle", "kadar", "karşın", "kez", "ki", "kim",
    "kimden", "kime", "kimi", "kırk", "milyar", "milyon", "mu", "mı", "nasıl", "ne", "neden",
    "nedenle", "nerde", "nerede", "nereye", "niye", "niçin", "on", "ona", "ondan", "onlar",
    "onlardan", "onlari", "onların", "onu", "otuz", "sanki", "sekiz", "seksen", "sen", "senden",
    "seni", "senin", "siz", "sizden", "size", "sizi", "sizin", "trilyon", "tüm", "ve", "veya",
    "ya", "yani", "yedi", "yetmiş", "yine", "yirmi", "yüz", "çok", "çünkü", "üç", "şey",
    "şeyden", "şeyi", "şeyler", "şu", "şuna", "şunda", "şundan", "şunu",
];

static STOPWORDS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    ENGLISH_STOPWORDS
        .iter()
        .chain(TURKISH_STOPWORDS.iter())
        .copied()
        .collect()
});

/// Tokenize text for indexing and querying.
pub fn tokenize(text: &str) -> Vec<String> {
    let cleaned: String = text
        .to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect();

    cleaned
        .split_whitespace()
        .filter(|token| !STOPWORDS.contains(token))
        .map(str::to_string)
        .collect()
}

/// Whether a token is a stopword.
pub fn is_stopword(token: &str) -> bool {
    STOPWORDS.contains(token.to_lowercase().as_str())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lowercases_and_strips_punctuation() {
        let tokens = tokenize("Used CAR prices, in Istanbul!");
        assert_eq!(tokens, vec!["used", "car", "prices", "istanbul"]);
    }

    #[test]
    fn test_drops_english_stopwords() {
        let tokens = tokenize("what is the price of a car");
        assert!(!tokens.contains(&"the".to_string()));
        assert!(!tokens.contains(&"is".to_string()));
        assert!(tokens.contains(&"price".to_string()));
        assert!(tokens.contains(&"car".to_string()));
    }

    #[test]
    fn test_drops_turkish_stopwords() {
        let tokens = tokenize("İstanbul'da araba fiyatları ne kadar");
        assert!(tokens.contains(&"araba".to_string()));
        assert!(tokens.contains(&"fiyatları".to_string()));
        assert!(!tokens.contains(&"ne".to_string()));
        assert!(!tokens.contains(&"kadar".to_string()));
    }

    #[test]
    fn test_unicode_preserved() {
        let tokens = tokenize("fiyatları");
        assert_eq!(tokens, vec!["fiyatları"]);
    }

    #[test]
    fn test_empty_input() {
        assert!(tokenize("").is_empty());
        assert!(tokenize("  ...  ").is_empty());
    }
}
