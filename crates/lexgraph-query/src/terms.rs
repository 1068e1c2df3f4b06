//! Query term extraction.
//!
//! Queries are lowercased, split on whitespace and trimmed of surrounding
//! punctuation. Single words longer than two characters become terms, as do
//! 2, 3 and 4-word windows whose edge words are not stopwords.

use std::collections::BTreeSet;

const TRIM_CHARS: &[char] = &[
    '.', ',', '!', '?', ';', ':', '(', ')', '[', ']', '{', '}', '"', '\'', '“', '”', '‘', '’', '-', '_',
];

const ENGLISH_STOPWORDS: &[&str] = &[
    "what", "is", "the", "a", "an", "are", "can", "does", "how", "when", "where", "who", "why", "which",
    "for", "of", "to", "in", "on", "at", "by", "with", "from", "and", "or", "but", "not", "be", "have",
    "has", "had", "will", "would", "could", "should", "may", "might", "must", "do",
];

const VIETNAMESE_STOPWORDS: &[&str] = &[
    "là", "của", "và", "có", "được", "trong", "cho", "để", "với", "các", "một", "những", "này", "đó",
    "như", "khi", "nếu", "thì", "sẽ", "đã", "về", "từ", "trên", "theo", "tại", "bởi", "vì", "hay",
    "hoặc", "nhưng", "mà", "nào", "gì", "ai", "đâu", "sao", "bao", "nhiêu", "thế", "vậy", "ra", "vào",
    "lên", "xuống", "qua", "lại", "đi", "đến",
];

pub fn is_stopword(word: &str) -> bool {
    ENGLISH_STOPWORDS.contains(&word) || VIETNAMESE_STOPWORDS.contains(&word)
}

/// Lowercased words with surrounding punctuation removed. Empty tokens are dropped.
pub fn query_words(query: &str) -> Vec<String> {
    query
        .to_lowercase()
        .split_whitespace()
        .map(|w| w.trim_matches(TRIM_CHARS))
        .filter(|w| !w.is_empty())
        .map(str::to_string)
        .collect()
}

fn char_len(word: &str) -> usize {
    word.chars().count()
}

/// Search terms for one query string.
pub fn extract_terms(query: &str) -> BTreeSet<String> {
    let words = query_words(query);
    let mut terms = BTreeSet::new();

    for word in &words {
        if char_len(word) > 2 && !is_stopword(word) {
            terms.insert(word.clone());
        }
    }

    for size in 2..=4 {
        for window in words.windows(size) {
            let (first, last) = (&window[0], &window[size - 1]);
            let edges_ok = [first, last]
                .iter()
                .all(|w| char_len(w) > 1 && !is_stopword(w));
            if edges_ok {
                terms.insert(window.join(" "));
            }
        }
    }

    terms
}

/// Union of the terms of every query variant.
pub fn extract_terms_all<S: AsRef<str>>(queries: &[S]) -> BTreeSet<String> {
    queries
        .iter()
        .flat_map(|q| extract_terms(q.as_ref()))
        .collect()
}
