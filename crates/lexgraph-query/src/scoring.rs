//! Answer scoring, snippets and per-triple score aggregation.

use std::collections::HashMap;

use lexgraph_graph::TripleView;

pub const SNIPPET_MAX_CHARS: usize = 200;
const SNIPPET_BEFORE: usize = 50;
const SNIPPET_AFTER: usize = 150;

const SUBJECT_WEIGHT: f32 = 0.3;
const RELATION_WEIGHT: f32 = 0.4;
const OBJECT_WEIGHT: f32 = 0.3;
const WORD_OVERLAP_WEIGHT: f32 = 0.2;
const RELEVANCE_FLOOR: f32 = 0.1;
const TFIDF_WEIGHT: f32 = 0.2;
const BASE_BONUS: f32 = 0.1;

/// How well a triple's names and unit text cover the query.
///
/// Name hits are substring checks against the lowercased query; the overlap
/// part counts whitespace-separated query tokens (punctuation kept) longer than
/// two characters found in the unit text, over all tokens. A zero result is
/// raised to the floor.
pub fn relevance(query: &str, triple: &TripleView) -> f32 {
    let query_lower = query.to_lowercase();
    let mut score = 0.0;

    for (name, weight) in [
        (&triple.subject_name, SUBJECT_WEIGHT),
        (&triple.relation_name, RELATION_WEIGHT),
        (&triple.object_name, OBJECT_WEIGHT),
    ] {
        if !name.is_empty() && query_lower.contains(&name.to_lowercase()) {
            score += weight;
        }
    }

    let words: Vec<&str> = query_lower.split_whitespace().collect();
    if !words.is_empty() {
        let text = triple.unit_text.to_lowercase();
        let matched = words
            .iter()
            .filter(|w| w.chars().count() > 2 && text.contains(**w))
            .count();
        score += WORD_OVERLAP_WEIGHT * matched as f32 / words.len() as f32;
    }

    if score == 0.0 {
        RELEVANCE_FLOOR
    } else {
        score
    }
}

/// `(relevance + 0.2 * tfidf + 0.1) * weight`, with a missing tfidf counted as zero.
pub fn combined_score(relevance: f32, tfidf: Option<f32>, weight: f32) -> f32 {
    (relevance + TFIDF_WEIGHT * tfidf.unwrap_or(0.0) + BASE_BONUS) * weight
}

/// Keeps the highest score seen for each triple.
#[derive(Debug, Default)]
pub struct ScoreBoard {
    entries: HashMap<i64, (f32, TripleView)>,
}

impl ScoreBoard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `score` for the triple; returns true when it became the best.
    pub fn offer(&mut self, triple: &TripleView, score: f32) -> bool {
        match self.entries.get_mut(&triple.triple.id) {
            Some((best, _)) if *best >= score => false,
            Some(entry) => {
                entry.0 = score;
                true
            }
            None => {
                self.entries.insert(triple.triple.id, (score, triple.clone()));
                true
            }
        }
    }

    pub fn score(&self, triple_id: i64) -> Option<f32> {
        self.entries.get(&triple_id).map(|(score, _)| *score)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Score desc, ties by triple id.
    pub fn into_ranked(self) -> Vec<(f32, TripleView)> {
        let mut ranked: Vec<(f32, TripleView)> = self.entries.into_values().collect();
        ranked.sort_by(|a, b| b.0.total_cmp(&a.0).then_with(|| a.1.triple.id.cmp(&b.1.triple.id)));
        ranked
    }
}

/// Case-insensitive char offset of `needle` in `haystack`.
fn find_chars(haystack: &[char], needle: &str) -> Option<(usize, usize)> {
    let needle: Vec<char> = needle.to_lowercase().chars().collect();
    if needle.is_empty() || needle.len() > haystack.len() {
        return None;
    }
    let lowered: Vec<char> = haystack
        .iter()
        .map(|c| c.to_lowercase().next().unwrap_or(*c))
        .collect();
    lowered
        .windows(needle.len())
        .position(|w| w == needle.as_slice())
        .map(|start| (start, needle.len()))
}

/// Text excerpt centered on the subject (or object) mention.
///
/// Short text is returned whole. Otherwise the window runs from 50 chars
/// before the match to 150 after it, with `...` marking clipped ends.
pub fn snippet(text: &str, subject: &str, object: &str) -> String {
    let chars: Vec<char> = text.chars().collect();
    if chars.len() <= SNIPPET_MAX_CHARS {
        return text.to_string();
    }

    let hit = find_chars(&chars, subject).or_else(|| find_chars(&chars, object));
    let Some((idx, len)) = hit else {
        let head: String = chars[..SNIPPET_MAX_CHARS].iter().collect();
        return format!("{head}...");
    };

    let start = idx.saturating_sub(SNIPPET_BEFORE);
    let end = (idx + len + SNIPPET_AFTER).min(chars.len());
    let mut out = String::new();
    if start > 0 {
        out.push_str("...");
    }
    out.extend(&chars[start..end]);
    if end < chars.len() {
        out.push_str("...");
    }
    out
}
