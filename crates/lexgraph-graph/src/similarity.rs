//! Trigram similarity and candidate scoring.
//!
//! Similarity follows the pg_trgm definition so scores line up with a
//! Postgres-backed deployment: each word of the lowercased input is padded with
//! two leading spaces and one trailing space, non-alphanumeric characters split
//! words, and similarity is shared trigrams over the union of both sets.

use std::cmp::Ordering;
use std::collections::BTreeSet;

use crate::schema::{MatchKind, QueryCandidate};

/// Minimum similarity for a "trigram" concept match (exclusive).
pub const TRIGRAM_THRESHOLD: f32 = 0.6;

pub const FUZZY_SCORE: f32 = 0.7;
pub const KEYWORD_SCORE: f32 = 0.9;
pub const PREFIX_SCORE: f32 = 0.75;

/// Trigram set of a string.
pub fn trigrams(s: &str) -> BTreeSet<String> {
    let lowered = s.to_lowercase();
    let mut grams = BTreeSet::new();
    for word in lowered
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
    {
        let padded: Vec<char> = "  ".chars().chain(word.chars()).chain(" ".chars()).collect();
        for window in padded.windows(3) {
            grams.insert(window.iter().collect());
        }
    }
    grams
}

/// Trigram similarity in `[0, 1]`.
pub fn similarity(a: &str, b: &str) -> f32 {
    let ta = trigrams(a);
    let tb = trigrams(b);
    if ta.is_empty() || tb.is_empty() {
        return 0.0;
    }
    let shared = ta.intersection(&tb).count();
    let union = ta.len() + tb.len() - shared;
    shared as f32 / union as f32
}

/// Score a concept name against a lowercased, trimmed term.
///
/// Exact (case-insensitive) beats trigram similarity, which beats plain substring
/// containment. Returns `None` when the concept should not be a candidate.
pub fn score_concept(name: &str, term: &str) -> Option<(f32, MatchKind)> {
    let key = name.to_lowercase();
    if key == term {
        return Some((1.0, MatchKind::Exact));
    }
    let sim = similarity(&key, term);
    if sim > TRIGRAM_THRESHOLD {
        return Some((sim, MatchKind::Trigram));
    }
    if key.contains(term) {
        return Some((FUZZY_SCORE, MatchKind::Fuzzy));
    }
    None
}

/// Score a relation against a lowercased, trimmed term.
pub fn score_relation(name: &str, keywords: &[String], term: &str) -> Option<(f32, MatchKind)> {
    let key = name.to_lowercase();
    if key == term {
        return Some((1.0, MatchKind::Exact));
    }
    if keywords.iter().any(|k| k.to_lowercase() == term) {
        return Some((KEYWORD_SCORE, MatchKind::Keyword));
    }
    if key.starts_with(term) {
        return Some((PREFIX_SCORE, MatchKind::Prefix));
    }
    if key.contains(term) {
        return Some((FUZZY_SCORE, MatchKind::Fuzzy));
    }
    None
}

/// Order by score desc, then name length asc, then name asc; keep the first `limit`.
pub fn rank_candidates(candidates: &mut Vec<QueryCandidate>, limit: usize) {
    candidates.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.name.chars().count().cmp(&b.name.chars().count()))
            .then_with(|| a.name.cmp(&b.name))
    });
    candidates.truncate(limit);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::CandidateRole;

    #[test]
    fn test_trigrams_pad_words() {
        let grams = trigrams("Cat");
        let expected: BTreeSet<String> = ["  c", " ca", "cat", "at "].iter().map(|s| s.to_string()).collect();
        assert_eq!(grams, expected);
    }

    #[test]
    fn test_similarity() {
        assert!((similarity("driver", "driver") - 1.0).abs() < f32::EPSILON);
        // 6 shared of 9 distinct trigrams
        let sim = similarity("driver", "drivers");
        assert!((sim - 6.0 / 9.0).abs() < 1e-6);
        assert_eq!(similarity("driver", "helmet"), 0.0);
        assert_eq!(similarity("", "helmet"), 0.0);
    }

    #[test]
    fn test_similarity_handles_vietnamese() {
        assert!(similarity("người điều khiển", "người điều khiển xe") > 0.6);
    }

    #[test]
    fn test_score_concept_policy() {
        assert_eq!(score_concept("Helmet", "helmet"), Some((1.0, MatchKind::Exact)));
        let (score, kind) = score_concept("drivers", "driver").unwrap();
        assert_eq!(kind, MatchKind::Trigram);
        assert!(score > TRIGRAM_THRESHOLD);
        assert_eq!(
            score_concept("motorbike helmet standards", "helmet"),
            Some((FUZZY_SCORE, MatchKind::Fuzzy))
        );
        assert_eq!(score_concept("red light", "helmet"), None);
    }

    #[test]
    fn test_score_relation_policy() {
        let keywords = vec!["Forbidden".to_string(), "cấm".to_string()];
        assert_eq!(score_relation("prohibition", &keywords, "prohibition"), Some((1.0, MatchKind::Exact)));
        assert_eq!(score_relation("prohibition", &keywords, "forbidden"), Some((KEYWORD_SCORE, MatchKind::Keyword)));
        assert_eq!(score_relation("prohibition", &keywords, "prohib"), Some((PREFIX_SCORE, MatchKind::Prefix)));
        assert_eq!(score_relation("prohibition", &keywords, "hibit"), Some((FUZZY_SCORE, MatchKind::Fuzzy)));
        assert_eq!(score_relation("prohibition", &keywords, "penalty"), None);
    }

    #[test]
    fn test_rank_candidates_ordering() {
        let make = |name: &str, score: f32| QueryCandidate {
            role: CandidateRole::Subject,
            concept_id: Some(1),
            relation_id: None,
            name: name.to_string(),
            score,
            match_kind: MatchKind::Fuzzy,
        };
        let mut candidates = vec![make("zeta", 0.7), make("alphabet", 0.7), make("beta", 0.7), make("gamma", 1.0)];
        rank_candidates(&mut candidates, 3);
        let names: Vec<_> = candidates.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["gamma", "beta", "zeta"]);
    }
}
