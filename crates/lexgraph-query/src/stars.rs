//! Candidate collection and star construction.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use lexgraph_graph::{CandidateRole, QueryCandidate, QueryStar};

/// Candidates kept per role before building stars.
pub const ROLE_CANDIDATE_CAP: usize = 5;

/// A star plus the weight its triples are scored with.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WeightedStar {
    pub weight: f32,
    #[serde(flatten)]
    pub star: QueryStar,
}

/// Weight of the star at `index` in build order.
pub fn star_weight(index: usize) -> f32 {
    (1.0 - 0.1 * index as f32).max(0.1)
}

/// Accumulates candidates across terms, keeping the best score per identity.
#[derive(Debug, Default)]
pub struct CandidateSet {
    best: HashMap<(CandidateRole, String, Option<i64>, Option<i64>), QueryCandidate>,
}

impl CandidateSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, candidate: QueryCandidate) {
        let key = (
            candidate.role,
            candidate.name.clone(),
            candidate.concept_id,
            candidate.relation_id,
        );
        match self.best.get(&key) {
            Some(existing) if existing.score >= candidate.score => {}
            _ => {
                self.best.insert(key, candidate);
            }
        }
    }

    /// Concept matches count as both subject and object.
    pub fn add_concept(&mut self, candidate: &QueryCandidate) {
        self.add(candidate.with_role(CandidateRole::Subject));
        self.add(candidate.with_role(CandidateRole::Object));
    }

    pub fn add_relation(&mut self, candidate: &QueryCandidate) {
        self.add(candidate.with_role(CandidateRole::Relation));
    }

    pub fn len(&self) -> usize {
        self.best.len()
    }

    pub fn is_empty(&self) -> bool {
        self.best.is_empty()
    }

    /// Score desc, then name asc. Role and ids break the remaining ties.
    pub fn into_sorted(self) -> Vec<QueryCandidate> {
        let mut candidates: Vec<QueryCandidate> = self.best.into_values().collect();
        candidates.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then_with(|| a.name.cmp(&b.name))
                .then_with(|| a.role.cmp(&b.role))
                .then_with(|| a.concept_id.cmp(&b.concept_id))
                .then_with(|| a.relation_id.cmp(&b.relation_id))
        });
        candidates
    }
}

fn top(candidates: &[QueryCandidate], n: usize) -> Vec<QueryCandidate> {
    candidates.iter().take(n).cloned().collect()
}

/// Build stars from sorted candidates, in priority order:
///
/// - A: subjects, relations and objects (all three lists non-empty)
/// - B: subjects, top 2 relations, objects (needs relations)
/// - C: top 3 subjects with all relations (needs subjects)
/// - D: all relations with top 3 objects (needs objects)
pub fn build_stars(candidates: &[QueryCandidate]) -> Vec<WeightedStar> {
    let by_role = |role: CandidateRole| -> Vec<QueryCandidate> {
        candidates
            .iter()
            .filter(|c| c.role == role)
            .take(ROLE_CANDIDATE_CAP)
            .cloned()
            .collect()
    };
    let subjects = by_role(CandidateRole::Subject);
    let relations = by_role(CandidateRole::Relation);
    let objects = by_role(CandidateRole::Object);

    let mut stars = Vec::new();
    if !subjects.is_empty() && !relations.is_empty() && !objects.is_empty() {
        stars.push(QueryStar::new(subjects.clone(), relations.clone(), objects.clone()));
    }
    if !relations.is_empty() {
        stars.push(QueryStar::new(subjects.clone(), top(&relations, 2), objects.clone()));
    }
    if !subjects.is_empty() {
        stars.push(QueryStar::new(top(&subjects, 3), relations.clone(), Vec::new()));
    }
    if !objects.is_empty() {
        stars.push(QueryStar::new(Vec::new(), relations, top(&objects, 3)));
    }

    stars
        .into_iter()
        .enumerate()
        .map(|(index, star)| WeightedStar {
            weight: star_weight(index),
            star,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use lexgraph_graph::MatchKind;

    fn concept(id: i64, name: &str, score: f32) -> QueryCandidate {
        QueryCandidate {
            role: CandidateRole::Subject,
            concept_id: Some(id),
            relation_id: None,
            name: name.to_string(),
            score,
            match_kind: MatchKind::Exact,
        }
    }

    fn relation(id: i64, name: &str, score: f32) -> QueryCandidate {
        QueryCandidate {
            role: CandidateRole::Relation,
            concept_id: None,
            relation_id: Some(id),
            name: name.to_string(),
            score,
            match_kind: MatchKind::Keyword,
        }
    }

    #[test]
    fn test_weights() {
        assert_eq!(star_weight(0), 1.0);
        assert!((star_weight(3) - 0.7).abs() < 1e-6);
        assert!((star_weight(20) - 0.1).abs() < 1e-6);
    }

    #[test]
    fn test_dedup_keeps_max_and_sorts() {
        let mut set = CandidateSet::new();
        set.add_concept(&concept(1, "driver", 0.7));
        set.add_concept(&concept(1, "driver", 1.0));
        set.add_concept(&concept(2, "alcohol", 1.0));
        set.add_relation(&relation(9, "prohibition", 0.9));
        assert_eq!(set.len(), 5);

        let sorted = set.into_sorted();
        let names: Vec<(&str, CandidateRole)> = sorted.iter().map(|c| (c.name.as_str(), c.role)).collect();
        assert_eq!(
            names,
            vec![
                ("alcohol", CandidateRole::Subject),
                ("alcohol", CandidateRole::Object),
                ("driver", CandidateRole::Subject),
                ("driver", CandidateRole::Object),
                ("prohibition", CandidateRole::Relation),
            ]
        );
        assert_eq!(sorted[2].score, 1.0);
    }

    #[test]
    fn test_candidate_order_is_deterministic() {
        let build = |order: &[usize]| {
            let all = [concept(1, "helmet", 0.9), concept(2, "driver", 0.9), concept(3, "fine", 0.9)];
            let mut set = CandidateSet::new();
            for i in order {
                set.add_concept(&all[*i]);
            }
            set.into_sorted()
                .into_iter()
                .map(|c| (c.name, c.role))
                .collect::<Vec<_>>()
        };
        assert_eq!(build(&[0, 1, 2]), build(&[2, 0, 1]));
    }

    #[test]
    fn test_full_star_set() {
        let mut set = CandidateSet::new();
        for (i, name) in ["a1", "a2", "a3", "a4", "a5", "a6"].iter().enumerate() {
            set.add_concept(&concept(i as i64 + 1, name, 1.0));
        }
        set.add_relation(&relation(1, "penalty", 0.9));
        set.add_relation(&relation(2, "prohibition", 0.8));
        set.add_relation(&relation(3, "requirement", 0.7));
        let stars = build_stars(&set.into_sorted());

        assert_eq!(stars.len(), 4);
        let a = &stars[0].star;
        assert_eq!(a.subject_candidates.len(), 5);
        assert_eq!(a.relation_candidates.len(), 3);
        assert_eq!(a.object_candidates.len(), 5);
        assert_eq!(stars[1].star.relation_ids(), vec![1, 2]);
        assert_eq!(stars[2].star.subject_ids(), vec![1, 2, 3]);
        assert!(stars[2].star.object_candidates.is_empty());
        assert!(stars[3].star.subject_candidates.is_empty());
        assert_eq!(stars[3].star.object_ids(), vec![1, 2, 3]);
        assert!((stars[3].weight - 0.7).abs() < 1e-6);
    }

    #[test]
    fn test_relations_only() {
        let mut set = CandidateSet::new();
        set.add_relation(&relation(1, "penalty", 0.9));
        let stars = build_stars(&set.into_sorted());

        assert_eq!(stars.len(), 1);
        assert!(stars[0].star.subject_candidates.is_empty());
        assert_eq!(stars[0].star.relation_ids(), vec![1]);
        assert_eq!(stars[0].weight, 1.0);
    }

    #[test]
    fn test_no_candidates_no_stars() {
        assert!(build_stars(&[]).is_empty());
    }
}
