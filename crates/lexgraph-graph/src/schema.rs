//! Graph schema definitions for the legal knowledge graph.
//!
//! This module defines the core types for the graph:
//! - `Document` / `Unit`: legal instruments and their text segments
//! - `Concept` / `Relation`: canonical entities and predicates
//! - `Triple`: a Subject-Relation-Object assertion grounded in one Unit
//! - `QueryCandidate` / `QueryStar`: transient records used while answering a query

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A legal document (law, decree, circular, ...).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub id: i64,
    pub title: String,
    #[serde(rename = "type")]
    pub doc_type: String,
    pub number: Option<String>,
    pub year: Option<i32>,
    pub authority: Option<String>,
    pub status: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Fields needed to create a document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewDocument {
    pub title: String,
    #[serde(rename = "type")]
    pub doc_type: String,
    pub number: Option<String>,
    pub year: Option<i32>,
    pub authority: Option<String>,
}

/// A text segment of a document (article, clause, point, chapter).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Unit {
    pub id: i64,
    pub document_id: i64,
    pub level: String,
    pub code: Option<String>,
    pub text: String,
    pub parent_id: Option<i64>,
    pub order_index: i32,
    pub created_at: DateTime<Utc>,
}

/// Fields needed to create a unit.
#[derive(Debug, Clone)]
pub struct NewUnit {
    pub document_id: i64,
    pub level: String,
    pub code: Option<String>,
    pub text: String,
    pub parent_id: Option<i64>,
    pub order_index: i32,
}

/// A unit with its nested children, ordered by `order_index`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnitTree {
    #[serde(flatten)]
    pub unit: Unit,
    pub children: Vec<UnitTree>,
}

/// A canonical legal concept (entity, action, condition).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Concept {
    pub id: i64,
    pub name: String,
    pub description: Option<String>,
    pub synonyms: Vec<String>,
    pub keywords: Vec<String>,
    pub concept_type: String,
    pub created_at: DateTime<Utc>,
}

/// A canonical predicate between concepts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Relation {
    pub id: i64,
    pub name: String,
    pub description: Option<String>,
    pub keywords: Vec<String>,
    pub relation_type: String,
    pub created_at: DateTime<Utc>,
}

/// Result of a get-or-create / upsert: the stored entity and whether this call created it.
#[derive(Debug, Clone)]
pub struct Resolved<T> {
    pub entity: T,
    pub created: bool,
}

/// A stored Subject-Relation-Object assertion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Triple {
    pub id: i64,
    pub subject_id: i64,
    pub relation_id: i64,
    pub object_id: i64,
    pub unit_id: i64,
    pub doc_ref: String,
    pub confidence: f32,
    pub tfidf: Option<f32>,
    pub is_blacklisted: bool,
    pub context: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Fields needed to create a triple.
///
/// `GraphStore::create_triple` ignores `tfidf` and `is_blacklisted`;
/// `GraphStore::insert_triple` stores them.
#[derive(Debug, Clone)]
pub struct NewTriple {
    pub subject_id: i64,
    pub relation_id: i64,
    pub object_id: i64,
    pub unit_id: i64,
    pub doc_ref: String,
    pub confidence: f32,
    pub tfidf: Option<f32>,
    pub is_blacklisted: bool,
    pub context: Option<String>,
}

/// A triple joined with the names and text it refers to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TripleView {
    #[serde(flatten)]
    pub triple: Triple,
    pub subject_name: String,
    pub relation_name: String,
    pub object_name: String,
    pub unit_text: String,
    pub document_title: String,
    pub document_id: i64,
}

/// Role a candidate plays in a star.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CandidateRole {
    Subject,
    Relation,
    Object,
}

impl CandidateRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            CandidateRole::Subject => "subject",
            CandidateRole::Relation => "relation",
            CandidateRole::Object => "object",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "subject" => Some(CandidateRole::Subject),
            "relation" => Some(CandidateRole::Relation),
            "object" => Some(CandidateRole::Object),
            _ => None,
        }
    }
}

/// How a candidate matched its term.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchKind {
    Exact,
    Trigram,
    Fuzzy,
    Keyword,
    Prefix,
}

impl MatchKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MatchKind::Exact => "exact",
            MatchKind::Trigram => "trigram",
            MatchKind::Fuzzy => "fuzzy",
            MatchKind::Keyword => "keyword",
            MatchKind::Prefix => "prefix",
        }
    }
}

/// A concept or relation matched by a query term.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryCandidate {
    pub role: CandidateRole,
    pub concept_id: Option<i64>,
    pub relation_id: Option<i64>,
    pub name: String,
    pub score: f32,
    pub match_kind: MatchKind,
}

impl QueryCandidate {
    /// Copy of this candidate playing a different role.
    pub fn with_role(&self, role: CandidateRole) -> Self {
        Self {
            role,
            ..self.clone()
        }
    }
}

/// A bounded binding of candidate lists used to probe the triple store.
///
/// An empty list means "any" for that role.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueryStar {
    pub subject_candidates: Vec<QueryCandidate>,
    pub relation_candidates: Vec<QueryCandidate>,
    pub object_candidates: Vec<QueryCandidate>,
    pub matching_triples: Vec<TripleView>,
}

impl QueryStar {
    pub fn new(
        subject_candidates: Vec<QueryCandidate>,
        relation_candidates: Vec<QueryCandidate>,
        object_candidates: Vec<QueryCandidate>,
    ) -> Self {
        Self {
            subject_candidates,
            relation_candidates,
            object_candidates,
            matching_triples: Vec::new(),
        }
    }

    pub fn subject_ids(&self) -> Vec<i64> {
        self.subject_candidates.iter().filter_map(|c| c.concept_id).collect()
    }

    pub fn relation_ids(&self) -> Vec<i64> {
        self.relation_candidates.iter().filter_map(|c| c.relation_id).collect()
    }

    pub fn object_ids(&self) -> Vec<i64> {
        self.object_candidates.iter().filter_map(|c| c.concept_id).collect()
    }
}

/// Row counts per table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphStats {
    pub documents: i64,
    pub units: i64,
    pub concepts: i64,
    pub relations: i64,
    pub triples: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(role: CandidateRole, concept_id: Option<i64>, relation_id: Option<i64>) -> QueryCandidate {
        QueryCandidate {
            role,
            concept_id,
            relation_id,
            name: "x".to_string(),
            score: 1.0,
            match_kind: MatchKind::Exact,
        }
    }

    #[test]
    fn test_candidate_role_roundtrip() {
        for role in [CandidateRole::Subject, CandidateRole::Relation, CandidateRole::Object] {
            assert_eq!(CandidateRole::parse(role.as_str()), Some(role));
        }
        assert_eq!(CandidateRole::parse("predicate"), None);
    }

    #[test]
    fn test_star_ids_skip_missing_references() {
        let star = QueryStar::new(
            vec![candidate(CandidateRole::Subject, Some(1), None), candidate(CandidateRole::Subject, None, None)],
            vec![candidate(CandidateRole::Relation, None, Some(7))],
            Vec::new(),
        );
        assert_eq!(star.subject_ids(), vec![1]);
        assert_eq!(star.relation_ids(), vec![7]);
        assert!(star.object_ids().is_empty());
    }

    #[test]
    fn test_with_role_keeps_identity() {
        let c = candidate(CandidateRole::Subject, Some(3), None);
        let o = c.with_role(CandidateRole::Object);
        assert_eq!(o.role, CandidateRole::Object);
        assert_eq!(o.concept_id, Some(3));
        assert_eq!(o.name, c.name);
    }
}
