//! LexGraph Graph - the legal knowledge graph.
//!
//! This crate provides the graph infrastructure behind LexGraph's question
//! answering. It includes:
//!
//! - **Schema**: Documents, Units, Concepts, Relations, Triples and the
//!   transient query records (candidates and stars)
//! - **Storage**: SQLite-backed persistence plus candidate lookup and bounded
//!   star-pattern triple retrieval
//! - **Similarity**: trigram similarity and candidate scoring policies
//! - **Extractors**: the rule-table pattern extractor for legal text
//!
//! # Example
//!
//! ```ignore
//! use lexgraph_graph::{GraphStore, RuleSet};
//!
//! let store = GraphStore::new(pool);
//! let rules = RuleSet::legal_default()?;
//!
//! for triple in rules.extract("the driver must not run the red light") {
//!     println!("{} -[{}]-> {}", triple.subject, triple.relation, triple.object);
//! }
//!
//! let candidates = store.find_concept_candidates("driver").await?;
//! ```

pub mod extractors;
pub mod schema;
pub mod similarity;
pub mod storage;

// Re-export commonly used types
pub use extractors::{ExtractedTriple, PatternRule, Rebind, RelationRule, RuleError, RuleSet};
pub use schema::{
    CandidateRole, Concept, Document, GraphStats, MatchKind, NewDocument, NewTriple, NewUnit,
    QueryCandidate, QueryStar, Relation, Resolved, Triple, TripleView, Unit, UnitTree,
};
pub use storage::{
    GraphStore, CONCEPT_CANDIDATE_LIMIT, RELATION_CANDIDATE_LIMIT, STAR_TRIPLE_LIMIT,
};
