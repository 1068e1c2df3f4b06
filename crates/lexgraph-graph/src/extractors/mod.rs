//! Triple extractors for legal text.
//!
//! Extraction is rule-based: an ordered table of relation rules, each with one
//! or more regex patterns, is run over lowercased unit text. The table is data
//! and can be replaced or loaded from TOML.

pub mod patterns;

pub use patterns::{ExtractedTriple, PatternRule, Rebind, RelationRule, RuleError, RuleSet};
