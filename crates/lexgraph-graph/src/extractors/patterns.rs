//! Rule-table pattern extraction.
//!
//! A [`RuleSet`] is an ordered list of [`RelationRule`]s. Every match of every
//! pattern yields one [`ExtractedTriple`]; matches are never deduplicated
//! across patterns. Matches whose trimmed subject or object is empty are
//! dropped.

use std::path::{Path, PathBuf};

use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

const DEFAULT_RULES: &str = include_str!("../../rules/legal_default.toml");

fn default_relation_type() -> String {
    "legal_rule".to_string()
}

/// Errors raised while building a rule table.
#[derive(Debug, Error)]
pub enum RuleError {
    #[error("failed to read rule file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid rule file: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid pattern `{pattern}`: {source}")]
    Pattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },
    #[error("pattern `{pattern}` needs subject and object capture groups")]
    MissingGroups { pattern: String },
    #[error("relation rule has an empty name")]
    EmptyName,
}

/// Role rebinding applied to a pattern's captures.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Rebind {
    /// First group (an amount clause) becomes the context, the subject becomes
    /// `placeholder`, the second group stays the object.
    AmountToContext { placeholder: String },
}

/// One compiled pattern.
#[derive(Debug, Clone)]
pub struct PatternRule {
    regex: Regex,
    rebind: Option<Rebind>,
}

impl PatternRule {
    pub fn new(pattern: &str, rebind: Option<Rebind>) -> Result<Self, RuleError> {
        let regex = Regex::new(pattern).map_err(|source| RuleError::Pattern {
            pattern: pattern.to_string(),
            source,
        })?;
        // Group 0 is the whole match
        if regex.captures_len() < 3 {
            return Err(RuleError::MissingGroups {
                pattern: pattern.to_string(),
            });
        }
        Ok(Self { regex, rebind })
    }

    pub fn as_str(&self) -> &str {
        self.regex.as_str()
    }

    pub fn rebind(&self) -> Option<&Rebind> {
        self.rebind.as_ref()
    }
}

/// A canonical relation and the patterns that produce it.
#[derive(Debug, Clone)]
pub struct RelationRule {
    pub name: String,
    pub keywords: Vec<String>,
    pub relation_type: String,
    pub patterns: Vec<PatternRule>,
}

impl RelationRule {
    pub fn new(name: impl Into<String>, keywords: Vec<String>, patterns: Vec<PatternRule>) -> Self {
        Self {
            name: name.into(),
            keywords,
            relation_type: default_relation_type(),
            patterns,
        }
    }
}

/// A raw triple found in text, before concept resolution.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractedTriple {
    pub subject: String,
    pub relation: String,
    pub object: String,
    pub context: Option<String>,
    /// The full matched text.
    pub span: String,
    /// Index of the producing rule in its [`RuleSet`].
    pub rule_index: usize,
    pub pattern_index: usize,
}

#[derive(Debug, Deserialize)]
struct RuleFile {
    #[serde(default, rename = "relation")]
    relations: Vec<RelationEntry>,
}

#[derive(Debug, Deserialize)]
struct RelationEntry {
    name: String,
    #[serde(default)]
    keywords: Vec<String>,
    #[serde(default = "default_relation_type")]
    relation_type: String,
    #[serde(default, rename = "pattern")]
    patterns: Vec<PatternEntry>,
}

#[derive(Debug, Deserialize)]
struct PatternEntry {
    pattern: String,
    #[serde(default)]
    rebind: Option<Rebind>,
}

/// Ordered extraction rule table.
#[derive(Debug, Clone, Default)]
pub struct RuleSet {
    rules: Vec<RelationRule>,
}

impl RuleSet {
    pub fn new(rules: Vec<RelationRule>) -> Self {
        Self { rules }
    }

    /// The built-in English and Vietnamese legal rules.
    pub fn legal_default() -> Result<Self, RuleError> {
        Self::from_toml(DEFAULT_RULES)
    }

    /// Parse a rule table from TOML.
    pub fn from_toml(source: &str) -> Result<Self, RuleError> {
        let file: RuleFile = toml::from_str(source)?;
        let mut rules = Vec::with_capacity(file.relations.len());

        for entry in file.relations {
            if entry.name.trim().is_empty() {
                return Err(RuleError::EmptyName);
            }
            let patterns = entry
                .patterns
                .into_iter()
                .map(|p| PatternRule::new(&p.pattern, p.rebind))
                .collect::<Result<Vec<_>, _>>()?;
            rules.push(RelationRule {
                name: entry.name,
                keywords: entry.keywords,
                relation_type: entry.relation_type,
                patterns,
            });
        }

        Ok(Self { rules })
    }

    /// Load a rule table from a TOML file.
    pub fn load(path: &Path) -> Result<Self, RuleError> {
        let source = std::fs::read_to_string(path).map_err(|source| RuleError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&source)
    }

    pub fn rules(&self) -> &[RelationRule] {
        &self.rules
    }

    pub fn get(&self, index: usize) -> Option<&RelationRule> {
        self.rules.get(index)
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Run every rule over `text` (lowercased first).
    pub fn extract(&self, text: &str) -> Vec<ExtractedTriple> {
        let text = text.to_lowercase();
        if text.trim().is_empty() {
            return Vec::new();
        }

        let mut out = Vec::new();
        for (rule_index, rule) in self.rules.iter().enumerate() {
            for (pattern_index, pattern) in rule.patterns.iter().enumerate() {
                for caps in pattern.regex.captures_iter(&text) {
                    let (Some(first), Some(second), Some(whole)) = (caps.get(1), caps.get(2), caps.get(0)) else {
                        continue;
                    };

                    let (subject, object, context) = match &pattern.rebind {
                        Some(Rebind::AmountToContext { placeholder }) => (
                            placeholder.trim().to_string(),
                            clean_span(second.as_str()),
                            Some(clean_span(first.as_str())).filter(|c| !c.is_empty()),
                        ),
                        None => (clean_span(first.as_str()), clean_span(second.as_str()), None),
                    };

                    if subject.is_empty() || object.is_empty() {
                        continue;
                    }

                    out.push(ExtractedTriple {
                        subject,
                        relation: rule.name.clone(),
                        object,
                        context,
                        span: whole.as_str().trim().to_string(),
                        rule_index,
                        pattern_index,
                    });
                }
            }
        }

        debug!(count = out.len(), "pattern extraction");
        out
    }
}

fn clean_span(s: &str) -> String {
    s.trim_matches(|c: char| c.is_whitespace() || c == ',').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rules() -> RuleSet {
        RuleSet::legal_default().unwrap()
    }

    #[test]
    fn test_default_rules_cover_canonical_relations() {
        let names: Vec<_> = rules().rules().iter().map(|r| r.name.clone()).collect();
        assert_eq!(names, vec!["prohibition", "requirement", "penalty", "applicability", "scope"]);
        assert!(rules().rules().iter().all(|r| !r.keywords.is_empty() && r.relation_type == "legal_rule"));
    }

    #[test]
    fn test_empty_text_yields_nothing() {
        assert!(rules().extract("").is_empty());
        assert!(rules().extract("   \n\t ").is_empty());
    }

    #[test]
    fn test_english_prohibition() {
        let triples = rules().extract("The driver must not run the red light");
        let prohibition = triples
            .iter()
            .find(|t| t.relation == "prohibition")
            .expect("prohibition triple");
        assert_eq!(prohibition.subject, "the driver");
        assert_eq!(prohibition.object, "run the red light");
        assert_eq!(prohibition.context, None);

        // The requirement rule fires too; both are kept
        assert!(triples.iter().any(|t| t.relation == "requirement"));
    }

    #[test]
    fn test_repeated_matches_are_not_deduplicated() {
        let triples = rules().extract("the driver must not speed. the driver must not speed.");
        let count = triples.iter().filter(|t| t.relation == "prohibition").count();
        assert_eq!(count, 2);
    }

    #[test]
    fn test_english_penalty_keeps_amount_as_subject() {
        let triples = rules().extract("A fine of 500,000 vnd for running a red light");
        let penalty = triples.iter().find(|t| t.relation == "penalty").unwrap();
        assert_eq!(penalty.subject, "500,000 vnd");
        assert_eq!(penalty.object, "running a red light");
        assert_eq!(penalty.context, None);
        assert!(triples.iter().all(|t| t.subject != "the violator"));
    }

    #[test]
    fn test_vietnamese_penalty_rebinds_amount() {
        let text = "Phạt tiền từ 800.000 đồng đến 1.000.000 đồng đối với người điều khiển xe không đội mũ bảo hiểm";
        let triples = rules().extract(text);
        assert!(triples.iter().any(|t| t.relation == "penalty"
            && t.subject == "người vi phạm"
            && t.object == "người điều khiển xe không đội mũ bảo hiểm"
            && t.context.as_deref() == Some("800.000 đồng")));
    }

    #[test]
    fn test_vietnamese_prohibition_trims_commas() {
        let triples = rules().extract("người lái xe, không được uống rượu");
        let t = triples.iter().find(|t| t.relation == "prohibition").unwrap();
        assert_eq!(t.subject, "người lái xe");
        assert_eq!(t.object, "uống rượu");
    }

    #[test]
    fn test_custom_rules_drop_empty_spans() {
        let set = RuleSet::from_toml(
            r#"
            [[relation]]
            name = "obligation"
            keywords = ["must"]

            [[relation.pattern]]
            pattern = '([a-z]*) must ([a-z]*)'
            "#,
        )
        .unwrap();
        assert_eq!(set.rules()[0].relation_type, "legal_rule");

        assert!(set.extract(" must go").is_empty());
        let triples = set.extract("owners must register");
        assert_eq!(triples.len(), 1);
        assert_eq!(triples[0].relation, "obligation");
        assert_eq!(triples[0].span, "owners must register");
    }

    #[test]
    fn test_rule_validation() {
        let single_group = r#"
            [[relation]]
            name = "x"
            [[relation.pattern]]
            pattern = '([a-z]+) is banned'
        "#;
        assert!(matches!(RuleSet::from_toml(single_group), Err(RuleError::MissingGroups { .. })));

        let bad_regex = r#"
            [[relation]]
            name = "x"
            [[relation.pattern]]
            pattern = '(unclosed'
        "#;
        assert!(matches!(RuleSet::from_toml(bad_regex), Err(RuleError::Pattern { .. })));

        let no_name = r#"
            [[relation]]
            name = " "
        "#;
        assert!(matches!(RuleSet::from_toml(no_name), Err(RuleError::EmptyName)));
    }

    #[test]
    fn test_injected_rules() {
        let rule = RelationRule::new(
            "scope",
            vec!["governs".to_string()],
            vec![PatternRule::new(r"([a-z\s]+) governs ([a-z\s]+)", None).unwrap()],
        );
        let set = RuleSet::new(vec![rule]);
        let triples = set.extract("this decree governs road traffic");
        assert_eq!(triples.len(), 1);
        assert_eq!(triples[0].subject, "this decree");
        assert_eq!(triples[0].object, "road traffic");
    }
}
