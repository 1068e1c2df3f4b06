//! Concept/relation resolution.
//!
//! Extraction-derived names go through get-or-create (no merging); explicit
//! request entries go through upsert-with-merge. Both report whether rows were
//! created so ingestion counts stay exact.

use anyhow::Result;

use lexgraph_graph::{Concept, ExtractedTriple, GraphStore, Relation, RelationRule, Resolved};

use crate::request::{ConceptRequest, RelationRequest};

const ENTITY_TYPE: &str = "entity";
const EXPLICIT_RELATION_TYPE: &str = "legal_rule";

/// The three canonical entities behind one triple.
#[derive(Debug, Clone)]
pub struct ResolvedTriple {
    pub subject: Resolved<Concept>,
    pub relation: Resolved<Relation>,
    pub object: Resolved<Concept>,
}

impl ResolvedTriple {
    pub fn new_concepts(&self) -> usize {
        usize::from(self.subject.created) + usize::from(self.object.created)
    }

    pub fn new_relations(&self) -> usize {
        usize::from(self.relation.created)
    }
}

#[derive(Clone)]
pub struct ConceptResolver {
    store: GraphStore,
}

impl ConceptResolver {
    pub fn new(store: GraphStore) -> Self {
        Self { store }
    }

    /// Resolve a pattern match. The relation is created with the rule's keywords on first sight.
    pub async fn resolve_extracted(&self, triple: &ExtractedTriple, rule: &RelationRule) -> Result<ResolvedTriple> {
        let subject = self.store.get_or_create_concept(&triple.subject, ENTITY_TYPE).await?;
        let object = self.store.get_or_create_concept(&triple.object, ENTITY_TYPE).await?;
        let relation = self
            .store
            .get_or_create_relation(&rule.name, &rule.keywords, &rule.relation_type)
            .await?;
        Ok(ResolvedTriple { subject, relation, object })
    }

    /// Resolve an explicit triple from a request, merging into existing rows.
    pub async fn resolve_explicit(&self, subject: &str, relation: &str, object: &str) -> Result<ResolvedTriple> {
        let subject = self.store.upsert_concept(subject, &[], &[], ENTITY_TYPE, None).await?;
        let object = self.store.upsert_concept(object, &[], &[], ENTITY_TYPE, None).await?;
        let relation = self
            .store
            .upsert_relation(relation, &[], EXPLICIT_RELATION_TYPE, None)
            .await?;
        Ok(ResolvedTriple { subject, relation, object })
    }

    pub async fn upsert_concept(&self, req: &ConceptRequest) -> Result<Resolved<Concept>> {
        self.store
            .upsert_concept(
                &req.name,
                &req.synonyms,
                &req.keywords,
                &req.concept_type,
                req.description.as_deref(),
            )
            .await
    }

    pub async fn upsert_relation(&self, req: &RelationRequest) -> Result<Resolved<Relation>> {
        self.store
            .upsert_relation(&req.name, &req.keywords, &req.relation_type, req.description.as_deref())
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lexgraph_graph::RuleSet;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn setup_resolver() -> ConceptResolver {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        GraphStore::init_schema(&pool).await.unwrap();
        ConceptResolver::new(GraphStore::new(pool))
    }

    #[tokio::test]
    async fn test_extracted_counts_are_exact() {
        let resolver = setup_resolver().await;
        let rules = RuleSet::legal_default().unwrap();
        let extracted = rules.extract("the driver must not run the red light");
        let first = extracted.iter().find(|t| t.relation == "prohibition").unwrap();
        let rule = rules.get(first.rule_index).unwrap();

        let resolved = resolver.resolve_extracted(first, rule).await.unwrap();
        assert_eq!(resolved.new_concepts(), 2);
        assert_eq!(resolved.new_relations(), 1);
        assert_eq!(resolved.relation.entity.keywords, rule.keywords);

        let again = resolver.resolve_extracted(first, rule).await.unwrap();
        assert_eq!(again.new_concepts(), 0);
        assert_eq!(again.new_relations(), 0);
        assert_eq!(again.subject.entity.id, resolved.subject.entity.id);
    }

    #[tokio::test]
    async fn test_self_referencing_triple_counts_one_concept() {
        let resolver = setup_resolver().await;
        let resolved = resolver.resolve_explicit("owner", "requirement", "owner").await.unwrap();
        assert_eq!(resolved.new_concepts(), 1);
        assert_eq!(resolved.subject.entity.id, resolved.object.entity.id);
        assert_eq!(resolved.relation.entity.relation_type, "legal_rule");
    }
}
