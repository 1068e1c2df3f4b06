//! LexGraph Ingest - loads legal documents into the knowledge graph.
//!
//! [`IngestionEngine::ingest_legal_content`] stores a document and its units,
//! optionally embeds unit text, merges explicit concepts/relations/triples and,
//! when no explicit triples are given, extracts triples with the rule table.
//!
//! Callers must serialize ingestion of the same document: concept upserts are
//! not synchronized and there is no whole-call transaction.

use std::collections::HashMap;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

use anyhow::Result;
use sqlx::{sqlite::SqliteConnectOptions, sqlite::SqlitePoolOptions, SqlitePool};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};

pub mod error;
pub mod request;
pub mod resolver;

pub use error::IngestError;
pub use request::{
    ConceptRequest, DocumentRequest, IngestRequest, IngestResponse, RelationRequest, TripleRequest,
    UnitRequest,
};
pub use resolver::{ConceptResolver, ResolvedTriple};

// Re-export graph types for convenience
pub use lexgraph_graph::{Document, GraphStore, NewTriple, NewUnit, RuleSet, Unit};
use lexgraph_vector::{Embedder, VectorStore};

use crate::error::DependencyExt;

/// Confidence assigned to pattern-extracted triples.
pub const EXTRACTED_CONFIDENCE: f32 = 0.8;
/// Confidence assigned to explicit triples that do not carry one.
pub const EXPLICIT_CONFIDENCE: f32 = 0.9;
/// tfidf assigned to explicit triples that do not carry one.
pub const EXPLICIT_TFIDF: f32 = 0.5;

/// Open (creating if needed) the SQLite database at `db_path` in WAL mode.
pub async fn open_pool(db_path: &Path) -> Result<SqlitePool> {
    lexgraph_vector::register_sqlite_vec();
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let options = SqliteConnectOptions::from_str("sqlite:")?
        .filename(db_path)
        .create_if_missing(true);
    let pool = SqlitePoolOptions::new()
        .max_connections(4)
        .connect_with(options)
        .await?;
    sqlx::query("PRAGMA journal_mode=WAL;").execute(&pool).await?;
    Ok(pool)
}

/// Citation string: `type number year code`, falling back to the title.
pub fn build_doc_ref(doc: &Document, unit_code: Option<&str>) -> String {
    let mut parts: Vec<String> = Vec::new();
    if !doc.doc_type.is_empty() {
        parts.push(doc.doc_type.clone());
    }
    if let Some(number) = doc.number.as_deref().filter(|n| !n.is_empty()) {
        parts.push(number.to_string());
    }
    if let Some(year) = doc.year.filter(|y| *y > 0) {
        parts.push(year.to_string());
    }
    if let Some(code) = unit_code.filter(|c| !c.is_empty()) {
        parts.push(code.to_string());
    }

    if parts.is_empty() {
        doc.title.clone()
    } else {
        parts.join(" ")
    }
}

#[derive(Clone)]
pub struct IngestionEngine {
    pool: SqlitePool,
    store: GraphStore,
    vectors: VectorStore,
    resolver: ConceptResolver,
    rules: Arc<RuleSet>,
    embedder: Option<Arc<dyn Embedder>>,
    embedding_model: Option<String>,
    auto_embed: bool,
}

impl IngestionEngine {
    /// Open the database file and prepare every table.
    pub async fn new(db_path: &Path) -> Result<Self> {
        let pool = open_pool(db_path).await?;
        Self::from_pool(pool).await
    }

    /// Build an engine over an existing pool with the built-in rules.
    pub async fn from_pool(pool: SqlitePool) -> Result<Self> {
        GraphStore::init_schema(&pool).await?;
        let vectors = VectorStore::from_pool(pool.clone()).await?;
        let store = GraphStore::new(pool.clone());
        Ok(Self {
            resolver: ConceptResolver::new(store.clone()),
            store,
            vectors,
            rules: Arc::new(RuleSet::legal_default()?),
            embedder: None,
            embedding_model: None,
            auto_embed: true,
            pool,
        })
    }

    /// Replace the extraction rule table.
    pub fn with_rules(mut self, rules: RuleSet) -> Self {
        self.rules = Arc::new(rules);
        self
    }

    /// Enable unit embeddings. `model` overrides the name recorded with each vector.
    pub fn with_embedder(mut self, embedder: Arc<dyn Embedder>, model: Option<String>) -> Self {
        self.embedder = Some(embedder);
        self.embedding_model = model.filter(|m| !m.is_empty());
        self
    }

    /// Whether requests without `auto_embed` are embedded.
    pub fn with_auto_embed_default(mut self, enabled: bool) -> Self {
        self.auto_embed = enabled;
        self
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Get a GraphStore instance backed by the same database.
    pub fn graph_store(&self) -> GraphStore {
        self.store.clone()
    }

    pub fn vector_store(&self) -> VectorStore {
        self.vectors.clone()
    }

    pub fn rules(&self) -> &RuleSet {
        &self.rules
    }

    /// Store a document, its units and their triples.
    ///
    /// Returns early without writing if a document with the same title or
    /// number already exists. Persistence failures abort the call; rows
    /// written before the failure stay.
    #[instrument(skip(self, req, cancel), fields(title = %req.document.title, units = req.units.len()))]
    pub async fn ingest_legal_content(
        &self,
        req: &IngestRequest,
        cancel: &CancellationToken,
    ) -> Result<IngestResponse, IngestError> {
        validate(req)?;
        check(cancel)?;

        let new_doc = req.document.to_new_document();
        if let Some(existing) = self
            .store
            .find_document_by_metadata(&new_doc.title, new_doc.number.as_deref())
            .await
            .dependency("checking for existing document")?
        {
            info!(document_id = existing.id, "document already ingested");
            return Ok(IngestResponse {
                document_id: existing.id,
                processing_summary: format!(
                    "Document '{}' already exists; nothing was ingested.",
                    existing.title
                ),
                ..Default::default()
            });
        }

        let doc = self
            .store
            .create_document(&new_doc)
            .await
            .dependency("creating document")?;
        let mut response = IngestResponse {
            document_id: doc.id,
            ..Default::default()
        };

        // Parents resolve only to codes seen earlier in the request
        let mut by_code: HashMap<String, i64> = HashMap::new();
        let mut units: Vec<Unit> = Vec::with_capacity(req.units.len());
        for unit_req in &req.units {
            check(cancel)?;
            let parent_id = unit_req
                .parent_code
                .as_deref()
                .filter(|c| !c.is_empty())
                .and_then(|c| {
                    let found = by_code.get(c).copied();
                    if found.is_none() {
                        debug!(parent_code = c, "parent code not seen yet; storing as root");
                    }
                    found
                });

            let unit = self
                .store
                .create_unit(&NewUnit {
                    document_id: doc.id,
                    level: unit_req.level.clone(),
                    code: unit_req.code.clone(),
                    text: unit_req.text.clone(),
                    parent_id,
                    order_index: unit_req.order_index,
                })
                .await
                .dependency(format_args!("creating unit {}", unit_req.code.as_deref().unwrap_or("<uncoded>")))?;

            if let Some(code) = unit.code.as_ref().filter(|c| !c.is_empty()) {
                by_code.insert(code.clone(), unit.id);
            }
            units.push(unit);
        }
        response.units_created = units.len();

        response.embeddings_created = self.embed_units(req, &units, cancel).await?;

        for concept in &req.concepts {
            check(cancel)?;
            let resolved = self
                .resolver
                .upsert_concept(concept)
                .await
                .dependency(format_args!("upserting concept {}", concept.name))?;
            response.concepts_created += usize::from(resolved.created);
        }

        for relation in &req.relations {
            check(cancel)?;
            let resolved = self
                .resolver
                .upsert_relation(relation)
                .await
                .dependency(format_args!("upserting relation {}", relation.name))?;
            response.relations_created += usize::from(resolved.created);
        }

        if req.triples.is_empty() {
            for unit in &units {
                self.extract_unit(&doc, unit, &mut response, cancel).await?;
            }
        } else {
            for triple in &req.triples {
                check(cancel)?;
                self.insert_explicit(&doc, triple, &by_code, &units, &mut response)
                    .await?;
            }
        }

        response.processing_summary = format!(
            "Ingested document '{}': {} units, {} triples, {} new concepts, {} new relations, {} embeddings",
            doc.title,
            response.units_created,
            response.triples_created,
            response.concepts_created,
            response.relations_created,
            response.embeddings_created,
        );
        info!(document_id = doc.id, triples = response.triples_created, "ingestion complete");
        Ok(response)
    }

    async fn embed_units(
        &self,
        req: &IngestRequest,
        units: &[Unit],
        cancel: &CancellationToken,
    ) -> Result<usize, IngestError> {
        let Some(embedder) = &self.embedder else {
            return Ok(0);
        };
        if !req.auto_embed.unwrap_or(self.auto_embed) {
            return Ok(0);
        }

        let model = req
            .embedding_model
            .clone()
            .filter(|m| !m.is_empty())
            .or_else(|| self.embedding_model.clone())
            .unwrap_or_else(|| embedder.model_name());

        let mut created = 0;
        for unit in units {
            check(cancel)?;
            let vector = embedder
                .embed(&unit.text)
                .await
                .dependency(format_args!("embedding unit {}", unit.id))?;
            self.vectors
                .upsert_unit_embedding(unit.id, &model, &vector)
                .await
                .dependency(format_args!("storing embedding for unit {}", unit.id))?;
            created += 1;
        }
        Ok(created)
    }

    async fn extract_unit(
        &self,
        doc: &Document,
        unit: &Unit,
        response: &mut IngestResponse,
        cancel: &CancellationToken,
    ) -> Result<(), IngestError> {
        let doc_ref = build_doc_ref(doc, unit.code.as_deref());

        for extracted in self.rules.extract(&unit.text) {
            check(cancel)?;
            let Some(rule) = self.rules.get(extracted.rule_index) else {
                continue;
            };
            let resolved = self
                .resolver
                .resolve_extracted(&extracted, rule)
                .await
                .dependency(format_args!("resolving extracted triple in unit {}", unit.id))?;

            self.store
                .create_triple(&NewTriple {
                    subject_id: resolved.subject.entity.id,
                    relation_id: resolved.relation.entity.id,
                    object_id: resolved.object.entity.id,
                    unit_id: unit.id,
                    doc_ref: doc_ref.clone(),
                    confidence: EXTRACTED_CONFIDENCE,
                    tfidf: None,
                    is_blacklisted: false,
                    context: extracted.context.clone(),
                })
                .await
                .dependency(format_args!("creating triple for unit {}", unit.id))?;

            response.triples_created += 1;
            response.concepts_created += resolved.new_concepts();
            response.relations_created += resolved.new_relations();
        }
        Ok(())
    }

    async fn insert_explicit(
        &self,
        doc: &Document,
        req: &TripleRequest,
        by_code: &HashMap<String, i64>,
        units: &[Unit],
        response: &mut IngestResponse,
    ) -> Result<(), IngestError> {
        let unit_id = *by_code
            .get(&req.unit_code)
            .ok_or_else(|| IngestError::NotFound(format!("unit code {} not found", req.unit_code)))?;

        let resolved = self
            .resolver
            .resolve_explicit(&req.subject, &req.relation, &req.object)
            .await
            .dependency(format_args!("resolving triple {}-{}-{}", req.subject, req.relation, req.object))?;

        let doc_ref = if req.doc_ref.trim().is_empty() {
            let code = units.iter().find(|u| u.id == unit_id).and_then(|u| u.code.as_deref());
            build_doc_ref(doc, code)
        } else {
            req.doc_ref.clone()
        };

        self.store
            .insert_triple(&NewTriple {
                subject_id: resolved.subject.entity.id,
                relation_id: resolved.relation.entity.id,
                object_id: resolved.object.entity.id,
                unit_id,
                doc_ref,
                confidence: req.confidence.unwrap_or(EXPLICIT_CONFIDENCE),
                tfidf: Some(req.tfidf.unwrap_or(EXPLICIT_TFIDF)),
                is_blacklisted: false,
                context: req.context.clone(),
            })
            .await
            .dependency(format_args!("creating triple {}-{}-{}", req.subject, req.relation, req.object))?;

        response.triples_created += 1;
        response.concepts_created += resolved.new_concepts();
        response.relations_created += resolved.new_relations();
        Ok(())
    }
}

fn validate(req: &IngestRequest) -> Result<(), IngestError> {
    if req.document.title.trim().is_empty() || req.document.doc_type.trim().is_empty() {
        return Err(IngestError::Validation(
            "Document title and type are required".to_string(),
        ));
    }
    if req.units.is_empty() {
        return Err(IngestError::Validation("At least one unit is required".to_string()));
    }
    Ok(())
}

fn check(cancel: &CancellationToken) -> Result<(), IngestError> {
    if cancel.is_cancelled() {
        Err(IngestError::Cancelled)
    } else {
        Ok(())
    }
}
