//! LexGraph Core - configuration and wiring for the legal knowledge graph.
//!
//! [`Core`] opens the database, builds the embedder and optional model
//! providers from [`LexgraphConfig`], and exposes ingestion, querying and
//! question answering over a single SQLite file.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

pub mod ask;
pub mod config;

pub use ask::{build_context, truncate_chars, AskResponse, AskSource};
pub use config::{LexgraphConfig, CONFIG_FILE_NAME};

pub use lexgraph_graph::{Document, GraphStats, GraphStore, RuleSet, UnitTree};
pub use lexgraph_ingest::{open_pool, IngestError, IngestRequest, IngestResponse, IngestionEngine};
pub use lexgraph_query::{
    AnswerGenerator, CohereReranker, KeyPool, OpenAiChatProvider, QueryEngine, QueryError, QueryResponse,
};
pub use lexgraph_vector::{embedder_or_hash, Embedder, VectorStore};

#[derive(Debug, Clone)]
pub struct LexgraphPaths {
    pub base_dir: PathBuf,
    pub db_path: PathBuf,
    pub config_path: PathBuf,
    pub model_cache_dir: PathBuf,
}

impl LexgraphPaths {
    /// `LEXGRAPH_DATA_DIR`, else the platform data directory, else `./.lexgraph`.
    pub fn from_env() -> Self {
        if let Some(dir) = std::env::var_os("LEXGRAPH_DATA_DIR") {
            return Self::from_base(PathBuf::from(dir));
        }
        if let Some(data) = dirs::data_dir() {
            return Self::from_base(data.join("lexgraph"));
        }
        Self::from_base(PathBuf::from(".lexgraph"))
    }

    pub fn from_base(base_dir: PathBuf) -> Self {
        let db_path = base_dir.join("lexgraph.db");
        let config_path = base_dir.join(CONFIG_FILE_NAME);
        let model_cache_dir = base_dir.join("models");
        Self {
            base_dir,
            db_path,
            config_path,
            model_cache_dir,
        }
    }

    pub fn ensure_dirs(&self) -> Result<()> {
        std::fs::create_dir_all(&self.base_dir)?;
        Ok(())
    }
}

/// A document with its unit hierarchy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentView {
    pub document: Document,
    pub units: Vec<UnitTree>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoreStats {
    #[serde(flatten)]
    pub graph: GraphStats,
    pub embeddings: i64,
}

#[derive(Clone)]
pub struct Core {
    pub paths: LexgraphPaths,
    pub config: LexgraphConfig,
    pub ingest: IngestionEngine,
    pub query: QueryEngine,
    pub graph: GraphStore,
    pub vector: VectorStore,
    pub embedder: Arc<dyn Embedder>,
    answerer: Option<Arc<dyn AnswerGenerator>>,
}

impl Core {
    /// Load configuration from the data directory and open the database.
    pub async fn init(paths: &LexgraphPaths) -> Result<Self> {
        info!("Initializing LexGraph core in {}", paths.base_dir.display());
        paths.ensure_dirs()?;
        let config = LexgraphConfig::load_with_env(&paths.config_path)?;
        Self::with_config(paths.clone(), config).await
    }

    pub async fn with_config(paths: LexgraphPaths, config: LexgraphConfig) -> Result<Self> {
        let db_path = config.db_path(&paths.base_dir, &paths.db_path);
        let pool = open_pool(&db_path).await?;
        let embedder = embedder_or_hash(&config.embedder_settings(Some(paths.model_cache_dir.clone())));
        Self::from_parts(paths, config, pool, embedder).await
    }

    /// Wire every component over an open pool.
    pub async fn from_parts(
        paths: LexgraphPaths,
        config: LexgraphConfig,
        pool: SqlitePool,
        embedder: Arc<dyn Embedder>,
    ) -> Result<Self> {
        let mut ingest = IngestionEngine::from_pool(pool).await?;
        if let Some(rules_path) = &config.rules.path {
            let rules = RuleSet::load(rules_path)
                .with_context(|| format!("Failed to load extraction rules: {}", rules_path.display()))?;
            ingest = ingest.with_rules(rules);
        }
        let ingest = ingest
            .with_embedder(embedder.clone(), config.embedding.model.clone())
            .with_auto_embed_default(config.embedding.auto_embed);

        let graph = ingest.graph_store();
        let vector = ingest.vector_store();
        let mut query = QueryEngine::new(graph.clone());
        let mut answerer: Option<Arc<dyn AnswerGenerator>> = None;

        if config.chat.is_configured() {
            let chat = Arc::new(OpenAiChatProvider::new(
                &config.chat.base_url,
                config.chat.api_key.as_deref().unwrap_or_default(),
                &config.chat.model,
            ));
            if config.chat.rewrite_queries {
                query = query.with_rewriter(chat.clone());
            }
            answerer = Some(chat);
            debug!(model = %config.chat.model, "chat provider enabled");
        }

        if !config.rerank.api_keys.is_empty() {
            let keys = Arc::new(KeyPool::new(config.rerank.api_keys.iter().cloned()));
            let reranker = CohereReranker::new(keys)
                .with_endpoint(config.rerank.endpoint.clone())
                .with_model(config.rerank.model.clone());
            query = query.with_reranker(Arc::new(reranker));
            debug!(model = %config.rerank.model, "reranker enabled");
        }

        Ok(Self {
            paths,
            config,
            ingest,
            query,
            graph,
            vector,
            embedder,
            answerer,
        })
    }

    /// Replace the answer generator used by [`Core::ask`].
    pub fn with_answerer(mut self, answerer: Arc<dyn AnswerGenerator>) -> Self {
        self.answerer = Some(answerer);
        self
    }

    pub async fn ingest(&self, req: &IngestRequest, cancel: &CancellationToken) -> Result<IngestResponse, IngestError> {
        self.ingest.ingest_legal_content(req, cancel).await
    }

    pub async fn query(
        &self,
        text: &str,
        include_debug: bool,
        cancel: &CancellationToken,
    ) -> Result<QueryResponse, QueryError> {
        self.query.process_query(text, include_debug, cancel).await
    }

    pub async fn document(&self, id: i64) -> Result<Option<DocumentView>> {
        let Some(document) = self.graph.get_document(id).await? else {
            return Ok(None);
        };
        let units = self.graph.unit_tree(id).await?;
        Ok(Some(DocumentView { document, units }))
    }

    /// Returns false when the triple does not exist.
    pub async fn blacklist(&self, triple_id: i64, blacklisted: bool) -> Result<bool> {
        let updated = self.graph.set_triple_blacklisted(triple_id, blacklisted).await?;
        if updated {
            info!(triple_id, blacklisted, "triple blacklist updated");
        }
        Ok(updated)
    }

    pub async fn stats(&self) -> Result<CoreStats> {
        Ok(CoreStats {
            graph: self.graph.stats().await?,
            embeddings: self.vector.count().await?,
        })
    }

    /// Answer a question from graph answers (`use_graph`) or semantically similar units.
    #[instrument(skip(self, cancel))]
    pub async fn ask(&self, question: &str, use_graph: bool, cancel: &CancellationToken) -> Result<AskResponse> {
        let question = question.trim();
        if question.is_empty() {
            return Err(QueryError::Validation("question is required".to_string()).into());
        }

        let sources = if use_graph {
            self.graph_sources(question, cancel).await?
        } else {
            self.semantic_sources(question, self.config.retrieval.top_k).await?
        };
        if cancel.is_cancelled() {
            return Err(QueryError::Cancelled.into());
        }

        let answer = self.generate_answer(question, &sources).await;
        Ok(AskResponse {
            question: question.to_string(),
            used_graph: use_graph,
            answer,
            sources,
        })
    }

    /// Units closest to `question` by embedding distance.
    pub async fn semantic_sources(&self, question: &str, top_k: usize) -> Result<Vec<AskSource>> {
        let matches = self
            .vector
            .search_semantic(self.embedder.as_ref(), question, top_k)
            .await?;

        let mut sources = Vec::with_capacity(matches.len());
        for m in matches {
            if let Some(mut source) = self.source_for_unit(m.unit_id).await? {
                source.distance = Some(m.distance);
                sources.push(source);
            }
        }
        Ok(sources)
    }

    async fn graph_sources(&self, question: &str, cancel: &CancellationToken) -> Result<Vec<AskSource>> {
        let response = self.query.process_query(question, false, cancel).await?;
        let mut sources: Vec<AskSource> = Vec::new();
        for answer in &response.answers {
            if sources.iter().any(|s| s.unit_id == answer.unit_id) {
                continue;
            }
            if let Some(mut source) = self.source_for_unit(answer.unit_id).await? {
                source.score = Some(answer.score);
                sources.push(source);
            }
        }
        Ok(sources)
    }

    async fn source_for_unit(&self, unit_id: i64) -> Result<Option<AskSource>> {
        let Some((unit, document)) = self.graph.get_unit_with_document(unit_id).await? else {
            debug!(unit_id, "unit disappeared before answering");
            return Ok(None);
        };
        Ok(Some(AskSource {
            unit_id: unit.id,
            document_id: document.id,
            document_title: document.title,
            code: unit.code,
            level: unit.level,
            snippet: truncate_chars(&unit.text, ask::SOURCE_SNIPPET_CHARS),
            distance: None,
            score: None,
            text: unit.text,
        }))
    }

    async fn generate_answer(&self, question: &str, sources: &[AskSource]) -> Option<String> {
        let answerer = self.answerer.as_ref()?;
        if sources.is_empty() {
            return None;
        }
        let context = build_context(sources);
        match answerer.answer(question, &context).await {
            Ok(text) if !text.trim().is_empty() => Some(text),
            Ok(_) => None,
            Err(err) => {
                warn!(error = %err, "answer generation failed");
                None
            }
        }
    }
}
