//! The query pipeline.
//!
//! ```text
//! rewrite -> terms -> candidates -> stars -> retrieval -> combine -> rerank
//! ```
//!
//! Rewrite and rerank are optional and degrade silently (logged at warn).
//! Candidate search and star retrieval errors abort the query.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use lexgraph_graph::{GraphStore, QueryCandidate, TripleView};

use crate::capabilities::{QueryRewriter, RerankResult, Reranker};
use crate::error::QueryError;
use crate::scoring::{combined_score, relevance, snippet, ScoreBoard};
use crate::stars::{build_stars, CandidateSet, WeightedStar};
use crate::terms::extract_terms_all;

/// Answers kept after initial ranking.
pub const MAX_ANSWERS: usize = 10;
/// Answers sent to the reranker.
pub const RERANK_WINDOW: usize = 30;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Answer {
    pub triple_id: i64,
    pub doc_ref: String,
    pub unit_id: i64,
    pub snippet: String,
    pub score: f32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
    pub title: String,
    pub source_url: String,
}

impl Answer {
    fn from_triple(score: f32, t: &TripleView) -> Self {
        Self {
            triple_id: t.triple.id,
            doc_ref: t.triple.doc_ref.clone(),
            unit_id: t.triple.unit_id,
            snippet: snippet(&t.unit_text, &t.subject_name, &t.object_name),
            score,
            context: t.triple.context.clone(),
            title: t.document_title.clone(),
            source_url: format!("/documents/{}", t.document_id),
        }
    }

    /// Text handed to the reranker for this answer.
    pub fn rerank_document(&self) -> String {
        format!("Title: {}\nContent: {}", self.title, self.context.as_deref().unwrap_or(""))
    }
}

/// Stage durations in milliseconds.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryTimings {
    pub rewrite: u64,
    pub term_extraction: u64,
    pub candidate_search: u64,
    pub star_building: u64,
    pub triple_matching: u64,
    pub initial_ranking: u64,
    /// Present only when a reranker ran.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reranking: Option<u64>,
    pub total: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryDebug {
    pub query: String,
    pub rewritten_queries: Vec<String>,
    pub terms: Vec<String>,
    pub candidates: Vec<QueryCandidate>,
    pub stars: Vec<WeightedStar>,
    pub timings: QueryTimings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryResponse {
    pub answers: Vec<Answer>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub debug: Option<QueryDebug>,
}

fn elapsed_ms(since: Instant) -> u64 {
    since.elapsed().as_millis() as u64
}

fn check(cancel: &CancellationToken) -> Result<(), QueryError> {
    if cancel.is_cancelled() {
        Err(QueryError::Cancelled)
    } else {
        Ok(())
    }
}

/// The original query first, then distinct non-empty variants.
fn with_original_first(query: &str, variants: Vec<String>) -> Vec<String> {
    let mut queries = vec![query.to_string()];
    for variant in variants {
        let variant = variant.trim();
        if !variant.is_empty() && !queries.iter().any(|q| q == variant) {
            queries.push(variant.to_string());
        }
    }
    queries
}

/// Replace scores with reranker scores, dropping answers it did not score.
fn apply_rerank(window: Vec<Answer>, results: &[RerankResult]) -> Vec<Answer> {
    let scores: HashMap<usize, f64> = results.iter().map(|r| (r.index, r.relevance_score)).collect();
    let mut reranked: Vec<Answer> = window
        .into_iter()
        .enumerate()
        .filter_map(|(i, mut answer)| {
            scores.get(&i).map(|score| {
                answer.score = *score as f32;
                answer
            })
        })
        .collect();
    reranked.sort_by(|a, b| b.score.total_cmp(&a.score));
    reranked
}

#[derive(Clone)]
pub struct QueryEngine {
    store: GraphStore,
    rewriter: Option<Arc<dyn QueryRewriter>>,
    reranker: Option<Arc<dyn Reranker>>,
}

impl QueryEngine {
    pub fn new(store: GraphStore) -> Self {
        Self {
            store,
            rewriter: None,
            reranker: None,
        }
    }

    pub fn with_rewriter(mut self, rewriter: Arc<dyn QueryRewriter>) -> Self {
        self.rewriter = Some(rewriter);
        self
    }

    pub fn with_reranker(mut self, reranker: Arc<dyn Reranker>) -> Self {
        self.reranker = Some(reranker);
        self
    }

    pub fn graph_store(&self) -> &GraphStore {
        &self.store
    }

    /// Answer a natural-language query from the triple store.
    #[instrument(skip(self, cancel))]
    pub async fn process_query(
        &self,
        text: &str,
        include_debug: bool,
        cancel: &CancellationToken,
    ) -> Result<QueryResponse, QueryError> {
        let started = Instant::now();
        let query = text.trim();
        if query.is_empty() {
            return Err(QueryError::Validation("Query text is required".to_string()));
        }
        check(cancel)?;
        let mut timings = QueryTimings::default();

        let stage = Instant::now();
        let queries = self.rewrite(query, cancel).await?;
        timings.rewrite = elapsed_ms(stage);

        check(cancel)?;
        let stage = Instant::now();
        let terms = extract_terms_all(&queries);
        timings.term_extraction = elapsed_ms(stage);
        debug!(terms = terms.len(), variants = queries.len(), "extracted terms");

        let stage = Instant::now();
        let mut set = CandidateSet::new();
        for term in &terms {
            check(cancel)?;
            let concepts = self
                .store
                .find_concept_candidates(term)
                .await
                .map_err(|e| QueryError::dependency(format!("searching concepts for '{term}'"), e))?;
            for candidate in &concepts {
                set.add_concept(candidate);
            }

            let relations = self
                .store
                .find_relation_candidates(term)
                .await
                .map_err(|e| QueryError::dependency(format!("searching relations for '{term}'"), e))?;
            for candidate in &relations {
                set.add_relation(candidate);
            }
        }
        let candidates = set.into_sorted();
        timings.candidate_search = elapsed_ms(stage);

        check(cancel)?;
        let stage = Instant::now();
        let mut stars = build_stars(&candidates);
        timings.star_building = elapsed_ms(stage);

        let stage = Instant::now();
        for (index, star) in stars.iter_mut().enumerate() {
            check(cancel)?;
            star.star.matching_triples = self
                .store
                .find_triples_by_star(&star.star)
                .await
                .map_err(|e| QueryError::dependency(format!("retrieving triples for star {index}"), e))?;
        }
        timings.triple_matching = elapsed_ms(stage);

        check(cancel)?;
        let stage = Instant::now();
        let mut board = ScoreBoard::new();
        for star in &stars {
            for triple in &star.star.matching_triples {
                let score = combined_score(relevance(query, triple), triple.triple.tfidf, star.weight);
                board.offer(triple, score);
            }
        }
        let mut answers: Vec<Answer> = board
            .into_ranked()
            .iter()
            .take(MAX_ANSWERS)
            .map(|(score, triple)| Answer::from_triple(*score, triple))
            .collect();
        timings.initial_ranking = elapsed_ms(stage);

        if let Some(reranker) = &self.reranker {
            if !answers.is_empty() {
                let stage = Instant::now();
                answers = self.rerank(reranker.as_ref(), query, answers, cancel).await?;
                timings.reranking = Some(elapsed_ms(stage));
            }
        }

        timings.total = elapsed_ms(started);
        info!(
            answers = answers.len(),
            candidates = candidates.len(),
            stars = stars.len(),
            total_ms = timings.total,
            "query processed"
        );

        let debug = include_debug.then(|| QueryDebug {
            query: query.to_string(),
            rewritten_queries: queries,
            terms: terms.into_iter().collect(),
            candidates,
            stars,
            timings,
        });
        Ok(QueryResponse { answers, debug })
    }

    async fn rewrite(&self, query: &str, cancel: &CancellationToken) -> Result<Vec<String>, QueryError> {
        let Some(rewriter) = &self.rewriter else {
            return Ok(vec![query.to_string()]);
        };

        let result = tokio::select! {
            _ = cancel.cancelled() => return Err(QueryError::Cancelled),
            result = rewriter.rewrite(query) => result,
        };
        let variants = match result {
            Ok(variants) => variants,
            Err(err) => {
                warn!(error = %err, "query rewrite failed; using the original query");
                Vec::new()
            }
        };
        Ok(with_original_first(query, variants))
    }

    async fn rerank(
        &self,
        reranker: &dyn Reranker,
        query: &str,
        answers: Vec<Answer>,
        cancel: &CancellationToken,
    ) -> Result<Vec<Answer>, QueryError> {
        let window: Vec<Answer> = answers.iter().take(RERANK_WINDOW).cloned().collect();
        let documents: Vec<String> = window.iter().map(Answer::rerank_document).collect();

        let result = tokio::select! {
            _ = cancel.cancelled() => return Err(QueryError::Cancelled),
            result = reranker.rerank(query, &documents) => result,
        };
        match result {
            Ok(results) => {
                debug!(scored = results.len(), sent = documents.len(), "reranked answers");
                Ok(apply_rerank(window, &results))
            }
            Err(err) => {
                warn!(error = %err, "rerank failed; keeping initial ranking");
                Ok(answers)
            }
        }
    }
}
