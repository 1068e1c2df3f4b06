//! Pluggable model-backed capabilities used by the query pipeline.
//!
//! Every capability is optional. The engine degrades when one is missing or
//! fails: no rewrite means the original query only, no reranker means the
//! initial ranking stands.

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Produces search variations of a query.
#[async_trait]
pub trait QueryRewriter: Send + Sync {
    async fn rewrite(&self, query: &str) -> Result<Vec<String>>;
}

/// Answers a question from retrieved context.
#[async_trait]
pub trait AnswerGenerator: Send + Sync {
    async fn answer(&self, question: &str, context: &str) -> Result<String>;
}

/// Scores documents against a query.
///
/// The result may cover only some of the documents; `index` points into the
/// input slice.
#[async_trait]
pub trait Reranker: Send + Sync {
    async fn rerank(&self, query: &str, documents: &[String]) -> Result<Vec<RerankResult>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RerankResult {
    pub index: usize,
    pub relevance_score: f64,
}
