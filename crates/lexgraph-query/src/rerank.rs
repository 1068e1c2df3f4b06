//! Cohere-compatible rerank client with a rotating API key pool.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, instrument};

use crate::capabilities::{RerankResult, Reranker};

pub const DEFAULT_RERANK_ENDPOINT: &str = "https://api.cohere.com/v1/rerank";
pub const DEFAULT_RERANK_MODEL: &str = "rerank-v3.5";
const CLIENT_NAME: &str = "lexgraph";

#[derive(Debug, Error)]
pub enum RerankError {
    #[error("reranker not configured: no API keys")]
    NotConfigured,
    #[error("rerank request returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("rerank request failed: {0}")]
    Transport(#[from] reqwest::Error),
}

/// API keys handed out round-robin.
///
/// The cursor is the only shared mutable state; a key is taken before the
/// request and nothing is held across it.
#[derive(Debug, Default)]
pub struct KeyPool {
    keys: Vec<String>,
    cursor: AtomicUsize,
}

impl KeyPool {
    pub fn new<I, S>(keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            keys: keys
                .into_iter()
                .map(|k| {
                    let k: String = k.into();
                    k.trim().to_string()
                })
                .filter(|k| !k.is_empty())
                .collect(),
            cursor: AtomicUsize::new(0),
        }
    }

    /// Comma-separated keys, as stored in configuration.
    pub fn from_csv(keys: &str) -> Self {
        Self::new(keys.split(','))
    }

    pub fn next_key(&self) -> Option<&str> {
        if self.keys.is_empty() {
            return None;
        }
        let i = self.cursor.fetch_add(1, Ordering::Relaxed) % self.keys.len();
        Some(self.keys[i].as_str())
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

#[derive(Serialize)]
struct RerankRequest<'a> {
    model: &'a str,
    query: &'a str,
    documents: &'a [String],
    top_n: usize,
    return_documents: bool,
}

#[derive(Deserialize)]
struct RerankResponse {
    #[serde(default)]
    results: Vec<RerankResult>,
}

pub struct CohereReranker {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    keys: Arc<KeyPool>,
}

impl CohereReranker {
    pub fn new(keys: Arc<KeyPool>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_default();
        Self {
            client,
            endpoint: DEFAULT_RERANK_ENDPOINT.to_string(),
            model: DEFAULT_RERANK_MODEL.to_string(),
            keys,
        }
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        let model = model.into();
        if !model.is_empty() {
            self.model = model;
        }
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    async fn send(&self, query: &str, documents: &[String]) -> Result<Vec<RerankResult>, RerankError> {
        let key = self.keys.next_key().ok_or(RerankError::NotConfigured)?;
        let body = RerankRequest {
            model: &self.model,
            query,
            documents,
            top_n: documents.len(),
            return_documents: false,
        };

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(key)
            .header("X-Client-Name", CLIENT_NAME)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(RerankError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: RerankResponse = response.json().await?;
        Ok(parsed.results)
    }
}

#[async_trait]
impl Reranker for CohereReranker {
    #[instrument(skip(self, query, documents), fields(documents = documents.len()))]
    async fn rerank(&self, query: &str, documents: &[String]) -> Result<Vec<RerankResult>> {
        if documents.is_empty() {
            return Ok(Vec::new());
        }
        let results = self.send(query, documents).await?;
        debug!(results = results.len(), "rerank complete");
        Ok(results)
    }
}
