//! Unit embeddings and semantic search.
//!
//! Embeddings are stored as JSON arrays in `unit_embeddings`. Distance is
//! cosine distance (`1 - cosine similarity`), computed by sqlite-vec when the
//! extension is loaded and in Rust otherwise.

use std::path::PathBuf;
use std::str::FromStr;
use std::sync::{Arc, Mutex, Once};

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use fastembed::{EmbeddingModel, TextEmbedding, TextInitOptions};
use libsqlite3_sys::sqlite3_auto_extension;
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use tokio::task;
use tracing::{debug, instrument, warn};

use sqlite_vec::sqlite3_vec_init;

/// Units farther than this from the query are not returned.
pub const MAX_DISTANCE: f32 = 0.6;
pub const DEFAULT_TOP_K: usize = 10;
pub const MAX_TOP_K: usize = 50;

pub const DEFAULT_FASTEMBED_MODEL: &str = "intfloat/multilingual-e5-small";
pub const DEFAULT_OPENAI_EMBED_MODEL: &str = "text-embedding-3-small";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredEmbedding {
    pub unit_id: i64,
    pub model: String,
    pub embedding: Vec<f32>,
    pub updated_at: DateTime<Utc>,
}

/// A unit returned by semantic search.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnitMatch {
    pub unit_id: i64,
    pub distance: f32,
}

#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Name recorded next to stored vectors.
    fn model_name(&self) -> String;
}

#[derive(Clone)]
pub struct FastEmbedder {
    model: Arc<Mutex<TextEmbedding>>,
    name: String,
}

impl FastEmbedder {
    pub fn new(model_name: &str, cache_dir: Option<PathBuf>) -> Result<Self> {
        let model = EmbeddingModel::from_str(model_name).unwrap_or(EmbeddingModel::MultilingualE5Small);
        let mut options = TextInitOptions::new(model);
        if let Some(dir) = cache_dir {
            options = options.with_cache_dir(dir);
        }
        let model = TextEmbedding::try_new(options)?;
        Ok(Self {
            model: Arc::new(Mutex::new(model)),
            name: model_name.to_string(),
        })
    }
}

#[async_trait]
impl Embedder for FastEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let text = text.to_string();
        let model = self.model.clone();
        let embedding = task::spawn_blocking(move || {
            let mut guard = model
                .lock()
                .map_err(|_| anyhow!("embedding model lock poisoned"))?;
            let mut embeddings = guard.embed(vec![text], None)?;
            if embeddings.is_empty() {
                return Err(anyhow!("embedding model returned empty result"));
            }
            Ok::<Vec<f32>, anyhow::Error>(embeddings.remove(0))
        })
        .await??;
        Ok(embedding)
    }

    fn model_name(&self) -> String {
        self.name.clone()
    }
}

/// OpenAI-compatible `/embeddings` endpoint.
#[derive(Clone)]
pub struct OpenAiEmbedder {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingDatum>,
}

#[derive(Deserialize)]
struct EmbeddingDatum {
    embedding: Vec<f32>,
}

impl OpenAiEmbedder {
    pub fn new(base_url: &str, api_key: &str, model: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            model: if model.is_empty() { DEFAULT_OPENAI_EMBED_MODEL.to_string() } else { model.to_string() },
        }
    }
}

#[async_trait]
impl Embedder for OpenAiEmbedder {
    #[instrument(skip(self, text))]
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        if self.api_key.is_empty() {
            return Err(anyhow!("embedding provider not configured"));
        }
        let body = serde_json::json!({ "model": self.model, "input": text });
        let response = self
            .client
            .post(format!("{}/embeddings", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&body)
            .send()
            .await
            .context("embedding request failed")?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(anyhow!("embedding request returned {}: {}", status, text));
        }

        let parsed: EmbeddingResponse = response.json().await.context("invalid embedding response")?;
        parsed
            .data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .filter(|e| !e.is_empty())
            .ok_or_else(|| anyhow!("embedding response empty"))
    }

    fn model_name(&self) -> String {
        self.model.clone()
    }
}

#[derive(Debug, Clone)]
pub struct HashEmbedder {
    pub dims: usize,
}

impl Default for HashEmbedder {
    fn default() -> Self {
        Self { dims: 256 }
    }
}

#[async_trait]
impl Embedder for HashEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut vec = vec![0.0f32; self.dims];
        for token in text.to_lowercase().split_whitespace() {
            let mut hash = 5381u64;
            for b in token.as_bytes() {
                hash = ((hash << 5).wrapping_add(hash)) ^ u64::from(*b);
            }
            let idx = (hash as usize) % self.dims;
            vec[idx] += 1.0;
        }
        normalize(&mut vec);
        Ok(vec)
    }

    fn model_name(&self) -> String {
        format!("hash-{}", self.dims)
    }
}

/// Which embedder to build.
#[derive(Debug, Clone, Default)]
pub struct EmbedderSettings {
    /// "fastembed", "openai" or "hash".
    pub backend: String,
    pub model: Option<String>,
    pub cache_dir: Option<PathBuf>,
    pub api_base: Option<String>,
    pub api_key: Option<String>,
}

pub fn embedder_from_settings(settings: &EmbedderSettings) -> Result<Arc<dyn Embedder>> {
    match settings.backend.to_ascii_lowercase().as_str() {
        "hash" => Ok(Arc::new(HashEmbedder::default())),
        "openai" => {
            let key = settings
                .api_key
                .as_deref()
                .filter(|k| !k.is_empty())
                .ok_or_else(|| anyhow!("openai embeddings need an API key"))?;
            let base = settings.api_base.as_deref().unwrap_or("https://api.openai.com/v1");
            Ok(Arc::new(OpenAiEmbedder::new(
                base,
                key,
                settings.model.as_deref().unwrap_or(DEFAULT_OPENAI_EMBED_MODEL),
            )))
        }
        _ => {
            let model = settings.model.as_deref().unwrap_or(DEFAULT_FASTEMBED_MODEL);
            Ok(Arc::new(FastEmbedder::new(model, settings.cache_dir.clone())?))
        }
    }
}

/// Like [`embedder_from_settings`], falling back to [`HashEmbedder`] on error.
pub fn embedder_or_hash(settings: &EmbedderSettings) -> Arc<dyn Embedder> {
    match embedder_from_settings(settings) {
        Ok(embedder) => embedder,
        Err(err) => {
            warn!("embedding backend unavailable, using hash embeddings: {}", err);
            Arc::new(HashEmbedder::default())
        }
    }
}

/// Clamp a requested result count; zero means the default.
pub fn clamp_top_k(top_k: usize) -> usize {
    if top_k == 0 {
        DEFAULT_TOP_K
    } else {
        top_k.min(MAX_TOP_K)
    }
}

/// Vector storage for unit embeddings.
#[derive(Clone)]
pub struct VectorStore {
    pool: SqlitePool,
    sqlite_vec_available: bool,
}

impl VectorStore {
    /// Wrap an existing pool, creating the table if needed.
    pub async fn from_pool(pool: SqlitePool) -> Result<Self> {
        Self::init_schema(&pool).await?;
        let mut store = Self {
            pool,
            sqlite_vec_available: false,
        };
        store.sqlite_vec_available = store.detect_sqlite_vec().await;
        debug!(sqlite_vec = store.sqlite_vec_available, "vector store ready");
        Ok(store)
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    #[instrument(skip_all)]
    pub async fn init_schema(pool: &SqlitePool) -> Result<()> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS unit_embeddings (
                unit_id INTEGER PRIMARY KEY,
                model TEXT NOT NULL,
                embedding TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )",
        )
        .execute(pool)
        .await?;
        Ok(())
    }

    #[instrument(skip(self, embedding))]
    pub async fn upsert_unit_embedding(&self, unit_id: i64, model: &str, embedding: &[f32]) -> Result<()> {
        let payload = serde_json::to_string(embedding)?;
        sqlx::query(
            "INSERT INTO unit_embeddings (unit_id, model, embedding, updated_at) VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(unit_id) DO UPDATE SET model = excluded.model, embedding = excluded.embedding,
                updated_at = excluded.updated_at",
        )
        .bind(unit_id)
        .bind(model)
        .bind(payload)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_unit_embedding(&self, unit_id: i64) -> Result<Option<StoredEmbedding>> {
        let row = sqlx::query_as::<_, (i64, String, String, String)>(
            "SELECT unit_id, model, embedding, updated_at FROM unit_embeddings WHERE unit_id = ?1",
        )
        .bind(unit_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.and_then(stored_from_row))
    }

    /// Get total vector count
    pub async fn count(&self) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM unit_embeddings")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    async fn list_embeddings(&self) -> Result<Vec<StoredEmbedding>> {
        let rows = sqlx::query_as::<_, (i64, String, String, String)>(
            "SELECT unit_id, model, embedding, updated_at FROM unit_embeddings",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().filter_map(stored_from_row).collect())
    }

    /// Embed `query` and return the closest units within [`MAX_DISTANCE`].
    pub async fn search_semantic<E: Embedder + ?Sized>(
        &self,
        embedder: &E,
        query: &str,
        top_k: usize,
    ) -> Result<Vec<UnitMatch>> {
        let query_embedding = embedder.embed(query).await?;
        self.search_with_embedding(&query_embedding, top_k).await
    }

    /// Closest units by cosine distance, nearest first, at most `clamp_top_k(top_k)`.
    pub async fn search_with_embedding(&self, query_embedding: &[f32], top_k: usize) -> Result<Vec<UnitMatch>> {
        let limit = clamp_top_k(top_k);
        if self.sqlite_vec_available {
            match self.search_sqlite_vec(query_embedding, limit).await {
                Ok(results) => return Ok(results),
                Err(err) => debug!("sqlite-vec search failed, using fallback: {}", err),
            }
        }

        let mut scored: Vec<UnitMatch> = self
            .list_embeddings()
            .await?
            .into_iter()
            .map(|row| UnitMatch {
                unit_id: row.unit_id,
                distance: 1.0 - cosine_similarity(query_embedding, &row.embedding),
            })
            .filter(|m| m.distance < MAX_DISTANCE)
            .collect();
        scored.sort_by(|a, b| {
            a.distance
                .partial_cmp(&b.distance)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.unit_id.cmp(&b.unit_id))
        });
        scored.truncate(limit);
        Ok(scored)
    }

    async fn detect_sqlite_vec(&self) -> bool {
        sqlx::query_scalar::<_, String>("SELECT vec_version()")
            .fetch_one(&self.pool)
            .await
            .is_ok()
    }

    async fn search_sqlite_vec(&self, query_embedding: &[f32], limit: usize) -> Result<Vec<UnitMatch>> {
        let payload = serde_json::to_string(query_embedding)?;
        let rows = sqlx::query_as::<_, (i64, f64)>(
            "SELECT unit_id, vec_distance_cosine(vec_f32(?1), vec_f32(embedding)) AS distance
             FROM unit_embeddings WHERE distance < ?2 ORDER BY distance, unit_id LIMIT ?3",
        )
        .bind(payload)
        .bind(MAX_DISTANCE as f64)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(|(unit_id, distance)| UnitMatch {
                unit_id,
                distance: distance as f32,
            })
            .collect())
    }
}

fn stored_from_row((unit_id, model, embedding, updated_at): (i64, String, String, String)) -> Option<StoredEmbedding> {
    let embedding: Vec<f32> = serde_json::from_str(&embedding).ok()?;
    let updated_at = DateTime::parse_from_rfc3339(&updated_at)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now());
    Some(StoredEmbedding {
        unit_id,
        model,
        embedding,
        updated_at,
    })
}

fn normalize(vec: &mut [f32]) {
    let norm = vec.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > 0.0 {
        for v in vec.iter_mut() {
            *v /= norm;
        }
    }
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let len = a.len().min(b.len());
    let mut dot = 0.0;
    let mut norm_a = 0.0;
    let mut norm_b = 0.0;
    for i in 0..len {
        dot += a[i] * b[i];
        norm_a += a[i] * a[i];
        norm_b += b[i] * b[i];
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}

/// Register sqlite-vec for every connection opened afterwards.
pub fn register_sqlite_vec() {
    static INIT: Once = Once::new();
    INIT.call_once(|| unsafe {
        let _ = sqlite3_auto_extension(Some(std::mem::transmute(
            sqlite3_vec_init as *const (),
        )));
    });
}
