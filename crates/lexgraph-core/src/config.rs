//! Configuration schema and loading.
//!
//! Settings live in `lexgraph.toml` under the data directory. Every section is
//! optional; `LEXGRAPH_*` environment variables override file values.
//!
//! ```toml
//! [embedding]
//! backend = "fastembed"
//! model = "intfloat/multilingual-e5-small"
//!
//! [chat]
//! api_key = "sk-..."
//! model = "gpt-4o-mini"
//!
//! [rerank]
//! api_keys = ["key-a", "key-b"]
//! ```

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use url::Url;

use lexgraph_query::{DEFAULT_CHAT_BASE_URL, DEFAULT_CHAT_MODEL, DEFAULT_RERANK_ENDPOINT, DEFAULT_RERANK_MODEL};
use lexgraph_vector::{EmbedderSettings, DEFAULT_TOP_K, MAX_TOP_K};

pub const CONFIG_FILE_NAME: &str = "lexgraph.toml";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct LexgraphConfig {
    pub database: DatabaseConfig,
    pub embedding: EmbeddingConfig,
    pub chat: ChatConfig,
    pub rerank: RerankConfig,
    pub retrieval: RetrievalConfig,
    pub rules: RulesConfig,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Relative paths resolve against the data directory.
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    /// "fastembed", "openai" or "hash".
    pub backend: String,
    pub model: Option<String>,
    pub api_base: Option<String>,
    pub api_key: Option<String>,
    /// Embed unit text during ingestion unless a request says otherwise.
    pub auto_embed: bool,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            backend: "fastembed".to_string(),
            model: None,
            api_base: None,
            api_key: None,
            auto_embed: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ChatConfig {
    pub base_url: String,
    pub api_key: Option<String>,
    pub model: String,
    /// Use the chat model to rewrite queries before term extraction.
    pub rewrite_queries: bool,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_CHAT_BASE_URL.to_string(),
            api_key: None,
            model: DEFAULT_CHAT_MODEL.to_string(),
            rewrite_queries: true,
        }
    }
}

impl ChatConfig {
    pub fn is_configured(&self) -> bool {
        self.api_key.as_deref().is_some_and(|k| !k.trim().is_empty())
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RerankConfig {
    pub endpoint: String,
    pub model: String,
    pub api_keys: Vec<String>,
}

impl Default for RerankConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_RERANK_ENDPOINT.to_string(),
            model: DEFAULT_RERANK_MODEL.to_string(),
            api_keys: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    /// Units used as context for semantic answers.
    pub top_k: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self { top_k: DEFAULT_TOP_K }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RulesConfig {
    /// Extraction rule table replacing the built-in legal rules.
    pub path: Option<PathBuf>,
}

fn non_empty(value: String) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

impl LexgraphConfig {
    /// Load from a TOML file. A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        toml::from_str(&contents).with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    /// Load, apply process environment overrides and validate.
    pub fn load_with_env(path: &Path) -> Result<Self> {
        let mut config = Self::load(path)?;
        config.apply_env(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Apply `LEXGRAPH_*` overrides read through `lookup`.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).and_then(non_empty);

        if let Some(v) = get("LEXGRAPH_DB_PATH") {
            self.database.path = Some(PathBuf::from(v));
        }
        if let Some(v) = get("LEXGRAPH_EMBEDDING_BACKEND") {
            self.embedding.backend = v;
        }
        if let Some(v) = get("LEXGRAPH_EMBEDDING_MODEL") {
            self.embedding.model = Some(v);
        }
        if let Some(v) = get("LEXGRAPH_AUTO_EMBED") {
            self.embedding.auto_embed = matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on");
        }
        if let Some(v) = get("LEXGRAPH_OPENAI_API_KEY") {
            self.chat.api_key = Some(v.clone());
            if self.embedding.api_key.is_none() {
                self.embedding.api_key = Some(v);
            }
        }
        if let Some(v) = get("LEXGRAPH_CHAT_BASE_URL") {
            self.chat.base_url = v;
        }
        if let Some(v) = get("LEXGRAPH_CHAT_MODEL") {
            self.chat.model = v;
        }
        if let Some(v) = get("LEXGRAPH_RERANK_API_KEYS") {
            self.rerank.api_keys = v
                .split(',')
                .map(|k| k.trim().to_string())
                .filter(|k| !k.is_empty())
                .collect();
        }
        if let Some(v) = get("LEXGRAPH_RERANK_MODEL") {
            self.rerank.model = v;
        }
        if let Some(v) = get("LEXGRAPH_RERANK_ENDPOINT") {
            self.rerank.endpoint = v;
        }
        if let Some(v) = get("LEXGRAPH_TOP_K").and_then(|v| v.parse().ok()) {
            self.retrieval.top_k = v;
        }
    }

    /// Check endpoints and limits.
    pub fn validate(&self) -> Result<()> {
        validate_endpoint("chat.base_url", &self.chat.base_url)?;
        validate_endpoint("rerank.endpoint", &self.rerank.endpoint)?;
        if let Some(base) = &self.embedding.api_base {
            validate_endpoint("embedding.api_base", base)?;
        }
        if !matches!(self.embedding.backend.to_ascii_lowercase().as_str(), "fastembed" | "openai" | "hash") {
            bail!("embedding.backend must be one of fastembed, openai, hash (got {})", self.embedding.backend);
        }
        if self.retrieval.top_k > MAX_TOP_K {
            bail!("retrieval.top_k must be at most {MAX_TOP_K}");
        }
        Ok(())
    }

    /// Database file, resolved against `base_dir` when relative.
    pub fn db_path(&self, base_dir: &Path, default: &Path) -> PathBuf {
        match &self.database.path {
            Some(path) if path.is_absolute() => path.clone(),
            Some(path) => base_dir.join(path),
            None => default.to_path_buf(),
        }
    }

    pub fn embedder_settings(&self, cache_dir: Option<PathBuf>) -> EmbedderSettings {
        EmbedderSettings {
            backend: self.embedding.backend.clone(),
            model: self.embedding.model.clone(),
            cache_dir,
            api_base: self.embedding.api_base.clone(),
            api_key: self.embedding.api_key.clone(),
        }
    }
}

fn validate_endpoint(name: &str, value: &str) -> Result<()> {
    let url = Url::parse(value).with_context(|| format!("{name} is not a valid URL: {value}"))?;
    if !matches!(url.scheme(), "http" | "https") {
        bail!("{name} must use http or https: {value}");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_missing_file_is_default() {
        let dir = tempfile::tempdir().unwrap();
        let config = LexgraphConfig::load(&dir.path().join(CONFIG_FILE_NAME)).unwrap();
        assert_eq!(config.embedding.backend, "fastembed");
        assert!(config.embedding.auto_embed);
        assert_eq!(config.chat.model, "gpt-4o-mini");
        assert_eq!(config.rerank.model, "rerank-v3.5");
        assert_eq!(config.retrieval.top_k, 10);
        assert!(!config.chat.is_configured());
        config.validate().unwrap();
    }

    #[test]
    fn test_parse_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);
        std::fs::write(
            &path,
            r#"
[database]
path = "graph.db"

[embedding]
backend = "hash"
auto_embed = false

[rerank]
api_keys = ["a", "b"]

[retrieval]
top_k = 25
"#,
        )
        .unwrap();

        let config = LexgraphConfig::load(&path).unwrap();
        assert_eq!(config.embedding.backend, "hash");
        assert!(!config.embedding.auto_embed);
        assert_eq!(config.rerank.api_keys, vec!["a", "b"]);
        assert_eq!(config.rerank.endpoint, "https://api.cohere.com/v1/rerank");
        assert_eq!(config.retrieval.top_k, 25);
        assert_eq!(
            config.db_path(dir.path(), &dir.path().join("lexgraph.db")),
            dir.path().join("graph.db")
        );
    }

    #[test]
    fn test_invalid_toml_reports_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);
        std::fs::write(&path, "[embedding\nbackend = ").unwrap();
        let err = LexgraphConfig::load(&path).unwrap_err();
        assert!(err.to_string().contains("Failed to parse config file"));
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = HashMap::from([
            ("LEXGRAPH_OPENAI_API_KEY", "sk-test"),
            ("LEXGRAPH_RERANK_API_KEYS", "k1, k2,"),
            ("LEXGRAPH_EMBEDDING_BACKEND", "openai"),
            ("LEXGRAPH_AUTO_EMBED", "off"),
            ("LEXGRAPH_TOP_K", "5"),
            ("LEXGRAPH_CHAT_MODEL", " "),
        ]);
        let mut config = LexgraphConfig::default();
        config.apply_env(|key| env.get(key).map(|v| v.to_string()));

        assert!(config.chat.is_configured());
        assert_eq!(config.embedding.api_key.as_deref(), Some("sk-test"));
        assert_eq!(config.rerank.api_keys, vec!["k1", "k2"]);
        assert_eq!(config.embedding.backend, "openai");
        assert!(!config.embedding.auto_embed);
        assert_eq!(config.retrieval.top_k, 5);
        assert_eq!(config.chat.model, "gpt-4o-mini");
    }

    #[test]
    fn test_validation() {
        let mut config = LexgraphConfig::default();
        config.chat.base_url = "not a url".to_string();
        assert!(config.validate().is_err());

        let mut config = LexgraphConfig::default();
        config.rerank.endpoint = "ftp://example.com/rerank".to_string();
        assert!(config.validate().is_err());

        let mut config = LexgraphConfig::default();
        config.embedding.backend = "word2vec".to_string();
        assert!(config.validate().is_err());

        let mut config = LexgraphConfig::default();
        config.retrieval.top_k = 500;
        assert!(config.validate().is_err());
    }
}
