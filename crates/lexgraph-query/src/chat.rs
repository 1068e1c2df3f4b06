//! OpenAI-compatible chat completions provider for rewrite and answering.

use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use tracing::instrument;

use crate::capabilities::{AnswerGenerator, QueryRewriter};

pub const DEFAULT_CHAT_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_CHAT_MODEL: &str = "gpt-4o-mini";

const REWRITE_SYSTEM_PROMPT: &str = "You generate search queries for a legal knowledge base. \
Write 3 variations of the user's query that improve recall using synonyms, related legal terms \
and key entities. Return only the queries, one per line, without numbering.";

const ANSWER_SYSTEM_PROMPT: &str = "You are a Vietnamese legal assistant. Answer concisely using \
only the provided context. If the context is insufficient, say that you cannot answer from the context.";

const REWRITE_TEMPERATURE: f32 = 0.7;
const ANSWER_TEMPERATURE: f32 = 0.2;

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: Option<String>,
}

pub struct OpenAiChatProvider {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl OpenAiChatProvider {
    pub fn new(base_url: &str, api_key: &str, model: &str) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .unwrap_or_default();
        let base_url = if base_url.is_empty() { DEFAULT_CHAT_BASE_URL } else { base_url };
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            model: if model.is_empty() { DEFAULT_CHAT_MODEL.to_string() } else { model.to_string() },
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    async fn complete(&self, system: &str, user: &str, temperature: f32) -> Result<String> {
        if self.api_key.is_empty() {
            return Err(anyhow!("chat provider not configured"));
        }
        let body = serde_json::json!({
            "model": self.model,
            "temperature": temperature,
            "messages": [
                { "role": "system", "content": system },
                { "role": "user", "content": user },
            ],
        });

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .context("chat completion request failed")?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(anyhow!("chat completion returned {}: {}", status, text));
        }

        let parsed: ChatResponse = response.json().await.context("invalid chat completion response")?;
        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| anyhow!("empty completion"))
    }
}

/// Non-empty lines of a rewrite completion, with stray list markers removed.
pub fn parse_variations(content: &str) -> Vec<String> {
    content
        .lines()
        .map(|line| strip_list_marker(line.trim()).to_string())
        .filter(|line| !line.is_empty())
        .collect()
}

fn strip_list_marker(line: &str) -> &str {
    if let Some(rest) = line.strip_prefix(['-', '*']) {
        return rest.trim_start();
    }
    let digits = line.len() - line.trim_start_matches(|c: char| c.is_ascii_digit()).len();
    if digits > 0 {
        if let Some(rest) = line[digits..].strip_prefix(['.', ')']) {
            return rest.trim_start();
        }
    }
    line
}

#[async_trait]
impl QueryRewriter for OpenAiChatProvider {
    #[instrument(skip(self))]
    async fn rewrite(&self, query: &str) -> Result<Vec<String>> {
        let content = self
            .complete(REWRITE_SYSTEM_PROMPT, &format!("Query: {query}"), REWRITE_TEMPERATURE)
            .await?;
        let mut variations = vec![query.to_string()];
        variations.extend(parse_variations(&content).into_iter().filter(|v| v != query));
        Ok(variations)
    }
}

#[async_trait]
impl AnswerGenerator for OpenAiChatProvider {
    #[instrument(skip(self, context), fields(context_len = context.len()))]
    async fn answer(&self, question: &str, context: &str) -> Result<String> {
        if question.trim().is_empty() {
            return Err(anyhow!("question required"));
        }
        self.complete(
            ANSWER_SYSTEM_PROMPT,
            &format!("Question: {question}\nContext:\n{context}"),
            ANSWER_TEMPERATURE,
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_variations() {
        let parsed = parse_variations("1. helmet fine\n\n- mức phạt mũ bảo hiểm \n* penalty for no helmet\n");
        assert_eq!(parsed, vec!["helmet fine", "mức phạt mũ bảo hiểm", "penalty for no helmet"]);
        assert_eq!(parse_variations("2008 traffic law"), vec!["2008 traffic law"]);
    }

    #[test]
    fn test_defaults() {
        let provider = OpenAiChatProvider::new("", "", "");
        assert_eq!(provider.model(), "gpt-4o-mini");
        assert_eq!(provider.base_url, "https://api.openai.com/v1");
    }

    #[tokio::test]
    async fn test_unconfigured_provider_errors() {
        let provider = OpenAiChatProvider::new("http://localhost:9", "", "");
        assert!(provider.rewrite("helmet").await.is_err());
        assert!(provider.answer("helmet?", "ctx").await.is_err());
    }
}
