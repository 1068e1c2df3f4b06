//! Question answering over retrieved legal text.
//!
//! Context comes either from the graph query pipeline (the units behind the
//! top answers) or from semantic search over unit embeddings. The generated
//! answer is optional: a missing or failing generator leaves it empty.

use serde::{Deserialize, Serialize};

/// Characters of each unit included in the model context.
pub const CONTEXT_SNIPPET_CHARS: usize = 600;
/// Characters of each unit shown as a source excerpt.
pub const SOURCE_SNIPPET_CHARS: usize = 320;

/// A unit used as answer context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AskSource {
    pub unit_id: i64,
    pub document_id: i64,
    pub document_title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    pub level: String,
    pub snippet: String,
    /// Cosine distance, for semantic retrieval.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub distance: Option<f32>,
    /// Answer score, for graph retrieval.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<f32>,
    #[serde(skip)]
    pub text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AskResponse {
    pub question: String,
    pub used_graph: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub answer: Option<String>,
    pub sources: Vec<AskSource>,
}

/// First `max` characters, with `...` when cut.
pub fn truncate_chars(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((byte_idx, _)) => format!("{}...", &text[..byte_idx]),
        None => text.to_string(),
    }
}

/// Model context: one block per source, unit text capped at
/// [`CONTEXT_SNIPPET_CHARS`].
pub fn build_context(sources: &[AskSource]) -> String {
    let mut context = String::new();
    for source in sources {
        context.push_str(&format!(
            "Document: {} | Code: {} | Level: {}\n{}\n\n",
            source.document_title,
            source.code.as_deref().unwrap_or(""),
            source.level,
            truncate_chars(&source.text, CONTEXT_SNIPPET_CHARS),
        ));
    }
    context
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source(text: &str) -> AskSource {
        AskSource {
            unit_id: 1,
            document_id: 1,
            document_title: "Nghị định 100/2019".to_string(),
            code: Some("Điều 6.2".to_string()),
            level: "clause".to_string(),
            snippet: truncate_chars(text, SOURCE_SNIPPET_CHARS),
            distance: Some(0.2),
            score: None,
            text: text.to_string(),
        }
    }

    #[test]
    fn test_truncate_chars() {
        assert_eq!(truncate_chars("short", 10), "short");
        assert_eq!(truncate_chars("phạt tiền", 4), "phạt...");
        assert_eq!(truncate_chars("exact", 5), "exact");
    }

    #[test]
    fn test_context_format() {
        let context = build_context(&[source("Phạt tiền từ 400.000 đồng")]);
        assert_eq!(
            context,
            "Document: Nghị định 100/2019 | Code: Điều 6.2 | Level: clause\nPhạt tiền từ 400.000 đồng\n\n"
        );
    }

    #[test]
    fn test_context_caps_unit_text() {
        let long = "x".repeat(1000);
        let context = build_context(&[source(&long)]);
        assert!(context.contains(&format!("{}...\n\n", "x".repeat(600))));
        assert!(!context.contains(&"x".repeat(601)));
    }

    #[test]
    fn test_text_not_serialized() {
        let json = serde_json::to_value(source("body")).unwrap();
        assert!(json.get("text").is_none());
        assert_eq!(json["snippet"], "body");
    }
}
