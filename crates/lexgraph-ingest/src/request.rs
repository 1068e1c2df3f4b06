//! Ingestion request and response payloads.
//!
//! These mirror the JSON accepted by `lexgraph ingest`:
//!
//! ```json
//! {
//!   "document": { "title": "Road Traffic Law", "type": "Law", "number": "23/2008/QH12", "year": 2008 },
//!   "units": [
//!     { "level": "article", "code": "Article 8", "text": "...", "order_index": 8 },
//!     { "level": "clause", "code": "8.1", "parent_code": "Article 8", "text": "..." }
//!   ],
//!   "auto_embed": true
//! }
//! ```

use serde::{Deserialize, Serialize};

use lexgraph_graph::NewDocument;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IngestRequest {
    pub document: DocumentRequest,
    #[serde(default)]
    pub units: Vec<UnitRequest>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub concepts: Vec<ConceptRequest>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub relations: Vec<RelationRequest>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub triples: Vec<TripleRequest>,
    /// Embed unit text. Defaults to the engine setting when an embedder is configured.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auto_embed: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding_model: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DocumentRequest {
    #[serde(default)]
    pub title: String,
    #[serde(default, rename = "type")]
    pub doc_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub number: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub year: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authority: Option<String>,
}

impl DocumentRequest {
    pub(crate) fn to_new_document(&self) -> NewDocument {
        NewDocument {
            title: self.title.trim().to_string(),
            doc_type: self.doc_type.trim().to_string(),
            number: self.number.clone(),
            year: self.year,
            authority: self.authority.clone(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UnitRequest {
    #[serde(default)]
    pub level: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(default)]
    pub text: String,
    /// Code of an earlier unit in the same request.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_code: Option<String>,
    #[serde(default)]
    pub order_index: i32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConceptRequest {
    pub name: String,
    #[serde(default)]
    pub synonyms: Vec<String>,
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default, rename = "type")]
    pub concept_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RelationRequest {
    pub name: String,
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default, rename = "type")]
    pub relation_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TripleRequest {
    pub subject: String,
    pub relation: String,
    pub object: String,
    pub unit_code: String,
    /// Citation; built from the document and unit when empty.
    #[serde(default)]
    pub doc_ref: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tfidf: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IngestResponse {
    pub document_id: i64,
    pub units_created: usize,
    pub triples_created: usize,
    pub concepts_created: usize,
    pub relations_created: usize,
    pub embeddings_created: usize,
    pub processing_summary: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_from_json() {
        let req: IngestRequest = serde_json::from_str(
            r#"{
                "document": {"title": "Road Traffic Law", "type": "Law", "year": 2008},
                "units": [
                    {"level": "article", "code": "Article 8", "text": "..."},
                    {"level": "clause", "code": "8.1", "parent_code": "Article 8", "text": "...", "order_index": 1}
                ],
                "triples": [{"subject": "driver", "relation": "prohibition", "object": "red light", "unit_code": "8.1", "tfidf": 0.7}]
            }"#,
        )
        .unwrap();

        assert_eq!(req.document.doc_type, "Law");
        assert_eq!(req.units[1].parent_code.as_deref(), Some("Article 8"));
        assert_eq!(req.units[0].order_index, 0);
        assert_eq!(req.triples[0].tfidf, Some(0.7));
        assert!(req.triples[0].doc_ref.is_empty());
        assert!(req.auto_embed.is_none());
    }
}
