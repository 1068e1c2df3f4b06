use lexgraph_ingest::{IngestRequest, IngestionEngine};
use lexgraph_query::QueryEngine;
use sqlx::sqlite::SqlitePoolOptions;
use tokio_util::sync::CancellationToken;

const TRAFFIC_LAW: &str = r#"{
    "document": {"title": "Road Traffic Law", "type": "Law", "number": "23/2008/QH12", "year": 2008},
    "units": [
        {"level": "article", "code": "Article 8", "text": "Prohibited acts", "order_index": 8},
        {"level": "clause", "code": "8.1", "parent_code": "Article 8", "order_index": 1,
         "text": "The driver must not run the red light"}
    ]
}"#;

#[tokio::test]
async fn extracted_triples_answer_queries() {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .unwrap();
    let ingest = IngestionEngine::from_pool(pool).await.unwrap();
    let req: IngestRequest = serde_json::from_str(TRAFFIC_LAW).unwrap();
    let cancel = CancellationToken::new();
    let ingested = ingest.ingest_legal_content(&req, &cancel).await.unwrap();
    assert!(ingested.triples_created >= 1);

    let engine = QueryEngine::new(ingest.graph_store());
    let response = engine
        .process_query("can the driver run the red light?", true, &cancel)
        .await
        .unwrap();

    assert!(!response.answers.is_empty());
    let top = &response.answers[0];
    assert_eq!(top.doc_ref, "Law 23/2008/QH12 2008 8.1");
    assert_eq!(top.source_url, format!("/documents/{}", ingested.document_id));
    assert!(top.snippet.contains("red light"));

    let debug = response.debug.unwrap();
    assert!(debug.candidates.iter().any(|c| c.name == "the driver"));
    assert!(debug.timings.reranking.is_none());
}
