use lexgraph_ingest::{IngestRequest, IngestionEngine};
use tokio_util::sync::CancellationToken;

const VIETNAMESE_DECREE: &str = r#"{
    "document": {"title": "Nghị định 100/2019", "type": "Decree", "number": "100/2019/NĐ-CP", "year": 2019},
    "units": [
        {"level": "article", "code": "Điều 6", "text": "Xử phạt người điều khiển xe mô tô", "order_index": 6},
        {"level": "clause", "code": "Điều 6.2", "parent_code": "Điều 6", "order_index": 2,
         "text": "Phạt tiền từ 400.000 đồng đến 600.000 đồng đối với người điều khiển xe không đội mũ bảo hiểm"}
    ]
}"#;

#[tokio::test]
async fn ingest_into_file_database() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("data").join("lexgraph.db");

    let engine = IngestionEngine::new(&db_path).await.unwrap();
    let req: IngestRequest = serde_json::from_str(VIETNAMESE_DECREE).unwrap();
    let response = engine
        .ingest_legal_content(&req, &CancellationToken::new())
        .await
        .unwrap();

    assert!(db_path.exists());
    assert_eq!(response.units_created, 2);
    assert!(response.triples_created >= 1);

    let store = engine.graph_store();
    let penalty = store.get_relation_by_name("penalty").await.unwrap().unwrap();
    assert!(penalty.keywords.contains(&"phạt tiền".to_string()));
    assert!(store.get_concept_by_name("người vi phạm").await.unwrap().is_some());

    // Reopening sees the same data and refuses to ingest twice
    drop(engine);
    let reopened = IngestionEngine::new(&db_path).await.unwrap();
    let again = reopened
        .ingest_legal_content(&req, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(again.document_id, response.document_id);
    assert_eq!(again.triples_created, 0);
}
