//! Restart durability: records created before a clean stop are readable
//! after reopening the database file.

use chrono::Utc;
use straylight::registry::store::EndpointStore;
use straylight::types::EndpointRecord;

fn sample(id: &str) -> EndpointRecord {
    EndpointRecord {
        endpoint_id: id.to_owned(),
        json_data: serde_json::json!({"data": [{"headline": "persisted"}]}),
        description: "durability check".to_owned(),
        source_urls: vec!["https://example.invalid/news".to_owned()],
        records_count: 1,
        fields: vec!["headline".to_owned()],
        parsing_timestamp: Some(Utc::now()),
        created_at: Utc::now(),
    }
}

#[tokio::test]
async fn endpoints_survive_a_reopen() {
    let dir = tempfile::tempdir().expect("tempdir");
    let db_path = dir.path().join("endpoints.db");

    {
        let store = EndpointStore::open(&db_path).await.expect("first open");
        store.insert(&sample("news-feed-ab12")).await.expect("insert");
        store.insert(&sample("news-feed-cd34")).await.expect("insert");
    }

    let reopened = EndpointStore::open(&db_path).await.expect("reopen");
    let record = reopened
        .get("news-feed-ab12")
        .await
        .expect("get")
        .expect("row survived restart");
    assert_eq!(record.json_data["data"][0]["headline"], "persisted");
    assert_eq!(reopened.count().await.expect("count"), 2);
}

#[tokio::test]
async fn deletes_survive_a_reopen() {
    let dir = tempfile::tempdir().expect("tempdir");
    let db_path = dir.path().join("endpoints.db");

    {
        let store = EndpointStore::open(&db_path).await.expect("first open");
        store.insert(&sample("gone-soon-ef56")).await.expect("insert");
        assert!(store.delete("gone-soon-ef56").await.expect("delete"));
    }

    let reopened = EndpointStore::open(&db_path).await.expect("reopen");
    assert!(reopened
        .get("gone-soon-ef56")
        .await
        .expect("get")
        .is_none());
}
