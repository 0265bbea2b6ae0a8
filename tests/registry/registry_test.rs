//! Registry invariants: id uniqueness, round-trips, list/delete consistency.

use std::collections::HashSet;

use chrono::Utc;
use straylight::error::AppError;
use straylight::registry::store::EndpointStore;
use straylight::registry::{is_valid_endpoint_id, EndpointRegistry};
use straylight::types::{ExecutionMeta, ParsedMeta, ParsedResponse};

const BASE_URL: &str = "http://127.0.0.1:8080";

async fn registry() -> EndpointRegistry {
    let store = EndpointStore::open_in_memory().await.expect("open store");
    EndpointRegistry::new(store, BASE_URL)
}

fn parsed(data: serde_json::Value) -> ParsedResponse {
    let records = data
        .get("data")
        .and_then(|v| v.as_array())
        .map_or(1, Vec::len);
    ParsedResponse {
        data,
        meta: ParsedMeta {
            model: "deepseek-chat".to_owned(),
            tokens_used: 100,
            parsing_ms: 5,
            records_parsed: records,
            fields_extracted: vec!["symbol".to_owned(), "price".to_owned()],
            data_sources: vec!["https://example.invalid/crypto".to_owned()],
            timestamp: Utc::now(),
        },
        source_meta: ExecutionMeta::default(),
        raw_output: String::new(),
    }
}

fn sample() -> ParsedResponse {
    parsed(serde_json::json!({"data": [{"symbol": "BTC", "price": 45000}]}))
}

#[tokio::test]
async fn created_ids_are_distinct_wellformed_and_slug_based() {
    let registry = registry().await;
    let mut ids = HashSet::new();

    for _ in 0..20 {
        let info = registry
            .create(&sample(), "Get the latest crypto prices")
            .await
            .expect("create");
        assert!(is_valid_endpoint_id(&info.endpoint_id));
        assert!(info.endpoint_id.starts_with("crypto-prices-"));
        assert_eq!(
            info.access_url,
            format!("{BASE_URL}/api/data/{}", info.endpoint_id)
        );
        assert!(ids.insert(info.endpoint_id), "ids must be unique");
    }
}

#[tokio::test]
async fn create_then_get_round_trips_the_data() {
    let registry = registry().await;
    let data = serde_json::json!({
        "data": [{"symbol": "BTC", "price": 45000.5, "tags": ["spot", "usd"]}],
        "as_of": "2026-08-01"
    });
    let info = registry
        .create(&parsed(data.clone()), "crypto prices")
        .await
        .expect("create");

    let record = registry
        .get(&info.endpoint_id)
        .await
        .expect("get")
        .expect("present");
    assert_eq!(record.json_data, data);
    assert_eq!(record.description, "crypto prices");
    assert_eq!(
        record.source_urls,
        vec!["https://example.invalid/crypto".to_owned()]
    );
    assert_eq!(record.fields, vec!["symbol", "price"]);
}

#[tokio::test]
async fn empty_data_is_a_creation_error() {
    let registry = registry().await;

    let err = registry
        .create(&parsed(serde_json::json!({})), "empty object")
        .await
        .expect_err("empty object refused");
    assert!(matches!(err, AppError::StoreCreation(_)));

    let err = registry
        .create(&parsed(serde_json::json!([1, 2])), "not an object")
        .await
        .expect_err("non-object refused");
    assert!(matches!(err, AppError::StoreCreation(_)));
}

#[tokio::test]
async fn list_tracks_creates_and_deletes() {
    let registry = registry().await;
    let mut ids = Vec::new();
    for index in 0..5 {
        let info = registry
            .create(&sample(), &format!("feed number {index}"))
            .await
            .expect("create");
        ids.push(info.endpoint_id);
    }

    assert!(registry.delete(&ids[0]).await.expect("delete"));
    assert!(registry.delete(&ids[3]).await.expect("delete"));

    let listed = registry.list().await.expect("list");
    assert_eq!(listed.len(), 3);
    for info in &listed {
        let record = registry
            .get(&info.endpoint_id)
            .await
            .expect("get")
            .expect("listed ids resolve");
        assert_eq!(record.endpoint_id, info.endpoint_id);
    }
}

#[tokio::test]
async fn delete_then_get_returns_none() {
    let registry = registry().await;
    let info = registry.create(&sample(), "to be removed").await.expect("create");

    assert!(registry.delete(&info.endpoint_id).await.expect("delete"));
    assert!(registry
        .get(&info.endpoint_id)
        .await
        .expect("get")
        .is_none());
    assert!(!registry.delete(&info.endpoint_id).await.expect("redelete"));
}
