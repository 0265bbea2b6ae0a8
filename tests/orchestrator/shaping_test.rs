//! Data-shaping orchestrator behavior against a scripted provider.

use std::sync::Arc;

use straylight::config::LlmConfig;
use straylight::error::AppError;
use straylight::orchestrator::DataShaper;
use straylight::provider::{ChatApi, ChatClient};
use straylight::types::{ExecutionMeta, ExecutionResult, Record, ScrapeRequest};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn chat(base_url: &str) -> Arc<dyn ChatApi> {
    Arc::new(
        ChatClient::new(&LlmConfig {
            api_key: Some("sk-test".to_owned()),
            base_url: base_url.to_owned(),
            timeout_seconds: 5,
            ..LlmConfig::default()
        })
        .expect("client builds"),
    )
}

fn shaper(base_url: &str) -> DataShaper {
    DataShaper::new(chat(base_url), 8000)
}

fn record(symbol: &str, price: &str) -> Record {
    let mut record = Record::new();
    record.insert("symbol".to_owned(), serde_json::json!(symbol));
    record.insert("price".to_owned(), serde_json::json!(price));
    record
}

fn execution(records: Vec<Record>) -> ExecutionResult {
    let ok = !records.is_empty();
    let total = records.len();
    ExecutionResult {
        ok,
        records,
        meta: ExecutionMeta {
            total_count: total,
            target_urls: vec!["https://example.invalid/crypto".to_owned()],
            method: "css-selector".to_owned(),
            confidence: "high".to_owned(),
            ..ExecutionMeta::default()
        },
        errors: vec![],
        per_source: vec![],
        elapsed_ms: 12,
        scraped_at: Some(chrono::Utc::now()),
    }
}

fn request() -> ScrapeRequest {
    ScrapeRequest {
        description: "crypto prices".to_owned(),
        desired_fields: vec!["symbol".to_owned(), "price".to_owned()],
        response_template: Some(serde_json::json!({"data": [{"symbol": "", "price": 0}]})),
        target_urls: vec!["https://example.invalid/crypto".to_owned()],
        update_frequency: "hourly".to_owned(),
    }
}

fn completion(content: &str) -> serde_json::Value {
    serde_json::json!({
        "choices": [{"message": {"content": content}}],
        "model": "deepseek-chat",
        "usage": {"total_tokens": 64}
    })
}

const SHAPED: &str = r#"{"data": [
    {"symbol": "BTC", "price": 45000},
    {"symbol": "ETH", "price": 3200}
]}"#;

#[tokio::test]
async fn shaped_output_is_recovered_and_measured() {
    let server = MockServer::start().await;
    let wrapped = format!("Here is the JSON you asked for:\n```json\n{SHAPED}\n```");
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion(&wrapped)))
        .expect(1)
        .mount(&server)
        .await;

    let parsed = shaper(&server.uri())
        .shape(&execution(vec![record("BTC", "$45,000"), record("ETH", "$3,200")]), &request())
        .await
        .expect("shaped");

    assert_eq!(parsed.meta.records_parsed, 2);
    assert_eq!(parsed.meta.fields_extracted, vec!["price", "symbol"]);
    assert_eq!(
        parsed.meta.data_sources,
        vec!["https://example.invalid/crypto"]
    );
    assert_eq!(parsed.data["data"][0]["symbol"], "BTC");
    assert_eq!(parsed.raw_output, wrapped);
    assert_eq!(parsed.source_meta.total_count, 2);
}

#[tokio::test]
async fn empty_execution_is_refused_without_any_call() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion(SHAPED)))
        .expect(0)
        .mount(&server)
        .await;

    let err = shaper(&server.uri())
        .shape(&execution(vec![]), &request())
        .await
        .expect_err("empty data refused");
    assert!(matches!(err, AppError::EmptyData(_)));
}

#[tokio::test]
async fn unparseable_first_output_is_retried_once() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(completion("sorry, I cannot do that")),
        )
        .up_to_n_times(1)
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion(SHAPED)))
        .expect(1)
        .mount(&server)
        .await;

    let parsed = shaper(&server.uri())
        .shape(&execution(vec![record("BTC", "$45,000")]), &request())
        .await
        .expect("second attempt parses");
    assert_eq!(parsed.meta.records_parsed, 2);
    // Usage from both attempts is accounted for.
    assert_eq!(parsed.meta.tokens_used, 128);
}

#[tokio::test]
async fn persistently_unparseable_output_is_a_parsing_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion("still not json")))
        .expect(2)
        .mount(&server)
        .await;

    let err = shaper(&server.uri())
        .shape(&execution(vec![record("BTC", "$45,000")]), &request())
        .await
        .expect_err("parsing error");
    assert!(matches!(err, AppError::Parsing(_)));
}

#[tokio::test]
async fn template_deviation_is_a_shape_validation_error() {
    let server = MockServer::start().await;
    // Valid JSON, wrong top-level key set.
    let wrong = r#"{"rows": [{"symbol": "BTC", "price": 1}]}"#;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion(wrong)))
        .expect(2)
        .mount(&server)
        .await;

    let err = shaper(&server.uri())
        .shape(&execution(vec![record("BTC", "$45,000")]), &request())
        .await
        .expect_err("shape validation error");
    match err {
        AppError::ShapeValidation(message) => assert!(message.contains("key set mismatch")),
        other => panic!("expected ShapeValidation, got {other:?}"),
    }
}

#[tokio::test]
async fn missing_required_field_is_a_shape_validation_error() {
    let server = MockServer::start().await;
    let missing = r#"{"data": [{"symbol": "BTC"}]}"#;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion(missing)))
        .expect(2)
        .mount(&server)
        .await;

    let err = shaper(&server.uri())
        .shape(&execution(vec![record("BTC", "$45,000")]), &request())
        .await
        .expect_err("missing field");
    match err {
        AppError::ShapeValidation(message) => assert!(message.contains("price")),
        other => panic!("expected ShapeValidation, got {other:?}"),
    }
}
