//! Plan-generation orchestrator behavior against a scripted provider.

use std::sync::Arc;

use straylight::config::LlmConfig;
use straylight::error::AppError;
use straylight::orchestrator::PlanGenerator;
use straylight::provider::{ChatApi, ChatClient};
use straylight::types::ScrapeRequest;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const VALID_PLAN: &str = r#"{"scrape_data": {
    "record_selector": "tr.row",
    "fields": {
        "symbol": {"selector": "td.sym"},
        "price": {"selector": "td.price"}
    }
}}"#;

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

fn generator(base_url: &str) -> PlanGenerator {
    PlanGenerator::new(chat(base_url), 4000, 30, "Mozilla/5.0 (test)")
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
        "usage": {"total_tokens": 120}
    })
}

#[tokio::test]
async fn fenced_plan_is_stripped_validated_and_returned() {
    let server = MockServer::start().await;
    let fenced = format!("```json\n{VALID_PLAN}\n```");
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion(&fenced)))
        .expect(1)
        .mount(&server)
        .await;

    let plan = generator(&server.uri())
        .generate(&request())
        .await
        .expect("plan generated");

    assert!(plan.validation.is_executable());
    assert!(!plan.source.contains("```"));
    assert_eq!(plan.target_urls, request().target_urls);
    assert_eq!(plan.required_fields, vec!["symbol", "price"]);
    assert_eq!(plan.model, "deepseek-chat");
    assert_eq!(plan.tokens_used, 120);
}

#[tokio::test]
async fn invalid_first_attempt_is_regenerated_once() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion("{ not json at all")))
        .up_to_n_times(1)
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion(VALID_PLAN)))
        .expect(1)
        .mount(&server)
        .await;

    let plan = generator(&server.uri())
        .generate(&request())
        .await
        .expect("second attempt valid");
    assert!(plan.validation.is_executable());
    // Tokens from both attempts are accounted for.
    assert_eq!(plan.tokens_used, 240);
}

#[tokio::test]
async fn persistent_forbidden_plan_surfaces_validation_errors() {
    let server = MockServer::start().await;
    let forbidden = r#"{"scrape_data": {
        "record_selector": "tr",
        "fields": {"x": {"selector": "td[data-cmd=\"os.system\"]"}}
    }}"#;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion(forbidden)))
        .expect(2)
        .mount(&server)
        .await;

    let err = generator(&server.uri())
        .generate(&request())
        .await
        .expect_err("both attempts rejected");
    match err {
        AppError::PlanValidation(message) => {
            assert!(message.contains("forbidden"));
            assert!(message.contains("os.system"));
        }
        other => panic!("expected PlanValidation, got {other:?}"),
    }
}

#[tokio::test]
async fn proposed_sources_are_adopted_when_request_names_none() {
    let server = MockServer::start().await;
    let proposing = r#"{"scrape_data": {
        "record_selector": "tr.row",
        "fields": {"symbol": {"selector": "td.sym"}},
        "source_urls": ["https://proposed.invalid/markets"]
    }}"#;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion(proposing)))
        .mount(&server)
        .await;

    let request = ScrapeRequest {
        target_urls: vec![],
        ..request()
    };
    let plan = generator(&server.uri())
        .generate(&request)
        .await
        .expect("plan with proposed sources");
    assert_eq!(plan.target_urls, vec!["https://proposed.invalid/markets"]);
}

#[tokio::test]
async fn empty_description_is_rejected_before_any_call() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion(VALID_PLAN)))
        .expect(0)
        .mount(&server)
        .await;

    let request = ScrapeRequest {
        description: "   ".to_owned(),
        ..request()
    };
    let err = generator(&server.uri())
        .generate(&request)
        .await
        .expect_err("validation error");
    assert!(matches!(err, AppError::Validation(_)));
}
