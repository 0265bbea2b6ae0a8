//! Chat-client wire format, auth, and retry behavior against a mock
//! provider.

use straylight::config::LlmConfig;
use straylight::provider::{ChatApi, ChatClient, ChatMessage, ProviderError};
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn client(base_url: &str) -> ChatClient {
    ChatClient::new(&LlmConfig {
        api_key: Some("sk-test".to_owned()),
        base_url: base_url.to_owned(),
        timeout_seconds: 5,
        ..LlmConfig::default()
    })
    .expect("client builds with key set")
}

fn envelope(content: &str) -> serde_json::Value {
    serde_json::json!({
        "choices": [{"message": {"role": "assistant", "content": content}}],
        "model": "deepseek-chat",
        "usage": {"total_tokens": 21}
    })
}

fn messages() -> Vec<ChatMessage> {
    vec![
        ChatMessage::system("you are a parser"),
        ChatMessage::user("hello"),
    ]
}

#[tokio::test]
async fn request_carries_bearer_auth_and_chat_envelope() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(header("authorization", "Bearer sk-test"))
        .and(header("content-type", "application/json"))
        .and(body_partial_json(serde_json::json!({
            "model": "deepseek-chat",
            "temperature": 0.3,
            "messages": [
                {"role": "system", "content": "you are a parser"},
                {"role": "user", "content": "hello"}
            ]
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(envelope("hi")))
        .expect(1)
        .mount(&server)
        .await;

    let completion = client(&server.uri())
        .complete(messages(), 100)
        .await
        .expect("completion");
    assert_eq!(completion.content, "hi");
    assert_eq!(completion.model, "deepseek-chat");
    assert_eq!(completion.tokens_used, 21);
}

#[tokio::test]
async fn unauthorized_fails_without_retry() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(401).set_body_string("bad key"))
        .expect(1)
        .mount(&server)
        .await;

    let err = client(&server.uri())
        .complete(messages(), 100)
        .await
        .expect_err("auth failure");
    assert!(matches!(err, ProviderError::Authentication(_)));
}

#[tokio::test]
async fn rate_limit_retries_honoring_retry_after() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(
            ResponseTemplate::new(429)
                .insert_header("retry-after", "0")
                .set_body_string("slow down"),
        )
        .up_to_n_times(1)
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(envelope("recovered")))
        .expect(1)
        .mount(&server)
        .await;

    let completion = client(&server.uri())
        .complete(messages(), 100)
        .await
        .expect("second attempt succeeds");
    assert_eq!(completion.content, "recovered");
}

#[tokio::test]
async fn persistent_server_errors_exhaust_the_retry_budget() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(503).set_body_string("overloaded"))
        .expect(3)
        .mount(&server)
        .await;

    let err = client(&server.uri())
        .complete(messages(), 100)
        .await
        .expect_err("all attempts fail");
    assert!(matches!(err, ProviderError::Transient(_)));
}

#[tokio::test]
async fn other_client_errors_are_permanent() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(400).set_body_string("bad request"))
        .expect(1)
        .mount(&server)
        .await;

    let err = client(&server.uri())
        .complete(messages(), 100)
        .await
        .expect_err("permanent failure");
    assert!(matches!(err, ProviderError::Api { status: 400, .. }));
}

#[test]
fn missing_api_key_fails_construction() {
    let config = LlmConfig::default();
    assert!(ChatClient::new(&config).is_err());
}
