//! HTTP-level tests for the OpenAI-compatible classifier client.

use std::sync::Arc;

use triage_core::{ClassifierClient, ContainerType, Error, Priority};
use triage_inference::openai::{OpenAIClassifier, OpenAIConfig};
use triage_inference::ClassificationEngine;
use wiremock::matchers::{body_string_contains, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn client_for(server: &MockServer) -> OpenAIClassifier {
    let config = OpenAIConfig::default()
        .with_base_url(server.uri())
        .with_api_key("test-key")
        .with_model("test-model")
        .with_timeout_seconds(5);
    OpenAIClassifier::new(config).expect("Failed to create classifier")
}

fn completion(content: &str) -> serde_json::Value {
    serde_json::json!({
        "id": "chatcmpl-123",
        "choices": [{
            "index": 0,
            "message": { "role": "assistant", "content": content },
            "finish_reason": "stop"
        }],
        "usage": { "prompt_tokens": 10, "completion_tokens": 20, "total_tokens": 30 }
    })
}

fn error_body(message: &str, error_type: &str, code: Option<&str>) -> serde_json::Value {
    serde_json::json!({
        "error": { "message": message, "type": error_type, "code": code }
    })
}

#[tokio::test]
async fn test_classify_sends_bearer_and_model() {
    let server = MockServer::start().await;
    let answer = r#"{"container":"todo","suggestedPriority":"normal","summary":"是一个任务"}"#;

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(header("Authorization", "Bearer test-key"))
        .and(body_string_contains("\"model\":\"test-model\""))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion(answer)))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server);
    let raw = client.classify("system", "买牛奶").await.unwrap();
    assert_eq!(raw, answer);
}

#[tokio::test]
async fn test_engine_parses_calendar_answer_and_forwards_context() {
    let server = MockServer::start().await;
    let answer = r#"{"container":"calendar","extractedTime":"2026-10-17T15:00:00+08:00","suggestedPriority":"important","summary":"会议"}"#;

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(body_string_contains("张总"))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion(answer)))
        .expect(1)
        .mount(&server)
        .await;

    let engine = ClassificationEngine::new(Arc::new(client_for(&server)));
    let c = engine
        .classify("明天下午3点和张总开会", Some("常提到的人：张总"))
        .await
        .unwrap();

    assert_eq!(c.container, ContainerType::Calendar);
    assert_eq!(c.suggested_priority, Priority::Important);
    assert_eq!(c.summary, "会议");
    assert!(c.extracted_time.is_some());
}

#[tokio::test]
async fn test_unauthorized_maps_to_configuration_missing() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(401).set_body_json(error_body(
            "Incorrect API key provided",
            "invalid_request_error",
            Some("invalid_api_key"),
        )))
        .mount(&server)
        .await;

    let err = client_for(&server).classify("s", "u").await.unwrap_err();
    assert!(err.is_configuration_missing(), "got {:?}", err);
}

#[tokio::test]
async fn test_rate_limit_is_retryable() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(429).set_body_json(error_body(
            "Rate limit reached",
            "requests",
            Some("rate_limit_exceeded"),
        )))
        .mount(&server)
        .await;

    let err = client_for(&server).classify("s", "u").await.unwrap_err();
    assert!(matches!(err, Error::Inference(_)), "got {:?}", err);
    assert!(err.is_retryable());
}

#[tokio::test]
async fn test_server_error_without_json_body_is_retryable() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(502).set_body_string("Bad Gateway"))
        .mount(&server)
        .await;

    let err = client_for(&server).classify("s", "u").await.unwrap_err();
    assert!(err.is_retryable(), "got {:?}", err);
    assert!(err.to_string().contains("Bad Gateway"));
}

#[tokio::test]
async fn test_context_length_is_rejected() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(400).set_body_json(error_body(
            "This model's maximum context length is 8192 tokens",
            "invalid_request_error",
            Some("context_length_exceeded"),
        )))
        .mount(&server)
        .await;

    let err = client_for(&server).classify("s", "u").await.unwrap_err();
    assert!(matches!(err, Error::Rejected(_)), "got {:?}", err);
    assert!(!err.is_retryable());
}

#[tokio::test]
async fn test_empty_choices_is_invalid_response() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(serde_json::json!({ "id": "x", "choices": [] })),
        )
        .mount(&server)
        .await;

    let err = client_for(&server).classify("s", "u").await.unwrap_err();
    assert!(matches!(err, Error::InvalidResponse(_)), "got {:?}", err);
}

#[tokio::test]
async fn test_engine_rejects_answer_missing_summary() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion(
            r#"{"container":"todo","suggestedPriority":"normal"}"#,
        )))
        .expect(1)
        .mount(&server)
        .await;

    let engine = ClassificationEngine::new(Arc::new(client_for(&server)));
    let err = engine.classify("买牛奶", None).await.unwrap_err();
    assert!(matches!(err, Error::InvalidResponse(_)));
}

#[tokio::test]
async fn test_unreachable_endpoint_is_network_unavailable() {
    let config = OpenAIConfig::default()
        .with_base_url("http://127.0.0.1:1/v1")
        .with_api_key("test-key")
        .with_timeout_seconds(2);
    let client = OpenAIClassifier::new(config).unwrap();

    let err = client.classify("s", "u").await.unwrap_err();
    assert!(err.is_network(), "got {:?}", err);
    assert!(err.is_retryable());
    assert!(!client.health_check().await.unwrap());
}

#[tokio::test]
async fn test_health_check_follows_models_endpoint() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/models"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({ "data": [] })))
        .mount(&server)
        .await;

    assert!(client_for(&server).health_check().await.unwrap());

    let down = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/models"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&down)
        .await;

    assert!(!client_for(&down).health_check().await.unwrap());
}
