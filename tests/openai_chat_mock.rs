use std::time::Duration;

use futures_util::StreamExt;
use proposal_ai_client::http::reqwest::default_dyn_transport;
use proposal_ai_client::provider::openai_chat::OpenAiChatProvider;
use proposal_ai_client::{
    AIProvider, AIRequest, ErrorKind, FinishReason, ProviderServices, RetryConfig,
};
use serde_json::json;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn fast_services(max_attempts: u32) -> ProviderServices {
    ProviderServices {
        retry: RetryConfig {
            max_attempts,
            base_delay_ms: 10,
            ..RetryConfig::default()
        },
        ..ProviderServices::default()
    }
}

fn provider(server: &MockServer, services: ProviderServices) -> OpenAiChatProvider {
    let transport = default_dyn_transport().expect("transport");
    OpenAiChatProvider::new(transport, "test-key-123", services)
        .with_base_url(server.uri())
        .with_organization("org-test")
        .with_timeout(Duration::from_secs(5))
}

fn completion_body() -> serde_json::Value {
    json!({
        "id": "chatcmpl-1",
        "model": "gpt-4o",
        "choices": [{
            "index": 0,
            "message": {"role": "assistant", "content": "Y"},
            "finish_reason": "stop"
        }],
        "usage": {"prompt_tokens": 10, "completion_tokens": 5, "total_tokens": 15}
    })
}

#[tokio::test]
async fn chat_maps_response_usage_and_cost() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(header("Authorization", "Bearer test-key-123"))
        .and(header("OpenAI-Organization", "org-test"))
        .and(body_partial_json(json!({
            "model": "gpt-4o",
            "max_tokens": 100,
            "stream": false,
            "messages": [{"role": "user", "content": "Summarize X"}]
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion_body()))
        .expect(1)
        .mount(&server)
        .await;

    let services = fast_services(3);
    let provider = provider(&server, services.clone());
    let request = AIRequest::new("Summarize X", "gpt-4o").with_max_tokens(100);
    let response = provider.chat(request).await.expect("chat should succeed");

    assert_eq!(response.content, "Y");
    assert_eq!(response.usage.prompt_tokens, 10);
    assert_eq!(response.usage.completion_tokens, 5);
    assert_eq!(response.usage.total_tokens, 15);
    assert!(!response.usage.is_estimated());
    assert_eq!(response.finish_reason, FinishReason::Stop);

    let expected = 10.0 / 1000.0 * 0.0025 + 5.0 / 1000.0 * 0.01;
    assert!((response.cost - expected).abs() < 1e-12);
    assert_eq!(services.usage.len(), 1);
}

#[tokio::test]
async fn stream_yields_deltas_then_terminal_chunk() {
    let server = MockServer::start().await;
    let body = [
        r#"data: {"id":"c1","model":"gpt-4o","choices":[{"index":0,"delta":{"role":"assistant","content":"Hel"}}]}"#,
        r#"data: {"id":"c1","choices":[{"index":0,"delta":{"content":"lo"}}]}"#,
        r#"data: {"id":"c1","choices":[{"index":0,"delta":{"content":"!"}}]}"#,
        r#"data: {"id":"c1","choices":[{"index":0,"delta":{},"finish_reason":"stop"}]}"#,
        r#"data: {"id":"c1","choices":[],"usage":{"prompt_tokens":8,"completion_tokens":3,"total_tokens":11}}"#,
        "data: [DONE]",
        "",
    ]
    .join("\n\n");
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(body_partial_json(json!({
            "stream": true,
            "stream_options": {"include_usage": true}
        })))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "text/event-stream")
                .set_body_string(body),
        )
        .mount(&server)
        .await;

    let services = fast_services(3);
    let provider = provider(&server, services.clone());
    let mut stream = provider
        .stream(AIRequest::new("Say hello", "gpt-4o"))
        .await
        .expect("stream should open");

    let mut chunks = Vec::new();
    while let Some(chunk) = stream.next().await {
        chunks.push(chunk.expect("chunk"));
    }

    let deltas: Vec<&str> = chunks
        .iter()
        .filter(|c| !c.is_complete)
        .map(|c| c.delta.as_str())
        .collect();
    assert_eq!(deltas, vec!["Hel", "lo", "!"]);

    let last = chunks.last().expect("terminal chunk");
    assert!(last.is_complete);
    let usage = last.usage.expect("usage on terminal chunk");
    assert_eq!((usage.prompt_tokens, usage.completion_tokens), (8, 3));
    assert_eq!(last.finish_reason, Some(FinishReason::Stop));
    assert!(last.cost.expect("cost") > 0.0);
    assert_eq!(chunks.iter().filter(|c| c.is_complete).count(), 1);
    assert_eq!(services.usage.len(), 1);
}

#[tokio::test]
async fn unauthorized_is_terminal_and_not_retried() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({
            "error": {
                "message": "Incorrect API key provided",
                "type": "invalid_request_error",
                "code": "invalid_api_key"
            }
        })))
        .expect(1)
        .mount(&server)
        .await;

    let provider = provider(&server, fast_services(3));
    let err = provider
        .chat(AIRequest::new("hi", "gpt-4o"))
        .await
        .expect_err("401 should fail");
    assert_eq!(err.kind(), ErrorKind::InvalidRequest);
    assert_eq!(err.code(), "INVALID_API_KEY");
    assert_eq!(err.message(), "Incorrect API key provided");
}

#[tokio::test]
async fn server_error_is_retried_until_success() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(500).set_body_string("upstream exploded"))
        .up_to_n_times(1)
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion_body()))
        .expect(1)
        .mount(&server)
        .await;

    let provider = provider(&server, fast_services(3));
    let response = provider
        .chat(AIRequest::new("hi", "gpt-4o"))
        .await
        .expect("second attempt should succeed");
    assert_eq!(response.content, "Y");
}

#[tokio::test]
async fn rate_limit_carries_retry_after() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(
            ResponseTemplate::new(429)
                .insert_header("retry-after", "5")
                .set_body_json(json!({
                    "error": {"message": "Rate limit reached", "type": "requests", "code": "rate_limit_exceeded"}
                })),
        )
        .expect(1)
        .mount(&server)
        .await;

    let provider = provider(&server, fast_services(1));
    let err = provider
        .chat(AIRequest::new("hi", "gpt-4o"))
        .await
        .expect_err("429 should surface once attempts are spent");
    assert_eq!(err.kind(), ErrorKind::RateLimit);
    assert_eq!(err.retry_after(), Some(Duration::from_secs(5)));
}

#[tokio::test]
async fn models_endpoint_backs_catalog_and_probe() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/models"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "object": "list",
            "data": [
                {"id": "gpt-4o-mini", "object": "model", "owned_by": "openai"},
                {"id": "gpt-4o", "object": "model", "owned_by": "openai"}
            ]
        })))
        .mount(&server)
        .await;

    let provider = provider(&server, fast_services(1));
    assert!(provider.is_available().await);

    let models = provider.list_models().await.expect("models");
    let ids: Vec<&str> = models.iter().map(|m| m.id.as_str()).collect();
    assert_eq!(ids, vec!["gpt-4o", "gpt-4o-mini"]);
    assert_eq!(models[0].pricing_key.as_deref(), Some("gpt-4o"));
}

#[tokio::test]
async fn probe_reports_false_when_server_rejects() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/models"))
        .respond_with(ResponseTemplate::new(503))
        .expect(1)
        .mount(&server)
        .await;

    let provider = provider(&server, fast_services(3));
    assert!(!provider.is_available().await);
}
