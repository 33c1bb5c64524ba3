use std::time::Duration;

use futures_util::StreamExt;
use proposal_ai_client::http::reqwest::default_dyn_transport;
use proposal_ai_client::provider::anthropic_messages::AnthropicMessagesProvider;
use proposal_ai_client::{
    AIProvider, AIRequest, ErrorKind, FinishReason, ProviderServices, RetryConfig,
};
use serde_json::json;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const MODEL: &str = "claude-3-5-sonnet-20241022";

fn provider(server: &MockServer, services: ProviderServices) -> AnthropicMessagesProvider {
    let transport = default_dyn_transport().expect("transport");
    AnthropicMessagesProvider::new(transport, "sk-ant-test", services)
        .with_base_url(server.uri())
        .with_timeout(Duration::from_secs(5))
}

fn services(max_attempts: u32) -> ProviderServices {
    ProviderServices {
        retry: RetryConfig {
            max_attempts,
            base_delay_ms: 10,
            ..RetryConfig::default()
        },
        ..ProviderServices::default()
    }
}

#[tokio::test]
async fn chat_sends_anthropic_shape_and_prices_usage() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/messages"))
        .and(header("x-api-key", "sk-ant-test"))
        .and(header("Authorization", "Bearer sk-ant-test"))
        .and(header("anthropic-version", "2023-06-01"))
        .and(body_partial_json(json!({
            "model": MODEL,
            "max_tokens": 4096,
            "system": "Be brief.",
            "stream": false,
            "messages": [{"role": "user", "content": "Summarize X"}]
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "msg_1",
            "type": "message",
            "role": "assistant",
            "model": MODEL,
            "content": [{"type": "text", "text": "Y"}],
            "stop_reason": "end_turn",
            "stop_sequence": null,
            "usage": {"input_tokens": 10, "output_tokens": 5}
        })))
        .expect(1)
        .mount(&server)
        .await;

    let services = services(3);
    let provider = provider(&server, services.clone());
    let request = AIRequest::new("Summarize X", MODEL).with_system_prompt("Be brief.");
    let response = provider.chat(request).await.expect("chat should succeed");

    assert_eq!(response.id, "msg_1");
    assert_eq!(response.content, "Y");
    assert_eq!(response.usage.total_tokens, 15);
    assert_eq!(response.finish_reason, FinishReason::Stop);
    let expected = 10.0 / 1000.0 * 0.003 + 5.0 / 1000.0 * 0.015;
    assert!((response.cost - expected).abs() < 1e-12);
    assert_eq!(services.usage.totals_by_provider()["anthropic_messages"].requests, 1);
}

#[tokio::test]
async fn stream_assembles_usage_from_start_and_delta_events() {
    let server = MockServer::start().await;
    let events = [
        ("message_start", json!({"type":"message_start","message":{"id":"msg_s","model":MODEL,"usage":{"input_tokens":12,"output_tokens":1}}})),
        ("content_block_start", json!({"type":"content_block_start","index":0,"content_block":{"type":"text","text":""}})),
        ("ping", json!({"type":"ping"})),
        ("content_block_delta", json!({"type":"content_block_delta","index":0,"delta":{"type":"text_delta","text":"Hel"}})),
        ("content_block_delta", json!({"type":"content_block_delta","index":0,"delta":{"type":"text_delta","text":"lo"}})),
        ("content_block_delta", json!({"type":"content_block_delta","index":0,"delta":{"type":"text_delta","text":"!"}})),
        ("content_block_stop", json!({"type":"content_block_stop","index":0})),
        ("message_delta", json!({"type":"message_delta","delta":{"stop_reason":"max_tokens"},"usage":{"output_tokens":3}})),
        ("message_stop", json!({"type":"message_stop"})),
    ];
    let body: String = events
        .iter()
        .map(|(name, data)| format!("event: {name}\ndata: {data}\n\n"))
        .collect();

    Mock::given(method("POST"))
        .and(path("/messages"))
        .and(body_partial_json(json!({"stream": true})))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "text/event-stream")
                .set_body_string(body),
        )
        .mount(&server)
        .await;

    let provider = provider(&server, services(3));
    let chunks: Vec<_> = provider
        .stream(AIRequest::new("Say hello", MODEL))
        .await
        .expect("stream should open")
        .map(|chunk| chunk.expect("chunk"))
        .collect()
        .await;

    assert_eq!(chunks.len(), 4);
    let deltas: Vec<&str> = chunks[..3].iter().map(|c| c.delta.as_str()).collect();
    assert_eq!(deltas, vec!["Hel", "lo", "!"]);
    assert!(chunks[..3].iter().all(|c| !c.is_complete && c.usage.is_none()));

    let last = &chunks[3];
    assert!(last.is_complete);
    assert_eq!(last.id, "msg_s");
    assert_eq!(last.finish_reason, Some(FinishReason::Length));
    let usage = last.usage.expect("usage");
    assert_eq!((usage.prompt_tokens, usage.completion_tokens), (12, 3));
    assert!(!usage.is_estimated());
}

#[tokio::test]
async fn authentication_error_is_not_retried() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/messages"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({
            "type": "error",
            "error": {"type": "authentication_error", "message": "invalid x-api-key"}
        })))
        .expect(1)
        .mount(&server)
        .await;

    let provider = provider(&server, services(3));
    let err = provider
        .stream(AIRequest::new("hi", MODEL))
        .await
        .err()
        .expect("401 should fail before streaming");
    assert_eq!(err.kind(), ErrorKind::InvalidRequest);
    assert_eq!(err.code(), "INVALID_API_KEY");
    assert_eq!(err.message(), "invalid x-api-key");
}

#[tokio::test]
async fn overloaded_then_success_is_retried() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/messages"))
        .respond_with(ResponseTemplate::new(529).set_body_json(json!({
            "type": "error",
            "error": {"type": "overloaded_error", "message": "Overloaded"}
        })))
        .up_to_n_times(1)
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/messages"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "msg_2",
            "model": MODEL,
            "content": [{"type": "text", "text": "ok"}],
            "stop_reason": "end_turn",
            "usage": {"input_tokens": 3, "output_tokens": 1}
        })))
        .expect(1)
        .mount(&server)
        .await;

    let provider = provider(&server, services(3));
    let response = provider
        .chat(AIRequest::new("hi", MODEL))
        .await
        .expect("retry should recover");
    assert_eq!(response.content, "ok");
}

#[tokio::test]
async fn probe_uses_single_minimal_call() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/messages"))
        .and(body_partial_json(json!({"max_tokens": 1})))
        .respond_with(ResponseTemplate::new(500))
        .expect(1)
        .mount(&server)
        .await;

    let provider = provider(&server, services(3));
    assert!(!provider.is_available().await);

    let models = provider.list_models().await.expect("static catalogue");
    assert!(models.iter().any(|m| m.id == MODEL));
    assert!(models.iter().all(|m| m.provider == "anthropic_messages"));
}
