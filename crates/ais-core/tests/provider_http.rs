//! HTTP-level provider tests against a mock server.

use ais_core::history::ConversationTurn;
use ais_core::providers::anthropic::{AnthropicClient, AnthropicConfig};
use ais_core::providers::gemini::{GeminiClient, GeminiConfig};
use ais_core::providers::openai::{OpenAIClient, OpenAIConfig};
use ais_core::providers::{ProviderError, StreamEvent};
use futures_util::StreamExt;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn can_bind_localhost() -> bool {
    std::net::TcpListener::bind("127.0.0.1:0").is_ok()
}

fn sse_response(body: &str) -> ResponseTemplate {
    ResponseTemplate::new(200)
        .insert_header("content-type", "text/event-stream")
        .set_body_string(body.to_string())
}

const ANTHROPIC_SSE: &str = "event: message_start\n\
data: {\"type\":\"message_start\",\"message\":{\"id\":\"msg_1\",\"model\":\"claude-3-5-sonnet-20240620\",\"usage\":{\"input_tokens\":3,\"output_tokens\":1}}}\n\n\
event: content_block_delta\n\
data: {\"type\":\"content_block_delta\",\"index\":0,\"delta\":{\"type\":\"text_delta\",\"text\":\"Hi\"}}\n\n\
event: content_block_delta\n\
data: {\"type\":\"content_block_delta\",\"index\":0,\"delta\":{\"type\":\"text_delta\",\"text\":\" there\"}}\n\n\
event: message_delta\n\
data: {\"type\":\"message_delta\",\"delta\":{\"stop_reason\":\"end_turn\"}}\n\n\
event: message_stop\n\
data: {\"type\":\"message_stop\"}\n\n";

const OPENAI_SSE: &str = "data: {\"choices\":[{\"index\":0,\"delta\":{\"content\":\"Hel\"},\"finish_reason\":null}]}\n\n\
data: {\"choices\":[{\"index\":0,\"delta\":{\"content\":\"lo\"},\"finish_reason\":null}]}\n\n\
data: {\"choices\":[{\"index\":0,\"delta\":{},\"finish_reason\":\"stop\"}]}\n\n\
data: [DONE]\n\n";

const GEMINI_SSE: &str = "data: {\"candidates\":[{\"content\":{\"parts\":[{\"text\":\"All\"}],\"role\":\"model\"},\"index\":0}]}\n\n\
data: {\"candidates\":[{\"content\":{\"parts\":[{\"text\":\" at once\"}],\"role\":\"model\"},\"finishReason\":\"STOP\",\"index\":0}]}\n\n";

async fn drain(
    mut stream: ais_core::providers::ProviderStream,
) -> Vec<Result<StreamEvent, ProviderError>> {
    let mut items = Vec::new();
    while let Some(item) = stream.next().await {
        items.push(item);
    }
    items
}

#[tokio::test]
async fn anthropic_streams_deltas_and_settles() {
    if !can_bind_localhost() {
        eprintln!("Skipping: cannot bind localhost TCP port in this environment.");
        return;
    }
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1/messages"))
        .and(header("x-api-key", "test-key"))
        .and(header("anthropic-version", "2023-06-01"))
        .and(body_partial_json(serde_json::json!({
            "system": "Be brief.",
            "stream": true,
        })))
        .respond_with(sse_response(ANTHROPIC_SSE))
        .expect(1)
        .mount(&server)
        .await;

    let client = AnthropicClient::new(AnthropicConfig {
        api_key: "test-key".to_string(),
        base_url: server.uri(),
        model: "claude-3-5-sonnet-20240620".to_string(),
        max_tokens: 4096,
    });

    let history = vec![
        ConversationTurn::user("earlier"),
        ConversationTurn::assistant("reply"),
    ];
    let stream = client
        .send_message_stream(&history, Some("Be brief."), "hello")
        .await
        .unwrap();

    let events: Vec<_> = drain(stream).await.into_iter().map(Result::unwrap).collect();
    assert_eq!(
        events,
        vec![
            StreamEvent::TextDelta("Hi".to_string()),
            StreamEvent::TextDelta(" there".to_string()),
            StreamEvent::Completed {
                stop_reason: Some("end_turn".to_string()),
                text: None,
            },
        ]
    );
}

#[tokio::test]
async fn openai_streams_deltas_until_exhaustion() {
    if !can_bind_localhost() {
        eprintln!("Skipping: cannot bind localhost TCP port in this environment.");
        return;
    }
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(header("authorization", "Bearer test-key"))
        .respond_with(sse_response(OPENAI_SSE))
        .expect(1)
        .mount(&server)
        .await;

    let client = OpenAIClient::new(OpenAIConfig {
        api_key: "test-key".to_string(),
        base_url: server.uri(),
        model: "gpt-4o-mini".to_string(),
        max_tokens: None,
    });

    let stream = client
        .send_message_stream(&[], None, "hello")
        .await
        .unwrap();

    let events: Vec<_> = drain(stream).await.into_iter().map(Result::unwrap).collect();
    assert_eq!(
        events,
        vec![
            StreamEvent::TextDelta("Hel".to_string()),
            StreamEvent::TextDelta("lo".to_string()),
            StreamEvent::Completed {
                stop_reason: Some("stop".to_string()),
                text: None,
            },
        ]
    );
}

#[tokio::test]
async fn gemini_settles_with_accumulated_text() {
    if !can_bind_localhost() {
        eprintln!("Skipping: cannot bind localhost TCP port in this environment.");
        return;
    }
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/models/gemini-2.0-flash:streamGenerateContent"))
        .and(header("x-goog-api-key", "test-key"))
        .respond_with(sse_response(GEMINI_SSE))
        .expect(1)
        .mount(&server)
        .await;

    let client = GeminiClient::new(GeminiConfig {
        api_key: "test-key".to_string(),
        base_url: server.uri(),
        model: "gemini-2.0-flash".to_string(),
        max_tokens: None,
    });

    let history = vec![
        ConversationTurn::user("earlier"),
        ConversationTurn::assistant("reply"),
    ];
    let stream = client
        .send_message_stream(&history, None, "hello")
        .await
        .unwrap();

    let events: Vec<_> = drain(stream).await.into_iter().map(Result::unwrap).collect();
    assert_eq!(
        events,
        vec![StreamEvent::Completed {
            stop_reason: Some("STOP".to_string()),
            text: Some("All at once".to_string()),
        }]
    );

    // The request body carried the translated "model" role.
    let requests = server.received_requests().await.unwrap();
    let body: serde_json::Value = serde_json::from_slice(&requests[0].body).unwrap();
    assert_eq!(body["contents"][1]["role"], "model");
}

#[tokio::test]
async fn non_success_status_fails_before_any_stream() {
    if !can_bind_localhost() {
        eprintln!("Skipping: cannot bind localhost TCP port in this environment.");
        return;
    }
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1/messages"))
        .respond_with(
            ResponseTemplate::new(401)
                .set_body_string(r#"{"error":{"type":"authentication_error","message":"invalid x-api-key"}}"#),
        )
        .expect(1)
        .mount(&server)
        .await;

    let client = AnthropicClient::new(AnthropicConfig {
        api_key: "bad-key".to_string(),
        base_url: server.uri(),
        model: "claude-3-5-sonnet-20240620".to_string(),
        max_tokens: 4096,
    });

    let err = client
        .send_message_stream(&[], None, "hello")
        .await
        .err()
        .unwrap();
    let provider = err.downcast_ref::<ProviderError>().unwrap();
    assert_eq!(provider.status, Some(401));
    assert!(provider.message.contains("invalid x-api-key"));
}
