//! OpenAI Chat Completions streaming client.

use std::collections::VecDeque;
use std::pin::Pin;

use anyhow::Result;
use eventsource_stream::{EventStream, Eventsource};
use futures_util::Stream;
use reqwest::header::{HeaderMap, HeaderValue};
use serde::Serialize;
use serde_json::Value;

use crate::history::{ConversationTurn, Role};
use crate::providers::shared::{
    ProviderError, ProviderErrorKind, ProviderResult, ProviderStream, StreamEvent, USER_AGENT,
    classify_reqwest_error, resolve_api_key, resolve_base_url,
};

const CHAT_COMPLETIONS_PATH: &str = "/chat/completions";
pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// OpenAI chat completions configuration.
#[derive(Debug, Clone)]
pub struct OpenAIConfig {
    pub api_key: String,
    pub base_url: String,
    pub model: String,
    pub max_tokens: Option<u32>,
}

impl OpenAIConfig {
    /// Builds a config from the loaded settings, resolving key and URL.
    ///
    /// # Errors
    /// Returns an error if no API key is available.
    pub fn resolve(
        config_api_key: Option<&str>,
        config_base_url: Option<&str>,
        model: String,
        max_tokens: Option<u32>,
    ) -> Result<Self> {
        let api_key = resolve_api_key(config_api_key, "OPENAI_API_KEY", "openai")?;
        let base_url = resolve_base_url(
            config_base_url,
            "OPENAI_BASE_URL",
            DEFAULT_BASE_URL,
            "OpenAI",
        )?;
        Ok(Self {
            api_key,
            base_url,
            model,
            max_tokens,
        })
    }
}

/// OpenAI chat completions client.
pub struct OpenAIClient {
    config: OpenAIConfig,
    http: reqwest::Client,
}

impl OpenAIClient {
    pub fn new(config: OpenAIConfig) -> Self {
        Self {
            config,
            http: reqwest::Client::new(),
        }
    }

    /// Sends the conversation plus one new user message and returns the
    /// event stream for the reply.
    ///
    /// # Errors
    /// Returns an error before any stream exists if the request cannot be
    /// sent or the response status is not 2xx.
    pub async fn send_message_stream(
        &self,
        history: &[ConversationTurn],
        system: Option<&str>,
        message: &str,
    ) -> Result<ProviderStream> {
        let request = ChatCompletionRequest::new(&self.config, history, system, message);

        if tracing::enabled!(tracing::Level::DEBUG) {
            tracing::debug!(
                payload = %serde_json::to_string(&request).unwrap_or_default(),
                "openai request"
            );
        }

        let url = format!("{}{}", self.config.base_url, CHAT_COMPLETIONS_PATH);
        let response = self
            .http
            .post(&url)
            .headers(build_headers(&self.config.api_key))
            .json(&request)
            .send()
            .await
            .map_err(|e| classify_reqwest_error(&e))?;

        let status = response.status();
        if !status.is_success() {
            let error_body = response.text().await.unwrap_or_default();
            return Err(ProviderError::http_status(status.as_u16(), &error_body).into());
        }

        let byte_stream = response.bytes_stream();
        Ok(Box::pin(DeltaChunkParser::new(byte_stream)))
    }
}

fn build_headers(api_key: &str) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(
        "Authorization",
        HeaderValue::from_str(&format!("Bearer {api_key}"))
            .unwrap_or_else(|_| HeaderValue::from_static("")),
    );
    headers.insert("accept", HeaderValue::from_static("text/event-stream"));
    headers.insert("content-type", HeaderValue::from_static("application/json"));
    headers.insert("user-agent", HeaderValue::from_static(USER_AGENT));
    headers
}

#[derive(Debug, Serialize)]
struct ChatCompletionRequest {
    model: String,
    stream: bool,
    messages: Vec<ChatCompletionMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
}

#[derive(Debug, Serialize)]
struct ChatCompletionMessage {
    role: &'static str,
    content: String,
}

impl ChatCompletionRequest {
    /// The system prompt rides in the message list itself, ahead of the
    /// conversation, followed by prior turns and the new user message.
    fn new(
        config: &OpenAIConfig,
        history: &[ConversationTurn],
        system: Option<&str>,
        message: &str,
    ) -> Self {
        let mut messages = Vec::with_capacity(history.len() + 2);

        if let Some(prompt) = system
            && !prompt.trim().is_empty()
        {
            messages.push(ChatCompletionMessage {
                role: "system",
                content: prompt.to_string(),
            });
        }

        for turn in history {
            messages.push(ChatCompletionMessage {
                role: match turn.role {
                    Role::User => "user",
                    Role::Assistant => "assistant",
                },
                content: turn.content.clone(),
            });
        }

        messages.push(ChatCompletionMessage {
            role: "user",
            content: message.to_string(),
        });

        Self {
            model: config.model.clone(),
            stream: true,
            messages,
            max_tokens: config.max_tokens,
        }
    }
}

/// Byte-stream shim that appends a blank line when the inner stream ends,
/// so a final SSE event without a trailing terminator still parses.
struct SseTerminatedStream<S> {
    inner: S,
    emitted_terminator: bool,
}

impl<S> SseTerminatedStream<S> {
    fn new(inner: S) -> Self {
        Self {
            inner,
            emitted_terminator: false,
        }
    }
}

impl<S, E> Stream for SseTerminatedStream<S>
where
    S: Stream<Item = std::result::Result<bytes::Bytes, E>> + Unpin,
{
    type Item = std::result::Result<bytes::Bytes, E>;

    fn poll_next(
        mut self: Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Option<Self::Item>> {
        use std::task::Poll;

        if self.emitted_terminator {
            return Poll::Ready(None);
        }

        match Pin::new(&mut self.inner).poll_next(cx) {
            Poll::Ready(Some(item)) => Poll::Ready(Some(item)),
            Poll::Ready(None) => {
                self.emitted_terminator = true;
                Poll::Ready(Some(Ok(bytes::Bytes::from_static(b"\n\n"))))
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

/// SSE parser for the delta-chunk dialect.
///
/// There is no explicit completion event: `[DONE]` is only a sentinel to
/// skip, and the stream settles when the bytes run out. `finish_reason`
/// from the last chunk that carried one becomes the stop reason.
struct DeltaChunkParser<S> {
    inner: EventStream<SseTerminatedStream<S>>,
    pending: VecDeque<StreamEvent>,
    final_finish_reason: Option<String>,
    emitted_done: bool,
}

impl<S> DeltaChunkParser<S> {
    fn new<E>(stream: S) -> Self
    where
        S: Stream<Item = std::result::Result<bytes::Bytes, E>> + Unpin,
    {
        Self {
            inner: SseTerminatedStream::new(stream).eventsource(),
            pending: VecDeque::new(),
            final_finish_reason: None,
            emitted_done: false,
        }
    }

    fn handle_event_data(&mut self, data: &str) -> ProviderResult<()> {
        let trimmed = data.trim();
        if trimmed.is_empty() || trimmed == "[DONE]" {
            return Ok(());
        }

        let value = serde_json::from_str::<Value>(trimmed).map_err(|err| {
            ProviderError::new(
                ProviderErrorKind::Parse,
                format!("Failed to parse SSE JSON: {err}"),
            )
        })?;
        self.handle_chunk(&value)
    }

    fn handle_chunk(&mut self, value: &Value) -> ProviderResult<()> {
        if let Some(error) = value.get("error") {
            let error_type = error
                .get("type")
                .and_then(|v| v.as_str())
                .unwrap_or("error");
            let message = error
                .get("message")
                .and_then(|v| v.as_str())
                .unwrap_or("Unknown error");
            // Terminal: no completion follows an error.
            self.emitted_done = true;
            return Err(ProviderError::api_error(error_type, message));
        }

        if let Some(choice) = value
            .get("choices")
            .and_then(|v| v.as_array())
            .and_then(|arr| arr.first())
        {
            if let Some(finish_reason) = choice.get("finish_reason").and_then(|v| v.as_str()) {
                self.final_finish_reason = Some(finish_reason.to_string());
            }

            if let Some(text) = choice
                .get("delta")
                .and_then(|d| d.get("content"))
                .and_then(|v| v.as_str())
                && !text.is_empty()
            {
                self.pending.push_back(StreamEvent::TextDelta(text.to_string()));
            }
        }

        Ok(())
    }
}

impl<S, E> Stream for DeltaChunkParser<S>
where
    S: Stream<Item = std::result::Result<bytes::Bytes, E>> + Unpin,
    E: std::error::Error + Send + Sync + 'static,
{
    type Item = ProviderResult<StreamEvent>;

    fn poll_next(
        mut self: Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Option<Self::Item>> {
        use std::task::Poll;

        loop {
            if let Some(event) = self.pending.pop_front() {
                return Poll::Ready(Some(Ok(event)));
            }

            match Pin::new(&mut self.inner).poll_next(cx) {
                Poll::Ready(Some(Ok(event))) => {
                    if let Err(err) = self.handle_event_data(&event.data) {
                        return Poll::Ready(Some(Err(err)));
                    }
                }
                Poll::Ready(Some(Err(e))) => {
                    return Poll::Ready(Some(Err(ProviderError::new(
                        ProviderErrorKind::Parse,
                        format!("SSE stream error: {e}"),
                    ))));
                }
                Poll::Ready(None) => {
                    if !self.emitted_done {
                        self.emitted_done = true;
                        return Poll::Ready(Some(Ok(StreamEvent::Completed {
                            stop_reason: self.final_finish_reason.take(),
                            text: None,
                        })));
                    }
                    return Poll::Ready(None);
                }
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use futures_util::StreamExt;

    use super::*;

    const SSE_TEXT_RESPONSE: &str = r#"data: {"id":"chatcmpl-1","choices":[{"index":0,"delta":{"role":"assistant","content":""},"finish_reason":null}]}

data: {"id":"chatcmpl-1","choices":[{"index":0,"delta":{"content":"Hello"},"finish_reason":null}]}

data: {"id":"chatcmpl-1","choices":[{"index":0,"delta":{"content":" world"},"finish_reason":null}]}

data: {"id":"chatcmpl-1","choices":[{"index":0,"delta":{},"finish_reason":"stop"}]}

data: [DONE]

"#;

    const SSE_ERROR_RESPONSE: &str = r#"data: {"id":"chatcmpl-2","choices":[{"index":0,"delta":{"content":"par"},"finish_reason":null}]}

data: {"error":{"type":"server_error","message":"The server had an error"}}

"#;

    fn mock_byte_stream(
        data: &str,
    ) -> impl Stream<Item = std::result::Result<bytes::Bytes, std::io::Error>> {
        let chunks: Vec<_> = data
            .as_bytes()
            .chunks(50) // Simulate chunked delivery
            .map(|c| Ok(bytes::Bytes::copy_from_slice(c)))
            .collect();
        futures_util::stream::iter(chunks)
    }

    #[tokio::test]
    async fn parses_deltas_and_settles_on_exhaustion() {
        let mut parser = DeltaChunkParser::new(mock_byte_stream(SSE_TEXT_RESPONSE));

        let mut events = Vec::new();
        while let Some(result) = parser.next().await {
            events.push(result.expect("Expected valid event"));
        }

        assert_eq!(
            events,
            vec![
                StreamEvent::TextDelta("Hello".to_string()),
                StreamEvent::TextDelta(" world".to_string()),
                StreamEvent::Completed {
                    stop_reason: Some("stop".to_string()),
                    text: None,
                },
            ]
        );
    }

    #[tokio::test]
    async fn error_chunk_is_terminal_without_completion() {
        let mut parser = DeltaChunkParser::new(mock_byte_stream(SSE_ERROR_RESPONSE));

        let first = parser.next().await.unwrap().unwrap();
        assert_eq!(first, StreamEvent::TextDelta("par".to_string()));

        let second = parser.next().await.unwrap();
        let err = second.unwrap_err();
        assert_eq!(err.kind, ProviderErrorKind::ApiError);
        assert!(err.message.contains("The server had an error"));

        // No Completed after the error.
        assert!(parser.next().await.is_none());
    }

    #[tokio::test]
    async fn missing_trailing_terminator_still_parses_final_event() {
        // Final event lacks the blank-line terminator; the shim supplies it.
        let data = "data: {\"choices\":[{\"index\":0,\"delta\":{\"content\":\"hi\"},\"finish_reason\":null}]}";
        let mut parser = DeltaChunkParser::new(mock_byte_stream(data));

        let first = parser.next().await.unwrap().unwrap();
        assert_eq!(first, StreamEvent::TextDelta("hi".to_string()));

        let second = parser.next().await.unwrap().unwrap();
        assert_eq!(
            second,
            StreamEvent::Completed {
                stop_reason: None,
                text: None,
            }
        );
    }

    #[test]
    fn request_puts_system_first_in_flat_list() {
        let config = OpenAIConfig {
            api_key: "sk-test".to_string(),
            base_url: DEFAULT_BASE_URL.to_string(),
            model: "gpt-4o".to_string(),
            max_tokens: Some(1024),
        };
        let history = vec![
            ConversationTurn::user("first question"),
            ConversationTurn::assistant("first answer"),
        ];

        let request =
            ChatCompletionRequest::new(&config, &history, Some("Be concise."), "second question");
        let json = serde_json::to_value(&request).unwrap();

        assert_eq!(json["model"], "gpt-4o");
        assert_eq!(json["stream"], true);
        assert_eq!(json["max_tokens"], 1024);

        let messages = json["messages"].as_array().unwrap();
        assert_eq!(messages.len(), 4);
        assert_eq!(messages[0]["role"], "system");
        assert_eq!(messages[0]["content"], "Be concise.");
        assert_eq!(messages[1]["role"], "user");
        assert_eq!(messages[2]["role"], "assistant");
        assert_eq!(messages[3]["role"], "user");
        assert_eq!(messages[3]["content"], "second question");
    }

    #[test]
    fn request_omits_blank_system_prompt() {
        let config = OpenAIConfig {
            api_key: "sk-test".to_string(),
            base_url: DEFAULT_BASE_URL.to_string(),
            model: "gpt-4o".to_string(),
            max_tokens: None,
        };

        let request = ChatCompletionRequest::new(&config, &[], Some("  "), "hi");
        let json = serde_json::to_value(&request).unwrap();

        let messages = json["messages"].as_array().unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0]["role"], "user");
        assert!(json.get("max_tokens").is_none());
    }
}
