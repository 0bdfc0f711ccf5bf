//! Anthropic Messages API streaming client.

use std::pin::Pin;

use anyhow::Result;
use eventsource_stream::{EventStream, Eventsource};
use futures_util::Stream;
use reqwest::header::{HeaderMap, HeaderValue};
use serde::{Deserialize, Serialize};

use crate::history::{ConversationTurn, Role};
use crate::providers::shared::{
    ProviderError, ProviderErrorKind, ProviderResult, ProviderStream, StreamEvent, USER_AGENT,
    classify_reqwest_error, resolve_api_key, resolve_base_url,
};

/// Default base URL for the Anthropic API.
pub const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";

const MESSAGES_PATH: &str = "/v1/messages";
const API_VERSION: &str = "2023-06-01";
const DEFAULT_MAX_TOKENS: u32 = 4096;

/// Configuration for the Anthropic client.
#[derive(Debug, Clone)]
pub struct AnthropicConfig {
    pub api_key: String,
    pub base_url: String,
    pub model: String,
    pub max_tokens: u32,
}

impl AnthropicConfig {
    /// Builds a config from the loaded settings.
    ///
    /// Authentication resolution order:
    /// 1. `config_api_key` parameter (from config file)
    /// 2. `ANTHROPIC_API_KEY` environment variable
    ///
    /// Base URL resolution order:
    /// 1. `ANTHROPIC_BASE_URL` env var (if set and non-empty)
    /// 2. `config_base_url` parameter (if Some and non-empty)
    /// 3. Default: `https://api.anthropic.com`
    ///
    /// # Errors
    /// Returns an error if no API key is available.
    pub fn resolve(
        config_api_key: Option<&str>,
        config_base_url: Option<&str>,
        model: String,
        max_tokens: Option<u32>,
    ) -> Result<Self> {
        let api_key = resolve_api_key(config_api_key, "ANTHROPIC_API_KEY", "anthropic")?;
        let base_url = resolve_base_url(
            config_base_url,
            "ANTHROPIC_BASE_URL",
            DEFAULT_BASE_URL,
            "Anthropic",
        )?;
        Ok(Self {
            api_key,
            base_url,
            model,
            max_tokens: max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
        })
    }
}

/// Anthropic Messages API client.
pub struct AnthropicClient {
    config: AnthropicConfig,
    http: reqwest::Client,
}

impl AnthropicClient {
    /// Creates a new Anthropic client with the given configuration.
    ///
    /// # Panics
    /// - In test builds (`#[cfg(test)]`), panics if `base_url` is the production API.
    /// - At runtime, panics if `AIS_BLOCK_REAL_API=1` and `base_url` is the production API.
    ///
    /// This prevents tests from accidentally making real network requests.
    /// Use `ANTHROPIC_BASE_URL` env var or config to point to a mock server.
    pub fn new(config: AnthropicConfig) -> Self {
        // Compile-time guard for unit tests
        #[cfg(test)]
        if config.base_url == DEFAULT_BASE_URL {
            panic!(
                "Tests must not use the production Anthropic API!\n\
                 Set ANTHROPIC_BASE_URL to a mock server (e.g., wiremock).\n\
                 Found base_url: {}",
                config.base_url
            );
        }

        // Runtime guard for integration tests (set AIS_BLOCK_REAL_API=1 in test harness)
        #[cfg(not(test))]
        if std::env::var("AIS_BLOCK_REAL_API").is_ok_and(|v| v == "1")
            && config.base_url == DEFAULT_BASE_URL
        {
            panic!(
                "AIS_BLOCK_REAL_API=1 but trying to use production Anthropic API!\n\
                 Set ANTHROPIC_BASE_URL to a mock server.\n\
                 Found base_url: {}",
                config.base_url
            );
        }

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
        let request = MessagesRequest::new(&self.config, history, system, message);

        if tracing::enabled!(tracing::Level::DEBUG) {
            tracing::debug!(
                payload = %serde_json::to_string(&request).unwrap_or_default(),
                "anthropic request"
            );
        }

        let url = format!("{}{}", self.config.base_url, MESSAGES_PATH);
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
        Ok(Box::pin(EventStreamParser::new(byte_stream)))
    }
}

fn build_headers(api_key: &str) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(
        "x-api-key",
        HeaderValue::from_str(api_key).unwrap_or_else(|_| HeaderValue::from_static("")),
    );
    headers.insert("anthropic-version", HeaderValue::from_static(API_VERSION));
    headers.insert("accept", HeaderValue::from_static("text/event-stream"));
    headers.insert("content-type", HeaderValue::from_static("application/json"));
    headers.insert("user-agent", HeaderValue::from_static(USER_AGENT));
    headers
}

#[derive(Debug, Serialize)]
struct MessagesRequest {
    model: String,
    max_tokens: u32,
    stream: bool,
    /// The system prompt is a top-level field here, never a message entry.
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    messages: Vec<ApiMessage>,
}

#[derive(Debug, Serialize)]
struct ApiMessage {
    role: &'static str,
    content: String,
}

impl MessagesRequest {
    fn new(
        config: &AnthropicConfig,
        history: &[ConversationTurn],
        system: Option<&str>,
        message: &str,
    ) -> Self {
        let mut messages: Vec<ApiMessage> = history
            .iter()
            .map(|turn| ApiMessage {
                role: match turn.role {
                    Role::User => "user",
                    Role::Assistant => "assistant",
                },
                content: turn.content.clone(),
            })
            .collect();
        messages.push(ApiMessage {
            role: "user",
            content: message.to_string(),
        });

        let system = system
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(ToString::to_string);

        Self {
            model: config.model.clone(),
            max_tokens: config.max_tokens,
            stream: true,
            system,
            messages,
        }
    }
}

/// SSE parser for the named-event dialect.
///
/// Three things can settle the stream: a `message_stop` event, an `error`
/// event, or the byte stream ending. Whichever arrives first wins; the
/// `settled` flag makes the resolution exactly-once and everything after
/// it is ignored.
struct EventStreamParser<S> {
    inner: EventStream<S>,
    stop_reason: Option<String>,
    settled: bool,
}

impl<S> EventStreamParser<S> {
    fn new(stream: S) -> Self
    where
        S: Eventsource,
    {
        Self {
            inner: stream.eventsource(),
            stop_reason: None,
            settled: false,
        }
    }

    fn handle_event(&mut self, event_type: &str, data: &str) -> ProviderResult<Option<StreamEvent>> {
        match event_type {
            "content_block_delta" => {
                let parsed: SseContentBlockDelta = parse_data(data, "content_block_delta")?;
                if parsed.delta.delta_type == "text_delta" {
                    let text = parsed.delta.text.unwrap_or_default();
                    if text.is_empty() {
                        return Ok(None);
                    }
                    return Ok(Some(StreamEvent::TextDelta(text)));
                }
                Ok(None)
            }
            "message_delta" => {
                let parsed: SseMessageDelta = parse_data(data, "message_delta")?;
                if parsed.delta.stop_reason.is_some() {
                    self.stop_reason = parsed.delta.stop_reason;
                }
                Ok(None)
            }
            "message_stop" => {
                self.settled = true;
                Ok(Some(StreamEvent::Completed {
                    stop_reason: self.stop_reason.take(),
                    text: None,
                }))
            }
            "error" => {
                // Settle first so a malformed error payload still resolves
                // the stream instead of letting a later message_stop win.
                self.settled = true;
                let parsed: SseError = parse_data(data, "error")?;
                Err(ProviderError::api_error(
                    &parsed.error.error_type,
                    &parsed.error.message,
                ))
            }
            // ping, message_start, content_block_start, content_block_stop
            // carry nothing this client needs.
            _ => Ok(None),
        }
    }
}

fn parse_data<'a, T: Deserialize<'a>>(data: &'a str, event_name: &str) -> ProviderResult<T> {
    serde_json::from_str(data).map_err(|err| {
        ProviderError::new(
            ProviderErrorKind::Parse,
            format!("Failed to parse {event_name}: {err}"),
        )
    })
}

impl<S, E> Stream for EventStreamParser<S>
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
            if self.settled {
                // Already resolved; everything after is ignored.
                return Poll::Ready(None);
            }

            match Pin::new(&mut self.inner).poll_next(cx) {
                Poll::Ready(Some(Ok(event))) => {
                    match self.handle_event(&event.event, &event.data) {
                        Ok(Some(out)) => return Poll::Ready(Some(Ok(out))),
                        Ok(None) => {}
                        Err(err) => return Poll::Ready(Some(Err(err))),
                    }
                }
                Poll::Ready(Some(Err(e))) => {
                    self.settled = true;
                    return Poll::Ready(Some(Err(ProviderError::new(
                        ProviderErrorKind::Parse,
                        format!("SSE stream error: {e}"),
                    ))));
                }
                Poll::Ready(None) => {
                    // Stream ended before message_stop; settle now.
                    self.settled = true;
                    return Poll::Ready(Some(Ok(StreamEvent::Completed {
                        stop_reason: self.stop_reason.take(),
                        text: None,
                    })));
                }
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

// === SSE Response Structures ===

#[derive(Debug, Deserialize)]
struct SseContentBlockDelta {
    delta: SseDelta,
}

#[derive(Debug, Deserialize)]
struct SseDelta {
    #[serde(rename = "type")]
    delta_type: String,
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SseMessageDelta {
    delta: SseMessageDeltaInner,
}

#[derive(Debug, Deserialize)]
struct SseMessageDeltaInner {
    #[serde(default)]
    stop_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SseError {
    error: SseErrorInfo,
}

#[derive(Debug, Deserialize)]
struct SseErrorInfo {
    #[serde(rename = "type")]
    error_type: String,
    message: String,
}
