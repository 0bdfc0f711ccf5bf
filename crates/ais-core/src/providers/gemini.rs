//! Gemini `generateContent` streaming client.

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

pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Finish reasons that end the reply without being failures. The caller
/// gets whatever text accumulated plus the reason to warn about.
pub const NON_FATAL_FINISH_REASONS: &[&str] = &["SAFETY", "RECITATION"];

/// Configuration for the Gemini client.
#[derive(Debug, Clone)]
pub struct GeminiConfig {
    pub api_key: String,
    pub base_url: String,
    pub model: String,
    pub max_tokens: Option<u32>,
}

impl GeminiConfig {
    /// Builds a config from the loaded settings.
    ///
    /// # Errors
    /// Returns an error if no API key is available.
    pub fn resolve(
        config_api_key: Option<&str>,
        config_base_url: Option<&str>,
        model: String,
        max_tokens: Option<u32>,
    ) -> Result<Self> {
        let api_key = resolve_api_key(config_api_key, "GEMINI_API_KEY", "gemini")?;
        let base_url = resolve_base_url(
            config_base_url,
            "GEMINI_BASE_URL",
            DEFAULT_BASE_URL,
            "Gemini",
        )?;
        Ok(Self {
            api_key,
            base_url,
            model,
            max_tokens,
        })
    }
}

/// Gemini streaming client.
pub struct GeminiClient {
    config: GeminiConfig,
    http: reqwest::Client,
}

impl GeminiClient {
    pub fn new(config: GeminiConfig) -> Self {
        Self {
            config,
            http: reqwest::Client::new(),
        }
    }

    /// Sends the conversation plus one new user message and returns the
    /// event stream for the reply.
    ///
    /// Unlike the delta dialects, the whole reply arrives in the single
    /// terminal `Completed` event; no `TextDelta` items are emitted.
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
        let request = GenerateContentRequest::new(&self.config, history, system, message);

        if tracing::enabled!(tracing::Level::DEBUG) {
            tracing::debug!(
                payload = %serde_json::to_string(&request).unwrap_or_default(),
                "gemini request"
            );
        }

        let url = format!(
            "{}/models/{}:streamGenerateContent?alt=sse",
            self.config.base_url, self.config.model
        );
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
        Ok(Box::pin(ChunkAccumulator::new(byte_stream)))
    }
}

fn build_headers(api_key: &str) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(
        "x-goog-api-key",
        HeaderValue::from_str(api_key).unwrap_or_else(|_| HeaderValue::from_static("")),
    );
    headers.insert("accept", HeaderValue::from_static("text/event-stream"));
    headers.insert("content-type", HeaderValue::from_static("application/json"));
    headers.insert("user-agent", HeaderValue::from_static(USER_AGENT));
    headers
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest {
    contents: Vec<Content>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<Content>,
    #[serde(skip_serializing_if = "Option::is_none")]
    generation_config: Option<GenerationConfig>,
}

#[derive(Debug, Serialize)]
struct Content {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<&'static str>,
    parts: Vec<Part>,
}

#[derive(Debug, Serialize)]
struct Part {
    text: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    max_output_tokens: u32,
}

impl GenerateContentRequest {
    /// Conversation roles translate here: this API names the assistant
    /// side "model". Nothing outside this function sees that name.
    fn new(
        config: &GeminiConfig,
        history: &[ConversationTurn],
        system: Option<&str>,
        message: &str,
    ) -> Self {
        let mut contents: Vec<Content> = history
            .iter()
            .map(|turn| Content {
                role: Some(match turn.role {
                    Role::User => "user",
                    Role::Assistant => "model",
                }),
                parts: vec![Part {
                    text: turn.content.clone(),
                }],
            })
            .collect();
        contents.push(Content {
            role: Some("user"),
            parts: vec![Part {
                text: message.to_string(),
            }],
        });

        let system_instruction = system
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|prompt| Content {
                role: None,
                parts: vec![Part {
                    text: prompt.to_string(),
                }],
            });

        Self {
            contents,
            system_instruction,
            generation_config: config
                .max_tokens
                .map(|max_output_tokens| GenerationConfig { max_output_tokens }),
        }
    }
}

/// Parser for the structured-chunk dialect.
///
/// Text accumulates internally; nothing is emitted until the stream ends,
/// then a single `Completed` carries the full reply. Chunks that fail to
/// parse or carry no candidates are skipped, not fatal. A transport error
/// is fatal and takes the accumulated text with it.
struct ChunkAccumulator<S> {
    inner: EventStream<S>,
    accumulated: String,
    finish_reason: Option<String>,
    done: bool,
}

impl<S> ChunkAccumulator<S> {
    fn new(stream: S) -> Self
    where
        S: Eventsource,
    {
        Self {
            inner: stream.eventsource(),
            accumulated: String::new(),
            finish_reason: None,
            done: false,
        }
    }

    fn handle_event_data(&mut self, data: &str) -> ProviderResult<()> {
        let trimmed = data.trim();
        if trimmed.is_empty() {
            return Ok(());
        }

        let Ok(value) = serde_json::from_str::<Value>(trimmed) else {
            tracing::debug!(chunk = trimmed, "skipping malformed chunk");
            return Ok(());
        };

        if let Some(error) = value.get("error") {
            let code = error.get("code").and_then(Value::as_u64);
            let status_name = error
                .get("status")
                .and_then(|v| v.as_str())
                .unwrap_or("error");
            let message = error
                .get("message")
                .and_then(|v| v.as_str())
                .unwrap_or("Unknown error");
            let mut err = ProviderError::api_error(status_name, message);
            if let Some(code) = code {
                err = err.with_status(code as u16);
            }
            self.done = true;
            return Err(err);
        }

        let Some(candidate) = value
            .get("candidates")
            .and_then(|v| v.as_array())
            .and_then(|arr| arr.first())
        else {
            return Ok(());
        };

        if let Some(reason) = candidate.get("finishReason").and_then(|v| v.as_str()) {
            self.finish_reason = Some(reason.to_string());
        }

        if let Some(parts) = candidate
            .get("content")
            .and_then(|c| c.get("parts"))
            .and_then(|v| v.as_array())
        {
            for part in parts {
                if let Some(text) = part.get("text").and_then(|v| v.as_str()) {
                    self.accumulated.push_str(text);
                }
            }
        }

        Ok(())
    }
}

impl<S, E> Stream for ChunkAccumulator<S>
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
            if self.done {
                return Poll::Ready(None);
            }

            match Pin::new(&mut self.inner).poll_next(cx) {
                Poll::Ready(Some(Ok(event))) => {
                    if let Err(err) = self.handle_event_data(&event.data) {
                        return Poll::Ready(Some(Err(err)));
                    }
                }
                // A broken transport fails the turn; only malformed chunks
                // are skipped. Accumulated text is discarded with it.
                Poll::Ready(Some(Err(e))) => {
                    self.done = true;
                    return Poll::Ready(Some(Err(ProviderError::new(
                        ProviderErrorKind::Parse,
                        format!("SSE stream error: {e}"),
                    ))));
                }
                Poll::Ready(None) => {
                    self.done = true;
                    let text = std::mem::take(&mut self.accumulated);
                    return Poll::Ready(Some(Ok(StreamEvent::Completed {
                        stop_reason: self.finish_reason.take(),
                        text: Some(text),
                    })));
                }
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}
