//! Chat providers and the dispatch seam between them.

pub mod anthropic;
pub mod gemini;
pub mod openai;
pub mod shared;

use anyhow::{Result, bail};
use async_trait::async_trait;

use crate::config::Config;
use crate::history::ConversationTurn;

pub use shared::{
    ProviderError, ProviderErrorKind, ProviderResult, ProviderStream, StreamEvent,
};

/// The chat services this tool can talk to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceKind {
    OpenAI,
    Anthropic,
    Gemini,
}

impl ServiceKind {
    pub const ALL: [ServiceKind; 3] = [
        ServiceKind::Anthropic,
        ServiceKind::Gemini,
        ServiceKind::OpenAI,
    ];

    /// Stable identifier used in config files.
    pub fn id(self) -> &'static str {
        match self {
            ServiceKind::OpenAI => "openai",
            ServiceKind::Anthropic => "anthropic",
            ServiceKind::Gemini => "gemini",
        }
    }

    /// Human-readable name for listings.
    pub fn label(self) -> &'static str {
        match self {
            ServiceKind::OpenAI => "GPT (OpenAI)",
            ServiceKind::Anthropic => "Anthropic (Claude)",
            ServiceKind::Gemini => "Gemini (Google)",
        }
    }

    pub fn api_key_env_var(self) -> &'static str {
        match self {
            ServiceKind::OpenAI => "OPENAI_API_KEY",
            ServiceKind::Anthropic => "ANTHROPIC_API_KEY",
            ServiceKind::Gemini => "GEMINI_API_KEY",
        }
    }

    /// Parses a config identifier.
    ///
    /// # Errors
    /// Returns an error listing the valid identifiers when `id` is unknown.
    pub fn from_id(id: &str) -> Result<Self> {
        match id {
            "openai" => Ok(ServiceKind::OpenAI),
            "anthropic" => Ok(ServiceKind::Anthropic),
            "gemini" | "google" => Ok(ServiceKind::Gemini),
            other => bail!("Unknown service '{other}'. Valid services: anthropic, gemini, openai"),
        }
    }

    pub fn default_model(self) -> &'static str {
        self.models()[0].id
    }

    /// Known models for this service, recommended first.
    pub fn models(self) -> &'static [ModelInfo] {
        match self {
            ServiceKind::OpenAI => &[
                ModelInfo {
                    id: "gpt-4o-mini",
                    label: "GPT-4o Mini (Recommended, Cost-Effective)",
                },
                ModelInfo {
                    id: "gpt-4o",
                    label: "GPT-4o (Latest, Advanced)",
                },
                ModelInfo {
                    id: "gpt-4-turbo",
                    label: "GPT-4 Turbo",
                },
                ModelInfo {
                    id: "gpt-3.5-turbo",
                    label: "GPT-3.5 Turbo",
                },
            ],
            ServiceKind::Anthropic => &[
                ModelInfo {
                    id: "claude-3-5-sonnet-20240620",
                    label: "Claude 3.5 Sonnet (Recommended, Latest)",
                },
                ModelInfo {
                    id: "claude-3-opus-20240229",
                    label: "Claude 3 Opus (Most Powerful)",
                },
                ModelInfo {
                    id: "claude-3-haiku-20240307",
                    label: "Claude 3 Haiku (Fastest)",
                },
            ],
            ServiceKind::Gemini => &[
                ModelInfo {
                    id: "gemini-2.0-flash",
                    label: "Gemini 2.0 Flash (Recommended)",
                },
                ModelInfo {
                    id: "gemini-2.5-pro-exp-03-25",
                    label: "Gemini 2.5 Pro",
                },
            ],
        }
    }
}

/// A model listing entry.
#[derive(Debug, Clone, Copy)]
pub struct ModelInfo {
    pub id: &'static str,
    pub label: &'static str,
}

/// The seam the session dispatches through. Implemented by the real
/// clients and by test stubs.
#[async_trait]
pub trait ChatProvider: Send + Sync {
    /// Sends the conversation plus one new user message; the reply arrives
    /// as a stream of normalized events.
    async fn send_message_stream(
        &self,
        history: &[ConversationTurn],
        system: Option<&str>,
        message: &str,
    ) -> Result<ProviderStream>;
}

/// Concrete provider client, selected from config.
pub enum ChatClient {
    OpenAI(openai::OpenAIClient),
    Anthropic(anthropic::AnthropicClient),
    Gemini(gemini::GeminiClient),
}

impl ChatClient {
    /// Builds the client for the configured service and model.
    ///
    /// # Errors
    /// Returns an error if the service id is unknown or no API key is
    /// available for it.
    pub fn from_config(config: &Config) -> Result<Self> {
        let service = ServiceKind::from_id(&config.service)?;
        let model = config
            .model
            .clone()
            .unwrap_or_else(|| service.default_model().to_string());

        match service {
            ServiceKind::OpenAI => {
                let provider = &config.providers.openai;
                Ok(ChatClient::OpenAI(openai::OpenAIClient::new(
                    openai::OpenAIConfig::resolve(
                        provider.api_key.as_deref(),
                        provider.base_url.as_deref(),
                        model,
                        config.max_tokens,
                    )?,
                )))
            }
            ServiceKind::Anthropic => {
                let provider = &config.providers.anthropic;
                Ok(ChatClient::Anthropic(anthropic::AnthropicClient::new(
                    anthropic::AnthropicConfig::resolve(
                        provider.api_key.as_deref(),
                        provider.base_url.as_deref(),
                        model,
                        config.max_tokens,
                    )?,
                )))
            }
            ServiceKind::Gemini => {
                let provider = &config.providers.gemini;
                Ok(ChatClient::Gemini(gemini::GeminiClient::new(
                    gemini::GeminiConfig::resolve(
                        provider.api_key.as_deref(),
                        provider.base_url.as_deref(),
                        model,
                        config.max_tokens,
                    )?,
                )))
            }
        }
    }
}

#[async_trait]
impl ChatProvider for ChatClient {
    async fn send_message_stream(
        &self,
        history: &[ConversationTurn],
        system: Option<&str>,
        message: &str,
    ) -> Result<ProviderStream> {
        match self {
            ChatClient::OpenAI(client) => client.send_message_stream(history, system, message).await,
            ChatClient::Anthropic(client) => {
                client.send_message_stream(history, system, message).await
            }
            ChatClient::Gemini(client) => client.send_message_stream(history, system, message).await,
        }
    }
}
