//! One chat session: dispatches turns, settles them, owns the history.

use anyhow::Result;
use futures_util::StreamExt;

use crate::classify::{ClassifiedError, classify};
use crate::history::ConversationHistory;
use crate::providers::gemini::NON_FATAL_FINISH_REASONS;
use crate::providers::{ChatProvider, StreamEvent};

/// Pure markdown-to-terminal renderer, injected at construction.
pub type Renderer = Box<dyn Fn(&str) -> String + Send + Sync>;

/// Where a turn's output goes while it is in flight.
pub trait TurnDisplay {
    /// A live text fragment arrived.
    fn on_fragment(&mut self, text: &str);

    /// The turn succeeded. `rendered` is the formatted full reply;
    /// `streamed_live` is true when fragments were already shown.
    fn on_reply(&mut self, rendered: &str, streamed_live: bool);

    /// A non-fatal condition worth telling the user about.
    fn on_warning(&mut self, message: &str);
}

/// How a turn resolved. The session survives all three.
#[derive(Debug)]
pub enum TurnOutcome {
    /// Reply received and recorded.
    Succeeded,
    /// Message was blank; nothing was dispatched or recorded.
    Rejected,
    /// Dispatch or streaming failed; only the user message was recorded.
    Failed(ClassifiedError),
}

/// A chat session over one provider.
///
/// Turns are strictly sequential: `process_turn` holds `&mut self` for the
/// whole dispatch, so a second turn cannot start until the first settles.
pub struct Session<P> {
    provider: P,
    system_prompt: Option<String>,
    history: ConversationHistory,
    render: Renderer,
}

impl<P: ChatProvider> Session<P> {
    pub fn new(provider: P, system_prompt: Option<String>, render: Renderer) -> Self {
        Self {
            provider,
            system_prompt,
            history: ConversationHistory::new(),
            render,
        }
    }

    pub fn history(&self) -> &ConversationHistory {
        &self.history
    }

    /// Runs one turn to completion.
    ///
    /// On success the user message and the full reply are appended to the
    /// history, in that order, and the renderer runs once on the reply.
    /// On failure only the user message is appended; the error comes back
    /// classified and the session remains usable.
    pub async fn process_turn(
        &mut self,
        message: &str,
        display: &mut dyn TurnDisplay,
    ) -> TurnOutcome {
        if message.trim().is_empty() {
            return TurnOutcome::Rejected;
        }

        match self.run_dispatch(message, display).await {
            Ok(reply) => {
                self.history.push_user(message);
                self.history.push_assistant(reply);
                TurnOutcome::Succeeded
            }
            Err(error) => {
                let classified = classify(&error);
                tracing::warn!(kind = ?classified.kind, error = %classified.message, "turn failed");
                self.history.push_user(message);
                TurnOutcome::Failed(classified)
            }
        }
    }

    /// Dispatches the message and drains the reply stream. Returns the full
    /// reply text; the history is untouched here.
    async fn run_dispatch(
        &mut self,
        message: &str,
        display: &mut dyn TurnDisplay,
    ) -> Result<String> {
        let mut stream = self
            .provider
            .send_message_stream(self.history.turns(), self.system_prompt.as_deref(), message)
            .await?;

        let mut accumulated = String::new();
        let mut streamed_live = false;
        let mut settled: Option<(Option<String>, Option<String>)> = None;

        while let Some(item) = stream.next().await {
            match item? {
                StreamEvent::TextDelta(text) => {
                    accumulated.push_str(&text);
                    streamed_live = true;
                    display.on_fragment(&text);
                }
                StreamEvent::Completed { stop_reason, text } => {
                    settled = Some((stop_reason, text));
                    break;
                }
            }
        }

        let (stop_reason, full_text) = settled.unwrap_or((None, None));
        let reply = full_text.unwrap_or(accumulated);

        // A terminal with no text at all fails the turn rather than
        // recording an empty assistant entry.
        if reply.is_empty() {
            return Err(match stop_reason {
                Some(reason) => anyhow::anyhow!("No reply received (finish reason: {reason})"),
                None => anyhow::anyhow!("No reply received from the provider"),
            });
        }

        if let Some(reason) = stop_reason.as_deref()
            && NON_FATAL_FINISH_REASONS.contains(&reason)
        {
            tracing::warn!(reason, "reply ended early");
            display.on_warning(&format!("Response ended early (finish reason: {reason})"));
        }

        let rendered = (self.render)(&reply);
        display.on_reply(&rendered, streamed_live);

        Ok(reply)
    }
}
