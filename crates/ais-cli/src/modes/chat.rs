//! Interactive chat loop: terminal line input with an editor escape hatch.

use std::io::{self, BufRead, Write};

use ais_core::providers::ChatProvider;
use ais_core::session::{Session, TurnDisplay, TurnOutcome};
use anyhow::Result;

use crate::editor;

/// Full trim: a line of only whitespace counts as empty and routes to the
/// editor instead of silently dispatching nothing.
fn normalized(line: &str) -> &str {
    line.trim()
}

/// Prints replies straight to the terminal.
struct TerminalDisplay;

impl TurnDisplay for TerminalDisplay {
    fn on_fragment(&mut self, text: &str) {
        print!("{text}");
        let _ = io::stdout().flush();
    }

    fn on_reply(&mut self, rendered: &str, streamed_live: bool) {
        if streamed_live {
            // Fragments were the display; just close the line.
            println!();
        } else {
            println!("{rendered}");
        }
    }

    fn on_warning(&mut self, message: &str) {
        eprintln!("Warning: {message}");
    }
}

/// Runs the chat loop until stdin closes.
///
/// An empty line opens the external editor; whatever it produces (if
/// anything) becomes the message. Whitespace-only input never dispatches.
pub async fn run<P: ChatProvider>(
    session: &mut Session<P>,
    initial_prompt: Option<String>,
) -> Result<()> {
    let stdin = io::stdin();
    let mut pending = initial_prompt;

    loop {
        let message = match pending.take() {
            Some(prompt) => {
                println!("You: {prompt}");
                prompt
            }
            None => {
                print!("You: ");
                io::stdout().flush()?;

                let mut line = String::new();
                if stdin.lock().read_line(&mut line)? == 0 {
                    // EOF
                    return Ok(());
                }

                let line = normalized(&line).to_string();
                if line.is_empty() {
                    match editor::compose() {
                        Ok(text) if text.is_empty() => {
                            println!("(empty message, nothing sent)");
                            continue;
                        }
                        Ok(text) => {
                            println!("You: {text}");
                            text
                        }
                        Err(e) => {
                            tracing::warn!(error = %e, "editor input failed");
                            eprintln!("Could not get input from editor: {e:#}");
                            continue;
                        }
                    }
                } else {
                    line
                }
            }
        };

        let mut display = TerminalDisplay;
        match session.process_turn(&message, &mut display).await {
            TurnOutcome::Succeeded => {
                println!();
            }
            TurnOutcome::Rejected => {}
            TurnOutcome::Failed(error) => {
                eprintln!("{error}");
                eprintln!("{}", error.remediation());
                eprintln!("The session is still active; you can keep chatting.");
                println!();
            }
        }
    }
}
