//! Default command: interactive chat.

use ais_core::config::Config;
use ais_core::providers::{ChatClient, ServiceKind};
use ais_core::session::Session;
use ais_core::{interrupt, version_check};
use anyhow::Result;

use crate::markdown;
use crate::modes;

/// Builds the session and enters the chat loop.
pub async fn run(config: &Config, initial_prompt: Option<String>) -> Result<()> {
    let service = ServiceKind::from_id(&config.service)?;
    let model = config
        .model
        .clone()
        .unwrap_or_else(|| service.default_model().to_string());

    let client = ChatClient::from_config(config)?;
    let system_prompt = config.effective_system_prompt()?;
    let mut session = Session::new(client, system_prompt, Box::new(markdown::render));

    version_check::spawn(env!("CARGO_PKG_VERSION"));

    // Both the Ctrl+C and the EOF exit paths run this.
    interrupt::set_exit_hook(|| {
        println!("\nGoodbye!");
        if let Some(notice) = version_check::take_notice() {
            println!("{notice}");
        }
    });

    println!("Chatting with {} ({model}).", service.label());
    println!("Press Ctrl+C to exit. Press Enter on an empty line to compose in your editor.");

    modes::chat::run(&mut session, initial_prompt).await?;

    interrupt::run_exit_hook();
    Ok(())
}
