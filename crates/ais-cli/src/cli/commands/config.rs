//! `ais config` subcommands.

use ais_core::config::{Config, paths};
use ais_core::providers::ServiceKind;
use anyhow::Result;

/// Prints the config file path.
pub fn path() -> Result<()> {
    println!("{}", paths::config_path().display());
    Ok(())
}

/// Creates the default config file.
pub fn init() -> Result<()> {
    let config_path = paths::config_path();
    Config::init(&config_path)?;
    println!("Created config at {}", config_path.display());
    Ok(())
}

/// Shows the active configuration. API keys are reported as set or unset,
/// never printed.
pub fn show(config: &Config) -> Result<()> {
    let service = ServiceKind::from_id(&config.service)?;
    let model = config
        .model
        .clone()
        .unwrap_or_else(|| service.default_model().to_string());

    println!("Config file: {}", paths::config_path().display());
    println!("Service:     {}", service.label());
    println!("Model:       {model}");

    let key_source = key_source(config, service);
    println!("API key:     {key_source}");

    match config.effective_system_prompt()? {
        Some(prompt) => println!("System prompt: {} chars", prompt.len()),
        None => println!("System prompt: (none)"),
    }
    if let Some(max_tokens) = config.max_tokens {
        println!("Max tokens:  {max_tokens}");
    }
    Ok(())
}

fn key_source(config: &Config, service: ServiceKind) -> &'static str {
    let provider = match service {
        ServiceKind::OpenAI => &config.providers.openai,
        ServiceKind::Anthropic => &config.providers.anthropic,
        ServiceKind::Gemini => &config.providers.gemini,
    };
    let has_config_key = provider
        .api_key
        .as_deref()
        .is_some_and(|k| !k.trim().is_empty());
    if has_config_key {
        "set (config file)"
    } else if std::env::var(service.api_key_env_var()).is_ok_and(|v| !v.trim().is_empty()) {
        "set (environment)"
    } else {
        "NOT SET"
    }
}

/// Deletes the config file.
pub fn clear() -> Result<()> {
    let config_path = paths::config_path();
    if Config::clear(&config_path)? {
        println!("Removed config at {}", config_path.display());
    } else {
        println!("No config file at {}", config_path.display());
    }
    Ok(())
}
