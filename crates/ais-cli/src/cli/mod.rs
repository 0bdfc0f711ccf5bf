//! CLI entry and dispatch.

use anyhow::{Context, Result};
use ais_core::{config, interrupt};
use clap::Parser;
use tracing_subscriber::EnvFilter;

mod commands;

#[derive(Parser)]
#[command(name = "ais")]
#[command(version)]
#[command(about = "Interact with AI services from the terminal")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Optional first message; the interactive chat continues after it
    #[arg(value_name = "PROMPT")]
    prompt: Vec<String>,

    /// Override the model from config
    #[arg(short, long, global = true)]
    model: Option<String>,

    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(clap::Subcommand)]
enum Commands {
    /// Manage configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },

    /// List supported services and models
    Models,
}

#[derive(clap::Subcommand)]
enum ConfigCommands {
    /// Show the path to the config file
    Path,
    /// Initialize a default config file (if not present)
    Init,
    /// Show the active configuration (never prints API keys)
    Show,
    /// Delete the config file
    Clear,
}

pub fn run() -> Result<()> {
    let cli = Cli::parse();

    init_logging(cli.verbose);
    interrupt::init();

    // one tokio runtime for everything
    let rt = tokio::runtime::Runtime::new().context("create tokio runtime")?;

    rt.block_on(async move { dispatch(cli).await })
}

fn init_logging(verbose: u8) {
    let filter = match verbose {
        0 => EnvFilter::new("warn"),
        1 => EnvFilter::new("info"),
        2 => EnvFilter::new("debug"),
        _ => EnvFilter::new("trace"),
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

async fn dispatch(cli: Cli) -> Result<()> {
    let mut config = config::Config::load().context("load config")?;

    if let Some(model) = cli.model {
        config.model = Some(model);
    }

    // default to chat mode
    let Some(command) = cli.command else {
        let initial_prompt = if cli.prompt.is_empty() {
            None
        } else {
            Some(cli.prompt.join(" "))
        };
        return commands::chat::run(&config, initial_prompt).await;
    };

    match command {
        Commands::Config { command } => match command {
            ConfigCommands::Path => commands::config::path(),
            ConfigCommands::Init => commands::config::init(),
            ConfigCommands::Show => commands::config::show(&config),
            ConfigCommands::Clear => commands::config::clear(),
        },

        Commands::Models => commands::models::list(),
    }
}
