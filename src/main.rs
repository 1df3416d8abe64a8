//! Main entry point for the NonTechSpeak gateway CLI

#![forbid(unsafe_code)]

use clap::Parser;
use dotenvy::dotenv;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use nontechspeak_gateway::cli::commands::{self, Commands};

/// NonTechSpeak Gateway - rate limiting, credential selection and model gating
#[derive(Parser, Debug)]
#[command(name = "nontechspeak-gateway", version, about, long_about = None)]
struct Args {
    /// Shared Gemini API key (optional, defaults to GEMINI_API_KEY env var)
    #[arg(long)]
    api_key: Option<String>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenv().ok();

    let args = Args::parse();

    let debug = args.verbose || matches!(args.command, Some(Commands::Server { debug: true, .. }));
    let log_level = if debug {
        "debug".to_string()
    } else {
        std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string())
    };

    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .ok()
                .filter(|_| !debug)
                .unwrap_or_else(|| {
                    format!("{}={}", env!("CARGO_CRATE_NAME"), log_level).into()
                }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Override config with CLI args if provided
    if let Some(api_key) = args.api_key {
        std::env::set_var("GEMINI_API_KEY", api_key);
    }

    // Execute command
    match args.command {
        Some(Commands::Server { host, port, debug }) => {
            commands::handle_server(host, port, debug).await?;
        }
        Some(Commands::EncryptKey { key }) => {
            commands::handle_encrypt_key(key)?;
        }
        Some(Commands::CheckModel { model, privileged }) => {
            commands::handle_check_model(model, privileged)?;
        }
        None => {
            println!("Please specify a command. Use --help for more information.");
        }
    }

    Ok(())
}
