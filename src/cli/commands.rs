//! CLI command definitions and handlers

use clap::Subcommand;

use crate::core::config::GatewayConfig;
use crate::core::crypto::CredentialCipher;
use crate::core::model_gate::{classify, default_model, is_allowed};

/// Commands for the NonTechSpeak gateway
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start HTTP API server
    Server {
        /// Bind address (default: 0.0.0.0)
        #[arg(long, default_value = "0.0.0.0")]
        host: String,

        /// Listen port (default: 8000)
        #[arg(short, long, default_value_t = 8000)]
        port: u16,

        /// Enable debug mode
        #[arg(long)]
        debug: bool,
    },

    /// Encrypt an upstream API key the way it is stored for users
    EncryptKey {
        /// Plaintext API key
        key: String,
    },

    /// Check whether a model may be used with or without the caller's own key
    CheckModel {
        /// Model name, e.g. gemini-2.5-pro
        model: String,

        /// Check as a caller with their own key
        #[arg(long)]
        privileged: bool,
    },
}

/// Handle server command
pub async fn handle_server(host: String, port: u16, debug: bool) -> anyhow::Result<()> {
    use crate::server::api::run_server;
    use tracing::info;

    let debug_mode = debug;
    info!(debug = debug_mode, "Starting HTTP server on {}:{}", host, port);
    println!("🚀 Server starting on http://{}:{}", host, port);
    println!("📄 OpenAPI document: http://{}:{}/api-docs/openapi.json", host, port);

    run_server(host, port).await?;

    Ok(())
}

/// Handle encrypt-key command
pub fn handle_encrypt_key(key: String) -> anyhow::Result<()> {
    let secret = GatewayConfig::encryption_secret_from_env()?;
    let cipher = CredentialCipher::new(secret)?;
    let envelope = cipher.encrypt(key.trim())?;

    println!("{}", envelope);

    Ok(())
}

/// Describe a model gate decision
pub fn describe_model(model: &str, privileged: bool) -> String {
    let class = classify(model);
    let verdict = if is_allowed(model, privileged) {
        "allowed"
    } else {
        "rejected"
    };
    let caller = if privileged {
        "own API key"
    } else {
        "shared API key"
    };

    format!(
        "{} ({}) is {} with {}; default for this caller is {}",
        model,
        class,
        verdict,
        caller,
        default_model(privileged)
    )
}

/// Handle check-model command
pub fn handle_check_model(model: String, privileged: bool) -> anyhow::Result<()> {
    println!("{}", describe_model(&model, privileged));

    if !is_allowed(&model, privileged) {
        anyhow::bail!("model '{}' requires the caller's own API key", model);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Parser, Debug)]
    struct Cli {
        #[command(subcommand)]
        command: Commands,
    }

    #[test]
    fn test_parse_server_defaults() {
        let cli = Cli::parse_from(["gateway", "server"]);
        match cli.command {
            Commands::Server { host, port, debug } => {
                assert_eq!(host, "0.0.0.0");
                assert_eq!(port, 8000);
                assert!(!debug);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_parse_check_model() {
        let cli = Cli::parse_from(["gateway", "check-model", "gemini-2.5-pro", "--privileged"]);
        match cli.command {
            Commands::CheckModel { model, privileged } => {
                assert_eq!(model, "gemini-2.5-pro");
                assert!(privileged);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_describe_model() {
        let shared = describe_model("gemini-2.5-pro", false);
        assert!(shared.contains("privileged"));
        assert!(shared.contains("rejected"));
        assert!(shared.ends_with("gemini-2.0-flash"));

        let own = describe_model("gemini-2.5-pro", true);
        assert!(own.contains("allowed"));

        assert!(handle_check_model("gemini-2.0-flash".to_string(), false).is_ok());
        assert!(handle_check_model("gemini-3-pro-preview".to_string(), false).is_err());
    }

    #[tokio::test]
    async fn test_server_with_debug_reports_bad_address() {
        let result = handle_server("not a host".to_string(), 0, true).await;
        assert!(result.is_err());
    }
}
