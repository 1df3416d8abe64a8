//! Configuration management

use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{info, warn};

use crate::core::ratelimit::{Pool, PoolLimits};

/// Configuration for the gateway
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Shared upstream credential used when a user has no key of their own
    pub shared_api_key: String,
    /// Secret that per-user stored credentials are encrypted under
    pub encryption_secret: String,
    pub api_endpoint: String,
    /// Counter store location; the in-memory store is used when unset
    pub redis_url: Option<String>,
    pub rate_limit_prefix: String,
    pub window_secs: u64,
    pub limits: PoolLimits,
    pub upstream_timeout_ms: u64,
    pub min_input_chars: usize,
    pub max_input_chars: usize,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            shared_api_key: String::new(),
            encryption_secret: String::new(),
            api_endpoint: DEFAULT_ENDPOINT.to_string(),
            redis_url: None,
            rate_limit_prefix: "@ratelimit".to_string(),
            window_secs: 60,
            limits: PoolLimits::default(),
            upstream_timeout_ms: 60_000,
            min_input_chars: 10,
            max_input_chars: 5000,
        }
    }
}

const DEFAULT_ENDPOINT: &str = "https://generativelanguage.googleapis.com/v1beta";

impl GatewayConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> anyhow::Result<Self> {
        let shared_api_key = std::env::var("GEMINI_API_KEY")
            .or_else(|_| std::env::var("GOOGLE_AI_API_KEY"))
            .map_err(|_| anyhow::anyhow!("GEMINI_API_KEY environment variable is required"))?;

        let encryption_secret = Self::encryption_secret_from_env()?;

        let api_endpoint =
            std::env::var("GEMINI_API_ENDPOINT").unwrap_or_else(|_| DEFAULT_ENDPOINT.to_string());

        let redis_url = std::env::var("REDIS_URL").ok().filter(|url| !url.is_empty());

        let rate_limit_prefix =
            std::env::var("RATE_LIMIT_PREFIX").unwrap_or_else(|_| "@ratelimit".to_string());

        let window_secs = std::env::var("RATE_LIMIT_WINDOW_SECS")
            .unwrap_or_else(|_| "60".to_string())
            .parse::<u64>()?;

        let defaults = PoolLimits::default();
        let limits = PoolLimits {
            general: env_or("RATE_LIMIT_GENERAL", defaults.general)?,
            translation: env_or("RATE_LIMIT_TRANSLATION", defaults.translation)?,
            practice: env_or("RATE_LIMIT_PRACTICE", defaults.practice)?,
            public: env_or("RATE_LIMIT_PUBLIC", defaults.public)?,
        };

        let upstream_timeout_ms = std::env::var("UPSTREAM_TIMEOUT_MS")
            .unwrap_or_else(|_| "60000".to_string())
            .parse::<u64>()?;

        let max_input_chars = std::env::var("MAX_INPUT_CHARS")
            .unwrap_or_else(|_| "5000".to_string())
            .parse::<usize>()?;

        Ok(Self {
            shared_api_key,
            encryption_secret,
            api_endpoint,
            redis_url,
            rate_limit_prefix,
            window_secs,
            limits,
            upstream_timeout_ms,
            max_input_chars,
            ..Default::default()
        })
    }

    /// Credential encryption secret, falling back to the auth secret
    pub fn encryption_secret_from_env() -> anyhow::Result<String> {
        std::env::var("ENCRYPTION_SECRET")
            .or_else(|_| std::env::var("BETTER_AUTH_SECRET"))
            .map_err(|_| anyhow::anyhow!("ENCRYPTION_SECRET environment variable is required"))
    }

    /// Load and validate configuration from the environment
    pub fn load() -> anyhow::Result<Self> {
        let config = Self::from_env()?;
        config.validate()?;

        info!(
            general = config.limits.general,
            translation = config.limits.translation,
            practice = config.limits.practice,
            public = config.limits.public,
            window_secs = config.window_secs,
            "Loaded rate limit pools"
        );

        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.encryption_secret.is_empty() {
            return Err(anyhow::anyhow!("Encryption secret is required"));
        }

        if self.shared_api_key.is_empty() {
            warn!("No shared API key configured, only users with their own key can translate");
        }

        if self.api_endpoint.is_empty() {
            return Err(anyhow::anyhow!("API endpoint is required"));
        }

        if self.window_secs == 0 {
            return Err(anyhow::anyhow!("window_secs must be greater than 0"));
        }

        for pool in Pool::ALL {
            if self.limits.get(pool) == 0 {
                return Err(anyhow::anyhow!("{} pool limit must be greater than 0", pool));
            }
        }

        if self.min_input_chars > self.max_input_chars {
            return Err(anyhow::anyhow!("min_input_chars exceeds max_input_chars"));
        }

        Ok(())
    }

    /// Rolling window shared by every pool
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }

    /// Upper bound on a single upstream model call
    pub fn upstream_timeout(&self) -> Duration {
        Duration::from_millis(self.upstream_timeout_ms)
    }
}

fn env_or(key: &str, default: u32) -> anyhow::Result<u32> {
    match std::env::var(key) {
        Ok(value) => Ok(value.parse::<u32>()?),
        Err(_) => Ok(default),
    }
}
