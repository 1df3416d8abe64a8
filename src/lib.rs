//! NonTechSpeak Gateway - AI request gating library
//!
//! This library decides whether an explanation request may reach the model,
//! which credential it uses and which models it may ask for, then reduces the
//! streamed reply to a single text. It also serves the HTTP API around it.

#![forbid(unsafe_code)]

pub mod cli;
pub mod core;
pub mod server;

// Re-export key types for convenience
pub use core::{
    aggregator::{aggregate, StreamChunk},
    client::{ChatModel, GeminiClient},
    config::GatewayConfig,
    credentials::{CredentialSelector, ResolvedCredential},
    errors::GatewayError,
    models::{AudienceType, Translation, TranslationRequest},
    ratelimit::{Pool, RateLimitDecision, RateLimiter},
    service::{RequestContext, TranslationGateway},
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
