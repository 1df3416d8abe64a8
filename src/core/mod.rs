//! Core gating engine module

pub mod aggregator;
pub mod client;
pub mod config;
pub mod credentials;
pub mod crypto;
pub mod errors;
pub mod identifier;
pub mod model_gate;
pub mod models;
pub mod prompts;
pub mod ratelimit;
pub mod repository;
pub mod service;
pub mod votes;
