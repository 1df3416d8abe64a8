//! Model allow-listing by credential class

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::core::errors::{GatewayError, Result};

/// Models usable with the shared service credential
pub const RESTRICTED_MODELS: &[&str] = &[
    "gemini-2.0-flash",
    "gemini-2.5-flash",
    "gemini-3-flash-preview",
];

/// Models that need the caller's own credential
pub const PRIVILEGED_MODELS: &[&str] = &["gemini-2.5-pro", "gemini-3-pro-preview"];

/// Which credential class a model belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelClass {
    Restricted,
    Privileged,
}

impl fmt::Display for ModelClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModelClass::Restricted => write!(f, "restricted"),
            ModelClass::Privileged => write!(f, "privileged"),
        }
    }
}

/// Unknown model names are privileged.
pub fn classify(model: &str) -> ModelClass {
    if RESTRICTED_MODELS.contains(&model) {
        ModelClass::Restricted
    } else {
        ModelClass::Privileged
    }
}

/// Holders of their own key may use any model; everyone else only restricted ones.
pub fn is_allowed(model: &str, is_privileged: bool) -> bool {
    is_privileged || classify(model) == ModelClass::Restricted
}

/// Reject a disallowed model before any upstream call is made
pub fn ensure_allowed(model: &str, is_privileged: bool) -> Result<()> {
    if is_allowed(model, is_privileged) {
        Ok(())
    } else {
        Err(GatewayError::ModelNotAllowed {
            model: model.to_string(),
        })
    }
}

pub fn default_model(is_privileged: bool) -> &'static str {
    if is_privileged {
        "gemini-2.5-pro"
    } else {
        "gemini-2.0-flash"
    }
}
