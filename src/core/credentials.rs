//! Upstream credential selection
//!
//! A user's own stored key takes priority over the shared service key.
//! Lookup or decryption failures fall back to the shared key, the same
//! fail-open stance the rate limiter takes.

use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::core::crypto::CredentialCipher;
use crate::core::errors::Result;

/// Where encrypted per-user credentials are read from
#[async_trait]
pub trait CredentialSource: Send + Sync {
    async fn encrypted_credential(&self, user_id: &str) -> Result<Option<String>>;
}

/// An upstream API key. Never printed.
#[derive(Clone, PartialEq, Eq)]
pub struct ApiCredential(String);

impl ApiCredential {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for ApiCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ApiCredential(<redacted>)")
    }
}

/// Credential chosen for one request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedCredential {
    pub credential: ApiCredential,
    /// True when the key is the caller's own
    pub is_privileged: bool,
}

/// Picks the upstream key for a request
#[derive(Clone)]
pub struct CredentialSelector {
    source: Arc<dyn CredentialSource>,
    cipher: CredentialCipher,
    shared: ApiCredential,
}

impl CredentialSelector {
    pub fn new(
        source: Arc<dyn CredentialSource>,
        cipher: CredentialCipher,
        shared: ApiCredential,
    ) -> Self {
        Self {
            source,
            cipher,
            shared,
        }
    }

    /// Resolve the credential for an optional user
    pub async fn resolve(&self, user_id: Option<&str>) -> ResolvedCredential {
        if let Some(user_id) = user_id {
            match self.source.encrypted_credential(user_id).await {
                Ok(Some(envelope)) => match self.cipher.decrypt_blocking(&envelope).await {
                    Ok(key) if !key.is_empty() => {
                        debug!(user_id = %user_id, "Using user's own API key");
                        return ResolvedCredential {
                            credential: ApiCredential::new(key),
                            is_privileged: true,
                        };
                    }
                    Ok(_) => {
                        warn!(user_id = %user_id, "Stored API key decrypted to empty string, using shared key");
                    }
                    Err(e) => {
                        warn!(user_id = %user_id, "Failed to decrypt user API key, using shared key: {}", e);
                    }
                },
                Ok(None) => {}
                Err(e) => {
                    warn!(user_id = %user_id, "Failed to fetch user API key, using shared key: {}", e);
                }
            }
        }

        ResolvedCredential {
            credential: self.shared.clone(),
            is_privileged: false,
        }
    }

    pub fn cipher(&self) -> &CredentialCipher {
        &self.cipher
    }
}
