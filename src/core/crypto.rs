//! Credential-at-rest encryption
//!
//! Per-user API keys are stored as `base64(salt ‖ nonce ‖ tag ‖ ciphertext)`.
//! The AES-256-GCM key is derived from the server secret with
//! PBKDF2-HMAC-SHA512 over a fresh random salt for every envelope.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use ring::aead::{Aad, LessSafeKey, Nonce, UnboundKey, AES_256_GCM, NONCE_LEN};
use ring::pbkdf2;
use ring::rand::{SecureRandom, SystemRandom};
use std::fmt;
use std::num::NonZeroU32;

use crate::core::errors::{GatewayError, Result};

const SALT_LEN: usize = 64;
const TAG_LEN: usize = 16;
const KEY_LEN: usize = 32;
const TAG_POSITION: usize = SALT_LEN + NONCE_LEN;
const ENCRYPTED_POSITION: usize = TAG_POSITION + TAG_LEN;
const DEFAULT_ITERATIONS: u32 = 100_000;

/// Encrypts and decrypts stored upstream credentials
#[derive(Clone)]
pub struct CredentialCipher {
    secret: String,
    iterations: NonZeroU32,
    rng: SystemRandom,
}

impl fmt::Debug for CredentialCipher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialCipher")
            .field("secret", &"<redacted>")
            .field("iterations", &self.iterations)
            .finish()
    }
}

impl CredentialCipher {
    pub fn new(secret: impl Into<String>) -> Result<Self> {
        let secret = secret.into();
        if secret.is_empty() {
            return Err(GatewayError::ConfigError {
                message: "encryption secret must be set".to_string(),
            });
        }

        let iterations = NonZeroU32::new(DEFAULT_ITERATIONS)
            .ok_or_else(|| crypto_error("iteration count must be non-zero"))?;

        Ok(Self {
            secret,
            iterations,
            rng: SystemRandom::new(),
        })
    }

    /// Override the key-derivation work factor
    pub fn with_iterations(mut self, iterations: NonZeroU32) -> Self {
        self.iterations = iterations;
        self
    }

    /// Encrypt a plaintext credential into a storage envelope
    pub fn encrypt(&self, plain_text: &str) -> Result<String> {
        if plain_text.is_empty() {
            return Err(crypto_error("cannot encrypt empty string"));
        }

        let mut salt = [0u8; SALT_LEN];
        let mut nonce = [0u8; NONCE_LEN];
        self.rng
            .fill(&mut salt)
            .map_err(|_| crypto_error("failed to generate salt"))?;
        self.rng
            .fill(&mut nonce)
            .map_err(|_| crypto_error("failed to generate nonce"))?;

        let key = self.derive_key(&salt)?;
        let mut in_out = plain_text.as_bytes().to_vec();
        let tag = key
            .seal_in_place_separate_tag(Nonce::assume_unique_for_key(nonce), Aad::empty(), &mut in_out)
            .map_err(|_| crypto_error("encryption failed"))?;

        let mut combined = Vec::with_capacity(ENCRYPTED_POSITION + in_out.len());
        combined.extend_from_slice(&salt);
        combined.extend_from_slice(&nonce);
        combined.extend_from_slice(tag.as_ref());
        combined.extend_from_slice(&in_out);

        Ok(STANDARD.encode(combined))
    }

    /// Decrypt a storage envelope back into the plaintext credential
    pub fn decrypt(&self, envelope: &str) -> Result<String> {
        if envelope.is_empty() {
            return Err(crypto_error("cannot decrypt empty string"));
        }

        let combined = STANDARD
            .decode(envelope)
            .map_err(|e| crypto_error(format!("invalid envelope encoding: {}", e)))?;

        if combined.len() < ENCRYPTED_POSITION {
            return Err(crypto_error("envelope too short"));
        }

        let salt = &combined[..SALT_LEN];
        let mut nonce = [0u8; NONCE_LEN];
        nonce.copy_from_slice(&combined[SALT_LEN..TAG_POSITION]);
        let tag = &combined[TAG_POSITION..ENCRYPTED_POSITION];

        // ring expects ciphertext ‖ tag
        let mut in_out = combined[ENCRYPTED_POSITION..].to_vec();
        in_out.extend_from_slice(tag);

        let key = self.derive_key(salt)?;
        let plain = key
            .open_in_place(Nonce::assume_unique_for_key(nonce), Aad::empty(), &mut in_out)
            .map_err(|_| crypto_error("authentication failed"))?;

        String::from_utf8(plain.to_vec()).map_err(|_| crypto_error("plaintext is not UTF-8"))
    }

    /// `encrypt` on the blocking pool. Key derivation is CPU bound.
    pub async fn encrypt_blocking(&self, plain_text: &str) -> Result<String> {
        let cipher = self.clone();
        let plain_text = plain_text.to_string();
        tokio::task::spawn_blocking(move || cipher.encrypt(&plain_text))
            .await
            .map_err(|e| GatewayError::InternalError(format!("cipher task failed: {}", e)))?
    }

    /// `decrypt` on the blocking pool
    pub async fn decrypt_blocking(&self, envelope: &str) -> Result<String> {
        let cipher = self.clone();
        let envelope = envelope.to_string();
        tokio::task::spawn_blocking(move || cipher.decrypt(&envelope))
            .await
            .map_err(|e| GatewayError::InternalError(format!("cipher task failed: {}", e)))?
    }

    fn derive_key(&self, salt: &[u8]) -> Result<LessSafeKey> {
        let mut key_bytes = [0u8; KEY_LEN];
        pbkdf2::derive(
            pbkdf2::PBKDF2_HMAC_SHA512,
            self.iterations,
            salt,
            self.secret.as_bytes(),
            &mut key_bytes,
        );

        let unbound = UnboundKey::new(&AES_256_GCM, &key_bytes)
            .map_err(|_| crypto_error("invalid derived key"))?;
        Ok(LessSafeKey::new(unbound))
    }
}

/// Cheap shape check: base64 that decodes to at least a full header
pub fn is_encrypted(data: &str) -> bool {
    STANDARD
        .decode(data)
        .map(|decoded| decoded.len() >= ENCRYPTED_POSITION)
        .unwrap_or(false)
}

fn crypto_error(message: impl Into<String>) -> GatewayError {
    GatewayError::Crypto {
        message: message.into(),
    }
}
