//! Credential vault.
//!
//! Platform credentials are sealed with AES-256-GCM before they are persisted. The key is the
//! SHA-256 digest of an operator-supplied secret and is never written anywhere. Envelopes are
//! self-describing:
//!
//! ```text
//! v1:aes-256-gcm:<base64 iv>:<base64 tag>:<base64 ciphertext>
//! ```
//!
//! When no usable secret is configured the vault is disabled; [`Vault::seal`] then keeps the
//! plaintext and logs a warning so dev and test setups keep working.

use std::fmt;

use aes_gcm::{
    Aes256Gcm, Nonce,
    aead::{Aead, KeyInit, OsRng, rand_core::RngCore as _},
};
use base64::{Engine as _, engine::general_purpose::STANDARD as B64};
use csd_core::StoredCredential;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::warn;

pub const VAULT_SECRET_ENV: &str = "CREDENTIAL_SECRET";
pub const MIN_SECRET_LEN: usize = 10;

const ENVELOPE_VERSION: &str = "v1";
const ENVELOPE_ALGORITHM: &str = "aes-256-gcm";
const IV_BYTES: usize = 12;
const TAG_BYTES: usize = 16;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum VaultError {
    #[error("vault is disabled: no secret of at least {MIN_SECRET_LEN} characters configured")]
    Disabled,
    #[error("envelope is malformed")]
    Malformed,
    #[error("unsupported envelope version or algorithm")]
    UnsupportedVersion,
    #[error("envelope failed authentication")]
    Authentication,
    #[error("encryption failed")]
    Encryption,
}

/// Symmetric vault for credentials at rest.
#[derive(Clone)]
pub struct Vault {
    key: Option<[u8; 32]>,
}

impl fmt::Debug for Vault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Vault")
            .field("enabled", &self.is_enabled())
            .finish()
    }
}

impl Vault {
    /// Builds a vault from a secret. Secrets shorter than [`MIN_SECRET_LEN`] disable it.
    pub fn new(secret: Option<&str>) -> Self {
        let key = secret
            .filter(|s| s.chars().count() >= MIN_SECRET_LEN)
            .map(|s| {
                let mut key = [0u8; 32];
                key.copy_from_slice(&Sha256::digest(s.as_bytes()));
                key
            });
        Self { key }
    }

    pub fn disabled() -> Self {
        Self { key: None }
    }

    pub fn from_env() -> Self {
        let secret = std::env::var(VAULT_SECRET_ENV).ok();
        let vault = Self::new(secret.as_deref());
        if !vault.is_enabled() {
            warn!(
                env = VAULT_SECRET_ENV,
                "credential vault disabled; credentials will be stored in plaintext"
            );
        }
        vault
    }

    pub fn is_enabled(&self) -> bool {
        self.key.is_some()
    }

    fn cipher(&self) -> Result<Aes256Gcm, VaultError> {
        let key = self.key.as_ref().ok_or(VaultError::Disabled)?;
        Aes256Gcm::new_from_slice(key).map_err(|_| VaultError::Encryption)
    }

    pub fn try_encrypt(&self, plaintext: &str) -> Result<String, VaultError> {
        let cipher = self.cipher()?;
        let mut iv = [0u8; IV_BYTES];
        OsRng.fill_bytes(&mut iv);
        let mut sealed = cipher
            .encrypt(Nonce::from_slice(&iv), plaintext.as_bytes())
            .map_err(|_| VaultError::Encryption)?;
        let tag = sealed.split_off(sealed.len() - TAG_BYTES);
        Ok(format!(
            "{ENVELOPE_VERSION}:{ENVELOPE_ALGORITHM}:{}:{}:{}",
            B64.encode(iv),
            B64.encode(tag),
            B64.encode(sealed)
        ))
    }

    pub fn try_decrypt(&self, envelope: &str) -> Result<String, VaultError> {
        let cipher = self.cipher()?;
        let parts: Vec<&str> = envelope.split(':').collect();
        let [version, algorithm, iv, tag, ciphertext] = parts.as_slice() else {
            return Err(VaultError::Malformed);
        };
        if *version != ENVELOPE_VERSION || *algorithm != ENVELOPE_ALGORITHM {
            return Err(VaultError::UnsupportedVersion);
        }
        let iv = B64.decode(iv).map_err(|_| VaultError::Malformed)?;
        let tag = B64.decode(tag).map_err(|_| VaultError::Malformed)?;
        let mut payload = B64.decode(ciphertext).map_err(|_| VaultError::Malformed)?;
        if iv.len() != IV_BYTES || tag.len() != TAG_BYTES {
            return Err(VaultError::Malformed);
        }
        payload.extend_from_slice(&tag);
        let plaintext = cipher
            .decrypt(Nonce::from_slice(&iv), payload.as_slice())
            .map_err(|_| VaultError::Authentication)?;
        String::from_utf8(plaintext).map_err(|_| VaultError::Malformed)
    }

    /// Encrypts `plaintext`, or `None` when the vault is disabled.
    pub fn encrypt(&self, plaintext: &str) -> Option<String> {
        self.try_encrypt(plaintext).ok()
    }

    /// Decrypts an envelope. Every failure collapses to `None`.
    pub fn decrypt(&self, envelope: &str) -> Option<String> {
        self.try_decrypt(envelope).ok()
    }

    /// Prepares a credential for persistence, keeping plaintext when the vault is disabled.
    pub fn seal(&self, plaintext: &str) -> StoredCredential {
        match self.try_encrypt(plaintext) {
            Ok(envelope) => StoredCredential::Encrypted(envelope),
            Err(err) => {
                warn!(error = %err, "storing credential without encryption");
                StoredCredential::Plaintext(plaintext.to_string())
            }
        }
    }

    /// Recovers a stored credential. `None` means the value is unavailable.
    pub fn reveal(&self, stored: &StoredCredential) -> Option<String> {
        match stored {
            StoredCredential::Plaintext(value) => Some(value.clone()),
            StoredCredential::Encrypted(envelope) => match self.try_decrypt(envelope) {
                Ok(value) => Some(value),
                Err(err) => {
                    warn!(error = %err, "stored credential could not be decrypted");
                    None
                }
            },
        }
    }
}
