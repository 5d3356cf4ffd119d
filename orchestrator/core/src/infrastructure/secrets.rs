// Copyright (c) 2026 Switchyard Contributors
// SPDX-License-Identifier: AGPL-3.0
//! # Tool Environment Sealing
//!
//! Custom tool environment variables are stored encrypted with AES-256-GCM.
//! A sealed blob is `base64(nonce || ciphertext)` over the JSON encoding of
//! the variable map, with a fresh random nonce per seal.

use std::collections::HashMap;

use aes_gcm::aead::{rand_core::RngCore, Aead, OsRng};
use aes_gcm::{Aes256Gcm, KeyInit, Nonce};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use tracing::warn;

use crate::domain::node_config::resolve_secret;
use crate::domain::tool::SealedEnv;

const NONCE_SIZE: usize = 12;
const KEY_SIZE: usize = 32;

#[derive(Debug, thiserror::Error)]
pub enum SecretsError {
    #[error("Invalid sealing key: {0}")]
    InvalidKey(String),

    #[error("Encryption failed")]
    Encrypt,

    #[error("Sealed environment is corrupt or was sealed with another key")]
    Decrypt,

    #[error("Sealed environment payload is malformed: {0}")]
    Malformed(String),
}

/// Seals and opens custom tool environments.
#[derive(Clone)]
pub struct EnvCipher {
    cipher: Aes256Gcm,
}

impl EnvCipher {
    pub fn from_key(key: &[u8]) -> Result<Self, SecretsError> {
        if key.len() != KEY_SIZE {
            return Err(SecretsError::InvalidKey(format!(
                "expected {} bytes, got {}",
                KEY_SIZE,
                key.len()
            )));
        }
        let cipher =
            Aes256Gcm::new_from_slice(key).map_err(|e| SecretsError::InvalidKey(e.to_string()))?;
        Ok(Self { cipher })
    }

    /// Key given as base64, or as an `env:VAR` reference to base64.
    pub fn from_config_value(value: &str) -> Result<Self, SecretsError> {
        let encoded = resolve_secret(value).map_err(|e| SecretsError::InvalidKey(e.to_string()))?;
        let key = STANDARD
            .decode(encoded.trim())
            .map_err(|e| SecretsError::InvalidKey(e.to_string()))?;
        Self::from_key(&key)
    }

    /// Random process-local key. Sealed values do not survive a restart.
    pub fn ephemeral() -> Self {
        let key = Aes256Gcm::generate_key(OsRng);
        warn!("No tool env key configured; sealing custom tool env with an ephemeral key");
        Self {
            cipher: Aes256Gcm::new(&key),
        }
    }

    pub fn seal(&self, env: &HashMap<String, String>) -> Result<SealedEnv, SecretsError> {
        let plaintext =
            serde_json::to_vec(env).map_err(|e| SecretsError::Malformed(e.to_string()))?;

        let mut nonce_bytes = [0u8; NONCE_SIZE];
        OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = self
            .cipher
            .encrypt(nonce, plaintext.as_slice())
            .map_err(|_| SecretsError::Encrypt)?;

        let mut output = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
        output.extend_from_slice(&nonce_bytes);
        output.extend_from_slice(&ciphertext);
        Ok(SealedEnv::from_ciphertext(STANDARD.encode(output)))
    }

    pub fn open(&self, sealed: &SealedEnv) -> Result<HashMap<String, String>, SecretsError> {
        let data = STANDARD
            .decode(sealed.ciphertext())
            .map_err(|e| SecretsError::Malformed(e.to_string()))?;
        if data.len() < NONCE_SIZE {
            return Err(SecretsError::Malformed("payload shorter than nonce".to_string()));
        }

        let (nonce_bytes, ciphertext) = data.split_at(NONCE_SIZE);
        let plaintext = self
            .cipher
            .decrypt(Nonce::from_slice(nonce_bytes), ciphertext)
            .map_err(|_| SecretsError::Decrypt)?;

        serde_json::from_slice(&plaintext).map_err(|e| SecretsError::Malformed(e.to_string()))
    }
}
