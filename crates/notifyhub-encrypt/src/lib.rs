//! At-rest encryption for persisted queue/scheduler state, using
//! AES-256-GCM with PBKDF2 key derivation.
//!
//! The dispatcher and URL parser never log credentials, but the durable
//! queue persists rendered [`notifyhub_types::NotificationRequest`] rows to
//! disk, and those rows embed destination URLs that may carry credentials in
//! their user-info component. This crate provides optional, transparent
//! encryption of that persisted payload.
//!
//! Encrypted data format: `base64(salt || nonce || ciphertext || auth_tag)`.

use std::path::Path;

use aes_gcm::{
    Aes256Gcm, Nonce,
    aead::{Aead, KeyInit, OsRng, rand_core::RngCore},
};
use anyhow::{Context, Result, bail};
use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
use pbkdf2::pbkdf2_hmac_array;
use serde::{Deserialize, Serialize};
use sha2::Sha256;

const SALT_SIZE: usize = 16;
const NONCE_SIZE: usize = 12;
const PBKDF2_ITERATIONS: u32 = 100_000;
const KEY_SIZE: usize = 32;

/// Encryption configuration for the queue store.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EncryptionConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub passphrase: Option<String>,
    /// Environment variable name to read the passphrase from.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub env_var: Option<String>,
}

impl EncryptionConfig {
    pub fn new(passphrase: String) -> Self {
        Self {
            enabled: true,
            passphrase: Some(passphrase),
            env_var: None,
        }
    }

    pub fn from_env(env_var: String) -> Self {
        Self {
            enabled: true,
            passphrase: None,
            env_var: Some(env_var),
        }
    }

    pub fn get_passphrase(&self) -> Result<Option<String>> {
        if let Some(passphrase) = &self.passphrase {
            return Ok(Some(passphrase.clone()));
        }
        if let Some(ref env_var) = self.env_var {
            return Ok(std::env::var(env_var).ok());
        }
        Ok(None)
    }
}

/// Encrypt `data` with a key derived from `passphrase`.
pub fn encrypt(data: &[u8], passphrase: &str) -> Result<Vec<u8>> {
    let mut salt = [0u8; SALT_SIZE];
    let mut nonce_bytes = [0u8; NONCE_SIZE];
    OsRng.fill_bytes(&mut salt);
    OsRng.fill_bytes(&mut nonce_bytes);

    let key = derive_key(passphrase, &salt);

    let cipher = Aes256Gcm::new_from_slice(&key).context("failed to create AES-256-GCM cipher")?;
    let nonce = Nonce::from_slice(&nonce_bytes);
    let ciphertext = cipher
        .encrypt(nonce, data)
        .map_err(|e| anyhow::anyhow!("encryption failed: {:?}", e))?;

    let mut result = Vec::with_capacity(SALT_SIZE + NONCE_SIZE + ciphertext.len());
    result.extend_from_slice(&salt);
    result.extend_from_slice(&nonce_bytes);
    result.extend_from_slice(&ciphertext);

    Ok(BASE64.encode(&result).into_bytes())
}

/// Decrypt base64-encoded `encrypted_data` with `passphrase`.
pub fn decrypt(encrypted_data: impl AsRef<str>, passphrase: &str) -> Result<Vec<u8>> {
    let encrypted_str = encrypted_data.as_ref();
    let data = BASE64
        .decode(encrypted_str)
        .context("invalid base64 encoding")?;

    if data.len() < SALT_SIZE + NONCE_SIZE + 16 {
        bail!("encrypted data too short");
    }

    let salt = &data[..SALT_SIZE];
    let nonce_bytes = &data[SALT_SIZE..SALT_SIZE + NONCE_SIZE];
    let ciphertext = &data[SALT_SIZE + NONCE_SIZE..];

    let key = derive_key(passphrase, salt);

    let cipher = Aes256Gcm::new_from_slice(&key).context("failed to create AES-256-GCM cipher")?;
    let nonce = Nonce::from_slice(nonce_bytes);
    let plaintext = cipher.decrypt(nonce, ciphertext).map_err(|e| {
        anyhow::anyhow!(
            "decryption failed - wrong passphrase or corrupted data: {:?}",
            e
        )
    })?;

    Ok(plaintext)
}

fn derive_key(passphrase: &str, salt: &[u8]) -> [u8; KEY_SIZE] {
    pbkdf2_hmac_array::<Sha256, KEY_SIZE>(passphrase.as_bytes(), salt, PBKDF2_ITERATIONS)
}

/// Heuristic check for whether `content` looks like our encrypted envelope.
pub fn is_encrypted(content: &str) -> bool {
    let Ok(data) = BASE64.decode(content) else {
        return false;
    };
    data.len() >= SALT_SIZE + NONCE_SIZE + 16
}

/// Transparent encrypt/decrypt wrapper around queue-store file I/O.
pub struct QueueEncryption {
    config: EncryptionConfig,
}

impl QueueEncryption {
    pub fn new(config: EncryptionConfig) -> Self {
        Self { config }
    }

    fn get_passphrase(&self) -> Result<Option<String>> {
        if !self.config.enabled {
            return Ok(None);
        }
        if let Some(ref env_var) = self.config.env_var
            && let Ok(passphrase) = std::env::var(env_var)
        {
            return Ok(Some(passphrase));
        }
        self.config.get_passphrase()
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled && self.get_passphrase().ok().flatten().is_some()
    }

    pub fn encrypt(&self, data: &[u8]) -> Result<Vec<u8>> {
        let passphrase = self.get_passphrase()?.context(
            "encryption is enabled but no passphrase available; set NOTIFYHUB_ENCRYPT_KEY or provide one in EncryptionConfig",
        )?;
        encrypt(data, &passphrase)
    }

    pub fn decrypt(&self, data: &[u8]) -> Result<Vec<u8>> {
        if let Some(passphrase) = self.get_passphrase()?
            && let Ok(decrypted) = decrypt(String::from_utf8_lossy(data), &passphrase)
        {
            return Ok(decrypted);
        }
        Ok(data.to_vec())
    }

    pub fn read_file(&self, path: &Path) -> Result<String> {
        if !self.is_enabled() {
            return std::fs::read_to_string(path)
                .with_context(|| format!("failed to read file: {}", path.display()));
        }

        let passphrase = self
            .get_passphrase()?
            .context("encryption is enabled but no passphrase available")?;

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read file: {}", path.display()))?;

        match decrypt(&content, &passphrase) {
            Ok(decrypted) => {
                String::from_utf8(decrypted).context("decrypted data is not valid UTF-8")
            }
            Err(_) => Ok(content),
        }
    }

    pub fn write_file(&self, path: &Path, data: &[u8]) -> Result<()> {
        if !self.is_enabled() {
            return std::fs::write(path, data)
                .with_context(|| format!("failed to write file: {}", path.display()));
        }

        let passphrase = self
            .get_passphrase()?
            .context("encryption is enabled but no passphrase available")?;

        let encrypted = encrypt(data, &passphrase)?;
        let encrypted_str =
            String::from_utf8(encrypted).context("encrypted data is not valid UTF-8")?;

        std::fs::write(path, encrypted_str)
            .with_context(|| format!("failed to write encrypted file: {}", path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn encrypt_decrypt_roundtrip() {
        let plaintext = b"destination=webhook://example.com/hook?token=abc123";
        let passphrase = "test-passphrase-123";

        let encrypted = encrypt(plaintext, passphrase).expect("encryption should succeed");
        let encrypted_str = String::from_utf8(encrypted).expect("valid UTF-8");
        let decrypted = decrypt(&encrypted_str, passphrase).expect("decryption should succeed");

        assert_eq!(plaintext.to_vec(), decrypted);
    }

    #[test]
    fn encrypt_is_nondeterministic() {
        let plaintext = b"queued job payload";
        let passphrase = "test-passphrase";

        let e1 = encrypt(plaintext, passphrase).unwrap();
        let e2 = encrypt(plaintext, passphrase).unwrap();
        assert_ne!(e1, e2);

        let d1 = decrypt(String::from_utf8(e1).unwrap(), passphrase).unwrap();
        let d2 = decrypt(String::from_utf8(e2).unwrap(), passphrase).unwrap();
        assert_eq!(d1, d2);
    }

    #[test]
    fn decrypt_wrong_passphrase_fails() {
        let encrypted = encrypt(b"secret", "correct").unwrap();
        let encrypted_str = String::from_utf8(encrypted).unwrap();
        assert!(decrypt(&encrypted_str, "wrong").is_err());
    }

    #[test]
    fn is_encrypted_detects_own_output() {
        let encrypted = encrypt(b"hello", "pass").unwrap();
        let encrypted_str = String::from_utf8(encrypted).unwrap();
        assert!(is_encrypted(&encrypted_str));
    }

    #[test]
    fn is_encrypted_rejects_plain_json() {
        assert!(!is_encrypted(r#"{"key": "value"}"#));
    }

    #[test]
    fn queue_encryption_enabled_flag() {
        let disabled = QueueEncryption::new(EncryptionConfig::default());
        assert!(!disabled.is_enabled());

        let enabled = QueueEncryption::new(EncryptionConfig::new("pass".into()));
        assert!(enabled.is_enabled());
    }

    #[test]
    fn queue_encryption_file_roundtrip() {
        let td = tempdir().expect("tempdir");
        let path = td.path().join("queue.json");

        let encryption = QueueEncryption::new(EncryptionConfig::new("test-pass".into()));
        let data = br#"{"job_id": "abc", "destination": "webhook://x/y"}"#;

        encryption.write_file(&path, data).expect("write file");
        let content = encryption.read_file(&path).expect("read file");
        assert_eq!(String::from_utf8_lossy(data), content);
    }

    #[test]
    fn queue_encryption_reads_preexisting_plaintext() {
        let td = tempdir().expect("tempdir");
        let path = td.path().join("plain.json");
        std::fs::write(&path, r#"{"plain": "data"}"#).unwrap();

        let encryption = QueueEncryption::new(EncryptionConfig::new("test-pass".into()));
        let content = encryption.read_file(&path).expect("read file");
        assert_eq!(r#"{"plain": "data"}"#, content);
    }

    #[test]
    fn derive_key_is_deterministic_per_salt() {
        let salt = [7u8; SALT_SIZE];
        assert_eq!(
            derive_key("pass", &salt),
            derive_key("pass", &salt),
        );
        let mut other_salt = salt;
        other_salt[0] ^= 0xff;
        assert_ne!(derive_key("pass", &salt), derive_key("pass", &other_salt));
    }
}
