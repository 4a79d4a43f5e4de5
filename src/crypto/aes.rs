//! AES-256-GCM encryption for sensitive configuration data
//!
//! Used for OAuth provider client secrets and SMTP passwords stored in the
//! database. Ciphertext format: `base64(nonce):base64(ciphertext)`.

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use rand::Rng;
use thiserror::Error;

/// Encryption key for AES-256-GCM
#[derive(Clone)]
pub struct EncryptionKey {
    key: [u8; 32],
}

/// Encryption error types
#[derive(Error, Debug)]
pub enum EncryptionError {
    #[error("Invalid key: must be exactly 32 bytes (256 bits)")]
    InvalidKeyLength,

    #[error("Invalid base64 encoding: {0}")]
    Base64Error(#[from] base64::DecodeError),

    #[error("Encryption failed")]
    EncryptionFailed,

    #[error("Decryption failed: invalid ciphertext or wrong key")]
    DecryptionFailed,

    #[error("Invalid ciphertext format")]
    InvalidCiphertextFormat,
}

impl EncryptionKey {
    /// Create a new encryption key from a 32-byte array
    pub fn new(key: [u8; 32]) -> Self {
        Self { key }
    }

    /// Create encryption key from a base64-encoded string
    pub fn from_base64(encoded: &str) -> Result<Self, EncryptionError> {
        let bytes = BASE64.decode(encoded)?;
        if bytes.len() != 32 {
            return Err(EncryptionError::InvalidKeyLength);
        }
        let mut key = [0u8; 32];
        key.copy_from_slice(&bytes);
        Ok(Self { key })
    }

    /// Create encryption key from the `SETTINGS_ENCRYPTION_KEY` env var
    pub fn from_env() -> Result<Self, EncryptionError> {
        let encoded = std::env::var("SETTINGS_ENCRYPTION_KEY")
            .map_err(|_| EncryptionError::InvalidKeyLength)?;
        Self::from_base64(&encoded)
    }
}

/// Encrypt plaintext using AES-256-GCM.
///
/// The nonce is 12 bytes (96 bits) as required by GCM.
pub fn encrypt(key: &EncryptionKey, plaintext: &str) -> Result<String, EncryptionError> {
    let cipher =
        Aes256Gcm::new_from_slice(&key.key).map_err(|_| EncryptionError::EncryptionFailed)?;

    let mut nonce_bytes = [0u8; 12];
    rand::thread_rng().fill(&mut nonce_bytes);
    let nonce = Nonce::from_slice(&nonce_bytes);

    let ciphertext = cipher
        .encrypt(nonce, plaintext.as_bytes())
        .map_err(|_| EncryptionError::EncryptionFailed)?;

    Ok(format!(
        "{}:{}",
        BASE64.encode(nonce_bytes),
        BASE64.encode(&ciphertext)
    ))
}

/// Decrypt ciphertext produced by [`encrypt`]
pub fn decrypt(key: &EncryptionKey, encoded: &str) -> Result<String, EncryptionError> {
    let (nonce_b64, ciphertext_b64) = encoded
        .split_once(':')
        .ok_or(EncryptionError::InvalidCiphertextFormat)?;

    let nonce_bytes = BASE64.decode(nonce_b64)?;
    if nonce_bytes.len() != 12 {
        return Err(EncryptionError::InvalidCiphertextFormat);
    }
    let ciphertext = BASE64.decode(ciphertext_b64)?;

    let cipher =
        Aes256Gcm::new_from_slice(&key.key).map_err(|_| EncryptionError::DecryptionFailed)?;
    let nonce = Nonce::from_slice(&nonce_bytes);

    let plaintext = cipher
        .decrypt(nonce, ciphertext.as_ref())
        .map_err(|_| EncryptionError::DecryptionFailed)?;

    String::from_utf8(plaintext).map_err(|_| EncryptionError::DecryptionFailed)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_key() -> EncryptionKey {
        EncryptionKey::new([7u8; 32])
    }

    #[test]
    fn test_encrypt_decrypt_roundtrip() {
        let key = test_key();
        let ciphertext = encrypt(&key, "client-secret-value").unwrap();
        assert_ne!(ciphertext, "client-secret-value");
        assert!(ciphertext.contains(':'));

        let plaintext = decrypt(&key, &ciphertext).unwrap();
        assert_eq!(plaintext, "client-secret-value");
    }

    #[test]
    fn test_wrong_key_fails() {
        let ciphertext = encrypt(&test_key(), "secret").unwrap();
        let other = EncryptionKey::new([9u8; 32]);
        assert!(matches!(
            decrypt(&other, &ciphertext),
            Err(EncryptionError::DecryptionFailed)
        ));
    }

    #[test]
    fn test_nonce_randomized() {
        let key = test_key();
        let c1 = encrypt(&key, "same").unwrap();
        let c2 = encrypt(&key, "same").unwrap();
        assert_ne!(c1, c2);
    }

    #[test]
    fn test_invalid_format_rejected() {
        assert!(matches!(
            decrypt(&test_key(), "not-a-ciphertext"),
            Err(EncryptionError::InvalidCiphertextFormat)
        ));
    }

    #[test]
    fn test_key_from_base64() {
        let encoded = BASE64.encode([1u8; 32]);
        assert!(EncryptionKey::from_base64(&encoded).is_ok());

        let short = BASE64.encode([1u8; 16]);
        assert!(matches!(
            EncryptionKey::from_base64(&short),
            Err(EncryptionError::InvalidKeyLength)
        ));
    }
}
