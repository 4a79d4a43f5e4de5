//! Password hashing, API key hashing, and secure random material

pub mod aes;

use crate::error::{AppError, Result};
use argon2::{
    password_hash::{rand_core::OsRng as PasswordOsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use rand::{rngs::OsRng, Rng, RngCore};
use sha2::{Digest, Sha256};

/// Hash a password with Argon2id
pub fn hash_password(password: &str) -> Result<String> {
    let salt = SaltString::generate(&mut PasswordOsRng);
    let hash = Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| AppError::Internal(anyhow::anyhow!("Password hashing failed: {}", e)))?;
    Ok(hash.to_string())
}

/// Verify a password against a stored Argon2 hash
pub fn verify_password(password: &str, hash: &str) -> Result<bool> {
    let parsed = PasswordHash::new(hash)
        .map_err(|e| AppError::Internal(anyhow::anyhow!("Invalid password hash: {}", e)))?;
    Ok(Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok())
}

/// SHA-256 hex digest, used for API keys and token KV keys
pub fn sha256_hex(input: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    hex::encode(hasher.finalize())
}

/// Generate an opaque URL-safe token (email verification, password reset,
/// temp sessions, admin sessions, CSRF)
pub fn generate_token() -> String {
    let mut bytes = [0u8; 32];
    OsRng.fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Generate a 6-digit numeric code with the OS CSPRNG (email 2FA)
pub fn generate_numeric_code() -> String {
    let n: u32 = OsRng.gen_range(0..1_000_000);
    format!("{:06}", n)
}

/// Generate a new API key. Returns `(plaintext, hash, prefix, suffix)`.
///
/// Only the hash and the display hints are persisted.
pub fn generate_api_key(key_type_prefix: &str) -> (String, String, String, String) {
    let mut bytes = [0u8; 32];
    OsRng.fill_bytes(&mut bytes);
    let plaintext = format!("{}_{}", key_type_prefix, URL_SAFE_NO_PAD.encode(bytes));
    let hash = sha256_hex(&plaintext);
    let prefix = plaintext.chars().take(8).collect();
    let suffix = plaintext
        .chars()
        .rev()
        .take(4)
        .collect::<Vec<_>>()
        .into_iter()
        .rev()
        .collect();
    (plaintext, hash, prefix, suffix)
}

/// Generate a recovery code in `XXXX-XXXX` form (no ambiguous characters)
pub fn generate_recovery_code() -> String {
    const ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";
    let mut pick = || {
        (0..4)
            .map(|_| ALPHABET[OsRng.gen_range(0..ALPHABET.len())] as char)
            .collect::<String>()
    };
    format!("{}-{}", pick(), pick())
}

/// Constant-time byte comparison to prevent timing attacks
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}
