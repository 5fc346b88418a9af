//! Cryptographic primitives for device key storage.
//!
//! This module provides:
//! - The vault key used to seal private keys at rest
//! - AES-256-GCM seal/open with a `nonce || ciphertext || tag` layout
//! - Random nonce and token generation helpers

pub mod seal;

pub use seal::{open, random_hex, random_token, seal, VaultKey};

use thiserror::Error;

/// Errors that can occur in cryptographic operations
#[derive(Error, Debug)]
pub enum CryptoError {
    #[error("Encryption failed: {0}")]
    EncryptionFailed(String),

    #[error("Decryption failed: {0}")]
    DecryptionFailed(String),

    #[error("Invalid key length: expected {expected}, got {got}")]
    InvalidKeyLength { expected: usize, got: usize },

    #[error("Invalid key encoding: {0}")]
    InvalidKeyEncoding(String),

    #[error("Authentication failed - data may have been tampered with")]
    AuthenticationFailed,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for crypto operations
pub type Result<T> = std::result::Result<T, CryptoError>;
