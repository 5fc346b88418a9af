//! AES-256-GCM sealing of private key material.
//!
//! Sealed blobs use the layout `nonce(12) || ciphertext || auth_tag(16)`,
//! with a fresh random nonce per seal.

use crate::crypto::{CryptoError, Result};
use aes_gcm::{
    aead::{Aead, AeadCore, KeyInit, OsRng},
    Aes256Gcm, Nonce,
};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use rand::RngCore;
use std::path::Path;
use zeroize::Zeroize;

const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;

/// The 256-bit key that seals every private key held by a device.
#[derive(Clone)]
pub struct VaultKey {
    key: [u8; 32],
}

impl VaultKey {
    /// Generate a new random vault key
    pub fn generate() -> Self {
        let key = Aes256Gcm::generate_key(&mut OsRng);
        Self { key: key.into() }
    }

    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let key: [u8; 32] = bytes.try_into().map_err(|_| CryptoError::InvalidKeyLength {
            expected: 32,
            got: bytes.len(),
        })?;
        Ok(Self { key })
    }

    /// Get the raw key bytes (use sparingly)
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.key
    }

    /// Load the vault key stored at `path`, creating it on first use.
    ///
    /// New key files are written with owner-only permissions on Unix.
    pub fn load_or_create(path: &Path) -> Result<Self> {
        if path.exists() {
            let mut bytes = std::fs::read(path)?;
            let key = Self::from_slice(&bytes);
            bytes.zeroize();
            return key;
        }

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let key = Self::generate();
        write_private_file(path, key.as_bytes())?;
        tracing::info!("Created vault key at {:?}", path);
        Ok(key)
    }
}

impl Drop for VaultKey {
    fn drop(&mut self) {
        self.key.zeroize();
    }
}

#[cfg(unix)]
fn write_private_file(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    use std::io::Write;
    use std::os::unix::fs::OpenOptionsExt;

    let mut file = std::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .mode(0o600)
        .open(path)?;
    file.write_all(bytes)
}

#[cfg(not(unix))]
fn write_private_file(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    std::fs::write(path, bytes)
}

/// Seal `plaintext` under the vault key.
///
/// Returns `nonce(12) || ciphertext || auth_tag(16)`.
pub fn seal(key: &VaultKey, plaintext: &[u8]) -> Result<Vec<u8>> {
    if plaintext.is_empty() {
        return Err(CryptoError::EncryptionFailed(
            "Cannot seal empty data".to_string(),
        ));
    }

    let cipher = Aes256Gcm::new(key.as_bytes().into());
    let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
    let nonce_bytes: [u8; NONCE_LEN] = nonce.into();

    let ciphertext_with_tag = cipher
        .encrypt(&nonce, plaintext)
        .map_err(|e| CryptoError::EncryptionFailed(format!("{}", e)))?;

    let mut sealed = Vec::with_capacity(NONCE_LEN + ciphertext_with_tag.len());
    sealed.extend_from_slice(&nonce_bytes);
    sealed.extend_from_slice(&ciphertext_with_tag);
    Ok(sealed)
}

/// Open a blob produced by [`seal`].
pub fn open(key: &VaultKey, sealed: &[u8]) -> Result<Vec<u8>> {
    if sealed.len() <= NONCE_LEN + TAG_LEN {
        return Err(CryptoError::DecryptionFailed(
            "Sealed blob too short".to_string(),
        ));
    }

    let (nonce_bytes, ciphertext_with_tag) = sealed.split_at(NONCE_LEN);
    let nonce_array: [u8; NONCE_LEN] = nonce_bytes
        .try_into()
        .map_err(|_| CryptoError::DecryptionFailed("Invalid nonce length".to_string()))?;

    let cipher = Aes256Gcm::new(key.as_bytes().into());
    cipher
        .decrypt(&Nonce::from(nonce_array), ciphertext_with_tag)
        .map_err(|_| CryptoError::AuthenticationFailed)
}

/// `len` random bytes rendered as lowercase hex.
pub fn random_hex(len: usize) -> String {
    let mut bytes = vec![0u8; len];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Unguessable URL-safe token (24 random bytes, base64url without padding).
pub fn random_token() -> String {
    let mut bytes = [0u8; 24];
    rand::thread_rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seal_open_roundtrip() {
        let key = VaultKey::generate();
        let sealed = seal(&key, b"ed25519 secret bytes").unwrap();
        assert_eq!(open(&key, &sealed).unwrap(), b"ed25519 secret bytes");
    }

    #[test]
    fn fresh_nonce_per_seal() {
        let key = VaultKey::generate();
        let a = seal(&key, b"same").unwrap();
        let b = seal(&key, b"same").unwrap();
        assert_ne!(a[..NONCE_LEN], b[..NONCE_LEN]);
    }

    #[test]
    fn wrong_key_fails() {
        let sealed = seal(&VaultKey::generate(), b"secret").unwrap();
        assert!(matches!(
            open(&VaultKey::generate(), &sealed),
            Err(CryptoError::AuthenticationFailed)
        ));
    }

    #[test]
    fn tampering_detected() {
        let key = VaultKey::generate();
        let mut sealed = seal(&key, b"secret").unwrap();
        let last = sealed.len() - 1;
        sealed[last] ^= 0x01;
        assert!(open(&key, &sealed).is_err());
    }

    #[test]
    fn empty_and_short_inputs_rejected() {
        let key = VaultKey::generate();
        assert!(seal(&key, b"").is_err());
        assert!(open(&key, &[0u8; 20]).is_err());
    }

    #[test]
    fn key_file_is_created_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vault.key");

        let first = VaultKey::load_or_create(&path).unwrap();
        let second = VaultKey::load_or_create(&path).unwrap();
        assert_eq!(first.as_bytes(), second.as_bytes());

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(&path).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o600);
        }
    }

    #[test]
    fn random_helpers_have_expected_shape() {
        let nonce = random_hex(16);
        assert_eq!(nonce.len(), 32);
        assert!(nonce.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(random_token(), random_token());
        assert_eq!(random_token().len(), 32);
    }
}
