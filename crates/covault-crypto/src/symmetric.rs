//! Symmetric encryption using AES-GCM and ChaCha20-Poly1305
//!
//! This module provides authenticated encryption for stored payloads. The
//! encrypted blob layout is `nonce || ciphertext`, so a blob carries
//! everything needed for decryption besides the key itself.

use crate::{CryptoError, Result};
use aes_gcm::{
    Aes256Gcm, KeyInit,
    aead::Aead as AeadTrait,
};
use chacha20poly1305::ChaCha20Poly1305;
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Size of a symmetric key in bytes (256 bits)
pub const KEY_SIZE: usize = 32;

/// Size of a nonce in bytes (96 bits for AES-GCM/ChaCha20-Poly1305)
pub const NONCE_SIZE: usize = 12;

/// A symmetric key for AEAD encryption
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct SymmetricKey {
    key: [u8; KEY_SIZE],
}

impl SymmetricKey {
    /// Generate a new random key
    pub fn generate() -> Self {
        let mut key = [0u8; KEY_SIZE];
        rand::RngCore::fill_bytes(&mut OsRng, &mut key);
        Self { key }
    }

    /// Create a key from raw bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != KEY_SIZE {
            return Err(CryptoError::InvalidKey(format!(
                "symmetric key must be {} bytes, got {}",
                KEY_SIZE,
                bytes.len()
            )));
        }
        let mut key = [0u8; KEY_SIZE];
        key.copy_from_slice(bytes);
        Ok(Self { key })
    }

    /// Get the key bytes
    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.key
    }
}

impl From<[u8; KEY_SIZE]> for SymmetricKey {
    fn from(key: [u8; KEY_SIZE]) -> Self {
        Self { key }
    }
}

impl std::fmt::Debug for SymmetricKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SymmetricKey([REDACTED])")
    }
}

/// A nonce for AEAD encryption
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Nonce {
    bytes: [u8; NONCE_SIZE],
}

impl Nonce {
    /// Generate a random nonce
    pub fn generate() -> Self {
        let mut bytes = [0u8; NONCE_SIZE];
        rand::RngCore::fill_bytes(&mut OsRng, &mut bytes);
        Self { bytes }
    }

    /// Create from raw bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != NONCE_SIZE {
            return Err(CryptoError::InvalidNonce(format!(
                "nonce must be {} bytes, got {}",
                NONCE_SIZE,
                bytes.len()
            )));
        }
        let mut arr = [0u8; NONCE_SIZE];
        arr.copy_from_slice(bytes);
        Ok(Self { bytes: arr })
    }

    /// Get the nonce bytes
    pub fn as_bytes(&self) -> &[u8; NONCE_SIZE] {
        &self.bytes
    }
}

/// Supported AEAD cipher suites
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CipherSuite {
    /// AES-256-GCM
    Aes256Gcm,
    /// ChaCha20-Poly1305
    ChaCha20Poly1305,
}

impl Default for CipherSuite {
    fn default() -> Self {
        Self::Aes256Gcm
    }
}

impl CipherSuite {
    /// Get the algorithm identifier string
    pub fn algorithm_id(&self) -> &'static str {
        match self {
            Self::Aes256Gcm => "AES-256-GCM",
            Self::ChaCha20Poly1305 => "ChaCha20-Poly1305",
        }
    }

    /// Encrypt plaintext with the given key and nonce
    pub fn encrypt(&self, key: &SymmetricKey, nonce: &Nonce, plaintext: &[u8]) -> Result<Vec<u8>> {
        match self {
            Self::Aes256Gcm => {
                let nonce_arr = aes_gcm::Nonce::from_slice(nonce.as_bytes());
                let cipher = Aes256Gcm::new_from_slice(key.as_bytes())
                    .map_err(|e| CryptoError::Encryption(e.to_string()))?;
                cipher
                    .encrypt(nonce_arr, plaintext)
                    .map_err(|e| CryptoError::Encryption(e.to_string()))
            }
            Self::ChaCha20Poly1305 => {
                let nonce_arr = chacha20poly1305::Nonce::from_slice(nonce.as_bytes());
                let cipher = ChaCha20Poly1305::new_from_slice(key.as_bytes())
                    .map_err(|e| CryptoError::Encryption(e.to_string()))?;
                cipher
                    .encrypt(nonce_arr, plaintext)
                    .map_err(|e| CryptoError::Encryption(e.to_string()))
            }
        }
    }

    /// Decrypt ciphertext with the given key and nonce
    ///
    /// A failed authentication tag check surfaces as
    /// [`CryptoError::Authentication`], not as a generic decryption error.
    pub fn decrypt(&self, key: &SymmetricKey, nonce: &Nonce, ciphertext: &[u8]) -> Result<Vec<u8>> {
        match self {
            Self::Aes256Gcm => {
                let nonce_arr = aes_gcm::Nonce::from_slice(nonce.as_bytes());
                let cipher = Aes256Gcm::new_from_slice(key.as_bytes())
                    .map_err(|e| CryptoError::Decryption(e.to_string()))?;
                cipher
                    .decrypt(nonce_arr, ciphertext)
                    .map_err(|e| CryptoError::Authentication(e.to_string()))
            }
            Self::ChaCha20Poly1305 => {
                let nonce_arr = chacha20poly1305::Nonce::from_slice(nonce.as_bytes());
                let cipher = ChaCha20Poly1305::new_from_slice(key.as_bytes())
                    .map_err(|e| CryptoError::Decryption(e.to_string()))?;
                cipher
                    .decrypt(nonce_arr, ciphertext)
                    .map_err(|e| CryptoError::Authentication(e.to_string()))
            }
        }
    }
}

/// Encrypt plaintext into a self-contained `nonce || ciphertext` blob
pub fn encrypt(key: &SymmetricKey, suite: CipherSuite, plaintext: &[u8]) -> Result<Vec<u8>> {
    let nonce = Nonce::generate();
    let ciphertext = suite.encrypt(key, &nonce, plaintext)?;
    let mut blob = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
    blob.extend_from_slice(nonce.as_bytes());
    blob.extend_from_slice(&ciphertext);
    Ok(blob)
}

/// Decrypt a `nonce || ciphertext` blob produced by [`encrypt`]
pub fn decrypt(key: &SymmetricKey, suite: CipherSuite, blob: &[u8]) -> Result<Vec<u8>> {
    if blob.len() < NONCE_SIZE {
        return Err(CryptoError::Decryption(format!(
            "blob too short: {} bytes",
            blob.len()
        )));
    }
    let nonce = Nonce::from_bytes(&blob[..NONCE_SIZE])?;
    suite.decrypt(key, &nonce, &blob[NONCE_SIZE..])
}
