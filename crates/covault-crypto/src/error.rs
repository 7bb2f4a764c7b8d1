//! Error types for the covault-crypto crate

use thiserror::Error;

/// Result type alias using `CryptoError`
pub type Result<T> = std::result::Result<T, CryptoError>;

/// Errors that can occur during cryptographic operations
#[derive(Error, Debug)]
pub enum CryptoError {
    /// Key store has never been initialized for this user
    #[error("key store not initialized")]
    NotInitialized,

    /// Key store is already initialized and must not be overwritten
    #[error("key store already initialized")]
    AlreadyInitialized,

    /// Operation requires an unlocked key store
    #[error("key store not unlocked")]
    NotUnlocked,

    /// Authentication failed (wrong password or tampered data)
    #[error("authentication failed: {0}")]
    Authentication(String),

    /// Signature verification failed
    #[error("signature verification failed")]
    SignatureVerification,

    /// No matching key blob for this recipient
    #[error("key not found: {0}")]
    KeyNotFound(String),

    /// Key generation failed
    #[error("key generation failed: {0}")]
    KeyGeneration(String),

    /// Invalid key format or length
    #[error("invalid key: {0}")]
    InvalidKey(String),

    /// Encryption failed
    #[error("encryption failed: {0}")]
    Encryption(String),

    /// Decryption failed
    #[error("decryption failed: {0}")]
    Decryption(String),

    /// Invalid nonce
    #[error("invalid nonce: {0}")]
    InvalidNonce(String),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Unsupported wire format version
    #[error("unsupported format version: {0}")]
    VersionMismatch(u8),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Storage error
    #[error("storage error: {0}")]
    Store(#[from] covault_store::StoreError),

    /// Base64 decode error
    #[error("base64 decode error: {0}")]
    Base64Decode(#[from] base64::DecodeError),
}
