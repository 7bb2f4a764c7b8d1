//! Error types for the covault-registry crate

use covault_crypto::UserId;
use thiserror::Error;

/// Result type alias using `RegistryError`
pub type Result<T> = std::result::Result<T, RegistryError>;

/// Errors that can occur during registry operations
#[derive(Error, Debug)]
pub enum RegistryError {
    /// Operation requires an initialized registry
    #[error("registry not initialized")]
    NotInitialized,

    /// Registry already holds a local identity
    #[error("registry already initialized")]
    AlreadyInitialized,

    /// Registry or key store cannot perform secure operations yet
    #[error("registry not ready")]
    NotReady,

    /// No directory entry for this user id
    #[error("unknown user: {0}")]
    UnknownUser(UserId),

    /// Signer's validation key is not in the directory
    #[error("signer is unknown")]
    UnknownSigner,

    /// Role name not present in the role index
    #[error("unknown role: {0}")]
    UnknownRole(String),

    /// Caller or signer lacks a required role
    #[error("role check failed: {0}")]
    Role(String),

    /// Stored payload failed its signature check
    #[error("signature verification failed")]
    VerificationFailed,

    /// Unsupported wire format version
    #[error("unsupported format version: {0}")]
    VersionMismatch(u8),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Cryptographic error
    #[error("crypto error: {0}")]
    Crypto(#[from] covault_crypto::CryptoError),

    /// Storage error
    #[error("storage error: {0}")]
    Store(#[from] covault_store::StoreError),
}
