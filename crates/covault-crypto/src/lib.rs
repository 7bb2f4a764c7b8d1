//! # Covault Crypto
//!
//! Cryptographic core of the covault secure-storage system.
//!
//! This crate provides:
//! - **KeyStore**: A password-protected bundle holding the user's master key
//!   and lazily generated RSA key pairs
//! - **Symmetric encryption**: AES-256-GCM / ChaCha20-Poly1305 payloads with
//!   the nonce carried inside the blob
//! - **RSA operations**: OAEP key wrapping and PSS signatures over DER keys
//! - **Hybrid encryption**: One payload, one one-time key, one wrapped key
//!   blob per recipient
//!
//! ## Security Model
//!
//! - Private keys live only inside an unlocked [`KeyStore`] and in its
//!   encrypted bundle at rest
//! - A wrong password and a tampered bundle fail the same way at unlock
//! - Remote parties only ever receive public SPKI DER keys
//!
//! ## Example
//!
//! ```rust,ignore
//! use covault_crypto::KeyStore;
//! use covault_store::{FileLocation, StorageLocation};
//!
//! let mut store = KeyStore::new(FileLocation::new("/vault").slot("keys"), b"app-salt".to_vec());
//! store.init_user("correct horse battery staple")?;
//! let public = store.ensure_signing_keys()?;
//! let signature = store.sign(b"payload")?;
//! ```

pub mod asymmetric;
pub mod error;
pub mod hybrid;
pub mod kdf;
pub mod keystore;
pub mod symmetric;

pub use asymmetric::{oaep_encrypt, verify, RsaKeyPair, PSS_SALT_LEN, RSA_KEY_BITS};
pub use error::{CryptoError, Result};
pub use hybrid::{
    hybrid_decrypt, hybrid_encrypt, HybridEnvelope, KeyBlobMap, RecipientId, RecipientSet,
    SignedMessage, SignedPayload, UserId, FORMAT_VERSION,
};
pub use kdf::{derive_cache_key, KDF_ITERATIONS};
pub use keystore::{KeyStore, SharedKeyStore};
pub use symmetric::{CipherSuite, Nonce, SymmetricKey, KEY_SIZE, NONCE_SIZE};

/// Serde helper for byte fields encoded as standard base64 strings
pub mod base64_serde {
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&base64::engine::general_purpose::STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(d)?;
        base64::engine::general_purpose::STANDARD
            .decode(&s)
            .map_err(serde::de::Error::custom)
    }
}
