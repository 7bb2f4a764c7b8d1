//! Password-based key derivation
//!
//! Derives the cache key that protects a stored key bundle from the user's
//! password. The salt is supplied by the application and must stay stable
//! across runs, otherwise a previously stored bundle can no longer be opened.

use crate::symmetric::{SymmetricKey, KEY_SIZE};
use pbkdf2::pbkdf2_hmac;
use sha2::Sha256;

/// PBKDF2-HMAC-SHA256 iteration count
pub const KDF_ITERATIONS: u32 = 480_000;

/// Derive a cache key from a password and a fixed salt
///
/// The same password and salt always produce the same key. This is the slow
/// path of every unlock, by way of the iteration count.
pub fn derive_cache_key(password: &str, salt: &[u8]) -> SymmetricKey {
    let mut key = [0u8; KEY_SIZE];
    pbkdf2_hmac::<Sha256>(password.as_bytes(), salt, KDF_ITERATIONS, &mut key);
    SymmetricKey::from(key)
}
