//! The interface storage wrappers use to talk to a registry

use crate::Result;
use covault_crypto::{KeyBlobMap, UserId};
use std::collections::BTreeMap;

/// Identity and role-resolving encryption, as seen by storage consumers
///
/// `SecureSharedStorage` depends only on this trait, so any registry
/// implementation (or a test double) can stand behind it.
pub trait RegistryFacade {
    /// The local identity's directory id
    fn current_identity(&self) -> Result<UserId>;

    /// Whether secure operations can run: unlocked keys, known identity,
    /// non-empty directory
    fn is_ready(&self) -> bool;

    /// Resolve role names to the union of member encryption keys
    ///
    /// Unknown role names are an error rather than silently resolving to
    /// nobody.
    fn resolve_roles_to_encryption_keys(
        &self,
        roles: &[String],
    ) -> Result<BTreeMap<UserId, Vec<u8>>>;

    /// Hybrid-encrypt for the members of the given roles
    ///
    /// All current admins and the caller are always included as recipients,
    /// whatever the requested role set. An admin can therefore always
    /// recover any shared payload.
    fn hybrid_encrypt(&self, data: &[u8], roles: &[String]) -> Result<(Vec<u8>, KeyBlobMap)>;

    /// Hybrid-decrypt with the local identity's key blob
    fn hybrid_decrypt(&self, ciphertext: &[u8], key_blobs: &KeyBlobMap) -> Result<Vec<u8>>;
}
