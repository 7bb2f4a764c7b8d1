//! Single-user encrypted storage
//!
//! Wraps one storage slot and the local key store: everything written goes
//! through the master key, so the slot only ever holds ciphertext.

use crate::Result;
use covault_crypto::SharedKeyStore;
use covault_store::Storage;

/// A storage slot whose contents are encrypted with the local master key
pub struct SecurePrivateStorage<S: Storage> {
    slot: S,
    keystore: SharedKeyStore<S>,
}

impl<S: Storage> SecurePrivateStorage<S> {
    /// Wrap a slot with the given key store
    pub fn new(slot: S, keystore: SharedKeyStore<S>) -> Self {
        Self { slot, keystore }
    }

    /// Check whether anything has been stored
    pub fn exists(&self) -> bool {
        self.slot.exists()
    }

    /// Encrypt and store a payload
    pub fn store_raw(&self, data: &[u8]) -> Result<()> {
        let blob = self.keystore.lock().encrypt_to_bytes(data)?;
        self.slot.store_raw(&blob)?;
        Ok(())
    }

    /// Load and decrypt the payload
    pub fn load_raw(&self) -> Result<Vec<u8>> {
        let blob = self.slot.load_raw()?;
        Ok(self.keystore.lock().decrypt_from_bytes(&blob)?)
    }
}
