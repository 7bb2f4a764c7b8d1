//! Persisted local user id

use crate::{RegistryError, Result};
use covault_crypto::UserId;
use covault_store::Storage;

const USER_ID_LEN: usize = 8;

/// The local identity's id in a storage slot, big-endian fixed width
pub struct StoredUserId<S: Storage> {
    slot: S,
}

impl<S: Storage> StoredUserId<S> {
    /// Wrap a storage slot
    pub fn new(slot: S) -> Self {
        Self { slot }
    }

    /// Check whether an id has been stored
    pub fn exists(&self) -> bool {
        self.slot.exists()
    }

    /// Store the id
    pub fn store(&self, id: UserId) -> Result<()> {
        self.slot.store_raw(&id.to_be_bytes())?;
        Ok(())
    }

    /// Load the id, failing if none was ever stored
    pub fn load(&self) -> Result<UserId> {
        if !self.exists() {
            return Err(RegistryError::NotInitialized);
        }
        let bytes = self.slot.load_raw()?;
        let arr: [u8; USER_ID_LEN] = bytes.as_slice().try_into().map_err(|_| {
            RegistryError::Serialization(format!("user id must be {} bytes, got {}", USER_ID_LEN, bytes.len()))
        })?;
        Ok(UserId::from_be_bytes(arr))
    }
}
