//! Role-addressed encrypted storage with signed ciphertext
//!
//! A shared slot holds three pieces: the hybrid ciphertext, a detached
//! signature over it and the wrapped key blobs. Writes encrypt then sign;
//! reads verify then decrypt and fail closed on any mismatch.

use crate::facade::RegistryFacade;
use crate::{RegistryError, Result};
use covault_crypto::{base64_serde, KeyBlobMap, SharedKeyStore, FORMAT_VERSION};
use covault_store::Storage;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};

/// A detached signature over stored ciphertext
///
/// Carries the signer's public validation key so the record verifies on its
/// own. Trust in that key comes from the directory, not from this record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignatureRecord {
    pub version: u8,
    /// Signer's public validation key, SPKI DER
    #[serde(with = "base64_serde")]
    pub public_key: Vec<u8>,
    #[serde(with = "base64_serde")]
    pub signature: Vec<u8>,
}

impl SignatureRecord {
    /// Sign data with the local identity's validation key
    pub fn sign<K: Storage>(keystore: &SharedKeyStore<K>, data: &[u8]) -> Result<Self> {
        let mut keystore = keystore.lock();
        let signature = keystore.sign(data)?;
        let public_key = keystore.signing_public_key()?;
        Ok(Self {
            version: FORMAT_VERSION,
            public_key,
            signature,
        })
    }

    /// Check the signature over the given data
    pub fn verify(&self, data: &[u8]) -> Result<bool> {
        Ok(covault_crypto::verify(&self.public_key, data, &self.signature)?)
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| RegistryError::Serialization(e.to_string()))
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let record: Self =
            serde_json::from_slice(bytes).map_err(|e| RegistryError::Serialization(e.to_string()))?;
        if record.version != FORMAT_VERSION {
            return Err(RegistryError::VersionMismatch(record.version));
        }
        Ok(record)
    }
}

/// The wrapped one-time keys next to a shared ciphertext
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyBlobRecord {
    pub version: u8,
    pub key_blobs: KeyBlobMap,
}

impl KeyBlobRecord {
    pub fn new(key_blobs: KeyBlobMap) -> Self {
        Self {
            version: FORMAT_VERSION,
            key_blobs,
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| RegistryError::Serialization(e.to_string()))
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let record: Self =
            serde_json::from_slice(bytes).map_err(|e| RegistryError::Serialization(e.to_string()))?;
        if record.version != FORMAT_VERSION {
            return Err(RegistryError::VersionMismatch(record.version));
        }
        Ok(record)
    }
}

/// A storage slot shared with the members of a role set
///
/// Payloads are hybrid-encrypted for the role members (plus all admins and
/// the writer) and the ciphertext is signed by the writer. Readers verify
/// the signature before decrypting and refuse anything that does not check
/// out.
pub struct SecureSharedStorage<S: Storage, K: Storage = S> {
    base: S,
    signature_meta: S,
    keys_meta: S,
    registry: Arc<dyn RegistryFacade>,
    keystore: SharedKeyStore<K>,
    roles: Vec<String>,
}

impl<S: Storage, K: Storage> SecureSharedStorage<S, K> {
    /// Wrap a slot, sharing its contents with the `user` role
    pub fn new(base: S, registry: Arc<dyn RegistryFacade>, keystore: SharedKeyStore<K>) -> Self {
        let signature_meta = base.meta("signature");
        let keys_meta = base.meta("keys");
        Self {
            base,
            signature_meta,
            keys_meta,
            registry,
            keystore,
            roles: vec!["user".to_string()],
        }
    }

    /// Share with the given roles instead of the default `user`
    pub fn with_roles(mut self, roles: Vec<String>) -> Self {
        self.roles = roles;
        self
    }

    /// Check whether a complete payload is present and readable in principle
    pub fn exists(&self) -> bool {
        self.registry.is_ready()
            && self.base.exists()
            && self.signature_meta.exists()
            && self.keys_meta.exists()
    }

    /// Encrypt, sign and store a payload
    pub fn store_raw(&self, data: &[u8]) -> Result<()> {
        if !self.registry.is_ready() {
            return Err(RegistryError::NotReady);
        }
        let (ciphertext, key_blobs) = self.registry.hybrid_encrypt(data, &self.roles)?;
        self.keys_meta
            .store_raw(&KeyBlobRecord::new(key_blobs).to_bytes()?)?;
        let signature = SignatureRecord::sign(&self.keystore, &ciphertext)?;
        self.signature_meta.store_raw(&signature.to_bytes()?)?;
        self.base.store_raw(&ciphertext)?;
        debug!(bytes = data.len(), "stored shared payload");
        Ok(())
    }

    /// Verify and decrypt the stored payload
    ///
    /// A slot that was never written reads as empty. A present payload whose
    /// signature does not verify is an error, never empty data.
    pub fn load_raw(&self) -> Result<Vec<u8>> {
        if !self.registry.is_ready() {
            return Err(RegistryError::NotReady);
        }
        if !self.base.exists() {
            return Ok(Vec::new());
        }
        let ciphertext = self.base.load_raw()?;
        if ciphertext.is_empty() {
            return Ok(Vec::new());
        }
        let signature = SignatureRecord::from_bytes(&self.signature_meta.load_raw()?)?;
        if !signature.verify(&ciphertext)? {
            warn!("shared payload failed signature verification");
            return Err(RegistryError::VerificationFailed);
        }
        let keys = KeyBlobRecord::from_bytes(&self.keys_meta.load_raw()?)?;
        self.registry.hybrid_decrypt(&ciphertext, &keys.key_blobs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::ConfigSections;
    use crate::registry::Registry;
    use covault_crypto::KeyStore;
    use covault_store::{MemoryBank, MemoryStorage, StorageLocation};
    use parking_lot::Mutex;

    struct Fixture {
        bank: MemoryBank,
        registry: Arc<Mutex<Registry<MemoryStorage>>>,
        keystore: SharedKeyStore<MemoryStorage>,
    }

    fn admin_fixture() -> Fixture {
        let bank = MemoryBank::new();
        let mut keystore = KeyStore::new(bank.slot("keys"), b"test-salt".to_vec());
        keystore.init_user("password").unwrap();
        let keystore = keystore.into_shared();
        let mut registry = Registry::new(&bank, keystore.clone(), ConfigSections::new());
        registry.initialize_as_admin().unwrap();
        Fixture {
            bank,
            registry: Arc::new(Mutex::new(registry)),
            keystore,
        }
    }

    fn shared_slot(fixture: &Fixture, name: &str) -> SecureSharedStorage<MemoryStorage> {
        SecureSharedStorage::new(
            fixture.bank.slot(name),
            fixture.registry.clone(),
            fixture.keystore.clone(),
        )
    }

    #[test]
    fn test_roundtrip() {
        let fixture = admin_fixture();
        let storage = shared_slot(&fixture, "doc");

        assert!(!storage.exists());
        assert_eq!(storage.load_raw().unwrap(), Vec::<u8>::new());

        storage.store_raw(b"team notes").unwrap();
        assert!(storage.exists());
        assert_eq!(storage.load_raw().unwrap(), b"team notes");
    }

    #[test]
    fn test_slot_holds_only_ciphertext() {
        let fixture = admin_fixture();
        let storage = shared_slot(&fixture, "doc");
        storage.store_raw(b"team notes").unwrap();

        let raw = fixture.bank.slot("doc").load_raw().unwrap();
        assert!(!raw.windows(b"team notes".len()).any(|w| w == b"team notes"));
    }

    #[test]
    fn test_tampered_ciphertext_fails_closed() {
        let fixture = admin_fixture();
        let storage = shared_slot(&fixture, "doc");
        storage.store_raw(b"team notes").unwrap();

        let slot = fixture.bank.slot("doc");
        let mut raw = slot.load_raw().unwrap();
        raw[0] ^= 0x01;
        slot.store_raw(&raw).unwrap();

        assert!(matches!(
            storage.load_raw(),
            Err(RegistryError::VerificationFailed)
        ));
    }

    #[test]
    fn test_swapped_signature_fails_closed() {
        let fixture = admin_fixture();
        let first = shared_slot(&fixture, "first");
        let second = shared_slot(&fixture, "second");
        first.store_raw(b"one").unwrap();
        second.store_raw(b"two").unwrap();

        // graft the second slot's signature onto the first
        let foreign = fixture.bank.slot("second").meta("signature").load_raw().unwrap();
        fixture
            .bank
            .slot("first")
            .meta("signature")
            .store_raw(&foreign)
            .unwrap();

        assert!(matches!(
            first.load_raw(),
            Err(RegistryError::VerificationFailed)
        ));
    }

    #[test]
    fn test_unready_registry_is_rejected() {
        let fixture = admin_fixture();
        let storage = shared_slot(&fixture, "doc");
        fixture.keystore.lock().lock();

        assert!(!storage.exists());
        assert!(matches!(
            storage.store_raw(b"data"),
            Err(RegistryError::NotReady)
        ));
        assert!(matches!(storage.load_raw(), Err(RegistryError::NotReady)));
    }

    #[test]
    fn test_unknown_role_is_rejected() {
        let fixture = admin_fixture();
        let storage =
            shared_slot(&fixture, "doc").with_roles(vec!["ghost".to_string()]);
        assert!(matches!(
            storage.store_raw(b"data"),
            Err(RegistryError::UnknownRole(_))
        ));
    }

    #[test]
    fn test_admin_reads_role_scoped_payload() {
        let fixture = admin_fixture();
        // admin is not a member of a custom role snapshot, but is always a recipient
        let storage = shared_slot(&fixture, "doc").with_roles(vec!["admin".to_string()]);
        storage.store_raw(b"admin eyes").unwrap();
        assert_eq!(storage.load_raw().unwrap(), b"admin eyes");
    }
}
