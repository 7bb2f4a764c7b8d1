//! Password-protected persistent key store
//!
//! All of a user's key material lives in one bundle: the master key for
//! private symmetric encryption plus the optional RSA signing and encryption
//! key pairs. The bundle is stored AEAD-encrypted under a cache key derived
//! from the user's password, so a wrong password and a tampered bundle are
//! indistinguishable at unlock time.
//!
//! Signing and encryption key pairs are generated lazily: the first operation
//! that needs one creates it and persists the updated bundle.

use crate::asymmetric::{self, RsaKeyPair};
use crate::hybrid::{
    self, HybridEnvelope, KeyBlobMap, RecipientId, RecipientSet, SignedMessage, SignedPayload,
    FORMAT_VERSION,
};
use crate::kdf::derive_cache_key;
use crate::symmetric::{self, CipherSuite, SymmetricKey};
use crate::{base64_serde, CryptoError, Result};
use covault_store::Storage;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info};
use zeroize::{Zeroize, ZeroizeOnDrop};

/// A key store behind a shared lock
///
/// Components that must see each other's lazily generated keys hold clones
/// of the same `SharedKeyStore`.
pub type SharedKeyStore<S> = Arc<Mutex<KeyStore<S>>>;

/// Serialized key bundle, as stored inside the encrypted slot
#[derive(Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
struct KeyBundle {
    version: u8,
    #[serde(with = "base64_serde")]
    master_key: Vec<u8>,
    #[serde(default, with = "base64_opt")]
    signing: Option<Vec<u8>>,
    #[serde(default, with = "base64_opt")]
    encryption: Option<Vec<u8>>,
}

struct Unlocked {
    cache_key: SymmetricKey,
    master_key: SymmetricKey,
    signing: Option<RsaKeyPair>,
    encryption: Option<RsaKeyPair>,
}

/// Password-derived key store over a storage slot
pub struct KeyStore<S: Storage> {
    storage: S,
    salt: Vec<u8>,
    suite: CipherSuite,
    state: Option<Unlocked>,
}

impl<S: Storage> KeyStore<S> {
    /// Create a key store over the given slot
    ///
    /// The salt must stay stable across runs, it is part of the password
    /// derivation and not stored with the bundle.
    pub fn new(storage: S, salt: impl Into<Vec<u8>>) -> Self {
        Self {
            storage,
            salt: salt.into(),
            suite: CipherSuite::default(),
            state: None,
        }
    }

    /// Use a non-default cipher suite for the bundle and private payloads
    pub fn with_suite(mut self, suite: CipherSuite) -> Self {
        self.suite = suite;
        self
    }

    /// Wrap this store for sharing between components
    pub fn into_shared(self) -> SharedKeyStore<S> {
        Arc::new(Mutex::new(self))
    }

    /// The cipher suite in use
    pub fn suite(&self) -> CipherSuite {
        self.suite
    }

    /// Check whether a bundle has ever been stored
    pub fn is_user_initialized(&self) -> bool {
        self.storage.exists()
    }

    /// Check whether the store is currently unlocked
    pub fn is_user_unlocked(&self) -> bool {
        self.state.is_some()
    }

    /// Initialize a fresh store with a new master key
    ///
    /// Fails if a bundle already exists, initialization never overwrites
    /// stored key material.
    pub fn init_user(&mut self, password: &str) -> Result<()> {
        if self.is_user_initialized() {
            return Err(CryptoError::AlreadyInitialized);
        }
        let cache_key = derive_cache_key(password, &self.salt);
        self.state = Some(Unlocked {
            cache_key,
            master_key: SymmetricKey::generate(),
            signing: None,
            encryption: None,
        });
        self.persist()?;
        info!("initialized key store");
        Ok(())
    }

    /// Unlock an existing store with the user's password
    pub fn unlock_user(&mut self, password: &str) -> Result<()> {
        if !self.is_user_initialized() {
            return Err(CryptoError::NotInitialized);
        }
        let cache_key = derive_cache_key(password, &self.salt);
        let blob = self.storage.load_raw()?;
        let plaintext = symmetric::decrypt(&cache_key, self.suite, &blob)?;
        let bundle: KeyBundle = serde_json::from_slice(&plaintext)
            .map_err(|e| CryptoError::Serialization(e.to_string()))?;
        if bundle.version != FORMAT_VERSION {
            return Err(CryptoError::VersionMismatch(bundle.version));
        }

        let signing = match &bundle.signing {
            Some(der) => Some(RsaKeyPair::from_pkcs8_der(der)?),
            None => None,
        };
        let encryption = match &bundle.encryption {
            Some(der) => Some(RsaKeyPair::from_pkcs8_der(der)?),
            None => None,
        };
        self.state = Some(Unlocked {
            cache_key,
            master_key: SymmetricKey::from_bytes(&bundle.master_key)?,
            signing,
            encryption,
        });
        debug!("unlocked key store");
        Ok(())
    }

    /// Lock the store, dropping all in-memory key material
    pub fn lock(&mut self) {
        self.state = None;
    }

    fn unlocked(&self) -> Result<&Unlocked> {
        self.state.as_ref().ok_or(CryptoError::NotUnlocked)
    }

    fn persist(&self) -> Result<()> {
        let state = self.unlocked()?;
        let bundle = KeyBundle {
            version: FORMAT_VERSION,
            master_key: state.master_key.as_bytes().to_vec(),
            signing: match &state.signing {
                Some(kp) => Some(kp.private_key_der()?),
                None => None,
            },
            encryption: match &state.encryption {
                Some(kp) => Some(kp.private_key_der()?),
                None => None,
            },
        };
        let plaintext = zeroize::Zeroizing::new(
            serde_json::to_vec(&bundle).map_err(|e| CryptoError::Serialization(e.to_string()))?,
        );
        let blob = symmetric::encrypt(&state.cache_key, self.suite, &plaintext)?;
        self.storage.store_raw(&blob)?;
        debug!(bytes = blob.len(), "persisted key bundle");
        Ok(())
    }

    /// Encrypt private data under the master key
    pub fn encrypt_to_bytes(&self, data: &[u8]) -> Result<Vec<u8>> {
        let state = self.unlocked()?;
        symmetric::encrypt(&state.master_key, self.suite, data)
    }

    /// Decrypt private data encrypted with [`encrypt_to_bytes`](Self::encrypt_to_bytes)
    pub fn decrypt_from_bytes(&self, blob: &[u8]) -> Result<Vec<u8>> {
        let state = self.unlocked()?;
        symmetric::decrypt(&state.master_key, self.suite, blob)
    }

    /// Ensure a signing key pair exists and return its public SPKI DER
    pub fn ensure_signing_keys(&mut self) -> Result<Vec<u8>> {
        self.unlocked()?;
        if self.state.as_ref().and_then(|s| s.signing.as_ref()).is_none() {
            let keypair = RsaKeyPair::generate()?;
            if let Some(state) = self.state.as_mut() {
                state.signing = Some(keypair);
            }
            self.persist()?;
            info!("generated signing key pair");
        }
        self.signing_public_key()
    }

    /// Ensure an encryption key pair exists and return its public SPKI DER
    pub fn ensure_encryption_keys(&mut self) -> Result<Vec<u8>> {
        self.unlocked()?;
        if self.state.as_ref().and_then(|s| s.encryption.as_ref()).is_none() {
            let keypair = RsaKeyPair::generate()?;
            if let Some(state) = self.state.as_mut() {
                state.encryption = Some(keypair);
            }
            self.persist()?;
            info!("generated encryption key pair");
        }
        self.encryption_public_key()
    }

    /// The public signing (validation) key, if one has been generated
    pub fn signing_public_key(&self) -> Result<Vec<u8>> {
        self.unlocked()?
            .signing
            .as_ref()
            .ok_or_else(|| CryptoError::KeyNotFound("signing key pair".into()))?
            .public_key_der()
    }

    /// The public encryption key, if one has been generated
    pub fn encryption_public_key(&self) -> Result<Vec<u8>> {
        self.unlocked()?
            .encryption
            .as_ref()
            .ok_or_else(|| CryptoError::KeyNotFound("encryption key pair".into()))?
            .public_key_der()
    }

    /// Sign data with the (lazily created) signing key pair
    pub fn sign(&mut self, data: &[u8]) -> Result<Vec<u8>> {
        self.ensure_signing_keys()?;
        self.unlocked()?
            .signing
            .as_ref()
            .ok_or_else(|| CryptoError::KeyNotFound("signing key pair".into()))?
            .sign(data)
    }

    /// Decrypt a hybrid payload addressed to this store's encryption key
    pub fn hybrid_decrypt(
        &self,
        suite: CipherSuite,
        ciphertext: &[u8],
        key_blobs: &KeyBlobMap,
        recipient: Option<&RecipientId>,
    ) -> Result<Vec<u8>> {
        let keypair = self
            .unlocked()?
            .encryption
            .as_ref()
            .ok_or_else(|| CryptoError::KeyNotFound("encryption key pair".into()))?;
        hybrid::hybrid_decrypt(keypair, suite, ciphertext, key_blobs, recipient)
    }

    /// Sign data and hybrid-encrypt the signed payload into one envelope blob
    ///
    /// The payload carries this store's public validation key as the signer.
    pub fn hybrid_signed_encrypt(
        &mut self,
        data: &[u8],
        recipients: &RecipientSet,
    ) -> Result<Vec<u8>> {
        let signer = self.ensure_signing_keys()?;
        let signature = self.sign(data)?;
        let payload = SignedPayload {
            version: FORMAT_VERSION,
            data: data.to_vec(),
            signer,
            signature,
        };
        let (ciphertext, key_blobs) =
            hybrid::hybrid_encrypt(recipients, self.suite, &payload.to_bytes()?)?;
        HybridEnvelope {
            version: FORMAT_VERSION,
            suite: self.suite,
            ciphertext,
            key_blobs,
        }
        .to_bytes()
    }

    /// Open an envelope blob addressed to this store and check its signature
    ///
    /// The embedded signature is verified against the embedded validation
    /// key. Whether that key belongs to a trusted identity is the caller's
    /// decision, made against their user directory.
    pub fn hybrid_signed_decrypt(
        &self,
        blob: &[u8],
        recipient: Option<&RecipientId>,
    ) -> Result<SignedMessage> {
        let envelope = HybridEnvelope::from_bytes(blob)?;
        let plaintext = self.hybrid_decrypt(
            envelope.suite,
            &envelope.ciphertext,
            &envelope.key_blobs,
            recipient,
        )?;
        let payload = SignedPayload::from_bytes(&plaintext)?;
        if !asymmetric::verify(&payload.signer, &payload.data, &payload.signature)? {
            return Err(CryptoError::SignatureVerification);
        }
        Ok(SignedMessage {
            data: payload.data,
            signer: payload.signer,
        })
    }
}

mod base64_opt {
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &Option<Vec<u8>>, s: S) -> Result<S::Ok, S::Error> {
        match bytes {
            Some(b) => s.serialize_some(&base64::engine::general_purpose::STANDARD.encode(b)),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Vec<u8>>, D::Error> {
        let opt = Option::<String>::deserialize(d)?;
        opt.map(|s| {
            base64::engine::general_purpose::STANDARD
                .decode(&s)
                .map_err(serde::de::Error::custom)
        })
        .transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asymmetric;
    use covault_store::{MemoryBank, StorageLocation};

    fn fresh_store(bank: &MemoryBank, slot: &str) -> KeyStore<covault_store::MemoryStorage> {
        KeyStore::new(bank.slot(slot), b"test-salt".to_vec())
    }

    #[test]
    fn test_init_and_unlock() {
        let bank = MemoryBank::new();
        let mut store = fresh_store(&bank, "alice");

        assert!(!store.is_user_initialized());
        store.init_user("hunter2").unwrap();
        assert!(store.is_user_initialized());
        assert!(store.is_user_unlocked());

        let blob = store.encrypt_to_bytes(b"private note").unwrap();
        store.lock();
        assert!(!store.is_user_unlocked());

        store.unlock_user("hunter2").unwrap();
        assert_eq!(store.decrypt_from_bytes(&blob).unwrap(), b"private note");
    }

    #[test]
    fn test_wrong_password_is_authentication_error() {
        let bank = MemoryBank::new();
        let mut store = fresh_store(&bank, "alice");
        store.init_user("hunter2").unwrap();
        store.lock();

        let result = store.unlock_user("*******");
        assert!(matches!(result, Err(CryptoError::Authentication(_))));
        assert!(!store.is_user_unlocked());
    }

    #[test]
    fn test_double_init_is_rejected() {
        let bank = MemoryBank::new();
        let mut store = fresh_store(&bank, "alice");
        store.init_user("hunter2").unwrap();

        let result = fresh_store(&bank, "alice").init_user("other");
        assert!(matches!(result, Err(CryptoError::AlreadyInitialized)));
    }

    #[test]
    fn test_unlock_uninitialized_is_rejected() {
        let bank = MemoryBank::new();
        let mut store = fresh_store(&bank, "alice");
        assert!(matches!(
            store.unlock_user("hunter2"),
            Err(CryptoError::NotInitialized)
        ));
    }

    #[test]
    fn test_locked_store_refuses_operations() {
        let bank = MemoryBank::new();
        let store = fresh_store(&bank, "alice");
        assert!(matches!(
            store.encrypt_to_bytes(b"data"),
            Err(CryptoError::NotUnlocked)
        ));
        assert!(matches!(
            store.signing_public_key(),
            Err(CryptoError::NotUnlocked)
        ));
    }

    #[test]
    fn test_lazy_keys_survive_relock() {
        let bank = MemoryBank::new();
        let mut store = fresh_store(&bank, "alice");
        store.init_user("hunter2").unwrap();

        let signing = store.ensure_signing_keys().unwrap();
        let encryption = store.ensure_encryption_keys().unwrap();
        assert_ne!(signing, encryption);

        store.lock();
        store.unlock_user("hunter2").unwrap();
        assert_eq!(store.signing_public_key().unwrap(), signing);
        assert_eq!(store.encryption_public_key().unwrap(), encryption);

        // ensure is idempotent once keys exist
        assert_eq!(store.ensure_signing_keys().unwrap(), signing);
    }

    #[test]
    fn test_sign_and_verify() {
        let bank = MemoryBank::new();
        let mut store = fresh_store(&bank, "alice");
        store.init_user("hunter2").unwrap();

        let signature = store.sign(b"signed bytes").unwrap();
        let public = store.signing_public_key().unwrap();
        assert!(asymmetric::verify(&public, b"signed bytes", &signature).unwrap());
        assert!(!asymmetric::verify(&public, b"other bytes", &signature).unwrap());
    }

    #[test]
    fn test_signed_envelope_between_two_stores() {
        let bank = MemoryBank::new();
        let mut alice = fresh_store(&bank, "alice");
        let mut bob = fresh_store(&bank, "bob");
        alice.init_user("alice-pw").unwrap();
        bob.init_user("bob-pw").unwrap();

        let bob_encryption = bob.ensure_encryption_keys().unwrap();
        let alice_validation = alice.ensure_signing_keys().unwrap();

        let mut recipients = RecipientSet::new();
        recipients.add_user(2, bob_encryption);
        let blob = alice.hybrid_signed_encrypt(b"hello bob", &recipients).unwrap();

        let message = bob
            .hybrid_signed_decrypt(&blob, Some(&RecipientId::User(2)))
            .unwrap();
        assert_eq!(message.data, b"hello bob");
        assert_eq!(message.signer, alice_validation);
    }

    #[test]
    fn test_tampered_envelope_fails_closed() {
        let bank = MemoryBank::new();
        let mut alice = fresh_store(&bank, "alice");
        let mut bob = fresh_store(&bank, "bob");
        alice.init_user("alice-pw").unwrap();
        bob.init_user("bob-pw").unwrap();

        let mut recipients = RecipientSet::new();
        recipients.add_user(2, bob.ensure_encryption_keys().unwrap());
        let blob = alice.hybrid_signed_encrypt(b"hello bob", &recipients).unwrap();

        let mut envelope = HybridEnvelope::from_bytes(&blob).unwrap();
        let last = envelope.ciphertext.len() - 1;
        envelope.ciphertext[last] ^= 0x01;
        let tampered = envelope.to_bytes().unwrap();

        let result = bob.hybrid_signed_decrypt(&tampered, Some(&RecipientId::User(2)));
        assert!(result.is_err());
    }

    #[test]
    fn test_envelope_is_opaque_to_non_recipient() {
        let bank = MemoryBank::new();
        let mut alice = fresh_store(&bank, "alice");
        let mut bob = fresh_store(&bank, "bob");
        let mut eve = fresh_store(&bank, "eve");
        alice.init_user("alice-pw").unwrap();
        bob.init_user("bob-pw").unwrap();
        eve.init_user("eve-pw").unwrap();
        eve.ensure_encryption_keys().unwrap();

        let mut recipients = RecipientSet::new();
        recipients.add_user(2, bob.ensure_encryption_keys().unwrap());
        let blob = alice.hybrid_signed_encrypt(b"hello bob", &recipients).unwrap();

        assert!(eve.hybrid_signed_decrypt(&blob, None).is_err());
    }
}
