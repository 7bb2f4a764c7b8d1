//! Hybrid encryption: AEAD payloads with per-recipient RSA-wrapped keys
//!
//! A payload is encrypted once under a one-time symmetric key; that key is
//! then RSA-OAEP wrapped separately for every recipient. Recipients are
//! addressed either by their numeric user id or, before an id has been
//! assigned, by their raw public encryption key.

use crate::asymmetric::{oaep_encrypt, RsaKeyPair};
use crate::symmetric::{self, CipherSuite, SymmetricKey};
use crate::{base64_serde, CryptoError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Numeric identity assigned by the user directory
pub type UserId = u64;

/// Wire format version for hybrid envelopes and signed payloads
pub const FORMAT_VERSION: u8 = 1;

/// Addresses one recipient of a hybrid-encrypted payload
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RecipientId {
    /// A registered user, by directory id
    User(UserId),
    /// An unregistered party, by SPKI public encryption key
    Key(#[serde(with = "base64_serde")] Vec<u8>),
}

#[derive(Serialize, Deserialize)]
struct KeyBlobEntry {
    recipient: RecipientId,
    #[serde(with = "base64_serde")]
    blob: Vec<u8>,
}

/// Wrapped one-time keys, one per recipient
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Vec<KeyBlobEntry>", into = "Vec<KeyBlobEntry>")]
pub struct KeyBlobMap {
    blobs: BTreeMap<RecipientId, Vec<u8>>,
}

impl KeyBlobMap {
    /// Create an empty map
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a wrapped key for a recipient
    pub fn insert(&mut self, recipient: RecipientId, blob: Vec<u8>) {
        self.blobs.insert(recipient, blob);
    }

    /// Look up the wrapped key for a recipient
    pub fn get(&self, recipient: &RecipientId) -> Option<&[u8]> {
        self.blobs.get(recipient).map(Vec::as_slice)
    }

    /// Check whether a recipient is addressed
    pub fn contains(&self, recipient: &RecipientId) -> bool {
        self.blobs.contains_key(recipient)
    }

    /// Number of recipients
    pub fn len(&self) -> usize {
        self.blobs.len()
    }

    /// Check whether no recipient is addressed
    pub fn is_empty(&self) -> bool {
        self.blobs.is_empty()
    }

    /// Iterate over recipients and their wrapped keys
    pub fn iter(&self) -> impl Iterator<Item = (&RecipientId, &[u8])> {
        self.blobs.iter().map(|(r, b)| (r, b.as_slice()))
    }
}

impl From<Vec<KeyBlobEntry>> for KeyBlobMap {
    fn from(entries: Vec<KeyBlobEntry>) -> Self {
        let mut map = Self::new();
        for entry in entries {
            map.insert(entry.recipient, entry.blob);
        }
        map
    }
}

impl From<KeyBlobMap> for Vec<KeyBlobEntry> {
    fn from(map: KeyBlobMap) -> Self {
        map.blobs
            .into_iter()
            .map(|(recipient, blob)| KeyBlobEntry { recipient, blob })
            .collect()
    }
}

/// The recipients of one hybrid encryption
///
/// Duplicate recipients collapse to a single entry, so callers can add the
/// sender, all admins and the addressees without bookkeeping.
#[derive(Clone, Debug, Default)]
pub struct RecipientSet {
    entries: BTreeMap<RecipientId, Vec<u8>>,
}

impl RecipientSet {
    /// Create an empty set
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a registered user with their public encryption key
    pub fn add_user(&mut self, id: UserId, public_key_der: Vec<u8>) {
        self.entries.insert(RecipientId::User(id), public_key_der);
    }

    /// Add an unregistered party by public encryption key
    pub fn add_key(&mut self, public_key_der: Vec<u8>) {
        self.entries
            .insert(RecipientId::Key(public_key_der.clone()), public_key_der);
    }

    /// Number of distinct recipients
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check whether the set is empty
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Encrypt a payload for a set of recipients
///
/// Returns the `nonce || ciphertext` blob and the wrapped one-time key per
/// recipient. The one-time key never leaves this function unwrapped.
pub fn hybrid_encrypt(
    recipients: &RecipientSet,
    suite: CipherSuite,
    plaintext: &[u8],
) -> Result<(Vec<u8>, KeyBlobMap)> {
    if recipients.is_empty() {
        return Err(CryptoError::Encryption("no recipients".into()));
    }
    let one_time_key = SymmetricKey::generate();
    let ciphertext = symmetric::encrypt(&one_time_key, suite, plaintext)?;

    let mut key_blobs = KeyBlobMap::new();
    for (recipient, public_key_der) in &recipients.entries {
        let wrapped = oaep_encrypt(public_key_der, one_time_key.as_bytes())?;
        key_blobs.insert(recipient.clone(), wrapped);
    }
    Ok((ciphertext, key_blobs))
}

/// Decrypt a hybrid-encrypted payload
///
/// With `recipient` given, exactly that key blob is used and a missing entry
/// is [`CryptoError::KeyNotFound`]. Without it, every blob is tried until one
/// unwraps under the given key pair.
pub fn hybrid_decrypt(
    keypair: &RsaKeyPair,
    suite: CipherSuite,
    ciphertext: &[u8],
    key_blobs: &KeyBlobMap,
    recipient: Option<&RecipientId>,
) -> Result<Vec<u8>> {
    let key = match recipient {
        Some(id) => {
            let blob = key_blobs
                .get(id)
                .ok_or_else(|| CryptoError::KeyNotFound(format!("{:?}", id)))?;
            unwrap_key(keypair, blob)?
        }
        None => key_blobs
            .iter()
            .find_map(|(_, blob)| unwrap_key(keypair, blob).ok())
            .ok_or_else(|| CryptoError::KeyNotFound("no decryptable key blob".into()))?,
    };
    symmetric::decrypt(&key, suite, ciphertext)
}

fn unwrap_key(keypair: &RsaKeyPair, blob: &[u8]) -> Result<SymmetricKey> {
    let bytes = keypair.oaep_decrypt(blob)?;
    SymmetricKey::from_bytes(&bytes)
}

/// A signed payload before hybrid encryption
///
/// The signature covers `data` only. The signer's public validation key is
/// carried alongside, so the payload verifies on its own; deciding whether
/// that key is trusted is up to the receiving side.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SignedPayload {
    /// Wire format version
    pub version: u8,
    /// The signed bytes
    #[serde(with = "base64_serde")]
    pub data: Vec<u8>,
    /// SPKI DER validation key of the signer
    #[serde(with = "base64_serde")]
    pub signer: Vec<u8>,
    /// RSA-PSS signature over `data`
    #[serde(with = "base64_serde")]
    pub signature: Vec<u8>,
}

impl SignedPayload {
    /// Serialize to bytes
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| CryptoError::Serialization(e.to_string()))
    }

    /// Deserialize from bytes, rejecting unknown format versions
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let payload: Self = serde_json::from_slice(bytes)
            .map_err(|e| CryptoError::Serialization(e.to_string()))?;
        if payload.version != FORMAT_VERSION {
            return Err(CryptoError::VersionMismatch(payload.version));
        }
        Ok(payload)
    }
}

/// A decrypted and signature-checked payload
///
/// Produced by the signed-decrypt path once the embedded signature has been
/// verified against the embedded key. The signer still has to be matched
/// against a trusted directory.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SignedMessage {
    /// The verified bytes
    pub data: Vec<u8>,
    /// SPKI DER validation key of the signer
    pub signer: Vec<u8>,
}

/// A self-contained hybrid-encrypted envelope
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HybridEnvelope {
    /// Wire format version
    pub version: u8,
    /// Cipher suite used for the payload
    pub suite: CipherSuite,
    /// `nonce || ciphertext` payload blob
    #[serde(with = "base64_serde")]
    pub ciphertext: Vec<u8>,
    /// Wrapped one-time keys per recipient
    pub key_blobs: KeyBlobMap,
}

impl HybridEnvelope {
    /// Serialize to bytes
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| CryptoError::Serialization(e.to_string()))
    }

    /// Deserialize from bytes, rejecting unknown format versions
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let envelope: Self = serde_json::from_slice(bytes)
            .map_err(|e| CryptoError::Serialization(e.to_string()))?;
        if envelope.version != FORMAT_VERSION {
            return Err(CryptoError::VersionMismatch(envelope.version));
        }
        Ok(envelope)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roundtrip_for_two_users() {
        let alice = RsaKeyPair::generate().unwrap();
        let bob = RsaKeyPair::generate().unwrap();

        let mut recipients = RecipientSet::new();
        recipients.add_user(1, alice.public_key_der().unwrap());
        recipients.add_user(2, bob.public_key_der().unwrap());

        let (ciphertext, blobs) =
            hybrid_encrypt(&recipients, CipherSuite::default(), b"shared secret").unwrap();
        assert_eq!(blobs.len(), 2);

        for (keypair, id) in [(&alice, 1), (&bob, 2)] {
            let plaintext = hybrid_decrypt(
                keypair,
                CipherSuite::default(),
                &ciphertext,
                &blobs,
                Some(&RecipientId::User(id)),
            )
            .unwrap();
            assert_eq!(plaintext, b"shared secret");
        }
    }

    #[test]
    fn test_non_recipient_cannot_decrypt() {
        let alice = RsaKeyPair::generate().unwrap();
        let eve = RsaKeyPair::generate().unwrap();

        let mut recipients = RecipientSet::new();
        recipients.add_user(1, alice.public_key_der().unwrap());

        let (ciphertext, blobs) =
            hybrid_encrypt(&recipients, CipherSuite::default(), b"shared secret").unwrap();

        let missing = hybrid_decrypt(
            &eve,
            CipherSuite::default(),
            &ciphertext,
            &blobs,
            Some(&RecipientId::User(2)),
        );
        assert!(matches!(missing, Err(CryptoError::KeyNotFound(_))));

        let searched = hybrid_decrypt(&eve, CipherSuite::default(), &ciphertext, &blobs, None);
        assert!(matches!(searched, Err(CryptoError::KeyNotFound(_))));
    }

    #[test]
    fn test_key_addressed_recipient() {
        let keypair = RsaKeyPair::generate().unwrap();
        let public_der = keypair.public_key_der().unwrap();

        let mut recipients = RecipientSet::new();
        recipients.add_key(public_der.clone());

        let (ciphertext, blobs) =
            hybrid_encrypt(&recipients, CipherSuite::default(), b"pre-registration").unwrap();
        assert!(blobs.contains(&RecipientId::Key(public_der)));

        let plaintext =
            hybrid_decrypt(&keypair, CipherSuite::default(), &ciphertext, &blobs, None).unwrap();
        assert_eq!(plaintext, b"pre-registration");
    }

    #[test]
    fn test_duplicate_recipients_collapse() {
        let keypair = RsaKeyPair::generate().unwrap();
        let public_der = keypair.public_key_der().unwrap();

        let mut recipients = RecipientSet::new();
        recipients.add_user(1, public_der.clone());
        recipients.add_user(1, public_der);
        assert_eq!(recipients.len(), 1);
    }

    #[test]
    fn test_no_recipients_is_an_error() {
        let result = hybrid_encrypt(&RecipientSet::new(), CipherSuite::default(), b"data");
        assert!(result.is_err());
    }

    #[test]
    fn test_envelope_roundtrip() {
        let keypair = RsaKeyPair::generate().unwrap();
        let mut recipients = RecipientSet::new();
        recipients.add_user(7, keypair.public_key_der().unwrap());

        let (ciphertext, key_blobs) =
            hybrid_encrypt(&recipients, CipherSuite::default(), b"enveloped").unwrap();
        let envelope = HybridEnvelope {
            version: FORMAT_VERSION,
            suite: CipherSuite::default(),
            ciphertext,
            key_blobs,
        };

        let bytes = envelope.to_bytes().unwrap();
        let restored = HybridEnvelope::from_bytes(&bytes).unwrap();
        assert_eq!(restored.key_blobs, envelope.key_blobs);

        let plaintext = hybrid_decrypt(
            &keypair,
            restored.suite,
            &restored.ciphertext,
            &restored.key_blobs,
            Some(&RecipientId::User(7)),
        )
        .unwrap();
        assert_eq!(plaintext, b"enveloped");
    }

    #[test]
    fn test_envelope_rejects_unknown_version() {
        let envelope = HybridEnvelope {
            version: 99,
            suite: CipherSuite::default(),
            ciphertext: vec![1, 2, 3],
            key_blobs: KeyBlobMap::new(),
        };
        let bytes = envelope.to_bytes().unwrap();
        assert!(matches!(
            HybridEnvelope::from_bytes(&bytes),
            Err(CryptoError::VersionMismatch(99))
        ));
    }

    #[test]
    fn test_recipient_id_json_shape() {
        let user = serde_json::to_value(RecipientId::User(42)).unwrap();
        assert_eq!(user, serde_json::json!(42));

        let key = serde_json::to_value(RecipientId::Key(vec![1, 2, 3])).unwrap();
        assert!(key.is_string());

        let back: RecipientId = serde_json::from_value(key).unwrap();
        assert_eq!(back, RecipientId::Key(vec![1, 2, 3]));
    }
}
