//! RSA key pairs, OAEP encryption and PSS signatures
//!
//! Key pairs are exchanged as DER: PKCS#8 for private keys, SPKI for public
//! keys. Remote parties only ever see the SPKI bytes, which double as the
//! identity material in the user directory.

use crate::{CryptoError, Result};
use rand::rngs::OsRng;
use rsa::pkcs8::{DecodePrivateKey, DecodePublicKey, EncodePrivateKey, EncodePublicKey};
use rsa::pss::{Signature, SigningKey, VerifyingKey};
use rsa::signature::{RandomizedSigner, SignatureEncoding, Verifier};
use rsa::{Oaep, RsaPrivateKey, RsaPublicKey};
use sha2::Sha256;

/// RSA modulus size in bits
pub const RSA_KEY_BITS: usize = 2048;

/// PSS salt length in bytes: the maximum for a 2048-bit modulus with SHA-256
pub const PSS_SALT_LEN: usize = RSA_KEY_BITS / 8 - 32 - 2;

/// An RSA key pair used for either signing or encryption
#[derive(Clone)]
pub struct RsaKeyPair {
    private: RsaPrivateKey,
    public: RsaPublicKey,
}

impl RsaKeyPair {
    /// Generate a new random key pair
    pub fn generate() -> Result<Self> {
        let private = RsaPrivateKey::new(&mut OsRng, RSA_KEY_BITS)
            .map_err(|e| CryptoError::KeyGeneration(e.to_string()))?;
        let public = private.to_public_key();
        Ok(Self { private, public })
    }

    /// Restore a key pair from PKCS#8 DER bytes
    pub fn from_pkcs8_der(der: &[u8]) -> Result<Self> {
        let private = RsaPrivateKey::from_pkcs8_der(der)
            .map_err(|e| CryptoError::InvalidKey(e.to_string()))?;
        let public = private.to_public_key();
        Ok(Self { private, public })
    }

    /// Export the private key as PKCS#8 DER bytes
    pub fn private_key_der(&self) -> Result<Vec<u8>> {
        let doc = self
            .private
            .to_pkcs8_der()
            .map_err(|e| CryptoError::Serialization(e.to_string()))?;
        Ok(doc.as_bytes().to_vec())
    }

    /// Export the public key as SPKI DER bytes
    pub fn public_key_der(&self) -> Result<Vec<u8>> {
        let doc = self
            .public
            .to_public_key_der()
            .map_err(|e| CryptoError::Serialization(e.to_string()))?;
        Ok(doc.into_vec())
    }

    /// Decrypt an RSA-OAEP ciphertext produced for this key pair's public key
    pub fn oaep_decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>> {
        self.private
            .decrypt(Oaep::new::<Sha256>(), ciphertext)
            .map_err(|e| CryptoError::Decryption(e.to_string()))
    }

    /// Sign data with RSA-PSS (SHA-256, maximum salt length)
    pub fn sign(&self, data: &[u8]) -> Result<Vec<u8>> {
        let signing_key =
            SigningKey::<Sha256>::new_with_salt_len(self.private.clone(), PSS_SALT_LEN);
        let signature = signing_key.sign_with_rng(&mut OsRng, data);
        Ok(signature.to_vec())
    }
}

impl std::fmt::Debug for RsaKeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "RsaKeyPair([REDACTED])")
    }
}

/// Encrypt a short message with RSA-OAEP for the holder of the given SPKI key
pub fn oaep_encrypt(public_key_der: &[u8], message: &[u8]) -> Result<Vec<u8>> {
    let public = RsaPublicKey::from_public_key_der(public_key_der)
        .map_err(|e| CryptoError::InvalidKey(e.to_string()))?;
    public
        .encrypt(&mut OsRng, Oaep::new::<Sha256>(), message)
        .map_err(|e| CryptoError::Encryption(e.to_string()))
}

/// Verify an RSA-PSS signature against the given SPKI public key
///
/// An unparsable public key is an error; an unparsable or mismatching
/// signature is simply `false`.
pub fn verify(public_key_der: &[u8], data: &[u8], signature: &[u8]) -> Result<bool> {
    let public = RsaPublicKey::from_public_key_der(public_key_der)
        .map_err(|e| CryptoError::InvalidKey(e.to_string()))?;
    let verifying_key = VerifyingKey::<Sha256>::new(public);
    let signature = match Signature::try_from(signature) {
        Ok(sig) => sig,
        Err(_) => return Ok(false),
    };
    Ok(verifying_key.verify(data, &signature).is_ok())
}
