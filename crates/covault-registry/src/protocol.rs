//! Wire messages of the registration protocol
//!
//! Every message is a versioned JSON document. Binary fields travel as
//! standard base64 strings so the messages can move over any text channel
//! (QR code, chat paste, config file).

use crate::{RegistryError, Result};
use covault_crypto::{base64_serde, UserId, FORMAT_VERSION};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Free-form configuration, grouped into named sections
pub type ConfigSections = BTreeMap<String, serde_json::Value>;

fn check_version(version: u8) -> Result<()> {
    if version != FORMAT_VERSION {
        return Err(RegistryError::VersionMismatch(version));
    }
    Ok(())
}

fn to_json(value: &impl Serialize) -> Result<Vec<u8>> {
    serde_json::to_vec(value).map_err(|e| RegistryError::Serialization(e.to_string()))
}

fn from_json<'a, T: Deserialize<'a>>(bytes: &'a [u8]) -> Result<T> {
    serde_json::from_slice(bytes).map_err(|e| RegistryError::Serialization(e.to_string()))
}

/// A joining user's opening message to an admin
///
/// Sent in the clear: it carries only public keys and whatever user data
/// the joiner chooses to disclose.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistrationRequest {
    pub version: u8,
    /// Free-form data about the joiner (display name, contact, device)
    pub user_data: ConfigSections,
    /// Public signing key, SPKI DER
    #[serde(with = "base64_serde")]
    pub signing_key: Vec<u8>,
    /// Public encryption key, SPKI DER
    #[serde(with = "base64_serde")]
    pub encryption_key: Vec<u8>,
}

impl RegistrationRequest {
    pub fn new(user_data: ConfigSections, signing_key: Vec<u8>, encryption_key: Vec<u8>) -> Self {
        Self {
            version: FORMAT_VERSION,
            user_data,
            signing_key,
            encryption_key,
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        to_json(self)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let request: Self = from_json(bytes)?;
        check_version(request.version)?;
        Ok(request)
    }
}

/// The admin's answer, carried inside a signed hybrid envelope
///
/// Grants the joiner their directory id, the current user directory and
/// the shared configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistrationResponse {
    pub version: u8,
    pub user_id: UserId,
    /// Serialized user directory snapshot
    #[serde(with = "base64_serde")]
    pub user_db: Vec<u8>,
    pub config_sections: ConfigSections,
}

impl RegistrationResponse {
    pub fn new(user_id: UserId, user_db: Vec<u8>, config_sections: ConfigSections) -> Self {
        Self {
            version: FORMAT_VERSION,
            user_id,
            user_db,
            config_sections,
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        to_json(self)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let response: Self = from_json(bytes)?;
        check_version(response.version)?;
        Ok(response)
    }
}

/// One admin's public keys as seen in the directory
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdminKey {
    pub id: UserId,
    /// Public signing key, SPKI DER
    #[serde(with = "base64_serde")]
    pub validation_key: Vec<u8>,
    /// Public encryption key, SPKI DER
    #[serde(with = "base64_serde")]
    pub encryption_key: Vec<u8>,
}

/// Out-of-band admin key material a joiner trusts before registering
///
/// The joiner uses this to check that a registration response was really
/// signed by an admin it already knows.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdminKeyExport {
    pub version: u8,
    pub admins: Vec<AdminKey>,
}

impl AdminKeyExport {
    pub fn new(admins: Vec<AdminKey>) -> Self {
        Self {
            version: FORMAT_VERSION,
            admins,
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        to_json(self)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let export: Self = from_json(bytes)?;
        check_version(export.version)?;
        Ok(export)
    }
}

/// An admin-authored configuration patch, carried inside a signed hybrid
/// envelope
///
/// A `None` section value deletes that section on the receiving side; a
/// present value replaces it wholesale.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManualConfigUpdate {
    pub version: u8,
    pub sections: BTreeMap<String, Option<serde_json::Value>>,
    /// Fresh directory snapshot, when the update also rotates membership
    #[serde(with = "base64_opt", default, skip_serializing_if = "Option::is_none")]
    pub user_db: Option<Vec<u8>>,
}

impl ManualConfigUpdate {
    pub fn new(
        sections: BTreeMap<String, Option<serde_json::Value>>,
        user_db: Option<Vec<u8>>,
    ) -> Self {
        Self {
            version: FORMAT_VERSION,
            sections,
            user_db,
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        to_json(self)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let update: Self = from_json(bytes)?;
        check_version(update.version)?;
        Ok(update)
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
        let s: Option<String> = Option::deserialize(d)?;
        match s {
            Some(s) => base64::engine::general_purpose::STANDARD
                .decode(&s)
                .map(Some)
                .map_err(serde::de::Error::custom),
            None => Ok(None),
        }
    }
}
