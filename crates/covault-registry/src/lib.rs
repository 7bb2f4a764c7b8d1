//! # Covault Registry
//!
//! Identity registration and multi-user secure storage for covault.
//!
//! This crate provides:
//! - **UserDirectory**: A role-indexed directory of known identities and
//!   their public keys
//! - **Registry**: The local identity, both sides of the registration
//!   protocol and admin-signed configuration updates
//! - **SecurePrivateStorage**: Slots encrypted under the local master key
//! - **SecureSharedStorage**: Role-addressed slots with signed ciphertext
//!
//! ## Trust Model
//!
//! - A joiner adopts admin keys out of band, then only accepts a
//!   registration response signed by one of those admins
//! - Shared payloads are encrypted for role members plus all admins and
//!   the writer, and signed by the writer
//! - Readers verify before decrypting and fail closed
//!
//! ## Example
//!
//! ```rust,ignore
//! use covault_registry::{ConfigSections, Registry};
//! use covault_crypto::KeyStore;
//! use covault_store::{FileLocation, StorageLocation};
//!
//! let location = FileLocation::new("/vault");
//! let mut keystore = KeyStore::new(location.slot("keys"), b"app-salt".to_vec());
//! keystore.init_user("correct horse battery staple")?;
//! let mut registry = Registry::new(&location, keystore.into_shared(), ConfigSections::new());
//! if !registry.try_load()? {
//!     registry.initialize_as_admin()?;
//! }
//! ```

pub mod directory;
pub mod error;
pub mod facade;
pub mod private_storage;
pub mod protocol;
pub mod registry;
pub mod shared_storage;
pub mod user_id;

pub use directory::{UserDirectory, UserEntry, RESERVED_ROLES};
pub use error::{RegistryError, Result};
pub use facade::RegistryFacade;
pub use private_storage::SecurePrivateStorage;
pub use protocol::{
    AdminKey, AdminKeyExport, ConfigSections, ManualConfigUpdate, RegistrationRequest,
    RegistrationResponse,
};
pub use registry::Registry;
pub use shared_storage::{KeyBlobRecord, SecureSharedStorage, SignatureRecord};
pub use user_id::StoredUserId;
