//! The local identity and its view of the user directory
//!
//! A `Registry` ties together the persisted local user id, the encrypted
//! directory snapshot and the key store. It drives both sides of the
//! registration protocol and answers the trust questions the storage
//! wrappers ask through [`RegistryFacade`].

use crate::directory::{UserDirectory, UserEntry};
use crate::facade::RegistryFacade;
use crate::private_storage::SecurePrivateStorage;
use crate::protocol::{
    AdminKey, AdminKeyExport, ConfigSections, ManualConfigUpdate, RegistrationRequest,
    RegistrationResponse,
};
use crate::user_id::StoredUserId;
use crate::{RegistryError, Result};
use covault_crypto::{KeyBlobMap, RecipientId, RecipientSet, SharedKeyStore, UserId};
use covault_store::{Storage, StorageLocation};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

const ADMIN_ROLE: &str = "admin";
const USER_ROLE: &str = "user";

/// The local identity's registry
///
/// Holds the user directory in memory and persists it encrypted under the
/// local master key. All mutating directory operations persist before they
/// return.
pub struct Registry<S: Storage> {
    user_id_slot: StoredUserId<S>,
    user_db_storage: SecurePrivateStorage<S>,
    keystore: SharedKeyStore<S>,
    config: ConfigSections,
    user_id: Option<UserId>,
    directory: UserDirectory,
}

impl<S: Storage> Registry<S> {
    /// Create a registry over the given location
    ///
    /// Nothing is read yet; call [`try_load`](Self::try_load) to pick up
    /// persisted state.
    pub fn new(
        location: &impl StorageLocation<Slot = S>,
        keystore: SharedKeyStore<S>,
        config: ConfigSections,
    ) -> Self {
        Self {
            user_id_slot: StoredUserId::new(location.slot("user_id")),
            user_db_storage: SecurePrivateStorage::new(location.slot("user_db"), keystore.clone()),
            keystore,
            config,
            user_id: None,
            directory: UserDirectory::new(),
        }
    }

    /// Whether a local identity is established
    pub fn is_initialized(&self) -> bool {
        self.user_id.is_some()
    }

    /// The shared configuration sections
    pub fn config(&self) -> &ConfigSections {
        &self.config
    }

    /// The in-memory user directory
    pub fn directory(&self) -> &UserDirectory {
        &self.directory
    }

    /// Load persisted identity and directory, if any
    ///
    /// Returns `Ok(false)` when no identity was ever stored. Requires an
    /// unlocked key store since the directory snapshot is encrypted.
    pub fn try_load(&mut self) -> Result<bool> {
        if !self.keystore.lock().is_user_unlocked() {
            return Err(RegistryError::NotReady);
        }
        if !self.user_id_slot.exists() || !self.user_db_storage.exists() {
            debug!("no persisted identity found");
            return Ok(false);
        }
        let id = self.user_id_slot.load()?;
        let directory = UserDirectory::from_bytes(&self.user_db_storage.load_raw()?)?;
        self.user_id = Some(id);
        self.directory = directory;
        info!(id, users = self.directory.len(), "loaded persisted identity");
        Ok(true)
    }

    /// Become the first identity, holding the `admin` and `user` roles
    pub fn initialize_as_admin(&mut self) -> Result<UserId> {
        if self.is_initialized() || self.user_id_slot.exists() {
            return Err(RegistryError::AlreadyInitialized);
        }
        let (validation_key, encryption_key) = {
            let mut keystore = self.keystore.lock();
            (
                keystore.ensure_signing_keys()?,
                keystore.ensure_encryption_keys()?,
            )
        };
        let id = self.directory.init_admin(&validation_key, &encryption_key)?;
        self.user_id_slot.store(id)?;
        self.user_id = Some(id);
        self.persist_directory()?;
        info!(id, "initialized as admin");
        Ok(id)
    }

    fn persist_directory(&self) -> Result<()> {
        self.user_db_storage.store_raw(&self.directory.to_bytes()?)
    }

    /// The roles of a user, defaulting to the local identity
    pub fn get_roles(&self, user: Option<UserId>) -> Result<Vec<String>> {
        let id = user
            .or(self.user_id)
            .ok_or(RegistryError::NotInitialized)?;
        self.directory.get_roles(id)
    }

    /// Replace a user's roles and persist the directory
    pub fn set_roles(&mut self, id: UserId, roles: &[String]) -> Result<()> {
        self.directory.set_roles(id, roles)?;
        self.persist_directory()
    }

    /// Strip a user's roles, keeping their keys for verification
    pub fn remove_user(&mut self, id: UserId) -> Result<()> {
        self.directory.remove_user(id);
        self.persist_directory()
    }

    /// Forget a user entirely
    pub fn purge_user(&mut self, id: UserId) -> Result<()> {
        self.directory.purge_user(id);
        self.persist_directory()
    }

    /// Export the public keys of all current admins
    ///
    /// Handed to a joiner out of band so they can authenticate the
    /// registration response before trusting anything in it.
    pub fn get_admin_key_bytes(&self) -> Result<Vec<u8>> {
        let mut admins = Vec::new();
        for id in self.directory.get_users(ADMIN_ROLE) {
            admins.push(AdminKey {
                id,
                validation_key: self.directory.validation_key(id)?.to_vec(),
                encryption_key: self.directory.encryption_key(id)?.to_vec(),
            });
        }
        AdminKeyExport::new(admins).to_bytes()
    }

    /// Adopt admin keys received out of band, before registering
    ///
    /// Seeds the directory with the admin entries only. The full directory
    /// arrives later inside the registration response.
    pub fn set_admin_key_bytes(&mut self, bytes: &[u8]) -> Result<()> {
        if self.is_initialized() || self.user_id_slot.exists() {
            return Err(RegistryError::AlreadyInitialized);
        }
        let export = AdminKeyExport::from_bytes(bytes)?;
        for admin in export.admins {
            self.directory.seed_user(UserEntry {
                id: admin.id,
                roles: [ADMIN_ROLE.to_string(), USER_ROLE.to_string()]
                    .into_iter()
                    .collect(),
                validation_key: admin.validation_key,
                encryption_key: admin.encryption_key,
            })?;
        }
        info!(admins = self.directory.len(), "adopted admin keys");
        Ok(())
    }

    /// Build the opening registration message for this device
    pub fn registration_request(&self, user_data: ConfigSections) -> Result<Vec<u8>> {
        let (signing_key, encryption_key) = {
            let mut keystore = self.keystore.lock();
            (
                keystore.ensure_signing_keys()?,
                keystore.ensure_encryption_keys()?,
            )
        };
        RegistrationRequest::new(user_data, signing_key, encryption_key).to_bytes()
    }

    /// Admit a joiner into the directory
    ///
    /// Returns the directory's verdict: the new (or recognized) id, or a
    /// negative id on a key conflict. The directory is only persisted when
    /// the registration succeeded.
    pub fn add_user_from_request(
        &mut self,
        request: &RegistrationRequest,
        roles: &[String],
    ) -> Result<i64> {
        if !self.is_initialized() {
            return Err(RegistryError::NotInitialized);
        }
        let id = self
            .directory
            .add_new(&request.signing_key, &request.encryption_key, roles);
        if id > 0 {
            self.persist_directory()?;
        } else {
            warn!(id, "registration rejected by directory");
        }
        Ok(id)
    }

    /// Build the signed, encrypted registration response for an admitted user
    pub fn registration_response(&self, user_id: UserId) -> Result<Vec<u8>> {
        let encryption_key = self.directory.encryption_key(user_id)?.to_vec();
        let response =
            RegistrationResponse::new(user_id, self.directory.to_bytes()?, self.config.clone());
        let mut recipients = RecipientSet::new();
        recipients.add_key(encryption_key);
        let blob = self
            .keystore
            .lock()
            .hybrid_signed_encrypt(&response.to_bytes()?, &recipients)?;
        info!(user_id, "issued registration response");
        Ok(blob)
    }

    /// Complete the joiner's side of the registration
    ///
    /// The response must be signed by one of the admins adopted through
    /// [`set_admin_key_bytes`](Self::set_admin_key_bytes). On success the
    /// granted id, the full directory and the shared configuration replace
    /// the seeded state.
    pub fn apply_registration_response(&mut self, blob: &[u8]) -> Result<()> {
        if self.is_initialized() || self.user_id_slot.exists() {
            return Err(RegistryError::AlreadyInitialized);
        }
        let message = self.keystore.lock().hybrid_signed_decrypt(blob, None)?;
        let signer = self
            .directory
            .get_user_by_validation_key(&message.signer)
            .ok_or(RegistryError::UnknownSigner)?;
        if !self.directory.has_role(signer, ADMIN_ROLE) {
            return Err(RegistryError::Role(format!(
                "user {} is not an admin",
                signer
            )));
        }
        let response = RegistrationResponse::from_bytes(&message.data)?;
        self.config.extend(response.config_sections);
        self.user_id_slot.store(response.user_id)?;
        self.user_id = Some(response.user_id);
        self.directory = UserDirectory::from_bytes(&response.user_db)?;
        self.persist_directory()?;
        info!(id = response.user_id, signer, "registration completed");
        Ok(())
    }

    /// Sign data as the local identity
    pub fn sign(&self, data: &[u8]) -> Result<(UserId, Vec<u8>)> {
        let id = self.user_id.ok_or(RegistryError::NotInitialized)?;
        let signature = self.keystore.lock().sign(data)?;
        Ok((id, signature))
    }

    /// Check a signature against a directory member
    ///
    /// With `required_roles` given, the signer must additionally hold at
    /// least one of them. Any failure, including an unknown signer, yields
    /// `false` rather than an error.
    pub fn verify_signature(
        &self,
        data: &[u8],
        signing_user: UserId,
        signature: &[u8],
        required_roles: Option<&[String]>,
    ) -> bool {
        let Ok(validation_key) = self.directory.validation_key(signing_user) else {
            warn!(signing_user, "signature from unknown user");
            return false;
        };
        match covault_crypto::verify(validation_key, data, signature) {
            Ok(true) => {}
            _ => return false,
        }
        match required_roles {
            Some(roles) => roles
                .iter()
                .any(|role| self.directory.has_role(signing_user, role)),
            None => true,
        }
    }

    /// Build a signed, encrypted configuration patch
    ///
    /// Only admins may author updates. Sections absent from the local
    /// configuration are sent as deletions. The update is addressed to all
    /// admins and users.
    pub fn manual_config_update_bytes(
        &self,
        section_names: &[String],
        include_user_db: bool,
    ) -> Result<Vec<u8>> {
        let my_id = self.user_id.ok_or(RegistryError::NotInitialized)?;
        if !self.directory.has_role(my_id, ADMIN_ROLE) {
            return Err(RegistryError::Role(
                "only admin users can create config updates".into(),
            ));
        }
        let mut sections = BTreeMap::new();
        for name in section_names {
            sections.insert(name.clone(), self.config.get(name).cloned());
        }
        let user_db = if include_user_db {
            Some(self.directory.to_bytes()?)
        } else {
            None
        };
        let update = ManualConfigUpdate::new(sections, user_db);

        let mut recipients = RecipientSet::new();
        let roles = [ADMIN_ROLE.to_string(), USER_ROLE.to_string()];
        for (id, key) in self.directory.get_encryption_key_dict(&roles) {
            recipients.add_user(id, key);
        }
        Ok(self
            .keystore
            .lock()
            .hybrid_signed_encrypt(&update.to_bytes()?, &recipients)?)
    }

    /// Apply an admin-authored configuration patch
    ///
    /// A `None` section deletes, a present one replaces. A carried directory
    /// snapshot replaces the local directory and is persisted.
    pub fn apply_manual_config_update(&mut self, blob: &[u8]) -> Result<()> {
        let my_id = self.user_id.ok_or(RegistryError::NotReady)?;
        let message = self
            .keystore
            .lock()
            .hybrid_signed_decrypt(blob, Some(&RecipientId::User(my_id)))?;
        let signer = self
            .directory
            .get_user_by_validation_key(&message.signer)
            .ok_or(RegistryError::UnknownSigner)?;
        if !self.directory.has_role(signer, ADMIN_ROLE) {
            return Err(RegistryError::Role(format!(
                "user {} is not an admin",
                signer
            )));
        }
        let update = ManualConfigUpdate::from_bytes(&message.data)?;
        for (name, value) in update.sections {
            match value {
                Some(value) => {
                    self.config.insert(name, value);
                }
                None => {
                    self.config.remove(&name);
                }
            }
        }
        if let Some(user_db) = update.user_db {
            self.directory = UserDirectory::from_bytes(&user_db)?;
            self.persist_directory()?;
        }
        info!(signer, "applied config update");
        Ok(())
    }
}

impl<S: Storage> RegistryFacade for Registry<S> {
    fn current_identity(&self) -> Result<UserId> {
        self.user_id.ok_or(RegistryError::NotInitialized)
    }

    fn is_ready(&self) -> bool {
        self.keystore.lock().is_user_unlocked()
            && self.user_id.is_some()
            && !self.directory.is_empty()
    }

    fn resolve_roles_to_encryption_keys(
        &self,
        roles: &[String],
    ) -> Result<BTreeMap<UserId, Vec<u8>>> {
        for role in roles {
            if !self.directory.role_exists(role) {
                return Err(RegistryError::UnknownRole(role.clone()));
            }
        }
        Ok(self.directory.get_encryption_key_dict(roles))
    }

    fn hybrid_encrypt(&self, data: &[u8], roles: &[String]) -> Result<(Vec<u8>, KeyBlobMap)> {
        if !self.is_ready() {
            return Err(RegistryError::NotReady);
        }
        let mut keys = self.resolve_roles_to_encryption_keys(roles)?;
        // admins and the caller can always recover shared payloads
        for id in self.directory.get_users(ADMIN_ROLE) {
            keys.insert(id, self.directory.encryption_key(id)?.to_vec());
        }
        let my_id = self.current_identity()?;
        keys.insert(my_id, self.directory.encryption_key(my_id)?.to_vec());

        let mut recipients = RecipientSet::new();
        for (id, key) in keys {
            recipients.add_user(id, key);
        }
        let suite = self.keystore.lock().suite();
        Ok(covault_crypto::hybrid_encrypt(&recipients, suite, data)?)
    }

    fn hybrid_decrypt(&self, ciphertext: &[u8], key_blobs: &KeyBlobMap) -> Result<Vec<u8>> {
        let my_id = self.user_id.ok_or(RegistryError::NotReady)?;
        let keystore = self.keystore.lock();
        let suite = keystore.suite();
        Ok(keystore.hybrid_decrypt(
            suite,
            ciphertext,
            key_blobs,
            Some(&RecipientId::User(my_id)),
        )?)
    }
}

impl<S: Storage> RegistryFacade for Mutex<Registry<S>> {
    fn current_identity(&self) -> Result<UserId> {
        self.lock().current_identity()
    }

    fn is_ready(&self) -> bool {
        self.lock().is_ready()
    }

    fn resolve_roles_to_encryption_keys(
        &self,
        roles: &[String],
    ) -> Result<BTreeMap<UserId, Vec<u8>>> {
        self.lock().resolve_roles_to_encryption_keys(roles)
    }

    fn hybrid_encrypt(&self, data: &[u8], roles: &[String]) -> Result<(Vec<u8>, KeyBlobMap)> {
        self.lock().hybrid_encrypt(data, roles)
    }

    fn hybrid_decrypt(&self, ciphertext: &[u8], key_blobs: &KeyBlobMap) -> Result<Vec<u8>> {
        self.lock().hybrid_decrypt(ciphertext, key_blobs)
    }
}
