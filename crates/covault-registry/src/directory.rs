//! Role-indexed directory of known identities
//!
//! The directory maps user ids to their roles and public keys and keeps two
//! derived indexes: role name to member ids and validation key to id. It is
//! persisted wholesale, there is no incremental update on disk.

use crate::{RegistryError, Result};
use covault_crypto::{base64_serde, UserId, FORMAT_VERSION};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{info, warn};

/// Role names that always exist in the role index
pub const RESERVED_ROLES: [&str; 2] = ["admin", "user"];

/// One known identity
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserEntry {
    /// Directory id, positive and unique
    pub id: UserId,
    /// Lowercase role names
    pub roles: BTreeSet<String>,
    /// SPKI DER public key used to check this user's signatures
    #[serde(with = "base64_serde")]
    pub validation_key: Vec<u8>,
    /// SPKI DER public key used to encrypt for this user
    #[serde(with = "base64_serde")]
    pub encryption_key: Vec<u8>,
}

#[derive(Serialize, Deserialize)]
struct DirectorySnapshot {
    version: u8,
    next_id: UserId,
    unused_ids: Vec<UserId>,
    users: Vec<UserEntry>,
}

/// The in-memory user directory
///
/// A `(validation_key, encryption_key)` pair is unique across entries. A new
/// pair that only partially matches an existing entry is a conflict and is
/// reported as a negative id instead of mutating state.
#[derive(Clone, Debug)]
pub struct UserDirectory {
    next_id: UserId,
    unused_ids: Vec<UserId>,
    users: BTreeMap<UserId, UserEntry>,
    role_map: BTreeMap<String, BTreeSet<UserId>>,
    validation_key_index: BTreeMap<Vec<u8>, UserId>,
}

impl Default for UserDirectory {
    fn default() -> Self {
        Self::new()
    }
}

impl UserDirectory {
    /// Create an empty directory with the reserved roles seeded
    pub fn new() -> Self {
        let mut role_map = BTreeMap::new();
        for role in RESERVED_ROLES {
            role_map.insert(role.to_string(), BTreeSet::new());
        }
        Self {
            next_id: 1,
            unused_ids: Vec::new(),
            users: BTreeMap::new(),
            role_map,
            validation_key_index: BTreeMap::new(),
        }
    }

    /// Number of entries, including role-less ones
    pub fn len(&self) -> usize {
        self.users.len()
    }

    /// Check whether the directory has no entries
    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }

    /// Register a new identity, or recognize a known one
    ///
    /// If both keys exactly match one existing entry, its roles are updated
    /// and the same id is returned. If exactly one key matches an existing
    /// entry, the negative of that entry's id is returned and nothing is
    /// mutated. Otherwise the next id is allocated.
    pub fn add_new(
        &mut self,
        validation_key: &[u8],
        encryption_key: &[u8],
        roles: &[String],
    ) -> i64 {
        let validation_match = self.validation_key_index.get(validation_key).copied();
        let encryption_match = self
            .users
            .iter()
            .find(|(_, entry)| entry.encryption_key == encryption_key)
            .map(|(id, _)| *id);

        match (validation_match, encryption_match) {
            (Some(a), Some(b)) if a == b => {
                // idempotent re-registration, roles may have changed
                if let Err(err) = self.set_roles(a, roles) {
                    warn!(id = a, %err, "role update on re-registration failed");
                }
                info!(id = a, "re-registered known identity");
                a as i64
            }
            (None, None) => {
                let id = self.next_id;
                self.next_id += 1;
                let roles = normalize_roles(roles);
                for role in &roles {
                    self.role_map.entry(role.clone()).or_default().insert(id);
                }
                self.validation_key_index
                    .insert(validation_key.to_vec(), id);
                self.users.insert(
                    id,
                    UserEntry {
                        id,
                        roles,
                        validation_key: validation_key.to_vec(),
                        encryption_key: encryption_key.to_vec(),
                    },
                );
                info!(id, "registered new identity");
                id as i64
            }
            (Some(conflicting), _) | (None, Some(conflicting)) => {
                warn!(id = conflicting, "partial key match, rejecting registration");
                -(conflicting as i64)
            }
        }
    }

    /// Seed the first entry with the `admin` and `user` roles
    pub fn init_admin(&mut self, validation_key: &[u8], encryption_key: &[u8]) -> Result<UserId> {
        if !self.is_empty() {
            return Err(RegistryError::AlreadyInitialized);
        }
        let id = self.add_new(
            validation_key,
            encryption_key,
            &["admin".to_string(), "user".to_string()],
        );
        Ok(id as UserId)
    }

    /// Insert a pre-assigned entry, keeping its id
    ///
    /// Used when adopting identities from another directory, for example
    /// admin keys received before registration.
    pub fn seed_user(&mut self, entry: UserEntry) -> Result<()> {
        if self.users.contains_key(&entry.id) {
            return Err(RegistryError::AlreadyInitialized);
        }
        let mut entry = entry;
        entry.roles = entry
            .roles
            .iter()
            .map(|r| r.to_lowercase())
            .collect();
        for role in &entry.roles {
            self.role_map
                .entry(role.clone())
                .or_default()
                .insert(entry.id);
        }
        self.validation_key_index
            .insert(entry.validation_key.clone(), entry.id);
        self.next_id = self.next_id.max(entry.id + 1);
        self.users.insert(entry.id, entry);
        Ok(())
    }

    /// Ids holding the given role, or every id for an empty role name
    ///
    /// An unknown role yields an empty set.
    pub fn get_users(&self, role: &str) -> BTreeSet<UserId> {
        if role.is_empty() {
            return self.users.keys().copied().collect();
        }
        self.role_map
            .get(&role.to_lowercase())
            .cloned()
            .unwrap_or_default()
    }

    /// Look up a user by validation key
    pub fn get_user_by_validation_key(&self, validation_key: &[u8]) -> Option<UserId> {
        self.validation_key_index.get(validation_key).copied()
    }

    /// Strip all role memberships, keeping the entry and its keys
    ///
    /// Keys are retained so signatures over historical data stay checkable.
    /// An unknown id is tolerated.
    pub fn remove_user(&mut self, id: UserId) {
        let Some(entry) = self.users.get_mut(&id) else {
            warn!(id, "remove of unknown user ignored");
            return;
        };
        let roles = std::mem::take(&mut entry.roles);
        for role in roles {
            self.drop_role_member(&role, id);
        }
        info!(id, "removed user from all roles");
    }

    /// Remove an entry entirely, forgetting its keys
    ///
    /// The id is remembered in the unused-id list and never reused
    /// automatically. An unknown id is tolerated.
    pub fn purge_user(&mut self, id: UserId) {
        if !self.users.contains_key(&id) {
            warn!(id, "purge of unknown user ignored");
            return;
        }
        self.remove_user(id);
        if let Some(entry) = self.users.remove(&id) {
            self.validation_key_index.remove(&entry.validation_key);
        }
        self.unused_ids.push(id);
        info!(id, "purged user");
    }

    /// Check whether a user holds a role
    pub fn has_role(&self, id: UserId, role: &str) -> bool {
        self.users
            .get(&id)
            .map(|entry| entry.roles.contains(&role.to_lowercase()))
            .unwrap_or(false)
    }

    /// Check whether a role name exists in the role index
    pub fn role_exists(&self, role: &str) -> bool {
        self.role_map.contains_key(&role.to_lowercase())
    }

    /// The roles of a user
    pub fn get_roles(&self, id: UserId) -> Result<Vec<String>> {
        self.users
            .get(&id)
            .map(|entry| entry.roles.iter().cloned().collect())
            .ok_or(RegistryError::UnknownUser(id))
    }

    /// Replace a user's roles with a differential index update
    pub fn set_roles(&mut self, id: UserId, roles: &[String]) -> Result<()> {
        if !self.users.contains_key(&id) {
            return Err(RegistryError::UnknownUser(id));
        }
        let new_roles = normalize_roles(roles);
        let old_roles = self.users[&id].roles.clone();

        for stale in old_roles.difference(&new_roles) {
            self.drop_role_member(stale, id);
        }
        for added in new_roles.difference(&old_roles) {
            self.role_map.entry(added.clone()).or_default().insert(id);
        }
        if let Some(entry) = self.users.get_mut(&id) {
            entry.roles = new_roles;
        }
        Ok(())
    }

    /// The validation key of a user
    pub fn validation_key(&self, id: UserId) -> Result<&[u8]> {
        self.users
            .get(&id)
            .map(|entry| entry.validation_key.as_slice())
            .ok_or(RegistryError::UnknownUser(id))
    }

    /// The encryption key of a user
    pub fn encryption_key(&self, id: UserId) -> Result<&[u8]> {
        self.users
            .get(&id)
            .map(|entry| entry.encryption_key.as_slice())
            .ok_or(RegistryError::UnknownUser(id))
    }

    /// Resolve roles to the union of member encryption keys
    pub fn get_encryption_key_dict(&self, roles: &[String]) -> BTreeMap<UserId, Vec<u8>> {
        let mut keys = BTreeMap::new();
        for role in roles {
            for id in self.get_users(role) {
                if let Some(entry) = self.users.get(&id) {
                    keys.insert(id, entry.encryption_key.clone());
                }
            }
        }
        keys
    }

    fn drop_role_member(&mut self, role: &str, id: UserId) {
        if let Some(members) = self.role_map.get_mut(role) {
            members.remove(&id);
            if members.is_empty() && !RESERVED_ROLES.contains(&role) {
                self.role_map.remove(role);
            }
        }
    }

    /// Serialize the whole directory
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let snapshot = DirectorySnapshot {
            version: FORMAT_VERSION,
            next_id: self.next_id,
            unused_ids: self.unused_ids.clone(),
            users: self.users.values().cloned().collect(),
        };
        serde_json::to_vec(&snapshot).map_err(|e| RegistryError::Serialization(e.to_string()))
    }

    /// Restore a directory from serialized bytes, rebuilding the indexes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let snapshot: DirectorySnapshot =
            serde_json::from_slice(bytes).map_err(|e| RegistryError::Serialization(e.to_string()))?;
        if snapshot.version != FORMAT_VERSION {
            return Err(RegistryError::VersionMismatch(snapshot.version));
        }
        let mut directory = Self::new();
        directory.next_id = snapshot.next_id;
        directory.unused_ids = snapshot.unused_ids;
        for entry in snapshot.users {
            for role in &entry.roles {
                directory
                    .role_map
                    .entry(role.clone())
                    .or_default()
                    .insert(entry.id);
            }
            directory
                .validation_key_index
                .insert(entry.validation_key.clone(), entry.id);
            directory.users.insert(entry.id, entry);
        }
        Ok(directory)
    }
}

fn normalize_roles(roles: &[String]) -> BTreeSet<String> {
    roles.iter().map(|r| r.to_lowercase()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roles(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    fn filled_directory() -> UserDirectory {
        let mut dir = UserDirectory::new();
        dir.init_admin(b"admin-val", b"admin-enc").unwrap();
        let id = dir.add_new(b"user-val", b"user-enc", &roles(&["user", "new"]));
        assert_eq!(id, 2);
        dir
    }

    #[test]
    fn test_admin_gets_id_one() {
        let mut dir = UserDirectory::new();
        let id = dir.init_admin(b"admin-val", b"admin-enc").unwrap();
        assert_eq!(id, 1);
        assert!(dir.has_role(1, "admin"));
        assert!(dir.has_role(1, "user"));
    }

    #[test]
    fn test_init_admin_twice_fails() {
        let mut dir = filled_directory();
        let result = dir.init_admin(b"other-val", b"other-enc");
        assert!(matches!(result, Err(RegistryError::AlreadyInitialized)));
    }

    #[test]
    fn test_idempotent_re_registration() {
        let mut dir = filled_directory();
        let again = dir.add_new(b"user-val", b"user-enc", &roles(&["user", "extra"]));
        assert_eq!(again, 2);
        assert_eq!(dir.len(), 2);
        assert!(dir.has_role(2, "extra"));
        assert!(!dir.has_role(2, "new"));
    }

    #[test]
    fn test_partial_key_match_is_conflict() {
        let mut dir = filled_directory();

        let conflict = dir.add_new(b"user-val", b"different-enc", &roles(&["user"]));
        assert_eq!(conflict, -2);

        let conflict = dir.add_new(b"different-val", b"user-enc", &roles(&["user"]));
        assert_eq!(conflict, -2);

        // no mutation happened
        assert_eq!(dir.len(), 2);
        assert!(dir.get_user_by_validation_key(b"different-val").is_none());
    }

    #[test]
    fn test_roles_are_lowercased() {
        let mut dir = UserDirectory::new();
        dir.init_admin(b"admin-val", b"admin-enc").unwrap();
        let id = dir.add_new(b"v", b"e", &roles(&["User", "REVIEWER"])) as UserId;

        assert!(dir.has_role(id, "reviewer"));
        assert!(dir.has_role(id, "Reviewer"));
        assert_eq!(dir.get_users("REVIEWER"), BTreeSet::from([id]));
    }

    #[test]
    fn test_get_users() {
        let dir = filled_directory();
        assert_eq!(dir.get_users(""), BTreeSet::from([1, 2]));
        assert_eq!(dir.get_users("admin"), BTreeSet::from([1]));
        assert_eq!(dir.get_users("user"), BTreeSet::from([1, 2]));
        assert!(dir.get_users("nonexistent").is_empty());
    }

    #[test]
    fn test_remove_keeps_keys_for_verification() {
        let mut dir = filled_directory();
        dir.remove_user(2);

        assert_eq!(dir.get_roles(2).unwrap(), Vec::<String>::new());
        assert!(dir.validation_key(2).is_ok());
        assert_eq!(dir.get_users("user"), BTreeSet::from([1]));
        // custom role vanished with its last member
        assert!(!dir.role_exists("new"));
        assert!(dir.role_exists("user"));
    }

    #[test]
    fn test_purge_drops_keys_and_remembers_id() {
        let mut dir = filled_directory();
        dir.purge_user(2);

        assert!(matches!(
            dir.validation_key(2),
            Err(RegistryError::UnknownUser(2))
        ));
        assert!(dir.get_user_by_validation_key(b"user-val").is_none());
        assert_eq!(dir.unused_ids, vec![2]);

        // ids are not recycled
        let next = dir.add_new(b"v3", b"e3", &roles(&["user"]));
        assert_eq!(next, 3);
    }

    #[test]
    fn test_remove_and_purge_tolerate_unknown_ids() {
        let mut dir = filled_directory();
        dir.remove_user(99);
        dir.purge_user(99);
        assert_eq!(dir.len(), 2);
    }

    #[test]
    fn test_set_roles_is_differential() {
        let mut dir = filled_directory();
        dir.set_roles(2, &roles(&["reviewer"])).unwrap();

        assert_eq!(dir.get_roles(2).unwrap(), vec!["reviewer"]);
        assert_eq!(dir.get_users("user"), BTreeSet::from([1]));
        assert!(!dir.role_exists("new"));
        assert_eq!(dir.get_users("reviewer"), BTreeSet::from([2]));

        let unknown = dir.set_roles(99, &roles(&["user"]));
        assert!(matches!(unknown, Err(RegistryError::UnknownUser(99))));
    }

    #[test]
    fn test_encryption_key_dict_unions_roles() {
        let mut dir = filled_directory();
        dir.add_new(b"v3", b"e3", &roles(&["reviewer"]));

        let keys = dir.get_encryption_key_dict(&roles(&["admin", "reviewer"]));
        assert_eq!(keys.len(), 2);
        assert_eq!(keys[&1], b"admin-enc");
        assert_eq!(keys[&3], b"e3");
    }

    #[test]
    fn test_snapshot_roundtrip() {
        let mut dir = filled_directory();
        dir.purge_user(2);

        let restored = UserDirectory::from_bytes(&dir.to_bytes().unwrap()).unwrap();
        assert_eq!(restored.len(), 1);
        assert_eq!(restored.get_users("admin"), BTreeSet::from([1]));
        assert_eq!(restored.unused_ids, vec![2]);
        assert_eq!(
            restored.get_user_by_validation_key(b"admin-val"),
            Some(1)
        );

        // allocation continues where the snapshot left off
        let mut restored = restored;
        let id = restored.add_new(b"v3", b"e3", &roles(&["user"]));
        assert_eq!(id, 3);
    }

    #[test]
    fn test_seed_user_preserves_id() {
        let mut dir = UserDirectory::new();
        dir.seed_user(UserEntry {
            id: 7,
            roles: BTreeSet::from(["Admin".to_string(), "user".to_string()]),
            validation_key: b"val".to_vec(),
            encryption_key: b"enc".to_vec(),
        })
        .unwrap();

        assert!(dir.has_role(7, "admin"));
        assert_eq!(dir.get_user_by_validation_key(b"val"), Some(7));

        let id = dir.add_new(b"v8", b"e8", &roles(&["user"]));
        assert_eq!(id, 8);
    }
}
