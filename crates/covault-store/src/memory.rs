//! In-memory storage for testing and paired-instance setups

use crate::{Result, Storage, StorageLocation, StoreError};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

/// A shared set of in-memory slots
///
/// Cloning a bank shares the underlying map, so two components holding slots
/// from the same bank see each other's writes. This mirrors how separate
/// processes share a common file location.
#[derive(Clone, Default)]
pub struct MemoryBank {
    slots: Arc<Mutex<HashMap<String, Vec<u8>>>>,
}

impl MemoryBank {
    /// Create a new empty bank
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of written slots
    pub fn len(&self) -> usize {
        self.slots.lock().len()
    }

    /// Check if no slot has been written
    pub fn is_empty(&self) -> bool {
        self.slots.lock().is_empty()
    }

    /// Drop all slots
    pub fn clear(&self) {
        self.slots.lock().clear();
    }
}

impl StorageLocation for MemoryBank {
    type Slot = MemoryStorage;

    fn slot(&self, name: &str) -> MemoryStorage {
        MemoryStorage {
            bank: self.clone(),
            name: name.to_string(),
        }
    }
}

/// A single named slot within a [`MemoryBank`]
#[derive(Clone)]
pub struct MemoryStorage {
    bank: MemoryBank,
    name: String,
}

impl MemoryStorage {
    /// The slot name within its bank
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl Storage for MemoryStorage {
    fn exists(&self) -> bool {
        self.bank.slots.lock().contains_key(&self.name)
    }

    fn store_raw(&self, data: &[u8]) -> Result<()> {
        self.bank.slots.lock().insert(self.name.clone(), data.to_vec());
        Ok(())
    }

    fn load_raw(&self) -> Result<Vec<u8>> {
        self.bank
            .slots
            .lock()
            .get(&self.name)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(self.name.clone()))
    }

    fn meta(&self, name: &str) -> Self {
        self.bank.slot(&format!("{}.{}", self.name, name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_roundtrip() {
        let bank = MemoryBank::new();
        let slot = bank.slot("payload");

        assert!(!slot.exists());
        slot.store_raw(b"in memory").unwrap();
        assert!(slot.exists());
        assert_eq!(slot.load_raw().unwrap(), b"in memory");
    }

    #[test]
    fn test_missing_slot_is_not_found() {
        let bank = MemoryBank::new();
        let result = bank.slot("nope").load_raw();
        assert!(matches!(result, Err(StoreError::NotFound(_))));
    }

    #[test]
    fn test_bank_is_shared_across_clones() {
        let bank = MemoryBank::new();
        let writer = bank.slot("shared");
        let reader = bank.clone().slot("shared");

        writer.store_raw(b"visible").unwrap();
        assert_eq!(reader.load_raw().unwrap(), b"visible");
    }

    #[test]
    fn test_meta_slots_are_separate() {
        let bank = MemoryBank::new();
        let slot = bank.slot("payload");
        let meta = slot.meta("keys");

        meta.store_raw(b"blob").unwrap();
        assert!(!slot.exists());
        assert!(meta.exists());
        assert_eq!(meta.name(), "payload.keys");
    }

    #[test]
    fn test_clear() {
        let bank = MemoryBank::new();
        bank.slot("a").store_raw(b"1").unwrap();
        bank.slot("b").store_raw(b"2").unwrap();
        assert_eq!(bank.len(), 2);

        bank.clear();
        assert!(bank.is_empty());
        assert!(!bank.slot("a").exists());
    }
}
