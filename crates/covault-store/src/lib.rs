//! # Covault Store
//!
//! Whole-value byte storage for the covault secure-storage system.
//!
//! This crate provides:
//! - **Storage trait**: The minimal contract every backend must support:
//!   exists, store all bytes, load all bytes
//! - **Meta slots**: Named sibling slots next to a payload slot, used for
//!   auxiliary records such as signatures and key blobs
//! - **FileStorage**: One file per slot
//! - **MemoryStorage**: Shared in-memory slots for tests and paired setups
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │        Secure storage wrappers          │
//! ├─────────────────────────────────────────┤
//! │             Storage Trait               │
//! ├────────────────────┬────────────────────┤
//! │    FileStorage     │   MemoryStorage    │
//! └────────────────────┴────────────────────┘
//! ```
//!
//! Every operation is synchronous and whole-value: a slot is written or read
//! in one piece, there is no partial update.

pub mod error;
pub mod file;
pub mod memory;

pub use error::{Result, StoreError};
pub use file::{FileLocation, FileStorage};
pub use memory::{MemoryBank, MemoryStorage};

/// The minimal byte-storage contract
///
/// A `Storage` value addresses exactly one slot. `meta` derives a named
/// sibling slot next to it, sharing the same backend.
pub trait Storage {
    /// Check whether the slot has been written
    fn exists(&self) -> bool;

    /// Write all bytes, replacing any previous content
    fn store_raw(&self, data: &[u8]) -> Result<()>;

    /// Read all bytes
    fn load_raw(&self) -> Result<Vec<u8>>;

    /// Derive a named sibling slot (e.g. `signature`, `keys`)
    fn meta(&self, name: &str) -> Self
    where
        Self: Sized;
}

/// A factory for named slots within one storage location
pub trait StorageLocation {
    /// The slot type produced by this location
    type Slot: Storage;

    /// Open the slot with the given name
    fn slot(&self, name: &str) -> Self::Slot;
}
