//! Basic usage demo for the covault secure storage system
//!
//! This demo shows:
//! - Initializing and unlocking a password-protected key store
//! - Becoming the first (admin) identity
//! - Storing and loading private encrypted data
//!
//! Run with: cargo run --example basic_usage

use covault_crypto::KeyStore;
use covault_registry::{ConfigSections, Registry, SecurePrivateStorage};
use covault_store::{FileLocation, StorageLocation};

fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt::init();

    println!("🔐 Covault - Basic Usage Demo\n");

    let root = std::env::temp_dir().join("covault-basic-usage");
    std::fs::create_dir_all(&root)?;
    let location = FileLocation::new(&root);
    println!("📁 Vault location: {}", root.display());

    // ==================== Key Store ====================

    let mut keystore = KeyStore::new(location.slot("keys"), b"covault-demo-salt".to_vec());
    if keystore.is_user_initialized() {
        println!("\n🔑 Unlocking existing key store...");
        keystore.unlock_user("correct horse battery staple")?;
    } else {
        println!("\n🔑 Creating a new key store...");
        keystore.init_user("correct horse battery staple")?;
    }
    let keystore = keystore.into_shared();

    // ==================== Identity ====================

    let mut registry = Registry::new(&location, keystore.clone(), ConfigSections::new());
    if registry.try_load()? {
        println!("👤 Loaded existing identity");
    } else {
        let id = registry.initialize_as_admin()?;
        println!("👤 Initialized as admin with id {}", id);
    }

    // ==================== Private Storage ====================

    println!("\n📤 Storing a private note...");
    let notes = SecurePrivateStorage::new(location.slot("notes"), keystore);
    notes.store_raw(b"only this device can read this")?;

    println!("📥 Loading it back...");
    let plaintext = notes.load_raw()?;
    println!("   → {}", String::from_utf8_lossy(&plaintext));

    println!("\n✅ Done. Run again to see the persisted identity load.");
    Ok(())
}
