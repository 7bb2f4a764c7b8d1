//! Two-party registration demo
//!
//! This demo shows the full registration handshake between an admin and a
//! joining user, entirely in memory:
//! - The admin exports their public keys out of band
//! - The joiner sends a registration request
//! - The admin admits the joiner and answers with a signed response
//! - Both parties read the same shared encrypted document
//!
//! Run with: cargo run --example registration

use covault_crypto::{KeyStore, SharedKeyStore};
use covault_registry::{
    ConfigSections, Registry, RegistrationRequest, SecureSharedStorage,
};
use covault_store::{MemoryBank, MemoryStorage, StorageLocation};
use parking_lot::Mutex;
use serde_json::json;
use std::sync::Arc;

type Party = (Arc<Mutex<Registry<MemoryStorage>>>, SharedKeyStore<MemoryStorage>);

fn new_party(config: ConfigSections) -> anyhow::Result<Party> {
    let bank = MemoryBank::new();
    let mut keystore = KeyStore::new(bank.slot("keys"), b"covault-demo-salt".to_vec());
    keystore.init_user("password")?;
    let keystore = keystore.into_shared();
    let registry = Registry::new(&bank, keystore.clone(), config);
    Ok((Arc::new(Mutex::new(registry)), keystore))
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    println!("🤝 Covault - Registration Demo\n");

    // ==================== Admin Side ====================

    println!("👤 Admin: creating identity...");
    let mut admin_config = ConfigSections::new();
    admin_config.insert("relay".into(), json!({"url": "wss://relay.example"}));
    let (admin, admin_keys) = new_party(admin_config)?;
    let admin_id = admin.lock().initialize_as_admin()?;
    println!("   Admin id: {}", admin_id);

    // ==================== Out-of-Band Exchange ====================

    println!("\n📇 Admin: exporting public keys (hand these over out of band)...");
    let admin_key_bytes = admin.lock().get_admin_key_bytes()?;

    println!("👥 Joiner: adopting admin keys...");
    let (joiner, joiner_keys) = new_party(ConfigSections::new())?;
    joiner.lock().set_admin_key_bytes(&admin_key_bytes)?;

    // ==================== Handshake ====================

    println!("\n📨 Joiner: sending registration request...");
    let mut user_data = ConfigSections::new();
    user_data.insert("profile".into(), json!({"name": "alice"}));
    let request_bytes = joiner.lock().registration_request(user_data)?;

    println!("🛂 Admin: admitting the joiner...");
    let request = RegistrationRequest::from_bytes(&request_bytes)?;
    let id = admin
        .lock()
        .add_user_from_request(&request, &["user".to_string()])?;
    println!("   Granted id: {}", id);

    println!("📬 Admin: issuing the signed response...");
    let response = admin.lock().registration_response(id as u64)?;

    println!("✅ Joiner: applying the response...");
    joiner.lock().apply_registration_response(&response)?;
    println!(
        "   Joiner now knows {} identities and the shared config",
        joiner.lock().directory().len()
    );

    // ==================== Shared Storage ====================

    println!("\n📤 Admin: writing a shared document...");
    let medium = MemoryBank::new();
    let admin_view = SecureSharedStorage::new(medium.slot("handbook"), admin, admin_keys);
    admin_view.store_raw(b"welcome aboard, alice")?;

    println!("📥 Joiner: reading it with their own keys...");
    let joiner_view = SecureSharedStorage::new(medium.slot("handbook"), joiner, joiner_keys);
    let plaintext = joiner_view.load_raw()?;
    println!("   → {}", String::from_utf8_lossy(&plaintext));

    println!("\n✅ Done.");
    Ok(())
}
