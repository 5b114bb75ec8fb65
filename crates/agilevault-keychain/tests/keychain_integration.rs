#![allow(clippy::unwrap_used, clippy::arithmetic_side_effects)]

//! End-to-end keychain tests over in-memory and on-disk vaults.

mod common;

use agilevault_keychain::{
    CacheFile, CacheUpdate, ItemRecord, Keychain, SecurityLevel, VaultError,
    UNLOCK_FAILED_MESSAGE,
};
use common::{VaultFixture, PASSWORD};
use secrecy::ExposeSecret;
use serde_json::json;
use tempfile::TempDir;

fn login(user: &str, pass: &str) -> serde_json::Value {
    json!({
        "fields": [
            {"designation": "username", "value": user, "type": "T", "name": "u"},
            {"designation": "password", "value": pass, "type": "P", "name": "p"}
        ],
        "URLs": [{"url": "https://example.com/login"}],
        "notesPlain": "work account"
    })
}

#[test]
fn wrong_password_is_a_validation_failure() {
    let fixture = VaultFixture::new();
    let err = Keychain::unlock(fixture.memory(), b"not the password").unwrap_err();
    assert!(matches!(err, VaultError::MasterKeyValidationFailed));
    assert!(err.is_unlock_failure());
    assert_eq!(err.user_message(), UNLOCK_FAILED_MESSAGE);
}

#[test]
fn both_levels_decode_their_own_items() {
    let fixture = VaultFixture::new()
        .item("AAA", "Mail", SecurityLevel::Sl5, &login("alice", "pw5"))
        .item("BBB", "Wifi", SecurityLevel::Sl3, &json!({"password": "pw3"}));
    let mut keychain = Keychain::unlock(fixture.memory(), PASSWORD.as_bytes()).unwrap();
    let report = keychain.reload().unwrap();

    assert_eq!(report.loaded, 2);
    let mail = keychain.item("AAA").unwrap();
    assert_eq!(mail.title, "Mail");
    assert_eq!(mail.notes, "work account");
    assert_eq!(mail.urls, ["https://example.com/login"]);
    assert_eq!(mail.field("username").unwrap().value, "alice");
    assert!(mail.field("password").unwrap().is_concealed);
    assert_eq!(keychain.item("BBB").unwrap().password(), Some("pw3"));
}

#[test]
fn one_corrupt_item_does_not_abort_reload() {
    let mut garbled = ItemRecord::seal(
        "BAD",
        "Broken",
        &VaultFixture::key(SecurityLevel::Sl5),
        &json!({"password": "x"}),
    )
    .unwrap();
    // Valid base64, valid envelope, ciphertext not a whole number of blocks.
    garbled.encrypted = agilevault_crypto_core::seal_transport(&[1; 8], &[0xAB; 21]);

    let fixture = VaultFixture::new()
        .item("A", "one", SecurityLevel::Sl5, &json!({}))
        .item("B", "two", SecurityLevel::Sl3, &json!({}))
        .raw_item("BAD", "webforms.WebForm", serde_json::to_vec(&garbled).unwrap())
        .item("C", "three", SecurityLevel::Sl5, &json!({}))
        .item("D", "four", SecurityLevel::Sl3, &json!({}));

    let mut keychain = Keychain::unlock(fixture.memory(), PASSWORD.as_bytes()).unwrap();
    let report = keychain.reload().unwrap();

    assert_eq!(report.loaded, 4);
    assert_eq!(keychain.len(), 4);
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].uuid, "BAD");
    assert!(matches!(report.failures[0].error, VaultError::Crypto(_)));
    assert!(keychain.item("BAD").is_none());
}

#[test]
fn items_with_bad_metadata_fail_individually() {
    let no_level = json!({"title": "x", "encrypted": "U2FsdGVkX18="});
    let bad_level = json!({"title": "x", "securityLevel": "SL1", "encrypted": "U2FsdGVkX18="});
    let fixture = VaultFixture::new()
        .item("OK", "fine", SecurityLevel::Sl5, &json!({}))
        .raw_item("NOLEVEL", "webforms.WebForm", serde_json::to_vec(&no_level).unwrap())
        .raw_item("BADLEVEL", "webforms.WebForm", serde_json::to_vec(&bad_level).unwrap())
        .raw_item("NOTJSON", "webforms.WebForm", b"<html>".to_vec());

    let mut keychain = Keychain::unlock(fixture.memory(), PASSWORD.as_bytes()).unwrap();
    let report = keychain.reload().unwrap();
    assert_eq!(report.loaded, 1);

    let error_for = |uuid: &str| {
        &report
            .failures
            .iter()
            .find(|f| f.uuid == uuid)
            .unwrap()
            .error
    };
    assert!(matches!(error_for("NOLEVEL"), VaultError::MissingSecurityLevel(_)));
    assert!(matches!(error_for("BADLEVEL"), VaultError::UnknownSecurityLevel(_)));
    assert!(matches!(error_for("NOTJSON"), VaultError::ItemFormat(_)));
}

#[test]
fn tombstones_are_not_loaded() {
    let fixture = VaultFixture::new()
        .item("LIVE", "here", SecurityLevel::Sl5, &json!({}))
        .tombstone("DEAD");
    let mut keychain = Keychain::unlock(fixture.memory(), PASSWORD.as_bytes()).unwrap();
    let report = keychain.reload().unwrap();
    assert_eq!(report.loaded, 1);
    assert_eq!(report.skipped_tombstones, 1);
    assert!(report.failures.is_empty());
}

#[test]
fn pin_section_normalizes_to_concealed_default_field() {
    let body = json!({
        "sections": [{"title": "", "fields": [{"t": "PIN", "v": "1234", "k": "concealed"}]}]
    });
    let fixture = VaultFixture::new().item("PIN", "Card", SecurityLevel::Sl5, &body);
    let mut keychain = Keychain::unlock(fixture.memory(), PASSWORD.as_bytes()).unwrap();
    keychain.reload().unwrap();

    let fields = keychain.item("PIN").unwrap().default_section();
    assert_eq!(fields.len(), 1);
    assert_eq!(fields[0].name, "PIN");
    assert_eq!(fields[0].value, "1234");
    assert!(fields[0].is_concealed);
}

#[test]
fn otp_field_in_section_yields_code() {
    let body = json!({"sections": [{"title": "2FA", "fields": [{
        "t": "one-time password",
        "v": "otpauth://totp/Example:alice?secret=GEZDGNBVGY3TQOJQGEZDGNBVGY3TQOJQ&issuer=Example",
        "k": "concealed"
    }]}]});
    let fixture = VaultFixture::new().item("OTP", "Example", SecurityLevel::Sl5, &body);
    let mut keychain = Keychain::unlock(fixture.memory(), PASSWORD.as_bytes()).unwrap();
    keychain.reload().unwrap();

    let field = &keychain.item("OTP").unwrap().sections["2FA"][0];
    assert!(field.is_otp_uri());
    assert_eq!(field.otp_code(59).unwrap(), "287082");
}

#[test]
fn directory_vault_opens_from_disk() {
    let dir = TempDir::new().unwrap();
    let root = dir.path().join("Test.agilekeychain");
    VaultFixture::new()
        .item("F00D", "Disk item", SecurityLevel::Sl5, &login("bob", "pw"))
        .write_to(&root);

    let mut keychain = Keychain::open(&root, PASSWORD.as_bytes()).unwrap();
    let report = keychain.reload().unwrap();
    assert_eq!(report.loaded, 1);
    assert_eq!(keychain.item("F00D").unwrap().field("username").unwrap().value, "bob");
    keychain.lock();
}

#[test]
fn missing_vault_directory_is_not_an_unlock_failure() {
    let dir = TempDir::new().unwrap();
    let err = Keychain::open(dir.path().join("absent"), PASSWORD.as_bytes()).unwrap_err();
    assert!(matches!(err, VaultError::NotFound(_)));
    assert!(!err.is_unlock_failure());
}

#[test]
fn master_vault_caches_companion_password() {
    let dir = TempDir::new().unwrap();
    let cache_path = dir.path().join("cache").join("cache.json");
    let master_root = dir.path().join("Master.agilekeychain");
    let other_root = dir.path().join("Other.agilekeychain");
    VaultFixture::new().write_to(&master_root);
    VaultFixture::new().write_to(&other_root);
    let master_path = master_root.display().to_string();
    let other_path = other_root.display().to_string();

    let master = Keychain::open(&master_root, PASSWORD.as_bytes()).unwrap();
    let mut cache = CacheFile::load(&cache_path).unwrap();
    assert_eq!(
        cache.remember_password(&master, &master_path, PASSWORD).unwrap(),
        CacheUpdate::BecameMaster
    );
    assert_eq!(
        cache.remember_password(&master, &other_path, PASSWORD).unwrap(),
        CacheUpdate::Stored
    );
    cache.save(&cache_path).unwrap();

    let reloaded = CacheFile::load(&cache_path).unwrap();
    assert!(!reloaded.loaded_vaults.contains_key(&master_path));
    let recalled = reloaded.recall_password(&master, &other_path).unwrap().unwrap();
    assert!(Keychain::open(&other_root, recalled.expose_secret().as_bytes()).is_ok());
}
