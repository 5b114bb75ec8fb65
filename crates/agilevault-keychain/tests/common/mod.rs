//! Shared vault fixtures for integration tests.

#![allow(dead_code, clippy::unwrap_used)]

use std::fs;
use std::path::Path;

use agilevault_keychain::{ItemRecord, KeyRecord, KeyringFile, MasterKey, MemorySource, SecurityLevel};
use serde_json::{json, Value};

pub const PASSWORD: &str = "correct horse battery staple";
pub const SL3_MATERIAL: [u8; 32] = [0x33; 32];
pub const SL5_MATERIAL: [u8; 32] = [0x55; 32];

/// Documents of a small vault with both key levels.
pub struct VaultFixture {
    pub keyring: Vec<u8>,
    pub contents: Vec<Value>,
    pub items: Vec<(String, Vec<u8>)>,
}

impl VaultFixture {
    pub fn new() -> Self {
        let keyring = KeyringFile {
            list: vec![
                KeyRecord::seal(SecurityLevel::Sl3, "SL3KEY", PASSWORD.as_bytes(), &SL3_MATERIAL, 8)
                    .unwrap(),
                KeyRecord::seal(SecurityLevel::Sl5, "SL5KEY", PASSWORD.as_bytes(), &SL5_MATERIAL, 8)
                    .unwrap(),
            ],
        };
        Self {
            keyring: serde_json::to_vec(&keyring).unwrap(),
            contents: Vec::new(),
            items: Vec::new(),
        }
    }

    pub fn key(level: SecurityLevel) -> MasterKey {
        match level {
            SecurityLevel::Sl3 => MasterKey::from_material(level, "SL3KEY", &SL3_MATERIAL),
            SecurityLevel::Sl5 => MasterKey::from_material(level, "SL5KEY", &SL5_MATERIAL),
        }
    }

    /// Add an item encrypted under `level`, listed in the index.
    pub fn item(self, uuid: &str, title: &str, level: SecurityLevel, body: &Value) -> Self {
        let record = ItemRecord::seal(uuid, title, &Self::key(level), body).unwrap();
        self.raw_item(uuid, "webforms.WebForm", serde_json::to_vec(&record).unwrap())
    }

    /// Add arbitrary bytes as an item, listed in the index.
    pub fn raw_item(mut self, uuid: &str, type_name: &str, bytes: Vec<u8>) -> Self {
        self.contents.push(json!([uuid, type_name, uuid, "", 0, "", 0, "N"]));
        self.items.push((uuid.to_string(), bytes));
        self
    }

    /// List a deleted item in the index.
    pub fn tombstone(mut self, uuid: &str) -> Self {
        self.contents.push(json!([uuid, "system.Tombstone", "Deleted", "", 0, "", 0, "N"]));
        self
    }

    pub fn memory(&self) -> MemorySource {
        let mut source = MemorySource::new("fixture")
            .with_keyring(self.keyring.clone())
            .with_contents(serde_json::to_vec(&self.contents).unwrap());
        for (uuid, bytes) in &self.items {
            source.put_item(uuid, bytes.clone());
        }
        source
    }

    /// Lay the vault out as `<root>/data/default/...`.
    pub fn write_to(&self, root: &Path) {
        let data = root.join("data").join("default");
        fs::create_dir_all(&data).unwrap();
        fs::write(data.join("encryptionKeys.js"), &self.keyring).unwrap();
        fs::write(data.join("contents.js"), serde_json::to_vec(&self.contents).unwrap()).unwrap();
        for (uuid, bytes) in &self.items {
            fs::write(data.join(format!("{uuid}.1password")), bytes).unwrap();
        }
    }
}
