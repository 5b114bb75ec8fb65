//! An unlocked vault: its master keys and the decrypted item table.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use crate::error::VaultError;
use crate::item::{Item, ItemRecord};
use crate::keyring::{Keyring, MasterKey, SecurityLevel};
use crate::source::{parse_contents, DirectorySource, VaultSource};

/// Level whose key encrypts cached companion-vault passwords.
pub const CACHE_LEVEL: SecurityLevel = SecurityLevel::Sl5;

/// An item that could not be decoded during [`Keychain::reload`].
#[derive(Debug)]
pub struct ItemFailure {
    pub uuid: String,
    pub error: VaultError,
}

/// Outcome of one [`Keychain::reload`].
#[derive(Debug, Default)]
pub struct ReloadReport {
    /// Items now in the table.
    pub loaded: usize,
    pub skipped_tombstones: usize,
    /// Index rows without a usable uuid.
    pub skipped_malformed: usize,
    pub failures: Vec<ItemFailure>,
}

impl ReloadReport {
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty() && self.skipped_malformed == 0
    }
}

/// One open vault.
///
/// Holds both master keys for as long as it lives. Items are decrypted by
/// [`reload`](Self::reload) and kept until [`unload`](Self::unload) or
/// [`lock`](Self::lock).
pub struct Keychain {
    source: Box<dyn VaultSource>,
    keyring: Keyring,
    items: BTreeMap<String, Item>,
    loaded: bool,
}

impl Keychain {
    /// Read the keyring from `source` and unlock it with `master_password`.
    ///
    /// # Errors
    ///
    /// Source read errors, and any [`Keyring::unlock`] error. The latter all
    /// report [`VaultError::is_unlock_failure`].
    pub fn unlock(
        source: impl VaultSource + 'static,
        master_password: &[u8],
    ) -> Result<Self, VaultError> {
        let keyring_bytes = source.read_keyring()?;
        let keyring = Keyring::unlock(&keyring_bytes, master_password).map_err(|e| {
            tracing::warn!(vault = %source.location(), error = %e, "unlock failed");
            e
        })?;
        tracing::info!(vault = %source.location(), "vault unlocked");
        Ok(Self {
            source: Box::new(source),
            keyring,
            items: BTreeMap::new(),
            loaded: false,
        })
    }

    /// [`unlock`](Self::unlock) an `.agilekeychain` directory.
    ///
    /// # Errors
    ///
    /// See [`unlock`](Self::unlock).
    pub fn open(path: impl Into<PathBuf>, master_password: &[u8]) -> Result<Self, VaultError> {
        Self::unlock(DirectorySource::new(path), master_password)
    }

    /// The source's location string.
    #[must_use]
    pub fn location(&self) -> String {
        self.source.location()
    }

    #[must_use]
    pub const fn keyring(&self) -> &Keyring {
        &self.keyring
    }

    /// Re-read the contents index and decrypt every live item.
    ///
    /// The table is cleared first. An item that fails to read or decode is
    /// left out and listed in the report; the others still load.
    ///
    /// # Errors
    ///
    /// Only if the contents index itself cannot be read or parsed. The
    /// table is then empty and [`is_loaded`](Self::is_loaded) is false.
    pub fn reload(&mut self) -> Result<ReloadReport, VaultError> {
        self.unload();
        let index = parse_contents(&self.source.read_contents()?)?;

        let mut report = ReloadReport {
            skipped_tombstones: index.tombstones,
            skipped_malformed: index.malformed,
            ..ReloadReport::default()
        };
        for entry in index.entries {
            match self.decode_item(&entry.uuid) {
                Ok(item) => {
                    self.items.insert(entry.uuid, item);
                }
                Err(error) => {
                    tracing::warn!(uuid = %entry.uuid, error = %error, "error loading item");
                    report.failures.push(ItemFailure {
                        uuid: entry.uuid,
                        error,
                    });
                }
            }
        }

        report.loaded = self.items.len();
        self.loaded = true;
        tracing::info!(
            vault = %self.location(),
            items = report.loaded,
            failures = report.failures.len(),
            "items reloaded"
        );
        Ok(report)
    }

    /// Read and decrypt one item without touching the table.
    ///
    /// # Errors
    ///
    /// Source read errors and any [`ItemRecord::decode`] error.
    pub fn decode_item(&self, uuid: &str) -> Result<Item, VaultError> {
        let record = ItemRecord::from_slice(&self.source.read_item(uuid)?)?;
        record.decode(uuid, &self.keyring)
    }

    /// Drop every decrypted item. The keys stay.
    pub fn unload(&mut self) {
        self.items.clear();
        self.loaded = false;
    }

    #[must_use]
    pub const fn is_loaded(&self) -> bool {
        self.loaded
    }

    /// Loaded items in uuid order.
    pub fn items(&self) -> impl Iterator<Item = &Item> {
        self.items.values()
    }

    #[must_use]
    pub fn item(&self, uuid: &str) -> Option<&Item> {
        self.items.get(uuid)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Items whose title contains `needle`, ignoring case.
    pub fn search(&self, needle: &str) -> impl Iterator<Item = &Item> + '_ {
        let needle = needle.to_lowercase();
        self.items
            .values()
            .filter(move |item| item.title.to_lowercase().contains(&needle))
    }

    /// Close the vault. Keys and items are wiped as they drop.
    pub fn lock(mut self) {
        self.unload();
        tracing::info!(vault = %self.location(), "vault locked");
    }

    fn cache_key(&self) -> Result<&MasterKey, VaultError> {
        self.keyring.require(CACHE_LEVEL)
    }

    /// Encrypt `value` for the password cache.
    ///
    /// # Errors
    ///
    /// `VaultError::MissingKeyForLevel(SL5)` if the vault has no SL5 key,
    /// otherwise [`MasterKey::encrypt_json`] errors.
    pub fn encrypt_json(&self, value: &serde_json::Value) -> Result<String, VaultError> {
        self.cache_key()?.encrypt_json(value)
    }

    /// Decrypt a value written by [`encrypt_json`](Self::encrypt_json).
    ///
    /// # Errors
    ///
    /// `VaultError::MissingKeyForLevel(SL5)` if the vault has no SL5 key,
    /// otherwise [`MasterKey::decrypt_json`] errors.
    pub fn decrypt_json(&self, text: &str) -> Result<serde_json::Value, VaultError> {
        self.cache_key()?.decrypt_json(text)
    }
}

impl fmt::Debug for Keychain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Keychain")
            .field("location", &self.location())
            .field("keyring", &self.keyring)
            .field("items", &self.items.len())
            .field("loaded", &self.loaded)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::keyring::{KeyRecord, KeyringFile};
    use crate::source::MemorySource;

    const PASSWORD: &[u8] = b"master";

    fn vault(items: &[(&str, &str, serde_json::Value)]) -> MemorySource {
        let sl5 = MasterKey::from_material(SecurityLevel::Sl5, "K5", &[5; 32]);
        let keyring = KeyringFile {
            list: vec![KeyRecord::seal(SecurityLevel::Sl5, "K5", PASSWORD, &[5; 32], 4).unwrap()],
        };
        let mut contents = Vec::new();
        let mut source =
            MemorySource::new("test").with_keyring(serde_json::to_vec(&keyring).unwrap());
        for (uuid, title, body) in items {
            let record = ItemRecord::seal(uuid, title, &sl5, body).unwrap();
            source.put_item(uuid, serde_json::to_vec(&record).unwrap());
            contents.push(json!([uuid, "webforms.WebForm", title]));
        }
        source.with_contents(serde_json::to_vec(&contents).unwrap())
    }

    #[test]
    fn fresh_keychain_is_not_loaded() {
        let keychain = Keychain::unlock(vault(&[]), PASSWORD).unwrap();
        assert!(!keychain.is_loaded());
        assert!(keychain.is_empty());
    }

    #[test]
    fn reload_fills_and_unload_clears() {
        let mut keychain = Keychain::unlock(
            vault(&[("A", "Alpha", json!({"password": "a"})), ("B", "Beta", json!({}))]),
            PASSWORD,
        )
        .unwrap();
        let report = keychain.reload().unwrap();
        assert_eq!(report.loaded, 2);
        assert!(report.is_clean());
        assert!(keychain.is_loaded());
        assert_eq!(keychain.item("A").unwrap().password(), Some("a"));

        keychain.unload();
        assert!(!keychain.is_loaded());
        assert!(keychain.item("A").is_none());
    }

    #[test]
    fn missing_item_file_is_reported_not_fatal() {
        let source = vault(&[("A", "Alpha", json!({}))]).with_contents(
            serde_json::to_vec(&json!([["A", "webforms.WebForm"], ["GONE", "webforms.WebForm"]]))
                .unwrap(),
        );
        let mut keychain = Keychain::unlock(source, PASSWORD).unwrap();
        let report = keychain.reload().unwrap();
        assert_eq!(report.loaded, 1);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].uuid, "GONE");
        assert!(matches!(report.failures[0].error, VaultError::NotFound(_)));
    }

    #[test]
    fn unreadable_index_aborts_reload() {
        let mut keychain =
            Keychain::unlock(vault(&[]).with_contents(b"{".to_vec()), PASSWORD).unwrap();
        assert!(keychain.reload().is_err());
        assert!(!keychain.is_loaded());
    }

    #[test]
    fn search_matches_titles_case_insensitively() {
        let mut keychain = Keychain::unlock(
            vault(&[("A", "Work Email", json!({})), ("B", "Bank", json!({}))]),
            PASSWORD,
        )
        .unwrap();
        keychain.reload().unwrap();
        let hits: Vec<&str> = keychain.search("email").map(|i| i.uuid.as_str()).collect();
        assert_eq!(hits, ["A"]);
    }

    #[test]
    fn json_helpers_use_sl5() {
        let keychain = Keychain::unlock(vault(&[]), PASSWORD).unwrap();
        let text = keychain.encrypt_json(&json!({"password": "x"})).unwrap();
        assert_eq!(keychain.decrypt_json(&text).unwrap(), json!({"password": "x"}));
    }

    #[test]
    fn json_helpers_need_an_sl5_key() {
        let keyring = KeyringFile {
            list: vec![KeyRecord::seal(SecurityLevel::Sl3, "K3", PASSWORD, &[3; 32], 4).unwrap()],
        };
        let source = MemorySource::new("sl3").with_keyring(serde_json::to_vec(&keyring).unwrap());
        let keychain = Keychain::unlock(source, PASSWORD).unwrap();
        assert!(matches!(
            keychain.encrypt_json(&json!(1)),
            Err(VaultError::MissingKeyForLevel(SecurityLevel::Sl5))
        ));
    }
}
