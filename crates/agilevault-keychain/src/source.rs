//! Where a keychain's documents come from.
//!
//! The engine never opens files itself; it asks a [`VaultSource`] for raw
//! bytes and parses them. [`DirectorySource`] reads the on-disk Agile
//! Keychain layout, [`MemorySource`] holds documents in memory.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde_json::Value;

use crate::error::VaultError;

/// Index entry type for deleted items.
pub const TOMBSTONE_TYPE: &str = "system.Tombstone";

const DATA_DIR: &str = "data/default";
const KEYRING_FILE: &str = "encryptionKeys.js";
const CONTENTS_FILE: &str = "contents.js";
const ITEM_EXTENSION: &str = "1password";

/// Read access to one vault's documents.
pub trait VaultSource {
    /// A human-readable location for log lines and cache keys.
    fn location(&self) -> String;

    /// # Errors
    ///
    /// Returns `VaultError::NotFound` or `VaultError::Io` if the keyring
    /// cannot be read.
    fn read_keyring(&self) -> Result<Vec<u8>, VaultError>;

    /// # Errors
    ///
    /// Returns `VaultError::NotFound` or `VaultError::Io` if the contents
    /// index cannot be read.
    fn read_contents(&self) -> Result<Vec<u8>, VaultError>;

    /// # Errors
    ///
    /// Returns `VaultError::NotFound` or `VaultError::Io` if the item
    /// cannot be read.
    fn read_item(&self, uuid: &str) -> Result<Vec<u8>, VaultError>;
}

// ── Directory layout ───────────────────────────────────────────────

/// An `.agilekeychain` directory.
#[derive(Debug, Clone)]
pub struct DirectorySource {
    root: PathBuf,
}

impl DirectorySource {
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn data_path(&self, file: &str) -> PathBuf {
        self.root.join(DATA_DIR).join(file)
    }

    /// Path of the item file for `uuid`.
    ///
    /// # Errors
    ///
    /// Returns `VaultError::ItemFormat` if `uuid` could escape the data
    /// directory.
    pub fn item_path(&self, uuid: &str) -> Result<PathBuf, VaultError> {
        if uuid.is_empty() || uuid.contains(['/', '\\']) || uuid.starts_with('.') {
            return Err(VaultError::ItemFormat(format!("invalid item uuid: {uuid:?}")));
        }
        Ok(self.data_path(&format!("{uuid}.{ITEM_EXTENSION}")))
    }
}

fn read_file(path: &Path) -> Result<Vec<u8>, VaultError> {
    fs::read(path).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            VaultError::NotFound(path.display().to_string())
        } else {
            VaultError::Io(e)
        }
    })
}

impl VaultSource for DirectorySource {
    fn location(&self) -> String {
        self.root.display().to_string()
    }

    fn read_keyring(&self) -> Result<Vec<u8>, VaultError> {
        read_file(&self.data_path(KEYRING_FILE))
    }

    fn read_contents(&self) -> Result<Vec<u8>, VaultError> {
        read_file(&self.data_path(CONTENTS_FILE))
    }

    fn read_item(&self, uuid: &str) -> Result<Vec<u8>, VaultError> {
        read_file(&self.item_path(uuid)?)
    }
}

// ── In memory ──────────────────────────────────────────────────────

/// Vault documents held in memory.
#[derive(Debug, Clone, Default)]
pub struct MemorySource {
    name: String,
    keyring: Option<Vec<u8>>,
    contents: Option<Vec<u8>>,
    items: HashMap<String, Vec<u8>>,
}

impl MemorySource {
    #[must_use]
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_keyring(mut self, bytes: impl Into<Vec<u8>>) -> Self {
        self.keyring = Some(bytes.into());
        self
    }

    #[must_use]
    pub fn with_contents(mut self, bytes: impl Into<Vec<u8>>) -> Self {
        self.contents = Some(bytes.into());
        self
    }

    #[must_use]
    pub fn with_item(mut self, uuid: &str, bytes: impl Into<Vec<u8>>) -> Self {
        self.items.insert(uuid.to_string(), bytes.into());
        self
    }

    /// Replace or add one item document.
    pub fn put_item(&mut self, uuid: &str, bytes: impl Into<Vec<u8>>) {
        self.items.insert(uuid.to_string(), bytes.into());
    }
}

impl VaultSource for MemorySource {
    fn location(&self) -> String {
        format!("memory:{}", self.name)
    }

    fn read_keyring(&self) -> Result<Vec<u8>, VaultError> {
        self.keyring
            .clone()
            .ok_or_else(|| VaultError::NotFound(format!("{}: keyring", self.location())))
    }

    fn read_contents(&self) -> Result<Vec<u8>, VaultError> {
        self.contents
            .clone()
            .ok_or_else(|| VaultError::NotFound(format!("{}: contents", self.location())))
    }

    fn read_item(&self, uuid: &str) -> Result<Vec<u8>, VaultError> {
        self.items
            .get(uuid)
            .cloned()
            .ok_or_else(|| VaultError::NotFound(format!("{}: item {uuid}", self.location())))
    }
}

// ── Contents index ─────────────────────────────────────────────────

/// One live entry of `contents.js`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexEntry {
    pub uuid: String,
    pub type_name: String,
}

/// Entries of a parsed contents index.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContentsIndex {
    pub entries: Vec<IndexEntry>,
    pub tombstones: usize,
    /// Entries without a string uuid at position 0.
    pub malformed: usize,
}

/// Parse `contents.js`: an array of arrays, `[uuid, type, ...]`.
///
/// Tombstones and malformed entries are counted, not returned.
///
/// # Errors
///
/// Returns `VaultError::ItemFormat` if the document is not a JSON array.
pub fn parse_contents(bytes: &[u8]) -> Result<ContentsIndex, VaultError> {
    let doc: Value = serde_json::from_slice(bytes)
        .map_err(|e| VaultError::ItemFormat(format!("contents index: {e}")))?;
    let Value::Array(rows) = doc else {
        return Err(VaultError::ItemFormat("contents index is not an array".into()));
    };

    let mut index = ContentsIndex::default();
    for (position, row) in rows.iter().enumerate() {
        let uuid = row.get(0).and_then(Value::as_str);
        let type_name = row.get(1).and_then(Value::as_str).unwrap_or_default();
        if type_name == TOMBSTONE_TYPE {
            index.tombstones = index.tombstones.saturating_add(1);
            continue;
        }
        match uuid {
            Some(uuid) => index.entries.push(IndexEntry {
                uuid: uuid.to_string(),
                type_name: type_name.to_string(),
            }),
            None => {
                tracing::warn!(position, "skipping malformed contents entry");
                index.malformed = index.malformed.saturating_add(1);
            }
        }
    }
    Ok(index)
}
