//! `agilevault-keychain` - reading Agile Keychain vaults.
//!
//! Unlocks the keyring with a master password, decrypts and normalizes
//! items, and keeps the encrypted password cache for companion vaults.
//! Primitives live in `agilevault-crypto-core`.

#![cfg_attr(test, allow(clippy::unwrap_used, clippy::arithmetic_side_effects))]

pub mod error;

pub mod keyring;

pub mod item;

pub mod source;

pub mod keychain;

pub mod cache;

pub use cache::{CacheFile, CacheUpdate, CACHE_FILE};
pub use error::{VaultError, UNLOCK_FAILED_MESSAGE};
pub use item::{Field, Item, ItemRecord, OpenContents, DEFAULT_SECTION, PASSWORD_TYPE};
pub use keychain::{ItemFailure, Keychain, ReloadReport, CACHE_LEVEL};
pub use keyring::{KeyRecord, Keyring, KeyringFile, MasterKey, SecurityLevel};
pub use source::{
    parse_contents, ContentsIndex, DirectorySource, IndexEntry, MemorySource, VaultSource,
    TOMBSTONE_TYPE,
};
