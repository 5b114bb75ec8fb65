//! Cached companion-vault passwords.
//!
//! One vault is the *master*. Passwords of the other vaults a user opens
//! are stored encrypted under the master vault's SL5 key, so unlocking the
//! master can unlock the rest. The file holds only ciphertext and paths:
//!
//! ```json
//! { "master_vault": "/path/a.agilekeychain",
//!   "loaded_vaults": { "/path/b.agilekeychain": "U2FsdGVkX1..." } }
//! ```

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use zeroize::Zeroizing;

use crate::error::VaultError;
use crate::keychain::Keychain;

/// File name under the cache directory.
pub const CACHE_FILE: &str = "cache.json";

/// Key of the password inside each encrypted blob.
const PASSWORD_KEY: &str = "password";

/// The on-disk password cache.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct CacheFile {
    /// Vault whose key protects `loaded_vaults`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub master_vault: Option<PathBuf>,

    /// Vault path → `encrypt_json({"password": ...})` under the master's key.
    #[serde(default)]
    pub loaded_vaults: BTreeMap<String, String>,
}

/// What [`CacheFile::remember_password`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheUpdate {
    /// No master was set; the vault became the master.
    BecameMaster,
    /// The vault is the master; nothing is stored for it.
    IsMaster,
    /// The password was encrypted and stored.
    Stored,
}

impl CacheFile {
    /// Load the cache at `path`. A missing file is an empty cache.
    ///
    /// # Errors
    ///
    /// - `VaultError::Io` if the file exists but cannot be read.
    /// - `VaultError::Cache` if it is not a cache document.
    pub fn load(path: &Path) -> Result<Self, VaultError> {
        match fs::read_to_string(path) {
            Ok(contents) => serde_json::from_str(&contents)
                .map_err(|e| VaultError::Cache(format!("{}: {e}", path.display()))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(VaultError::Io(e)),
        }
    }

    /// Persist to `path`, creating parent directories.
    ///
    /// Written to a sibling `.tmp` file and renamed into place; owner-only
    /// permissions on Unix.
    ///
    /// # Errors
    ///
    /// Returns `VaultError::Io` if the directory or file cannot be written.
    pub fn save(&self, path: &Path) -> Result<(), VaultError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let mut tmp_name = path.file_name().unwrap_or_default().to_os_string();
        tmp_name.push(".tmp");
        let tmp = path.with_file_name(tmp_name);

        let json = serde_json::to_string_pretty(self)
            .map_err(|e| VaultError::Cache(e.to_string()))?;

        fs::write(&tmp, &json)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&tmp, fs::Permissions::from_mode(0o600))?;
        }

        fs::rename(&tmp, path)?;
        tracing::debug!(path = %path.display(), vaults = self.loaded_vaults.len(), "cache saved");
        Ok(())
    }

    #[must_use]
    pub fn is_master(&self, vault_path: &str) -> bool {
        self.master_vault
            .as_deref()
            .is_some_and(|master| master == Path::new(vault_path))
    }

    /// Record that `vault_path` was opened with `password`.
    ///
    /// The first vault recorded becomes the master. Later vaults have their
    /// password stored under `master`'s key.
    ///
    /// # Errors
    ///
    /// Any [`Keychain::encrypt_json`] error.
    pub fn remember_password(
        &mut self,
        master: &Keychain,
        vault_path: &str,
        password: &str,
    ) -> Result<CacheUpdate, VaultError> {
        if self.master_vault.is_none() {
            self.master_vault = Some(PathBuf::from(vault_path));
            self.loaded_vaults.remove(vault_path);
            return Ok(CacheUpdate::BecameMaster);
        }
        if self.is_master(vault_path) {
            return Ok(CacheUpdate::IsMaster);
        }

        let blob = master.encrypt_json(&json!({ "password": password }))?;
        self.loaded_vaults.insert(vault_path.to_string(), blob);
        tracing::info!(vault = %vault_path, "cached vault password");
        Ok(CacheUpdate::Stored)
    }

    /// Decrypt the stored password for `vault_path`.
    ///
    /// `Ok(None)` if nothing is stored or `vault_path` is the master.
    ///
    /// # Errors
    ///
    /// - [`Keychain::decrypt_json`] errors for a stored blob.
    /// - `VaultError::Cache` if the blob has no string `password`.
    pub fn recall_password(
        &self,
        master: &Keychain,
        vault_path: &str,
    ) -> Result<Option<SecretString>, VaultError> {
        if self.is_master(vault_path) {
            return Ok(None);
        }
        let Some(blob) = self.loaded_vaults.get(vault_path) else {
            return Ok(None);
        };

        let mut value = master.decrypt_json(blob)?;
        let password = match value.get_mut(PASSWORD_KEY).map(Value::take) {
            Some(Value::String(password)) => Zeroizing::new(password),
            _ => {
                return Err(VaultError::Cache(format!(
                    "cached entry for {vault_path} has no password"
                )))
            }
        };
        Ok(Some(SecretString::from(password.as_str())))
    }

    /// Drop the stored password for `vault_path`.
    pub fn forget(&mut self, vault_path: &str) -> bool {
        self.loaded_vaults.remove(vault_path).is_some()
    }

    /// Paths with a stored password, master excluded.
    pub fn cached_vaults(&self) -> impl Iterator<Item = &str> {
        self.loaded_vaults
            .keys()
            .map(String::as_str)
            .filter(|path| !self.is_master(path))
    }
}

// ── Tests ──────────────────────────────────────────────────────────
