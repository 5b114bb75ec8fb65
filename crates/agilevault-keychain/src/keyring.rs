//! Keyring unlock: master password → per-level master keys.
//!
//! The keyring document (`encryptionKeys.js`) lists one record per
//! security level:
//!
//! ```text
//! data       = envelope(AES(PBKDF2(password, salt, iterations), key_material))
//! validation = envelope(AES(legacy_stretch(key_material, vsalt), key_material))
//! ```
//!
//! A record only yields a [`MasterKey`] if its validation block decrypts
//! back to the exact key material.

use std::fmt;
use std::str::FromStr;

use agilevault_crypto_core::cipher;
use agilevault_crypto_core::envelope::{self, SaltedEnvelope};
use agilevault_crypto_core::kdf::{self, DerivedKey, UNLOCK_KEY_LEN};
use agilevault_crypto_core::memory::SecretBuffer;
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use crate::error::VaultError;

// ── Security levels ────────────────────────────────────────────────

/// The two master-key levels an Agile Keychain can carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SecurityLevel {
    Sl3,
    Sl5,
}

impl SecurityLevel {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Sl3 => "SL3",
            Self::Sl5 => "SL5",
        }
    }
}

impl fmt::Display for SecurityLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SecurityLevel {
    type Err = VaultError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "SL3" => Ok(Self::Sl3),
            "SL5" => Ok(Self::Sl5),
            other => Err(VaultError::UnknownSecurityLevel(other.to_string())),
        }
    }
}

// ── Keyring document ───────────────────────────────────────────────

/// `encryptionKeys.js`. Only `list` is read; the per-level identifier
/// shortcuts some writers add next to it are ignored.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyringFile {
    pub list: Vec<KeyRecord>,
}

/// One keyring entry. Every field is required.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyRecord {
    /// Base64 envelope holding the key material, PBKDF2-encrypted.
    pub data: String,
    pub identifier: String,
    /// PBKDF2 round count, used as stored.
    pub iterations: i64,
    /// `"SL3"` or `"SL5"`.
    pub level: String,
    /// Base64 envelope of the key material encrypted under itself.
    pub validation: String,
}

impl KeyringFile {
    /// Parse the keyring document.
    ///
    /// # Errors
    ///
    /// Returns `VaultError::KeyringFormat` if the bytes are not JSON or any
    /// record lacks one of its fields.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, VaultError> {
        serde_json::from_slice(bytes).map_err(|e| VaultError::KeyringFormat(e.to_string()))
    }
}

impl KeyRecord {
    /// Encrypt `key_material` under `master_password` as a new keyring entry.
    ///
    /// # Errors
    ///
    /// Returns `VaultError::Crypto` if the CSPRNG or cipher fails.
    pub fn seal(
        level: SecurityLevel,
        identifier: &str,
        master_password: &[u8],
        key_material: &[u8],
        iterations: u32,
    ) -> Result<Self, VaultError> {
        let salt = envelope::random_salt()?;
        let stretched = kdf::pbkdf2_unlock(master_password, &salt, iterations, UNLOCK_KEY_LEN);
        let unlock = DerivedKey::split(stretched.expose())?;
        let data_ct = cipher::encrypt(unlock.key.expose(), unlock.iv.expose(), key_material)?;

        let vsalt = envelope::random_salt()?;
        let check = kdf::legacy_stretch(key_material, &vsalt);
        let validation_ct = cipher::encrypt(check.key.expose(), check.iv.expose(), key_material)?;

        Ok(Self {
            data: envelope::seal_transport(&salt, &data_ct),
            identifier: identifier.to_string(),
            iterations: i64::from(iterations),
            level: level.as_str().to_string(),
            validation: envelope::seal_transport(&vsalt, &validation_ct),
        })
    }

    /// PBKDF2 rounds as the KDF takes them: negative counts become zero.
    #[must_use]
    pub fn rounds(&self) -> u32 {
        u32::try_from(self.iterations.max(0)).unwrap_or(u32::MAX)
    }
}

// ── Master keys ────────────────────────────────────────────────────

/// Decrypted key material for one security level.
///
/// The material is held in a [`SecretBuffer`] and wiped when the key is
/// dropped.
pub struct MasterKey {
    level: SecurityLevel,
    id: String,
    key_material: SecretBuffer,
}

impl MasterKey {
    /// Decrypt and validate one keyring record.
    ///
    /// # Errors
    ///
    /// - `VaultError::UnknownSecurityLevel` if `level` is not SL3/SL5.
    /// - `VaultError::KeyringFormat` if `data` or `validation` is not a
    ///   decodable envelope.
    /// - `VaultError::MasterKeyValidationFailed` if the password does not
    ///   open the record or the validation block disagrees.
    pub fn unlock(record: &KeyRecord, master_password: &[u8]) -> Result<Self, VaultError> {
        let level: SecurityLevel = record.level.parse()?;
        let data = open_field("data", &record.data)?;
        let validation = open_field("validation", &record.validation)?;

        let stretched = kdf::pbkdf2_unlock(
            master_password,
            &data.salt_or_zero(),
            record.rounds(),
            UNLOCK_KEY_LEN,
        );
        let unlock = DerivedKey::split(stretched.expose())?;
        let key_material = cipher::decrypt(unlock.key.expose(), unlock.iv.expose(), &data.ciphertext)
            .map_err(|_| VaultError::MasterKeyValidationFailed)?;

        let check = DerivedKey::for_envelope(key_material.expose(), &validation);
        let echoed = cipher::decrypt(check.key.expose(), check.iv.expose(), &validation.ciphertext)
            .map_err(|_| VaultError::MasterKeyValidationFailed)?;
        if !key_material.ct_eq(echoed.expose()) {
            return Err(VaultError::MasterKeyValidationFailed);
        }

        tracing::debug!(level = %level, id = %record.identifier, "master key validated");
        Ok(Self {
            level,
            id: record.identifier.clone(),
            key_material,
        })
    }

    /// Wrap already-decrypted key material.
    #[must_use]
    pub fn from_material(level: SecurityLevel, id: &str, key_material: &[u8]) -> Self {
        Self {
            level,
            id: id.to_string(),
            key_material: SecretBuffer::new(key_material),
        }
    }

    #[must_use]
    pub const fn level(&self) -> SecurityLevel {
        self.level
    }

    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    #[must_use]
    pub const fn key_material(&self) -> &SecretBuffer {
        &self.key_material
    }

    /// Serialize `value`, encrypt it under a fresh salt and return the
    /// base64 envelope.
    ///
    /// # Errors
    ///
    /// Returns `VaultError::Crypto` if salt generation or encryption fails.
    pub fn encrypt_json(&self, value: &serde_json::Value) -> Result<String, VaultError> {
        let plaintext = Zeroizing::new(serde_json::to_vec(value)?);
        let salt = envelope::random_salt()?;
        let derived = kdf::legacy_stretch(self.key_material.expose(), &salt);
        let ct = cipher::encrypt(derived.key.expose(), derived.iv.expose(), &plaintext)?;
        Ok(envelope::seal_transport(&salt, &ct))
    }

    /// Inverse of [`encrypt_json`](Self::encrypt_json). Unsalted envelopes
    /// are accepted.
    ///
    /// # Errors
    ///
    /// - `VaultError::Crypto` on bad base64, a malformed envelope or bad padding.
    /// - `VaultError::Json` if the plaintext is not JSON.
    pub fn decrypt_json(&self, text: &str) -> Result<serde_json::Value, VaultError> {
        let plaintext = self.decrypt_bytes(text)?;
        Ok(serde_json::from_slice(plaintext.expose())?)
    }

    /// Decrypt a base64 envelope to raw plaintext.
    ///
    /// # Errors
    ///
    /// Returns `VaultError::Crypto` on bad base64, a malformed envelope or bad padding.
    pub fn decrypt_bytes(&self, text: &str) -> Result<SecretBuffer, VaultError> {
        let env = envelope::open_transport(text)?;
        let derived = DerivedKey::for_envelope(self.key_material.expose(), &env);
        Ok(cipher::decrypt(
            derived.key.expose(),
            derived.iv.expose(),
            &env.ciphertext,
        )?)
    }
}

impl fmt::Debug for MasterKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MasterKey")
            .field("level", &self.level)
            .field("id", &self.id)
            .field("key_material", &self.key_material)
            .finish()
    }
}

fn open_field(name: &str, text: &str) -> Result<SaltedEnvelope, VaultError> {
    envelope::open_transport(text)
        .map_err(|e| VaultError::KeyringFormat(format!("{name}: {e}")))
}

// ── Keyring ────────────────────────────────────────────────────────

/// The unlocked keys of one vault, at most one per level.
#[derive(Debug, Default)]
pub struct Keyring {
    level3: Option<MasterKey>,
    level5: Option<MasterKey>,
}

impl Keyring {
    /// Parse `bytes` as a keyring document and unlock every record.
    ///
    /// A later record for an already-seen level replaces the earlier one.
    ///
    /// # Errors
    ///
    /// Fails on the first record that does not unlock; see
    /// [`MasterKey::unlock`] and [`KeyringFile::from_slice`].
    pub fn unlock(bytes: &[u8], master_password: &[u8]) -> Result<Self, VaultError> {
        let file = KeyringFile::from_slice(bytes)?;
        let mut keyring = Self::default();
        for record in &file.list {
            keyring.insert(MasterKey::unlock(record, master_password)?);
        }
        tracing::info!(
            sl3 = keyring.level3.is_some(),
            sl5 = keyring.level5.is_some(),
            "keyring unlocked"
        );
        Ok(keyring)
    }

    /// Store `key` under its level, replacing any existing key.
    pub fn insert(&mut self, key: MasterKey) {
        let slot = match key.level {
            SecurityLevel::Sl3 => &mut self.level3,
            SecurityLevel::Sl5 => &mut self.level5,
        };
        if let Some(previous) = slot.as_ref() {
            tracing::warn!(
                level = %key.level,
                replaced = %previous.id,
                id = %key.id,
                "duplicate keyring level, keeping the later record"
            );
        }
        *slot = Some(key);
    }

    #[must_use]
    pub const fn get(&self, level: SecurityLevel) -> Option<&MasterKey> {
        match level {
            SecurityLevel::Sl3 => self.level3.as_ref(),
            SecurityLevel::Sl5 => self.level5.as_ref(),
        }
    }

    /// # Errors
    ///
    /// Returns `VaultError::MissingKeyForLevel` if no key was unlocked for `level`.
    pub fn require(&self, level: SecurityLevel) -> Result<&MasterKey, VaultError> {
        self.get(level).ok_or(VaultError::MissingKeyForLevel(level))
    }
}
