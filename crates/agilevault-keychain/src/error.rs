//! Vault error types for `agilevault-keychain`.

use agilevault_crypto_core::CryptoError;
use thiserror::Error;

use crate::keyring::SecurityLevel;

/// The one message shown to a user for any failed unlock.
///
/// A wrong password and a damaged keyring look the same from outside.
pub const UNLOCK_FAILED_MESSAGE: &str = "could not unlock vault with this password";

/// Errors produced by keychain operations.
#[derive(Debug, Error)]
pub enum VaultError {
    /// Cryptographic operation failed (delegated from crypto-core).
    #[error(transparent)]
    Crypto(#[from] CryptoError),

    /// A keyring entry's validation block did not reproduce its key.
    #[error("master key validation failed")]
    MasterKeyValidationFailed,

    /// A keyring entry or item declared a level other than SL3/SL5.
    #[error("unknown security level: {0}")]
    UnknownSecurityLevel(String),

    /// An item needs a master key the keyring did not provide.
    #[error("no master key for security level {0}")]
    MissingKeyForLevel(SecurityLevel),

    /// An item record has no `securityLevel`, top-level or under `openContents`.
    #[error("item {0} has no security level")]
    MissingSecurityLevel(String),

    /// The keyring document does not have the expected structure.
    #[error("keyring format error: {0}")]
    KeyringFormat(String),

    /// An item record does not have the expected structure.
    #[error("item format error: {0}")]
    ItemFormat(String),

    /// Decrypted payload or cache document is not valid JSON.
    #[error("JSON error: {0}")]
    Json(String),

    /// I/O error from the filesystem.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A vault document or item does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// The password cache could not be read, written or decoded.
    #[error("cache error: {0}")]
    Cache(String),
}

impl VaultError {
    /// Whether this error should end an unlock attempt with
    /// [`UNLOCK_FAILED_MESSAGE`].
    #[must_use]
    pub const fn is_unlock_failure(&self) -> bool {
        matches!(
            self,
            Self::MasterKeyValidationFailed
                | Self::UnknownSecurityLevel(_)
                | Self::KeyringFormat(_)
                | Self::Crypto(_)
        )
    }

    /// Text to show the user: the fixed unlock message for unlock failures,
    /// the error itself otherwise.
    #[must_use]
    pub fn user_message(&self) -> String {
        if self.is_unlock_failure() {
            UNLOCK_FAILED_MESSAGE.to_string()
        } else {
            self.to_string()
        }
    }
}

impl From<serde_json::Error> for VaultError {
    fn from(err: serde_json::Error) -> Self {
        Self::Json(err.to_string())
    }
}
