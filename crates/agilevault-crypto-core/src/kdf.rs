//! Key derivation for Agile Keychain blobs.
//!
//! Two derivations are in play:
//! - [`pbkdf2_unlock`] stretches the master password (PBKDF2-HMAC-SHA1 with the
//!   salt and iteration count stored in the keyring record).
//! - [`legacy_stretch`] / [`legacy_stretch_no_salt`] turn decrypted keyring
//!   material plus an envelope salt into an AES-128 key and IV. This is the
//!   two-round MD5 scheme of OpenSSL's `EVP_BytesToKey`, sized for 16-byte
//!   keys and 16-byte IVs.

use md5::{Digest, Md5};
use zeroize::Zeroize;

use crate::envelope::{SaltedEnvelope, SALT_LEN};
use crate::memory::{SecretBuffer, SecretBytes};

/// AES-128 key length in bytes.
pub const KEY_LEN: usize = 16;

/// AES block / IV length in bytes.
pub const IV_LEN: usize = 16;

/// Default PBKDF2 output length: one AES-128 key followed by one IV.
pub const UNLOCK_KEY_LEN: usize = KEY_LEN + IV_LEN;

/// AES-128 key and CBC IV pair.
#[derive(Debug)]
pub struct DerivedKey {
    pub key: SecretBytes<KEY_LEN>,
    pub iv: SecretBytes<IV_LEN>,
}

impl DerivedKey {
    /// Split a 32-byte buffer into key (first half) and IV (second half).
    ///
    /// # Errors
    ///
    /// Returns `CryptoError::InvalidKeyMaterial` if `material` is shorter than 32 bytes.
    pub fn split(material: &[u8]) -> Result<Self, crate::CryptoError> {
        let key = SecretBytes::from_prefix(material)?;
        let iv = SecretBytes::from_prefix(material.get(KEY_LEN..).unwrap_or_default())?;
        Ok(Self { key, iv })
    }

    /// Derive the key for `envelope`: salted envelopes use [`legacy_stretch`],
    /// unsalted ones [`legacy_stretch_no_salt`].
    #[must_use]
    pub fn for_envelope(password: &[u8], envelope: &SaltedEnvelope) -> Self {
        envelope.salt.as_ref().map_or_else(
            || legacy_stretch_no_salt(password),
            |salt| legacy_stretch(password, salt),
        )
    }
}

/// Two-round MD5 stretch of `password` and `salt`.
///
/// ```text
/// key = MD5(password || salt)
/// iv  = MD5(key || password || salt)
/// ```
#[must_use]
pub fn legacy_stretch(password: &[u8], salt: &[u8; SALT_LEN]) -> DerivedKey {
    let mut hasher = Md5::new();
    hasher.update(password);
    hasher.update(salt);
    let mut key = [0u8; KEY_LEN];
    key.copy_from_slice(&hasher.finalize());

    let mut hasher = Md5::new();
    hasher.update(key);
    hasher.update(password);
    hasher.update(salt);
    let mut iv = [0u8; IV_LEN];
    iv.copy_from_slice(&hasher.finalize());

    let derived = DerivedKey {
        key: SecretBytes::new(key),
        iv: SecretBytes::new(iv),
    };
    key.zeroize();
    iv.zeroize();
    derived
}

/// Degenerate form for unsalted envelopes: one MD5 round, all-zero IV.
#[must_use]
pub fn legacy_stretch_no_salt(password: &[u8]) -> DerivedKey {
    let mut key = [0u8; KEY_LEN];
    key.copy_from_slice(&Md5::digest(password));
    let derived = DerivedKey {
        key: SecretBytes::new(key),
        iv: SecretBytes::zeroed(),
    };
    key.zeroize();
    derived
}

/// PBKDF2-HMAC-SHA1 over the master password.
///
/// `salt` and `iterations` are taken verbatim from the keyring record. No
/// minimum iteration count is enforced: a count of zero behaves like one
/// round, exactly as the vault writer's PBKDF2 did.
#[must_use]
pub fn pbkdf2_unlock(
    master_password: &[u8],
    salt: &[u8],
    iterations: u32,
    out_len: usize,
) -> SecretBuffer {
    let mut out = vec![0u8; out_len];
    pbkdf2::pbkdf2_hmac::<sha1::Sha1>(master_password, salt, iterations, &mut out);
    SecretBuffer::from_vec(out)
}
