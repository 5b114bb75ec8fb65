//! The `Salted__` envelope wrapped around every encrypted blob in a keychain.
//!
//! Wire layout of a salted envelope:
//!
//! ```text
//! "Salted__" (8 bytes) || salt (8 bytes) || AES-CBC ciphertext
//! ```
//!
//! Older records may carry bare ciphertext with no marker. Those parse as
//! unsalted envelopes; [`build_envelope`] never produces one.

use rand::rngs::OsRng;
use rand::RngCore;

use crate::error::CryptoError;

/// Literal marker that opens a salted envelope.
pub const SALT_MARKER: &[u8; 8] = b"Salted__";

/// Salt length in bytes.
pub const SALT_LEN: usize = 8;

/// Length of marker plus salt.
const HEADER_LEN: usize = SALT_MARKER.len() + SALT_LEN;

/// A parsed envelope.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SaltedEnvelope {
    /// Salt following the marker, `None` for legacy unsalted input.
    pub salt: Option<[u8; SALT_LEN]>,
    /// Raw ciphertext after the header (the whole input when unsalted).
    pub ciphertext: Vec<u8>,
}

impl SaltedEnvelope {
    #[must_use]
    pub const fn is_salted(&self) -> bool {
        self.salt.is_some()
    }

    /// Salt bytes, all-zero when the envelope is unsalted.
    #[must_use]
    pub fn salt_or_zero(&self) -> [u8; SALT_LEN] {
        self.salt.unwrap_or([0u8; SALT_LEN])
    }
}

/// Fresh salt from the OS CSPRNG.
///
/// # Errors
///
/// Returns `CryptoError::SecureMemory` if the CSPRNG fails.
pub fn random_salt() -> Result<[u8; SALT_LEN], CryptoError> {
    let mut salt = [0u8; SALT_LEN];
    OsRng
        .try_fill_bytes(&mut salt)
        .map_err(|e| CryptoError::SecureMemory(format!("CSPRNG fill failed: {e}")))?;
    Ok(salt)
}

/// Decode base64 transport text.
///
/// Embedded line breaks and spaces are ignored, as are trailing NUL
/// characters some keychain writers append to their strings.
///
/// # Errors
///
/// Returns `CryptoError::Transport` if the text is not valid base64.
pub fn decode_transport(text: &str) -> Result<Vec<u8>, CryptoError> {
    let compact: String = text
        .trim_end_matches('\0')
        .chars()
        .filter(|c| !c.is_ascii_whitespace())
        .collect();
    data_encoding::BASE64
        .decode(compact.as_bytes())
        .map_err(|e| CryptoError::Transport(format!("invalid base64: {e}")))
}

/// Encode bytes as single-line padded base64.
#[must_use]
pub fn encode_transport(bytes: &[u8]) -> String {
    data_encoding::BASE64.encode(bytes)
}

/// Split decoded bytes into salt and ciphertext.
///
/// # Errors
///
/// Returns `CryptoError::MalformedEnvelope` if the input is shorter than the
/// 8-byte marker, or carries the marker without a complete salt.
pub fn parse_envelope(bytes: &[u8]) -> Result<SaltedEnvelope, CryptoError> {
    if bytes.len() < SALT_MARKER.len() {
        return Err(CryptoError::MalformedEnvelope(format!(
            "envelope too short: {} bytes (minimum {})",
            bytes.len(),
            SALT_MARKER.len()
        )));
    }

    if !bytes.starts_with(SALT_MARKER) {
        return Ok(SaltedEnvelope {
            salt: None,
            ciphertext: bytes.to_vec(),
        });
    }

    let salt_bytes = bytes
        .get(SALT_MARKER.len()..HEADER_LEN)
        .ok_or_else(|| {
            CryptoError::MalformedEnvelope(format!(
                "salted envelope truncated: {} bytes (minimum {HEADER_LEN})",
                bytes.len()
            ))
        })?;
    let mut salt = [0u8; SALT_LEN];
    salt.copy_from_slice(salt_bytes);

    Ok(SaltedEnvelope {
        salt: Some(salt),
        ciphertext: bytes[HEADER_LEN..].to_vec(),
    })
}

/// Prefix `ciphertext` with the marker and `salt`.
#[must_use]
pub fn build_envelope(salt: &[u8; SALT_LEN], ciphertext: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(HEADER_LEN.saturating_add(ciphertext.len()));
    out.extend_from_slice(SALT_MARKER);
    out.extend_from_slice(salt);
    out.extend_from_slice(ciphertext);
    out
}

/// Base64 text straight to a parsed envelope.
///
/// # Errors
///
/// Propagates [`decode_transport`] and [`parse_envelope`] failures.
pub fn open_transport(text: &str) -> Result<SaltedEnvelope, CryptoError> {
    parse_envelope(&decode_transport(text)?)
}

/// Salted envelope straight to base64 text.
#[must_use]
pub fn seal_transport(salt: &[u8; SALT_LEN], ciphertext: &[u8]) -> String {
    encode_transport(&build_envelope(salt, ciphertext))
}
