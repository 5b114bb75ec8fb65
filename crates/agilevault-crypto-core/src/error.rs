//! Cryptographic error types for `agilevault-crypto-core`.

use thiserror::Error;

/// Errors produced by cryptographic and encoding operations.
#[derive(Debug, Error)]
pub enum CryptoError {
    /// Decoded envelope bytes are too short or structurally invalid.
    #[error("malformed envelope: {0}")]
    MalformedEnvelope(String),

    /// Base64 transport text could not be decoded.
    #[error("invalid transport encoding: {0}")]
    Transport(String),

    /// AES-CBC rejected the input: bad padding, bad block length or bad key size.
    #[error("cipher error: {0}")]
    Cipher(String),

    /// Invalid key material (wrong length, corrupted bytes).
    #[error("invalid key material: {0}")]
    InvalidKeyMaterial(String),

    /// Secure memory allocation failure (mlock, CSPRNG).
    #[error("secure memory error: {0}")]
    SecureMemory(String),

    /// Text is not a well-formed `otpauth://` URI.
    #[error("invalid OTP URI: {0}")]
    InvalidUri(String),

    /// The URI names an OTP type other than `totp`.
    #[error("unsupported OTP type: {0}")]
    UnsupportedOtpType(String),

    /// The URI has no `secret` parameter.
    #[error("OTP URI is missing a secret")]
    MissingSecret,

    /// The `secret` parameter is not valid base32.
    #[error("invalid OTP secret: {0}")]
    InvalidSecret(String),

    /// The `algorithm` parameter is not SHA1, SHA256 or SHA512.
    #[error("unsupported OTP algorithm: {0}")]
    UnsupportedAlgorithm(String),
}
