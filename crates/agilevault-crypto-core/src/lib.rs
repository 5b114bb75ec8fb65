//! `agilevault-crypto-core` - primitives for reading Agile Keychain vaults.
//!
//! No file I/O and no knowledge of the vault's JSON documents: this crate
//! works on bytes and base64 text only. Vault-level logic lives in
//! `agilevault-keychain`.

#![cfg_attr(test, allow(clippy::unwrap_used, clippy::arithmetic_side_effects))]

pub mod error;
pub mod memory;

pub mod envelope;
pub mod kdf;

pub mod cipher;

pub mod totp;

pub use cipher::{decrypt, encrypt, CbcCipher, Mode, BLOCK_LEN};
pub use envelope::{
    build_envelope, decode_transport, encode_transport, open_transport, parse_envelope,
    random_salt, seal_transport, SaltedEnvelope, SALT_LEN, SALT_MARKER,
};
pub use error::CryptoError;
pub use kdf::{
    legacy_stretch, legacy_stretch_no_salt, pbkdf2_unlock, DerivedKey, IV_LEN, KEY_LEN,
    UNLOCK_KEY_LEN,
};
pub use memory::{disable_core_dumps, SecretBuffer, SecretBytes};
pub use totp::{
    code_for_uri, compute, current_code, generate_hotp, is_otp_uri, parse_uri, OtpAlgorithm,
    OtpParams,
};
