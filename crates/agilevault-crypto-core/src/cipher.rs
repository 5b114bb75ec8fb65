//! AES-128-CBC with PKCS#7 padding.
//!
//! Every blob in an Agile Keychain (keyring entries, validation blocks, item
//! payloads, cached passwords) is encrypted this way. CBC is unauthenticated;
//! integrity is only implied by the padding check and, for keyring entries,
//! by the validation block.
//!
//! [`CbcCipher`] accepts input through any number of [`CbcCipher::update`]
//! calls and runs the block cipher once, in [`CbcCipher::finalize`]. Output
//! only exists after a successful finalize, so a padding failure never leaks
//! partial plaintext. [`encrypt`] and [`decrypt`] are the one-shot forms.

use aes::Aes128;
use cbc::cipher::block_padding::Pkcs7;
use cbc::cipher::generic_array::GenericArray;
use cbc::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use zeroize::Zeroizing;

use crate::error::CryptoError;
use crate::kdf::{DerivedKey, IV_LEN, KEY_LEN};
use crate::memory::{SecretBuffer, SecretBytes};

type Aes128CbcEnc = cbc::Encryptor<Aes128>;
type Aes128CbcDec = cbc::Decryptor<Aes128>;

/// AES block size in bytes.
pub const BLOCK_LEN: usize = 16;

/// Direction of a [`CbcCipher`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Mode {
    Encrypt,
    Decrypt,
}

/// Accumulating AES-128-CBC context.
pub struct CbcCipher {
    mode: Mode,
    key: SecretBytes<KEY_LEN>,
    iv: SecretBytes<IV_LEN>,
    pending: Zeroizing<Vec<u8>>,
}

impl CbcCipher {
    #[must_use]
    pub fn new(mode: Mode, key: &[u8; KEY_LEN], iv: &[u8; IV_LEN]) -> Self {
        Self {
            mode,
            key: SecretBytes::new(*key),
            iv: SecretBytes::new(*iv),
            pending: Zeroizing::new(Vec::with_capacity(BLOCK_LEN)),
        }
    }

    /// Context keyed by a derived key/IV pair.
    #[must_use]
    pub fn with_derived(mode: Mode, derived: &DerivedKey) -> Self {
        Self::new(mode, derived.key.expose(), derived.iv.expose())
    }

    #[must_use]
    pub const fn mode(&self) -> Mode {
        self.mode
    }

    /// Append `data` to the input.
    ///
    /// Capacity always covers the input plus one padding block, so
    /// `finalize` pads in place. When the buffer must grow, the bytes move
    /// to a fresh allocation and the old one is wiped as it drops.
    pub fn update(&mut self, data: &[u8]) {
        let needed = self
            .pending
            .len()
            .saturating_add(data.len())
            .saturating_add(BLOCK_LEN);
        if needed > self.pending.capacity() {
            let capacity = needed.max(self.pending.capacity().saturating_mul(2));
            let mut grown = Zeroizing::new(Vec::with_capacity(capacity));
            grown.extend_from_slice(&self.pending);
            self.pending = grown;
        }
        self.pending.extend_from_slice(data);
    }

    /// Run the cipher over everything passed to [`update`](Self::update).
    ///
    /// # Errors
    ///
    /// Returns `CryptoError::Cipher` when decrypting input that is empty, not
    /// a whole number of blocks, or that does not end in valid PKCS#7 padding.
    pub fn finalize(mut self) -> Result<SecretBuffer, CryptoError> {
        let key = GenericArray::from_slice(self.key.expose());
        let iv = GenericArray::from_slice(self.iv.expose());
        match self.mode {
            Mode::Encrypt => {
                let msg_len = self.pending.len();
                let padded_len = msg_len
                    .checked_div(BLOCK_LEN)
                    .and_then(|blocks| blocks.checked_add(1))
                    .and_then(|blocks| blocks.checked_mul(BLOCK_LEN))
                    .ok_or_else(|| CryptoError::Cipher("plaintext too large".into()))?;
                debug_assert!(padded_len <= self.pending.capacity());
                self.pending.resize(padded_len, 0);
                let out_len = Aes128CbcEnc::new(key, iv)
                    .encrypt_padded_mut::<Pkcs7>(&mut self.pending, msg_len)
                    .map_err(|_| CryptoError::Cipher("padding buffer too small".into()))?
                    .len();
                Ok(SecretBuffer::new(&self.pending[..out_len]))
            }
            Mode::Decrypt => {
                if self.pending.is_empty() || self.pending.len().checked_rem(BLOCK_LEN) != Some(0) {
                    return Err(CryptoError::Cipher(format!(
                        "ciphertext length {} is not a positive multiple of {BLOCK_LEN}",
                        self.pending.len()
                    )));
                }
                let plaintext = Aes128CbcDec::new(key, iv)
                    .decrypt_padded_mut::<Pkcs7>(&mut self.pending)
                    .map_err(|_| CryptoError::Cipher("invalid PKCS#7 padding".into()))?;
                Ok(SecretBuffer::new(plaintext))
            }
        }
    }
}

impl std::fmt::Debug for CbcCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CbcCipher")
            .field("mode", &self.mode)
            .field("pending_len", &self.pending.len())
            .finish_non_exhaustive()
    }
}

/// Encrypt `plaintext` in one call.
///
/// # Errors
///
/// Returns `CryptoError::Cipher` only if the padded length overflows `usize`.
pub fn encrypt(
    key: &[u8; KEY_LEN],
    iv: &[u8; IV_LEN],
    plaintext: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    let mut cipher = CbcCipher::new(Mode::Encrypt, key, iv);
    cipher.update(plaintext);
    Ok(cipher.finalize()?.expose().to_vec())
}

/// Decrypt `ciphertext` in one call.
///
/// # Errors
///
/// Returns `CryptoError::Cipher` on bad length or bad padding.
pub fn decrypt(
    key: &[u8; KEY_LEN],
    iv: &[u8; IV_LEN],
    ciphertext: &[u8],
) -> Result<SecretBuffer, CryptoError> {
    let mut cipher = CbcCipher::new(Mode::Decrypt, key, iv);
    cipher.update(ciphertext);
    cipher.finalize()
}
