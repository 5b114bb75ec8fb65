//! Owned, wipe-on-drop buffers for vault key material.
//!
//! Everything derived from a master password (PBKDF2 output, decrypted
//! keyring material, legacy stretch key/IV pairs) lives in one of these
//! types for as long as the vault is unlocked:
//! - [`SecretBuffer`] for variable-length material (decrypted key blobs, plaintexts)
//! - [`SecretBytes`] for fixed-size keys and IVs
//!
//! Both zero their bytes on drop and never print their contents through
//! `Debug` or `Display`. [`SecretBuffer`] also asks the kernel to keep its
//! heap pages out of swap.

use std::fmt;

use secrecy::{ExposeSecret, SecretSlice};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::CryptoError;

// ── SecretBuffer ────────────────────────────────────────────────────

/// Variable-length secret on the heap, backed by [`SecretSlice<u8>`].
pub struct SecretBuffer {
    inner: SecretSlice<u8>,
    pinned: bool,
}

impl SecretBuffer {
    /// Copy `data` into a new buffer.
    ///
    /// The caller remains responsible for wiping its own copy.
    #[must_use]
    pub fn new(data: &[u8]) -> Self {
        Self::from_vec(data.to_vec())
    }

    /// Take ownership of `data` without copying it.
    #[must_use]
    pub fn from_vec(data: Vec<u8>) -> Self {
        let inner: SecretSlice<u8> = data.into();
        let pinned = sys::pin(inner.expose_secret());
        if !pinned {
            static WARNED: std::sync::Once = std::sync::Once::new();
            WARNED.call_once(|| {
                tracing::warn!(
                    "mlock failed; key material may be swapped to disk (check RLIMIT_MEMLOCK)"
                );
            });
        }
        Self { inner, pinned }
    }

    /// Borrow the secret bytes for a cryptographic operation.
    #[must_use]
    pub fn expose(&self) -> &[u8] {
        self.inner.expose_secret()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.expose().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether the pages are `mlock`'d.
    #[must_use]
    pub const fn is_mlocked(&self) -> bool {
        self.pinned
    }

    /// Compare against `other` without short-circuiting on the first
    /// differing byte. Lengths are compared up front.
    #[must_use]
    pub fn ct_eq(&self, other: &[u8]) -> bool {
        let mine = self.expose();
        mine.len() == other.len()
            && mine
                .iter()
                .zip(other)
                .fold(0u8, |acc, (x, y)| acc | (x ^ y))
                == 0
    }
}

impl Drop for SecretBuffer {
    fn drop(&mut self) {
        if self.pinned {
            sys::unpin(self.inner.expose_secret());
        }
    }
}

impl fmt::Debug for SecretBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SecretBuffer(***)")
    }
}

impl fmt::Display for SecretBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SecretBuffer(***)")
    }
}

// ── SecretBytes ─────────────────────────────────────────────────────

/// Fixed-size secret for AES keys and IVs. Lives inline, so it is wiped
/// but never `mlock`'d.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct SecretBytes<const N: usize>([u8; N]);

impl<const N: usize> SecretBytes<N> {
    #[must_use]
    pub const fn new(data: [u8; N]) -> Self {
        Self(data)
    }

    /// All-zero secret, used for the IV of the unsalted legacy derivation.
    #[must_use]
    pub const fn zeroed() -> Self {
        Self([0u8; N])
    }

    /// Copy the first `N` bytes of `data`.
    ///
    /// # Errors
    ///
    /// Returns `CryptoError::InvalidKeyMaterial` if `data` is shorter than `N`.
    pub fn from_prefix(data: &[u8]) -> Result<Self, CryptoError> {
        let head = data.get(..N).ok_or_else(|| {
            CryptoError::InvalidKeyMaterial(format!("need {N} bytes, got {}", data.len()))
        })?;
        let mut out = Self::zeroed();
        out.0.copy_from_slice(head);
        Ok(out)
    }

    #[must_use]
    pub const fn expose(&self) -> &[u8; N] {
        &self.0
    }
}

impl<const N: usize> fmt::Debug for SecretBytes<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SecretBytes<{N}>(***)")
    }
}

impl<const N: usize> From<[u8; N]> for SecretBytes<N> {
    fn from(data: [u8; N]) -> Self {
        Self::new(data)
    }
}

// ── Process hardening ───────────────────────────────────────────────

/// Set `RLIMIT_CORE` to zero so an unlocked vault cannot end up in a core file.
///
/// No-op on non-unix targets.
///
/// # Errors
///
/// Returns `CryptoError::SecureMemory` if `setrlimit` fails.
pub fn disable_core_dumps() -> Result<(), CryptoError> {
    if sys::zero_core_limit() {
        Ok(())
    } else {
        Err(CryptoError::SecureMemory(
            "failed to disable core dumps via RLIMIT_CORE".into(),
        ))
    }
}

#[cfg(unix)]
mod sys {
    /// `mlock` the pages under `bytes`. Empty slices count as pinned.
    pub(super) fn pin(bytes: &[u8]) -> bool {
        // SAFETY: the range is a live allocation borrowed for the call; mlock
        // does not read or write it.
        bytes.is_empty() || unsafe { libc::mlock(bytes.as_ptr().cast(), bytes.len()) == 0 }
    }

    pub(super) fn unpin(bytes: &[u8]) {
        if !bytes.is_empty() {
            // SAFETY: as in `pin`; a failed munlock is ignored.
            unsafe {
                libc::munlock(bytes.as_ptr().cast(), bytes.len());
            }
        }
    }

    pub(super) fn zero_core_limit() -> bool {
        let limit = libc::rlimit {
            rlim_cur: 0,
            rlim_max: 0,
        };
        // SAFETY: plain POSIX call with a valid, initialized rlimit.
        unsafe { libc::setrlimit(libc::RLIMIT_CORE, &raw const limit) == 0 }
    }
}

#[cfg(not(unix))]
mod sys {
    pub(super) const fn pin(_bytes: &[u8]) -> bool {
        false
    }

    pub(super) const fn unpin(_bytes: &[u8]) {}

    pub(super) const fn zero_core_limit() -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn secret_buffer_keeps_contents() {
        let buf = SecretBuffer::new(b"keyring material");
        assert_eq!(buf.expose(), b"keyring material");
        assert_eq!(buf.len(), 16);
        assert!(!buf.is_empty());
    }

    #[test]
    fn secret_buffer_from_vec_does_not_alter_bytes() {
        let buf = SecretBuffer::from_vec(vec![1, 2, 3]);
        assert_eq!(buf.expose(), &[1, 2, 3]);
    }

    #[test]
    fn empty_buffer_is_pinned_trivially() {
        let buf = SecretBuffer::from_vec(Vec::new());
        assert!(buf.is_empty());
        if cfg!(unix) {
            assert!(buf.is_mlocked());
        }
    }

    #[test]
    fn secret_buffer_output_is_masked() {
        let buf = SecretBuffer::new(b"hunter2");
        assert_eq!(format!("{buf:?}"), "SecretBuffer(***)");
        assert_eq!(format!("{buf}"), "SecretBuffer(***)");
    }

    #[test]
    fn ct_eq_matches_only_identical_bytes() {
        let buf = SecretBuffer::new(b"abcdef");
        assert!(buf.ct_eq(b"abcdef"));
        assert!(!buf.ct_eq(b"abcdeg"));
        assert!(!buf.ct_eq(b"abcde"));
        assert!(!buf.ct_eq(b""));
    }

    #[test]
    fn secret_bytes_from_prefix() {
        let key = SecretBytes::<4>::from_prefix(&[9, 8, 7, 6, 5]).unwrap();
        assert_eq!(key.expose(), &[9, 8, 7, 6]);
    }

    #[test]
    fn secret_bytes_from_short_prefix_fails() {
        let result = SecretBytes::<16>::from_prefix(&[0u8; 15]);
        assert!(matches!(result, Err(CryptoError::InvalidKeyMaterial(_))));
    }

    #[test]
    fn secret_bytes_zeroed_is_all_zero() {
        let iv = SecretBytes::<16>::zeroed();
        assert_eq!(iv.expose(), &[0u8; 16]);
    }

    #[test]
    fn secret_bytes_debug_is_masked() {
        let key = SecretBytes::<16>::new([0xAA; 16]);
        let debug = format!("{key:?}");
        assert_eq!(debug, "SecretBytes<16>(***)");
        assert!(!debug.contains("170"));
    }

    #[cfg(unix)]
    #[test]
    fn disable_core_dumps_sets_zero_limit() {
        disable_core_dumps().unwrap();
        let mut limit = libc::rlimit {
            rlim_cur: 1,
            rlim_max: 1,
        };
        let ret = unsafe { libc::getrlimit(libc::RLIMIT_CORE, &raw mut limit) };
        assert_eq!(ret, 0);
        assert_eq!(limit.rlim_cur, 0);
    }
}
