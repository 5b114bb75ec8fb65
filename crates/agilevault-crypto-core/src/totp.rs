//! RFC 6238 TOTP codes for `otpauth://` URIs stored in vault fields.
//!
//! Parsing is strict about shape and lenient about nothing else: only the
//! `totp` type is accepted, `secret` must be present and base32, and unknown
//! query keys are ignored. Code generation is the RFC 4226 dynamic
//! truncation over HMAC-SHA1/256/512 from `ring::hmac`.

use std::time::{SystemTime, UNIX_EPOCH};

use data_encoding::{Encoding, Specification};
use ring::hmac;
use url::Url;

use crate::error::CryptoError;
use crate::memory::SecretBuffer;

// ── Constants ───────────────────────────────────────────────────────

/// URI scheme prefix recognised by [`is_otp_uri`].
pub const OTP_SCHEME_PREFIX: &str = "otpauth://";

/// Default code length.
pub const DEFAULT_DIGITS: u32 = 6;

/// Default TOTP period in seconds (RFC 6238 §4).
pub const DEFAULT_PERIOD: u64 = 30;

/// Longest code we render; 10^10 still fits the `u64` modulus.
pub const MAX_DIGITS: u32 = 10;

/// RFC 4648 base32 alphabet.
const BASE32_SYMBOLS: &str = "ABCDEFGHIJKLMNOPQRSTUVWXYZ234567";

// ── Types ───────────────────────────────────────────────────────────

/// HMAC algorithm named by the URI's `algorithm` parameter.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum OtpAlgorithm {
    #[default]
    Sha1,
    Sha256,
    Sha512,
}

impl OtpAlgorithm {
    fn to_ring_algorithm(self) -> hmac::Algorithm {
        match self {
            Self::Sha1 => hmac::HMAC_SHA1_FOR_LEGACY_USE_ONLY,
            Self::Sha256 => hmac::HMAC_SHA256,
            Self::Sha512 => hmac::HMAC_SHA512,
        }
    }
}

impl std::str::FromStr for OtpAlgorithm {
    type Err = CryptoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "SHA1" => Ok(Self::Sha1),
            "SHA256" => Ok(Self::Sha256),
            "SHA512" => Ok(Self::Sha512),
            other => Err(CryptoError::UnsupportedAlgorithm(other.to_owned())),
        }
    }
}

/// Everything needed to compute codes for one URI.
#[derive(Debug)]
pub struct OtpParams {
    pub algorithm: OtpAlgorithm,
    /// Base32-decoded shared secret.
    pub secret: SecretBuffer,
    pub digits: u32,
    /// Time step in seconds, never zero.
    pub period: u64,
}

// ── URI parsing ─────────────────────────────────────────────────────

/// Whether `text` has the `otpauth://<type>/<label>?<query>` shape.
///
/// This is the cheap check used to decide whether a field should be shown
/// as a code; it does not validate the parameters.
#[must_use]
pub fn is_otp_uri(text: &str) -> bool {
    let Some(rest) = text.strip_prefix(OTP_SCHEME_PREFIX) else {
        return false;
    };
    let Some((kind, rest)) = rest.split_once('/') else {
        return false;
    };
    let Some((label, query)) = rest.split_once('?') else {
        return false;
    };
    matches!(kind, "totp" | "hotp") && !label.is_empty() && query.contains('=')
}

/// Parse an `otpauth://totp/...` URI.
///
/// # Errors
///
/// - `InvalidUri` if the text is not an `otpauth` URI with a type, a label
///   and a query, or if `digits`/`period` are not valid numbers
/// - `UnsupportedOtpType` for any type other than `totp` (notably `hotp`)
/// - `MissingSecret` if there is no `secret` parameter
/// - `InvalidSecret` if the secret is not base32
/// - `UnsupportedAlgorithm` for an `algorithm` other than SHA1/SHA256/SHA512
pub fn parse_uri(text: &str) -> Result<OtpParams, CryptoError> {
    let url = Url::parse(text).map_err(|e| CryptoError::InvalidUri(e.to_string()))?;
    if url.scheme() != "otpauth" {
        return Err(CryptoError::InvalidUri(format!(
            "expected otpauth scheme, got {}",
            url.scheme()
        )));
    }

    let kind = url
        .host_str()
        .ok_or_else(|| CryptoError::InvalidUri("missing OTP type".into()))?;
    if kind != "totp" && kind != "hotp" {
        return Err(CryptoError::InvalidUri(format!("unknown OTP type: {kind}")));
    }
    if url.path().trim_start_matches('/').is_empty() {
        return Err(CryptoError::InvalidUri("missing label".into()));
    }
    if url.query().is_none_or(str::is_empty) {
        return Err(CryptoError::InvalidUri("missing query".into()));
    }
    if kind != "totp" {
        return Err(CryptoError::UnsupportedOtpType(kind.to_owned()));
    }

    let mut secret = None;
    let mut algorithm = OtpAlgorithm::default();
    let mut digits = DEFAULT_DIGITS;
    let mut period = DEFAULT_PERIOD;

    for (key, value) in url.query_pairs() {
        match key.as_ref() {
            "secret" => secret = Some(decode_secret(&value)?),
            "algorithm" => algorithm = value.parse()?,
            "digits" => digits = parse_digits(&value)?,
            "period" => period = parse_period(&value)?,
            _ => {}
        }
    }

    Ok(OtpParams {
        algorithm,
        secret: secret.ok_or(CryptoError::MissingSecret)?,
        digits,
        period,
    })
}

fn base32_lenient() -> Result<Encoding, CryptoError> {
    let mut spec = Specification::new();
    spec.symbols.push_str(BASE32_SYMBOLS);
    spec.check_trailing_bits = false;
    spec.encoding()
        .map_err(|e| CryptoError::InvalidSecret(format!("base32 setup failed: {e}")))
}

/// Base32-decode a secret, tolerating `=` padding and leftover bits.
///
/// An empty value (or padding alone) counts as no secret at all.
fn decode_secret(value: &str) -> Result<SecretBuffer, CryptoError> {
    let trimmed = value.trim_end_matches('=');
    if trimmed.is_empty() {
        return Err(CryptoError::MissingSecret);
    }
    let decoded = base32_lenient()?
        .decode(trimmed.as_bytes())
        .map_err(|e| CryptoError::InvalidSecret(format!("invalid base32: {e}")))?;
    Ok(SecretBuffer::from_vec(decoded))
}

fn parse_digits(value: &str) -> Result<u32, CryptoError> {
    match value.parse::<u32>() {
        Ok(d) if (1..=MAX_DIGITS).contains(&d) => Ok(d),
        _ => Err(CryptoError::InvalidUri(format!(
            "digits must be an integer in 1..={MAX_DIGITS}, got {value:?}"
        ))),
    }
}

fn parse_period(value: &str) -> Result<u64, CryptoError> {
    match value.parse::<u64>() {
        Ok(p) if p > 0 => Ok(p),
        _ => Err(CryptoError::InvalidUri(format!(
            "period must be a positive integer, got {value:?}"
        ))),
    }
}

// ── Code generation ─────────────────────────────────────────────────

/// RFC 4226 HOTP value for `counter`, zero-padded to `digits` characters.
#[must_use = "OTP code should be used or displayed"]
pub fn generate_hotp(secret: &[u8], counter: u64, digits: u32, algorithm: OtpAlgorithm) -> String {
    let key = hmac::Key::new(algorithm.to_ring_algorithm(), secret);
    let tag = hmac::sign(&key, &counter.to_be_bytes());
    let mac = tag.as_ref();

    // Dynamic truncation (RFC 4226 §5.3). Every supported digest is at
    // least 20 bytes, so offset + 3 <= 18 is always in range.
    let offset = usize::from(mac[mac.len().saturating_sub(1)] & 0x0F);
    let truncated = u32::from_be_bytes([
        mac[offset] & 0x7F,
        mac[offset.saturating_add(1)],
        mac[offset.saturating_add(2)],
        mac[offset.saturating_add(3)],
    ]);

    let modulus = 10u64.saturating_pow(digits);
    let code = u64::from(truncated).checked_rem(modulus).unwrap_or(0);
    let width = usize::try_from(digits).unwrap_or(usize::MAX);
    format!("{code:0>width$}")
}

/// TOTP code for `params` at Unix time `at_time` (seconds).
#[must_use = "OTP code should be used or displayed"]
pub fn compute(params: &OtpParams, at_time: u64) -> String {
    let counter = at_time.checked_div(params.period).unwrap_or(0);
    generate_hotp(
        params.secret.expose(),
        counter,
        params.digits,
        params.algorithm,
    )
}

/// Parse `uri` and compute its code at `at_time`.
///
/// # Errors
///
/// Propagates [`parse_uri`] failures.
pub fn code_for_uri(uri: &str, at_time: u64) -> Result<String, CryptoError> {
    Ok(compute(&parse_uri(uri)?, at_time))
}

/// Parse `uri` and compute its code for the current system time.
///
/// # Errors
///
/// Propagates [`parse_uri`] failures.
pub fn current_code(uri: &str) -> Result<String, CryptoError> {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_secs());
    code_for_uri(uri, now)
}

/// Seconds left before the code for `params` rolls over at `at_time`.
#[must_use]
pub fn seconds_remaining(params: &OtpParams, at_time: u64) -> u64 {
    let into_step = at_time.checked_rem(params.period).unwrap_or(0);
    params.period.saturating_sub(into_step)
}

// ── Tests ───────────────────────────────────────────────────────────
