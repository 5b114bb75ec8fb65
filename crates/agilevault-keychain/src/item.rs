//! Item records: decryption and normalization.
//!
//! An item file (`<uuid>.1password`) carries plain metadata and one
//! encrypted JSON body. Bodies come in two shapes, often mixed:
//!
//! - flat `fields`: `{designation, value, type}`
//! - titled `sections` of `{t, v, k}` entries, where `k` decides how `v`
//!   is rendered
//!
//! Both are normalized into [`Item`]. Entries that do not match a known
//! shape are skipped; the rest of the item still decodes.

use std::collections::BTreeMap;
use std::fmt;

use agilevault_crypto_core::{totp, CryptoError};
use chrono::{Local, TimeZone};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use zeroize::Zeroize;

use crate::error::VaultError;
use crate::keyring::{Keyring, MasterKey, SecurityLevel};

/// Section key for fields that live outside any titled section.
pub const DEFAULT_SECTION: &str = "";

/// Type tag of password-class fields.
pub const PASSWORD_TYPE: &str = "P";

// ── On-disk record ─────────────────────────────────────────────────

/// The unencrypted envelope of an item file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uuid: Option<String>,
    #[serde(default)]
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub type_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub security_level: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub open_contents: Option<OpenContents>,
    /// Base64 envelope of the JSON body.
    pub encrypted: String,
}

/// Older records keep their security level here.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenContents {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub security_level: Option<String>,
}

impl ItemRecord {
    /// # Errors
    ///
    /// Returns `VaultError::ItemFormat` if the bytes are not an item record.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, VaultError> {
        serde_json::from_slice(bytes).map_err(|e| VaultError::ItemFormat(e.to_string()))
    }

    /// Encrypt `body` under `key` as a new record.
    ///
    /// # Errors
    ///
    /// Propagates [`MasterKey::encrypt_json`] failures.
    pub fn seal(uuid: &str, title: &str, key: &MasterKey, body: &Value) -> Result<Self, VaultError> {
        Ok(Self {
            uuid: Some(uuid.to_string()),
            title: title.to_string(),
            security_level: Some(key.level().to_string()),
            encrypted: key.encrypt_json(body)?,
            ..Self::default()
        })
    }

    /// The declared level: top-level first, then `openContents`.
    ///
    /// `uuid` only labels the error.
    ///
    /// # Errors
    ///
    /// - `VaultError::MissingSecurityLevel` if neither location has one.
    /// - `VaultError::UnknownSecurityLevel` if it is not SL3/SL5.
    pub fn security_level(&self, uuid: &str) -> Result<SecurityLevel, VaultError> {
        self.security_level
            .as_deref()
            .or_else(|| {
                self.open_contents
                    .as_ref()
                    .and_then(|open| open.security_level.as_deref())
            })
            .ok_or_else(|| VaultError::MissingSecurityLevel(uuid.to_string()))?
            .parse()
    }

    /// Decrypt with the matching key from `keyring` and normalize.
    ///
    /// # Errors
    ///
    /// - any [`security_level`](Self::security_level) error
    /// - `VaultError::MissingKeyForLevel` if the keyring lacks that level
    /// - [`MasterKey::decrypt_json`] failures
    /// - `VaultError::ItemFormat` if the body is not a JSON object
    pub fn decode(&self, uuid: &str, keyring: &Keyring) -> Result<Item, VaultError> {
        let level = self.security_level(uuid)?;
        let key = keyring.require(level)?;
        let body = key.decrypt_json(&self.encrypted)?;
        let mut item = Item::from_body(&body)?;
        item.uuid = uuid.to_string();
        item.title.clone_from(&self.title);
        item.category.clone_from(&self.type_name);
        Ok(item)
    }
}

// ── Normalized item ────────────────────────────────────────────────

/// A decrypted, normalized item.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Item {
    pub uuid: String,
    pub title: String,
    /// The record's `typeName`, e.g. `webforms.WebForm`.
    pub category: Option<String>,
    pub notes: String,
    pub urls: Vec<String>,
    /// Section title → fields in body order. [`DEFAULT_SECTION`] is `""`.
    pub sections: BTreeMap<String, Vec<Field>>,
}

impl Item {
    /// Normalize a decrypted body. Metadata fields stay empty.
    ///
    /// # Errors
    ///
    /// Returns `VaultError::ItemFormat` if `body` is not a JSON object.
    pub fn from_body(body: &Value) -> Result<Self, VaultError> {
        let Some(body) = body.as_object() else {
            return Err(VaultError::ItemFormat("decrypted body is not an object".into()));
        };
        let mut item = Self::default();

        if let Some(Value::String(notes)) = body.get("notesPlain") {
            item.notes.clone_from(notes);
        }

        for entry in body.get("URLs").and_then(Value::as_array).into_iter().flatten() {
            match entry.get("url").and_then(Value::as_str) {
                Some(url) => item.urls.push(url.to_string()),
                None => tracing::debug!("skipping URL entry without a url"),
            }
        }

        if let Some(password) = body.get("password") {
            item.add_field(
                DEFAULT_SECTION,
                Field::new("password", &coerce(password), PASSWORD_TYPE, true),
            );
        }

        for entry in body.get("fields").and_then(Value::as_array).into_iter().flatten() {
            match serde_json::from_value::<FlatField>(entry.clone()) {
                Ok(flat) => {
                    let concealed = flat.kind == PASSWORD_TYPE;
                    item.add_field(
                        DEFAULT_SECTION,
                        Field::new(&flat.designation, &coerce(&flat.value), &flat.kind, concealed),
                    );
                }
                Err(e) => tracing::debug!(error = %e, "skipping unrecognized field entry"),
            }
        }

        for section in body.get("sections").and_then(Value::as_array).into_iter().flatten() {
            item.add_section(section);
        }

        Ok(item)
    }

    fn add_section(&mut self, section: &Value) {
        let Some(fields) = section.get("fields").and_then(Value::as_array) else {
            return;
        };
        let title = section
            .get("title")
            .and_then(Value::as_str)
            .unwrap_or(DEFAULT_SECTION)
            .to_string();

        for entry in fields {
            let parsed = match serde_json::from_value::<SectionField>(entry.clone()) {
                Ok(parsed) => parsed,
                Err(e) => {
                    tracing::debug!(error = %e, "skipping unrecognized section field");
                    continue;
                }
            };
            match parsed.render() {
                Some(value) => {
                    let concealed = parsed.k == "concealed";
                    self.add_field(&title, Field::new(&parsed.t, &value, &parsed.k, concealed));
                }
                None => tracing::debug!(kind = %parsed.k, "skipping field with unrenderable value"),
            }
        }
    }

    /// Append `field` to `section`, creating the section if needed.
    pub fn add_field(&mut self, section: &str, field: Field) {
        self.sections
            .entry(section.to_string())
            .or_default()
            .push(field);
    }

    /// All fields, section by section.
    pub fn fields(&self) -> impl Iterator<Item = &Field> {
        self.sections.values().flatten()
    }

    /// First field called `name` in any section.
    #[must_use]
    pub fn field(&self, name: &str) -> Option<&Field> {
        self.fields().find(|f| f.name == name)
    }

    /// Fields of the untitled section.
    #[must_use]
    pub fn default_section(&self) -> &[Field] {
        self.sections
            .get(DEFAULT_SECTION)
            .map_or(&[], Vec::as_slice)
    }

    /// Value of the synthetic `password` field, if the body had one.
    #[must_use]
    pub fn password(&self) -> Option<&str> {
        self.default_section()
            .iter()
            .find(|f| f.name == "password" && f.type_tag == PASSWORD_TYPE)
            .map(|f| f.value.as_str())
    }
}

/// One displayed name/value pair. The value is wiped on drop.
#[derive(Clone, PartialEq, Eq)]
pub struct Field {
    pub name: String,
    pub value: String,
    pub type_tag: String,
    pub is_concealed: bool,
}

impl Field {
    #[must_use]
    pub fn new(name: &str, value: &str, type_tag: &str, concealed: bool) -> Self {
        Self {
            name: name.to_string(),
            value: value.to_string(),
            type_tag: type_tag.to_string(),
            is_concealed: concealed,
        }
    }

    /// Whether the value looks like an `otpauth://` URI.
    #[must_use]
    pub fn is_otp_uri(&self) -> bool {
        totp::is_otp_uri(&self.value)
    }

    /// One-time code for the value at `at_time` (Unix seconds).
    ///
    /// # Errors
    ///
    /// Any [`totp::parse_uri`] error for this field alone.
    pub fn otp_code(&self, at_time: u64) -> Result<String, CryptoError> {
        totp::code_for_uri(&self.value, at_time)
    }
}

impl Drop for Field {
    fn drop(&mut self) {
        self.value.zeroize();
    }
}

impl fmt::Debug for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Field")
            .field("name", &self.name)
            .field("value", &"***")
            .field("type_tag", &self.type_tag)
            .field("is_concealed", &self.is_concealed)
            .finish()
    }
}

// ── Body shapes ────────────────────────────────────────────────────

#[derive(Deserialize)]
struct FlatField {
    designation: String,
    value: Value,
    #[serde(rename = "type")]
    kind: String,
}

#[derive(Deserialize)]
struct SectionField {
    t: String,
    v: Value,
    k: String,
}

impl SectionField {
    /// Display text for `v` according to `k`, `None` to skip the field.
    fn render(&self) -> Option<String> {
        match self.k.as_str() {
            "date" => render_date(&self.v),
            "address" => render_address(&self.v),
            "monthYear" => render_month_year(&self.v),
            _ => Some(coerce(&self.v)),
        }
    }
}

/// Unix timestamp → short date in the local timezone.
///
/// chrono's `%x` is the fixed `MM/DD/YY` form; the locale's own date order
/// is not consulted.
fn render_date(value: &Value) -> Option<String> {
    let secs = value.as_i64()?;
    let date = Local.timestamp_opt(secs, 0).single()?;
    Some(date.format("%x").to_string())
}

fn render_address(value: &Value) -> Option<String> {
    let street = value.get("street")?.as_str()?;
    let part = |key: &str| value.get(key).and_then(Value::as_str).unwrap_or_default();
    Some(format!(
        "{street} {}, {} {}",
        part("city"),
        part("state"),
        part("zip")
    ))
}

/// `202507` → `2025/07`.
fn render_month_year(value: &Value) -> Option<String> {
    let digits = value.as_i64()?.to_string();
    let year = digits.get(..4).unwrap_or(digits.as_str());
    let month = digits.get(4..6).or_else(|| digits.get(4..)).unwrap_or_default();
    Some(format!("{year}/{month}"))
}

fn coerce(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}
