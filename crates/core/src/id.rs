//! Strongly-typed identifiers used across the storage commitment domain.
//!
//! DICOM identifiers arrive as plain strings; wrapping them keeps a study UID from being
//! passed where a SOP instance UID is expected and validates them once at the boundary.

use core::str::FromStr;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{DomainError, DomainResult};

/// Maximum length of a DICOM UID (VR `UI`).
pub const MAX_UID_LEN: usize = 64;

/// Maximum length of an application entity title (VR `AE`).
pub const MAX_AE_TITLE_LEN: usize = 16;

/// Identifier of a persisted pending-transaction record.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordId(Uuid);

impl RecordId {
    /// Create a new identifier.
    ///
    /// Uses UUIDv7 (time-ordered). Prefer passing IDs explicitly in tests
    /// for determinism.
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for RecordId {
    fn default() -> Self {
        Self::new()
    }
}

impl core::fmt::Display for RecordId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

impl From<Uuid> for RecordId {
    fn from(value: Uuid) -> Self {
        Self(value)
    }
}

impl FromStr for RecordId {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let uuid =
            Uuid::from_str(s).map_err(|e| DomainError::invalid_id(format!("RecordId: {e}")))?;
        Ok(Self(uuid))
    }
}

/// Study Instance UID.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct StudyInstanceUid(String);

/// Series Instance UID.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SeriesInstanceUid(String);

/// SOP Instance UID (unique within its series).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SopInstanceUid(String);

/// Storage commitment Transaction UID, chosen by the requester.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TransactionUid(String);

/// Application entity title naming where objects can be retrieved from.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct AeTitle(String);

/// Identifier of a configured exporter.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ExporterId(String);

/// Name of a configured device (the archive itself, or a remote peer).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DeviceName(String);

fn normalize_uid(value: String) -> Result<String, String> {
    if value.is_empty() {
        return Err("empty UID".to_string());
    }
    if value.len() > MAX_UID_LEN {
        return Err(format!("UID exceeds {MAX_UID_LEN} characters"));
    }
    if !value.chars().all(|c| c.is_ascii_digit() || c == '.') {
        return Err(format!("'{value}' contains characters other than digits and '.'"));
    }
    if value.split('.').any(str::is_empty) {
        return Err(format!("'{value}' contains an empty component"));
    }
    Ok(value)
}

fn normalize_ae_title(value: String) -> Result<String, String> {
    // Leading and trailing spaces are not significant in AE titles.
    let trimmed = value.trim_matches(' ');
    if trimmed.is_empty() {
        return Err("empty AE title".to_string());
    }
    if trimmed.len() > MAX_AE_TITLE_LEN {
        return Err(format!("'{trimmed}' exceeds {MAX_AE_TITLE_LEN} characters"));
    }
    if trimmed.chars().any(|c| c == '\\' || c.is_control() || !c.is_ascii()) {
        return Err(format!("'{trimmed}' contains an illegal character"));
    }
    Ok(trimmed.to_string())
}

fn normalize_name(value: String) -> Result<String, String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err("empty name".to_string());
    }
    Ok(trimmed.to_string())
}

macro_rules! impl_string_newtype {
    ($t:ident, $name:literal, $normalize:path) => {
        impl $t {
            /// Validate and wrap a raw identifier.
            pub fn new(value: impl Into<String>) -> DomainResult<Self> {
                $normalize(value.into())
                    .map(Self)
                    .map_err(|reason| DomainError::invalid_id(format!("{}: {}", $name, reason)))
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }

            pub fn into_inner(self) -> String {
                self.0
            }
        }

        impl core::fmt::Display for $t {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl AsRef<str> for $t {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl FromStr for $t {
            type Err = DomainError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::new(s)
            }
        }

        impl TryFrom<String> for $t {
            type Error = DomainError;

            fn try_from(value: String) -> Result<Self, Self::Error> {
                Self::new(value)
            }
        }

        impl From<$t> for String {
            fn from(value: $t) -> Self {
                value.0
            }
        }
    };
}

impl_string_newtype!(StudyInstanceUid, "StudyInstanceUID", normalize_uid);
impl_string_newtype!(SeriesInstanceUid, "SeriesInstanceUID", normalize_uid);
impl_string_newtype!(SopInstanceUid, "SOPInstanceUID", normalize_uid);
impl_string_newtype!(TransactionUid, "TransactionUID", normalize_uid);
impl_string_newtype!(AeTitle, "AETitle", normalize_ae_title);
impl_string_newtype!(ExporterId, "ExporterID", normalize_name);
impl_string_newtype!(DeviceName, "DeviceName", normalize_name);

impl crate::value_object::ValueObject for AeTitle {}
