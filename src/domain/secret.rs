//! Secret and secret-version value objects.

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use std::str::FromStr;
use thiserror::Error;

use crate::domain::{SecretId, WorkspaceId};
use crate::errors::{Result, VaultryError};

static KEY_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Za-z0-9/_.-]+$").expect("KEY_REGEX should be a valid regex pattern")
});

pub const KEY_MIN_LEN: usize = 1;
pub const KEY_MAX_LEN: usize = 255;

/// Value kind of a secret. The kind is sticky for binary secrets: once a
/// binary value has been stored, the secret cannot change to a textual kind
/// (and vice versa); string and json may alternate across versions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SecretKind {
    String,
    Json,
    Binary,
}

impl SecretKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SecretKind::String => "string",
            SecretKind::Json => "json",
            SecretKind::Binary => "binary",
        }
    }

    /// Whether a stored secret of kind `self` may accept a write of `next`.
    pub fn allows_transition_to(&self, next: SecretKind) -> bool {
        match (self, next) {
            (SecretKind::Binary, SecretKind::Binary) => true,
            (SecretKind::Binary, _) | (_, SecretKind::Binary) => false,
            _ => true,
        }
    }
}

impl Display for SecretKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for SecretKind {
    type Err = SecretKindParseError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "string" => Ok(SecretKind::String),
            "json" => Ok(SecretKind::Json),
            "binary" => Ok(SecretKind::Binary),
            other => Err(SecretKindParseError(other.to_string())),
        }
    }
}

/// Error returned when secret kind parsing fails.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("invalid secret kind: {0}")]
pub struct SecretKindParseError(pub String);

/// Metadata envelope identifying a logical secret within a workspace.
/// Never carries plaintext or ciphertext.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Secret {
    pub id: SecretId,
    pub workspace_id: WorkspaceId,
    pub key: String,
    pub kind: SecretKind,
    pub current_version: i64,
    pub description: Option<String>,
    pub tags: Vec<String>,
    pub created_by: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One row of a secret's version history, as returned by version listings.
/// Ciphertext and IV material never leave the store through this type.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecretVersionInfo {
    pub version: i64,
    /// Keyring entry version this snapshot was encrypted under.
    pub key_version: i64,
    pub created_by: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// A decrypted secret value together with its metadata.
#[derive(Clone, Serialize, Deserialize)]
pub struct DecryptedSecret {
    pub key: String,
    pub kind: SecretKind,
    pub value: Vec<u8>,
    pub version: i64,
    pub description: Option<String>,
    pub tags: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl DecryptedSecret {
    /// Interpret the value as UTF-8, for string and json kinds.
    pub fn value_as_str(&self) -> Result<&str> {
        std::str::from_utf8(&self.value)
            .map_err(|_| VaultryError::data_integrity("Secret value is not valid UTF-8"))
    }
}

// Keep plaintext out of debug output.
impl std::fmt::Debug for DecryptedSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DecryptedSecret")
            .field("key", &self.key)
            .field("kind", &self.kind)
            .field("value", &"[REDACTED]")
            .field("version", &self.version)
            .finish()
    }
}

/// Validate a secret key: `[A-Za-z0-9/_.-]`, 1-255 chars.
pub fn validate_secret_key(key: &str) -> Result<()> {
    if key.len() < KEY_MIN_LEN || key.len() > KEY_MAX_LEN {
        return Err(VaultryError::invalid_config_field(
            format!("Secret key must be {}-{} characters", KEY_MIN_LEN, KEY_MAX_LEN),
            "key",
        ));
    }
    if !KEY_REGEX.is_match(key) {
        return Err(VaultryError::invalid_config_field(
            "Secret key may only contain letters, digits, '/', '_', '.', and '-'",
            "key",
        ));
    }
    Ok(())
}
