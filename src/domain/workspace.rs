//! Workspace model and the tenant-isolation binding.

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::domain::WorkspaceId;
use crate::errors::{Result, VaultryError};

static SLUG_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-z0-9-]+$").expect("SLUG_REGEX should be a valid regex pattern"));

pub const SLUG_MIN_LEN: usize = 3;
pub const SLUG_MAX_LEN: usize = 63;

/// A tenant boundary. All other entities are scoped to exactly one workspace
/// and destroyed by cascade when the workspace is deleted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workspace {
    pub id: WorkspaceId,
    pub slug: String,
    pub display_name: String,
    /// Hex SHA-256 of the master key recorded at creation; the keyring
    /// refuses to unwrap DEKs under a master key with a different
    /// fingerprint.
    pub master_key_fingerprint: String,
    pub settings: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Payload for creating a workspace.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewWorkspace {
    pub slug: String,
    pub display_name: String,
    #[serde(default)]
    pub settings: serde_json::Value,
}

/// Proof that a request has been bound to exactly one workspace.
///
/// Every repository method that touches tenant data takes a binding and
/// filters by it. The constructor is crate-private: a binding can only be
/// obtained from an authenticated [`crate::auth::AuthContext`] or from the
/// workspace service during bootstrap, so unscoped tenant access cannot be
/// expressed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkspaceBinding {
    workspace_id: WorkspaceId,
}

impl WorkspaceBinding {
    pub(crate) fn new(workspace_id: WorkspaceId) -> Self {
        Self { workspace_id }
    }

    pub fn workspace_id(&self) -> &WorkspaceId {
        &self.workspace_id
    }

    /// Check the binding against an explicitly addressed workspace.
    pub fn covers(&self, target: &WorkspaceId) -> bool {
        &self.workspace_id == target
    }
}

/// Validate a workspace slug: lowercase alphanumerics and hyphens, 3-63 chars.
pub fn validate_slug(slug: &str) -> Result<()> {
    if slug.len() < SLUG_MIN_LEN || slug.len() > SLUG_MAX_LEN {
        return Err(VaultryError::invalid_config_field(
            format!("Workspace slug must be {}-{} characters", SLUG_MIN_LEN, SLUG_MAX_LEN),
            "slug",
        ));
    }
    if !SLUG_REGEX.is_match(slug) {
        return Err(VaultryError::invalid_config_field(
            "Workspace slug may only contain lowercase letters, digits, and hyphens",
            "slug",
        ));
    }
    Ok(())
}
