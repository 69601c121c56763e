//! Workspace lifecycle: out-of-band creation and cascading deletion.
//!
//! Creating a workspace provisions its keyring (version 1, active) in the
//! same transaction, so a workspace with no usable DEK never exists.

use tracing::{info, instrument};

use crate::crypto::CryptoService;
use crate::domain::{
    validate_slug, NewWorkspace, Workspace, WorkspaceBinding, WorkspaceId,
};
use crate::errors::{Result, VaultryError};
use crate::services::keyring::KeyringService;
use crate::storage::{DbPool, WorkspaceRepository};

#[derive(Clone)]
pub struct WorkspaceService {
    pool: DbPool,
    repository: WorkspaceRepository,
    keyring: KeyringService,
    crypto: CryptoService,
}

impl WorkspaceService {
    pub fn new(
        pool: DbPool,
        repository: WorkspaceRepository,
        keyring: KeyringService,
        crypto: CryptoService,
    ) -> Self {
        Self { pool, repository, keyring, crypto }
    }

    /// Create a workspace and bootstrap its keyring atomically.
    #[instrument(skip(self, request), fields(slug = %request.slug))]
    pub async fn create(&self, request: NewWorkspace) -> Result<Workspace> {
        validate_slug(&request.slug)?;

        if request.display_name.trim().is_empty() {
            return Err(VaultryError::invalid_config_field(
                "Display name cannot be empty",
                "display_name",
            ));
        }

        let now = chrono::Utc::now();
        let workspace = Workspace {
            id: WorkspaceId::new(),
            slug: request.slug,
            display_name: request.display_name,
            master_key_fingerprint: self.crypto.master_fingerprint().to_string(),
            settings: request.settings,
            created_at: now,
            updated_at: now,
        };

        let mut tx = self.pool.begin().await.map_err(|e| {
            VaultryError::database(e, "Failed to begin workspace creation transaction")
        })?;

        self.repository.insert(&mut tx, &workspace).await?;
        self.keyring.bootstrap(&mut tx, &workspace.id).await?;

        tx.commit().await.map_err(|e| {
            VaultryError::database(e, "Failed to commit workspace creation transaction")
        })?;

        info!(workspace_id = %workspace.id, slug = %workspace.slug, "Workspace created");
        Ok(workspace)
    }

    /// Resolve a workspace by its slug.
    pub async fn get_by_slug(&self, slug: &str) -> Result<Workspace> {
        self.repository.get_by_slug(slug).await
    }

    /// Resolve a workspace by id.
    pub async fn get_by_id(&self, id: &WorkspaceId) -> Result<Workspace> {
        self.repository.get_by_id(id).await
    }

    /// Destroy a workspace and, by cascade, every keyring entry, secret,
    /// version, token, and audit record it owns. The cascade removes the
    /// audit trail too, so the deletion itself is recorded in operational
    /// logs only.
    #[instrument(skip(self), fields(workspace_id = %id))]
    pub async fn delete(&self, id: &WorkspaceId) -> Result<()> {
        let existed = self.repository.delete(id).await?;
        if !existed {
            return Err(VaultryError::not_found("workspace", id.as_str()));
        }

        info!(workspace_id = %id, "Workspace destroyed with all owned data");
        Ok(())
    }

    /// Workspace binding for out-of-band provisioning flows (bootstrap
    /// token issuance, migrations). Request paths must derive their binding
    /// from authentication instead.
    pub fn provisioning_binding(&self, workspace: &Workspace) -> WorkspaceBinding {
        WorkspaceBinding::new(workspace.id.clone())
    }
}

impl std::fmt::Debug for WorkspaceService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkspaceService").field("crypto", &self.crypto).finish()
    }
}
