//! Workspace repository.
//!
//! Workspaces are the tenant boundary: every other aggregate hangs off a
//! workspace row and is destroyed by cascade when it goes.

use crate::domain::{Workspace, WorkspaceId};
use crate::errors::{Result, VaultryError};
use crate::storage::DbPool;
use sqlx::{FromRow, SqliteConnection};
use tracing::instrument;

#[derive(Debug, Clone, FromRow)]
struct WorkspaceRow {
    pub id: String,
    pub slug: String,
    pub display_name: String,
    pub master_key_fingerprint: String,
    pub settings: String,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

impl WorkspaceRow {
    fn into_model(self) -> Result<Workspace> {
        let settings = serde_json::from_str(&self.settings)
            .map_err(|e| VaultryError::serialization(e, "Invalid workspace settings JSON"))?;

        Ok(Workspace {
            id: WorkspaceId::from_string(self.id),
            slug: self.slug,
            display_name: self.display_name,
            master_key_fingerprint: self.master_key_fingerprint,
            settings,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

const WORKSPACE_COLUMNS: &str =
    "id, slug, display_name, master_key_fingerprint, settings, created_at, updated_at";

/// Repository for workspace data access
#[derive(Debug, Clone)]
pub struct WorkspaceRepository {
    pool: DbPool,
}

impl WorkspaceRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Insert a workspace row. Takes a connection so the caller can compose
    /// it with keyring bootstrap inside one transaction.
    #[instrument(skip(self, conn, workspace), fields(slug = %workspace.slug), name = "db_insert_workspace")]
    pub async fn insert(&self, conn: &mut SqliteConnection, workspace: &Workspace) -> Result<()> {
        let settings = serde_json::to_string(&workspace.settings)
            .map_err(|e| VaultryError::serialization(e, "Invalid workspace settings JSON"))?;

        sqlx::query(
            "INSERT INTO workspaces (id, slug, display_name, master_key_fingerprint, settings, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7)",
        )
        .bind(&workspace.id)
        .bind(&workspace.slug)
        .bind(&workspace.display_name)
        .bind(&workspace.master_key_fingerprint)
        .bind(&settings)
        .bind(workspace.created_at)
        .bind(workspace.updated_at)
        .execute(conn)
        .await
        .map_err(|err| match VaultryError::from(err) {
            e if e.is_unique_violation() => VaultryError::conflict(
                format!("Workspace slug '{}' already exists", workspace.slug),
                "workspace",
            ),
            e => e,
        })?;

        Ok(())
    }

    /// Get workspace by slug
    #[instrument(skip(self), name = "db_get_workspace_by_slug")]
    pub async fn get_by_slug(&self, slug: &str) -> Result<Workspace> {
        let row = sqlx::query_as::<_, WorkspaceRow>(&format!(
            "SELECT {} FROM workspaces WHERE slug = $1",
            WORKSPACE_COLUMNS
        ))
        .bind(slug)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| VaultryError::database(e, format!("Failed to get workspace '{}'", slug)))?;

        match row {
            Some(row) => row.into_model(),
            None => Err(VaultryError::not_found("workspace", slug)),
        }
    }

    /// Get workspace by ID
    #[instrument(skip(self), fields(workspace_id = %id), name = "db_get_workspace_by_id")]
    pub async fn get_by_id(&self, id: &WorkspaceId) -> Result<Workspace> {
        let row = sqlx::query_as::<_, WorkspaceRow>(&format!(
            "SELECT {} FROM workspaces WHERE id = $1",
            WORKSPACE_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| VaultryError::database(e, format!("Failed to get workspace '{}'", id)))?;

        match row {
            Some(row) => row.into_model(),
            None => Err(VaultryError::not_found("workspace", id.as_str())),
        }
    }

    /// Delete a workspace. Cascades to keyring entries, secrets and their
    /// versions, tokens, and audit records. Returns false when no row
    /// matched.
    #[instrument(skip(self), fields(workspace_id = %id), name = "db_delete_workspace")]
    pub async fn delete(&self, id: &WorkspaceId) -> Result<bool> {
        let result = sqlx::query("DELETE FROM workspaces WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                VaultryError::database(e, format!("Failed to delete workspace '{}'", id))
            })?;

        Ok(result.rows_affected() > 0)
    }
}
