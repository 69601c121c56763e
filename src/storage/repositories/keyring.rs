//! Keyring repository: the per-workspace history of wrapped DEKs.
//!
//! Rows are append-only. Rotation inserts the successor and flips the
//! predecessor's active flag; wrapped key material is never rewritten.

use crate::domain::{WorkspaceBinding, WorkspaceId};
use crate::errors::{Result, VaultryError};
use crate::storage::DbPool;
use sqlx::{FromRow, Row, SqliteConnection};
use tracing::instrument;

/// One (workspace, key version) row. `wrapped_dek` stays base64-encoded
/// here; only the keyring service unwraps it.
#[derive(Debug, Clone, FromRow)]
pub struct KeyringEntryRow {
    pub id: String,
    pub version: i64,
    pub wrapped_dek: String,
    pub active: bool,
    pub rotated_at: chrono::DateTime<chrono::Utc>,
}

/// Repository for keyring data access
#[derive(Debug, Clone)]
pub struct KeyringRepository {
    pool: DbPool,
}

impl KeyringRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Insert the bootstrap entry (version 1, active) for a new workspace.
    /// Composed into the workspace-creation transaction by the caller.
    #[instrument(skip(self, conn, wrapped_dek_b64), fields(workspace_id = %workspace_id), name = "db_keyring_bootstrap")]
    pub async fn insert_bootstrap_entry(
        &self,
        conn: &mut SqliteConnection,
        workspace_id: &WorkspaceId,
        entry_id: &str,
        wrapped_dek_b64: &str,
        now: chrono::DateTime<chrono::Utc>,
    ) -> Result<()> {
        sqlx::query(
            "INSERT INTO keyring_entries (id, workspace_id, version, wrapped_dek, active, rotated_at) \
             VALUES ($1, $2, 1, $3, 1, $4)",
        )
        .bind(entry_id)
        .bind(workspace_id)
        .bind(wrapped_dek_b64)
        .bind(now)
        .execute(conn)
        .await
        .map_err(VaultryError::from)?;

        Ok(())
    }

    /// Insert the next keyring entry, allocating `MAX(version)+1` atomically
    /// under the transaction's write lock. Returns the allocated version.
    ///
    /// A concurrent rotation racing this insert trips the
    /// `(workspace_id, version)` unique constraint; the caller retries.
    #[instrument(skip(self, conn, wrapped_dek_b64), fields(workspace_id = %workspace_id), name = "db_keyring_insert_next")]
    pub async fn insert_next_entry(
        &self,
        conn: &mut SqliteConnection,
        workspace_id: &WorkspaceId,
        entry_id: &str,
        wrapped_dek_b64: &str,
        now: chrono::DateTime<chrono::Utc>,
    ) -> Result<i64> {
        sqlx::query(
            "INSERT INTO keyring_entries (id, workspace_id, version, wrapped_dek, active, rotated_at) \
             VALUES ($1, $2, (SELECT COALESCE(MAX(version), 0) + 1 FROM keyring_entries WHERE workspace_id = $3), $4, 1, $5)",
        )
        .bind(entry_id)
        .bind(workspace_id)
        .bind(workspace_id)
        .bind(wrapped_dek_b64)
        .bind(now)
        .execute(&mut *conn)
        .await
        .map_err(VaultryError::from)?;

        let row = sqlx::query("SELECT version FROM keyring_entries WHERE id = $1")
            .bind(entry_id)
            .fetch_one(&mut *conn)
            .await
            .map_err(|e| VaultryError::database(e, "Failed to read back rotated key version"))?;

        Ok(row.get::<i64, _>("version"))
    }

    /// Flip active off on every entry older than `keep_version`.
    #[instrument(skip(self, conn), fields(workspace_id = %workspace_id, keep_version), name = "db_keyring_deactivate")]
    pub async fn deactivate_predecessors(
        &self,
        conn: &mut SqliteConnection,
        workspace_id: &WorkspaceId,
        keep_version: i64,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE keyring_entries SET active = 0 WHERE workspace_id = $1 AND version < $2",
        )
        .bind(workspace_id)
        .bind(keep_version)
        .execute(conn)
        .await
        .map_err(|e| VaultryError::database(e, "Failed to deactivate previous keyring entries"))?;

        Ok(())
    }

    /// The active entry for a workspace. The highest version and the active
    /// flag must coincide; a divergence is a structural violation.
    #[instrument(skip(self, binding), fields(workspace_id = %binding.workspace_id()), name = "db_keyring_active")]
    pub async fn active_entry(&self, binding: &WorkspaceBinding) -> Result<KeyringEntryRow> {
        let rows = sqlx::query_as::<_, KeyringEntryRow>(
            "SELECT id, version, wrapped_dek, active, rotated_at FROM keyring_entries \
             WHERE workspace_id = $1 AND active = 1",
        )
        .bind(binding.workspace_id())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| VaultryError::database(e, "Failed to load active keyring entry"))?;

        if rows.len() > 1 {
            return Err(VaultryError::data_integrity(format!(
                "Workspace '{}' has {} active keyring entries",
                binding.workspace_id(),
                rows.len()
            )));
        }

        let mut rows = rows;
        match rows.pop() {
            Some(entry) => {
                self.assert_entry_is_newest(binding, &entry).await?;
                Ok(entry)
            }
            None => Err(VaultryError::data_integrity(format!(
                "Workspace '{}' has no active keyring entry",
                binding.workspace_id()
            ))),
        }
    }

    async fn assert_entry_is_newest(
        &self,
        binding: &WorkspaceBinding,
        entry: &KeyringEntryRow,
    ) -> Result<()> {
        let row = sqlx::query(
            "SELECT COALESCE(MAX(version), 0) AS max_version FROM keyring_entries WHERE workspace_id = $1",
        )
        .bind(binding.workspace_id())
        .fetch_one(&self.pool)
        .await
        .map_err(|e| VaultryError::database(e, "Failed to check keyring head version"))?;

        let max_version = row.get::<i64, _>("max_version");
        if max_version != entry.version {
            return Err(VaultryError::data_integrity(format!(
                "Active keyring entry is version {} but head is {}",
                entry.version, max_version
            )));
        }
        Ok(())
    }

    /// A specific keyring entry, used by decryption of older secret versions.
    #[instrument(skip(self, binding), fields(workspace_id = %binding.workspace_id(), version), name = "db_keyring_for_version")]
    pub async fn entry_for_version(
        &self,
        binding: &WorkspaceBinding,
        version: i64,
    ) -> Result<KeyringEntryRow> {
        let row = sqlx::query_as::<_, KeyringEntryRow>(
            "SELECT id, version, wrapped_dek, active, rotated_at FROM keyring_entries \
             WHERE workspace_id = $1 AND version = $2",
        )
        .bind(binding.workspace_id())
        .bind(version)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| VaultryError::database(e, "Failed to load keyring entry"))?;

        row.ok_or_else(|| VaultryError::not_found("keyring_entry", version.to_string()))
    }

    /// Count entries for a workspace (diagnostics and tests).
    pub async fn count(&self, binding: &WorkspaceBinding) -> Result<i64> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM keyring_entries WHERE workspace_id = $1")
            .bind(binding.workspace_id())
            .fetch_one(&self.pool)
            .await
            .map_err(|e| VaultryError::database(e, "Failed to count keyring entries"))?;
        Ok(row.get::<i64, _>("n"))
    }
}
