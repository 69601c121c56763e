//! Secret repository: metadata envelopes plus immutable encrypted versions.
//!
//! Every query is scoped by a [`WorkspaceBinding`]; there is no accessor
//! that can cross a tenant boundary. The transactional pieces of the
//! versioned upsert take a connection so the secret store can compose them
//! atomically.

use crate::domain::{
    Secret, SecretId, SecretKind, SecretVersionInfo, WorkspaceBinding, WorkspaceId,
};
use crate::errors::{Result, VaultryError};
use crate::storage::DbPool;
use sqlx::{FromRow, Row, SqliteConnection};
use std::str::FromStr;
use tracing::instrument;

#[derive(Debug, Clone, FromRow)]
struct SecretRow {
    pub id: String,
    pub workspace_id: String,
    pub key: String,
    pub kind: String,
    pub current_version: i64,
    pub description: Option<String>,
    pub tags: String,
    pub created_by: Option<String>,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

impl SecretRow {
    fn into_model(self) -> Result<Secret> {
        let kind = SecretKind::from_str(&self.kind).map_err(|_| {
            VaultryError::data_integrity(format!("Unknown secret kind: {}", self.kind))
        })?;
        let tags: Vec<String> = serde_json::from_str(&self.tags)
            .map_err(|e| VaultryError::serialization(e, "Invalid secret tags JSON"))?;

        Ok(Secret {
            id: SecretId::from_string(self.id),
            workspace_id: WorkspaceId::from_string(self.workspace_id),
            key: self.key,
            kind,
            current_version: self.current_version,
            description: self.description,
            tags,
            created_by: self.created_by,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

/// One stored version row with its encrypted payload (base64 fields).
#[derive(Debug, Clone, FromRow)]
pub struct SecretVersionRow {
    pub id: String,
    pub version: i64,
    pub ciphertext: String,
    pub iv: String,
    pub tag: String,
    pub key_version: i64,
    pub created_by: Option<String>,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

const SECRET_COLUMNS: &str = "id, workspace_id, key, kind, current_version, description, tags, \
                              created_by, created_at, updated_at";

/// Escape LIKE wildcards in a user-supplied prefix. Secret keys may contain
/// '_' which LIKE would otherwise treat as a single-character wildcard.
fn escape_like(prefix: &str) -> String {
    prefix.replace('\\', "\\\\").replace('%', "\\%").replace('_', "\\_")
}

/// Repository for secret data access
#[derive(Debug, Clone)]
pub struct SecretRepository {
    pool: DbPool,
}

impl SecretRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Look up a secret by key, if present.
    #[instrument(skip(self, binding), fields(workspace_id = %binding.workspace_id(), key), name = "db_find_secret")]
    pub async fn find(&self, binding: &WorkspaceBinding, key: &str) -> Result<Option<Secret>> {
        let row = sqlx::query_as::<_, SecretRow>(&format!(
            "SELECT {} FROM secrets WHERE workspace_id = $1 AND key = $2",
            SECRET_COLUMNS
        ))
        .bind(binding.workspace_id())
        .bind(key)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| VaultryError::database(e, format!("Failed to look up secret '{}'", key)))?;

        row.map(SecretRow::into_model).transpose()
    }

    /// Look up a secret by key or fail with `NotFound`.
    pub async fn get(&self, binding: &WorkspaceBinding, key: &str) -> Result<Secret> {
        self.find(binding, key)
            .await?
            .ok_or_else(|| VaultryError::not_found("secret", key))
    }

    /// Same lookup inside an open transaction.
    pub async fn find_in_tx(
        &self,
        conn: &mut SqliteConnection,
        binding: &WorkspaceBinding,
        key: &str,
    ) -> Result<Option<Secret>> {
        let row = sqlx::query_as::<_, SecretRow>(&format!(
            "SELECT {} FROM secrets WHERE workspace_id = $1 AND key = $2",
            SECRET_COLUMNS
        ))
        .bind(binding.workspace_id())
        .bind(key)
        .fetch_optional(conn)
        .await
        .map_err(|e| VaultryError::database(e, format!("Failed to look up secret '{}'", key)))?;

        row.map(SecretRow::into_model).transpose()
    }

    /// Create-or-refresh the metadata envelope for `(workspace, key)` and
    /// return the secret id. First write statement of the upsert
    /// transaction; the engine's write lock serializes everything after it.
    #[allow(clippy::too_many_arguments)]
    #[instrument(skip_all, fields(workspace_id = %binding.workspace_id(), key), name = "db_upsert_secret")]
    pub async fn upsert_envelope(
        &self,
        conn: &mut SqliteConnection,
        binding: &WorkspaceBinding,
        secret_id: &SecretId,
        key: &str,
        kind: SecretKind,
        description: Option<&str>,
        tags: &[String],
        created_by: Option<&str>,
        now: chrono::DateTime<chrono::Utc>,
    ) -> Result<SecretId> {
        let tags_json = serde_json::to_string(tags)
            .map_err(|e| VaultryError::serialization(e, "Invalid secret tags JSON"))?;

        sqlx::query(
            "INSERT INTO secrets (id, workspace_id, key, kind, current_version, description, tags, created_by, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, 0, $5, $6, $7, $8, $9) \
             ON CONFLICT (workspace_id, key) DO UPDATE SET \
                 kind = excluded.kind, \
                 description = excluded.description, \
                 tags = excluded.tags, \
                 updated_at = excluded.updated_at",
        )
        .bind(secret_id)
        .bind(binding.workspace_id())
        .bind(key)
        .bind(kind.as_str())
        .bind(description)
        .bind(&tags_json)
        .bind(created_by)
        .bind(now)
        .bind(now)
        .execute(&mut *conn)
        .await
        .map_err(VaultryError::from)?;

        let row = sqlx::query("SELECT id FROM secrets WHERE workspace_id = $1 AND key = $2")
            .bind(binding.workspace_id())
            .bind(key)
            .fetch_one(&mut *conn)
            .await
            .map_err(|e| VaultryError::database(e, "Failed to read back upserted secret"))?;

        Ok(SecretId::from_string(row.get::<String, _>("id")))
    }

    /// Insert a version row, allocating `MAX(version)+1` atomically under
    /// the transaction's write lock. Returns the allocated version number.
    #[allow(clippy::too_many_arguments)]
    #[instrument(skip_all, fields(secret_id = %secret_id), name = "db_insert_secret_version")]
    pub async fn insert_version(
        &self,
        conn: &mut SqliteConnection,
        version_id: &str,
        secret_id: &SecretId,
        ciphertext_b64: &str,
        iv_b64: &str,
        tag_b64: &str,
        key_version: i64,
        created_by: Option<&str>,
        now: chrono::DateTime<chrono::Utc>,
    ) -> Result<i64> {
        sqlx::query(
            "INSERT INTO secret_versions (id, secret_id, version, ciphertext, iv, tag, key_version, metadata, created_by, created_at) \
             VALUES ($1, $2, (SELECT COALESCE(MAX(version), 0) + 1 FROM secret_versions WHERE secret_id = $3), $4, $5, $6, $7, '{}', $8, $9)",
        )
        .bind(version_id)
        .bind(secret_id)
        .bind(secret_id)
        .bind(ciphertext_b64)
        .bind(iv_b64)
        .bind(tag_b64)
        .bind(key_version)
        .bind(created_by)
        .bind(now)
        .execute(&mut *conn)
        .await
        .map_err(VaultryError::from)?;

        let row = sqlx::query("SELECT version FROM secret_versions WHERE id = $1")
            .bind(version_id)
            .fetch_one(&mut *conn)
            .await
            .map_err(|e| VaultryError::database(e, "Failed to read back inserted version"))?;

        Ok(row.get::<i64, _>("version"))
    }

    /// Advance the current-version pointer.
    #[instrument(skip(self, conn), fields(secret_id = %secret_id, version), name = "db_set_current_version")]
    pub async fn set_current_version(
        &self,
        conn: &mut SqliteConnection,
        secret_id: &SecretId,
        version: i64,
        now: chrono::DateTime<chrono::Utc>,
    ) -> Result<()> {
        let result = sqlx::query(
            "UPDATE secrets SET current_version = $1, updated_at = $2 WHERE id = $3",
        )
        .bind(version)
        .bind(now)
        .bind(secret_id)
        .execute(conn)
        .await
        .map_err(|e| VaultryError::database(e, "Failed to advance current version"))?;

        if result.rows_affected() == 0 {
            return Err(VaultryError::data_integrity(format!(
                "Secret '{}' vanished while advancing its version pointer",
                secret_id
            )));
        }

        Ok(())
    }

    /// Fetch one encrypted version of a secret.
    #[instrument(skip(self), fields(secret_id = %secret_id, version), name = "db_get_secret_version")]
    pub async fn get_version(
        &self,
        secret_id: &SecretId,
        version: i64,
    ) -> Result<Option<SecretVersionRow>> {
        let row = sqlx::query_as::<_, SecretVersionRow>(
            "SELECT id, version, ciphertext, iv, tag, key_version, created_by, created_at \
             FROM secret_versions WHERE secret_id = $1 AND version = $2",
        )
        .bind(secret_id)
        .bind(version)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| VaultryError::database(e, "Failed to load secret version"))?;

        Ok(row)
    }

    /// List secret metadata (never values), filtered by key prefix, sorted
    /// by key ascending, paginated. The total is workspace- and
    /// prefix-scoped.
    #[instrument(skip(self, binding), fields(workspace_id = %binding.workspace_id(), prefix, limit, offset), name = "db_list_secrets")]
    pub async fn list(
        &self,
        binding: &WorkspaceBinding,
        prefix: Option<&str>,
        limit: i64,
        offset: i64,
    ) -> Result<(Vec<Secret>, i64)> {
        let pattern = prefix.map(|p| format!("{}%", escape_like(p)));

        let (rows, total) = match &pattern {
            Some(pattern) => {
                let rows = sqlx::query_as::<_, SecretRow>(&format!(
                    "SELECT {} FROM secrets WHERE workspace_id = $1 AND key LIKE $2 ESCAPE '\\' \
                     ORDER BY key ASC LIMIT $3 OFFSET $4",
                    SECRET_COLUMNS
                ))
                .bind(binding.workspace_id())
                .bind(pattern)
                .bind(limit)
                .bind(offset)
                .fetch_all(&self.pool)
                .await
                .map_err(|e| VaultryError::database(e, "Failed to list secrets"))?;

                let total = sqlx::query(
                    "SELECT COUNT(*) AS n FROM secrets WHERE workspace_id = $1 AND key LIKE $2 ESCAPE '\\'",
                )
                .bind(binding.workspace_id())
                .bind(pattern)
                .fetch_one(&self.pool)
                .await
                .map_err(|e| VaultryError::database(e, "Failed to count secrets"))?
                .get::<i64, _>("n");

                (rows, total)
            }
            None => {
                let rows = sqlx::query_as::<_, SecretRow>(&format!(
                    "SELECT {} FROM secrets WHERE workspace_id = $1 \
                     ORDER BY key ASC LIMIT $2 OFFSET $3",
                    SECRET_COLUMNS
                ))
                .bind(binding.workspace_id())
                .bind(limit)
                .bind(offset)
                .fetch_all(&self.pool)
                .await
                .map_err(|e| VaultryError::database(e, "Failed to list secrets"))?;

                let total = sqlx::query("SELECT COUNT(*) AS n FROM secrets WHERE workspace_id = $1")
                    .bind(binding.workspace_id())
                    .fetch_one(&self.pool)
                    .await
                    .map_err(|e| VaultryError::database(e, "Failed to count secrets"))?
                    .get::<i64, _>("n");

                (rows, total)
            }
        };

        let secrets =
            rows.into_iter().map(SecretRow::into_model).collect::<Result<Vec<_>>>()?;
        Ok((secrets, total))
    }

    /// List version numbers with creation metadata; never ciphertexts.
    #[instrument(skip(self), fields(secret_id = %secret_id, limit, offset), name = "db_list_secret_versions")]
    pub async fn list_versions(
        &self,
        secret_id: &SecretId,
        limit: i64,
        offset: i64,
    ) -> Result<(Vec<SecretVersionInfo>, i64)> {
        #[derive(FromRow)]
        struct VersionInfoRow {
            version: i64,
            key_version: i64,
            created_by: Option<String>,
            created_at: chrono::DateTime<chrono::Utc>,
        }

        let rows = sqlx::query_as::<_, VersionInfoRow>(
            "SELECT version, key_version, created_by, created_at FROM secret_versions \
             WHERE secret_id = $1 ORDER BY version DESC LIMIT $2 OFFSET $3",
        )
        .bind(secret_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| VaultryError::database(e, "Failed to list secret versions"))?;

        let total = sqlx::query("SELECT COUNT(*) AS n FROM secret_versions WHERE secret_id = $1")
            .bind(secret_id)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| VaultryError::database(e, "Failed to count secret versions"))?
            .get::<i64, _>("n");

        let versions = rows
            .into_iter()
            .map(|row| SecretVersionInfo {
                version: row.version,
                key_version: row.key_version,
                created_by: row.created_by,
                created_at: row.created_at,
            })
            .collect();

        Ok((versions, total))
    }

    /// Delete a secret and cascade to its versions. Returns false when the
    /// key did not exist (callers treat that as idempotent success).
    #[instrument(skip(self, binding), fields(workspace_id = %binding.workspace_id(), key), name = "db_delete_secret")]
    pub async fn delete(&self, binding: &WorkspaceBinding, key: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM secrets WHERE workspace_id = $1 AND key = $2")
            .bind(binding.workspace_id())
            .bind(key)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                VaultryError::database(e, format!("Failed to delete secret '{}'", key))
            })?;

        Ok(result.rows_affected() > 0)
    }
}
