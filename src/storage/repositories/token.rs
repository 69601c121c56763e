//! Token repository for authentication token management.
//!
//! Only hashed token material is stored: the argon2id hash for
//! verification and a keyed fingerprint for lookup. The cleartext never
//! reaches this layer.

use crate::auth::models::{ApiToken, TokenRole};
use crate::domain::{TokenId, WorkspaceBinding, WorkspaceId};
use crate::errors::{Result, VaultryError};
use crate::storage::DbPool;
use sqlx::{FromRow, Row};
use std::str::FromStr;
use tracing::instrument;

#[derive(Debug, Clone, FromRow)]
struct ApiTokenRow {
    pub id: String,
    pub workspace_id: String,
    pub name: String,
    pub hashed_secret: String,
    pub role: String,
    pub scopes: String,
    pub active: bool,
    pub expires_at: Option<chrono::DateTime<chrono::Utc>>,
    pub last_used_at: Option<chrono::DateTime<chrono::Utc>>,
    pub last_used_ip: Option<String>,
    pub created_by: Option<String>,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

impl ApiTokenRow {
    fn into_model(self) -> Result<ApiToken> {
        let role = TokenRole::from_str(&self.role).map_err(|_| {
            VaultryError::data_integrity(format!(
                "Unknown token role '{}' for token {}",
                self.role, self.id
            ))
        })?;
        let scopes: Vec<String> = serde_json::from_str(&self.scopes)
            .map_err(|e| VaultryError::serialization(e, "Invalid token scopes JSON"))?;

        Ok(ApiToken {
            id: TokenId::from_string(self.id),
            workspace_id: WorkspaceId::from_string(self.workspace_id),
            name: self.name,
            role,
            scopes,
            active: self.active,
            expires_at: self.expires_at,
            last_used_at: self.last_used_at,
            last_used_ip: self.last_used_ip,
            created_by: self.created_by,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

/// Row found through the fingerprint index during authentication: the token
/// model plus its stored hash for the argon2 verify step.
#[derive(Debug, Clone)]
pub struct TokenAuthRow {
    pub token: ApiToken,
    pub hashed_secret: String,
}

/// New token database payload.
#[derive(Debug, Clone)]
pub struct NewApiToken {
    pub id: TokenId,
    pub workspace_id: WorkspaceId,
    pub name: String,
    pub token_fingerprint: String,
    pub hashed_secret: String,
    pub role: TokenRole,
    pub scopes: Vec<String>,
    pub expires_at: Option<chrono::DateTime<chrono::Utc>>,
    pub created_by: Option<String>,
}

const TOKEN_COLUMNS: &str = "id, workspace_id, name, hashed_secret, role, scopes, active, \
                             expires_at, last_used_at, last_used_ip, created_by, created_at, \
                             updated_at";

/// Repository for API token data access
#[derive(Debug, Clone)]
pub struct TokenRepository {
    pool: DbPool,
}

impl TokenRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Insert a token. A name collision within the workspace (or the
    /// astronomically unlikely fingerprint collision) surfaces as
    /// `Conflict`.
    #[instrument(skip(self, token), fields(workspace_id = %token.workspace_id, token_name = %token.name), name = "db_create_token")]
    pub async fn insert(&self, token: &NewApiToken) -> Result<ApiToken> {
        let scopes_json = serde_json::to_string(&token.scopes)
            .map_err(|e| VaultryError::serialization(e, "Invalid token scopes JSON"))?;
        let now = chrono::Utc::now();

        sqlx::query(
            "INSERT INTO api_tokens (id, workspace_id, name, token_fingerprint, hashed_secret, role, scopes, active, expires_at, created_by, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, 1, $8, $9, $10, $11)",
        )
        .bind(&token.id)
        .bind(&token.workspace_id)
        .bind(&token.name)
        .bind(&token.token_fingerprint)
        .bind(&token.hashed_secret)
        .bind(token.role.as_str())
        .bind(&scopes_json)
        .bind(token.expires_at)
        .bind(&token.created_by)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(|err| match VaultryError::from(err) {
            e if e.is_unique_violation() => VaultryError::conflict(
                format!("Token name '{}' already exists in this workspace", token.name),
                "token",
            ),
            e => e,
        })?;

        self.get_by_id(&token.id).await
    }

    async fn get_by_id(&self, id: &TokenId) -> Result<ApiToken> {
        let row = sqlx::query_as::<_, ApiTokenRow>(&format!(
            "SELECT {} FROM api_tokens WHERE id = $1",
            TOKEN_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| VaultryError::database(e, "Failed to load token"))?;

        match row {
            Some(row) => row.into_model(),
            None => Err(VaultryError::not_found("token", id.as_str())),
        }
    }

    /// Authentication lookup through the keyed fingerprint index. Not
    /// workspace-scoped: the workspace binding is derived from the result.
    #[instrument(skip_all, name = "db_find_token_by_fingerprint")]
    pub async fn find_by_fingerprint(&self, fingerprint: &str) -> Result<Option<TokenAuthRow>> {
        let row = sqlx::query_as::<_, ApiTokenRow>(&format!(
            "SELECT {} FROM api_tokens WHERE token_fingerprint = $1",
            TOKEN_COLUMNS
        ))
        .bind(fingerprint)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| VaultryError::database(e, "Failed to look up token"))?;

        row.map(|row| {
            let hashed_secret = row.hashed_secret.clone();
            row.into_model().map(|token| TokenAuthRow { token, hashed_secret })
        })
        .transpose()
    }

    /// Record usage metadata. Best-effort: the caller spawns this off the
    /// request path and swallows failures.
    #[instrument(skip(self), fields(token_id = %id), name = "db_touch_token_last_used")]
    pub async fn touch_last_used(
        &self,
        id: &TokenId,
        ip: Option<&str>,
        when: chrono::DateTime<chrono::Utc>,
    ) -> Result<()> {
        sqlx::query("UPDATE api_tokens SET last_used_at = $1, last_used_ip = $2 WHERE id = $3")
            .bind(when)
            .bind(ip)
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| VaultryError::database(e, "Failed to update token usage metadata"))?;

        Ok(())
    }

    /// List tokens of a workspace, newest first.
    #[instrument(skip(self, binding), fields(workspace_id = %binding.workspace_id(), limit, offset), name = "db_list_tokens")]
    pub async fn list(
        &self,
        binding: &WorkspaceBinding,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<ApiToken>> {
        let rows = sqlx::query_as::<_, ApiTokenRow>(&format!(
            "SELECT {} FROM api_tokens WHERE workspace_id = $1 \
             ORDER BY created_at DESC LIMIT $2 OFFSET $3",
            TOKEN_COLUMNS
        ))
        .bind(binding.workspace_id())
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| VaultryError::database(e, "Failed to list tokens"))?;

        rows.into_iter().map(ApiTokenRow::into_model).collect()
    }

    /// Look up a token by its workspace-unique name.
    #[instrument(skip(self, binding), fields(workspace_id = %binding.workspace_id(), name), name = "db_get_token_by_name")]
    pub async fn get_by_name(&self, binding: &WorkspaceBinding, name: &str) -> Result<ApiToken> {
        let row = sqlx::query_as::<_, ApiTokenRow>(&format!(
            "SELECT {} FROM api_tokens WHERE workspace_id = $1 AND name = $2",
            TOKEN_COLUMNS
        ))
        .bind(binding.workspace_id())
        .bind(name)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| VaultryError::database(e, "Failed to load token by name"))?;

        match row {
            Some(row) => row.into_model(),
            None => Err(VaultryError::not_found("token", name)),
        }
    }

    /// Deactivate a token. Returns the updated record.
    #[instrument(skip(self, binding), fields(workspace_id = %binding.workspace_id(), name), name = "db_deactivate_token")]
    pub async fn deactivate(&self, binding: &WorkspaceBinding, name: &str) -> Result<ApiToken> {
        let result = sqlx::query(
            "UPDATE api_tokens SET active = 0, updated_at = $1 WHERE workspace_id = $2 AND name = $3",
        )
        .bind(chrono::Utc::now())
        .bind(binding.workspace_id())
        .bind(name)
        .execute(&self.pool)
        .await
        .map_err(|e| VaultryError::database(e, "Failed to deactivate token"))?;

        if result.rows_affected() == 0 {
            return Err(VaultryError::not_found("token", name));
        }

        self.get_by_name(binding, name).await
    }

    /// Purge a token record entirely.
    #[instrument(skip(self, binding), fields(workspace_id = %binding.workspace_id(), name), name = "db_delete_token")]
    pub async fn delete(&self, binding: &WorkspaceBinding, name: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM api_tokens WHERE workspace_id = $1 AND name = $2")
            .bind(binding.workspace_id())
            .bind(name)
            .execute(&self.pool)
            .await
            .map_err(|e| VaultryError::database(e, "Failed to delete token"))?;

        Ok(result.rows_affected() > 0)
    }

    /// Count active tokens across all workspaces (metrics gauge).
    pub async fn count_active(&self) -> Result<i64> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM api_tokens WHERE active = 1")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| VaultryError::database(e, "Failed to count active tokens"))?;
        Ok(row.get::<i64, _>("n"))
    }
}
