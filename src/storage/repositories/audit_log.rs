//! Audit log repository.
//!
//! Append-only: the only write paths are insert and the retention purge.
//! Nothing in this module updates an existing record.

use crate::domain::{
    AuditAction, AuditRecord, AuditRecordId, AuditResource, TokenId, WorkspaceBinding, WorkspaceId,
};
use crate::errors::{Result, VaultryError};
use crate::storage::DbPool;
use sqlx::{FromRow, Row};
use std::str::FromStr;
use tracing::instrument;

#[derive(Debug, Clone, FromRow)]
struct AuditRecordRow {
    pub id: String,
    pub workspace_id: String,
    pub action: String,
    pub resource_type: String,
    pub resource_id: String,
    pub actor: Option<String>,
    pub token_id: Option<String>,
    pub source_addr: Option<String>,
    pub user_agent: Option<String>,
    pub correlation_id: String,
    pub success: bool,
    pub failure_reason: Option<String>,
    pub metadata: String,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

impl AuditRecordRow {
    fn into_model(self) -> Result<AuditRecord> {
        let action = AuditAction::from_str(&self.action).map_err(|_| {
            VaultryError::data_integrity(format!("Unknown audit action: {}", self.action))
        })?;
        let resource = AuditResource::from_str(&self.resource_type).map_err(|_| {
            VaultryError::data_integrity(format!(
                "Unknown audit resource type: {}",
                self.resource_type
            ))
        })?;
        let metadata = serde_json::from_str(&self.metadata)
            .map_err(|e| VaultryError::serialization(e, "Invalid audit metadata JSON"))?;

        Ok(AuditRecord {
            id: AuditRecordId::from_string(self.id),
            workspace_id: WorkspaceId::from_string(self.workspace_id),
            action,
            resource,
            resource_id: self.resource_id,
            actor: self.actor,
            token_id: self.token_id.map(TokenId::from_string),
            source_addr: self.source_addr,
            user_agent: self.user_agent,
            correlation_id: self.correlation_id,
            success: self.success,
            failure_reason: self.failure_reason,
            metadata,
            created_at: self.created_at,
        })
    }
}

const AUDIT_COLUMNS: &str = "id, workspace_id, action, resource_type, resource_id, actor, \
                             token_id, source_addr, user_agent, correlation_id, success, \
                             failure_reason, metadata, created_at";

/// Repository for audit log interactions
#[derive(Debug, Clone)]
pub struct AuditLogRepository {
    pool: DbPool,
}

impl AuditLogRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Append one audit record.
    #[instrument(skip(self, record), fields(workspace_id = %record.workspace_id, action = %record.action, resource = %record.resource), name = "db_insert_audit_record")]
    pub async fn insert(&self, record: &AuditRecord) -> Result<()> {
        let metadata_json = serde_json::to_string(&record.metadata)
            .map_err(|e| VaultryError::serialization(e, "Invalid audit metadata JSON"))?;

        sqlx::query(
            "INSERT INTO audit_log (id, workspace_id, action, resource_type, resource_id, actor, token_id, source_addr, user_agent, correlation_id, success, failure_reason, metadata, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)",
        )
        .bind(&record.id)
        .bind(&record.workspace_id)
        .bind(record.action.as_str())
        .bind(record.resource.as_str())
        .bind(&record.resource_id)
        .bind(&record.actor)
        .bind(&record.token_id)
        .bind(&record.source_addr)
        .bind(&record.user_agent)
        .bind(&record.correlation_id)
        .bind(record.success)
        .bind(&record.failure_reason)
        .bind(&metadata_json)
        .bind(record.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| VaultryError::database(e, "Failed to write audit record"))?;

        Ok(())
    }

    /// List a workspace's trail, newest first.
    #[instrument(skip(self, binding), fields(workspace_id = %binding.workspace_id(), limit, offset), name = "db_list_audit_records")]
    pub async fn list(
        &self,
        binding: &WorkspaceBinding,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<AuditRecord>> {
        let rows = sqlx::query_as::<_, AuditRecordRow>(&format!(
            "SELECT {} FROM audit_log WHERE workspace_id = $1 \
             ORDER BY created_at DESC, id DESC LIMIT $2 OFFSET $3",
            AUDIT_COLUMNS
        ))
        .bind(binding.workspace_id())
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| VaultryError::database(e, "Failed to list audit records"))?;

        rows.into_iter().map(AuditRecordRow::into_model).collect()
    }

    /// Records sharing one correlation id, oldest first. Used to
    /// reconstruct multi-record request outcomes.
    #[instrument(skip(self, binding), fields(workspace_id = %binding.workspace_id(), correlation_id), name = "db_audit_by_correlation")]
    pub async fn find_by_correlation(
        &self,
        binding: &WorkspaceBinding,
        correlation_id: &str,
    ) -> Result<Vec<AuditRecord>> {
        let rows = sqlx::query_as::<_, AuditRecordRow>(&format!(
            "SELECT {} FROM audit_log WHERE workspace_id = $1 AND correlation_id = $2 \
             ORDER BY created_at ASC, id ASC",
            AUDIT_COLUMNS
        ))
        .bind(binding.workspace_id())
        .bind(correlation_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| VaultryError::database(e, "Failed to load audit records by correlation"))?;

        rows.into_iter().map(AuditRecordRow::into_model).collect()
    }

    /// Retention sweep: bulk-delete records older than the cutoff. Returns
    /// the number of purged rows. Never modifies surviving records.
    #[instrument(skip(self), name = "db_purge_audit_records")]
    pub async fn purge_older_than(
        &self,
        cutoff: chrono::DateTime<chrono::Utc>,
    ) -> Result<u64> {
        let result = sqlx::query("DELETE FROM audit_log WHERE created_at < $1")
            .bind(cutoff)
            .execute(&self.pool)
            .await
            .map_err(|e| VaultryError::database(e, "Failed to purge audit records"))?;

        Ok(result.rows_affected())
    }

    /// Count records for a workspace (tests and diagnostics).
    pub async fn count(&self, binding: &WorkspaceBinding) -> Result<i64> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM audit_log WHERE workspace_id = $1")
            .bind(binding.workspace_id())
            .fetch_one(&self.pool)
            .await
            .map_err(|e| VaultryError::database(e, "Failed to count audit records"))?;
        Ok(row.get::<i64, _>("n"))
    }
}
