//! Keyring manager: per-workspace DEK history and rotation.
//!
//! Encryption always uses the active (highest-version) DEK; decryption
//! reaches back to whatever version a stored secret snapshot references.
//! Unwrapped DEKs are request-scoped and zeroized on drop; nothing here
//! caches key material across requests.

use tracing::{info, instrument, warn};

use crate::auth::models::permissions;
use crate::auth::AuthContext;
use crate::crypto::{CryptoService, RawDek};
use crate::domain::{AuditAction, AuditResource, WorkspaceBinding, WorkspaceId};
use crate::errors::{Result, VaultryError};
use crate::observability::metrics;
use crate::services::audit::AuditWriter;
use crate::storage::{DbPool, KeyringRepository, WorkspaceRepository};
use base64::Engine;
use sqlx::SqliteConnection;

/// Attempts at the version-allocation race before surfacing `Conflict`.
const ROTATE_ATTEMPTS: u32 = 5;

#[derive(Clone)]
pub struct KeyringService {
    pool: DbPool,
    repository: KeyringRepository,
    workspace_repository: WorkspaceRepository,
    crypto: CryptoService,
    audit: AuditWriter,
}

impl KeyringService {
    pub fn new(
        pool: DbPool,
        repository: KeyringRepository,
        workspace_repository: WorkspaceRepository,
        crypto: CryptoService,
        audit: AuditWriter,
    ) -> Self {
        Self { pool, repository, workspace_repository, crypto, audit }
    }

    /// Install version 1 for a new workspace. Called exactly once, inside
    /// the workspace-creation transaction.
    #[instrument(skip(self, conn), fields(workspace_id = %workspace_id))]
    pub(crate) async fn bootstrap(
        &self,
        conn: &mut SqliteConnection,
        workspace_id: &WorkspaceId,
    ) -> Result<()> {
        let dek = self.crypto.generate_dek()?;
        let wrapped = self.crypto.wrap_dek(&dek)?;
        let wrapped_b64 = base64::engine::general_purpose::STANDARD.encode(&wrapped);

        self.repository
            .insert_bootstrap_entry(
                conn,
                workspace_id,
                &uuid::Uuid::new_v4().to_string(),
                &wrapped_b64,
                chrono::Utc::now(),
            )
            .await?;

        Ok(())
    }

    /// The unwrapped active DEK and its version. Request-scoped; never
    /// cache the result across requests.
    #[instrument(skip(self, binding), fields(workspace_id = %binding.workspace_id()))]
    pub async fn active_dek(&self, binding: &WorkspaceBinding) -> Result<(RawDek, i64)> {
        self.check_master_key_continuity(binding).await?;

        let entry = self.repository.active_entry(binding).await?;
        let dek = self.unwrap_entry(&entry.wrapped_dek)?;
        Ok((dek, entry.version))
    }

    /// The unwrapped DEK for a specific key version, used to decrypt older
    /// secret snapshots. `NotFound` when the version does not exist in this
    /// workspace.
    #[instrument(skip(self, binding), fields(workspace_id = %binding.workspace_id(), version))]
    pub async fn dek_for_version(
        &self,
        binding: &WorkspaceBinding,
        version: i64,
    ) -> Result<RawDek> {
        self.check_master_key_continuity(binding).await?;

        let entry = self.repository.entry_for_version(binding, version).await?;
        self.unwrap_entry(&entry.wrapped_dek)
    }

    /// Rotate the workspace's keyring: install a fresh DEK as the new
    /// active version and deactivate the predecessor, atomically. Existing
    /// secret versions keep referencing their original DEK version.
    #[instrument(skip_all, fields(correlation_id = %ctx.correlation_id(), workspace_id = %target))]
    pub async fn rotate(&self, ctx: &AuthContext, target: &WorkspaceId) -> Result<i64> {
        let workspace = self.workspace_repository.get_by_id(ctx.workspace_id()).await?;

        crate::services::guard_operation(
            &self.audit,
            ctx,
            target,
            permissions::KEYRING_ROTATE,
            AuditAction::Rotate,
            AuditResource::Keyring,
            &workspace.slug,
        )?;

        let outcome = self.rotate_inner(ctx.binding()).await;

        let record = match &outcome {
            Ok(version) => ctx
                .audit_success(AuditAction::Rotate, AuditResource::Keyring, &workspace.slug)
                .with_metadata(serde_json::json!({ "new_key_version": version })),
            Err(e) => ctx.audit_failure(
                AuditAction::Rotate,
                AuditResource::Keyring,
                &workspace.slug,
                e.code(),
            ),
        };
        self.audit.try_record(record)?;

        if let Ok(version) = &outcome {
            metrics::record_key_rotation();
            info!(
                workspace = %workspace.slug,
                new_key_version = version,
                "Workspace keyring rotated"
            );
        }

        outcome
    }

    async fn rotate_inner(&self, binding: &WorkspaceBinding) -> Result<i64> {
        self.check_master_key_continuity(binding).await?;

        let dek = self.crypto.generate_dek()?;
        let wrapped = self.crypto.wrap_dek(&dek)?;
        let wrapped_b64 = base64::engine::general_purpose::STANDARD.encode(&wrapped);
        drop(dek);

        let mut last_err = None;
        for attempt in 1..=ROTATE_ATTEMPTS {
            let mut tx = self.pool.begin().await.map_err(|e| {
                VaultryError::database(e, "Failed to begin rotation transaction")
            })?;

            let entry_id = uuid::Uuid::new_v4().to_string();
            let inserted = self
                .repository
                .insert_next_entry(
                    &mut tx,
                    binding.workspace_id(),
                    &entry_id,
                    &wrapped_b64,
                    chrono::Utc::now(),
                )
                .await;

            match inserted {
                Ok(version) => {
                    self.repository
                        .deactivate_predecessors(&mut tx, binding.workspace_id(), version)
                        .await?;

                    tx.commit().await.map_err(|e| {
                        VaultryError::database(e, "Failed to commit rotation transaction")
                    })?;

                    return Ok(version);
                }
                Err(e) if e.is_unique_violation() || e.is_retryable() => {
                    // Lost the version-allocation race; the insert rolls
                    // back with the transaction and we take a fresh number.
                    drop(tx);
                    warn!(attempt, "Keyring rotation raced, retrying");
                    last_err = Some(e);
                }
                Err(e) => return Err(e),
            }
        }

        Err(last_err
            .map(|_| {
                VaultryError::conflict("Keyring rotation lost repeated version races", "keyring")
            })
            .unwrap_or_else(|| VaultryError::internal("Keyring rotation failed")))
    }

    /// Refuse to unwrap anything when the running master key differs from
    /// the one the workspace was provisioned under.
    async fn check_master_key_continuity(&self, binding: &WorkspaceBinding) -> Result<()> {
        let workspace = self.workspace_repository.get_by_id(binding.workspace_id()).await?;

        if workspace.master_key_fingerprint != self.crypto.master_fingerprint() {
            metrics::record_crypto_failure();
            return Err(VaultryError::crypto(
                "Master key fingerprint does not match the workspace's wrapping key",
            ));
        }

        Ok(())
    }

    fn unwrap_entry(&self, wrapped_b64: &str) -> Result<RawDek> {
        let wrapped =
            base64::engine::general_purpose::STANDARD.decode(wrapped_b64).map_err(|_| {
                metrics::record_crypto_failure();
                VaultryError::data_integrity("Stored wrapped DEK is not valid base64")
            })?;

        self.crypto.unwrap_dek(&wrapped).map_err(|e| {
            metrics::record_crypto_failure();
            e
        })
    }
}

impl std::fmt::Debug for KeyringService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyringService").field("crypto", &self.crypto).finish()
    }
}
