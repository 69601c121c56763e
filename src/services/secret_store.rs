//! Secret store: the versioned secret data model with atomic upsert.
//!
//! A write either lands completely (new version row plus advanced
//! current-version pointer) or not at all; an observer never sees an
//! intermediate state. Version numbers are allocated under the
//! transaction's write lock, so concurrent writers to one key produce
//! consecutive versions with no gaps and no lost updates.

use base64::Engine;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};

use crate::auth::models::permissions;
use crate::auth::AuthContext;
use crate::crypto::{CryptoService, EncryptedPayload};
use crate::domain::{
    validate_secret_key, AuditAction, AuditResource, DecryptedSecret, Secret, SecretId,
    SecretKind, SecretVersionInfo, WorkspaceBinding, WorkspaceId,
};
use crate::errors::{Result, VaultryError};
use crate::observability::metrics;
use crate::services::audit::AuditWriter;
use crate::services::keyring::KeyringService;
use crate::storage::{DbPool, SecretRepository};

/// Attempts at the version-allocation race before surfacing `Conflict`.
const PUT_ATTEMPTS: u32 = 16;

/// Request payload for a versioned upsert.
#[derive(Clone, Serialize, Deserialize)]
pub struct PutSecretRequest {
    pub key: String,
    pub kind: SecretKind,
    pub value: Vec<u8>,
    #[serde(default)]
    pub tags: Vec<String>,
    pub description: Option<String>,
}

impl std::fmt::Debug for PutSecretRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PutSecretRequest")
            .field("key", &self.key)
            .field("kind", &self.kind)
            .field("value", &"[REDACTED]")
            .field("tags", &self.tags)
            .finish()
    }
}

/// Result of a successful put.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PutOutcome {
    pub secret_id: SecretId,
    pub version: i64,
}

#[derive(Clone)]
pub struct SecretStore {
    pool: DbPool,
    repository: SecretRepository,
    keyring: KeyringService,
    crypto: CryptoService,
    audit: AuditWriter,
}

impl SecretStore {
    pub fn new(
        pool: DbPool,
        repository: SecretRepository,
        keyring: KeyringService,
        crypto: CryptoService,
        audit: AuditWriter,
    ) -> Self {
        Self { pool, repository, keyring, crypto, audit }
    }

    /// Create-or-update a secret, producing a new immutable version.
    #[instrument(skip_all, fields(correlation_id = %ctx.correlation_id(), key = %request.key))]
    pub async fn put(
        &self,
        ctx: &AuthContext,
        target: &WorkspaceId,
        request: PutSecretRequest,
    ) -> Result<PutOutcome> {
        // The existing envelope decides whether this is a create or an
        // update, for both the permission check and the audit action.
        let existing = match ctx.authorize_workspace(target) {
            Ok(()) => self.repository.find(ctx.binding(), &request.key).await?,
            Err(_) => None,
        };
        let (permission, action) = match existing {
            Some(_) => (permissions::SECRETS_UPDATE, AuditAction::Update),
            None => (permissions::SECRETS_CREATE, AuditAction::Create),
        };

        crate::services::guard_operation(
            &self.audit,
            ctx,
            target,
            permission,
            action,
            AuditResource::Secret,
            &request.key,
        )?;

        let key = request.key.clone();
        let outcome = self.put_inner(ctx, request).await;

        let record = match &outcome {
            Ok(put) => ctx
                .audit_success(action, AuditResource::Secret, &key)
                .with_metadata(serde_json::json!({ "version": put.version })),
            Err(e) => ctx.audit_failure(action, AuditResource::Secret, &key, e.code()),
        };
        self.audit.try_record(record)?;

        metrics::record_secret_write(outcome.is_ok());
        if let Ok(put) = &outcome {
            info!(key = %key, version = put.version, "Secret version written");
        }

        outcome
    }

    async fn put_inner(&self, ctx: &AuthContext, request: PutSecretRequest) -> Result<PutOutcome> {
        validate_secret_key(&request.key)?;

        if request.kind == SecretKind::Json {
            serde_json::from_slice::<serde_json::Value>(&request.value)
                .map_err(|_| VaultryError::invalid_config("Value of a json secret must parse"))?;
        }

        // Encrypt outside the transaction; only the atomic insert below
        // makes the (iv, tag) pair visible.
        let binding = ctx.binding();
        let (dek, key_version) = self.keyring.active_dek(binding).await?;
        let payload = self.crypto.encrypt(&request.value, &dek)?;
        drop(dek);

        let ciphertext_b64 = base64::engine::general_purpose::STANDARD.encode(&payload.ciphertext);
        let iv_b64 = base64::engine::general_purpose::STANDARD.encode(&payload.iv);
        let tag_b64 = base64::engine::general_purpose::STANDARD.encode(&payload.tag);

        let mut last_err = None;
        for attempt in 1..=PUT_ATTEMPTS {
            match self
                .try_put_transaction(
                    binding,
                    &request,
                    &ciphertext_b64,
                    &iv_b64,
                    &tag_b64,
                    key_version,
                    ctx.actor(),
                )
                .await
            {
                Ok(outcome) => return Ok(outcome),
                Err(e) if e.is_unique_violation() || e.is_retryable() => {
                    warn!(attempt, key = %request.key, "Secret write raced, retrying");
                    last_err = Some(e);
                    // Stagger the retries so racing writers stop colliding
                    // on the same snapshot upgrade.
                    tokio::time::sleep(std::time::Duration::from_millis(5 * attempt as u64))
                        .await;
                }
                Err(e) => return Err(e),
            }
        }

        Err(last_err
            .map(|_| {
                VaultryError::conflict(
                    "Secret write lost repeated version-allocation races",
                    "secret",
                )
            })
            .unwrap_or_else(|| VaultryError::internal("Secret write failed")))
    }

    #[allow(clippy::too_many_arguments)]
    async fn try_put_transaction(
        &self,
        binding: &WorkspaceBinding,
        request: &PutSecretRequest,
        ciphertext_b64: &str,
        iv_b64: &str,
        tag_b64: &str,
        key_version: i64,
        actor: &str,
    ) -> Result<PutOutcome> {
        let now = chrono::Utc::now();
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| VaultryError::database(e, "Failed to begin secret write transaction"))?;

        // Authoritative kind-transition check, inside the transaction so a
        // racing writer cannot slip a forbidden transition past it.
        if let Some(current) = self.repository.find_in_tx(&mut tx, binding, &request.key).await? {
            if !current.kind.allows_transition_to(request.kind) {
                return Err(VaultryError::invalid_config(format!(
                    "Secret kind cannot change between '{}' and '{}'",
                    current.kind, request.kind
                )));
            }
        }

        // The envelope upsert is the first write statement: from here to
        // commit, the engine's write lock serializes version allocation.
        let secret_id = self
            .repository
            .upsert_envelope(
                &mut tx,
                binding,
                &SecretId::new(),
                &request.key,
                request.kind,
                request.description.as_deref(),
                &request.tags,
                Some(actor),
                now,
            )
            .await?;

        let version = self
            .repository
            .insert_version(
                &mut tx,
                &uuid::Uuid::new_v4().to_string(),
                &secret_id,
                ciphertext_b64,
                iv_b64,
                tag_b64,
                key_version,
                Some(actor),
                now,
            )
            .await?;

        self.repository.set_current_version(&mut tx, &secret_id, version, now).await?;

        tx.commit()
            .await
            .map_err(|e| VaultryError::database(e, "Failed to commit secret write transaction"))?;

        Ok(PutOutcome { secret_id, version })
    }

    /// Read and decrypt one version of a secret (the current version when
    /// none is requested).
    #[instrument(skip_all, fields(correlation_id = %ctx.correlation_id(), key, version))]
    pub async fn get(
        &self,
        ctx: &AuthContext,
        target: &WorkspaceId,
        key: &str,
        version: Option<i64>,
    ) -> Result<DecryptedSecret> {
        crate::services::guard_operation(
            &self.audit,
            ctx,
            target,
            permissions::SECRETS_READ,
            AuditAction::Read,
            AuditResource::Secret,
            key,
        )?;

        let outcome = self.get_inner(ctx.binding(), key, version).await;

        let record = match &outcome {
            Ok(secret) => ctx
                .audit_success(AuditAction::Read, AuditResource::Secret, key)
                .with_metadata(serde_json::json!({ "version": secret.version })),
            Err(e) => ctx.audit_failure(AuditAction::Read, AuditResource::Secret, key, e.code()),
        };
        self.audit.try_record(record)?;

        metrics::record_secret_read(outcome.is_ok());
        outcome
    }

    async fn get_inner(
        &self,
        binding: &WorkspaceBinding,
        key: &str,
        version: Option<i64>,
    ) -> Result<DecryptedSecret> {
        let secret = self.repository.get(binding, key).await?;

        let target_version = version.unwrap_or(secret.current_version);
        if target_version < 1 {
            return Err(VaultryError::not_found("secret_version", target_version.to_string()));
        }

        let row = self
            .repository
            .get_version(&secret.id, target_version)
            .await?
            .ok_or_else(|| {
                VaultryError::not_found("secret_version", target_version.to_string())
            })?;

        // A version row referencing a vanished keyring entry is a broken
        // invariant, not a caller mistake.
        let dek = match self.keyring.dek_for_version(binding, row.key_version).await {
            Ok(dek) => dek,
            Err(VaultryError::NotFound { .. }) => {
                return Err(VaultryError::data_integrity(format!(
                    "Secret version {} references missing key version {}",
                    target_version, row.key_version
                )))
            }
            Err(e) => return Err(e),
        };

        let payload = decode_payload(&row.ciphertext, &row.iv, &row.tag)?;
        let value = self.crypto.decrypt(&payload, &dek).map_err(|e| {
            metrics::record_crypto_failure();
            e
        })?;

        Ok(DecryptedSecret {
            key: secret.key,
            kind: secret.kind,
            value,
            version: row.version,
            description: secret.description,
            tags: secret.tags,
            created_at: secret.created_at,
            updated_at: secret.updated_at,
        })
    }

    /// List secret metadata, never values. Filtered by key prefix, sorted
    /// by key, paginated; the total respects workspace and prefix.
    #[instrument(skip_all, fields(correlation_id = %ctx.correlation_id(), prefix, limit, offset))]
    pub async fn list(
        &self,
        ctx: &AuthContext,
        target: &WorkspaceId,
        prefix: Option<&str>,
        limit: i64,
        offset: i64,
    ) -> Result<(Vec<Secret>, i64)> {
        let scope_label = prefix.unwrap_or("*");
        crate::services::guard_operation(
            &self.audit,
            ctx,
            target,
            permissions::SECRETS_LIST,
            AuditAction::Read,
            AuditResource::Secret,
            scope_label,
        )?;

        let outcome =
            self.repository.list(ctx.binding(), prefix, limit.clamp(1, 1000), offset.max(0)).await;

        let record = match &outcome {
            Ok((items, total)) => ctx
                .audit_success(AuditAction::Read, AuditResource::Secret, scope_label)
                .with_metadata(serde_json::json!({ "returned": items.len(), "total": total })),
            Err(e) => {
                ctx.audit_failure(AuditAction::Read, AuditResource::Secret, scope_label, e.code())
            }
        };
        self.audit.try_record(record)?;

        outcome
    }

    /// List a secret's version history: numbers, timestamps, creators.
    #[instrument(skip_all, fields(correlation_id = %ctx.correlation_id(), key, limit, offset))]
    pub async fn versions(
        &self,
        ctx: &AuthContext,
        target: &WorkspaceId,
        key: &str,
        limit: i64,
        offset: i64,
    ) -> Result<(Vec<SecretVersionInfo>, i64)> {
        crate::services::guard_operation(
            &self.audit,
            ctx,
            target,
            permissions::SECRETS_LIST,
            AuditAction::Read,
            AuditResource::Secret,
            key,
        )?;

        let outcome = async {
            let secret = self.repository.get(ctx.binding(), key).await?;
            self.repository.list_versions(&secret.id, limit.clamp(1, 1000), offset.max(0)).await
        }
        .await;

        let record = match &outcome {
            Ok((versions, total)) => ctx
                .audit_success(AuditAction::Read, AuditResource::Secret, key)
                .with_metadata(serde_json::json!({ "returned": versions.len(), "total": total })),
            Err(e) => ctx.audit_failure(AuditAction::Read, AuditResource::Secret, key, e.code()),
        };
        self.audit.try_record(record)?;

        outcome
    }

    /// Delete a secret and all its versions. Idempotent: deleting an
    /// absent key succeeds, and is still audited as a DELETE.
    #[instrument(skip_all, fields(correlation_id = %ctx.correlation_id(), key))]
    pub async fn delete(&self, ctx: &AuthContext, target: &WorkspaceId, key: &str) -> Result<()> {
        crate::services::guard_operation(
            &self.audit,
            ctx,
            target,
            permissions::SECRETS_DELETE,
            AuditAction::Delete,
            AuditResource::Secret,
            key,
        )?;

        let outcome = self.repository.delete(ctx.binding(), key).await;

        let record = match &outcome {
            Ok(existed) => ctx
                .audit_success(AuditAction::Delete, AuditResource::Secret, key)
                .with_metadata(serde_json::json!({ "existed": existed })),
            Err(e) => ctx.audit_failure(AuditAction::Delete, AuditResource::Secret, key, e.code()),
        };
        self.audit.try_record(record)?;

        if matches!(outcome, Ok(true)) {
            metrics::record_secret_deleted();
            info!(key = %key, "Secret deleted");
        }

        outcome.map(|_| ())
    }
}

impl std::fmt::Debug for SecretStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecretStore").field("crypto", &self.crypto).finish()
    }
}

fn decode_payload(ciphertext_b64: &str, iv_b64: &str, tag_b64: &str) -> Result<EncryptedPayload> {
    let decode = |field: &str, value: &str| {
        base64::engine::general_purpose::STANDARD.decode(value).map_err(|_| {
            VaultryError::data_integrity(format!("Stored secret {} is not valid base64", field))
        })
    };

    Ok(EncryptedPayload {
        ciphertext: decode("ciphertext", ciphertext_b64)?,
        iv: decode("iv", iv_b64)?,
        tag: decode("tag", tag_b64)?,
    })
}
