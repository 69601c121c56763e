//! Issuance and authentication of workspace API tokens.
//!
//! Wire format: `vt_` followed by a base64url-encoded 256-bit random
//! payload. The cleartext is returned to the caller exactly once at
//! issuance; only two derived forms are stored. A keyed HMAC-SHA256
//! fingerprint serves as the unique lookup index, and an Argon2id hash is
//! what authentication actually verifies. When the fingerprint matches no
//! row, a dummy hash is verified anyway so the response time does not
//! reveal whether a candidate token exists.

use std::sync::Arc;

use argon2::Argon2;
use base64::Engine;
use chrono::Utc;
use hmac::{Hmac, Mac};
use rand::RngCore;
use sha2::Sha256;
use tracing::{info, instrument, warn};
use validator::Validate;

use crate::auth::hashing;
use crate::auth::models::{ApiToken, AuthContext, IssuedToken, RequestMeta};
use crate::auth::validation::IssueTokenRequest;
use crate::config::AuthConfig;
use crate::crypto::CryptoService;
use crate::domain::{AuditAction, AuditResource, TokenId, WorkspaceBinding, WorkspaceId};
use crate::errors::{Result, VaultryError};
use crate::observability::metrics;
use crate::services::audit::AuditWriter;
use crate::storage::{NewApiToken, TokenRepository};

/// Prefix every issued token carries on the wire.
pub const TOKEN_PREFIX: &str = "vt_";

/// Bytes of random payload behind the prefix.
const TOKEN_PAYLOAD_BYTES: usize = 32;

type HmacSha256 = Hmac<Sha256>;

#[derive(Clone)]
pub struct TokenService {
    repository: TokenRepository,
    audit: AuditWriter,
    argon2: Arc<Argon2<'static>>,
    fingerprint_key: [u8; 32],
    /// Verified when no row matches a presented token, so misses cost the
    /// same as hits.
    dummy_hash: String,
    config: AuthConfig,
}

impl TokenService {
    pub fn new(
        repository: TokenRepository,
        audit: AuditWriter,
        crypto: &CryptoService,
        config: AuthConfig,
    ) -> Result<Self> {
        let argon2 = hashing::password_hasher(&config)?;
        let dummy_hash = hashing::hash_secret(&argon2, "vaultry-timing-equalizer")?;

        Ok(Self {
            repository,
            audit,
            argon2: Arc::new(argon2),
            fingerprint_key: crypto.token_index_key(),
            dummy_hash,
            config,
        })
    }

    /// Issue a token bound to a workspace. Bootstrap path: no authenticated
    /// caller, so nothing is audited. API callers go through
    /// [`issue_with_context`](Self::issue_with_context).
    #[instrument(skip(self, request), fields(workspace_id = %binding.workspace_id(), token_name = %request.name))]
    pub async fn issue(
        &self,
        binding: &WorkspaceBinding,
        request: IssueTokenRequest,
    ) -> Result<IssuedToken> {
        request.validate().map_err(VaultryError::from)?;

        let cleartext = self.generate_cleartext();
        let token_fingerprint = self.fingerprint(&cleartext);
        let hashed_secret = hashing::hash_secret(&self.argon2, &cleartext)?;

        // Apply the default expiry when issuance does not specify one.
        let expires_at = request
            .expires_at
            .or_else(|| Some(Utc::now() + chrono::Duration::days(self.config.default_token_ttl_days)));

        let new_token = NewApiToken {
            id: TokenId::new(),
            workspace_id: binding.workspace_id().clone(),
            name: request.name.clone(),
            token_fingerprint,
            hashed_secret,
            role: request.role,
            scopes: request.scopes.clone(),
            expires_at,
            created_by: request.created_by.clone(),
        };

        let token = self.repository.insert(&new_token).await?;

        metrics::record_token_issued();
        if let Ok(active) = self.repository.count_active().await {
            metrics::set_active_tokens(active as usize);
        }
        info!(token_id = %token.id, token_name = %token.name, "API token issued");

        Ok(IssuedToken { token, cleartext })
    }

    /// Issue a token on behalf of an authenticated caller; audited.
    #[instrument(skip_all, fields(correlation_id = %ctx.correlation_id(), token_name = %request.name))]
    pub async fn issue_with_context(
        &self,
        ctx: &AuthContext,
        target: &WorkspaceId,
        request: IssueTokenRequest,
    ) -> Result<IssuedToken> {
        self.guard(ctx, target, crate::auth::models::permissions::TOKENS_WRITE, &request.name)?;

        let name = request.name.clone();
        let outcome = self.issue(ctx.binding(), request).await;

        let record = match &outcome {
            Ok(_) => ctx.audit_success(AuditAction::Create, AuditResource::Token, &name),
            Err(e) => {
                ctx.audit_failure(AuditAction::Create, AuditResource::Token, &name, e.code())
            }
        };
        self.audit.try_record(record)?;

        outcome
    }

    /// Validate a presented bearer token and resolve it to an
    /// [`AuthContext`]. Every rejection of a resolvable token writes a
    /// LOGIN failure record under that token's workspace.
    #[instrument(skip_all, fields(correlation_id = tracing::field::Empty))]
    pub async fn authenticate(&self, presented: &str, meta: RequestMeta) -> Result<AuthContext> {
        let correlation_id = uuid::Uuid::new_v4().to_string();
        tracing::Span::current().record("correlation_id", correlation_id.as_str());

        let Some(payload) = presented.strip_prefix(TOKEN_PREFIX) else {
            // Malformed prefix: nothing to attribute a LOGIN record to.
            metrics::record_login_failure("malformed");
            return Err(VaultryError::invalid_token("Malformed bearer token"));
        };
        if payload.is_empty() {
            metrics::record_login_failure("malformed");
            return Err(VaultryError::invalid_token("Malformed bearer token"));
        }

        let fingerprint = self.fingerprint(presented);
        let row = self.repository.find_by_fingerprint(&fingerprint).await?;

        let Some(auth_row) = row else {
            // Unknown token: burn a verification anyway so the miss costs
            // the same as a hit, then reject. No workspace to audit under.
            let _ = hashing::verify_secret(&self.argon2, presented, &self.dummy_hash);
            metrics::record_login_failure("unknown");
            return Err(VaultryError::invalid_token("Unknown or invalid token"));
        };

        let token = auth_row.token;

        if !hashing::verify_secret(&self.argon2, presented, &auth_row.hashed_secret)? {
            // Fingerprint hit with hash mismatch: treat exactly like an
            // unknown token, but the workspace is attributable.
            self.login_failure(&token, &correlation_id, &meta, "verification_failed");
            return Err(VaultryError::invalid_token("Unknown or invalid token"));
        }

        if !token.active {
            self.login_failure(&token, &correlation_id, &meta, "revoked");
            return Err(VaultryError::invalid_token("Token has been revoked"));
        }

        let now = Utc::now();
        if let Some(expires_at) = token.expires_at {
            // A token used at exactly its expiry instant is already expired.
            if now >= expires_at {
                self.login_failure(&token, &correlation_id, &meta, "expired");
                return Err(VaultryError::invalid_token("Token has expired"));
            }
        }

        let age_ceiling = chrono::Duration::days(self.config.max_token_age_days);
        if now - token.created_at >= age_ceiling {
            self.login_failure(&token, &correlation_id, &meta, "age_ceiling_exceeded");
            return Err(VaultryError::invalid_token("Token has exceeded its maximum age"));
        }

        // A changed source address is an advisory signal, not a gate.
        if let (Some(last_ip), Some(current_ip)) =
            (token.last_used_ip.as_deref(), meta.source_addr.as_deref())
        {
            if last_ip != current_ip {
                info!(
                    token_id = %token.id,
                    token_name = %token.name,
                    "Token presented from a new source address"
                );
            }
        }

        let permissions = if token.scopes.is_empty() {
            token.role.default_permissions()
        } else {
            token.scopes.clone()
        };

        self.spawn_usage_update(token.id.clone(), meta.source_addr.clone());

        Ok(AuthContext::new(
            WorkspaceBinding::new(token.workspace_id.clone()),
            token.id,
            token.name,
            token.role,
            permissions,
            correlation_id,
            meta,
        ))
    }

    /// Deactivate a token in the caller's workspace; audited.
    #[instrument(skip(self, ctx), fields(correlation_id = %ctx.correlation_id(), token_name = %name))]
    pub async fn revoke(&self, ctx: &AuthContext, name: &str) -> Result<ApiToken> {
        ctx.authorize(crate::auth::models::permissions::TOKENS_WRITE).map_err(|e| {
            self.audit_denied(ctx, AuditAction::Update, name);
            e
        })?;

        let outcome = self.repository.deactivate(ctx.binding(), name).await;

        let record = match &outcome {
            Ok(_) => ctx.audit_success(AuditAction::Update, AuditResource::Token, name),
            Err(e) => ctx.audit_failure(AuditAction::Update, AuditResource::Token, name, e.code()),
        };
        self.audit.try_record(record)?;

        if outcome.is_ok() {
            metrics::record_token_revoked();
            if let Ok(active) = self.repository.count_active().await {
                metrics::set_active_tokens(active as usize);
            }
        }

        outcome
    }

    /// List tokens in the caller's workspace (metadata only).
    #[instrument(skip(self, ctx), fields(correlation_id = %ctx.correlation_id(), limit, offset))]
    pub async fn list(&self, ctx: &AuthContext, limit: i64, offset: i64) -> Result<Vec<ApiToken>> {
        ctx.authorize(crate::auth::models::permissions::TOKENS_READ).map_err(|e| {
            self.audit_denied(ctx, AuditAction::Read, "tokens");
            e
        })?;

        self.repository.list(ctx.binding(), limit.clamp(1, 1000), offset.max(0)).await
    }

    /// Purge a token record entirely; audited. Idempotent like secret
    /// deletion.
    #[instrument(skip(self, ctx), fields(correlation_id = %ctx.correlation_id(), token_name = %name))]
    pub async fn delete(&self, ctx: &AuthContext, name: &str) -> Result<()> {
        ctx.authorize(crate::auth::models::permissions::TOKENS_WRITE).map_err(|e| {
            self.audit_denied(ctx, AuditAction::Delete, name);
            e
        })?;

        let outcome = self.repository.delete(ctx.binding(), name).await.map(|_| ());

        let record = match &outcome {
            Ok(()) => ctx.audit_success(AuditAction::Delete, AuditResource::Token, name),
            Err(e) => ctx.audit_failure(AuditAction::Delete, AuditResource::Token, name, e.code()),
        };
        self.audit.try_record(record)?;

        outcome
    }

    fn generate_cleartext(&self) -> String {
        let mut payload = [0u8; TOKEN_PAYLOAD_BYTES];
        rand::rngs::OsRng.fill_bytes(&mut payload);
        format!(
            "{}{}",
            TOKEN_PREFIX,
            base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(payload)
        )
    }

    /// Keyed short fingerprint used as the lookup index. Keying it under a
    /// master-key-derived subkey keeps a dumped index useless for offline
    /// matching of candidate tokens.
    fn fingerprint(&self, cleartext: &str) -> String {
        let mut mac = HmacSha256::new_from_slice(&self.fingerprint_key)
            .expect("HMAC accepts any key length");
        mac.update(cleartext.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    fn login_failure(
        &self,
        token: &ApiToken,
        correlation_id: &str,
        meta: &RequestMeta,
        reason: &'static str,
    ) {
        metrics::record_login_failure(reason);

        let record = crate::domain::AuditRecord::failure(
            token.workspace_id.clone(),
            AuditAction::Login,
            AuditResource::Token,
            &token.name,
            correlation_id,
            reason,
        )
        .with_actor(token.name.clone())
        .with_token(token.id.clone())
        .with_source(meta.source_addr.clone(), meta.user_agent.clone());

        // LOGIN records are best-effort: the request is already being
        // rejected, and a saturated queue must not mask the real error.
        if let Err(e) = self.audit.try_record(record) {
            warn!(error = %e, "Failed to enqueue LOGIN audit record");
        }
    }

    fn guard(
        &self,
        ctx: &AuthContext,
        target: &WorkspaceId,
        permission: &str,
        resource_id: &str,
    ) -> Result<()> {
        if let Err(e) = ctx.authorize_workspace(target) {
            self.audit_denied(ctx, AuditAction::Create, resource_id);
            return Err(e);
        }
        if let Err(e) = ctx.authorize(permission) {
            self.audit_denied(ctx, AuditAction::Create, resource_id);
            return Err(e);
        }
        Ok(())
    }

    fn audit_denied(&self, ctx: &AuthContext, action: AuditAction, resource_id: &str) {
        let record =
            ctx.audit_failure(action, AuditResource::Token, resource_id, "workspace_access");
        if let Err(e) = self.audit.try_record(record) {
            warn!(error = %e, "Failed to enqueue denial audit record");
        }
    }

    fn spawn_usage_update(&self, token_id: TokenId, ip: Option<String>) {
        let repository = self.repository.clone();
        // Non-blocking by contract: the request must neither wait for this
        // update nor fail when it fails.
        tokio::spawn(async move {
            if let Err(e) = repository.touch_last_used(&token_id, ip.as_deref(), Utc::now()).await
            {
                warn!(error = %e, token_id = %token_id, "Failed to update token usage metadata");
            }
        });
    }
}

impl std::fmt::Debug for TokenService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenService")
            .field("fingerprint_key", &"[REDACTED]")
            .field("config", &self.config)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cleartext_has_expected_shape() {
        // 32 bytes of payload encode to 43 base64url characters unpadded.
        let encoded = base64::engine::general_purpose::URL_SAFE_NO_PAD.encode([0u8; 32]);
        assert_eq!(encoded.len(), 43);
    }
}
