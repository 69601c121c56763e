//! Data models used by the Vaultry API-token system.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt::{Display, Formatter};
use std::str::FromStr;
use thiserror::Error;

use crate::domain::{TokenId, WorkspaceBinding, WorkspaceId};
use crate::errors::{Result, VaultryError};

/// Permission strings understood by the authorizer.
pub mod permissions {
    pub const ADMIN_ALL: &str = "admin:all";
    pub const SECRETS_READ: &str = "secrets:read";
    pub const SECRETS_LIST: &str = "secrets:list";
    pub const SECRETS_CREATE: &str = "secrets:create";
    pub const SECRETS_UPDATE: &str = "secrets:update";
    pub const SECRETS_DELETE: &str = "secrets:delete";
    pub const TOKENS_READ: &str = "tokens:read";
    pub const TOKENS_WRITE: &str = "tokens:write";
    pub const KEYRING_ROTATE: &str = "keyring:rotate";

    /// All known permissions, for scope validation.
    pub const ALL: &[&str] = &[
        ADMIN_ALL,
        SECRETS_READ,
        SECRETS_LIST,
        SECRETS_CREATE,
        SECRETS_UPDATE,
        SECRETS_DELETE,
        TOKENS_READ,
        TOKENS_WRITE,
        KEYRING_ROTATE,
    ];
}

/// Role attached to a token. A token with an explicit scope list uses that
/// list; otherwise the role maps to its default permission set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenRole {
    Admin,
    Write,
    Read,
}

impl TokenRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            TokenRole::Admin => "admin",
            TokenRole::Write => "write",
            TokenRole::Read => "read",
        }
    }

    /// Default permission set for tokens without explicit scopes.
    pub fn default_permissions(&self) -> Vec<String> {
        use permissions::*;
        let perms: &[&str] = match self {
            TokenRole::Admin => &[ADMIN_ALL],
            TokenRole::Write => {
                &[SECRETS_CREATE, SECRETS_READ, SECRETS_UPDATE, SECRETS_LIST, SECRETS_DELETE]
            }
            TokenRole::Read => &[SECRETS_READ, SECRETS_LIST],
        };
        perms.iter().map(|p| p.to_string()).collect()
    }
}

impl Display for TokenRole {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for TokenRole {
    type Err = TokenRoleParseError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "admin" => Ok(TokenRole::Admin),
            "write" => Ok(TokenRole::Write),
            "read" => Ok(TokenRole::Read),
            other => Err(TokenRoleParseError(other.to_string())),
        }
    }
}

/// Error returned when token role parsing fails.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("invalid token role: {0}")]
pub struct TokenRoleParseError(pub String);

/// Stored representation of an API token. The cleartext exists only in
/// [`IssuedToken`] at issuance; only the salted hash and the keyed lookup
/// fingerprint are persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiToken {
    pub id: TokenId,
    pub workspace_id: WorkspaceId,
    pub name: String,
    pub role: TokenRole,
    pub scopes: Vec<String>,
    pub active: bool,
    pub expires_at: Option<DateTime<Utc>>,
    pub last_used_at: Option<DateTime<Utc>>,
    pub last_used_ip: Option<String>,
    pub created_by: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Issuance result: metadata plus the cleartext returned exactly once.
#[derive(Clone, Serialize)]
pub struct IssuedToken {
    pub token: ApiToken,
    pub cleartext: String,
}

impl std::fmt::Debug for IssuedToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IssuedToken")
            .field("token", &self.token)
            .field("cleartext", &"[REDACTED]")
            .finish()
    }
}

/// Transport metadata observed for a request; advisory only.
#[derive(Debug, Clone, Default)]
pub struct RequestMeta {
    pub source_addr: Option<String>,
    pub user_agent: Option<String>,
}

/// Request-scoped authentication context derived from a valid token.
///
/// Carries the workspace binding, the actor identity, the effective
/// permission set, and the correlation id stamped on every audit record
/// this request produces. Constructed only by the authenticator.
#[derive(Debug, Clone)]
pub struct AuthContext {
    binding: WorkspaceBinding,
    token_id: TokenId,
    actor: String,
    role: TokenRole,
    permissions: HashSet<String>,
    correlation_id: String,
    meta: RequestMeta,
}

impl AuthContext {
    pub(crate) fn new(
        binding: WorkspaceBinding,
        token_id: TokenId,
        actor: String,
        role: TokenRole,
        permissions: Vec<String>,
        correlation_id: String,
        meta: RequestMeta,
    ) -> Self {
        Self {
            binding,
            token_id,
            actor,
            role,
            permissions: permissions.into_iter().collect(),
            correlation_id,
            meta,
        }
    }

    pub fn binding(&self) -> &WorkspaceBinding {
        &self.binding
    }

    pub fn workspace_id(&self) -> &WorkspaceId {
        self.binding.workspace_id()
    }

    pub fn token_id(&self) -> &TokenId {
        &self.token_id
    }

    /// The identity recorded as `actor` on audit records (the token name).
    pub fn actor(&self) -> &str {
        &self.actor
    }

    pub fn role(&self) -> TokenRole {
        self.role
    }

    pub fn correlation_id(&self) -> &str {
        &self.correlation_id
    }

    pub fn meta(&self) -> &RequestMeta {
        &self.meta
    }

    pub fn has_permission(&self, permission: &str) -> bool {
        self.permissions.contains(permissions::ADMIN_ALL)
            || self.permissions.contains(permission)
    }

    /// Succeeds iff the required permission is in this context's set.
    pub fn authorize(&self, permission: &str) -> Result<()> {
        if self.has_permission(permission) {
            Ok(())
        } else {
            Err(VaultryError::workspace_access(format!(
                "missing permission '{}' for token '{}'",
                permission, self.actor
            )))
        }
    }

    /// Succeeds iff this context is bound to `target`. This is the explicit
    /// second check on top of the workspace-scoped repository queries; both
    /// are always present.
    pub fn authorize_workspace(&self, target: &WorkspaceId) -> Result<()> {
        if self.binding.covers(target) {
            Ok(())
        } else {
            Err(VaultryError::workspace_access(format!(
                "token '{}' is not bound to the addressed workspace",
                self.actor
            )))
        }
    }

    /// Build a success audit record attributed to this request.
    pub fn audit_success(
        &self,
        action: crate::domain::AuditAction,
        resource: crate::domain::AuditResource,
        resource_id: &str,
    ) -> crate::domain::AuditRecord {
        crate::domain::AuditRecord::success(
            self.workspace_id().clone(),
            action,
            resource,
            resource_id,
            self.correlation_id.clone(),
        )
        .with_actor(self.actor.clone())
        .with_token(self.token_id.clone())
        .with_source(self.meta.source_addr.clone(), self.meta.user_agent.clone())
    }

    /// Build a failure audit record attributed to this request.
    pub fn audit_failure(
        &self,
        action: crate::domain::AuditAction,
        resource: crate::domain::AuditResource,
        resource_id: &str,
        reason: &str,
    ) -> crate::domain::AuditRecord {
        crate::domain::AuditRecord::failure(
            self.workspace_id().clone(),
            action,
            resource,
            resource_id,
            self.correlation_id.clone(),
            reason,
        )
        .with_actor(self.actor.clone())
        .with_token(self.token_id.clone())
        .with_source(self.meta.source_addr.clone(), self.meta.user_agent.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    pub(crate) fn test_context(workspace_id: WorkspaceId, perms: Vec<String>) -> AuthContext {
        AuthContext::new(
            WorkspaceBinding::new(workspace_id),
            TokenId::new(),
            "test-token".into(),
            TokenRole::Write,
            perms,
            uuid::Uuid::new_v4().to_string(),
            RequestMeta::default(),
        )
    }

    #[test]
    fn role_round_trip() {
        for (input, expected) in
            [("admin", TokenRole::Admin), ("write", TokenRole::Write), ("read", TokenRole::Read)]
        {
            let parsed = input.parse::<TokenRole>().unwrap();
            assert_eq!(parsed, expected);
            assert_eq!(parsed.to_string(), input);
        }

        assert!("owner".parse::<TokenRole>().is_err());
    }

    #[test]
    fn role_default_permissions() {
        assert_eq!(TokenRole::Admin.default_permissions(), vec!["admin:all"]);

        let write = TokenRole::Write.default_permissions();
        assert!(write.contains(&"secrets:create".to_string()));
        assert!(write.contains(&"secrets:delete".to_string()));
        assert!(!write.contains(&"keyring:rotate".to_string()));

        let read = TokenRole::Read.default_permissions();
        assert_eq!(read.len(), 2);
        assert!(read.contains(&"secrets:read".to_string()));
    }

    #[test]
    fn admin_all_grants_everything() {
        let ctx = test_context(WorkspaceId::new(), vec![permissions::ADMIN_ALL.into()]);
        assert!(ctx.authorize(permissions::SECRETS_DELETE).is_ok());
        assert!(ctx.authorize(permissions::KEYRING_ROTATE).is_ok());
    }

    #[test]
    fn authorize_rejects_missing_permission() {
        let ctx = test_context(WorkspaceId::new(), vec![permissions::SECRETS_READ.into()]);
        assert!(ctx.authorize(permissions::SECRETS_READ).is_ok());
        let err = ctx.authorize(permissions::SECRETS_DELETE).unwrap_err();
        assert!(matches!(err, VaultryError::WorkspaceAccess { .. }));
    }

    #[test]
    fn authorize_workspace_enforces_binding() {
        let home = WorkspaceId::new();
        let other = WorkspaceId::new();
        let ctx = test_context(home.clone(), vec![permissions::ADMIN_ALL.into()]);

        assert!(ctx.authorize_workspace(&home).is_ok());
        let err = ctx.authorize_workspace(&other).unwrap_err();
        assert!(matches!(err, VaultryError::WorkspaceAccess { .. }));
        // Denial must not leak what lives in the other workspace.
        assert_eq!(err.to_string(), "Workspace access denied");
    }

    #[test]
    fn issued_token_debug_redacts_cleartext() {
        let token = ApiToken {
            id: TokenId::new(),
            workspace_id: WorkspaceId::new(),
            name: "ci-deploy".into(),
            role: TokenRole::Write,
            scopes: vec![],
            active: true,
            expires_at: None,
            last_used_at: None,
            last_used_ip: None,
            created_by: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        let issued = IssuedToken { token, cleartext: "vt_super-secret-payload".into() };

        let debug = format!("{:?}", issued);
        assert!(!debug.contains("super-secret-payload"));
    }
}
