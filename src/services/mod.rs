//! # Services
//!
//! Business logic over the repositories: workspace lifecycle, keyring
//! management, the versioned secret store, and the audit writer. Every
//! operation that acts on behalf of a caller takes an
//! [`AuthContext`](crate::auth::AuthContext) and is audited.

pub mod audit;
pub mod keyring;
pub mod secret_store;
pub mod workspace;

pub use audit::AuditWriter;
pub use keyring::KeyringService;
pub use secret_store::{PutOutcome, PutSecretRequest, SecretStore};
pub use workspace::WorkspaceService;

use crate::auth::AuthContext;
use crate::domain::{AuditAction, AuditResource, WorkspaceId};
use crate::errors::Result;

/// Shared entry check for context-driven operations: the explicit
/// workspace-binding comparison, then the permission check. A denial is
/// audited under the caller's own workspace before it surfaces; the
/// addressed workspace gets no record and the error reveals nothing about
/// what lives there.
pub(crate) fn guard_operation(
    audit: &AuditWriter,
    ctx: &AuthContext,
    target: &WorkspaceId,
    permission: &str,
    action: AuditAction,
    resource: AuditResource,
    resource_id: &str,
) -> Result<()> {
    if let Err(e) = ctx.authorize_workspace(target) {
        audit.try_record(ctx.audit_failure(action, resource, resource_id, "workspace_access"))?;
        return Err(e);
    }

    if let Err(e) = ctx.authorize(permission) {
        audit.try_record(ctx.audit_failure(action, resource, resource_id, "permission_denied"))?;
        return Err(e);
    }

    Ok(())
}
