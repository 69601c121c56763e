//! Audit trail value objects.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use std::str::FromStr;
use thiserror::Error;

use crate::domain::{AuditRecordId, TokenId, WorkspaceId};

/// What happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AuditAction {
    Create,
    Read,
    Update,
    Delete,
    Rotate,
    Login,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditAction::Create => "CREATE",
            AuditAction::Read => "READ",
            AuditAction::Update => "UPDATE",
            AuditAction::Delete => "DELETE",
            AuditAction::Rotate => "ROTATE",
            AuditAction::Login => "LOGIN",
        }
    }
}

impl Display for AuditAction {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for AuditAction {
    type Err = AuditParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "CREATE" => Ok(AuditAction::Create),
            "READ" => Ok(AuditAction::Read),
            "UPDATE" => Ok(AuditAction::Update),
            "DELETE" => Ok(AuditAction::Delete),
            "ROTATE" => Ok(AuditAction::Rotate),
            "LOGIN" => Ok(AuditAction::Login),
            other => Err(AuditParseError(other.to_string())),
        }
    }
}

/// What it happened to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditResource {
    Secret,
    Workspace,
    Token,
    Keyring,
}

impl AuditResource {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditResource::Secret => "secret",
            AuditResource::Workspace => "workspace",
            AuditResource::Token => "token",
            AuditResource::Keyring => "keyring",
        }
    }
}

impl Display for AuditResource {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for AuditResource {
    type Err = AuditParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "secret" => Ok(AuditResource::Secret),
            "workspace" => Ok(AuditResource::Workspace),
            "token" => Ok(AuditResource::Token),
            "keyring" => Ok(AuditResource::Keyring),
            other => Err(AuditParseError(other.to_string())),
        }
    }
}

/// Error returned when an audit enum fails to parse.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("invalid audit field value: {0}")]
pub struct AuditParseError(pub String);

/// One append-only audit event. Resource identifiers are natural keys
/// (secret key, workspace slug, token name) so the trail is readable without
/// enabling surrogate-id enumeration. Contents never include plaintext, DEK
/// material, or token cleartext.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRecord {
    pub id: AuditRecordId,
    pub workspace_id: WorkspaceId,
    pub action: AuditAction,
    pub resource: AuditResource,
    pub resource_id: String,
    pub actor: Option<String>,
    pub token_id: Option<TokenId>,
    pub source_addr: Option<String>,
    pub user_agent: Option<String>,
    pub correlation_id: String,
    pub success: bool,
    /// Present iff success == false.
    pub failure_reason: Option<String>,
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl AuditRecord {
    /// Build a success record.
    pub fn success(
        workspace_id: WorkspaceId,
        action: AuditAction,
        resource: AuditResource,
        resource_id: impl Into<String>,
        correlation_id: impl Into<String>,
    ) -> Self {
        Self {
            id: AuditRecordId::new(),
            workspace_id,
            action,
            resource,
            resource_id: resource_id.into(),
            actor: None,
            token_id: None,
            source_addr: None,
            user_agent: None,
            correlation_id: correlation_id.into(),
            success: true,
            failure_reason: None,
            metadata: serde_json::Value::Object(Default::default()),
            created_at: Utc::now(),
        }
    }

    /// Build a failure record with a structured reason.
    pub fn failure(
        workspace_id: WorkspaceId,
        action: AuditAction,
        resource: AuditResource,
        resource_id: impl Into<String>,
        correlation_id: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            success: false,
            failure_reason: Some(reason.into()),
            ..Self::success(workspace_id, action, resource, resource_id, correlation_id)
        }
    }

    pub fn with_actor(mut self, actor: impl Into<String>) -> Self {
        self.actor = Some(actor.into());
        self
    }

    pub fn with_token(mut self, token_id: TokenId) -> Self {
        self.token_id = Some(token_id);
        self
    }

    pub fn with_source(mut self, addr: Option<String>, user_agent: Option<String>) -> Self {
        self.source_addr = addr;
        self.user_agent = user_agent;
        self
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn action_round_trip() {
        for action in [
            AuditAction::Create,
            AuditAction::Read,
            AuditAction::Update,
            AuditAction::Delete,
            AuditAction::Rotate,
            AuditAction::Login,
        ] {
            let parsed: AuditAction = action.as_str().parse().unwrap();
            assert_eq!(parsed, action);
        }
        assert!("read".parse::<AuditAction>().is_err()); // case-sensitive
    }

    #[test]
    fn resource_round_trip() {
        for resource in [
            AuditResource::Secret,
            AuditResource::Workspace,
            AuditResource::Token,
            AuditResource::Keyring,
        ] {
            let parsed: AuditResource = resource.as_str().parse().unwrap();
            assert_eq!(parsed, resource);
        }
    }

    #[test]
    fn failure_reason_presence_matches_success_flag() {
        let ws = WorkspaceId::new();
        let ok = AuditRecord::success(
            ws.clone(),
            AuditAction::Read,
            AuditResource::Secret,
            "db/password",
            "corr-1",
        );
        assert!(ok.success);
        assert!(ok.failure_reason.is_none());

        let failed = AuditRecord::failure(
            ws,
            AuditAction::Read,
            AuditResource::Secret,
            "db/password",
            "corr-2",
            "not_found",
        );
        assert!(!failed.success);
        assert_eq!(failed.failure_reason.as_deref(), Some("not_found"));
    }
}
