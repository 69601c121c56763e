//! Common test utilities for all integration tests.
//!
//! Provides a fully assembled engine over a temporary SQLite database, plus
//! helpers for the workspace/token bootstrap every scenario needs.

#![allow(dead_code)]

use base64::Engine as _;
use tempfile::TempDir;

use vaultry::auth::{AuthContext, IssueTokenRequest, IssuedToken, RequestMeta, TokenRole};
use vaultry::config::{AppConfig, AuthConfig, CryptoConfig, DatabaseConfig};
use vaultry::domain::{NewWorkspace, Workspace};
use vaultry::Engine;

/// Fixed 32-byte master key for tests.
pub fn test_master_key_b64() -> String {
    base64::engine::general_purpose::STANDARD.encode([0x42u8; 32])
}

/// Engine configuration over a temporary database. Argon2 parameters are
/// deliberately weak to keep the suite fast; production floors are enforced
/// by `AppConfig::validate` at load time, which tests bypass on purpose.
pub fn test_config(db_url: String) -> AppConfig {
    AppConfig {
        database: DatabaseConfig {
            url: db_url,
            auto_migrate: true,
            max_connections: 5,
            min_connections: 1,
            ..Default::default()
        },
        crypto: CryptoConfig { master_key_base64: test_master_key_b64() },
        auth: AuthConfig {
            argon2_memory_kib: 1024,
            argon2_time_cost: 1,
            argon2_parallelism: 1,
            ..Default::default()
        },
        ..Default::default()
    }
}

/// An assembled engine whose database lives in a temp directory.
pub struct TestEngine {
    pub engine: Engine,
    _dir: TempDir,
}

pub async fn setup_engine(prefix: &str) -> TestEngine {
    let dir = tempfile::Builder::new()
        .prefix("vaultry-it-")
        .tempdir()
        .unwrap_or_else(|e| panic!("Failed to create temp dir for {}: {}", prefix, e));

    let db_path = dir.path().join(format!("{}.db", prefix));
    let config = test_config(format!("sqlite://{}", db_path.display()));

    let engine = Engine::bootstrap(config)
        .await
        .unwrap_or_else(|e| panic!("Failed to bootstrap engine for {}: {}", prefix, e));

    TestEngine { engine, _dir: dir }
}

impl TestEngine {
    pub async fn create_workspace(&self, slug: &str) -> Workspace {
        self.engine
            .workspaces
            .create(NewWorkspace {
                slug: slug.to_string(),
                display_name: format!("Workspace {}", slug),
                settings: serde_json::json!({}),
            })
            .await
            .expect("create workspace")
    }

    /// Bootstrap-issue a token (not audited, like out-of-band provisioning).
    pub async fn issue_token(
        &self,
        workspace: &Workspace,
        name: &str,
        role: TokenRole,
        scopes: &[&str],
    ) -> IssuedToken {
        let binding = self.engine.workspaces.provisioning_binding(workspace);
        self.engine
            .tokens
            .issue(
                &binding,
                IssueTokenRequest {
                    name: name.to_string(),
                    role,
                    scopes: scopes.iter().map(|s| s.to_string()).collect(),
                    expires_at: None,
                    created_by: Some("tests".into()),
                },
            )
            .await
            .expect("issue token")
    }

    pub async fn issue_admin_token(&self, workspace: &Workspace) -> IssuedToken {
        self.issue_token(workspace, "admin-token", TokenRole::Admin, &[]).await
    }

    pub async fn authenticate(&self, cleartext: &str) -> AuthContext {
        self.engine
            .tokens
            .authenticate(cleartext, RequestMeta::default())
            .await
            .expect("authenticate")
    }

    /// Workspace + admin context in one call; the setup most tests need.
    pub async fn workspace_with_admin(&self, slug: &str) -> (Workspace, AuthContext) {
        let workspace = self.create_workspace(slug).await;
        let issued = self.issue_admin_token(&workspace).await;
        let ctx = self.authenticate(&issued.cleartext).await;
        (workspace, ctx)
    }
}
