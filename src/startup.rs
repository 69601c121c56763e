//! Engine assembly: wire configuration, pool, crypto, repositories, and
//! services into one handle an embedding process (REST adapter, test
//! harness) can use.

use tracing::info;

use crate::auth::TokenService;
use crate::config::AppConfig;
use crate::crypto::CryptoService;
use crate::errors::Result;
use crate::services::{AuditWriter, KeyringService, SecretStore, WorkspaceService};
use crate::storage::{
    create_pool, AuditLogRepository, DbPool, KeyringRepository, SecretRepository, TokenRepository,
    WorkspaceRepository,
};

/// The assembled secrets engine.
#[derive(Clone)]
pub struct Engine {
    pub pool: DbPool,
    pub crypto: CryptoService,
    pub workspaces: WorkspaceService,
    pub keyring: KeyringService,
    pub tokens: TokenService,
    pub secrets: SecretStore,
    pub audit: AuditWriter,
    config: AppConfig,
}

impl Engine {
    /// Build every component from configuration. The master key is decoded
    /// here, once; an unusable key aborts startup rather than surfacing
    /// per-request.
    ///
    /// Configuration is validated by [`crate::config::load_config`]; a
    /// hand-built `AppConfig` is taken as given (tests trade argon2
    /// strength for speed this way).
    pub async fn bootstrap(config: AppConfig) -> Result<Self> {
        let pool = create_pool(&config.database).await?;
        let crypto = CryptoService::from_config(&config.crypto)?;

        let audit = AuditWriter::spawn(AuditLogRepository::new(pool.clone()), &config.audit);

        let workspace_repository = WorkspaceRepository::new(pool.clone());
        let keyring = KeyringService::new(
            pool.clone(),
            KeyringRepository::new(pool.clone()),
            workspace_repository.clone(),
            crypto.clone(),
            audit.clone(),
        );

        let workspaces = WorkspaceService::new(
            pool.clone(),
            workspace_repository,
            keyring.clone(),
            crypto.clone(),
        );

        let tokens = TokenService::new(
            TokenRepository::new(pool.clone()),
            audit.clone(),
            &crypto,
            config.auth.clone(),
        )?;

        let secrets = SecretStore::new(
            pool.clone(),
            SecretRepository::new(pool.clone()),
            keyring.clone(),
            crypto.clone(),
            audit.clone(),
        );

        info!("Vaultry engine assembled");
        Ok(Self { pool, crypto, workspaces, keyring, tokens, secrets, audit, config })
    }

    /// Run the audit retention sweep with the configured horizon.
    pub async fn purge_expired_audit_records(&self) -> Result<u64> {
        self.audit.purge_expired(self.config.audit.retention_days).await
    }

    /// Drain the audit queue. Call before shutdown so in-flight records
    /// reach the trail.
    pub async fn flush_audit(&self) -> Result<()> {
        self.audit.flush().await
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine").field("crypto", &self.crypto).finish()
    }
}
