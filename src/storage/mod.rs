//! # Storage and Persistence
//!
//! Database connectivity and the persistence layer for the secrets engine:
//! the connection pool, embedded migrations, and one repository per
//! aggregate.

pub mod migrations;
pub mod pool;
pub mod repositories;

#[cfg(test)]
pub mod test_helpers;

pub use crate::config::DatabaseConfig;

pub use migrations::{
    applied_migrations, current_version, run_migrations as run_db_migrations, AppliedMigration,
    MIGRATOR,
};
pub use pool::{create_pool, get_pool_stats, DbPool, PoolStats};
pub use repositories::{
    AuditLogRepository, KeyringEntryRow, KeyringRepository, NewApiToken, SecretRepository,
    SecretVersionRow, TokenAuthRow, TokenRepository, WorkspaceRepository,
};

use crate::errors::{Result, VaultryError};

/// Run database migrations
pub async fn run_migrations(pool: &DbPool) -> Result<()> {
    migrations::run_migrations(pool).await
}

/// Check database connectivity
pub async fn check_connection(pool: &DbPool) -> Result<()> {
    sqlx::query("SELECT 1").fetch_one(pool).await.map_err(|e| VaultryError::Database {
        source: e,
        context: "Database connectivity check failed".to_string(),
    })?;

    Ok(())
}
