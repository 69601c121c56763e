//! Embedded schema migrations.
//!
//! Everything under `migrations/` is compiled into the binary and applied
//! through sqlx's migrator, which records applied versions and checksums in
//! `_sqlx_migrations`. Migrations run on pool creation when `auto_migrate`
//! is enabled.

use sqlx::migrate::Migrator;
use sqlx::FromRow;
use tracing::info;

use crate::errors::{Result, VaultryError};
use crate::storage::DbPool;

/// Compile-time view of the `migrations/` directory.
pub static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

/// Apply all pending migrations.
///
/// Re-running against an up-to-date database is a no-op. A checksum
/// mismatch on an already-applied migration aborts: the schema history has
/// diverged and continuing would corrupt it.
pub async fn run_migrations(pool: &DbPool) -> Result<()> {
    MIGRATOR.run(pool).await.map_err(|e| {
        VaultryError::config_with_source("Failed to apply database migrations", Box::new(e))
    })?;

    info!(
        schema_version = MIGRATOR.iter().map(|m| m.version).max().unwrap_or(0),
        "Database schema is up to date"
    );

    Ok(())
}

/// One row of sqlx's migration bookkeeping table.
#[derive(Debug, Clone, FromRow)]
pub struct AppliedMigration {
    pub version: i64,
    pub description: String,
    pub success: bool,
}

/// Migrations recorded as applied, oldest first.
pub async fn applied_migrations(pool: &DbPool) -> Result<Vec<AppliedMigration>> {
    sqlx::query_as::<_, AppliedMigration>(
        "SELECT version, description, success FROM _sqlx_migrations ORDER BY version",
    )
    .fetch_all(pool)
    .await
    .map_err(|e| VaultryError::database(e, "Failed to read applied migrations"))
}

/// Highest applied migration version (0 on a database with none).
pub async fn current_version(pool: &DbPool) -> Result<i64> {
    Ok(applied_migrations(pool).await?.into_iter().map(|m| m.version).max().unwrap_or(0))
}
