//! Test database utilities for in-library tests.
//!
//! Provides a file-backed SQLite database per test with all migrations
//! applied, giving full isolation between tests without external services.
//!
//! This module is compiled for tests and for the integration-test harness.

use crate::config::DatabaseConfig;
use crate::storage::{create_pool, DbPool};
use tempfile::TempDir;

/// A test database backed by a temporary SQLite file.
///
/// The temporary directory (and the database in it) is removed when this
/// struct is dropped. Keep it alive for the duration of your test.
pub struct TestDatabase {
    pub pool: DbPool,
    _dir: TempDir,
}

impl TestDatabase {
    /// Create a new test database with all migrations applied.
    ///
    /// The `prefix` parameter is used for the database filename, which helps
    /// when debugging leftover artifacts from crashed test runs.
    pub async fn new(prefix: &str) -> Self {
        let dir = tempfile::Builder::new()
            .prefix("vaultry-test-")
            .tempdir()
            .unwrap_or_else(|e| panic!("Failed to create temp dir for {}: {}", prefix, e));

        let db_path = dir.path().join(format!("{}.db", prefix));
        let url = format!("sqlite://{}", db_path.display());

        let config = DatabaseConfig {
            url,
            auto_migrate: true,
            max_connections: 5,
            min_connections: 1,
            ..Default::default()
        };

        let pool = create_pool(&config)
            .await
            .unwrap_or_else(|e| panic!("Failed to create test pool for {}: {}", prefix, e));

        Self { pool, _dir: dir }
    }
}
