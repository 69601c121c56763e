//! # Configuration Settings
//!
//! Defines the configuration structure for the Vaultry secrets engine.

use crate::errors::{Result, VaultryError};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use validator::Validate;

/// Argon2id floors mandated for token fingerprints: anything weaker makes
/// stored token hashes enumerable offline.
pub const ARGON2_MEMORY_FLOOR_KIB: u32 = 64 * 1024;
pub const ARGON2_TIME_COST_FLOOR: u32 = 3;

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize, Validate, Default)]
pub struct AppConfig {
    /// Database configuration
    #[validate(nested)]
    pub database: DatabaseConfig,

    /// Master-key / envelope-encryption configuration
    #[validate(nested)]
    pub crypto: CryptoConfig,

    /// Token authentication configuration
    #[validate(nested)]
    pub auth: AuthConfig,

    /// Audit trail configuration
    #[validate(nested)]
    pub audit: AuditConfig,

    /// Observability configuration
    #[validate(nested)]
    pub observability: ObservabilityConfig,
}

impl AppConfig {
    /// Validate the entire configuration
    pub fn validate(&self) -> Result<()> {
        // Use validator crate for basic validation
        Validate::validate(self).map_err(VaultryError::from)?;

        // Custom validation logic
        self.validate_custom()?;

        Ok(())
    }

    /// Custom validation logic that goes beyond what the validator crate can do
    fn validate_custom(&self) -> Result<()> {
        // Validate database URL format
        if !self.database.url.starts_with("sqlite://")
            && !self.database.url.starts_with("postgresql://")
        {
            return Err(VaultryError::invalid_config(
                "Database URL must start with 'sqlite://' or 'postgresql://'",
            ));
        }

        if self.database.min_connections > self.database.max_connections {
            return Err(VaultryError::invalid_config(
                "min_connections cannot be greater than max_connections",
            ));
        }

        // The master key is validated for length when decoded; here we only
        // require that it is present at all.
        if self.crypto.master_key_base64.trim().is_empty() {
            return Err(VaultryError::invalid_config(
                "crypto.master_key_base64 must be set (VAULTRY_MASTER_KEY). \
                 Generate one with: openssl rand -base64 32",
            ));
        }

        if self.auth.argon2_memory_kib < ARGON2_MEMORY_FLOOR_KIB {
            return Err(VaultryError::invalid_config(format!(
                "auth.argon2_memory_kib must be at least {} KiB",
                ARGON2_MEMORY_FLOOR_KIB
            )));
        }

        if self.auth.argon2_time_cost < ARGON2_TIME_COST_FLOOR {
            return Err(VaultryError::invalid_config(format!(
                "auth.argon2_time_cost must be at least {}",
                ARGON2_TIME_COST_FLOOR
            )));
        }

        Ok(())
    }
}

/// Database connection configuration
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct DatabaseConfig {
    /// Database connection URL
    #[validate(length(min = 1, message = "Database URL cannot be empty"))]
    pub url: String,

    /// Maximum number of connections in the pool
    #[validate(range(min = 1, max = 100, message = "Max connections must be between 1 and 100"))]
    pub max_connections: u32,

    /// Minimum number of connections in the pool
    #[validate(range(min = 0, max = 50, message = "Min connections must be between 0 and 50"))]
    pub min_connections: u32,

    /// Connection timeout in seconds
    #[validate(range(
        min = 1,
        max = 60,
        message = "Connect timeout must be between 1 and 60 seconds"
    ))]
    pub connect_timeout_seconds: u64,

    /// Idle timeout in seconds (0 = no timeout)
    pub idle_timeout_seconds: u64,

    /// Enable automatic migrations
    pub auto_migrate: bool,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite://./data/vaultry.db".to_string(),
            max_connections: 10,
            min_connections: 0,
            connect_timeout_seconds: 10,
            idle_timeout_seconds: 600, // 10 minutes
            auto_migrate: true,
        }
    }
}

impl DatabaseConfig {
    /// Get connection timeout as Duration
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_seconds)
    }

    /// Get idle timeout as Duration (None if 0)
    pub fn idle_timeout(&self) -> Option<Duration> {
        if self.idle_timeout_seconds == 0 {
            None
        } else {
            Some(Duration::from_secs(self.idle_timeout_seconds))
        }
    }

    /// Check if this is a SQLite configuration
    pub fn is_sqlite(&self) -> bool {
        self.url.starts_with("sqlite://")
    }
}

/// Envelope-encryption configuration.
///
/// The master key wraps per-workspace data-encryption keys. It is read once
/// at process start and never re-read per request; a missing or malformed
/// key is fatal at initialization, never per-request.
#[derive(Debug, Clone, Serialize, Deserialize, Validate, Default)]
pub struct CryptoConfig {
    /// Base64-encoded 32-byte master key (env: VAULTRY_MASTER_KEY)
    pub master_key_base64: String,
}

impl CryptoConfig {
    /// Load the master key from the conventional environment variable.
    pub fn from_env() -> Result<Self> {
        let master_key_base64 = std::env::var("VAULTRY_MASTER_KEY").map_err(|_| {
            VaultryError::config(
                "VAULTRY_MASTER_KEY environment variable not set. \
                 Generate a key with: openssl rand -base64 32",
            )
        })?;

        Ok(Self { master_key_base64 })
    }
}

/// Token authentication configuration
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct AuthConfig {
    /// Argon2id memory cost in KiB
    pub argon2_memory_kib: u32,

    /// Argon2id iteration count
    pub argon2_time_cost: u32,

    /// Argon2id lane count
    #[validate(range(min = 1, max = 8))]
    pub argon2_parallelism: u32,

    /// Default token lifetime in days when issuance does not specify one
    #[validate(range(min = 1, max = 3650))]
    pub default_token_ttl_days: i64,

    /// Absolute ceiling on token age in days; tokens older than this are
    /// rejected even when their expiry lies further out
    #[validate(range(min = 1, max = 3650))]
    pub max_token_age_days: i64,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            argon2_memory_kib: ARGON2_MEMORY_FLOOR_KIB,
            argon2_time_cost: ARGON2_TIME_COST_FLOOR,
            argon2_parallelism: 1,
            default_token_ttl_days: 30,
            max_token_age_days: 365,
        }
    }
}

/// Audit trail configuration
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct AuditConfig {
    /// Records older than this many days are removed by the retention sweep
    #[validate(range(min = 1, max = 3650))]
    pub retention_days: i64,

    /// Capacity of the bounded in-process audit queue
    #[validate(range(min = 16, max = 65536))]
    pub queue_capacity: usize,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self { retention_days: 90, queue_capacity: 1024 }
    }
}

/// Observability configuration
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct ObservabilityConfig {
    /// Log level filter (overridden by RUST_LOG when set)
    pub log_level: String,

    /// Emit logs as JSON
    pub json_logs: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self { log_level: "info".to_string(), json_logs: false }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_config() -> AppConfig {
        AppConfig {
            crypto: CryptoConfig {
                master_key_base64: "QUFBQUFBQUFBQUFBQUFBQUFBQUFBQUFBQUFBQUFBQUE=".to_string(),
            },
            ..Default::default()
        }
    }

    #[test]
    fn default_config_fails_without_master_key() {
        let config = AppConfig::default();
        assert!(config.validate().is_err());
    }

    #[test]
    fn valid_config_passes() {
        assert!(valid_config().validate().is_ok());
    }

    #[test]
    fn rejects_unknown_database_scheme() {
        let mut config = valid_config();
        config.database.url = "mysql://localhost/vaultry".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_argon2_below_floors() {
        let mut config = valid_config();
        config.auth.argon2_memory_kib = 1024;
        assert!(config.validate().is_err());

        let mut config = valid_config();
        config.auth.argon2_time_cost = 1;
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_min_connections_above_max() {
        let mut config = valid_config();
        config.database.min_connections = 20;
        config.database.max_connections = 10;
        assert!(config.validate().is_err());
    }

    #[test]
    fn database_timeouts() {
        let config = DatabaseConfig::default();
        assert_eq!(config.connect_timeout(), Duration::from_secs(10));
        assert_eq!(config.idle_timeout(), Some(Duration::from_secs(600)));

        let config = DatabaseConfig { idle_timeout_seconds: 0, ..Default::default() };
        assert_eq!(config.idle_timeout(), None);
    }

    #[test]
    fn audit_defaults() {
        let config = AuditConfig::default();
        assert_eq!(config.retention_days, 90);
        assert_eq!(config.queue_capacity, 1024);
    }
}
