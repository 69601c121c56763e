//! # Configuration Management
//!
//! Loads engine configuration from defaults, an optional file, and
//! environment variables with the `VAULTRY_` prefix.

pub mod settings;

pub use settings::{
    AppConfig, AuditConfig, AuthConfig, CryptoConfig, DatabaseConfig, ObservabilityConfig,
};

use crate::errors::{Result, VaultryError};
use config::{Config, Environment, File};
use std::path::Path;

/// Load application configuration from multiple sources.
///
/// Configuration is loaded in the following order (later sources override
/// earlier ones):
/// 1. Default values
/// 2. Configuration file (if specified)
/// 3. Environment variables with VAULTRY_ prefix (e.g.
///    `VAULTRY_DATABASE__URL`, `VAULTRY_AUDIT__RETENTION_DAYS`)
pub fn load_config<P: AsRef<Path>>(config_path: Option<P>) -> Result<AppConfig> {
    let mut builder = Config::builder();

    // Add default configuration
    builder = builder.add_source(Config::try_from(&AppConfig::default())?);

    // Add configuration file if specified
    if let Some(path) = config_path {
        let path = path.as_ref();
        if path.exists() {
            builder = builder.add_source(File::from(path));
        } else {
            return Err(VaultryError::config(format!(
                "Configuration file not found: {}",
                path.display()
            )));
        }
    }

    // Add environment variables with VAULTRY_ prefix
    builder =
        builder.add_source(Environment::with_prefix("VAULTRY").separator("__").try_parsing(true));

    let config = builder.build().map_err(|e| {
        VaultryError::config_with_source("Failed to build configuration", Box::new(e))
    })?;

    let mut app_config: AppConfig = config.try_deserialize().map_err(|e| {
        VaultryError::config_with_source("Failed to deserialize configuration", Box::new(e))
    })?;

    // The master key has its own conventional variable outside the nested
    // override scheme so deployments can source it from a secret mount.
    if app_config.crypto.master_key_base64.trim().is_empty() {
        if let Ok(key) = std::env::var("VAULTRY_MASTER_KEY") {
            app_config.crypto.master_key_base64 = key;
        }
    }

    app_config.validate()?;

    Ok(app_config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_config_file_is_an_error() {
        let result = load_config(Some("/definitely/not/here/vaultry.toml"));
        assert!(result.is_err());
    }

    #[test]
    fn load_without_file_requires_master_key() {
        // Without VAULTRY_MASTER_KEY in the environment the defaults fail
        // validation; with it they pass. Guard against both states so the
        // test is independent of the ambient environment.
        let result = load_config::<&str>(None);
        match std::env::var("VAULTRY_MASTER_KEY") {
            Ok(_) => assert!(result.is_ok()),
            Err(_) => assert!(result.is_err()),
        }
    }
}
