//! # Vaultry
//!
//! Vaultry is the core engine of a multi-tenant secrets-management service:
//! workspaces (tenants) store named secrets whose values are encrypted at
//! rest under per-workspace data keys, versioned on every write, accessed
//! through authenticated bearer tokens with role-based scopes, and fully
//! audited.
//!
//! ## Architecture
//!
//! The engine is layered, leaves first:
//!
//! ```text
//! errors → crypto → keyring → workspace context → token auth → secret store → audit
//! ```
//!
//! ## Core Components
//!
//! - **Crypto Service**: envelope encryption — AES-256-GCM over secret
//!   values under per-workspace DEKs, DEKs wrapped under a master key
//! - **Keyring Manager**: versioned DEK history per workspace, atomic
//!   rotation, old versions kept for decrypting existing secret snapshots
//! - **Secret Store**: versioned upsert with a serialized version counter,
//!   current-version pointer, prefix listing, idempotent delete
//! - **Token Authenticator**: `vt_`-prefixed bearer tokens, Argon2id
//!   verification behind a keyed fingerprint index, role/scope evaluation
//! - **Audit Writer**: append-only trail of every operation, written from a
//!   bounded background queue
//!
//! Transport surfaces (REST, CLI, UI) and process bootstrap live outside
//! this crate; they consume the [`startup::Engine`] handle.

pub mod auth;
pub mod config;
pub mod crypto;
pub mod domain;
pub mod errors;
pub mod observability;
pub mod services;
pub mod startup;
pub mod storage;

// Re-export commonly used types and traits
pub use config::AppConfig;
pub use errors::{Result, VaultryError};
pub use startup::Engine;

/// Application version from Cargo.toml
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name from Cargo.toml
pub const APP_NAME: &str = env!("CARGO_PKG_NAME");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_looks_like_semver() {
        let components: Vec<_> = VERSION.split('.').collect();
        assert!(components.len() >= 3, "version should follow semver: {VERSION}");
    }

    #[test]
    fn app_name_is_stable() {
        assert_eq!(APP_NAME, "vaultry");
    }
}
