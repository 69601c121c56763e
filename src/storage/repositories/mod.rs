//! Repositories: one module per aggregate. Every tenant-scoped query is
//! parameterized by a [`crate::domain::WorkspaceBinding`].

pub mod audit_log;
pub mod keyring;
pub mod secret;
pub mod token;
pub mod workspace;

pub use audit_log::AuditLogRepository;
pub use keyring::{KeyringEntryRow, KeyringRepository};
pub use secret::{SecretRepository, SecretVersionRow};
pub use token::{NewApiToken, TokenAuthRow, TokenRepository};
pub use workspace::WorkspaceRepository;
