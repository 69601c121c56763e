//! # Error Handling
//!
//! This module provides the error taxonomy for the Vaultry secrets engine.
//! Every failure is classified at its point of origin into one of the kinds
//! below and propagated upward unchanged; transport adapters map kinds to
//! status codes via [`VaultryError::status_code`].

use std::fmt;

/// Custom result type for Vaultry operations
pub type Result<T> = std::result::Result<T, VaultryError>;

/// Main error type for the Vaultry secrets engine
#[derive(thiserror::Error, Debug)]
pub enum VaultryError {
    /// Configuration errors (bad master key, invalid settings)
    #[error("Configuration error: {message}")]
    Config {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Database and storage errors
    #[error("Database error: {context}")]
    Database {
        #[source]
        source: sqlx::Error,
        context: String,
    },

    /// Database constraint violation
    #[error("Database constraint violation: {message}")]
    ConstraintViolation {
        message: String,
        #[source]
        source: sqlx::Error,
    },

    /// I/O errors with additional context
    #[error("I/O error: {context}")]
    Io {
        #[source]
        source: std::io::Error,
        context: String,
    },

    /// Serialization/deserialization errors
    #[error("Serialization error: {context}")]
    Serialization {
        #[source]
        source: serde_json::Error,
        context: String,
    },

    /// Malformed input: bad key format, invalid kind transition, bad range
    #[error("Invalid configuration: {message}")]
    InvalidConfig { message: String, field: Option<String> },

    /// Missing, malformed, expired, or revoked bearer token
    #[error("Invalid token: {message}")]
    InvalidToken { message: String },

    /// Authenticated but not permitted for this workspace or permission
    #[error("Workspace access denied")]
    WorkspaceAccess { message: String },

    /// Addressed entity does not exist within the bound workspace
    #[error("Resource not found: {resource_type} '{id}'")]
    NotFound { resource_type: String, id: String },

    /// Name uniqueness, version race, or duplicate issuance
    #[error("Resource conflict: {message}")]
    Conflict { message: String, resource_type: String },

    /// Authenticity failure on decrypt, wrap/unwrap failure.
    /// Messages never carry key material, plaintext, or ciphertext.
    #[error("Cryptographic failure: {message}")]
    CryptoFailure { message: String },

    /// Structural invariant violation (missing current-version target, orphaned row)
    #[error("Data integrity violation: {message}")]
    DataIntegrity { message: String },

    /// Carried through from an external rate limiter or a saturated audit queue
    #[error("Rate limit exceeded: {message}")]
    RateLimited { message: String, retry_after: Option<u64> },

    /// Internal errors that do not fit the taxonomy
    #[error("Internal error: {message}")]
    Internal {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

impl VaultryError {
    /// Create a new configuration error
    pub fn config<S: Into<String>>(message: S) -> Self {
        Self::Config { message: message.into(), source: None }
    }

    /// Create a configuration error with source
    pub fn config_with_source<S: Into<String>>(
        message: S,
        source: Box<dyn std::error::Error + Send + Sync>,
    ) -> Self {
        Self::Config { message: message.into(), source: Some(source) }
    }

    /// Create a new database error
    pub fn database(source: sqlx::Error, context: impl Into<String>) -> Self {
        Self::Database { source, context: context.into() }
    }

    /// Create an invalid-input error
    pub fn invalid_config<S: Into<String>>(message: S) -> Self {
        Self::InvalidConfig { message: message.into(), field: None }
    }

    /// Create an invalid-input error with field information
    pub fn invalid_config_field<S: Into<String>, F: Into<String>>(message: S, field: F) -> Self {
        Self::InvalidConfig { message: message.into(), field: Some(field.into()) }
    }

    /// Create an invalid-token error
    pub fn invalid_token<S: Into<String>>(message: S) -> Self {
        Self::InvalidToken { message: message.into() }
    }

    /// Create a workspace-access error.
    ///
    /// The `Display` output is deliberately generic: the message field is for
    /// audit reasons and logs, and must not reveal whether the addressed
    /// resource exists.
    pub fn workspace_access<S: Into<String>>(message: S) -> Self {
        Self::WorkspaceAccess { message: message.into() }
    }

    /// Create a not-found error
    pub fn not_found<R: Into<String>, I: Into<String>>(resource_type: R, id: I) -> Self {
        Self::NotFound { resource_type: resource_type.into(), id: id.into() }
    }

    /// Create a conflict error
    pub fn conflict<M: Into<String>, R: Into<String>>(message: M, resource_type: R) -> Self {
        Self::Conflict { message: message.into(), resource_type: resource_type.into() }
    }

    /// Create a crypto-failure error
    pub fn crypto<S: Into<String>>(message: S) -> Self {
        Self::CryptoFailure { message: message.into() }
    }

    /// Create a data-integrity error
    pub fn data_integrity<S: Into<String>>(message: S) -> Self {
        Self::DataIntegrity { message: message.into() }
    }

    /// Create a rate-limited error
    pub fn rate_limited<S: Into<String>>(message: S) -> Self {
        Self::RateLimited { message: message.into(), retry_after: None }
    }

    /// Create an internal error
    pub fn internal<S: Into<String>>(message: S) -> Self {
        Self::Internal { message: message.into(), source: None }
    }

    /// Create a serialization error with custom context
    pub fn serialization<S: Into<String>>(source: serde_json::Error, context: S) -> Self {
        Self::Serialization { source, context: context.into() }
    }

    /// Get the HTTP status code a transport adapter should return for this error
    pub fn status_code(&self) -> u16 {
        match self {
            VaultryError::Config { .. } => 500,
            VaultryError::Database { .. } => 500,
            VaultryError::ConstraintViolation { .. } => 409,
            VaultryError::Io { .. } => 500,
            VaultryError::Serialization { .. } => 400,
            VaultryError::InvalidConfig { .. } => 400,
            VaultryError::InvalidToken { .. } => 401,
            VaultryError::WorkspaceAccess { .. } => 403,
            VaultryError::NotFound { .. } => 404,
            VaultryError::Conflict { .. } => 409,
            VaultryError::CryptoFailure { .. } => 500,
            VaultryError::DataIntegrity { .. } => 500,
            VaultryError::RateLimited { .. } => 429,
            VaultryError::Internal { .. } => 500,
        }
    }

    /// Stable machine-readable code for the failure kind
    pub fn code(&self) -> &'static str {
        match self {
            VaultryError::Config { .. } => "config",
            VaultryError::Database { .. } => "database",
            VaultryError::ConstraintViolation { .. } => "conflict",
            VaultryError::Io { .. } => "io",
            VaultryError::Serialization { .. } => "serialization",
            VaultryError::InvalidConfig { .. } => "invalid_config",
            VaultryError::InvalidToken { .. } => "invalid_token",
            VaultryError::WorkspaceAccess { .. } => "workspace_access",
            VaultryError::NotFound { .. } => "not_found",
            VaultryError::Conflict { .. } => "conflict",
            VaultryError::CryptoFailure { .. } => "crypto_failure",
            VaultryError::DataIntegrity { .. } => "data_integrity",
            VaultryError::RateLimited { .. } => "rate_limited",
            VaultryError::Internal { .. } => "internal",
        }
    }

    /// Check if this error should be retried by the caller
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            VaultryError::Database { .. }
                | VaultryError::Io { .. }
                | VaultryError::RateLimited { .. }
        )
    }

    /// Check whether this error wraps a unique-constraint violation.
    ///
    /// Used by the version-allocation and rotation retry loops.
    pub fn is_unique_violation(&self) -> bool {
        match self {
            VaultryError::ConstraintViolation { source, .. } => source
                .as_database_error()
                .map(|db| db.kind() == sqlx::error::ErrorKind::UniqueViolation)
                .unwrap_or(false),
            _ => false,
        }
    }
}

// Error conversions for common external error types
impl From<sqlx::Error> for VaultryError {
    fn from(error: sqlx::Error) -> Self {
        // Classify constraint violations so callers can distinguish name
        // collisions and version races from transient database failures.
        if let Some(db_err) = error.as_database_error() {
            if matches!(
                db_err.kind(),
                sqlx::error::ErrorKind::UniqueViolation
                    | sqlx::error::ErrorKind::ForeignKeyViolation
                    | sqlx::error::ErrorKind::NotNullViolation
                    | sqlx::error::ErrorKind::CheckViolation
            ) {
                return Self::ConstraintViolation {
                    message: db_err.message().to_string(),
                    source: error,
                };
            }
        }

        Self::Database { source: error, context: "Database operation failed".to_string() }
    }
}

impl From<std::io::Error> for VaultryError {
    fn from(error: std::io::Error) -> Self {
        Self::Io { source: error, context: "I/O operation failed".to_string() }
    }
}

impl From<serde_json::Error> for VaultryError {
    fn from(error: serde_json::Error) -> Self {
        Self::Serialization { source: error, context: "JSON serialization failed".to_string() }
    }
}

impl From<config::ConfigError> for VaultryError {
    fn from(error: config::ConfigError) -> Self {
        Self::config_with_source("Configuration loading failed", Box::new(error))
    }
}

impl From<validator::ValidationErrors> for VaultryError {
    fn from(errors: validator::ValidationErrors) -> Self {
        let message = errors
            .field_errors()
            .iter()
            .map(|(field, field_errors)| {
                let error_messages: Vec<String> = field_errors
                    .iter()
                    .map(|e| {
                        e.message.as_ref().map_or("Invalid value".to_string(), |m| m.to_string())
                    })
                    .collect();
                format!("{}: {}", field, error_messages.join(", "))
            })
            .collect::<Vec<_>>()
            .join("; ");

        Self::invalid_config(format!("Validation failed: {}", message))
    }
}

impl From<uuid::Error> for VaultryError {
    fn from(error: uuid::Error) -> Self {
        Self::invalid_config(format!("Invalid identifier: {}", error))
    }
}

/// Helper for adapters that want a uniform wire representation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorBody {
    pub code: &'static str,
    pub message: String,
}

impl fmt::Display for ErrorBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl From<&VaultryError> for ErrorBody {
    fn from(error: &VaultryError) -> Self {
        ErrorBody { code: error.code(), message: error.to_string() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_creation() {
        let error = VaultryError::config("Test configuration error");
        assert!(matches!(error, VaultryError::Config { .. }));
        assert_eq!(error.to_string(), "Configuration error: Test configuration error");
    }

    #[test]
    fn test_invalid_config_with_field() {
        let error = VaultryError::invalid_config_field("Invalid slug format", "slug");
        assert!(matches!(error, VaultryError::InvalidConfig { .. }));
        if let VaultryError::InvalidConfig { field, .. } = error {
            assert_eq!(field, Some("slug".to_string()));
        }
    }

    #[test]
    fn test_status_codes() {
        assert_eq!(VaultryError::invalid_config("test").status_code(), 400);
        assert_eq!(VaultryError::invalid_token("test").status_code(), 401);
        assert_eq!(VaultryError::workspace_access("test").status_code(), 403);
        assert_eq!(VaultryError::not_found("secret", "db/password").status_code(), 404);
        assert_eq!(VaultryError::conflict("test", "token").status_code(), 409);
        assert_eq!(VaultryError::crypto("test").status_code(), 500);
        assert_eq!(VaultryError::data_integrity("test").status_code(), 500);
        assert_eq!(VaultryError::rate_limited("test").status_code(), 429);
        assert_eq!(VaultryError::internal("test").status_code(), 500);
    }

    #[test]
    fn test_workspace_access_display_is_generic() {
        // The display form must not leak whether the target exists.
        let error = VaultryError::workspace_access("token ws-b attempted read in ws-a");
        assert_eq!(error.to_string(), "Workspace access denied");
    }

    #[test]
    fn test_retryable_errors() {
        assert!(VaultryError::rate_limited("test").is_retryable());
        assert!(!VaultryError::invalid_config("test").is_retryable());
        assert!(!VaultryError::not_found("secret", "test").is_retryable());
        assert!(!VaultryError::crypto("test").is_retryable());
    }

    #[test]
    fn test_error_conversions() {
        let io_error = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let vaultry_error: VaultryError = io_error.into();
        assert!(matches!(vaultry_error, VaultryError::Io { .. }));

        let json_error = serde_json::from_str::<serde_json::Value>("invalid json").unwrap_err();
        let vaultry_error: VaultryError = json_error.into();
        assert!(matches!(vaultry_error, VaultryError::Serialization { .. }));
    }

    #[test]
    fn test_error_codes_are_stable() {
        assert_eq!(VaultryError::invalid_token("x").code(), "invalid_token");
        assert_eq!(VaultryError::workspace_access("x").code(), "workspace_access");
        assert_eq!(VaultryError::crypto("x").code(), "crypto_failure");
        assert_eq!(VaultryError::rate_limited("x").code(), "rate_limited");
    }

    #[test]
    fn test_error_body_from_error() {
        let error = VaultryError::not_found("secret", "db/password");
        let body = ErrorBody::from(&error);
        assert_eq!(body.code, "not_found");
        assert!(body.message.contains("db/password"));
    }
}
