//! Validation helpers and request DTOs for token issuance.

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use validator::{Validate, ValidationError, ValidationErrors};

use crate::auth::models::{permissions, TokenRole};

static NAME_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[a-zA-Z0-9_-]{3,64}$").expect("NAME_REGEX should be a valid regex pattern")
});

/// Request payload for issuing a token.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IssueTokenRequest {
    pub name: String,
    pub role: TokenRole,
    /// Optional fine-grained scope list; when present it replaces the
    /// role's default permission set.
    #[serde(default)]
    pub scopes: Vec<String>,
    pub expires_at: Option<DateTime<Utc>>,
    pub created_by: Option<String>,
}

impl Validate for IssueTokenRequest {
    fn validate(&self) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::new();

        if let Err(err) = validate_token_name(&self.name) {
            errors.add("name", err);
        }

        if let Err(err) = validate_scopes_list(&self.scopes) {
            errors.add("scopes", err);
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

pub fn validate_token_name(name: &str) -> Result<(), ValidationError> {
    if NAME_REGEX.is_match(name) {
        Ok(())
    } else {
        Err(ValidationError::new("invalid_token_name"))
    }
}

pub fn validate_scope(scope: &str) -> Result<(), ValidationError> {
    if permissions::ALL.contains(&scope) {
        Ok(())
    } else {
        Err(ValidationError::new("unknown_scope"))
    }
}

fn validate_scopes_list(scopes: &[String]) -> Result<(), ValidationError> {
    for scope in scopes {
        validate_scope(scope)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn name_validation_allows_valid_patterns() {
        assert!(validate_token_name("admin-token").is_ok());
        assert!(validate_token_name("A1_ci").is_ok());
        assert!(validate_token_name("no").is_err()); // too short
        assert!(validate_token_name(&"x".repeat(65)).is_err()); // too long
        assert!(validate_token_name("bad token").is_err());
    }

    #[test]
    fn scope_validation() {
        assert!(validate_scope("secrets:read").is_ok());
        assert!(validate_scope("keyring:rotate").is_ok());
        assert!(validate_scope("admin:all").is_ok());

        assert!(validate_scope("secrets:everything").is_err());
        assert!(validate_scope("SECRETS:READ").is_err());
        assert!(validate_scope("").is_err());
    }

    #[test]
    fn issue_request_validation() {
        let mut request = IssueTokenRequest {
            name: "ci-deploy".into(),
            role: TokenRole::Write,
            scopes: vec!["secrets:read".into()],
            expires_at: None,
            created_by: None,
        };
        assert!(request.validate().is_ok());

        request.name = "!bad".into();
        assert!(request.validate().is_err());

        request.name = "good".into();
        request.scopes = vec!["bogus".into()];
        assert!(request.validate().is_err());

        // Empty scope list is fine: the role defaults apply.
        request.scopes = vec![];
        assert!(request.validate().is_ok());
    }
}
