//! # Token Authentication
//!
//! Bearer-token issuance, authentication, and authorization for the
//! secrets engine. Tokens are scoped to exactly one workspace; a validated
//! token yields an [`AuthContext`] that carries the workspace binding every
//! downstream operation requires.

pub mod hashing;
pub mod models;
pub mod token_service;
pub mod validation;

pub use models::{permissions, ApiToken, AuthContext, IssuedToken, RequestMeta, TokenRole};
pub use token_service::{TokenService, TOKEN_PREFIX};
pub use validation::IssueTokenRequest;
