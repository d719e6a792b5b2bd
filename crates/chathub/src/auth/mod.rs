//! Authentication module.
//!
//! Bearer tokens are HS256 JWTs whose `sub` claim is the user identifier.
//! The rest of the crate only sees the [`TokenVerifier`] contract.

mod claims;
mod config;
mod error;
mod middleware;
mod verifier;

pub use claims::Claims;
pub use config::{AuthConfig, ConfigValidationError};
pub use error::AuthError;
pub use middleware::{CurrentUser, auth_middleware, bearer_token_from_header, token_from_query};
pub use verifier::{AuthState, TokenVerifier};
