//! Token verification.

use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use log::debug;
use std::sync::Arc;

use super::{AuthConfig, AuthError, Claims, ConfigValidationError};
use crate::ids::UserId;

/// Turns a bearer credential into the identity it was issued for.
pub trait TokenVerifier: Send + Sync {
    /// Verify `token` and return the authenticated user.
    fn verify(&self, token: &str) -> Result<UserId, AuthError>;
}

/// HS256 JWT issuer and verifier.
#[derive(Clone)]
pub struct AuthState {
    config: Arc<AuthConfig>,
    decoding_key: Option<DecodingKey>,
    encoding_key: Option<EncodingKey>,
}

impl std::fmt::Debug for AuthState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthState")
            .field("issuer", &self.config.issuer)
            .field("has_secret", &self.decoding_key.is_some())
            .finish()
    }
}

impl AuthState {
    /// Create new auth state from config.
    /// Resolves `env:VAR_NAME` syntax in jwt_secret at construction time; an
    /// unresolvable reference is an error rather than a literal key.
    pub fn new(mut config: AuthConfig) -> Result<Self, ConfigValidationError> {
        config.jwt_secret = config.resolve_jwt_secret()?;

        let decoding_key = config
            .jwt_secret
            .as_ref()
            .map(|s| DecodingKey::from_secret(s.as_bytes()));
        let encoding_key = config
            .jwt_secret
            .as_ref()
            .map(|s| EncodingKey::from_secret(s.as_bytes()));

        Ok(Self {
            config: Arc::new(config),
            decoding_key,
            encoding_key,
        })
    }

    /// Validate a JWT token.
    pub fn validate_token(&self, token: &str) -> Result<Claims, AuthError> {
        let decoding_key = self
            .decoding_key
            .as_ref()
            .ok_or_else(|| AuthError::Internal("no JWT secret configured".to_string()))?;

        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = true;
        validation.validate_nbf = false;
        validation.required_spec_claims.clear();
        validation.required_spec_claims.insert("exp".to_string());
        if let Some(ref issuer) = self.config.issuer {
            // `set_issuer` alone lets tokens without an `iss` claim through.
            validation.set_issuer(&[issuer]);
            validation.required_spec_claims.insert("iss".to_string());
        }

        let token_data = decode::<Claims>(token, decoding_key, &validation).map_err(|e| {
            debug!("JWT validation failed: {:?}", e);
            match e.kind() {
                jsonwebtoken::errors::ErrorKind::ExpiredSignature => AuthError::TokenExpired,
                _ => AuthError::InvalidToken(e.to_string()),
            }
        })?;

        Ok(token_data.claims)
    }

    /// Generate a token for `user_id` using the configured TTL.
    pub fn generate_token(&self, user_id: &str) -> Result<String, AuthError> {
        self.generate_token_with_ttl(user_id, self.config.token_ttl_secs)
    }

    /// Generate a token for `user_id` valid for `ttl_secs`.
    pub fn generate_token_with_ttl(&self, user_id: &str, ttl_secs: i64) -> Result<String, AuthError> {
        let key = self
            .encoding_key
            .as_ref()
            .ok_or_else(|| AuthError::Internal("no JWT secret configured".to_string()))?;

        let claims = Claims::for_user(user_id, self.config.issuer.as_deref(), ttl_secs);
        encode(&Header::default(), &claims, key).map_err(|e| AuthError::Internal(e.to_string()))
    }
}

impl TokenVerifier for AuthState {
    fn verify(&self, token: &str) -> Result<UserId, AuthError> {
        let claims = self.validate_token(token)?;
        if claims.sub.is_empty() {
            return Err(AuthError::InvalidToken("empty subject".to_string()));
        }
        Ok(UserId::from(claims.sub))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "test-secret-for-unit-tests-minimum-32-chars-long";

    fn state_with(issuer: Option<&str>) -> AuthState {
        AuthState::new(AuthConfig {
            jwt_secret: Some(SECRET.to_string()),
            issuer: issuer.map(str::to_string),
            ..AuthConfig::default()
        })
        .unwrap()
    }

    #[test]
    fn test_generate_and_verify_token() {
        let state = state_with(None);
        let token = state.generate_token("alice").unwrap();
        assert_eq!(state.verify(&token).unwrap(), UserId::from("alice"));
    }

    #[test]
    fn test_expired_token_rejected() {
        let state = state_with(None);
        // Well past the default 60s leeway.
        let token = state.generate_token_with_ttl("alice", -3600).unwrap();
        assert!(matches!(state.verify(&token), Err(AuthError::TokenExpired)));
    }

    #[test]
    fn test_garbage_and_foreign_tokens_rejected() {
        let state = state_with(None);
        assert!(matches!(
            state.verify("not-a-jwt"),
            Err(AuthError::InvalidToken(_))
        ));

        let other = AuthState::new(AuthConfig {
            jwt_secret: Some("another-secret-that-is-also-32-chars-or-more".to_string()),
            ..AuthConfig::default()
        })
        .unwrap();
        let foreign = other.generate_token("mallory").unwrap();
        assert!(matches!(
            state.verify(&foreign),
            Err(AuthError::InvalidToken(_))
        ));
    }

    #[test]
    fn test_issuer_is_checked_when_configured() {
        let strict = state_with(Some("chathub"));
        let lax = state_with(None);

        let untagged = lax.generate_token("alice").unwrap();
        assert!(matches!(
            strict.verify(&untagged),
            Err(AuthError::InvalidToken(_))
        ));

        let foreign = state_with(Some("elsewhere")).generate_token("alice").unwrap();
        assert!(matches!(
            strict.verify(&foreign),
            Err(AuthError::InvalidToken(_))
        ));

        let tagged = strict.generate_token("alice").unwrap();
        assert_eq!(strict.verify(&tagged).unwrap(), UserId::from("alice"));
        // Without a configured issuer any `iss` is accepted.
        assert_eq!(lax.verify(&tagged).unwrap(), UserId::from("alice"));
    }

    #[test]
    fn test_unresolvable_env_secret_is_rejected() {
        let result = AuthState::new(AuthConfig {
            jwt_secret: Some("env:CHATHUB_VERIFIER_SECRET_THAT_IS_NEVER_SET".to_string()),
            ..AuthConfig::default()
        });
        assert!(matches!(
            result,
            Err(ConfigValidationError::EnvVarNotFound(name))
                if name == "CHATHUB_VERIFIER_SECRET_THAT_IS_NEVER_SET"
        ));
    }

    #[test]
    fn test_no_secret_is_internal_error() {
        let state = AuthState::new(AuthConfig::default()).unwrap();
        assert!(matches!(
            state.generate_token("alice"),
            Err(AuthError::Internal(_))
        ));
        assert!(matches!(state.verify("x.y.z"), Err(AuthError::Internal(_))));
    }
}
