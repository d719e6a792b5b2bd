//! Authentication middleware.

use axum::{
    extract::{FromRequestParts, State},
    http::{header::AUTHORIZATION, request::Parts},
    middleware::Next,
    response::Response,
};
use log::debug;
use std::sync::Arc;

use super::{AuthError, TokenVerifier};
use crate::ids::UserId;

/// Extract a Bearer token from an Authorization header value.
pub fn bearer_token_from_header(header_value: &str) -> Result<&str, AuthError> {
    let mut parts = header_value.split_whitespace();
    let scheme = parts.next().ok_or(AuthError::InvalidAuthHeader)?;

    if !scheme.eq_ignore_ascii_case("bearer") {
        return Err(AuthError::InvalidAuthHeader);
    }

    let token = parts.next().ok_or(AuthError::InvalidAuthHeader)?;
    if token.is_empty() {
        return Err(AuthError::InvalidAuthHeader);
    }

    if parts.next().is_some() {
        return Err(AuthError::InvalidAuthHeader);
    }

    Ok(token)
}

/// Extract the URL-decoded `token` query parameter.
///
/// Browsers cannot set headers on WebSocket upgrades, so the token travels in
/// the query string there.
pub fn token_from_query(query: &str) -> Option<String> {
    query.split('&').find_map(|pair| {
        let (key, value) = pair.split_once('=')?;
        if key == "token" && !value.is_empty() {
            urlencoding::decode(value).ok().map(|s| s.into_owned())
        } else {
            None
        }
    })
}

/// Authenticated user extracted from request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CurrentUser {
    id: UserId,
}

impl CurrentUser {
    /// Wrap an already verified identity.
    pub fn new(id: UserId) -> Self {
        Self { id }
    }

    /// Get the user ID.
    pub fn id(&self) -> &UserId {
        &self.id
    }
}

impl<S> FromRequestParts<S> for CurrentUser
where
    S: Send + Sync,
{
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<CurrentUser>()
            .cloned()
            .ok_or(AuthError::MissingToken)
    }
}

/// Authentication middleware.
///
/// Validates the bearer token and injects `CurrentUser` into request
/// extensions. The Authorization header takes priority over the `token`
/// query parameter.
pub async fn auth_middleware(
    State(verifier): State<Arc<dyn TokenVerifier>>,
    mut req: axum::http::Request<axum::body::Body>,
    next: Next,
) -> Result<Response, AuthError> {
    let auth_header = req
        .headers()
        .get(AUTHORIZATION)
        .and_then(|h| h.to_str().ok());

    let user_id = if let Some(header) = auth_header {
        verifier.verify(bearer_token_from_header(header)?)?
    } else if let Some(token) = req.uri().query().and_then(token_from_query) {
        verifier.verify(&token)?
    } else {
        return Err(AuthError::MissingToken);
    };

    debug!("Authenticated request from user {}", user_id);
    req.extensions_mut().insert(CurrentUser::new(user_id));

    Ok(next.run(req).await)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bearer_token_from_header_valid() {
        assert_eq!(
            bearer_token_from_header("Bearer abc.def.ghi").unwrap(),
            "abc.def.ghi"
        );
        assert_eq!(
            bearer_token_from_header("bearer   token123").unwrap(),
            "token123"
        );
        assert_eq!(
            bearer_token_from_header("   Bearer\tmixed-case ").unwrap(),
            "mixed-case"
        );
    }

    #[test]
    fn test_bearer_token_from_header_invalid() {
        let cases = [
            "",
            "Bearer",
            "Bearer ",
            "Token something",
            "Bearer token extra",
            "bear token",
        ];

        for case in cases {
            assert!(
                bearer_token_from_header(case).is_err(),
                "{case} should fail"
            );
        }
    }

    #[test]
    fn test_token_from_query() {
        assert_eq!(token_from_query("token=abc").as_deref(), Some("abc"));
        assert_eq!(
            token_from_query("foo=1&token=a%2Eb%2Ec").as_deref(),
            Some("a.b.c")
        );
        assert_eq!(token_from_query("token="), None);
        assert_eq!(token_from_query("tokens=abc"), None);
        assert_eq!(token_from_query(""), None);
    }
}
