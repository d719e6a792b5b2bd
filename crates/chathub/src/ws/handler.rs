//! WebSocket upgrade endpoint.

use axum::{
    extract::{
        Query, State,
        ws::{WebSocketUpgrade, rejection::WebSocketUpgradeRejection},
    },
    http::{HeaderMap, header::AUTHORIZATION},
    response::{IntoResponse, Response},
};
use log::{debug, warn};
use serde::Deserialize;

use super::connection::serve_connection;
use crate::api::{ApiError, AppState};
use crate::auth::{AuthError, TokenVerifier, bearer_token_from_header};
use crate::ids::UserId;

/// Query parameters for the WebSocket endpoint.
#[derive(Debug, Default, Deserialize)]
pub struct WsParams {
    /// Bearer token. Browsers cannot set headers on WebSocket requests.
    pub token: Option<String>,
}

/// Authenticate the caller, then upgrade and hand the socket to the hub.
///
/// Authentication runs before the upgrade is accepted, so an invalid or
/// missing token is answered with a plain 401 and no connection is created.
pub async fn ws_handler(
    State(state): State<AppState>,
    Query(params): Query<WsParams>,
    headers: HeaderMap,
    upgrade: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    let user = match authenticate(state.verifier.as_ref(), params.token.as_deref(), &headers) {
        Ok(user) => user,
        Err(e) => {
            warn!("Rejected WebSocket handshake: {}", e);
            return ApiError::from(e).into_response();
        }
    };

    let upgrade = match upgrade {
        Ok(upgrade) => upgrade,
        Err(rejection) => {
            debug!("Not a WebSocket request from user {}: {}", user, rejection);
            return rejection.into_response();
        }
    };

    let hub = state.hub.clone();
    let config = state.connection.clone();
    debug!("Upgrading WebSocket for user {}", user);

    upgrade
        .max_message_size(config.max_message_size)
        .on_failed_upgrade(|e| warn!("WebSocket upgrade failed: {}", e))
        .on_upgrade(move |socket| serve_connection(socket, hub, user, config))
}

/// Resolve the caller's identity from the `token` query parameter, falling
/// back to an `Authorization: Bearer` header.
fn authenticate(
    verifier: &dyn TokenVerifier,
    query_token: Option<&str>,
    headers: &HeaderMap,
) -> Result<UserId, AuthError> {
    if let Some(token) = query_token.filter(|t| !t.is_empty()) {
        return verifier.verify(token);
    }

    let header = headers
        .get(AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .ok_or(AuthError::MissingToken)?;
    verifier.verify(bearer_token_from_header(header)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    struct FixedVerifier;

    impl TokenVerifier for FixedVerifier {
        fn verify(&self, token: &str) -> Result<UserId, AuthError> {
            match token {
                "good" => Ok(UserId::from("alice")),
                _ => Err(AuthError::InvalidToken("unknown".to_string())),
            }
        }
    }

    #[test]
    fn test_query_token_is_preferred() {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer bad"));
        let user = authenticate(&FixedVerifier, Some("good"), &headers).unwrap();
        assert_eq!(user, UserId::from("alice"));
    }

    #[test]
    fn test_header_fallback() {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer good"));
        let user = authenticate(&FixedVerifier, None, &headers).unwrap();
        assert_eq!(user, UserId::from("alice"));
    }

    #[test]
    fn test_missing_and_invalid_tokens() {
        let headers = HeaderMap::new();
        assert!(matches!(
            authenticate(&FixedVerifier, None, &headers),
            Err(AuthError::MissingToken)
        ));
        assert!(matches!(
            authenticate(&FixedVerifier, Some(""), &headers),
            Err(AuthError::MissingToken)
        ));
        assert!(matches!(
            authenticate(&FixedVerifier, Some("forged"), &headers),
            Err(AuthError::InvalidToken(_))
        ));
    }
}
