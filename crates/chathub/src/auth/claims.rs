//! JWT claims.

use serde::{Deserialize, Serialize};

/// JWT claims structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Subject (user ID).
    pub sub: String,

    /// Issuer.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iss: Option<String>,

    /// Expiration time (as Unix timestamp).
    pub exp: i64,

    /// Issued at (as Unix timestamp).
    #[serde(default)]
    pub iat: Option<i64>,
}

impl Claims {
    /// Build claims for `user_id` valid for `ttl_secs` from now.
    pub fn for_user(user_id: &str, issuer: Option<&str>, ttl_secs: i64) -> Self {
        let now = chrono::Utc::now().timestamp();
        Self {
            sub: user_id.to_string(),
            iss: issuer.map(str::to_string),
            exp: now + ttl_secs,
            iat: Some(now),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_claims_for_user() {
        let claims = Claims::for_user("alice", Some("chathub"), 60);
        assert_eq!(claims.sub, "alice");
        assert_eq!(claims.iss.as_deref(), Some("chathub"));
        let iat = claims.iat.unwrap();
        assert_eq!(claims.exp - iat, 60);
    }

    #[test]
    fn test_claims_deserialize_with_missing_optional_fields() {
        let claims: Claims = serde_json::from_str(r#"{"sub":"u1","exp":10}"#).unwrap();
        assert_eq!(claims.sub, "u1");
        assert!(claims.iss.is_none());
        assert!(claims.iat.is_none());
    }
}
