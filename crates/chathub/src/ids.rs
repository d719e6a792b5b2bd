//! Identifier newtypes shared across the crate.

use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Create an identifier from any string-like value.
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            /// Borrow the identifier as a string slice.
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

string_id!(
    /// Opaque identifier of an authenticated user (the JWT `sub`).
    UserId
);

string_id!(
    /// Stable identifier of a conversation.
    ConversationId
);

impl ConversationId {
    /// Generate a fresh random conversation identifier.
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_serialize_as_plain_strings() {
        let user = UserId::from("alice");
        assert_eq!(serde_json::to_string(&user).unwrap(), "\"alice\"");

        let conv: ConversationId = serde_json::from_str("\"c1\"").unwrap();
        assert_eq!(conv.as_str(), "c1");
    }

    #[test]
    fn test_generated_conversation_ids_are_unique() {
        assert_ne!(ConversationId::generate(), ConversationId::generate());
    }
}
