//! Branded ID newtypes for type safety.
//!
//! Every identity the bridge juggles is a distinct newtype around `String`:
//! agent/connection addresses, transport session keys and dialogue
//! reference nonces. Generated IDs are UUID v7 (time-ordered) via
//! [`uuid::Uuid::now_v7`].

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Generate a new UUID v7 string (time-ordered).
fn new_v7() -> String {
    Uuid::now_v7().to_string()
}

macro_rules! branded_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Return the inner string as a slice.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// Consume self and return the inner `String`.
            #[must_use]
            pub fn into_inner(self) -> String {
                self.0
            }
        }

        impl std::ops::Deref for $name {
            type Target = str;
            fn deref(&self) -> &str {
                &self.0
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_owned())
            }
        }

        impl From<$name> for String {
            fn from(id: $name) -> Self {
                id.0
            }
        }
    };
}

macro_rules! generated_id {
    ($name:ident) => {
        impl $name {
            /// Create a new random ID (UUID v7, time-ordered).
            #[must_use]
            pub fn new() -> Self {
                Self(new_v7())
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }
    };
}

branded_id! {
    /// Address of a message endpoint: the bridge's connection id or the
    /// consumer's skill id (e.g. `"relay/websocket_server:0.1.0"`).
    Address
}

branded_id! {
    /// Key of one live transport session (a socket-multiplexed `sid` or the
    /// string form of an upgrade request's identity).
    SessionKey
}

branded_id! {
    /// One half of a dialogue reference, chosen by the side that owns it.
    DialogueNonce
}

generated_id!(SessionKey);
generated_id!(DialogueNonce);

impl DialogueNonce {
    /// The empty nonce used for the responder half of an incomplete reference.
    #[must_use]
    pub fn empty() -> Self {
        Self(String::new())
    }

    /// Whether this nonce has not been assigned yet.
    #[must_use]
    pub fn is_unset(&self) -> bool {
        self.0.is_empty()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
