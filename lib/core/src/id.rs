//! Opaque random identifiers.
//!
//! Session and login-state ids are bearer secrets: whoever holds one can
//! resume the session or complete the login it names. They are drawn from
//! the operating system CSPRNG (256 bits) and encoded as unpadded base64url,
//! so they are safe in cookies and query strings.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Number of random bytes behind every generated identifier.
const SECRET_BYTES: usize = 32;

/// Error returned when the operating system cannot supply randomness.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntropyError {
    /// The reason reported by the platform.
    pub reason: String,
}

impl fmt::Display for EntropyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "failed to gather randomness: {}", self.reason)
    }
}

impl std::error::Error for EntropyError {}

/// Returns a fresh 256-bit random value encoded as base64url without padding.
pub fn random_secret() -> Result<String, EntropyError> {
    let mut bytes = [0u8; SECRET_BYTES];
    getrandom::fill(&mut bytes).map_err(|e| EntropyError {
        reason: e.to_string(),
    })?;
    Ok(URL_SAFE_NO_PAD.encode(bytes))
}

/// Macro to generate an opaque random identifier type.
macro_rules! define_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Generates a new identifier from the OS random source.
            pub fn generate() -> Result<Self, EntropyError> {
                random_secret().map(Self)
            }

            /// Wraps an identifier received from a client or a store.
            #[must_use]
            pub fn new(id: String) -> Self {
                Self(id)
            }

            /// Returns the identifier as a string slice.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// Returns true if the identifier is empty.
            #[must_use]
            pub fn is_empty(&self) -> bool {
                self.0.is_empty()
            }
        }

        // Identifiers are credentials; keep them out of debug output.
        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!(stringify!($name), "(..)"))
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }
    };
}

define_id!(
    /// Identifier of an authenticated browser session, carried in the session cookie.
    SessionId
);

define_id!(
    /// Identifier of a pending login, sent to the provider as the OAuth2 `state`.
    StateId
);
