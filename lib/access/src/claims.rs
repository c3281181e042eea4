//! Decoded ID-token claims.
//!
//! Providers put arbitrary JSON in their tokens, so claims are kept as a
//! string-keyed map of [`ClaimValue`]. The map survives session persistence
//! unchanged, which keeps custom claims available after login.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::AuthenticationError;

/// The standard subject claim, used when the configured claim is absent.
pub const SUBJECT_CLAIM: &str = "sub";

/// A single claim value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ClaimValue {
    Null,
    Bool(bool),
    Number(serde_json::Number),
    String(String),
    Array(Vec<ClaimValue>),
    Object(BTreeMap<String, ClaimValue>),
}

impl ClaimValue {
    /// Returns the value if it is a string.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }
}

/// The full claim set of a verified token.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Claims(BTreeMap<String, ClaimValue>);

impl Claims {
    /// Creates a claim set from its entries.
    #[must_use]
    pub fn new(entries: BTreeMap<String, ClaimValue>) -> Self {
        Self(entries)
    }

    /// Decodes the payload segment of a compact JWT.
    ///
    /// This does not check the signature; callers must only pass tokens that
    /// the provider verifier has already accepted.
    pub fn from_jwt_payload(jwt: &str) -> Result<Self, AuthenticationError> {
        let mut parts = jwt.split('.');
        let payload = match (parts.next(), parts.next(), parts.next(), parts.next()) {
            (Some(_), Some(payload), Some(_), None) => payload,
            _ => {
                return Err(AuthenticationError::InvalidClaims {
                    reason: "token is not a compact JWT".to_string(),
                });
            }
        };

        let bytes = URL_SAFE_NO_PAD
            .decode(payload.trim_end_matches('='))
            .map_err(|e| AuthenticationError::InvalidClaims {
                reason: format!("payload is not base64url: {e}"),
            })?;

        serde_json::from_slice(&bytes).map_err(|e| AuthenticationError::InvalidClaims {
            reason: format!("payload is not a JSON object: {e}"),
        })
    }

    /// Returns a claim by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&ClaimValue> {
        self.0.get(name)
    }

    /// Returns a claim by name if it holds a non-empty string.
    #[must_use]
    pub fn get_str(&self, name: &str) -> Option<&str> {
        self.get(name)
            .and_then(ClaimValue::as_str)
            .filter(|s| !s.is_empty())
    }

    /// Resolves the user id: the configured claim first, then `sub`.
    ///
    /// The returned id is never empty.
    pub fn resolve_user_id(&self, claim: &str) -> Result<String, AuthenticationError> {
        if let Some(user_id) = self.get_str(claim) {
            return Ok(user_id.to_string());
        }

        tracing::debug!(claim, "user id claim not present, falling back to sub");
        self.get_str(SUBJECT_CLAIM)
            .map(str::to_string)
            .ok_or_else(|| AuthenticationError::MissingUserId {
                claim: claim.to_string(),
            })
    }

    /// Returns the number of claims.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns true if there are no claims.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}
