//! Pending logins awaiting the provider's redirect.
//!
//! A login attempt is a two-state machine keyed by its [`StateId`]: it is
//! *pending* while a `PendingLoginState` sits in the state store, and it is
//! finished (completed or failed) the moment the callback takes the record
//! out. Taking is destructive, so an id can drive at most one callback.

use authservice_core::{EntropyError, StateId, random_secret};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// CSRF-protecting record for one in-flight login.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingLoginState {
    id: StateId,
    original_url: String,
    nonce: String,
    pkce_verifier: String,
    expires_at: DateTime<Utc>,
}

impl PendingLoginState {
    /// Starts a login that will return the browser to `original_url`.
    pub fn new(original_url: String, ttl: Duration) -> Result<Self, EntropyError> {
        Ok(Self {
            id: StateId::generate()?,
            original_url,
            nonce: random_secret()?,
            pkce_verifier: random_secret()?,
            expires_at: crate::session::expiry_after(Utc::now(), ttl),
        })
    }

    /// Rebuilds a record read back from a store.
    #[must_use]
    pub fn from_parts(
        id: StateId,
        original_url: String,
        nonce: String,
        pkce_verifier: String,
        expires_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            original_url,
            nonce,
            pkce_verifier,
            expires_at,
        }
    }

    /// Returns the id sent to the provider as `state`.
    #[must_use]
    pub fn id(&self) -> &StateId {
        &self.id
    }

    /// Returns the URL the user originally asked for (path and query).
    #[must_use]
    pub fn original_url(&self) -> &str {
        &self.original_url
    }

    /// Returns the nonce the ID token must echo.
    #[must_use]
    pub fn nonce(&self) -> &str {
        &self.nonce
    }

    /// Returns the PKCE code verifier.
    #[must_use]
    pub fn pkce_verifier(&self) -> &str {
        &self.pkce_verifier
    }

    /// Returns when this login attempt stops being accepted.
    #[must_use]
    pub fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }

    /// Returns true once the attempt is too old to complete.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        Utc::now() >= self.expires_at
    }
}

impl std::fmt::Debug for PendingLoginState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingLoginState")
            .field("original_url", &self.original_url)
            .field("expires_at", &self.expires_at)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_state_keeps_original_url() {
        let state =
            PendingLoginState::new("/notebooks?ns=alice&tab=2".to_string(), Duration::minutes(10))
                .expect("state");
        assert_eq!(state.original_url(), "/notebooks?ns=alice&tab=2");
        assert!(!state.is_expired());
        assert!(!state.id().is_empty());
    }

    #[test]
    fn each_attempt_gets_fresh_secrets() {
        let a = PendingLoginState::new("/".to_string(), Duration::minutes(10)).expect("state");
        let b = PendingLoginState::new("/".to_string(), Duration::minutes(10)).expect("state");
        assert_ne!(a.id(), b.id());
        assert_ne!(a.nonce(), b.nonce());
        assert_ne!(a.pkce_verifier(), b.pkce_verifier());
        assert_ne!(a.nonce(), a.pkce_verifier());
    }

    #[test]
    fn huge_ttl_does_not_overflow() {
        let state = PendingLoginState::new("/".to_string(), Duration::days(365 * 1_000_000))
            .expect("state");
        assert_eq!(state.expires_at(), DateTime::<Utc>::MAX_UTC);
    }

    #[test]
    fn expired_attempt() {
        let state = PendingLoginState::new("/".to_string(), Duration::seconds(-1)).expect("state");
        assert!(state.is_expired());
    }

    #[test]
    fn debug_hides_secrets() {
        let state = PendingLoginState::new("/".to_string(), Duration::minutes(1)).expect("state");
        let debug = format!("{state:?}");
        assert!(!debug.contains(state.nonce()));
        assert!(!debug.contains(state.pkce_verifier()));
        assert!(!debug.contains(state.id().as_str()));
    }
}
