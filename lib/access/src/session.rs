//! Authenticated browser sessions.
//!
//! A session is created once the provider's ID token has been verified and
//! is then read on every cookie-authenticated request. Sessions are never
//! patched in place: a login writes a whole new record, a logout deletes it.

use authservice_core::SessionId;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::claims::Claims;
use crate::error::AuthenticationError;

/// OAuth2 tokens issued alongside the ID token, kept for revocation.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenSet {
    access_token: String,
    refresh_token: Option<String>,
    expires_at: Option<DateTime<Utc>>,
}

impl TokenSet {
    /// Creates a token set.
    #[must_use]
    pub fn new(
        access_token: String,
        refresh_token: Option<String>,
        expires_at: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            access_token,
            refresh_token,
            expires_at,
        }
    }

    /// Returns the access token.
    #[must_use]
    pub fn access_token(&self) -> &str {
        &self.access_token
    }

    /// Returns the refresh token, if the provider issued one.
    #[must_use]
    pub fn refresh_token(&self) -> Option<&str> {
        self.refresh_token.as_deref()
    }

    /// Returns when the access token expires, if known.
    #[must_use]
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.expires_at
    }
}

impl std::fmt::Debug for TokenSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenSet")
            .field("refresh_token", &self.refresh_token.is_some())
            .field("expires_at", &self.expires_at)
            .finish_non_exhaustive()
    }
}

/// An authenticated session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    id: SessionId,
    user_id: String,
    claims: Claims,
    id_token: String,
    tokens: TokenSet,
    created_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
}

impl Session {
    /// Creates a session valid for `max_age`.
    ///
    /// Fails if `user_id` is empty: such a session must never be stored.
    pub fn new(
        id: SessionId,
        user_id: String,
        claims: Claims,
        id_token: String,
        tokens: TokenSet,
        max_age: Duration,
    ) -> Result<Self, AuthenticationError> {
        if user_id.is_empty() {
            return Err(AuthenticationError::MissingUserId {
                claim: crate::claims::SUBJECT_CLAIM.to_string(),
            });
        }

        let now = Utc::now();
        Ok(Self {
            id,
            user_id,
            claims,
            id_token,
            tokens,
            created_at: now,
            expires_at: expiry_after(now, max_age),
        })
    }

    /// Returns the session ID.
    #[must_use]
    pub fn id(&self) -> &SessionId {
        &self.id
    }

    /// Returns the resolved user id.
    #[must_use]
    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    /// Returns the full claim set of the ID token.
    #[must_use]
    pub fn claims(&self) -> &Claims {
        &self.claims
    }

    /// Returns the raw ID token.
    #[must_use]
    pub fn id_token(&self) -> &str {
        &self.id_token
    }

    /// Returns the OAuth2 tokens.
    #[must_use]
    pub fn tokens(&self) -> &TokenSet {
        &self.tokens
    }

    /// Returns when the session was created.
    #[must_use]
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Returns when the session expires.
    #[must_use]
    pub fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }

    /// Returns true if the session has expired.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        Utc::now() >= self.expires_at
    }
}

/// `now + ttl`, clamped to the latest representable instant.
pub(crate) fn expiry_after(now: DateTime<Utc>, ttl: Duration) -> DateTime<Utc> {
    now.checked_add_signed(ttl).unwrap_or(DateTime::<Utc>::MAX_UTC)
}
