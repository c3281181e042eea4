//! The seam between the authentication handlers and the identity provider.

use async_trait::async_trait;
use authservice_access::{Claims, PendingLoginState, TokenSet};
use axum::http::StatusCode;

/// Tokens returned by the provider's token endpoint.
pub struct TokenGrant {
    /// OAuth2 access/refresh tokens.
    pub tokens: TokenSet,
    /// The raw ID token, if the provider included one.
    pub id_token: Option<String>,
}

/// Operations the authentication handlers need from an OIDC provider.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Builds the authorization URL for a pending login.
    fn authorization_url(&self, state: &PendingLoginState) -> Result<String, ProviderError>;

    /// Exchanges an authorization code for tokens.
    async fn exchange_code(
        &self,
        code: &str,
        state: &PendingLoginState,
    ) -> Result<TokenGrant, ProviderError>;

    /// Verifies an ID token issued to this client and returns its claims.
    ///
    /// `nonce` is checked when given; bearer tokens are verified without one.
    async fn verify_id_token(&self, raw: &str, nonce: Option<&str>)
    -> Result<Claims, ProviderError>;

    /// Returns true if the provider advertises a revocation endpoint.
    fn supports_revocation(&self) -> bool;

    /// Revokes the refresh and access tokens.
    async fn revoke_tokens(&self, tokens: &TokenSet) -> Result<(), ProviderError>;
}

/// OIDC-related errors.
#[derive(Debug)]
pub enum ProviderError {
    /// Configuration error (invalid URLs, unreadable CA bundle, etc.)
    Configuration(String),
    /// Failed to discover provider metadata.
    Discovery(String),
    /// Token exchange failed.
    TokenExchange(String),
    /// Token validation failed.
    TokenValidation(String),
    /// The revocation request could not be sent.
    Revocation(String),
    /// The revocation endpoint answered with a non-success status.
    RevocationRejected { status: StatusCode },
}

impl ProviderError {
    /// Returns true if the provider asked the caller to retry later.
    #[must_use]
    pub fn is_temporarily_unavailable(&self) -> bool {
        matches!(
            self,
            Self::RevocationRejected {
                status: StatusCode::SERVICE_UNAVAILABLE
            }
        )
    }
}

impl std::fmt::Display for ProviderError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Configuration(msg) => write!(f, "OIDC configuration error: {}", msg),
            Self::Discovery(msg) => write!(f, "OIDC discovery error: {}", msg),
            Self::TokenExchange(msg) => write!(f, "OIDC token exchange error: {}", msg),
            Self::TokenValidation(msg) => write!(f, "OIDC token validation error: {}", msg),
            Self::Revocation(msg) => write!(f, "token revocation error: {}", msg),
            Self::RevocationRejected { status } => {
                write!(f, "token revocation rejected with status {}", status)
            }
        }
    }
}

impl std::error::Error for ProviderError {}
