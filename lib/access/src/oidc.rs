//! OIDC provider and client configuration.
//!
//! Consumed by the server's protocol adapter. The `openid` scope is always
//! requested, whatever the configured scope list says.

use serde::{Deserialize, Serialize};

/// Scope required for an ID token to be issued.
pub const OPENID_SCOPE: &str = "openid";

/// Configuration for the OIDC identity provider and this client.
#[derive(Clone, Serialize, Deserialize)]
pub struct OidcConfig {
    /// Issuer URL used for discovery (e.g., "https://dex.example.com").
    issuer_url: String,
    /// Overrides the discovered authorization endpoint when set.
    #[serde(default)]
    auth_url: Option<String>,
    /// The OAuth2 client ID registered with the provider.
    client_id: String,
    /// The OAuth2 client secret.
    client_secret: String,
    /// The callback URL registered with the provider.
    redirect_uri: String,
    /// Requested scopes, space separated.
    #[serde(default = "default_scopes")]
    scopes: String,
}

fn default_scopes() -> String {
    "openid email profile".to_string()
}

impl OidcConfig {
    /// Creates a configuration with default scopes and no overrides.
    #[must_use]
    pub fn new(
        issuer_url: String,
        client_id: String,
        client_secret: String,
        redirect_uri: String,
    ) -> Self {
        Self {
            issuer_url,
            auth_url: None,
            client_id,
            client_secret,
            redirect_uri,
            scopes: default_scopes(),
        }
    }

    /// Creates a configuration builder for more customization.
    #[must_use]
    pub fn builder(
        issuer_url: String,
        client_id: String,
        client_secret: String,
        redirect_uri: String,
    ) -> OidcConfigBuilder {
        OidcConfigBuilder {
            config: Self::new(issuer_url, client_id, client_secret, redirect_uri),
        }
    }

    /// Returns the issuer URL.
    #[must_use]
    pub fn issuer_url(&self) -> &str {
        &self.issuer_url
    }

    /// Returns the authorization endpoint override, if any.
    #[must_use]
    pub fn auth_url(&self) -> Option<&str> {
        self.auth_url.as_deref().filter(|u| !u.is_empty())
    }

    /// Returns the OAuth2 client ID.
    #[must_use]
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// Returns the OAuth2 client secret.
    #[must_use]
    pub fn client_secret(&self) -> &str {
        &self.client_secret
    }

    /// Returns the OAuth2 redirect URI.
    #[must_use]
    pub fn redirect_uri(&self) -> &str {
        &self.redirect_uri
    }

    /// Returns the scopes to request, always including `openid`.
    #[must_use]
    pub fn scopes(&self) -> Vec<&str> {
        let mut scopes: Vec<&str> = Vec::new();
        for scope in self.scopes.split_whitespace() {
            if !scopes.contains(&scope) {
                scopes.push(scope);
            }
        }
        if !scopes.contains(&OPENID_SCOPE) {
            scopes.push(OPENID_SCOPE);
        }
        scopes
    }
}

impl std::fmt::Debug for OidcConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OidcConfig")
            .field("issuer_url", &self.issuer_url)
            .field("auth_url", &self.auth_url)
            .field("client_id", &self.client_id)
            .field("redirect_uri", &self.redirect_uri)
            .field("scopes", &self.scopes)
            .finish_non_exhaustive()
    }
}

/// Builder for `OidcConfig`.
#[derive(Debug)]
pub struct OidcConfigBuilder {
    config: OidcConfig,
}

impl OidcConfigBuilder {
    /// Sets the scopes to request.
    #[must_use]
    pub fn scopes(mut self, scopes: &str) -> Self {
        self.config.scopes = scopes.to_string();
        self
    }

    /// Overrides the discovered authorization endpoint.
    #[must_use]
    pub fn auth_url(mut self, auth_url: Option<String>) -> Self {
        self.config.auth_url = auth_url;
        self
    }

    /// Builds the `OidcConfig`.
    #[must_use]
    pub fn build(self) -> OidcConfig {
        self.config
    }
}
