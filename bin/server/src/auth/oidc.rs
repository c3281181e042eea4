//! OIDC client implementation using the openidconnect crate.

use async_trait::async_trait;
use authservice_access::{Claims, OidcConfig, PendingLoginState, TokenSet, oidc::OPENID_SCOPE};
use chrono::Utc;
use openidconnect::core::{
    CoreAuthDisplay, CoreAuthPrompt, CoreAuthenticationFlow, CoreClaimName, CoreClaimType,
    CoreClient, CoreClientAuthMethod, CoreGrantType, CoreIdToken, CoreJsonWebKey, CoreJsonWebKeySet,
    CoreJweContentEncryptionAlgorithm, CoreJweKeyManagementAlgorithm, CoreResponseMode,
    CoreResponseType, CoreSubjectIdentifierType,
};
use openidconnect::{
    AdditionalProviderMetadata, AuthUrl, AuthorizationCode, ClaimsVerificationError, ClientId,
    ClientSecret, CsrfToken, IssuerUrl, Nonce, OAuth2TokenResponse, PkceCodeChallenge,
    PkceCodeVerifier, ProviderMetadata, RedirectUrl, Scope, SignatureVerificationError,
};
use serde::{Deserialize, Serialize};
use std::sync::{Mutex, PoisonError, RwLock};
use std::time::{Duration, Instant};

use super::provider::{IdentityProvider, ProviderError, TokenGrant};

/// Provider metadata fields beyond the core discovery document.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct RevocationEndpointMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    revocation_endpoint: Option<String>,
}

impl AdditionalProviderMetadata for RevocationEndpointMetadata {}

/// Discovery document with an optional `revocation_endpoint`.
type GatewayProviderMetadata = ProviderMetadata<
    RevocationEndpointMetadata,
    CoreAuthDisplay,
    CoreClientAuthMethod,
    CoreClaimName,
    CoreClaimType,
    CoreGrantType,
    CoreJweContentEncryptionAlgorithm,
    CoreJweKeyManagementAlgorithm,
    CoreJsonWebKey,
    CoreResponseMode,
    CoreResponseType,
    CoreSubjectIdentifierType,
>;

/// Minimum time between two signing key reloads.
pub const KEY_REFRESH_INTERVAL: Duration = Duration::from_secs(30);

/// OIDC client for authenticating users.
///
/// Signing keys come from discovery and are reloaded when a token names a
/// key the provider has not published before.
pub struct OidcClient {
    provider_metadata: RwLock<GatewayProviderMetadata>,
    last_key_refresh: Mutex<Option<Instant>>,
    client_id: ClientId,
    client_secret: ClientSecret,
    redirect_url: RedirectUrl,
    config: OidcConfig,
    http_client: reqwest::Client,
}

/// Builds the outbound HTTP client, trusting `ca_bundle` in addition to the
/// default roots.
pub fn http_client(ca_bundle: Option<&[u8]>) -> Result<reqwest::Client, ProviderError> {
    let mut builder = reqwest::Client::builder().redirect(reqwest::redirect::Policy::none());

    if let Some(pem) = ca_bundle {
        let certificates = reqwest::Certificate::from_pem_bundle(pem)
            .map_err(|e| ProviderError::Configuration(format!("invalid CA bundle: {}", e)))?;
        for certificate in certificates {
            builder = builder.add_root_certificate(certificate);
        }
    }

    builder
        .build()
        .map_err(|e| ProviderError::Configuration(format!("failed to create HTTP client: {}", e)))
}

impl OidcClient {
    /// Creates a new OIDC client by discovering the provider metadata.
    pub async fn discover(
        config: OidcConfig,
        http_client: reqwest::Client,
    ) -> Result<Self, ProviderError> {
        let issuer_url = IssuerUrl::new(config.issuer_url().to_string())
            .map_err(|e| ProviderError::Configuration(format!("invalid issuer URL: {}", e)))?;

        let redirect_url = RedirectUrl::new(config.redirect_uri().to_string())
            .map_err(|e| ProviderError::Configuration(format!("invalid redirect URI: {}", e)))?;

        let override_auth_url = config
            .auth_url()
            .map(|url| AuthUrl::new(url.to_string()))
            .transpose()
            .map_err(|e| ProviderError::Configuration(format!("invalid auth URL: {}", e)))?;

        let mut provider_metadata =
            GatewayProviderMetadata::discover_async(issuer_url, &http_client)
                .await
                .map_err(|e| ProviderError::Discovery(format!("failed to discover provider: {}", e)))?;

        if let Some(auth_url) = override_auth_url {
            provider_metadata = provider_metadata.set_authorization_endpoint(auth_url);
        }

        let client_id = ClientId::new(config.client_id().to_string());
        let client_secret = ClientSecret::new(config.client_secret().to_string());

        Ok(Self {
            provider_metadata: RwLock::new(provider_metadata),
            last_key_refresh: Mutex::new(None),
            client_id,
            client_secret,
            redirect_url,
            config,
            http_client,
        })
    }

    fn metadata(&self) -> GatewayProviderMetadata {
        self.provider_metadata
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn revocation_endpoint(&self) -> Option<String> {
        self.provider_metadata
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .additional_metadata()
            .revocation_endpoint
            .clone()
            .filter(|url| !url.is_empty())
    }

    /// Fetches the provider's key set again, at most once per
    /// [`KEY_REFRESH_INTERVAL`]. Returns true if new keys were installed.
    async fn refresh_signing_keys(&self) -> bool {
        {
            let mut last = self
                .last_key_refresh
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            if last.is_some_and(|at| at.elapsed() < KEY_REFRESH_INTERVAL) {
                return false;
            }
            *last = Some(Instant::now());
        }

        let jwks_uri = self.metadata().jwks_uri().clone();
        match CoreJsonWebKeySet::fetch_async(&jwks_uri, &self.http_client).await {
            Ok(jwks) => {
                let mut metadata = self
                    .provider_metadata
                    .write()
                    .unwrap_or_else(PoisonError::into_inner);
                *metadata = metadata.clone().set_jwks(jwks);
                tracing::info!("reloaded provider signing keys");
                true
            }
            Err(e) => {
                tracing::warn!(error = %e, "couldn't reload provider signing keys");
                false
            }
        }
    }

    fn check_claims(
        &self,
        id_token: &CoreIdToken,
        nonce: Option<&str>,
    ) -> Result<(), ClaimsVerificationError> {
        let client = CoreClient::from_provider_metadata(
            self.metadata(),
            self.client_id.clone(),
            Some(self.client_secret.clone()),
        );
        let verifier = client.id_token_verifier();

        match nonce {
            Some(nonce) => id_token
                .claims(&verifier, &Nonce::new(nonce.to_string()))
                .map(|_| ()),
            None => id_token
                .claims(&verifier, |_: Option<&Nonce>| Ok::<(), String>(()))
                .map(|_| ()),
        }
    }

    async fn revoke_token(
        &self,
        endpoint: &str,
        token: &str,
        hint: &'static str,
    ) -> Result<(), ProviderError> {
        let response = self
            .http_client
            .post(endpoint)
            .basic_auth(self.config.client_id(), Some(self.config.client_secret()))
            .form(&[("token", token), ("token_type_hint", hint)])
            .send()
            .await
            .map_err(|e| ProviderError::Revocation(format!("request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            tracing::debug!(%status, hint, "revocation endpoint rejected token");
            return Err(ProviderError::RevocationRejected { status });
        }

        Ok(())
    }
}

#[async_trait]
impl IdentityProvider for OidcClient {
    fn authorization_url(&self, state: &PendingLoginState) -> Result<String, ProviderError> {
        let client = CoreClient::from_provider_metadata(
            self.metadata(),
            self.client_id.clone(),
            Some(self.client_secret.clone()),
        )
        .set_redirect_uri(self.redirect_url.clone());

        let pkce_challenge = PkceCodeChallenge::from_code_verifier_sha256(&PkceCodeVerifier::new(
            state.pkce_verifier().to_string(),
        ));
        let csrf_token = CsrfToken::new(state.id().as_str().to_string());
        let nonce = Nonce::new(state.nonce().to_string());

        let mut auth_request = client
            .authorize_url(
                CoreAuthenticationFlow::AuthorizationCode,
                move || csrf_token,
                move || nonce,
            )
            .set_pkce_challenge(pkce_challenge)
            .add_prompt(CoreAuthPrompt::SelectAccount);

        // openidconnect always requests `openid` itself
        for scope in self.config.scopes() {
            if scope != OPENID_SCOPE {
                auth_request = auth_request.add_scope(Scope::new(scope.to_string()));
            }
        }

        let (auth_url, _, _) = auth_request.url();
        Ok(auth_url.to_string())
    }

    async fn exchange_code(
        &self,
        code: &str,
        state: &PendingLoginState,
    ) -> Result<TokenGrant, ProviderError> {
        let client = CoreClient::from_provider_metadata(
            self.metadata(),
            self.client_id.clone(),
            Some(self.client_secret.clone()),
        )
        .set_redirect_uri(self.redirect_url.clone());

        let token_response = client
            .exchange_code(AuthorizationCode::new(code.to_string()))
            .map_err(|e| ProviderError::TokenExchange(format!("token endpoint error: {}", e)))?
            .set_pkce_verifier(PkceCodeVerifier::new(state.pkce_verifier().to_string()))
            .request_async(&self.http_client)
            .await
            .map_err(|e| ProviderError::TokenExchange(format!("token exchange failed: {}", e)))?;

        // The raw id_token is easiest to recover from the serialized response.
        let response_json = serde_json::to_value(&token_response).map_err(|e| {
            ProviderError::TokenExchange(format!("failed to serialize token response: {}", e))
        })?;
        let id_token = response_json
            .get("id_token")
            .and_then(|v| v.as_str())
            .map(str::to_string);

        let expires_at = token_response
            .expires_in()
            .and_then(|d| chrono::Duration::from_std(d).ok())
            .map(|d| Utc::now() + d);

        let tokens = TokenSet::new(
            token_response.access_token().secret().clone(),
            token_response.refresh_token().map(|t| t.secret().clone()),
            expires_at,
        );

        Ok(TokenGrant { tokens, id_token })
    }

    async fn verify_id_token(
        &self,
        raw: &str,
        nonce: Option<&str>,
    ) -> Result<Claims, ProviderError> {
        let id_token: CoreIdToken =
            serde_json::from_value(serde_json::Value::String(raw.to_string())).map_err(|e| {
                ProviderError::TokenValidation(format!("malformed ID token: {}", e))
            })?;

        let mut verified = self.check_claims(&id_token, nonce);
        if verified.as_ref().is_err_and(signed_with_unknown_key)
            && self.refresh_signing_keys().await
        {
            verified = self.check_claims(&id_token, nonce);
        }
        verified.map_err(|e| {
            ProviderError::TokenValidation(format!("ID token validation failed: {}", e))
        })?;

        // The typed claims only cover the standard set; decode the verified
        // payload again to keep custom claims.
        Claims::from_jwt_payload(raw)
            .map_err(|e| ProviderError::TokenValidation(format!("unreadable claims: {}", e)))
    }

    fn supports_revocation(&self) -> bool {
        self.revocation_endpoint().is_some()
    }

    async fn revoke_tokens(&self, tokens: &TokenSet) -> Result<(), ProviderError> {
        let Some(endpoint) = self.revocation_endpoint() else {
            return Ok(());
        };

        // Revoking the refresh token first also invalidates derived access
        // tokens at most providers.
        if let Some(refresh_token) = tokens.refresh_token() {
            self.revoke_token(&endpoint, refresh_token, "refresh_token")
                .await?;
        }
        if !tokens.access_token().is_empty() {
            self.revoke_token(&endpoint, tokens.access_token(), "access_token")
                .await?;
        }

        Ok(())
    }
}

fn signed_with_unknown_key(error: &ClaimsVerificationError) -> bool {
    matches!(
        error,
        ClaimsVerificationError::SignatureVerification(SignatureVerificationError::NoMatchingKey)
    )
}
