//! Authentication routes: request interception, OIDC callback and logout.

use authservice_access::{AuthenticationError, PendingLoginState, Session, StoreError};
use authservice_core::{SessionId, StateId};
use axum::{
    extract::{OriginalUri, Query, State},
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::{IntoResponse, Redirect, Response},
};
use axum_extra::extract::cookie::{Cookie, SameSite, SignedCookieJar};
use rootcause::Report;
use serde::Deserialize;

use super::{AuthSettings, GatewayState, middleware::NOT_READY_BODY, provider::ProviderError};

/// Session cookie name.
pub const SESSION_COOKIE: &str = "authservice_session";

/// Query parameters for the OIDC callback.
#[derive(Debug, Deserialize)]
pub struct CallbackQuery {
    #[serde(default)]
    code: String,
    #[serde(default)]
    state: String,
}

/// Strips an optional `Bearer ` scheme from a credential header value.
fn bearer_token(value: &str) -> &str {
    let value = value.trim();
    value.strip_prefix("Bearer ").unwrap_or(value)
}

/// Builds the 200 response carrying the identity headers.
fn identified(settings: &AuthSettings, user_id: &str, token: &str) -> Result<Response, AuthError> {
    let mut headers = HeaderMap::new();

    let user_value = settings.user_id.header_value(user_id);
    headers.insert(
        settings.user_header.clone(),
        HeaderValue::from_bytes(user_value.as_bytes()).map_err(|_| {
            AuthError::Identity(AuthenticationError::InvalidClaims {
                reason: "user id is not a valid header value".to_string(),
            })
        })?,
    );

    if let Some(token_header) = &settings.token_header {
        let value = HeaderValue::from_str(token).map_err(|_| {
            AuthError::Identity(AuthenticationError::InvalidClaims {
                reason: "token is not a valid header value".to_string(),
            })
        })?;
        headers.insert(token_header.clone(), value);
    }

    Ok((StatusCode::OK, headers, "OK").into_response())
}

fn found(location: String) -> Response {
    (StatusCode::FOUND, [(header::LOCATION, location)]).into_response()
}

/// Decides whether a request may reach the protected service.
///
/// In order: a bearer token is verified on its own, then the session cookie
/// is looked up, and otherwise a login is started by redirecting to the
/// provider with a freshly stored pending login.
pub async fn authenticate(
    State(gateway): State<GatewayState>,
    OriginalUri(uri): OriginalUri,
    headers: HeaderMap,
    jar: SignedCookieJar,
) -> Result<Response, AuthError> {
    let app = gateway.app()?;
    let settings = &app.settings;

    let bearer = headers
        .get(&settings.bearer_header)
        .and_then(|v| v.to_str().ok())
        .map(bearer_token)
        .filter(|t| !t.is_empty());

    if let Some(token) = bearer {
        let claims = app
            .provider
            .verify_id_token(token, None)
            .await
            .map_err(AuthError::Provider)?;
        let user_id = claims
            .resolve_user_id(&settings.user_id.claim)
            .map_err(AuthError::Identity)?;

        tracing::debug!(user_id = %user_id, "bearer token verified");
        return identified(settings, &user_id, token);
    }

    if let Some(cookie) = jar.get(SESSION_COOKIE) {
        let session_id = SessionId::new(cookie.value().to_string());
        let session = app
            .sessions
            .get_session(&session_id)
            .await
            .map_err(AuthError::Store)?;

        if let Some(session) = session {
            return identified(settings, session.user_id(), session.id_token());
        }
    }

    let original_url = uri
        .path_and_query()
        .map(|pq| pq.as_str().to_string())
        .unwrap_or_else(|| "/".to_string());

    let pending = PendingLoginState::new(original_url, settings.state_ttl)
        .map_err(|e| AuthError::Store(StoreError::from(e).into()))?;
    app.states
        .save_state(&pending)
        .await
        .map_err(AuthError::Store)?;

    let auth_url = app
        .provider
        .authorization_url(&pending)
        .map_err(AuthError::Provider)?;

    tracing::debug!(original_url = pending.original_url(), "redirecting to provider for login");
    Ok(found(auth_url))
}

/// Handles the OIDC callback after the user authenticates with the identity provider.
pub async fn callback(
    State(gateway): State<GatewayState>,
    Query(query): Query<CallbackQuery>,
    jar: SignedCookieJar,
) -> Result<Response, AuthError> {
    let app = gateway.app()?;
    let settings = &app.settings;

    if query.code.is_empty() {
        return Err(AuthError::MissingParameter("code"));
    }
    if query.state.is_empty() {
        return Err(AuthError::MissingParameter("state"));
    }

    // Taking the state consumes it, so a replayed callback finds nothing.
    let pending = app
        .states
        .take_state(&StateId::new(query.state))
        .await
        .map_err(AuthError::Store)?
        .ok_or(AuthError::UnknownState)?;

    let grant = app
        .provider
        .exchange_code(&query.code, &pending)
        .await
        .map_err(AuthError::Provider)?;

    let id_token = grant
        .id_token
        .filter(|t| !t.is_empty())
        .ok_or(AuthError::MissingIdToken)?;

    let claims = app
        .provider
        .verify_id_token(&id_token, Some(pending.nonce()))
        .await
        .map_err(AuthError::Provider)?;

    let user_id = claims
        .resolve_user_id(&settings.user_id.claim)
        .map_err(AuthError::Identity)?;

    let session_id =
        SessionId::generate().map_err(|e| AuthError::Store(StoreError::from(e).into()))?;
    let session = Session::new(
        session_id,
        user_id,
        claims,
        id_token,
        grant.tokens,
        settings.session_max_age,
    )
    .map_err(AuthError::Identity)?;

    // The user is verified at this point; a failed write only costs them a
    // second login, so the redirect still happens.
    let jar = match app.sessions.save_session(&session).await {
        Ok(()) => {
            let cookie = Cookie::build((SESSION_COOKIE, session.id().as_str().to_string()))
                .path("/")
                .http_only(true)
                .secure(true)
                .same_site(SameSite::Lax)
                .max_age(time::Duration::seconds(
                    settings.session_max_age.num_seconds(),
                ));
            jar.add(cookie)
        }
        Err(e) => {
            tracing::error!(error = %e, user_id = session.user_id(), "couldn't create user session");
            jar
        }
    };

    let destination = settings
        .after_login_url
        .clone()
        .unwrap_or_else(|| pending.original_url().to_string());

    tracing::info!(user_id = session.user_id(), "login validated with ID token, redirecting");
    Ok((jar, found(destination)).into_response())
}

/// Logs out the user by revoking their tokens and deleting their session.
pub async fn logout(
    State(gateway): State<GatewayState>,
    jar: SignedCookieJar,
) -> Result<Response, AuthError> {
    let app = gateway.app()?;

    let Some(cookie) = jar.get(SESSION_COOKIE) else {
        tracing::warn!("logout request doesn't have a valid session");
        return Ok(Redirect::to("/").into_response());
    };
    let session_id = SessionId::new(cookie.value().to_string());

    let session = match app.sessions.get_session(&session_id).await {
        Ok(Some(session)) => session,
        Ok(None) => {
            tracing::warn!("logout request doesn't have a valid session");
            return Ok(Redirect::to("/").into_response());
        }
        Err(e) => {
            tracing::error!(error = %e, "couldn't get user session");
            return Ok(Redirect::to("/").into_response());
        }
    };

    let revoked = if app.provider.supports_revocation() {
        app.provider.revoke_tokens(session.tokens()).await
    } else {
        tracing::debug!("provider has no revocation endpoint, skipping token revocation");
        Ok(())
    };

    // The local session goes away whatever the provider said. A record that
    // survives a failed delete still validates, so that is reported as an error.
    let deleted = app.sessions.delete_session(&session_id).await;
    let jar = jar.remove(Cookie::build(SESSION_COOKIE).path("/"));

    match (revoked, deleted) {
        (Ok(()), Ok(())) => {
            tracing::info!(user_id = session.user_id(), "successful logout");
            Ok((jar, Redirect::to("/")).into_response())
        }
        (Err(e), deleted) => {
            if let Err(store) = deleted {
                tracing::error!(error = %store, user_id = session.user_id(), "couldn't delete user session");
            }
            Ok((jar, AuthError::Revocation(e)).into_response())
        }
        (Ok(()), Err(store)) => Ok((jar, AuthError::Store(store)).into_response()),
    }
}

/// Authentication errors.
#[derive(Debug)]
pub enum AuthError {
    /// Setup has not finished yet.
    NotReady,
    /// A required callback query parameter is missing or empty.
    MissingParameter(&'static str),
    /// The callback's state id is unknown, expired or already used.
    UnknownState,
    /// The provider rejected or failed a login step.
    Provider(ProviderError),
    /// The token response carried no ID token.
    MissingIdToken,
    /// The verified claims don't identify a user.
    Identity(AuthenticationError),
    /// A session or login-state store failed.
    Store(Report<StoreError>),
    /// Token revocation at logout failed.
    Revocation(ProviderError),
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            Self::NotReady => (StatusCode::SERVICE_UNAVAILABLE, NOT_READY_BODY.to_string()),
            Self::MissingParameter(name) => {
                tracing::error!(parameter = name, "missing url parameter");
                (
                    StatusCode::BAD_REQUEST,
                    format!("Missing url parameter: {}", name),
                )
            }
            Self::UnknownState => {
                tracing::warn!("callback state is unknown, expired or already used");
                (
                    StatusCode::BAD_REQUEST,
                    "Unknown or expired login state.".to_string(),
                )
            }
            Self::Provider(e) => {
                tracing::error!(error = %e, "OIDC provider error");
                let message = match e {
                    ProviderError::TokenExchange(_) => {
                        "Failed to exchange authorization code with token."
                    }
                    ProviderError::TokenValidation(_) => "Unable to verify ID token.",
                    _ => "Authentication failed.",
                };
                (StatusCode::INTERNAL_SERVER_ERROR, message.to_string())
            }
            Self::MissingIdToken => {
                tracing::error!("no id_token field available");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "No id_token field in OAuth 2.0 token.".to_string(),
                )
            }
            Self::Identity(e) => {
                tracing::error!(error = %e, "unable to identify user");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Not able to identify user.".to_string(),
                )
            }
            Self::Store(e) => {
                tracing::error!(error = %e, "store error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
            Self::Revocation(e) => {
                tracing::error!(error = %e, "error revoking tokens");
                // 503 is passed through so the client knows to retry.
                let status = if e.is_temporarily_unavailable() {
                    StatusCode::SERVICE_UNAVAILABLE
                } else {
                    StatusCode::INTERNAL_SERVER_ERROR
                };
                (
                    status,
                    "Failed to revoke access/refresh tokens, please try again".to_string(),
                )
            }
        };

        (status, message).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{AppState, GatewayState, IdentityProvider, TokenGrant, router};
    use async_trait::async_trait;
    use authservice_access::{
        AccessPolicy, Claims, MemoryStore, Readiness, SessionStore, StateStore, TokenSet,
        UserIdOptions,
    };
    use axum::{
        Router,
        body::{Body, to_bytes},
        http::{Method, Request},
    };
    use axum_extra::extract::cookie::Key;
    use serde_json::json;
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};
    use tower::ServiceExt;

    const PREFIX: &str = "accounts.google.com:";

    /// Provider that knows a fixed set of tokens and authorization codes.
    #[derive(Default)]
    struct FakeProvider {
        /// raw token -> claims
        tokens: HashMap<String, Claims>,
        /// code -> id_token in the token response
        codes: HashMap<String, Option<String>>,
        /// None: no revocation endpoint
        revocation: Option<Result<(), StatusCode>>,
        nonces: Mutex<Vec<Option<String>>>,
        revoked: Mutex<Vec<String>>,
    }

    impl FakeProvider {
        fn with_token(mut self, raw: &str, claims: serde_json::Value) -> Self {
            let claims = serde_json::from_value(claims).unwrap();
            self.tokens.insert(raw.to_string(), claims);
            self
        }

        fn with_code(mut self, code: &str, id_token: Option<&str>) -> Self {
            self.codes
                .insert(code.to_string(), id_token.map(str::to_string));
            self
        }

        fn with_revocation(mut self, result: Result<(), StatusCode>) -> Self {
            self.revocation = Some(result);
            self
        }
    }

    #[async_trait]
    impl IdentityProvider for FakeProvider {
        fn authorization_url(&self, state: &PendingLoginState) -> Result<String, ProviderError> {
            Ok(format!(
                "https://idp.example.com/auth?state={}&prompt=select_account",
                state.id().as_str()
            ))
        }

        async fn exchange_code(
            &self,
            code: &str,
            _state: &PendingLoginState,
        ) -> Result<TokenGrant, ProviderError> {
            let id_token = self
                .codes
                .get(code)
                .cloned()
                .ok_or_else(|| ProviderError::TokenExchange("invalid_grant".to_string()))?;
            Ok(TokenGrant {
                tokens: TokenSet::new(
                    format!("access-{code}"),
                    Some(format!("refresh-{code}")),
                    None,
                ),
                id_token,
            })
        }

        async fn verify_id_token(
            &self,
            raw: &str,
            nonce: Option<&str>,
        ) -> Result<Claims, ProviderError> {
            self.nonces.lock().unwrap().push(nonce.map(str::to_string));
            self.tokens
                .get(raw)
                .cloned()
                .ok_or_else(|| ProviderError::TokenValidation("bad signature".to_string()))
        }

        fn supports_revocation(&self) -> bool {
            self.revocation.is_some()
        }

        async fn revoke_tokens(&self, tokens: &TokenSet) -> Result<(), ProviderError> {
            self.revoked
                .lock()
                .unwrap()
                .push(tokens.access_token().to_string());
            match self.revocation {
                Some(Err(status)) => Err(ProviderError::RevocationRejected { status }),
                _ => Ok(()),
            }
        }
    }

    /// Session store whose writes always fail.
    struct BrokenSessions;

    #[async_trait]
    impl SessionStore for BrokenSessions {
        async fn get_session(&self, _: &SessionId) -> Result<Option<Session>, Report<StoreError>> {
            Ok(None)
        }

        async fn save_session(&self, _: &Session) -> Result<(), Report<StoreError>> {
            Err(StoreError::Backend {
                operation: "save session",
                details: "disk full".to_string(),
            }
            .into())
        }

        async fn delete_session(&self, _: &SessionId) -> Result<(), Report<StoreError>> {
            Ok(())
        }
    }

    /// Session store that keeps working except for deletes.
    #[derive(Default)]
    struct UndeletableSessions(MemoryStore);

    #[async_trait]
    impl SessionStore for UndeletableSessions {
        async fn get_session(&self, id: &SessionId) -> Result<Option<Session>, Report<StoreError>> {
            self.0.get_session(id).await
        }

        async fn save_session(&self, session: &Session) -> Result<(), Report<StoreError>> {
            self.0.save_session(session).await
        }

        async fn delete_session(&self, _: &SessionId) -> Result<(), Report<StoreError>> {
            Err(StoreError::Backend {
                operation: "delete session",
                details: "connection reset".to_string(),
            }
            .into())
        }
    }

    /// State store whose writes always fail.
    struct BrokenStates;

    #[async_trait]
    impl StateStore for BrokenStates {
        async fn save_state(&self, _: &PendingLoginState) -> Result<(), Report<StoreError>> {
            Err(StoreError::Backend {
                operation: "save state",
                details: "connection refused".to_string(),
            }
            .into())
        }

        async fn take_state(
            &self,
            _: &StateId,
        ) -> Result<Option<PendingLoginState>, Report<StoreError>> {
            Ok(None)
        }
    }

    fn settings() -> AuthSettings {
        let options = UserIdOptions {
            prefix: PREFIX.to_string(),
            ..UserIdOptions::default()
        };
        AuthSettings::new(options, "Authorization").unwrap()
    }

    fn default_provider() -> FakeProvider {
        FakeProvider::default()
            .with_token(
                "alice-id-token",
                json!({"sub": "CgVhbGljZQ", "email": "alice@example.com", "groups": ["admins"]}),
            )
            .with_code("good-code", Some("alice-id-token"))
    }

    struct Harness {
        app: Router,
        provider: Arc<FakeProvider>,
    }

    fn harness_with(
        provider: FakeProvider,
        settings: AuthSettings,
        sessions: Option<Arc<dyn SessionStore>>,
        states: Option<Arc<dyn StateStore>>,
    ) -> Harness {
        let store = Arc::new(MemoryStore::new());
        let provider = Arc::new(provider);
        let gateway = GatewayState::new(
            Arc::new(Readiness::new()),
            AccessPolicy::new(["/authservice/"]),
            Key::generate(),
        );
        let sessions = sessions.unwrap_or_else(|| store.clone() as Arc<dyn SessionStore>);
        let states = states.unwrap_or_else(|| store as Arc<dyn StateStore>);
        assert!(gateway.install(AppState::new(provider.clone(), sessions, states, settings)));

        Harness {
            app: router(gateway),
            provider,
        }
    }

    fn harness(provider: FakeProvider) -> Harness {
        harness_with(provider, settings(), None, None)
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    fn with_cookie(uri: &str, method: Method, cookie: &str) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .header(header::COOKIE, cookie)
            .body(Body::empty())
            .unwrap()
    }

    fn location(response: &Response) -> String {
        response.headers()[header::LOCATION]
            .to_str()
            .unwrap()
            .to_string()
    }

    fn session_cookie(response: &Response) -> Option<String> {
        response
            .headers()
            .get_all(header::SET_COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .find(|v| v.starts_with(SESSION_COOKIE))
            .map(str::to_string)
    }

    async fn body_text(response: Response) -> String {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    /// Starts a login for `uri` and returns the state id sent to the provider.
    async fn start_login(app: &Router, uri: &str) -> String {
        let response = app.clone().oneshot(get(uri)).await.unwrap();
        assert_eq!(response.status(), StatusCode::FOUND);
        let location = url::Url::parse(&location(&response)).unwrap();
        location
            .query_pairs()
            .find(|(k, _)| k == "state")
            .map(|(_, v)| v.into_owned())
            .unwrap()
    }

    /// Runs a full browser login and returns the session cookie pair.
    async fn login(app: &Router) -> String {
        let state = start_login(app, "/notebooks").await;
        let response = app
            .clone()
            .oneshot(get(&format!("/login/oidc?code=good-code&state={state}")))
            .await
            .unwrap();
        let set_cookie = session_cookie(&response).unwrap();
        set_cookie.split(';').next().unwrap().to_string()
    }

    #[tokio::test]
    async fn whitelisted_paths_bypass_before_and_after_setup() {
        let gateway = GatewayState::new(
            Arc::new(Readiness::new()),
            AccessPolicy::new(["/authservice/"]),
            Key::generate(),
        );
        let app = router(gateway.clone());

        let response = app
            .clone()
            .oneshot(get("/authservice/site/homepage"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = app.clone().oneshot(get("/notebooks")).await.unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body_text(response).await, NOT_READY_BODY);

        let store = Arc::new(MemoryStore::new());
        gateway.install(AppState::new(
            Arc::new(default_provider()),
            store.clone(),
            store,
            settings(),
        ));

        let response = app
            .clone()
            .oneshot(get("/authservice/site/homepage"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = app.oneshot(get("/notebooks")).await.unwrap();
        assert_eq!(response.status(), StatusCode::FOUND);
    }

    #[tokio::test]
    async fn callback_and_logout_report_not_ready_during_setup() {
        let gateway = GatewayState::new(
            Arc::new(Readiness::new()),
            AccessPolicy::new(["/"]),
            Key::generate(),
        );
        let app = router(gateway);

        let response = app
            .clone()
            .oneshot(get("/login/oidc?code=c&state=s"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

        let request = Request::builder()
            .method(Method::POST)
            .uri("/logout")
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn bearer_token_sets_identity_headers() {
        let h = harness(default_provider());
        let request = Request::builder()
            .uri("/notebooks")
            .header(header::AUTHORIZATION, "Bearer alice-id-token")
            .body(Body::empty())
            .unwrap();

        let response = h.app.oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()["kubeflow-userid"],
            "accounts.google.com:alice@example.com"
        );
        assert_eq!(response.headers()["kubeflow-userid-token"], "alice-id-token");
        assert_eq!(h.provider.nonces.lock().unwrap().as_slice(), &[None]);
    }

    #[tokio::test]
    async fn bearer_token_without_scheme_is_accepted() {
        let h = harness(default_provider());
        let request = Request::builder()
            .uri("/")
            .header(header::AUTHORIZATION, "  alice-id-token ")
            .body(Body::empty())
            .unwrap();

        let response = h.app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn bearer_token_falls_back_to_sub() {
        let provider = FakeProvider::default()
            .with_token("robot", json!({"sub": "system:serviceaccount:ci"}));
        let h = harness(provider);
        let request = Request::builder()
            .uri("/")
            .header(header::AUTHORIZATION, "Bearer robot")
            .body(Body::empty())
            .unwrap();

        let response = h.app.oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()["kubeflow-userid"],
            "accounts.google.com:system:serviceaccount:ci"
        );
    }

    #[tokio::test]
    async fn bearer_token_without_user_claims_fails() {
        let provider = FakeProvider::default().with_token("anon", json!({"aud": "client"}));
        let h = harness(provider);
        let request = Request::builder()
            .uri("/")
            .header(header::AUTHORIZATION, "Bearer anon")
            .body(Body::empty())
            .unwrap();

        let response = h.app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(response.headers().get("kubeflow-userid").is_none());
    }

    #[tokio::test]
    async fn unverifiable_bearer_token_fails_without_session() {
        let h = harness(default_provider());
        let request = Request::builder()
            .uri("/")
            .header(header::AUTHORIZATION, "Bearer forged")
            .body(Body::empty())
            .unwrap();

        let response = h.app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body_text(response).await, "Unable to verify ID token.");
    }

    #[tokio::test]
    async fn custom_bearer_header_is_used() {
        let settings = AuthSettings::new(UserIdOptions::default(), "X-Auth-Token").unwrap();
        let h = harness_with(default_provider(), settings, None, None);
        let request = Request::builder()
            .uri("/")
            .header("x-auth-token", "alice-id-token")
            .body(Body::empty())
            .unwrap();

        let response = h.app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()["kubeflow-userid"], "alice@example.com");
    }

    #[tokio::test]
    async fn login_round_trip_returns_to_original_url() {
        let h = harness(default_provider());

        let state = start_login(&h.app, "/notebook/alice/?tab=files&sort=name").await;
        let response = h
            .app
            .clone()
            .oneshot(get(&format!("/login/oidc?code=good-code&state={state}")))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::FOUND);
        assert_eq!(location(&response), "/notebook/alice/?tab=files&sort=name");

        let set_cookie = session_cookie(&response).unwrap();
        assert!(set_cookie.contains("HttpOnly"));
        assert!(set_cookie.contains("Secure"));
        assert!(set_cookie.contains("Path=/"));
        assert!(set_cookie.contains("Max-Age=86400"));

        // the callback verified the ID token against the stored nonce
        let nonces = h.provider.nonces.lock().unwrap().clone();
        assert!(matches!(nonces.as_slice(), [Some(nonce)] if !nonce.is_empty()));
    }

    #[tokio::test]
    async fn session_cookie_authenticates_later_requests() {
        let h = harness(default_provider());
        let cookie = login(&h.app).await;

        let response = h
            .app
            .clone()
            .oneshot(with_cookie("/notebooks", Method::GET, &cookie))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()["kubeflow-userid"],
            "accounts.google.com:alice@example.com"
        );
        assert_eq!(response.headers()["kubeflow-userid-token"], "alice-id-token");
    }

    #[tokio::test]
    async fn tampered_session_cookie_starts_login() {
        let h = harness(default_provider());
        let cookie = login(&h.app).await;
        let tampered = format!("{cookie}x");

        let response = h
            .app
            .oneshot(with_cookie("/notebooks", Method::GET, &tampered))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FOUND);
        assert!(location(&response).starts_with("https://idp.example.com/auth"));
    }

    #[tokio::test]
    async fn state_cannot_be_replayed() {
        let provider = default_provider().with_code("second-code", Some("alice-id-token"));
        let h = harness(provider);
        let state = start_login(&h.app, "/notebooks").await;

        let first = h
            .app
            .clone()
            .oneshot(get(&format!("/login/oidc?code=good-code&state={state}")))
            .await
            .unwrap();
        assert_eq!(first.status(), StatusCode::FOUND);

        let replay = h
            .app
            .clone()
            .oneshot(get(&format!("/login/oidc?code=second-code&state={state}")))
            .await
            .unwrap();
        assert_eq!(replay.status(), StatusCode::BAD_REQUEST);
        assert!(session_cookie(&replay).is_none());
    }

    #[tokio::test]
    async fn unknown_state_is_rejected() {
        let h = harness(default_provider());
        let response = h
            .app
            .oneshot(get("/login/oidc?code=good-code&state=never-issued"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn missing_callback_parameters_are_bad_requests() {
        let h = harness(default_provider());

        let response = h
            .app
            .clone()
            .oneshot(get("/login/oidc?state=abc"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_text(response).await, "Missing url parameter: code");

        let response = h
            .app
            .oneshot(get("/login/oidc?code=good-code&state="))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_text(response).await, "Missing url parameter: state");
    }

    #[tokio::test]
    async fn after_login_url_overrides_original_destination() {
        let settings = settings().with_after_login_url(Some("/dashboard".to_string()));
        let h = harness_with(default_provider(), settings, None, None);

        let state = start_login(&h.app, "/notebooks?x=1").await;
        let response = h
            .app
            .oneshot(get(&format!("/login/oidc?code=good-code&state={state}")))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::FOUND);
        assert_eq!(location(&response), "/dashboard");
    }

    #[tokio::test]
    async fn failed_exchange_is_internal_error() {
        let h = harness(default_provider());
        let state = start_login(&h.app, "/").await;

        let response = h
            .app
            .oneshot(get(&format!("/login/oidc?code=bad-code&state={state}")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(session_cookie(&response).is_none());
    }

    #[tokio::test]
    async fn token_response_without_id_token_is_internal_error() {
        let provider = default_provider().with_code("no-id-token", None);
        let h = harness(provider);
        let state = start_login(&h.app, "/").await;

        let response = h
            .app
            .oneshot(get(&format!("/login/oidc?code=no-id-token&state={state}")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(
            body_text(response).await,
            "No id_token field in OAuth 2.0 token."
        );
    }

    #[tokio::test]
    async fn session_write_failure_still_redirects() {
        let h = harness_with(
            default_provider(),
            settings(),
            Some(Arc::new(BrokenSessions)),
            None,
        );
        let state = start_login(&h.app, "/notebooks").await;

        let response = h
            .app
            .oneshot(get(&format!("/login/oidc?code=good-code&state={state}")))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::FOUND);
        assert_eq!(location(&response), "/notebooks");
        assert!(session_cookie(&response).is_none());
    }

    #[tokio::test]
    async fn state_write_failure_blocks_login() {
        let h = harness_with(
            default_provider(),
            settings(),
            None,
            Some(Arc::new(BrokenStates)),
        );

        let response = h.app.oneshot(get("/notebooks")).await.unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(response.headers().get(header::LOCATION).is_none());
    }

    #[tokio::test]
    async fn logout_without_session_is_idempotent() {
        let h = harness(default_provider());

        for _ in 0..2 {
            let request = Request::builder()
                .method(Method::POST)
                .uri("/logout")
                .body(Body::empty())
                .unwrap();
            let response = h.app.clone().oneshot(request).await.unwrap();
            assert_eq!(response.status(), StatusCode::SEE_OTHER);
            assert_eq!(location(&response), "/");
        }
    }

    #[tokio::test]
    async fn logout_twice_with_the_same_cookie() {
        let h = harness(default_provider().with_revocation(Ok(())));
        let cookie = login(&h.app).await;

        for _ in 0..2 {
            let response = h
                .app
                .clone()
                .oneshot(with_cookie("/logout", Method::POST, &cookie))
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::SEE_OTHER);
            assert_eq!(location(&response), "/");
        }
        // only the first call found a session to revoke
        assert_eq!(h.provider.revoked.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn logout_revokes_tokens_and_clears_session() {
        let h = harness(default_provider().with_revocation(Ok(())));
        let cookie = login(&h.app).await;

        let response = h
            .app
            .clone()
            .oneshot(with_cookie("/logout", Method::POST, &cookie))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        assert_eq!(
            h.provider.revoked.lock().unwrap().as_slice(),
            &["access-good-code".to_string()]
        );
        let removal = session_cookie(&response).unwrap();
        assert!(removal.contains("Max-Age=0"));

        let response = h
            .app
            .oneshot(with_cookie("/notebooks", Method::GET, &cookie))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FOUND);
    }

    #[tokio::test]
    async fn logout_reports_sessions_it_could_not_delete() {
        let h = harness_with(
            default_provider().with_revocation(Ok(())),
            settings(),
            Some(Arc::new(UndeletableSessions::default())),
            None,
        );
        let cookie = login(&h.app).await;

        let response = h
            .app
            .clone()
            .oneshot(with_cookie("/logout", Method::POST, &cookie))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let removal = session_cookie(&response).unwrap();
        assert!(removal.contains("Max-Age=0"));
    }

    #[tokio::test]
    async fn logout_surfaces_provider_unavailability() {
        let h = harness(
            default_provider().with_revocation(Err(StatusCode::SERVICE_UNAVAILABLE)),
        );
        let cookie = login(&h.app).await;

        let response = h
            .app
            .clone()
            .oneshot(with_cookie("/logout", Method::POST, &cookie))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(
            body_text(response).await,
            "Failed to revoke access/refresh tokens, please try again"
        );

        let response = h
            .app
            .oneshot(with_cookie("/notebooks", Method::GET, &cookie))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FOUND);
    }

    #[tokio::test]
    async fn logout_maps_other_revocation_failures_to_internal_error() {
        let h = harness(
            default_provider().with_revocation(Err(StatusCode::BAD_GATEWAY)),
        );
        let cookie = login(&h.app).await;

        let response = h
            .app
            .clone()
            .oneshot(with_cookie("/logout", Method::POST, &cookie))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let response = h
            .app
            .oneshot(with_cookie("/notebooks", Method::GET, &cookie))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FOUND);
    }

    #[tokio::test]
    async fn logout_without_revocation_endpoint_still_succeeds() {
        let h = harness(default_provider());
        let cookie = login(&h.app).await;

        let response = h
            .app
            .clone()
            .oneshot(with_cookie("/logout", Method::POST, &cookie))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        assert!(h.provider.revoked.lock().unwrap().is_empty());
    }

    #[test]
    fn bearer_scheme_is_stripped() {
        assert_eq!(bearer_token("Bearer abc"), "abc");
        assert_eq!(bearer_token("  Bearer abc  "), "abc");
        assert_eq!(bearer_token("abc"), "abc");
        assert_eq!(bearer_token("Basic abc"), "Basic abc");
    }
}
