//! Authentication for the gatekeeper.
//!
//! This module provides:
//! - The request handlers: `authenticate`, the OIDC `callback` and `logout`
//! - The whitelist/readiness gate in front of `authenticate`
//! - The OIDC provider adapter and the Postgres store engine
//!
//! # Request flow
//!
//! Every path other than `/login/oidc` and `/logout` goes through the gate
//! first. Whitelisted prefixes are accepted immediately; until setup has
//! finished everything else is answered with 503. Once ready, `authenticate`
//! accepts a verified bearer token or a live session cookie, and otherwise
//! stores a pending login and redirects the browser to the provider.
//!
//! Setup (discovery, store initialization) completes after the listeners are
//! already up, so the handlers reach their dependencies through
//! [`GatewayState::app`], which stays empty until [`GatewayState::install`].

pub mod db;
pub mod middleware;
pub mod oidc;
pub mod provider;
pub mod routes;

use authservice_access::{AccessPolicy, Readiness, SessionStore, StateStore, UserIdOptions};
use axum::{
    Router,
    extract::FromRef,
    handler::Handler,
    http::{HeaderName, header::InvalidHeaderName},
    routing::{get, post},
};
use axum_extra::extract::cookie::Key;
use std::sync::{Arc, OnceLock};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

pub use oidc::OidcClient;
pub use provider::{IdentityProvider, ProviderError, TokenGrant};
pub use routes::{AuthError, authenticate, callback, logout};

/// Path the provider redirects back to.
pub const CALLBACK_PATH: &str = "/login/oidc";

/// Path that ends a session.
pub const LOGOUT_PATH: &str = "/logout";

/// Handler settings fixed at startup.
#[derive(Debug, Clone)]
pub struct AuthSettings {
    /// Claim and prefix used to build the identity header value.
    pub user_id: UserIdOptions,
    /// Identity header name.
    pub user_header: HeaderName,
    /// Token forwarding header name, if enabled.
    pub token_header: Option<HeaderName>,
    /// Request header carrying a bearer token.
    pub bearer_header: HeaderName,
    /// Lifetime of a session and its cookie.
    pub session_max_age: chrono::Duration,
    /// Lifetime of a pending login.
    pub state_ttl: chrono::Duration,
    /// Fixed post-login destination; overrides the stored original URL.
    pub after_login_url: Option<String>,
}

impl AuthSettings {
    /// Validates the header names and applies default lifetimes.
    pub fn new(user_id: UserIdOptions, bearer_header: &str) -> Result<Self, InvalidHeaderName> {
        let user_header = HeaderName::from_bytes(user_id.header.as_bytes())?;
        let token_header = user_id
            .token_header()
            .map(|name| HeaderName::from_bytes(name.as_bytes()))
            .transpose()?;
        let bearer_header = HeaderName::from_bytes(bearer_header.as_bytes())?;

        Ok(Self {
            user_id,
            user_header,
            token_header,
            bearer_header,
            session_max_age: chrono::Duration::days(1),
            state_ttl: chrono::Duration::minutes(10),
            after_login_url: None,
        })
    }

    /// Sets the session lifetime.
    #[must_use]
    pub fn with_session_max_age(mut self, max_age: chrono::Duration) -> Self {
        self.session_max_age = max_age;
        self
    }

    /// Sets the pending login lifetime.
    #[must_use]
    pub fn with_state_ttl(mut self, ttl: chrono::Duration) -> Self {
        self.state_ttl = ttl;
        self
    }

    /// Sets the fixed post-login destination. Empty values are ignored.
    #[must_use]
    pub fn with_after_login_url(mut self, url: Option<String>) -> Self {
        self.after_login_url = url.filter(|u| !u.is_empty());
        self
    }
}

/// Dependencies available once setup has completed.
pub struct AppState {
    /// OIDC provider adapter.
    pub provider: Arc<dyn IdentityProvider>,
    /// Session engine.
    pub sessions: Arc<dyn SessionStore>,
    /// Pending login engine.
    pub states: Arc<dyn StateStore>,
    /// Handler settings.
    pub settings: AuthSettings,
}

impl AppState {
    /// Creates a new application state.
    pub fn new(
        provider: Arc<dyn IdentityProvider>,
        sessions: Arc<dyn SessionStore>,
        states: Arc<dyn StateStore>,
        settings: AuthSettings,
    ) -> Self {
        Self {
            provider,
            sessions,
            states,
            settings,
        }
    }
}

/// Router state shared by the gate and the handlers.
#[derive(Clone)]
pub struct GatewayState {
    readiness: Arc<Readiness>,
    policy: Arc<AccessPolicy>,
    app: Arc<OnceLock<Arc<AppState>>>,
    cookie_key: Key,
}

impl GatewayState {
    /// Creates a state with no application installed yet.
    pub fn new(readiness: Arc<Readiness>, policy: AccessPolicy, cookie_key: Key) -> Self {
        Self {
            readiness,
            policy: Arc::new(policy),
            app: Arc::new(OnceLock::new()),
            cookie_key,
        }
    }

    /// Returns the readiness flag.
    pub fn readiness(&self) -> &Readiness {
        &self.readiness
    }

    /// Returns the whitelist policy.
    pub fn policy(&self) -> &AccessPolicy {
        &self.policy
    }

    /// Publishes the application state and marks the service ready.
    ///
    /// Returns false if an application state was already installed.
    pub fn install(&self, app: AppState) -> bool {
        let installed = self.app.set(Arc::new(app)).is_ok();
        if installed {
            self.readiness.mark_ready();
        }
        installed
    }

    /// Returns the application state, or `NotReady` during setup.
    pub fn app(&self) -> Result<Arc<AppState>, AuthError> {
        if !self.readiness.is_ready() {
            return Err(AuthError::NotReady);
        }
        self.app.get().cloned().ok_or(AuthError::NotReady)
    }
}

impl FromRef<GatewayState> for Key {
    fn from_ref(state: &GatewayState) -> Self {
        state.cookie_key.clone()
    }
}

/// Builds the authentication router.
///
/// The gate only wraps `authenticate`: the callback and logout handlers are
/// never whitelisted and report 503 on their own until setup is done.
pub fn router(gateway: GatewayState) -> Router {
    let gated = authenticate.layer(axum::middleware::from_fn_with_state(
        gateway.clone(),
        middleware::gate,
    ));

    Router::new()
        .route(CALLBACK_PATH, get(callback))
        .route(LOGOUT_PATH, post(logout))
        .fallback(gated)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(gateway)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn settings_reject_invalid_header_names() {
        let options = UserIdOptions {
            header: "bad header".to_string(),
            ..UserIdOptions::default()
        };
        assert!(AuthSettings::new(options, "Authorization").is_err());
        assert!(AuthSettings::new(UserIdOptions::default(), "Author ization").is_err());
    }

    #[test]
    fn empty_token_header_disables_forwarding() {
        let options = UserIdOptions {
            token_header: String::new(),
            ..UserIdOptions::default()
        };
        let settings = AuthSettings::new(options, "Authorization").unwrap();
        assert!(settings.token_header.is_none());
        assert_eq!(settings.user_header, "kubeflow-userid");
    }

    #[test]
    fn empty_after_login_url_is_no_override() {
        let settings = AuthSettings::new(UserIdOptions::default(), "Authorization")
            .unwrap()
            .with_after_login_url(Some(String::new()));
        assert!(settings.after_login_url.is_none());
    }

    #[test]
    fn app_is_unavailable_until_installed() {
        let gateway = GatewayState::new(
            Arc::new(Readiness::new()),
            AccessPolicy::new(Vec::<String>::new()),
            Key::generate(),
        );
        assert!(matches!(gateway.app(), Err(AuthError::NotReady)));
        assert!(!gateway.readiness().is_ready());
    }
}
