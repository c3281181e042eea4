//! Centralized server configuration.
//!
//! This module provides strongly-typed configuration for the server,
//! loaded via the `config` crate from environment variables. Field names are
//! the lower-cased variable names (`OIDC_PROVIDER` -> `oidc_provider`).
//!
//! See [`OidcConfig`] for the provider settings derived from it.

use authservice_access::{OidcConfig, UserIdOptions};
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;

/// Variables with this prefix are handed to the web templates.
const TEMPLATE_CONTEXT_PREFIX: &str = "TEMPLATE_CONTEXT_";

/// Minimum length of `COOKIE_SECRET`.
pub const MIN_COOKIE_SECRET_LEN: usize = 32;

/// Upper bound for `SESSION_MAX_AGE` and `STATE_MAX_AGE`: ten years.
pub const MAX_TTL_SECS: i64 = 10 * 365 * 24 * 60 * 60;

/// Server configuration.
///
/// Holds the client secret and cookie key, so it deliberately has no `Debug`.
#[derive(Deserialize)]
pub struct ServerConfig {
    /// Issuer URL used for OIDC discovery.
    pub oidc_provider: String,
    /// Overrides the discovered authorization endpoint.
    #[serde(default)]
    pub oidc_auth_url: Option<String>,
    /// Space-separated scopes.
    #[serde(default = "default_oidc_scopes")]
    pub oidc_scopes: String,
    /// OAuth2 client ID.
    pub client_id: String,
    /// OAuth2 client secret.
    pub client_secret: String,
    /// Callback URL registered with the provider.
    pub redirect_url: String,
    /// Path of a PEM bundle trusted for outbound TLS.
    #[serde(default)]
    pub ca_bundle: Option<String>,

    /// Fixed post-login destination.
    #[serde(default)]
    pub after_login_url: Option<String>,
    /// Older name for `after_login_url`.
    #[serde(default)]
    pub static_destination_url: Option<String>,
    /// Space-separated path prefixes that skip authentication.
    #[serde(default)]
    pub skip_auth_uri: String,

    #[serde(default = "default_userid_header")]
    pub userid_header: String,
    #[serde(default = "default_userid_token_header")]
    pub userid_token_header: String,
    #[serde(default)]
    pub userid_prefix: String,
    #[serde(default = "default_userid_claim")]
    pub userid_claim: String,
    /// Request header carrying a bearer token.
    #[serde(default = "default_auth_header")]
    pub auth_header: String,

    /// Bind host for all listeners; empty means all interfaces.
    #[serde(default)]
    pub server_hostname: String,
    #[serde(default = "default_server_port")]
    pub server_port: u16,
    #[serde(default = "default_health_server_port")]
    pub health_server_port: u16,
    #[serde(default = "default_web_server_port")]
    pub web_server_port: u16,

    /// Session lifetime in seconds.
    #[serde(default = "default_session_max_age")]
    pub session_max_age: i64,
    /// Pending login lifetime in seconds.
    #[serde(default = "default_state_max_age")]
    pub state_max_age: i64,
    /// Interval between expiry sweeps, in seconds.
    #[serde(default = "default_store_cleanup_interval")]
    pub store_cleanup_interval: u64,

    /// PostgreSQL connection URL; sessions stay in memory without it.
    #[serde(default)]
    pub database_url: Option<String>,
    /// Key material for signing cookies.
    #[serde(default)]
    pub cookie_secret: Option<String>,

    /// Comma-separated directories with template overrides.
    #[serde(default)]
    pub web_server_template_path: String,
    #[serde(default = "default_web_server_assets_path")]
    pub web_server_assets_path: String,
    #[serde(default = "default_web_server_client_name")]
    pub web_server_client_name: String,
    #[serde(default = "default_web_server_url_prefix")]
    pub web_server_url_prefix: String,
    /// Whitelists the web server prefix.
    #[serde(default = "default_true")]
    pub web_server_protect_url_prefix: bool,
    #[serde(default = "default_web_server_themes_url")]
    pub web_server_themes_url: String,
    #[serde(default = "default_web_server_theme")]
    pub web_server_theme: String,
    #[serde(default)]
    pub homepage_url: Option<String>,
    #[serde(default)]
    pub after_logout_url: Option<String>,

    /// `TEMPLATE_CONTEXT_*` values, keyed by the rest of the variable name.
    #[serde(skip)]
    pub template_context: BTreeMap<String, String>,
}

fn default_oidc_scopes() -> String {
    "openid email profile".to_string()
}

fn default_userid_header() -> String {
    "kubeflow-userid".to_string()
}

fn default_userid_token_header() -> String {
    "kubeflow-userid-token".to_string()
}

fn default_userid_claim() -> String {
    "email".to_string()
}

fn default_auth_header() -> String {
    "Authorization".to_string()
}

fn default_server_port() -> u16 {
    8080
}

fn default_health_server_port() -> u16 {
    8081
}

fn default_web_server_port() -> u16 {
    8082
}

fn default_session_max_age() -> i64 {
    86400
}

fn default_state_max_age() -> i64 {
    600
}

fn default_store_cleanup_interval() -> u64 {
    300
}

fn default_web_server_assets_path() -> String {
    "web/assets".to_string()
}

fn default_web_server_client_name() -> String {
    "Kubeflow".to_string()
}

fn default_web_server_url_prefix() -> String {
    "/authservice/".to_string()
}

fn default_web_server_themes_url() -> String {
    "themes".to_string()
}

fn default_web_server_theme() -> String {
    "kubeflow".to_string()
}

fn default_true() -> bool {
    true
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

/// Joins a URL path prefix and a path with exactly one slash between them.
fn join_path(prefix: &str, path: &str) -> String {
    format!(
        "{}/{}",
        prefix.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}

impl ServerConfig {
    /// Loads configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if required configuration is missing or invalid.
    pub fn from_env() -> Result<Self, config::ConfigError> {
        Self::from_vars(std::env::vars())
    }

    /// Loads configuration from an explicit set of variables.
    pub fn from_vars<I>(vars: I) -> Result<Self, config::ConfigError>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let vars: HashMap<String, String> = vars.into_iter().collect();

        let template_context = vars
            .iter()
            .filter_map(|(key, value)| {
                key.strip_prefix(TEMPLATE_CONTEXT_PREFIX)
                    .filter(|name| !name.is_empty())
                    .map(|name| (name.to_string(), value.clone()))
            })
            .collect();

        // No try_parsing: a numeric-looking secret must stay a string.
        let mut config: Self = config::Config::builder()
            .add_source(config::Environment::default().source(Some(vars)))
            .build()?
            .try_deserialize()?;
        config.template_context = template_context;

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), config::ConfigError> {
        for (name, value) in [
            ("OIDC_PROVIDER", &self.oidc_provider),
            ("REDIRECT_URL", &self.redirect_url),
        ] {
            url::Url::parse(value).map_err(|e| {
                config::ConfigError::Message(format!("{name} is not a valid URL: {e}"))
            })?;
        }

        for (name, value) in [
            ("SESSION_MAX_AGE", self.session_max_age),
            ("STATE_MAX_AGE", self.state_max_age),
        ] {
            if !(1..=MAX_TTL_SECS).contains(&value) {
                return Err(config::ConfigError::Message(format!(
                    "{name} must be between 1 and {MAX_TTL_SECS} seconds"
                )));
            }
        }
        if self.store_cleanup_interval == 0 {
            return Err(config::ConfigError::Message(
                "STORE_CLEANUP_INTERVAL must be positive".to_string(),
            ));
        }

        if let Some(secret) = non_empty(&self.cookie_secret) {
            if secret.len() < MIN_COOKIE_SECRET_LEN {
                return Err(config::ConfigError::Message(format!(
                    "COOKIE_SECRET must be at least {MIN_COOKIE_SECRET_LEN} bytes"
                )));
            }
        }

        Ok(())
    }

    /// Returns the OIDC provider and client settings.
    pub fn oidc(&self) -> OidcConfig {
        OidcConfig::builder(
            self.oidc_provider.clone(),
            self.client_id.clone(),
            self.client_secret.clone(),
            self.redirect_url.clone(),
        )
        .scopes(&self.oidc_scopes)
        .auth_url(non_empty(&self.oidc_auth_url).map(str::to_string))
        .build()
    }

    /// Returns how the authenticated user is announced downstream.
    pub fn user_id_options(&self) -> UserIdOptions {
        UserIdOptions {
            header: self.userid_header.clone(),
            token_header: self.userid_token_header.clone(),
            prefix: self.userid_prefix.clone(),
            claim: self.userid_claim.clone(),
        }
    }

    /// Returns the fixed post-login destination, if any.
    pub fn after_login_url(&self) -> Option<String> {
        non_empty(&self.after_login_url)
            .or_else(|| non_empty(&self.static_destination_url))
            .map(str::to_string)
    }

    /// Returns the path prefixes that skip authentication.
    pub fn whitelist(&self) -> Vec<String> {
        let mut whitelist: Vec<String> = self
            .skip_auth_uri
            .split_whitespace()
            .map(str::to_string)
            .collect();
        if self.web_server_protect_url_prefix && !self.web_server_url_prefix.is_empty() {
            whitelist.push(self.web_server_url_prefix.clone());
        }
        whitelist
    }

    /// Returns the CA bundle path, if configured.
    pub fn ca_bundle_path(&self) -> Option<PathBuf> {
        non_empty(&self.ca_bundle).map(PathBuf::from)
    }

    /// Returns the cookie signing secret, if configured.
    pub fn cookie_secret(&self) -> Option<&str> {
        non_empty(&self.cookie_secret)
    }

    /// Returns the database URL, if configured.
    pub fn database_url(&self) -> Option<&str> {
        non_empty(&self.database_url)
    }

    /// Returns the public URL of the landing page.
    pub fn homepage_url(&self) -> String {
        non_empty(&self.homepage_url)
            .map(str::to_string)
            .unwrap_or_else(|| join_path(&self.web_server_url_prefix, "site/homepage"))
    }

    /// Returns the public URL of the post-logout page.
    pub fn after_logout_url(&self) -> String {
        non_empty(&self.after_logout_url)
            .map(str::to_string)
            .unwrap_or_else(|| join_path(&self.web_server_url_prefix, "site/after_logout"))
    }

    /// Returns the base URL of the selected theme, ending in `/`.
    ///
    /// A relative themes URL is taken relative to the web server's assets.
    pub fn theme_url(&self) -> String {
        let themes = self.web_server_themes_url.trim();
        let themes = if themes.starts_with('/') || url::Url::parse(themes).is_ok() {
            themes.to_string()
        } else {
            join_path(
                &join_path(&self.web_server_url_prefix, "site/assets"),
                themes,
            )
        };
        format!("{}/", join_path(&themes, &self.web_server_theme).trim_end_matches('/'))
    }

    /// Returns the extra template directories, in override order.
    pub fn template_paths(&self) -> Vec<PathBuf> {
        self.web_server_template_path
            .split(',')
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .map(PathBuf::from)
            .collect()
    }

    /// Returns the bind address for `port`.
    pub fn bind_addr(&self, port: u16) -> String {
        let host = self.server_hostname.trim();
        let host = if host.is_empty() { "0.0.0.0" } else { host };
        format!("{host}:{port}")
    }

    /// Returns the session lifetime.
    pub fn session_max_age(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.session_max_age)
    }

    /// Returns the pending login lifetime.
    pub fn state_ttl(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.state_max_age)
    }

    /// Returns the interval between expiry sweeps.
    pub fn store_cleanup_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.store_cleanup_interval)
    }
}
