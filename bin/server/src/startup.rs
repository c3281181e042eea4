//! Background setup: provider discovery, store initialization and the
//! expiry sweeper.

use authservice_access::{ExpiryReaper, MemoryStore, SessionStore, StateStore};
use axum::Router;
use axum_extra::extract::cookie::Key;
use rootcause::Report;
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

use crate::auth::{
    AppState, AuthSettings, GatewayState, OidcClient, ProviderError, db::PgStore, oidc,
};
use crate::config::{MIN_COOKIE_SECRET_LEN, ServerConfig};
use crate::error::StartupError;
use crate::web::TemplateContext;

/// Delay between failed discovery attempts.
const DISCOVERY_RETRY_INTERVAL: Duration = Duration::from_secs(10);

/// Storage engines behind the handlers.
pub struct Stores {
    pub sessions: Arc<dyn SessionStore>,
    pub states: Arc<dyn StateStore>,
    pub reaper: Arc<dyn ExpiryReaper>,
}

impl Stores {
    fn shared<T>(store: Arc<T>) -> Self
    where
        T: SessionStore + StateStore + ExpiryReaper + 'static,
    {
        Self {
            sessions: store.clone(),
            states: store.clone(),
            reaper: store,
        }
    }
}

/// Returns the cookie signing key.
///
/// Without a usable secret a random key is generated, so sessions do not
/// survive a restart and replicas cannot share them.
pub fn cookie_key(secret: Option<&str>) -> Key {
    match secret {
        Some(secret) if secret.len() >= MIN_COOKIE_SECRET_LEN => {
            Key::derive_from(secret.as_bytes())
        }
        _ => {
            tracing::warn!("COOKIE_SECRET not set, using a random per-process cookie key");
            Key::generate()
        }
    }
}

/// Builds the values shared by all landing page templates.
pub fn template_context(config: &ServerConfig) -> TemplateContext {
    TemplateContext {
        client_name: config.web_server_client_name.clone(),
        provider_url: config.oidc_provider.clone(),
        theme_url: config.theme_url(),
        homepage_url: config.homepage_url(),
        after_logout_url: config.after_logout_url(),
        frontend: config.template_context.clone(),
    }
}

/// Binds `addr` and serves `router` until it fails.
pub async fn serve(
    server: &'static str,
    addr: String,
    router: Router,
) -> Result<(), Report<StartupError>> {
    let listener =
        tokio::net::TcpListener::bind(&addr)
            .await
            .map_err(|e| StartupError::Bind {
                addr: addr.clone(),
                details: e.to_string(),
            })?;

    tracing::info!(server, "listening on http://{}", addr);

    axum::serve(listener, router.into_make_service())
        .await
        .map_err(|e| StartupError::Serve {
            server,
            details: e.to_string(),
        })?;
    Ok(())
}

/// Completes setup and publishes the application state to `gateway`.
///
/// Discovery is retried until it succeeds; configuration errors, an
/// unreadable CA bundle and store failures are fatal.
pub async fn setup(
    config: &ServerConfig,
    gateway: &GatewayState,
) -> Result<(), Report<StartupError>> {
    let settings = AuthSettings::new(config.user_id_options(), &config.auth_header)
        .map_err(|e| StartupError::Config {
            details: format!("invalid header name: {}", e),
        })?
        .with_session_max_age(config.session_max_age())
        .with_state_ttl(config.state_ttl())
        .with_after_login_url(config.after_login_url());

    let ca_bundle = match config.ca_bundle_path() {
        Some(path) => {
            let pem = std::fs::read(&path).map_err(|e| StartupError::CaBundle {
                path: path.display().to_string(),
                details: e.to_string(),
            })?;
            Some(pem)
        }
        None => None,
    };
    let http_client = oidc::http_client(ca_bundle.as_deref()).map_err(|e| {
        StartupError::Provider {
            details: e.to_string(),
        }
    })?;

    let provider = discover(config, http_client).await?;
    let stores = open_stores(config).await?;
    spawn_reaper(stores.reaper.clone(), config.store_cleanup_interval());

    let app = AppState::new(Arc::new(provider), stores.sessions, stores.states, settings);
    if gateway.install(app) {
        tracing::info!("setup complete, serving authentication requests");
    }
    Ok(())
}

async fn discover(
    config: &ServerConfig,
    http_client: reqwest::Client,
) -> Result<OidcClient, Report<StartupError>> {
    let oidc_config = config.oidc();
    loop {
        tracing::info!(issuer = oidc_config.issuer_url(), "discovering OIDC provider");
        match OidcClient::discover(oidc_config.clone(), http_client.clone()).await {
            Ok(client) => return Ok(client),
            Err(ProviderError::Configuration(details)) => {
                return Err(StartupError::Provider { details }.into());
            }
            Err(e) => {
                tracing::error!(
                    error = %e,
                    "OIDC provider setup failed, retrying in {} seconds",
                    DISCOVERY_RETRY_INTERVAL.as_secs()
                );
                tokio::time::sleep(DISCOVERY_RETRY_INTERVAL).await;
            }
        }
    }
}

/// Opens the Postgres engine if `DATABASE_URL` is set, else the in-memory one.
pub async fn open_stores(config: &ServerConfig) -> Result<Stores, Report<StartupError>> {
    let Some(database_url) = config.database_url() else {
        tracing::warn!("DATABASE_URL not set, sessions are kept in memory and lost on restart");
        return Ok(Stores::shared(Arc::new(MemoryStore::new())));
    };

    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(database_url)
        .await
        .map_err(|e| StartupError::Store {
            details: e.to_string(),
        })?;

    let store = PgStore::new(pool);
    tracing::info!("running database migrations");
    store.migrate().await.map_err(|e| StartupError::Store {
        details: e.to_string(),
    })?;

    Ok(Stores::shared(Arc::new(store)))
}

/// Spawns the periodic sweep of expired sessions and login states.
pub fn spawn_reaper(reaper: Arc<dyn ExpiryReaper>, period: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        loop {
            interval.tick().await;
            match reaper.reap_expired().await {
                Ok(count) if count > 0 => {
                    tracing::debug!(deleted = count, "periodic store cleanup");
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!(error = %e, "failed to clean up expired records");
                }
            }
        }
    })
}
