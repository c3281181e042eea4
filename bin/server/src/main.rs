use authservice_access::{AccessPolicy, Readiness};
use authservice_server::{
    auth::{self, GatewayState},
    config::ServerConfig,
    error::StartupError,
    health, startup,
    web::WebServer,
};
use rootcause::Report;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    if let Err(e) = run().await {
        tracing::error!(error = %e, "authservice stopped");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), Report<StartupError>> {
    // Load configuration from environment
    let config = ServerConfig::from_env().map_err(|e| StartupError::Config {
        details: e.to_string(),
    })?;
    tracing::info!("Loaded configuration");

    // The readiness probe comes up first and reports 503 until setup is done.
    let readiness = Arc::new(Readiness::new());
    let health_server = tokio::spawn(startup::serve(
        "health",
        config.bind_addr(config.health_server_port),
        health::router(readiness.clone()),
    ));

    let gateway = GatewayState::new(
        readiness,
        AccessPolicy::new(config.whitelist()),
        startup::cookie_key(config.cookie_secret()),
    );
    let auth_server = tokio::spawn(startup::serve(
        "auth",
        config.bind_addr(config.server_port),
        auth::router(gateway.clone()),
    ));

    let web = WebServer::new(
        &config.template_paths(),
        startup::template_context(&config),
        PathBuf::from(&config.web_server_assets_path),
    )
    .map_err(|e| StartupError::Web {
        details: e.to_string(),
    })?;
    let web_server = tokio::spawn(startup::serve(
        "web",
        config.bind_addr(config.web_server_port),
        web.router(),
    ));

    // Any server failing takes the whole process down.
    let servers = async {
        tokio::try_join!(
            supervise("health", health_server),
            supervise("auth", auth_server),
            supervise("web", web_server),
        )
        .map(|_| ())
    };
    tokio::pin!(servers);

    let setup = startup::setup(&config, &gateway);
    tokio::pin!(setup);
    let mut setup_done = false;

    loop {
        tokio::select! {
            result = &mut servers => return result,
            result = &mut setup, if !setup_done => {
                result?;
                setup_done = true;
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("received shutdown signal");
                return Ok(());
            }
        }
    }
}

async fn supervise(
    server: &'static str,
    handle: JoinHandle<Result<(), Report<StartupError>>>,
) -> Result<(), Report<StartupError>> {
    match handle.await {
        Ok(result) => result,
        Err(e) => Err(StartupError::Serve {
            server,
            details: e.to_string(),
        }
        .into()),
    }
}
