//! Whitelist and readiness gate in front of `authenticate`.

use authservice_access::GateDecision;
use axum::{
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
};

use super::GatewayState;

/// Body returned for whitelisted paths.
const BYPASS_BODY: &str = "OK";

/// Body returned while setup is still running.
pub const NOT_READY_BODY: &str = "OIDC Setup is not complete yet.";

/// Accepts whitelisted paths, holds everything else back until the service
/// is ready, and otherwise passes the request to `authenticate`.
///
/// The whitelist is consulted before readiness so that the web server's own
/// pages stay reachable during setup.
pub async fn gate(State(gateway): State<GatewayState>, request: Request, next: Next) -> Response {
    let path = request.uri().path();

    match gateway.policy().evaluate(path, gateway.readiness()) {
        GateDecision::Bypass => {
            tracing::info!(path, "path is whitelisted, accepted without authorization");
            (StatusCode::OK, BYPASS_BODY).into_response()
        }
        GateDecision::NotReady => {
            tracing::debug!(path, "rejecting request before setup completed");
            (StatusCode::SERVICE_UNAVAILABLE, NOT_READY_BODY).into_response()
        }
        GateDecision::Authenticate => next.run(request).await,
    }
}
