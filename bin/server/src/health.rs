//! Readiness probe listener.

use authservice_access::Readiness;
use axum::{Router, extract::State, http::StatusCode};
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

/// Answers every path with 200 once setup has finished and 503 before.
pub fn router(readiness: Arc<Readiness>) -> Router {
    Router::new()
        .fallback(probe)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(readiness)
}

async fn probe(State(readiness): State<Arc<Readiness>>) -> StatusCode {
    if readiness.is_ready() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    async fn status(app: Router, uri: &str) -> StatusCode {
        let request = Request::builder().uri(uri).body(Body::empty()).unwrap();
        app.oneshot(request).await.unwrap().status()
    }

    #[tokio::test]
    async fn reports_readiness_on_any_path() {
        let readiness = Arc::new(Readiness::new());
        let app = router(readiness.clone());

        assert_eq!(status(app.clone(), "/").await, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(status(app.clone(), "/healthz").await, StatusCode::SERVICE_UNAVAILABLE);

        readiness.mark_ready();

        assert_eq!(status(app.clone(), "/").await, StatusCode::OK);
        assert_eq!(status(app, "/anything/else").await, StatusCode::OK);
    }

    #[tokio::test]
    async fn allows_cross_origin_probes() {
        let readiness = Arc::new(Readiness::new());
        readiness.mark_ready();
        let request = Request::builder()
            .uri("/")
            .header("origin", "https://dashboard.example.com")
            .body(Body::empty())
            .unwrap();

        let response = router(readiness).oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()["access-control-allow-origin"],
            "*"
        );
    }
}
