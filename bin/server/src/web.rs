//! Landing pages shown around login and logout.
//!
//! Pages are handlebars templates. The built-in defaults are compiled into
//! the binary; every `*.html` file in a configured template directory
//! replaces the default of the same name, later directories winning.

use axum::{
    Router,
    extract::State,
    http::StatusCode,
    response::{Html, IntoResponse, Response},
    routing::get,
};
use handlebars::{Handlebars, handlebars_helper};
use rootcause::Report;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tower_http::{cors::CorsLayer, services::ServeDir, trace::TraceLayer};
use url::Url;

use crate::error::WebError;

pub const HOMEPAGE_PATH: &str = "/site/homepage";
pub const AFTER_LOGOUT_PATH: &str = "/site/after_logout";
pub const ASSETS_PATH: &str = "/site/assets";

const HOMEPAGE_TEMPLATE: &str = "homepage.html";
const AFTER_LOGOUT_TEMPLATE: &str = "after_logout.html";

const DEFAULT_TEMPLATES: [(&str, &str); 2] = [
    (
        HOMEPAGE_TEMPLATE,
        include_str!("../web/templates/default/homepage.html"),
    ),
    (
        AFTER_LOGOUT_TEMPLATE,
        include_str!("../web/templates/default/after_logout.html"),
    ),
];

/// Values available to every template.
#[derive(Debug, Clone, Serialize)]
pub struct TemplateContext {
    pub client_name: String,
    pub provider_url: String,
    pub theme_url: String,
    pub homepage_url: String,
    pub after_logout_url: String,
    /// Free-form `TEMPLATE_CONTEXT_*` values.
    pub frontend: BTreeMap<String, String>,
}

/// Resolves `reference` against `base`.
///
/// Absolute references are returned as is. Bases that are only a path
/// (`/authservice/site/assets/themes/kubeflow/`) are resolved textually.
pub fn resolve_url_ref(base: &str, reference: &str) -> String {
    if let Ok(absolute) = Url::parse(reference) {
        return absolute.into();
    }
    if let Ok(joined) = Url::parse(base).and_then(|base| base.join(reference)) {
        return joined.into();
    }
    if reference.starts_with('/') {
        return reference.to_string();
    }
    match base.rfind('/') {
        Some(i) => format!("{}{}", &base[..=i], reference),
        None => reference.to_string(),
    }
}

handlebars_helper!(resolve_url_ref_helper: |base: str, reference: str| resolve_url_ref(base, reference));

/// Renders the landing pages and serves static assets.
pub struct WebServer {
    templates: Handlebars<'static>,
    context: TemplateContext,
    assets_dir: PathBuf,
}

impl WebServer {
    /// Loads the default templates, then the overrides from `template_dirs`.
    pub fn new(
        template_dirs: &[PathBuf],
        context: TemplateContext,
        assets_dir: PathBuf,
    ) -> Result<Self, Report<WebError>> {
        let mut templates = Handlebars::new();
        templates.register_helper("resolve_url_ref", Box::new(resolve_url_ref_helper));

        for (name, source) in DEFAULT_TEMPLATES {
            register(&mut templates, name, source)?;
        }

        for dir in template_dirs {
            for (name, source) in list_templates(dir)? {
                tracing::debug!(template = %name, dir = %dir.display(), "overriding template");
                register(&mut templates, &name, &source)?;
            }
        }

        Ok(Self {
            templates,
            context,
            assets_dir,
        })
    }

    /// Renders a template with the shared context.
    pub fn render(&self, name: &str) -> Result<String, WebError> {
        self.templates
            .render(name, &self.context)
            .map_err(|e| WebError::Render {
                name: name.to_string(),
                details: e.to_string(),
            })
    }

    fn page(&self, name: &str) -> Response {
        match self.render(name) {
            Ok(html) => Html(html).into_response(),
            Err(e) => {
                tracing::error!(error = %e, "error executing template");
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error").into_response()
            }
        }
    }

    /// Builds the web server router.
    pub fn router(self) -> Router {
        let assets = ServeDir::new(&self.assets_dir);

        Router::new()
            .route(HOMEPAGE_PATH, get(homepage))
            .route(AFTER_LOGOUT_PATH, get(after_logout))
            .nest_service(ASSETS_PATH, assets)
            .layer(TraceLayer::new_for_http())
            .layer(CorsLayer::permissive())
            .with_state(Arc::new(self))
    }
}

fn register(
    templates: &mut Handlebars<'static>,
    name: &str,
    source: &str,
) -> Result<(), WebError> {
    templates
        .register_template_string(name, source)
        .map_err(|e| WebError::Template {
            name: name.to_string(),
            details: e.to_string(),
        })
}

/// Reads every `*.html` file directly inside `dir`.
fn list_templates(dir: &Path) -> Result<Vec<(String, String)>, WebError> {
    let dir_error = |e: std::io::Error| WebError::TemplateDir {
        path: dir.display().to_string(),
        details: e.to_string(),
    };

    let mut templates = Vec::new();
    for entry in std::fs::read_dir(dir).map_err(dir_error)? {
        let path = entry.map_err(dir_error)?.path();
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if !path.is_file() || !name.ends_with(".html") {
            continue;
        }
        let source = std::fs::read_to_string(&path).map_err(dir_error)?;
        templates.push((name.to_string(), source));
    }

    // read_dir order is platform dependent
    templates.sort();
    Ok(templates)
}

async fn homepage(State(web): State<Arc<WebServer>>) -> Response {
    web.page(HOMEPAGE_TEMPLATE)
}

async fn after_logout(State(web): State<Arc<WebServer>>) -> Response {
    web.page(AFTER_LOGOUT_TEMPLATE)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{Body, to_bytes};
    use axum::http::Request;
    use tower::ServiceExt;

    fn context() -> TemplateContext {
        TemplateContext {
            client_name: "AuthService".to_string(),
            provider_url: "http://example.test".to_string(),
            theme_url: "/authservice/site/assets/themes/kubeflow/".to_string(),
            homepage_url: "/authservice/site/homepage".to_string(),
            after_logout_url: "/authservice/site/after_logout".to_string(),
            frontend: BTreeMap::from([("SUPPORT".to_string(), "ops@example.test".to_string())]),
        }
    }

    async fn get(app: Router, uri: &str) -> (StatusCode, String) {
        let request = Request::builder().uri(uri).body(Body::empty()).unwrap();
        let response = app.oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, String::from_utf8_lossy(&bytes).into_owned())
    }

    #[test]
    fn resolves_references() {
        let theme = "/authservice/site/assets/themes/kubeflow/";
        assert_eq!(
            resolve_url_ref(theme, "styles.css"),
            "/authservice/site/assets/themes/kubeflow/styles.css"
        );
        assert_eq!(resolve_url_ref(theme, "/favicon.ico"), "/favicon.ico");
        assert_eq!(
            resolve_url_ref("https://cdn.example.com/themes/dark/", "bg.svg"),
            "https://cdn.example.com/themes/dark/bg.svg"
        );
        assert_eq!(
            resolve_url_ref("https://cdn.example.com/themes/dark/", "../light/bg.svg"),
            "https://cdn.example.com/themes/light/bg.svg"
        );
        assert_eq!(
            resolve_url_ref(theme, "https://other.example.com/x.css"),
            "https://other.example.com/x.css"
        );
        assert_eq!(resolve_url_ref("themes", "styles.css"), "styles.css");
    }

    #[test]
    fn default_templates_render_context() {
        let web = WebServer::new(&[], context(), PathBuf::from("web/assets")).unwrap();

        let homepage = web.render(HOMEPAGE_TEMPLATE).unwrap();
        assert!(homepage.contains("Welcome to AuthService"));
        assert!(homepage.contains("/authservice/site/assets/themes/kubeflow/styles.css"));

        let after_logout = web.render(AFTER_LOGOUT_TEMPLATE).unwrap();
        assert!(after_logout.contains("href=\"/authservice/site/homepage\""));
    }

    #[test]
    fn directory_templates_override_defaults() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("homepage.html"),
            "<p>{{client_name}} / {{frontend.SUPPORT}}</p>",
        )
        .unwrap();
        std::fs::write(dir.path().join("notes.txt"), "{{ not a template").unwrap();

        let web =
            WebServer::new(&[dir.path().to_path_buf()], context(), PathBuf::from(".")).unwrap();

        assert_eq!(
            web.render(HOMEPAGE_TEMPLATE).unwrap(),
            "<p>AuthService / ops@example.test</p>"
        );
        // untouched defaults remain
        assert!(
            web.render(AFTER_LOGOUT_TEMPLATE)
                .unwrap()
                .contains("logged out")
        );
    }

    #[test]
    fn later_directories_win() {
        let first = tempfile::tempdir().unwrap();
        let second = tempfile::tempdir().unwrap();
        std::fs::write(first.path().join("homepage.html"), "first").unwrap();
        std::fs::write(second.path().join("homepage.html"), "second").unwrap();

        let dirs = [first.path().to_path_buf(), second.path().to_path_buf()];
        let web = WebServer::new(&dirs, context(), PathBuf::from(".")).unwrap();
        assert_eq!(web.render(HOMEPAGE_TEMPLATE).unwrap(), "second");
    }

    #[test]
    fn missing_template_directory_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope");
        assert!(WebServer::new(&[missing], context(), PathBuf::from(".")).is_err());
    }

    #[test]
    fn broken_template_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("homepage.html"), "{{#if}}").unwrap();
        assert!(WebServer::new(&[dir.path().to_path_buf()], context(), PathBuf::from(".")).is_err());
    }

    #[tokio::test]
    async fn serves_pages_and_assets() {
        let assets = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(assets.path().join("themes/kubeflow")).unwrap();
        std::fs::write(assets.path().join("themes/kubeflow/styles.css"), "body {}").unwrap();

        let app = WebServer::new(&[], context(), assets.path().to_path_buf())
            .unwrap()
            .router();

        let (status, body) = get(app.clone(), HOMEPAGE_PATH).await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.contains("AuthService"));

        let (status, _) = get(app.clone(), AFTER_LOGOUT_PATH).await;
        assert_eq!(status, StatusCode::OK);

        let (status, body) = get(app.clone(), "/site/assets/themes/kubeflow/styles.css").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "body {}");

        let (status, _) = get(app, "/site/landing").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
