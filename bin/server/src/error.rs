//! Domain error types for server operations.
//!
//! These follow the same pattern as the library crates: plain enums with a
//! hand-written `Display`, wrapped in a rootcause `Report` where they cross
//! function boundaries.

use std::fmt;

/// Errors that stop the process.
#[derive(Debug)]
pub enum StartupError {
    /// Configuration is missing or invalid.
    Config { details: String },
    /// The CA bundle could not be read.
    CaBundle { path: String, details: String },
    /// The provider is misconfigured in a way retrying cannot fix.
    Provider { details: String },
    /// The session store could not be initialized.
    Store { details: String },
    /// The landing page templates could not be loaded.
    Web { details: String },
    /// A listener could not be bound.
    Bind { addr: String, details: String },
    /// A server exited with an error.
    Serve { server: &'static str, details: String },
}

impl fmt::Display for StartupError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Config { details } => write!(f, "invalid configuration: {}", details),
            Self::CaBundle { path, details } => {
                write!(f, "could not read CA bundle '{}': {}", path, details)
            }
            Self::Provider { details } => write!(f, "OIDC provider setup failed: {}", details),
            Self::Store { details } => write!(f, "session store setup failed: {}", details),
            Self::Web { details } => write!(f, "web server setup failed: {}", details),
            Self::Bind { addr, details } => write!(f, "failed to bind to '{}': {}", addr, details),
            Self::Serve { server, details } => write!(f, "{} server error: {}", server, details),
        }
    }
}

impl std::error::Error for StartupError {}

/// Errors from loading or rendering landing page templates.
#[derive(Debug)]
pub enum WebError {
    /// A template directory could not be read.
    TemplateDir { path: String, details: String },
    /// A template failed to compile.
    Template { name: String, details: String },
    /// A template failed to render.
    Render { name: String, details: String },
}

impl fmt::Display for WebError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TemplateDir { path, details } => {
                write!(f, "cannot read template directory '{}': {}", path, details)
            }
            Self::Template { name, details } => {
                write!(f, "template '{}' is invalid: {}", name, details)
            }
            Self::Render { name, details } => {
                write!(f, "error executing template '{}': {}", name, details)
            }
        }
    }
}

impl std::error::Error for WebError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bind_error_names_the_address() {
        let err = StartupError::Bind {
            addr: "0.0.0.0:8080".to_string(),
            details: "address in use".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "failed to bind to '0.0.0.0:8080': address in use"
        );
    }
}
