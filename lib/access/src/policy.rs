//! Request gating ahead of authentication.
//!
//! Every request is first checked against the whitelist, then against the
//! readiness flag, and only then handed to the authentication handlers.
//! Whitelisted paths pass even before startup has finished.

use std::sync::atomic::{AtomicBool, Ordering};

/// Process-wide flag raised once startup (discovery, store setup) completes.
///
/// The flag only ever goes from not-ready to ready.
#[derive(Debug, Default)]
pub struct Readiness(AtomicBool);

impl Readiness {
    /// Creates a flag in the not-ready state.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks the service ready.
    pub fn mark_ready(&self) {
        self.0.store(true, Ordering::Release);
    }

    /// Returns true once the service is ready.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Outcome of gating a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateDecision {
    /// The path is whitelisted; accept without authentication.
    Bypass,
    /// Startup has not finished; reject as unavailable.
    NotReady,
    /// Continue to authentication.
    Authenticate,
}

/// Path prefixes exempted from authentication.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AccessPolicy {
    whitelist: Vec<String>,
}

impl AccessPolicy {
    /// Creates a policy from a list of prefixes. Empty entries are ignored.
    #[must_use]
    pub fn new<I, S>(prefixes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            whitelist: prefixes
                .into_iter()
                .map(Into::into)
                .filter(|p: &String| !p.is_empty())
                .collect(),
        }
    }

    /// Returns the whitelisted prefixes.
    #[must_use]
    pub fn whitelist(&self) -> &[String] {
        &self.whitelist
    }

    /// Returns true if `path` starts with any whitelisted prefix.
    #[must_use]
    pub fn is_whitelisted(&self, path: &str) -> bool {
        self.whitelist.iter().any(|prefix| path.starts_with(prefix))
    }

    /// Decides what to do with a request for `path`.
    #[must_use]
    pub fn evaluate(&self, path: &str, readiness: &Readiness) -> GateDecision {
        if self.is_whitelisted(path) {
            GateDecision::Bypass
        } else if !readiness.is_ready() {
            GateDecision::NotReady
        } else {
            GateDecision::Authenticate
        }
    }
}
