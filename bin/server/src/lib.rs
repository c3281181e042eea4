//! authservice: an OIDC authentication gatekeeper.
//!
//! Three listeners run side by side:
//! - the authentication server, which answers every proxied request with
//!   identity headers, a login redirect or an error
//! - the readiness probe
//! - the web server with the login/logout landing pages and their assets
//!
//! Provider discovery and store initialization happen in the background;
//! until they finish the probe and the gate report 503.

pub mod auth;
pub mod config;
pub mod error;
pub mod health;
pub mod startup;
pub mod web;
