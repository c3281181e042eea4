//! Authentication domain for authservice.
//!
//! This crate provides:
//! - The decoded claim model and user-id resolution (`Claims`)
//! - Authenticated sessions and their OAuth2 tokens (`Session`, `TokenSet`)
//! - Pending logins used across the provider redirect (`PendingLoginState`)
//! - The storage contracts and an in-memory engine (`SessionStore`,
//!   `StateStore`, `MemoryStore`)
//! - The whitelist and readiness gate (`AccessPolicy`, `Readiness`)
//!
//! # Example
//!
//! ```
//! use authservice_access::{AccessPolicy, GateDecision, Readiness};
//!
//! let policy = AccessPolicy::new(["/authservice/"]);
//! let readiness = Readiness::new();
//!
//! assert_eq!(policy.evaluate("/authservice/site/homepage", &readiness), GateDecision::Bypass);
//! assert_eq!(policy.evaluate("/notebooks", &readiness), GateDecision::NotReady);
//!
//! readiness.mark_ready();
//! assert_eq!(policy.evaluate("/notebooks", &readiness), GateDecision::Authenticate);
//! ```

pub mod claims;
pub mod error;
pub mod identity;
pub mod login_state;
pub mod oidc;
pub mod policy;
pub mod session;
pub mod store;

// Re-export main types at crate root
pub use claims::{ClaimValue, Claims};
pub use error::{AuthenticationError, StoreError};
pub use identity::UserIdOptions;
pub use login_state::PendingLoginState;
pub use oidc::{OidcConfig, OidcConfigBuilder};
pub use policy::{AccessPolicy, GateDecision, Readiness};
pub use session::{Session, TokenSet};
pub use store::{ExpiryReaper, MemoryStore, SessionStore, StateStore};
