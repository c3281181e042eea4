//! Identity headers handed to the protected service.

use serde::{Deserialize, Serialize};

/// How an authenticated user is announced downstream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserIdOptions {
    /// Header carrying `prefix + user id`.
    pub header: String,
    /// Header carrying the raw token; empty disables it.
    pub token_header: String,
    /// Prepended to the user id.
    pub prefix: String,
    /// Claim holding the user id.
    pub claim: String,
}

impl Default for UserIdOptions {
    fn default() -> Self {
        Self {
            header: "kubeflow-userid".to_string(),
            token_header: "kubeflow-userid-token".to_string(),
            prefix: String::new(),
            claim: "email".to_string(),
        }
    }
}

impl UserIdOptions {
    /// Returns the identity header value for `user_id`.
    #[must_use]
    pub fn header_value(&self, user_id: &str) -> String {
        format!("{}{}", self.prefix, user_id)
    }

    /// Returns the token header name if token forwarding is enabled.
    #[must_use]
    pub fn token_header(&self) -> Option<&str> {
        Some(self.token_header.as_str()).filter(|h| !h.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_kubeflow() {
        let opts = UserIdOptions::default();
        assert_eq!(opts.header, "kubeflow-userid");
        assert_eq!(opts.token_header(), Some("kubeflow-userid-token"));
        assert_eq!(opts.claim, "email");
        assert_eq!(opts.header_value("alice@example.com"), "alice@example.com");
    }

    #[test]
    fn prefix_is_prepended() {
        let opts = UserIdOptions {
            prefix: "accounts.google.com:".to_string(),
            ..UserIdOptions::default()
        };
        assert_eq!(opts.header_value("bob"), "accounts.google.com:bob");
    }

    #[test]
    fn empty_token_header_disables_forwarding() {
        let opts = UserIdOptions {
            token_header: String::new(),
            ..UserIdOptions::default()
        };
        assert!(opts.token_header().is_none());
    }
}
