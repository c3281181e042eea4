//! Error types for the access crate.
//!
//! - `AuthenticationError`: the caller's identity could not be established
//! - `StoreError`: a session or login-state engine failed
//!
//! Store engines return these wrapped in a rootcause `Report`.

use std::fmt;

/// Errors from establishing a user's identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthenticationError {
    /// Neither the configured user-id claim nor `sub` carries a usable value.
    MissingUserId { claim: String },
    /// The token payload could not be decoded into a claim set.
    InvalidClaims { reason: String },
}

impl fmt::Display for AuthenticationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingUserId { claim } => {
                write!(f, "no usable '{claim}' or 'sub' claim to identify the user")
            }
            Self::InvalidClaims { reason } => {
                write!(f, "invalid token claims: {reason}")
            }
        }
    }
}

impl std::error::Error for AuthenticationError {}

/// Errors from session and login-state stores.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The backing engine could not be reached or rejected the operation.
    Backend { operation: &'static str, details: String },
    /// A stored record could not be decoded.
    Corrupt { details: String },
    /// An identifier could not be generated.
    Entropy { details: String },
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Backend { operation, details } => {
                write!(f, "store {operation} failed: {details}")
            }
            Self::Corrupt { details } => write!(f, "stored record is corrupt: {details}"),
            Self::Entropy { details } => write!(f, "cannot generate identifier: {details}"),
        }
    }
}

impl std::error::Error for StoreError {}

impl From<authservice_core::EntropyError> for StoreError {
    fn from(e: authservice_core::EntropyError) -> Self {
        Self::Entropy { details: e.reason }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_user_id_names_the_claim() {
        let err = AuthenticationError::MissingUserId {
            claim: "email".to_string(),
        };
        assert!(err.to_string().contains("'email'"));
        assert!(err.to_string().contains("'sub'"));
    }

    #[test]
    fn backend_error_names_the_operation() {
        let err = StoreError::Backend {
            operation: "save",
            details: "connection refused".to_string(),
        };
        assert_eq!(err.to_string(), "store save failed: connection refused");
    }
}
