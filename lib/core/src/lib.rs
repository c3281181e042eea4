//! Core types and utilities for authservice.
//!
//! This crate provides the foundational pieces shared by the access domain
//! and the server: the `Result` alias used with rootcause, and the opaque
//! random identifiers that key sessions and pending logins.

pub mod error;
pub mod id;

pub use error::Result;
pub use id::{EntropyError, SessionId, StateId, random_secret};
