//! HTTP handlers for access-auth.

pub mod auth;
pub mod metrics;

pub use auth::*;
