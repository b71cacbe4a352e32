//! Services layer for access-auth.
//!
//! Session lifecycle, protected-account enforcement, audit, retention and
//! the signed access-platform client, all on top of the store contract.

pub mod access_platform;
mod admin;
mod audit;
mod auth;
pub mod clock;
mod database;
pub mod error;
mod guard;
mod jwt;
pub mod memory_store;
pub mod metrics;
pub mod retention;
mod session;
pub mod store;

pub use access_platform::{AccessPlatformClient, SigningKey};
pub use admin::{AdminService, BootstrapSummary, ElevationSummary};
pub use audit::AuditRecorder;
pub use auth::AuthService;
pub use clock::{Clock, ManualClock, SystemClock};
pub use database::Database;
pub use error::ServiceError;
pub use guard::ProtectedAccountGuard;
pub use jwt::{AccessTokenClaims, JwtService, TokenResponse};
pub use memory_store::InMemoryStore;
pub use retention::{
    retention_window, AuditPruneReport, RetentionPruner, RetentionRunReport, SessionPruneReport,
    SweepResult,
};
pub use session::{SessionManager, SessionPolicy, SessionTokens};
pub use store::{
    bounded, CredentialStore, ElevationOutcome, GuardedUpdateOutcome, RotateOutcome,
    SessionStore, StoreError,
};
