pub mod audit_event;
pub mod credential;
pub mod refresh_session;

pub use audit_event::{SessionAuditEvent, SessionEventType};
pub use credential::{normalize_email, Credential, CredentialChange};
pub use refresh_session::{
    generate_refresh_token, hash_token, RefreshSession, SessionState,
};
