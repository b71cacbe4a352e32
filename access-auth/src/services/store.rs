//! Storage contract for sessions, audit events and credentials.
//!
//! Every state transition that has to be linearizable is a single store call
//! (`rotate_session`, `revoke_session`, `mark_protected`,
//! `update_unprotected_credential`), so implementations can make it atomic.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::future::Future;
use std::time::Duration;
use thiserror::Error;

use crate::models::{Credential, CredentialChange, RefreshSession, SessionAuditEvent};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store operation timed out after {0:?}")]
    Timeout(Duration),

    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("store error: {0}")]
    Backend(#[from] anyhow::Error),
}

/// Result of an atomic revoke-and-replace.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RotateOutcome {
    /// Old session revoked and successor inserted in one unit.
    Rotated,
    /// Another caller revoked the session first; nothing was written.
    AlreadyRevoked,
    /// The session no longer exists.
    Missing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElevationOutcome {
    Elevated,
    AlreadyProtected,
    NotFound,
}

impl ElevationOutcome {
    /// Whether the account is protected after the call.
    pub fn is_set(&self) -> bool {
        !matches!(self, ElevationOutcome::NotFound)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardedUpdateOutcome {
    Updated,
    /// The credential is protected; nothing was written.
    Protected,
    NotFound,
}

#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn insert_session(&self, session: &RefreshSession) -> Result<(), StoreError>;

    async fn find_session(&self, session_id: &str) -> Result<Option<RefreshSession>, StoreError>;

    /// Set `revoked_utc` on `session_id` if unset and insert `successor`,
    /// both or neither.
    async fn rotate_session(
        &self,
        session_id: &str,
        revoked_at: DateTime<Utc>,
        successor: &RefreshSession,
    ) -> Result<RotateOutcome, StoreError>;

    /// Set `revoked_utc` if unset. Returns whether this call revoked it.
    async fn revoke_session(
        &self,
        session_id: &str,
        revoked_at: DateTime<Utc>,
    ) -> Result<bool, StoreError>;

    /// Revoke every session descended from `session_id` via `rotated_from`.
    async fn revoke_lineage(
        &self,
        session_id: &str,
        revoked_at: DateTime<Utc>,
    ) -> Result<u64, StoreError>;

    /// Delete sessions with `expiry_utc < now`.
    async fn delete_expired_sessions(&self, now: DateTime<Utc>) -> Result<u64, StoreError>;

    /// Delete sessions with `revoked_utc < revoked_before` and `expiry_utc >= now`.
    async fn delete_revoked_sessions(
        &self,
        revoked_before: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<u64, StoreError>;

    async fn count_sessions(&self) -> Result<u64, StoreError>;

    async fn append_audit_event(&self, event: &SessionAuditEvent) -> Result<(), StoreError>;

    async fn delete_audit_events_before(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError>;

    async fn count_audit_events(&self) -> Result<u64, StoreError>;

    async fn list_audit_events(
        &self,
        session_id: &str,
    ) -> Result<Vec<SessionAuditEvent>, StoreError>;

    async fn health_check(&self) -> Result<(), StoreError>;
}

#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn find_credential_by_email(&self, email: &str)
        -> Result<Option<Credential>, StoreError>;

    /// Insert a new credential; duplicate emails fail with `Conflict`.
    async fn insert_credential(&self, credential: &Credential) -> Result<(), StoreError>;

    /// Apply password/name/role changes only while the credential is
    /// unprotected. The protected flag itself is never written here.
    async fn update_unprotected_credential(
        &self,
        email: &str,
        change: &CredentialChange,
        at: DateTime<Utc>,
    ) -> Result<GuardedUpdateOutcome, StoreError>;

    /// Change the display name, which is not guarded.
    async fn update_credential_name(
        &self,
        email: &str,
        name: &str,
        at: DateTime<Utc>,
    ) -> Result<bool, StoreError>;

    /// Set the protected flag. The only write path for it.
    async fn mark_protected(
        &self,
        email: &str,
        at: DateTime<Utc>,
    ) -> Result<ElevationOutcome, StoreError>;
}

/// Run a store call under a deadline.
pub async fn bounded<T, F>(timeout: Duration, fut: F) -> Result<T, StoreError>
where
    F: Future<Output = Result<T, StoreError>>,
{
    tokio::time::timeout(timeout, fut)
        .await
        .map_err(|_| StoreError::Timeout(timeout))?
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_bounded_times_out() {
        let result: Result<(), StoreError> = bounded(Duration::from_millis(10), async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        })
        .await;
        assert!(matches!(result, Err(StoreError::Timeout(_))));
    }

    #[tokio::test]
    async fn test_bounded_passes_through_result() {
        let result = bounded(Duration::from_secs(1), async { Ok::<_, StoreError>(7) }).await;
        assert_eq!(result.unwrap(), 7);
    }
}
