//! In-process store used by tests and local runs.
//!
//! One mutex per table; every compound operation holds the lock for its
//! whole read-check-write, which makes rotation and elevation atomic.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::Barrier;

use super::store::{
    CredentialStore, ElevationOutcome, GuardedUpdateOutcome, RotateOutcome, SessionStore,
    StoreError,
};
use crate::models::{Credential, CredentialChange, RefreshSession, SessionAuditEvent};

pub struct InMemoryStore {
    sessions: Mutex<HashMap<String, RefreshSession>>,
    audit_events: Mutex<Vec<SessionAuditEvent>>,
    credentials: Mutex<HashMap<String, Credential>>,
    fail_audit_writes: Mutex<bool>,
    fail_session_writes: Mutex<bool>,
    read_gate: Mutex<Option<Arc<Barrier>>>,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> Result<MutexGuard<'_, T>, StoreError> {
    mutex
        .lock()
        .map_err(|e| StoreError::Backend(anyhow::anyhow!("In-memory store mutex poisoned: {}", e)))
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            audit_events: Mutex::new(Vec::new()),
            credentials: Mutex::new(HashMap::new()),
            fail_audit_writes: Mutex::new(false),
            fail_session_writes: Mutex::new(false),
            read_gate: Mutex::new(None),
        }
    }

    /// Make every subsequent audit append fail with `Unavailable`.
    pub fn set_fail_audit_writes(&self, fail: bool) {
        if let Ok(mut flag) = self.fail_audit_writes.lock() {
            *flag = fail;
        }
    }

    /// Make every subsequent session insert, rotation, revocation and
    /// deletion fail with `Unavailable`. Reads keep working.
    pub fn set_fail_session_writes(&self, fail: bool) {
        if let Ok(mut flag) = self.fail_session_writes.lock() {
            *flag = fail;
        }
    }

    /// Hold every `find_session` at `gate` until enough readers arrive.
    /// Lets tests line up concurrent callers on the same snapshot.
    pub fn set_read_gate(&self, gate: Option<Arc<Barrier>>) {
        if let Ok(mut slot) = self.read_gate.lock() {
            *slot = gate;
        }
    }

    fn check_session_writes(&self) -> Result<(), StoreError> {
        if *lock(&self.fail_session_writes)? {
            return Err(StoreError::Unavailable("session table unavailable".to_string()));
        }
        Ok(())
    }

    /// All audit events in append order.
    pub fn audit_log(&self) -> Vec<SessionAuditEvent> {
        self.audit_events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl SessionStore for InMemoryStore {
    async fn insert_session(&self, session: &RefreshSession) -> Result<(), StoreError> {
        self.check_session_writes()?;
        let mut sessions = lock(&self.sessions)?;
        if sessions.contains_key(&session.session_id) {
            return Err(StoreError::Conflict("session already exists".to_string()));
        }
        sessions.insert(session.session_id.clone(), session.clone());
        Ok(())
    }

    async fn find_session(&self, session_id: &str) -> Result<Option<RefreshSession>, StoreError> {
        let gate = lock(&self.read_gate)?.clone();
        if let Some(gate) = gate {
            gate.wait().await;
        }
        Ok(lock(&self.sessions)?.get(session_id).cloned())
    }

    async fn rotate_session(
        &self,
        session_id: &str,
        revoked_at: DateTime<Utc>,
        successor: &RefreshSession,
    ) -> Result<RotateOutcome, StoreError> {
        self.check_session_writes()?;
        let mut sessions = lock(&self.sessions)?;
        if sessions.contains_key(&successor.session_id) {
            return Err(StoreError::Conflict("session already exists".to_string()));
        }
        match sessions.get_mut(session_id) {
            None => Ok(RotateOutcome::Missing),
            Some(current) if current.revoked_utc.is_some() => Ok(RotateOutcome::AlreadyRevoked),
            Some(current) => {
                current.revoked_utc = Some(revoked_at);
                sessions.insert(successor.session_id.clone(), successor.clone());
                Ok(RotateOutcome::Rotated)
            }
        }
    }

    async fn revoke_session(
        &self,
        session_id: &str,
        revoked_at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        self.check_session_writes()?;
        let mut sessions = lock(&self.sessions)?;
        match sessions.get_mut(session_id) {
            Some(session) if session.revoked_utc.is_none() => {
                session.revoked_utc = Some(revoked_at);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn revoke_lineage(
        &self,
        session_id: &str,
        revoked_at: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        self.check_session_writes()?;
        let mut sessions = lock(&self.sessions)?;
        let mut frontier: HashSet<String> = HashSet::from([session_id.to_string()]);
        let mut seen = frontier.clone();
        let mut revoked = 0;

        while !frontier.is_empty() {
            let children: Vec<String> = sessions
                .values()
                .filter(|s| {
                    s.rotated_from
                        .as_ref()
                        .is_some_and(|parent| frontier.contains(parent))
                })
                .map(|s| s.session_id.clone())
                .filter(|id| !seen.contains(id))
                .collect();

            frontier.clear();
            for id in children {
                if let Some(child) = sessions.get_mut(&id) {
                    if child.revoked_utc.is_none() {
                        child.revoked_utc = Some(revoked_at);
                        revoked += 1;
                    }
                }
                seen.insert(id.clone());
                frontier.insert(id);
            }
        }

        Ok(revoked)
    }

    async fn delete_expired_sessions(&self, now: DateTime<Utc>) -> Result<u64, StoreError> {
        self.check_session_writes()?;
        let mut sessions = lock(&self.sessions)?;
        let before = sessions.len();
        sessions.retain(|_, s| s.expiry_utc >= now);
        Ok((before - sessions.len()) as u64)
    }

    async fn delete_revoked_sessions(
        &self,
        revoked_before: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        self.check_session_writes()?;
        let mut sessions = lock(&self.sessions)?;
        let before = sessions.len();
        sessions.retain(|_, s| {
            let prunable = s.revoked_utc.is_some_and(|at| at < revoked_before) && s.expiry_utc >= now;
            !prunable
        });
        Ok((before - sessions.len()) as u64)
    }

    async fn count_sessions(&self) -> Result<u64, StoreError> {
        Ok(lock(&self.sessions)?.len() as u64)
    }

    async fn append_audit_event(&self, event: &SessionAuditEvent) -> Result<(), StoreError> {
        if *lock(&self.fail_audit_writes)? {
            return Err(StoreError::Unavailable("audit table unavailable".to_string()));
        }
        lock(&self.audit_events)?.push(event.clone());
        Ok(())
    }

    async fn delete_audit_events_before(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError> {
        let mut events = lock(&self.audit_events)?;
        let before = events.len();
        events.retain(|e| e.created_utc >= cutoff);
        Ok((before - events.len()) as u64)
    }

    async fn count_audit_events(&self) -> Result<u64, StoreError> {
        Ok(lock(&self.audit_events)?.len() as u64)
    }

    async fn list_audit_events(
        &self,
        session_id: &str,
    ) -> Result<Vec<SessionAuditEvent>, StoreError> {
        Ok(lock(&self.audit_events)?
            .iter()
            .filter(|e| e.session_id.as_deref() == Some(session_id))
            .cloned()
            .collect())
    }

    async fn health_check(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

#[async_trait]
impl CredentialStore for InMemoryStore {
    async fn find_credential_by_email(
        &self,
        email: &str,
    ) -> Result<Option<Credential>, StoreError> {
        Ok(lock(&self.credentials)?.get(email).cloned())
    }

    async fn insert_credential(&self, credential: &Credential) -> Result<(), StoreError> {
        let mut credentials = lock(&self.credentials)?;
        if credentials.contains_key(&credential.email) {
            return Err(StoreError::Conflict(format!(
                "email {} already registered",
                credential.email
            )));
        }
        credentials.insert(credential.email.clone(), credential.clone());
        Ok(())
    }

    async fn update_unprotected_credential(
        &self,
        email: &str,
        change: &CredentialChange,
        at: DateTime<Utc>,
    ) -> Result<GuardedUpdateOutcome, StoreError> {
        let mut credentials = lock(&self.credentials)?;
        match credentials.get_mut(email) {
            None => Ok(GuardedUpdateOutcome::NotFound),
            Some(c) if c.is_protected() => Ok(GuardedUpdateOutcome::Protected),
            Some(c) => {
                c.apply(change, at);
                Ok(GuardedUpdateOutcome::Updated)
            }
        }
    }

    async fn update_credential_name(
        &self,
        email: &str,
        name: &str,
        at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let mut credentials = lock(&self.credentials)?;
        match credentials.get_mut(email) {
            None => Ok(false),
            Some(c) => {
                c.name = name.to_string();
                c.updated_utc = at;
                Ok(true)
            }
        }
    }

    async fn mark_protected(
        &self,
        email: &str,
        at: DateTime<Utc>,
    ) -> Result<ElevationOutcome, StoreError> {
        let mut credentials = lock(&self.credentials)?;
        match credentials.get_mut(email) {
            None => Ok(ElevationOutcome::NotFound),
            Some(c) => {
                if c.mark_protected() {
                    c.updated_utc = at;
                    Ok(ElevationOutcome::Elevated)
                } else {
                    Ok(ElevationOutcome::AlreadyProtected)
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use uuid::Uuid;

    fn session(id: &str, parent: Option<&str>, at: DateTime<Utc>) -> RefreshSession {
        let mut s = RefreshSession::new(id.to_string(), Uuid::nil(), at, Duration::days(7));
        s.rotated_from = parent.map(str::to_string);
        s
    }

    #[tokio::test]
    async fn test_rotate_is_single_use() {
        let store = InMemoryStore::new();
        let t0 = Utc::now();
        store.insert_session(&session("a", None, t0)).await.unwrap();

        let first = store
            .rotate_session("a", t0, &session("b", Some("a"), t0))
            .await
            .unwrap();
        let second = store
            .rotate_session("a", t0, &session("c", Some("a"), t0))
            .await
            .unwrap();

        assert_eq!(first, RotateOutcome::Rotated);
        assert_eq!(second, RotateOutcome::AlreadyRevoked);
        assert!(store.find_session("c").await.unwrap().is_none());
        assert_eq!(store.count_sessions().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_revoke_lineage_follows_descendants_only() {
        let store = InMemoryStore::new();
        let t0 = Utc::now();
        for (id, parent) in [("a", None), ("b", Some("a")), ("c", Some("b")), ("x", None)] {
            store.insert_session(&session(id, parent, t0)).await.unwrap();
        }

        let revoked = store.revoke_lineage("a", t0).await.unwrap();

        assert_eq!(revoked, 2);
        assert!(store.find_session("c").await.unwrap().unwrap().is_revoked());
        assert!(!store.find_session("a").await.unwrap().unwrap().is_revoked());
        assert!(!store.find_session("x").await.unwrap().unwrap().is_revoked());
    }

    #[tokio::test]
    async fn test_guarded_update_refuses_protected_credential() {
        let store = InMemoryStore::new();
        let now = Utc::now();
        let credential = Credential::new(
            "root@example.com",
            "h".to_string(),
            "Root".to_string(),
            "ADMIN".to_string(),
            now,
        );
        store.insert_credential(&credential).await.unwrap();
        store.mark_protected("root@example.com", now).await.unwrap();

        let change = CredentialChange {
            role: Some("VIEWER".to_string()),
            ..Default::default()
        };
        let outcome = store
            .update_unprotected_credential("root@example.com", &change, now)
            .await
            .unwrap();

        assert_eq!(outcome, GuardedUpdateOutcome::Protected);
        let stored = store
            .find_credential_by_email("root@example.com")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.role, "ADMIN");
    }
}
