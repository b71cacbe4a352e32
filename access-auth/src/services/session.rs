//! Refresh session lifecycle: issue, validate, rotate, revoke.
//!
//! A session is `Active` until it is revoked (explicitly, or by rotation into
//! a successor) or until `expiry_utc` passes. Rotation is a single store call
//! so two callers racing on one token can never both obtain a successor.

use chrono::{DateTime, Duration, Utc};
use serde_json::json;
use std::sync::Arc;
use uuid::Uuid;

use super::audit::AuditRecorder;
use super::clock::Clock;
use super::error::{ServiceError, SESSION_RESOURCE};
use super::jwt::JwtService;
use super::metrics;
use super::store::{bounded, RotateOutcome, SessionStore};
use crate::models::{
    generate_refresh_token, hash_token, RefreshSession, SessionEventType, SessionState,
};

#[derive(Debug, Clone)]
pub struct SessionPolicy {
    pub refresh_ttl: Duration,
    pub revoke_lineage_on_reuse: bool,
    pub store_timeout: std::time::Duration,
}

/// Token pair handed to the client. The refresh token is only ever returned
/// here; the store keeps its digest.
#[derive(Debug, Clone)]
pub struct SessionTokens {
    pub access_token: String,
    pub refresh_token: String,
    pub session_id: String,
    pub user_id: Uuid,
    pub refresh_expires_at: DateTime<Utc>,
}

#[derive(Clone)]
pub struct SessionManager {
    store: Arc<dyn SessionStore>,
    audit: AuditRecorder,
    jwt: JwtService,
    clock: Arc<dyn Clock>,
    policy: SessionPolicy,
}

impl SessionManager {
    pub fn new(
        store: Arc<dyn SessionStore>,
        audit: AuditRecorder,
        jwt: JwtService,
        clock: Arc<dyn Clock>,
        policy: SessionPolicy,
    ) -> Self {
        Self {
            store,
            audit,
            jwt,
            clock,
            policy,
        }
    }

    pub fn jwt(&self) -> &JwtService {
        &self.jwt
    }

    /// Start a new session for `user_id`.
    pub async fn issue(&self, user_id: Uuid) -> Result<SessionTokens, ServiceError> {
        let now = self.clock.now();
        let refresh_token = generate_refresh_token();
        let session = RefreshSession::new(
            hash_token(&refresh_token),
            user_id,
            now,
            self.policy.refresh_ttl,
        );
        let access_token = self
            .jwt
            .generate_access_token(user_id, &session.session_id, now)?;

        bounded(self.policy.store_timeout, self.store.insert_session(&session)).await?;

        self.audit
            .record(
                Some(session.session_id.as_str()),
                SessionEventType::Created,
                json!({ "user_id": user_id }),
                now,
            )
            .await;
        metrics::record_session_issued();

        tracing::info!(
            user_id = %user_id,
            session_id = %session.session_id,
            "Refresh session issued"
        );

        Ok(SessionTokens {
            access_token,
            refresh_token,
            session_id: session.session_id,
            user_id,
            refresh_expires_at: session.expiry_utc,
        })
    }

    /// Check a presented refresh token: it must exist, be unrevoked and
    /// unexpired, checked in that order.
    pub async fn validate(&self, refresh_token: &str) -> Result<RefreshSession, ServiceError> {
        let session = self.load(refresh_token).await?;
        match session.state(self.clock.now()) {
            SessionState::Active => Ok(session),
            SessionState::Revoked => Err(ServiceError::SessionRevoked),
            SessionState::Expired => Err(ServiceError::SessionExpired),
        }
    }

    /// Consume `refresh_token` and hand out its successor.
    ///
    /// Presenting a token that is already revoked is treated as reuse. Losing
    /// a race against a concurrent rotation fails with `SessionRevoked` but
    /// leaves the winner's successor alone.
    pub async fn rotate(&self, refresh_token: &str) -> Result<SessionTokens, ServiceError> {
        let now = self.clock.now();
        let current = self.load(refresh_token).await?;

        match current.state(now) {
            SessionState::Active => {}
            SessionState::Revoked => {
                self.handle_reuse(&current, now).await;
                return Err(ServiceError::SessionRevoked);
            }
            SessionState::Expired => return Err(ServiceError::SessionExpired),
        }

        let next_token = generate_refresh_token();
        let successor = RefreshSession::successor_of(
            &current,
            hash_token(&next_token),
            now,
            self.policy.refresh_ttl,
        );
        let access_token =
            self.jwt
                .generate_access_token(current.user_id, &successor.session_id, now)?;

        let outcome = bounded(
            self.policy.store_timeout,
            self.store
                .rotate_session(&current.session_id, now, &successor),
        )
        .await?;

        match outcome {
            RotateOutcome::Rotated => {}
            RotateOutcome::AlreadyRevoked => {
                self.handle_lost_race(&current);
                return Err(ServiceError::SessionRevoked);
            }
            RotateOutcome::Missing => {
                return Err(ServiceError::NotFound(SESSION_RESOURCE.to_string()))
            }
        }

        self.audit
            .record(
                Some(current.session_id.as_str()),
                SessionEventType::Rotated,
                json!({ "successor": successor.session_id }),
                now,
            )
            .await;
        self.audit
            .record(
                Some(successor.session_id.as_str()),
                SessionEventType::Created,
                json!({ "user_id": current.user_id, "rotated_from": current.session_id }),
                now,
            )
            .await;
        metrics::record_session_rotated();

        tracing::info!(
            user_id = %current.user_id,
            session_id = %current.session_id,
            successor = %successor.session_id,
            "Refresh session rotated"
        );

        Ok(SessionTokens {
            access_token,
            refresh_token: next_token,
            session_id: successor.session_id,
            user_id: current.user_id,
            refresh_expires_at: successor.expiry_utc,
        })
    }

    /// Revoke a session. Unknown and already revoked tokens are a no-op.
    pub async fn revoke(&self, refresh_token: &str) -> Result<(), ServiceError> {
        let now = self.clock.now();
        let session_id = hash_token(refresh_token);

        let revoked = bounded(
            self.policy.store_timeout,
            self.store.revoke_session(&session_id, now),
        )
        .await?;

        if revoked {
            self.audit
                .record(
                    Some(session_id.as_str()),
                    SessionEventType::Revoked,
                    json!({ "reason": "logout" }),
                    now,
                )
                .await;
            metrics::record_session_revoked();
            tracing::info!(session_id = %session_id, "Refresh session revoked");
        } else {
            tracing::debug!(session_id = %session_id, "Revoke was a no-op");
        }

        Ok(())
    }

    async fn load(&self, refresh_token: &str) -> Result<RefreshSession, ServiceError> {
        let session_id = hash_token(refresh_token);
        bounded(
            self.policy.store_timeout,
            self.store.find_session(&session_id),
        )
        .await?
        .ok_or_else(|| ServiceError::NotFound(SESSION_RESOURCE.to_string()))
    }

    /// Another rotation consumed the session between our read and our write.
    /// The winner already recorded the rotation.
    fn handle_lost_race(&self, session: &RefreshSession) {
        metrics::record_replay_detected();
        tracing::warn!(
            user_id = %session.user_id,
            session_id = %session.session_id,
            "Concurrent rotation lost the race for refresh session"
        );
    }

    /// A consumed token came back. The caller always gets `SessionRevoked`;
    /// failures here are logged, never returned.
    async fn handle_reuse(&self, session: &RefreshSession, now: DateTime<Utc>) {
        metrics::record_replay_detected();
        tracing::warn!(
            user_id = %session.user_id,
            session_id = %session.session_id,
            "Revoked refresh token presented again"
        );

        let mut lineage_revoked = 0;
        if self.policy.revoke_lineage_on_reuse {
            match bounded(
                self.policy.store_timeout,
                self.store.revoke_lineage(&session.session_id, now),
            )
            .await
            {
                Ok(count) => lineage_revoked = count,
                Err(e) => tracing::error!(
                    session_id = %session.session_id,
                    error = %e,
                    "Failed to revoke session lineage"
                ),
            }
        }

        self.audit
            .record(
                Some(session.session_id.as_str()),
                SessionEventType::Revoked,
                json!({ "reason": "token_reuse", "lineage_revoked": lineage_revoked }),
                now,
            )
            .await;
    }
}
