//! Refresh session model - long-lived, rotating login sessions.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use chrono::{DateTime, Duration, Utc};
use rand::RngCore;
use serde::Serialize;
use sha2::{Digest, Sha256};
use sqlx::FromRow;
use uuid::Uuid;

/// Refresh session entity.
///
/// `session_id` is the SHA-256 digest of the opaque token handed to the
/// client; the token itself is never stored.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct RefreshSession {
    pub session_id: String,
    pub user_id: Uuid,
    pub issued_utc: DateTime<Utc>,
    pub expiry_utc: DateTime<Utc>,
    pub revoked_utc: Option<DateTime<Utc>>,
    pub rotated_from: Option<String>,
}

/// Observable state of a session at a given instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Active,
    Revoked,
    Expired,
}

impl RefreshSession {
    /// Create a new active session.
    pub fn new(session_id: String, user_id: Uuid, issued_at: DateTime<Utc>, ttl: Duration) -> Self {
        Self {
            session_id,
            user_id,
            issued_utc: issued_at,
            expiry_utc: issued_at + ttl,
            revoked_utc: None,
            rotated_from: None,
        }
    }

    /// Create the successor of `parent`, linked through `rotated_from`.
    pub fn successor_of(
        parent: &RefreshSession,
        session_id: String,
        issued_at: DateTime<Utc>,
        ttl: Duration,
    ) -> Self {
        Self {
            rotated_from: Some(parent.session_id.clone()),
            ..Self::new(session_id, parent.user_id, issued_at, ttl)
        }
    }

    pub fn is_revoked(&self) -> bool {
        self.revoked_utc.is_some()
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expiry_utc
    }

    /// Revocation is checked before expiry.
    pub fn state(&self, now: DateTime<Utc>) -> SessionState {
        if self.is_revoked() {
            SessionState::Revoked
        } else if self.is_expired(now) {
            SessionState::Expired
        } else {
            SessionState::Active
        }
    }
}

/// Generate a fresh opaque refresh token (256 bits, URL-safe base64).
pub fn generate_refresh_token() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Hash a token using SHA-256
pub fn hash_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hex::encode(hasher.finalize())
}
