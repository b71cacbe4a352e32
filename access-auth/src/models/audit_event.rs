//! Session audit event model - append-only lifecycle log.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Session audit event types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionEventType {
    Created,
    Rotated,
    Revoked,
    LoginFailed,
    ExpiredCleanup,
}

impl SessionEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionEventType::Created => "created",
            SessionEventType::Rotated => "rotated",
            SessionEventType::Revoked => "revoked",
            SessionEventType::LoginFailed => "login_failed",
            SessionEventType::ExpiredCleanup => "expired_cleanup",
        }
    }
}

impl std::str::FromStr for SessionEventType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "created" => Ok(SessionEventType::Created),
            "rotated" => Ok(SessionEventType::Rotated),
            "revoked" => Ok(SessionEventType::Revoked),
            "login_failed" => Ok(SessionEventType::LoginFailed),
            "expired_cleanup" => Ok(SessionEventType::ExpiredCleanup),
            _ => Err(format!("Invalid session event type: {}", s)),
        }
    }
}

/// Audit event entity. Never mutated after creation.
///
/// `session_id` is empty for events that are not tied to one session
/// (failed logins, cleanup runs).
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct SessionAuditEvent {
    pub event_id: Uuid,
    pub session_id: Option<String>,
    pub event_type_code: String,
    pub created_utc: DateTime<Utc>,
    pub metadata: serde_json::Value,
}

impl SessionAuditEvent {
    pub fn new(
        session_id: Option<&str>,
        event_type: SessionEventType,
        metadata: serde_json::Value,
        at: DateTime<Utc>,
    ) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            session_id: session_id.map(str::to_string),
            event_type_code: event_type.as_str().to_string(),
            created_utc: at,
            metadata,
        }
    }

    pub fn event_type(&self) -> Option<SessionEventType> {
        self.event_type_code.parse().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_type_codes_round_trip() {
        for event_type in [
            SessionEventType::Created,
            SessionEventType::Rotated,
            SessionEventType::Revoked,
            SessionEventType::LoginFailed,
            SessionEventType::ExpiredCleanup,
        ] {
            let event = SessionAuditEvent::new(
                Some("s"),
                event_type,
                serde_json::json!({}),
                Utc::now(),
            );
            assert_eq!(event.event_type(), Some(event_type));
        }
        assert!("deleted".parse::<SessionEventType>().is_err());
    }
}
