//! Append-only session audit trail.
//!
//! Writes happen inline with the triggering session operation but never
//! fail it: a lost write is logged at `error` and counted.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;

use super::error::ServiceError;
use super::metrics;
use super::store::{bounded, SessionStore};
use crate::models::{SessionAuditEvent, SessionEventType};

#[derive(Clone)]
pub struct AuditRecorder {
    store: Arc<dyn SessionStore>,
    timeout: Duration,
}

impl AuditRecorder {
    pub fn new(store: Arc<dyn SessionStore>, timeout: Duration) -> Self {
        Self { store, timeout }
    }

    /// Append one event. Returns whether it was persisted.
    pub async fn record(
        &self,
        session_id: Option<&str>,
        event_type: SessionEventType,
        metadata: serde_json::Value,
        at: DateTime<Utc>,
    ) -> bool {
        let event = SessionAuditEvent::new(session_id, event_type, metadata, at);

        match bounded(self.timeout, self.store.append_audit_event(&event)).await {
            Ok(()) => {
                tracing::debug!(
                    event_id = %event.event_id,
                    session_id = ?event.session_id,
                    event_type = %event.event_type_code,
                    "Session audit event recorded"
                );
                true
            }
            Err(e) => {
                metrics::record_audit_write_failure();
                tracing::error!(
                    event_id = %event.event_id,
                    session_id = ?event.session_id,
                    event_type = %event.event_type_code,
                    error = %e,
                    "Failed to record session audit event"
                );
                false
            }
        }
    }

    /// Events recorded for one session, oldest first.
    pub async fn list(&self, session_id: &str) -> Result<Vec<SessionAuditEvent>, ServiceError> {
        Ok(bounded(self.timeout, self.store.list_audit_events(session_id)).await?)
    }
}
