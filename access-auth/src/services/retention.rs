//! Retention sweeps for refresh sessions and their audit trail.
//!
//! Run order within one pass is expired sessions, then revoked sessions,
//! then audit events, all against a single `now`.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use tokio::task::JoinHandle;

use super::audit::AuditRecorder;
use super::clock::Clock;
use super::error::ServiceError;
use super::metrics;
use super::store::{bounded, SessionStore};
use crate::config::RetentionConfig;
use crate::models::SessionEventType;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SweepResult {
    pub deleted: u64,
    pub remaining: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionPruneReport {
    pub ran_at: DateTime<Utc>,
    pub expired_deleted: u64,
    pub revoked_deleted: u64,
    pub remaining: u64,
    pub revoked_retention_days: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct AuditPruneReport {
    pub ran_at: DateTime<Utc>,
    pub deleted: u64,
    pub remaining: u64,
    pub retention_days: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct RetentionRunReport {
    pub sessions: SessionPruneReport,
    pub audit: AuditPruneReport,
}

/// Convert a retention period in days to a duration, rejecting negative and
/// non-finite values.
pub fn retention_window(days: f64) -> Result<Duration, ServiceError> {
    if !days.is_finite() || days < 0.0 {
        return Err(ServiceError::Validation(format!(
            "retention days must be a non-negative number, got {}",
            days
        )));
    }
    let millis = days.min(MAX_RETENTION_DAYS) * 86_400_000.0;
    Ok(Duration::milliseconds(millis as i64))
}

// Beyond any representable timestamp; larger windows keep everything.
const MAX_RETENTION_DAYS: f64 = 365.0 * 1_000_000.0;

fn cutoff(now: DateTime<Utc>, days: f64) -> Result<DateTime<Utc>, ServiceError> {
    let window = retention_window(days)?;
    Ok(now
        .checked_sub_signed(window)
        .unwrap_or(DateTime::<Utc>::MIN_UTC))
}

#[derive(Clone)]
pub struct RetentionPruner {
    store: Arc<dyn SessionStore>,
    audit: AuditRecorder,
    timeout: std::time::Duration,
}

impl RetentionPruner {
    pub fn new(
        store: Arc<dyn SessionStore>,
        audit: AuditRecorder,
        timeout: std::time::Duration,
    ) -> Self {
        Self {
            store,
            audit,
            timeout,
        }
    }

    /// Delete every session with `expiry_utc < now`.
    pub async fn prune_expired_sessions(
        &self,
        now: DateTime<Utc>,
    ) -> Result<SweepResult, ServiceError> {
        let deleted = bounded(self.timeout, self.store.delete_expired_sessions(now)).await?;
        let remaining = bounded(self.timeout, self.store.count_sessions()).await?;

        if deleted > 0 {
            self.audit
                .record(
                    None,
                    SessionEventType::ExpiredCleanup,
                    json!({ "deleted": deleted, "remaining": remaining }),
                    now,
                )
                .await;
        }
        metrics::record_pruned_rows("expired", deleted);
        tracing::info!(deleted, remaining, "Expired session sweep finished");

        Ok(SweepResult { deleted, remaining })
    }

    /// Delete sessions revoked more than `retention_days` ago that have not
    /// expired yet. Expired rows belong to the expired sweep.
    pub async fn prune_revoked_sessions(
        &self,
        now: DateTime<Utc>,
        retention_days: f64,
    ) -> Result<SweepResult, ServiceError> {
        let revoked_before = cutoff(now, retention_days)?;

        let deleted = bounded(
            self.timeout,
            self.store.delete_revoked_sessions(revoked_before, now),
        )
        .await?;
        let remaining = bounded(self.timeout, self.store.count_sessions()).await?;

        metrics::record_pruned_rows("revoked", deleted);
        tracing::info!(
            deleted,
            remaining,
            retention_days,
            "Revoked session sweep finished"
        );

        Ok(SweepResult { deleted, remaining })
    }

    /// Delete audit events older than `retention_days`.
    pub async fn prune_audit_events(
        &self,
        now: DateTime<Utc>,
        retention_days: f64,
    ) -> Result<AuditPruneReport, ServiceError> {
        let before = cutoff(now, retention_days)?;

        let deleted = bounded(self.timeout, self.store.delete_audit_events_before(before)).await?;
        let remaining = bounded(self.timeout, self.store.count_audit_events()).await?;

        metrics::record_pruned_rows("audit", deleted);
        tracing::info!(
            deleted,
            remaining,
            retention_days,
            "Session audit sweep finished"
        );

        Ok(AuditPruneReport {
            ran_at: now,
            deleted,
            remaining,
            retention_days,
        })
    }

    /// Expired sweep followed by the revoked sweep. The retention value is
    /// checked before anything is deleted.
    pub async fn prune_sessions(
        &self,
        now: DateTime<Utc>,
        revoked_retention_days: f64,
    ) -> Result<SessionPruneReport, ServiceError> {
        retention_window(revoked_retention_days)?;

        let expired = self.prune_expired_sessions(now).await?;
        let revoked = self
            .prune_revoked_sessions(now, revoked_retention_days)
            .await?;

        Ok(SessionPruneReport {
            ran_at: now,
            expired_deleted: expired.deleted,
            revoked_deleted: revoked.deleted,
            remaining: revoked.remaining,
            revoked_retention_days,
        })
    }

    /// One full pass.
    pub async fn run_once(
        &self,
        now: DateTime<Utc>,
        config: &RetentionConfig,
    ) -> Result<RetentionRunReport, ServiceError> {
        retention_window(config.revoked_retention_days)?;
        retention_window(config.audit_retention_days)?;

        let sessions = self
            .prune_sessions(now, config.revoked_retention_days)
            .await?;
        let audit = self
            .prune_audit_events(now, config.audit_retention_days)
            .await?;

        Ok(RetentionRunReport { sessions, audit })
    }

    /// Run a pass every `prune_interval_seconds`. A failed pass is logged
    /// and the next tick tries again.
    pub fn spawn_scheduled(
        self,
        config: RetentionConfig,
        clock: Arc<dyn Clock>,
    ) -> Option<JoinHandle<()>> {
        if config.prune_interval_seconds == 0 {
            tracing::info!("Scheduled retention pruning disabled");
            return None;
        }

        let period = std::time::Duration::from_secs(config.prune_interval_seconds);
        Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                ticker.tick().await;
                let now = clock.now();
                match self.run_once(now, &config).await {
                    Ok(report) => tracing::info!(
                        expired_deleted = report.sessions.expired_deleted,
                        revoked_deleted = report.sessions.revoked_deleted,
                        audit_deleted = report.audit.deleted,
                        "Retention pass finished"
                    ),
                    Err(e) => tracing::error!(
                        error = %e,
                        transient = e.is_transient(),
                        "Retention pass failed"
                    ),
                }
            }
        }))
    }
}
