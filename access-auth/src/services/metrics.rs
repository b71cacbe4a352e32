use prometheus::{Encoder, IntCounter, IntCounterVec, Opts, Registry, TextEncoder};
use std::sync::OnceLock;

// Global registry
pub static REGISTRY: OnceLock<Registry> = OnceLock::new();

pub static SESSIONS_ISSUED_TOTAL: OnceLock<IntCounter> = OnceLock::new();
pub static SESSIONS_ROTATED_TOTAL: OnceLock<IntCounter> = OnceLock::new();
pub static SESSIONS_REVOKED_TOTAL: OnceLock<IntCounter> = OnceLock::new();
pub static SESSION_REPLAY_DETECTED_TOTAL: OnceLock<IntCounter> = OnceLock::new();
pub static SESSION_AUDIT_WRITE_FAILURES_TOTAL: OnceLock<IntCounter> = OnceLock::new();
pub static LOGIN_FAILURES_TOTAL: OnceLock<IntCounter> = OnceLock::new();
pub static RETENTION_PRUNED_ROWS_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();

fn counter(name: &str, help: &str, registry: &Registry) -> Result<IntCounter, prometheus::Error> {
    let metric = IntCounter::with_opts(Opts::new(name, help))?;
    registry.register(Box::new(metric.clone()))?;
    Ok(metric)
}

/// Build the registry and publish the counters. Calling it again is a no-op.
pub fn init_metrics() -> Result<(), prometheus::Error> {
    if REGISTRY.get().is_some() {
        return Ok(());
    }

    let registry = Registry::new();

    let issued = counter(
        "sessions_issued_total",
        "Refresh sessions issued at login",
        &registry,
    )?;
    let rotated = counter(
        "sessions_rotated_total",
        "Refresh sessions rotated into a successor",
        &registry,
    )?;
    let revoked = counter(
        "sessions_revoked_total",
        "Refresh sessions revoked explicitly",
        &registry,
    )?;
    let replay = counter(
        "session_replay_detected_total",
        "Revoked refresh tokens presented again",
        &registry,
    )?;
    let audit_failures = counter(
        "session_audit_write_failures_total",
        "Session audit events that could not be written",
        &registry,
    )?;
    let login_failures = counter(
        "login_failures_total",
        "Rejected login attempts",
        &registry,
    )?;

    let pruned = IntCounterVec::new(
        Opts::new(
            "retention_pruned_rows_total",
            "Rows deleted by retention sweeps",
        ),
        &["sweep"],
    )?;
    registry.register(Box::new(pruned.clone()))?;

    let _ = REGISTRY.set(registry);
    let _ = SESSIONS_ISSUED_TOTAL.set(issued);
    let _ = SESSIONS_ROTATED_TOTAL.set(rotated);
    let _ = SESSIONS_REVOKED_TOTAL.set(revoked);
    let _ = SESSION_REPLAY_DETECTED_TOTAL.set(replay);
    let _ = SESSION_AUDIT_WRITE_FAILURES_TOTAL.set(audit_failures);
    let _ = LOGIN_FAILURES_TOTAL.set(login_failures);
    let _ = RETENTION_PRUNED_ROWS_TOTAL.set(pruned);

    Ok(())
}

// Recording helpers are silent no-ops until init_metrics has run, so library
// callers and tests never depend on global setup.

pub fn record_session_issued() {
    if let Some(c) = SESSIONS_ISSUED_TOTAL.get() {
        c.inc();
    }
}

pub fn record_session_rotated() {
    if let Some(c) = SESSIONS_ROTATED_TOTAL.get() {
        c.inc();
    }
}

pub fn record_session_revoked() {
    if let Some(c) = SESSIONS_REVOKED_TOTAL.get() {
        c.inc();
    }
}

pub fn record_replay_detected() {
    if let Some(c) = SESSION_REPLAY_DETECTED_TOTAL.get() {
        c.inc();
    }
}

pub fn record_audit_write_failure() {
    if let Some(c) = SESSION_AUDIT_WRITE_FAILURES_TOTAL.get() {
        c.inc();
    }
}

pub fn record_login_failure() {
    if let Some(c) = LOGIN_FAILURES_TOTAL.get() {
        c.inc();
    }
}

pub fn record_pruned_rows(sweep: &str, rows: u64) {
    if let Some(c) = RETENTION_PRUNED_ROWS_TOTAL.get() {
        c.with_label_values(&[sweep]).inc_by(rows);
    }
}

pub fn get_metrics() -> String {
    let mut buffer = Vec::new();
    let encoder = TextEncoder::new();

    let registry = match REGISTRY.get() {
        Some(r) => r,
        None => {
            tracing::error!("Metrics registry not initialized");
            return "# Metrics registry not initialized\n".to_string();
        }
    };

    let metric_families = registry.gather();

    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::error!("Failed to encode metrics: {}", e);
        return format!("# Failed to encode metrics: {}\n", e);
    }

    match String::from_utf8(buffer) {
        Ok(s) => s,
        Err(e) => {
            tracing::error!("Failed to convert metrics to UTF-8: {}", e);
            format!("# Failed to convert metrics to UTF-8: {}\n", e)
        }
    }
}
