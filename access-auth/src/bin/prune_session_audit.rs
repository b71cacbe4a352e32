//! Delete session audit events past their retention window.

use access_auth::cli::{self, CliStore};
use access_auth::config::{Environment, RetentionConfig};
use access_auth::services::{retention_window, AuditRecorder, RetentionPruner};
use chrono::Utc;
use std::process::ExitCode;

#[tokio::main]
async fn main() -> ExitCode {
    cli::run("prune-session-audit", || async {
        let is_prod = Environment::from_env()? == Environment::Prod;
        let retention = RetentionConfig::from_env(is_prod)?;
        retention_window(retention.audit_retention_days)?;

        let cli_store = CliStore::connect().await?;
        let pruner = RetentionPruner::new(
            cli_store.store.clone(),
            AuditRecorder::new(cli_store.store.clone(), cli_store.timeout),
            cli_store.timeout,
        );

        let result = pruner
            .prune_audit_events(Utc::now(), retention.audit_retention_days)
            .await;
        cli_store.close().await;
        Ok::<_, anyhow::Error>(result?)
    })
    .await
}
