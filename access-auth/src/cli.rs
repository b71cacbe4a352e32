//! Shared plumbing for the administrative binaries.
//!
//! Each binary prints exactly one JSON line on stdout (its summary, or
//! `{"error": ...}`) and logs to stderr. Failure exits non-zero.

use serde::Serialize;
use std::future::Future;
use std::process::ExitCode;
use std::sync::Arc;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::config::{DatabaseConfig, Environment};
use crate::db;
use crate::services::Database;

/// Connected store plus the pool it owns.
pub struct CliStore {
    pub pool: sqlx::PgPool,
    pub store: Arc<Database>,
    pub timeout: std::time::Duration,
}

impl CliStore {
    pub async fn connect() -> Result<Self, anyhow::Error> {
        let is_prod = Environment::from_env()? == Environment::Prod;
        let config = DatabaseConfig::from_env(is_prod)?;
        let pool = db::create_pool(&config).await?;
        db::run_migrations(&pool).await?;

        Ok(Self {
            store: Arc::new(Database::new(pool.clone())),
            pool,
            timeout: config.store_timeout(),
        })
    }

    pub async fn close(self) {
        db::close_pool(self.pool).await;
    }
}

pub fn init_stderr_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().json().with_writer(std::io::stderr))
        .try_init();
}

/// Load `.env`, set up logging, run `task`, print its outcome.
pub async fn run<T, F, Fut>(name: &str, task: F) -> ExitCode
where
    T: Serialize,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T, anyhow::Error>>,
{
    dotenvy::dotenv().ok();
    init_stderr_logging();

    match task().await {
        Ok(summary) => match serde_json::to_string(&summary) {
            Ok(line) => {
                println!("{}", line);
                ExitCode::SUCCESS
            }
            Err(e) => fail(name, anyhow::anyhow!("failed to encode summary: {}", e)),
        },
        Err(e) => fail(name, e),
    }
}

fn fail(name: &str, error: anyhow::Error) -> ExitCode {
    tracing::error!(command = name, error = %error, "Command failed");
    println!("{}", serde_json::json!({ "error": error.to_string() }));
    ExitCode::FAILURE
}
