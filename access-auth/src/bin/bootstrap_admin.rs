//! Create or converge the configured admin account.

use access_auth::cli::{self, CliStore};
use access_auth::config::AdminBootstrapConfig;
use access_auth::services::{AdminService, ProtectedAccountGuard, SystemClock};
use std::process::ExitCode;
use std::sync::Arc;

#[tokio::main]
async fn main() -> ExitCode {
    cli::run("bootstrap-admin", || async {
        let config = AdminBootstrapConfig::from_env()?;
        let cli_store = CliStore::connect().await?;

        let clock = Arc::new(SystemClock);
        let guard =
            ProtectedAccountGuard::new(cli_store.store.clone(), clock.clone(), cli_store.timeout);
        let admin = AdminService::new(cli_store.store.clone(), guard, clock, cli_store.timeout);

        let result = admin.bootstrap_admin(&config).await;
        cli_store.close().await;
        Ok::<_, anyhow::Error>(result?)
    })
    .await
}
