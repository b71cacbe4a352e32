//! Mark an account protected: `elevate-admin <email>`, or `ADMIN_EMAIL`.

use access_auth::cli::{self, CliStore};
use access_auth::services::{AdminService, ProtectedAccountGuard, SystemClock};
use std::process::ExitCode;
use std::sync::Arc;

#[tokio::main]
async fn main() -> ExitCode {
    cli::run("elevate-admin", || async {
        let email = std::env::args()
            .nth(1)
            .or_else(|| std::env::var("ADMIN_EMAIL").ok())
            .filter(|e| !e.trim().is_empty())
            .ok_or_else(|| anyhow::anyhow!("usage: elevate-admin <email> (or set ADMIN_EMAIL)"))?;

        let cli_store = CliStore::connect().await?;
        let clock = Arc::new(SystemClock);
        let guard =
            ProtectedAccountGuard::new(cli_store.store.clone(), clock.clone(), cli_store.timeout);
        let admin = AdminService::new(cli_store.store.clone(), guard, clock, cli_store.timeout);

        let result = admin.elevate(&email).await;
        cli_store.close().await;
        Ok::<_, anyhow::Error>(result?)
    })
    .await
}
