use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

use super::clock::Clock;
use super::error::ServiceError;
use super::guard::ProtectedAccountGuard;
use super::store::{bounded, CredentialStore, ElevationOutcome};
use crate::config::AdminBootstrapConfig;
use crate::models::{normalize_email, Credential, CredentialChange};
use crate::utils::{hash_password_blocking, verify_password_blocking, Password, PasswordHashString};

#[derive(Debug, Clone, Serialize)]
pub struct BootstrapSummary {
    pub email: String,
    pub created: bool,
    pub updated_fields: Vec<String>,
    pub protected: bool,
    pub ran_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ElevationSummary {
    pub email: String,
    pub elevated: bool,
    pub protected: bool,
    pub ran_at: DateTime<Utc>,
}

/// Administrative credential management. Every write goes through the
/// protected-account guard.
#[derive(Clone)]
pub struct AdminService {
    credentials: Arc<dyn CredentialStore>,
    guard: ProtectedAccountGuard,
    clock: Arc<dyn Clock>,
    timeout: Duration,
}

impl AdminService {
    pub fn new(
        credentials: Arc<dyn CredentialStore>,
        guard: ProtectedAccountGuard,
        clock: Arc<dyn Clock>,
        timeout: Duration,
    ) -> Self {
        Self {
            credentials,
            guard,
            clock,
            timeout,
        }
    }

    async fn find(&self, email: &str) -> Result<Option<Credential>, ServiceError> {
        Ok(bounded(self.timeout, self.credentials.find_credential_by_email(email)).await?)
    }

    /// Create or converge the configured admin account.
    ///
    /// An existing account only receives the fields that differ, so running
    /// twice with the same input writes nothing the second time.
    pub async fn bootstrap_admin(
        &self,
        config: &AdminBootstrapConfig,
    ) -> Result<BootstrapSummary, ServiceError> {
        let email = normalize_email(&config.email);
        let ran_at = self.clock.now();

        let Some(existing) = self.find(&email).await? else {
            let hash = hash_password_blocking(Password::new(config.password.clone())).await?;
            let credential = Credential::new(
                &email,
                hash.into_string(),
                config.name.clone(),
                config.role.clone(),
                ran_at,
            );
            bounded(self.timeout, self.credentials.insert_credential(&credential)).await?;
            tracing::info!(user_id = %credential.user_id, email = %email, "Admin account created");

            let protected = config.protected && self.guard.elevate(&email).await?.is_set();
            return Ok(BootstrapSummary {
                email,
                created: true,
                updated_fields: Vec::new(),
                protected,
                ran_at,
            });
        };

        let password_matches = verify_password_blocking(
            Password::new(config.password.clone()),
            PasswordHashString::new(existing.password_hash.clone()),
        )
        .await?;

        let mut change = CredentialChange::default();
        if !password_matches {
            let hash = hash_password_blocking(Password::new(config.password.clone())).await?;
            change.password_hash = Some(hash.into_string());
        }
        if existing.role != config.role {
            change.role = Some(config.role.clone());
        }
        if existing.name != config.name {
            change.name = Some(config.name.clone());
        }
        if config.protected {
            change.protected = Some(true);
        }

        // Re-asserting the flag on an already protected account is a no-op,
        // not a violation.
        if existing.is_protected() && change.protected == Some(true) {
            change.protected = None;
        }

        let updated_fields = if change.is_empty() {
            Vec::new()
        } else {
            self.guard.apply(&existing, &change).await?
        };

        tracing::info!(
            user_id = %existing.user_id,
            email = %email,
            updated_fields = ?updated_fields,
            "Admin account converged"
        );

        Ok(BootstrapSummary {
            email,
            created: false,
            updated_fields: updated_fields.into_iter().map(str::to_string).collect(),
            protected: existing.is_protected() || config.protected,
            ran_at,
        })
    }

    /// Mark an account protected. Safe to repeat.
    pub async fn elevate(&self, email: &str) -> Result<ElevationSummary, ServiceError> {
        let outcome = self.guard.elevate(email).await?;
        Ok(ElevationSummary {
            email: normalize_email(email),
            elevated: outcome == ElevationOutcome::Elevated,
            protected: outcome.is_set(),
            ran_at: self.clock.now(),
        })
    }

    /// Apply an arbitrary admin change. Returns the fields written.
    pub async fn update_credential(
        &self,
        email: &str,
        change: &CredentialChange,
    ) -> Result<Vec<&'static str>, ServiceError> {
        let email = normalize_email(email);
        let credential = self
            .find(&email)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("credential {}", email)))?;

        self.guard.apply(&credential, change).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::clock::SystemClock;
    use crate::services::memory_store::InMemoryStore;

    fn service(store: Arc<InMemoryStore>) -> AdminService {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let timeout = Duration::from_secs(5);
        AdminService::new(
            store.clone(),
            ProtectedAccountGuard::new(store, clock.clone(), timeout),
            clock,
            timeout,
        )
    }

    fn bootstrap_config(protected: bool) -> AdminBootstrapConfig {
        AdminBootstrapConfig {
            email: "Admin@Example.com".to_string(),
            password: "initial-password".to_string(),
            name: "Admin".to_string(),
            role: "ADMIN".to_string(),
            protected,
        }
    }

    #[tokio::test]
    async fn test_bootstrap_creates_then_is_noop() {
        let store = Arc::new(InMemoryStore::new());
        let admin = service(store.clone());

        let first = admin.bootstrap_admin(&bootstrap_config(true)).await.unwrap();
        assert!(first.created);
        assert!(first.protected);
        assert_eq!(first.email, "admin@example.com");

        let second = admin.bootstrap_admin(&bootstrap_config(true)).await.unwrap();
        assert!(!second.created);
        assert!(second.updated_fields.is_empty());
        assert!(second.protected);
    }

    #[tokio::test]
    async fn test_bootstrap_refuses_password_change_on_protected_admin() {
        let store = Arc::new(InMemoryStore::new());
        let admin = service(store.clone());
        admin.bootstrap_admin(&bootstrap_config(true)).await.unwrap();

        let mut changed = bootstrap_config(false);
        changed.password = "rotated-password".to_string();
        let result = admin.bootstrap_admin(&changed).await;

        assert!(matches!(
            result,
            Err(ServiceError::ProtectedAccountViolation { .. })
        ));
        let stored = store
            .find_credential_by_email("admin@example.com")
            .await
            .unwrap()
            .unwrap();
        assert!(stored.is_protected());
    }

    #[tokio::test]
    async fn test_bootstrap_updates_unprotected_admin() {
        let store = Arc::new(InMemoryStore::new());
        let admin = service(store.clone());
        admin.bootstrap_admin(&bootstrap_config(false)).await.unwrap();

        let mut changed = bootstrap_config(false);
        changed.role = "SUPERADMIN".to_string();
        let summary = admin.bootstrap_admin(&changed).await.unwrap();

        assert_eq!(summary.updated_fields, vec!["role".to_string()]);
        assert!(!summary.protected);
    }

    #[tokio::test]
    async fn test_update_credential_unknown_email() {
        let admin = service(Arc::new(InMemoryStore::new()));
        let result = admin
            .update_credential("ghost@example.com", &CredentialChange::default())
            .await;
        assert!(matches!(result, Err(ServiceError::NotFound(_))));
    }
}
