//! Protected-account enforcement for credential mutations.
//!
//! The protected flag only moves from false to true, and only through
//! [`ProtectedAccountGuard::elevate`]. Writes to password or role go through
//! a store update conditional on the flag still being false, so a concurrent
//! elevation cannot be overtaken by a stale check.

use std::sync::Arc;
use std::time::Duration;

use super::clock::Clock;
use super::error::ServiceError;
use super::store::{bounded, CredentialStore, ElevationOutcome, GuardedUpdateOutcome};
use crate::models::{normalize_email, Credential, CredentialChange};

#[derive(Clone)]
pub struct ProtectedAccountGuard {
    store: Arc<dyn CredentialStore>,
    clock: Arc<dyn Clock>,
    timeout: Duration,
}

impl ProtectedAccountGuard {
    pub fn new(store: Arc<dyn CredentialStore>, clock: Arc<dyn Clock>, timeout: Duration) -> Self {
        Self {
            store,
            clock,
            timeout,
        }
    }

    pub fn is_protected(&self, credential: &Credential) -> bool {
        credential.is_protected()
    }

    /// Reject a change to password, role or the flag on a protected account.
    pub fn guard_mutation(
        &self,
        credential: &Credential,
        change: &CredentialChange,
    ) -> Result<(), ServiceError> {
        if !credential.is_protected() {
            return Ok(());
        }

        let fields = change.guarded_fields();
        if fields.is_empty() {
            return Ok(());
        }

        tracing::warn!(
            user_id = %credential.user_id,
            fields = ?fields,
            "Rejected mutation of protected account"
        );
        Err(ServiceError::ProtectedAccountViolation {
            fields: fields.join(", "),
        })
    }

    /// Raise the protected flag. Already protected is a no-op.
    pub async fn elevate(&self, email: &str) -> Result<ElevationOutcome, ServiceError> {
        let email = normalize_email(email);
        let outcome = bounded(
            self.timeout,
            self.store.mark_protected(&email, self.clock.now()),
        )
        .await?;

        match outcome {
            ElevationOutcome::Elevated => {
                tracing::info!(email = %email, "Account elevated to protected");
            }
            ElevationOutcome::AlreadyProtected => {
                tracing::debug!(email = %email, "Account already protected");
            }
            ElevationOutcome::NotFound => {
                return Err(ServiceError::NotFound(format!("credential {}", email)));
            }
        }
        Ok(outcome)
    }

    /// Check and write `change` against `credential`. Returns the names of
    /// the fields that were written.
    ///
    /// `protected: Some(true)` is routed to [`Self::elevate`];
    /// `protected: Some(false)` is accepted only while the account is still
    /// unprotected, where it changes nothing.
    pub async fn apply(
        &self,
        credential: &Credential,
        change: &CredentialChange,
    ) -> Result<Vec<&'static str>, ServiceError> {
        self.guard_mutation(credential, change)?;

        let now = self.clock.now();
        let fields_only = CredentialChange {
            protected: None,
            ..change.clone()
        };
        let mut written = Vec::new();

        if !fields_only.is_empty() {
            if fields_only.guarded_fields().is_empty() {
                let name = fields_only.name.as_deref().unwrap_or(&credential.name);
                let found = bounded(
                    self.timeout,
                    self.store
                        .update_credential_name(&credential.email, name, now),
                )
                .await?;
                if !found {
                    return Err(ServiceError::NotFound(format!(
                        "credential {}",
                        credential.email
                    )));
                }
            } else {
                let outcome = bounded(
                    self.timeout,
                    self.store
                        .update_unprotected_credential(&credential.email, &fields_only, now),
                )
                .await?;
                match outcome {
                    GuardedUpdateOutcome::Updated => {}
                    // Elevated between our read and this write.
                    GuardedUpdateOutcome::Protected => {
                        return Err(ServiceError::ProtectedAccountViolation {
                            fields: fields_only.guarded_fields().join(", "),
                        });
                    }
                    GuardedUpdateOutcome::NotFound => {
                        return Err(ServiceError::NotFound(format!(
                            "credential {}",
                            credential.email
                        )));
                    }
                }
            }
            written.extend(fields_only.touched_fields());
        }

        if change.protected == Some(true)
            && self.elevate(&credential.email).await? == ElevationOutcome::Elevated
        {
            written.push("protected");
        }

        Ok(written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::clock::SystemClock;
    use crate::services::memory_store::InMemoryStore;
    use chrono::Utc;

    async fn seeded() -> (Arc<InMemoryStore>, ProtectedAccountGuard, Credential) {
        let store = Arc::new(InMemoryStore::new());
        let credential = Credential::new(
            "ops@example.com",
            "hash".to_string(),
            "Ops".to_string(),
            "ADMIN".to_string(),
            Utc::now(),
        );
        store.insert_credential(&credential).await.unwrap();
        let guard = ProtectedAccountGuard::new(
            store.clone(),
            Arc::new(SystemClock),
            Duration::from_secs(1),
        );
        (store, guard, credential)
    }

    #[tokio::test]
    async fn test_guard_allows_any_change_on_unprotected_account() {
        let (_, guard, credential) = seeded().await;
        let change = CredentialChange {
            role: Some("VIEWER".to_string()),
            protected: Some(false),
            ..Default::default()
        };
        assert!(guard.guard_mutation(&credential, &change).is_ok());
    }

    #[tokio::test]
    async fn test_guard_rejects_password_role_and_flag_on_protected_account() {
        let (store, guard, _) = seeded().await;
        guard.elevate("ops@example.com").await.unwrap();
        let credential = store
            .find_credential_by_email("ops@example.com")
            .await
            .unwrap()
            .unwrap();

        for change in [
            CredentialChange {
                password_hash: Some("new".to_string()),
                ..Default::default()
            },
            CredentialChange {
                role: Some("VIEWER".to_string()),
                ..Default::default()
            },
            CredentialChange {
                protected: Some(false),
                ..Default::default()
            },
        ] {
            assert!(matches!(
                guard.guard_mutation(&credential, &change),
                Err(ServiceError::ProtectedAccountViolation { .. })
            ));
        }

        let rename = CredentialChange {
            name: Some("Operations".to_string()),
            ..Default::default()
        };
        assert_eq!(guard.apply(&credential, &rename).await.unwrap(), vec!["name"]);
    }

    #[tokio::test]
    async fn test_elevate_is_idempotent() {
        let (_, guard, _) = seeded().await;
        assert_eq!(
            guard.elevate("OPS@example.com").await.unwrap(),
            ElevationOutcome::Elevated
        );
        assert_eq!(
            guard.elevate("ops@example.com").await.unwrap(),
            ElevationOutcome::AlreadyProtected
        );
        assert!(matches!(
            guard.elevate("nobody@example.com").await,
            Err(ServiceError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_stale_read_cannot_overwrite_elevated_account() {
        let (store, guard, stale) = seeded().await;
        guard.elevate("ops@example.com").await.unwrap();

        let change = CredentialChange {
            role: Some("VIEWER".to_string()),
            ..Default::default()
        };
        let result = guard.apply(&stale, &change).await;

        assert!(matches!(
            result,
            Err(ServiceError::ProtectedAccountViolation { .. })
        ));
        let stored = store
            .find_credential_by_email("ops@example.com")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.role, "ADMIN");
        assert!(stored.is_protected());
    }
}
