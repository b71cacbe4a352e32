use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

use super::audit::AuditRecorder;
use super::clock::Clock;
use super::error::ServiceError;
use super::jwt::TokenResponse;
use super::metrics;
use super::session::SessionManager;
use super::store::{bounded, CredentialStore};
use crate::models::{normalize_email, SessionEventType};
use crate::utils::{
    verify_password_blocking, Password, PasswordHashString, DUMMY_PASSWORD_HASH,
};

/// Login, refresh and logout on top of the session manager.
#[derive(Clone)]
pub struct AuthService {
    credentials: Arc<dyn CredentialStore>,
    sessions: SessionManager,
    audit: AuditRecorder,
    clock: Arc<dyn Clock>,
    timeout: Duration,
}

impl AuthService {
    pub fn new(
        credentials: Arc<dyn CredentialStore>,
        sessions: SessionManager,
        audit: AuditRecorder,
        clock: Arc<dyn Clock>,
        timeout: Duration,
    ) -> Self {
        Self {
            credentials,
            sessions,
            audit,
            clock,
            timeout,
        }
    }

    pub fn sessions(&self) -> &SessionManager {
        &self.sessions
    }

    /// Unknown email and wrong password fail the same way.
    pub async fn login(&self, email: &str, password: &str) -> Result<TokenResponse, ServiceError> {
        let email = normalize_email(email);
        let credential = bounded(self.timeout, self.credentials.find_credential_by_email(&email))
            .await?;

        let stored_hash = credential
            .as_ref()
            .map_or(DUMMY_PASSWORD_HASH.to_string(), |c| c.password_hash.clone());
        let verified = verify_password_blocking(
            Password::new(password.to_string()),
            PasswordHashString::new(stored_hash),
        )
        .await?;

        let credential = match credential {
            Some(c) if verified => c,
            _ => {
                self.audit
                    .record(
                        None,
                        SessionEventType::LoginFailed,
                        json!({ "email": email }),
                        self.clock.now(),
                    )
                    .await;
                metrics::record_login_failure();
                tracing::warn!(email = %email, "Login failed");
                return Err(ServiceError::Authentication);
            }
        };

        let tokens = self.sessions.issue(credential.user_id).await?;
        tracing::info!(user_id = %credential.user_id, "Login succeeded");

        Ok(self
            .sessions
            .jwt()
            .token_response(tokens.access_token, tokens.refresh_token))
    }

    pub async fn refresh(&self, refresh_token: &str) -> Result<TokenResponse, ServiceError> {
        let tokens = self.sessions.rotate(refresh_token).await?;
        Ok(self
            .sessions
            .jwt()
            .token_response(tokens.access_token, tokens.refresh_token))
    }

    pub async fn logout(&self, refresh_token: &str) -> Result<(), ServiceError> {
        self.sessions.revoke(refresh_token).await
    }
}
