//! PostgreSQL store for sessions, audit events and credentials.
//!
//! Uses sqlx runtime queries; conditional updates carry the concurrency
//! guarantees (`WHERE revoked_utc IS NULL`, `WHERE protected = FALSE`).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPool;

use super::store::{
    CredentialStore, ElevationOutcome, GuardedUpdateOutcome, RotateOutcome, SessionStore,
    StoreError,
};
use crate::models::{Credential, CredentialChange, RefreshSession, SessionAuditEvent};

/// PostgreSQL database wrapper.
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    /// Create a new database wrapper from a connection pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Get the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn db_err(e: sqlx::Error) -> StoreError {
    match e {
        sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
            StoreError::Unavailable(e.to_string())
        }
        sqlx::Error::Database(ref db) if db.is_unique_violation() => {
            StoreError::Conflict(db.message().to_string())
        }
        other => StoreError::Backend(anyhow::anyhow!(other)),
    }
}

#[async_trait]
impl SessionStore for Database {
    async fn insert_session(&self, session: &RefreshSession) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO refresh_sessions (session_id, user_id, issued_utc, expiry_utc, revoked_utc, rotated_from)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(&session.session_id)
        .bind(session.user_id)
        .bind(session.issued_utc)
        .bind(session.expiry_utc)
        .bind(session.revoked_utc)
        .bind(&session.rotated_from)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn find_session(&self, session_id: &str) -> Result<Option<RefreshSession>, StoreError> {
        sqlx::query_as::<_, RefreshSession>("SELECT * FROM refresh_sessions WHERE session_id = $1")
            .bind(session_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)
    }

    async fn rotate_session(
        &self,
        session_id: &str,
        revoked_at: DateTime<Utc>,
        successor: &RefreshSession,
    ) -> Result<RotateOutcome, StoreError> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;

        // Row lock: a concurrent rotation blocks here, then sees revoked_utc set.
        let revoked = sqlx::query(
            "UPDATE refresh_sessions SET revoked_utc = $2 WHERE session_id = $1 AND revoked_utc IS NULL",
        )
        .bind(session_id)
        .bind(revoked_at)
        .execute(&mut *tx)
        .await
        .map_err(db_err)?;

        if revoked.rows_affected() == 0 {
            let exists: Option<(String,)> =
                sqlx::query_as("SELECT session_id FROM refresh_sessions WHERE session_id = $1")
                    .bind(session_id)
                    .fetch_optional(&mut *tx)
                    .await
                    .map_err(db_err)?;
            tx.rollback().await.map_err(db_err)?;
            return Ok(if exists.is_some() {
                RotateOutcome::AlreadyRevoked
            } else {
                RotateOutcome::Missing
            });
        }

        sqlx::query(
            r#"
            INSERT INTO refresh_sessions (session_id, user_id, issued_utc, expiry_utc, revoked_utc, rotated_from)
            VALUES ($1, $2, $3, $4, NULL, $5)
            "#,
        )
        .bind(&successor.session_id)
        .bind(successor.user_id)
        .bind(successor.issued_utc)
        .bind(successor.expiry_utc)
        .bind(&successor.rotated_from)
        .execute(&mut *tx)
        .await
        .map_err(db_err)?;

        tx.commit().await.map_err(db_err)?;
        Ok(RotateOutcome::Rotated)
    }

    async fn revoke_session(
        &self,
        session_id: &str,
        revoked_at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "UPDATE refresh_sessions SET revoked_utc = $2 WHERE session_id = $1 AND revoked_utc IS NULL",
        )
        .bind(session_id)
        .bind(revoked_at)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(result.rows_affected() == 1)
    }

    async fn revoke_lineage(
        &self,
        session_id: &str,
        revoked_at: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        let result = sqlx::query(
            r#"
            WITH RECURSIVE lineage AS (
                SELECT session_id FROM refresh_sessions WHERE rotated_from = $1
                UNION
                SELECT s.session_id FROM refresh_sessions s
                JOIN lineage l ON s.rotated_from = l.session_id
            )
            UPDATE refresh_sessions SET revoked_utc = $2
            WHERE session_id IN (SELECT session_id FROM lineage) AND revoked_utc IS NULL
            "#,
        )
        .bind(session_id)
        .bind(revoked_at)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(result.rows_affected())
    }

    async fn delete_expired_sessions(&self, now: DateTime<Utc>) -> Result<u64, StoreError> {
        let result = sqlx::query("DELETE FROM refresh_sessions WHERE expiry_utc < $1")
            .bind(now)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(result.rows_affected())
    }

    async fn delete_revoked_sessions(
        &self,
        revoked_before: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        let result = sqlx::query(
            r#"
            DELETE FROM refresh_sessions
            WHERE revoked_utc IS NOT NULL AND revoked_utc < $1 AND expiry_utc >= $2
            "#,
        )
        .bind(revoked_before)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(result.rows_affected())
    }

    async fn count_sessions(&self) -> Result<u64, StoreError> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM refresh_sessions")
            .fetch_one(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(count as u64)
    }

    async fn append_audit_event(&self, event: &SessionAuditEvent) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO session_audit_events (event_id, session_id, event_type_code, created_utc, metadata)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(event.event_id)
        .bind(&event.session_id)
        .bind(&event.event_type_code)
        .bind(event.created_utc)
        .bind(&event.metadata)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn delete_audit_events_before(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError> {
        let result = sqlx::query("DELETE FROM session_audit_events WHERE created_utc < $1")
            .bind(cutoff)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(result.rows_affected())
    }

    async fn count_audit_events(&self) -> Result<u64, StoreError> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM session_audit_events")
            .fetch_one(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(count as u64)
    }

    async fn list_audit_events(
        &self,
        session_id: &str,
    ) -> Result<Vec<SessionAuditEvent>, StoreError> {
        sqlx::query_as::<_, SessionAuditEvent>(
            "SELECT * FROM session_audit_events WHERE session_id = $1 ORDER BY created_utc, event_id",
        )
        .bind(session_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)
    }

    async fn health_check(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| {
                tracing::error!("Database health check failed: {}", e);
                db_err(e)
            })?;
        Ok(())
    }
}

#[async_trait]
impl CredentialStore for Database {
    async fn find_credential_by_email(
        &self,
        email: &str,
    ) -> Result<Option<Credential>, StoreError> {
        sqlx::query_as::<_, Credential>("SELECT * FROM users WHERE email = $1")
            .bind(email)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)
    }

    async fn insert_credential(&self, credential: &Credential) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO users (user_id, email, password_hash, name, role, protected, created_utc, updated_utc)
            VALUES ($1, $2, $3, $4, $5, FALSE, $6, $7)
            "#,
        )
        .bind(credential.user_id)
        .bind(&credential.email)
        .bind(&credential.password_hash)
        .bind(&credential.name)
        .bind(&credential.role)
        .bind(credential.created_utc)
        .bind(credential.updated_utc)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn update_unprotected_credential(
        &self,
        email: &str,
        change: &CredentialChange,
        at: DateTime<Utc>,
    ) -> Result<GuardedUpdateOutcome, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE users SET
                password_hash = COALESCE($2, password_hash),
                name = COALESCE($3, name),
                role = COALESCE($4, role),
                updated_utc = $5
            WHERE email = $1 AND protected = FALSE
            "#,
        )
        .bind(email)
        .bind(&change.password_hash)
        .bind(&change.name)
        .bind(&change.role)
        .bind(at)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        if result.rows_affected() == 1 {
            return Ok(GuardedUpdateOutcome::Updated);
        }

        let exists: Option<(bool,)> = sqlx::query_as("SELECT protected FROM users WHERE email = $1")
            .bind(email)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(match exists {
            Some(_) => GuardedUpdateOutcome::Protected,
            None => GuardedUpdateOutcome::NotFound,
        })
    }

    async fn update_credential_name(
        &self,
        email: &str,
        name: &str,
        at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query("UPDATE users SET name = $2, updated_utc = $3 WHERE email = $1")
            .bind(email)
            .bind(name)
            .bind(at)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(result.rows_affected() == 1)
    }

    async fn mark_protected(
        &self,
        email: &str,
        at: DateTime<Utc>,
    ) -> Result<ElevationOutcome, StoreError> {
        let result = sqlx::query(
            "UPDATE users SET protected = TRUE, updated_utc = $2 WHERE email = $1 AND protected = FALSE",
        )
        .bind(email)
        .bind(at)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        if result.rows_affected() == 1 {
            return Ok(ElevationOutcome::Elevated);
        }

        let exists: Option<(bool,)> = sqlx::query_as("SELECT protected FROM users WHERE email = $1")
            .bind(email)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(match exists {
            Some(_) => ElevationOutcome::AlreadyProtected,
            None => ElevationOutcome::NotFound,
        })
    }
}
