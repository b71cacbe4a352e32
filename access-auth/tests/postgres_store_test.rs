//! PostgreSQL store tests. Run with `TEST_DATABASE_URL` set, `--ignored` and `--test-threads=1`.

mod common;

use access_auth::models::{hash_token, Credential, CredentialChange, RefreshSession, SessionAuditEvent, SessionEventType};
use access_auth::services::{
    CredentialStore, Database, ElevationOutcome, GuardedUpdateOutcome, RotateOutcome, SessionStore,
};
use chrono::{Duration, Utc};
use serde_json::json;
use uuid::Uuid;

async fn setup() -> (sqlx::PgPool, Database) {
    common::init_test_tracing();
    let pool = common::create_test_pool()
        .await
        .expect("Failed to create test pool");
    common::cleanup_test_data(&pool)
        .await
        .expect("Failed to clean test data");
    let db = Database::new(pool.clone());
    (pool, db)
}

async fn seed_credential(db: &Database) -> Credential {
    let credential = Credential::new(
        &format!("pg-{}@example.com", Uuid::new_v4()),
        "hash".to_string(),
        "Pg User".to_string(),
        "USER".to_string(),
        Utc::now(),
    );
    db.insert_credential(&credential).await.unwrap();
    credential
}

#[tokio::test]
#[ignore]
async fn test_rotate_session_is_single_use() {
    let (_pool, db) = setup().await;
    let user = seed_credential(&db).await;
    let now = Utc::now();

    let original = RefreshSession::new(hash_token("pg-a"), user.user_id, now, Duration::days(7));
    db.insert_session(&original).await.unwrap();

    let first = RefreshSession::successor_of(&original, hash_token("pg-b"), now, Duration::days(7));
    let second = RefreshSession::successor_of(&original, hash_token("pg-c"), now, Duration::days(7));

    assert_eq!(
        db.rotate_session(&original.session_id, now, &first).await.unwrap(),
        RotateOutcome::Rotated
    );
    assert_eq!(
        db.rotate_session(&original.session_id, now, &second).await.unwrap(),
        RotateOutcome::AlreadyRevoked
    );
    assert!(db.find_session(&second.session_id).await.unwrap().is_none());
    assert_eq!(
        db.rotate_session("missing", now, &second).await.unwrap(),
        RotateOutcome::Missing
    );
}

#[tokio::test]
#[ignore]
async fn test_revoke_lineage_walks_descendants() {
    let (_pool, db) = setup().await;
    let user = seed_credential(&db).await;
    let now = Utc::now();

    let a = RefreshSession::new(hash_token("lin-a"), user.user_id, now, Duration::days(7));
    db.insert_session(&a).await.unwrap();
    let b = RefreshSession::successor_of(&a, hash_token("lin-b"), now, Duration::days(7));
    db.rotate_session(&a.session_id, now, &b).await.unwrap();
    let c = RefreshSession::successor_of(&b, hash_token("lin-c"), now, Duration::days(7));
    db.rotate_session(&b.session_id, now, &c).await.unwrap();

    assert_eq!(db.revoke_lineage(&a.session_id, now).await.unwrap(), 1);
    let c = db.find_session(&c.session_id).await.unwrap().unwrap();
    assert!(c.is_revoked());
}

#[tokio::test]
#[ignore]
async fn test_retention_deletes() {
    let (_pool, db) = setup().await;
    let user = seed_credential(&db).await;
    let now = Utc::now();

    let expired = RefreshSession::new(hash_token("ret-a"), user.user_id, now - Duration::days(10), Duration::days(7));
    let revoked = RefreshSession::new(hash_token("ret-b"), user.user_id, now - Duration::days(40), Duration::days(60));
    db.insert_session(&expired).await.unwrap();
    db.insert_session(&revoked).await.unwrap();
    db.revoke_session(&revoked.session_id, now - Duration::days(35)).await.unwrap();

    assert_eq!(db.delete_expired_sessions(now).await.unwrap(), 1);
    assert_eq!(
        db.delete_revoked_sessions(now - Duration::days(30), now).await.unwrap(),
        1
    );
    assert_eq!(db.count_sessions().await.unwrap(), 0);
}

#[tokio::test]
#[ignore]
async fn test_audit_events_round_trip_and_prune() {
    let (_pool, db) = setup().await;
    let now = Utc::now();

    let old = SessionAuditEvent::new(Some("sess-1"), SessionEventType::Created, json!({}), now - Duration::days(100));
    let recent = SessionAuditEvent::new(Some("sess-1"), SessionEventType::Revoked, json!({ "reason": "logout" }), now);
    db.append_audit_event(&old).await.unwrap();
    db.append_audit_event(&recent).await.unwrap();

    let listed = db.list_audit_events("sess-1").await.unwrap();
    assert_eq!(listed.len(), 2);
    assert_eq!(listed[1].metadata["reason"], "logout");

    assert_eq!(db.delete_audit_events_before(now - Duration::days(90)).await.unwrap(), 1);
    assert_eq!(db.count_audit_events().await.unwrap(), 1);
}

#[tokio::test]
#[ignore]
async fn test_audit_events_are_append_only() {
    let (pool, db) = setup().await;
    let event = SessionAuditEvent::new(None, SessionEventType::LoginFailed, json!({}), Utc::now());
    db.append_audit_event(&event).await.unwrap();

    let result = sqlx::query("UPDATE session_audit_events SET metadata = '{}'::jsonb WHERE event_id = $1")
        .bind(event.event_id)
        .execute(&pool)
        .await;
    assert!(result.is_err());
}

#[tokio::test]
#[ignore]
async fn test_protected_flag_is_monotonic_in_database() {
    let (pool, db) = setup().await;
    let user = seed_credential(&db).await;
    let now = Utc::now();

    let change = CredentialChange {
        role: Some("ADMIN".to_string()),
        ..Default::default()
    };
    assert_eq!(
        db.update_unprotected_credential(&user.email, &change, now).await.unwrap(),
        GuardedUpdateOutcome::Updated
    );
    assert_eq!(
        db.mark_protected(&user.email, now).await.unwrap(),
        ElevationOutcome::Elevated
    );
    assert_eq!(
        db.mark_protected(&user.email, now).await.unwrap(),
        ElevationOutcome::AlreadyProtected
    );
    assert_eq!(
        db.update_unprotected_credential(&user.email, &change, now).await.unwrap(),
        GuardedUpdateOutcome::Protected
    );
    assert!(db.update_credential_name(&user.email, "Renamed", now).await.unwrap());

    // Direct SQL cannot lower the flag or remove the row either.
    let lowered = sqlx::query("UPDATE users SET protected = FALSE WHERE email = $1")
        .bind(&user.email)
        .execute(&pool)
        .await;
    assert!(lowered.is_err());
    let deleted = sqlx::query("DELETE FROM users WHERE email = $1")
        .bind(&user.email)
        .execute(&pool)
        .await;
    assert!(deleted.is_err());

    let stored = db.find_credential_by_email(&user.email).await.unwrap().unwrap();
    assert!(stored.is_protected());
    assert_eq!(stored.name, "Renamed");
}
