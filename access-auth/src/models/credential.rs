//! Credential model - directory identities that can log in.

use chrono::{DateTime, Utc};
use sqlx::FromRow;
use uuid::Uuid;

/// A login identity.
///
/// `protected` is private: it can be read through [`Credential::is_protected`]
/// and only ever raised, never lowered.
#[derive(Debug, Clone, FromRow)]
pub struct Credential {
    pub user_id: Uuid,
    pub email: String,
    pub password_hash: String,
    pub name: String,
    pub role: String,
    protected: bool,
    pub created_utc: DateTime<Utc>,
    pub updated_utc: DateTime<Utc>,
}

impl Credential {
    /// Create a new, unprotected credential. Emails are stored lowercase.
    pub fn new(
        email: &str,
        password_hash: String,
        name: String,
        role: String,
        at: DateTime<Utc>,
    ) -> Self {
        Self {
            user_id: Uuid::new_v4(),
            email: normalize_email(email),
            password_hash,
            name,
            role,
            protected: false,
            created_utc: at,
            updated_utc: at,
        }
    }

    pub fn is_protected(&self) -> bool {
        self.protected
    }

    /// Raise the protected flag. Returns false if it was already set.
    pub(crate) fn mark_protected(&mut self) -> bool {
        let changed = !self.protected;
        self.protected = true;
        changed
    }

    /// Apply the non-flag fields of a change in place.
    pub(crate) fn apply(&mut self, change: &CredentialChange, at: DateTime<Utc>) {
        if let Some(hash) = &change.password_hash {
            self.password_hash = hash.clone();
        }
        if let Some(name) = &change.name {
            self.name = name.clone();
        }
        if let Some(role) = &change.role {
            self.role = role.clone();
        }
        self.updated_utc = at;
    }
}

pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// A requested mutation of a credential. `None` leaves a field untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CredentialChange {
    pub password_hash: Option<String>,
    pub name: Option<String>,
    pub role: Option<String>,
    pub protected: Option<bool>,
}

impl CredentialChange {
    pub fn is_empty(&self) -> bool {
        self.password_hash.is_none()
            && self.name.is_none()
            && self.role.is_none()
            && self.protected.is_none()
    }

    /// Names of the fields that a protected account refuses to change.
    pub fn guarded_fields(&self) -> Vec<&'static str> {
        let mut fields = Vec::new();
        if self.password_hash.is_some() {
            fields.push("password");
        }
        if self.role.is_some() {
            fields.push("role");
        }
        if self.protected.is_some() {
            fields.push("protected");
        }
        fields
    }

    /// Names of every field this change touches.
    pub fn touched_fields(&self) -> Vec<&'static str> {
        let mut fields = self.guarded_fields();
        if self.name.is_some() {
            fields.push("name");
        }
        fields
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn credential() -> Credential {
        Credential::new(
            "  Admin@Example.COM ",
            "hash".to_string(),
            "Admin".to_string(),
            "ADMIN".to_string(),
            Utc::now(),
        )
    }

    #[test]
    fn test_new_credential_is_unprotected_and_normalized() {
        let c = credential();
        assert_eq!(c.email, "admin@example.com");
        assert!(!c.is_protected());
    }

    #[test]
    fn test_mark_protected_is_idempotent() {
        let mut c = credential();
        assert!(c.mark_protected());
        assert!(!c.mark_protected());
        assert!(c.is_protected());
    }

    #[test]
    fn test_apply_never_touches_protected_flag() {
        let mut c = credential();
        c.mark_protected();
        c.apply(
            &CredentialChange {
                protected: Some(false),
                name: Some("Root".to_string()),
                ..Default::default()
            },
            Utc::now(),
        );
        assert!(c.is_protected());
        assert_eq!(c.name, "Root");
    }

    #[test]
    fn test_guarded_fields() {
        let change = CredentialChange {
            password_hash: Some("h".to_string()),
            name: Some("n".to_string()),
            ..Default::default()
        };
        assert_eq!(change.guarded_fields(), vec!["password"]);
        assert_eq!(change.touched_fields(), vec!["password", "name"]);
        assert!(CredentialChange::default().is_empty());
    }
}
