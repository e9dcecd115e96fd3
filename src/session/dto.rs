use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

/// Role attached to a profile at registration time.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum UserRole {
    #[default]
    Student,
    Teacher,
    Admin,
}

impl UserRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            UserRole::Student => "student",
            UserRole::Teacher => "teacher",
            UserRole::Admin => "admin",
        }
    }
}

impl std::fmt::Display for UserRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Profile record as stored in the `profiles` table.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct User {
    pub id: Uuid,                     // identity id, assigned by the auth service
    pub email: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub avatar_url: Option<String>,
    pub role: UserRole,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

impl User {
    /// "First Last" when either name is set, the email otherwise.
    pub fn display_name(&self) -> String {
        let name = [self.first_name.as_deref(), self.last_name.as_deref()]
            .into_iter()
            .flatten()
            .collect::<Vec<_>>()
            .join(" ");
        if name.is_empty() {
            self.email.clone()
        } else {
            name
        }
    }
}

/// Names (and optionally a requested role) attached to an account at signup.
/// Consumed later when the profile row is lazily created.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SignUpMetadata {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub role: Option<UserRole>,
}

/// Identity record held by the auth service, distinct from the profile row.
#[derive(Debug, Clone, PartialEq)]
pub struct Identity {
    pub id: Uuid,
    pub email: String,
    pub metadata: SignUpMetadata,
}

/// An active session as reported by the auth service. Token material stays
/// inside the backend and this struct; it is never persisted.
#[derive(Debug, Clone)]
pub struct AuthSession {
    pub identity: Identity,
    pub access_token: String,
    pub refresh_token: String,
    pub expires_at: OffsetDateTime,
}

/// Partial profile update. Absent fields are neither sent nor merged.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ProfileChanges {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub first_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<UserRole>,
}

impl ProfileChanges {
    /// Merge the present fields into `user`, leaving the rest untouched.
    pub fn apply_to(&self, user: &mut User) {
        if let Some(first_name) = &self.first_name {
            user.first_name = Some(first_name.clone());
        }
        if let Some(last_name) = &self.last_name {
            user.last_name = Some(last_name.clone());
        }
        if let Some(avatar_url) = &self.avatar_url {
            user.avatar_url = Some(avatar_url.clone());
        }
        if let Some(role) = self.role {
            user.role = role;
        }
    }
}

/// Defaults used when a profile row is created lazily on first session.
#[derive(Debug, Clone, Serialize)]
pub struct NewProfile {
    pub id: Uuid,
    pub email: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub role: UserRole,
}

impl NewProfile {
    pub fn for_identity(identity: &Identity) -> Self {
        Self {
            id: identity.id,
            email: identity.email.clone(),
            first_name: identity.metadata.first_name.clone(),
            last_name: identity.metadata.last_name.clone(),
            role: identity.metadata.role.unwrap_or_default(),
        }
    }
}

/// The session state as read by screens.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSnapshot {
    pub user: Option<User>,
    pub loading: bool,
    pub error: Option<String>,
    pub is_authenticated: bool,
}

impl SessionSnapshot {
    /// Pristine state: nothing resolved yet, first `initialize` pending.
    pub fn initial() -> Self {
        Self {
            user: None,
            loading: true,
            error: None,
            is_authenticated: false,
        }
    }
}

/// The subset of session state written to durable storage. `loading` and
/// `error` are transients and stay out.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SessionProjection {
    pub user: Option<User>,
    pub is_authenticated: bool,
}

#[cfg(test)]
mod dto_tests {
    use super::*;

    fn sample_user() -> User {
        User {
            id: Uuid::new_v4(),
            email: "ana@learnlab.test".into(),
            first_name: Some("Ana".into()),
            last_name: Some("Torres".into()),
            avatar_url: None,
            role: UserRole::Student,
            created_at: OffsetDateTime::now_utc(),
            updated_at: OffsetDateTime::now_utc(),
        }
    }

    #[test]
    fn role_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&UserRole::Teacher).unwrap(), "\"teacher\"");
        let role: UserRole = serde_json::from_str("\"admin\"").unwrap();
        assert_eq!(role, UserRole::Admin);
    }

    #[test]
    fn apply_to_merges_only_present_fields() {
        let mut user = sample_user();
        let before = user.clone();
        let changes = ProfileChanges {
            first_name: Some("Anabel".into()),
            ..Default::default()
        };
        changes.apply_to(&mut user);
        assert_eq!(user.first_name.as_deref(), Some("Anabel"));
        assert_eq!(user.last_name, before.last_name);
        assert_eq!(user.role, before.role);
        assert_eq!(user.id, before.id);
    }

    #[test]
    fn profile_changes_skip_absent_fields_on_the_wire() {
        let changes = ProfileChanges {
            last_name: Some("Vega".into()),
            ..Default::default()
        };
        let json = serde_json::to_string(&changes).unwrap();
        assert_eq!(json, "{\"last_name\":\"Vega\"}");
    }

    #[test]
    fn projection_round_trips_through_json() {
        let projection = SessionProjection {
            user: Some(sample_user()),
            is_authenticated: true,
        };
        let json = serde_json::to_string(&projection).unwrap();
        let back: SessionProjection = serde_json::from_str(&json).unwrap();
        assert_eq!(back, projection);
    }

    #[test]
    fn display_name_falls_back_to_email() {
        let mut user = sample_user();
        assert_eq!(user.display_name(), "Ana Torres");
        user.first_name = None;
        user.last_name = None;
        assert_eq!(user.display_name(), "ana@learnlab.test");
    }

    #[test]
    fn new_profile_defaults_to_student_role() {
        let identity = Identity {
            id: Uuid::new_v4(),
            email: "ana@learnlab.test".into(),
            metadata: SignUpMetadata {
                first_name: Some("Ana".into()),
                last_name: None,
                role: None,
            },
        };
        let profile = NewProfile::for_identity(&identity);
        assert_eq!(profile.role, UserRole::Student);
        assert_eq!(profile.first_name.as_deref(), Some("Ana"));
    }
}
