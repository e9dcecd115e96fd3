//! Client for the hosted backend: GoTrue-style auth endpoints plus a
//! PostgREST-style `profiles` table. Token material lives in memory here and
//! never reaches the projection cache.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tokio::sync::{broadcast, Mutex};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::backend::{AuthApi, AuthApiError, ProfileApi, ProfileApiError};
use crate::config::BackendConfig;
use crate::session::dto::{
    AuthSession, Identity, NewProfile, ProfileChanges, SignUpMetadata, User, UserRole,
};
use crate::session::events::AuthEvent;

/// Sessions within this margin of expiry are refreshed before use.
const EXPIRY_MARGIN_SECS: i64 = 30;

pub struct RestBackend {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    profiles_table: String,
    session: Mutex<Option<AuthSession>>,
    events: broadcast::Sender<AuthEvent>,
}

impl RestBackend {
    pub fn new(config: &BackendConfig) -> Self {
        let (events, _) = broadcast::channel(16);
        Self {
            http: reqwest::Client::new(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            profiles_table: config.profiles_table.clone(),
            session: Mutex::new(None),
            events,
        }
    }

    fn auth_url(&self, path: &str) -> String {
        format!("{}/auth/v1/{}", self.base_url, path)
    }

    fn profiles_url(&self) -> String {
        format!("{}/rest/v1/{}", self.base_url, self.profiles_table)
    }

    /// Access token of the held session; the anon key otherwise.
    async fn bearer(&self) -> String {
        self.session
            .lock()
            .await
            .as_ref()
            .map(|s| s.access_token.clone())
            .unwrap_or_else(|| self.api_key.clone())
    }

    async fn adopt(&self, session: AuthSession) {
        *self.session.lock().await = Some(session);
    }

    async fn grant(&self, grant_type: &str, body: &impl Serialize) -> Result<AuthSession, AuthApiError> {
        let resp = self
            .http
            .post(self.auth_url("token"))
            .query(&[("grant_type", grant_type)])
            .header("apikey", &self.api_key)
            .json(body)
            .send()
            .await
            .map_err(|e| AuthApiError::Service(e.to_string()))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let msg = error_message(resp).await;
            return Err(if status.is_client_error() {
                AuthApiError::Credentials(msg)
            } else {
                AuthApiError::Service(msg)
            });
        }

        let grant: TokenGrant = resp
            .json()
            .await
            .map_err(|e| AuthApiError::Service(e.to_string()))?;
        Ok(grant.into_session())
    }

    async fn profile_request(
        &self,
        builder: reqwest::RequestBuilder,
    ) -> Result<Vec<User>, ProfileApiError> {
        let resp = builder
            .header("apikey", &self.api_key)
            .bearer_auth(self.bearer().await)
            .send()
            .await
            .map_err(|e| ProfileApiError::Service(e.to_string()))?;

        if !resp.status().is_success() {
            return Err(ProfileApiError::Service(error_message(resp).await));
        }
        resp.json::<Vec<User>>()
            .await
            .map_err(|e| ProfileApiError::Service(e.to_string()))
    }
}

#[async_trait]
impl AuthApi for RestBackend {
    async fn current_session(&self) -> Result<Option<AuthSession>, AuthApiError> {
        let held = self.session.lock().await.clone();
        let Some(session) = held else { return Ok(None) };

        if session.expires_at > OffsetDateTime::now_utc() + time::Duration::seconds(EXPIRY_MARGIN_SECS) {
            return Ok(Some(session));
        }

        debug!(user_id = %session.identity.id, "session near expiry; refreshing");
        let request = RefreshRequest {
            refresh_token: &session.refresh_token,
        };
        match self.grant("refresh_token", &request).await {
            Ok(renewed) => {
                self.adopt(renewed.clone()).await;
                Ok(Some(renewed))
            }
            Err(err) => {
                warn!(error = %err, "session refresh failed; treating as signed out");
                *self.session.lock().await = None;
                Ok(None)
            }
        }
    }

    async fn sign_in_with_password(
        &self,
        email: &str,
        password: &str,
    ) -> Result<AuthSession, AuthApiError> {
        let request = PasswordGrant { email, password };
        let session = self.grant("password", &request).await?;
        self.adopt(session.clone()).await;
        let _ = self.events.send(AuthEvent::SignedIn(session.clone()));
        Ok(session)
    }

    async fn sign_up(
        &self,
        email: &str,
        password: &str,
        metadata: &SignUpMetadata,
    ) -> Result<Identity, AuthApiError> {
        let request = SignUpRequest {
            email,
            password,
            data: MetadataBody::from(metadata),
        };
        let resp = self
            .http
            .post(self.auth_url("signup"))
            .header("apikey", &self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| AuthApiError::Service(e.to_string()))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let msg = error_message(resp).await;
            return Err(if status.is_client_error() {
                AuthApiError::Credentials(msg)
            } else {
                AuthApiError::Service(msg)
            });
        }

        // The service answers with a bare identity when email confirmation
        // is pending and with a full session when it is disabled. Either
        // way, no session is adopted here.
        let body: SignUpResponse = resp
            .json()
            .await
            .map_err(|e| AuthApiError::Service(e.to_string()))?;
        Ok(body.into_identity())
    }

    async fn sign_out(&self) -> Result<(), AuthApiError> {
        let token = self
            .session
            .lock()
            .await
            .as_ref()
            .map(|s| s.access_token.clone());

        let result = match token {
            Some(token) => {
                let sent = self
                    .http
                    .post(self.auth_url("logout"))
                    .header("apikey", &self.api_key)
                    .bearer_auth(token)
                    .send()
                    .await;
                match sent {
                    Ok(resp) if resp.status().is_success() => Ok(()),
                    Ok(resp) => Err(AuthApiError::Service(error_message(resp).await)),
                    Err(e) => Err(AuthApiError::Service(e.to_string())),
                }
            }
            None => Ok(()),
        };

        // Local session ends regardless of what the service said.
        *self.session.lock().await = None;
        let _ = self.events.send(AuthEvent::SignedOut);
        result
    }

    async fn request_password_reset(&self, email: &str) -> Result<(), AuthApiError> {
        let resp = self
            .http
            .post(self.auth_url("recover"))
            .header("apikey", &self.api_key)
            .json(&RecoverRequest { email })
            .send()
            .await
            .map_err(|e| AuthApiError::Service(e.to_string()))?;

        if resp.status().is_success() {
            Ok(())
        } else {
            Err(AuthApiError::Service(error_message(resp).await))
        }
    }

    fn events(&self) -> broadcast::Receiver<AuthEvent> {
        self.events.subscribe()
    }
}

#[async_trait]
impl ProfileApi for RestBackend {
    async fn fetch(&self, id: Uuid) -> Result<User, ProfileApiError> {
        let builder = self
            .http
            .get(self.profiles_url())
            .query(&[("id", format!("eq.{id}")), ("select", "*".to_string())]);
        let mut rows = self.profile_request(builder).await?;
        match rows.pop() {
            Some(user) => Ok(user),
            None => Err(ProfileApiError::NotFound),
        }
    }

    async fn insert(&self, profile: NewProfile) -> Result<User, ProfileApiError> {
        let builder = self
            .http
            .post(self.profiles_url())
            .header("Prefer", "return=representation")
            .json(&profile);
        let mut rows = self.profile_request(builder).await?;
        rows.pop()
            .ok_or_else(|| ProfileApiError::Service("profile insert returned no rows".into()))
    }

    async fn update(&self, id: Uuid, changes: ProfileChanges) -> Result<User, ProfileApiError> {
        let builder = self
            .http
            .patch(self.profiles_url())
            .query(&[("id", format!("eq.{id}"))])
            .header("Prefer", "return=representation")
            .json(&changes);
        let mut rows = self.profile_request(builder).await?;
        match rows.pop() {
            Some(user) => Ok(user),
            None => Err(ProfileApiError::NotFound),
        }
    }
}

async fn error_message(resp: reqwest::Response) -> String {
    let status = resp.status();
    let fallback = format!("unexpected response status {status}");
    match resp.json::<ErrorBody>().await {
        Ok(body) => body.into_message().unwrap_or(fallback),
        Err(_) => fallback,
    }
}

// ---- wire types ----

#[derive(Debug, Serialize)]
struct PasswordGrant<'a> {
    email: &'a str,
    password: &'a str,
}

#[derive(Debug, Serialize)]
struct RefreshRequest<'a> {
    refresh_token: &'a str,
}

#[derive(Debug, Serialize)]
struct RecoverRequest<'a> {
    email: &'a str,
}

#[derive(Debug, Serialize)]
struct SignUpRequest<'a> {
    email: &'a str,
    password: &'a str,
    data: MetadataBody,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct MetadataBody {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    first_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    last_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    role: Option<UserRole>,
}

impl From<&SignUpMetadata> for MetadataBody {
    fn from(metadata: &SignUpMetadata) -> Self {
        Self {
            first_name: metadata.first_name.clone(),
            last_name: metadata.last_name.clone(),
            role: metadata.role,
        }
    }
}

impl From<MetadataBody> for SignUpMetadata {
    fn from(body: MetadataBody) -> Self {
        Self {
            first_name: body.first_name,
            last_name: body.last_name,
            role: body.role,
        }
    }
}

#[derive(Debug, Deserialize)]
struct TokenGrant {
    access_token: String,
    refresh_token: String,
    expires_in: i64,
    user: IdentityPayload,
}

impl TokenGrant {
    fn into_session(self) -> AuthSession {
        AuthSession {
            identity: self.user.into_identity(),
            access_token: self.access_token,
            refresh_token: self.refresh_token,
            expires_at: OffsetDateTime::now_utc() + time::Duration::seconds(self.expires_in),
        }
    }
}

#[derive(Debug, Deserialize)]
struct IdentityPayload {
    id: Uuid,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    user_metadata: MetadataBody,
}

impl IdentityPayload {
    fn into_identity(self) -> Identity {
        Identity {
            id: self.id,
            email: self.email.unwrap_or_default(),
            metadata: self.user_metadata.into(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum SignUpResponse {
    Session(TokenGrant),
    Identity(IdentityPayload),
}

impl SignUpResponse {
    fn into_identity(self) -> Identity {
        match self {
            SignUpResponse::Session(grant) => grant.user.into_identity(),
            SignUpResponse::Identity(payload) => payload.into_identity(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    error_description: Option<String>,
    #[serde(default)]
    msg: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

impl ErrorBody {
    fn into_message(self) -> Option<String> {
        self.error_description.or(self.msg).or(self.message)
    }
}

#[cfg(test)]
mod wire_tests {
    use super::*;

    fn test_config() -> BackendConfig {
        BackendConfig {
            base_url: "https://learnlab.example.co/".into(),
            api_key: "anon-key".into(),
            profiles_table: "profiles".into(),
            session_file: "auth-storage.json".into(),
        }
    }

    #[test]
    fn urls_drop_the_trailing_slash() {
        let backend = RestBackend::new(&test_config());
        assert_eq!(
            backend.auth_url("token"),
            "https://learnlab.example.co/auth/v1/token"
        );
        assert_eq!(
            backend.profiles_url(),
            "https://learnlab.example.co/rest/v1/profiles"
        );
    }

    #[test]
    fn token_grant_decodes_and_computes_expiry() {
        let raw = r#"{
            "access_token": "at",
            "refresh_token": "rt",
            "expires_in": 3600,
            "token_type": "bearer",
            "user": {
                "id": "7a4f3a2e-9a1a-4a7e-8d4e-1f2a3b4c5d6e",
                "email": "ana@learnlab.test",
                "user_metadata": {"first_name": "Ana", "last_name": "Torres"}
            }
        }"#;
        let grant: TokenGrant = serde_json::from_str(raw).unwrap();
        let session = grant.into_session();
        assert_eq!(session.identity.email, "ana@learnlab.test");
        assert_eq!(session.identity.metadata.first_name.as_deref(), Some("Ana"));
        assert!(session.expires_at > OffsetDateTime::now_utc());
    }

    #[test]
    fn identity_without_email_defaults_to_empty_string() {
        let raw = r#"{"id": "7a4f3a2e-9a1a-4a7e-8d4e-1f2a3b4c5d6e"}"#;
        let payload: IdentityPayload = serde_json::from_str(raw).unwrap();
        let identity = payload.into_identity();
        assert_eq!(identity.email, "");
        assert_eq!(identity.metadata, SignUpMetadata::default());
    }

    #[test]
    fn sign_up_response_accepts_both_shapes() {
        let bare = r#"{"id": "7a4f3a2e-9a1a-4a7e-8d4e-1f2a3b4c5d6e", "email": "a@b.c"}"#;
        let parsed: SignUpResponse = serde_json::from_str(bare).unwrap();
        assert_eq!(parsed.into_identity().email, "a@b.c");

        let with_session = r#"{
            "access_token": "at", "refresh_token": "rt", "expires_in": 60,
            "user": {"id": "7a4f3a2e-9a1a-4a7e-8d4e-1f2a3b4c5d6e", "email": "a@b.c"}
        }"#;
        let parsed: SignUpResponse = serde_json::from_str(with_session).unwrap();
        assert_eq!(parsed.into_identity().email, "a@b.c");
    }

    #[test]
    fn error_body_prefers_error_description() {
        let raw = r#"{"error_description": "Invalid login credentials", "msg": "other"}"#;
        let body: ErrorBody = serde_json::from_str(raw).unwrap();
        assert_eq!(body.into_message().as_deref(), Some("Invalid login credentials"));

        let raw = r#"{"msg": "User already registered"}"#;
        let body: ErrorBody = serde_json::from_str(raw).unwrap();
        assert_eq!(body.into_message().as_deref(), Some("User already registered"));

        let raw = r#"{"code": 500}"#;
        let body: ErrorBody = serde_json::from_str(raw).unwrap();
        assert_eq!(body.into_message(), None);
    }

    #[test]
    fn profile_row_decodes_postgrest_timestamps() {
        let raw = r#"[{
            "id": "7a4f3a2e-9a1a-4a7e-8d4e-1f2a3b4c5d6e",
            "email": "ana@learnlab.test",
            "first_name": "Ana",
            "last_name": null,
            "avatar_url": null,
            "role": "teacher",
            "created_at": "2026-01-12T09:30:00.123456+00:00",
            "updated_at": "2026-01-12T09:30:00.123456+00:00"
        }]"#;
        let rows: Vec<User> = serde_json::from_str(raw).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].role, UserRole::Teacher);
        assert_eq!(rows[0].first_name.as_deref(), Some("Ana"));
    }

    #[test]
    fn sign_up_request_nests_metadata_under_data() {
        let metadata = SignUpMetadata {
            first_name: Some("Nina".into()),
            last_name: None,
            role: Some(UserRole::Teacher),
        };
        let request = SignUpRequest {
            email: "nina@learnlab.test",
            password: "pw",
            data: MetadataBody::from(&metadata),
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["data"]["first_name"], "Nina");
        assert_eq!(json["data"]["role"], "teacher");
        assert!(json["data"].get("last_name").is_none());
    }
}
