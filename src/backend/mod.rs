use async_trait::async_trait;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::session::dto::{AuthSession, Identity, NewProfile, ProfileChanges, SignUpMetadata, User};
use crate::session::events::AuthEvent;

pub mod rest;

/// Auth service surface consumed by the session store: credential
/// verification, account creation, session lookup and the session-change
/// event feed.
#[async_trait]
pub trait AuthApi: Send + Sync {
    /// The session currently held by the service, if any. Implementations may
    /// transparently refresh an expired session before answering.
    async fn current_session(&self) -> Result<Option<AuthSession>, AuthApiError>;

    async fn sign_in_with_password(
        &self,
        email: &str,
        password: &str,
    ) -> Result<AuthSession, AuthApiError>;

    /// Create an account with signup metadata attached. Does not establish a
    /// session; the service is expected to require email confirmation first.
    async fn sign_up(
        &self,
        email: &str,
        password: &str,
        metadata: &SignUpMetadata,
    ) -> Result<Identity, AuthApiError>;

    async fn sign_out(&self) -> Result<(), AuthApiError>;

    async fn request_password_reset(&self, email: &str) -> Result<(), AuthApiError>;

    /// Session-change notifications (`SignedIn` / `SignedOut`).
    fn events(&self) -> broadcast::Receiver<AuthEvent>;
}

/// Profile table surface consumed by the session store.
#[async_trait]
pub trait ProfileApi: Send + Sync {
    /// Fetch the profile row for an identity id. A missing row is reported as
    /// `ProfileApiError::NotFound`, which callers treat as a first-login
    /// condition rather than a failure.
    async fn fetch(&self, id: Uuid) -> Result<User, ProfileApiError>;

    async fn insert(&self, profile: NewProfile) -> Result<User, ProfileApiError>;

    async fn update(&self, id: Uuid, changes: ProfileChanges) -> Result<User, ProfileApiError>;
}

/// Failures from the auth service. Messages are display-ready.
#[derive(Debug, thiserror::Error)]
pub enum AuthApiError {
    /// The service rejected the credentials or the account state
    /// (bad password, unconfirmed email, duplicate registration).
    #[error("{0}")]
    Credentials(String),
    /// Anything else: network failure, malformed response, 5xx.
    #[error("{0}")]
    Service(String),
}

/// Failures from the profile table.
#[derive(Debug, thiserror::Error)]
pub enum ProfileApiError {
    #[error("profile not found")]
    NotFound,
    #[error("{0}")]
    Service(String),
}
