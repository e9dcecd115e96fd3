use std::sync::Arc;

use tokio::sync::{watch, Mutex};
use tracing::{debug, error, info, warn};

use crate::backend::{AuthApi, AuthApiError, ProfileApi, ProfileApiError};
use crate::persist::ProjectionCache;
use crate::session::dto::{
    Identity, NewProfile, ProfileChanges, SessionProjection, SessionSnapshot, SignUpMetadata, User,
};

/// Shown when the backend failed in a way that has no usable message.
const GENERIC_AUTH_ERROR: &str = "unexpected authentication error";
/// Shown when sign-in succeeded but the profile could not be loaded.
const PROFILE_RESOLVE_ERROR: &str = "could not load the user profile";

/// Failures surfaced by store operations. `Display` is always a
/// human-readable message; the same text lands in the snapshot's `error`.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// Credentials or account state rejected by the auth service.
    #[error("{0}")]
    Credentials(String),
    /// The operation requires a signed-in user.
    #[error("not authenticated")]
    NotAuthenticated,
    /// The backend failed; no retry is attempted.
    #[error("{0}")]
    Backend(String),
}

impl From<AuthApiError> for SessionError {
    fn from(err: AuthApiError) -> Self {
        match err {
            AuthApiError::Credentials(msg) => SessionError::Credentials(non_empty(msg)),
            AuthApiError::Service(msg) => SessionError::Backend(non_empty(msg)),
        }
    }
}

fn non_empty(msg: String) -> String {
    if msg.trim().is_empty() {
        GENERIC_AUTH_ERROR.to_string()
    } else {
        msg
    }
}

/// Single source of truth for "who is logged in".
///
/// The store owns one [`SessionSnapshot`] published through a watch channel:
/// reads never block on in-flight operations. Auth operations sequence
/// through a single-flight guard, so a `sign_out` cannot interleave with a
/// `sign_in` that is still awaiting the backend; the listener entry points
/// (`set_user`, `reset`) are synchronous commits and stay outside the guard.
///
/// Every commit that changes `user` or `is_authenticated` rewrites the
/// persisted projection; `loading` and `error` are never persisted.
pub struct SessionStore {
    auth: Arc<dyn AuthApi>,
    profiles: Arc<dyn ProfileApi>,
    cache: Arc<dyn ProjectionCache>,
    state: watch::Sender<SessionSnapshot>,
    op_gate: Mutex<()>,
}

impl SessionStore {
    /// Build a store rehydrated from the projection cache. The snapshot keeps
    /// `loading=true` until the first `initialize` completes.
    pub fn new(
        auth: Arc<dyn AuthApi>,
        profiles: Arc<dyn ProfileApi>,
        cache: Arc<dyn ProjectionCache>,
    ) -> Self {
        let mut initial = SessionSnapshot::initial();
        match cache.load() {
            Ok(Some(projection)) => {
                // `is_authenticated` is derived from the stored user, never
                // trusted from disk.
                initial.is_authenticated = projection.user.is_some();
                initial.user = projection.user;
            }
            Ok(None) => {}
            Err(err) => warn!(error = %err, "failed to rehydrate session projection"),
        }
        let (state, _) = watch::channel(initial);
        Self {
            auth,
            profiles,
            cache,
            state,
            op_gate: Mutex::new(()),
        }
    }

    /// Current state by value.
    pub fn snapshot(&self) -> SessionSnapshot {
        self.state.borrow().clone()
    }

    /// Watch the state; screens re-render off this.
    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.state.subscribe()
    }

    /// Resolve the persisted session on startup. Never fails to the caller:
    /// a backend failure here degrades to a clean logged-out state so an
    /// anonymous visit is not blocked.
    pub async fn initialize(&self) {
        let _guard = self.op_gate.lock().await;
        self.commit(|s| s.loading = true);

        match self.auth.current_session().await {
            Ok(Some(session)) => match self.resolve_or_create_profile(&session.identity).await {
                Ok(user) => {
                    debug!(user_id = %user.id, "session restored");
                    self.commit_signed_in(user);
                }
                Err(err) => {
                    warn!(
                        error = %err,
                        user_id = %session.identity.id,
                        "profile resolution failed during startup; continuing anonymously"
                    );
                    self.commit_signed_out(None);
                }
            },
            Ok(None) => self.commit_signed_out(None),
            Err(err) => {
                warn!(error = %err, "session lookup failed during startup; continuing anonymously");
                self.commit_signed_out(None);
            }
        }
    }

    /// Verify credentials and adopt the matching profile. State and return
    /// value are always consistent: on failure the snapshot carries the same
    /// message the error displays.
    pub async fn sign_in(&self, email: &str, password: &str) -> Result<(), SessionError> {
        let _guard = self.op_gate.lock().await;
        self.commit(|s| {
            s.loading = true;
            s.error = None;
        });

        let session = match self.auth.sign_in_with_password(email, password).await {
            Ok(session) => session,
            Err(err) => {
                warn!(email, error = %err, "sign-in rejected");
                let err = SessionError::from(err);
                self.commit_signed_out(Some(err.to_string()));
                return Err(err);
            }
        };

        match self.resolve_or_create_profile(&session.identity).await {
            Ok(user) => {
                info!(user_id = %user.id, "signed in");
                self.commit_signed_in(user);
                Ok(())
            }
            Err(err) => {
                error!(
                    error = %err,
                    user_id = %session.identity.id,
                    "profile resolution failed after sign-in"
                );
                let err = SessionError::Backend(PROFILE_RESOLVE_ERROR.into());
                self.commit_signed_out(Some(err.to_string()));
                Err(err)
            }
        }
    }

    /// Request account creation with signup metadata attached. Does not
    /// establish a session: the service requires email confirmation before
    /// sign-in succeeds. Duplicate-registration messages pass through
    /// verbatim so the UI can offer a "log in instead" affordance.
    pub async fn sign_up(
        &self,
        email: &str,
        password: &str,
        metadata: SignUpMetadata,
    ) -> Result<(), SessionError> {
        let _guard = self.op_gate.lock().await;
        self.commit(|s| {
            s.loading = true;
            s.error = None;
        });

        match self.auth.sign_up(email, password, &metadata).await {
            Ok(identity) => {
                info!(user_id = %identity.id, "account created; awaiting email confirmation");
                self.commit(|s| s.loading = false);
                Ok(())
            }
            Err(err) => {
                warn!(email, error = %err, "sign-up rejected");
                let err = SessionError::from(err);
                let message = err.to_string();
                self.commit(|s| {
                    s.loading = false;
                    s.error = Some(message);
                });
                Err(err)
            }
        }
    }

    /// End the session. Local state is cleared even when the remote call
    /// fails.
    pub async fn sign_out(&self) {
        let _guard = self.op_gate.lock().await;
        self.commit(|s| s.loading = true);

        if let Err(err) = self.auth.sign_out().await {
            warn!(error = %err, "remote sign-out failed; clearing local session anyway");
        }
        self.commit_signed_out(None);
    }

    /// Send a partial profile update keyed by the current user's id, then
    /// merge the same fields into the in-memory user (no re-fetch). Requires
    /// a signed-in user; otherwise no backend call is made.
    pub async fn update_profile(&self, changes: ProfileChanges) -> Result<(), SessionError> {
        let _guard = self.op_gate.lock().await;
        let Some(mut user) = self.state.borrow().user.clone() else {
            return Err(SessionError::NotAuthenticated);
        };
        self.commit(|s| {
            s.loading = true;
            s.error = None;
        });

        match self.profiles.update(user.id, changes.clone()).await {
            Ok(_) => {
                changes.apply_to(&mut user);
                debug!(user_id = %user.id, "profile updated");
                self.commit_signed_in(user);
                Ok(())
            }
            Err(err) => {
                warn!(user_id = %user.id, error = %err, "profile update failed");
                let err = SessionError::Backend(non_empty(err.to_string()));
                let message = err.to_string();
                self.commit(|s| {
                    s.loading = false;
                    s.error = Some(message);
                });
                Err(err)
            }
        }
    }

    /// Ask the backend to send a recovery email. Leaves `user` untouched.
    pub async fn request_password_reset(&self, email: &str) -> Result<(), SessionError> {
        let _guard = self.op_gate.lock().await;
        self.commit(|s| {
            s.loading = true;
            s.error = None;
        });

        match self.auth.request_password_reset(email).await {
            Ok(()) => {
                info!(email, "password reset requested");
                self.commit(|s| s.loading = false);
                Ok(())
            }
            Err(err) => {
                warn!(email, error = %err, "password reset request failed");
                let err = SessionError::from(err);
                let message = err.to_string();
                self.commit(|s| {
                    s.loading = false;
                    s.error = Some(message);
                });
                Err(err)
            }
        }
    }

    /// Direct setter used by the session-change listener. Non-null also sets
    /// `is_authenticated` and clears `error`; null clears both.
    pub fn set_user(&self, user: Option<User>) {
        self.commit(|s| {
            s.is_authenticated = user.is_some();
            s.user = user;
            s.error = None;
        });
    }

    /// Restore the pristine initial state and drop the persisted projection.
    /// Used on hard logout paths.
    pub fn reset(&self) {
        self.state.send_replace(SessionSnapshot::initial());
        if let Err(err) = self.cache.clear() {
            warn!(error = %err, "failed to clear session projection");
        }
    }

    /// Fetch the profile for an identity, creating a default row on the
    /// first session (names and role from signup metadata, role defaulting
    /// to student). Shared by `initialize` and `sign_in` so the not-found
    /// policy is defined once.
    async fn resolve_or_create_profile(
        &self,
        identity: &Identity,
    ) -> Result<User, ProfileApiError> {
        match self.profiles.fetch(identity.id).await {
            Ok(user) => Ok(user),
            Err(ProfileApiError::NotFound) => {
                debug!(user_id = %identity.id, "no profile row yet; creating one");
                self.profiles.insert(NewProfile::for_identity(identity)).await
            }
            Err(err) => Err(err),
        }
    }

    fn commit_signed_in(&self, user: User) {
        self.commit(|s| {
            s.user = Some(user);
            s.is_authenticated = true;
            s.loading = false;
            s.error = None;
        });
    }

    fn commit_signed_out(&self, error: Option<String>) {
        self.commit(|s| {
            s.user = None;
            s.is_authenticated = false;
            s.loading = false;
            s.error = error;
        });
    }

    /// Apply a state change and, when it touched the persisted fields,
    /// rewrite the projection. Cache failures are logged, never surfaced.
    fn commit(&self, update: impl FnOnce(&mut SessionSnapshot)) {
        let mut projection_changed = false;
        self.state.send_modify(|s| {
            let user_before = s.user.clone();
            let auth_before = s.is_authenticated;
            update(s);
            projection_changed = user_before != s.user || auth_before != s.is_authenticated;
        });
        if projection_changed {
            let projection = {
                let s = self.state.borrow();
                SessionProjection {
                    user: s.user.clone(),
                    is_authenticated: s.is_authenticated,
                }
            };
            if let Err(err) = self.cache.save(&projection) {
                warn!(error = %err, "failed to persist session projection");
            }
        }
    }
}
