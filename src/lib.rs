//! Client-side session state for the LearnLab platform.
//!
//! The [`SessionStore`] is the single source of truth for "who is logged
//! in". It talks to the hosted backend through the [`AuthApi`] and
//! [`ProfileApi`] seams, persists a minimal projection through a
//! [`ProjectionCache`], and publishes state through a watch channel that
//! screens subscribe to.

pub mod backend;
pub mod config;
pub mod persist;
pub mod session;
pub mod validate;

pub use backend::rest::RestBackend;
pub use backend::{AuthApi, AuthApiError, ProfileApi, ProfileApiError};
pub use config::BackendConfig;
pub use persist::{JsonFileCache, MemoryCache, ProjectionCache};
pub use session::dto::{
    AuthSession, Identity, NewProfile, ProfileChanges, SessionProjection, SessionSnapshot,
    SignUpMetadata, User, UserRole,
};
pub use session::events::{spawn_listener, AuthEvent};
pub use session::store::{SessionError, SessionStore};
