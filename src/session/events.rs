use std::sync::Arc;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::session::dto::AuthSession;
use crate::session::store::SessionStore;

/// Session-change notification from the auth backend.
#[derive(Debug, Clone)]
pub enum AuthEvent {
    SignedIn(AuthSession),
    SignedOut,
}

/// Apply backend session changes to the store for as long as the event
/// channel stays open: `SignedOut` clears the user, `SignedIn` re-runs the
/// profile-resolution path. A lagged receiver resyncs on the next event.
pub fn spawn_listener(
    store: Arc<SessionStore>,
    mut events: broadcast::Receiver<AuthEvent>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(AuthEvent::SignedOut) => {
                    debug!("session ended remotely");
                    store.set_user(None);
                }
                Ok(AuthEvent::SignedIn(session)) => {
                    debug!(user_id = %session.identity.id, "session established remotely");
                    store.initialize().await;
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "auth event stream lagged");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}
