use shared::domain::Identity;
use tokio::sync::watch;
use tracing::info;

/// Source of the signed-in identity. Read on every composition so a sign-out
/// mid-session is reflected in the next emitted view.
pub trait IdentityProvider: Send + Sync {
    fn current_identity(&self) -> Option<Identity>;
    fn watch_identity(&self) -> watch::Receiver<Option<Identity>>;
}

/// In-process session state, updated by whatever performs authentication.
pub struct SessionIdentity {
    current: watch::Sender<Option<Identity>>,
}

impl SessionIdentity {
    pub fn signed_out() -> Self {
        let (current, _) = watch::channel(None);
        Self { current }
    }

    pub fn signed_in(identity: Identity) -> Self {
        let (current, _) = watch::channel(Some(identity));
        Self { current }
    }

    pub fn sign_in(&self, identity: Identity) {
        info!(user_id = %identity.id, "identity: signed in");
        self.current.send_replace(Some(identity));
    }

    pub fn sign_out(&self) {
        if let Some(previous) = self.current.send_replace(None) {
            info!(user_id = %previous.id, "identity: signed out");
        }
    }
}

impl Default for SessionIdentity {
    fn default() -> Self {
        Self::signed_out()
    }
}

impl IdentityProvider for SessionIdentity {
    fn current_identity(&self) -> Option<Identity> {
        self.current.borrow().clone()
    }

    fn watch_identity(&self) -> watch::Receiver<Option<Identity>> {
        self.current.subscribe()
    }
}
