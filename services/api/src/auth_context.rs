//! Authentication context
//!
//! Holds the signed-in identity of a session and publishes every sign-in and
//! sign-out to the components following it.

use std::sync::Arc;

use tokio::sync::watch;
use tracing::info;

use crate::models::Identity;

/// Shared handle on the current identity
#[derive(Debug, Clone)]
pub struct AuthContext {
    state: Arc<watch::Sender<Option<Identity>>>,
}

impl AuthContext {
    /// Create a signed-out context
    pub fn new() -> Self {
        let (state, _) = watch::channel(None);
        Self {
            state: Arc::new(state),
        }
    }

    pub fn sign_in(&self, identity: Identity) {
        info!("Signed in as {}", identity.email);
        self.state.send_replace(Some(identity));
    }

    pub fn sign_out(&self) {
        if let Some(previous) = self.state.send_replace(None) {
            info!("Signed out {}", previous.email);
        }
    }

    pub fn current(&self) -> Option<Identity> {
        self.state.borrow().clone()
    }

    /// Follow sign-in and sign-out transitions
    pub fn subscribe(&self) -> watch::Receiver<Option<Identity>> {
        self.state.subscribe()
    }
}

impl Default for AuthContext {
    fn default() -> Self {
        Self::new()
    }
}
