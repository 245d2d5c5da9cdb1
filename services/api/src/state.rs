//! Application state shared across handlers

use std::sync::Arc;

use common::{AccessRules, GuardedStore, Principal, SharedStore};

use crate::desk::StoreScope;
use crate::middleware::TokenVerifier;
use crate::models::Identity;
use crate::rules::PlatformRules;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    store: SharedStore,
    rules: Arc<dyn AccessRules>,
    pub verifier: TokenVerifier,
}

impl AppState {
    pub fn new(store: SharedStore, verifier: TokenVerifier) -> Self {
        Self {
            store,
            rules: Arc::new(PlatformRules),
            verifier,
        }
    }

    /// Store as seen by one signed-in identity
    pub fn store_for(&self, identity: &Identity) -> SharedStore {
        Arc::new(GuardedStore::new(
            self.store.clone(),
            self.rules.clone(),
            Principal::new(identity.id.clone()),
        ))
    }

    /// Scope handed to desks opened by this service
    pub fn scope(&self) -> StoreScope {
        let state = self.clone();
        Arc::new(move |identity: &Identity| state.store_for(identity))
    }
}
