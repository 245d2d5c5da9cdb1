//! Typed records of the platform collections
//!
//! Records are decoded from store documents at the boundary. A document that
//! does not match its record shape is rejected rather than half-read.

use std::marker::PhantomData;

use common::{Document, StoreResult, Subscription};
use serde::de::DeserializeOwned;
use tracing::warn;

pub mod content;
pub mod message;
pub mod payloads;
pub mod plan;
pub mod profile;
pub mod request;

pub use content::{DashboardStats, FeatureFlag, FreeSignal, MentorshipSession, Payment};
pub use message::{Message, SenderRole};
pub use plan::{PLANS, Plan, PlanId};
pub use profile::{ExpertRecord, Identity, Role, UserProfile};
pub use request::{AccountRequest, RequestStatus};

/// Decode every well formed document, logging and skipping the others
pub fn decode_valid<T: DeserializeOwned>(docs: &[Document]) -> Vec<T> {
    docs.iter()
        .filter_map(|doc| match doc.decode() {
            Ok(record) => Some(record),
            Err(e) => {
                warn!("Skipping malformed document: {}", e);
                None
            }
        })
        .collect()
}

/// Live query decoded into typed records
#[derive(Debug)]
pub struct Feed<T> {
    subscription: Subscription,
    _record: PhantomData<fn() -> T>,
}

impl<T: DeserializeOwned> Feed<T> {
    pub fn new(subscription: Subscription) -> Self {
        Self {
            subscription,
            _record: PhantomData,
        }
    }

    /// Wait for the next result set; `None` once the feed has stopped
    pub async fn next(&mut self) -> Option<StoreResult<Vec<T>>> {
        let snapshot = self.subscription.next().await?;
        Some(snapshot.map(|docs| decode_valid(&docs)))
    }

    pub fn is_active(&self) -> bool {
        self.subscription.is_active()
    }

    /// Stop listening
    pub fn cancel(self) {
        self.subscription.cancel();
    }
}
