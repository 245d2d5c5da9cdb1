//! Request lifecycle engine
//!
//! Owns the account management request state machine. Every status change is
//! checked against [`RequestStatus::can_transition_to`]; expert assignment
//! stamps the expert's name and email on the request so requesters never read
//! expert records. Writes are last-write-wins.

use common::{
    Direction, DocumentStore, Fields, Query, SharedStore, StoreError, Write, server_timestamp,
};
use serde_json::{Value, json};
use thiserror::Error;
use tracing::{info, warn};

use crate::collections::{experts, messages, requests, users};
use crate::models::{
    AccountRequest, ExpertRecord, Feed, PlanId, RequestStatus, Role, UserProfile, decode_valid,
};
use crate::roles::Actor;

/// Errors of the request lifecycle
#[derive(Error, Debug)]
pub enum LifecycleError {
    #[error("Only {0} can perform this operation")]
    Forbidden(&'static str),

    #[error("Request not found: {0}")]
    NotFound(String),

    #[error("Cannot move request from {from} to {to}")]
    InvalidTransition {
        from: RequestStatus,
        to: RequestStatus,
    },

    #[error("{0} is not an expert")]
    NotAnExpert(String),

    #[error("User not found: {0}")]
    UnknownUser(String),

    #[error("{0}")]
    Validation(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

pub type LifecycleResult<T> = Result<T, LifecycleError>;

/// Live view of account management requests
pub type RequestFeed = Feed<AccountRequest>;

/// The request lifecycle engine
#[derive(Clone)]
pub struct LifecycleEngine {
    store: SharedStore,
}

impl LifecycleEngine {
    pub fn new(store: SharedStore) -> Self {
        Self { store }
    }

    fn require_admin(actor: &Actor) -> LifecycleResult<()> {
        if actor.is_admin() {
            Ok(())
        } else {
            Err(LifecycleError::Forbidden("admins"))
        }
    }

    /// Request a plan on behalf of the actor
    pub async fn submit(&self, actor: &Actor, plan_id: PlanId) -> LifecycleResult<AccountRequest> {
        if actor.role != Role::User {
            return Err(LifecycleError::Forbidden("users"));
        }

        let mut data = Fields::new();
        data.insert("userId".into(), json!(actor.uid));
        data.insert("userEmail".into(), json!(actor.email));
        data.insert("planId".into(), json!(plan_id));
        data.insert("planName".into(), json!(plan_id.plan().name));
        data.insert("status".into(), json!(RequestStatus::Pending));
        data.insert("paymentStatus".into(), json!("pending"));
        data.insert("expertId".into(), Value::Null);
        data.insert("createdAt".into(), server_timestamp());

        let doc = self.store.create(&requests(), data).await?;
        info!("User {} requested the {} plan ({})", actor.uid, plan_id, doc.id);
        Ok(doc.decode()?)
    }

    /// Create an already assigned request for a user
    pub async fn create_manual(
        &self,
        actor: &Actor,
        user_id: &str,
        plan_id: PlanId,
        expert_id: &str,
    ) -> LifecycleResult<AccountRequest> {
        Self::require_admin(actor)?;
        let user: UserProfile = self
            .store
            .get(&users(), user_id)
            .await?
            .ok_or_else(|| LifecycleError::UnknownUser(user_id.to_string()))?
            .decode()?;
        let expert = self.load_expert(expert_id).await?;

        let mut data = Fields::new();
        data.insert("userId".into(), json!(user.id));
        data.insert("userEmail".into(), json!(user.email));
        data.insert("planId".into(), json!(plan_id));
        data.insert("planName".into(), json!(plan_id.plan().name));
        data.insert("status".into(), json!(RequestStatus::Assigned));
        data.insert("paymentStatus".into(), json!("active"));
        data.insert("expertId".into(), json!(expert.id));
        data.insert("expertName".into(), json!(expert.name));
        data.insert("expertEmail".into(), json!(expert.email));
        data.insert("createdAt".into(), server_timestamp());
        data.insert("updatedAt".into(), server_timestamp());

        let doc = self.store.create(&requests(), data).await?;
        info!("Admin {} created request {} for {}", actor.uid, doc.id, user_id);
        Ok(doc.decode()?)
    }

    /// Assign or re-assign an expert
    pub async fn assign_expert(
        &self,
        actor: &Actor,
        request_id: &str,
        expert_id: &str,
    ) -> LifecycleResult<AccountRequest> {
        Self::require_admin(actor)?;
        let request = self.get(request_id).await?;
        Self::check_transition(&request, RequestStatus::Assigned)?;
        let expert = self.load_expert(expert_id).await?;

        let mut patch = Fields::new();
        patch.insert("expertId".into(), json!(expert.id));
        patch.insert("expertName".into(), json!(expert.name));
        patch.insert("expertEmail".into(), json!(expert.email));
        patch.insert("status".into(), json!(RequestStatus::Assigned));
        patch.insert("updatedAt".into(), server_timestamp());

        let doc = self.store.update(&requests(), request_id, patch).await?;
        info!("Request {} assigned to expert {}", request_id, expert.id);
        Ok(doc.decode()?)
    }

    /// Move a request to another status
    pub async fn set_status(
        &self,
        actor: &Actor,
        request_id: &str,
        status: RequestStatus,
    ) -> LifecycleResult<AccountRequest> {
        Self::require_admin(actor)?;
        if matches!(status, RequestStatus::Pending | RequestStatus::Assigned) {
            return Err(LifecycleError::Validation(format!(
                "Status {} is set by submitting or assigning, not directly",
                status
            )));
        }
        let request = self.get(request_id).await?;
        Self::check_transition(&request, status)?;

        let mut patch = Fields::new();
        patch.insert("status".into(), json!(status));
        patch.insert("updatedAt".into(), server_timestamp());

        let doc = self.store.update(&requests(), request_id, patch).await?;
        info!("Request {} moved from {} to {}", request_id, request.status, status);
        Ok(doc.decode()?)
    }

    /// Record the free text payment status
    pub async fn update_payment_status(
        &self,
        actor: &Actor,
        request_id: &str,
        payment_status: &str,
    ) -> LifecycleResult<AccountRequest> {
        Self::require_admin(actor)?;
        let payment_status = payment_status.trim();
        if payment_status.is_empty() {
            return Err(LifecycleError::Validation(
                "Payment status cannot be empty".to_string(),
            ));
        }
        self.get(request_id).await?;

        let mut patch = Fields::new();
        patch.insert("paymentStatus".into(), json!(payment_status));
        patch.insert("updatedAt".into(), server_timestamp());

        let doc = self.store.update(&requests(), request_id, patch).await?;
        Ok(doc.decode()?)
    }

    /// Hard delete a request together with its messages
    ///
    /// Returns the number of messages removed.
    pub async fn delete(&self, actor: &Actor, request_id: &str) -> LifecycleResult<usize> {
        Self::require_admin(actor)?;
        self.get(request_id).await?;

        let log = self.store.query(&Query::new(messages(request_id))).await?;
        let removed = log.len();
        let mut batch: Vec<Write> = log
            .into_iter()
            .map(|doc| Write::Delete {
                collection: doc.collection,
                id: doc.id,
            })
            .collect();
        batch.push(Write::Delete {
            collection: requests(),
            id: request_id.to_string(),
        });
        self.store.commit(batch).await?;

        info!("Request {} deleted with {} messages", request_id, removed);
        Ok(removed)
    }

    pub async fn get(&self, request_id: &str) -> LifecycleResult<AccountRequest> {
        let doc = self
            .store
            .get(&requests(), request_id)
            .await?
            .ok_or_else(|| LifecycleError::NotFound(request_id.to_string()))?;
        Ok(doc.decode()?)
    }

    /// The user's newest request, whatever its status
    pub fn current_query(user_id: &str) -> Query {
        Query::new(requests())
            .where_eq("userId", user_id)
            .order_by("createdAt", Direction::Desc)
            .limit(1)
    }

    /// Requests assigned to an expert, newest first
    pub fn assignments_query(expert_id: &str) -> Query {
        Query::new(requests())
            .where_eq("expertId", expert_id)
            .order_by("createdAt", Direction::Desc)
    }

    pub async fn current_for_user(&self, user_id: &str) -> LifecycleResult<Option<AccountRequest>> {
        let docs = self.store.query(&Self::current_query(user_id)).await?;
        match docs.first() {
            Some(doc) => Ok(Some(doc.decode()?)),
            None => Ok(None),
        }
    }

    pub async fn watch_current_for_user(&self, user_id: &str) -> LifecycleResult<RequestFeed> {
        let subscription = self.store.subscribe(Self::current_query(user_id)).await?;
        Ok(Feed::new(subscription))
    }

    pub async fn assignments(&self, expert_id: &str) -> LifecycleResult<Vec<AccountRequest>> {
        let docs = self.store.query(&Self::assignments_query(expert_id)).await?;
        Ok(decode_valid(&docs))
    }

    pub async fn watch_assignments(&self, expert_id: &str) -> LifecycleResult<RequestFeed> {
        let subscription = self
            .store
            .subscribe(Self::assignments_query(expert_id))
            .await?;
        Ok(Feed::new(subscription))
    }

    /// Every request, newest first
    pub async fn list_all(&self, actor: &Actor) -> LifecycleResult<Vec<AccountRequest>> {
        Self::require_admin(actor)?;
        let query = Query::new(requests()).order_by("createdAt", Direction::Desc);
        let docs = self.store.query(&query).await?;
        Ok(decode_valid(&docs))
    }

    fn check_transition(request: &AccountRequest, to: RequestStatus) -> LifecycleResult<()> {
        if !request.status.can_transition_to(to) {
            return Err(LifecycleError::InvalidTransition {
                from: request.status,
                to,
            });
        }
        if to == RequestStatus::Active && request.expert_id.is_none() {
            warn!("Request {} has no expert and cannot become active", request.id);
            return Err(LifecycleError::InvalidTransition {
                from: request.status,
                to,
            });
        }
        Ok(())
    }

    /// Expert record of an id whose profile carries the expert role
    async fn load_expert(&self, expert_id: &str) -> LifecycleResult<ExpertRecord> {
        let not_an_expert = || LifecycleError::NotAnExpert(expert_id.to_string());

        let profile = self.store.get(&users(), expert_id).await?.ok_or_else(not_an_expert)?;
        let profile: UserProfile = profile.decode()?;
        if profile.role != Role::Expert {
            return Err(not_an_expert());
        }

        let record = self.store.get(&experts(), expert_id).await?.ok_or_else(not_an_expert)?;
        Ok(record.decode()?)
    }
}
