//! Admin console
//!
//! Every operation runs on behalf of an admin actor. The console is a thin
//! layer over the lifecycle engine, the role manager and the content board.

use common::{DocumentStore, Query, SharedStore, StoreError};
use thiserror::Error;

use crate::collections::{experts, payments, users};
use crate::content::{ContentBoard, ContentError, Feature, NewSession, SessionUpdate};
use crate::lifecycle::{LifecycleEngine, LifecycleError};
use crate::models::{
    AccountRequest, DashboardStats, ExpertRecord, FreeSignal, MentorshipSession, Payment, PlanId,
    RequestStatus, Role, UserProfile, decode_valid,
};
use crate::roles::{Actor, RepairOutcome, RoleError, RoleManager};

/// Errors of the admin console
#[derive(Error, Debug)]
pub enum AdminError {
    #[error("Admin access required")]
    Forbidden,

    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),

    #[error(transparent)]
    Role(#[from] RoleError),

    #[error(transparent)]
    Content(#[from] ContentError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

pub type AdminResult<T> = Result<T, AdminError>;

/// Admin operations over requests, users and content
#[derive(Clone)]
pub struct AdminConsole {
    actor: Actor,
    store: SharedStore,
    engine: LifecycleEngine,
    roles: RoleManager,
    content: ContentBoard,
}

impl AdminConsole {
    pub fn new(actor: Actor, store: SharedStore) -> AdminResult<Self> {
        if !actor.is_admin() {
            return Err(AdminError::Forbidden);
        }
        Ok(Self {
            engine: LifecycleEngine::new(store.clone()),
            roles: RoleManager::new(store.clone()),
            content: ContentBoard::new(store.clone()),
            actor,
            store,
        })
    }

    pub fn actor(&self) -> &Actor {
        &self.actor
    }

    pub async fn stats(&self) -> AdminResult<DashboardStats> {
        let total_users = self.store.query(&Query::new(users())).await?.len();
        let payments: Vec<Payment> = decode_valid(&self.store.query(&Query::new(payments())).await?);
        let successful_payments = payments
            .iter()
            .filter(|p| p.status.as_deref() == Some("success"))
            .count();

        Ok(DashboardStats {
            total_users,
            total_payments: payments.len(),
            successful_payments,
        })
    }

    // Requests

    pub async fn requests(&self) -> AdminResult<Vec<AccountRequest>> {
        Ok(self.engine.list_all(&self.actor).await?)
    }

    pub async fn create_request(
        &self,
        user_id: &str,
        plan_id: PlanId,
        expert_id: &str,
    ) -> AdminResult<AccountRequest> {
        Ok(self
            .engine
            .create_manual(&self.actor, user_id, plan_id, expert_id)
            .await?)
    }

    pub async fn assign_expert(
        &self,
        request_id: &str,
        expert_id: &str,
    ) -> AdminResult<AccountRequest> {
        Ok(self
            .engine
            .assign_expert(&self.actor, request_id, expert_id)
            .await?)
    }

    pub async fn set_status(
        &self,
        request_id: &str,
        status: RequestStatus,
    ) -> AdminResult<AccountRequest> {
        Ok(self.engine.set_status(&self.actor, request_id, status).await?)
    }

    pub async fn set_payment_status(
        &self,
        request_id: &str,
        payment_status: &str,
    ) -> AdminResult<AccountRequest> {
        Ok(self
            .engine
            .update_payment_status(&self.actor, request_id, payment_status)
            .await?)
    }

    /// Delete a request and its chat, returning the number of messages removed
    pub async fn delete_request(&self, request_id: &str) -> AdminResult<usize> {
        Ok(self.engine.delete(&self.actor, request_id).await?)
    }

    // Users

    pub async fn users(&self) -> AdminResult<Vec<UserProfile>> {
        let docs = self.store.query(&Query::new(users())).await?;
        Ok(decode_valid(&docs))
    }

    pub async fn experts(&self) -> AdminResult<Vec<ExpertRecord>> {
        let docs = self.store.query(&Query::new(experts())).await?;
        Ok(decode_valid(&docs))
    }

    pub async fn change_role(&self, uid: &str, role: Role) -> AdminResult<UserProfile> {
        Ok(self.roles.change_role(&self.actor, uid, role).await?)
    }

    pub async fn repair_role(&self, uid: &str) -> AdminResult<RepairOutcome> {
        Ok(self.roles.repair(&self.actor, uid).await?)
    }

    pub async fn delete_user(&self, uid: &str) -> AdminResult<()> {
        Ok(self.roles.delete_user(&self.actor, uid).await?)
    }

    // Content

    /// Sessions by date; the availability flag is created on first access
    pub async fn mentorship_sessions(&self) -> AdminResult<Vec<MentorshipSession>> {
        self.content
            .ensure_flag(&self.actor, Feature::FreeMentorship)
            .await?;
        Ok(self.content.sessions().await?)
    }

    pub async fn add_session(&self, session: NewSession) -> AdminResult<MentorshipSession> {
        Ok(self.content.add_session(&self.actor, session).await?)
    }

    pub async fn update_session(
        &self,
        id: &str,
        update: SessionUpdate,
    ) -> AdminResult<MentorshipSession> {
        Ok(self.content.update_session(&self.actor, id, update).await?)
    }

    pub async fn set_session_active(
        &self,
        id: &str,
        active: bool,
    ) -> AdminResult<MentorshipSession> {
        Ok(self
            .content
            .set_session_active(&self.actor, id, active)
            .await?)
    }

    pub async fn delete_session(&self, id: &str) -> AdminResult<()> {
        Ok(self.content.delete_session(&self.actor, id).await?)
    }

    pub async fn signals(&self) -> AdminResult<Vec<FreeSignal>> {
        Ok(self.content.signals().await?)
    }

    pub async fn add_signal(&self, text: &str) -> AdminResult<FreeSignal> {
        Ok(self.content.add_signal(&self.actor, text).await?)
    }

    pub async fn delete_signal(&self, id: &str) -> AdminResult<()> {
        Ok(self.content.delete_signal(&self.actor, id).await?)
    }

    pub async fn is_available(&self, feature: Feature) -> AdminResult<bool> {
        Ok(self.content.is_available(feature).await?)
    }

    /// Flip a feature's availability, returning the new value
    pub async fn toggle_feature(&self, feature: Feature) -> AdminResult<bool> {
        Ok(self.content.toggle(&self.actor, feature).await?)
    }
}
