//! Role resolution and role changes
//!
//! A viewer is an expert iff an expert record exists under their uid. The
//! admin gate is separate and reads the caller's own profile. Role changes
//! keep the profile role and the expert record in step with one atomic batch.

use common::{DocumentStore, Fields, Query, SharedStore, StoreError, Write, server_timestamp};
use serde::Serialize;
use serde_json::json;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::collections::{experts, requests, users};
use crate::models::{Identity, RequestStatus, Role, SenderRole, UserProfile};

/// Dashboard a viewer gets
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViewerRole {
    User,
    Expert,
}

/// Resolved caller of a platform operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Actor {
    pub uid: String,
    pub email: String,
    pub role: Role,
}

impl Actor {
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }

    pub fn sender_role(&self) -> SenderRole {
        self.role.into()
    }
}

/// Errors of role management
#[derive(Error, Debug)]
pub enum RoleError {
    #[error("Only admins can manage roles")]
    Forbidden,

    #[error("User not found: {0}")]
    NotFound(String),

    #[error("Admins cannot delete their own account")]
    SelfDeletion,

    #[error("{uid} still has {count} assigned or active requests")]
    HasOpenAssignments { uid: String, count: usize },

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Outcome of a role repair
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RepairOutcome {
    InSync,
    CreatedExpertRecord,
    RemovedExpertRecord,
}

/// Resolves the role of a signed-in identity
#[derive(Clone)]
pub struct RoleResolver {
    store: SharedStore,
}

impl RoleResolver {
    pub fn new(store: SharedStore) -> Self {
        Self { store }
    }

    /// Expert iff the expert record exists; any failure resolves to user
    pub async fn resolve(&self, identity: &Identity) -> ViewerRole {
        match self.store.get(&experts(), &identity.id).await {
            Ok(Some(_)) => ViewerRole::Expert,
            Ok(None) => ViewerRole::User,
            Err(e) if e.is_permission_denied() => {
                debug!("Expert record of {} not readable, resolving as user", identity.id);
                ViewerRole::User
            }
            Err(e) => {
                warn!("Error checking expert status for {}: {}", identity.id, e);
                ViewerRole::User
            }
        }
    }

    /// Resolve the full actor, including the admin gate
    pub async fn resolve_actor(&self, identity: &Identity) -> Actor {
        let role = match self.resolve(identity).await {
            ViewerRole::Expert => Role::Expert,
            ViewerRole::User => self.profile_role(identity).await,
        };
        Actor {
            uid: identity.id.clone(),
            email: identity.email.clone(),
            role,
        }
    }

    async fn profile_role(&self, identity: &Identity) -> Role {
        let profile = match self.store.get(&users(), &identity.id).await {
            Ok(Some(doc)) => doc.decode::<UserProfile>(),
            Ok(None) => return Role::User,
            Err(e) => Err(e),
        };
        match profile {
            Ok(profile) if profile.role == Role::Admin => Role::Admin,
            Ok(_) => Role::User,
            Err(e) => {
                warn!("Error reading profile of {}: {}", identity.id, e);
                Role::User
            }
        }
    }
}

/// Admin operations on user roles
#[derive(Clone)]
pub struct RoleManager {
    store: SharedStore,
}

impl RoleManager {
    pub fn new(store: SharedStore) -> Self {
        Self { store }
    }

    async fn profile(&self, uid: &str) -> Result<UserProfile, RoleError> {
        let doc = self
            .store
            .get(&users(), uid)
            .await?
            .ok_or_else(|| RoleError::NotFound(uid.to_string()))?;
        Ok(doc.decode()?)
    }

    fn expert_record(profile: &UserProfile) -> Write {
        let mut data = Fields::new();
        data.insert("userId".into(), json!(profile.id));
        data.insert("name".into(), json!(profile.display_name()));
        data.insert("email".into(), json!(profile.email));
        data.insert("createdAt".into(), server_timestamp());
        Write::Set {
            collection: experts(),
            id: profile.id.clone(),
            data,
            merge: false,
        }
    }

    /// Refuse while `uid` is the expert of an assigned or active request
    async fn ensure_no_open_assignments(&self, uid: &str) -> Result<(), RoleError> {
        let query = Query::new(requests()).where_eq("expertId", uid);
        let count = self
            .store
            .query(&query)
            .await?
            .iter()
            .filter(|doc| {
                doc.get_str("status")
                    .and_then(|status| status.parse::<RequestStatus>().ok())
                    .is_some_and(|status| status.requires_expert())
            })
            .count();
        if count > 0 {
            return Err(RoleError::HasOpenAssignments {
                uid: uid.to_string(),
                count,
            });
        }
        Ok(())
    }

    /// Change a user's role and create or drop their expert record with it
    ///
    /// Experts are only moved off the role once their open requests are
    /// reassigned or closed.
    pub async fn change_role(
        &self,
        actor: &Actor,
        uid: &str,
        role: Role,
    ) -> Result<UserProfile, RoleError> {
        if !actor.is_admin() {
            return Err(RoleError::Forbidden);
        }
        let mut profile = self.profile(uid).await?;
        if role != Role::Expert {
            self.ensure_no_open_assignments(uid).await?;
        }

        let mut patch = Fields::new();
        patch.insert("role".into(), json!(role));
        let mut batch = vec![Write::Update {
            collection: users(),
            id: uid.to_string(),
            patch,
        }];
        batch.push(if role == Role::Expert {
            Self::expert_record(&profile)
        } else {
            Write::Delete {
                collection: experts(),
                id: uid.to_string(),
            }
        });
        self.store.commit(batch).await?;

        info!("Role of {} changed from {} to {} by {}", uid, profile.role, role, actor.uid);
        profile.role = role;
        Ok(profile)
    }

    /// Re-derive the expert record from the profile role
    pub async fn repair(&self, actor: &Actor, uid: &str) -> Result<RepairOutcome, RoleError> {
        if !actor.is_admin() {
            return Err(RoleError::Forbidden);
        }
        let profile = self.profile(uid).await?;
        let record = self.store.get(&experts(), uid).await?;

        let outcome = match (profile.role == Role::Expert, record.is_some()) {
            (true, false) => {
                self.store.commit(vec![Self::expert_record(&profile)]).await?;
                RepairOutcome::CreatedExpertRecord
            }
            (false, true) => {
                self.store.delete(&experts(), uid).await?;
                RepairOutcome::RemovedExpertRecord
            }
            _ => RepairOutcome::InSync,
        };
        if outcome != RepairOutcome::InSync {
            warn!("Repaired role records of {}: {:?}", uid, outcome);
        }
        Ok(outcome)
    }

    /// Remove a user's profile and expert record
    pub async fn delete_user(&self, actor: &Actor, uid: &str) -> Result<(), RoleError> {
        if !actor.is_admin() {
            return Err(RoleError::Forbidden);
        }
        if actor.uid == uid {
            return Err(RoleError::SelfDeletion);
        }
        self.ensure_no_open_assignments(uid).await?;
        self.store
            .commit(vec![
                Write::Delete {
                    collection: users(),
                    id: uid.to_string(),
                },
                Write::Delete {
                    collection: experts(),
                    id: uid.to_string(),
                },
            ])
            .await?;
        info!("User {} deleted by {}", uid, actor.uid);
        Ok(())
    }
}
