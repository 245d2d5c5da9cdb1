//! Platform access rules
//!
//! Evaluated by the store guard for every operation a signed-in caller makes.
//! Roles are read from the caller's own profile, never from the request.

use async_trait::async_trait;
use common::{AccessRequest, AccessRules, Operation, RuleContext, is_server_timestamp};
use serde_json::Value;

use crate::collections::{
    CONFIG, EXPERTS, MENTORSHIP, MESSAGES, PAYMENTS, REQUESTS, SIGNALS, USERS, requests, users,
};
use crate::models::{Role, SenderRole};

/// Rule set of the platform collections
#[derive(Debug, Default, Clone, Copy)]
pub struct PlatformRules;

impl PlatformRules {
    async fn role(ctx: &RuleContext<'_>) -> Option<Role> {
        let profile = ctx.lookup(&users(), &ctx.principal.uid).await?;
        match profile.get_str("role") {
            Some(role) => role.parse().ok(),
            None => Some(Role::User),
        }
    }

    async fn is_admin(ctx: &RuleContext<'_>) -> bool {
        Self::role(ctx).await == Some(Role::Admin)
    }

    async fn users(ctx: &RuleContext<'_>, request: &AccessRequest<'_>) -> bool {
        let uid = ctx.principal.uid.as_str();
        let own = request.id == Some(uid);
        match request.operation {
            Operation::Read => own || Self::is_admin(ctx).await,
            // Registration writes the caller's own profile as a plain user
            Operation::Create if own => {
                request.field_str("role") == Some(Role::User.as_str())
                    || Self::is_admin(ctx).await
            }
            Operation::List | Operation::Create | Operation::Update | Operation::Delete => {
                Self::is_admin(ctx).await
            }
        }
    }

    async fn experts(ctx: &RuleContext<'_>, request: &AccessRequest<'_>) -> bool {
        match request.operation {
            Operation::Read | Operation::List => {
                matches!(Self::role(ctx).await, Some(Role::Admin | Role::Expert))
            }
            _ => Self::is_admin(ctx).await,
        }
    }

    async fn requests(ctx: &RuleContext<'_>, request: &AccessRequest<'_>) -> bool {
        let uid = ctx.principal.uid.as_str();
        match request.operation {
            Operation::Read => {
                request.field_str("userId") == Some(uid)
                    || request.field_str("expertId") == Some(uid)
                    || Self::is_admin(ctx).await
            }
            Operation::List => {
                request.filter_str("userId") == Some(uid)
                    || request.filter_str("expertId") == Some(uid)
                    || Self::is_admin(ctx).await
            }
            Operation::Create => {
                let role = Self::role(ctx).await;
                let unassigned = request
                    .incoming
                    .is_none_or(|data| data.get("expertId").is_none_or(Value::is_null));
                let own_pending = request.field_str("userId") == Some(uid)
                    && request.field_str("status") == Some("pending")
                    && unassigned;
                role == Some(Role::Admin) || (role == Some(Role::User) && own_pending)
            }
            Operation::Update | Operation::Delete => Self::is_admin(ctx).await,
        }
    }

    async fn messages(ctx: &RuleContext<'_>, request: &AccessRequest<'_>, request_id: &str) -> bool {
        let uid = ctx.principal.uid.as_str();
        let role = Self::role(ctx).await;
        if role == Some(Role::Admin) {
            return true;
        }

        let Some(parent) = ctx.lookup(&requests(), request_id).await else {
            return false;
        };
        let participant =
            parent.get_str("userId") == Some(uid) || parent.get_str("expertId") == Some(uid);
        match request.operation {
            Operation::Read | Operation::List => participant,
            // Posted as the caller, with the caller's role and a server stamp
            Operation::Create => {
                let sender_role = role.map(|role| SenderRole::from(role).as_str());
                participant
                    && request.field_str("senderId") == Some(uid)
                    && sender_role.is_some()
                    && request.field_str("senderRole") == sender_role
                    && request
                        .incoming
                        .and_then(|data| data.get("timestamp"))
                        .is_some_and(is_server_timestamp)
            }
            Operation::Delete => {
                participant && request.existing.and_then(|m| m.get_str("senderId")) == Some(uid)
            }
            Operation::Update => false,
        }
    }

    async fn public_content(ctx: &RuleContext<'_>, request: &AccessRequest<'_>) -> bool {
        match request.operation {
            Operation::Read | Operation::List => true,
            _ => Self::is_admin(ctx).await,
        }
    }
}

#[async_trait]
impl AccessRules for PlatformRules {
    async fn allows(&self, ctx: &RuleContext<'_>, request: &AccessRequest<'_>) -> bool {
        if let Some((parent, request_id)) = request.collection.parent() {
            return parent.as_str() == REQUESTS
                && request.collection.name() == MESSAGES
                && Self::messages(ctx, request, request_id).await;
        }

        match request.collection.as_str() {
            USERS => Self::users(ctx, request).await,
            EXPERTS => Self::experts(ctx, request).await,
            REQUESTS => Self::requests(ctx, request).await,
            MENTORSHIP | SIGNALS | CONFIG => Self::public_content(ctx, request).await,
            PAYMENTS => Self::is_admin(ctx).await,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use common::{
        DocumentStore, Fields, GuardedStore, MemoryStore, Principal, Query, StoreResult,
        server_timestamp,
    };
    use serde_json::json;

    use super::*;
    use crate::collections::{experts, messages};

    fn fields(pairs: &[(&str, serde_json::Value)]) -> Fields {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    async fn seed(store: &MemoryStore) -> StoreResult<()> {
        for (uid, role) in [("alice", "user"), ("bob", "user"), ("eve", "expert"), ("root", "admin")] {
            let data = fields(&[("email", json!(format!("{}@example.com", uid))), ("role", json!(role))]);
            store.set(&users(), uid, data, false).await?;
        }
        let expert = fields(&[("userId", json!("eve")), ("name", json!("Eve")), ("email", json!("eve@example.com"))]);
        store.set(&experts(), "eve", expert, false).await?;

        let request = fields(&[
            ("userId", json!("alice")),
            ("status", json!("active")),
            ("expertId", json!("eve")),
        ]);
        store.set(&requests(), "r1", request, false).await?;
        Ok(())
    }

    fn as_user(store: &MemoryStore, uid: &str) -> GuardedStore {
        GuardedStore::new(Arc::new(store.clone()), Arc::new(PlatformRules), Principal::new(uid))
    }

    #[tokio::test]
    async fn plain_users_cannot_read_expert_records() -> StoreResult<()> {
        let store = MemoryStore::new();
        seed(&store).await?;

        let err = as_user(&store, "alice").get(&experts(), "eve").await.unwrap_err();
        assert!(err.is_permission_denied());
        assert!(as_user(&store, "eve").get(&experts(), "eve").await?.is_some());
        assert!(as_user(&store, "root").get(&experts(), "eve").await?.is_some());
        Ok(())
    }

    #[tokio::test]
    async fn requests_are_visible_to_their_participants() -> StoreResult<()> {
        let store = MemoryStore::new();
        seed(&store).await?;

        assert!(as_user(&store, "alice").get(&requests(), "r1").await?.is_some());
        assert!(as_user(&store, "eve").get(&requests(), "r1").await?.is_some());
        assert!(as_user(&store, "bob").get(&requests(), "r1").await.unwrap_err().is_permission_denied());

        let others = Query::new(requests()).where_eq("userId", "alice");
        assert!(as_user(&store, "bob").query(&others).await.unwrap_err().is_permission_denied());
        assert!(as_user(&store, "root").query(&Query::new(requests())).await.is_ok());
        Ok(())
    }

    #[tokio::test]
    async fn users_may_only_submit_their_own_pending_requests() -> StoreResult<()> {
        let store = MemoryStore::new();
        seed(&store).await?;
        let alice = as_user(&store, "alice");

        let pending = fields(&[("userId", json!("alice")), ("status", json!("pending"))]);
        assert!(alice.create(&requests(), pending).await.is_ok());

        let active = fields(&[("userId", json!("alice")), ("status", json!("active"))]);
        assert!(alice.create(&requests(), active).await.unwrap_err().is_permission_denied());

        let forged = fields(&[("userId", json!("bob")), ("status", json!("pending"))]);
        assert!(alice.create(&requests(), forged).await.unwrap_err().is_permission_denied());

        let promote = fields(&[("status", json!("completed"))]);
        assert!(alice.update(&requests(), "r1", promote).await.unwrap_err().is_permission_denied());

        let unassigned = fields(&[
            ("userId", json!("alice")),
            ("status", json!("pending")),
            ("expertId", json!(null)),
        ]);
        assert!(alice.create(&requests(), unassigned).await.is_ok());

        let self_assigned = fields(&[
            ("userId", json!("alice")),
            ("status", json!("pending")),
            ("expertId", json!("eve")),
        ]);
        assert!(alice.create(&requests(), self_assigned).await.unwrap_err().is_permission_denied());
        Ok(())
    }

    #[tokio::test]
    async fn messages_carry_the_callers_role_and_a_server_stamp() -> StoreResult<()> {
        let store = MemoryStore::new();
        seed(&store).await?;
        let message = |sender: &str, role: &str, timestamp: serde_json::Value| {
            fields(&[
                ("text", json!("hi")),
                ("senderId", json!(sender)),
                ("senderRole", json!(role)),
                ("timestamp", timestamp),
            ])
        };
        let alice = as_user(&store, "alice");
        let eve = as_user(&store, "eve");

        let as_expert = message("alice", "expert", server_timestamp());
        assert!(alice.create(&messages("r1"), as_expert).await.unwrap_err().is_permission_denied());
        let as_admin = message("alice", "admin", server_timestamp());
        assert!(alice.create(&messages("r1"), as_admin).await.unwrap_err().is_permission_denied());
        let unstamped = fields(&[
            ("text", json!("hi")),
            ("senderId", json!("alice")),
            ("senderRole", json!("user")),
        ]);
        assert!(alice.create(&messages("r1"), unstamped).await.unwrap_err().is_permission_denied());

        let backdated = message("eve", "expert", json!(1_000));
        assert!(eve.create(&messages("r1"), backdated).await.unwrap_err().is_permission_denied());

        assert!(alice.create(&messages("r1"), message("alice", "user", server_timestamp())).await.is_ok());
        assert!(eve.create(&messages("r1"), message("eve", "expert", server_timestamp())).await.is_ok());
        assert_eq!(store.document_count(&messages("r1")).await, 2);
        Ok(())
    }

    #[tokio::test]
    async fn only_the_sender_or_an_admin_deletes_a_message() -> StoreResult<()> {
        let store = MemoryStore::new();
        seed(&store).await?;

        let from_alice = fields(&[
            ("text", json!("hello")),
            ("senderId", json!("alice")),
            ("senderRole", json!("user")),
            ("timestamp", server_timestamp()),
        ]);
        let msg = as_user(&store, "alice").create(&messages("r1"), from_alice.clone()).await?;

        let err = as_user(&store, "eve").delete(&messages("r1"), &msg.id).await.unwrap_err();
        assert!(err.is_permission_denied());
        assert!(as_user(&store, "alice").delete(&messages("r1"), &msg.id).await?);

        let msg = as_user(&store, "alice").create(&messages("r1"), from_alice).await?;
        assert!(as_user(&store, "root").delete(&messages("r1"), &msg.id).await?);
        Ok(())
    }

    #[tokio::test]
    async fn outsiders_cannot_read_or_post_messages() -> StoreResult<()> {
        let store = MemoryStore::new();
        seed(&store).await?;
        let bob = as_user(&store, "bob");

        let spoofed = fields(&[("text", json!("hi")), ("senderId", json!("bob"))]);
        assert!(bob.create(&messages("r1"), spoofed).await.unwrap_err().is_permission_denied());
        assert!(bob.query(&Query::new(messages("r1"))).await.unwrap_err().is_permission_denied());

        let impersonated = fields(&[("text", json!("hi")), ("senderId", json!("alice"))]);
        let eve = as_user(&store, "eve");
        assert!(eve.create(&messages("r1"), impersonated).await.unwrap_err().is_permission_denied());
        Ok(())
    }

    #[tokio::test]
    async fn registration_cannot_claim_a_role() -> StoreResult<()> {
        let store = MemoryStore::new();
        let newcomer = as_user(&store, "new");

        let admin = fields(&[("email", json!("new@example.com")), ("role", json!("admin"))]);
        assert!(newcomer.set(&users(), "new", admin, false).await.unwrap_err().is_permission_denied());

        let user = fields(&[("email", json!("new@example.com")), ("role", json!("user"))]);
        assert!(newcomer.set(&users(), "new", user, false).await.is_ok());

        let promote = fields(&[("role", json!("admin"))]);
        assert!(newcomer.update(&users(), "new", promote).await.unwrap_err().is_permission_denied());
        Ok(())
    }
}
