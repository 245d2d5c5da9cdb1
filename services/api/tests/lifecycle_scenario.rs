//! End-to-end request lifecycle over the in-memory store with platform rules

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Result, bail};
use api::{
    ChannelBinding, Desk, DeskUpdate, LifecycleEngine, MessagingChannel, PlatformRules, RoleManager,
    RoleResolver, ViewerRole,
    collections::{experts, messages, users},
    desk::{ExpertDesk, UserDesk},
    lifecycle::LifecycleError,
    models::{Identity, PlanId, RequestStatus, Role, SenderRole},
    roles::RoleError,
};
use common::{
    DocumentStore, Fields, GuardedStore, MemoryStore, Principal, Query, SharedStore,
    server_timestamp,
};
use serde_json::json;
use tokio::time::timeout;

fn identity(uid: &str) -> Identity {
    Identity {
        id: uid.to_string(),
        email: format!("{}@example.com", uid),
        display_name: None,
    }
}

fn guarded(store: &MemoryStore, uid: &str) -> SharedStore {
    Arc::new(GuardedStore::new(
        Arc::new(store.clone()),
        Arc::new(PlatformRules),
        Principal::new(uid),
    ))
}

async fn seed_profile(store: &MemoryStore, uid: &str, role: Role) -> Result<()> {
    let mut data = Fields::new();
    data.insert("email".into(), json!(format!("{}@example.com", uid)));
    data.insert("role".into(), json!(role));
    data.insert("plan".into(), json!(null));
    data.insert("createdAt".into(), server_timestamp());
    store.set(&users(), uid, data, false).await?;
    Ok(())
}

async fn open(store: &MemoryStore, uid: &str) -> Result<Desk> {
    Ok(Desk::open(&identity(uid), guarded(store, uid)).await?)
}

/// Drive a user desk until its current request reaches `status`
async fn until_status(desk: &mut UserDesk, status: RequestStatus) -> Result<()> {
    for _ in 0..10 {
        if desk.current_request().map(|r| r.status) == Some(status) {
            return Ok(());
        }
        if timeout(Duration::from_secs(1), desk.next_update()).await? == DeskUpdate::Closed {
            break;
        }
    }
    bail!("request never reached {}", status)
}

async fn until_messages(desk: &mut ExpertDesk, count: usize) -> Result<()> {
    for _ in 0..10 {
        if desk.messages().len() == count {
            return Ok(());
        }
        timeout(Duration::from_secs(1), desk.next_update()).await?;
    }
    bail!("expected {} messages, saw {}", count, desk.messages().len())
}

#[tokio::test]
async fn request_runs_from_plan_choice_to_completion() -> Result<()> {
    let store = MemoryStore::new();
    seed_profile(&store, "alice", Role::User).await?;
    seed_profile(&store, "eve", Role::User).await?;
    seed_profile(&store, "root", Role::Admin).await?;

    let root = RoleResolver::new(guarded(&store, "root"))
        .resolve_actor(&identity("root"))
        .await;
    assert!(root.is_admin());

    // Promote eve; exactly one expert record appears
    RoleManager::new(guarded(&store, "root"))
        .change_role(&root, "eve", Role::Expert)
        .await?;
    assert_eq!(store.document_count(&experts()).await, 1);
    assert_eq!(
        RoleResolver::new(guarded(&store, "eve")).resolve(&identity("eve")).await,
        ViewerRole::Expert
    );

    let Desk::User(mut alice) = open(&store, "alice").await? else {
        bail!("alice should get the user desk");
    };
    assert!(alice.shows_plan_catalog());

    let request = alice.submit_plan(PlanId::Pro).await?;
    until_status(&mut alice, RequestStatus::Pending).await?;
    assert!(!alice.shows_plan_catalog());
    assert!(!alice.chat_readable());

    let engine = LifecycleEngine::new(guarded(&store, "root"));
    let assigned = engine.assign_expert(&root, &request.id, "eve").await?;
    assert_eq!(assigned.expert_id.as_deref(), Some("eve"));
    engine.set_status(&root, &request.id, RequestStatus::Active).await?;
    until_status(&mut alice, RequestStatus::Active).await?;
    assert!(alice.chat_writable());
    assert_eq!(
        alice.assigned_expert().map(|e| e.id.as_str()),
        Some("eve")
    );

    let Desk::Expert(mut eve) = open(&store, "eve").await? else {
        bail!("eve should get the expert desk");
    };
    assert_eq!(eve.assignments().len(), 1);
    eve.select(&request.id).await?;

    alice.send("Hello, I need help with my account").await?;
    until_messages(&mut eve, 1).await?;
    eve.send("Sure, let us start").await?;
    until_messages(&mut eve, 2).await?;
    assert_eq!(eve.messages()[0].sender_role, SenderRole::User);
    assert_eq!(eve.messages()[1].sender_role, SenderRole::Expert);

    engine.set_status(&root, &request.id, RequestStatus::Completed).await?;
    until_status(&mut alice, RequestStatus::Completed).await?;
    assert!(alice.shows_plan_catalog());
    assert!(alice.chat_readable());
    assert!(!alice.chat_writable());
    assert!(alice.send("one more thing").await.is_err());

    let history = MessagingChannel::new(guarded(&store, "alice"))
        .history(&request.id)
        .await?;
    assert_eq!(history.len(), 2);
    Ok(())
}

#[tokio::test]
async fn completed_requests_cannot_be_reopened_and_deletion_cascades() -> Result<()> {
    let store = MemoryStore::new();
    seed_profile(&store, "alice", Role::User).await?;
    seed_profile(&store, "eve", Role::User).await?;
    seed_profile(&store, "root", Role::Admin).await?;

    let root = RoleResolver::new(guarded(&store, "root"))
        .resolve_actor(&identity("root"))
        .await;
    RoleManager::new(guarded(&store, "root"))
        .change_role(&root, "eve", Role::Expert)
        .await?;

    let engine = LifecycleEngine::new(guarded(&store, "root"));
    let request = engine
        .create_manual(&root, "alice", PlanId::Lite, "eve")
        .await?;
    assert_eq!(request.status, RequestStatus::Assigned);
    engine.set_status(&root, &request.id, RequestStatus::Active).await?;

    let channel = MessagingChannel::new(guarded(&store, "alice"));
    channel
        .append(&request.id, "first", "alice", SenderRole::User)
        .await?;
    channel
        .append(&request.id, "   ", "alice", SenderRole::User)
        .await
        .expect_err("blank text is rejected");
    assert_eq!(store.document_count(&messages(&request.id)).await, 1);

    engine.set_status(&root, &request.id, RequestStatus::Completed).await?;
    let reopened = engine
        .set_status(&root, &request.id, RequestStatus::Active)
        .await;
    assert!(matches!(
        reopened,
        Err(LifecycleError::InvalidTransition { .. })
    ));

    assert_eq!(engine.delete(&root, &request.id).await?, 1);
    assert_eq!(store.document_count(&messages(&request.id)).await, 0);
    assert!(matches!(
        engine.get(&request.id).await,
        Err(LifecycleError::NotFound(_))
    ));
    Ok(())
}

#[tokio::test]
async fn demoting_an_expert_removes_the_record_once() -> Result<()> {
    let store = MemoryStore::new();
    seed_profile(&store, "eve", Role::User).await?;
    seed_profile(&store, "root", Role::Admin).await?;

    let root = RoleResolver::new(guarded(&store, "root"))
        .resolve_actor(&identity("root"))
        .await;
    let roles = RoleManager::new(guarded(&store, "root"));

    roles.change_role(&root, "eve", Role::Expert).await?;
    roles.change_role(&root, "eve", Role::User).await?;
    assert_eq!(store.document_count(&experts()).await, 0);

    // Already absent; not an error
    roles.change_role(&root, "eve", Role::User).await?;
    assert_eq!(store.document_count(&experts()).await, 0);
    Ok(())
}

#[tokio::test]
async fn plain_users_cannot_read_expert_records_or_delete_foreign_messages() -> Result<()> {
    let store = MemoryStore::new();
    seed_profile(&store, "alice", Role::User).await?;
    seed_profile(&store, "eve", Role::User).await?;
    seed_profile(&store, "root", Role::Admin).await?;

    let root = RoleResolver::new(guarded(&store, "root"))
        .resolve_actor(&identity("root"))
        .await;
    RoleManager::new(guarded(&store, "root"))
        .change_role(&root, "eve", Role::Expert)
        .await?;

    let denied = guarded(&store, "alice").get(&experts(), "eve").await;
    assert!(matches!(denied, Err(e) if e.is_permission_denied()));

    let engine = LifecycleEngine::new(guarded(&store, "root"));
    let request = engine
        .create_manual(&root, "alice", PlanId::Geant, "eve")
        .await?;
    engine.set_status(&root, &request.id, RequestStatus::Active).await?;
    let message = MessagingChannel::new(guarded(&store, "eve"))
        .append(&request.id, "welcome", "eve", SenderRole::Expert)
        .await?;

    // The store refuses even when the sender check is skipped
    let forged = guarded(&store, "alice")
        .delete(&messages(&request.id), &message.id)
        .await;
    assert!(matches!(forged, Err(e) if e.is_permission_denied()));
    assert_eq!(store.document_count(&messages(&request.id)).await, 1);
    Ok(())
}

#[tokio::test]
async fn experts_with_open_requests_keep_their_role() -> Result<()> {
    let store = MemoryStore::new();
    seed_profile(&store, "alice", Role::User).await?;
    seed_profile(&store, "eve", Role::User).await?;
    seed_profile(&store, "root", Role::Admin).await?;

    let root = RoleResolver::new(guarded(&store, "root"))
        .resolve_actor(&identity("root"))
        .await;
    let roles = RoleManager::new(guarded(&store, "root"));
    roles.change_role(&root, "eve", Role::Expert).await?;

    let request = LifecycleEngine::new(guarded(&store, "alice"))
        .submit(
            &RoleResolver::new(guarded(&store, "alice"))
                .resolve_actor(&identity("alice"))
                .await,
            PlanId::Pro,
        )
        .await?;
    let engine = LifecycleEngine::new(guarded(&store, "root"));
    engine.assign_expert(&root, &request.id, "eve").await?;
    engine.set_status(&root, &request.id, RequestStatus::Active).await?;

    for role in [Role::User, Role::Admin] {
        let refused = roles.change_role(&root, "eve", role).await;
        assert!(matches!(
            refused,
            Err(RoleError::HasOpenAssignments { ref uid, count: 1 }) if uid == "eve"
        ));
    }
    let refused = roles.delete_user(&root, "eve").await;
    assert!(matches!(refused, Err(RoleError::HasOpenAssignments { .. })));

    assert_eq!(store.document_count(&experts()).await, 1);
    assert_eq!(
        RoleResolver::new(guarded(&store, "eve")).resolve(&identity("eve")).await,
        ViewerRole::Expert
    );
    let kept = engine.get(&request.id).await?;
    assert_eq!(kept.status, RequestStatus::Active);
    assert_eq!(kept.expert_id.as_deref(), Some("eve"));

    // Closed requests no longer hold the expert
    engine.set_status(&root, &request.id, RequestStatus::Completed).await?;
    roles.change_role(&root, "eve", Role::User).await?;
    assert_eq!(store.document_count(&experts()).await, 0);
    Ok(())
}

#[tokio::test]
async fn reassigned_experts_lose_their_open_chat_feed() -> Result<()> {
    let store = MemoryStore::new();
    seed_profile(&store, "alice", Role::User).await?;
    seed_profile(&store, "eve", Role::User).await?;
    seed_profile(&store, "mallory", Role::User).await?;
    seed_profile(&store, "root", Role::Admin).await?;

    let root = RoleResolver::new(guarded(&store, "root"))
        .resolve_actor(&identity("root"))
        .await;
    let roles = RoleManager::new(guarded(&store, "root"));
    roles.change_role(&root, "eve", Role::Expert).await?;
    roles.change_role(&root, "mallory", Role::Expert).await?;

    let engine = LifecycleEngine::new(guarded(&store, "root"));
    let request = engine
        .create_manual(&root, "alice", PlanId::Lite, "eve")
        .await?;

    let mut feed = guarded(&store, "eve")
        .subscribe(Query::new(messages(&request.id)))
        .await?;
    let initial = timeout(Duration::from_secs(1), feed.next()).await?;
    assert!(matches!(initial, Some(Ok(ref docs)) if docs.is_empty()));
    let mut chat = ChannelBinding::new(MessagingChannel::new(guarded(&store, "eve")));
    chat.bind(&request.id).await?;

    engine.assign_expert(&root, &request.id, "mallory").await?;
    MessagingChannel::new(guarded(&store, "alice"))
        .append(&request.id, "details for my new expert", "alice", SenderRole::User)
        .await?;

    let pushed = timeout(Duration::from_secs(1), feed.next()).await?;
    assert!(matches!(pushed, Some(Err(ref e)) if e.is_permission_denied()));
    assert!(timeout(Duration::from_secs(1), feed.next()).await?.is_none());

    assert!(timeout(Duration::from_secs(1), chat.changed()).await?.is_err());
    assert!(!chat.is_bound());
    assert!(chat.messages().is_empty());
    assert_eq!(store.document_count(&messages(&request.id)).await, 1);
    Ok(())
}
