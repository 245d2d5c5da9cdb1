//! Dashboards of signed-in viewers
//!
//! A [`Workspace`] follows the authentication context. On sign-in it resolves
//! the viewer's role and then opens the matching desk; on sign-out it drops
//! the desk, which releases every subscription the desk holds. Failures of a
//! live stream land in the desk's error banner and never tear down the other
//! streams.

use std::fmt::Display;
use std::sync::Arc;

use common::{DocumentStore, SharedStore};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::admin::{AdminConsole, AdminError};
use crate::auth_context::AuthContext;
use crate::collections::experts;
use crate::lifecycle::{LifecycleEngine, LifecycleError, RequestFeed};
use crate::messaging::{ChannelBinding, ChannelError, MessagingChannel};
use crate::models::{AccountRequest, ExpertRecord, Identity, Message, PlanId, Role};
use crate::roles::{Actor, RoleResolver};

/// Errors of desk operations
#[derive(Error, Debug)]
pub enum DeskError {
    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),

    #[error(transparent)]
    Channel(#[from] ChannelError),

    #[error(transparent)]
    Admin(#[from] AdminError),

    #[error("Request {0} is not assigned to you")]
    UnknownAssignment(String),
}

/// What changed after [`UserDesk::next_update`] or [`ExpertDesk::next_update`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeskUpdate {
    Requests,
    Messages,
    /// A stream failed; see the error banner
    Failed,
    /// The request stream ended
    Closed,
}

/// Expert shown to the requester
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AssignedExpert {
    pub id: String,
    pub name: Option<String>,
    pub email: Option<String>,
}

/// Serializable state of a desk
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum DeskView {
    #[serde(rename_all = "camelCase")]
    User {
        current_request: Option<AccountRequest>,
        assigned_expert: Option<AssignedExpert>,
        shows_plan_catalog: bool,
        chat_readable: bool,
        chat_writable: bool,
        messages: Vec<Message>,
        error: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    Expert {
        assignments: Vec<AccountRequest>,
        selected_request_id: Option<String>,
        messages: Vec<Message>,
        error: Option<String>,
    },
    Admin {
        uid: String,
    },
}

fn banner(slot: &mut Option<String>, context: &str, error: impl Display) {
    warn!("{}: {}", context, error);
    *slot = Some(format!("{}: {}", context, error));
}

/// Dashboard of a plain user
pub struct UserDesk {
    actor: Actor,
    store: SharedStore,
    engine: LifecycleEngine,
    requests: RequestFeed,
    current: Option<AccountRequest>,
    expert: Option<AssignedExpert>,
    chat: ChannelBinding,
    error: Option<String>,
}

impl UserDesk {
    /// Subscribe to the viewer's current request and load it
    pub async fn open(actor: Actor, store: SharedStore) -> Result<Self, DeskError> {
        let engine = LifecycleEngine::new(store.clone());
        let mut requests = engine.watch_current_for_user(&actor.uid).await?;
        let initial = requests
            .next()
            .await
            .transpose()
            .map_err(LifecycleError::from)?
            .unwrap_or_default();

        let mut desk = Self {
            chat: ChannelBinding::new(MessagingChannel::new(store.clone())),
            actor,
            store,
            engine,
            requests,
            current: None,
            expert: None,
            error: None,
        };
        desk.apply(initial).await;
        Ok(desk)
    }

    pub fn actor(&self) -> &Actor {
        &self.actor
    }

    /// The viewer's newest request
    pub fn current_request(&self) -> Option<&AccountRequest> {
        self.current.as_ref()
    }

    pub fn assigned_expert(&self) -> Option<&AssignedExpert> {
        self.expert.as_ref()
    }

    /// The plan catalog is offered when there is no open request
    pub fn shows_plan_catalog(&self) -> bool {
        self.current.as_ref().is_none_or(|r| r.status.is_terminal())
    }

    pub fn chat_readable(&self) -> bool {
        self.current.as_ref().is_some_and(|r| r.chat_readable())
    }

    pub fn chat_writable(&self) -> bool {
        self.current.as_ref().is_some_and(|r| r.chat_writable())
    }

    pub fn messages(&self) -> &[Message] {
        self.chat.messages()
    }

    /// Last error banner
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn clear_error(&mut self) {
        self.error = None;
    }

    pub fn view(&self) -> DeskView {
        DeskView::User {
            current_request: self.current.clone(),
            assigned_expert: self.expert.clone(),
            shows_plan_catalog: self.shows_plan_catalog(),
            chat_readable: self.chat_readable(),
            chat_writable: self.chat_writable(),
            messages: self.messages().to_vec(),
            error: self.error.clone(),
        }
    }

    pub async fn submit_plan(&mut self, plan_id: PlanId) -> Result<AccountRequest, DeskError> {
        match self.engine.submit(&self.actor, plan_id).await {
            Ok(request) => {
                self.error = None;
                Ok(request)
            }
            Err(e) => {
                banner(&mut self.error, "Failed to submit plan request", &e);
                Err(e.into())
            }
        }
    }

    /// Post to the current request's chat
    pub async fn send(&mut self, text: &str) -> Result<Message, DeskError> {
        if text.trim().is_empty() {
            return Err(ChannelError::EmptyMessage.into());
        }
        match &self.current {
            None => return Err(ChannelError::NoActiveChat.into()),
            Some(request) if !request.chat_writable() => {
                return Err(ChannelError::ChatClosed(request.id.clone()).into());
            }
            Some(_) => {}
        }
        let sent = self
            .chat
            .send(text, &self.actor.uid, self.actor.sender_role())
            .await;
        sent.map_err(|e| {
            banner(&mut self.error, "Failed to send message", &e);
            e.into()
        })
    }

    pub async fn delete_message(&mut self, message_id: &str) -> Result<(), DeskError> {
        let deleted = self.chat.delete(message_id, &self.actor.uid).await;
        deleted.map_err(|e| {
            banner(&mut self.error, "Failed to delete message", &e);
            e.into()
        })
    }

    /// Wait for the next change of the request or of its chat
    pub async fn next_update(&mut self) -> DeskUpdate {
        enum Event {
            Requests(Option<common::StoreResult<Vec<AccountRequest>>>),
            Chat(Result<(), ChannelError>),
        }

        let event = tokio::select! {
            update = self.requests.next() => Event::Requests(update),
            changed = self.chat.changed() => Event::Chat(changed),
        };

        match event {
            Event::Requests(Some(Ok(requests))) => {
                self.apply(requests).await;
                DeskUpdate::Requests
            }
            Event::Requests(Some(Err(e))) => {
                banner(&mut self.error, "Failed to load request status", e);
                DeskUpdate::Failed
            }
            Event::Requests(None) => DeskUpdate::Closed,
            Event::Chat(Ok(())) => DeskUpdate::Messages,
            Event::Chat(Err(e)) => {
                banner(&mut self.error, "Failed to load messages", e);
                DeskUpdate::Failed
            }
        }
    }

    async fn apply(&mut self, requests: Vec<AccountRequest>) {
        self.current = requests.into_iter().next();
        self.expert = match &self.current {
            Some(request) => self.lookup_expert(request).await,
            None => None,
        };

        let readable = self
            .current
            .as_ref()
            .filter(|r| r.chat_readable())
            .map(|r| r.id.clone());
        match readable {
            Some(request_id) => {
                if let Err(e) = self.chat.bind(&request_id).await {
                    banner(&mut self.error, "Failed to load messages", e);
                }
            }
            None => self.chat.release(),
        }
    }

    /// Expert details from the request, else a best-effort expert record read
    async fn lookup_expert(&self, request: &AccountRequest) -> Option<AssignedExpert> {
        let id = request.expert_id.clone()?;
        if request.expert_name.is_some() || request.expert_email.is_some() {
            return Some(AssignedExpert {
                id,
                name: request.expert_name.clone(),
                email: request.expert_email.clone(),
            });
        }

        let record = match self.store.get(&experts(), &id).await {
            Ok(Some(doc)) => doc.decode::<ExpertRecord>().map(Some),
            Ok(None) => Ok(None),
            Err(e) => Err(e),
        };
        match record {
            Ok(Some(record)) => Some(AssignedExpert {
                id,
                name: Some(record.name),
                email: Some(record.email),
            }),
            Ok(None) => Some(AssignedExpert {
                id,
                name: None,
                email: None,
            }),
            Err(e) => {
                if e.is_permission_denied() {
                    debug!("Expert record {} not readable by {}", id, self.actor.uid);
                } else {
                    warn!("Error loading expert {}: {}", id, e);
                }
                Some(AssignedExpert {
                    id,
                    name: None,
                    email: None,
                })
            }
        }
    }
}

/// Dashboard of an expert
pub struct ExpertDesk {
    actor: Actor,
    feed: RequestFeed,
    assignments: Vec<AccountRequest>,
    selected: Option<String>,
    chat: ChannelBinding,
    error: Option<String>,
}

impl ExpertDesk {
    /// Subscribe to the expert's assignments; nothing is selected yet
    pub async fn open(actor: Actor, store: SharedStore) -> Result<Self, DeskError> {
        let engine = LifecycleEngine::new(store.clone());
        let mut feed = engine.watch_assignments(&actor.uid).await?;
        let assignments = feed
            .next()
            .await
            .transpose()
            .map_err(LifecycleError::from)?
            .unwrap_or_default();

        Ok(Self {
            chat: ChannelBinding::new(MessagingChannel::new(store)),
            actor,
            feed,
            assignments,
            selected: None,
            error: None,
        })
    }

    pub fn actor(&self) -> &Actor {
        &self.actor
    }

    /// Assigned requests, newest first
    pub fn assignments(&self) -> &[AccountRequest] {
        &self.assignments
    }

    pub fn selected_request(&self) -> Option<&AccountRequest> {
        let selected = self.selected.as_deref()?;
        self.assignments.iter().find(|r| r.id == selected)
    }

    pub fn messages(&self) -> &[Message] {
        self.chat.messages()
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn clear_error(&mut self) {
        self.error = None;
    }

    pub fn view(&self) -> DeskView {
        DeskView::Expert {
            assignments: self.assignments.clone(),
            selected_request_id: self.selected.clone(),
            messages: self.messages().to_vec(),
            error: self.error.clone(),
        }
    }

    /// Open the chat of one of the assignments
    pub async fn select(&mut self, request_id: &str) -> Result<(), DeskError> {
        if !self.assignments.iter().any(|r| r.id == request_id) {
            return Err(DeskError::UnknownAssignment(request_id.to_string()));
        }
        self.selected = Some(request_id.to_string());
        if let Err(e) = self.chat.bind(request_id).await {
            banner(&mut self.error, "Failed to load messages", &e);
            return Err(e.into());
        }
        Ok(())
    }

    pub fn clear_selection(&mut self) {
        self.selected = None;
        self.chat.release();
    }

    pub async fn send(&mut self, text: &str) -> Result<Message, DeskError> {
        let sent = self
            .chat
            .send(text, &self.actor.uid, self.actor.sender_role())
            .await;
        sent.map_err(|e| {
            if !matches!(e, ChannelError::EmptyMessage | ChannelError::NoActiveChat) {
                banner(&mut self.error, "Failed to send message", &e);
            }
            e.into()
        })
    }

    pub async fn delete_message(&mut self, message_id: &str) -> Result<(), DeskError> {
        let deleted = self.chat.delete(message_id, &self.actor.uid).await;
        deleted.map_err(|e| {
            banner(&mut self.error, "Failed to delete message", &e);
            e.into()
        })
    }

    /// Wait for the next change of the assignments or of the selected chat
    pub async fn next_update(&mut self) -> DeskUpdate {
        enum Event {
            Assignments(Option<common::StoreResult<Vec<AccountRequest>>>),
            Chat(Result<(), ChannelError>),
        }

        let event = tokio::select! {
            update = self.feed.next() => Event::Assignments(update),
            changed = self.chat.changed() => Event::Chat(changed),
        };

        match event {
            Event::Assignments(Some(Ok(assignments))) => {
                self.assignments = assignments;
                let still_assigned = self
                    .selected
                    .as_deref()
                    .is_none_or(|id| self.assignments.iter().any(|r| r.id == id));
                if !still_assigned {
                    info!("Selected request is no longer assigned to {}", self.actor.uid);
                    self.clear_selection();
                }
                DeskUpdate::Requests
            }
            Event::Assignments(Some(Err(e))) => {
                banner(&mut self.error, "Failed to load assignments", e);
                DeskUpdate::Failed
            }
            Event::Assignments(None) => DeskUpdate::Closed,
            Event::Chat(Ok(())) => DeskUpdate::Messages,
            Event::Chat(Err(e)) => {
                banner(&mut self.error, "Failed to load messages", e);
                DeskUpdate::Failed
            }
        }
    }
}

/// Desk opened for the signed-in viewer
pub enum Desk {
    User(UserDesk),
    Expert(ExpertDesk),
    Admin(AdminConsole),
}

impl Desk {
    /// Resolve the viewer's role, then open the matching desk
    pub async fn open(identity: &Identity, store: SharedStore) -> Result<Self, DeskError> {
        let actor = RoleResolver::new(store.clone()).resolve_actor(identity).await;
        info!("Opening {} desk for {}", actor.role, actor.uid);
        Ok(match actor.role {
            Role::User => Desk::User(UserDesk::open(actor, store).await?),
            Role::Expert => Desk::Expert(ExpertDesk::open(actor, store).await?),
            Role::Admin => Desk::Admin(AdminConsole::new(actor, store)?),
        })
    }

    pub fn actor(&self) -> &Actor {
        match self {
            Desk::User(desk) => desk.actor(),
            Desk::Expert(desk) => desk.actor(),
            Desk::Admin(console) => console.actor(),
        }
    }

    pub fn view(&self) -> DeskView {
        match self {
            Desk::User(desk) => desk.view(),
            Desk::Expert(desk) => desk.view(),
            Desk::Admin(console) => DeskView::Admin {
                uid: console.actor().uid.clone(),
            },
        }
    }

    /// Wait for the next change; the admin console has no live streams
    pub async fn next_update(&mut self) -> DeskUpdate {
        match self {
            Desk::User(desk) => desk.next_update().await,
            Desk::Expert(desk) => desk.next_update().await,
            Desk::Admin(_) => std::future::pending().await,
        }
    }
}

/// Store handed to the desks of one identity
pub type StoreScope = Arc<dyn Fn(&Identity) -> SharedStore + Send + Sync>;

/// Follows the authentication context and keeps the matching desk open
pub struct Workspace {
    auth: watch::Receiver<Option<Identity>>,
    scope: StoreScope,
    identity: Option<Identity>,
    desk: Option<Desk>,
}

impl Workspace {
    pub fn new(auth: &AuthContext, scope: StoreScope) -> Self {
        Self {
            auth: auth.subscribe(),
            scope,
            identity: None,
            desk: None,
        }
    }

    pub fn identity(&self) -> Option<&Identity> {
        self.identity.as_ref()
    }

    pub fn desk(&self) -> Option<&Desk> {
        self.desk.as_ref()
    }

    pub fn desk_mut(&mut self) -> Option<&mut Desk> {
        self.desk.as_mut()
    }

    /// Apply the identity currently held by the context
    pub async fn sync(&mut self) -> Result<(), DeskError> {
        let identity = self.auth.borrow_and_update().clone();
        if identity == self.identity && (identity.is_none() || self.desk.is_some()) {
            return Ok(());
        }

        // Dropping the desk releases its subscriptions
        self.desk = None;
        self.identity = identity;
        let Some(identity) = self.identity.clone() else {
            info!("Signed out, desk closed");
            return Ok(());
        };

        let store = (self.scope)(&identity);
        self.desk = Some(Desk::open(&identity, store).await?);
        Ok(())
    }

    /// Wait for the next sign-in or sign-out and apply it
    ///
    /// Returns `false` once the context has been dropped.
    pub async fn follow(&mut self) -> Result<bool, DeskError> {
        if self.auth.changed().await.is_err() {
            self.desk = None;
            self.identity = None;
            return Ok(false);
        }
        self.sync().await?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use common::{Fields, GuardedStore, MemoryStore, Principal};
    use serde_json::json;
    use tokio::time::timeout;

    use super::*;
    use crate::collections::users;
    use crate::models::RequestStatus;
    use crate::rules::PlatformRules;

    async fn seed(store: &MemoryStore, uid: &str, role: Role) {
        let mut data = Fields::new();
        data.insert("email".into(), json!(format!("{}@example.com", uid)));
        data.insert("role".into(), json!(role));
        store.set(&users(), uid, data.clone(), false).await.expect("seed profile");
        if role == Role::Expert {
            data.insert("name".into(), json!("Eve"));
            store.set(&experts(), uid, data, false).await.expect("seed expert");
        }
    }

    fn scope(store: &MemoryStore) -> StoreScope {
        let store = store.clone();
        Arc::new(move |identity: &Identity| -> SharedStore {
            Arc::new(GuardedStore::new(
                Arc::new(store.clone()),
                Arc::new(PlatformRules),
                Principal::new(identity.id.clone()),
            ))
        })
    }

    fn identity(uid: &str) -> Identity {
        Identity {
            id: uid.to_string(),
            email: format!("{}@example.com", uid),
            display_name: None,
        }
    }

    fn admin() -> Actor {
        Actor {
            uid: "root".into(),
            email: "root@example.com".into(),
            role: Role::Admin,
        }
    }

    #[tokio::test]
    async fn workspace_opens_the_desk_matching_the_role() -> Result<(), DeskError> {
        let store = MemoryStore::new();
        seed(&store, "alice", Role::User).await;
        seed(&store, "eve", Role::Expert).await;
        seed(&store, "root", Role::Admin).await;

        let auth = AuthContext::new();
        let mut workspace = Workspace::new(&auth, scope(&store));
        workspace.sync().await?;
        assert!(workspace.desk().is_none());

        auth.sign_in(identity("eve"));
        assert!(workspace.follow().await?);
        assert!(matches!(workspace.desk(), Some(Desk::Expert(_))));

        auth.sign_in(identity("alice"));
        assert!(workspace.follow().await?);
        assert!(matches!(workspace.desk(), Some(Desk::User(_))));

        auth.sign_in(identity("root"));
        assert!(workspace.follow().await?);
        assert!(matches!(workspace.desk(), Some(Desk::Admin(_))));

        auth.sign_out();
        assert!(workspace.follow().await?);
        assert!(workspace.desk().is_none());
        Ok(())
    }

    #[tokio::test]
    async fn user_desk_follows_the_current_request() -> Result<(), DeskError> {
        let store = MemoryStore::new();
        seed(&store, "alice", Role::User).await;
        seed(&store, "eve", Role::Expert).await;
        seed(&store, "root", Role::Admin).await;
        let scope = scope(&store);

        let alice = Actor {
            uid: "alice".into(),
            email: "alice@example.com".into(),
            role: Role::User,
        };
        let mut desk = UserDesk::open(alice, scope(&identity("alice"))).await?;
        assert!(desk.current_request().is_none());
        assert!(desk.shows_plan_catalog());

        let request = desk.submit_plan(PlanId::Lite).await?;
        assert_eq!(
            timeout(Duration::from_secs(1), desk.next_update()).await.expect("pushed"),
            DeskUpdate::Requests
        );
        assert_eq!(desk.current_request().map(|r| r.status), Some(RequestStatus::Pending));
        assert!(!desk.shows_plan_catalog());
        assert!(matches!(
            desk.send("hello").await.unwrap_err(),
            DeskError::Channel(ChannelError::ChatClosed(_))
        ));

        let engine = LifecycleEngine::new(scope(&identity("root")));
        engine.assign_expert(&admin(), &request.id, "eve").await?;
        timeout(Duration::from_secs(1), desk.next_update()).await.expect("pushed");
        let expert = desk.assigned_expert().expect("assigned expert");
        assert_eq!(expert.id, "eve");
        assert_eq!(expert.name.as_deref(), Some("Eve"));
        Ok(())
    }

    #[tokio::test]
    async fn expert_desk_binds_only_after_a_selection() -> Result<(), DeskError> {
        let store = MemoryStore::new();
        seed(&store, "alice", Role::User).await;
        seed(&store, "eve", Role::Expert).await;
        seed(&store, "root", Role::Admin).await;
        let scope = scope(&store);

        let engine = LifecycleEngine::new(scope(&identity("root")));
        let request = engine
            .create_manual(&admin(), "alice", PlanId::Pro, "eve")
            .await?;

        let eve = Actor {
            uid: "eve".into(),
            email: "eve@example.com".into(),
            role: Role::Expert,
        };
        let mut desk = ExpertDesk::open(eve, scope(&identity("eve"))).await?;
        assert_eq!(desk.assignments().len(), 1);
        assert!(matches!(
            desk.send("hi").await.unwrap_err(),
            DeskError::Channel(ChannelError::NoActiveChat)
        ));
        assert!(matches!(
            desk.select("elsewhere").await.unwrap_err(),
            DeskError::UnknownAssignment(_)
        ));

        desk.select(&request.id).await?;
        desk.send("welcome").await?;
        assert_eq!(
            timeout(Duration::from_secs(1), desk.next_update()).await.expect("pushed"),
            DeskUpdate::Messages
        );
        assert_eq!(desk.messages().len(), 1);
        assert_eq!(desk.messages()[0].sender_id, "eve");
        Ok(())
    }
}
