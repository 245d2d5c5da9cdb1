//! API service routes

use std::convert::Infallible;

use axum::{
    Extension, Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    middleware,
    response::{
        IntoResponse,
        sse::{Event, KeepAlive, Sse},
    },
    routing::{delete, get, post, put},
};
use common::SharedStore;
use futures::stream::{self, Stream};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::json;
use tracing::warn;

use crate::{
    admin::AdminConsole,
    auth_context::AuthContext,
    content::{ContentBoard, Feature, NewSession, SessionUpdate},
    desk::{Desk, DeskUpdate, DeskView, Workspace},
    error::{ApiError, ApiResult},
    lifecycle::LifecycleEngine,
    messaging::{ChannelError, MessagingChannel},
    middleware::{AuthUser, auth_middleware},
    models::{
        AccountRequest, Feed, PLANS, Role,
        payloads::{
            AssignExpertRequest, DeskStreamQuery, FeatureContent, ManualRequest, MeResponse,
            NewSignalRequest, PaymentStatusRequest, PostMessageRequest, RoleChangeRequest,
            SessionActiveRequest, StatusChangeRequest, SubmitPlanRequest,
        },
    },
    roles::{Actor, RoleResolver},
    state::AppState,
};

/// Create the router for the API service
pub fn create_router(state: AppState) -> Router {
    let admin_routes = Router::new()
        .route("/stats", get(admin_stats))
        .route("/requests", get(admin_requests).post(admin_create_request))
        .route("/requests/:id", delete(admin_delete_request))
        .route("/requests/:id/assign", post(admin_assign_expert))
        .route("/requests/:id/status", post(admin_set_status))
        .route("/requests/:id/payment", post(admin_set_payment_status))
        .route("/users", get(admin_users))
        .route("/users/:id", delete(admin_delete_user))
        .route("/users/:id/role", put(admin_change_role))
        .route("/users/:id/repair", post(admin_repair_role))
        .route("/experts", get(admin_experts))
        .route("/mentorship", get(admin_sessions).post(admin_add_session))
        .route(
            "/mentorship/:id",
            put(admin_update_session).delete(admin_delete_session),
        )
        .route("/mentorship/:id/active", post(admin_set_session_active))
        .route("/signals", get(admin_signals).post(admin_add_signal))
        .route("/signals/:id", delete(admin_delete_signal))
        .route("/features/:feature", get(admin_feature))
        .route("/features/:feature/toggle", post(admin_toggle_feature));

    let protected_routes = Router::new()
        .route("/me", get(me))
        .route("/requests", post(submit_plan))
        .route("/requests/current", get(current_request))
        .route("/requests/current/stream", get(current_request_stream))
        .route("/assignments", get(assignments))
        .route("/assignments/stream", get(assignments_stream))
        .route("/requests/:id/messages", get(messages).post(post_message))
        .route("/requests/:id/messages/stream", get(messages_stream))
        .route("/requests/:id/messages/:mid", delete(delete_message))
        .route("/desk/stream", get(desk_stream))
        .route("/mentorship", get(mentorship))
        .route("/signals", get(free_signals))
        .nest("/admin", admin_routes)
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            auth_middleware,
        ));

    Router::new()
        .route("/health", get(health_check))
        .route("/plans", get(plans))
        .merge(protected_routes)
        .with_state(state)
}

/// Scoped store and resolved actor of the caller
async fn caller(state: &AppState, user: &AuthUser) -> (SharedStore, Actor) {
    let store = state.store_for(&user.identity);
    let actor = RoleResolver::new(store.clone())
        .resolve_actor(&user.identity)
        .await;
    (store, actor)
}

async fn console(state: &AppState, user: &AuthUser) -> ApiResult<AdminConsole> {
    let (store, actor) = caller(state, user).await;
    Ok(AdminConsole::new(actor, store)?)
}

fn snapshot_event<T: Serialize>(name: &str, data: &T) -> Event {
    Event::default().event(name).json_data(data).unwrap_or_else(|e| {
        warn!("Failed to encode {} event: {}", name, e);
        Event::default().event("error").data("encoding failed")
    })
}

/// Stream every result set of a feed as a server-sent event
fn feed_events<T>(feed: Feed<T>) -> impl Stream<Item = Result<Event, Infallible>>
where
    T: Serialize + DeserializeOwned + Send + 'static,
{
    stream::unfold(feed, |mut feed| async move {
        let event = match feed.next().await? {
            Ok(records) => snapshot_event("snapshot", &records),
            Err(e) => {
                warn!("Live query failed: {}", e);
                Event::default().event("error").data(e.to_string())
            }
        };
        Some((Ok(event), feed))
    })
}

/// Health check endpoint
pub async fn health_check() -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "service": "api-service"
    }))
}

/// Plan catalog
pub async fn plans() -> impl IntoResponse {
    Json(PLANS)
}

pub async fn me(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
) -> impl IntoResponse {
    let (_, actor) = caller(&state, &user).await;
    Json(MeResponse {
        id: actor.uid,
        email: actor.email,
        display_name: user.identity.display_name,
        role: actor.role,
    })
}

/// Request a plan
pub async fn submit_plan(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Json(payload): Json<SubmitPlanRequest>,
) -> ApiResult<impl IntoResponse> {
    let (store, actor) = caller(&state, &user).await;
    let request = LifecycleEngine::new(store)
        .submit(&actor, payload.plan_id)
        .await?;
    Ok((StatusCode::CREATED, Json(request)))
}

pub async fn current_request(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
) -> ApiResult<impl IntoResponse> {
    let store = state.store_for(&user.identity);
    let current = LifecycleEngine::new(store)
        .current_for_user(&user.identity.id)
        .await?;
    Ok(Json(current))
}

pub async fn current_request_stream(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
) -> ApiResult<Sse<impl Stream<Item = Result<Event, Infallible>>>> {
    let store = state.store_for(&user.identity);
    let feed = LifecycleEngine::new(store)
        .watch_current_for_user(&user.identity.id)
        .await?;
    Ok(Sse::new(feed_events(feed)).keep_alive(KeepAlive::default()))
}

pub async fn assignments(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
) -> ApiResult<impl IntoResponse> {
    let store = state.store_for(&user.identity);
    let assigned = LifecycleEngine::new(store)
        .assignments(&user.identity.id)
        .await?;
    Ok(Json(assigned))
}

pub async fn assignments_stream(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
) -> ApiResult<Sse<impl Stream<Item = Result<Event, Infallible>>>> {
    let store = state.store_for(&user.identity);
    let feed = LifecycleEngine::new(store)
        .watch_assignments(&user.identity.id)
        .await?;
    Ok(Sse::new(feed_events(feed)).keep_alive(KeepAlive::default()))
}

/// Load a request the caller takes part in, checking its chat is open to them
async fn chat_request(
    store: &SharedStore,
    actor: &Actor,
    request_id: &str,
    write: bool,
) -> ApiResult<AccountRequest> {
    let request = LifecycleEngine::new(store.clone()).get(request_id).await?;
    if actor.role == Role::User {
        let open = if write {
            request.chat_writable()
        } else {
            request.chat_readable()
        };
        if !open {
            return Err(ChannelError::ChatClosed(request.id).into());
        }
    }
    Ok(request)
}

pub async fn messages(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(request_id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let (store, actor) = caller(&state, &user).await;
    chat_request(&store, &actor, &request_id, false).await?;
    let log = MessagingChannel::new(store).history(&request_id).await?;
    Ok(Json(log))
}

pub async fn post_message(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(request_id): Path<String>,
    Json(payload): Json<PostMessageRequest>,
) -> ApiResult<impl IntoResponse> {
    if payload.text.trim().is_empty() {
        return Err(ChannelError::EmptyMessage.into());
    }
    let (store, actor) = caller(&state, &user).await;
    chat_request(&store, &actor, &request_id, true).await?;
    let message = MessagingChannel::new(store)
        .append(&request_id, &payload.text, &actor.uid, actor.sender_role())
        .await?;
    Ok((StatusCode::CREATED, Json(message)))
}

pub async fn messages_stream(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(request_id): Path<String>,
) -> ApiResult<Sse<impl Stream<Item = Result<Event, Infallible>>>> {
    let (store, actor) = caller(&state, &user).await;
    chat_request(&store, &actor, &request_id, false).await?;
    let feed = MessagingChannel::new(store).subscribe(&request_id).await?;
    Ok(Sse::new(feed_events(feed)).keep_alive(KeepAlive::default()))
}

pub async fn delete_message(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path((request_id, message_id)): Path<(String, String)>,
) -> ApiResult<impl IntoResponse> {
    let store = state.store_for(&user.identity);
    MessagingChannel::new(store)
        .remove(&request_id, &message_id, &user.identity.id)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Live dashboard of the caller
pub async fn desk_stream(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Query(params): Query<DeskStreamQuery>,
) -> ApiResult<Sse<impl Stream<Item = Result<Event, Infallible>>>> {
    let auth = AuthContext::new();
    let mut workspace = Workspace::new(&auth, state.scope());
    auth.sign_in(user.identity);
    workspace.sync().await?;

    if let (Some(request_id), Some(Desk::Expert(desk))) =
        (params.select.as_deref(), workspace.desk_mut())
    {
        desk.select(request_id).await?;
    }

    let initial: Option<DeskView> = workspace.desk().map(Desk::view);
    let events = stream::unfold(
        (workspace, auth, initial),
        |(mut workspace, auth, pending)| async move {
            let view = match pending {
                Some(view) => view,
                None => {
                    let desk = workspace.desk_mut()?;
                    if desk.next_update().await == DeskUpdate::Closed {
                        return None;
                    }
                    desk.view()
                }
            };
            let event = snapshot_event("desk", &view);
            Some((Ok(event), (workspace, auth, None)))
        },
    );
    Ok(Sse::new(events).keep_alive(KeepAlive::default()))
}

/// Mentorship sessions offered to signed-in users
pub async fn mentorship(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
) -> ApiResult<impl IntoResponse> {
    let board = ContentBoard::new(state.store_for(&user.identity));
    let sessions = board.public_sessions().await?;
    Ok(Json(FeatureContent::from(sessions)))
}

pub async fn free_signals(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
) -> ApiResult<impl IntoResponse> {
    let board = ContentBoard::new(state.store_for(&user.identity));
    let signals = board.public_signals().await?;
    Ok(Json(FeatureContent::from(signals)))
}

// Admin console

pub async fn admin_stats(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
) -> ApiResult<impl IntoResponse> {
    let stats = console(&state, &user).await?.stats().await?;
    Ok(Json(stats))
}

pub async fn admin_requests(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
) -> ApiResult<impl IntoResponse> {
    let requests = console(&state, &user).await?.requests().await?;
    Ok(Json(requests))
}

pub async fn admin_create_request(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Json(payload): Json<ManualRequest>,
) -> ApiResult<impl IntoResponse> {
    let request = console(&state, &user)
        .await?
        .create_request(&payload.user_id, payload.plan_id, &payload.expert_id)
        .await?;
    Ok((StatusCode::CREATED, Json(request)))
}

pub async fn admin_assign_expert(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(request_id): Path<String>,
    Json(payload): Json<AssignExpertRequest>,
) -> ApiResult<impl IntoResponse> {
    let request = console(&state, &user)
        .await?
        .assign_expert(&request_id, &payload.expert_id)
        .await?;
    Ok(Json(request))
}

pub async fn admin_set_status(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(request_id): Path<String>,
    Json(payload): Json<StatusChangeRequest>,
) -> ApiResult<impl IntoResponse> {
    let request = console(&state, &user)
        .await?
        .set_status(&request_id, payload.status)
        .await?;
    Ok(Json(request))
}

pub async fn admin_set_payment_status(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(request_id): Path<String>,
    Json(payload): Json<PaymentStatusRequest>,
) -> ApiResult<impl IntoResponse> {
    let request = console(&state, &user)
        .await?
        .set_payment_status(&request_id, &payload.payment_status)
        .await?;
    Ok(Json(request))
}

pub async fn admin_delete_request(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(request_id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let removed = console(&state, &user)
        .await?
        .delete_request(&request_id)
        .await?;
    Ok(Json(json!({ "deleted": request_id, "messagesRemoved": removed })))
}

pub async fn admin_users(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
) -> ApiResult<impl IntoResponse> {
    let users = console(&state, &user).await?.users().await?;
    Ok(Json(users))
}

pub async fn admin_experts(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
) -> ApiResult<impl IntoResponse> {
    let experts = console(&state, &user).await?.experts().await?;
    Ok(Json(experts))
}

pub async fn admin_change_role(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(uid): Path<String>,
    Json(payload): Json<RoleChangeRequest>,
) -> ApiResult<impl IntoResponse> {
    let profile = console(&state, &user)
        .await?
        .change_role(&uid, payload.role)
        .await?;
    Ok(Json(profile))
}

pub async fn admin_repair_role(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(uid): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let outcome = console(&state, &user).await?.repair_role(&uid).await?;
    Ok(Json(json!({ "uid": uid, "outcome": outcome })))
}

pub async fn admin_delete_user(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(uid): Path<String>,
) -> ApiResult<impl IntoResponse> {
    console(&state, &user).await?.delete_user(&uid).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn admin_sessions(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
) -> ApiResult<impl IntoResponse> {
    let sessions = console(&state, &user).await?.mentorship_sessions().await?;
    Ok(Json(sessions))
}

pub async fn admin_add_session(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Json(payload): Json<NewSession>,
) -> ApiResult<impl IntoResponse> {
    let session = console(&state, &user).await?.add_session(payload).await?;
    Ok((StatusCode::CREATED, Json(session)))
}

pub async fn admin_update_session(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<String>,
    Json(payload): Json<SessionUpdate>,
) -> ApiResult<impl IntoResponse> {
    let session = console(&state, &user)
        .await?
        .update_session(&id, payload)
        .await?;
    Ok(Json(session))
}

pub async fn admin_set_session_active(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<String>,
    Json(payload): Json<SessionActiveRequest>,
) -> ApiResult<impl IntoResponse> {
    let session = console(&state, &user)
        .await?
        .set_session_active(&id, payload.active)
        .await?;
    Ok(Json(session))
}

pub async fn admin_delete_session(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    console(&state, &user).await?.delete_session(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn admin_signals(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
) -> ApiResult<impl IntoResponse> {
    let signals = console(&state, &user).await?.signals().await?;
    Ok(Json(signals))
}

pub async fn admin_add_signal(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Json(payload): Json<NewSignalRequest>,
) -> ApiResult<impl IntoResponse> {
    let signal = console(&state, &user)
        .await?
        .add_signal(&payload.text)
        .await?;
    Ok((StatusCode::CREATED, Json(signal)))
}

pub async fn admin_delete_signal(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    console(&state, &user).await?.delete_signal(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn admin_feature(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(feature): Path<Feature>,
) -> ApiResult<impl IntoResponse> {
    let available = console(&state, &user).await?.is_available(feature).await?;
    Ok(Json(json!({ "isAvailable": available })))
}

pub async fn admin_toggle_feature(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(feature): Path<Feature>,
) -> ApiResult<impl IntoResponse> {
    let available = console(&state, &user)
        .await?
        .toggle_feature(feature)
        .await?;
    Ok(Json(json!({ "isAvailable": available })))
}
