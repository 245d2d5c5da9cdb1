//! Authentication service routes

use axum::{
    Extension, Json, Router,
    extract::State,
    http::StatusCode,
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use common::{CollectionPath, DocumentStore, Fields, server_timestamp};
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::{
    AppState,
    jwt::TokenType,
    middleware::{AuthenticatedIdentity, auth_middleware},
    models::{Credentials, Identity, IdentityView, NewIdentity},
    repositories::IdentityError,
    validation::{validate_display_name, validate_email, validate_password},
};

/// Response for token generation
#[derive(Serialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: String,
    pub expires_in: u64,
    pub identity: IdentityView,
}

/// Request carrying a refresh token
#[derive(Deserialize)]
pub struct RefreshTokenRequest {
    pub refresh_token: String,
}

#[derive(Deserialize)]
pub struct PasswordResetRequest {
    pub email: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PasswordResetConfirm {
    pub token: String,
    pub new_password: String,
}

/// Profile collection the api service reads roles from
fn profiles() -> CollectionPath {
    CollectionPath::new("users")
}

/// Create the router for the authentication service
pub fn create_router(state: AppState) -> Router {
    let protected = Router::new()
        .route("/auth/me", get(me))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            auth_middleware,
        ));

    Router::new()
        .route("/health", get(health_check))
        .route("/auth/signup", post(signup))
        .route("/auth/signin", post(signin))
        .route("/auth/refresh", post(refresh_token))
        .route("/auth/signout", post(signout))
        .route("/auth/password-reset", post(request_password_reset))
        .route("/auth/password-reset/confirm", post(confirm_password_reset))
        .merge(protected)
        .with_state(state)
}

/// Health check endpoint
pub async fn health_check() -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "service": "auth-service"
    }))
}

/// Issue a token pair and record the session
async fn start_session(state: &AppState, identity: &Identity) -> Result<TokenResponse, AuthError> {
    let access_token = state
        .jwt_service
        .generate_access_token(identity)
        .map_err(|e| {
            error!("Failed to generate access token: {}", e);
            AuthError::InternalServerError
        })?;
    let refresh_token = state
        .jwt_service
        .generate_refresh_token(identity)
        .map_err(|e| {
            error!("Failed to generate refresh token: {}", e);
            AuthError::InternalServerError
        })?;

    state
        .sessions
        .store_session(&identity.id, &refresh_token)
        .await
        .map_err(|e| {
            error!("Failed to store session in Redis: {}", e);
            AuthError::InternalServerError
        })?;

    Ok(TokenResponse {
        access_token,
        refresh_token,
        token_type: "Bearer".to_string(),
        expires_in: state.jwt_service.access_token_expiry(),
        identity: IdentityView::from(identity),
    })
}

/// Register an identity and its user profile
pub async fn signup(
    State(state): State<AppState>,
    Json(mut payload): Json<NewIdentity>,
) -> Result<impl IntoResponse, AuthError> {
    payload.email = payload.email.trim().to_lowercase();
    validate_email(&payload.email).map_err(AuthError::BadRequest)?;
    validate_password(&payload.password).map_err(AuthError::BadRequest)?;
    validate_display_name(payload.display_name.as_deref()).map_err(AuthError::BadRequest)?;

    info!("Sign-up for: {}", payload.email);
    let identity = state.identities.create(&payload).await?;

    let mut profile = Fields::new();
    profile.insert("email".into(), json!(identity.email));
    if let Some(name) = &identity.display_name {
        profile.insert("name".into(), json!(name));
    }
    profile.insert("role".into(), json!("user"));
    profile.insert("plan".into(), json!(null));
    profile.insert("createdAt".into(), server_timestamp());
    state
        .store
        .set(&profiles(), &identity.id, profile, false)
        .await
        .map_err(|e| {
            error!("Failed to create profile of {}: {}", identity.id, e);
            AuthError::InternalServerError
        })?;

    let tokens = start_session(&state, &identity).await?;
    Ok((StatusCode::CREATED, Json(tokens)))
}

/// Sign in with email and password
pub async fn signin(
    State(state): State<AppState>,
    Json(payload): Json<Credentials>,
) -> Result<impl IntoResponse, AuthError> {
    let email = payload.email.trim().to_lowercase();
    if !state.rate_limiter.check(&email).await {
        warn!("Sign-in refused for {}: too many attempts", email);
        return Err(AuthError::TooManyRequests);
    }

    let identity = state
        .identities
        .find_by_email(&email)
        .await?
        .filter(|identity| {
            crate::repositories::identity::verify_password(
                &payload.password,
                &identity.password_hash,
            )
        })
        .ok_or_else(|| {
            info!("Failed sign-in for {}", email);
            AuthError::Unauthorized
        })?;

    state.rate_limiter.reset(&email).await;
    info!("Signed in: {}", identity.id);
    let tokens = start_session(&state, &identity).await?;
    Ok((StatusCode::OK, Json(tokens)))
}

/// Exchange a refresh token for a new token pair
pub async fn refresh_token(
    State(state): State<AppState>,
    Json(payload): Json<RefreshTokenRequest>,
) -> Result<impl IntoResponse, AuthError> {
    let claims = state
        .jwt_service
        .validate_token(&payload.refresh_token)
        .map_err(|_| AuthError::Unauthorized)?;
    if claims.token_type != TokenType::Refresh {
        return Err(AuthError::Unauthorized);
    }

    let redis = state.sessions.redis_pool();
    let is_blacklisted = state
        .jwt_service
        .is_token_blacklisted(redis, &payload.refresh_token)
        .await
        .map_err(|e| {
            error!("Failed to check if token is blacklisted: {}", e);
            AuthError::InternalServerError
        })?;
    let is_current = state
        .sessions
        .is_session_valid(&claims.sub, &payload.refresh_token)
        .await
        .map_err(|e| {
            error!("Failed to read session: {}", e);
            AuthError::InternalServerError
        })?;
    if is_blacklisted || !is_current {
        return Err(AuthError::Unauthorized);
    }

    let identity = state
        .identities
        .find_by_id(&claims.sub)
        .await?
        .ok_or(AuthError::Unauthorized)?;

    let access_token = state
        .jwt_service
        .generate_access_token(&identity)
        .map_err(|e| {
            error!("Failed to generate access token: {}", e);
            AuthError::InternalServerError
        })?;
    let refresh_token = state
        .jwt_service
        .rotate_refresh_token(redis, &identity, &payload.refresh_token)
        .await
        .map_err(|e| {
            error!("Failed to rotate refresh token: {}", e);
            AuthError::InternalServerError
        })?;
    state
        .sessions
        .store_session(&identity.id, &refresh_token)
        .await
        .map_err(|e| {
            error!("Failed to update session in Redis: {}", e);
            AuthError::InternalServerError
        })?;

    Ok(Json(TokenResponse {
        access_token,
        refresh_token,
        token_type: "Bearer".to_string(),
        expires_in: state.jwt_service.access_token_expiry(),
        identity: IdentityView::from(&identity),
    }))
}

/// Sign out, retiring the refresh token
pub async fn signout(
    State(state): State<AppState>,
    Json(payload): Json<RefreshTokenRequest>,
) -> Result<impl IntoResponse, AuthError> {
    let claims = state
        .jwt_service
        .validate_token(&payload.refresh_token)
        .map_err(|_| AuthError::Unauthorized)?;
    if claims.token_type != TokenType::Refresh {
        return Err(AuthError::Unauthorized);
    }

    let expiry = crate::jwt::JwtService::remaining_lifetime(&claims).map_err(|e| {
        error!("Failed to get current time: {}", e);
        AuthError::InternalServerError
    })?;
    state
        .jwt_service
        .blacklist_token(state.sessions.redis_pool(), &payload.refresh_token, expiry)
        .await
        .map_err(|e| {
            error!("Failed to blacklist token: {}", e);
            AuthError::InternalServerError
        })?;
    state.sessions.delete_session(&claims.sub).await.map_err(|e| {
        error!("Failed to remove session from Redis: {}", e);
        AuthError::InternalServerError
    })?;

    info!("Signed out: {}", claims.sub);
    Ok(Json(json!({"message": "Signed out successfully"})))
}

/// Start a password reset; the answer never reveals whether the email exists
pub async fn request_password_reset(
    State(state): State<AppState>,
    Json(payload): Json<PasswordResetRequest>,
) -> Result<impl IntoResponse, AuthError> {
    let email = payload.email.trim().to_lowercase();
    validate_email(&email).map_err(AuthError::BadRequest)?;

    if let Some(identity) = state.identities.find_by_email(&email).await? {
        let token = state
            .sessions
            .issue_reset_token(&identity.id)
            .await
            .map_err(|e| {
                error!("Failed to store reset token: {}", e);
                AuthError::InternalServerError
            })?;
        info!("Password reset token issued for {}", identity.id);
        debug!("Password reset token for {}: {}", email, token);
    }

    Ok((
        StatusCode::ACCEPTED,
        Json(json!({"message": "If the email is registered, a reset link has been sent"})),
    ))
}

/// Set a new password with a reset token
pub async fn confirm_password_reset(
    State(state): State<AppState>,
    Json(payload): Json<PasswordResetConfirm>,
) -> Result<impl IntoResponse, AuthError> {
    validate_password(&payload.new_password).map_err(AuthError::BadRequest)?;

    let identity_id = state
        .sessions
        .take_reset_token(&payload.token)
        .await
        .map_err(|e| {
            error!("Failed to read reset token: {}", e);
            AuthError::InternalServerError
        })?
        .ok_or_else(|| AuthError::BadRequest("Invalid or expired reset token".to_string()))?;

    if !state
        .identities
        .update_password(&identity_id, &payload.new_password)
        .await?
    {
        return Err(AuthError::BadRequest(
            "Invalid or expired reset token".to_string(),
        ));
    }
    state
        .sessions
        .delete_session(&identity_id)
        .await
        .map_err(|e| {
            error!("Failed to remove session from Redis: {}", e);
            AuthError::InternalServerError
        })?;

    Ok(Json(json!({"message": "Password updated"})))
}

/// Identity of the bearer token
pub async fn me(
    State(state): State<AppState>,
    Extension(AuthenticatedIdentity(id)): Extension<AuthenticatedIdentity>,
) -> Result<impl IntoResponse, AuthError> {
    let identity = state
        .identities
        .find_by_id(&id)
        .await?
        .ok_or(AuthError::Unauthorized)?;
    Ok(Json(IdentityView::from(&identity)))
}

/// Custom error type for authentication errors
#[derive(Error, Debug)]
pub enum AuthError {
    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Unauthorized")]
    Unauthorized,

    #[error("Email already registered")]
    Conflict,

    #[error("Too many attempts, try again later")]
    TooManyRequests,

    #[error("Internal server error")]
    InternalServerError,
}

impl From<IdentityError> for AuthError {
    fn from(err: IdentityError) -> Self {
        match err {
            IdentityError::EmailTaken => AuthError::Conflict,
            other => {
                error!("Identity store error: {}", other);
                AuthError::InternalServerError
            }
        }
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let status = match self {
            AuthError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AuthError::Unauthorized => StatusCode::UNAUTHORIZED,
            AuthError::Conflict => StatusCode::CONFLICT,
            AuthError::TooManyRequests => StatusCode::TOO_MANY_REQUESTS,
            AuthError::InternalServerError => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let error_message = match self {
            AuthError::BadRequest(msg) => msg,
            other => other.to_string(),
        };

        let body = Json(json!({
            "error": error_message,
        }));

        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auth_errors_map_to_status_codes() {
        let cases = [
            (AuthError::BadRequest("bad".into()), StatusCode::BAD_REQUEST),
            (AuthError::Unauthorized, StatusCode::UNAUTHORIZED),
            (AuthError::Conflict, StatusCode::CONFLICT),
            (AuthError::TooManyRequests, StatusCode::TOO_MANY_REQUESTS),
            (
                AuthError::InternalServerError,
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];
        for (err, status) in cases {
            assert_eq!(err.into_response().status(), status);
        }
    }

    #[test]
    fn taken_emails_become_conflicts() {
        assert!(matches!(
            AuthError::from(IdentityError::EmailTaken),
            AuthError::Conflict
        ));
        assert!(matches!(
            AuthError::from(IdentityError::Hash("boom".into())),
            AuthError::InternalServerError
        ));
    }

    #[test]
    fn reset_confirmation_uses_camel_case() {
        let payload: PasswordResetConfirm =
            serde_json::from_str(r#"{"token":"t","newPassword":"secret1"}"#).expect("valid");
        assert_eq!(payload.new_password, "secret1");
    }
}
