//! Custom error types for the API service

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use common::StoreError;
use serde_json::json;
use thiserror::Error;
use tracing::error;

use crate::admin::AdminError;
use crate::content::ContentError;
use crate::desk::DeskError;
use crate::lifecycle::LifecycleError;
use crate::messaging::ChannelError;
use crate::roles::RoleError;

/// Custom error type for the API service
#[derive(Error, Debug)]
pub enum ApiError {
    /// Missing or invalid credentials
    #[error("Unauthorized")]
    Unauthorized,

    /// Authenticated but not allowed
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// Bad request with message
    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Not found: {0}")]
    NotFound(String),

    /// The request conflicts with the current state
    #[error("Conflict: {0}")]
    Conflict(String),

    /// A backing service is unreachable
    #[error("Service unavailable: {0}")]
    Unavailable(String),

    /// Internal server error
    #[error("Internal server error")]
    InternalServerError,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_message) = match self {
            ApiError::Unauthorized => (StatusCode::UNAUTHORIZED, "Unauthorized".to_string()),
            ApiError::Forbidden(msg) => (StatusCode::FORBIDDEN, msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, msg),
            ApiError::Unavailable(msg) => (StatusCode::SERVICE_UNAVAILABLE, msg),
            ApiError::InternalServerError => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Internal server error".to_string(),
            ),
        };

        let body = Json(json!({
            "error": error_message,
        }));

        (status, body).into_response()
    }
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::PermissionDenied { .. } => ApiError::Forbidden(e.to_string()),
            StoreError::NotFound { path } => ApiError::NotFound(path),
            StoreError::Unavailable(reason) => ApiError::Unavailable(reason),
            other => {
                error!("Store error: {}", other);
                ApiError::InternalServerError
            }
        }
    }
}

impl From<LifecycleError> for ApiError {
    fn from(e: LifecycleError) -> Self {
        match e {
            LifecycleError::Forbidden(_) => ApiError::Forbidden(e.to_string()),
            LifecycleError::NotFound(_) | LifecycleError::UnknownUser(_) => {
                ApiError::NotFound(e.to_string())
            }
            LifecycleError::InvalidTransition { .. } => ApiError::Conflict(e.to_string()),
            LifecycleError::NotAnExpert(_) | LifecycleError::Validation(_) => {
                ApiError::BadRequest(e.to_string())
            }
            LifecycleError::Store(e) => e.into(),
        }
    }
}

impl From<ChannelError> for ApiError {
    fn from(e: ChannelError) -> Self {
        match e {
            ChannelError::EmptyMessage | ChannelError::NoActiveChat => {
                ApiError::BadRequest(e.to_string())
            }
            ChannelError::ChatClosed(_) => ApiError::Conflict(e.to_string()),
            ChannelError::NotFound(_) => ApiError::NotFound(e.to_string()),
            ChannelError::NotSender => ApiError::Forbidden(e.to_string()),
            ChannelError::Store(e) => e.into(),
        }
    }
}

impl From<RoleError> for ApiError {
    fn from(e: RoleError) -> Self {
        match e {
            RoleError::Forbidden => ApiError::Forbidden(e.to_string()),
            RoleError::NotFound(_) => ApiError::NotFound(e.to_string()),
            RoleError::SelfDeletion | RoleError::HasOpenAssignments { .. } => {
                ApiError::Conflict(e.to_string())
            }
            RoleError::Store(e) => e.into(),
        }
    }
}

impl From<ContentError> for ApiError {
    fn from(e: ContentError) -> Self {
        match e {
            ContentError::Forbidden => ApiError::Forbidden(e.to_string()),
            ContentError::Validation(msg) => ApiError::BadRequest(msg),
            ContentError::NotFound(_) => ApiError::NotFound(e.to_string()),
            ContentError::Store(e) => e.into(),
        }
    }
}

impl From<AdminError> for ApiError {
    fn from(e: AdminError) -> Self {
        match e {
            AdminError::Forbidden => ApiError::Forbidden(e.to_string()),
            AdminError::Lifecycle(e) => e.into(),
            AdminError::Role(e) => e.into(),
            AdminError::Content(e) => e.into(),
            AdminError::Store(e) => e.into(),
        }
    }
}

impl From<DeskError> for ApiError {
    fn from(e: DeskError) -> Self {
        match e {
            DeskError::Lifecycle(e) => e.into(),
            DeskError::Channel(e) => e.into(),
            DeskError::Admin(e) => e.into(),
            DeskError::UnknownAssignment(_) => ApiError::NotFound(e.to_string()),
        }
    }
}

/// Type alias for API results
pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::RequestStatus;

    #[test]
    fn domain_errors_map_to_status_codes() {
        let cases: Vec<(ApiError, StatusCode)> = vec![
            (
                LifecycleError::InvalidTransition {
                    from: RequestStatus::Completed,
                    to: RequestStatus::Active,
                }
                .into(),
                StatusCode::CONFLICT,
            ),
            (LifecycleError::NotAnExpert("bob".into()).into(), StatusCode::BAD_REQUEST),
            (ChannelError::NotSender.into(), StatusCode::FORBIDDEN),
            (ChannelError::EmptyMessage.into(), StatusCode::BAD_REQUEST),
            (RoleError::SelfDeletion.into(), StatusCode::CONFLICT),
            (
                RoleError::HasOpenAssignments {
                    uid: "eve".into(),
                    count: 1,
                }
                .into(),
                StatusCode::CONFLICT,
            ),
            (
                StoreError::PermissionDenied {
                    path: "experts/eve".into(),
                }
                .into(),
                StatusCode::FORBIDDEN,
            ),
            (
                StoreError::Unavailable("offline".into()).into(),
                StatusCode::SERVICE_UNAVAILABLE,
            ),
            (
                AdminError::Lifecycle(LifecycleError::NotFound("r1".into())).into(),
                StatusCode::NOT_FOUND,
            ),
        ];

        for (error, status) in cases {
            assert_eq!(error.into_response().status(), status);
        }
    }
}
