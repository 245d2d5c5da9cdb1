//! Request and response bodies of the HTTP surface

use serde::{Deserialize, Serialize};

use super::plan::PlanId;
use super::profile::Role;
use super::request::RequestStatus;

/// Plan request of a user
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitPlanRequest {
    pub plan_id: PlanId,
}

#[derive(Debug, Deserialize)]
pub struct PostMessageRequest {
    pub text: String,
}

/// Request created by an admin on behalf of a user
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManualRequest {
    pub user_id: String,
    pub plan_id: PlanId,
    pub expert_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssignExpertRequest {
    pub expert_id: String,
}

#[derive(Debug, Deserialize)]
pub struct StatusChangeRequest {
    pub status: RequestStatus,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentStatusRequest {
    pub payment_status: String,
}

#[derive(Debug, Deserialize)]
pub struct RoleChangeRequest {
    pub role: Role,
}

#[derive(Debug, Deserialize)]
pub struct SessionActiveRequest {
    pub active: bool,
}

#[derive(Debug, Deserialize)]
pub struct NewSignalRequest {
    pub text: String,
}

/// Query of the desk stream
#[derive(Debug, Default, Deserialize)]
pub struct DeskStreamQuery {
    /// Assignment an expert opens right away
    pub select: Option<String>,
}

/// Signed-in caller as resolved by the service
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MeResponse {
    pub id: String,
    pub email: String,
    pub display_name: Option<String>,
    pub role: Role,
}

/// Broadcast content, absent while the feature is switched off
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FeatureContent<T> {
    pub available: bool,
    pub items: Vec<T>,
}

impl<T> From<Option<Vec<T>>> for FeatureContent<T> {
    fn from(items: Option<Vec<T>>) -> Self {
        match items {
            Some(items) => Self {
                available: true,
                items,
            },
            None => Self {
                available: false,
                items: Vec::new(),
            },
        }
    }
}
