//! Chat messages of a request

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::profile::Role;

/// Role the sender had when posting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SenderRole {
    User,
    Expert,
    Admin,
}

impl SenderRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            SenderRole::User => "user",
            SenderRole::Expert => "expert",
            SenderRole::Admin => "admin",
        }
    }
}

impl From<Role> for SenderRole {
    fn from(role: Role) -> Self {
        match role {
            Role::User => SenderRole::User,
            Role::Expert => SenderRole::Expert,
            Role::Admin => SenderRole::Admin,
        }
    }
}

/// `account_management_requests/{requestId}/messages/{id}` document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: String,
    pub text: String,
    pub sender_id: String,
    pub sender_role: SenderRole,
    /// Assigned by the store when the message is written
    #[serde(with = "chrono::serde::ts_microseconds")]
    pub timestamp: DateTime<Utc>,
    pub request_id: String,
}
