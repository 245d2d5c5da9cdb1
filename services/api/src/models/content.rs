//! Broadcast content managed from the admin console

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::message::SenderRole;

/// `free_mentorship/{id}` document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MentorshipSession {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    pub zoom_link: String,
    #[serde(with = "chrono::serde::ts_microseconds")]
    pub date: DateTime<Utc>,
    #[serde(default)]
    pub is_active: bool,
    #[serde(default)]
    pub created_by: Option<String>,
    #[serde(default, with = "chrono::serde::ts_microseconds_option")]
    pub timestamp: Option<DateTime<Utc>>,
}

impl MentorshipSession {
    /// Public view: the link is only handed out once the session is active
    pub fn public_view(mut self) -> Self {
        if !self.is_active {
            self.zoom_link.clear();
        }
        self.created_by = None;
        self
    }
}

/// `free_signals/{id}` document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FreeSignal {
    pub id: String,
    pub text: String,
    pub sender_uid: String,
    pub sender_role: SenderRole,
    #[serde(with = "chrono::serde::ts_microseconds")]
    pub timestamp: DateTime<Utc>,
}

/// `config/{feature}` document
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeatureFlag {
    #[serde(default = "available")]
    pub is_available: bool,
}

fn available() -> bool {
    true
}

impl Default for FeatureFlag {
    fn default() -> Self {
        Self { is_available: true }
    }
}

/// `payments/{id}` document, only counted
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Payment {
    pub id: String,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub amount: Option<f64>,
    #[serde(default)]
    pub status: Option<String>,
}

/// Admin dashboard counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardStats {
    pub total_users: usize,
    pub total_payments: usize,
    pub successful_payments: usize,
}
