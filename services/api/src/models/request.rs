//! Account management requests and their state machine

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::plan::PlanId;

/// Status of an account management request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestStatus {
    Pending,
    Assigned,
    Active,
    Rejected,
    Cancelled,
    Completed,
}

impl RequestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestStatus::Pending => "pending",
            RequestStatus::Assigned => "assigned",
            RequestStatus::Active => "active",
            RequestStatus::Rejected => "rejected",
            RequestStatus::Cancelled => "cancelled",
            RequestStatus::Completed => "completed",
        }
    }

    /// No transition leaves a terminal status
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RequestStatus::Rejected | RequestStatus::Cancelled | RequestStatus::Completed
        )
    }

    /// Statuses that require an assigned expert
    pub fn requires_expert(&self) -> bool {
        matches!(self, RequestStatus::Assigned | RequestStatus::Active)
    }

    /// Transition table of the request lifecycle
    pub fn can_transition_to(&self, to: RequestStatus) -> bool {
        use RequestStatus::*;
        matches!(
            (self, to),
            (Pending, Assigned | Cancelled | Rejected)
                | (Assigned, Assigned | Active | Cancelled | Rejected)
                | (Active, Completed | Cancelled)
        )
    }
}

impl fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RequestStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(RequestStatus::Pending),
            "assigned" => Ok(RequestStatus::Assigned),
            "active" => Ok(RequestStatus::Active),
            "rejected" => Ok(RequestStatus::Rejected),
            "cancelled" => Ok(RequestStatus::Cancelled),
            "completed" => Ok(RequestStatus::Completed),
            other => Err(format!("Unknown status: {}", other)),
        }
    }
}

/// `account_management_requests/{id}` document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountRequest {
    pub id: String,
    pub user_id: String,
    pub user_email: String,
    pub plan_id: PlanId,
    pub plan_name: String,
    pub status: RequestStatus,
    #[serde(default)]
    pub payment_status: Option<String>,
    #[serde(default)]
    pub expert_id: Option<String>,
    #[serde(default)]
    pub expert_name: Option<String>,
    #[serde(default)]
    pub expert_email: Option<String>,
    #[serde(with = "chrono::serde::ts_microseconds")]
    pub created_at: DateTime<Utc>,
    #[serde(default, with = "chrono::serde::ts_microseconds_option")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl AccountRequest {
    /// Whether the request's chat can be read
    pub fn chat_readable(&self) -> bool {
        matches!(self.status, RequestStatus::Active | RequestStatus::Completed)
    }

    /// Whether new messages may be posted
    pub fn chat_writable(&self) -> bool {
        self.status == RequestStatus::Active
    }

    pub fn is_participant(&self, uid: &str) -> bool {
        self.user_id == uid || self.expert_id.as_deref() == Some(uid)
    }
}

#[cfg(test)]
mod tests {
    use super::RequestStatus::*;
    use super::*;

    const ALL: [RequestStatus; 6] = [Pending, Assigned, Active, Rejected, Cancelled, Completed];

    #[test]
    fn terminal_statuses_have_no_way_out() {
        for from in ALL.iter().filter(|s| s.is_terminal()) {
            for to in ALL {
                assert!(!from.can_transition_to(to), "{} -> {}", from, to);
            }
        }
    }

    #[test]
    fn transition_table() {
        assert!(Pending.can_transition_to(Assigned));
        assert!(Pending.can_transition_to(Rejected));
        assert!(!Pending.can_transition_to(Active));
        assert!(!Pending.can_transition_to(Completed));
        assert!(Assigned.can_transition_to(Assigned));
        assert!(Assigned.can_transition_to(Active));
        assert!(!Assigned.can_transition_to(Completed));
        assert!(Active.can_transition_to(Completed));
        assert!(!Active.can_transition_to(Assigned));
        assert!(!Active.can_transition_to(Rejected));
        assert!(!Completed.can_transition_to(Active));
    }

    #[test]
    fn no_transition_returns_to_pending() {
        for from in ALL {
            assert!(!from.can_transition_to(Pending));
        }
    }
}
