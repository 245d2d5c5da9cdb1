//! Collection names of the platform

use common::CollectionPath;

pub const USERS: &str = "users";
pub const EXPERTS: &str = "experts";
pub const REQUESTS: &str = "account_management_requests";
pub const MESSAGES: &str = "messages";
pub const MENTORSHIP: &str = "free_mentorship";
pub const SIGNALS: &str = "free_signals";
pub const CONFIG: &str = "config";
pub const PAYMENTS: &str = "payments";

/// Feature flag documents in [`CONFIG`]
pub const MENTORSHIP_FLAG: &str = "free_mentorship";
pub const SIGNALS_FLAG: &str = "free_signals";

pub fn users() -> CollectionPath {
    CollectionPath::new(USERS)
}

pub fn experts() -> CollectionPath {
    CollectionPath::new(EXPERTS)
}

pub fn requests() -> CollectionPath {
    CollectionPath::new(REQUESTS)
}

/// Message log of one request
pub fn messages(request_id: &str) -> CollectionPath {
    requests().sub(request_id, MESSAGES)
}

pub fn mentorship() -> CollectionPath {
    CollectionPath::new(MENTORSHIP)
}

pub fn signals() -> CollectionPath {
    CollectionPath::new(SIGNALS)
}

pub fn config() -> CollectionPath {
    CollectionPath::new(CONFIG)
}

pub fn payments() -> CollectionPath {
    CollectionPath::new(PAYMENTS)
}
