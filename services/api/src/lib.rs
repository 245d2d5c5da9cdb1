//! SignalDesk API service
//!
//! Account management requests, their chats, the role of each viewer and the
//! admin console, all kept in the shared document store.

pub mod admin;
pub mod auth_context;
pub mod collections;
pub mod config;
pub mod content;
pub mod desk;
pub mod error;
pub mod lifecycle;
pub mod messaging;
pub mod middleware;
pub mod models;
pub mod roles;
pub mod routes;
pub mod rules;
pub mod state;

pub use admin::AdminConsole;
pub use auth_context::AuthContext;
pub use desk::{Desk, DeskUpdate, DeskView, Workspace};
pub use lifecycle::LifecycleEngine;
pub use messaging::{ChannelBinding, MessagingChannel};
pub use roles::{Actor, RoleManager, RoleResolver, ViewerRole};
pub use rules::PlatformRules;
pub use state::AppState;
