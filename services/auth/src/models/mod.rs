//! Authentication service models

pub mod identity;

// Re-export for convenience
pub use identity::{Credentials, Identity, IdentityView, NewIdentity};
