//! Data access for the authentication service

pub mod identity;

pub use identity::{IdentityError, IdentityRepository};
