//! Common library for SignalDesk
//!
//! This crate provides the document store used by every service: the store
//! trait and its in-memory and PostgreSQL implementations, the query model,
//! live subscriptions, store-side access rules, plus database and Redis
//! connectivity and the shared error type.

pub mod access;
pub mod cache;
pub mod database;
pub mod document;
pub mod error;
pub mod memory;
pub mod postgres;
pub mod query;
pub mod store;

pub use access::{AccessRequest, AccessRules, AllowAll, GuardedStore, Operation, Principal, RuleContext};
pub use document::{CollectionPath, Document, Fields, is_server_timestamp, server_timestamp};
pub use error::{StoreError, StoreResult};
pub use memory::MemoryStore;
pub use query::{Direction, Query};
pub use store::{DocumentStore, SharedStore, Snapshot, Subscription, Write};

/// Example usage of the document store
///
/// ```rust,no_run
/// use common::database::{DatabaseConfig, init_pool};
/// use common::postgres::PgDocumentStore;
/// use common::{CollectionPath, DocumentStore, Fields};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let config = DatabaseConfig::from_env()?;
///     let pool = init_pool(&config).await?;
///     let store = PgDocumentStore::connect(pool).await?;
///     let doc = store.create(&CollectionPath::new("notes"), Fields::new()).await?;
///     println!("Created {}", doc.path());
///     Ok(())
/// }
/// ```
pub fn example_usage() {}
