//! Document store abstraction
//!
//! Every backend implements [`DocumentStore`]. Live queries are served by
//! [`Subscription`] handles: each handle owns one watcher task that re-runs
//! its query whenever the queried collection changes and pushes the new
//! result set. Dropping or cancelling the handle stops the watcher.

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::document::{CollectionPath, Document, Fields};
use crate::error::{StoreError, StoreResult};
use crate::query::Query;

/// Result set delivered by a subscription
pub type Snapshot = Vec<Document>;

/// Shared handle to any store implementation
pub type SharedStore = Arc<dyn DocumentStore>;

const SUBSCRIPTION_BUFFER: usize = 16;

/// A single write of an atomic batch
#[derive(Debug, Clone, PartialEq)]
pub enum Write {
    /// Create or replace a document; with `merge` the fields are merged
    Set {
        collection: CollectionPath,
        id: String,
        data: Fields,
        merge: bool,
    },
    /// Merge fields into an existing document, failing if it is missing
    Update {
        collection: CollectionPath,
        id: String,
        patch: Fields,
    },
    /// Delete a document; deleting a missing document is a no-op
    Delete { collection: CollectionPath, id: String },
}

impl Write {
    pub fn collection(&self) -> &CollectionPath {
        match self {
            Write::Set { collection, .. }
            | Write::Update { collection, .. }
            | Write::Delete { collection, .. } => collection,
        }
    }

    pub fn id(&self) -> &str {
        match self {
            Write::Set { id, .. } | Write::Update { id, .. } | Write::Delete { id, .. } => id,
        }
    }

    pub fn path(&self) -> String {
        self.collection().doc_path(self.id())
    }
}

/// Change notification published by a store after a write
#[derive(Debug, Clone, PartialEq)]
pub enum ChangeEvent {
    /// A document of this collection was written
    Changed(CollectionPath),
    /// The change feed stopped; live queries can no longer be served
    FeedLost(String),
}

/// Document store operations
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Insert a document under a generated id
    async fn create(&self, collection: &CollectionPath, data: Fields) -> StoreResult<Document>;

    /// Create or replace a document under a known id
    async fn set(
        &self,
        collection: &CollectionPath,
        id: &str,
        data: Fields,
        merge: bool,
    ) -> StoreResult<Document>;

    /// Merge fields into an existing document
    async fn update(
        &self,
        collection: &CollectionPath,
        id: &str,
        patch: Fields,
    ) -> StoreResult<Document>;

    /// Delete a document, returning whether it existed
    async fn delete(&self, collection: &CollectionPath, id: &str) -> StoreResult<bool>;

    /// Fetch a single document
    async fn get(&self, collection: &CollectionPath, id: &str) -> StoreResult<Option<Document>>;

    /// Run a one-shot query
    async fn query(&self, query: &Query) -> StoreResult<Vec<Document>>;

    /// Start a live query
    async fn subscribe(&self, query: Query) -> StoreResult<Subscription>;

    /// Apply a batch of writes atomically
    async fn commit(&self, writes: Vec<Write>) -> StoreResult<()>;
}

/// Handle to a live query
///
/// The first item is the current result set; later items are pushed when the
/// result set changes. Errors are delivered as items and never panic the
/// watcher. The watcher is aborted when the handle is dropped.
#[derive(Debug)]
pub struct Subscription {
    query: Query,
    rx: mpsc::Receiver<StoreResult<Snapshot>>,
    task: JoinHandle<()>,
}

impl Subscription {
    /// Wait for the next result set; `None` once the watcher has stopped
    pub async fn next(&mut self) -> Option<StoreResult<Snapshot>> {
        self.rx.recv().await
    }

    /// Take an already delivered result set without waiting
    pub fn try_next(&mut self) -> Option<StoreResult<Snapshot>> {
        self.rx.try_recv().ok()
    }

    pub fn query(&self) -> &Query {
        &self.query
    }

    /// Whether the watcher is still running
    pub fn is_active(&self) -> bool {
        !self.task.is_finished()
    }

    /// Release the subscription
    pub fn cancel(self) {
        debug!("Cancelling subscription on {}", self.query.collection);
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Spawn the watcher task behind a subscription
///
/// `changes` must be obtained before the initial fetch so that writes racing
/// the subscription are not lost.
pub(crate) fn spawn_watcher<F, Fut>(
    query: Query,
    mut changes: broadcast::Receiver<ChangeEvent>,
    fetch: F,
) -> Subscription
where
    F: Fn(Query) -> Fut + Send + 'static,
    Fut: Future<Output = StoreResult<Snapshot>> + Send + 'static,
{
    let (tx, rx) = mpsc::channel(SUBSCRIPTION_BUFFER);
    let watched = query.clone();

    let task = tokio::spawn(async move {
        let mut last: Option<Snapshot> = None;
        if !deliver(&tx, fetch(watched.clone()).await, &mut last).await {
            return;
        }

        loop {
            match changes.recv().await {
                Ok(ChangeEvent::Changed(path)) if path == watched.collection => {}
                Ok(ChangeEvent::Changed(_)) => continue,
                Ok(ChangeEvent::FeedLost(reason)) => {
                    warn!("Change feed lost for {}: {}", watched.collection, reason);
                    let _ = tx.send(Err(StoreError::Unavailable(reason))).await;
                    break;
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    debug!("Watcher on {} lagged by {} events", watched.collection, skipped);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }

            if !deliver(&tx, fetch(watched.clone()).await, &mut last).await {
                break;
            }
        }
    });

    Subscription { query, rx, task }
}

/// Relay another subscription through a per snapshot check
///
/// Results passing `check` are forwarded as is. The relay stops after the
/// first permission error, dropping the inner subscription with it.
pub(crate) fn spawn_relay<F, Fut>(mut inner: Subscription, check: F) -> Subscription
where
    F: Fn(Snapshot) -> Fut + Send + 'static,
    Fut: Future<Output = StoreResult<Snapshot>> + Send + 'static,
{
    let (tx, rx) = mpsc::channel(SUBSCRIPTION_BUFFER);
    let query = inner.query.clone();

    let task = tokio::spawn(async move {
        while let Some(result) = inner.next().await {
            let result = match result {
                Ok(docs) => check(docs).await,
                Err(e) => Err(e),
            };
            let revoked = matches!(&result, Err(e) if e.is_permission_denied());
            if revoked {
                debug!("Access to {} revoked, closing subscription", inner.query.collection);
            }
            if tx.send(result).await.is_err() || revoked {
                break;
            }
        }
    });

    Subscription { query, rx, task }
}

/// Push a result to the subscriber, skipping unchanged result sets
///
/// Returns false once the subscriber is gone.
async fn deliver(
    tx: &mpsc::Sender<StoreResult<Snapshot>>,
    result: StoreResult<Snapshot>,
    last: &mut Option<Snapshot>,
) -> bool {
    match result {
        Ok(docs) => {
            if last.as_ref() == Some(&docs) {
                return true;
            }
            *last = Some(docs.clone());
            tx.send(Ok(docs)).await.is_ok()
        }
        Err(e) => {
            warn!("Live query failed: {}", e);
            tx.send(Err(e)).await.is_ok()
        }
    }
}
