//! In-memory document store
//!
//! Stores documents in insertion order per collection, guarded by a
//! `tokio::sync::RwLock`. Server timestamps come from a [`Clock`] and are
//! strictly increasing even when the clock steps backwards, so that ordering
//! by a server stamped field is a total order. Data is lost when the last
//! handle is dropped.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::{RwLock, broadcast};
use tracing::debug;

use crate::document::{
    CollectionPath, Document, Fields, has_server_timestamps, new_document_id,
    resolve_server_timestamps,
};
use crate::error::{StoreError, StoreResult};
use crate::query::Query;
use crate::store::{ChangeEvent, DocumentStore, Subscription, Write, spawn_watcher};

const CHANGE_FEED_CAPACITY: usize = 256;

/// Source of server timestamps, in microseconds since the Unix epoch
pub trait Clock: Send + Sync {
    fn now_micros(&self) -> i64;
}

/// Wall clock
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_micros(&self) -> i64 {
        Utc::now().timestamp_micros()
    }
}

#[derive(Debug, Default)]
struct State {
    collections: HashMap<CollectionPath, Vec<Document>>,
    last_stamp: i64,
}

impl State {
    fn stamp(&mut self, clock: &dyn Clock) -> i64 {
        let now = clock.now_micros();
        let stamp = if now > self.last_stamp {
            now
        } else {
            self.last_stamp + 1
        };
        self.last_stamp = stamp;
        stamp
    }

    fn find(&self, collection: &CollectionPath, id: &str) -> Option<&Document> {
        self.collections
            .get(collection)
            .and_then(|docs| docs.iter().find(|d| d.id == id))
    }

    /// Apply one write; the caller has already checked preconditions
    fn apply(&mut self, write: Write, stamp: Option<i64>) -> Option<Document> {
        match write {
            Write::Set {
                collection,
                id,
                mut data,
                merge,
            } => {
                if let Some(stamp) = stamp {
                    resolve_server_timestamps(&mut data, stamp);
                }
                let docs = self.collections.entry(collection.clone()).or_default();
                match docs.iter_mut().find(|d| d.id == id) {
                    Some(existing) => {
                        if merge {
                            existing.data.extend(data);
                        } else {
                            existing.data = data;
                        }
                        Some(existing.clone())
                    }
                    None => {
                        let doc = Document::new(collection, id, data);
                        docs.push(doc.clone());
                        Some(doc)
                    }
                }
            }
            Write::Update {
                collection,
                id,
                mut patch,
            } => {
                if let Some(stamp) = stamp {
                    resolve_server_timestamps(&mut patch, stamp);
                }
                let existing = self
                    .collections
                    .get_mut(&collection)?
                    .iter_mut()
                    .find(|d| d.id == id)?;
                existing.data.extend(patch);
                Some(existing.clone())
            }
            Write::Delete { collection, id } => {
                let docs = self.collections.get_mut(&collection)?;
                let position = docs.iter().position(|d| d.id == id)?;
                Some(docs.remove(position))
            }
        }
    }
}

struct Inner {
    state: RwLock<State>,
    changes: broadcast::Sender<ChangeEvent>,
    clock: Arc<dyn Clock>,
    outage: AtomicBool,
}

impl Inner {
    fn check_available(&self) -> StoreResult<()> {
        if self.outage.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("in-memory store is offline".to_string()));
        }
        Ok(())
    }

    async fn run_query(&self, query: &Query) -> StoreResult<Vec<Document>> {
        self.check_available()?;
        let state = self.state.read().await;
        let docs = state
            .collections
            .get(&query.collection)
            .cloned()
            .unwrap_or_default();
        Ok(query.apply(docs))
    }

    fn notify(&self, collections: impl IntoIterator<Item = CollectionPath>) {
        for collection in collections {
            // No receivers simply means nobody is watching
            let _ = self.changes.send(ChangeEvent::Changed(collection));
        }
    }

    async fn write(&self, writes: Vec<Write>) -> StoreResult<Vec<Option<Document>>> {
        self.check_available()?;
        let mut state = self.state.write().await;

        for write in &writes {
            if let Write::Update { collection, id, .. } = write {
                if state.find(collection, id).is_none() {
                    return Err(StoreError::not_found(collection.doc_path(id)));
                }
            }
        }

        let needs_stamp = writes.iter().any(|w| match w {
            Write::Set { data, .. } => has_server_timestamps(data),
            Write::Update { patch, .. } => has_server_timestamps(patch),
            Write::Delete { .. } => false,
        });
        let stamp = needs_stamp.then(|| state.stamp(self.clock.as_ref()));

        let mut touched: Vec<CollectionPath> = Vec::new();
        let mut results = Vec::with_capacity(writes.len());
        for write in writes {
            let collection = write.collection().clone();
            let result = state.apply(write, stamp);
            if result.is_some() && !touched.contains(&collection) {
                touched.push(collection);
            }
            results.push(result);
        }
        drop(state);

        self.notify(touched);
        Ok(results)
    }
}

/// In-memory [`DocumentStore`]
#[derive(Clone)]
pub struct MemoryStore {
    inner: Arc<Inner>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    /// Create an empty store stamped by the wall clock
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Create an empty store stamped by `clock`
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        let (changes, _) = broadcast::channel(CHANGE_FEED_CAPACITY);
        Self {
            inner: Arc::new(Inner {
                state: RwLock::new(State::default()),
                changes,
                clock,
                outage: AtomicBool::new(false),
            }),
        }
    }

    /// Number of documents in a collection
    pub async fn document_count(&self, collection: &CollectionPath) -> usize {
        self.inner
            .state
            .read()
            .await
            .collections
            .get(collection)
            .map(Vec::len)
            .unwrap_or(0)
    }

    /// Simulate the store going offline; every operation fails while set
    pub fn set_offline(&self, offline: bool) {
        debug!("In-memory store offline: {}", offline);
        self.inner.outage.store(offline, Ordering::SeqCst);
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn create(&self, collection: &CollectionPath, data: Fields) -> StoreResult<Document> {
        let id = new_document_id();
        self.set(collection, &id, data, false).await
    }

    async fn set(
        &self,
        collection: &CollectionPath,
        id: &str,
        data: Fields,
        merge: bool,
    ) -> StoreResult<Document> {
        let write = Write::Set {
            collection: collection.clone(),
            id: id.to_string(),
            data,
            merge,
        };
        self.inner
            .write(vec![write])
            .await?
            .pop()
            .flatten()
            .ok_or_else(|| StoreError::not_found(collection.doc_path(id)))
    }

    async fn update(
        &self,
        collection: &CollectionPath,
        id: &str,
        patch: Fields,
    ) -> StoreResult<Document> {
        let write = Write::Update {
            collection: collection.clone(),
            id: id.to_string(),
            patch,
        };
        self.inner
            .write(vec![write])
            .await?
            .pop()
            .flatten()
            .ok_or_else(|| StoreError::not_found(collection.doc_path(id)))
    }

    async fn delete(&self, collection: &CollectionPath, id: &str) -> StoreResult<bool> {
        let write = Write::Delete {
            collection: collection.clone(),
            id: id.to_string(),
        };
        Ok(self.inner.write(vec![write]).await?.pop().flatten().is_some())
    }

    async fn get(&self, collection: &CollectionPath, id: &str) -> StoreResult<Option<Document>> {
        self.inner.check_available()?;
        Ok(self.inner.state.read().await.find(collection, id).cloned())
    }

    async fn query(&self, query: &Query) -> StoreResult<Vec<Document>> {
        self.inner.run_query(query).await
    }

    async fn subscribe(&self, query: Query) -> StoreResult<Subscription> {
        self.inner.check_available()?;
        let changes = self.inner.changes.subscribe();
        let inner = Arc::clone(&self.inner);
        Ok(spawn_watcher(query, changes, move |q| {
            let inner = Arc::clone(&inner);
            async move { inner.run_query(&q).await }
        }))
    }

    async fn commit(&self, writes: Vec<Write>) -> StoreResult<()> {
        self.inner.write(writes).await.map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::server_timestamp;
    use crate::query::Direction;
    use serde_json::json;
    use std::sync::atomic::AtomicI64;
    use std::time::Duration;
    use tokio::time::timeout;

    struct ManualClock(AtomicI64);

    impl Clock for ManualClock {
        fn now_micros(&self) -> i64 {
            self.0.load(Ordering::SeqCst)
        }
    }

    fn fields(pairs: &[(&str, serde_json::Value)]) -> Fields {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    fn notes() -> CollectionPath {
        CollectionPath::new("notes")
    }

    #[tokio::test]
    async fn crud_round_trip() -> StoreResult<()> {
        let store = MemoryStore::new();
        let created = store.create(&notes(), fields(&[("body", json!("a"))])).await?;

        let fetched = store.get(&notes(), &created.id).await?.expect("stored");
        assert_eq!(fetched.get_str("body"), Some("a"));

        let updated = store
            .update(&notes(), &created.id, fields(&[("title", json!("t"))]))
            .await?;
        assert_eq!(updated.get_str("body"), Some("a"));
        assert_eq!(updated.get_str("title"), Some("t"));

        assert!(store.delete(&notes(), &created.id).await?);
        assert!(!store.delete(&notes(), &created.id).await?);
        assert!(store.get(&notes(), &created.id).await?.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn update_of_missing_document_fails() {
        let store = MemoryStore::new();
        let err = store
            .update(&notes(), "ghost", fields(&[("x", json!(1))]))
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn set_with_merge_keeps_other_fields() -> StoreResult<()> {
        let store = MemoryStore::new();
        store
            .set(&notes(), "n", fields(&[("a", json!(1)), ("b", json!(2))]), false)
            .await?;
        let merged = store.set(&notes(), "n", fields(&[("b", json!(3))]), true).await?;
        assert_eq!(merged.data["a"], json!(1));
        assert_eq!(merged.data["b"], json!(3));

        let replaced = store.set(&notes(), "n", fields(&[("c", json!(4))]), false).await?;
        assert!(replaced.get("a").is_none());
        Ok(())
    }

    #[tokio::test]
    async fn failed_batch_applies_nothing() -> StoreResult<()> {
        let store = MemoryStore::new();
        let batch = vec![
            Write::Set {
                collection: notes(),
                id: "kept".into(),
                data: Fields::new(),
                merge: false,
            },
            Write::Update {
                collection: notes(),
                id: "missing".into(),
                patch: Fields::new(),
            },
        ];
        assert!(store.commit(batch).await.unwrap_err().is_not_found());
        assert_eq!(store.document_count(&notes()).await, 0);
        Ok(())
    }

    #[tokio::test]
    async fn server_stamps_stay_monotonic_when_clock_goes_back() -> StoreResult<()> {
        let clock = Arc::new(ManualClock(AtomicI64::new(1_000)));
        let store = MemoryStore::with_clock(clock.clone());

        let first = store
            .create(&notes(), fields(&[("at", server_timestamp())]))
            .await?;
        clock.0.store(10, Ordering::SeqCst);
        let second = store
            .create(&notes(), fields(&[("at", server_timestamp())]))
            .await?;

        let a = first.data["at"].as_i64().unwrap();
        let b = second.data["at"].as_i64().unwrap();
        assert_eq!(a, 1_000);
        assert!(b > a);
        Ok(())
    }

    #[tokio::test]
    async fn subscription_pushes_changes_and_stops_on_drop() -> StoreResult<()> {
        let store = MemoryStore::new();
        let query = Query::new(notes()).order_by("at", Direction::Asc);
        let mut sub = store.subscribe(query).await?;

        let initial = sub.next().await.expect("initial snapshot")?;
        assert!(initial.is_empty());

        store
            .create(&notes(), fields(&[("at", server_timestamp())]))
            .await?;
        let next = timeout(Duration::from_secs(1), sub.next())
            .await
            .expect("push within a second")
            .expect("open")?;
        assert_eq!(next.len(), 1);

        // Writes to other collections do not produce a snapshot
        store
            .create(&CollectionPath::new("other"), Fields::new())
            .await?;
        assert!(
            timeout(Duration::from_millis(50), sub.next()).await.is_err(),
            "unrelated write must not be delivered"
        );

        sub.cancel();
        Ok(())
    }

    #[tokio::test]
    async fn offline_store_reports_unavailable() {
        let store = MemoryStore::new();
        store.set_offline(true);
        let err = store.get(&notes(), "x").await.unwrap_err();
        assert!(matches!(err, StoreError::Unavailable(_)));
    }
}
