//! Store-side access control
//!
//! [`GuardedStore`] wraps a store for one [`Principal`] and asks an
//! [`AccessRules`] implementation before every read and write. Refused
//! operations fail with [`StoreError::PermissionDenied`]; callers cannot tell
//! a refused read of a missing document from a refused read of an existing
//! one. Rules look up other documents through the unguarded inner store.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::document::{CollectionPath, Document, Fields, new_document_id};
use crate::error::{StoreError, StoreResult};
use crate::query::Query;
use crate::store::{DocumentStore, SharedStore, Subscription, Write, spawn_relay};

/// Authenticated caller on whose behalf the store is accessed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    pub uid: String,
}

impl Principal {
    pub fn new(uid: impl Into<String>) -> Self {
        Self { uid: uid.into() }
    }
}

/// Kind of access being checked
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Read,
    List,
    Create,
    Update,
    Delete,
}

/// One access decision to make
#[derive(Debug, Clone, Copy)]
pub struct AccessRequest<'a> {
    pub operation: Operation,
    pub collection: &'a CollectionPath,
    /// Document id; `None` for list queries
    pub id: Option<&'a str>,
    /// Current stored document, if any
    pub existing: Option<&'a Document>,
    /// Fields being written
    pub incoming: Option<&'a Fields>,
    /// Query being listed
    pub query: Option<&'a Query>,
}

impl<'a> AccessRequest<'a> {
    fn document(operation: Operation, collection: &'a CollectionPath, id: &'a str) -> Self {
        Self {
            operation,
            collection,
            id: Some(id),
            existing: None,
            incoming: None,
            query: None,
        }
    }

    /// Value of a string field of the incoming write, falling back to the stored document
    pub fn field_str(&self, field: &str) -> Option<&'a str> {
        self.incoming
            .and_then(|f| f.get(field))
            .and_then(|v| v.as_str())
            .or_else(|| self.existing.and_then(|d| d.get_str(field)))
    }

    /// Equality filter value of the listed query
    pub fn filter_str(&self, field: &str) -> Option<&'a str> {
        self.query?
            .filters
            .iter()
            .find(|f| f.field == field)
            .and_then(|f| f.value.as_str())
    }
}

/// Evaluation context handed to the rules
pub struct RuleContext<'a> {
    pub principal: &'a Principal,
    store: &'a dyn DocumentStore,
}

impl RuleContext<'_> {
    /// Look up another document; lookup failures read as absent
    pub async fn lookup(&self, collection: &CollectionPath, id: &str) -> Option<Document> {
        match self.store.get(collection, id).await {
            Ok(doc) => doc,
            Err(e) => {
                debug!("Rule lookup of {} failed: {}", collection.doc_path(id), e);
                None
            }
        }
    }
}

/// Access rule set
#[async_trait]
pub trait AccessRules: Send + Sync {
    async fn allows(&self, ctx: &RuleContext<'_>, request: &AccessRequest<'_>) -> bool;
}

/// Rule set that allows everything, for trusted backend code
#[derive(Debug, Default, Clone, Copy)]
pub struct AllowAll;

#[async_trait]
impl AccessRules for AllowAll {
    async fn allows(&self, _ctx: &RuleContext<'_>, _request: &AccessRequest<'_>) -> bool {
        true
    }
}

/// Store decorator enforcing [`AccessRules`] for one principal
#[derive(Clone)]
pub struct GuardedStore {
    inner: SharedStore,
    rules: Arc<dyn AccessRules>,
    principal: Principal,
}

impl GuardedStore {
    pub fn new(inner: SharedStore, rules: Arc<dyn AccessRules>, principal: Principal) -> Self {
        Self {
            inner,
            rules,
            principal,
        }
    }

    pub fn principal(&self) -> &Principal {
        &self.principal
    }

    async fn check(&self, request: &AccessRequest<'_>) -> StoreResult<()> {
        let ctx = RuleContext {
            principal: &self.principal,
            store: self.inner.as_ref(),
        };
        if self.rules.allows(&ctx, request).await {
            return Ok(());
        }

        let path = match request.id {
            Some(id) => request.collection.doc_path(id),
            None => request.collection.to_string(),
        };
        debug!(
            "Denied {:?} on {} for {}",
            request.operation, path, self.principal.uid
        );
        Err(StoreError::denied(path))
    }

    async fn check_write(&self, write: &Write) -> StoreResult<()> {
        let existing = self.inner.get(write.collection(), write.id()).await?;
        let (operation, incoming) = match write {
            Write::Set { data, .. } if existing.is_none() => (Operation::Create, Some(data)),
            Write::Set { data, .. } => (Operation::Update, Some(data)),
            Write::Update { patch, .. } => (Operation::Update, Some(patch)),
            Write::Delete { .. } => (Operation::Delete, None),
        };
        let request = AccessRequest {
            existing: existing.as_ref(),
            incoming,
            ..AccessRequest::document(operation, write.collection(), write.id())
        };
        self.check(&request).await
    }

    async fn check_list(&self, query: &Query) -> StoreResult<()> {
        let request = AccessRequest {
            operation: Operation::List,
            collection: &query.collection,
            id: None,
            existing: None,
            incoming: None,
            query: Some(query),
        };
        self.check(&request).await
    }

    async fn check_reads(&self, docs: &[Document]) -> StoreResult<()> {
        for doc in docs {
            let request = AccessRequest {
                existing: Some(doc),
                ..AccessRequest::document(Operation::Read, &doc.collection, &doc.id)
            };
            self.check(&request).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl DocumentStore for GuardedStore {
    async fn create(&self, collection: &CollectionPath, data: Fields) -> StoreResult<Document> {
        let id = new_document_id();
        let request = AccessRequest {
            incoming: Some(&data),
            ..AccessRequest::document(Operation::Create, collection, &id)
        };
        self.check(&request).await?;
        self.inner.set(collection, &id, data, false).await
    }

    async fn set(
        &self,
        collection: &CollectionPath,
        id: &str,
        data: Fields,
        merge: bool,
    ) -> StoreResult<Document> {
        let existing = self.inner.get(collection, id).await?;
        let operation = if existing.is_some() {
            Operation::Update
        } else {
            Operation::Create
        };
        let request = AccessRequest {
            existing: existing.as_ref(),
            incoming: Some(&data),
            ..AccessRequest::document(operation, collection, id)
        };
        self.check(&request).await?;
        self.inner.set(collection, id, data, merge).await
    }

    async fn update(
        &self,
        collection: &CollectionPath,
        id: &str,
        patch: Fields,
    ) -> StoreResult<Document> {
        let existing = self
            .inner
            .get(collection, id)
            .await?
            .ok_or_else(|| StoreError::not_found(collection.doc_path(id)))?;
        let request = AccessRequest {
            existing: Some(&existing),
            incoming: Some(&patch),
            ..AccessRequest::document(Operation::Update, collection, id)
        };
        self.check(&request).await?;
        self.inner.update(collection, id, patch).await
    }

    async fn delete(&self, collection: &CollectionPath, id: &str) -> StoreResult<bool> {
        let existing = self.inner.get(collection, id).await?;
        let request = AccessRequest {
            existing: existing.as_ref(),
            ..AccessRequest::document(Operation::Delete, collection, id)
        };
        self.check(&request).await?;
        self.inner.delete(collection, id).await
    }

    async fn get(&self, collection: &CollectionPath, id: &str) -> StoreResult<Option<Document>> {
        let existing = self.inner.get(collection, id).await?;
        let request = AccessRequest {
            existing: existing.as_ref(),
            ..AccessRequest::document(Operation::Read, collection, id)
        };
        self.check(&request).await?;
        Ok(existing)
    }

    async fn query(&self, query: &Query) -> StoreResult<Vec<Document>> {
        self.check_list(query).await?;
        let docs = self.inner.query(query).await?;
        self.check_reads(&docs).await?;
        Ok(docs)
    }

    /// Every pushed snapshot is checked again; a revoked grant ends the subscription
    async fn subscribe(&self, query: Query) -> StoreResult<Subscription> {
        self.check_list(&query).await?;
        let inner = self.inner.subscribe(query.clone()).await?;
        let guard = self.clone();
        Ok(spawn_relay(inner, move |docs| {
            let guard = guard.clone();
            let query = query.clone();
            async move {
                guard.check_list(&query).await?;
                guard.check_reads(&docs).await?;
                Ok(docs)
            }
        }))
    }

    async fn commit(&self, writes: Vec<Write>) -> StoreResult<()> {
        for write in &writes {
            self.check_write(write).await?;
        }
        self.inner.commit(writes).await
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde_json::json;
    use tokio::time::timeout;

    use super::*;
    use crate::memory::MemoryStore;

    /// Notes are readable and writable by their owner only
    struct OwnerOnly;

    #[async_trait]
    impl AccessRules for OwnerOnly {
        async fn allows(&self, ctx: &RuleContext<'_>, request: &AccessRequest<'_>) -> bool {
            match request.operation {
                Operation::List => request.filter_str("owner") == Some(ctx.principal.uid.as_str()),
                _ => request.field_str("owner") == Some(ctx.principal.uid.as_str()),
            }
        }
    }

    fn notes() -> CollectionPath {
        CollectionPath::new("notes")
    }

    fn owned_by(uid: &str) -> Fields {
        let mut fields = Fields::new();
        fields.insert("owner".into(), json!(uid));
        fields
    }

    fn guarded(inner: &MemoryStore, uid: &str) -> GuardedStore {
        GuardedStore::new(Arc::new(inner.clone()), Arc::new(OwnerOnly), Principal::new(uid))
    }

    #[tokio::test]
    async fn owner_can_write_and_read() -> StoreResult<()> {
        let inner = MemoryStore::new();
        let alice = guarded(&inner, "alice");
        let doc = alice.create(&notes(), owned_by("alice")).await?;
        assert!(alice.get(&notes(), &doc.id).await?.is_some());

        let listed = alice
            .query(&Query::new(notes()).where_eq("owner", "alice"))
            .await?;
        assert_eq!(listed.len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn strangers_are_denied() -> StoreResult<()> {
        let inner = MemoryStore::new();
        let doc = guarded(&inner, "alice").create(&notes(), owned_by("alice")).await?;
        let bob = guarded(&inner, "bob");

        assert!(bob.get(&notes(), &doc.id).await.unwrap_err().is_permission_denied());
        assert!(bob.delete(&notes(), &doc.id).await.unwrap_err().is_permission_denied());
        assert!(
            bob.create(&notes(), owned_by("alice"))
                .await
                .unwrap_err()
                .is_permission_denied()
        );
        assert!(
            bob.subscribe(Query::new(notes()).where_eq("owner", "alice"))
                .await
                .unwrap_err()
                .is_permission_denied()
        );
        assert_eq!(inner.document_count(&notes()).await, 1);
        Ok(())
    }

    #[tokio::test]
    async fn batch_is_refused_as_a_whole() -> StoreResult<()> {
        let inner = MemoryStore::new();
        let alice = guarded(&inner, "alice");
        let batch = vec![
            Write::Set {
                collection: notes(),
                id: "mine".into(),
                data: owned_by("alice"),
                merge: false,
            },
            Write::Set {
                collection: notes(),
                id: "theirs".into(),
                data: owned_by("bob"),
                merge: false,
            },
        ];
        assert!(alice.commit(batch).await.unwrap_err().is_permission_denied());
        assert_eq!(inner.document_count(&notes()).await, 0);
        Ok(())
    }

    /// Notes are readable while the reader holds a membership record
    struct MembersOnly;

    #[async_trait]
    impl AccessRules for MembersOnly {
        async fn allows(&self, ctx: &RuleContext<'_>, request: &AccessRequest<'_>) -> bool {
            let members = CollectionPath::new("members");
            match request.operation {
                Operation::Read | Operation::List => {
                    ctx.lookup(&members, &ctx.principal.uid).await.is_some()
                }
                _ => false,
            }
        }
    }

    #[tokio::test]
    async fn revoked_access_closes_open_subscriptions() -> StoreResult<()> {
        let inner = MemoryStore::new();
        let members = CollectionPath::new("members");
        inner.set(&members, "alice", Fields::new(), false).await?;
        inner.create(&notes(), owned_by("bob")).await?;

        let alice = GuardedStore::new(
            Arc::new(inner.clone()),
            Arc::new(MembersOnly),
            Principal::new("alice"),
        );
        let mut sub = alice.subscribe(Query::new(notes())).await?;
        let initial = sub.next().await.expect("initial snapshot")?;
        assert_eq!(initial.len(), 1);

        inner.delete(&members, "alice").await?;
        inner.create(&notes(), owned_by("bob")).await?;

        let wait = Duration::from_secs(1);
        let pushed = timeout(wait, sub.next()).await.expect("pushed").expect("open");
        assert!(pushed.unwrap_err().is_permission_denied());
        assert!(timeout(wait, sub.next()).await.expect("closed").is_none());
        Ok(())
    }
}
