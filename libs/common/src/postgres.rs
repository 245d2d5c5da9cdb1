//! PostgreSQL document store
//!
//! Documents live in a single `documents` table as JSONB. Every committed
//! write publishes the touched collection on the `document_changes`
//! notification channel; one `PgListener` per store fans the notifications
//! out to the live queries of this process.

use async_trait::async_trait;
use serde_json::Value;
use sqlx::postgres::PgListener;
use sqlx::{PgPool, Postgres, QueryBuilder, Transaction};
use tokio::sync::broadcast;
use tracing::{error, info};

use crate::database::run_migrations;
use crate::document::{
    CollectionPath, Document, Fields, has_server_timestamps, new_document_id,
    resolve_server_timestamps,
};
use crate::error::{StoreError, StoreResult};
use crate::query::{Direction, Query};
use crate::store::{ChangeEvent, DocumentStore, Subscription, Write, spawn_watcher};

/// Notification channel carrying the path of each written collection
pub const CHANGE_CHANNEL: &str = "document_changes";

const CHANGE_FEED_CAPACITY: usize = 256;

/// Schema of the document table
pub const DOCUMENT_SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS documents (
        collection TEXT NOT NULL,
        id TEXT NOT NULL,
        data JSONB NOT NULL,
        seq BIGSERIAL,
        PRIMARY KEY (collection, id)
    )
    "#,
    "CREATE INDEX IF NOT EXISTS documents_collection_seq ON documents (collection, seq)",
];

/// PostgreSQL backed [`DocumentStore`]
#[derive(Clone)]
pub struct PgDocumentStore {
    pool: PgPool,
    changes: broadcast::Sender<ChangeEvent>,
}

impl PgDocumentStore {
    /// Bootstrap the schema and start listening for change notifications
    pub async fn connect(pool: PgPool) -> StoreResult<Self> {
        run_migrations(&pool, DOCUMENT_SCHEMA).await?;

        let mut listener = PgListener::connect_with(&pool)
            .await
            .map_err(StoreError::Connection)?;
        listener
            .listen(CHANGE_CHANNEL)
            .await
            .map_err(StoreError::Connection)?;

        let (changes, _) = broadcast::channel(CHANGE_FEED_CAPACITY);
        let feed = changes.clone();
        tokio::spawn(async move {
            loop {
                match listener.recv().await {
                    Ok(notification) => {
                        let path = CollectionPath::new(notification.payload());
                        let _ = feed.send(ChangeEvent::Changed(path));
                    }
                    Err(e) => {
                        error!("Document change feed stopped: {}", e);
                        let _ = feed.send(ChangeEvent::FeedLost(e.to_string()));
                        break;
                    }
                }
            }
        });

        info!("PostgreSQL document store listening on {}", CHANGE_CHANNEL);
        Ok(Self { pool, changes })
    }

    async fn write(&self, writes: Vec<Write>) -> StoreResult<Vec<Option<Document>>> {
        let mut tx = self.pool.begin().await.map_err(StoreError::Connection)?;

        let needs_stamp = writes.iter().any(|w| match w {
            Write::Set { data, .. } => has_server_timestamps(data),
            Write::Update { patch, .. } => has_server_timestamps(patch),
            Write::Delete { .. } => false,
        });
        let stamp = if needs_stamp {
            Some(server_stamp(&mut tx).await?)
        } else {
            None
        };

        let mut touched: Vec<CollectionPath> = Vec::new();
        let mut results = Vec::with_capacity(writes.len());
        for write in writes {
            let collection = write.collection().clone();
            let result = apply(&mut tx, write, stamp).await?;
            if result.is_some() && !touched.contains(&collection) {
                touched.push(collection);
            }
            results.push(result);
        }

        for collection in &touched {
            sqlx::query("SELECT pg_notify($1, $2)")
                .bind(CHANGE_CHANNEL)
                .bind(collection.as_str())
                .execute(&mut *tx)
                .await
                .map_err(StoreError::Query)?;
        }

        tx.commit().await.map_err(StoreError::Query)?;
        Ok(results)
    }

    async fn run_query(pool: &PgPool, query: &Query) -> StoreResult<Vec<Document>> {
        let mut builder = QueryBuilder::<Postgres>::new("SELECT id, data FROM documents WHERE collection = ");
        builder.push_bind(query.collection.as_str().to_string());

        for filter in &query.filters {
            if filter.value.is_null() {
                builder.push(" AND COALESCE(jsonb_typeof(data -> ");
                builder.push_bind(filter.field.clone());
                builder.push("), 'null') = 'null'");
            } else {
                builder.push(" AND data -> ");
                builder.push_bind(filter.field.clone());
                builder.push(" = ");
                builder.push_bind(filter.value.clone());
            }
        }

        if let Some(order) = &query.order {
            builder.push(" AND COALESCE(jsonb_typeof(data -> ");
            builder.push_bind(order.field.clone());
            builder.push("), 'null') <> 'null' ORDER BY data -> ");
            builder.push_bind(order.field.clone());
            builder.push(match order.direction {
                Direction::Asc => " ASC, seq ASC",
                Direction::Desc => " DESC, seq ASC",
            });
        } else {
            builder.push(" ORDER BY seq ASC");
        }

        if let Some(limit) = query.limit {
            builder.push(" LIMIT ");
            builder.push_bind(limit as i64);
        }

        let rows: Vec<(String, Value)> = builder
            .build_query_as()
            .fetch_all(pool)
            .await
            .map_err(StoreError::Query)?;

        rows.into_iter()
            .map(|(id, data)| to_document(query.collection.clone(), id, data))
            .collect()
    }
}

/// Read the database clock in microseconds
async fn server_stamp(tx: &mut Transaction<'_, Postgres>) -> StoreResult<i64> {
    sqlx::query_scalar("SELECT (EXTRACT(EPOCH FROM clock_timestamp()) * 1000000)::BIGINT")
        .fetch_one(&mut **tx)
        .await
        .map_err(StoreError::Query)
}

async fn apply(
    tx: &mut Transaction<'_, Postgres>,
    write: Write,
    stamp: Option<i64>,
) -> StoreResult<Option<Document>> {
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
            let sql = if merge {
                "INSERT INTO documents (collection, id, data) VALUES ($1, $2, $3) \
                 ON CONFLICT (collection, id) DO UPDATE SET data = documents.data || EXCLUDED.data \
                 RETURNING data"
            } else {
                "INSERT INTO documents (collection, id, data) VALUES ($1, $2, $3) \
                 ON CONFLICT (collection, id) DO UPDATE SET data = EXCLUDED.data \
                 RETURNING data"
            };
            let stored: Value = sqlx::query_scalar(sql)
                .bind(collection.as_str())
                .bind(&id)
                .bind(Value::Object(data))
                .fetch_one(&mut **tx)
                .await
                .map_err(StoreError::Query)?;
            to_document(collection, id, stored).map(Some)
        }
        Write::Update {
            collection,
            id,
            mut patch,
        } => {
            if let Some(stamp) = stamp {
                resolve_server_timestamps(&mut patch, stamp);
            }
            let stored: Option<Value> = sqlx::query_scalar(
                "UPDATE documents SET data = data || $3 WHERE collection = $1 AND id = $2 RETURNING data",
            )
            .bind(collection.as_str())
            .bind(&id)
            .bind(Value::Object(patch))
            .fetch_optional(&mut **tx)
            .await
            .map_err(StoreError::Query)?;

            match stored {
                Some(data) => to_document(collection, id, data).map(Some),
                // Dropping the transaction rolls back the earlier writes
                None => Err(StoreError::not_found(collection.doc_path(&id))),
            }
        }
        Write::Delete { collection, id } => {
            let stored: Option<Value> = sqlx::query_scalar(
                "DELETE FROM documents WHERE collection = $1 AND id = $2 RETURNING data",
            )
            .bind(collection.as_str())
            .bind(&id)
            .fetch_optional(&mut **tx)
            .await
            .map_err(StoreError::Query)?;

            stored.map(|data| to_document(collection, id, data)).transpose()
        }
    }
}

fn to_document(collection: CollectionPath, id: String, data: Value) -> StoreResult<Document> {
    match data {
        Value::Object(fields) => Ok(Document::new(collection, id, fields)),
        other => Err(StoreError::Malformed {
            path: collection.doc_path(&id),
            reason: format!("stored value is not an object: {}", other),
        }),
    }
}

#[async_trait]
impl DocumentStore for PgDocumentStore {
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
        self.write(vec![write])
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
        self.write(vec![write])
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
        Ok(self.write(vec![write]).await?.pop().flatten().is_some())
    }

    async fn get(&self, collection: &CollectionPath, id: &str) -> StoreResult<Option<Document>> {
        let stored: Option<Value> =
            sqlx::query_scalar("SELECT data FROM documents WHERE collection = $1 AND id = $2")
                .bind(collection.as_str())
                .bind(id)
                .fetch_optional(&self.pool)
                .await
                .map_err(StoreError::Query)?;

        stored
            .map(|data| to_document(collection.clone(), id.to_string(), data))
            .transpose()
    }

    async fn query(&self, query: &Query) -> StoreResult<Vec<Document>> {
        Self::run_query(&self.pool, query).await
    }

    async fn subscribe(&self, query: Query) -> StoreResult<Subscription> {
        let changes = self.changes.subscribe();
        let pool = self.pool.clone();
        Ok(spawn_watcher(query, changes, move |q| {
            let pool = pool.clone();
            async move { Self::run_query(&pool, &q).await }
        }))
    }

    async fn commit(&self, writes: Vec<Write>) -> StoreResult<()> {
        self.write(writes).await.map(|_| ())
    }
}
