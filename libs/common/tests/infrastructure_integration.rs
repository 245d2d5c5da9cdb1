//! Integration tests for the infrastructure components
//!
//! These tests verify that the PostgreSQL document store and the Redis cache
//! are properly configured and accessible. They need running services and
//! are ignored by default: `cargo test -- --ignored`.

use std::time::Duration;

use common::{
    CollectionPath, Direction, DocumentStore, Fields, Query, server_timestamp,
    cache::{RedisConfig, RedisPool},
    database::{DatabaseConfig, health_check, init_pool},
    postgres::PgDocumentStore,
};
use serde_json::json;
use tokio::time::timeout;

#[tokio::test]
#[ignore = "requires PostgreSQL and Redis"]
async fn test_infrastructure_integration() -> Result<(), Box<dyn std::error::Error>> {
    let db_config = DatabaseConfig::from_env()?;
    let pool = init_pool(&db_config).await?;
    assert!(health_check(&pool).await?, "Database health check failed");

    let store = PgDocumentStore::connect(pool).await?;
    let collection = CollectionPath::new(format!("it_{}", uuid::Uuid::new_v4().simple()));

    let mut sub = store
        .subscribe(Query::new(collection.clone()).order_by("at", Direction::Asc))
        .await?;
    assert!(sub.next().await.expect("initial snapshot")?.is_empty());

    let mut first = Fields::new();
    first.insert("at".into(), server_timestamp());
    first.insert("text".into(), json!("one"));
    let created = store.create(&collection, first).await?;
    assert!(created.data["at"].is_i64(), "server timestamp resolved");

    let pushed = timeout(Duration::from_secs(5), sub.next())
        .await?
        .expect("subscription open")?;
    assert_eq!(pushed.len(), 1);
    assert_eq!(pushed[0].get_str("text"), Some("one"));

    assert!(store.delete(&collection, &created.id).await?);
    assert!(!store.delete(&collection, &created.id).await?);

    let redis_pool = RedisPool::new(&RedisConfig::from_env())?;
    assert!(redis_pool.health_check().await?, "Redis health check failed");
    redis_pool.set("integration_test_key", "value", Some(10)).await?;
    assert_eq!(
        redis_pool.take("integration_test_key").await?,
        Some("value".to_string())
    );

    Ok(())
}
