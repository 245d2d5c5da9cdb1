use std::sync::Arc;

use anyhow::Result;
use tracing::info;
use tracing_subscriber::EnvFilter;

use api::{
    config::{ServerConfig, StoreBackend},
    middleware::TokenVerifier,
    routes,
    state::AppState,
};
use common::{
    MemoryStore, SharedStore,
    database::{DatabaseConfig, health_check, init_pool},
    postgres::PgDocumentStore,
};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("Starting API service");

    let config = ServerConfig::from_env()?;

    let store: SharedStore = match config.store_backend {
        StoreBackend::Postgres => {
            let db_config = DatabaseConfig::from_env()?;
            let pool = init_pool(&db_config).await?;

            // Check database connectivity
            if health_check(&pool).await? {
                info!("Database connection successful");
            } else {
                anyhow::bail!("Failed to connect to database");
            }
            Arc::new(PgDocumentStore::connect(pool).await?)
        }
        StoreBackend::Memory => {
            info!("Using the in-memory document store, data is lost on shutdown");
            Arc::new(MemoryStore::new())
        }
    };

    let verifier = TokenVerifier::from_env().map_err(anyhow::Error::msg)?;
    let app_state = AppState::new(store, verifier);

    info!("API service initialized successfully");

    // Start the web server
    let app = routes::create_router(app_state);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    info!("API service listening on {}", config.bind_addr);

    axum::serve(listener, app).await?;

    Ok(())
}
