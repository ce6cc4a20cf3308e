use std::sync::Arc;
use tokio::net::TcpListener;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use vote_ranker::config::Config;
use vote_ranker::database::{create_pool, run_migrations};
use vote_ranker::redis::RedisClient;
use vote_ranker::services::{
    engine::Engine,
    pg_store::PgStore,
    store::{InMemoryStore, Store},
};
use vote_ranker::{AppState, create_app};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load .env file
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "vote_ranker=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = Config::from_env()?;
    tracing::info!("Configuration loaded successfully");

    // Optional Redis client for vote update publishing
    let redis = match &config.redis_url {
        Some(url) => {
            let client = Arc::new(RedisClient::new(url).await?);
            tracing::info!("Redis client created");
            Some(client)
        }
        None => None,
    };

    // Pick the store
    let store: Arc<dyn Store> = match &config.database_url {
        Some(url) => {
            let db = create_pool(url).await?;
            tracing::info!("Database connection pool created");

            run_migrations(&db).await?;
            tracing::info!("Database migrations completed");

            Arc::new(PgStore::new(db, redis))
        }
        None => {
            tracing::warn!("DATABASE_URL not set, using in-memory store");
            Arc::new(InMemoryStore::new())
        }
    };

    // Create application state
    let engine = Engine::new(store, config.session_user_id, config.engine());
    let state = AppState {
        engine: Arc::new(engine),
        config: Arc::new(config.clone()),
    };

    // Create application
    let app = create_app(state);

    // Create listener
    let listener = TcpListener::bind(format!("{}:{}", config.host, config.port)).await?;
    tracing::info!("Server listening on {}:{}", config.host, config.port);

    // Start server
    axum::serve(listener, app).await?;

    Ok(())
}
