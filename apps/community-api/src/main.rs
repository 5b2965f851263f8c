use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;

use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use community_api::auth::identity::JwtIdentityGateway;
use community_api::auth::tokens::TokenKeys;
use community_api::chat::typing;
use community_api::config::{Config, StoreBackend};
use community_api::store::memory::MemoryStore;
use community_api::store::pg::PgStore;
use community_api::store::Stores;
use community_api::AppState;

#[tokio::main]
async fn main() {
    // Load .env file (silently skip if missing, env vars may be set externally)
    if dotenvy::dotenv().is_err() {
        let env_path = Path::new(env!("CARGO_MANIFEST_DIR")).join(".env");
        let _ = dotenvy::from_path(env_path);
    }

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env();
    let port = config.port;

    let stores = match (config.store_backend, config.database_url.as_deref()) {
        (StoreBackend::Postgres, Some(database_url)) => {
            match community_api::db::pool::connect(database_url) {
                Ok(pool) => Stores::from_backend(Arc::new(PgStore::new(pool))),
                Err(err) => {
                    tracing::error!(?err, "failed to create database pool");
                    std::process::exit(1);
                }
            }
        }
        (StoreBackend::Postgres, None) => {
            tracing::error!("DATABASE_URL is required for the postgres backend");
            std::process::exit(1);
        }
        (StoreBackend::Memory, _) => {
            tracing::warn!("using the in-memory store; data is lost on restart");
            Stores::from_backend(Arc::new(MemoryStore::new()))
        }
    };

    let identity = Arc::new(JwtIdentityGateway::new(
        TokenKeys::from_secret(config.jwt_secret.as_bytes()),
        stores.users.clone(),
    ));

    tracing::info!(
        backend = ?config.store_backend,
        heartbeat_interval_ms = config.heartbeat_interval_ms,
        "community-api configured"
    );

    let typing_timeout = config.typing_timeout;
    let state = AppState::new(config, stores, identity);

    if let Some(max_age) = typing_timeout {
        typing::spawn_sweeper(state.clone(), max_age);
    }

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .merge(community_api::routes::router())
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(err) => {
            tracing::error!(?err, %addr, "failed to bind");
            std::process::exit(1);
        }
    };
    tracing::info!(%addr, "community-api listening");

    if let Err(err) = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
    {
        tracing::error!(?err, "server error");
        std::process::exit(1);
    }
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(?err, "failed to listen for shutdown signal");
        return;
    }
    tracing::info!("shutdown signal received");
}
