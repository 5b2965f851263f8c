pub mod auth;
pub mod chat;
pub mod config;
pub mod db;
pub mod error;
pub mod gateway;
pub mod models;
pub mod routes;
pub mod store;

use std::sync::Arc;

use auth::identity::IdentityGateway;
use config::Config;
use gateway::fanout::Broadcaster;
use gateway::registry::RoomRegistry;
use store::Stores;

/// Shared application state available to all route handlers and gateway
/// sessions.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub stores: Stores,
    pub identity: Arc<dyn IdentityGateway>,
    pub registry: Arc<RoomRegistry>,
    pub broadcast: Broadcaster,
}

impl AppState {
    /// Build state around a fresh, empty registry.
    pub fn new(config: Config, stores: Stores, identity: Arc<dyn IdentityGateway>) -> Self {
        let registry = Arc::new(RoomRegistry::new());
        Self {
            config: Arc::new(config),
            stores,
            identity,
            broadcast: Broadcaster::new(registry.clone()),
            registry,
        }
    }
}
