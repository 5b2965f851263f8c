use std::time::Duration;

/// Which store implementation backs the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    Postgres,
    /// Process-local maps; state is lost on restart.
    Memory,
}

/// Community API configuration, loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    pub store_backend: StoreBackend,
    /// PostgreSQL connection string. Required for the postgres backend.
    pub database_url: Option<String>,
    /// HS256 secret shared with the service that issues access tokens.
    pub jwt_secret: String,
    /// Port the HTTP server binds to.
    pub port: u16,
    /// Heartbeat interval advertised in `ready` (ms).
    pub heartbeat_interval_ms: u64,
    /// Typing indicators older than this are expired. `None` disables expiry.
    pub typing_timeout: Option<Duration>,
}

pub const DEFAULT_HEARTBEAT_INTERVAL_MS: u64 = 41250;
pub const DEFAULT_TYPING_TIMEOUT_SECS: u64 = 10;

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Panics with a descriptive message if a required variable is missing.
    pub fn from_env() -> Self {
        let store_backend = match std::env::var("STORE_BACKEND").as_deref() {
            Ok("memory") => StoreBackend::Memory,
            Ok("postgres") | Err(_) => StoreBackend::Postgres,
            Ok(other) => panic!("STORE_BACKEND must be `postgres` or `memory`, got `{other}`"),
        };
        let database_url = match store_backend {
            StoreBackend::Postgres => Some(required_var("DATABASE_URL")),
            StoreBackend::Memory => std::env::var("DATABASE_URL").ok(),
        };
        let typing_timeout_secs = parsed_var("TYPING_TIMEOUT_SECS").unwrap_or(DEFAULT_TYPING_TIMEOUT_SECS);

        Self {
            store_backend,
            database_url,
            jwt_secret: required_var("JWT_SECRET"),
            port: parsed_var("PORT").unwrap_or(4002),
            heartbeat_interval_ms: parsed_var("HEARTBEAT_INTERVAL_MS")
                .unwrap_or(DEFAULT_HEARTBEAT_INTERVAL_MS),
            typing_timeout: (typing_timeout_secs > 0).then(|| Duration::from_secs(typing_timeout_secs)),
        }
    }

    /// In-memory configuration with defaults, for tests and local tooling.
    pub fn local(jwt_secret: &str) -> Self {
        Self {
            store_backend: StoreBackend::Memory,
            database_url: None,
            jwt_secret: jwt_secret.to_string(),
            port: 0,
            heartbeat_interval_ms: DEFAULT_HEARTBEAT_INTERVAL_MS,
            typing_timeout: Some(Duration::from_secs(DEFAULT_TYPING_TIMEOUT_SECS)),
        }
    }
}

fn required_var(name: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| panic!("{name} env var is required"))
}

fn parsed_var<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|v| v.parse().ok())
}
