use std::time::Duration;

/// Realtime API configuration, loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// PostgreSQL connection string for the visibility store.
    pub database_url: String,
    /// Redis connection string. When unset, events only fan out inside this process.
    pub redis_url: Option<String>,
    /// HS256 secret shared with the API servers that sign session and app tokens.
    pub jwt_secret: String,
    /// Port the HTTP server binds to.
    pub port: u16,
    /// Upper bound for a single authorization check or `auth` command.
    pub authz_timeout: Duration,
    /// Heartbeat interval advertised to clients (ms).
    pub heartbeat_interval_ms: u64,
    /// Panic on unknown published event names instead of logging and dropping them.
    pub strict_event_names: bool,
    /// Version reported by the `status` command.
    pub api_version: u32,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Panics with a descriptive message if a required variable is missing.
    pub fn from_env() -> Self {
        Self {
            database_url: required_var("DATABASE_URL"),
            redis_url: std::env::var("REDIS_URL").ok().filter(|s| !s.is_empty()),
            jwt_secret: required_var("JWT_SECRET"),
            port: parsed_var("PORT").unwrap_or(4100),
            authz_timeout: Duration::from_millis(parsed_var("AUTHZ_TIMEOUT_MS").unwrap_or(1500)),
            heartbeat_interval_ms: parsed_var("HEARTBEAT_INTERVAL_MS").unwrap_or(30_000),
            strict_event_names: parsed_var("STRICT_EVENT_NAMES").unwrap_or(false),
            api_version: parsed_var("API_VERSION").unwrap_or(2),
        }
    }

    /// Settings for tests and local tooling: in-process transport, short timeouts.
    pub fn for_local(jwt_secret: impl Into<String>) -> Self {
        Self {
            database_url: String::new(),
            redis_url: None,
            jwt_secret: jwt_secret.into(),
            port: 0,
            authz_timeout: Duration::from_millis(500),
            heartbeat_interval_ms: 30_000,
            strict_event_names: true,
            api_version: 2,
        }
    }
}

fn required_var(name: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| panic!("{name} env var is required"))
}

fn parsed_var<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|v| v.parse().ok())
}
