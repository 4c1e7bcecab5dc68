//! Server configuration loaded from environment variables.
//!
//! All settings except the JWT key material have sensible defaults so the
//! server can start with minimal configuration for local development.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use courier_shared::constants::{
    DEFAULT_HTTP_PORT, DEFAULT_IDLE_TIMEOUT_SECS, DEFAULT_PING_INTERVAL_SECS,
    DEFAULT_PRESENCE_TIMEOUT_MS, OUTBOUND_QUEUE_CAPACITY,
};

use crate::connection::ConnectionSettings;

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Socket address for the HTTP + WebSocket server.
    /// Env: `HTTP_ADDR`
    /// Default: `0.0.0.0:8080`
    pub http_addr: SocketAddr,

    /// SQLite message log.
    /// Env: `DATABASE_PATH`
    /// Default: `./courier.db`
    pub database_path: PathBuf,

    /// Redis URL for the presence store. `None` keeps presence in-process.
    /// Env: `REDIS_URL`
    pub redis_url: Option<String>,

    /// Upper bound on each presence store call.
    /// Env: `PRESENCE_TIMEOUT_MS`
    /// Default: `2000`
    pub presence_timeout: Duration,

    /// RS256 public key (PEM).
    /// Env: `JWT_PUBLIC_KEY`
    pub jwt_public_key: Option<String>,

    /// HS256 shared secret, used when no public key is configured.
    /// Env: `JWT_SECRET`
    pub jwt_secret: Option<String>,

    /// Slots in each connection's outbound queue.
    /// Env: `OUTBOUND_QUEUE_CAPACITY`
    /// Default: `256`
    pub outbound_queue_capacity: usize,

    /// Flush interval for batched socket deliveries. `None` = immediate.
    /// Env: `DELIVERY_BATCH_MS` (0 disables)
    /// Default: disabled
    pub delivery_batch_interval: Option<Duration>,

    /// Server-initiated ping cadence.
    /// Env: `WS_PING_INTERVAL_SECS` (0 disables)
    /// Default: `30`
    pub ping_interval: Option<Duration>,

    /// Drop connections that stay silent this long.
    /// Env: `WS_IDLE_TIMEOUT_SECS` (0 disables)
    /// Default: `90`
    pub idle_timeout: Option<Duration>,

    /// Environment label, informational only.
    /// Env: `APP_ENV`
    /// Default: `development`
    pub app_env: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_addr: ([0, 0, 0, 0], DEFAULT_HTTP_PORT).into(),
            database_path: PathBuf::from("./courier.db"),
            redis_url: None,
            presence_timeout: Duration::from_millis(DEFAULT_PRESENCE_TIMEOUT_MS),
            jwt_public_key: None,
            jwt_secret: None,
            outbound_queue_capacity: OUTBOUND_QUEUE_CAPACITY,
            delivery_batch_interval: None,
            ping_interval: Some(Duration::from_secs(DEFAULT_PING_INTERVAL_SECS)),
            idle_timeout: Some(Duration::from_secs(DEFAULT_IDLE_TIMEOUT_SECS)),
            app_env: "development".to_string(),
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a configuration from an arbitrary key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(addr) = lookup("HTTP_ADDR") {
            if let Ok(parsed) = addr.parse::<SocketAddr>() {
                config.http_addr = parsed;
            } else {
                tracing::warn!(value = %addr, "Invalid HTTP_ADDR, using default");
            }
        }

        if let Some(path) = lookup("DATABASE_PATH") {
            config.database_path = PathBuf::from(path);
        }

        config.redis_url = lookup("REDIS_URL").filter(|v| !v.is_empty());
        config.jwt_public_key = lookup("JWT_PUBLIC_KEY").filter(|v| !v.is_empty());
        config.jwt_secret = lookup("JWT_SECRET").filter(|v| !v.is_empty());

        if let Some(val) = lookup("PRESENCE_TIMEOUT_MS") {
            match val.trim().parse::<u64>() {
                Ok(n) if n > 0 => config.presence_timeout = Duration::from_millis(n),
                _ => tracing::warn!(value = %val, "Invalid PRESENCE_TIMEOUT_MS, using default"),
            }
        }

        if let Some(val) = lookup("OUTBOUND_QUEUE_CAPACITY") {
            match val.parse::<usize>() {
                Ok(n) if n > 0 => config.outbound_queue_capacity = n,
                _ => tracing::warn!(value = %val, "Invalid OUTBOUND_QUEUE_CAPACITY, using default"),
            }
        }

        if let Some(val) = lookup("DELIVERY_BATCH_MS") {
            match parse_interval(&val, Duration::from_millis) {
                Some(interval) => config.delivery_batch_interval = interval,
                None => tracing::warn!(value = %val, "Invalid DELIVERY_BATCH_MS, using default"),
            }
        }

        if let Some(val) = lookup("WS_PING_INTERVAL_SECS") {
            match parse_interval(&val, Duration::from_secs) {
                Some(interval) => config.ping_interval = interval,
                None => tracing::warn!(value = %val, "Invalid WS_PING_INTERVAL_SECS, using default"),
            }
        }

        if let Some(val) = lookup("WS_IDLE_TIMEOUT_SECS") {
            match parse_interval(&val, Duration::from_secs) {
                Some(interval) => config.idle_timeout = interval,
                None => tracing::warn!(value = %val, "Invalid WS_IDLE_TIMEOUT_SECS, using default"),
            }
        }

        if let Some(env) = lookup("APP_ENV") {
            config.app_env = env;
        }

        // RUST_LOG is handled directly by tracing-subscriber's EnvFilter,
        // so we do not store it here.

        config
    }

    /// Per-connection settings derived from this configuration.
    pub fn connection_settings(&self) -> ConnectionSettings {
        ConnectionSettings {
            queue_capacity: self.outbound_queue_capacity,
            ping_interval: self.ping_interval,
            idle_timeout: self.idle_timeout,
        }
    }
}

/// `Some(None)` for "0" (disabled), `Some(Some(d))` for a positive count,
/// `None` when the value does not parse.
fn parse_interval(value: &str, unit: fn(u64) -> Duration) -> Option<Option<Duration>> {
    match value.trim().parse::<u64>() {
        Ok(0) => Some(None),
        Ok(n) => Some(Some(unit(n))),
        Err(_) => None,
    }
}
