/// Slots in each connection's outbound queue
pub const OUTBOUND_QUEUE_CAPACITY: usize = 256;

/// Maximum inbound WebSocket frame size in bytes (64 KiB)
pub const MAX_FRAME_SIZE: usize = 64 * 1024;

/// Default server ping cadence in seconds
pub const DEFAULT_PING_INTERVAL_SECS: u64 = 30;

/// Default idle timeout for a connection in seconds
pub const DEFAULT_IDLE_TIMEOUT_SECS: u64 = 90;

/// Default bound on a single presence store call in milliseconds
pub const DEFAULT_PRESENCE_TIMEOUT_MS: u64 = 2_000;

/// Default HTTP API port (server)
pub const DEFAULT_HTTP_PORT: u16 = 8080;

/// Presence keys (Redis)
pub const PRESENCE_DATA_KEY: &str = "online_users_data";
pub const PRESENCE_SET_KEY: &str = "online_users";
