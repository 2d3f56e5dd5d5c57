pub const LOCAL_WS_URL: &str = "ws://localhost:8080/ws";

/// Query parameter carrying the auth credential at handshake time.
pub const TOKEN_QUERY_PARAM: &str = "token";

pub(crate) const DEFAULT_HEARTBEAT_INTERVAL_MS: u64 = 30_000;
pub(crate) const DEFAULT_RECONNECT_INTERVAL_MS: u64 = 3_000;
pub(crate) const DEFAULT_MAX_RECONNECT_DELAY_MS: u64 = 60_000;
pub(crate) const DEFAULT_MAX_RECONNECT_ATTEMPTS: u32 = 5;

pub(crate) const DEFAULT_MAX_OPPORTUNITIES: usize = 100;
pub(crate) const DEFAULT_EXPIRY_SWEEP_INTERVAL_MS: u64 = 5_000;
pub(crate) const DEFAULT_TIME_TO_EXPIRY_MS: i64 = 30_000;
pub(crate) const DEFAULT_MAX_NOTIFICATIONS: usize = 50;
