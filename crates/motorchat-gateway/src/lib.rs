pub mod auth;
pub mod connection;
pub mod delivery;
pub mod dispatcher;
pub mod error;
pub mod presence;
pub mod rooms;
pub mod session;
pub mod typing;

use std::time::Duration;

pub use dispatcher::Dispatcher;

/// Tunables for the gateway.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// A typing indicator with no fresh `typing:start` is cleared after this long.
    pub typing_ttl: Duration,
    /// Server sends a Ping this often; two missed Pongs drop the connection.
    pub heartbeat_interval: Duration,
    /// Events queued per session before further events for it are dropped.
    pub outbound_capacity: usize,
    /// Offline users are forgotten, `last_seen` included, after this long.
    pub presence_retention: Duration,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            typing_ttl: Duration::from_secs(6),
            heartbeat_interval: Duration::from_secs(15),
            outbound_capacity: 256,
            presence_retention: Duration::from_secs(24 * 60 * 60),
        }
    }
}
