use serde::{Deserialize, Serialize};

/// Lifecycle of the duplex channel to the server
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConnectionState {
    Connected,
    Disconnected,
    Reconnecting,
    Reconnected,
    Error,
}

impl ConnectionState {
    /// True when requests can be sent
    pub fn is_connected(self) -> bool {
        matches!(self, ConnectionState::Connected | ConnectionState::Reconnected)
    }
}
