//! # Connection
//!
//! Explicit handle on the lifecycle of the duplex channel to the server.
//! Branch and document actors never look at sockets; they subscribe here and
//! react to transitions.
//!
//! ```text
//! DISCONNECTED ──connect──→ CONNECTED ──disconnect──→ DISCONNECTED
//!                                                         │
//!                     RECONNECTED ←──connect── RECONNECTING
//! ```
//!
//! Every connect after the first reports `RECONNECTED`, which is what
//! triggers the rejoin protocol downstream.

use std::sync::atomic::{AtomicBool, Ordering};
use tandem_common::ConnectionState;
use tokio::sync::watch;

#[derive(Debug)]
pub struct Connection {
    state: watch::Sender<ConnectionState>,
    ever_connected: AtomicBool,
}

impl Default for Connection {
    fn default() -> Self {
        Self::new()
    }
}

impl Connection {
    /// A channel that has not connected yet
    pub fn new() -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            state,
            ever_connected: AtomicBool::new(false),
        }
    }

    /// Mark the channel up. Returns `Connected` the first time and
    /// `Reconnected` afterwards.
    pub fn connect(&self) -> ConnectionState {
        let next = if self.ever_connected.swap(true, Ordering::SeqCst) {
            ConnectionState::Reconnected
        } else {
            ConnectionState::Connected
        };
        self.set(next);
        next
    }

    pub fn reconnecting(&self) {
        self.set(ConnectionState::Reconnecting);
    }

    pub fn disconnect(&self) {
        self.set(ConnectionState::Disconnected);
    }

    pub fn fail(&self) {
        self.set(ConnectionState::Error);
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub fn is_connected(&self) -> bool {
        self.state().is_connected()
    }

    /// Receive every transition from now on
    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    fn set(&self, next: ConnectionState) {
        let previous = self.state.send_replace(next);
        if previous != next {
            tracing::info!("[Connection] {:?} -> {:?}", previous, next);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_connect_then_reconnects() {
        let connection = Connection::new();
        assert_eq!(connection.state(), ConnectionState::Disconnected);
        assert!(!connection.is_connected());

        assert_eq!(connection.connect(), ConnectionState::Connected);
        assert!(connection.is_connected());

        connection.disconnect();
        connection.reconnecting();
        assert_eq!(connection.state(), ConnectionState::Reconnecting);
        assert_eq!(connection.connect(), ConnectionState::Reconnected);
        assert!(connection.is_connected());
    }

    #[tokio::test]
    async fn test_subscribers_see_transitions() {
        let connection = Connection::new();
        let mut states = connection.subscribe();

        connection.connect();
        states.changed().await.unwrap();
        assert_eq!(*states.borrow_and_update(), ConnectionState::Connected);

        connection.fail();
        states.changed().await.unwrap();
        assert_eq!(*states.borrow_and_update(), ConnectionState::Error);
    }
}
