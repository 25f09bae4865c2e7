use thiserror::Error;

/// Failures reported by a remote collaborator (server or transport).
///
/// `Disconnected` and `Timeout` are transport faults: the synchronization
/// layers absorb them and recover through the rejoin protocol. The other
/// variants are answers from a reachable server.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RemoteError {
    #[error("Transport disconnected")]
    Disconnected,

    #[error("Request timed out")]
    Timeout,

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Rejected by server: {0}")]
    Rejected(String),
}

impl RemoteError {
    /// True for faults the rejoin protocol recovers from
    pub fn is_transport(&self) -> bool {
        matches!(self, RemoteError::Disconnected | RemoteError::Timeout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_classification() {
        assert!(RemoteError::Disconnected.is_transport());
        assert!(RemoteError::Timeout.is_transport());
        assert!(!RemoteError::NotFound("#abc".to_string()).is_transport());
        assert!(!RemoteError::Rejected("branch exists".to_string()).is_transport());
    }
}
