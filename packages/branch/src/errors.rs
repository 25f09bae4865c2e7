//! Error types for branch synchronization

use tandem_common::{CommitHash, RemoteError};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SyncError {
    /// The commit was not built on the current local head; rebase and retry
    #[error("Stale parent: branch is at {expected}, commit is based on {actual:?}")]
    StaleParent {
        expected: CommitHash,
        actual: Option<CommitHash>,
    },

    #[error("Branch is not waiting on a fork resolution")]
    NotForked,

    #[error("Branch is busy with another request")]
    Busy,

    #[error("Server answered with unexpected status {0:?}")]
    UnexpectedStatus(String),

    #[error("Server reported a merge without a merge hash")]
    MissingMergeHash,

    #[error("Server acknowledged {actual} while {expected} was in flight")]
    AckMismatch {
        expected: CommitHash,
        actual: CommitHash,
    },

    #[error("Consumer rejected commit {hash}: {reason}")]
    LoadRejected { hash: CommitHash, reason: String },

    #[error("Branch {0} no longer exists on the server")]
    BranchMissing(String),

    #[error("Remote error: {0}")]
    Remote(#[from] RemoteError),
}

impl SyncError {
    /// Ordering conflicts are recoverable by rebasing or forking
    pub fn is_ordering_conflict(&self) -> bool {
        matches!(self, SyncError::StaleParent { .. })
    }
}

/// Why a consumer did not load a delivered commit
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DeliveryError {
    #[error("Rejected: {0}")]
    Rejected(String),

    #[error("Remote error: {0}")]
    Remote(#[from] RemoteError),
}
