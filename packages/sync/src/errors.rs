use tandem_branch::SyncError;
use tandem_common::{DocumentId, RemoteError};
use tandem_ot::OtError;
use thiserror::Error;

/// Failures surfaced by the async branch and document handles
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    /// The actor behind the handle has shut down
    #[error("Session stopped")]
    Stopped,

    /// The server force-closed the document (inactivity or shutdown)
    #[error("Document {0} was closed by the server")]
    Closed(DocumentId),

    #[error(transparent)]
    Sync(#[from] SyncError),

    #[error(transparent)]
    Ot(#[from] OtError),

    #[error(transparent)]
    Remote(#[from] RemoteError),
}

impl<T> From<tokio::sync::mpsc::error::SendError<T>> for SessionError {
    fn from(_: tokio::sync::mpsc::error::SendError<T>) -> Self {
        SessionError::Stopped
    }
}

impl From<tokio::sync::oneshot::error::RecvError> for SessionError {
    fn from(_: tokio::sync::oneshot::error::RecvError) -> Self {
        SessionError::Stopped
    }
}
