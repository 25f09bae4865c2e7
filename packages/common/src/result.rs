use crate::error::RemoteError;

/// Result of a call to a remote collaborator
pub type RemoteResult<T> = Result<T, RemoteError>;
