//! # Remote Collaborators
//!
//! Everything the actors need from the outside world, expressed as traits so
//! any transport (or the in-memory server) can sit behind them.
//!
//! - [`Remote`]: the commit store and branch pointers on the server
//! - [`DocumentRemote`]: server-side OT rooms for text fields
//! - [`BranchConsumer`]: the local model that loads commits

use async_trait::async_trait;
use futures::Stream;
use serde::{Deserialize, Serialize};
use std::pin::Pin;
use tandem_branch::{CommitData, CommitResponse, DeliveryError, LoadReason};
use tandem_common::{ClientId, CommitHash, DocumentId, ProjectId, RemoteResult};
use tandem_ot::{AppliedOperation, OperationMessage};

/// New branch heads, in server order
pub type BranchUpdates = Pin<Box<dyn Stream<Item = CommitData> + Send>>;

/// Events for one watched document, in server order
pub type DocumentEvents = Pin<Box<dyn Stream<Item = DocumentEvent> + Send>>;

#[async_trait]
pub trait Remote: Send + Sync {
    /// Subscribe to head changes of a branch. Replaces any previous
    /// subscription of the same client.
    async fn watch_branch(&self, project_id: &ProjectId, branch_name: &str) -> RemoteResult<BranchUpdates>;

    /// Push a commit. Without a branch name the commit is only stored.
    async fn make_commit(&self, data: CommitData) -> RemoteResult<CommitResponse>;

    /// `None` if the branch does not exist
    async fn get_branch_hash(&self, project_id: &ProjectId, branch_name: &str) -> RemoteResult<Option<CommitHash>>;

    /// Fails with `NotFound` if either commit is unknown to the server
    async fn get_common_ancestor(
        &self,
        project_id: &ProjectId,
        a: &CommitHash,
        b: &CommitHash,
    ) -> RemoteResult<CommitHash>;

    /// A stored commit together with the core objects it introduced
    async fn load_object(&self, project_id: &ProjectId, hash: &CommitHash) -> RemoteResult<CommitData>;

    async fn create_branch(&self, project_id: &ProjectId, branch_name: &str, hash: &CommitHash) -> RemoteResult<()>;

    /// Move a branch head. With `old` set the move only happens if the head
    /// still equals it; `None` forces the move.
    async fn set_branch_hash(
        &self,
        project_id: &ProjectId,
        branch_name: &str,
        old: Option<&CommitHash>,
        new: &CommitHash,
    ) -> RemoteResult<CommitResponse>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "type")]
pub enum DocumentEvent {
    /// Our operation `seq` was applied as `revision`
    Ack { seq: u64, revision: u64 },

    /// Another client's operation
    Operation(AppliedOperation),

    /// The server closed the document
    Closed,
}

/// Answer to a document watch
pub struct DocumentWatch {
    /// Server revision the watch starts from
    pub revision: u64,

    /// Text at `revision`
    pub content: String,

    /// Operations after the requested revision (empty on a fresh watch)
    pub missed: Vec<AppliedOperation>,

    pub events: DocumentEvents,
}

impl std::fmt::Debug for DocumentWatch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DocumentWatch")
            .field("revision", &self.revision)
            .field("content", &self.content)
            .field("missed", &self.missed.len())
            .finish()
    }
}

#[async_trait]
pub trait DocumentRemote: Send + Sync {
    /// Join a document room. With `since` the server returns every operation
    /// applied after that revision, so a rejoining client can catch up.
    async fn watch_document(
        &self,
        document_id: &DocumentId,
        client_id: &ClientId,
        since: Option<u64>,
    ) -> RemoteResult<DocumentWatch>;

    async fn send_operation(&self, document_id: &DocumentId, message: OperationMessage) -> RemoteResult<()>;

    async fn unwatch_document(&self, document_id: &DocumentId, client_id: &ClientId) -> RemoteResult<()>;
}

/// Local model that commits are loaded into
#[async_trait]
pub trait BranchConsumer: Send + Sync {
    async fn load_commit(&self, data: &CommitData, reason: LoadReason) -> Result<(), DeliveryError>;
}
