//! # Server Link
//!
//! One client's view of the in-memory server. Every call first checks the
//! client's [`Connection`]; while it is down calls fail with
//! `RemoteError::Disconnected`, exactly like a dropped socket would.
//!
//! Fault switches simulate the two ways a request can be lost mid-flight:
//! the request never reaches the server, or it is applied but the answer is
//! lost. Either way the link drops its connection.

use crate::{CommitStore, DocumentRooms};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tandem_branch::{CommitData, CommitResponse};
use tandem_common::{ClientId, CommitHash, DocumentId, ProjectId, RemoteError, RemoteResult};
use tandem_ot::OperationMessage;
use tandem_sync::{BranchUpdates, Connection, DocumentRemote, DocumentWatch, Remote};

/// Authoritative state shared by every link
pub struct MemoryServer {
    pub commits: CommitStore,
    pub rooms: Arc<DocumentRooms>,
}

impl MemoryServer {
    pub fn new(commits: CommitStore, rooms: DocumentRooms) -> Self {
        Self {
            commits,
            rooms: Arc::new(rooms),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    /// Drop the request before the server sees it
    LoseRequest,

    /// Apply the request, then drop the answer
    LoseResponse,
}

#[derive(Default)]
struct FaultSwitch {
    lose_request: AtomicBool,
    lose_response: AtomicBool,
}

impl FaultSwitch {
    fn arm(&self, fault: Fault) {
        match fault {
            Fault::LoseRequest => self.lose_request.store(true, Ordering::SeqCst),
            Fault::LoseResponse => self.lose_response.store(true, Ordering::SeqCst),
        }
    }

    fn take(&self, fault: Fault) -> bool {
        match fault {
            Fault::LoseRequest => self.lose_request.swap(false, Ordering::SeqCst),
            Fault::LoseResponse => self.lose_response.swap(false, Ordering::SeqCst),
        }
    }
}

pub struct ServerLink {
    server: Arc<MemoryServer>,
    connection: Arc<Connection>,
    client_id: ClientId,
    commit_faults: FaultSwitch,
    operation_faults: FaultSwitch,
}

impl ServerLink {
    /// Link a client to the server; the connection comes up immediately
    pub fn new(server: Arc<MemoryServer>, client_id: impl Into<ClientId>) -> Self {
        let connection = Arc::new(Connection::new());
        connection.connect();
        Self {
            server,
            connection,
            client_id: client_id.into(),
            commit_faults: FaultSwitch::default(),
            operation_faults: FaultSwitch::default(),
        }
    }

    pub fn connection(&self) -> &Connection {
        &self.connection
    }

    pub fn client_id(&self) -> &ClientId {
        &self.client_id
    }

    /// Lose the next make-commit (branch pushes and branchless stores)
    pub fn fail_next_commit(&self, fault: Fault) {
        self.commit_faults.arm(fault);
    }

    /// Lose the next text operation sent
    pub fn fail_next_operation(&self, fault: Fault) {
        self.operation_faults.arm(fault);
    }

    /// Drop the connection; the server forgets this client's subscriptions
    pub async fn disconnect(&self) {
        self.connection.disconnect();
        self.server.commits.detach(&self.client_id).await;
        self.server.rooms.detach(&self.client_id).await;
    }

    pub fn reconnect(&self) {
        self.connection.reconnecting();
        self.connection.connect();
    }

    fn ensure_connected(&self) -> RemoteResult<()> {
        if self.connection.is_connected() {
            Ok(())
        } else {
            Err(RemoteError::Disconnected)
        }
    }

    /// Run `request` through the fault switches
    async fn guarded<T, F>(&self, faults: &FaultSwitch, request: F) -> RemoteResult<T>
    where
        F: std::future::Future<Output = RemoteResult<T>>,
    {
        self.ensure_connected()?;
        if faults.take(Fault::LoseRequest) {
            tracing::debug!("[ServerLink] {} request lost", self.client_id);
            self.disconnect().await;
            return Err(RemoteError::Disconnected);
        }

        if faults.take(Fault::LoseResponse) {
            tracing::debug!("[ServerLink] {} response lost", self.client_id);
            // Detach first so nothing the request triggers reaches this client
            self.disconnect().await;
            let _ = request.await;
            return Err(RemoteError::Disconnected);
        }
        request.await
    }
}

#[async_trait]
impl Remote for ServerLink {
    async fn watch_branch(&self, project_id: &ProjectId, branch_name: &str) -> RemoteResult<BranchUpdates> {
        self.ensure_connected()?;
        let updates = self
            .server
            .commits
            .watch_branch(project_id, branch_name, &self.client_id)
            .await?;
        Ok(Box::pin(updates))
    }

    async fn make_commit(&self, data: CommitData) -> RemoteResult<CommitResponse> {
        self.guarded(&self.commit_faults, self.server.commits.make_commit(data))
            .await
    }

    async fn get_branch_hash(&self, project_id: &ProjectId, branch_name: &str) -> RemoteResult<Option<CommitHash>> {
        self.ensure_connected()?;
        self.server.commits.get_branch_hash(project_id, branch_name).await
    }

    async fn get_common_ancestor(
        &self,
        project_id: &ProjectId,
        a: &CommitHash,
        b: &CommitHash,
    ) -> RemoteResult<CommitHash> {
        self.ensure_connected()?;
        self.server.commits.get_common_ancestor(project_id, a, b).await
    }

    async fn load_object(&self, project_id: &ProjectId, hash: &CommitHash) -> RemoteResult<CommitData> {
        self.ensure_connected()?;
        self.server.commits.load_object(project_id, hash).await
    }

    async fn create_branch(&self, project_id: &ProjectId, branch_name: &str, hash: &CommitHash) -> RemoteResult<()> {
        self.ensure_connected()?;
        self.server.commits.create_branch(project_id, branch_name, hash).await
    }

    async fn set_branch_hash(
        &self,
        project_id: &ProjectId,
        branch_name: &str,
        old: Option<&CommitHash>,
        new: &CommitHash,
    ) -> RemoteResult<CommitResponse> {
        self.ensure_connected()?;
        self.server
            .commits
            .set_branch_hash(project_id, branch_name, old, new)
            .await
    }
}

#[async_trait]
impl DocumentRemote for ServerLink {
    async fn watch_document(
        &self,
        document_id: &DocumentId,
        client_id: &ClientId,
        since: Option<u64>,
    ) -> RemoteResult<DocumentWatch> {
        self.ensure_connected()?;
        self.server.rooms.watch(document_id, client_id, since).await
    }

    async fn send_operation(&self, document_id: &DocumentId, message: OperationMessage) -> RemoteResult<()> {
        self.guarded(&self.operation_faults, self.server.rooms.receive(document_id, message))
            .await
    }

    async fn unwatch_document(&self, document_id: &DocumentId, client_id: &ClientId) -> RemoteResult<()> {
        self.ensure_connected()?;
        self.server.rooms.unwatch(document_id, client_id).await;
        Ok(())
    }
}
