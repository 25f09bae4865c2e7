//! # Branch Actor
//!
//! Async driver for one [`Coordinator`]. A single task owns the coordinator
//! and multiplexes four inputs:
//!
//! ```text
//!   BranchHandle ──commands──┐
//!   Connection  ──changes───┤
//!   Remote      ──updates───┼──→ Coordinator ──Request──→ in-flight future
//!   in-flight   ──Response──┘
//! ```
//!
//! The in-flight slot holds at most one future, mirroring the coordinator's
//! one-request-at-a-time rule.

use crate::{BranchConsumer, BranchUpdates, Connection, Remote, SessionError, SyncConfig};
use futures::future::BoxFuture;
use futures::{FutureExt, StreamExt};
use std::collections::HashMap;
use std::sync::Arc;
use tandem_branch::{
    BranchStatus, CommitData, CommitStatus, Coordinator, DeliveryError, ForkResolution, Request, Response,
    SyncError, SyncEvent,
};
use tandem_common::{CommitHash, ConnectionState, ProjectId};
use tokio::sync::{broadcast, mpsc, oneshot, watch};

/// Snapshot of the branch heads
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BranchInfo {
    pub local_hash: CommitHash,
    pub origin_hash: CommitHash,
    pub queued: usize,
    pub status: BranchStatus,
    pub forked: bool,
}

enum Command {
    Commit {
        data: CommitData,
        reply: oneshot::Sender<Result<(), SyncError>>,
    },
    MakeCommit {
        data: CommitData,
        reply: oneshot::Sender<CommitStatus>,
    },
    ResolveFork {
        resolution: ForkResolution,
        reply: oneshot::Sender<Result<(), SyncError>>,
    },
    WhenSynced {
        reply: oneshot::Sender<CommitHash>,
    },
    Retry,
    Inspect {
        reply: oneshot::Sender<BranchInfo>,
    },
    Close,
}

/// Handle to a branch kept in sync by a background actor
#[derive(Debug, Clone)]
pub struct BranchHandle {
    commands: mpsc::Sender<Command>,
    status: watch::Receiver<BranchStatus>,
    events: broadcast::Sender<SyncEvent>,
}

impl BranchHandle {
    /// Open `branch_name` at its current server head and start syncing.
    ///
    /// The consumer is expected to already hold the model at that head.
    pub async fn open(
        remote: Arc<dyn Remote>,
        consumer: Arc<dyn BranchConsumer>,
        connection: &Connection,
        project_id: ProjectId,
        branch_name: impl Into<String>,
        config: &SyncConfig,
    ) -> Result<Self, SessionError> {
        let branch_name = branch_name.into();
        let head = remote
            .get_branch_hash(&project_id, &branch_name)
            .await?
            .ok_or_else(|| SyncError::BranchMissing(branch_name.clone()))?;
        let updates = remote.watch_branch(&project_id, &branch_name).await?;

        tracing::info!("[BranchActor] opened {} at {}", branch_name, head);

        let mut coordinator = Coordinator::new(project_id.clone(), branch_name.clone(), head);
        let connection_rx = connection.subscribe();
        let state = *connection_rx.borrow();
        if !state.is_connected() {
            coordinator.connection_changed(state);
        }

        let (commands_tx, commands_rx) = mpsc::channel(config.command_capacity);
        let (status_tx, status_rx) = watch::channel(coordinator.status());
        let (events_tx, _) = broadcast::channel(config.command_capacity.max(16));

        let actor = BranchActor {
            coordinator,
            project_id,
            branch_name,
            remote,
            consumer,
            commands: commands_rx,
            connection: connection_rx,
            connection_open: true,
            updates: Some(updates),
            in_flight: None,
            status: status_tx,
            events: events_tx.clone(),
            commit_waiters: HashMap::new(),
            worker_waiters: HashMap::new(),
            next_worker: 0,
        };
        tokio::spawn(actor.run());

        Ok(Self {
            commands: commands_tx,
            status: status_rx,
            events: events_tx,
        })
    }

    /// Queue a commit built on the local head. Returns once it is queued,
    /// not when the server acknowledges it.
    pub async fn commit_locally(&self, data: CommitData) -> Result<(), SessionError> {
        let (reply, rx) = oneshot::channel();
        self.commands.send(Command::Commit { data, reply }).await?;
        Ok(rx.await??)
    }

    /// Queue a commit and wait for its final outcome. A commit that is not
    /// built on the local head resolves to `CANCELED` without being queued.
    pub async fn make_commit(&self, data: CommitData) -> Result<CommitStatus, SessionError> {
        let (reply, rx) = oneshot::channel();
        self.commands.send(Command::MakeCommit { data, reply }).await?;
        Ok(rx.await?)
    }

    pub fn status(&self) -> BranchStatus {
        *self.status.borrow()
    }

    pub fn watch_status(&self) -> watch::Receiver<BranchStatus> {
        self.status.clone()
    }

    /// Every coordinator event from now on
    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.events.subscribe()
    }

    /// Start resolving a fork. Completion is reported as events.
    pub async fn resolve_fork(&self, resolution: ForkResolution) -> Result<(), SessionError> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(Command::ResolveFork { resolution, reply })
            .await?;
        Ok(rx.await??)
    }

    /// Wait until the commit queue is empty; resolves with the head then
    pub async fn when_synced(&self) -> Result<CommitHash, SessionError> {
        let (reply, rx) = oneshot::channel();
        self.commands.send(Command::WhenSynced { reply }).await?;
        Ok(rx.await?)
    }

    /// Resume after a protocol error or rejected load
    pub async fn retry(&self) -> Result<(), SessionError> {
        self.commands.send(Command::Retry).await?;
        Ok(())
    }

    pub async fn info(&self) -> Result<BranchInfo, SessionError> {
        let (reply, rx) = oneshot::channel();
        self.commands.send(Command::Inspect { reply }).await?;
        Ok(rx.await?)
    }

    pub async fn close(&self) -> Result<(), SessionError> {
        self.commands.send(Command::Close).await?;
        Ok(())
    }
}

struct Completed {
    response: Response,
    updates: Option<BranchUpdates>,
}

impl From<Response> for Completed {
    fn from(response: Response) -> Self {
        Self {
            response,
            updates: None,
        }
    }
}

struct BranchActor {
    coordinator: Coordinator,
    project_id: ProjectId,
    branch_name: String,
    remote: Arc<dyn Remote>,
    consumer: Arc<dyn BranchConsumer>,

    commands: mpsc::Receiver<Command>,
    connection: watch::Receiver<ConnectionState>,
    connection_open: bool,
    updates: Option<BranchUpdates>,
    in_flight: Option<BoxFuture<'static, Completed>>,

    status: watch::Sender<BranchStatus>,
    events: broadcast::Sender<SyncEvent>,
    commit_waiters: HashMap<CommitHash, oneshot::Sender<CommitStatus>>,
    worker_waiters: HashMap<u64, oneshot::Sender<CommitHash>>,
    next_worker: u64,
}

impl BranchActor {
    async fn run(mut self) {
        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(Command::Close) | None => break,
                    Some(command) => self.on_command(command),
                },
                changed = self.connection.changed(), if self.connection_open => {
                    if changed.is_err() {
                        self.connection_open = false;
                        continue;
                    }
                    let state = *self.connection.borrow_and_update();
                    let request = self.coordinator.connection_changed(state);
                    self.drive(request);
                }
                update = next_update(&mut self.updates), if self.updates.is_some() => match update {
                    Some(data) => {
                        let request = self.coordinator.remote_update(data);
                        self.drive(request);
                    }
                    None => {
                        tracing::debug!("[BranchActor] update stream of {} ended", self.branch_name);
                        self.updates = None;
                    }
                },
                completed = in_flight(&mut self.in_flight), if self.in_flight.is_some() => {
                    self.in_flight = None;
                    self.on_completed(completed);
                }
            }
        }
        tracing::info!("[BranchActor] closed {}", self.branch_name);
    }

    fn on_command(&mut self, command: Command) {
        match command {
            Command::Commit { data, reply } => match self.coordinator.commit_locally(data) {
                Ok(request) => {
                    let _ = reply.send(Ok(()));
                    self.drive(request);
                }
                Err(e) => {
                    let _ = reply.send(Err(e));
                }
            },
            Command::MakeCommit { data, reply } => {
                let hash = data.hash().clone();
                match self.coordinator.commit_locally(data) {
                    Ok(request) => {
                        self.commit_waiters.insert(hash, reply);
                        self.drive(request);
                    }
                    Err(e) => {
                        tracing::debug!("[BranchActor] {} canceled: {}", hash, e);
                        let _ = reply.send(CommitStatus::Canceled);
                    }
                }
            }
            Command::ResolveFork { resolution, reply } => match self.coordinator.resolve_fork(resolution) {
                Ok(request) => {
                    let _ = reply.send(Ok(()));
                    self.drive(request);
                }
                Err(e) => {
                    let _ = reply.send(Err(e));
                }
            },
            Command::WhenSynced { reply } => {
                let id = self.next_worker;
                self.next_worker += 1;
                self.worker_waiters.insert(id, reply);
                self.coordinator.queue_worker_request(id);
                self.drive(None);
            }
            Command::Retry => {
                let request = self.coordinator.retry();
                self.drive(request);
            }
            Command::Inspect { reply } => {
                let branch = self.coordinator.branch();
                let _ = reply.send(BranchInfo {
                    local_hash: branch.local_hash().clone(),
                    origin_hash: branch.origin_hash().clone(),
                    queued: branch.commit_queue().len(),
                    status: branch.status(),
                    forked: self.coordinator.is_forked(),
                });
            }
            Command::Close => {}
        }
    }

    fn on_completed(&mut self, completed: Completed) {
        // A transport fault may beat the connection watch; let the
        // coordinator see the drop before it decides what to send next
        let state = *self.connection.borrow();
        if state.is_connected() != self.coordinator.is_connected() {
            let request = self.coordinator.connection_changed(state);
            self.drive(request);
        }

        if let Some(updates) = completed.updates {
            self.updates = Some(updates);
        }
        let request = self.coordinator.handle(completed.response);
        self.drive(request);
    }

    fn drive(&mut self, request: Option<Request>) {
        if let Some(request) = request {
            self.in_flight = Some(self.dispatch(request));
        }
        self.publish();
    }

    fn dispatch(&self, request: Request) -> BoxFuture<'static, Completed> {
        let remote = self.remote.clone();
        let consumer = self.consumer.clone();
        let project_id = self.project_id.clone();
        let branch_name = self.branch_name.clone();

        async move {
            match request {
                Request::Push(data) => Response::Pushed(remote.make_commit(data).await).into(),
                Request::Deliver { hash, data, reason } => {
                    let data = match data {
                        Some(data) => data,
                        None => match remote.load_object(&project_id, &hash).await {
                            Ok(data) => data,
                            Err(e) => return Response::Delivered(Err(DeliveryError::from(e))).into(),
                        },
                    };
                    Response::Delivered(consumer.load_commit(&data, reason).await).into()
                }
                Request::Subscribe => match remote.watch_branch(&project_id, &branch_name).await {
                    Ok(updates) => Completed {
                        response: Response::Subscribed(Ok(())),
                        updates: Some(updates),
                    },
                    Err(e) => Response::Subscribed(Err(e)).into(),
                },
                Request::FetchBranchHash => {
                    Response::BranchHash(remote.get_branch_hash(&project_id, &branch_name).await).into()
                }
                Request::FindCommonAncestor { queued, head } => Response::CommonAncestor(
                    remote.get_common_ancestor(&project_id, &queued, &head).await,
                )
                .into(),
                Request::Store(data) => Response::Stored(remote.make_commit(data).await).into(),
                Request::CreateBranch { name, hash } => {
                    Response::BranchCreated(remote.create_branch(&project_id, &name, &hash).await).into()
                }
                Request::SetBranchHash { old, new } => Response::BranchHashSet(
                    remote
                        .set_branch_hash(&project_id, &branch_name, old.as_ref(), &new)
                        .await,
                )
                .into(),
            }
        }
        .boxed()
    }

    /// Fan coordinator events out to waiters and subscribers
    fn publish(&mut self) {
        for event in self.coordinator.take_events() {
            match &event {
                SyncEvent::Status(status) => {
                    self.status.send_replace(*status);
                }
                SyncEvent::Settled { hash, status } => {
                    if let Some(waiter) = self.commit_waiters.remove(hash) {
                        let _ = waiter.send(*status);
                    }
                }
                SyncEvent::WorkersReleased { requests, head } => {
                    for id in requests {
                        if let Some(waiter) = self.worker_waiters.remove(id) {
                            let _ = waiter.send(head.clone());
                        }
                    }
                }
                SyncEvent::Failed(error) => {
                    tracing::warn!("[BranchActor] {}: {}", self.branch_name, error);
                }
                _ => {}
            }
            // No subscribers is fine
            let _ = self.events.send(event);
        }
    }
}

async fn next_update(updates: &mut Option<BranchUpdates>) -> Option<CommitData> {
    match updates {
        Some(stream) => stream.next().await,
        None => std::future::pending().await,
    }
}

async fn in_flight(slot: &mut Option<BoxFuture<'static, Completed>>) -> Completed {
    match slot {
        Some(future) => future.await,
        None => std::future::pending().await,
    }
}
