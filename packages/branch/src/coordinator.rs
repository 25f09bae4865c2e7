//! # Synchronization Coordinator
//!
//! Sans-IO state machine that owns one [`Branch`] and decides which network
//! round trip happens next. Every input (a local commit, a remote update, a
//! connection transition, the answer to the previous request) returns at
//! most one [`Request`]; the driver performs it and feeds the result back
//! through [`Coordinator::handle`]. Only one request is ever in flight, which
//! is what serializes pushes and pulls per branch.
//!
//! ```text
//!                 commit queued              SYNCED / MERGED
//!        ┌─────────────────────→ Pushing ───────────────────┐
//!        │                          │ FORKED                │
//!        │                          ↓                       │
//!      Idle ←──── Resolving ←── (halted) ←──┐               │
//!        │  ↑                               │               │
//!        │  └──────── Pulling ←─────────────┼───────────────┘
//!        │ reconnected                      │
//!        └──────────→ Rejoining ────────────┘
//!                  subscribe → head → common ancestor
//! ```
//!
//! Outcomes that callers care about (per-commit settlement, status changes,
//! forks, failures) are queued as [`SyncEvent`]s and drained with
//! [`Coordinator::take_events`].

use crate::{Branch, BranchStatus, CommitData, CommitResponse, CommitStatus, DeliveryError, SyncError};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use tandem_common::{CommitHash, ConnectionState, ProjectId, RemoteError};

/// Why a commit is being handed to the consumer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum LoadReason {
    /// Another client advanced the branch
    Update,

    /// The server merged our push with its head
    Merge,

    /// The server head moved while we were not listening
    CatchUp,
}

/// Round trip the driver must perform next
#[derive(Debug, Clone, PartialEq)]
pub enum Request {
    /// Make-commit for the head of the commit queue
    Push(CommitData),

    /// Load a commit into the consumer. `data` is `None` when only the hash
    /// is known and the commit object must be fetched first.
    Deliver {
        hash: CommitHash,
        data: Option<CommitData>,
        reason: LoadReason,
    },

    /// (Re)subscribe to the branch update stream
    Subscribe,

    /// Current server head of the branch
    FetchBranchHash,

    FindCommonAncestor { queued: CommitHash, head: CommitHash },

    /// Make-commit without a branch, used to persist forked work
    Store(CommitData),

    CreateBranch { name: String, hash: CommitHash },

    /// Move the server branch head; `old: None` forces it
    SetBranchHash {
        old: Option<CommitHash>,
        new: CommitHash,
    },
}

/// Result of the request most recently returned by the coordinator
#[derive(Debug, Clone, PartialEq)]
pub enum Response {
    Pushed(Result<CommitResponse, RemoteError>),
    Delivered(Result<(), DeliveryError>),
    Subscribed(Result<(), RemoteError>),
    BranchHash(Result<Option<CommitHash>, RemoteError>),

    /// `Err(RemoteError::NotFound)` means the queued commit never reached
    /// the server
    CommonAncestor(Result<CommitHash, RemoteError>),

    Stored(Result<CommitResponse, RemoteError>),
    BranchCreated(Result<(), RemoteError>),
    BranchHashSet(Result<CommitResponse, RemoteError>),
}

/// Observable outcome of coordinator work
#[derive(Debug, Clone, PartialEq)]
pub enum SyncEvent {
    Status(BranchStatus),

    /// Final outcome of one locally made commit
    Settled {
        hash: CommitHash,
        status: CommitStatus,
    },

    /// The branch halted; a [`ForkResolution`] is required
    Forked {
        local: CommitHash,
        origin: CommitHash,
    },

    /// The server canceled the queue; these commits must be redone
    Canceled { dropped: Vec<CommitHash> },

    ForkCreated { branch_name: String, hash: CommitHash },

    /// The commit queue drained; these worker requests may run on `head`
    WorkersReleased { requests: Vec<u64>, head: CommitHash },

    Failed(SyncError),
}

/// How to continue after a push forked
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "kind")]
pub enum ForkResolution {
    /// Drop the queued commits and follow the server branch
    Abandon,

    /// Keep the queued commits on a new server branch
    #[serde(rename_all = "camelCase")]
    Fork { branch_name: String },

    /// Overwrite the server branch with the local head
    ForcePush,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RejoinStep {
    Subscribing,
    FetchingHead,
    FindingAncestor { head: CommitHash },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Pushing { hash: CommitHash },
    Pulling { reason: LoadReason, hash: CommitHash },
    Rejoining(RejoinStep),

    /// `stored` queued commits have been persisted so far
    Resolving { resolution: ForkResolution, stored: usize },
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Halt {
    /// `hash` is the commit whose push forked; it has already settled
    Forked { hash: CommitHash },
    Error,
}

#[derive(Debug)]
pub struct Coordinator {
    branch: Branch,
    phase: Phase,
    halt: Option<Halt>,
    connected: bool,
    rejoin_pending: bool,
    events: VecDeque<SyncEvent>,
}

impl Coordinator {
    pub fn new(project_id: ProjectId, name: impl Into<String>, head: CommitHash) -> Self {
        Self {
            branch: Branch::new(project_id, name, head),
            phase: Phase::Idle,
            halt: None,
            connected: true,
            rejoin_pending: false,
            events: VecDeque::new(),
        }
    }

    pub fn branch(&self) -> &Branch {
        &self.branch
    }

    pub fn phase(&self) -> &Phase {
        &self.phase
    }

    pub fn status(&self) -> BranchStatus {
        self.branch.status()
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    /// True while the branch waits on a [`ForkResolution`]
    pub fn is_forked(&self) -> bool {
        matches!(self.halt, Some(Halt::Forked { .. }))
    }

    pub fn take_events(&mut self) -> Vec<SyncEvent> {
        self.events.drain(..).collect()
    }

    /// Accept a commit built on the local head and queue it for push
    pub fn commit_locally(&mut self, data: CommitData) -> Result<Option<Request>, SyncError> {
        let parent = data.commit_object.parent().cloned();
        if parent.as_ref() != Some(self.branch.local_hash()) {
            tracing::debug!(
                "[Coordinator] rejecting {}: parent {:?} is not local head {}",
                data.hash(),
                parent,
                self.branch.local_hash()
            );
            return Err(SyncError::StaleParent {
                expected: self.branch.local_hash().clone(),
                actual: parent,
            });
        }

        tracing::debug!(
            "[Coordinator] queued {} on {} ({} ahead)",
            data.hash(),
            self.branch.name(),
            self.branch.commit_queue().len() + 1
        );
        self.branch.set_local_hash(data.hash().clone());
        self.branch.queue_commit(data);

        let request = self.next();
        Ok(self.finish(request))
    }

    /// A new server head announced on the branch update stream
    pub fn remote_update(&mut self, data: CommitData) -> Option<Request> {
        let hash = data.hash();
        if hash == self.branch.local_hash()
            || hash == self.branch.origin_hash()
            || self.branch.is_queued(hash)
            || self.branch.has_update(hash)
        {
            tracing::debug!("[Coordinator] ignoring echo of {}", hash);
            return None;
        }

        tracing::debug!("[Coordinator] update {} queued for {}", hash, self.branch.name());
        self.branch.queue_update(data);
        let request = self.next();
        self.finish(request)
    }

    pub fn connection_changed(&mut self, state: ConnectionState) -> Option<Request> {
        tracing::debug!("[Coordinator] {} connection {:?}", self.branch.name(), state);
        let request = match state {
            ConnectionState::Connected => {
                self.connected = true;
                self.next()
            }
            ConnectionState::Reconnected => {
                self.connected = true;
                self.rejoin_pending = true;
                self.next()
            }
            ConnectionState::Disconnected | ConnectionState::Reconnecting | ConnectionState::Error => {
                self.connected = false;
                self.rejoin_pending = true;
                None
            }
        };
        self.finish(request)
    }

    /// Feed back the result of the request in flight
    pub fn handle(&mut self, response: Response) -> Option<Request> {
        let request = match (std::mem::replace(&mut self.phase, Phase::Idle), response) {
            (Phase::Pushing { hash }, Response::Pushed(result)) => self.on_pushed(hash, result),
            (Phase::Pulling { reason, hash }, Response::Delivered(result)) => {
                self.on_delivered(reason, hash, result)
            }
            (Phase::Rejoining(step), response) => self.on_rejoin(step, response),
            (Phase::Resolving { resolution, stored }, response) => {
                self.on_resolving(resolution, stored, response)
            }
            (phase, response) => {
                tracing::warn!("[Coordinator] dropping {:?} received while {:?}", response, phase);
                self.phase = phase;
                None
            }
        };
        self.finish(request)
    }

    pub fn resolve_fork(&mut self, resolution: ForkResolution) -> Result<Option<Request>, SyncError> {
        if !self.is_forked() {
            return Err(SyncError::NotForked);
        }
        if self.phase != Phase::Idle {
            return Err(SyncError::Busy);
        }

        tracing::info!(
            "[Coordinator] resolving fork of {} with {:?}",
            self.branch.name(),
            resolution
        );
        let request = match resolution {
            ForkResolution::Abandon => {
                self.reset_to_origin(CommitStatus::Canceled);
                self.refresh_head()
            }
            resolution => self.store_next(resolution, 0),
        };
        Ok(self.finish(request))
    }

    /// Clear an error halt and resume
    pub fn retry(&mut self) -> Option<Request> {
        if self.halt != Some(Halt::Error) {
            return None;
        }
        tracing::info!("[Coordinator] retrying {}", self.branch.name());
        self.halt = None;

        let request = if self.phase == Phase::Idle
            && self.connected
            && !self.rejoin_pending
            && self.branch.commit_queue().is_empty()
        {
            self.refresh_head()
        } else {
            self.next()
        };
        self.finish(request)
    }

    /// Register a worker that must wait for the commit queue to drain
    pub fn queue_worker_request(&mut self, id: u64) {
        self.branch.queue_worker_request(id);
        self.release_workers();
    }

    fn next(&mut self) -> Option<Request> {
        if self.phase != Phase::Idle || !self.connected {
            return None;
        }

        if self.rejoin_pending {
            self.rejoin_pending = false;
            tracing::info!("[Coordinator] rejoining {}", self.branch.name());
            self.phase = Phase::Rejoining(RejoinStep::Subscribing);
            return Some(Request::Subscribe);
        }

        if self.halt.is_some() {
            return None;
        }

        if !self.branch.commit_queue().is_empty() {
            return self.push_first();
        }

        while let Some(update) = self.branch.first_update() {
            let hash = update.hash().clone();
            if &hash == self.branch.local_hash() || &hash == self.branch.origin_hash() {
                self.branch.pop_update();
                continue;
            }
            let data = update.clone();
            tracing::debug!("[Coordinator] pulling {}", hash);
            self.phase = Phase::Pulling {
                reason: LoadReason::Update,
                hash: hash.clone(),
            };
            return Some(Request::Deliver {
                hash,
                data: Some(data),
                reason: LoadReason::Update,
            });
        }

        None
    }

    fn push_first(&mut self) -> Option<Request> {
        let data = self.branch.first_commit()?.clone();
        tracing::debug!("[Coordinator] pushing {}", data.hash());
        self.phase = Phase::Pushing {
            hash: data.hash().clone(),
        };
        Some(Request::Push(data))
    }

    fn on_pushed(&mut self, hash: CommitHash, result: Result<CommitResponse, RemoteError>) -> Option<Request> {
        let response = match result {
            Ok(response) => response,
            Err(e) if e.is_transport() => {
                tracing::warn!("[Coordinator] push of {} interrupted: {}", hash, e);
                self.rejoin_pending = true;
                return self.next();
            }
            Err(e) => return self.fail(SyncError::Remote(e)),
        };

        if response.hash != hash {
            return self.fail(SyncError::AckMismatch {
                expected: hash,
                actual: response.hash,
            });
        }

        let status = match response.status() {
            Ok(status) => status,
            Err(e) => return self.fail(e),
        };

        match status {
            CommitStatus::Synced => {
                self.branch.pop_commit();
                self.branch.set_origin_hash(hash.clone());
                self.branch.set_in_sync(true);
                self.settle(hash, CommitStatus::Synced);
                self.next()
            }
            CommitStatus::Merged => {
                let merge_hash = match response.merge_hash {
                    Some(merge_hash) => merge_hash,
                    None => return self.fail(SyncError::MissingMergeHash),
                };
                self.branch.pop_commit();
                self.branch.set_origin_hash(merge_hash.clone());
                self.settle(hash, CommitStatus::Merged);

                tracing::debug!("[Coordinator] loading merge {}", merge_hash);
                self.phase = Phase::Pulling {
                    reason: LoadReason::Merge,
                    hash: merge_hash.clone(),
                };
                Some(Request::Deliver {
                    hash: merge_hash,
                    data: None,
                    reason: LoadReason::Merge,
                })
            }
            CommitStatus::Forked => self.fork(hash, None),
            CommitStatus::Canceled => self.cancel_queue(),
        }
    }

    fn on_delivered(
        &mut self,
        reason: LoadReason,
        hash: CommitHash,
        result: Result<(), DeliveryError>,
    ) -> Option<Request> {
        match result {
            Ok(()) => {
                if reason == LoadReason::Update {
                    self.branch.pop_update();
                }
                self.adopt_remote_head(hash);
                self.next()
            }
            Err(DeliveryError::Remote(e)) if e.is_transport() => {
                tracing::warn!("[Coordinator] loading {} interrupted: {}", hash, e);
                self.rejoin_pending = true;
                self.next()
            }
            Err(e) => self.fail(SyncError::LoadRejected {
                hash,
                reason: e.to_string(),
            }),
        }
    }

    fn on_rejoin(&mut self, step: RejoinStep, response: Response) -> Option<Request> {
        match (step, response) {
            (RejoinStep::Subscribing, Response::Subscribed(result)) => match result {
                Ok(()) if self.halt.is_some() => {
                    tracing::info!("[Coordinator] {} resubscribed while halted", self.branch.name());
                    self.next()
                }
                Ok(()) => {
                    self.phase = Phase::Rejoining(RejoinStep::FetchingHead);
                    Some(Request::FetchBranchHash)
                }
                Err(e) => self.rejoin_failed(e),
            },
            (RejoinStep::FetchingHead, Response::BranchHash(result)) => match result {
                Ok(head) => self.reconcile(head),
                Err(e) => self.rejoin_failed(e),
            },
            (RejoinStep::FindingAncestor { head }, Response::CommonAncestor(result)) => {
                self.on_common_ancestor(head, result)
            }
            (step, response) => {
                tracing::warn!("[Coordinator] dropping {:?} received while rejoining ({:?})", response, step);
                self.phase = Phase::Rejoining(step);
                None
            }
        }
    }

    /// Compare the server head against what we hold locally
    fn reconcile(&mut self, head: Option<CommitHash>) -> Option<Request> {
        let head = match head {
            Some(head) => head,
            None => return self.fail(SyncError::BranchMissing(self.branch.name().to_string())),
        };

        let queued = match self.branch.first_commit() {
            Some(first) => first.hash().clone(),
            None => {
                let pending = self
                    .branch
                    .update_queue()
                    .iter()
                    .find(|update| update.hash() == &head)
                    .cloned();
                self.branch.clear_updates();

                if &head == self.branch.local_hash() {
                    tracing::debug!("[Coordinator] {} already at server head {}", self.branch.name(), head);
                    return self.next();
                }
                return self.catch_up(head, pending);
            }
        };

        if queued == head {
            return self.acknowledge_rejoined(queued, head);
        }

        self.phase = Phase::Rejoining(RejoinStep::FindingAncestor { head: head.clone() });
        Some(Request::FindCommonAncestor { queued, head })
    }

    fn on_common_ancestor(
        &mut self,
        head: CommitHash,
        result: Result<CommitHash, RemoteError>,
    ) -> Option<Request> {
        let queued = match self.branch.first_commit() {
            Some(first) => first.hash().clone(),
            None => return self.next(),
        };

        match result {
            Ok(ancestor) if ancestor == queued => self.acknowledge_rejoined(queued, head),
            Ok(ancestor) => {
                if ancestor == head {
                    tracing::info!("[Coordinator] server head {} moved while disconnected", head);
                } else {
                    tracing::info!("[Coordinator] {} and server head {} diverged at {}", queued, head, ancestor);
                }
                self.fork(queued, Some(head))
            }
            Err(RemoteError::NotFound(_)) => {
                tracing::info!("[Coordinator] {} never reached the server", queued);
                self.push_first()
            }
            Err(e) => self.rejoin_failed(e),
        }
    }

    /// The first queued commit is already part of the server history
    fn acknowledge_rejoined(&mut self, queued: CommitHash, head: CommitHash) -> Option<Request> {
        tracing::info!("[Coordinator] {} reached the server before the disconnect", queued);
        self.branch.pop_commit();
        self.branch.set_origin_hash(queued.clone());
        self.branch.set_in_sync(true);
        self.settle(queued.clone(), CommitStatus::Synced);

        if !self.branch.commit_queue().is_empty() || head == queued {
            return self.next();
        }
        self.catch_up(head, None)
    }

    fn catch_up(&mut self, head: CommitHash, data: Option<CommitData>) -> Option<Request> {
        tracing::info!(
            "[Coordinator] catching {} up from {} to {}",
            self.branch.name(),
            self.branch.local_hash(),
            head
        );
        self.phase = Phase::Pulling {
            reason: LoadReason::CatchUp,
            hash: head.clone(),
        };
        Some(Request::Deliver {
            hash: head,
            data,
            reason: LoadReason::CatchUp,
        })
    }

    fn rejoin_failed(&mut self, error: RemoteError) -> Option<Request> {
        if error.is_transport() {
            tracing::warn!("[Coordinator] rejoin of {} interrupted: {}", self.branch.name(), error);
            self.rejoin_pending = true;
            return self.next();
        }
        self.fail(SyncError::Remote(error))
    }

    fn on_resolving(
        &mut self,
        resolution: ForkResolution,
        stored: usize,
        response: Response,
    ) -> Option<Request> {
        match (response, resolution) {
            (Response::Stored(Ok(_)), resolution) => self.store_next(resolution, stored + 1),
            (Response::BranchCreated(Ok(())), ForkResolution::Fork { branch_name }) => {
                let hash = self.branch.local_hash().clone();
                tracing::info!("[Coordinator] forked work kept on {} at {}", branch_name, hash);
                self.events.push_back(SyncEvent::ForkCreated { branch_name, hash });
                self.reset_to_origin(CommitStatus::Forked);
                self.refresh_head()
            }
            (Response::BranchHashSet(Ok(response)), ForkResolution::ForcePush) => match response.status() {
                Ok(CommitStatus::Synced) => {
                    let local = self.branch.local_hash().clone();
                    tracing::info!("[Coordinator] force pushed {} to {}", self.branch.name(), local);
                    self.settle_queue(CommitStatus::Synced);
                    self.branch.set_origin_hash(local);
                    self.branch.set_in_sync(true);
                    self.next()
                }
                Ok(other) => self.resolution_failed(SyncError::UnexpectedStatus(other.as_str().to_string())),
                Err(e) => self.resolution_failed(e),
            },
            (Response::Stored(Err(e)), _)
            | (Response::BranchCreated(Err(e)), _)
            | (Response::BranchHashSet(Err(e)), _) => {
                if e.is_transport() {
                    self.rejoin_pending = true;
                }
                self.resolution_failed(SyncError::Remote(e))
            }
            (response, resolution) => {
                tracing::warn!("[Coordinator] dropping {:?} received while resolving", response);
                self.phase = Phase::Resolving { resolution, stored };
                None
            }
        }
    }

    /// Persist queued commits one at a time, then apply the resolution
    fn store_next(&mut self, resolution: ForkResolution, stored: usize) -> Option<Request> {
        if let Some(data) = self.branch.commit_queue().get(stored) {
            let request = Request::Store(data.without_branch());
            self.phase = Phase::Resolving { resolution, stored };
            return Some(request);
        }

        let local = self.branch.local_hash().clone();
        let request = match &resolution {
            ForkResolution::Fork { branch_name } => Request::CreateBranch {
                name: branch_name.clone(),
                hash: local,
            },
            ForkResolution::ForcePush => Request::SetBranchHash { old: None, new: local },
            ForkResolution::Abandon => {
                self.reset_to_origin(CommitStatus::Canceled);
                return self.refresh_head();
            }
        };
        self.phase = Phase::Resolving { resolution, stored };
        Some(request)
    }

    fn resolution_failed(&mut self, error: SyncError) -> Option<Request> {
        tracing::warn!("[Coordinator] fork resolution of {} failed: {}", self.branch.name(), error);
        self.events.push_back(SyncEvent::Failed(error));
        self.next()
    }

    fn fork(&mut self, hash: CommitHash, server_head: Option<CommitHash>) -> Option<Request> {
        let origin = server_head.unwrap_or_else(|| self.branch.origin_hash().clone());
        tracing::info!(
            "[Coordinator] {} forked from {} at {}",
            self.branch.name(),
            origin,
            hash
        );
        self.branch.set_in_sync(false);
        self.halt = Some(Halt::Forked { hash: hash.clone() });
        self.settle(hash, CommitStatus::Forked);
        self.events.push_back(SyncEvent::Forked {
            local: self.branch.local_hash().clone(),
            origin,
        });
        None
    }

    /// Server dropped the head of the queue; everything behind it goes too
    fn cancel_queue(&mut self) -> Option<Request> {
        let dropped: Vec<CommitHash> = self
            .branch
            .take_commit_queue()
            .into_iter()
            .map(|data| data.commit_object.id)
            .collect();
        tracing::warn!(
            "[Coordinator] server canceled {} commit(s) on {}",
            dropped.len(),
            self.branch.name()
        );

        let origin = self.branch.origin_hash().clone();
        self.branch.set_local_hash(origin);
        self.branch.set_in_sync(true);
        for hash in &dropped {
            self.settle(hash.clone(), CommitStatus::Canceled);
        }
        self.events.push_back(SyncEvent::Canceled { dropped });
        self.refresh_head()
    }

    /// Leave the forked halt, settling the queued commits as `status`
    fn reset_to_origin(&mut self, status: CommitStatus) {
        self.settle_queue(status);
        let origin = self.branch.origin_hash().clone();
        self.branch.set_local_hash(origin);
        self.branch.set_in_sync(true);
    }

    /// Drain the commit queue, settling every commit not settled at fork time
    fn settle_queue(&mut self, status: CommitStatus) {
        let forked = match self.halt.take() {
            Some(Halt::Forked { hash }) => Some(hash),
            other => {
                self.halt = other;
                None
            }
        };
        for data in self.branch.take_commit_queue() {
            if Some(data.hash()) != forked.as_ref() {
                self.settle(data.commit_object.id, status);
            }
        }
    }

    fn adopt_remote_head(&mut self, hash: CommitHash) {
        tracing::debug!("[Coordinator] {} now at server head {}", self.branch.name(), hash);
        self.branch.set_origin_hash(hash.clone());
        if self.branch.commit_queue().is_empty() {
            self.branch.set_local_hash(hash);
            self.branch.set_in_sync(true);
        } else {
            self.branch.set_in_sync(false);
        }
    }

    /// Ask for the server head so a catch-up can follow
    fn refresh_head(&mut self) -> Option<Request> {
        if !self.connected {
            self.rejoin_pending = true;
            return None;
        }
        self.phase = Phase::Rejoining(RejoinStep::FetchingHead);
        Some(Request::FetchBranchHash)
    }

    fn fail(&mut self, error: SyncError) -> Option<Request> {
        tracing::error!("[Coordinator] {} halted: {}", self.branch.name(), error);
        if !self.is_forked() {
            self.halt = Some(Halt::Error);
        }
        self.events.push_back(SyncEvent::Failed(error));
        None
    }

    fn settle(&mut self, hash: CommitHash, status: CommitStatus) {
        tracing::debug!("[Coordinator] {} settled as {}", hash, status.as_str());
        self.events.push_back(SyncEvent::Settled { hash, status });
    }

    fn release_workers(&mut self) {
        let merging = matches!(
            self.phase,
            Phase::Pulling {
                reason: LoadReason::Merge,
                ..
            }
        );
        if !self.branch.commit_queue().is_empty()
            || merging
            || self.branch.worker_request_queue().is_empty()
        {
            return;
        }
        let requests = self.branch.take_worker_requests();
        tracing::debug!("[Coordinator] releasing {} worker request(s)", requests.len());
        self.events.push_back(SyncEvent::WorkersReleased {
            requests,
            head: self.branch.local_hash().clone(),
        });
    }

    fn refresh_status(&mut self) {
        let status = if self.halt == Some(Halt::Error) {
            BranchStatus::Error
        } else if matches!(self.phase, Phase::Pulling { .. }) {
            BranchStatus::Pulling
        } else if !self.branch.commit_queue().is_empty() {
            if self.branch.in_sync() {
                BranchStatus::AheadSync
            } else {
                BranchStatus::AheadNotSync
            }
        } else {
            BranchStatus::Sync
        };

        if self.branch.set_status(status) {
            tracing::debug!("[Coordinator] {} is {:?}", self.branch.name(), status);
            self.events.push_back(SyncEvent::Status(status));
        }
    }

    fn finish(&mut self, request: Option<Request>) -> Option<Request> {
        self.release_workers();
        self.refresh_status();
        request
    }
}
