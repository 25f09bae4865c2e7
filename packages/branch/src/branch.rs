//! # Branch State
//!
//! Per (project, branch) bookkeeping: the local and server heads, commits
//! waiting to be pushed, remote updates waiting to be loaded, and worker
//! requests waiting for the commit queue to drain.
//!
//! The queues are FIFO. Only the coordinator mutates a branch; everyone else
//! gets `&Branch`.

use crate::CommitData;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use tandem_common::{CommitHash, ProjectId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BranchStatus {
    /// Local head equals the server head
    Sync,

    /// Local commits queued, last push fast-forwarded
    AheadSync,

    /// Local commits queued, server diverged
    AheadNotSync,

    /// Loading a remote commit
    Pulling,

    /// Halted on a protocol error or a rejected load
    Error,
}

#[derive(Debug, Clone)]
pub struct Branch {
    project_id: ProjectId,
    name: String,

    /// Most recent commit accepted locally (acknowledged or queued)
    local_hash: CommitHash,

    /// Last head confirmed by the server
    origin_hash: CommitHash,

    in_sync: bool,
    status: BranchStatus,

    commit_queue: VecDeque<CommitData>,
    update_queue: VecDeque<CommitData>,
    worker_request_queue: VecDeque<u64>,
}

impl Branch {
    pub fn new(project_id: ProjectId, name: impl Into<String>, head: CommitHash) -> Self {
        Self {
            project_id,
            name: name.into(),
            local_hash: head.clone(),
            origin_hash: head,
            in_sync: true,
            status: BranchStatus::Sync,
            commit_queue: VecDeque::new(),
            update_queue: VecDeque::new(),
            worker_request_queue: VecDeque::new(),
        }
    }

    pub fn project_id(&self) -> &ProjectId {
        &self.project_id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn local_hash(&self) -> &CommitHash {
        &self.local_hash
    }

    pub fn origin_hash(&self) -> &CommitHash {
        &self.origin_hash
    }

    pub fn in_sync(&self) -> bool {
        self.in_sync
    }

    pub fn status(&self) -> BranchStatus {
        self.status
    }

    pub fn set_local_hash(&mut self, hash: CommitHash) {
        self.local_hash = hash;
    }

    pub fn set_origin_hash(&mut self, hash: CommitHash) {
        self.origin_hash = hash;
    }

    pub fn set_in_sync(&mut self, in_sync: bool) {
        self.in_sync = in_sync;
    }

    /// Returns true if the status changed
    pub fn set_status(&mut self, status: BranchStatus) -> bool {
        let changed = self.status != status;
        self.status = status;
        changed
    }

    // Commit queue

    pub fn queue_commit(&mut self, data: CommitData) {
        self.commit_queue.push_back(data);
    }

    pub fn first_commit(&self) -> Option<&CommitData> {
        self.commit_queue.front()
    }

    pub fn pop_commit(&mut self) -> Option<CommitData> {
        self.commit_queue.pop_front()
    }

    pub fn take_commit_queue(&mut self) -> Vec<CommitData> {
        self.commit_queue.drain(..).collect()
    }

    pub fn commit_queue(&self) -> &VecDeque<CommitData> {
        &self.commit_queue
    }

    pub fn is_queued(&self, hash: &CommitHash) -> bool {
        self.commit_queue.iter().any(|data| data.hash() == hash)
    }

    // Update queue

    pub fn queue_update(&mut self, data: CommitData) {
        self.update_queue.push_back(data);
    }

    pub fn first_update(&self) -> Option<&CommitData> {
        self.update_queue.front()
    }

    pub fn pop_update(&mut self) -> Option<CommitData> {
        self.update_queue.pop_front()
    }

    pub fn clear_updates(&mut self) -> usize {
        let dropped = self.update_queue.len();
        self.update_queue.clear();
        dropped
    }

    pub fn update_queue(&self) -> &VecDeque<CommitData> {
        &self.update_queue
    }

    pub fn has_update(&self, hash: &CommitHash) -> bool {
        self.update_queue.iter().any(|data| data.hash() == hash)
    }

    // Worker requests

    pub fn queue_worker_request(&mut self, id: u64) {
        self.worker_request_queue.push_back(id);
    }

    pub fn take_worker_requests(&mut self) -> Vec<u64> {
        self.worker_request_queue.drain(..).collect()
    }

    pub fn worker_request_queue(&self) -> &VecDeque<u64> {
        &self.worker_request_queue
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Commit;

    fn commit_on(parent: &CommitHash, message: &str) -> CommitData {
        let commit = Commit::new("#r", vec![parent.clone()], message);
        CommitData::new("p".into(), "master", commit)
    }

    #[test]
    fn test_new_branch_is_in_sync() {
        let branch = Branch::new("p".into(), "master", CommitHash::new("#h0"));
        assert_eq!(branch.local_hash(), branch.origin_hash());
        assert!(branch.in_sync());
        assert_eq!(branch.status(), BranchStatus::Sync);
        assert!(branch.commit_queue().is_empty());
    }

    #[test]
    fn test_commit_queue_is_fifo() {
        let head = CommitHash::new("#h0");
        let mut branch = Branch::new("p".into(), "master", head.clone());
        let first = commit_on(&head, "one");
        let second = commit_on(first.hash(), "two");

        branch.queue_commit(first.clone());
        branch.queue_commit(second.clone());

        assert!(branch.is_queued(second.hash()));
        assert_eq!(branch.first_commit(), Some(&first));
        assert_eq!(branch.pop_commit(), Some(first));
        assert_eq!(branch.pop_commit(), Some(second));
        assert_eq!(branch.pop_commit(), None);
    }

    #[test]
    fn test_status_change_reporting() {
        let mut branch = Branch::new("p".into(), "master", CommitHash::new("#h0"));
        assert!(!branch.set_status(BranchStatus::Sync));
        assert!(branch.set_status(BranchStatus::Pulling));
        assert_eq!(branch.status(), BranchStatus::Pulling);
    }

    #[test]
    fn test_worker_requests_drain_in_order() {
        let mut branch = Branch::new("p".into(), "master", CommitHash::new("#h0"));
        branch.queue_worker_request(3);
        branch.queue_worker_request(1);
        assert_eq!(branch.take_worker_requests(), vec![3, 1]);
        assert!(branch.worker_request_queue().is_empty());
    }
}
