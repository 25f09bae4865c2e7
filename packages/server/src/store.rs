//! # Commit Store
//!
//! In-memory authority for projects: commit objects, branch heads and the
//! clients watching each branch.
//!
//! A push fast-forwards only when the commit expects the current head.
//! Otherwise the server merges (when a merger is installed) or reports
//! `FORKED`. A commit whose parent the server has never seen is `CANCELED`.

use std::collections::{HashMap, HashSet, VecDeque};
use tandem_branch::{Commit, CommitData, CommitResponse, CommitStatus};
use tandem_common::{ClientId, CommitHash, ProjectId, RemoteError, RemoteResult};
use tokio::sync::{mpsc, Mutex};
use tokio_stream::wrappers::UnboundedReceiverStream;

/// Builds a merge of `pushed` onto `head`, or `None` to report a fork
pub type Merger = Box<dyn Fn(&CommitData, &CommitData) -> Option<CommitData> + Send + Sync>;

#[derive(Default)]
struct Project {
    commits: HashMap<CommitHash, CommitData>,
    branches: HashMap<String, CommitHash>,
}

struct BranchWatcher {
    client_id: ClientId,
    sender: mpsc::UnboundedSender<CommitData>,
}

#[derive(Default)]
struct StoreState {
    projects: HashMap<ProjectId, Project>,
    watchers: HashMap<(ProjectId, String), Vec<BranchWatcher>>,
}

impl StoreState {
    fn project(&self, project_id: &ProjectId) -> RemoteResult<&Project> {
        self.projects
            .get(project_id)
            .ok_or_else(|| RemoteError::NotFound(project_id.to_string()))
    }

    fn project_mut(&mut self, project_id: &ProjectId) -> RemoteResult<&mut Project> {
        self.projects
            .get_mut(project_id)
            .ok_or_else(|| RemoteError::NotFound(project_id.to_string()))
    }

    /// Point a branch at `hash` and tell everyone watching it
    fn advance(&mut self, project_id: &ProjectId, branch_name: &str, hash: &CommitHash) -> RemoteResult<()> {
        let project = self.project_mut(project_id)?;
        let data = project
            .commits
            .get(hash)
            .cloned()
            .ok_or_else(|| RemoteError::NotFound(hash.to_string()))?;
        project.branches.insert(branch_name.to_string(), hash.clone());

        tracing::debug!("[CommitStore] {}/{} -> {}", project_id, branch_name, hash);
        if let Some(watchers) = self
            .watchers
            .get_mut(&(project_id.clone(), branch_name.to_string()))
        {
            // Closed receivers belong to clients that went away
            watchers.retain(|watcher| watcher.sender.send(data.clone()).is_ok());
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct CommitStore {
    state: Mutex<StoreState>,
    merger: Option<Merger>,
}

impl CommitStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A store that merges diverging pushes instead of forking them
    pub fn with_merger(merger: Merger) -> Self {
        Self {
            state: Mutex::new(StoreState::default()),
            merger: Some(merger),
        }
    }

    /// Create a project whose `branch_name` starts at `root`
    pub async fn create_project(&self, project_id: ProjectId, branch_name: &str, root: CommitData) {
        let mut state = self.state.lock().await;
        let project = state.projects.entry(project_id.clone()).or_default();
        let hash = root.hash().clone();
        project.commits.insert(hash.clone(), root);
        project.branches.insert(branch_name.to_string(), hash.clone());
        tracing::info!("[CommitStore] created {}/{} at {}", project_id, branch_name, hash);
    }

    pub async fn make_commit(&self, data: CommitData) -> RemoteResult<CommitResponse> {
        let mut state = self.state.lock().await;
        let hash = data.hash().clone();

        if !data.commit_object.is_intact() {
            return Err(RemoteError::Rejected(format!("{} does not match its content", hash)));
        }

        let project = state.project_mut(&data.project_id)?;
        let parent_known = data
            .commit_object
            .parent()
            .map_or(true, |parent| project.commits.contains_key(parent));
        if !parent_known {
            tracing::debug!("[CommitStore] canceling {}: unknown parent", hash);
            return Ok(CommitResponse::new(CommitStatus::Canceled, hash));
        }
        project
            .commits
            .entry(hash.clone())
            .or_insert_with(|| data.clone());

        let branch_name = match &data.branch_name {
            Some(branch_name) => branch_name.clone(),
            None => return Ok(CommitResponse::new(CommitStatus::Synced, hash)),
        };
        let head = project
            .branches
            .get(&branch_name)
            .cloned()
            .ok_or_else(|| RemoteError::NotFound(branch_name.clone()))?;

        if head == hash {
            // Resend of a commit that already landed
            return Ok(CommitResponse::new(CommitStatus::Synced, hash));
        }

        if data.expected_head() == Some(&head) {
            state.advance(&data.project_id, &branch_name, &hash)?;
            return Ok(CommitResponse::new(CommitStatus::Synced, hash));
        }

        let merged = match (&self.merger, project.commits.get(&head)) {
            (Some(merger), Some(head_data)) => merger(&data, head_data),
            _ => None,
        };
        match merged {
            Some(merge) => {
                let merge_hash = merge.hash().clone();
                project.commits.insert(merge_hash.clone(), merge);
                state.advance(&data.project_id, &branch_name, &merge_hash)?;
                tracing::debug!("[CommitStore] merged {} into {} as {}", hash, head, merge_hash);
                Ok(CommitResponse::merged(hash, merge_hash))
            }
            None => {
                tracing::debug!("[CommitStore] {} forked from {}", hash, head);
                Ok(CommitResponse::new(CommitStatus::Forked, hash))
            }
        }
    }

    pub async fn get_branch_hash(&self, project_id: &ProjectId, branch_name: &str) -> RemoteResult<Option<CommitHash>> {
        let state = self.state.lock().await;
        Ok(state.project(project_id)?.branches.get(branch_name).cloned())
    }

    /// Nearest commit reachable from both `a` and `b`
    pub async fn get_common_ancestor(
        &self,
        project_id: &ProjectId,
        a: &CommitHash,
        b: &CommitHash,
    ) -> RemoteResult<CommitHash> {
        let state = self.state.lock().await;
        let project = state.project(project_id)?;
        for hash in [a, b] {
            if !project.commits.contains_key(hash) {
                return Err(RemoteError::NotFound(hash.to_string()));
            }
        }

        let from_a: HashSet<&CommitHash> = ancestry(project, a).collect();
        let nearest = ancestry(project, b).find(|hash| from_a.contains(hash)).cloned();
        nearest.ok_or_else(|| RemoteError::NotFound(format!("common ancestor of {} and {}", a, b)))
    }

    pub async fn load_object(&self, project_id: &ProjectId, hash: &CommitHash) -> RemoteResult<CommitData> {
        let state = self.state.lock().await;
        state
            .project(project_id)?
            .commits
            .get(hash)
            .cloned()
            .ok_or_else(|| RemoteError::NotFound(hash.to_string()))
    }

    pub async fn create_branch(&self, project_id: &ProjectId, branch_name: &str, hash: &CommitHash) -> RemoteResult<()> {
        let mut state = self.state.lock().await;
        let project = state.project(project_id)?;
        if project.branches.contains_key(branch_name) {
            return Err(RemoteError::Rejected(format!("branch {} already exists", branch_name)));
        }
        state.advance(project_id, branch_name, hash)
    }

    pub async fn set_branch_hash(
        &self,
        project_id: &ProjectId,
        branch_name: &str,
        old: Option<&CommitHash>,
        new: &CommitHash,
    ) -> RemoteResult<CommitResponse> {
        let mut state = self.state.lock().await;
        let current = state.project(project_id)?.branches.get(branch_name).cloned();
        if let Some(old) = old {
            if current.as_ref() != Some(old) {
                return Ok(CommitResponse::new(CommitStatus::Forked, new.clone()));
            }
        }
        state.advance(project_id, branch_name, new)?;
        Ok(CommitResponse::new(CommitStatus::Synced, new.clone()))
    }

    /// Stream of new heads for `branch_name`; replaces the client's previous
    /// subscription to the same branch
    pub async fn watch_branch(
        &self,
        project_id: &ProjectId,
        branch_name: &str,
        client_id: &ClientId,
    ) -> RemoteResult<UnboundedReceiverStream<CommitData>> {
        let mut state = self.state.lock().await;
        state.project(project_id)?;

        let (sender, receiver) = mpsc::unbounded_channel();
        let watchers = state
            .watchers
            .entry((project_id.clone(), branch_name.to_string()))
            .or_default();
        watchers.retain(|watcher| &watcher.client_id != client_id);
        watchers.push(BranchWatcher {
            client_id: client_id.clone(),
            sender,
        });
        Ok(UnboundedReceiverStream::new(receiver))
    }

    /// Drop every branch subscription of a client
    pub async fn detach(&self, client_id: &ClientId) {
        let mut state = self.state.lock().await;
        for watchers in state.watchers.values_mut() {
            watchers.retain(|watcher| &watcher.client_id != client_id);
        }
    }

    pub async fn commit_count(&self, project_id: &ProjectId) -> usize {
        let state = self.state.lock().await;
        state
            .projects
            .get(project_id)
            .map_or(0, |project| project.commits.len())
    }
}

/// Breadth-first walk over `start` and its ancestors, nearest first
fn ancestry<'a>(project: &'a Project, start: &'a CommitHash) -> impl Iterator<Item = &'a CommitHash> + 'a {
    let mut queue = VecDeque::from([start]);
    let mut seen = HashSet::new();
    std::iter::from_fn(move || {
        while let Some(hash) = queue.pop_front() {
            if !seen.insert(hash) {
                continue;
            }
            if let Some(data) = project.commits.get(hash) {
                queue.extend(data.commit_object.parents.iter());
            }
            return Some(hash);
        }
        None
    })
}

/// Merger that records a two-parent commit over the pushed snapshot
pub fn snapshot_merger() -> Merger {
    Box::new(|pushed: &CommitData, head: &CommitData| {
        let commit = Commit::new(
            pushed.commit_object.root.clone(),
            vec![head.hash().clone(), pushed.hash().clone()],
            format!("merge {} into {}", pushed.hash(), head.hash()),
        )
        .with_time(pushed.commit_object.time.max(head.commit_object.time) + 1);

        let mut core_objects = head.core_objects.clone();
        core_objects.extend(pushed.core_objects.clone());
        Some(CommitData {
            project_id: pushed.project_id.clone(),
            branch_name: pushed.branch_name.clone(),
            commit_object: commit,
            core_objects,
            old_hash: None,
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    fn commit(parent: Option<&CommitHash>, message: &str) -> CommitData {
        let parents = parent.into_iter().cloned().collect();
        let commit = Commit::new("#root", parents, message).with_time(0);
        CommitData::new("project".into(), "master", commit)
    }

    async fn seeded() -> (CommitStore, CommitHash) {
        let store = CommitStore::new();
        let root = commit(None, "root");
        let hash = root.hash().clone();
        store.create_project("project".into(), "master", root).await;
        (store, hash)
    }

    #[tokio::test]
    async fn test_fast_forward_is_synced() {
        let (store, root) = seeded().await;
        let c1 = commit(Some(&root), "one");

        let response = store.make_commit(c1.clone()).await.unwrap();
        assert_eq!(response.status(), Ok(CommitStatus::Synced));
        assert_eq!(
            store.get_branch_hash(&"project".into(), "master").await.unwrap(),
            Some(c1.hash().clone())
        );

        // Resending is harmless
        let again = store.make_commit(c1.clone()).await.unwrap();
        assert_eq!(again.status(), Ok(CommitStatus::Synced));
    }

    #[tokio::test]
    async fn test_diverging_push_forks_without_merger() {
        let (store, root) = seeded().await;
        store.make_commit(commit(Some(&root), "theirs")).await.unwrap();

        let ours = commit(Some(&root), "ours");
        let response = store.make_commit(ours.clone()).await.unwrap();
        assert_eq!(response.status(), Ok(CommitStatus::Forked));
        // Stored, but the branch did not move
        assert!(store.load_object(&"project".into(), ours.hash()).await.is_ok());
    }

    #[tokio::test]
    async fn test_diverging_push_merges_with_merger() {
        let store = CommitStore::with_merger(snapshot_merger());
        let root = commit(None, "root");
        let root_hash = root.hash().clone();
        store.create_project("project".into(), "master", root).await;
        let theirs = commit(Some(&root_hash), "theirs");
        store.make_commit(theirs.clone()).await.unwrap();

        let ours = commit(Some(&root_hash), "ours");
        let response = store.make_commit(ours.clone()).await.unwrap();
        assert_eq!(response.status(), Ok(CommitStatus::Merged));

        let merge_hash = response.merge_hash.unwrap();
        let merge = store.load_object(&"project".into(), &merge_hash).await.unwrap();
        assert_eq!(merge.commit_object.parents, vec![theirs.hash().clone(), ours.hash().clone()]);
        assert_eq!(
            store.get_branch_hash(&"project".into(), "master").await.unwrap(),
            Some(merge_hash)
        );
    }

    #[tokio::test]
    async fn test_unknown_parent_is_canceled() {
        let (store, _) = seeded().await;
        let orphan = commit(Some(&CommitHash::new("#nowhere")), "orphan");
        let response = store.make_commit(orphan).await.unwrap();
        assert_eq!(response.status(), Ok(CommitStatus::Canceled));
    }

    #[tokio::test]
    async fn test_tampered_commit_is_rejected() {
        let (store, root) = seeded().await;
        let mut data = commit(Some(&root), "one");
        data.commit_object.message = "changed".to_string();
        assert!(matches!(store.make_commit(data).await, Err(RemoteError::Rejected(_))));
    }

    #[tokio::test]
    async fn test_common_ancestor() {
        let (store, root) = seeded().await;
        let project: ProjectId = "project".into();
        let c1 = commit(Some(&root), "one");
        let c2 = commit(Some(c1.hash()), "two");
        let side = commit(Some(c1.hash()), "side").without_branch();
        store.make_commit(c1.clone()).await.unwrap();
        store.make_commit(c2.clone()).await.unwrap();
        store.make_commit(side.clone()).await.unwrap();

        assert_eq!(
            store.get_common_ancestor(&project, c2.hash(), side.hash()).await,
            Ok(c1.hash().clone())
        );
        assert_eq!(
            store.get_common_ancestor(&project, c1.hash(), c2.hash()).await,
            Ok(c1.hash().clone())
        );
        assert!(matches!(
            store
                .get_common_ancestor(&project, &CommitHash::new("#missing"), c2.hash())
                .await,
            Err(RemoteError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_watchers_receive_new_heads() {
        let (store, root) = seeded().await;
        let project: ProjectId = "project".into();
        let mut updates = store
            .watch_branch(&project, "master", &"alice".into())
            .await
            .unwrap();

        let c1 = commit(Some(&root), "one");
        store.make_commit(c1.clone()).await.unwrap();
        assert_eq!(updates.next().await.map(|data| data.hash().clone()), Some(c1.hash().clone()));

        store.detach(&"alice".into()).await;
        assert_eq!(updates.next().await, None);
    }

    #[tokio::test]
    async fn test_branch_pointer_operations() {
        let (store, root) = seeded().await;
        let project: ProjectId = "project".into();
        let c1 = commit(Some(&root), "one").without_branch();
        store.make_commit(c1.clone()).await.unwrap();

        store.create_branch(&project, "feature", c1.hash()).await.unwrap();
        assert!(matches!(
            store.create_branch(&project, "feature", c1.hash()).await,
            Err(RemoteError::Rejected(_))
        ));

        let stale = store
            .set_branch_hash(&project, "master", Some(c1.hash()), c1.hash())
            .await
            .unwrap();
        assert_eq!(stale.status(), Ok(CommitStatus::Forked));

        let forced = store.set_branch_hash(&project, "master", None, c1.hash()).await.unwrap();
        assert_eq!(forced.status(), Ok(CommitStatus::Synced));
        assert_eq!(
            store.get_branch_hash(&project, "master").await.unwrap(),
            Some(c1.hash().clone())
        );
    }
}
