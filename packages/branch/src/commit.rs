//! # Commits
//!
//! A commit is an immutable snapshot node. Its id is `#` followed by the
//! hex SHA-1 of the canonical JSON of every other field, so any two peers
//! building the same commit agree on its id.

use crate::SyncError;
use serde::{Deserialize, Serialize};
use sha1::{Digest, Sha1};
use std::collections::BTreeMap;
use std::str::FromStr;
use tandem_common::{CommitHash, ProjectId};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Commit {
    #[serde(rename = "_id")]
    pub id: CommitHash,

    /// Hash of the root object of the model snapshot
    pub root: String,

    /// First parent is the commit this one was built on
    pub parents: Vec<CommitHash>,

    /// Users who contributed to this commit
    #[serde(default)]
    pub updater: Vec<String>,

    /// Milliseconds since the Unix epoch
    pub time: i64,

    #[serde(default)]
    pub message: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch_name: Option<String>,
}

impl Commit {
    pub fn new(root: impl Into<String>, parents: Vec<CommitHash>, message: impl Into<String>) -> Self {
        let commit = Self {
            id: CommitHash::new(""),
            root: root.into(),
            parents,
            updater: Vec::new(),
            time: chrono::Utc::now().timestamp_millis(),
            message: message.into(),
            branch_name: None,
        };
        commit.sealed()
    }

    pub fn with_updater(mut self, user: impl Into<String>) -> Self {
        self.updater.push(user.into());
        self.sealed()
    }

    pub fn with_branch(mut self, branch_name: impl Into<String>) -> Self {
        self.branch_name = Some(branch_name.into());
        self.sealed()
    }

    pub fn with_time(mut self, time: i64) -> Self {
        self.time = time;
        self.sealed()
    }

    /// The commit this one was built on
    pub fn parent(&self) -> Option<&CommitHash> {
        self.parents.first()
    }

    /// Recompute the content hash from the current fields
    pub fn compute_id(&self) -> CommitHash {
        let canonical = serde_json::json!({
            "root": self.root,
            "parents": self.parents,
            "updater": self.updater,
            "time": self.time,
            "message": self.message,
            "branchName": self.branch_name,
        })
        .to_string();

        let digest = Sha1::digest(canonical.as_bytes());
        CommitHash::new(format!("#{}", hex::encode(digest)))
    }

    /// True if `id` matches the content
    pub fn is_intact(&self) -> bool {
        self.id == self.compute_id()
    }

    fn sealed(mut self) -> Self {
        self.id = self.compute_id();
        self
    }
}

/// Unit of exchange for a commit: the commit object plus the model objects
/// it introduced
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommitData {
    pub project_id: ProjectId,

    /// Branch to advance; `None` stores the commit without moving any branch
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch_name: Option<String>,

    pub commit_object: Commit,

    #[serde(default)]
    pub core_objects: BTreeMap<String, serde_json::Value>,

    /// Branch head the commit expects to replace (defaults to its parent)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub old_hash: Option<CommitHash>,
}

impl CommitData {
    pub fn new(project_id: ProjectId, branch_name: impl Into<String>, commit_object: Commit) -> Self {
        Self {
            project_id,
            branch_name: Some(branch_name.into()),
            commit_object,
            core_objects: BTreeMap::new(),
            old_hash: None,
        }
    }

    pub fn with_core_object(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.core_objects.insert(key.into(), value);
        self
    }

    pub fn hash(&self) -> &CommitHash {
        &self.commit_object.id
    }

    /// Head the server must currently hold for a fast-forward
    pub fn expected_head(&self) -> Option<&CommitHash> {
        self.old_hash.as_ref().or(self.commit_object.parent())
    }

    /// Same commit, stored without advancing a branch
    pub fn without_branch(&self) -> Self {
        Self {
            branch_name: None,
            old_hash: None,
            ..self.clone()
        }
    }
}

/// Outcome of pushing a commit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CommitStatus {
    /// Fast-forwarded the server branch
    Synced,

    /// Server could not fast-forward; local work needs a decision
    Forked,

    /// Server merged the commit with its head
    Merged,

    /// Dropped before reaching the branch; redo against the new head
    Canceled,
}

impl CommitStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CommitStatus::Synced => "SYNCED",
            CommitStatus::Forked => "FORKED",
            CommitStatus::Merged => "MERGED",
            CommitStatus::Canceled => "CANCELED",
        }
    }
}

impl FromStr for CommitStatus {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "SYNCED" => Ok(CommitStatus::Synced),
            "FORKED" => Ok(CommitStatus::Forked),
            "MERGED" => Ok(CommitStatus::Merged),
            "CANCELED" => Ok(CommitStatus::Canceled),
            other => Err(SyncError::UnexpectedStatus(other.to_string())),
        }
    }
}

/// Server answer to a make-commit request, as it arrives on the wire
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommitResponse {
    pub status: String,
    pub hash: CommitHash,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub merge_hash: Option<CommitHash>,
}

impl CommitResponse {
    pub fn new(status: CommitStatus, hash: CommitHash) -> Self {
        Self {
            status: status.as_str().to_string(),
            hash,
            merge_hash: None,
        }
    }

    pub fn merged(hash: CommitHash, merge_hash: CommitHash) -> Self {
        Self {
            status: CommitStatus::Merged.as_str().to_string(),
            hash,
            merge_hash: Some(merge_hash),
        }
    }

    pub fn status(&self) -> Result<CommitStatus, SyncError> {
        self.status.parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn root_commit() -> Commit {
        Commit::new("#root0", vec![], "initial").with_time(1_700_000_000_000)
    }

    #[test]
    fn test_id_is_content_hash() {
        let commit = root_commit();
        assert!(commit.id.as_str().starts_with('#'));
        assert_eq!(commit.id.as_str().len(), 41);
        assert!(commit.is_intact());
        assert_eq!(commit.id, root_commit().id);
    }

    #[test]
    fn test_any_field_changes_the_id() {
        let base = root_commit();
        assert_ne!(base.id, base.clone().with_updater("alice").id);
        assert_ne!(base.id, base.clone().with_branch("master").id);
        assert_ne!(base.id, base.clone().with_time(1).id);

        let mut tampered = base.clone();
        tampered.message = "edited".to_string();
        assert!(!tampered.is_intact());
    }

    #[test]
    fn test_commit_wire_shape() {
        let commit = root_commit().with_updater("alice");
        let json = serde_json::to_value(&commit).unwrap();

        assert_eq!(json["_id"], commit.id.as_str());
        assert_eq!(json["root"], "#root0");
        assert_eq!(json["updater"][0], "alice");
        assert!(json.get("branchName").is_none());

        let back: Commit = serde_json::from_value(json).unwrap();
        assert_eq!(back, commit);
        assert!(back.is_intact());
    }

    #[test]
    fn test_commit_data_expected_head() {
        let parent = root_commit();
        let child = Commit::new("#root1", vec![parent.id.clone()], "child");
        let mut data = CommitData::new("project".into(), "master", child);

        assert_eq!(data.expected_head(), Some(&parent.id));
        data.old_hash = Some(CommitHash::new("#other"));
        assert_eq!(data.expected_head(), Some(&CommitHash::new("#other")));

        let stored = data.without_branch();
        assert_eq!(stored.branch_name, None);
        assert_eq!(stored.hash(), data.hash());
    }

    #[test]
    fn test_status_parsing() {
        let response = CommitResponse::new(CommitStatus::Forked, CommitHash::new("#a"));
        assert_eq!(response.status(), Ok(CommitStatus::Forked));

        let odd = CommitResponse {
            status: "REBASED".to_string(),
            hash: CommitHash::new("#a"),
            merge_hash: None,
        };
        assert_eq!(
            odd.status(),
            Err(SyncError::UnexpectedStatus("REBASED".to_string()))
        );
    }
}
