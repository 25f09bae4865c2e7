//! # Tandem Branch
//!
//! Commit-queue synchronization for one branch of a project.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │ commit: content-hashed Commit + CommitData  │
//! └─────────────────────────────────────────────┘
//!                     ↓
//! ┌─────────────────────────────────────────────┐
//! │ branch: local/origin heads + FIFO queues    │
//! └─────────────────────────────────────────────┘
//!                     ↓
//! ┌─────────────────────────────────────────────┐
//! │ coordinator: push / pull / rejoin / resolve │
//! │  - one request in flight per branch         │
//! │  - SYNCED / MERGED / FORKED / CANCELED      │
//! └─────────────────────────────────────────────┘
//! ```
//!
//! The coordinator never touches the network. It hands out [`Request`]s and
//! is fed [`Response`]s; `tandem-sync` runs it inside an async actor.
//!
//! ## Usage
//!
//! ```rust
//! use tandem_branch::{Commit, CommitData, CommitResponse, CommitStatus, Coordinator, Request, Response};
//! use tandem_common::CommitHash;
//!
//! let head = CommitHash::new("#h0");
//! let mut coordinator = Coordinator::new("project".into(), "master", head.clone());
//!
//! let commit = Commit::new("#root", vec![head], "rename node");
//! let data = CommitData::new("project".into(), "master", commit);
//!
//! let request = coordinator.commit_locally(data.clone()).unwrap();
//! assert_eq!(request, Some(Request::Push(data.clone())));
//!
//! let ack = CommitResponse::new(CommitStatus::Synced, data.hash().clone());
//! assert_eq!(coordinator.handle(Response::Pushed(Ok(ack))), None);
//! assert_eq!(coordinator.branch().origin_hash(), data.hash());
//! ```

mod branch;
mod commit;
mod coordinator;
mod errors;

pub use branch::{Branch, BranchStatus};
pub use commit::{Commit, CommitData, CommitResponse, CommitStatus};
pub use coordinator::{
    Coordinator, ForkResolution, LoadReason, Phase, RejoinStep, Request, Response, SyncEvent,
};
pub use errors::{DeliveryError, SyncError};
