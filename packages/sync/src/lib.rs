//! # Tandem Sync
//!
//! Async drivers that put the branch coordinator and OT documents on the
//! network.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │ Connection: CONNECTED / DISCONNECTED / RECONNECTING  │
//! │             RECONNECTED / ERROR (watch channel)      │
//! └──────────────────────────────────────────────────────┘
//!            ↓                               ↓
//! ┌──────────────────────────┐   ┌──────────────────────────┐
//! │ BranchHandle             │   │ DocumentHandle           │
//! │  actor + Coordinator     │   │  session + OtDocument    │
//! │  Remote, BranchConsumer  │   │  DocumentRemote          │
//! └──────────────────────────┘   └──────────────────────────┘
//! ```
//!
//! One task per open branch and per open document. Transport faults are
//! absorbed by the tasks and repaired by the rejoin protocol when the
//! connection comes back; callers only observe status changes.

mod branch_actor;
mod config;
mod connection;
mod document_session;
mod errors;
mod remote;

pub use branch_actor::{BranchHandle, BranchInfo};
pub use config::{SyncConfig, DEFAULT_CONFIG_NAME};
pub use connection::Connection;
pub use document_session::{DocumentHandle, DocumentInfo};
pub use errors::SessionError;
pub use remote::{
    BranchConsumer, BranchUpdates, DocumentEvent, DocumentEvents, DocumentRemote, DocumentWatch, Remote,
};
