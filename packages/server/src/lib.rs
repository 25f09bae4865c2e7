//! # Tandem Server
//!
//! In-memory server for branch sync and OT text fields, plus per-client
//! links that implement the sync crate's remote traits over it.
//!
//! ```text
//!  client A ── ServerLink ─┐
//!                          ├── MemoryServer ── CommitStore    (branches, commits)
//!  client B ── ServerLink ─┘                └─ DocumentRooms  (OT servers, reaper)
//! ```
//!
//! Links can drop a request or its answer on demand, which is how the
//! disconnect scenarios are exercised end to end.

mod consumer;
mod link;
mod rooms;
mod store;

pub use consumer::RecordingConsumer;
pub use link::{Fault, MemoryServer, ServerLink};
pub use rooms::{spawn_reaper, DocumentRooms};
pub use store::{snapshot_merger, CommitStore, Merger};
