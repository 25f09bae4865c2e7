//! # Tandem OT
//!
//! Operational transformation for short collaboratively edited text fields.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │ operation: retain / insert / delete algebra │
//! │  - apply, invert, compose, transform        │
//! └─────────────────────────────────────────────┘
//!            ↓                        ↓
//! ┌──────────────────────┐  ┌──────────────────────┐
//! │ client: 3-state OT   │  │ server: history +    │
//! │ machine per document │  │ transform-on-receive │
//! └──────────────────────┘  └──────────────────────┘
//!            ↓
//! ┌──────────────────────┐
//! │ document: content +  │
//! │ outbox + listeners   │
//! └──────────────────────┘
//! ```
//!
//! Nothing in this crate performs IO. Outgoing operations collect in the
//! document outbox; the async session in `tandem-sync` ships them.
//!
//! ## Usage
//!
//! ```rust
//! use tandem_ot::{OtDocument, TextOperation};
//!
//! let mut doc = OtDocument::new("name".into(), "client-1".into(), "abc", 5);
//! doc.apply_local_edit(TextOperation::new().insert("X").retain(3)).unwrap();
//! assert_eq!(doc.content(), "Xabc");
//!
//! let outgoing = doc.take_outgoing();
//! assert_eq!(outgoing[0].revision, 5);
//! ```

mod client;
mod document;
mod errors;
mod message;
mod operation;
mod server;

pub use client::{ClientState, OperationSink, OtClient, Outstanding};
pub use document::{ContentListener, OtDocument};
pub use errors::OtError;
pub use message::{AppliedOperation, OperationMessage};
pub use operation::{Op, TextOperation};
pub use server::{OtServer, Received};
