//! Wire messages exchanged between OT clients and the server

use crate::TextOperation;
use serde::{Deserialize, Serialize};
use tandem_common::ClientId;

/// Operation sent by a client, based on `revision`.
///
/// `(client_id, seq)` identifies the operation across resends.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationMessage {
    pub client_id: ClientId,
    pub seq: u64,
    pub revision: u64,
    pub operation: TextOperation,
}

/// Operation as recorded in the server history.
///
/// `revision` is the document revision this operation produced (the first
/// operation ever applied produces revision 1).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppliedOperation {
    pub revision: u64,
    pub client_id: ClientId,
    pub seq: u64,
    pub operation: TextOperation,
}
