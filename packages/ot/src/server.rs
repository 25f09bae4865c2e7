//! # OT Server History
//!
//! Authoritative text and operation history for one document. Operations
//! based on an old revision are transformed against everything applied
//! since, then appended.

use crate::{AppliedOperation, OperationMessage, OtError, TextOperation};
use std::collections::HashMap;
use tandem_common::ClientId;

/// Outcome of receiving an operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Received {
    /// Newly applied; acknowledge to the sender and broadcast to the rest
    Applied(AppliedOperation),

    /// Resend of an operation that was already applied at `revision`
    Duplicate { seq: u64, revision: u64 },
}

#[derive(Debug, Clone, Default)]
pub struct OtServer {
    content: String,
    history: Vec<AppliedOperation>,

    /// Highest sequence number applied per client
    applied_seqs: HashMap<ClientId, u64>,
}

impl OtServer {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            history: Vec::new(),
            applied_seqs: HashMap::new(),
        }
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn revision(&self) -> u64 {
        self.history.len() as u64
    }

    pub fn receive(&mut self, message: OperationMessage) -> Result<Received, OtError> {
        if let Some(&last) = self.applied_seqs.get(&message.client_id) {
            if message.seq <= last {
                let revision = self
                    .history
                    .iter()
                    .find(|applied| applied.client_id == message.client_id && applied.seq == message.seq)
                    .map(|applied| applied.revision)
                    .unwrap_or_else(|| self.revision());
                tracing::debug!(
                    "[OtServer] duplicate seq {} from {}, already at revision {}",
                    message.seq,
                    message.client_id,
                    revision
                );
                return Ok(Received::Duplicate {
                    seq: message.seq,
                    revision,
                });
            }
        }

        let concurrent = self.since(message.revision)?;
        let mut operation = message.operation;
        for applied in concurrent {
            operation = TextOperation::transform(&operation, &applied.operation)?.0;
        }

        self.content = operation.apply(&self.content)?;

        let applied = AppliedOperation {
            revision: self.revision() + 1,
            client_id: message.client_id.clone(),
            seq: message.seq,
            operation,
        };
        self.history.push(applied.clone());
        self.applied_seqs.insert(message.client_id, message.seq);

        Ok(Received::Applied(applied))
    }

    /// Operations applied after `revision`
    pub fn since(&self, revision: u64) -> Result<&[AppliedOperation], OtError> {
        let current = self.revision();
        if revision > current {
            return Err(OtError::RevisionAhead {
                requested: revision,
                current,
            });
        }
        Ok(&self.history[revision as usize..])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(client: &str, seq: u64, revision: u64, operation: TextOperation) -> OperationMessage {
        OperationMessage {
            client_id: client.into(),
            seq,
            revision,
            operation,
        }
    }

    #[test]
    fn test_operation_on_current_revision_applies_directly() {
        let mut server = OtServer::new("abc");
        let received = server
            .receive(message("a", 1, 0, TextOperation::new().insert("X").retain(3)))
            .unwrap();

        assert!(matches!(received, Received::Applied(ref op) if op.revision == 1));
        assert_eq!(server.content(), "Xabc");
        assert_eq!(server.revision(), 1);
    }

    #[test]
    fn test_stale_operation_is_transformed() {
        let mut server = OtServer::new("abc");
        server
            .receive(message("a", 1, 0, TextOperation::new().insert("X").retain(3)))
            .unwrap();
        let received = server
            .receive(message("b", 1, 0, TextOperation::new().retain(2).delete(1)))
            .unwrap();

        match received {
            Received::Applied(applied) => {
                assert_eq!(applied.revision, 2);
                assert_eq!(applied.operation, TextOperation::new().retain(3).delete(1));
            }
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(server.content(), "Xab");
    }

    #[test]
    fn test_resend_is_not_applied_twice() {
        let mut server = OtServer::new("");
        let op = message("a", 1, 0, TextOperation::new().insert("hi"));
        server.receive(op.clone()).unwrap();

        let again = server.receive(op).unwrap();
        assert_eq!(again, Received::Duplicate { seq: 1, revision: 1 });
        assert_eq!(server.content(), "hi");
        assert_eq!(server.revision(), 1);
    }

    #[test]
    fn test_revision_from_the_future_is_rejected() {
        let mut server = OtServer::new("");
        let result = server.receive(message("a", 1, 3, TextOperation::new().insert("x")));
        assert_eq!(
            result,
            Err(OtError::RevisionAhead {
                requested: 3,
                current: 0
            })
        );
    }

    #[test]
    fn test_since_returns_missed_history() {
        let mut server = OtServer::new("");
        server
            .receive(message("a", 1, 0, TextOperation::new().insert("a")))
            .unwrap();
        server
            .receive(message("a", 2, 1, TextOperation::new().retain(1).insert("b")))
            .unwrap();

        let missed = server.since(1).unwrap();
        assert_eq!(missed.len(), 1);
        assert_eq!(missed[0].revision, 2);
        assert!(server.since(2).unwrap().is_empty());
    }
}
