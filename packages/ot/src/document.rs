//! # OT Document
//!
//! One collaboratively edited text field on one client: the rendered text,
//! the OT client state machine driving it, and the operations waiting to be
//! shipped.
//!
//! The text is only ever changed through the state machine's
//! `apply_operation` callback (or a local edit), and every change fires the
//! registered content listeners.

use crate::{AppliedOperation, OperationMessage, OperationSink, OtClient, OtError, Outstanding, TextOperation};
use std::collections::VecDeque;
use tandem_common::{ClientId, DocumentId};

/// Callback fired with the new text after every change
pub type ContentListener = Box<dyn FnMut(&str) + Send>;

pub struct OtDocument {
    id: DocumentId,
    client_id: ClientId,
    content: String,
    client: OtClient,
    outbox: VecDeque<OperationMessage>,
    listeners: Vec<ContentListener>,
}

impl std::fmt::Debug for OtDocument {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OtDocument")
            .field("id", &self.id)
            .field("client_id", &self.client_id)
            .field("content", &self.content)
            .field("client", &self.client)
            .field("outbox", &self.outbox)
            .field("listeners", &self.listeners.len())
            .finish()
    }
}

struct DocumentSink<'a> {
    client_id: &'a ClientId,
    content: &'a mut String,
    outbox: &'a mut VecDeque<OperationMessage>,
    changed: bool,
}

impl OperationSink for DocumentSink<'_> {
    fn send_operation(&mut self, revision: u64, outstanding: &Outstanding) {
        self.outbox.push_back(OperationMessage {
            client_id: self.client_id.clone(),
            seq: outstanding.seq,
            revision,
            operation: outstanding.operation.clone(),
        });
    }

    fn apply_operation(&mut self, operation: &TextOperation) -> Result<(), OtError> {
        *self.content = operation.apply(self.content)?;
        self.changed = true;
        Ok(())
    }
}

impl OtDocument {
    pub fn new(id: DocumentId, client_id: ClientId, content: impl Into<String>, revision: u64) -> Self {
        Self {
            id,
            client_id,
            content: content.into(),
            client: OtClient::new(revision),
            outbox: VecDeque::new(),
            listeners: Vec::new(),
        }
    }

    pub fn id(&self) -> &DocumentId {
        &self.id
    }

    pub fn client_id(&self) -> &ClientId {
        &self.client_id
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn revision(&self) -> u64 {
        self.client.revision()
    }

    pub fn client(&self) -> &OtClient {
        &self.client
    }

    pub fn on_content_changed(&mut self, listener: impl FnMut(&str) + Send + 'static) {
        self.listeners.push(Box::new(listener));
    }

    /// Apply an edit made on this client
    pub fn apply_local_edit(&mut self, operation: TextOperation) -> Result<(), OtError> {
        let content = operation.apply(&self.content)?;

        let mut sink = DocumentSink {
            client_id: &self.client_id,
            content: &mut self.content,
            outbox: &mut self.outbox,
            changed: false,
        };
        self.client.apply_client(operation, &mut sink)?;

        self.content = content;
        self.notify();
        Ok(())
    }

    /// Apply an operation another client made, as ordered by the server
    pub fn apply_remote(&mut self, operation: &TextOperation) -> Result<(), OtError> {
        let mut sink = DocumentSink {
            client_id: &self.client_id,
            content: &mut self.content,
            outbox: &mut self.outbox,
            changed: false,
        };
        self.client.apply_server(operation, &mut sink)?;

        if sink.changed {
            self.notify();
        }
        Ok(())
    }

    pub fn server_ack(&mut self) -> Result<(), OtError> {
        let mut sink = DocumentSink {
            client_id: &self.client_id,
            content: &mut self.content,
            outbox: &mut self.outbox,
            changed: false,
        };
        self.client.server_ack(&mut sink)
    }

    /// True if `seq` is the operation this client is waiting on
    pub fn is_outstanding(&self, seq: u64) -> bool {
        self.client.outstanding().map(|o| o.seq) == Some(seq)
    }

    /// Process operations missed while disconnected, in server order.
    ///
    /// Our own outstanding operation among them counts as its ack.
    pub fn catch_up(&mut self, missed: &[AppliedOperation]) -> Result<(), OtError> {
        for applied in missed {
            if applied.revision <= self.revision() {
                continue;
            }
            if applied.client_id == self.client_id && self.is_outstanding(applied.seq) {
                self.server_ack()?;
            } else {
                self.apply_remote(&applied.operation)?;
            }
        }
        Ok(())
    }

    /// Queue the outstanding operation again, unmodified
    pub fn resend(&mut self) {
        let mut sink = DocumentSink {
            client_id: &self.client_id,
            content: &mut self.content,
            outbox: &mut self.outbox,
            changed: false,
        };
        self.client.resend(&mut sink);
    }

    /// Drain operations waiting to be sent
    pub fn take_outgoing(&mut self) -> Vec<OperationMessage> {
        self.outbox.drain(..).collect()
    }

    fn notify(&mut self) {
        for listener in &mut self.listeners {
            listener(&self.content);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    fn document(content: &str, revision: u64) -> OtDocument {
        OtDocument::new("doc".into(), "me".into(), content, revision)
    }

    #[test]
    fn test_local_edit_updates_content_and_outbox() {
        let mut doc = document("abc", 5);
        doc.apply_local_edit(TextOperation::new().insert("X").retain(3))
            .unwrap();

        assert_eq!(doc.content(), "Xabc");
        let outgoing = doc.take_outgoing();
        assert_eq!(outgoing.len(), 1);
        assert_eq!(outgoing[0].revision, 5);
        assert_eq!(outgoing[0].seq, 1);
        assert_eq!(outgoing[0].client_id, ClientId::from("me"));
        assert!(doc.take_outgoing().is_empty());
    }

    #[test]
    fn test_local_edit_with_wrong_length_is_rejected_whole() {
        let mut doc = document("abc", 0);
        let result = doc.apply_local_edit(TextOperation::new().retain(10));

        assert!(matches!(result, Err(OtError::BaseLengthMismatch { .. })));
        assert_eq!(doc.content(), "abc");
        assert!(doc.take_outgoing().is_empty());
    }

    #[test]
    fn test_listeners_see_every_change() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut doc = document("abc", 0);
        let sink = seen.clone();
        doc.on_content_changed(move |text| sink.lock().unwrap().push(text.to_string()));

        doc.apply_local_edit(TextOperation::new().retain(3).insert("d"))
            .unwrap();
        doc.apply_remote(&TextOperation::new().delete(1).retain(2))
            .unwrap();

        assert_eq!(*seen.lock().unwrap(), vec!["abcd".to_string(), "bcd".to_string()]);
    }

    #[test]
    fn test_catch_up_treats_own_operation_as_ack() {
        let mut doc = document("abc", 2);
        doc.apply_local_edit(TextOperation::new().retain(3).insert("!"))
            .unwrap();
        let sent = doc.take_outgoing().remove(0);

        let missed = vec![
            AppliedOperation {
                revision: 3,
                client_id: "other".into(),
                seq: 9,
                operation: TextOperation::new().insert(">").retain(3),
            },
            AppliedOperation {
                revision: 4,
                client_id: "me".into(),
                seq: sent.seq,
                operation: TextOperation::new().retain(4).insert("!"),
            },
        ];
        doc.catch_up(&missed).unwrap();

        assert_eq!(doc.content(), ">abc!");
        assert_eq!(doc.revision(), 4);
        doc.resend();
        assert!(doc.take_outgoing().is_empty());
    }

    #[test]
    fn test_catch_up_without_own_operation_keeps_it_outstanding() {
        let mut doc = document("abc", 2);
        doc.apply_local_edit(TextOperation::new().retain(3).insert("!"))
            .unwrap();
        let sent = doc.take_outgoing().remove(0);

        doc.catch_up(&[]).unwrap();
        doc.resend();

        let resent = doc.take_outgoing();
        assert_eq!(resent, vec![sent]);
    }
}
