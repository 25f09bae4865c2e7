//! # OT Client State Machine
//!
//! Tracks which local operations the server has not yet acknowledged.
//!
//! ```text
//!                local edit                     local edit (compose)
//! Synchronized ─────────────→ AwaitingConfirm ─────────────→ AwaitingWithBuffer ─┐
//!      ↑           (send)          │    ↑                          │        ↑     │
//!      └───────── server ack ──────┘    └──── server ack (send) ───┘        └─────┘
//! ```
//!
//! Remote operations are transformed against whatever is outstanding or
//! buffered before they reach the local text.
//!
//! The revision counts operations the server has applied that this client
//! has incorporated. It moves on server acks and remote operations only.

use crate::{OtError, TextOperation};

/// Operation sent to the server and not yet acknowledged
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outstanding {
    /// Per-client sequence number, stable across resends
    pub seq: u64,
    pub operation: TextOperation,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientState {
    /// No operation in flight
    Synchronized,

    /// One operation in flight
    AwaitingConfirm { outstanding: Outstanding },

    /// One operation in flight and local edits composed behind it
    AwaitingWithBuffer {
        outstanding: Outstanding,
        buffer: TextOperation,
    },
}

/// Side effects the state machine asks its owner to perform
pub trait OperationSink {
    /// Ship an operation to the server, based on `revision`
    fn send_operation(&mut self, revision: u64, outstanding: &Outstanding);

    /// Apply an operation to the local text
    fn apply_operation(&mut self, operation: &TextOperation) -> Result<(), OtError>;
}

#[derive(Debug, Clone)]
pub struct OtClient {
    revision: u64,
    next_seq: u64,
    state: ClientState,
}

impl OtClient {
    pub fn new(revision: u64) -> Self {
        Self {
            revision,
            next_seq: 1,
            state: ClientState::Synchronized,
        }
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn state(&self) -> &ClientState {
        &self.state
    }

    /// Operation currently awaiting acknowledgement
    pub fn outstanding(&self) -> Option<&Outstanding> {
        match &self.state {
            ClientState::Synchronized => None,
            ClientState::AwaitingConfirm { outstanding }
            | ClientState::AwaitingWithBuffer { outstanding, .. } => Some(outstanding),
        }
    }

    /// Local edit already applied to the local text
    pub fn apply_client(
        &mut self,
        operation: TextOperation,
        sink: &mut impl OperationSink,
    ) -> Result<(), OtError> {
        self.state = match std::mem::replace(&mut self.state, ClientState::Synchronized) {
            ClientState::Synchronized => {
                let outstanding = self.issue(operation);
                sink.send_operation(self.revision, &outstanding);
                ClientState::AwaitingConfirm { outstanding }
            }
            ClientState::AwaitingConfirm { outstanding } => ClientState::AwaitingWithBuffer {
                outstanding,
                buffer: operation,
            },
            ClientState::AwaitingWithBuffer {
                outstanding,
                buffer,
            } => match buffer.compose(&operation) {
                Ok(buffer) => ClientState::AwaitingWithBuffer {
                    outstanding,
                    buffer,
                },
                Err(e) => {
                    self.state = ClientState::AwaitingWithBuffer {
                        outstanding,
                        buffer,
                    };
                    return Err(e);
                }
            },
        };
        Ok(())
    }

    /// Operation from another client, in server order
    pub fn apply_server(
        &mut self,
        operation: &TextOperation,
        sink: &mut impl OperationSink,
    ) -> Result<(), OtError> {
        let (next, to_apply) = match &self.state {
            ClientState::Synchronized => (ClientState::Synchronized, operation.clone()),
            ClientState::AwaitingConfirm { outstanding } => {
                let (pending, to_apply) =
                    TextOperation::transform(&outstanding.operation, operation)?;
                let outstanding = Outstanding {
                    seq: outstanding.seq,
                    operation: pending,
                };
                (ClientState::AwaitingConfirm { outstanding }, to_apply)
            }
            ClientState::AwaitingWithBuffer {
                outstanding,
                buffer,
            } => {
                let (pending, through_outstanding) =
                    TextOperation::transform(&outstanding.operation, operation)?;
                let (buffer, to_apply) = TextOperation::transform(buffer, &through_outstanding)?;
                let outstanding = Outstanding {
                    seq: outstanding.seq,
                    operation: pending,
                };
                (
                    ClientState::AwaitingWithBuffer {
                        outstanding,
                        buffer,
                    },
                    to_apply,
                )
            }
        };

        sink.apply_operation(&to_apply)?;
        self.state = next;
        self.revision += 1;
        Ok(())
    }

    /// Server acknowledged the outstanding operation
    pub fn server_ack(&mut self, sink: &mut impl OperationSink) -> Result<(), OtError> {
        self.state = match std::mem::replace(&mut self.state, ClientState::Synchronized) {
            ClientState::Synchronized => return Err(OtError::UnexpectedAck),
            ClientState::AwaitingConfirm { .. } => {
                self.revision += 1;
                ClientState::Synchronized
            }
            ClientState::AwaitingWithBuffer { buffer, .. } => {
                self.revision += 1;
                let outstanding = self.issue(buffer);
                sink.send_operation(self.revision, &outstanding);
                ClientState::AwaitingConfirm { outstanding }
            }
        };
        tracing::debug!("[OtClient] ack, revision now {}", self.revision);
        Ok(())
    }

    /// Resend the outstanding operation unmodified after a reconnect
    pub fn resend(&self, sink: &mut impl OperationSink) {
        if let Some(outstanding) = self.outstanding() {
            tracing::debug!(
                "[OtClient] resending seq {} at revision {}",
                outstanding.seq,
                self.revision
            );
            sink.send_operation(self.revision, outstanding);
        }
    }

    fn issue(&mut self, operation: TextOperation) -> Outstanding {
        let seq = self.next_seq;
        self.next_seq += 1;
        Outstanding { seq, operation }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Sink that keeps a local copy of the text and records sends
    #[derive(Default)]
    struct Recorder {
        text: String,
        sent: Vec<(u64, Outstanding)>,
    }

    impl OperationSink for Recorder {
        fn send_operation(&mut self, revision: u64, outstanding: &Outstanding) {
            self.sent.push((revision, outstanding.clone()));
        }

        fn apply_operation(&mut self, operation: &TextOperation) -> Result<(), OtError> {
            self.text = operation.apply(&self.text)?;
            Ok(())
        }
    }

    fn recorder(text: &str) -> Recorder {
        Recorder {
            text: text.to_string(),
            sent: Vec::new(),
        }
    }

    #[test]
    fn test_local_edit_sends_immediately() {
        let mut client = OtClient::new(5);
        let mut sink = recorder("Xabc");

        let op = TextOperation::new().insert("X").retain(3);
        client.apply_client(op.clone(), &mut sink).unwrap();

        assert_eq!(sink.sent.len(), 1);
        assert_eq!(sink.sent[0].0, 5);
        assert_eq!(sink.sent[0].1.operation, op);
        assert!(matches!(client.state(), ClientState::AwaitingConfirm { .. }));
        assert_eq!(client.revision(), 5);
    }

    #[test]
    fn test_second_edit_is_buffered_then_composed() {
        let mut client = OtClient::new(0);
        let mut sink = recorder("");

        client
            .apply_client(TextOperation::new().insert("a"), &mut sink)
            .unwrap();
        client
            .apply_client(TextOperation::new().retain(1).insert("b"), &mut sink)
            .unwrap();
        client
            .apply_client(TextOperation::new().retain(2).insert("c"), &mut sink)
            .unwrap();

        assert_eq!(sink.sent.len(), 1);
        match client.state() {
            ClientState::AwaitingWithBuffer { buffer, .. } => {
                assert_eq!(buffer, &TextOperation::new().retain(1).insert("bc"));
            }
            other => panic!("unexpected state {:?}", other),
        }
    }

    #[test]
    fn test_ack_flushes_buffer_with_new_revision() {
        let mut client = OtClient::new(3);
        let mut sink = recorder("");

        client
            .apply_client(TextOperation::new().insert("a"), &mut sink)
            .unwrap();
        client
            .apply_client(TextOperation::new().retain(1).insert("b"), &mut sink)
            .unwrap();
        client.server_ack(&mut sink).unwrap();

        assert_eq!(client.revision(), 4);
        assert_eq!(sink.sent.len(), 2);
        assert_eq!(sink.sent[1].0, 4);
        assert_eq!(sink.sent[1].1.seq, 2);
        assert!(matches!(client.state(), ClientState::AwaitingConfirm { .. }));

        client.server_ack(&mut sink).unwrap();
        assert_eq!(client.revision(), 5);
        assert_eq!(client.state(), &ClientState::Synchronized);
    }

    #[test]
    fn test_unexpected_ack_is_rejected() {
        let mut client = OtClient::new(0);
        let mut sink = recorder("");
        assert_eq!(client.server_ack(&mut sink), Err(OtError::UnexpectedAck));
        assert_eq!(client.revision(), 0);
    }

    #[test]
    fn test_remote_op_while_synchronized_applies_directly() {
        let mut client = OtClient::new(1);
        let mut sink = recorder("abc");

        client
            .apply_server(&TextOperation::new().retain(3).insert("d"), &mut sink)
            .unwrap();

        assert_eq!(sink.text, "abcd");
        assert_eq!(client.revision(), 2);
        assert_eq!(client.state(), &ClientState::Synchronized);
    }

    #[test]
    fn test_remote_op_transforms_against_outstanding() {
        // Local text already reflects the outstanding insert
        let mut client = OtClient::new(5);
        let mut sink = recorder("abc");

        let local = TextOperation::new().insert("X").retain(3);
        sink.text = local.apply("abc").unwrap();
        client.apply_client(local, &mut sink).unwrap();

        client
            .apply_server(&TextOperation::new().retain(2).delete(1), &mut sink)
            .unwrap();

        assert_eq!(sink.text, "Xab");
        assert_eq!(client.revision(), 6);
        assert_eq!(
            client.outstanding().map(|o| o.operation.clone()),
            Some(TextOperation::new().insert("X").retain(2))
        );
    }

    #[test]
    fn test_remote_op_transforms_through_buffer() {
        let mut client = OtClient::new(0);
        let mut sink = recorder("");

        let first = TextOperation::new().retain(3).insert("1");
        let second = TextOperation::new().retain(4).insert("2");
        sink.text = second.apply(&first.apply("abc").unwrap()).unwrap();
        client.apply_client(first, &mut sink).unwrap();
        client.apply_client(second, &mut sink).unwrap();

        client
            .apply_server(&TextOperation::new().insert(">").retain(3), &mut sink)
            .unwrap();

        assert_eq!(sink.text, ">abc12");
        match client.state() {
            ClientState::AwaitingWithBuffer {
                outstanding,
                buffer,
            } => {
                assert_eq!(outstanding.operation, TextOperation::new().retain(4).insert("1"));
                assert_eq!(buffer, &TextOperation::new().retain(5).insert("2"));
            }
            other => panic!("unexpected state {:?}", other),
        }
    }

    #[test]
    fn test_failed_remote_op_leaves_state_untouched() {
        let mut client = OtClient::new(2);
        let mut sink = recorder("ab");

        client
            .apply_client(TextOperation::new().retain(2).insert("c"), &mut sink)
            .unwrap();
        let before = client.state().clone();

        let result = client.apply_server(&TextOperation::new().retain(5), &mut sink);
        assert!(result.is_err());
        assert_eq!(client.state(), &before);
        assert_eq!(client.revision(), 2);
    }

    #[test]
    fn test_resend_repeats_outstanding_verbatim() {
        let mut client = OtClient::new(7);
        let mut sink = recorder("");

        client
            .apply_client(TextOperation::new().insert("hi"), &mut sink)
            .unwrap();
        client.resend(&mut sink);

        assert_eq!(sink.sent.len(), 2);
        assert_eq!(sink.sent[0], sink.sent[1]);
    }

    #[test]
    fn test_resend_is_noop_when_synchronized() {
        let client = OtClient::new(7);
        let mut sink = recorder("");
        client.resend(&mut sink);
        assert!(sink.sent.is_empty());
    }
}
