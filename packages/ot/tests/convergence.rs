//! Two clients editing one field through the server history

use tandem_ot::{OperationMessage, OtDocument, OtServer, Received, TextOperation};

/// Deliver every queued client operation to the server and fan the result
/// back out, the way the transport would.
fn pump(server: &mut OtServer, clients: &mut [&mut OtDocument]) {
    loop {
        let mut delivered = false;
        for i in 0..clients.len() {
            for message in clients[i].take_outgoing() {
                delivered = true;
                let sender = message.client_id.clone();
                match server.receive(message).unwrap() {
                    Received::Applied(applied) => {
                        for client in clients.iter_mut() {
                            if client.client_id() == &sender {
                                client.server_ack().unwrap();
                            } else {
                                client.apply_remote(&applied.operation).unwrap();
                            }
                        }
                    }
                    Received::Duplicate { .. } => {}
                }
            }
        }
        if !delivered {
            break;
        }
    }
}

/// Server holding "abc" after five earlier edits
fn server_at_revision_five() -> OtServer {
    let mut server = OtServer::new("");
    let edits = [
        TextOperation::new().insert("a"),
        TextOperation::new().retain(1).insert("b"),
        TextOperation::new().retain(2).insert("c"),
        TextOperation::new().retain(3).insert("d"),
        TextOperation::new().retain(3).delete(1),
    ];
    for (revision, operation) in edits.into_iter().enumerate() {
        let message = OperationMessage {
            client_id: "seed".into(),
            seq: revision as u64 + 1,
            revision: revision as u64,
            operation,
        };
        assert!(matches!(server.receive(message).unwrap(), Received::Applied(_)));
    }
    server
}

#[test]
fn test_concurrent_insert_and_delete_converge() {
    let mut server = server_at_revision_five();
    assert_eq!((server.content(), server.revision()), ("abc", 5));

    let mut a = OtDocument::new("name".into(), "a".into(), "abc", 5);
    let mut b = OtDocument::new("name".into(), "b".into(), "abc", 5);

    a.apply_local_edit(TextOperation::new().insert("X").retain(3))
        .unwrap();
    b.apply_local_edit(TextOperation::new().retain(2).delete(1))
        .unwrap();

    pump(&mut server, &mut [&mut a, &mut b]);

    assert_eq!(server.content(), "Xab");
    assert_eq!(a.content(), "Xab");
    assert_eq!(b.content(), "Xab");
    assert_eq!(server.revision(), 7);
    assert_eq!(a.revision(), 7);
    assert_eq!(b.revision(), 7);
}

#[test]
fn test_buffered_edits_converge() {
    let mut server = OtServer::new("");
    let mut a = OtDocument::new("desc".into(), "a".into(), "", 0);
    let mut b = OtDocument::new("desc".into(), "b".into(), "", 0);

    a.apply_local_edit(TextOperation::new().insert("hello")).unwrap();
    a.apply_local_edit(TextOperation::new().retain(5).insert(" world"))
        .unwrap();
    b.apply_local_edit(TextOperation::new().insert("> ")).unwrap();
    b.apply_local_edit(TextOperation::new().retain(2).insert("quote"))
        .unwrap();

    pump(&mut server, &mut [&mut a, &mut b]);

    assert_eq!(a.content(), server.content());
    assert_eq!(b.content(), server.content());
    assert_eq!(server.content(), "> quotehello world");
    assert_eq!(a.revision(), server.revision());
    assert_eq!(b.revision(), server.revision());
}
