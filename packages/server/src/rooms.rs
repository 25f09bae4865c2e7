//! # Document Rooms
//!
//! Server side of OT-backed text fields. Each room holds the authoritative
//! [`OtServer`] for one document plus the clients watching it. Rooms that
//! see no operation or watch for longer than the inactivity timeout are
//! closed by the reaper and their watchers told so.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tandem_common::{ClientId, DocumentId, RemoteError, RemoteResult};
use tandem_ot::{OperationMessage, OtServer, Received};
use tandem_sync::{DocumentEvent, DocumentWatch};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_stream::wrappers::UnboundedReceiverStream;

struct DocumentWatcher {
    client_id: ClientId,
    sender: mpsc::UnboundedSender<DocumentEvent>,
}

struct Room {
    server: OtServer,
    watchers: Vec<DocumentWatcher>,
    last_activity: Instant,
}

impl Room {
    fn new(content: String) -> Self {
        Self {
            server: OtServer::new(content),
            watchers: Vec::new(),
            last_activity: Instant::now(),
        }
    }

    /// Send to matching watchers, forgetting the ones that hung up
    fn notify(&mut self, event: &DocumentEvent, to: impl Fn(&ClientId) -> bool) {
        self.watchers.retain(|watcher| {
            if !to(&watcher.client_id) {
                return true;
            }
            watcher.sender.send(event.clone()).is_ok()
        });
    }
}

pub struct DocumentRooms {
    rooms: Mutex<HashMap<DocumentId, Room>>,
    inactivity_timeout: Duration,
}

impl DocumentRooms {
    pub fn new(inactivity_timeout: Duration) -> Self {
        Self {
            rooms: Mutex::new(HashMap::new()),
            inactivity_timeout,
        }
    }

    /// Create a room with initial text; no-op if it already exists
    pub async fn open(&self, document_id: DocumentId, content: impl Into<String>) {
        let mut rooms = self.rooms.lock().await;
        rooms
            .entry(document_id)
            .or_insert_with(|| Room::new(content.into()));
    }

    pub async fn watch(
        &self,
        document_id: &DocumentId,
        client_id: &ClientId,
        since: Option<u64>,
    ) -> RemoteResult<DocumentWatch> {
        let mut rooms = self.rooms.lock().await;
        let room = match since {
            // Rejoining a room that has been closed in the meantime
            Some(_) => rooms
                .get_mut(document_id)
                .ok_or_else(|| RemoteError::NotFound(document_id.to_string()))?,
            None => rooms
                .entry(document_id.clone())
                .or_insert_with(|| Room::new(String::new())),
        };

        let missed = match since {
            Some(revision) => room
                .server
                .since(revision)
                .map_err(|e| RemoteError::Rejected(e.to_string()))?
                .to_vec(),
            None => Vec::new(),
        };

        let (sender, receiver) = mpsc::unbounded_channel();
        room.watchers.retain(|watcher| &watcher.client_id != client_id);
        room.watchers.push(DocumentWatcher {
            client_id: client_id.clone(),
            sender,
        });
        room.last_activity = Instant::now();

        tracing::debug!(
            "[DocumentRooms] {} watching {} at revision {} ({} missed)",
            client_id,
            document_id,
            room.server.revision(),
            missed.len()
        );
        Ok(DocumentWatch {
            revision: room.server.revision(),
            content: room.server.content().to_string(),
            missed,
            events: Box::pin(UnboundedReceiverStream::new(receiver)),
        })
    }

    /// Apply an operation, acknowledge it to its sender and broadcast it to
    /// everyone else
    pub async fn receive(&self, document_id: &DocumentId, message: OperationMessage) -> RemoteResult<()> {
        let mut rooms = self.rooms.lock().await;
        let room = rooms
            .get_mut(document_id)
            .ok_or_else(|| RemoteError::NotFound(document_id.to_string()))?;
        room.last_activity = Instant::now();

        let sender = message.client_id.clone();
        match room
            .server
            .receive(message)
            .map_err(|e| RemoteError::Rejected(e.to_string()))?
        {
            Received::Applied(applied) => {
                let ack = DocumentEvent::Ack {
                    seq: applied.seq,
                    revision: applied.revision,
                };
                room.notify(&ack, |client| client == &sender);
                room.notify(&DocumentEvent::Operation(applied), |client| client != &sender);
            }
            Received::Duplicate { seq, revision } => {
                room.notify(&DocumentEvent::Ack { seq, revision }, |client| client == &sender);
            }
        }
        Ok(())
    }

    pub async fn unwatch(&self, document_id: &DocumentId, client_id: &ClientId) {
        let mut rooms = self.rooms.lock().await;
        if let Some(room) = rooms.get_mut(document_id) {
            room.watchers.retain(|watcher| &watcher.client_id != client_id);
        }
    }

    /// Drop every watch of a client that lost its connection
    pub async fn detach(&self, client_id: &ClientId) {
        let mut rooms = self.rooms.lock().await;
        for room in rooms.values_mut() {
            room.watchers.retain(|watcher| &watcher.client_id != client_id);
        }
    }

    pub async fn content(&self, document_id: &DocumentId) -> Option<(String, u64)> {
        let rooms = self.rooms.lock().await;
        rooms
            .get(document_id)
            .map(|room| (room.server.content().to_string(), room.server.revision()))
    }

    /// Close rooms idle since before `now - inactivity_timeout`
    pub async fn reap_inactive(&self, now: Instant) -> Vec<DocumentId> {
        let mut rooms = self.rooms.lock().await;
        let idle: Vec<DocumentId> = rooms
            .iter()
            .filter(|(_, room)| now.saturating_duration_since(room.last_activity) >= self.inactivity_timeout)
            .map(|(id, _)| id.clone())
            .collect();

        for document_id in &idle {
            if let Some(mut room) = rooms.remove(document_id) {
                tracing::info!(
                    "[DocumentRooms] closing idle {} ({} watcher(s))",
                    document_id,
                    room.watchers.len()
                );
                room.notify(&DocumentEvent::Closed, |_| true);
            }
        }
        idle
    }
}

/// Reap idle rooms every `interval` until the returned task is aborted
pub fn spawn_reaper(rooms: Arc<DocumentRooms>, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            rooms.reap_inactive(Instant::now()).await;
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use tandem_ot::TextOperation;

    fn message(client: &str, seq: u64, revision: u64, operation: TextOperation) -> OperationMessage {
        OperationMessage {
            client_id: client.into(),
            seq,
            revision,
            operation,
        }
    }

    #[tokio::test]
    async fn test_sender_gets_ack_others_get_operation() {
        let rooms = DocumentRooms::new(Duration::from_secs(60));
        let doc: DocumentId = "name".into();
        rooms.open(doc.clone(), "abc").await;

        let mut alice = rooms.watch(&doc, &"alice".into(), None).await.unwrap();
        let mut bob = rooms.watch(&doc, &"bob".into(), None).await.unwrap();
        assert_eq!(alice.content, "abc");

        rooms
            .receive(&doc, message("alice", 1, 0, TextOperation::new().insert("X").retain(3)))
            .await
            .unwrap();

        assert_eq!(
            alice.events.next().await,
            Some(DocumentEvent::Ack { seq: 1, revision: 1 })
        );
        match bob.events.next().await {
            Some(DocumentEvent::Operation(applied)) => {
                assert_eq!(applied.revision, 1);
                assert_eq!(applied.client_id, ClientId::from("alice"));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_rewatch_returns_missed_operations() {
        let rooms = DocumentRooms::new(Duration::from_secs(60));
        let doc: DocumentId = "name".into();
        rooms.open(doc.clone(), "").await;
        rooms
            .receive(&doc, message("bob", 1, 0, TextOperation::new().insert("a")))
            .await
            .unwrap();
        rooms
            .receive(&doc, message("bob", 2, 1, TextOperation::new().retain(1).insert("b")))
            .await
            .unwrap();

        let watch = rooms.watch(&doc, &"alice".into(), Some(1)).await.unwrap();
        assert_eq!(watch.revision, 2);
        assert_eq!(watch.missed.len(), 1);
        assert_eq!(watch.missed[0].revision, 2);

        let ahead = rooms.watch(&doc, &"alice".into(), Some(7)).await;
        assert!(matches!(ahead, Err(RemoteError::Rejected(_))));
    }

    #[tokio::test]
    async fn test_duplicate_is_acked_again() {
        let rooms = DocumentRooms::new(Duration::from_secs(60));
        let doc: DocumentId = "name".into();
        rooms.open(doc.clone(), "").await;
        let mut alice = rooms.watch(&doc, &"alice".into(), None).await.unwrap();

        let op = message("alice", 1, 0, TextOperation::new().insert("hi"));
        rooms.receive(&doc, op.clone()).await.unwrap();
        rooms.receive(&doc, op).await.unwrap();

        assert_eq!(alice.events.next().await, Some(DocumentEvent::Ack { seq: 1, revision: 1 }));
        assert_eq!(alice.events.next().await, Some(DocumentEvent::Ack { seq: 1, revision: 1 }));
        assert_eq!(rooms.content(&doc).await, Some(("hi".to_string(), 1)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_rooms_are_closed() {
        let rooms = DocumentRooms::new(Duration::from_secs(10));
        let busy: DocumentId = "busy".into();
        let idle: DocumentId = "idle".into();
        rooms.open(busy.clone(), "").await;
        rooms.open(idle.clone(), "").await;
        let mut watcher = rooms.watch(&idle, &"alice".into(), None).await.unwrap();

        tokio::time::advance(Duration::from_secs(6)).await;
        rooms
            .receive(&busy, message("bob", 1, 0, TextOperation::new().insert("x")))
            .await
            .unwrap();
        tokio::time::advance(Duration::from_secs(6)).await;

        assert_eq!(rooms.reap_inactive(Instant::now()).await, vec![idle.clone()]);
        assert_eq!(watcher.events.next().await, Some(DocumentEvent::Closed));
        assert_eq!(watcher.events.next().await, None);
        assert!(rooms.content(&idle).await.is_none());
        assert!(rooms.content(&busy).await.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_reaper_task_closes_rooms() {
        let rooms = Arc::new(DocumentRooms::new(Duration::from_secs(5)));
        let doc: DocumentId = "name".into();
        rooms.open(doc.clone(), "").await;
        let mut watcher = rooms.watch(&doc, &"alice".into(), None).await.unwrap();

        let reaper = spawn_reaper(rooms.clone(), Duration::from_secs(1));
        assert_eq!(watcher.events.next().await, Some(DocumentEvent::Closed));
        reaper.abort();
    }
}
