//! # Document Session
//!
//! Async driver for one [`OtDocument`]: ships outgoing operations, feeds
//! server events into the OT client and rejoins the document room after a
//! reconnect.
//!
//! Rejoin order matters. The session re-watches from its current revision,
//! replays the operations it missed (its own outstanding operation among them
//! counts as the ack), and only then resends whatever is still outstanding.

use crate::{Connection, DocumentEvent, DocumentEvents, DocumentRemote, SessionError, SyncConfig};
use futures::StreamExt;
use std::sync::Arc;
use tandem_common::{ClientId, ConnectionState, DocumentId, RemoteError};
use tandem_ot::{ClientState, OtDocument, OtError, TextOperation};
use tokio::sync::{mpsc, oneshot, watch};

/// Snapshot of the OT client behind a document
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentInfo {
    pub revision: u64,
    pub content: String,
    pub state: ClientState,
    pub closed: bool,
}

enum Command {
    Edit {
        operation: TextOperation,
        reply: oneshot::Sender<Result<(), SessionError>>,
    },
    Listen {
        listener: Box<dyn FnMut(&str) + Send>,
    },
    Inspect {
        reply: oneshot::Sender<DocumentInfo>,
    },
    Close,
}

/// Handle to a collaboratively edited text field
#[derive(Debug, Clone)]
pub struct DocumentHandle {
    id: DocumentId,
    commands: mpsc::Sender<Command>,
    content: watch::Receiver<String>,
}

impl DocumentHandle {
    pub async fn open(
        remote: Arc<dyn DocumentRemote>,
        connection: &Connection,
        document_id: DocumentId,
        client_id: ClientId,
        config: &SyncConfig,
    ) -> Result<Self, SessionError> {
        let watch = remote.watch_document(&document_id, &client_id, None).await?;
        tracing::info!(
            "[DocumentSession] {} opened {} at revision {}",
            client_id,
            document_id,
            watch.revision
        );

        let mut document = OtDocument::new(document_id.clone(), client_id, watch.content, watch.revision);
        let (content_tx, content_rx) = watch::channel(document.content().to_string());
        document.on_content_changed(move |text| {
            content_tx.send_replace(text.to_string());
        });

        let connection_rx = connection.subscribe();
        let needs_rejoin = !connection_rx.borrow().is_connected();
        let (commands_tx, commands_rx) = mpsc::channel(config.command_capacity);

        let session = DocumentSession {
            document,
            remote,
            commands: commands_rx,
            connection: connection_rx,
            connection_open: true,
            events: Some(watch.events),
            needs_rejoin,
            closed: false,
        };
        tokio::spawn(session.run());

        Ok(Self {
            id: document_id,
            commands: commands_tx,
            content: content_rx,
        })
    }

    pub fn id(&self) -> &DocumentId {
        &self.id
    }

    /// Current text as last rendered
    pub fn content(&self) -> String {
        self.content.borrow().clone()
    }

    pub fn watch_content(&self) -> watch::Receiver<String> {
        self.content.clone()
    }

    /// Apply an edit made on this client; it is sent or buffered as the OT
    /// state allows
    pub async fn apply_local_edit(&self, operation: TextOperation) -> Result<(), SessionError> {
        let (reply, rx) = oneshot::channel();
        self.commands.send(Command::Edit { operation, reply }).await?;
        rx.await?
    }

    /// Called on the session task with the new text after every change
    pub async fn on_content_changed(&self, listener: impl FnMut(&str) + Send + 'static) -> Result<(), SessionError> {
        self.commands
            .send(Command::Listen {
                listener: Box::new(listener),
            })
            .await?;
        Ok(())
    }

    pub async fn info(&self) -> Result<DocumentInfo, SessionError> {
        let (reply, rx) = oneshot::channel();
        self.commands.send(Command::Inspect { reply }).await?;
        Ok(rx.await?)
    }

    /// Leave the document room and stop the session
    pub async fn close(&self) -> Result<(), SessionError> {
        self.commands.send(Command::Close).await?;
        Ok(())
    }
}

struct DocumentSession {
    document: OtDocument,
    remote: Arc<dyn DocumentRemote>,

    commands: mpsc::Receiver<Command>,
    connection: watch::Receiver<ConnectionState>,
    connection_open: bool,
    events: Option<DocumentEvents>,

    needs_rejoin: bool,
    closed: bool,
}

impl DocumentSession {
    async fn run(mut self) {
        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(Command::Close) | None => {
                        self.leave().await;
                        break;
                    }
                    Some(command) => self.on_command(command).await,
                },
                changed = self.connection.changed(), if self.connection_open => {
                    if changed.is_err() {
                        self.connection_open = false;
                        continue;
                    }
                    let state = *self.connection.borrow_and_update();
                    self.on_connection(state).await;
                }
                event = next_event(&mut self.events), if self.events.is_some() => match event {
                    Some(event) => self.on_event(event).await,
                    None => {
                        tracing::debug!("[DocumentSession] event stream of {} ended", self.document.id());
                        self.events = None;
                    }
                },
            }
        }
        tracing::info!("[DocumentSession] stopped {}", self.document.id());
    }

    async fn on_command(&mut self, command: Command) {
        match command {
            Command::Edit { operation, reply } => {
                if self.closed {
                    let _ = reply.send(Err(SessionError::Closed(self.document.id().clone())));
                    return;
                }
                match self.document.apply_local_edit(operation) {
                    Ok(()) => {
                        let _ = reply.send(Ok(()));
                        self.flush().await;
                    }
                    Err(e) => {
                        tracing::warn!("[DocumentSession] rejected local edit: {}", e);
                        let _ = reply.send(Err(e.into()));
                    }
                }
            }
            Command::Listen { listener } => self.document.on_content_changed(listener),
            Command::Inspect { reply } => {
                let _ = reply.send(DocumentInfo {
                    revision: self.document.revision(),
                    content: self.document.content().to_string(),
                    state: self.document.client().state().clone(),
                    closed: self.closed,
                });
            }
            Command::Close => {}
        }
    }

    async fn on_connection(&mut self, state: ConnectionState) {
        if self.closed {
            return;
        }
        match state {
            ConnectionState::Disconnected | ConnectionState::Reconnecting | ConnectionState::Error => {
                self.needs_rejoin = true;
            }
            ConnectionState::Connected | ConnectionState::Reconnected => {
                if state == ConnectionState::Reconnected || self.needs_rejoin {
                    self.rejoin().await;
                }
            }
        }
    }

    async fn rejoin(&mut self) {
        let since = self.document.revision();
        tracing::info!(
            "[DocumentSession] rejoining {} from revision {}",
            self.document.id(),
            since
        );

        let watch = match self
            .remote
            .watch_document(self.document.id(), self.document.client_id(), Some(since))
            .await
        {
            Ok(watch) => watch,
            Err(e) if e.is_transport() => {
                tracing::warn!("[DocumentSession] rejoin of {} interrupted: {}", self.document.id(), e);
                self.needs_rejoin = true;
                return;
            }
            Err(RemoteError::NotFound(_)) => {
                // Reaped while we were away; the Closed event went to a dead watch
                self.closed_by_server();
                return;
            }
            Err(e) => {
                tracing::error!("[DocumentSession] rejoin of {} failed: {}", self.document.id(), e);
                self.needs_rejoin = true;
                return;
            }
        };

        self.needs_rejoin = false;
        self.events = Some(watch.events);
        if let Err(e) = self.document.catch_up(&watch.missed) {
            self.fatal(e);
            return;
        }
        self.document.resend();
        self.flush().await;
    }

    async fn on_event(&mut self, event: DocumentEvent) {
        let result = match event {
            DocumentEvent::Ack { seq, revision } => {
                if !self.document.is_outstanding(seq) {
                    tracing::debug!("[DocumentSession] ignoring repeated ack for seq {}", seq);
                    return;
                }
                let result = self.document.server_ack();
                if result.is_ok() && self.document.revision() != revision {
                    tracing::warn!(
                        "[DocumentSession] ack for seq {} names revision {}, local revision is {}",
                        seq,
                        revision,
                        self.document.revision()
                    );
                }
                result
            }
            DocumentEvent::Operation(applied) => {
                if applied.revision <= self.document.revision() {
                    tracing::debug!("[DocumentSession] skipping replayed revision {}", applied.revision);
                    return;
                }
                self.document.apply_remote(&applied.operation)
            }
            DocumentEvent::Closed => {
                self.closed_by_server();
                return;
            }
        };

        match result {
            Ok(()) => self.flush().await,
            Err(e) => self.fatal(e),
        }
    }

    /// Ship everything in the outbox. Transport faults are absorbed: the
    /// outstanding operation is resent on rejoin. Anything else ends the
    /// session, since the server will never acknowledge the operation.
    async fn flush(&mut self) {
        for message in self.document.take_outgoing() {
            if self.closed {
                return;
            }
            let seq = message.seq;
            match self.remote.send_operation(self.document.id(), message).await {
                Ok(()) => {}
                Err(e) if e.is_transport() => {
                    tracing::warn!("[DocumentSession] send of seq {} deferred: {}", seq, e);
                    self.needs_rejoin = true;
                }
                Err(RemoteError::NotFound(_)) => self.closed_by_server(),
                Err(e) => {
                    tracing::error!("[DocumentSession] send of seq {} rejected: {}", seq, e);
                    self.closed = true;
                    self.events = None;
                }
            }
        }
    }

    fn closed_by_server(&mut self) {
        tracing::info!("[DocumentSession] {} closed by the server", self.document.id());
        self.closed = true;
        self.needs_rejoin = false;
        self.events = None;
    }

    async fn leave(&mut self) {
        if self.closed {
            return;
        }
        if let Err(e) = self
            .remote
            .unwatch_document(self.document.id(), self.document.client_id())
            .await
        {
            tracing::debug!("[DocumentSession] unwatch of {} failed: {}", self.document.id(), e);
        }
    }

    /// Server state and local state disagree beyond repair
    fn fatal(&mut self, error: OtError) {
        tracing::error!(
            "[DocumentSession] {} diverged from the server: {}",
            self.document.id(),
            error
        );
        self.closed = true;
        self.events = None;
    }
}

async fn next_event(events: &mut Option<DocumentEvents>) -> Option<DocumentEvent> {
    match events {
        Some(stream) => stream.next().await,
        None => std::future::pending().await,
    }
}
