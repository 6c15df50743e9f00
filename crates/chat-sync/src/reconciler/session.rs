//! Client session driver
//!
//! Runs a `ConversationView` against a `ChatBackend`: fetches history,
//! joins the live channel once loaded, submits with optimistic entries and
//! re-fetches whenever the view reports a gap.

use super::{ConfirmOutcome, ConversationView, FetchOutcome, FetchTicket, LocalId, RemoteOutcome};
use crate::error::{Result, SyncError};
use crate::hub::{ConnectionId, LiveReceiver};
use crate::models::{ConversationId, Message, Sender};
use crate::service::ChatService;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, warn};

/// What a client needs from the server side.
#[async_trait]
pub trait ChatBackend: Send + Sync {
    async fn fetch_history(&self, conversation_id: ConversationId) -> Result<Vec<Message>>;

    async fn submit(
        &self,
        conversation_id: ConversationId,
        content: &str,
        sender: Sender,
    ) -> Result<Message>;

    async fn join_live(&self, conversation_id: ConversationId) -> Result<()>;

    async fn leave_live(&self, conversation_id: ConversationId) -> Result<()>;
}

/// In-process backend bound to one hub connection.
pub struct LocalBackend {
    service: Arc<ChatService>,
    connection_id: ConnectionId,
}

impl LocalBackend {
    /// Register a live connection. The receiver carries messages for joined conversations.
    pub fn connect(service: Arc<ChatService>) -> (Self, LiveReceiver) {
        let (connection_id, rx) = service.connect();
        (
            Self {
                service,
                connection_id,
            },
            rx,
        )
    }

    pub fn connection_id(&self) -> ConnectionId {
        self.connection_id
    }
}

impl Drop for LocalBackend {
    fn drop(&mut self) {
        self.service.disconnect(self.connection_id);
    }
}

#[async_trait]
impl ChatBackend for LocalBackend {
    async fn fetch_history(&self, conversation_id: ConversationId) -> Result<Vec<Message>> {
        self.service.fetch_history(conversation_id).await
    }

    async fn submit(
        &self,
        conversation_id: ConversationId,
        content: &str,
        sender: Sender,
    ) -> Result<Message> {
        self.service
            .submit_message(conversation_id, content, sender)
            .await
    }

    async fn join_live(&self, conversation_id: ConversationId) -> Result<()> {
        self.service.join_live(self.connection_id, conversation_id)
    }

    async fn leave_live(&self, conversation_id: ConversationId) -> Result<()> {
        self.service.leave_live(self.connection_id, conversation_id);
        Ok(())
    }
}

/// A pending send started with `begin_send`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingSend {
    pub conversation_id: ConversationId,
    pub local_id: LocalId,
}

pub struct ClientSession<B: ChatBackend> {
    backend: B,
    view: ConversationView,
    sender: Sender,
}

impl<B: ChatBackend> ClientSession<B> {
    /// A session that sends as the viewing user.
    pub fn new(backend: B) -> Self {
        Self::with_sender(backend, Sender::User)
    }

    pub fn with_sender(backend: B, sender: Sender) -> Self {
        Self {
            backend,
            view: ConversationView::new(),
            sender,
        }
    }

    pub fn view(&self) -> &ConversationView {
        &self.view
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Open a conversation, leaving the previous one first.
    pub async fn select(&mut self, conversation_id: ConversationId) -> Result<()> {
        if let Some(current) = self.view.conversation_id() {
            if current != conversation_id {
                self.leave().await?;
            }
        }
        let ticket = self.view.select(conversation_id);
        self.run_fetch(ticket).await
    }

    /// Fetch until the view settles in `Live`.
    async fn run_fetch(&mut self, mut ticket: FetchTicket) -> Result<()> {
        loop {
            let history = match self.backend.fetch_history(ticket.conversation_id).await {
                Ok(history) => history,
                Err(e) => {
                    warn!(conversation_id = %ticket.conversation_id, "[Session] Fetch failed: {}", e);
                    self.view.fail_fetch(ticket);
                    return Err(e);
                }
            };

            match self.view.apply_fetch(ticket, history) {
                FetchOutcome::Stale => return Ok(()),
                FetchOutcome::Applied { join, follow_up } => {
                    if join {
                        self.backend.join_live(ticket.conversation_id).await?;
                    }
                    match follow_up {
                        Some(next) => ticket = next,
                        None => return Ok(()),
                    }
                }
            }
        }
    }

    /// Re-fetch the open conversation, e.g. after a failed fetch.
    pub async fn refresh(&mut self) -> Result<()> {
        match self.view.refetch() {
            Some(ticket) => self.run_fetch(ticket).await,
            None => Ok(()),
        }
    }

    /// First half of a send: show the provisional entry.
    pub fn begin_send(&mut self, content: &str) -> Result<PendingSend> {
        let local_id = self.view.begin_submit(content, self.sender)?;
        let conversation_id = self
            .view
            .conversation_id()
            .ok_or(SyncError::NotLive)?;
        Ok(PendingSend {
            conversation_id,
            local_id,
        })
    }

    /// Second half of a send: submit and fold the result into the view.
    pub async fn complete_send(&mut self, pending: PendingSend, content: &str) -> Result<Message> {
        let result = self
            .backend
            .submit(pending.conversation_id, content, self.sender)
            .await;

        match result {
            Ok(message) => {
                match self.view.confirm_submit(pending.local_id, message.clone()) {
                    ConfirmOutcome::Resync(ticket) => self.run_fetch(ticket).await?,
                    outcome => debug!(message_id = %message.id, ?outcome, "[Session] Send confirmed"),
                }
                Ok(message)
            }
            Err(e) => {
                warn!(conversation_id = %pending.conversation_id, "[Session] Send failed: {}", e);
                self.view.fail_submit(pending.local_id);
                Err(e)
            }
        }
    }

    pub async fn send(&mut self, content: &str) -> Result<Message> {
        let pending = self.begin_send(content)?;
        self.complete_send(pending, content).await
    }

    /// Merge one live event, re-fetching if it reveals a gap.
    pub async fn handle_live(&mut self, message: Message) -> Result<RemoteOutcome> {
        let outcome = self.view.apply_remote(message);
        if let RemoteOutcome::Resync(ticket) = &outcome {
            self.run_fetch(*ticket).await?;
        }
        Ok(outcome)
    }

    /// Close the conversation and stop receiving its live events.
    pub async fn leave(&mut self) -> Result<()> {
        if let Some(conversation_id) = self.view.close() {
            self.backend.leave_live(conversation_id).await?;
        }
        Ok(())
    }
}
