//! Client-side reconciliation
//!
//! A `ConversationView` is the per-client, per-conversation cache of what
//! the user sees. It moves `Idle -> Loading -> Live`, shows optimistic
//! provisional entries for local sends, and merges authoritative messages
//! from submit responses and the live channel without ever showing the
//! same message twice.
//!
//! The view is pure state; `ClientSession` drives it against a backend.

pub mod session;

pub use session::{ChatBackend, ClientSession, LocalBackend, PendingSend};

use crate::error::{Result, SyncError};
use crate::models::{ConversationId, Message, MessageId, Sender};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::debug;

/// Client-assigned tag for a provisional message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct LocalId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ViewPhase {
    Idle,
    Loading,
    Live,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    Pending,
    /// Stored by the server, waiting for the sequence to catch up to it.
    Sent,
    Failed,
}

/// One row of the visible sequence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum ViewEntry {
    Confirmed(Message),
    Provisional {
        local_id: LocalId,
        content: String,
        sender: Sender,
        submitted_at: DateTime<Utc>,
        status: DeliveryStatus,
    },
}

impl ViewEntry {
    pub fn content(&self) -> &str {
        match self {
            ViewEntry::Confirmed(message) => &message.content,
            ViewEntry::Provisional { content, .. } => content,
        }
    }

    pub fn message_id(&self) -> Option<MessageId> {
        match self {
            ViewEntry::Confirmed(message) => Some(message.id),
            ViewEntry::Provisional { .. } => None,
        }
    }
}

/// Identifies one history fetch. Only the most recent ticket is honoured.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchTicket {
    pub conversation_id: ConversationId,
    pub seq: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    /// Result superseded by a newer fetch (or the view was closed); discarded.
    Stale,
    Applied {
        /// First load of this conversation: the live channel should be joined.
        join: bool,
        /// A queued event revealed another gap; run this fetch next.
        follow_up: Option<FetchTicket>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteOutcome {
    Inserted,
    /// Matched an outstanding provisional entry, which it replaced.
    Reconciled(LocalId),
    Duplicate,
    /// Held until the in-flight fetch completes.
    Queued,
    Ignored,
    /// Gap detected; the view is loading again.
    Resync(FetchTicket),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfirmOutcome {
    Inserted,
    /// The live echo got there first.
    AlreadyPresent,
    Queued,
    Resync(FetchTicket),
    /// No provisional entry with that id (view closed or switched).
    Unknown,
}

#[derive(Debug, Clone)]
struct Confirmed {
    message: Message,
    local_id: Option<LocalId>,
}

#[derive(Debug, Clone)]
struct Provisional {
    local_id: LocalId,
    content: String,
    sender: Sender,
    submitted_at: DateTime<Utc>,
    status: DeliveryStatus,
    /// Highest confirmed id when the send started; the real message must come after it.
    seen_max: MessageId,
    /// Id from the submit response, once known.
    stored: Option<MessageId>,
}

#[derive(Debug)]
pub struct ConversationView {
    conversation_id: Option<ConversationId>,
    phase: ViewPhase,
    confirmed: BTreeMap<MessageId, Confirmed>,
    provisional: Vec<Provisional>,
    queued: Vec<Message>,
    fetch_seq: u64,
    active_fetch: Option<u64>,
    joined: bool,
    next_local_id: u64,
}

impl Default for ConversationView {
    fn default() -> Self {
        Self::new()
    }
}

impl ConversationView {
    pub fn new() -> Self {
        Self {
            conversation_id: None,
            phase: ViewPhase::Idle,
            confirmed: BTreeMap::new(),
            provisional: Vec::new(),
            queued: Vec::new(),
            fetch_seq: 0,
            active_fetch: None,
            joined: false,
            next_local_id: 0,
        }
    }

    pub fn phase(&self) -> ViewPhase {
        self.phase
    }

    pub fn conversation_id(&self) -> Option<ConversationId> {
        self.conversation_id
    }

    pub fn is_joined(&self) -> bool {
        self.joined
    }

    /// Highest confirmed message id held locally.
    pub fn max_id(&self) -> MessageId {
        self.confirmed
            .keys()
            .next_back()
            .copied()
            .unwrap_or(MessageId::NONE)
    }

    /// Confirmed messages in id order, then provisional entries in send order.
    pub fn visible(&self) -> Vec<ViewEntry> {
        let confirmed = self
            .confirmed
            .values()
            .map(|c| ViewEntry::Confirmed(c.message.clone()));
        let provisional = self.provisional.iter().map(|p| ViewEntry::Provisional {
            local_id: p.local_id,
            content: p.content.clone(),
            sender: p.sender,
            submitted_at: p.submitted_at,
            status: p.status,
        });
        confirmed.chain(provisional).collect()
    }

    /// Open a conversation (Idle -> Loading). Switching conversations discards the old cache.
    pub fn select(&mut self, conversation_id: ConversationId) -> FetchTicket {
        if self.conversation_id != Some(conversation_id) {
            self.reset();
            self.conversation_id = Some(conversation_id);
        }
        self.start_fetch(conversation_id)
    }

    /// Issue a fresh fetch for the open conversation, superseding any in flight.
    pub fn refetch(&mut self) -> Option<FetchTicket> {
        let conversation_id = self.conversation_id?;
        Some(self.start_fetch(conversation_id))
    }

    fn start_fetch(&mut self, conversation_id: ConversationId) -> FetchTicket {
        self.fetch_seq += 1;
        self.active_fetch = Some(self.fetch_seq);
        self.phase = ViewPhase::Loading;
        FetchTicket {
            conversation_id,
            seq: self.fetch_seq,
        }
    }

    fn is_current(&self, ticket: &FetchTicket) -> bool {
        self.phase != ViewPhase::Idle
            && self.conversation_id == Some(ticket.conversation_id)
            && self.active_fetch == Some(ticket.seq)
    }

    /// Install fetched history as the authoritative sequence and replay queued events.
    pub fn apply_fetch(&mut self, ticket: FetchTicket, history: Vec<Message>) -> FetchOutcome {
        if !self.is_current(&ticket) {
            debug!(seq = ticket.seq, "[View] Discarding stale fetch");
            return FetchOutcome::Stale;
        }

        let previous = std::mem::take(&mut self.confirmed);
        for message in history {
            if message.conversation_id != ticket.conversation_id {
                continue;
            }
            let local_id = previous.get(&message.id).and_then(|c| c.local_id);
            self.confirmed
                .insert(message.id, Confirmed { message, local_id });
        }

        let fetched: Vec<Message> = self
            .confirmed
            .values()
            .filter(|c| c.local_id.is_none())
            .map(|c| c.message.clone())
            .collect();
        for message in &fetched {
            if let Some(local_id) = self.adopt_provisional(message) {
                if let Some(entry) = self.confirmed.get_mut(&message.id) {
                    entry.local_id = Some(local_id);
                }
            }
        }

        self.active_fetch = None;
        self.phase = ViewPhase::Live;
        let join = !self.joined;
        self.joined = true;

        let mut queued = std::mem::take(&mut self.queued);
        queued.sort_by_key(|m| m.id);
        let mut follow_up = None;
        for (index, message) in queued.iter().enumerate() {
            if let RemoteOutcome::Resync(ticket) = self.apply_live(message.clone()) {
                // apply_live re-queued the offending message; keep the rest with it.
                self.queued.extend(queued[index + 1..].iter().cloned());
                follow_up = Some(ticket);
                break;
            }
        }

        FetchOutcome::Applied { join, follow_up }
    }

    /// The fetch failed. The view stays loading with no fetch in flight;
    /// entries already on screen are kept.
    pub fn fail_fetch(&mut self, ticket: FetchTicket) {
        if self.is_current(&ticket) {
            self.active_fetch = None;
        }
    }

    /// Optimistically add a local send to the tail of the sequence.
    pub fn begin_submit(&mut self, content: &str, sender: Sender) -> Result<LocalId> {
        let conversation_id = match self.conversation_id {
            Some(id) if self.phase != ViewPhase::Idle => id,
            _ => return Err(SyncError::NotLive),
        };
        debug!(conversation_id = %conversation_id, "[View] Provisional send");
        if content.trim().is_empty() {
            return Err(SyncError::InvalidContent);
        }

        self.next_local_id += 1;
        let local_id = LocalId(self.next_local_id);
        self.provisional.push(Provisional {
            local_id,
            content: content.to_string(),
            sender,
            submitted_at: Utc::now(),
            status: DeliveryStatus::Pending,
            seen_max: self.max_id(),
            stored: None,
        });
        Ok(local_id)
    }

    /// The submit succeeded: replace the provisional entry with the stored message.
    ///
    /// If the message cannot be placed yet, the entry stays visible as `Sent`
    /// until the message arrives in order.
    pub fn confirm_submit(&mut self, local_id: LocalId, message: Message) -> ConfirmOutcome {
        if let Some(entry) = self.confirmed.get_mut(&message.id) {
            entry.local_id = Some(local_id);
            self.take_provisional(local_id);
            return ConfirmOutcome::AlreadyPresent;
        }
        if self.conversation_id != Some(message.conversation_id) {
            return ConfirmOutcome::Unknown;
        }
        let Some(index) = self.provisional.iter().position(|p| p.local_id == local_id) else {
            return ConfirmOutcome::Unknown;
        };

        match self.phase {
            ViewPhase::Idle => ConfirmOutcome::Unknown,
            ViewPhase::Live if message.id == self.max_id().next() => {
                self.provisional.remove(index);
                self.confirmed.insert(
                    message.id,
                    Confirmed {
                        message,
                        local_id: Some(local_id),
                    },
                );
                ConfirmOutcome::Inserted
            }
            phase => {
                let entry = &mut self.provisional[index];
                entry.status = DeliveryStatus::Sent;
                entry.stored = Some(message.id);
                let (conversation_id, got) = (message.conversation_id, message.id);
                self.queued.push(message);
                if phase == ViewPhase::Loading {
                    return ConfirmOutcome::Queued;
                }
                debug!(
                    %got,
                    local_max = %self.max_id(),
                    "[View] Submit response ahead of local sequence, resyncing"
                );
                ConfirmOutcome::Resync(self.start_fetch(conversation_id))
            }
        }
    }

    /// The submit failed: keep the entry visible, marked undelivered.
    pub fn fail_submit(&mut self, local_id: LocalId) -> bool {
        match self.provisional.iter_mut().find(|p| p.local_id == local_id) {
            Some(entry) => {
                entry.status = DeliveryStatus::Failed;
                true
            }
            None => false,
        }
    }

    /// Merge a message received on the live channel.
    pub fn apply_remote(&mut self, message: Message) -> RemoteOutcome {
        if self.conversation_id != Some(message.conversation_id) {
            return RemoteOutcome::Ignored;
        }
        match self.phase {
            ViewPhase::Idle => RemoteOutcome::Ignored,
            ViewPhase::Loading => {
                self.queued.push(message);
                RemoteOutcome::Queued
            }
            ViewPhase::Live => self.apply_live(message),
        }
    }

    fn apply_live(&mut self, message: Message) -> RemoteOutcome {
        if self.confirmed.contains_key(&message.id) {
            return RemoteOutcome::Duplicate;
        }
        if message.id != self.max_id().next() {
            debug!(
                got = %message.id,
                local_max = %self.max_id(),
                "[View] Gap in live sequence, resyncing"
            );
            let conversation_id = message.conversation_id;
            self.queued.push(message);
            return RemoteOutcome::Resync(self.start_fetch(conversation_id));
        }

        let local_id = self.adopt_provisional(&message);
        self.confirmed
            .insert(message.id, Confirmed { message, local_id });
        match local_id {
            Some(local_id) => RemoteOutcome::Reconciled(local_id),
            None => RemoteOutcome::Inserted,
        }
    }

    /// Remove the provisional entry this message is the authoritative copy of:
    /// the one the server already named, else the oldest matching pending send.
    fn adopt_provisional(&mut self, message: &Message) -> Option<LocalId> {
        let index = self
            .provisional
            .iter()
            .position(|p| p.stored == Some(message.id))
            .or_else(|| {
                self.provisional.iter().position(|p| {
                    p.status == DeliveryStatus::Pending
                        && p.sender == message.sender
                        && p.content == message.content
                        && p.seen_max < message.id
                })
            })?;
        Some(self.provisional.remove(index).local_id)
    }

    fn take_provisional(&mut self, local_id: LocalId) -> Option<Provisional> {
        let index = self
            .provisional
            .iter()
            .position(|p| p.local_id == local_id)?;
        Some(self.provisional.remove(index))
    }

    /// Live -> Idle. Returns the conversation whose live channel should be left.
    pub fn close(&mut self) -> Option<ConversationId> {
        let joined = self.joined;
        let conversation_id = self.conversation_id;
        self.reset();
        if joined {
            conversation_id
        } else {
            None
        }
    }

    fn reset(&mut self) {
        self.conversation_id = None;
        self.phase = ViewPhase::Idle;
        self.confirmed.clear();
        self.provisional.clear();
        self.queued.clear();
        self.active_fetch = None;
        self.joined = false;
    }
}
