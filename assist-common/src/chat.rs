use assist_protocol::{ChatMessage, Envelope};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use tracing::{debug, info};
use uuid::Uuid;

use crate::client::Outbox;
use crate::error::SessionError;
use crate::presence::PresenceDirectory;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChatEntry {
    pub message_id: String,
    pub sender_client_id: String,
    pub sender_display_name: String,
    pub receiver_client_id: String,
    pub content: String,
    pub sent_at: DateTime<Utc>,
    /// Optimistic copy appended when sending, before the server relays it.
    pub local_echo: bool,
}

impl ChatEntry {
    fn from_message(message: ChatMessage) -> Self {
        Self {
            sent_at: DateTime::from_timestamp(message.sent_at, 0).unwrap_or_else(Utc::now),
            message_id: message.message_id,
            sender_client_id: message.sender_client_id,
            sender_display_name: message.sender_nickname,
            receiver_client_id: message.receiver_client_id,
            content: message.content,
            local_echo: false,
        }
    }
}

/// The local operator as a chat sender.
#[derive(Debug, Clone, Copy)]
pub struct Sender<'a> {
    pub client_id: &'a str,
    pub display_name: &'a str,
}

/// Per-peer message threads, keyed by the peer's `client_id` whichever way
/// the message went. Threads only grow.
#[derive(Debug, Default)]
pub struct ChatChannel {
    threads: HashMap<String, Vec<ChatEntry>>,
    unread: HashMap<String, usize>,
}

impl ChatChannel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn send(
        &mut self,
        peer_id: &str,
        content: &str,
        sender: Sender<'_>,
        presence: &PresenceDirectory,
        outbox: &mut impl Outbox,
    ) -> Result<&ChatEntry, SessionError> {
        if content.trim().is_empty() {
            return Err(SessionError::EmptyMessage);
        }
        if !presence.contains(peer_id) {
            return Err(SessionError::UnknownPeer(peer_id.to_string()));
        }

        outbox.send(Envelope::send_chat_message(peer_id, content))?;

        let entry = ChatEntry {
            message_id: format!("local-{}", Uuid::new_v4()),
            sender_client_id: sender.client_id.to_string(),
            sender_display_name: sender.display_name.to_string(),
            receiver_client_id: peer_id.to_string(),
            content: content.to_string(),
            // Relayed messages carry whole seconds; match them so a reply in
            // the same second lands after this one.
            sent_at: DateTime::from_timestamp(Utc::now().timestamp(), 0).unwrap_or_else(Utc::now),
            local_echo: true,
        };
        debug!("Sent chat message to {}", peer_id);
        Ok(self.append(peer_id, entry))
    }

    /// Files a relayed message under its peer and returns that peer's id. A
    /// message relayed back from self belongs to the receiver's thread.
    pub fn on_inbound_message(
        &mut self,
        message: ChatMessage,
        self_id: Option<&str>,
        active_chat: Option<&str>,
    ) -> String {
        let from_self = self_id == Some(message.sender_client_id.as_str());
        let peer_id = if from_self {
            message.receiver_client_id.clone()
        } else {
            message.sender_client_id.clone()
        };

        if !from_self && active_chat != Some(peer_id.as_str()) {
            *self.unread.entry(peer_id.clone()).or_default() += 1;
        }

        let entry = ChatEntry::from_message(message);
        info!("Chat message from {} in thread {}", entry.sender_display_name, peer_id);
        self.append(&peer_id, entry);
        peer_id
    }

    fn append(&mut self, peer_id: &str, entry: ChatEntry) -> &ChatEntry {
        let thread = self.threads.entry(peer_id.to_string()).or_default();
        // Equal timestamps keep arrival order.
        let position = thread.partition_point(|e| e.sent_at <= entry.sent_at);
        thread.insert(position, entry);
        &thread[position]
    }

    pub fn thread(&self, peer_id: &str) -> &[ChatEntry] {
        self.threads.get(peer_id).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn unread(&self, peer_id: &str) -> usize {
        self.unread.get(peer_id).copied().unwrap_or(0)
    }

    pub fn unread_counts(&self) -> &HashMap<String, usize> {
        &self.unread
    }

    pub fn mark_read(&mut self, peer_id: &str) {
        self.unread.remove(peer_id);
    }

    pub fn peers_with_threads(&self) -> impl Iterator<Item = &str> {
        self.threads.keys().map(String::as_str)
    }
}
