use assist_protocol::{Envelope, OnlineUser};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info};

use crate::client::Outbox;
use crate::error::SessionError;

/// Another operator currently connected to the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PeerUser {
    pub client_id: String,
    pub display_name: String,
    pub connected_at: Option<DateTime<Utc>>,
}

impl From<OnlineUser> for PeerUser {
    fn from(user: OnlineUser) -> Self {
        Self {
            client_id: user.client_id,
            display_name: user.nickname,
            connected_at: DateTime::from_timestamp(user.connected_at, 0),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Departure {
    Removed { cleared_active_chat: bool },
    /// Disconnect for a peer we never saw. Harmless, the roster catches up on
    /// the next refresh.
    Unknown,
}

/// Roster of other operators plus the chat selection that depends on it.
/// Self never appears and each `client_id` appears at most once.
#[derive(Debug, Default)]
pub struct PresenceDirectory {
    self_id: Option<String>,
    peers: Vec<PeerUser>,
    active_chat: Option<String>,
}

impl PresenceDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_self(&mut self, client_id: impl Into<String>) {
        let client_id = client_id.into();
        self.peers.retain(|p| p.client_id != client_id);
        if self.active_chat.as_deref() == Some(client_id.as_str()) {
            self.active_chat = None;
        }
        self.self_id = Some(client_id);
    }

    pub fn self_id(&self) -> Option<&str> {
        self.self_id.as_deref()
    }

    fn is_self(&self, client_id: &str) -> bool {
        self.self_id.as_deref() == Some(client_id)
    }

    pub fn refresh(&self, outbox: &mut impl Outbox) -> Result<(), SessionError> {
        debug!("Requesting online users");
        outbox.send(Envelope::get_online_users())
    }

    /// Replaces the roster wholesale. Returns true if the active chat peer
    /// dropped out and the selection was cleared.
    pub fn on_roster_snapshot(&mut self, users: Vec<OnlineUser>) -> bool {
        let mut peers: Vec<PeerUser> = Vec::with_capacity(users.len());
        for user in users {
            if self.is_self(&user.client_id) || peers.iter().any(|p| p.client_id == user.client_id) {
                continue;
            }
            peers.push(user.into());
        }
        self.peers = peers;
        info!("Roster updated: {} peers online", self.peers.len());

        match self.active_chat.as_deref() {
            Some(active) if !self.contains(active) => {
                self.active_chat = None;
                true
            }
            _ => false,
        }
    }

    /// Returns true if the peer was added.
    pub fn on_connect_notification(&mut self, user: OnlineUser) -> bool {
        if self.is_self(&user.client_id) || self.contains(&user.client_id) {
            return false;
        }
        info!("{} ({}) connected", user.nickname, user.client_id);
        self.peers.push(user.into());
        true
    }

    pub fn on_disconnect_notification(&mut self, client_id: &str) -> Departure {
        let Some(position) = self.peers.iter().position(|p| p.client_id == client_id) else {
            debug!("Disconnect for unknown peer {}", client_id);
            return Departure::Unknown;
        };

        let peer = self.peers.remove(position);
        info!("{} ({}) disconnected", peer.display_name, peer.client_id);

        let cleared_active_chat = self.active_chat.as_deref() == Some(client_id);
        if cleared_active_chat {
            self.active_chat = None;
        }
        Departure::Removed { cleared_active_chat }
    }

    pub fn select_chat(&mut self, client_id: &str) -> Result<&PeerUser, SessionError> {
        let peer = self
            .peers
            .iter()
            .find(|p| p.client_id == client_id)
            .ok_or_else(|| SessionError::UnknownPeer(client_id.to_string()))?;
        self.active_chat = Some(peer.client_id.clone());
        Ok(peer)
    }

    pub fn clear_chat(&mut self) {
        self.active_chat = None;
    }

    pub fn active_chat(&self) -> Option<&str> {
        self.active_chat.as_deref()
    }

    pub fn peers(&self) -> &[PeerUser] {
        &self.peers
    }

    pub fn get(&self, client_id: &str) -> Option<&PeerUser> {
        self.peers.iter().find(|p| p.client_id == client_id)
    }

    pub fn contains(&self, client_id: &str) -> bool {
        self.get(client_id).is_some()
    }

    /// Forget everything, as on logout or a dropped connection.
    pub fn reset(&mut self) {
        self.self_id = None;
        self.peers.clear();
        self.active_chat = None;
    }
}
