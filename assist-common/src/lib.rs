//! Client-side session engine for the agent-assist operator console.

pub mod chat;
pub mod client;
pub mod config;
pub mod error;
pub mod presence;
pub mod requests;
pub mod session;
pub mod transport;

#[cfg(test)]
mod tests;

pub use chat::{ChatChannel, ChatEntry};
pub use client::{
    ConnectHandle, ConnectionManager, ConnectionState, ConnectionStatus, LinkUpdate, Outbox,
    ReconnectPolicy, RetryPlan,
};
pub use config::{ClientConfig, Credentials, NicknameCache, ReconnectConfig};
pub use error::{CorrelationError, SessionError};
pub use presence::{PeerUser, PresenceDirectory};
pub use requests::{PendingRequest, RequestStore};
pub use session::{NoticeReceiver, Session, SessionNotice, SessionSnapshot};
pub use transport::{event_channel, ConnectionEvent, EventReceiver, EventSender, Transport, WsTransport};
