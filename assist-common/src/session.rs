use assist_protocol::{decode_inbound, Envelope, Frame, Inbound, ReplyNotice, RequestKind, UserLoginResponse};
use serde::Serialize;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::chat::{ChatChannel, ChatEntry, Sender};
use crate::client::{
    ConnectHandle, ConnectionManager, ConnectionState, LinkUpdate, Outbox, RetryPlan,
};
use crate::config::Credentials;
use crate::error::SessionError;
use crate::presence::{Departure, PeerUser, PresenceDirectory};
use crate::requests::{Arrival, Cancellation, OriginalRequest, PendingRequest, RequestStore, Settlement};
use crate::transport::{ConnectionEvent, Transport};

/// Things the operator should be told about, in the order they happened.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionNotice {
    Connected {
        client_id: String,
    },
    ConnectionLost {
        reason: Option<String>,
        retry_in: Option<Duration>,
    },
    ConnectionError(String),
    /// Closed on request, including after a rejected login.
    Disconnected,
    ReconnectExhausted {
        attempts: u32,
    },
    LoginFailed(String),
    QuestionReceived {
        id: String,
        project: String,
        question: String,
    },
    TaskReceived {
        id: String,
        project: String,
        summary: String,
    },
    ReplySent {
        id: String,
        kind: RequestKind,
    },
    AnsweredElsewhere {
        id: String,
        kind: RequestKind,
        by: Option<String>,
        text: String,
    },
    Cancelled {
        id: String,
        kind: RequestKind,
        reason: Option<String>,
    },
    RosterUpdated(Vec<PeerUser>),
    PeerJoined(PeerUser),
    PeerLeft {
        client_id: String,
    },
    ChatReceived {
        peer_id: String,
        from: String,
        content: String,
    },
    Warning(String),
}

pub type NoticeSender = mpsc::UnboundedSender<SessionNotice>;
pub type NoticeReceiver = mpsc::UnboundedReceiver<SessionNotice>;

/// Read-only copy of everything the presentation layer renders.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionSnapshot {
    pub connection: ConnectionState,
    pub pending_questions: Vec<PendingRequest>,
    pub pending_tasks: Vec<PendingRequest>,
    pub history: Vec<PendingRequest>,
    pub peers: Vec<PeerUser>,
    pub active_chat: Option<String>,
    pub active_thread: Vec<ChatEntry>,
    pub unread: HashMap<String, usize>,
}

/// Single entry point over the connection, request store, roster and chat.
/// Owned by one task; every mutation goes through `&mut self`.
pub struct Session<T: Transport> {
    link: ConnectionManager<T>,
    requests: RequestStore,
    presence: PresenceDirectory,
    chat: ChatChannel,
    notices: NoticeSender,
}

impl<T: Transport> Session<T> {
    pub fn new(link: ConnectionManager<T>) -> (Self, NoticeReceiver) {
        let (notices, rx) = mpsc::unbounded_channel();
        let session = Self {
            link,
            requests: RequestStore::new(),
            presence: PresenceDirectory::new(),
            chat: ChatChannel::new(),
            notices,
        };
        (session, rx)
    }

    pub fn connect(&mut self, endpoint: &str, credentials: Credentials) -> ConnectHandle {
        self.link.connect(endpoint, credentials)
    }

    /// Logs out: no reconnect, roster and selection forgotten. Requests and
    /// chat history stay. Emits `Disconnected`.
    pub fn disconnect(&mut self) {
        self.link.disconnect();
        self.presence.reset();
        self.notify(SessionNotice::Disconnected);
    }

    pub fn handle_event(&mut self, event: ConnectionEvent) {
        match self.link.handle_event(event) {
            LinkUpdate::Opened => debug!("Connection open, waiting for login response"),
            LinkUpdate::Frame(frame) => self.on_frame(&frame),
            LinkUpdate::Closed { reason, retry } => {
                // The roster is only trusted while logged in; threads and
                // unread counts outlive the connection.
                self.presence.reset();
                self.on_closed(reason, retry);
            }
            LinkUpdate::Error(message) => self.notify(SessionNotice::ConnectionError(message)),
            LinkUpdate::Reconnecting { attempt } => debug!("Reconnecting, attempt {}", attempt),
            LinkUpdate::Ignored => {}
        }
    }

    fn on_closed(&mut self, reason: Option<String>, retry: RetryPlan) {
        match retry {
            RetryPlan::Scheduled { delay, .. } => self.notify(SessionNotice::ConnectionLost {
                reason,
                retry_in: Some(delay),
            }),
            RetryPlan::Exhausted => {
                let attempts = self.link.reconnect_attempt();
                self.link
                    .record_error(format!("gave up after {} reconnect attempts", attempts));
                self.notify(SessionNotice::ConnectionLost {
                    reason,
                    retry_in: None,
                });
                self.notify(SessionNotice::ReconnectExhausted { attempts });
            }
        }
    }

    fn on_frame(&mut self, frame: &Frame) {
        match decode_inbound(frame) {
            Ok(inbound) => self.dispatch(inbound),
            Err(e) => warn!("Dropping malformed message: {}", e),
        }
    }

    pub fn dispatch(&mut self, inbound: Inbound) {
        match inbound {
            Inbound::LoginResponse(response) => self.on_login(response),
            Inbound::AskQuestion(request) => self.on_request(OriginalRequest::Question(request)),
            Inbound::WorkReport(request) => self.on_request(OriginalRequest::TaskReport(request)),
            Inbound::ReplyNotification(notice) => self.on_reply_notification(notice),
            Inbound::RequestCancelled(notification) => {
                let reason = Some(notification.reason.as_str());
                match self.requests.on_cancellation(&notification.request_id, reason) {
                    Cancellation::Cancelled => self.notify_cancelled(&notification.request_id),
                    Cancellation::AlreadySettled => {
                        debug!("{} already settled", notification.request_id)
                    }
                    Cancellation::NotFound => self.notify(SessionNotice::Warning(format!(
                        "Request {} was cancelled: {}",
                        notification.request_id, notification.reason
                    ))),
                }
            }
            Inbound::OnlineUsers(users) => {
                if self.presence.on_roster_snapshot(users) {
                    info!("Active chat peer went offline");
                }
                self.notify(SessionNotice::RosterUpdated(self.presence.peers().to_vec()));
            }
            Inbound::ChatMessage(message) => {
                let from = message.sender_nickname.clone();
                let content = message.content.clone();
                let from_self = self.presence.self_id() == Some(message.sender_client_id.as_str());
                let peer_id = self.chat.on_inbound_message(
                    message,
                    self.presence.self_id(),
                    self.presence.active_chat(),
                );
                if !from_self {
                    self.notify(SessionNotice::ChatReceived {
                        peer_id,
                        from,
                        content,
                    });
                }
            }
            Inbound::ConnectionStatus { user, connected } => {
                if connected {
                    let peer = PeerUser::from(user.clone());
                    if self.presence.on_connect_notification(user) {
                        self.notify(SessionNotice::PeerJoined(peer));
                    }
                } else {
                    match self.presence.on_disconnect_notification(&user.client_id) {
                        Departure::Removed { .. } => self.notify(SessionNotice::PeerLeft {
                            client_id: user.client_id,
                        }),
                        Departure::Unknown => {}
                    }
                }
            }
            Inbound::MessageValidity(validity) => {
                for id in self.requests.on_validity_report(&validity) {
                    self.notify_cancelled(&id);
                }
            }
            Inbound::PendingMessages(messages) => {
                for id in self.requests.on_pending_snapshot(messages) {
                    self.notify_received(&id);
                }
            }
            Inbound::Unexpected(command) => warn!("Ignoring client-only command {} from server", command),
            Inbound::Unknown(tag) => warn!("Ignoring unknown command '{}'", tag),
        }
    }

    fn on_login(&mut self, response: UserLoginResponse) {
        if !response.success {
            let message = if response.error_message.is_empty() {
                "login rejected".to_string()
            } else {
                response.error_message
            };
            warn!("Login failed: {}", message);
            // A rejected token would fail the same way on every retry.
            self.disconnect();
            self.link.record_error(message.clone());
            self.notify(SessionNotice::LoginFailed(message));
            return;
        }

        info!("Logged in as {}", response.client_id);
        self.link.set_self_client_id(response.client_id.clone());
        self.presence.set_self(response.client_id.clone());
        self.notify(SessionNotice::Connected {
            client_id: response.client_id,
        });

        if let Err(e) = self.presence.refresh(&mut self.link) {
            warn!("Failed to request online users: {}", e);
        }
        if let Err(e) = self.link.send(Envelope::get_pending_messages()) {
            warn!("Failed to request pending messages: {}", e);
        }
        let open = self.requests.pending_ids();
        if !open.is_empty() {
            if let Err(e) = self.link.send(Envelope::check_message_validity(open)) {
                warn!("Failed to check message validity: {}", e);
            }
        }
    }

    fn on_request(&mut self, original: OriginalRequest) {
        let id = original.id().to_string();
        if self.requests.on_inbound_request(original) == Arrival::Created {
            self.notify_received(&id);
        }
    }

    fn on_reply_notification(&mut self, notice: ReplyNotice) {
        let outcome = self.requests.on_reply_notification(
            &notice.request_id,
            notice.text.as_deref(),
            notice.answered_by.as_deref(),
        );
        match outcome {
            Settlement::Applied => {
                let text = self
                    .requests
                    .get(&notice.request_id)
                    .and_then(|r| r.answer_text.clone())
                    .unwrap_or_default();
                self.notify(SessionNotice::AnsweredElsewhere {
                    id: notice.request_id,
                    kind: notice.kind,
                    by: notice.answered_by,
                    text,
                });
            }
            Settlement::AlreadyAnswered | Settlement::Unknown => {
                debug!("Reply notification for {} had no effect", notice.request_id)
            }
        }
    }

    fn notify_received(&self, id: &str) {
        let Some(request) = self.requests.get(id) else {
            return;
        };
        let notice = match request.kind {
            RequestKind::Question => SessionNotice::QuestionReceived {
                id: request.id.clone(),
                project: request.project_context.clone(),
                question: request.payload.clone(),
            },
            RequestKind::TaskReport => SessionNotice::TaskReceived {
                id: request.id.clone(),
                project: request.project_context.clone(),
                summary: request.payload.clone(),
            },
        };
        self.notify(notice);
    }

    fn notify_cancelled(&self, id: &str) {
        if let Some(request) = self.requests.get(id) {
            self.notify(SessionNotice::Cancelled {
                id: request.id.clone(),
                kind: request.kind,
                reason: request.cancel_reason.clone(),
            });
        }
    }

    fn notify(&self, notice: SessionNotice) {
        if self.notices.send(notice).is_err() {
            debug!("Notice receiver dropped");
        }
    }

    /// Answer a pending question.
    pub fn reply(&mut self, id: &str, text: &str) -> Result<(), SessionError> {
        let result = self
            .requests
            .reply_to(RequestKind::Question, id, text, &mut self.link)
            .map(|r| r.kind);
        self.report_answer(id, result)
    }

    /// Acknowledge a task report, with `"Task confirmed"` unless `text` is given.
    pub fn confirm(&mut self, id: &str, text: Option<&str>) -> Result<(), SessionError> {
        let result = self
            .requests
            .confirm(id, text, &mut self.link)
            .map(|r| r.kind);
        self.report_answer(id, result)
    }

    fn report_answer(
        &self,
        id: &str,
        result: Result<RequestKind, SessionError>,
    ) -> Result<(), SessionError> {
        match result {
            Ok(kind) => {
                self.notify(SessionNotice::ReplySent {
                    id: id.to_string(),
                    kind,
                });
                Ok(())
            }
            Err(e) => {
                if let SessionError::Correlation(correlation) = &e {
                    self.notify(SessionNotice::Warning(correlation.to_string()));
                }
                Err(e)
            }
        }
    }

    pub fn send_chat(&mut self, peer_id: &str, content: &str) -> Result<(), SessionError> {
        let display_name = self
            .link
            .credentials()
            .map(|c| c.display_name.clone())
            .unwrap_or_default();
        let client_id = self.presence.self_id().unwrap_or_default().to_string();
        let sender = Sender {
            client_id: &client_id,
            display_name: &display_name,
        };
        self.chat
            .send(peer_id, content, sender, &self.presence, &mut self.link)?;
        Ok(())
    }

    pub fn select_chat(&mut self, peer_id: &str) -> Result<(), SessionError> {
        self.presence.select_chat(peer_id)?;
        self.chat.mark_read(peer_id);
        Ok(())
    }

    pub fn clear_chat(&mut self) {
        self.presence.clear_chat();
    }

    pub fn refresh_presence(&mut self) -> Result<(), SessionError> {
        self.presence.refresh(&mut self.link)
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        let active_chat = self.presence.active_chat().map(str::to_string);
        let active_thread = active_chat
            .as_deref()
            .map(|peer| self.chat.thread(peer).to_vec())
            .unwrap_or_default();

        SessionSnapshot {
            connection: self.link.connection_state(),
            pending_questions: self.requests.pending_questions().into_iter().cloned().collect(),
            pending_tasks: self.requests.pending_tasks().into_iter().cloned().collect(),
            history: self.requests.all().to_vec(),
            peers: self.presence.peers().to_vec(),
            active_chat,
            active_thread,
            unread: self.chat.unread_counts().clone(),
        }
    }

    pub fn connection(&self) -> &ConnectionManager<T> {
        &self.link
    }

    pub fn connection_mut(&mut self) -> &mut ConnectionManager<T> {
        &mut self.link
    }

    pub fn requests(&self) -> &RequestStore {
        &self.requests
    }

    pub fn presence(&self) -> &PresenceDirectory {
        &self.presence
    }

    pub fn chat(&self) -> &ChatChannel {
        &self.chat
    }
}
