use prost::Message;
use std::collections::HashMap;
use thiserror::Error;

use crate::{
    first_text, AskQuestionRequest, ChatMessage, Command, Envelope, OnlineUser, PendingMessage,
    RequestCancelledNotification, RequestKind, UserLoginResponse, WorkReportRequest,
};

/// One WebSocket data frame. Binary is the primary framing, text is the JSON
/// fallback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Binary(Vec<u8>),
    Text(String),
}

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("malformed binary frame: {0}")]
    Binary(#[from] prost::DecodeError),
    #[error("malformed text frame: {0}")]
    Text(#[from] serde_json::Error),
    #[error("{command} message is missing its {field} payload")]
    MissingPayload {
        command: Command,
        field: &'static str,
    },
    #[error("{command} message has invalid {field}: {value}")]
    InvalidField {
        command: Command,
        field: &'static str,
        value: String,
    },
}

/// Someone (possibly this client) answered or acknowledged a request.
#[derive(Debug, Clone, PartialEq)]
pub struct ReplyNotice {
    pub kind: RequestKind,
    pub request_id: String,
    pub text: Option<String>,
    pub answered_by: Option<String>,
}

/// Inbound messages, one variant per server → client command.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    LoginResponse(UserLoginResponse),
    AskQuestion(AskQuestionRequest),
    WorkReport(WorkReportRequest),
    ReplyNotification(ReplyNotice),
    RequestCancelled(RequestCancelledNotification),
    OnlineUsers(Vec<OnlineUser>),
    ChatMessage(ChatMessage),
    ConnectionStatus { user: OnlineUser, connected: bool },
    MessageValidity(HashMap<String, bool>),
    PendingMessages(Vec<PendingMessage>),
    /// A known tag that only ever travels client → server.
    Unexpected(Command),
    /// A tag this client does not know about.
    Unknown(String),
}

pub fn encode(envelope: &Envelope) -> Vec<u8> {
    envelope.encode_to_vec()
}

pub fn encode_text(envelope: &Envelope) -> Result<String, CodecError> {
    Ok(serde_json::to_string(envelope)?)
}

pub fn decode(frame: &Frame) -> Result<Envelope, CodecError> {
    match frame {
        Frame::Binary(bytes) => Ok(Envelope::decode(bytes.as_slice())?),
        Frame::Text(text) => Ok(serde_json::from_str(text)?),
    }
}

pub fn decode_inbound(frame: &Frame) -> Result<Inbound, CodecError> {
    Inbound::from_envelope(decode(frame)?)
}

fn required<T>(value: Option<T>, command: Command, field: &'static str) -> Result<T, CodecError> {
    value.ok_or(CodecError::MissingPayload { command, field })
}

fn non_empty(value: String) -> Option<String> {
    if value.trim().is_empty() {
        None
    } else {
        Some(value)
    }
}

impl Inbound {
    pub fn from_envelope(envelope: Envelope) -> Result<Self, CodecError> {
        let Some(command) = envelope.command() else {
            return Ok(Inbound::Unknown(envelope.cmd));
        };

        let inbound = match command {
            Command::UserLogin => Inbound::LoginResponse(required(
                envelope.user_login_response,
                command,
                "UserLoginResponse",
            )?),
            Command::AskQuestion => Inbound::AskQuestion(required(
                envelope.ask_question_request,
                command,
                "AskQuestionRequest",
            )?),
            Command::WorkReport => Inbound::WorkReport(required(
                envelope.work_report_request,
                command,
                "WorkReportRequest",
            )?),
            Command::AskQuestionReplyNotification => {
                let request = required(envelope.ask_question_request, command, "AskQuestionRequest")?;
                let text = envelope
                    .ask_question_response
                    .as_ref()
                    .and_then(|r| first_text(&r.contents))
                    .map(str::to_string)
                    .or_else(|| non_empty(envelope.str_param));
                Inbound::ReplyNotification(ReplyNotice {
                    kind: RequestKind::Question,
                    request_id: request.id,
                    text,
                    answered_by: non_empty(envelope.nickname),
                })
            }
            Command::WorkReportReplyNotification => {
                let request = required(envelope.work_report_request, command, "WorkReportRequest")?;
                let text = envelope
                    .work_report_response
                    .as_ref()
                    .and_then(|r| first_text(&r.contents))
                    .map(str::to_string)
                    .or_else(|| non_empty(envelope.str_param));
                Inbound::ReplyNotification(ReplyNotice {
                    kind: RequestKind::TaskReport,
                    request_id: request.id,
                    text,
                    answered_by: non_empty(envelope.nickname),
                })
            }
            Command::RequestCancelled => Inbound::RequestCancelled(required(
                envelope.request_cancelled_notification,
                command,
                "RequestCancelledNotification",
            )?),
            Command::GetOnlineUsers => Inbound::OnlineUsers(
                required(envelope.get_online_users_response, command, "GetOnlineUsersResponse")?
                    .online_users,
            ),
            Command::ChatMessageNotification => Inbound::ChatMessage(required(
                envelope
                    .chat_message_notification
                    .and_then(|n| n.chat_message),
                command,
                "ChatMessageNotification",
            )?),
            Command::UserConnectionStatusNotification => {
                let notification = required(
                    envelope.user_connection_status_notification,
                    command,
                    "UserConnectionStatusNotification",
                )?;
                let user = required(notification.user, command, "User")?;
                let connected = match notification.status.as_str() {
                    "connected" => true,
                    "disconnected" => false,
                    other => {
                        return Err(CodecError::InvalidField {
                            command,
                            field: "Status",
                            value: other.to_string(),
                        })
                    }
                };
                Inbound::ConnectionStatus { user, connected }
            }
            Command::CheckMessageValidity => Inbound::MessageValidity(
                required(
                    envelope.check_message_validity_response,
                    command,
                    "CheckMessageValidityResponse",
                )?
                .validity,
            ),
            Command::GetPendingMessages => Inbound::PendingMessages(
                required(
                    envelope.get_pending_messages_response,
                    command,
                    "GetPendingMessagesResponse",
                )?
                .pending_messages,
            ),
            Command::AskQuestionReply | Command::WorkReportReply | Command::SendChatMessage => {
                Inbound::Unexpected(command)
            }
        };

        Ok(inbound)
    }
}
