//! Wire types for the agent-assist WebSocket protocol.
//!
//! Every frame carries one [`Envelope`]: a command tag plus the payload field
//! that belongs to it. Envelopes are protobuf-encoded on binary frames and
//! JSON-encoded (original PascalCase field names) on text frames; see
//! [`codec`] for both paths.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

pub mod codec;

pub use codec::{
    decode, decode_inbound, encode, encode_text, CodecError, Frame, Inbound, ReplyNotice,
};

/// MCP result content discriminators.
pub const CONTENT_TEXT: i32 = 1;
pub const CONTENT_IMAGE: i32 = 2;
pub const CONTENT_AUDIO: i32 = 3;
pub const CONTENT_EMBEDDED_RESOURCE: i32 = 4;

/// Closed set of command tags understood by this client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    UserLogin,
    AskQuestion,
    AskQuestionReply,
    AskQuestionReplyNotification,
    WorkReport,
    WorkReportReply,
    WorkReportReplyNotification,
    RequestCancelled,
    GetOnlineUsers,
    SendChatMessage,
    ChatMessageNotification,
    UserConnectionStatusNotification,
    CheckMessageValidity,
    GetPendingMessages,
}

impl Command {
    pub fn as_str(self) -> &'static str {
        match self {
            Command::UserLogin => "UserLogin",
            Command::AskQuestion => "AskQuestion",
            Command::AskQuestionReply => "AskQuestionReply",
            Command::AskQuestionReplyNotification => "AskQuestionReplyNotification",
            Command::WorkReport => "WorkReport",
            Command::WorkReportReply => "WorkReportReply",
            Command::WorkReportReplyNotification => "WorkReportReplyNotification",
            Command::RequestCancelled => "RequestCancelled",
            Command::GetOnlineUsers => "GetOnlineUsers",
            Command::SendChatMessage => "SendChatMessage",
            Command::ChatMessageNotification => "ChatMessageNotification",
            Command::UserConnectionStatusNotification => "UserConnectionStatusNotification",
            Command::CheckMessageValidity => "CheckMessageValidity",
            Command::GetPendingMessages => "GetPendingMessages",
        }
    }

    /// Parses a wire tag. The `TaskFinish*` spellings used by older servers
    /// map onto the `WorkReport*` commands.
    pub fn parse(tag: &str) -> Option<Self> {
        let command = match tag {
            "UserLogin" => Command::UserLogin,
            "AskQuestion" => Command::AskQuestion,
            "AskQuestionReply" => Command::AskQuestionReply,
            "AskQuestionReplyNotification" => Command::AskQuestionReplyNotification,
            "WorkReport" | "TaskFinish" => Command::WorkReport,
            "WorkReportReply" | "TaskFinishReply" => Command::WorkReportReply,
            "WorkReportReplyNotification" | "TaskFinishReplyNotification" => {
                Command::WorkReportReplyNotification
            }
            "RequestCancelled" => Command::RequestCancelled,
            "GetOnlineUsers" => Command::GetOnlineUsers,
            "SendChatMessage" => Command::SendChatMessage,
            "ChatMessageNotification" => Command::ChatMessageNotification,
            "UserConnectionStatusNotification" => Command::UserConnectionStatusNotification,
            "CheckMessageValidity" => Command::CheckMessageValidity,
            "GetPendingMessages" => Command::GetPendingMessages,
            _ => return None,
        };
        Some(command)
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The two kinds of agent-originated request an operator acts on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RequestKind {
    Question,
    TaskReport,
}

impl RequestKind {
    /// Maps the `MessageType` string of cancellation and pending-message
    /// payloads.
    pub fn from_message_type(message_type: &str) -> Option<Self> {
        match message_type {
            "AskQuestion" => Some(RequestKind::Question),
            "WorkReport" | "TaskFinish" => Some(RequestKind::TaskReport),
            _ => None,
        }
    }
}

impl fmt::Display for RequestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestKind::Question => f.write_str("question"),
            RequestKind::TaskReport => f.write_str("task report"),
        }
    }
}

#[derive(Clone, PartialEq, prost::Message, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct TextContent {
    #[prost(string, tag = "1")]
    #[serde(alias = "type")]
    pub r#type: String,
    #[prost(string, tag = "2")]
    #[serde(alias = "text")]
    pub text: String,
}

#[derive(Clone, PartialEq, prost::Message, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct ImageContent {
    #[prost(string, tag = "1")]
    pub r#type: String,
    #[prost(string, tag = "2")]
    pub data: String,
    #[prost(string, tag = "3")]
    pub mime_type: String,
}

#[derive(Clone, PartialEq, prost::Message, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct AudioContent {
    #[prost(string, tag = "1")]
    pub r#type: String,
    #[prost(string, tag = "2")]
    pub data: String,
    #[prost(string, tag = "3")]
    pub mime_type: String,
}

#[derive(Clone, PartialEq, prost::Message, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct EmbeddedResource {
    #[prost(string, tag = "1")]
    pub r#type: String,
    #[prost(string, tag = "2")]
    pub uri: String,
    #[prost(string, tag = "3")]
    pub mime_type: String,
    #[prost(bytes = "vec", tag = "4")]
    pub data: Vec<u8>,
}

#[derive(Clone, PartialEq, prost::Message, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct McpResultContent {
    #[prost(int32, tag = "1")]
    #[serde(alias = "type")]
    pub r#type: i32,
    #[prost(message, optional, tag = "2")]
    #[serde(alias = "text")]
    pub text: Option<TextContent>,
    #[prost(message, optional, tag = "3")]
    pub image: Option<ImageContent>,
    #[prost(message, optional, tag = "4")]
    pub audio: Option<AudioContent>,
    #[prost(message, optional, tag = "5")]
    pub embedded_resource: Option<EmbeddedResource>,
}

impl McpResultContent {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            r#type: CONTENT_TEXT,
            text: Some(TextContent {
                r#type: "text".to_string(),
                text: text.into(),
            }),
            image: None,
            audio: None,
            embedded_resource: None,
        }
    }
}

/// Returns the first text item of a result content list, if any.
pub fn first_text(contents: &[McpResultContent]) -> Option<&str> {
    contents
        .iter()
        .filter(|c| c.r#type == CONTENT_TEXT)
        .find_map(|c| c.text.as_ref())
        .map(|t| t.text.as_str())
}

#[derive(Clone, PartialEq, prost::Message, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct McpAskQuestionRequest {
    #[prost(string, tag = "1")]
    pub project_directory: String,
    #[prost(string, tag = "2")]
    pub question: String,
    #[prost(int32, tag = "3")]
    pub timeout: i32,
}

#[derive(Clone, PartialEq, prost::Message, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct AskQuestionRequest {
    #[prost(string, tag = "1")]
    #[serde(rename = "ID")]
    pub id: String,
    #[prost(string, tag = "2")]
    pub user_token: String,
    #[prost(message, optional, tag = "3")]
    pub request: Option<McpAskQuestionRequest>,
}

#[derive(Clone, PartialEq, prost::Message, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct AskQuestionResponse {
    #[prost(string, tag = "1")]
    #[serde(rename = "ID")]
    pub id: String,
    #[prost(bool, tag = "2")]
    pub is_error: bool,
    #[prost(map = "string, string", tag = "3")]
    pub meta: HashMap<String, String>,
    #[prost(message, repeated, tag = "4")]
    #[serde(alias = "contents")]
    pub contents: Vec<McpResultContent>,
}

impl AskQuestionResponse {
    pub fn text_reply(id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            is_error: false,
            meta: HashMap::new(),
            contents: vec![McpResultContent::text(text)],
        }
    }
}

#[derive(Clone, PartialEq, prost::Message, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct McpWorkReportRequest {
    #[prost(string, tag = "1")]
    pub project_directory: String,
    #[prost(string, tag = "2")]
    pub summary: String,
    #[prost(int32, tag = "3")]
    pub timeout: i32,
}

#[derive(Clone, PartialEq, prost::Message, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct WorkReportRequest {
    #[prost(string, tag = "1")]
    #[serde(rename = "ID")]
    pub id: String,
    #[prost(string, tag = "2")]
    pub user_token: String,
    #[prost(message, optional, tag = "3")]
    pub request: Option<McpWorkReportRequest>,
}

#[derive(Clone, PartialEq, prost::Message, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct WorkReportResponse {
    #[prost(string, tag = "1")]
    #[serde(rename = "ID")]
    pub id: String,
    #[prost(bool, tag = "2")]
    pub is_error: bool,
    #[prost(map = "string, string", tag = "3")]
    pub meta: HashMap<String, String>,
    #[prost(message, repeated, tag = "4")]
    #[serde(alias = "contents")]
    pub contents: Vec<McpResultContent>,
}

impl WorkReportResponse {
    pub fn text_reply(id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            is_error: false,
            meta: HashMap::new(),
            contents: vec![McpResultContent::text(text)],
        }
    }
}

#[derive(Clone, PartialEq, prost::Message, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct UserLoginResponse {
    #[prost(string, tag = "1")]
    pub client_id: String,
    #[prost(bool, tag = "2")]
    pub success: bool,
    #[prost(string, tag = "3")]
    pub error_message: String,
}

#[derive(Clone, PartialEq, prost::Message, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct OnlineUser {
    #[prost(string, tag = "1")]
    pub client_id: String,
    #[prost(string, tag = "2")]
    pub nickname: String,
    /// Unix seconds.
    #[prost(int64, tag = "3")]
    pub connected_at: i64,
}

#[derive(Clone, PartialEq, prost::Message, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct GetOnlineUsersResponse {
    #[prost(message, repeated, tag = "1")]
    pub online_users: Vec<OnlineUser>,
    #[prost(int32, tag = "2")]
    pub total_count: i32,
}

#[derive(Clone, PartialEq, prost::Message, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct SendChatMessageRequest {
    #[prost(string, tag = "1")]
    pub receiver_client_id: String,
    #[prost(string, tag = "2")]
    pub content: String,
}

#[derive(Clone, PartialEq, prost::Message, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct ChatMessage {
    #[prost(string, tag = "1")]
    pub message_id: String,
    #[prost(string, tag = "2")]
    pub sender_client_id: String,
    #[prost(string, tag = "3")]
    pub sender_nickname: String,
    #[prost(string, tag = "4")]
    pub receiver_client_id: String,
    #[prost(string, tag = "5")]
    pub receiver_nickname: String,
    #[prost(string, tag = "6")]
    pub content: String,
    /// Unix seconds.
    #[prost(int64, tag = "7")]
    pub sent_at: i64,
}

#[derive(Clone, PartialEq, prost::Message, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct ChatMessageNotification {
    #[prost(message, optional, tag = "1")]
    pub chat_message: Option<ChatMessage>,
}

#[derive(Clone, PartialEq, prost::Message, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct UserConnectionStatusNotification {
    #[prost(message, optional, tag = "1")]
    pub user: Option<OnlineUser>,
    /// `"connected"` or `"disconnected"`.
    #[prost(string, tag = "2")]
    pub status: String,
    #[prost(int64, tag = "3")]
    pub timestamp: i64,
}

#[derive(Clone, PartialEq, prost::Message, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct RequestCancelledNotification {
    #[prost(string, tag = "1")]
    pub request_id: String,
    #[prost(string, tag = "2")]
    pub reason: String,
    #[prost(string, tag = "3")]
    pub message_type: String,
}

#[derive(Clone, PartialEq, prost::Message, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct CheckMessageValidityRequest {
    #[prost(string, repeated, tag = "1")]
    pub request_ids: Vec<String>,
}

#[derive(Clone, PartialEq, prost::Message, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct CheckMessageValidityResponse {
    #[prost(map = "string, bool", tag = "1")]
    pub validity: HashMap<String, bool>,
}

#[derive(Clone, PartialEq, prost::Message, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct PendingMessage {
    #[prost(string, tag = "1")]
    pub message_type: String,
    #[prost(message, optional, tag = "2")]
    pub ask_question_request: Option<AskQuestionRequest>,
    #[prost(message, optional, tag = "3")]
    #[serde(alias = "TaskFinishRequest")]
    pub work_report_request: Option<WorkReportRequest>,
    #[prost(int64, tag = "4")]
    pub created_at: i64,
    #[prost(int32, tag = "5")]
    pub timeout: i32,
}

#[derive(Clone, PartialEq, prost::Message, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct GetPendingMessagesResponse {
    #[prost(message, repeated, tag = "1")]
    pub pending_messages: Vec<PendingMessage>,
    #[prost(int32, tag = "2")]
    pub total_count: i32,
}

/// The single wire message structure.
#[derive(Clone, PartialEq, prost::Message, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct Envelope {
    #[prost(string, tag = "1")]
    pub cmd: String,
    #[prost(message, optional, tag = "2")]
    pub ask_question_request: Option<AskQuestionRequest>,
    #[prost(message, optional, tag = "3")]
    #[serde(alias = "TaskFinishRequest")]
    pub work_report_request: Option<WorkReportRequest>,
    #[prost(message, optional, tag = "4")]
    pub ask_question_response: Option<AskQuestionResponse>,
    #[prost(message, optional, tag = "5")]
    #[serde(alias = "TaskFinishResponse")]
    pub work_report_response: Option<WorkReportResponse>,
    #[prost(string, tag = "6")]
    pub str_param: String,
    #[prost(message, optional, tag = "7")]
    pub request_cancelled_notification: Option<RequestCancelledNotification>,
    #[prost(message, optional, tag = "8")]
    pub get_online_users_response: Option<GetOnlineUsersResponse>,
    #[prost(message, optional, tag = "9")]
    pub send_chat_message_request: Option<SendChatMessageRequest>,
    #[prost(message, optional, tag = "10")]
    pub chat_message_notification: Option<ChatMessageNotification>,
    #[prost(message, optional, tag = "11")]
    pub user_login_response: Option<UserLoginResponse>,
    #[prost(message, optional, tag = "12")]
    pub user_connection_status_notification: Option<UserConnectionStatusNotification>,
    #[prost(string, tag = "13")]
    pub nickname: String,
    #[prost(message, optional, tag = "14")]
    pub check_message_validity_request: Option<CheckMessageValidityRequest>,
    #[prost(message, optional, tag = "15")]
    pub check_message_validity_response: Option<CheckMessageValidityResponse>,
    #[prost(message, optional, tag = "16")]
    pub get_pending_messages_response: Option<GetPendingMessagesResponse>,
}

impl Envelope {
    pub fn new(command: Command) -> Self {
        Self {
            cmd: command.as_str().to_string(),
            ..Default::default()
        }
    }

    pub fn command(&self) -> Option<Command> {
        Command::parse(&self.cmd)
    }

    pub fn user_login(token: impl Into<String>, nickname: impl Into<String>) -> Self {
        Self {
            str_param: token.into(),
            nickname: nickname.into(),
            ..Self::new(Command::UserLogin)
        }
    }

    /// Reply to a question. The server correlates on the original request,
    /// so it travels back unchanged next to the response.
    pub fn ask_question_reply(original: AskQuestionRequest, response: AskQuestionResponse) -> Self {
        Self {
            ask_question_request: Some(original),
            ask_question_response: Some(response),
            ..Self::new(Command::AskQuestionReply)
        }
    }

    pub fn work_report_reply(original: WorkReportRequest, response: WorkReportResponse) -> Self {
        Self {
            work_report_request: Some(original),
            work_report_response: Some(response),
            ..Self::new(Command::WorkReportReply)
        }
    }

    pub fn get_online_users() -> Self {
        Self::new(Command::GetOnlineUsers)
    }

    pub fn send_chat_message(receiver_client_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            send_chat_message_request: Some(SendChatMessageRequest {
                receiver_client_id: receiver_client_id.into(),
                content: content.into(),
            }),
            ..Self::new(Command::SendChatMessage)
        }
    }

    pub fn check_message_validity(request_ids: Vec<String>) -> Self {
        Self {
            check_message_validity_request: Some(CheckMessageValidityRequest { request_ids }),
            ..Self::new(Command::CheckMessageValidity)
        }
    }

    pub fn get_pending_messages() -> Self {
        Self::new(Command::GetPendingMessages)
    }
}
