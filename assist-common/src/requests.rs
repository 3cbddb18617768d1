use assist_protocol::{
    AskQuestionRequest, AskQuestionResponse, Envelope, PendingMessage, RequestKind,
    WorkReportRequest, WorkReportResponse,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use tracing::{debug, info, warn};

use crate::client::Outbox;
use crate::error::{CorrelationError, SessionError};

pub const QUESTION_ANSWERED_ELSEWHERE: &str = "Question has been answered by another user";
pub const TASK_CONFIRMED_ELSEWHERE: &str = "Task has been completed by another user";
pub const DEFAULT_CONFIRM_TEXT: &str = "Task confirmed";
pub const STALE_REQUEST_REASON: &str = "no longer pending on server";

/// The inbound request as received, kept so a reply can echo it verbatim.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum OriginalRequest {
    Question(AskQuestionRequest),
    TaskReport(WorkReportRequest),
}

impl OriginalRequest {
    pub fn id(&self) -> &str {
        match self {
            OriginalRequest::Question(request) => &request.id,
            OriginalRequest::TaskReport(request) => &request.id,
        }
    }

    pub fn kind(&self) -> RequestKind {
        match self {
            OriginalRequest::Question(_) => RequestKind::Question,
            OriginalRequest::TaskReport(_) => RequestKind::TaskReport,
        }
    }

    fn reply_envelope(&self, text: &str) -> Envelope {
        match self {
            OriginalRequest::Question(request) => Envelope::ask_question_reply(
                request.clone(),
                AskQuestionResponse::text_reply(request.id.clone(), text),
            ),
            OriginalRequest::TaskReport(request) => Envelope::work_report_reply(
                request.clone(),
                WorkReportResponse::text_reply(request.id.clone(), text),
            ),
        }
    }
}

impl TryFrom<PendingMessage> for OriginalRequest {
    type Error = String;

    fn try_from(message: PendingMessage) -> Result<Self, Self::Error> {
        match RequestKind::from_message_type(&message.message_type) {
            Some(RequestKind::Question) => message
                .ask_question_request
                .map(OriginalRequest::Question)
                .ok_or_else(|| "AskQuestion entry without a request".to_string()),
            Some(RequestKind::TaskReport) => message
                .work_report_request
                .map(OriginalRequest::TaskReport)
                .ok_or_else(|| "WorkReport entry without a request".to_string()),
            None => Err(format!("unknown message type '{}'", message.message_type)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PendingRequest {
    pub id: String,
    pub kind: RequestKind,
    pub project_context: String,
    /// Question text or task summary.
    pub payload: String,
    pub timeout_seconds: u32,
    pub created_at: DateTime<Utc>,
    pub answered: bool,
    pub cancelled: bool,
    pub answer_text: Option<String>,
    pub answered_at: Option<DateTime<Utc>>,
    pub answered_locally: bool,
    pub answered_by_display_name: Option<String>,
    pub cancel_reason: Option<String>,
    pub original: OriginalRequest,
}

impl PendingRequest {
    fn new(original: OriginalRequest, created_at: DateTime<Utc>) -> Self {
        let (project_context, payload, timeout) = match &original {
            OriginalRequest::Question(request) => request
                .request
                .as_ref()
                .map(|r| (r.project_directory.clone(), r.question.clone(), r.timeout))
                .unwrap_or_default(),
            OriginalRequest::TaskReport(request) => request
                .request
                .as_ref()
                .map(|r| (r.project_directory.clone(), r.summary.clone(), r.timeout))
                .unwrap_or_default(),
        };

        Self {
            id: original.id().to_string(),
            kind: original.kind(),
            project_context,
            payload,
            timeout_seconds: u32::try_from(timeout).unwrap_or(0),
            created_at,
            answered: false,
            cancelled: false,
            answer_text: None,
            answered_at: None,
            answered_locally: false,
            answered_by_display_name: None,
            cancel_reason: None,
            original,
        }
    }

    pub fn is_open(&self) -> bool {
        !self.answered
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arrival {
    Created,
    Duplicate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Settlement {
    Applied,
    AlreadyAnswered,
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cancellation {
    Cancelled,
    AlreadySettled,
    NotFound,
}

/// Every agent request seen this session, in arrival order. Entries are never
/// removed; `answered` only ever goes from false to true and the first
/// writer (local reply, remote notification or cancellation) wins.
#[derive(Debug, Default)]
pub struct RequestStore {
    entries: Vec<PendingRequest>,
    index: HashMap<String, usize>,
}

impl RequestStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_inbound_request(&mut self, original: OriginalRequest) -> Arrival {
        self.insert(original, Utc::now())
    }

    fn insert(&mut self, original: OriginalRequest, created_at: DateTime<Utc>) -> Arrival {
        if self.index.contains_key(original.id()) {
            debug!("Ignoring duplicate {} {}", original.kind(), original.id());
            return Arrival::Duplicate;
        }

        let entry = PendingRequest::new(original, created_at);
        info!("Received {} {}", entry.kind, entry.id);
        self.index.insert(entry.id.clone(), self.entries.len());
        self.entries.push(entry);
        Arrival::Created
    }

    /// Answers an open request of any kind.
    pub fn reply(
        &mut self,
        id: &str,
        text: &str,
        outbox: &mut impl Outbox,
    ) -> Result<&PendingRequest, SessionError> {
        self.answer(id, None, text, outbox)
    }

    /// Answers an open request, failing if it is not of the `expected` kind.
    pub fn reply_to(
        &mut self,
        expected: RequestKind,
        id: &str,
        text: &str,
        outbox: &mut impl Outbox,
    ) -> Result<&PendingRequest, SessionError> {
        self.answer(id, Some(expected), text, outbox)
    }

    pub fn confirm(
        &mut self,
        id: &str,
        text: Option<&str>,
        outbox: &mut impl Outbox,
    ) -> Result<&PendingRequest, SessionError> {
        let text = text
            .filter(|t| !t.trim().is_empty())
            .unwrap_or(DEFAULT_CONFIRM_TEXT);
        self.answer(id, Some(RequestKind::TaskReport), text, outbox)
    }

    fn answer(
        &mut self,
        id: &str,
        expected: Option<RequestKind>,
        text: &str,
        outbox: &mut impl Outbox,
    ) -> Result<&PendingRequest, SessionError> {
        let position = *self
            .index
            .get(id)
            .ok_or_else(|| CorrelationError::UnknownRequest(id.to_string()))?;
        let entry = &mut self.entries[position];

        if let Some(expected) = expected {
            if entry.kind != expected {
                return Err(CorrelationError::KindMismatch {
                    id: id.to_string(),
                    expected,
                    actual: entry.kind,
                }
                .into());
            }
        }
        if entry.answered {
            return Err(CorrelationError::AlreadyAnswered(id.to_string()).into());
        }

        // Only a reply that made it onto the wire settles the entry.
        outbox.send(entry.original.reply_envelope(text))?;

        entry.answered = true;
        entry.answered_locally = true;
        entry.answer_text = Some(text.to_string());
        entry.answered_at = Some(Utc::now());
        info!("Answered {} {}", entry.kind, entry.id);
        Ok(&*entry)
    }

    pub fn on_reply_notification(
        &mut self,
        id: &str,
        text: Option<&str>,
        answered_by: Option<&str>,
    ) -> Settlement {
        let Some(entry) = self.get_mut(id) else {
            debug!("Reply notification for unknown request {}", id);
            return Settlement::Unknown;
        };
        if entry.answered {
            return Settlement::AlreadyAnswered;
        }

        let placeholder = match entry.kind {
            RequestKind::Question => QUESTION_ANSWERED_ELSEWHERE,
            RequestKind::TaskReport => TASK_CONFIRMED_ELSEWHERE,
        };
        entry.answered = true;
        entry.answered_locally = false;
        entry.answer_text = Some(text.unwrap_or(placeholder).to_string());
        entry.answered_at = Some(Utc::now());
        entry.answered_by_display_name = answered_by.map(str::to_string);
        info!(
            "{} {} answered by {}",
            entry.kind,
            entry.id,
            answered_by.unwrap_or("another operator")
        );
        Settlement::Applied
    }

    pub fn on_cancellation(&mut self, id: &str, reason: Option<&str>) -> Cancellation {
        let Some(entry) = self.get_mut(id) else {
            warn!("Cancellation for unknown request {}", id);
            return Cancellation::NotFound;
        };
        if entry.answered {
            return Cancellation::AlreadySettled;
        }

        entry.answered = true;
        entry.cancelled = true;
        entry.answered_at = Some(Utc::now());
        entry.cancel_reason = reason.filter(|r| !r.trim().is_empty()).map(str::to_string);
        info!("{} {} cancelled", entry.kind, entry.id);
        Cancellation::Cancelled
    }

    /// Ids of every entry still waiting for an answer.
    pub fn pending_ids(&self) -> Vec<String> {
        self.entries
            .iter()
            .filter(|e| e.is_open())
            .map(|e| e.id.clone())
            .collect()
    }

    /// Settles every open entry the server reports as no longer valid and
    /// returns their ids.
    pub fn on_validity_report(&mut self, validity: &HashMap<String, bool>) -> Vec<String> {
        let stale: Vec<String> = validity
            .iter()
            .filter(|(_, valid)| !**valid)
            .map(|(id, _)| id.clone())
            .collect();

        let mut settled: Vec<String> = stale
            .into_iter()
            .filter(|id| self.on_cancellation(id, Some(STALE_REQUEST_REASON)) == Cancellation::Cancelled)
            .collect();
        settled.sort_by_key(|id| self.index.get(id).copied());
        settled
    }

    /// Feeds the server's list of pending messages through the normal arrival
    /// path and returns the ids that were new.
    pub fn on_pending_snapshot(&mut self, messages: Vec<PendingMessage>) -> Vec<String> {
        let mut created = Vec::new();
        for message in messages {
            let created_at = DateTime::from_timestamp(message.created_at, 0).unwrap_or_else(Utc::now);
            match OriginalRequest::try_from(message) {
                Ok(original) => {
                    let id = original.id().to_string();
                    if self.insert(original, created_at) == Arrival::Created {
                        created.push(id);
                    }
                }
                Err(e) => warn!("Skipping pending message: {}", e),
            }
        }
        created
    }

    pub fn get(&self, id: &str) -> Option<&PendingRequest> {
        self.index.get(id).map(|&i| &self.entries[i])
    }

    fn get_mut(&mut self, id: &str) -> Option<&mut PendingRequest> {
        let position = *self.index.get(id)?;
        self.entries.get_mut(position)
    }

    pub fn all(&self) -> &[PendingRequest] {
        &self.entries
    }

    pub fn pending_questions(&self) -> Vec<&PendingRequest> {
        self.pending_of(RequestKind::Question)
    }

    pub fn pending_tasks(&self) -> Vec<&PendingRequest> {
        self.pending_of(RequestKind::TaskReport)
    }

    fn pending_of(&self, kind: RequestKind) -> Vec<&PendingRequest> {
        self.entries
            .iter()
            .filter(|e| e.kind == kind && e.is_open())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
