use assist_protocol::{CodecError, RequestKind};
use thiserror::Error;

/// Errors surfaced by the session engine. None of them is fatal to the
/// session: transport failures feed the reconnect policy, decode failures
/// drop one message, and correlation failures stay local.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("transport error: {0}")]
    Transport(String),
    #[error("not connected")]
    NotConnected,
    #[error(transparent)]
    ProtocolDecode(#[from] CodecError),
    #[error(transparent)]
    Correlation(#[from] CorrelationError),
    #[error("{0} is not in the online roster")]
    UnknownPeer(String),
    #[error("chat message is empty")]
    EmptyMessage,
    #[error("invalid endpoint {url}: {reason}")]
    InvalidEndpoint { url: String, reason: String },
}

/// A reply or confirmation that cannot be matched to an open request.
/// Reported to the operator, never sent to the server.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CorrelationError {
    #[error("request {0} not found")]
    UnknownRequest(String),
    #[error("request {0} has already been answered")]
    AlreadyAnswered(String),
    #[error("request {id} is a {actual}, not a {expected}")]
    KindMismatch {
        id: String,
        expected: RequestKind,
        actual: RequestKind,
    },
}
