use assist_protocol::Frame;
use futures_util::{sink::SinkExt, stream::StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, warn};

use crate::error::SessionError;

/// Everything that can happen to the connection, delivered to the task that
/// owns the session. Each event carries the generation of the connection
/// attempt that produced it so late events from a replaced socket can be
/// told apart.
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionEvent {
    Opened { generation: u64 },
    Frame { generation: u64, frame: Frame },
    Closed { generation: u64, reason: Option<String> },
    Error { generation: u64, message: String },
    ReconnectDue { generation: u64 },
}

pub type EventSender = mpsc::UnboundedSender<ConnectionEvent>;
pub type EventReceiver = mpsc::UnboundedReceiver<ConnectionEvent>;

pub fn event_channel() -> (EventSender, EventReceiver) {
    mpsc::unbounded_channel()
}

/// Socket plumbing behind the connection manager. `open` returns immediately;
/// the outcome arrives later as [`ConnectionEvent`]s.
pub trait Transport {
    fn open(&mut self, url: &str, generation: u64) -> Result<(), SessionError>;

    fn send(&mut self, frame: Frame) -> Result<(), SessionError>;

    fn close(&mut self);
}

/// WebSocket transport backed by tokio-tungstenite.
pub struct WsTransport {
    events: EventSender,
    outbound: Option<mpsc::UnboundedSender<Message>>,
}

impl WsTransport {
    pub fn new(events: EventSender) -> Self {
        Self {
            events,
            outbound: None,
        }
    }
}

impl Transport for WsTransport {
    fn open(&mut self, url: &str, generation: u64) -> Result<(), SessionError> {
        self.close();

        let (tx, rx) = mpsc::unbounded_channel();
        self.outbound = Some(tx);
        tokio::spawn(run_socket(url.to_string(), generation, self.events.clone(), rx));
        Ok(())
    }

    fn send(&mut self, frame: Frame) -> Result<(), SessionError> {
        let outbound = self.outbound.as_ref().ok_or(SessionError::NotConnected)?;
        let message = match frame {
            Frame::Binary(data) => Message::Binary(data),
            Frame::Text(text) => Message::Text(text),
        };
        outbound
            .send(message)
            .map_err(|_| SessionError::Transport("socket writer has stopped".to_string()))
    }

    fn close(&mut self) {
        // Dropping the sender makes the socket task send a close frame and exit.
        self.outbound = None;
    }
}

async fn run_socket(
    url: String,
    generation: u64,
    events: EventSender,
    mut outbound: mpsc::UnboundedReceiver<Message>,
) {
    let socket = match connect_async(url.as_str()).await {
        Ok((socket, _response)) => socket,
        Err(e) => {
            let _ = events.send(ConnectionEvent::Error {
                generation,
                message: e.to_string(),
            });
            let _ = events.send(ConnectionEvent::Closed {
                generation,
                reason: Some(format!("connect failed: {}", e)),
            });
            return;
        }
    };

    info!("WebSocket connected to {}", url);
    let _ = events.send(ConnectionEvent::Opened { generation });

    let (mut sender, mut receiver) = socket.split();
    let mut reason = None;

    loop {
        tokio::select! {
            outgoing = outbound.recv() => match outgoing {
                Some(message) => {
                    if let Err(e) = sender.send(message).await {
                        warn!("WebSocket send failed: {}", e);
                        let _ = events.send(ConnectionEvent::Error {
                            generation,
                            message: e.to_string(),
                        });
                        break;
                    }
                }
                None => {
                    debug!("Closing WebSocket on request");
                    let _ = sender.send(Message::Close(None)).await;
                    return;
                }
            },
            incoming = receiver.next() => match incoming {
                Some(Ok(Message::Binary(data))) => {
                    let _ = events.send(ConnectionEvent::Frame {
                        generation,
                        frame: Frame::Binary(data),
                    });
                }
                Some(Ok(Message::Text(text))) => {
                    let _ = events.send(ConnectionEvent::Frame {
                        generation,
                        frame: Frame::Text(text),
                    });
                }
                Some(Ok(Message::Close(frame))) => {
                    reason = frame.map(|f| f.reason.to_string());
                    break;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    warn!("WebSocket error: {}", e);
                    let _ = events.send(ConnectionEvent::Error {
                        generation,
                        message: e.to_string(),
                    });
                    break;
                }
                None => break,
            }
        }
    }

    let _ = events.send(ConnectionEvent::Closed { generation, reason });
}
