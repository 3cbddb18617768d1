use assist_protocol::{encode, Envelope, Frame};
use serde::Serialize;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::{validate_endpoint, Credentials};
use crate::error::SessionError;
use crate::transport::{ConnectionEvent, EventSender, Transport};

/// Exponential backoff without jitter: retry `n` (1-based) waits
/// `base_delay * 2^(n-1)`, for at most `max_attempts` retries in a row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    base_delay: Duration,
    max_attempts: u32,
}

impl ReconnectPolicy {
    pub fn new(base_delay: Duration, max_attempts: u32) -> Self {
        Self {
            base_delay,
            max_attempts,
        }
    }

    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        self.base_delay.saturating_mul(1u32 << exponent)
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::new(Duration::from_millis(1000), 5)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Idle,
    Connecting,
    Open,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ConnectionStatus {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConnectionState {
    pub status: ConnectionStatus,
    pub self_client_id: Option<String>,
    pub reconnect_attempt: u32,
    pub last_error: Option<String>,
}

/// What became of an unexpected close.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryPlan {
    Scheduled { attempt: u32, delay: Duration },
    Exhausted,
}

/// Result of feeding one [`ConnectionEvent`] to the manager.
#[derive(Debug, Clone, PartialEq)]
pub enum LinkUpdate {
    Opened,
    Frame(Frame),
    Closed {
        reason: Option<String>,
        retry: RetryPlan,
    },
    Error(String),
    Reconnecting {
        attempt: u32,
    },
    Ignored,
}

/// Anything that can put an envelope on the wire.
pub trait Outbox {
    fn send(&mut self, envelope: Envelope) -> Result<(), SessionError>;
}

/// Resolves once the transport reports the connection open, or fails with the
/// transport error that ended the attempt.
pub struct ConnectHandle {
    rx: oneshot::Receiver<Result<(), SessionError>>,
}

impl ConnectHandle {
    fn resolved(result: Result<(), SessionError>) -> Self {
        let (tx, rx) = oneshot::channel();
        let _ = tx.send(result);
        Self { rx }
    }

    pub async fn wait(self) -> Result<(), SessionError> {
        self.rx.await.unwrap_or_else(|_| {
            Err(SessionError::Transport(
                "connection attempt abandoned".to_string(),
            ))
        })
    }
}

struct ReconnectTimer {
    handle: JoinHandle<()>,
}

impl ReconnectTimer {
    fn schedule(delay: Duration, generation: u64, events: EventSender) -> Self {
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = events.send(ConnectionEvent::ReconnectDue { generation });
        });
        Self { handle }
    }

    fn cancel(self) {
        self.handle.abort();
    }
}

struct Target {
    url: String,
    credentials: Credentials,
}

/// Owns the one logical connection to the server: `Idle → Connecting → Open →
/// Closed`, and back to `Connecting` on the reconnect timer unless the
/// operator disconnected.
pub struct ConnectionManager<T: Transport> {
    transport: T,
    events: EventSender,
    policy: ReconnectPolicy,
    state: LinkState,
    generation: u64,
    attempt: u32,
    manual: bool,
    target: Option<Target>,
    timer: Option<ReconnectTimer>,
    last_delay: Option<Duration>,
    waiters: Vec<oneshot::Sender<Result<(), SessionError>>>,
    self_client_id: Option<String>,
    last_error: Option<String>,
}

impl<T: Transport> ConnectionManager<T> {
    pub fn new(transport: T, events: EventSender, policy: ReconnectPolicy) -> Self {
        Self {
            transport,
            events,
            policy,
            state: LinkState::Idle,
            generation: 0,
            attempt: 0,
            manual: false,
            target: None,
            timer: None,
            last_delay: None,
            waiters: Vec::new(),
            self_client_id: None,
            last_error: None,
        }
    }

    pub fn connect(&mut self, endpoint: &str, credentials: Credentials) -> ConnectHandle {
        if matches!(self.state, LinkState::Connecting | LinkState::Open) {
            debug!("Connect requested while already {:?}", self.state);
            return ConnectHandle::resolved(Ok(()));
        }

        let url = match validate_endpoint(endpoint) {
            Ok(url) => url,
            Err(e) => {
                error!("Refusing to connect: {}", e);
                self.last_error = Some(e.to_string());
                return ConnectHandle::resolved(Err(e));
            }
        };

        // An explicit connect starts a fresh retry budget.
        self.manual = false;
        self.attempt = 0;
        self.cancel_timer();
        self.target = Some(Target {
            url: url.to_string(),
            credentials,
        });

        let (tx, rx) = oneshot::channel();
        self.waiters.push(tx);
        self.open_transport();
        ConnectHandle { rx }
    }

    /// Operator-initiated close. Cancels any pending reconnect and resets the
    /// connection state.
    pub fn disconnect(&mut self) {
        info!("Disconnecting");
        self.manual = true;
        self.cancel_timer();
        self.generation += 1;
        self.transport.close();
        self.state = LinkState::Idle;
        self.attempt = 0;
        self.last_delay = None;
        self.self_client_id = None;
        self.last_error = None;
        self.reject_waiters("disconnected");
    }

    pub fn handle_event(&mut self, event: ConnectionEvent) -> LinkUpdate {
        match event {
            ConnectionEvent::Opened { generation } => {
                if generation != self.generation || self.state != LinkState::Connecting {
                    return LinkUpdate::Ignored;
                }
                self.on_opened();
                LinkUpdate::Opened
            }
            ConnectionEvent::Frame { generation, frame } => {
                if generation != self.generation || self.state != LinkState::Open {
                    debug!("Dropping frame from stale connection {}", generation);
                    return LinkUpdate::Ignored;
                }
                LinkUpdate::Frame(frame)
            }
            ConnectionEvent::Error {
                generation,
                message,
            } => {
                if generation != self.generation || self.manual {
                    return LinkUpdate::Ignored;
                }
                // The close handler decides what happens next.
                error!("Connection error: {}", message);
                self.last_error = Some(message.clone());
                self.reject_waiters(&message);
                LinkUpdate::Error(message)
            }
            ConnectionEvent::Closed { generation, reason } => {
                if generation != self.generation
                    || self.manual
                    || !matches!(self.state, LinkState::Connecting | LinkState::Open)
                {
                    return LinkUpdate::Ignored;
                }
                warn!("Connection closed: {}", reason.as_deref().unwrap_or("no reason"));
                self.state = LinkState::Closed;
                self.self_client_id = None;
                self.reject_waiters("connection closed");
                let retry = self.schedule_reconnect();
                LinkUpdate::Closed { reason, retry }
            }
            ConnectionEvent::ReconnectDue { generation } => {
                if generation != self.generation
                    || self.manual
                    || self.state != LinkState::Closed
                {
                    return LinkUpdate::Ignored;
                }
                self.timer = None;
                info!("Reconnect attempt {}", self.attempt);
                self.open_transport();
                LinkUpdate::Reconnecting {
                    attempt: self.attempt,
                }
            }
        }
    }

    fn on_opened(&mut self) {
        self.attempt = 0;
        self.last_delay = None;
        self.last_error = None;

        if let Some(target) = &self.target {
            let login = Envelope::user_login(
                target.credentials.token.clone(),
                target.credentials.display_name.clone(),
            );
            if let Err(e) = self.transport.send(Frame::Binary(encode(&login))) {
                warn!("Failed to send login: {}", e);
            }
        }

        self.state = LinkState::Open;
        for waiter in self.waiters.drain(..) {
            let _ = waiter.send(Ok(()));
        }
    }

    fn open_transport(&mut self) {
        let Some(url) = self.target.as_ref().map(|t| t.url.clone()) else {
            return;
        };

        self.generation += 1;
        self.state = LinkState::Connecting;
        info!("Connecting to {}", url);

        if let Err(e) = self.transport.open(&url, self.generation) {
            let _ = self.events.send(ConnectionEvent::Error {
                generation: self.generation,
                message: e.to_string(),
            });
            let _ = self.events.send(ConnectionEvent::Closed {
                generation: self.generation,
                reason: Some(e.to_string()),
            });
        }
    }

    fn schedule_reconnect(&mut self) -> RetryPlan {
        if self.attempt >= self.policy.max_attempts() {
            warn!(
                "Giving up after {} reconnect attempts",
                self.policy.max_attempts()
            );
            self.last_delay = None;
            return RetryPlan::Exhausted;
        }

        self.attempt += 1;
        let delay = self.policy.delay_for(self.attempt);
        info!(
            "Scheduling reconnect attempt {} in {}ms",
            self.attempt,
            delay.as_millis()
        );

        self.cancel_timer();
        self.timer = Some(ReconnectTimer::schedule(
            delay,
            self.generation,
            self.events.clone(),
        ));
        self.last_delay = Some(delay);

        RetryPlan::Scheduled {
            attempt: self.attempt,
            delay,
        }
    }

    fn cancel_timer(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.cancel();
        }
    }

    fn reject_waiters(&mut self, message: &str) {
        for waiter in self.waiters.drain(..) {
            let _ = waiter.send(Err(SessionError::Transport(message.to_string())));
        }
    }

    pub fn state(&self) -> LinkState {
        self.state
    }

    pub fn is_open(&self) -> bool {
        self.state == LinkState::Open
    }

    pub fn status(&self) -> ConnectionStatus {
        match self.state {
            LinkState::Idle => ConnectionStatus::Disconnected,
            LinkState::Connecting if self.attempt > 0 => ConnectionStatus::Reconnecting,
            LinkState::Connecting => ConnectionStatus::Connecting,
            LinkState::Open => ConnectionStatus::Connected,
            LinkState::Closed if self.timer.is_some() => ConnectionStatus::Reconnecting,
            LinkState::Closed => ConnectionStatus::Disconnected,
        }
    }

    pub fn connection_state(&self) -> ConnectionState {
        ConnectionState {
            status: self.status(),
            self_client_id: self.self_client_id.clone(),
            reconnect_attempt: self.attempt,
            last_error: self.last_error.clone(),
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn reconnect_attempt(&self) -> u32 {
        self.attempt
    }

    /// Delay of the currently scheduled reconnect, if any.
    pub fn scheduled_delay(&self) -> Option<Duration> {
        self.last_delay
    }

    pub fn has_pending_reconnect(&self) -> bool {
        self.timer.is_some()
    }

    pub fn credentials(&self) -> Option<&Credentials> {
        self.target.as_ref().map(|t| &t.credentials)
    }

    pub fn self_client_id(&self) -> Option<&str> {
        self.self_client_id.as_deref()
    }

    pub fn set_self_client_id(&mut self, client_id: impl Into<String>) {
        self.self_client_id = Some(client_id.into());
    }

    pub fn record_error(&mut self, message: impl Into<String>) {
        self.last_error = Some(message.into());
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }
}

impl<T: Transport> Outbox for ConnectionManager<T> {
    fn send(&mut self, envelope: Envelope) -> Result<(), SessionError> {
        if self.state != LinkState::Open {
            error!("Cannot send {}: WebSocket is not connected", envelope.cmd);
            return Err(SessionError::NotConnected);
        }

        self.transport
            .send(Frame::Binary(encode(&envelope)))
            .inspect_err(|e| error!("Error sending {}: {}", envelope.cmd, e))
    }
}

impl<T: Transport> Drop for ConnectionManager<T> {
    fn drop(&mut self) {
        self.cancel_timer();
    }
}
