//! Transport channel: the single persistent WebSocket connection.
//!
//! One background task owns the connection exclusively; the public
//! [`Channel`] handle talks to it over a command channel. All state
//! transitions (connect, disconnect, reconnect backoff, inbound frame
//! delivery) happen inside that task, one at a time, which keeps the
//! lifecycle serialized without any lock discipline around the socket.
//!
//! Reconnects use exponential backoff with no jitter: `base * 2^attempts`,
//! giving up for good once the attempt counter reaches the configured
//! maximum. Only an explicit `connect()` resumes after that.

pub mod backoff;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

use crate::config::RealtimeConfig;
use crate::dispatcher::EventDispatcher;
use crate::error::RealtimeError;
use crate::protocol::{AuthFrame, Envelope};

/// Connection lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// Snapshot of the channel's observable state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionStatus {
    pub state: ConnectionState,
    pub reconnect_attempts: u32,
    /// Outbound messages dropped because the channel was not connected
    pub dropped_sends: u64,
}

/// Transport-related configuration subset
#[derive(Debug, Clone)]
pub struct ChannelConfig {
    pub url: String,
    pub max_reconnect_attempts: u32,
    pub base_reconnect_delay: Duration,
    pub connect_timeout: Duration,
}

impl From<&RealtimeConfig> for ChannelConfig {
    fn from(config: &RealtimeConfig) -> Self {
        Self {
            url: config.ws_url.clone(),
            max_reconnect_attempts: config.max_reconnect_attempts,
            base_reconnect_delay: config.base_reconnect_delay,
            connect_timeout: config.connect_timeout,
        }
    }
}

/// Observable state shared between the handle and the connection task
struct StatusCell {
    state: Mutex<(ConnectionState, u32)>,
    dropped_sends: AtomicU64,
}

impl StatusCell {
    fn new() -> Self {
        Self {
            state: Mutex::new((ConnectionState::Disconnected, 0)),
            dropped_sends: AtomicU64::new(0),
        }
    }

    fn set_state(&self, state: ConnectionState) {
        self.state.lock().expect("status lock poisoned").0 = state;
    }

    fn set_attempts(&self, attempts: u32) {
        self.state.lock().expect("status lock poisoned").1 = attempts;
    }

    fn snapshot(&self) -> ConnectionStatus {
        let (state, reconnect_attempts) = *self.state.lock().expect("status lock poisoned");
        ConnectionStatus {
            state,
            reconnect_attempts,
            dropped_sends: self.dropped_sends.load(Ordering::SeqCst),
        }
    }
}

enum Command {
    Connect {
        reply: oneshot::Sender<Result<(), RealtimeError>>,
    },
    Disconnect {
        reply: oneshot::Sender<()>,
    },
    Send {
        destination: String,
        payload: Value,
    },
    SetAuthToken(Option<String>),
}

/// Handle to the single logical realtime connection.
///
/// `send` while not connected is a deliberate no-op with a logged warning:
/// outbound messages are dropped, never buffered.
pub struct Channel {
    cmd_tx: mpsc::UnboundedSender<Command>,
    status: Arc<StatusCell>,
}

impl Channel {
    /// Create the channel and spawn its connection task.
    ///
    /// The channel starts `Disconnected`; call [`Channel::connect`] to
    /// bring it up.
    pub fn new(config: ChannelConfig, dispatcher: Arc<EventDispatcher>) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let status = Arc::new(StatusCell::new());

        let task = ConnectionTask {
            config,
            dispatcher,
            status: status.clone(),
            cmd_rx,
            auth_token: None,
            ws: None,
            reconnect_at: None,
            reconnect_attempts: 0,
        };
        tokio::spawn(task.run());

        Self { cmd_tx, status }
    }

    /// Establish the connection.
    ///
    /// Idempotent when already connected. On transport error or timeout the
    /// returned future resolves to an error and reconnect scheduling has
    /// already been triggered.
    pub async fn connect(&self) -> Result<(), RealtimeError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        if self
            .cmd_tx
            .send(Command::Connect { reply: reply_tx })
            .is_err()
        {
            return Err(RealtimeError::Connect(
                "connection task is gone".to_string(),
            ));
        }
        reply_rx
            .await
            .unwrap_or_else(|_| Err(RealtimeError::Connect("connection task is gone".to_string())))
    }

    /// Close the connection, cancel any pending reconnect, and reset the
    /// attempt counter. Idempotent; calling it while already disconnected
    /// changes nothing.
    pub async fn disconnect(&self) {
        let (reply_tx, reply_rx) = oneshot::channel();
        if self
            .cmd_tx
            .send(Command::Disconnect { reply: reply_tx })
            .is_ok()
        {
            let _ = reply_rx.await;
        }
    }

    /// Send a JSON payload to a destination.
    ///
    /// When the channel is not connected the message is dropped with a
    /// logged warning; it is never queued and the call never fails.
    pub fn send(&self, destination: &str, payload: Value) {
        if self.status.snapshot().state != ConnectionState::Connected {
            tracing::warn!(
                "Channel is not connected. Dropping message to '{}'",
                destination
            );
            self.status.dropped_sends.fetch_add(1, Ordering::SeqCst);
            return;
        }
        let _ = self.cmd_tx.send(Command::Send {
            destination: destination.to_string(),
            payload,
        });
    }

    /// Store the bearer credential sent as the first frame after connect.
    ///
    /// `None` clears it; connecting without a credential is permitted for
    /// public channels.
    pub fn set_auth_token(&self, token: Option<String>) {
        let _ = self.cmd_tx.send(Command::SetAuthToken(token));
    }

    /// Current connection status
    pub fn status(&self) -> ConnectionStatus {
        self.status.snapshot()
    }
}

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// What woke the connection task up
enum Wake {
    Cmd(Option<Command>),
    Frame(Option<Result<Message, tokio_tungstenite::tungstenite::Error>>),
    ReconnectDue,
}

struct ConnectionTask {
    config: ChannelConfig,
    dispatcher: Arc<EventDispatcher>,
    status: Arc<StatusCell>,
    cmd_rx: mpsc::UnboundedReceiver<Command>,
    auth_token: Option<String>,
    ws: Option<WsStream>,
    reconnect_at: Option<tokio::time::Instant>,
    reconnect_attempts: u32,
}

impl ConnectionTask {
    async fn run(mut self) {
        loop {
            let wake = if self.ws.is_some() {
                let ws = self.ws.as_mut().expect("checked above");
                tokio::select! {
                    cmd = self.cmd_rx.recv() => Wake::Cmd(cmd),
                    frame = ws.next() => Wake::Frame(frame),
                }
            } else if let Some(deadline) = self.reconnect_at {
                tokio::select! {
                    cmd = self.cmd_rx.recv() => Wake::Cmd(cmd),
                    _ = tokio::time::sleep_until(deadline) => Wake::ReconnectDue,
                }
            } else {
                Wake::Cmd(self.cmd_rx.recv().await)
            };

            match wake {
                Wake::Cmd(None) => {
                    // Handle dropped; close and exit.
                    self.close_transport().await;
                    return;
                }
                Wake::Cmd(Some(cmd)) => self.handle_command(cmd).await,
                Wake::Frame(frame) => self.handle_frame(frame).await,
                Wake::ReconnectDue => {
                    self.reconnect_at = None;
                    self.set_attempts(self.reconnect_attempts + 1);
                    tracing::info!(
                        "Reconnect attempt {}/{}",
                        self.reconnect_attempts,
                        self.config.max_reconnect_attempts
                    );
                    let _ = self.try_connect().await;
                }
            }
        }
    }

    async fn handle_command(&mut self, cmd: Command) {
        match cmd {
            Command::Connect { reply } => {
                if self.ws.is_some() {
                    let _ = reply.send(Ok(()));
                    return;
                }
                // An explicit connect supersedes any pending reconnect timer.
                self.reconnect_at = None;
                let _ = reply.send(self.try_connect().await);
            }
            Command::Disconnect { reply } => {
                self.close_transport().await;
                self.reconnect_at = None;
                self.set_attempts(0);
                self.set_state(ConnectionState::Disconnected);
                let _ = reply.send(());
            }
            Command::Send {
                destination,
                payload,
            } => self.handle_send(&destination, payload).await,
            Command::SetAuthToken(token) => {
                self.auth_token = token;
            }
        }
    }

    async fn handle_send(&mut self, destination: &str, payload: Value) {
        let Some(ws) = self.ws.as_mut() else {
            // Connection was lost between the handle's check and here.
            tracing::warn!(
                "Channel is not connected. Dropping message to '{}'",
                destination
            );
            self.status.dropped_sends.fetch_add(1, Ordering::SeqCst);
            return;
        };

        let envelope = Envelope::outbound(destination, payload);
        let json = match serde_json::to_string(&envelope) {
            Ok(json) => json,
            Err(e) => {
                tracing::error!("Failed to serialize outbound message: {}", e);
                return;
            }
        };

        // Send errors are non-fatal; the read side notices a dead
        // connection through its own close event.
        if let Err(e) = ws.send(Message::Text(json.into())).await {
            tracing::warn!("Failed to send message to '{}': {}", destination, e);
        }
    }

    async fn handle_frame(
        &mut self,
        frame: Option<Result<Message, tokio_tungstenite::tungstenite::Error>>,
    ) {
        match frame {
            Some(Ok(Message::Text(text))) => {
                self.dispatcher.dispatch_raw(text.as_str());
            }
            Some(Ok(Message::Close(_))) | None => {
                tracing::info!("Server closed the connection");
                self.connection_lost().await;
            }
            Some(Err(e)) => {
                tracing::warn!("WebSocket read error: {}", e);
                self.connection_lost().await;
            }
            // Binary and ping/pong frames carry no application events.
            Some(Ok(_)) => {}
        }
    }

    /// Single connect attempt with timeout; on failure schedules the next
    /// automatic attempt (or gives up).
    ///
    /// Commands keep being serviced while the attempt is in flight: sends
    /// are dropped as not-connected, a concurrent connect waits for this
    /// attempt's outcome, and a disconnect cancels the attempt outright.
    async fn try_connect(&mut self) -> Result<(), RealtimeError> {
        self.set_state(ConnectionState::Connecting);

        let url = self.config.url.clone();
        let connect = tokio::time::timeout(self.config.connect_timeout, connect_async(url));
        tokio::pin!(connect);

        // Callers of connect() that arrive while this attempt is pending.
        let mut waiters: Vec<oneshot::Sender<Result<(), RealtimeError>>> = Vec::new();

        let attempt = loop {
            tokio::select! {
                attempt = &mut connect => break attempt,
                cmd = self.cmd_rx.recv() => match cmd {
                    Some(Command::Connect { reply }) => waiters.push(reply),
                    Some(Command::Disconnect { reply }) => {
                        self.reconnect_at = None;
                        self.set_attempts(0);
                        self.set_state(ConnectionState::Disconnected);
                        let _ = reply.send(());
                        tracing::info!("Connect attempt cancelled by disconnect");
                        for waiter in waiters {
                            let _ = waiter
                                .send(Err(RealtimeError::Connect("cancelled by disconnect".to_string())));
                        }
                        return Err(RealtimeError::Connect("cancelled by disconnect".to_string()));
                    }
                    Some(Command::Send { destination, .. }) => {
                        tracing::warn!(
                            "Channel is not connected. Dropping message to '{}'",
                            destination
                        );
                        self.status.dropped_sends.fetch_add(1, Ordering::SeqCst);
                    }
                    Some(Command::SetAuthToken(token)) => self.auth_token = token,
                    None => {
                        self.set_state(ConnectionState::Disconnected);
                        return Err(RealtimeError::Connect("channel handle dropped".to_string()));
                    }
                },
            }
        };

        let result = match attempt {
            Ok(Ok((ws, _response))) => {
                self.ws = Some(ws);
                self.set_state(ConnectionState::Connected);
                self.set_attempts(0);
                tracing::info!("Connected to {}", self.config.url);
                self.send_auth_frame().await;
                Ok(())
            }
            Ok(Err(e)) => Err(RealtimeError::Connect(e.to_string())),
            Err(_) => Err(RealtimeError::ConnectTimeout(
                self.config.connect_timeout.as_millis() as u64,
            )),
        };

        if let Err(error) = &result {
            tracing::warn!("Connect attempt failed: {}", error);
            self.set_state(ConnectionState::Disconnected);
            self.schedule_reconnect();
        }

        for waiter in waiters {
            let _ = waiter.send(match &result {
                Ok(()) => Ok(()),
                Err(e) => Err(RealtimeError::Connect(e.to_string())),
            });
        }

        result
    }

    /// Send the stored bearer credential as the first outbound frame.
    /// Absence of a credential is not an error.
    async fn send_auth_frame(&mut self) {
        let Some(token) = self.auth_token.clone() else {
            return;
        };
        let Some(ws) = self.ws.as_mut() else {
            return;
        };
        let json = match serde_json::to_string(&AuthFrame::new(token)) {
            Ok(json) => json,
            Err(e) => {
                tracing::error!("Failed to serialize auth frame: {}", e);
                return;
            }
        };
        if let Err(e) = ws.send(Message::Text(json.into())).await {
            tracing::warn!("Failed to send auth frame: {}", e);
        }
    }

    async fn connection_lost(&mut self) {
        self.ws = None;
        self.set_state(ConnectionState::Disconnected);
        self.schedule_reconnect();
    }

    fn schedule_reconnect(&mut self) {
        if !backoff::should_attempt_reconnect(
            self.reconnect_attempts,
            self.config.max_reconnect_attempts,
        ) {
            tracing::warn!(
                "Max reconnect attempts ({}) reached; staying disconnected until an explicit connect",
                self.config.max_reconnect_attempts
            );
            self.reconnect_at = None;
            return;
        }

        let delay = backoff::reconnect_delay(
            self.config.base_reconnect_delay,
            self.reconnect_attempts,
        );
        tracing::info!(
            "Scheduling reconnect in {:?} (attempt {})",
            delay,
            self.reconnect_attempts + 1
        );
        self.reconnect_at = Some(tokio::time::Instant::now() + delay);
    }

    async fn close_transport(&mut self) {
        if let Some(mut ws) = self.ws.take() {
            let _ = ws.close(None).await;
        }
    }

    fn set_state(&self, state: ConnectionState) {
        self.status.set_state(state);
    }

    fn set_attempts(&mut self, attempts: u32) {
        self.reconnect_attempts = attempts;
        self.status.set_attempts(attempts);
    }
}
