//! Chat session orchestrator.
//!
//! A [`ChatSession`] owns the resolved credentials, the registered callbacks
//! and, while running, the transport. [`ChatSession::start`] dials the chat
//! server and blocks until the session ends; [`ChatSession::run`] does the
//! same over a caller-supplied [`Transport`].
//!
//! # Example
//!
//! ```rust,no_run
//! # async fn example() -> chaturbate_chat::Result<()> {
//! use chaturbate_chat::{AuthOption, ChatSession};
//!
//! let mut session = ChatSession::create("some_room", AuthOption::Anonymous).await?;
//! session
//!     .on_message(|msg| println!("{}: {}", msg.author, msg.message))
//!     .on_tip(|user, amount| println!("{user} tipped {amount}"));
//!
//! session.start().await?;
//! # Ok(())
//! # }
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, error, trace, warn};

use crate::codec::{self, Frame};
use crate::credentials::{CredentialResolver, SessionCredentials, DEFAULT_BASE_URL};
use crate::dispatch::{self, CallbackQueue, Callbacks, Dispatch};
use crate::error::{ChatError, Result};
use crate::handshake::{Handshake, HandshakeState};
use crate::protocol::{MethodInvocation, OutboundCommand, RoomMessage};
use crate::transport::Transport;

/// Default timeout for dialing the chat server.
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Default limit on concurrently running callbacks.
const DEFAULT_CALLBACK_CONCURRENCY: usize = 64;

/// Default time to wait for in-flight callbacks when the session ends.
const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(1);

// ── Configuration ───────────────────────────────────────────────────

/// How the session authenticates.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum AuthOption {
    /// Anonymous viewer, credentials scraped from the public room page.
    #[default]
    Anonymous,
    /// Log in as a registered user. Not supported yet.
    Credentials { username: String, password: String },
}

/// Configuration for a [`ChatSession`].
///
/// # Example
///
/// ```
/// use chaturbate_chat::ChatConfig;
/// use std::time::Duration;
///
/// let config = ChatConfig::new()
///     .with_callback_concurrency(8)
///     .with_shutdown_timeout(Duration::from_secs(5));
/// assert_eq!(config.callback_concurrency, 8);
/// ```
#[derive(Debug, Clone)]
pub struct ChatConfig {
    /// Host serving room pages. Defaults to `https://chaturbate.com`.
    pub base_url: String,
    /// Deadline for dialing the chat server. Defaults to **10 seconds**.
    pub connect_timeout: Duration,
    /// Maximum number of callbacks running at once.
    ///
    /// When the limit is reached the read loop waits for a running callback
    /// to finish before dispatching the next event. Callbacks only run in
    /// frame order at a concurrency of 1; higher values may start them out of
    /// order. Defaults to **64**. Values below 1 are clamped to 1.
    pub callback_concurrency: usize,
    /// How long the end of a session waits for in-flight callbacks before
    /// abandoning them. Defaults to **1 second**.
    pub shutdown_timeout: Duration,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl ChatConfig {
    pub fn new() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            callback_concurrency: DEFAULT_CALLBACK_CONCURRENCY,
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
        }
    }

    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    #[must_use]
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Values below 1 are clamped to 1.
    #[must_use]
    pub fn with_callback_concurrency(mut self, concurrency: usize) -> Self {
        self.callback_concurrency = concurrency.max(1);
        self
    }

    #[must_use]
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }
}

// ── Shared state ────────────────────────────────────────────────────

/// State shared between the session, its read loop and stop handles.
#[derive(Debug)]
struct Shared {
    connected: AtomicBool,
    state: watch::Sender<HandshakeState>,
    stop: watch::Sender<bool>,
}

impl Shared {
    fn new() -> Self {
        Self {
            connected: AtomicBool::new(false),
            state: watch::Sender::new(HandshakeState::Idle),
            stop: watch::Sender::new(false),
        }
    }

    fn request_stop(&self) -> Result<()> {
        if !self.connected.load(Ordering::Acquire) {
            return Err(ChatError::NotConnected);
        }
        debug!("stop requested");
        self.stop.send_replace(true);
        Ok(())
    }
}

/// Stops a running [`ChatSession`] from another task.
#[derive(Debug, Clone)]
pub struct StopHandle {
    shared: Arc<Shared>,
}

impl StopHandle {
    /// Close the session's transport and end its read loop.
    ///
    /// # Errors
    ///
    /// Returns [`ChatError::NotConnected`] if the session is not running.
    pub fn stop(&self) -> Result<()> {
        self.shared.request_stop()
    }
}

// ── Session ─────────────────────────────────────────────────────────

/// Whether the read loop keeps reading after a message.
enum Flow {
    Continue,
    Stop,
}

/// A single connection to one room's chat.
///
/// A session runs at most once. After it ends (state `Closed` or `Failed`),
/// create a new session to reconnect.
#[derive(Debug)]
pub struct ChatSession {
    room: String,
    credentials: SessionCredentials,
    config: ChatConfig,
    callbacks: Callbacks,
    started: AtomicBool,
    shared: Arc<Shared>,
}

impl ChatSession {
    /// Resolve credentials for `room` with the default configuration.
    ///
    /// # Errors
    ///
    /// See [`create_with_config`](Self::create_with_config).
    pub async fn create(room: impl Into<String>, auth: AuthOption) -> Result<Self> {
        Self::create_with_config(room, auth, ChatConfig::default()).await
    }

    /// Resolve credentials for `room`.
    ///
    /// # Errors
    ///
    /// Returns [`ChatError::NotImplemented`] for [`AuthOption::Credentials`],
    /// and any error of [`CredentialResolver::resolve`].
    pub async fn create_with_config(
        room: impl Into<String>,
        auth: AuthOption,
        config: ChatConfig,
    ) -> Result<Self> {
        if let AuthOption::Credentials { .. } = auth {
            return Err(ChatError::NotImplemented(
                "only anonymous sessions are supported".into(),
            ));
        }
        let room = room.into();
        let credentials = CredentialResolver::new(config.base_url.clone())
            .resolve(&room)
            .await?;
        Ok(Self::with_credentials(room, credentials, config))
    }

    /// Build a session from already-resolved credentials.
    pub fn with_credentials(
        room: impl Into<String>,
        credentials: SessionCredentials,
        config: ChatConfig,
    ) -> Self {
        Self {
            room: room.into(),
            credentials,
            config,
            callbacks: Callbacks::default(),
            started: AtomicBool::new(false),
            shared: Arc::new(Shared::new()),
        }
    }

    // ── Callback registration ───────────────────────────────────────

    /// Called for every chat message.
    pub fn on_message<F>(&mut self, f: F) -> &mut Self
    where
        F: Fn(RoomMessage) + Send + Sync + 'static,
    {
        self.callbacks.on_message = Some(Arc::new(f));
        self
    }

    /// Called with the tipper's username and the amount.
    pub fn on_tip<F>(&mut self, f: F) -> &mut Self
    where
        F: Fn(String, u64) + Send + Sync + 'static,
    {
        self.callbacks.on_tip = Some(Arc::new(f));
        self
    }

    /// Called with the lines of an application notice.
    pub fn on_notice<F>(&mut self, f: F) -> &mut Self
    where
        F: Fn(Vec<String>) + Send + Sync + 'static,
    {
        self.callbacks.on_notice = Some(Arc::new(f));
        self
    }

    pub fn on_user_entry<F>(&mut self, f: F) -> &mut Self
    where
        F: Fn(String) + Send + Sync + 'static,
    {
        self.callbacks.on_user_entry = Some(Arc::new(f));
        self
    }

    pub fn on_user_leave<F>(&mut self, f: F) -> &mut Self
    where
        F: Fn(String) + Send + Sync + 'static,
    {
        self.callbacks.on_user_leave = Some(Arc::new(f));
        self
    }

    /// Reserved: the protocol has no mute notification yet.
    pub fn on_mute<F>(&mut self, f: F) -> &mut Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.callbacks.on_mute = Some(Arc::new(f));
        self
    }

    // ── Accessors ───────────────────────────────────────────────────

    pub fn room(&self) -> &str {
        &self.room
    }

    pub fn credentials(&self) -> &SessionCredentials {
        &self.credentials
    }

    /// Current handshake state.
    pub fn state(&self) -> HandshakeState {
        *self.shared.state.borrow()
    }

    /// Watch handshake state changes.
    pub fn subscribe_state(&self) -> watch::Receiver<HandshakeState> {
        self.shared.state.subscribe()
    }

    /// Returns `true` while the read loop is running.
    pub fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::Acquire)
    }

    /// A handle that can stop this session from another task.
    pub fn stop_handle(&self) -> StopHandle {
        StopHandle {
            shared: Arc::clone(&self.shared),
        }
    }

    // ── Lifecycle ───────────────────────────────────────────────────

    /// Dial the chat server and run the session until it ends.
    ///
    /// Returns `Ok(())` when the server closes the connection or the session
    /// is stopped.
    ///
    /// # Errors
    ///
    /// - [`ChatError::SessionClosed`] if this session already ran
    /// - [`ChatError::Io`] / [`ChatError::Timeout`] if dialing fails
    /// - [`ChatError::AuthenticationFailed`] if the server rejects the session
    /// - transport errors that ended the session
    #[cfg(feature = "transport-websocket")]
    pub async fn start(&self) -> Result<()> {
        use crate::transports::WebSocketTransport;

        self.claim()?;
        self.shared.state.send_replace(HandshakeState::Connecting);

        let url = self.credentials.websocket_url();
        let transport =
            match WebSocketTransport::connect_with_timeout(&url, self.config.connect_timeout).await
            {
                Ok(transport) => transport,
                Err(e) => {
                    error!(room = %self.room, "failed to dial chat server: {e}");
                    self.shared.state.send_replace(HandshakeState::Closed);
                    return Err(e);
                }
            };

        self.drive(transport).await
    }

    /// Run the session over an already-connected transport until it ends.
    ///
    /// # Errors
    ///
    /// Same as [`start`](Self::start), minus the dialing errors.
    pub async fn run(&self, transport: impl Transport) -> Result<()> {
        self.claim()?;
        self.drive(transport).await
    }

    /// Close the transport and end the read loop.
    ///
    /// # Errors
    ///
    /// Returns [`ChatError::NotConnected`] if the session is not running.
    pub fn stop(&self) -> Result<()> {
        self.shared.request_stop()
    }

    // ── Read loop ───────────────────────────────────────────────────

    fn claim(&self) -> Result<()> {
        if self.started.swap(true, Ordering::AcqRel) {
            return Err(ChatError::SessionClosed);
        }
        Ok(())
    }

    /// The read loop. Exits when:
    /// - the transport returns `None` (server closed the connection)
    /// - a transport read or write fails
    /// - authentication is rejected
    /// - a stop is requested
    async fn drive(&self, mut transport: impl Transport) -> Result<()> {
        let mut handshake = Handshake::new(self.room.clone(), self.credentials.clone());
        let mut callbacks = CallbackQueue::new(self.config.callback_concurrency);
        let mut stop_rx = self.shared.stop.subscribe();

        handshake.begin();
        self.publish(&handshake);
        self.shared.connected.store(true, Ordering::Release);
        debug!(room = %self.room, "read loop started");

        let outcome = loop {
            tokio::select! {
                _ = stop_rx.changed() => {
                    debug!("stop signal received");
                    break Ok(());
                }

                incoming = transport.recv() => {
                    match incoming {
                        Some(Ok(text)) => {
                            let handled = self
                                .handle_message(
                                    &text,
                                    &mut handshake,
                                    &mut transport,
                                    &mut callbacks,
                                    &mut stop_rx,
                                )
                                .await;
                            self.publish(&handshake);
                            match handled {
                                Ok(Flow::Continue) => {}
                                Ok(Flow::Stop) => {
                                    debug!("stop signal received while waiting for a callback slot");
                                    break Ok(());
                                }
                                Err(e) => break Err(e),
                            }
                        }
                        Some(Err(e)) => {
                            error!("transport receive error: {e}");
                            break Err(e);
                        }
                        None => {
                            debug!("transport closed by server");
                            break Ok(());
                        }
                    }
                }
            }
        };

        self.shared.connected.store(false, Ordering::Release);
        if let Err(e) = transport.close().await {
            debug!("transport close failed: {e}");
        }
        handshake.close();
        self.publish(&handshake);
        callbacks.drain(self.config.shutdown_timeout).await;

        debug!(room = %self.room, state = %handshake.state(), "read loop exited");
        outcome
    }

    /// Handle one inbound text message. Only fatal errors are returned.
    async fn handle_message<T: Transport>(
        &self,
        text: &str,
        handshake: &mut Handshake,
        transport: &mut T,
        callbacks: &mut CallbackQueue,
        stop_rx: &mut watch::Receiver<bool>,
    ) -> Result<Flow> {
        let frame = match codec::decode(text) {
            Ok(frame) => frame,
            Err(e) => {
                warn!("dropping frame: {e}");
                return Ok(Flow::Continue);
            }
        };

        match frame {
            Frame::Open => {
                if let Some(command) = handshake.on_open() {
                    send_command(transport, &command).await?;
                }
            }
            Frame::Heartbeat => trace!("heartbeat"),
            Frame::Unknown(kind) => warn!(%kind, "unknown message type: {text}"),
            Frame::Data(invocations) => {
                for invocation in &invocations {
                    let flow = self
                        .handle_invocation(invocation, handshake, transport, callbacks, stop_rx)
                        .await?;
                    if let Flow::Stop = flow {
                        return Ok(Flow::Stop);
                    }
                }
            }
        }
        Ok(Flow::Continue)
    }

    async fn handle_invocation<T: Transport>(
        &self,
        invocation: &MethodInvocation,
        handshake: &mut Handshake,
        transport: &mut T,
        callbacks: &mut CallbackQueue,
        stop_rx: &mut watch::Receiver<bool>,
    ) -> Result<Flow> {
        let routed = match dispatch::route(invocation) {
            Ok(routed) => routed,
            Err(e) => {
                warn!(method = %invocation.method, "dropping invocation: {e}");
                return Ok(Flow::Continue);
            }
        };

        match routed {
            Dispatch::Auth { result, raw } => {
                match handshake.on_auth_response(result, &raw) {
                    Ok(Some(command)) => send_command(transport, &command).await?,
                    Ok(None) => {}
                    Err(e) => {
                        error!(room = %self.room, "{e}");
                        return Err(e);
                    }
                }
            }
            Dispatch::Event(event) => {
                handshake.on_event();
                if let Some(job) = self.callbacks.bind(event) {
                    // The wait for a free slot ends early on stop.
                    tokio::select! {
                        _ = stop_rx.changed() => return Ok(Flow::Stop),
                        () = callbacks.submit(job) => {}
                    }
                }
            }
            Dispatch::Ignored | Dispatch::Unhandled => {}
        }
        Ok(Flow::Continue)
    }

    fn publish(&self, handshake: &Handshake) {
        self.shared.state.send_if_modified(|state| {
            let next = handshake.state();
            let changed = *state != next;
            *state = next;
            changed
        });
    }
}

async fn send_command<T: Transport>(transport: &mut T, command: &OutboundCommand) -> Result<()> {
    let wire = codec::encode(command)?;
    debug!(method = command.method(), "sending command");
    transport.send(wire).await.inspect_err(|e| {
        error!("transport send error: {e}");
    })
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::indexing_slicing
)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex as StdMutex;

    /// Replays scripted frames and records what the session sends.
    struct ScriptedTransport {
        incoming: VecDeque<Option<Result<String>>>,
        sent: Arc<StdMutex<Vec<String>>>,
    }

    #[async_trait]
    impl Transport for ScriptedTransport {
        async fn send(&mut self, message: String) -> Result<()> {
            self.sent.lock().unwrap().push(message);
            Ok(())
        }

        async fn recv(&mut self) -> Option<Result<String>> {
            match self.incoming.pop_front() {
                Some(item) => item,
                None => std::future::pending().await,
            }
        }

        async fn close(&mut self) -> Result<()> {
            Ok(())
        }
    }

    fn scripted(frames: &[&str]) -> (ScriptedTransport, Arc<StdMutex<Vec<String>>>) {
        let sent = Arc::new(StdMutex::new(Vec::new()));
        let mut incoming: VecDeque<_> = frames.iter().map(|f| Some(Ok(f.to_string()))).collect();
        incoming.push_back(None);
        (
            ScriptedTransport {
                incoming,
                sent: Arc::clone(&sent),
            },
            sent,
        )
    }

    fn session() -> ChatSession {
        ChatSession::with_credentials(
            "alice",
            SessionCredentials {
                chat_host: "wss://h".into(),
                username: "u".into(),
                password: "p".into(),
                room_password: "rp".into(),
            },
            ChatConfig::new(),
        )
    }

    #[test]
    fn config_defaults() {
        let config = ChatConfig::default();
        assert_eq!(config.base_url, "https://chaturbate.com");
        assert_eq!(config.connect_timeout, Duration::from_secs(10));
        assert_eq!(config.callback_concurrency, 64);
        assert_eq!(config.shutdown_timeout, Duration::from_secs(1));
    }

    #[test]
    fn callback_concurrency_is_clamped_to_one() {
        let config = ChatConfig::new().with_callback_concurrency(0);
        assert_eq!(config.callback_concurrency, 1);
    }

    #[tokio::test]
    async fn credentials_auth_is_not_implemented() {
        let err = ChatSession::create(
            "alice",
            AuthOption::Credentials {
                username: "u".into(),
                password: "p".into(),
            },
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ChatError::NotImplemented(_)));
    }

    #[tokio::test]
    async fn open_then_auth_sends_connect_then_join() {
        let (transport, sent) = scripted(&[
            "o",
            r#"a["{\"method\":\"onAuthResponse\",\"args\":[\"1\"]}"]"#,
        ]);
        let session = session();
        session.run(transport).await.unwrap();

        let sent = sent.lock().unwrap();
        assert_eq!(sent.len(), 2);
        assert!(sent[0].contains(r#"\"method\":\"connect\""#));
        assert!(sent[1].contains(r#"\"method\":\"joinRoom\""#));
        assert_eq!(session.state(), HandshakeState::Closed);
    }

    #[tokio::test]
    async fn rejected_auth_ends_session_as_failed() {
        let (transport, sent) = scripted(&[
            "o",
            r#"a["{\"method\":\"onAuthResponse\",\"args\":[\"0\"]}"]"#,
        ]);
        let session = session();
        let err = session.run(transport).await.unwrap_err();

        assert!(matches!(err, ChatError::AuthenticationFailed { result } if result == "0"));
        assert_eq!(session.state(), HandshakeState::Failed);
        assert_eq!(sent.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn session_runs_only_once() {
        let session = session();
        let (transport, _) = scripted(&[]);
        session.run(transport).await.unwrap();

        let (transport, _) = scripted(&[]);
        let err = session.run(transport).await.unwrap_err();
        assert!(matches!(err, ChatError::SessionClosed));
    }

    #[tokio::test]
    async fn stop_before_start_is_not_connected() {
        let session = session();
        assert!(matches!(session.stop(), Err(ChatError::NotConnected)));
    }
}
