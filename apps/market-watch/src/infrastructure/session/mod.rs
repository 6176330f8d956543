//! Sessions
//!
//! A session bridges one duplex byte-stream transport to typed protocol
//! events and owns the connection's lifecycle.
//!
//! # Architecture
//!
//! Each session is split in three:
//!
//! - a driver task that owns the transport, decodes inbound frames through
//!   the [`MessageDispatcher`] and writes outbound payloads
//! - a cloneable [`SessionHandle`] for writing and destroying
//! - an event channel of [`SessionEvent`]s
//!
//! What happens when the transport ends is decided by the session's
//! [`DisconnectPolicy`]: server sessions terminate, client sessions retry
//! on a fixed interval until the attempts run out.
//!
//! ```text
//!            ┌──────────────┐   Sync / Error / Unhandled   ┌──────────┐
//! transport ─►    driver    ├──────────────────────────────►  events  │
//!            │ (dispatcher) │   Disconnect / Reconnect /   └──────────┘
//!            └──────▲───────┘   Finish
//!                   │ outbound queue
//!            ┌──────┴───────┐
//!            │ SessionHandle│ write() / destroy()
//!            └──────────────┘
//! ```

pub mod codec;
pub mod dispatch;
pub mod memory;
pub mod reconnect;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;

use parking_lot::RwLock;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;
use uuid::Uuid;

use crate::SessionSettings;
use crate::application::ports::{Connector, Transport, TransportError};
use crate::domain::message::{ErrorMessage, Message, SyncMessage};
use crate::infrastructure::metrics;
use codec::{CodecError, MessageCodec};
use dispatch::MessageDispatcher;
use reconnect::{ReconnectConfig, ReconnectPolicy};

/// Unique identifier for a session.
pub type SessionId = Uuid;

/// Upper bound on closing a transport whose peer has stopped reading.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

// =============================================================================
// Events and State
// =============================================================================

/// Events reported by a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// A valid sync message arrived.
    Sync(SyncMessage),
    /// A valid error message arrived.
    Error(ErrorMessage),
    /// A message decoded but matched no route.
    Unhandled(Message),
    /// The transport ended. Always precedes `Finish` or a reconnect cycle.
    Disconnect,
    /// A client session re-established its transport.
    Reconnect,
    /// The session is over. Carries the error that ended the transport, if any.
    Finish(Option<TransportError>),
}

impl SessionEvent {
    /// Event name.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Sync(_) => SyncMessage::NAME,
            Self::Error(_) => ErrorMessage::NAME,
            Self::Unhandled(_) => "unhandled",
            Self::Disconnect => "disconnect",
            Self::Reconnect => "reconnect",
            Self::Finish(_) => "finish",
        }
    }
}

/// Connection state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Transport is open.
    Connected,
    /// Transport ended; deciding what to do next.
    Disconnected,
    /// Waiting for or performing a reconnect attempt.
    Reconnecting,
    /// Reconnect attempts were exhausted.
    Failed,
    /// The session finished or was destroyed.
    Closed,
}

impl SessionState {
    /// State name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Connected => "connected",
            Self::Disconnected => "disconnected",
            Self::Reconnecting => "reconnecting",
            Self::Failed => "failed",
            Self::Closed => "closed",
        }
    }
}

/// Session errors.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// `write` was called with an empty payload.
    #[error("payload must not be empty")]
    EmptyPayload,

    /// `destroy` was called after the transport was already released.
    #[error("session transport has already been released")]
    AlreadyDestroyed,

    /// The session has finished.
    #[error("session is closed")]
    Closed,

    /// The session is between transports.
    #[error("session is not connected")]
    NotConnected,

    /// The outbound queue is full.
    #[error("session outbound queue is full")]
    Backpressure,

    /// The initial connect did not complete in time.
    #[error("failed to connect: connection timed out after {0:?}")]
    ConnectTimeout(Duration),

    /// The transport failed.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The message could not be encoded.
    #[error(transparent)]
    Codec(#[from] CodecError),
}

// =============================================================================
// Disconnect Policy
// =============================================================================

/// What a session does when its transport ends.
pub enum DisconnectPolicy {
    /// Report `Disconnect`, then `Finish`.
    Terminate,
    /// Report `Disconnect`, then retry `address` through `connector`.
    Reconnect {
        /// Opens replacement transports.
        connector: Arc<dyn Connector>,
        /// Address of the original connection.
        address: String,
        /// Retry interval, attempt bound and connect timeout.
        config: ReconnectConfig,
    },
}

impl DisconnectPolicy {
    fn reconnect_target(&self) -> Option<(Arc<dyn Connector>, String, ReconnectConfig)> {
        match self {
            Self::Terminate => None,
            Self::Reconnect {
                connector,
                address,
                config,
            } => Some((Arc::clone(connector), address.clone(), config.clone())),
        }
    }
}

impl std::fmt::Debug for DisconnectPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Terminate => f.write_str("Terminate"),
            Self::Reconnect {
                address, config, ..
            } => f
                .debug_struct("Reconnect")
                .field("address", address)
                .field("config", config)
                .finish_non_exhaustive(),
        }
    }
}

// =============================================================================
// Session Handle
// =============================================================================

#[derive(Debug)]
struct SessionShared {
    state: RwLock<SessionState>,
    open: AtomicBool,
    reconnect_attempts: AtomicU32,
    cancel: CancellationToken,
}

impl SessionShared {
    fn new() -> Self {
        Self {
            state: RwLock::new(SessionState::Connected),
            open: AtomicBool::new(true),
            reconnect_attempts: AtomicU32::new(0),
            cancel: CancellationToken::new(),
        }
    }

    fn set_state(&self, state: SessionState) {
        *self.state.write() = state;
    }
}

/// Cloneable handle for writing to and destroying a session.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    id: SessionId,
    outbound: mpsc::Sender<Vec<u8>>,
    shared: Arc<SessionShared>,
}

impl SessionHandle {
    /// Session identifier.
    #[must_use]
    pub const fn id(&self) -> SessionId {
        self.id
    }

    /// Current connection state.
    #[must_use]
    pub fn state(&self) -> SessionState {
        *self.shared.state.read()
    }

    /// Reconnect attempts in the current cycle (0 when connected).
    #[must_use]
    pub fn reconnect_attempts(&self) -> u32 {
        self.shared.reconnect_attempts.load(Ordering::SeqCst)
    }

    /// Whether the session still owns a transport.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.shared.open.load(Ordering::SeqCst)
    }

    /// Queue a binary payload for the transport.
    ///
    /// Never waits: a full queue is reported as [`SessionError::Backpressure`]
    /// so one slow peer cannot stall a caller writing to many sessions.
    ///
    /// # Errors
    ///
    /// Returns an error for empty payloads, closed or reconnecting sessions
    /// and full queues.
    pub fn write(&self, payload: Vec<u8>) -> Result<(), SessionError> {
        if payload.is_empty() {
            return Err(SessionError::EmptyPayload);
        }
        if !self.is_open() {
            return Err(SessionError::Closed);
        }
        match self.state() {
            SessionState::Connected => {}
            SessionState::Disconnected | SessionState::Reconnecting => {
                return Err(SessionError::NotConnected);
            }
            SessionState::Failed | SessionState::Closed => return Err(SessionError::Closed),
        }
        self.outbound.try_send(payload).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => SessionError::Backpressure,
            mpsc::error::TrySendError::Closed(_) => SessionError::Closed,
        })
    }

    /// Encode and queue a message.
    ///
    /// # Errors
    ///
    /// Returns an error if encoding fails or see [`Self::write`].
    pub fn send(&self, message: &Message) -> Result<(), SessionError> {
        self.write(message.pack()?)
    }

    /// Close the transport and drop the event channel.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::AlreadyDestroyed`] if the transport was already
    /// released, either by an earlier `destroy` or by the session finishing.
    pub fn destroy(&self) -> Result<(), SessionError> {
        if !self.shared.open.swap(false, Ordering::SeqCst) {
            return Err(SessionError::AlreadyDestroyed);
        }
        self.shared.cancel.cancel();
        Ok(())
    }
}

// =============================================================================
// Session
// =============================================================================

/// A live session: its handle plus its event stream.
#[derive(Debug)]
pub struct Session {
    handle: SessionHandle,
    events: mpsc::Receiver<SessionEvent>,
}

impl Session {
    /// Bind a transport with an explicit disconnect policy.
    ///
    /// `buffer` bounds both the outbound queue and the event channel.
    ///
    /// # Panics
    ///
    /// Panics if called outside a Tokio runtime.
    #[must_use]
    pub fn bind(transport: Box<dyn Transport>, policy: DisconnectPolicy, buffer: usize) -> Self {
        let id = Uuid::new_v4();
        let (outbound_tx, outbound_rx) = mpsc::channel(buffer.max(1));
        let (event_tx, event_rx) = mpsc::channel(buffer.max(1));
        let shared = Arc::new(SessionShared::new());

        let driver = SessionDriver {
            transport,
            codec: MessageCodec::new(),
            dispatcher: message_router(),
            outbound: outbound_rx,
            events: event_tx,
            policy,
            shared: Arc::clone(&shared),
        };
        tokio::spawn(
            driver
                .run()
                .instrument(tracing::debug_span!("session", id = %id)),
        );

        Self {
            handle: SessionHandle {
                id,
                outbound: outbound_tx,
                shared,
            },
            events: event_rx,
        }
    }

    /// Bind an accepted transport. The session finishes when the transport ends.
    #[must_use]
    pub fn server(transport: Box<dyn Transport>, settings: &SessionSettings) -> Self {
        Self::bind(transport, DisconnectPolicy::Terminate, settings.buffer)
    }

    /// Bind an open client transport that reconnects to `address` when it ends.
    #[must_use]
    pub fn client(
        transport: Box<dyn Transport>,
        connector: Arc<dyn Connector>,
        address: impl Into<String>,
        settings: &SessionSettings,
    ) -> Self {
        let policy = DisconnectPolicy::Reconnect {
            connector,
            address: address.into(),
            config: ReconnectConfig::from_session_settings(settings),
        };
        Self::bind(transport, policy, settings.buffer)
    }

    /// Connect to `address`, bounded by the configured connect timeout.
    ///
    /// The returned session reconnects to the same address if its transport
    /// later ends.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::ConnectTimeout`] if the connect does not finish
    /// in time (the half-open connection is dropped), or the connector's error.
    pub async fn connect(
        connector: Arc<dyn Connector>,
        address: impl Into<String>,
        settings: &SessionSettings,
    ) -> Result<Self, SessionError> {
        let address = address.into();
        let timeout = settings.connect_timeout;

        let transport = match tokio::time::timeout(timeout, connector.connect(&address)).await {
            Ok(result) => result?,
            Err(_) => {
                tracing::warn!(address = %address, timeout_ms = timeout.as_millis(), "Connect timed out");
                return Err(SessionError::ConnectTimeout(timeout));
            }
        };

        tracing::info!(address = %address, "Session connected");
        Ok(Self::client(transport, connector, address, settings))
    }

    /// The session's handle.
    #[must_use]
    pub const fn handle(&self) -> &SessionHandle {
        &self.handle
    }

    /// Session identifier.
    #[must_use]
    pub const fn id(&self) -> SessionId {
        self.handle.id
    }

    /// Current connection state.
    #[must_use]
    pub fn state(&self) -> SessionState {
        self.handle.state()
    }

    /// See [`SessionHandle::write`].
    ///
    /// # Errors
    ///
    /// See [`SessionHandle::write`].
    pub fn write(&self, payload: Vec<u8>) -> Result<(), SessionError> {
        self.handle.write(payload)
    }

    /// See [`SessionHandle::send`].
    ///
    /// # Errors
    ///
    /// See [`SessionHandle::send`].
    pub fn send(&self, message: &Message) -> Result<(), SessionError> {
        self.handle.send(message)
    }

    /// See [`SessionHandle::destroy`].
    ///
    /// # Errors
    ///
    /// See [`SessionHandle::destroy`].
    pub fn destroy(&self) -> Result<(), SessionError> {
        self.handle.destroy()
    }

    /// Wait for the next event. `None` once the session is over.
    pub async fn next_event(&mut self) -> Option<SessionEvent> {
        self.events.recv().await
    }

    /// Split into the handle and the event receiver.
    #[must_use]
    pub fn into_parts(self) -> (SessionHandle, mpsc::Receiver<SessionEvent>) {
        (self.handle, self.events)
    }
}

fn message_router() -> MessageDispatcher<SessionEvent> {
    let mut dispatcher = MessageDispatcher::new(SessionEvent::Unhandled);
    dispatcher
        .put(SyncMessage::validate, |message| match message {
            Message::Sync(sync) => SessionEvent::Sync(sync),
            other @ Message::Error(_) => SessionEvent::Unhandled(other),
        })
        .put(ErrorMessage::validate, |message| match message {
            Message::Error(error) => SessionEvent::Error(error),
            other @ Message::Sync(_) => SessionEvent::Unhandled(other),
        });
    dispatcher
}

// =============================================================================
// Driver
// =============================================================================

enum Step {
    Continue,
    Ended(Option<TransportError>),
    Released,
}

struct SessionDriver {
    transport: Box<dyn Transport>,
    codec: MessageCodec,
    dispatcher: MessageDispatcher<SessionEvent>,
    outbound: mpsc::Receiver<Vec<u8>>,
    events: mpsc::Sender<SessionEvent>,
    policy: DisconnectPolicy,
    shared: Arc<SessionShared>,
}

impl SessionDriver {
    async fn run(mut self) {
        loop {
            let step = tokio::select! {
                biased;
                () = self.shared.cancel.cancelled() => Step::Released,
                payload = self.outbound.recv() => match payload {
                    // A stalled write must not outlive destroy
                    Some(payload) => tokio::select! {
                        biased;
                        () = self.shared.cancel.cancelled() => Step::Released,
                        sent = self.transport.send(payload) => match sent {
                            Ok(()) => Step::Continue,
                            Err(e) => Step::Ended(Some(e)),
                        },
                    },
                    None => Step::Released,
                },
                frame = self.transport.recv() => match frame {
                    Some(Ok(bytes)) => {
                        self.handle_message(&bytes).await;
                        Step::Continue
                    }
                    Some(Err(e)) => Step::Ended(Some(e)),
                    None => Step::Ended(None),
                },
            };

            match step {
                Step::Continue => {}
                Step::Released => {
                    self.release(SessionState::Closed).await;
                    return;
                }
                Step::Ended(error) => {
                    if !self.on_transport_end(error).await {
                        return;
                    }
                }
            }
        }
    }

    async fn handle_message(&mut self, bytes: &[u8]) {
        if bytes.is_empty() {
            return;
        }
        match self.codec.unpack(bytes) {
            Ok(message) => {
                let event = self.dispatcher.find_match(message);
                self.emit(event).await;
            }
            Err(e) => {
                metrics::record_decode_dropped();
                tracing::debug!(error = %e, len = bytes.len(), "Dropping undecodable frame");
            }
        }
    }

    /// Returns `true` if a new transport is in place.
    async fn on_transport_end(&mut self, error: Option<TransportError>) -> bool {
        match &error {
            Some(e) => tracing::info!(error = %e, "Session transport failed"),
            None => tracing::info!("Session transport closed"),
        }
        self.shared.set_state(SessionState::Disconnected);
        self.emit(SessionEvent::Disconnect).await;

        match self.policy.reconnect_target() {
            None => {
                self.finish(error, SessionState::Closed).await;
                false
            }
            Some((connector, address, config)) => {
                self.reconnect(connector.as_ref(), &address, config, error)
                    .await
            }
        }
    }

    async fn reconnect(
        &mut self,
        connector: &dyn Connector,
        address: &str,
        config: ReconnectConfig,
        error: Option<TransportError>,
    ) -> bool {
        self.transport.close().await;
        self.shared.set_state(SessionState::Reconnecting);
        let mut policy = ReconnectPolicy::new(config);

        while let Some(delay) = policy.next_delay() {
            let attempt = policy.attempt_count();
            self.shared
                .reconnect_attempts
                .store(attempt, Ordering::SeqCst);

            if !self.wait_for_retry(delay).await {
                self.release(SessionState::Closed).await;
                return false;
            }

            metrics::record_reconnect_attempt();
            tracing::info!(attempt, address = %address, "Reconnecting session");

            match tokio::time::timeout(policy.connect_timeout(), connector.connect(address)).await {
                Ok(Ok(transport)) => {
                    self.transport = transport;
                    policy.reset();
                    self.shared.reconnect_attempts.store(0, Ordering::SeqCst);
                    self.shared.set_state(SessionState::Connected);
                    tracing::info!(address = %address, "Session reconnected");
                    self.emit(SessionEvent::Reconnect).await;
                    return true;
                }
                Ok(Err(e)) => {
                    tracing::warn!(attempt, error = %e, "Reconnect attempt failed");
                }
                Err(_) => {
                    tracing::warn!(attempt, "Reconnect attempt timed out");
                }
            }
        }

        tracing::warn!(address = %address, "Reconnect attempts exhausted");
        self.finish(error, SessionState::Failed).await;
        false
    }

    /// Sleep out the retry delay. Returns `false` if the session was
    /// destroyed meanwhile.
    async fn wait_for_retry(&mut self, delay: Duration) -> bool {
        let deadline = Instant::now() + delay;
        loop {
            tokio::select! {
                () = self.shared.cancel.cancelled() => return false,
                () = tokio::time::sleep_until(deadline) => return true,
                payload = self.outbound.recv() => {
                    if payload.is_none() {
                        return false;
                    }
                    tracing::debug!("Dropping write queued while reconnecting");
                }
            }
        }
    }

    async fn finish(&mut self, error: Option<TransportError>, state: SessionState) {
        self.transport.close().await;
        self.shared.open.store(false, Ordering::SeqCst);
        self.shared.set_state(state);
        self.emit(SessionEvent::Finish(error)).await;
    }

    async fn release(&mut self, state: SessionState) {
        if tokio::time::timeout(CLOSE_TIMEOUT, self.transport.close())
            .await
            .is_err()
        {
            tracing::debug!("Transport close timed out");
        }
        self.shared.open.store(false, Ordering::SeqCst);
        self.shared.set_state(state);
        tracing::debug!("Session released");
    }

    async fn emit(&mut self, event: SessionEvent) {
        let name = event.name();
        if self.events.send(event).await.is_err() {
            tracing::trace!(event = name, "Session event dropped, receiver gone");
        }
    }
}
