//! WebSocket Transport
//!
//! Adapts `tokio-tungstenite` streams to the [`Transport`] port, opens client
//! connections through [`WsConnector`] and accepts server connections through
//! [`WebSocketAcceptor`].
//!
//! Frames are carried as binary messages. Text messages are accepted and
//! treated as raw bytes. Ping/pong is answered by tungstenite itself.

use std::net::SocketAddr;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::{Error as WsError, Message as WsMessage};
use tokio_util::sync::CancellationToken;

use crate::SessionSettings;
use crate::application::ports::{Connector, Transport, TransportError};
use crate::infrastructure::metrics;
use crate::infrastructure::session::Session;

// =============================================================================
// Transport
// =============================================================================

/// A WebSocket connection carrying protocol frames.
#[derive(Debug)]
pub struct WsTransport<S> {
    stream: WebSocketStream<S>,
}

impl<S> WsTransport<S> {
    /// Wrap an established WebSocket stream.
    #[must_use]
    pub const fn new(stream: WebSocketStream<S>) -> Self {
        Self { stream }
    }
}

#[async_trait]
impl<S> Transport for WsTransport<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    async fn send(&mut self, payload: Vec<u8>) -> Result<(), TransportError> {
        self.stream
            .send(WsMessage::Binary(payload.into()))
            .await
            .map_err(|e| match e {
                WsError::ConnectionClosed | WsError::AlreadyClosed => TransportError::Closed,
                other => TransportError::Io(other.to_string()),
            })
    }

    async fn recv(&mut self) -> Option<Result<Vec<u8>, TransportError>> {
        loop {
            match self.stream.next().await? {
                Ok(WsMessage::Binary(bytes)) => return Some(Ok(bytes.to_vec())),
                Ok(WsMessage::Text(text)) => return Some(Ok(text.as_bytes().to_vec())),
                Ok(WsMessage::Close(frame)) => {
                    tracing::debug!(?frame, "WebSocket closed by peer");
                    return None;
                }
                Ok(WsMessage::Ping(_) | WsMessage::Pong(_) | WsMessage::Frame(_)) => {}
                Err(WsError::ConnectionClosed | WsError::AlreadyClosed) => return None,
                Err(e) => return Some(Err(TransportError::Io(e.to_string()))),
            }
        }
    }

    async fn close(&mut self) {
        if let Err(e) = self.stream.close(None).await {
            tracing::trace!(error = %e, "WebSocket close failed");
        }
    }
}

// =============================================================================
// Client Connector
// =============================================================================

/// Opens `ws://` and `wss://` client connections.
#[derive(Debug, Default, Clone, Copy)]
pub struct WsConnector;

impl WsConnector {
    /// Create a connector.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self, address: &str) -> Result<Box<dyn Transport>, TransportError> {
        let (stream, response) = tokio_tungstenite::connect_async(address)
            .await
            .map_err(|e| TransportError::ConnectFailed(e.to_string()))?;

        tracing::debug!(address, status = %response.status(), "WebSocket connected");
        Ok(Box::new(WsTransport::new(stream)))
    }
}

// =============================================================================
// Server Acceptor
// =============================================================================

/// Accepts WebSocket connections and hands them over as server sessions.
#[derive(Debug)]
pub struct WebSocketAcceptor {
    listener: TcpListener,
    settings: SessionSettings,
}

impl WebSocketAcceptor {
    /// Bind the listening socket.
    ///
    /// # Errors
    ///
    /// Returns an error if the address cannot be bound.
    pub async fn bind(addr: SocketAddr, settings: SessionSettings) -> std::io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self { listener, settings })
    }

    /// Address the listener is bound to.
    ///
    /// # Errors
    ///
    /// Returns an error if the socket address cannot be read.
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept connections until cancelled or until `sessions` is closed.
    ///
    /// Handshakes run on their own tasks so a slow peer cannot hold up the
    /// accept loop. Dropping `sessions` on return ends the consumer's stream.
    pub async fn run(self, sessions: mpsc::Sender<Session>, cancel: CancellationToken) {
        match self.listener.local_addr() {
            Ok(addr) => tracing::info!("WebSocket server listening on ws://{addr}"),
            Err(e) => tracing::warn!(error = %e, "WebSocket listener address unavailable"),
        }

        loop {
            let accepted = tokio::select! {
                () = cancel.cancelled() => break,
                () = sessions.closed() => break,
                accepted = self.listener.accept() => accepted,
            };

            match accepted {
                Ok((stream, peer)) => {
                    let sessions = sessions.clone();
                    let settings = self.settings.clone();
                    tokio::spawn(handshake(stream, peer, settings, sessions));
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Failed to accept connection");
                }
            }
        }

        tracing::info!("WebSocket acceptor stopped");
    }
}

async fn handshake(
    stream: TcpStream,
    peer: SocketAddr,
    settings: SessionSettings,
    sessions: mpsc::Sender<Session>,
) {
    let upgraded =
        tokio::time::timeout(settings.connect_timeout, tokio_tungstenite::accept_async(stream)).await;

    let ws = match upgraded {
        Ok(Ok(ws)) => ws,
        Ok(Err(e)) => {
            tracing::warn!(peer = %peer, error = %e, "WebSocket handshake failed");
            return;
        }
        Err(_) => {
            tracing::warn!(peer = %peer, "WebSocket handshake timed out");
            return;
        }
    };

    let session = Session::server(Box::new(WsTransport::new(ws)), &settings);
    tracing::info!(peer = %peer, session = %session.id(), "Session accepted");
    metrics::record_session_accepted();

    if let Err(mpsc::error::SendError(session)) = sessions.send(session).await {
        tracing::debug!(session = %session.id(), "Acceptor closed, dropping session");
        let _ = session.destroy();
    }
}
