//! In-Process Transport
//!
//! A connected pair of transports backed by channels, for embedding a
//! session next to its peer in the same process and for tests.

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::application::ports::{Transport, TransportError};

enum Frame {
    Data(Vec<u8>),
    Fail(TransportError),
}

/// One end of an in-process duplex connection.
///
/// Dropping or closing either end ends the other end's stream.
#[derive(Debug)]
pub struct MemoryTransport {
    tx: Option<mpsc::UnboundedSender<Frame>>,
    rx: mpsc::UnboundedReceiver<Frame>,
}

impl MemoryTransport {
    /// Create a connected pair.
    #[must_use]
    pub fn pair() -> (Self, Self) {
        let (a_tx, b_rx) = mpsc::unbounded_channel();
        let (b_tx, a_rx) = mpsc::unbounded_channel();
        (
            Self {
                tx: Some(a_tx),
                rx: a_rx,
            },
            Self {
                tx: Some(b_tx),
                rx: b_rx,
            },
        )
    }

    /// Make the peer's next `recv` fail with `error`, then close this end.
    pub fn fail_peer(&mut self, error: TransportError) {
        if let Some(tx) = self.tx.take() {
            let _ = tx.send(Frame::Fail(error));
        }
    }
}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Data(bytes) => f.debug_tuple("Data").field(&bytes.len()).finish(),
            Self::Fail(error) => f.debug_tuple("Fail").field(error).finish(),
        }
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn send(&mut self, payload: Vec<u8>) -> Result<(), TransportError> {
        let tx = self.tx.as_ref().ok_or(TransportError::Closed)?;
        tx.send(Frame::Data(payload))
            .map_err(|_| TransportError::Closed)
    }

    async fn recv(&mut self) -> Option<Result<Vec<u8>, TransportError>> {
        match self.rx.recv().await? {
            Frame::Data(bytes) => Some(Ok(bytes)),
            Frame::Fail(error) => Some(Err(error)),
        }
    }

    async fn close(&mut self) {
        self.tx = None;
        self.rx.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn pair_is_duplex() {
        let (mut a, mut b) = MemoryTransport::pair();

        a.send(b"ping".to_vec()).await.unwrap();
        b.send(b"pong".to_vec()).await.unwrap();

        assert_eq!(b.recv().await.unwrap().unwrap(), b"ping");
        assert_eq!(a.recv().await.unwrap().unwrap(), b"pong");
    }

    #[tokio::test]
    async fn close_ends_peer_stream() {
        let (mut a, mut b) = MemoryTransport::pair();

        a.close().await;

        assert!(b.recv().await.is_none());
        assert_eq!(a.send(vec![1]).await, Err(TransportError::Closed));
    }

    #[tokio::test]
    async fn fail_peer_surfaces_error() {
        let (mut a, mut b) = MemoryTransport::pair();

        a.fail_peer(TransportError::Io("reset".to_string()));

        assert_eq!(
            b.recv().await.unwrap(),
            Err(TransportError::Io("reset".to_string()))
        );
        assert!(b.recv().await.is_none());
    }
}
