//! Client session reconnection against a scripted connector.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use market_watch::infrastructure::session::memory::MemoryTransport;
use market_watch::{
    Connector, Message, Session, SessionError, SessionEvent, SessionSettings, SessionState,
    SyncMessage, Transport, TransportError,
};
use tokio::sync::mpsc;

const WAIT: Duration = Duration::from_secs(2);

/// Hands out in-memory transports, refusing while `refusals` is non-zero.
struct ScriptedConnector {
    refusals: AtomicU32,
    attempts: AtomicU32,
    peers: mpsc::UnboundedSender<MemoryTransport>,
}

impl ScriptedConnector {
    fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<MemoryTransport>) {
        let (peers, rx) = mpsc::unbounded_channel();
        let connector = Arc::new(Self {
            refusals: AtomicU32::new(0),
            attempts: AtomicU32::new(0),
            peers,
        });
        (connector, rx)
    }

    fn refuse(&self, times: u32) {
        self.refusals.store(times, Ordering::SeqCst);
    }

    fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connector for ScriptedConnector {
    async fn connect(&self, _address: &str) -> Result<Box<dyn Transport>, TransportError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let refused = self
            .refusals
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if refused {
            return Err(TransportError::ConnectFailed("connection refused".to_string()));
        }

        let (local, peer) = MemoryTransport::pair();
        let _ = self.peers.send(peer);
        Ok(Box::new(local))
    }
}

/// Never finishes connecting.
struct StalledConnector;

#[async_trait]
impl Connector for StalledConnector {
    async fn connect(&self, _address: &str) -> Result<Box<dyn Transport>, TransportError> {
        std::future::pending().await
    }
}

fn settings(max_reconnect_attempts: u32) -> SessionSettings {
    SessionSettings {
        buffer: 16,
        disconnect_retry: Duration::from_millis(10),
        max_reconnect_attempts,
        connect_timeout: Duration::from_millis(100),
    }
}

async fn next_event(session: &mut Session) -> SessionEvent {
    tokio::time::timeout(WAIT, session.next_event())
        .await
        .expect("timed out waiting for event")
        .expect("event stream ended")
}

async fn next_peer(peers: &mut mpsc::UnboundedReceiver<MemoryTransport>) -> MemoryTransport {
    tokio::time::timeout(WAIT, peers.recv())
        .await
        .expect("timed out waiting for connection")
        .expect("connector dropped")
}

async fn wait_for_state(session: &Session, state: SessionState) {
    tokio::time::timeout(WAIT, async {
        while session.state() != state {
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
    })
    .await
    .expect("state never reached");
}

#[tokio::test]
async fn reconnects_after_refused_attempts() {
    let (connector, mut peers) = ScriptedConnector::new();
    let mut session = Session::connect(connector.clone(), "mem://watch", &settings(5))
        .await
        .unwrap();
    let peer = next_peer(&mut peers).await;

    connector.refuse(2);
    drop(peer);

    assert_eq!(next_event(&mut session).await, SessionEvent::Disconnect);
    assert_eq!(next_event(&mut session).await, SessionEvent::Reconnect);
    assert_eq!(session.state(), SessionState::Connected);
    assert_eq!(session.handle().reconnect_attempts(), 0);
    assert_eq!(connector.attempts(), 4);

    // The new transport carries traffic both ways
    let mut peer = next_peer(&mut peers).await;
    let frame = Message::from(SyncMessage::new(["AAPL"])).pack().unwrap();
    peer.send(frame).await.unwrap();
    assert_eq!(
        next_event(&mut session).await,
        SessionEvent::Sync(SyncMessage::new(["AAPL"]))
    );

    session.write(vec![7, 7]).unwrap();
    let echoed = tokio::time::timeout(WAIT, peer.recv()).await.unwrap();
    assert_eq!(echoed.unwrap().unwrap(), vec![7, 7]);
}

#[tokio::test]
async fn attempt_counter_resets_between_cycles() {
    let (connector, mut peers) = ScriptedConnector::new();
    let mut session = Session::connect(connector.clone(), "mem://watch", &settings(2))
        .await
        .unwrap();

    // Two cycles each needing the full allowance of two attempts
    for _ in 0..2 {
        let peer = next_peer(&mut peers).await;
        connector.refuse(1);
        drop(peer);
        assert_eq!(next_event(&mut session).await, SessionEvent::Disconnect);
        assert_eq!(next_event(&mut session).await, SessionEvent::Reconnect);
    }
    assert_eq!(connector.attempts(), 5);
}

#[tokio::test]
async fn exhausted_attempts_finish_with_original_error() {
    let (connector, mut peers) = ScriptedConnector::new();
    let mut session = Session::connect(connector.clone(), "mem://watch", &settings(3))
        .await
        .unwrap();
    let mut peer = next_peer(&mut peers).await;

    connector.refuse(u32::MAX);
    peer.fail_peer(TransportError::Io("connection reset".to_string()));

    assert_eq!(next_event(&mut session).await, SessionEvent::Disconnect);
    assert_eq!(
        next_event(&mut session).await,
        SessionEvent::Finish(Some(TransportError::Io("connection reset".to_string())))
    );
    assert_eq!(session.state(), SessionState::Failed);
    assert!(!session.handle().is_open());
    assert_eq!(connector.attempts(), 4);
    assert!(matches!(session.destroy(), Err(SessionError::AlreadyDestroyed)));
}

#[tokio::test]
async fn writes_are_rejected_while_reconnecting() {
    let (connector, mut peers) = ScriptedConnector::new();
    let slow_retry = SessionSettings {
        disconnect_retry: Duration::from_secs(30),
        ..settings(3)
    };
    let mut session = Session::connect(connector.clone(), "mem://watch", &slow_retry)
        .await
        .unwrap();

    drop(next_peer(&mut peers).await);
    assert_eq!(next_event(&mut session).await, SessionEvent::Disconnect);
    wait_for_state(&session, SessionState::Reconnecting).await;

    assert!(matches!(
        session.write(vec![1]),
        Err(SessionError::NotConnected)
    ));

    // Destroying mid-cycle ends the session without further attempts
    session.destroy().unwrap();
    let end = tokio::time::timeout(WAIT, session.next_event()).await.unwrap();
    assert_eq!(end, None);
    assert_eq!(session.state(), SessionState::Closed);
    assert_eq!(connector.attempts(), 1);
}

#[tokio::test]
async fn stalled_connect_times_out() {
    let result = Session::connect(Arc::new(StalledConnector), "mem://watch", &settings(1)).await;

    match result {
        Err(SessionError::ConnectTimeout(after)) => {
            assert_eq!(after, Duration::from_millis(100));
        }
        other => panic!("expected timeout, got {:?}", other.map(|s| s.id())),
    }
}

#[tokio::test]
async fn refused_connect_is_reported() {
    let (connector, _peers) = ScriptedConnector::new();
    connector.refuse(1);

    let result = Session::connect(connector, "mem://watch", &settings(1)).await;

    assert!(matches!(
        result,
        Err(SessionError::Transport(TransportError::ConnectFailed(_)))
    ));
}
