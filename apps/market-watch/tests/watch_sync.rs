//! End-to-end watch list synchronization over real WebSocket connections.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use market_watch::{
    BroadcastHub, InMemoryWatchStore, MarketWatchServer, ServerError, Session, SessionEvent,
    SessionSettings, SymbolUniverse, SyncMessage, WatchRules, WebSocketAcceptor, WsConnector,
};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

const WAIT: Duration = Duration::from_secs(5);

struct Service {
    addr: SocketAddr,
    server: Arc<MarketWatchServer>,
    cancel: CancellationToken,
    task: JoinHandle<Result<(), ServerError>>,
}

fn settings() -> SessionSettings {
    SessionSettings {
        buffer: 32,
        disconnect_retry: Duration::from_millis(50),
        max_reconnect_attempts: 2,
        connect_timeout: Duration::from_secs(2),
    }
}

async fn start_service() -> Service {
    let rules = WatchRules::new(
        SymbolUniverse::new(["AAPL", "MSFT", "GOOG", "AMZN", "TSLA", "NVDA"]),
        3,
    );
    let cancel = CancellationToken::new();
    let server = Arc::new(MarketWatchServer::new(
        Arc::new(InMemoryWatchStore::new(rules)),
        Arc::new(BroadcastHub::new()),
        vec!["AAPL".to_string(), "MSFT".to_string()],
        cancel.clone(),
    ));

    let acceptor = WebSocketAcceptor::bind("127.0.0.1:0".parse().unwrap(), settings())
        .await
        .unwrap();
    let addr = acceptor.local_addr().unwrap();
    let (tx, rx) = mpsc::channel(8);
    tokio::spawn(acceptor.run(tx, cancel.clone()));
    let task = tokio::spawn(Arc::clone(&server).init(rx));

    Service {
        addr,
        server,
        cancel,
        task,
    }
}

async fn connect(service: &Service) -> Session {
    Session::connect(
        Arc::new(WsConnector::new()),
        format!("ws://{}", service.addr),
        &settings(),
    )
    .await
    .unwrap()
}

async fn next_event(session: &mut Session) -> SessionEvent {
    tokio::time::timeout(WAIT, session.next_event())
        .await
        .expect("timed out waiting for event")
        .expect("event stream ended")
}

async fn next_sync(session: &mut Session) -> Vec<String> {
    match next_event(session).await {
        SessionEvent::Sync(sync) => sync.symbols,
        other => panic!("expected sync, got {other:?}"),
    }
}

async fn wait_for_sessions(server: &MarketWatchServer, count: usize) {
    tokio::time::timeout(WAIT, async {
        while server.session_count() != count {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("session count never reached");
}

fn propose(session: &Session, symbols: &[&str]) {
    session
        .send(&SyncMessage::new(symbols.iter().copied()).into())
        .unwrap();
}

#[tokio::test]
async fn new_session_receives_current_list() {
    let service = start_service().await;
    let mut client = connect(&service).await;

    assert_eq!(next_sync(&mut client).await, ["AAPL", "MSFT"]);
    assert!(service.server.is_ready());

    service.cancel.cancel();
    service.task.await.unwrap().unwrap();
}

#[tokio::test]
async fn accepted_update_reaches_every_client() {
    let service = start_service().await;
    let mut alice = connect(&service).await;
    let mut bob = connect(&service).await;
    next_sync(&mut alice).await;
    next_sync(&mut bob).await;
    wait_for_sessions(&service.server, 2).await;

    propose(&alice, &["aapl", "msft", "tsla"]);

    assert_eq!(next_sync(&mut alice).await, ["AAPL", "MSFT", "TSLA"]);
    assert_eq!(next_sync(&mut bob).await, ["AAPL", "MSFT", "TSLA"]);
    assert_eq!(service.server.watch_list_size(), 3);

    service.cancel.cancel();
    service.task.await.unwrap().unwrap();
}

#[tokio::test]
async fn rejected_update_reaches_only_the_sender() {
    let service = start_service().await;
    let mut alice = connect(&service).await;
    let mut bob = connect(&service).await;
    next_sync(&mut alice).await;
    next_sync(&mut bob).await;
    wait_for_sessions(&service.server, 2).await;

    // Swaps MSFT for TSLA in one step
    propose(&bob, &["AAPL", "TSLA"]);

    match next_event(&mut bob).await {
        SessionEvent::Error(error) => assert!(!error.reason.is_empty()),
        other => panic!("expected error, got {other:?}"),
    }
    let nothing = tokio::time::timeout(Duration::from_millis(200), alice.next_event()).await;
    assert!(nothing.is_err(), "other client must not hear about rejections");

    service.cancel.cancel();
    service.task.await.unwrap().unwrap();
}

#[tokio::test]
async fn unknown_symbol_is_rejected() {
    let service = start_service().await;
    let mut client = connect(&service).await;
    next_sync(&mut client).await;
    wait_for_sessions(&service.server, 1).await;

    propose(&client, &["AAPL", "MSFT", "ZZZZ"]);

    assert!(matches!(next_event(&mut client).await, SessionEvent::Error(_)));
    assert_eq!(service.server.watch_list_size(), 2);

    service.cancel.cancel();
    service.task.await.unwrap().unwrap();
}

#[tokio::test]
async fn shutdown_disconnects_clients() {
    let service = start_service().await;
    let mut client = connect(&service).await;
    next_sync(&mut client).await;
    wait_for_sessions(&service.server, 1).await;

    service.cancel.cancel();
    service.task.await.unwrap().unwrap();

    assert_eq!(next_event(&mut client).await, SessionEvent::Disconnect);
    assert_eq!(service.server.session_count(), 0);
    let _ = client.destroy();
}
