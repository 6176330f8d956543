//! Application Services
//!
//! `MarketWatchServer` owns the lifecycle of every accepted session and is
//! the only writer to the watch store.
//!
//! # Flow
//!
//! ```text
//! accepted session ──► register with hub ──► push current list
//!                                                  │
//!                     sync request ◄───────────────┘
//!                          │
//!               store.update(symbols)
//!                ┌─────────┴──────────┐
//!            rejected              applied
//!                │                    │
//!      Error to sender only   store.sync() ──► Sync to every session
//! ```
//!
//! The initial push and the apply-then-broadcast step share one lock, so a
//! new session never sees an older list after a newer one.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Instant;

use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::application::ports::{StoreError, WatchStore};
use crate::domain::message::{ErrorMessage, Message, SyncMessage};
use crate::domain::symbol::Symbol;
use crate::infrastructure::broadcast::SharedBroadcastHub;
use crate::infrastructure::metrics::{self, RejectReason};
use crate::infrastructure::session::{Session, SessionEvent, SessionHandle};

/// Errors that end the server.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// The store could not be initialized.
    #[error("watch store setup failed: {0}")]
    Setup(#[source] StoreError),

    /// The store failed in a way it cannot recover from.
    #[error("watch store failed: {0}")]
    Fatal(#[source] StoreError),

    /// The store could not be stopped.
    #[error("watch store teardown failed: {0}")]
    Teardown(#[source] StoreError),
}

fn sync_message(symbols: &[Symbol]) -> Message {
    SyncMessage::new(symbols.iter().map(Symbol::as_str)).into()
}

/// Orchestrates sessions against the watch store.
pub struct MarketWatchServer {
    store: Arc<dyn WatchStore>,
    hub: SharedBroadcastHub,
    default_symbols: Vec<String>,
    cancel: CancellationToken,
    publish: Mutex<()>,
    ready: AtomicBool,
    watch_list_size: AtomicUsize,
}

impl std::fmt::Debug for MarketWatchServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MarketWatchServer")
            .field("default_symbols", &self.default_symbols)
            .field("ready", &self.is_ready())
            .field("sessions", &self.session_count())
            .finish_non_exhaustive()
    }
}

impl MarketWatchServer {
    /// Create a server. `cancel` stops the accept loop.
    #[must_use]
    pub fn new(
        store: Arc<dyn WatchStore>,
        hub: SharedBroadcastHub,
        default_symbols: Vec<String>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            store,
            hub,
            default_symbols,
            cancel,
            publish: Mutex::new(()),
            ready: AtomicBool::new(false),
            watch_list_size: AtomicUsize::new(0),
        }
    }

    /// Whether the store has been set up and sessions are being served.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    /// Number of registered sessions.
    #[must_use]
    pub fn session_count(&self) -> usize {
        self.hub.session_count()
    }

    /// Watch list size as of the last setup or applied update.
    #[must_use]
    pub fn watch_list_size(&self) -> usize {
        self.watch_list_size.load(Ordering::SeqCst)
    }

    /// Set up the store, serve sessions from `incoming` until it closes or
    /// the server is cancelled, then tear everything down.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be set up, fails fatally while
    /// serving, or cannot be stopped. All of them are process-fatal.
    pub async fn init(self: Arc<Self>, mut incoming: mpsc::Receiver<Session>) -> Result<(), ServerError> {
        self.store
            .setup(&self.default_symbols)
            .await
            .map_err(ServerError::Setup)?;
        match self.store.sync().await {
            Ok(symbols) => self.record_size(symbols.len()),
            Err(e) => tracing::warn!(error = %e, "Could not read watch list after setup"),
        }
        self.ready.store(true, Ordering::SeqCst);
        tracing::info!(symbols = ?self.default_symbols, "Watch store set up, accepting sessions");

        let sessions_cancel = self.cancel.child_token();
        let mut tasks = JoinSet::new();
        let mut fatal = None;

        loop {
            tokio::select! {
                () = self.cancel.cancelled() => break,
                next = incoming.recv() => match next {
                    Some(session) => {
                        tasks.spawn(Arc::clone(&self).serve(session, sessions_cancel.clone()));
                    }
                    None => break,
                },
                Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                    if let Ok(Err(e)) = joined {
                        fatal = Some(e);
                        break;
                    }
                }
            }
        }

        tracing::info!("Accept stream ended, shutting down");
        self.ready.store(false, Ordering::SeqCst);
        incoming.close();
        sessions_cancel.cancel();
        let destroyed = self.hub.destroy_all();
        while let Some(joined) = tasks.join_next().await {
            if let Ok(Err(e)) = joined {
                fatal.get_or_insert(e);
            }
        }
        tracing::debug!(destroyed, "Sessions released");

        if let Some(e) = fatal {
            // Best effort; the original failure is what gets reported
            let _ = self.store.stop(true).await;
            return Err(ServerError::Fatal(e));
        }

        self.store
            .stop(true)
            .await
            .map_err(ServerError::Teardown)?;
        tracing::info!("Watch store stopped");
        Ok(())
    }

    async fn serve(
        self: Arc<Self>,
        session: Session,
        cancel: CancellationToken,
    ) -> Result<(), StoreError> {
        let (handle, mut events) = session.into_parts();
        let id = handle.id();

        {
            let _publish = self.publish.lock().await;
            self.hub.register(handle.clone());
            match self.store.sync().await {
                Ok(symbols) => {
                    if let Err(e) = handle.send(&sync_message(&symbols)) {
                        tracing::debug!(session = %id, error = %e, "Initial push failed");
                    }
                }
                Err(e) => {
                    tracing::warn!(session = %id, error = %e, "Could not read watch list for initial push");
                    let _ = handle.send(&ErrorMessage::new(e.to_string()).into());
                }
            }
        }

        let result = loop {
            let event = tokio::select! {
                () = cancel.cancelled() => {
                    let _ = handle.destroy();
                    break Ok(());
                }
                event = events.recv() => event,
            };

            match event {
                Some(SessionEvent::Sync(request)) => {
                    if let Err(e) = self.handle_update(&handle, request).await {
                        break Err(e);
                    }
                }
                Some(SessionEvent::Error(message)) => {
                    tracing::debug!(session = %id, reason = %message.reason, "Client reported an error");
                }
                Some(SessionEvent::Unhandled(message)) => {
                    tracing::debug!(session = %id, kind = message.kind().as_str(), "Ignoring unhandled message");
                }
                Some(SessionEvent::Disconnect | SessionEvent::Reconnect) => {}
                Some(SessionEvent::Finish(error)) => {
                    tracing::info!(session = %id, error = ?error, "Session finished");
                    break Ok(());
                }
                None => break Ok(()),
            }
        };

        self.hub.unregister(id);
        result
    }

    /// Apply one update request. Only fatal store errors are returned.
    async fn handle_update(
        &self,
        handle: &SessionHandle,
        request: SyncMessage,
    ) -> Result<(), StoreError> {
        let _publish = self.publish.lock().await;
        let started = Instant::now();

        if let Err(e) = self.store.update(&request.symbols).await {
            if e.is_fatal() {
                tracing::error!(session = %handle.id(), error = %e, "Watch store failed fatally");
                let _ = handle.send(&ErrorMessage::new(e.to_string()).into());
                return Err(e);
            }
            metrics::record_update_rejected(RejectReason::from_store_error(&e));
            tracing::info!(session = %handle.id(), error = %e, "Update rejected");
            if let Err(send_err) = handle.send(&ErrorMessage::new(e.to_string()).into()) {
                tracing::debug!(session = %handle.id(), error = %send_err, "Rejection could not be delivered");
            }
            return Ok(());
        }
        metrics::record_update_accepted(started.elapsed());

        match self.store.sync().await {
            Ok(symbols) => {
                self.record_size(symbols.len());
                match self.hub.broadcast(&sync_message(&symbols)) {
                    Ok(report) => tracing::info!(
                        session = %handle.id(),
                        symbols = symbols.len(),
                        delivered = report.delivered,
                        failed = report.failed,
                        "Watch list updated"
                    ),
                    Err(e) => tracing::warn!(error = %e, "Watch list could not be encoded"),
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "Update applied but watch list could not be read back");
            }
        }
        Ok(())
    }

    fn record_size(&self, size: usize) {
        self.watch_list_size.store(size, Ordering::SeqCst);
        metrics::set_watch_list_size(size);
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::SessionSettings;
    use crate::application::ports::{MockWatchStore, Transport};
    use crate::domain::symbol::SymbolUniverse;
    use crate::domain::watchlist::{WatchError, WatchRules};
    use crate::infrastructure::broadcast::BroadcastHub;
    use crate::infrastructure::session::memory::MemoryTransport;
    use crate::infrastructure::store::InMemoryWatchStore;

    const WAIT: Duration = Duration::from_secs(2);

    struct Harness {
        server: Arc<MarketWatchServer>,
        incoming: mpsc::Sender<Session>,
        task: tokio::task::JoinHandle<Result<(), ServerError>>,
    }

    fn start(store: Arc<dyn WatchStore>, defaults: &[&str]) -> Harness {
        let server = Arc::new(MarketWatchServer::new(
            store,
            Arc::new(BroadcastHub::new()),
            defaults.iter().map(ToString::to_string).collect(),
            CancellationToken::new(),
        ));
        let (incoming, rx) = mpsc::channel(8);
        let task = tokio::spawn(Arc::clone(&server).init(rx));
        Harness {
            server,
            incoming,
            task,
        }
    }

    fn memory_store() -> Arc<dyn WatchStore> {
        Arc::new(InMemoryWatchStore::new(WatchRules::new(
            SymbolUniverse::new(["AAPL", "MSFT", "GOOG", "AMZN", "TSLA"]),
            10,
        )))
    }

    async fn connect(harness: &Harness) -> MemoryTransport {
        let (local, peer) = MemoryTransport::pair();
        let session = Session::server(Box::new(local), &SessionSettings::default());
        harness.incoming.send(session).await.unwrap();
        peer
    }

    async fn read(peer: &mut MemoryTransport) -> Message {
        let bytes = tokio::time::timeout(WAIT, peer.recv())
            .await
            .expect("timed out waiting for frame")
            .expect("peer stream ended")
            .unwrap();
        Message::unpack(&bytes).unwrap()
    }

    async fn request(peer: &mut MemoryTransport, symbols: &[&str]) {
        let frame = Message::from(SyncMessage::new(symbols.iter().copied()))
            .pack()
            .unwrap();
        peer.send(frame).await.unwrap();
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

    #[tokio::test]
    async fn pushes_current_list_on_connect() {
        let harness = start(memory_store(), &["aapl", "MSFT"]);
        let mut peer = connect(&harness).await;

        assert_eq!(read(&mut peer).await, SyncMessage::new(["AAPL", "MSFT"]).into());
        // Registered before the push is written
        assert_eq!(harness.server.session_count(), 1);
        assert!(harness.server.is_ready());
        assert_eq!(harness.server.watch_list_size(), 2);
    }

    #[tokio::test]
    async fn accepted_update_reaches_every_session() {
        let harness = start(memory_store(), &["AAPL"]);
        let mut a = connect(&harness).await;
        let mut b = connect(&harness).await;
        let _ = read(&mut a).await;
        let _ = read(&mut b).await;
        wait_for_sessions(&harness.server, 2).await;

        request(&mut a, &["AAPL", "tsla"]).await;

        let expected: Message = SyncMessage::new(["AAPL", "TSLA"]).into();
        assert_eq!(read(&mut a).await, expected);
        assert_eq!(read(&mut b).await, expected);
    }

    #[tokio::test]
    async fn rejected_update_goes_to_sender_only() {
        let harness = start(memory_store(), &["AAPL"]);
        let mut a = connect(&harness).await;
        let mut b = connect(&harness).await;
        let _ = read(&mut a).await;
        let _ = read(&mut b).await;
        wait_for_sessions(&harness.server, 2).await;

        request(&mut a, &["AAPL", "MSFT", "GOOG"]).await;

        match read(&mut a).await {
            Message::Error(error) => {
                assert!(error.reason.contains("only a single stock can be added at a time"));
            }
            other => panic!("expected error, got {other:?}"),
        }
        assert!(
            tokio::time::timeout(Duration::from_millis(100), b.recv())
                .await
                .is_err()
        );
    }

    #[tokio::test]
    async fn blank_entry_is_rejected_to_sender() {
        let harness = start(memory_store(), &["AAPL"]);
        let mut peer = connect(&harness).await;
        let _ = read(&mut peer).await;

        request(&mut peer, &["AAPL", ""]).await;

        match read(&mut peer).await {
            Message::Error(error) => assert!(!error.reason.is_empty()),
            other => panic!("expected error, got {other:?}"),
        }
        assert_eq!(harness.server.watch_list_size(), 1);
    }

    #[tokio::test]
    async fn unreadable_list_after_setup_still_serves() {
        let calls = AtomicUsize::new(0);
        let mut store = MockWatchStore::new();
        store.expect_setup().returning(|_| Ok(()));
        store.expect_sync().returning(move || {
            if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(StoreError::Backend("read timed out".to_string()))
            } else {
                Ok(vec![Symbol::parse("AAPL").unwrap()])
            }
        });
        store.expect_stop().returning(|_| Ok(()));

        let harness = start(Arc::new(store), &["AAPL"]);
        let mut peer = connect(&harness).await;

        assert_eq!(read(&mut peer).await, SyncMessage::new(["AAPL"]).into());
        assert!(harness.server.is_ready());
        assert_eq!(harness.server.watch_list_size(), 0);
    }

    #[tokio::test]
    async fn closing_incoming_stops_store() {
        let mut store = MockWatchStore::new();
        store.expect_setup().times(1).returning(|_| Ok(()));
        store.expect_sync().returning(|| Ok(Vec::new()));
        store.expect_stop().withf(|force| *force).times(1).returning(|_| Ok(()));

        let harness = start(Arc::new(store), &["AAPL"]);
        drop(harness.incoming);

        let result = tokio::time::timeout(WAIT, harness.task).await.unwrap().unwrap();
        assert!(result.is_ok());
        assert!(!harness.server.is_ready());
    }

    #[tokio::test]
    async fn setup_failure_is_fatal() {
        let mut store = MockWatchStore::new();
        store
            .expect_setup()
            .returning(|_| Err(StoreError::Backend("connection refused".to_string())));
        store.expect_stop().never();

        let harness = start(Arc::new(store), &["AAPL"]);

        let result = tokio::time::timeout(WAIT, harness.task).await.unwrap().unwrap();
        assert!(matches!(result, Err(ServerError::Setup(_))));
    }

    #[tokio::test]
    async fn teardown_failure_is_fatal() {
        let mut store = MockWatchStore::new();
        store.expect_setup().returning(|_| Ok(()));
        store.expect_sync().returning(|| Ok(Vec::new()));
        store
            .expect_stop()
            .returning(|_| Err(StoreError::Backend("quit failed".to_string())));

        let harness = start(Arc::new(store), &[]);
        drop(harness.incoming);

        let result = tokio::time::timeout(WAIT, harness.task).await.unwrap().unwrap();
        assert!(matches!(result, Err(ServerError::Teardown(_))));
    }

    #[tokio::test]
    async fn rule_violation_from_store_is_reported_not_fatal() {
        let mut store = MockWatchStore::new();
        store.expect_setup().returning(|_| Ok(()));
        store.expect_sync().returning(|| Ok(Vec::new()));
        store.expect_update().returning(|_| {
            Err(StoreError::Rule(WatchError::UnknownSymbol(
                Symbol::parse("XYZ").unwrap(),
            )))
        });
        store.expect_stop().returning(|_| Ok(()));

        let harness = start(Arc::new(store), &[]);
        let mut peer = connect(&harness).await;
        let _ = read(&mut peer).await;

        request(&mut peer, &["XYZ"]).await;

        assert!(matches!(read(&mut peer).await, Message::Error(_)));
        assert!(!harness.task.is_finished());
    }

    #[tokio::test]
    async fn fatal_update_ends_server() {
        let mut store = MockWatchStore::new();
        store.expect_setup().returning(|_| Ok(()));
        store.expect_sync().returning(|| Ok(Vec::new()));
        store
            .expect_update()
            .returning(|_| Err(StoreError::Fatal("partial wipe".to_string())));
        store.expect_stop().returning(|_| Ok(()));

        let harness = start(Arc::new(store), &[]);
        let mut peer = connect(&harness).await;
        let _ = read(&mut peer).await;

        request(&mut peer, &["AAPL"]).await;

        let result = tokio::time::timeout(WAIT, harness.task).await.unwrap().unwrap();
        assert!(matches!(result, Err(ServerError::Fatal(_))));
    }

    #[tokio::test]
    async fn finished_session_is_unregistered() {
        let harness = start(memory_store(), &["AAPL"]);
        let mut peer = connect(&harness).await;
        let _ = read(&mut peer).await;
        wait_for_sessions(&harness.server, 1).await;

        peer.close().await;

        wait_for_sessions(&harness.server, 0).await;
    }
}
