//! Redis Watch Store
//!
//! Keeps the watch list in a Redis sorted set. Members are scored by
//! insertion position so `ZRANGE` returns subscription order.
//!
//! Every operation is one or more round trips and nothing is wrapped in a
//! transaction: the cardinality check in `subscribe` and the read in
//! `update` can interleave with another writer. Under concurrent writers
//! the list may briefly exceed the limit or absorb more than one change.

use async_trait::async_trait;
use parking_lot::Mutex;
use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::application::ports::{StoreError, WatchStore};
use crate::domain::symbol::Symbol;
use crate::domain::watchlist::WatchRules;

fn backend(e: &redis::RedisError) -> StoreError {
    StoreError::Backend(e.to_string())
}

// =============================================================================
// Sorted Set Adapter
// =============================================================================

/// The sorted-set commands the store needs.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SortedSet: Send + Sync {
    /// Whether `key` exists.
    async fn exists(&self, key: &str) -> Result<bool, StoreError>;

    /// Delete `key`, returning the number of keys removed.
    async fn drop_key(&self, key: &str) -> Result<u32, StoreError>;

    /// Add `member` with `score` unless it is already present.
    ///
    /// Returns `true` if exactly one member was added.
    async fn add(&self, key: &str, score: usize, member: &str) -> Result<bool, StoreError>;

    /// Remove `member`, returning whether it was present.
    async fn remove(&self, key: &str, member: &str) -> Result<bool, StoreError>;

    /// Members from rank `start` to `stop` inclusive, in score order.
    async fn range(&self, key: &str, start: isize, stop: isize) -> Result<Vec<String>, StoreError>;

    /// Number of members.
    async fn card(&self, key: &str) -> Result<usize, StoreError>;

    /// Release any held connection.
    fn close(&self);
}

/// [`SortedSet`] over a Redis connection.
///
/// The connection is opened lazily on first use and shared by every call.
pub struct RedisSortedSet {
    client: redis::Client,
    connection: Mutex<Option<ConnectionManager>>,
}

impl RedisSortedSet {
    /// Create an adapter for `url` without connecting.
    ///
    /// # Errors
    ///
    /// Returns an error if the URL cannot be parsed.
    pub fn new(url: &str) -> Result<Self, StoreError> {
        let client = redis::Client::open(url).map_err(|e| backend(&e))?;
        Ok(Self {
            client,
            connection: Mutex::new(None),
        })
    }

    /// Open the connection if it is not open yet.
    ///
    /// # Errors
    ///
    /// Returns an error if Redis cannot be reached.
    pub async fn open(&self) -> Result<ConnectionManager, StoreError> {
        let existing = self.connection.lock().clone();
        if let Some(connection) = existing {
            return Ok(connection);
        }

        let connection = ConnectionManager::new(self.client.clone())
            .await
            .map_err(|e| backend(&e))?;
        tracing::info!("Connected to Redis");

        Ok(self
            .connection
            .lock()
            .get_or_insert_with(|| connection)
            .clone())
    }
}

#[async_trait]
impl SortedSet for RedisSortedSet {
    async fn exists(&self, key: &str) -> Result<bool, StoreError> {
        let mut conn = self.open().await?;
        conn.exists(key).await.map_err(|e| backend(&e))
    }

    async fn drop_key(&self, key: &str) -> Result<u32, StoreError> {
        let mut conn = self.open().await?;
        conn.del(key).await.map_err(|e| backend(&e))
    }

    async fn add(&self, key: &str, score: usize, member: &str) -> Result<bool, StoreError> {
        let mut conn = self.open().await?;
        let added: u32 = redis::cmd("ZADD")
            .arg(key)
            .arg("NX")
            .arg(score)
            .arg(member)
            .query_async(&mut conn)
            .await
            .map_err(|e| backend(&e))?;
        Ok(added == 1)
    }

    async fn remove(&self, key: &str, member: &str) -> Result<bool, StoreError> {
        let mut conn = self.open().await?;
        let removed: u32 = conn.zrem(key, member).await.map_err(|e| backend(&e))?;
        Ok(removed == 1)
    }

    async fn range(&self, key: &str, start: isize, stop: isize) -> Result<Vec<String>, StoreError> {
        let mut conn = self.open().await?;
        conn.zrange(key, start, stop).await.map_err(|e| backend(&e))
    }

    async fn card(&self, key: &str) -> Result<usize, StoreError> {
        let mut conn = self.open().await?;
        conn.zcard(key).await.map_err(|e| backend(&e))
    }

    /// The next call reconnects.
    fn close(&self) {
        if self.connection.lock().take().is_some() {
            tracing::info!("Redis connection released");
        }
    }
}

impl std::fmt::Debug for RedisSortedSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisSortedSet")
            .field("connected", &self.connection.lock().is_some())
            .finish_non_exhaustive()
    }
}

// =============================================================================
// Store
// =============================================================================

/// Watch store backed by a Redis sorted set.
pub struct RedisWatchStore {
    set: Box<dyn SortedSet>,
    key: String,
    rules: WatchRules,
    stopped: AtomicBool,
}

impl std::fmt::Debug for RedisWatchStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisWatchStore")
            .field("key", &self.key)
            .field("stopped", &self.stopped.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

impl RedisWatchStore {
    /// Create a store for `key` at `url`. Connects lazily.
    ///
    /// # Errors
    ///
    /// Returns an error if the URL cannot be parsed.
    pub fn new(url: &str, key: impl Into<String>, rules: WatchRules) -> Result<Self, StoreError> {
        Ok(Self::with_set(Box::new(RedisSortedSet::new(url)?), key, rules))
    }

    /// Create a store for `key` over an existing sorted-set adapter.
    #[must_use]
    pub fn with_set(set: Box<dyn SortedSet>, key: impl Into<String>, rules: WatchRules) -> Self {
        Self {
            set,
            key: key.into(),
            rules,
            stopped: AtomicBool::new(false),
        }
    }

    /// The sorted-set key.
    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    fn ensure_running(&self) -> Result<(), StoreError> {
        if self.stopped.load(Ordering::SeqCst) {
            return Err(StoreError::Stopped);
        }
        Ok(())
    }

    async fn subscribe_one(&self, raw: &str) -> Result<bool, StoreError> {
        let symbol = self.rules.admit(raw)?;
        let card = self.set.card(&self.key).await?;
        if !self.rules.has_room(card) {
            return Ok(false);
        }
        self.set.add(&self.key, card, symbol.as_str()).await
    }

    async fn replace_all<S: AsRef<str> + Sync>(&self, symbols: &[S]) -> Result<(), StoreError> {
        let existed = self.set.exists(&self.key).await?;
        let removed = self.set.drop_key(&self.key).await?;
        if removed != u32::from(existed) {
            return Err(StoreError::Fatal(format!(
                "expected to remove {} key(s) at {}, removed {removed}",
                u32::from(existed),
                self.key
            )));
        }

        for raw in symbols {
            self.subscribe_one(raw.as_ref()).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl WatchStore for RedisWatchStore {
    async fn setup(&self, symbols: &[String]) -> Result<(), StoreError> {
        self.ensure_running()?;
        self.replace_all(symbols).await?;
        tracing::debug!(key = %self.key, "Watch list set up");
        Ok(())
    }

    async fn subscribe(&self, symbol: &str) -> Result<bool, StoreError> {
        self.ensure_running()?;
        self.subscribe_one(symbol).await
    }

    async fn update(&self, symbols: &[String]) -> Result<(), StoreError> {
        self.ensure_running()?;
        let current = self.sync().await?;
        let planned = self.rules.plan_update(&current, symbols)?;
        self.replace_all(&planned).await
    }

    async fn sync(&self) -> Result<Vec<Symbol>, StoreError> {
        self.ensure_running()?;
        let stop = isize::try_from(self.rules.limit()).unwrap_or(isize::MAX) - 1;
        let members = self.set.range(&self.key, 0, stop).await?;

        let mut symbols = Vec::with_capacity(members.len());
        for member in members {
            match Symbol::parse(&member) {
                Ok(symbol) => symbols.push(symbol),
                Err(_) => tracing::warn!(key = %self.key, "Skipping blank member in watch list"),
            }
        }
        Ok(symbols)
    }

    async fn stop(&self, force: bool) -> Result<(), StoreError> {
        self.stopped.store(true, Ordering::SeqCst);
        if force {
            self.set.close();
        }
        tracing::debug!(force, key = %self.key, "Redis watch store stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::symbol::SymbolUniverse;
    use crate::infrastructure::config::DEFAULT_REDIS_URL;

    fn redis_url() -> String {
        std::env::var("REDIS_URL").unwrap_or_else(|_| DEFAULT_REDIS_URL.to_string())
    }

    fn store(limit: usize) -> RedisWatchStore {
        let rules = WatchRules::new(
            SymbolUniverse::new([
                "AAPL", "MSFT", "GOOG", "AMZN", "TSLA", "NVDA", "META", "NFLX", "AMD", "INTC",
                "ORCL", "IBM",
            ]),
            limit,
        );
        let key = format!("market-watch:test:{}", uuid::Uuid::new_v4());
        RedisWatchStore::new(&redis_url(), key, rules).unwrap()
    }

    fn strings(raw: &[&str]) -> Vec<String> {
        raw.iter().map(ToString::to_string).collect()
    }

    fn names(symbols: &[Symbol]) -> Vec<&str> {
        symbols.iter().map(Symbol::as_str).collect()
    }

    fn rules(limit: usize) -> WatchRules {
        WatchRules::new(SymbolUniverse::new(["AAPL", "MSFT", "GOOG", "TSLA"]), limit)
    }

    fn mocked(set: MockSortedSet, limit: usize) -> RedisWatchStore {
        RedisWatchStore::with_set(Box::new(set), "market-watch:mock", rules(limit))
    }

    #[tokio::test]
    async fn mismatched_delete_is_fatal() {
        let mut set = MockSortedSet::new();
        set.expect_exists().returning(|_| Ok(true));
        set.expect_drop_key().returning(|_| Ok(0));
        set.expect_card().never();
        set.expect_add().never();

        let store = mocked(set, 10);
        let result = store.setup(&strings(&["AAPL"])).await;

        match result {
            Err(e @ StoreError::Fatal(_)) => assert!(e.is_fatal()),
            other => panic!("expected fatal error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn missing_key_needs_no_delete() {
        let mut set = MockSortedSet::new();
        set.expect_exists().returning(|_| Ok(false));
        set.expect_drop_key().returning(|_| Ok(0));
        set.expect_card().returning(|_| Ok(0));
        set.expect_add()
            .withf(|_, score, member| *score == 0 && member == "AAPL")
            .times(1)
            .returning(|_, _, _| Ok(true));

        let store = mocked(set, 10);
        store.setup(&strings(&["aapl"])).await.unwrap();
    }

    #[tokio::test]
    async fn full_set_refuses_without_writing() {
        let mut set = MockSortedSet::new();
        set.expect_card().returning(|_| Ok(2));
        set.expect_add().never();

        let store = mocked(set, 2);

        assert!(!store.subscribe("TSLA").await.unwrap());
    }

    #[tokio::test]
    async fn add_scores_by_current_size() {
        let mut set = MockSortedSet::new();
        set.expect_card().returning(|_| Ok(1));
        set.expect_add()
            .withf(|key, score, member| key == "market-watch:mock" && *score == 1 && member == "TSLA")
            .times(1)
            .returning(|_, _, _| Ok(true));

        let store = mocked(set, 2);

        assert!(store.subscribe(" tsla ").await.unwrap());
    }

    #[tokio::test]
    async fn member_added_elsewhere_is_not_counted() {
        let mut set = MockSortedSet::new();
        set.expect_card().returning(|_| Ok(0));
        set.expect_add().times(1).returning(|_, _, _| Ok(false));

        let store = mocked(set, 10);

        assert!(!store.subscribe("AAPL").await.unwrap());
    }

    #[tokio::test]
    async fn unknown_symbol_is_rejected_before_any_round_trip() {
        let mut set = MockSortedSet::new();
        set.expect_card().never();
        set.expect_add().never();

        let store = mocked(set, 10);

        assert!(matches!(
            store.subscribe("ZZZZ").await,
            Err(StoreError::Rule(_))
        ));
    }

    #[tokio::test]
    async fn stopped_store_refuses_and_closes() {
        let mut set = MockSortedSet::new();
        set.expect_close().times(1).return_const(());
        set.expect_card().never();

        let store = mocked(set, 10);
        store.stop(true).await.unwrap();

        assert!(matches!(
            store.subscribe("AAPL").await,
            Err(StoreError::Stopped)
        ));
    }

    #[test]
    fn rejects_malformed_url() {
        assert!(matches!(
            RedisSortedSet::new("not a url"),
            Err(StoreError::Backend(_))
        ));
    }

    #[tokio::test]
    #[ignore = "requires a running Redis at REDIS_URL"]
    async fn setup_keeps_subscription_order() {
        let store = store(10);

        store
            .setup(&strings(&["msft", "AAPL", "msft", "goog"]))
            .await
            .unwrap();
        assert_eq!(names(&store.sync().await.unwrap()), ["MSFT", "AAPL", "GOOG"]);

        // Second setup replaces the existing key
        store.setup(&strings(&["TSLA"])).await.unwrap();
        assert_eq!(names(&store.sync().await.unwrap()), ["TSLA"]);

        store.set.drop_key(store.key()).await.unwrap();
        store.stop(true).await.unwrap();
    }

    #[tokio::test]
    #[ignore = "requires a running Redis at REDIS_URL"]
    async fn subscribe_respects_limit_and_duplicates() {
        let store = store(2);
        store.setup(&strings(&["AAPL"])).await.unwrap();

        assert!(!store.subscribe("aapl").await.unwrap());
        assert!(store.subscribe("MSFT").await.unwrap());
        assert!(!store.subscribe("GOOG").await.unwrap());
        assert_eq!(store.set.card(store.key()).await.unwrap(), 2);

        store.set.drop_key(store.key()).await.unwrap();
        store.stop(true).await.unwrap();
    }

    #[tokio::test]
    #[ignore = "requires a running Redis at REDIS_URL"]
    async fn update_rejects_multiple_changes() {
        let store = store(10);
        store.setup(&strings(&["AAPL"])).await.unwrap();

        assert!(store.update(&strings(&["AAPL", "MSFT", "GOOG"])).await.is_err());
        assert_eq!(names(&store.sync().await.unwrap()), ["AAPL"]);

        store.update(&strings(&["MSFT", "AAPL"])).await.unwrap();
        assert_eq!(names(&store.sync().await.unwrap()), ["MSFT", "AAPL"]);

        store.set.drop_key(store.key()).await.unwrap();
        store.stop(true).await.unwrap();
    }

    #[tokio::test]
    #[ignore = "requires a running Redis at REDIS_URL"]
    async fn primitives_round_trip() {
        let store = store(10);
        let key = store.key().to_string();

        assert!(store.set.add(&key, 0, "AAPL").await.unwrap());
        assert!(!store.set.add(&key, 1, "AAPL").await.unwrap());
        assert!(store.set.add(&key, 1, "MSFT").await.unwrap());
        assert_eq!(store.set.range(&key, 0, -1).await.unwrap(), ["AAPL", "MSFT"]);
        assert!(store.set.remove(&key, "AAPL").await.unwrap());
        assert_eq!(store.set.card(&key).await.unwrap(), 1);
        assert_eq!(store.set.drop_key(&key).await.unwrap(), 1);
        assert!(!store.set.exists(&key).await.unwrap());

        store.set.close();
    }
}
