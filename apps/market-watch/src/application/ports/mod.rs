//! Port Interfaces
//!
//! Defines the interfaces (ports) for external systems following
//! the Hexagonal Architecture pattern. These are the contracts that
//! infrastructure adapters must implement.
//!
//! ## Driven Ports (Outbound)
//!
//! - `WatchStore`: Authoritative, size-bounded watch list
//! - `Connector`: Opens client-side transports to a server address
//!
//! ## Transport Boundary
//!
//! - `Transport`: One duplex byte-stream connection

use async_trait::async_trait;

use crate::domain::symbol::Symbol;
use crate::domain::watchlist::WatchError;

// =============================================================================
// Watch Store
// =============================================================================

/// Errors raised by watch store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// A symbol or request violated the watch list rules.
    #[error(transparent)]
    Rule(#[from] WatchError),

    /// The backing store failed a round trip.
    #[error("store backend error: {0}")]
    Backend(String),

    /// The store is in an inconsistent state and cannot continue.
    #[error("fatal store error: {0}")]
    Fatal(String),

    /// The store has been stopped.
    #[error("store has been stopped")]
    Stopped,
}

impl StoreError {
    /// Whether the error should terminate the process.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(self, Self::Fatal(_))
    }

    /// Whether the error is a rule violation reported back to the requester.
    #[must_use]
    pub const fn is_rule_violation(&self) -> bool {
        matches!(self, Self::Rule(_))
    }
}

/// Owner of the authoritative watch list.
///
/// Implementations persist the list in subscription order and never hold
/// more than the configured limit.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait WatchStore: Send + Sync {
    /// Clear the list, then subscribe each symbol in order.
    ///
    /// Fails fast on the first rejected symbol. Duplicates and symbols past
    /// the limit are skipped rather than rejected.
    async fn setup(&self, symbols: &[String]) -> Result<(), StoreError>;

    /// Normalize and add one symbol.
    ///
    /// Returns `Ok(false)` when the symbol is already present or the list is
    /// full, and an error when the symbol is outside the universe.
    async fn subscribe(&self, symbol: &str) -> Result<bool, StoreError>;

    /// Replace the list with `symbols`, allowing at most one changed symbol.
    ///
    /// The whole request is validated before anything is written.
    async fn update(&self, symbols: &[String]) -> Result<(), StoreError>;

    /// Current list, in persisted order, bounded by the limit.
    async fn sync(&self) -> Result<Vec<Symbol>, StoreError>;

    /// Stop the store. With `force`, underlying resources are released.
    async fn stop(&self, force: bool) -> Result<(), StoreError>;
}

// =============================================================================
// Transport
// =============================================================================

/// Errors raised by a transport.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// Opening the connection failed.
    #[error("connection failed: {0}")]
    ConnectFailed(String),

    /// The connection failed while open.
    #[error("transport error: {0}")]
    Io(String),

    /// The peer closed the connection.
    #[error("connection closed")]
    Closed,
}

/// One duplex byte-stream connection.
///
/// `recv` must be cancel safe: the session driver polls it inside
/// `tokio::select!` alongside outbound writes.
#[async_trait]
pub trait Transport: Send {
    /// Send one binary payload.
    async fn send(&mut self, payload: Vec<u8>) -> Result<(), TransportError>;

    /// Receive the next payload. `None` means the stream ended cleanly.
    async fn recv(&mut self) -> Option<Result<Vec<u8>, TransportError>>;

    /// Close the connection. Errors while closing are not reported.
    async fn close(&mut self);
}

/// Opens client-side transports.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Open a transport to `address` and wait until it is connected.
    async fn connect(&self, address: &str) -> Result<Box<dyn Transport>, TransportError>;
}
