#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::needless_pass_by_value,
        clippy::items_after_statements
    )
)]

//! Market Watch - Real-time Watch List Synchronization
//!
//! A WebSocket service that keeps one bounded list of watched ticker
//! symbols consistent across every connected client. Clients propose a new
//! list; the server validates it against the tradeable universe, applies at
//! most one change, and pushes the result to every session.
//!
//! # Layers (inside → outside)
//!
//! - **Domain**: Core watch list types with no I/O
//!   - `symbol`: Ticker symbols and the tradeable universe
//!   - `message`: The Sync and Error protocol messages
//!   - `watchlist`: Limit, universe and single-change rules
//!
//! - **Application**: Use cases and port definitions
//!   - `ports`: Watch store and transport interfaces
//!   - `services`: Session orchestration and update handling
//!
//! - **Infrastructure**: Adapters and external integrations
//!   - `session`: Framed sessions with reconnect for clients
//!   - `websocket`: WebSocket transport, connector and acceptor
//!   - `store`: In-memory and Redis sorted-set watch stores
//!   - `broadcast`: Session registry and fan-out
//!   - `config`, `universe`: Configuration and universe loading
//!   - `health`, `metrics`, `telemetry`: Observability
//!
//! # Data Flow
//!
//! ```text
//! Client 1 ──┐                                   ┌──► Client 1
//!            │    ┌──────────┐    ┌─────────┐    │
//! Client 2 ──┼───►│  Server  │───►│  Store  │    ├──► Client 2
//!            │    └────┬─────┘    └─────────┘    │
//! Client N ──┘         └──────► Broadcast ───────┴──► Client N
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Module Declarations
// =============================================================================

/// Domain layer - Core watch list types with no external dependencies.
pub mod domain;

/// Application layer - Use cases and port definitions.
pub mod application;

/// Infrastructure layer - Adapters and external integrations.
pub mod infrastructure;

// =============================================================================
// Re-exports
// =============================================================================

// Domain types
pub use domain::message::{ErrorMessage, Message, MessageKind, SyncMessage};
pub use domain::symbol::{Symbol, SymbolError, SymbolUniverse};
pub use domain::watchlist::{DEFAULT_MAX_WATCH_LIMIT, WatchError, WatchRules};

// Ports and services
pub use application::ports::{
    Connector, StoreError, Transport, TransportError, WatchStore,
};
pub use application::services::{MarketWatchServer, ServerError};

// Infrastructure config
pub use infrastructure::config::{
    ConfigError, ServerSettings, SessionSettings, StoreKind, StoreSettings, UniverseSettings,
    WatchConfig, WatchSettings,
};

// Sessions and transports
pub use infrastructure::session::{
    Session, SessionError, SessionEvent, SessionHandle, SessionId, SessionState,
};
pub use infrastructure::websocket::{WebSocketAcceptor, WsConnector, WsTransport};

// Stores
pub use infrastructure::store::{InMemoryWatchStore, RedisWatchStore, create_store};

// Broadcast hub
pub use infrastructure::broadcast::{BroadcastHub, BroadcastStats, SharedBroadcastHub};

// Health server
pub use infrastructure::health::{HealthServer, HealthServerError, HealthServerState};

// Metrics
pub use infrastructure::metrics::init_metrics;

// Telemetry
pub use infrastructure::telemetry::{TelemetryConfig, TelemetryGuard, init as init_telemetry};
