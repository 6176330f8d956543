//! Infrastructure Layer - Adapters and external integrations.
//!
//! This layer contains the concrete implementations of the port interfaces
//! defined in the application layer.

/// Framed message sessions over an abstract transport.
pub mod session;

/// WebSocket transport, connector and acceptor.
pub mod websocket;

/// Watch store implementations (in-memory, Redis sorted set).
pub mod store;

/// Session registry and sync fan-out.
pub mod broadcast;

/// Configuration and dependency injection.
pub mod config;

/// Tradeable universe loading and refresh.
pub mod universe;

/// Health check HTTP endpoint.
pub mod health;

/// Prometheus metrics instrumentation.
pub mod metrics;

/// OpenTelemetry tracing integration.
pub mod telemetry;
