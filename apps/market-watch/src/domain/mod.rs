//! Domain Layer - Core watch list types and rules.
//!
//! This layer contains the symbol, message and watch list types with no
//! I/O. Everything here is synchronous and directly unit-testable.

/// Ticker symbols and the tradeable universe.
pub mod symbol;

/// Protocol message set.
pub mod message;

/// Watch list consistency rules.
pub mod watchlist;
