//! Prometheus Metrics Module
//!
//! Exposes application metrics via Prometheus format for monitoring.
//!
//! # Metrics Categories
//!
//! - **Sessions**: Accepted and active sessions, decode drops, reconnects
//! - **Updates**: Accepted and rejected watch list updates
//! - **Broadcast**: Fan-out deliveries and failures
//! - **Latency**: Store update round trips
//!
//! # Integration
//!
//! Metrics are exposed at `/metrics` on the health server port.

use std::sync::OnceLock;
use std::time::Duration;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};

use crate::application::ports::StoreError;
use crate::domain::watchlist::WatchError;

// =============================================================================
// Global Metrics Handle
// =============================================================================

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Initialize the Prometheus metrics recorder.
///
/// Repeated calls return the handle installed by the first one.
///
/// # Errors
///
/// Returns an error if another recorder is already installed.
pub fn init_metrics() -> Result<PrometheusHandle, BuildError> {
    if let Some(handle) = PROMETHEUS_HANDLE.get() {
        return Ok(handle.clone());
    }

    let handle = PrometheusBuilder::new().install_recorder()?;
    register_metrics();
    Ok(PROMETHEUS_HANDLE.get_or_init(|| handle).clone())
}

/// Get the Prometheus handle for rendering metrics.
///
/// Returns `None` if metrics have not been initialized.
#[must_use]
pub fn get_metrics_handle() -> Option<PrometheusHandle> {
    PROMETHEUS_HANDLE.get().cloned()
}

// =============================================================================
// Metric Registration
// =============================================================================

fn register_metrics() {
    // Session counters
    describe_counter!(
        "market_watch_sessions_accepted_total",
        "Total sessions accepted"
    );
    describe_gauge!(
        "market_watch_sessions_active",
        "Number of registered sessions"
    );
    describe_counter!(
        "market_watch_frames_dropped_total",
        "Total inbound frames dropped because they could not be decoded"
    );
    describe_counter!(
        "market_watch_reconnects_total",
        "Total client session reconnection attempts"
    );

    // Update counters
    describe_counter!(
        "market_watch_updates_accepted_total",
        "Total watch list updates applied"
    );
    describe_counter!(
        "market_watch_updates_rejected_total",
        "Total watch list updates rejected by reason"
    );
    describe_gauge!(
        "market_watch_watch_list_size",
        "Number of symbols in the watch list"
    );

    // Broadcast counters
    describe_counter!(
        "market_watch_broadcast_delivered_total",
        "Total sync messages queued for sessions"
    );
    describe_counter!(
        "market_watch_broadcast_failed_total",
        "Total sync messages that could not be queued"
    );

    // Latency histograms
    describe_histogram!(
        "market_watch_store_update_seconds",
        "Time to apply an update to the watch store"
    );
}

// =============================================================================
// Metric Recording Functions
// =============================================================================

/// Metric labels for rejected updates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    /// Blank symbol.
    InvalidSymbol,
    /// Symbol outside the universe.
    UnknownSymbol,
    /// Requested list larger than the limit.
    LimitExceeded,
    /// More than one symbol changed.
    TooManyChanges,
    /// Store failed or was stopped.
    Store,
}

impl RejectReason {
    const fn as_str(self) -> &'static str {
        match self {
            Self::InvalidSymbol => "invalid_symbol",
            Self::UnknownSymbol => "unknown_symbol",
            Self::LimitExceeded => "limit_exceeded",
            Self::TooManyChanges => "too_many_changes",
            Self::Store => "store",
        }
    }

    /// Classify a store error.
    #[must_use]
    pub const fn from_store_error(error: &StoreError) -> Self {
        match error {
            StoreError::Rule(WatchError::InvalidSymbol(_)) => Self::InvalidSymbol,
            StoreError::Rule(WatchError::UnknownSymbol(_)) => Self::UnknownSymbol,
            StoreError::Rule(WatchError::LimitExceeded { .. }) => Self::LimitExceeded,
            StoreError::Rule(WatchError::TooManyChanges { .. }) => Self::TooManyChanges,
            StoreError::Backend(_) | StoreError::Fatal(_) | StoreError::Stopped => Self::Store,
        }
    }
}

/// Record an accepted session.
pub fn record_session_accepted() {
    counter!("market_watch_sessions_accepted_total").increment(1);
}

/// Update the registered session count.
#[allow(clippy::cast_precision_loss)]
pub fn set_active_sessions(count: usize) {
    gauge!("market_watch_sessions_active").set(count as f64);
}

/// Record an inbound frame dropped by the codec.
pub fn record_decode_dropped() {
    counter!("market_watch_frames_dropped_total").increment(1);
}

/// Record a client reconnection attempt.
pub fn record_reconnect_attempt() {
    counter!("market_watch_reconnects_total").increment(1);
}

/// Record an applied update and its store round trip.
pub fn record_update_accepted(duration: Duration) {
    counter!("market_watch_updates_accepted_total").increment(1);
    histogram!("market_watch_store_update_seconds").record(duration.as_secs_f64());
}

/// Record a rejected update.
pub fn record_update_rejected(reason: RejectReason) {
    counter!(
        "market_watch_updates_rejected_total",
        "reason" => reason.as_str()
    )
    .increment(1);
}

/// Update the watch list size.
#[allow(clippy::cast_precision_loss)]
pub fn set_watch_list_size(size: usize) {
    gauge!("market_watch_watch_list_size").set(size as f64);
}

/// Record the outcome of one broadcast.
pub fn record_broadcast(delivered: usize, failed: usize) {
    counter!("market_watch_broadcast_delivered_total").increment(delivered as u64);
    counter!("market_watch_broadcast_failed_total").increment(failed as u64);
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::symbol::{Symbol, SymbolError};

    #[test]
    fn reject_reason_as_str() {
        assert_eq!(RejectReason::InvalidSymbol.as_str(), "invalid_symbol");
        assert_eq!(RejectReason::UnknownSymbol.as_str(), "unknown_symbol");
        assert_eq!(RejectReason::LimitExceeded.as_str(), "limit_exceeded");
        assert_eq!(RejectReason::TooManyChanges.as_str(), "too_many_changes");
        assert_eq!(RejectReason::Store.as_str(), "store");
    }

    #[test]
    fn classifies_store_errors() {
        let cases = [
            (
                StoreError::Rule(WatchError::InvalidSymbol(SymbolError::Empty)),
                RejectReason::InvalidSymbol,
            ),
            (
                StoreError::Rule(WatchError::UnknownSymbol(Symbol::parse("XYZ").unwrap())),
                RejectReason::UnknownSymbol,
            ),
            (
                StoreError::Rule(WatchError::LimitExceeded { limit: 1, requested: 2 }),
                RejectReason::LimitExceeded,
            ),
            (
                StoreError::Rule(WatchError::TooManyChanges { changed: 2 }),
                RejectReason::TooManyChanges,
            ),
            (StoreError::Backend("down".to_string()), RejectReason::Store),
            (StoreError::Stopped, RejectReason::Store),
        ];

        for (error, expected) in cases {
            assert_eq!(RejectReason::from_store_error(&error), expected);
        }
    }

    #[test]
    fn recording_without_recorder_is_noop() {
        record_session_accepted();
        set_active_sessions(3);
        record_broadcast(2, 1);
        record_update_rejected(RejectReason::Store);
    }
}
