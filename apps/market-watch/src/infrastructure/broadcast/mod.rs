//! Broadcast Hub
//!
//! Registry of connected sessions and fan-out of encoded messages.
//!
//! # Architecture
//!
//! A message is encoded once, then written to every registered session's
//! outbound queue. Writes never wait: a session whose queue is full or
//! whose transport is gone counts as a failed delivery and does not hold
//! up the others.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::domain::message::Message;
use crate::infrastructure::metrics;
use crate::infrastructure::session::codec::CodecError;
use crate::infrastructure::session::{SessionHandle, SessionId};

// =============================================================================
// Broadcast Hub
// =============================================================================

/// Outcome of one broadcast.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    /// Sessions the message was queued for.
    pub delivered: usize,
    /// Sessions the write failed for.
    pub failed: usize,
}

/// Registry of live sessions.
///
/// # Example
///
/// ```rust
/// use market_watch::infrastructure::broadcast::BroadcastHub;
///
/// let hub = BroadcastHub::new();
/// assert_eq!(hub.session_count(), 0);
/// ```
#[derive(Debug, Default)]
pub struct BroadcastHub {
    sessions: RwLock<HashMap<SessionId, SessionHandle>>,
}

impl BroadcastHub {
    /// Create an empty hub.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a session. Returns `false` if it was already registered.
    pub fn register(&self, handle: SessionHandle) -> bool {
        let inserted = self.sessions.write().insert(handle.id(), handle).is_none();
        metrics::set_active_sessions(self.session_count());
        inserted
    }

    /// Remove a session. Returns `false` if it was not registered.
    pub fn unregister(&self, id: SessionId) -> bool {
        let removed = self.sessions.write().remove(&id).is_some();
        metrics::set_active_sessions(self.session_count());
        removed
    }

    /// Number of registered sessions.
    #[must_use]
    pub fn session_count(&self) -> usize {
        self.sessions.read().len()
    }

    /// Whether a session is registered.
    #[must_use]
    pub fn contains(&self, id: SessionId) -> bool {
        self.sessions.read().contains_key(&id)
    }

    /// Write `message` to every registered session.
    ///
    /// # Errors
    ///
    /// Returns an error only if the message cannot be encoded.
    pub fn broadcast(&self, message: &Message) -> Result<BroadcastReport, CodecError> {
        let frame = message.pack()?;
        let targets: Vec<SessionHandle> = self.sessions.read().values().cloned().collect();

        let mut report = BroadcastReport::default();
        for handle in targets {
            match handle.write(frame.clone()) {
                Ok(()) => report.delivered += 1,
                Err(e) => {
                    report.failed += 1;
                    tracing::debug!(session = %handle.id(), error = %e, "Broadcast write failed");
                }
            }
        }

        metrics::record_broadcast(report.delivered, report.failed);
        Ok(report)
    }

    /// Destroy and remove every session. Returns how many were removed.
    pub fn destroy_all(&self) -> usize {
        let drained: Vec<SessionHandle> = self.sessions.write().drain().map(|(_, h)| h).collect();
        for handle in &drained {
            // Sessions that already finished report AlreadyDestroyed
            let _ = handle.destroy();
        }
        metrics::set_active_sessions(0);
        drained.len()
    }

    /// Snapshot of the registry.
    #[must_use]
    pub fn stats(&self) -> BroadcastStats {
        let sessions = self.sessions.read();
        BroadcastStats {
            sessions: sessions.len(),
            open_sessions: sessions.values().filter(|h| h.is_open()).count(),
        }
    }
}

/// Shared broadcast hub reference.
pub type SharedBroadcastHub = Arc<BroadcastHub>;

/// Statistics about registered sessions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastStats {
    /// Registered sessions.
    pub sessions: usize,
    /// Registered sessions that still own a transport.
    pub open_sessions: usize,
}

// =============================================================================
// Tests
// =============================================================================
