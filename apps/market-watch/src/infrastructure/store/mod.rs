//! Watch Store Adapters
//!
//! Implementations of the [`WatchStore`] port and the factory that picks one
//! from configuration.

pub mod memory;
pub mod redis;

use std::sync::Arc;

use crate::application::ports::{StoreError, WatchStore};
use crate::domain::watchlist::WatchRules;
use crate::infrastructure::config::{StoreKind, StoreSettings};

pub use memory::InMemoryWatchStore;
pub use self::redis::{RedisSortedSet, RedisWatchStore, SortedSet};

/// Build the configured store.
///
/// The Redis store connects lazily, so an unreachable server surfaces on
/// the first store call rather than here.
///
/// # Errors
///
/// Returns an error if the Redis URL is malformed.
pub fn create_store(
    settings: &StoreSettings,
    rules: WatchRules,
) -> Result<Arc<dyn WatchStore>, StoreError> {
    let store: Arc<dyn WatchStore> = match settings.kind {
        StoreKind::Memory => Arc::new(InMemoryWatchStore::new(rules)),
        StoreKind::Redis => Arc::new(RedisWatchStore::new(
            &settings.redis_url,
            settings.redis_key.clone(),
            rules,
        )?),
    };
    tracing::info!(kind = settings.kind.as_str(), "Watch store created");
    Ok(store)
}
