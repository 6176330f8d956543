//! Watch List Rules
//!
//! The consistency rules every watch store applies, independent of where
//! the list is persisted:
//!
//! - symbols are normalized and must belong to the tradeable universe
//! - the list never holds more than the configured limit
//! - an update may change at most one symbol relative to the current list

use std::collections::HashSet;

use super::symbol::{Symbol, SymbolError, SymbolUniverse};

/// Default maximum number of watched symbols.
pub const DEFAULT_MAX_WATCH_LIMIT: usize = 10;

/// Rule violations raised while admitting symbols or planning an update.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WatchError {
    /// The raw ticker could not be normalized.
    #[error("invalid symbol: {0}")]
    InvalidSymbol(#[from] SymbolError),

    /// The symbol is outside the tradeable universe.
    #[error("{0} is not a tradeable symbol")]
    UnknownSymbol(Symbol),

    /// The requested list is larger than the watch limit.
    #[error("watch list is limited to {limit} symbols ({requested} requested)")]
    LimitExceeded {
        /// Configured limit.
        limit: usize,
        /// Size of the requested list.
        requested: usize,
    },

    /// The requested list differs from the current one by more than one symbol.
    #[error("only a single stock can be added at a time ({changed} changes requested)")]
    TooManyChanges {
        /// Number of symbols that differ.
        changed: usize,
    },
}

/// Limit and universe shared by every store implementation.
#[derive(Debug, Clone)]
pub struct WatchRules {
    universe: SymbolUniverse,
    limit: usize,
}

impl WatchRules {
    /// Create rules over a universe with the given limit.
    #[must_use]
    pub const fn new(universe: SymbolUniverse, limit: usize) -> Self {
        Self { universe, limit }
    }

    /// Maximum number of watched symbols.
    #[must_use]
    pub const fn limit(&self) -> usize {
        self.limit
    }

    /// The tradeable universe.
    #[must_use]
    pub const fn universe(&self) -> &SymbolUniverse {
        &self.universe
    }

    /// Normalize a raw ticker and check it against the universe.
    ///
    /// # Errors
    ///
    /// Returns [`WatchError::InvalidSymbol`] for blank input and
    /// [`WatchError::UnknownSymbol`] for symbols outside the universe.
    pub fn admit(&self, raw: &str) -> Result<Symbol, WatchError> {
        let symbol = Symbol::parse(raw)?;
        if !self.universe.contains(&symbol) {
            return Err(WatchError::UnknownSymbol(symbol));
        }
        Ok(symbol)
    }

    /// Whether a list of `len` symbols can take one more.
    #[must_use]
    pub const fn has_room(&self, len: usize) -> bool {
        len < self.limit
    }

    /// Validate a requested list against the current one.
    ///
    /// Returns the normalized, de-duplicated list in request order. The
    /// whole request is checked before anything is returned, so a caller
    /// that only applies `Ok` plans never leaves a partial update behind.
    ///
    /// # Errors
    ///
    /// Returns the first rule the request violates.
    pub fn plan_update(
        &self,
        current: &[Symbol],
        requested: &[String],
    ) -> Result<Vec<Symbol>, WatchError> {
        let mut seen = HashSet::with_capacity(requested.len());
        let mut planned = Vec::with_capacity(requested.len());
        for raw in requested {
            let symbol = self.admit(raw)?;
            if seen.insert(symbol.clone()) {
                planned.push(symbol);
            }
        }

        if planned.len() > self.limit {
            return Err(WatchError::LimitExceeded {
                limit: self.limit,
                requested: planned.len(),
            });
        }

        let changed = symmetric_difference(current, &planned);
        if changed > 1 {
            return Err(WatchError::TooManyChanges { changed });
        }

        Ok(planned)
    }
}

/// Count the symbols present in exactly one of the two lists.
#[must_use]
pub fn symmetric_difference(current: &[Symbol], requested: &[Symbol]) -> usize {
    let current: HashSet<&Symbol> = current.iter().collect();
    let requested: HashSet<&Symbol> = requested.iter().collect();
    current.symmetric_difference(&requested).count()
}
