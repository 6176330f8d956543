//! In-Memory Watch Store
//!
//! Process-local ordered set. Every operation runs under one lock, so
//! `update` is atomic within the process.

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::application::ports::{StoreError, WatchStore};
use crate::domain::symbol::Symbol;
use crate::domain::watchlist::WatchRules;

#[derive(Debug, Default)]
struct MemoryState {
    symbols: Vec<Symbol>,
    stopped: bool,
}

impl MemoryState {
    fn ensure_running(&self) -> Result<(), StoreError> {
        if self.stopped {
            return Err(StoreError::Stopped);
        }
        Ok(())
    }
}

/// Watch store backed by a process-local ordered set.
#[derive(Debug)]
pub struct InMemoryWatchStore {
    rules: WatchRules,
    state: Mutex<MemoryState>,
}

impl InMemoryWatchStore {
    /// Create an empty store.
    #[must_use]
    pub fn new(rules: WatchRules) -> Self {
        Self {
            rules,
            state: Mutex::new(MemoryState::default()),
        }
    }

    /// Number of symbols currently held.
    #[must_use]
    pub fn len(&self) -> usize {
        self.state.lock().symbols.len()
    }

    /// Check if the list is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.state.lock().symbols.is_empty()
    }

    fn subscribe_locked(&self, state: &mut MemoryState, raw: &str) -> Result<bool, StoreError> {
        let symbol = self.rules.admit(raw)?;
        if state.symbols.contains(&symbol) || !self.rules.has_room(state.symbols.len()) {
            return Ok(false);
        }
        state.symbols.push(symbol);
        Ok(true)
    }

    fn setup_locked<S: AsRef<str>>(
        &self,
        state: &mut MemoryState,
        symbols: &[S],
    ) -> Result<(), StoreError> {
        state.symbols.clear();
        for raw in symbols {
            self.subscribe_locked(state, raw.as_ref())?;
        }
        Ok(())
    }
}

#[async_trait]
impl WatchStore for InMemoryWatchStore {
    async fn setup(&self, symbols: &[String]) -> Result<(), StoreError> {
        let mut state = self.state.lock();
        state.ensure_running()?;
        self.setup_locked(&mut state, symbols)?;
        tracing::debug!(count = state.symbols.len(), "Watch list set up");
        Ok(())
    }

    async fn subscribe(&self, symbol: &str) -> Result<bool, StoreError> {
        let mut state = self.state.lock();
        state.ensure_running()?;
        self.subscribe_locked(&mut state, symbol)
    }

    async fn update(&self, symbols: &[String]) -> Result<(), StoreError> {
        let mut state = self.state.lock();
        state.ensure_running()?;
        let planned = self.rules.plan_update(&state.symbols, symbols)?;
        self.setup_locked(&mut state, &planned)
    }

    async fn sync(&self) -> Result<Vec<Symbol>, StoreError> {
        let state = self.state.lock();
        state.ensure_running()?;
        Ok(state
            .symbols
            .iter()
            .take(self.rules.limit())
            .cloned()
            .collect())
    }

    async fn stop(&self, force: bool) -> Result<(), StoreError> {
        let mut state = self.state.lock();
        state.stopped = true;
        if force {
            state.symbols = Vec::new();
        }
        tracing::debug!(force, "In-memory watch store stopped");
        Ok(())
    }
}
