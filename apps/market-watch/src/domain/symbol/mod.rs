//! Symbol Types
//!
//! Normalized ticker symbols and the externally supplied universe of
//! tradeable symbols.
//!
//! # Normalization
//!
//! A raw ticker is trimmed of surrounding whitespace and upper-cased.
//! The empty string is never a valid symbol. Two symbols are equal when
//! their normalized forms are equal, so `" aapl"` and `"AAPL"` name the
//! same security.

use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

// =============================================================================
// Symbol
// =============================================================================

/// Errors produced when parsing a raw ticker.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SymbolError {
    /// The ticker was empty after trimming.
    #[error("symbol must not be empty")]
    Empty,
}

/// A normalized ticker symbol: trimmed, upper-cased and non-empty.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Symbol(String);

impl Symbol {
    /// Parse and normalize a raw ticker.
    ///
    /// # Errors
    ///
    /// Returns [`SymbolError::Empty`] if nothing remains after trimming.
    pub fn parse(raw: &str) -> Result<Self, SymbolError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(SymbolError::Empty);
        }
        Ok(Self(trimmed.to_uppercase()))
    }

    /// Borrow the normalized ticker.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Consume the symbol, returning the normalized ticker.
    #[must_use]
    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Symbol {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl FromStr for Symbol {
    type Err = SymbolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for Symbol {
    type Error = SymbolError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Symbol> for String {
    fn from(symbol: Symbol) -> Self {
        symbol.0
    }
}

// =============================================================================
// Symbol Universe
// =============================================================================

/// The set of symbols clients are allowed to watch.
///
/// The universe is owned by whoever refreshes it; the watch stores only
/// read it. Cloning shares the underlying set, so a refresh through any
/// clone is visible to every holder.
#[derive(Debug, Clone, Default)]
pub struct SymbolUniverse {
    symbols: Arc<RwLock<HashSet<Symbol>>>,
}

impl SymbolUniverse {
    /// Build a universe from raw tickers. Entries that fail to parse are skipped.
    pub fn new<I, S>(raw: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            symbols: Arc::new(RwLock::new(collect_symbols(raw))),
        }
    }

    /// Check whether a symbol is tradeable.
    #[must_use]
    pub fn contains(&self, symbol: &Symbol) -> bool {
        self.symbols.read().contains(symbol)
    }

    /// Atomically replace the universe contents, returning the new size.
    pub fn replace<I, S>(&self, raw: I) -> usize
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let next = collect_symbols(raw);
        let len = next.len();
        *self.symbols.write() = next;
        len
    }

    /// Number of tradeable symbols.
    #[must_use]
    pub fn len(&self) -> usize {
        self.symbols.read().len()
    }

    /// Check if the universe is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.symbols.read().is_empty()
    }
}

/// Split a comma or newline separated list of tickers, dropping blanks.
#[must_use]
pub fn split_symbol_list(text: &str) -> Vec<String> {
    text.split([',', '\n', '\r'])
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(ToString::to_string)
        .collect()
}

fn collect_symbols<I, S>(raw: I) -> HashSet<Symbol>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    raw.into_iter()
        .filter_map(|s| Symbol::parse(s.as_ref()).ok())
        .collect()
}

// =============================================================================
// Tests
// =============================================================================
