//! Tradeable Universe Loading
//!
//! Resolves the initial [`SymbolUniverse`] from configuration and keeps it
//! fresh by re-reading the universe file on an interval.

use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::domain::symbol::{SymbolUniverse, split_symbol_list};
use crate::infrastructure::config::{ConfigError, UniverseSettings};

/// Read a comma or newline separated symbol file.
///
/// # Errors
///
/// Returns [`ConfigError::UniverseFile`] if the file cannot be read.
pub async fn read_universe_file(path: &Path) -> Result<Vec<String>, ConfigError> {
    let text = tokio::fs::read_to_string(path)
        .await
        .map_err(|source| ConfigError::UniverseFile {
            path: path.to_path_buf(),
            source,
        })?;
    Ok(split_symbol_list(&text))
}

/// Build the initial universe from inline symbols and the universe file.
///
/// When neither is configured, `fallback` is used.
///
/// # Errors
///
/// Returns an error if the file cannot be read or nothing resolves.
pub async fn resolve_universe(
    settings: &UniverseSettings,
    fallback: &[String],
) -> Result<SymbolUniverse, ConfigError> {
    let mut symbols = settings.symbols.clone();
    if let Some(path) = &settings.file {
        symbols.extend(read_universe_file(path).await?);
    }
    if settings.is_unconfigured() {
        tracing::warn!("No tradeable universe configured, using the default symbols");
        symbols.extend(fallback.iter().cloned());
    }

    let universe = SymbolUniverse::new(&symbols);
    if universe.is_empty() {
        return Err(ConfigError::EmptyUniverse);
    }
    tracing::info!(symbols = universe.len(), "Tradeable universe loaded");
    Ok(universe)
}

/// Periodically re-reads the universe file.
#[derive(Debug)]
pub struct UniverseRefresher {
    universe: SymbolUniverse,
    inline: Vec<String>,
    path: PathBuf,
    interval: Duration,
}

impl UniverseRefresher {
    /// Create a refresher. Returns `None` when no universe file is configured.
    #[must_use]
    pub fn new(universe: SymbolUniverse, settings: &UniverseSettings) -> Option<Self> {
        let path = settings.file.clone()?;
        Some(Self {
            universe,
            inline: settings.symbols.clone(),
            path,
            interval: settings.refresh_interval,
        })
    }

    /// Re-read the file once. A failed or empty read keeps the current universe.
    ///
    /// Returns the new universe size if it was replaced.
    pub async fn refresh(&self) -> Option<usize> {
        match read_universe_file(&self.path).await {
            Ok(mut symbols) => {
                symbols.extend(self.inline.iter().cloned());
                if SymbolUniverse::new(&symbols).is_empty() {
                    tracing::warn!(path = %self.path.display(), "Universe file is empty, keeping previous universe");
                    return None;
                }
                let len = self.universe.replace(&symbols);
                tracing::debug!(symbols = len, "Tradeable universe refreshed");
                Some(len)
            }
            Err(e) => {
                tracing::warn!(error = %e, "Universe refresh failed, keeping previous universe");
                None
            }
        }
    }

    /// Spawn the refresh loop. It stops when `cancel` fires.
    #[must_use]
    pub fn spawn(self, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            // The first tick completes immediately and the universe was just loaded
            ticker.tick().await;

            loop {
                tokio::select! {
                    () = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        let _ = self.refresh().await;
                    }
                }
            }
            tracing::debug!("Universe refresher stopped");
        })
    }
}
