//! Configuration Module
//!
//! Configuration loading for the watch service.

mod settings;

pub use settings::{
    ConfigError, DEFAULT_REDIS_KEY, DEFAULT_REDIS_URL, DEFAULT_SYMBOLS, ServerSettings,
    SessionSettings, StoreKind, StoreSettings, UniverseSettings, WatchConfig, WatchSettings,
};
