//! Market Watch Configuration Settings
//!
//! Configuration types for the watch service, loaded from environment variables.

use std::path::PathBuf;
use std::time::Duration;

use crate::domain::symbol::split_symbol_list;
use crate::domain::watchlist::DEFAULT_MAX_WATCH_LIMIT;

/// Symbols the watch list is seeded with at startup.
pub const DEFAULT_SYMBOLS: [&str; 4] = ["AAPL", "MSFT", "AMZN", "GOOG"];

/// Default Redis connection target.
pub const DEFAULT_REDIS_URL: &str = "redis://127.0.0.1:6379";

/// Default sorted-set key holding the watch list.
pub const DEFAULT_REDIS_KEY: &str = "market-watch:symbols";

/// Backing store for the watch list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StoreKind {
    /// Process-local ordered set.
    #[default]
    Memory,
    /// Redis sorted set.
    Redis,
}

impl StoreKind {
    /// Parse a store kind.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidValue`] for anything but `memory` or `redis`.
    pub fn parse(s: &str) -> Result<Self, ConfigError> {
        match s.trim().to_lowercase().as_str() {
            "memory" => Ok(Self::Memory),
            "redis" => Ok(Self::Redis),
            _ => Err(ConfigError::InvalidValue {
                key: "MARKET_WATCH_STORE".to_string(),
                value: s.to_string(),
            }),
        }
    }

    /// Store kind name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Memory => "memory",
            Self::Redis => "redis",
        }
    }
}

/// Server port settings.
#[derive(Debug, Clone)]
pub struct ServerSettings {
    /// WebSocket accept port.
    pub ws_port: u16,
    /// Health check and metrics HTTP port.
    pub health_port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            ws_port: 8090,
            health_port: 8091,
        }
    }
}

/// Watch list settings.
#[derive(Debug, Clone)]
pub struct WatchSettings {
    /// Maximum number of watched symbols.
    pub max_watch_limit: usize,
    /// Symbols the list is seeded with at startup.
    pub default_symbols: Vec<String>,
}

impl Default for WatchSettings {
    fn default() -> Self {
        Self {
            max_watch_limit: DEFAULT_MAX_WATCH_LIMIT,
            default_symbols: DEFAULT_SYMBOLS.iter().map(ToString::to_string).collect(),
        }
    }
}

/// Session settings.
#[derive(Debug, Clone)]
pub struct SessionSettings {
    /// Capacity of each session's outbound queue and event channel.
    pub buffer: usize,
    /// Delay before each client reconnect attempt.
    pub disconnect_retry: Duration,
    /// Client reconnect attempts before giving up (0 = unlimited).
    pub max_reconnect_attempts: u32,
    /// Bound on a single connect or handshake.
    pub connect_timeout: Duration,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            buffer: 256,
            disconnect_retry: Duration::from_secs(60),
            max_reconnect_attempts: 5,
            connect_timeout: Duration::from_secs(30),
        }
    }
}

/// Watch store settings.
#[derive(Debug, Clone)]
pub struct StoreSettings {
    /// Backing store.
    pub kind: StoreKind,
    /// Redis connection URL.
    pub redis_url: String,
    /// Redis sorted-set key.
    pub redis_key: String,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            kind: StoreKind::Memory,
            redis_url: DEFAULT_REDIS_URL.to_string(),
            redis_key: DEFAULT_REDIS_KEY.to_string(),
        }
    }
}

/// Tradeable universe settings.
#[derive(Debug, Clone)]
pub struct UniverseSettings {
    /// Symbols listed inline.
    pub symbols: Vec<String>,
    /// File of symbols, re-read on `refresh_interval`.
    pub file: Option<PathBuf>,
    /// Interval between universe file reads.
    pub refresh_interval: Duration,
}

impl Default for UniverseSettings {
    fn default() -> Self {
        Self {
            symbols: Vec::new(),
            file: None,
            refresh_interval: Duration::from_secs(3600),
        }
    }
}

impl UniverseSettings {
    /// Whether neither inline symbols nor a file were configured.
    #[must_use]
    pub fn is_unconfigured(&self) -> bool {
        self.symbols.is_empty() && self.file.is_none()
    }
}

/// Complete service configuration.
#[derive(Debug, Clone, Default)]
pub struct WatchConfig {
    /// Server port settings.
    pub server: ServerSettings,
    /// Watch list settings.
    pub watch: WatchSettings,
    /// Session settings.
    pub session: SessionSettings,
    /// Store settings.
    pub store: StoreSettings,
    /// Tradeable universe settings.
    pub universe: UniverseSettings,
}

impl WatchConfig {
    /// Create configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error for an unknown store kind or a zero watch limit.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create configuration from an arbitrary variable lookup.
    ///
    /// # Errors
    ///
    /// See [`Self::from_env`].
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = EnvLookup(lookup);

        let server = ServerSettings {
            ws_port: env.parse_or("MARKET_WATCH_WS_PORT", ServerSettings::default().ws_port),
            health_port: env.parse_or(
                "MARKET_WATCH_HEALTH_PORT",
                ServerSettings::default().health_port,
            ),
        };

        let max_watch_limit =
            env.parse_or("MARKET_WATCH_MAX_WATCH_LIMIT", DEFAULT_MAX_WATCH_LIMIT);
        if max_watch_limit == 0 {
            return Err(ConfigError::InvalidValue {
                key: "MARKET_WATCH_MAX_WATCH_LIMIT".to_string(),
                value: "0".to_string(),
            });
        }
        let watch = WatchSettings {
            max_watch_limit,
            default_symbols: env
                .get("MARKET_WATCH_DEFAULT_SYMBOLS")
                .map_or_else(|| WatchSettings::default().default_symbols, |v| split_symbol_list(&v)),
        };

        let session = SessionSettings {
            buffer: env.parse_or("MARKET_WATCH_SESSION_BUFFER", SessionSettings::default().buffer),
            disconnect_retry: env.millis_or(
                "MARKET_WATCH_DISCONNECT_RETRY_MS",
                SessionSettings::default().disconnect_retry,
            ),
            max_reconnect_attempts: env.parse_or(
                "MARKET_WATCH_MAX_RECONNECT_ATTEMPTS",
                SessionSettings::default().max_reconnect_attempts,
            ),
            connect_timeout: env.millis_or(
                "MARKET_WATCH_CONNECT_TIMEOUT_MS",
                SessionSettings::default().connect_timeout,
            ),
        };

        let store = StoreSettings {
            kind: env
                .get("MARKET_WATCH_STORE")
                .map_or(Ok(StoreKind::default()), |v| StoreKind::parse(&v))?,
            redis_url: env
                .get("REDIS_URL")
                .unwrap_or_else(|| DEFAULT_REDIS_URL.to_string()),
            redis_key: env
                .get("MARKET_WATCH_REDIS_KEY")
                .unwrap_or_else(|| DEFAULT_REDIS_KEY.to_string()),
        };

        let universe = UniverseSettings {
            symbols: env
                .get("MARKET_WATCH_UNIVERSE")
                .map(|v| split_symbol_list(&v))
                .unwrap_or_default(),
            file: env.get("MARKET_WATCH_UNIVERSE_FILE").map(PathBuf::from),
            refresh_interval: env
                .get("MARKET_WATCH_UNIVERSE_REFRESH_SECS")
                .and_then(|v| v.parse::<u64>().ok())
                .map_or(UniverseSettings::default().refresh_interval, Duration::from_secs),
        };

        Ok(Self {
            server,
            watch,
            session,
            store,
            universe,
        })
    }
}

/// Configuration error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Environment variable has a value that cannot be used.
    #[error("invalid value for {key}: {value:?}")]
    InvalidValue {
        /// Variable name.
        key: String,
        /// Rejected value.
        value: String,
    },
    /// The tradeable universe resolved to no symbols.
    #[error("tradeable symbol universe is empty")]
    EmptyUniverse,
    /// The universe file could not be read.
    #[error("failed to read universe file {path}: {source}")]
    UniverseFile {
        /// File path.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },
}

/// Non-empty variable lookup with default fallbacks.
struct EnvLookup<F>(F);

impl<F> EnvLookup<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn get(&self, key: &str) -> Option<String> {
        (self.0)(key).filter(|v| !v.trim().is_empty())
    }

    fn parse_or<T: std::str::FromStr>(&self, key: &str, default: T) -> T {
        self.get(key)
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(default)
    }

    fn millis_or(&self, key: &str, default: Duration) -> Duration {
        self.get(key)
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map_or(default, Duration::from_millis)
    }
}
