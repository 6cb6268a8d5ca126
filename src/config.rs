use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::shutdown::{DrainConfig, DEFAULT_DRAIN_TIMEOUT, DEFAULT_POLL_INTERVAL};

/// Default HTTP/WebSocket bind address.
pub const DEFAULT_BIND: &str = "0.0.0.0:8000";

/// Default interval between broadcast notifications.
pub const DEFAULT_BROADCAST_INTERVAL: Duration = Duration::from_secs(10);

/// Top-level server config, loaded from TOML. Every field is optional; the
/// command line overrides the file and built-in defaults fill the rest.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub shutdown: ShutdownSection,
    #[serde(default)]
    pub broadcast: BroadcastSection,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServerSection {
    /// Address to bind the HTTP/WebSocket listener.
    pub bind: Option<SocketAddr>,
    /// Instance name reported in notifications. Defaults to the hostname.
    pub instance: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ShutdownSection {
    /// Seconds clients get to disconnect after a termination signal.
    pub drain_timeout_secs: Option<u64>,
    /// Milliseconds between drain-loop registry checks.
    pub poll_interval_ms: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BroadcastSection {
    /// Seconds between periodic notifications.
    pub interval_secs: Option<u64>,
}

impl FileConfig {
    /// Load config from a TOML file path. Returns None if file doesn't exist.
    pub fn load(path: &Path) -> Result<Option<Self>, ConfigError> {
        if !path.exists() {
            return Ok(None);
        }
        let contents = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadFailed(path.to_path_buf(), e))?;
        let config: Self =
            toml::from_str(&contents).map_err(|e| ConfigError::ParseFailed(path.to_path_buf(), e))?;
        Ok(Some(config))
    }
}

/// Default config file location: `$XDG_CONFIG_HOME/notifyd/config.toml`
/// (or the platform equivalent).
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("notifyd").join("config.toml"))
}

/// Values supplied on the command line. `None` means "not given".
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub bind: Option<SocketAddr>,
    pub instance: Option<String>,
    pub drain_timeout_secs: Option<u64>,
    pub poll_interval_ms: Option<u64>,
    pub broadcast_interval_secs: Option<u64>,
}

/// Fully resolved runtime configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub bind: SocketAddr,
    pub instance: String,
    pub drain: DrainConfig,
    pub broadcast_interval: Duration,
}

impl Settings {
    /// Merge command-line overrides over the file config over defaults.
    ///
    /// Zero durations are rejected: a zero drain timeout would force-close
    /// every client on the first signal, and a zero interval would spin.
    pub fn resolve(file: FileConfig, overrides: Overrides) -> Result<Self, ConfigError> {
        let bind = match overrides.bind.or(file.server.bind) {
            Some(addr) => addr,
            None => DEFAULT_BIND
                .parse()
                .map_err(|_| ConfigError::Invalid("bind", DEFAULT_BIND.to_string()))?,
        };

        let instance = overrides
            .instance
            .or(file.server.instance)
            .unwrap_or_else(resolve_hostname);

        let drain_timeout = overrides
            .drain_timeout_secs
            .or(file.shutdown.drain_timeout_secs)
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_DRAIN_TIMEOUT);
        let poll_interval = overrides
            .poll_interval_ms
            .or(file.shutdown.poll_interval_ms)
            .map(Duration::from_millis)
            .unwrap_or(DEFAULT_POLL_INTERVAL);
        let broadcast_interval = overrides
            .broadcast_interval_secs
            .or(file.broadcast.interval_secs)
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_BROADCAST_INTERVAL);

        for (name, value) in [
            ("drain_timeout_secs", drain_timeout),
            ("poll_interval_ms", poll_interval),
            ("broadcast.interval_secs", broadcast_interval),
        ] {
            if value.is_zero() {
                return Err(ConfigError::Invalid(name, "must be greater than zero".into()));
            }
        }

        Ok(Self {
            bind,
            instance,
            drain: DrainConfig {
                drain_timeout,
                poll_interval,
            },
            broadcast_interval,
        })
    }
}

/// Errors that can occur when loading or resolving config.
#[derive(Debug)]
pub enum ConfigError {
    ReadFailed(PathBuf, std::io::Error),
    ParseFailed(PathBuf, toml::de::Error),
    Invalid(&'static str, String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ReadFailed(path, e) => {
                write!(f, "Failed to read config {}: {}", path.display(), e)
            }
            Self::ParseFailed(path, e) => {
                write!(f, "Failed to parse config {}: {}", path.display(), e)
            }
            Self::Invalid(field, detail) => write!(f, "Invalid config value for {}: {}", field, detail),
        }
    }
}

impl std::error::Error for ConfigError {}

/// The system hostname, or "unknown" if it cannot be read.
pub fn resolve_hostname() -> String {
    hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "unknown".to_string())
}
