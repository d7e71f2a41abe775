//! The proxy configuration tree and its `config.ron` persistence.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// File name of the persisted configuration inside the config directory.
const CONFIG_FILE: &str = "config.ron";

/// Top-level proxy configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    /// Addresses, record file and operating mode.
    pub proxy: ProxyConfig,
    /// Relay loop tolerances.
    pub relay: RelayConfig,
    /// Framing and socket settings.
    pub network: NetworkConfig,
    /// Debug/development settings.
    pub debug: DebugConfig,
}

/// Which half of the proxy runs.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub enum Mode {
    /// Relay client sessions to the backend and capture them.
    #[default]
    Record,
    /// Drive the backend from a previously captured record.
    Replay,
}

/// Proxy endpoints and record location.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ProxyConfig {
    /// Address to listen on for client connections.
    pub listen_address: String,
    /// Address of the backend server being proxied.
    pub backend_address: String,
    /// Record file used for saving (record mode) or loading (replay mode).
    pub record_file: PathBuf,
    /// Operating mode.
    pub mode: Mode,
}

/// Relay loop tolerances.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RelayConfig {
    /// Consecutive non-terminal I/O failures a pump tolerates before it gives
    /// up on its direction.
    pub max_consecutive_errors: u32,
    /// How long shutdown waits for a session's workers before moving on.
    pub shutdown_grace_ms: u64,
}

/// Framing and socket configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct NetworkConfig {
    /// Maximum accepted frame length in bytes.
    pub max_packet_size: u32,
    /// Disable Nagle's algorithm on proxied sockets.
    pub tcp_nodelay: bool,
    /// Enable TCP keepalive on proxied sockets.
    pub keepalive_enabled: bool,
    /// Idle time before the first keepalive, in seconds.
    pub keepalive_idle_secs: u64,
}

/// Debug/development configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DebugConfig {
    /// Log level override (e.g., "debug", "info", "warn").
    pub log_level: String,
    /// Directory for JSON log files. No file logging when unset.
    pub log_dir: Option<PathBuf>,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            listen_address: "0.0.0.0:25565".to_string(),
            backend_address: "127.0.0.1:25566".to_string(),
            record_file: PathBuf::from("packets.json"),
            mode: Mode::Record,
        }
    }
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            max_consecutive_errors: 64,
            shutdown_grace_ms: 2000,
        }
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            max_packet_size: 2_097_151,
            tcp_nodelay: true,
            keepalive_enabled: true,
            keepalive_idle_secs: 60,
        }
    }
}

impl Default for DebugConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_dir: None,
        }
    }
}

impl Config {
    /// Platform default config directory (`<config dir>/mcreplay`).
    pub fn default_dir() -> Result<PathBuf, ConfigError> {
        dirs::config_dir()
            .map(|dir| dir.join("mcreplay"))
            .ok_or(ConfigError::NoConfigDir)
    }

    /// Read `config.ron` from `config_dir`. A missing file is replaced by the
    /// defaults, which are written back so the user has a file to edit.
    pub fn load_or_create(config_dir: &Path) -> Result<Self, ConfigError> {
        let path = config_dir.join(CONFIG_FILE);
        if !path.exists() {
            let config = Config::default();
            config.save(config_dir)?;
            log::info!("Wrote default config to {}", path.display());
            return Ok(config);
        }

        let config = Self::read(&path)?;
        log::info!("Using config from {}", path.display());
        Ok(config)
    }

    /// Write the config as `config.ron`, creating `config_dir` if needed.
    pub fn save(&self, config_dir: &Path) -> Result<(), ConfigError> {
        std::fs::create_dir_all(config_dir).map_err(|source| ConfigError::Write {
            path: config_dir.to_path_buf(),
            source,
        })?;

        let pretty = ron::ser::PrettyConfig::new()
            .depth_limit(2)
            .struct_names(false)
            .enumerate_arrays(false);
        let text = ron::ser::to_string_pretty(self, pretty).map_err(ConfigError::Serialize)?;

        let path = config_dir.join(CONFIG_FILE);
        std::fs::write(&path, text).map_err(|source| ConfigError::Write { path, source })
    }

    fn read(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        ron::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }
}
