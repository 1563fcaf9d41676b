//! Configuration management for Dropcode.
//!
//! This module handles loading, saving, and managing Dropcode configuration.
//!
//! ## Configuration File Locations
//!
//! | Platform | Path |
//! |----------|------|
//! | Linux | `~/.config/dropcode/config.toml` |
//! | macOS | `~/Library/Application Support/dev.dropcode.Dropcode/config.toml` |
//! | Windows | `%APPDATA%\dropcode\Dropcode\config\config.toml` |
//!
//! ## Example
//!
//! ```rust,ignore
//! use dropcode_core::config::Config;
//!
//! let config = Config::load()?;
//! println!("Chunk size: {}", config.transfer.chunk_size);
//! ```

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::protocol::MAX_CHUNK_SIZE;
use crate::rendezvous::DEFAULT_DISCOVERY_PORT;
use crate::session::SessionConfig;
use crate::transfer::{TransferOptions, DEFAULT_CHUNK_SIZE, DEFAULT_SETTLE_DELAY};
use crate::transport::TcpTransportConfig;

/// Main configuration struct for Dropcode.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// General settings
    pub general: GeneralConfig,
    /// Network settings
    pub network: NetworkConfig,
    /// Transfer settings
    pub transfer: TransferConfig,
    /// Peer registry settings
    pub peers: PeersConfig,
}

/// General configuration options.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Directory received files are saved into (current directory if unset)
    pub output_dir: Option<PathBuf>,
}

/// Network configuration options.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// UDP port for peer ID lookups
    pub discovery_port: u16,
    /// TCP port for transfers (0 picks a free port)
    pub listen_port: u16,
    /// How long to wait for a peer to answer
    #[serde(with = "humantime_serde")]
    pub connect_timeout: Duration,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            discovery_port: DEFAULT_DISCOVERY_PORT,
            listen_port: 0,
            connect_timeout: Duration::from_secs(5),
        }
    }
}

/// Transfer configuration options.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransferConfig {
    /// Chunk size in bytes
    pub chunk_size: usize,
    /// How long finished progress stays visible
    #[serde(with = "humantime_serde")]
    pub settle_delay: Duration,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            settle_delay: DEFAULT_SETTLE_DELAY,
        }
    }
}

/// Peer registry configuration options.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PeersConfig {
    /// Closed links idle for longer than this are dropped
    #[serde(with = "humantime_serde")]
    pub stale_after: Duration,
    /// How often stale peers are pruned
    #[serde(with = "humantime_serde")]
    pub prune_interval: Duration,
}

impl Default for PeersConfig {
    fn default() -> Self {
        Self {
            stale_after: Duration::from_secs(300),
            prune_interval: Duration::from_secs(30),
        }
    }
}

impl Config {
    /// Load configuration from the default location.
    ///
    /// If the configuration file doesn't exist, returns the default configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration file exists but cannot be read or parsed.
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path())
    }

    /// Load configuration from a specific file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read, parsed, or
    /// holds invalid values.
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::ConfigError(format!("Failed to read config: {e}")))?;

        let config: Self = toml::from_str(&content)
            .map_err(|e| Error::ConfigError(format!("Failed to parse config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to the default location.
    ///
    /// Creates the configuration directory if it doesn't exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration cannot be written.
    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path())
    }

    /// Save configuration to a specific file.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration cannot be written.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                Error::ConfigError(format!("Failed to create config directory: {e}"))
            })?;
        }

        std::fs::write(path, self.to_toml()?)
            .map_err(|e| Error::ConfigError(format!("Failed to write config: {e}")))
    }

    /// Render as TOML.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self)
            .map_err(|e| Error::ConfigError(format!("Failed to serialize config: {e}")))
    }

    /// Check values that would break a transfer.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConfigError`] describing the first invalid value.
    pub fn validate(&self) -> Result<()> {
        if self.transfer.chunk_size == 0 || self.transfer.chunk_size > MAX_CHUNK_SIZE {
            return Err(Error::ConfigError(format!(
                "transfer.chunk_size must be between 1 and {MAX_CHUNK_SIZE}, got {}",
                self.transfer.chunk_size
            )));
        }

        if self.network.connect_timeout.is_zero() {
            return Err(Error::ConfigError(
                "network.connect_timeout must be greater than zero".to_string(),
            ));
        }

        if self.peers.prune_interval.is_zero() {
            return Err(Error::ConfigError(
                "peers.prune_interval must be greater than zero".to_string(),
            ));
        }

        Ok(())
    }

    /// Directory received files go to.
    #[must_use]
    pub fn output_dir(&self) -> PathBuf {
        self.general
            .output_dir
            .clone()
            .unwrap_or_else(|| PathBuf::from("."))
    }

    /// Transfer tuning derived from this configuration.
    #[must_use]
    pub fn transfer_options(&self) -> TransferOptions {
        TransferOptions {
            chunk_size: self.transfer.chunk_size,
            settle_delay: self.transfer.settle_delay,
        }
    }

    /// Session settings derived from this configuration.
    #[must_use]
    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            transfer: self.transfer_options(),
            stale_after: self.peers.stale_after,
            prune_interval: self.peers.prune_interval,
        }
    }

    /// TCP transport settings derived from this configuration.
    #[must_use]
    pub fn tcp_transport_config(&self) -> TcpTransportConfig {
        TcpTransportConfig {
            listen_addr: SocketAddr::from(([0, 0, 0, 0], self.network.listen_port)),
            discovery_port: self.network.discovery_port,
            connect_timeout: self.network.connect_timeout,
        }
    }

    /// Get the default configuration directory path.
    #[must_use]
    pub fn config_dir() -> Option<PathBuf> {
        directories::ProjectDirs::from("dev", "dropcode", "Dropcode")
            .map(|dirs| dirs.config_dir().to_path_buf())
    }

    /// Get the full path to the configuration file.
    #[must_use]
    pub fn config_path() -> PathBuf {
        Self::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("config.toml")
    }
}

mod humantime_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        if duration.subsec_millis() == 0 {
            serializer.serialize_str(&format!("{}s", duration.as_secs()))
        } else {
            serializer.serialize_str(&format!("{}ms", duration.as_millis()))
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        let s = s.trim();

        let (number, unit_ms) = if let Some(ms) = s.strip_suffix("ms") {
            (ms, 1)
        } else if let Some(secs) = s.strip_suffix('s') {
            (secs, 1_000)
        } else if let Some(mins) = s.strip_suffix('m') {
            (mins, 60_000)
        } else {
            return Err(serde::de::Error::custom(format!(
                "invalid duration '{s}', expected e.g. \"500ms\", \"5s\" or \"2m\""
            )));
        };

        number
            .trim()
            .parse::<u64>()
            .map(|n| Duration::from_millis(n.saturating_mul(unit_ms)))
            .map_err(serde::de::Error::custom)
    }
}
