//! Configuration management for the VirtShare daemon.
//!
//! TOML-based configuration loading and saving. The default path is
//! `~/.config/virtshare/config.toml`; the password file and the session
//! log live next to it in the data directory.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use vdisplay::{GeometryError, Position};

/// Valid log level values for tracing configuration.
const VALID_LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

/// Configuration validation errors.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    /// The VNC port is zero.
    #[error("vnc port must be non-zero")]
    InvalidPort,

    /// Width or height is zero.
    #[error("screen geometry must be positive, got {width}x{height}")]
    InvalidGeometry {
        /// Configured width.
        width: u32,
        /// Configured height.
        height: u32,
    },

    /// The placement keyword is unknown.
    #[error(transparent)]
    InvalidPosition(#[from] GeometryError),

    /// The log level is not a known tracing level.
    #[error("log_level must be one of: trace, debug, info, warn, error; got {0}")]
    InvalidLogLevel(String),
}

/// Main configuration structure for the VirtShare daemon.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    /// General daemon configuration.
    pub daemon: DaemonConfig,

    /// Virtual screen configuration.
    pub screen: ScreenConfig,

    /// VNC server configuration.
    pub vnc: VncConfig,
}

/// General daemon configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DaemonConfig {
    /// Directory for daemon data (password file, session log).
    pub data_dir: PathBuf,

    /// Logging level (trace, debug, info, warn, error).
    pub log_level: String,
}

/// Virtual screen configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ScreenConfig {
    /// The output device to use for the virtual screen, e.g. `VIRTUAL1`.
    /// Empty until the user picks one.
    pub device: String,

    /// Requested width in pixels.
    pub width: u32,

    /// Requested height in pixels.
    pub height: u32,

    /// Swap width and height.
    pub portrait: bool,

    /// Double both dimensions.
    pub hidpi: bool,

    /// Placement relative to the primary display: `left`, `right`,
    /// `above`, `below`, or empty for the preferred placement.
    pub position: String,
}

/// VNC server configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct VncConfig {
    /// TCP port the server listens on.
    pub port: u16,

    /// Extra flags passed to the server verbatim.
    pub extra_args: Vec<String>,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            log_level: "info".to_string(),
        }
    }
}

impl Default for ScreenConfig {
    fn default() -> Self {
        Self {
            device: String::new(),
            width: 1368,
            height: 1024,
            portrait: false,
            hidpi: false,
            position: String::new(),
        }
    }
}

impl Default for VncConfig {
    fn default() -> Self {
        Self {
            port: 5900,
            extra_args: Vec::new(),
        }
    }
}

/// Returns the default configuration file path.
pub fn default_config_path() -> PathBuf {
    default_data_dir().join("config.toml")
}

/// Returns the default data directory path.
fn default_data_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("virtshare")
}

impl Config {
    /// Path of the VNC password file.
    pub fn password_path(&self) -> PathBuf {
        self.daemon.data_dir.join("vnc_passwd")
    }

    /// Path of the per-session server log.
    pub fn session_log_path(&self) -> PathBuf {
        self.daemon.data_dir.join("x11vnc_log.txt")
    }

    /// The configured placement, parsed.
    pub fn position(&self) -> Result<Option<Position>, GeometryError> {
        Position::parse(&self.screen.position)
    }

    /// The configured device name, or `None` while unset.
    pub fn device(&self) -> Option<String> {
        if self.screen.device.is_empty() {
            None
        } else {
            Some(self.screen.device.clone())
        }
    }

    /// Apply environment variable overrides to the configuration.
    ///
    /// Environment variables take precedence over config file values.
    /// Supported variables:
    /// - VIRTSHARE_LOG_LEVEL: override the log level
    /// - VIRTSHARE_VNC_PORT: override the VNC port
    pub fn apply_env_overrides(&mut self) {
        if let Ok(level) = std::env::var("VIRTSHARE_LOG_LEVEL") {
            if !level.is_empty() {
                tracing::info!(level = %level, "overriding log_level from environment");
                self.daemon.log_level = level;
            }
        }

        if let Ok(port) = std::env::var("VIRTSHARE_VNC_PORT") {
            if !port.is_empty() {
                match port.parse() {
                    Ok(port) => {
                        tracing::info!(port, "overriding vnc port from environment");
                        self.vnc.port = port;
                    }
                    Err(_) => {
                        tracing::warn!(value = %port, "ignoring invalid VIRTSHARE_VNC_PORT");
                    }
                }
            }
        }
    }

    /// Validate the configuration values.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.vnc.port == 0 {
            return Err(ConfigError::InvalidPort);
        }

        if self.screen.width == 0 || self.screen.height == 0 {
            return Err(ConfigError::InvalidGeometry {
                width: self.screen.width,
                height: self.screen.height,
            });
        }

        self.position()?;

        let level = self.daemon.log_level.to_lowercase();
        if !VALID_LOG_LEVELS.contains(&level.as_str()) {
            return Err(ConfigError::InvalidLogLevel(self.daemon.log_level.clone()));
        }

        Ok(())
    }

    /// Load configuration from a file.
    ///
    /// If the file does not exist, returns the default configuration.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            tracing::debug!(path = %path.display(), "config file not found, using defaults");
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::from_toml(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    /// Load configuration from the default path.
    pub fn load_default() -> Result<Self> {
        Self::load(default_config_path())
    }

    /// Parse configuration from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        toml::from_str(toml_str).map_err(|e| anyhow::anyhow!("Invalid TOML configuration: {e}"))
    }

    /// Save configuration to a file, creating parent directories.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        let contents = self.to_toml()?;
        fs::write(path, contents)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        tracing::debug!(path = %path.display(), "configuration saved");
        Ok(())
    }

    /// Serialize configuration to a TOML string.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to serialize configuration to TOML")
    }
}
