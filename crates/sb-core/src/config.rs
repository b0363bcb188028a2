//! Client configuration
//!
//! Configuration is read from a TOML file or from the environment; every
//! field has a default so a plain `ClientConfig::default()` talks to the
//! public host.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::ConfigError;

/// Default host the client connects to
pub const DEFAULT_HOST: &str = "sandbox.sandbridge.dev";

/// Default port the session endpoint listens on
pub const DEFAULT_PORT: u16 = 49982;

/// Configuration for the sandbridge client
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Remote sandbox host
    pub host: String,

    /// Remote sandbox port
    pub port: u16,

    /// Substitute a local endpoint (127.0.0.1) for the configured host.
    ///
    /// Used during development against a locally running sandbox host.
    pub debug_local: bool,

    /// Interval between session refresh calls.
    ///
    /// Must be shorter than the host's reclamation timeout.
    #[serde(with = "duration_secs")]
    pub refresh_interval: Duration,

    /// Backoff configuration for reconnections
    pub reconnect_backoff: BackoffConfig,

    /// Retry budget before a dropped connection becomes fatal
    pub retry: RetryConfig,

    /// Default timeout applied to every call
    #[serde(with = "duration_secs")]
    pub default_call_timeout: Duration,

    /// Timeout for establishing the TCP connection
    #[serde(with = "duration_secs")]
    pub connect_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            debug_local: false,
            refresh_interval: Duration::from_secs(5),
            reconnect_backoff: BackoffConfig::default(),
            retry: RetryConfig::default(),
            default_call_timeout: Duration::from_secs(60),
            connect_timeout: Duration::from_secs(30),
        }
    }
}

impl ClientConfig {
    /// Endpoint address the transport connects to
    pub fn endpoint(&self) -> String {
        if self.debug_local {
            format!("127.0.0.1:{}", self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }

    /// Load configuration from a TOML file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::NotFound(path.to_path_buf()));
        }

        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Invalid(format!("Failed to read config: {}", e)))?;

        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self)?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| ConfigError::Invalid(format!("Failed to create config dir: {}", e)))?;
        }

        std::fs::write(path, content)
            .map_err(|e| ConfigError::Invalid(format!("Failed to write config: {}", e)))?;

        Ok(())
    }

    /// Build a configuration from environment variables.
    ///
    /// Recognized variables: `SANDBRIDGE_HOST`, `SANDBRIDGE_PORT`,
    /// `SANDBRIDGE_DEBUG` (any non-empty value enables the local override).
    /// Unset variables keep their defaults.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(host) = std::env::var("SANDBRIDGE_HOST") {
            if !host.is_empty() {
                config.host = host;
            }
        }
        if let Ok(port) = std::env::var("SANDBRIDGE_PORT") {
            if let Ok(port) = port.parse() {
                config.port = port;
            }
        }
        if let Ok(debug) = std::env::var("SANDBRIDGE_DEBUG") {
            config.debug_local = !debug.is_empty();
        }

        config
    }
}

/// Get the default configuration directory
pub fn default_config_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("sandbridge")
}

/// Get the default configuration file path
pub fn default_config_path() -> PathBuf {
    default_config_dir().join("config.toml")
}

/// Exponential backoff configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackoffConfig {
    /// Initial delay
    #[serde(with = "duration_secs")]
    pub initial: Duration,

    /// Maximum delay
    #[serde(with = "duration_secs")]
    pub max: Duration,

    /// Multiplier for each retry
    pub multiplier: f64,

    /// Jitter factor (0.0 to 1.0)
    pub jitter: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial: Duration::from_secs(6),
            max: Duration::from_secs(60),
            multiplier: 2.0,
            jitter: 0.25,
        }
    }
}

/// Retry budget for reconnection attempts
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Maximum number of attempts per outage
    pub max_attempts: u32,

    /// Maximum elapsed time per outage
    #[serde(with = "duration_secs")]
    pub max_elapsed: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            max_elapsed: Duration::from_secs(120),
        }
    }
}

/// Helper module for Duration serialization as seconds
mod duration_secs {
    use serde::{self, Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    /// Serialize a Duration as seconds (u64)
    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    /// Deserialize a Duration from seconds (u64)
    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}
