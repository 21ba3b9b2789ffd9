//! # Configuration Management
//!
//! Centralized configuration for the exchange transport.
//!
//! This module provides structured configuration for listeners, clients and
//! the bridge, including socket modes, the shared key, and shutdown
//! behavior.
//!
//! ## Configuration Sources
//! - TOML files via `from_file()`
//! - Direct instantiation with defaults
//! - Environment-specific overrides via `from_env()`

use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::time::Duration;
use tracing::Level;

use crate::error::{ExchangeError, Result};
use crate::protocol::handshake::VersionPolicy;
use crate::service::bridge::Verbosity;
use crate::transport::SocketMode;

/// Default bound for client connection attempts.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Default bound for draining in-flight handlers on stop.
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

/// Application version offered/echoed when none is configured.
pub const DEFAULT_VERSION: &str = "1.0";

/// Main configuration structure containing all configurable settings.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct ExchangeConfig {
    /// Listener-specific configuration
    #[serde(default)]
    pub listener: ListenerConfig,

    /// Client-specific configuration
    #[serde(default)]
    pub client: ClientConfig,

    /// Bridge-specific configuration
    #[serde(default)]
    pub bridge: BridgeConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl ExchangeConfig {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut file = File::open(path)
            .map_err(|e| ExchangeError::Config(format!("failed to open config file: {e}")))?;

        let mut contents = String::new();
        file.read_to_string(&mut contents)
            .map_err(|e| ExchangeError::Config(format!("failed to read config file: {e}")))?;

        Self::from_toml(&contents)
    }

    /// Load configuration from a TOML string
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str::<Self>(content)
            .map_err(|e| ExchangeError::Config(format!("failed to parse TOML: {e}")))
    }

    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Ok(addr) = std::env::var("OBJECT_EXCHANGE_LISTEN_ADDRESS") {
            config.listener.address = addr;
        }

        if let Ok(addr) = std::env::var("OBJECT_EXCHANGE_CLIENT_ADDRESS") {
            config.client.address = addr;
        }

        if let Ok(secret) = std::env::var("OBJECT_EXCHANGE_SECRET") {
            config.listener.secret = Some(secret.clone());
            config.client.secret = Some(secret);
        }

        if let Ok(timeout) = std::env::var("OBJECT_EXCHANGE_CONNECT_TIMEOUT_MS") {
            if let Ok(val) = timeout.parse::<u64>() {
                config.client.connect_timeout = Duration::from_millis(val);
            }
        }

        if let Ok(timeout) = std::env::var("OBJECT_EXCHANGE_SHUTDOWN_TIMEOUT_MS") {
            if let Ok(val) = timeout.parse::<u64>() {
                config.listener.shutdown_timeout = Duration::from_millis(val);
            }
        }

        Ok(config)
    }

    /// Apply overrides to the default configuration
    pub fn default_with_overrides<F>(mutator: F) -> Self
    where
        F: FnOnce(&mut Self),
    {
        let mut config = Self::default();
        mutator(&mut config);
        config
    }

    /// Generate example configuration file content
    pub fn example_config() -> String {
        toml::to_string_pretty(&Self::default())
            .unwrap_or_else(|_| String::from("# failed to generate example config"))
    }

    /// Save configuration to a file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| ExchangeError::Config(format!("failed to serialize config: {e}")))?;

        std::fs::write(path, content)
            .map_err(|e| ExchangeError::Config(format!("failed to write config file: {e}")))?;

        Ok(())
    }

    /// Validate the configuration for common issues and misconfigurations.
    ///
    /// Returns a list of validation errors. Empty list means the
    /// configuration is valid.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        errors.extend(self.listener.validate());
        errors.extend(self.client.validate());
        errors.extend(self.bridge.validate());
        errors.extend(self.logging.validate());
        errors
    }

    /// Validate and return Result - convenience method
    pub fn validate_strict(&self) -> Result<()> {
        let errors = self.validate();
        if errors.is_empty() {
            Ok(())
        } else {
            Err(ExchangeError::Config(format!(
                "configuration validation failed:\n  - {}",
                errors.join("\n  - ")
            )))
        }
    }
}

/// Listener-specific configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ListenerConfig {
    /// Listen address (e.g., "127.0.0.1:9000")
    pub address: String,

    /// Shared secret; when set, every frame payload is encrypted
    #[serde(skip_serializing_if = "Option::is_none")]
    pub secret: Option<String>,

    /// Socket mode: plain TCP or certificate-less TLS
    #[serde(default)]
    pub mode: SocketMode,

    /// How the server answers the client's offered version
    #[serde(default)]
    pub version_policy: VersionPolicy,

    /// Bound for draining in-flight handlers on stop; zero waits unbounded
    #[serde(with = "duration_serde")]
    pub shutdown_timeout: Duration,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            address: String::from("127.0.0.1:9000"),
            secret: None,
            mode: SocketMode::Plain,
            version_policy: VersionPolicy::EchoClient,
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
        }
    }
}

impl ListenerConfig {
    /// Validate listener configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.address.is_empty() {
            errors.push("listener address cannot be empty".to_string());
        } else if self.address.parse::<std::net::SocketAddr>().is_err() {
            errors.push(format!(
                "invalid listener address format: '{}' (expected format: '0.0.0.0:9000')",
                self.address
            ));
        }

        if let Some(secret) = &self.secret {
            if secret.is_empty() {
                errors.push("listener secret must not be empty when set".to_string());
            }
        }

        if self.shutdown_timeout.as_secs() > 300 {
            errors.push("shutdown timeout too long (maximum: 300s; zero waits unbounded)".into());
        }

        errors
    }
}

/// Client-specific configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ClientConfig {
    /// Target server address
    pub address: String,

    /// Shared secret; must match the listener's to pass the handshake
    #[serde(skip_serializing_if = "Option::is_none")]
    pub secret: Option<String>,

    /// Socket mode: plain TCP or certificate-less TLS
    #[serde(default)]
    pub mode: SocketMode,

    /// Application version offered during the handshake
    pub version: String,

    /// Timeout for connection attempts; zero waits unbounded
    #[serde(with = "duration_serde")]
    pub connect_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            address: String::from("127.0.0.1:9000"),
            secret: None,
            mode: SocketMode::Plain,
            version: String::from(DEFAULT_VERSION),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }
}

impl ClientConfig {
    /// Validate client configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.address.is_empty() {
            errors.push("client address cannot be empty".to_string());
        } else if !self.address.contains(':') {
            errors.push(format!(
                "client address is missing a port: '{}' (expected format: 'example.com:9000')",
                self.address
            ));
        }

        if self.version.is_empty() {
            errors.push("client version cannot be empty".to_string());
        }

        if let Some(secret) = &self.secret {
            if secret.is_empty() {
                errors.push("client secret must not be empty when set".to_string());
            }
        }

        if self.connect_timeout.as_secs() > 300 {
            errors.push("connect timeout too long (maximum: 300s; zero waits unbounded)".into());
        }

        errors
    }
}

/// Bridge-specific configuration
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct BridgeConfig {
    /// Upstream connection the bridge opens per downstream client
    #[serde(default)]
    pub upstream: ClientConfig,

    /// How much of each relayed frame reaches the log
    #[serde(default)]
    pub verbosity: Verbosity,
}

impl BridgeConfig {
    /// Validate bridge configuration
    pub fn validate(&self) -> Vec<String> {
        self.upstream
            .validate()
            .into_iter()
            .map(|e| format!("bridge {e}"))
            .collect()
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    /// Application name for logs
    pub app_name: String,

    /// Log level
    #[serde(with = "log_level_serde")]
    pub log_level: Level,

    /// Whether to log to console
    pub log_to_console: bool,

    /// Whether to log to file
    pub log_to_file: bool,

    /// Path to log file (if log_to_file is true)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_file_path: Option<String>,

    /// Whether to use JSON formatting for logs
    pub json_format: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            app_name: String::from("object-exchange"),
            log_level: Level::INFO,
            log_to_console: true,
            log_to_file: false,
            log_file_path: None,
            json_format: false,
        }
    }
}

impl LoggingConfig {
    /// Validate logging configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.app_name.is_empty() {
            errors.push("application name cannot be empty".to_string());
        } else if self.app_name.len() > 64 {
            errors.push(format!(
                "application name too long: {} characters (maximum: 64)",
                self.app_name.len()
            ));
        }

        if self.log_to_file {
            if let Some(ref path) = self.log_file_path {
                if let Some(parent) = std::path::Path::new(path).parent() {
                    if !parent.as_os_str().is_empty() && !parent.exists() {
                        errors.push(format!(
                            "log file directory does not exist: {}",
                            parent.display()
                        ));
                    }
                }
            } else {
                errors.push("log_file_path must be specified when log_to_file is true".to_string());
            }
        }

        if !self.log_to_console && !self.log_to_file {
            errors
                .push("at least one logging output (console or file) must be enabled".to_string());
        }

        errors
    }
}

/// Helper module for Duration serialization/deserialization
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let millis = duration.as_millis() as u64;
        millis.serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

/// Helper module for tracing::Level serialization/deserialization
mod log_level_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::str::FromStr;
    use tracing::Level;

    pub fn serialize<S>(level: &Level, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let level_str = match *level {
            Level::TRACE => "trace",
            Level::DEBUG => "debug",
            Level::INFO => "info",
            Level::WARN => "warn",
            Level::ERROR => "error",
        };
        level_str.serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Level, D::Error>
    where
        D: Deserializer<'de>,
    {
        let level_str = String::deserialize(deserializer)?;
        Level::from_str(&level_str)
            .map_err(|_| serde::de::Error::custom(format!("invalid log level: {level_str}")))
    }
}
