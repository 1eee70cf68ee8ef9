//! TOML Configuration File Support
//!
//! Loads transport tuning from `~/.config/duplex/duplex.toml`.
//!
//! # Configuration Priority
//!
//! Configuration values are loaded with the following priority (highest first):
//! 1. CLI arguments (applied by the caller through [`ConfigOverrides`])
//! 2. Environment variables (`DUPLEX_*`)
//! 3. TOML configuration file
//! 4. Default values
//!
//! # XDG Base Directory Compliance
//!
//! - `$XDG_CONFIG_HOME/duplex/duplex.toml` (typically `~/.config/duplex/duplex.toml`)
//!
//! # Example Configuration
//!
//! ```toml
//! [connection]
//! buffer_size = 65536
//! timer_coalescing_divisor = 16
//! connect_timeout_ms = 5000
//! read_timeout_ms = 60000
//! write_timeout_ms = 60000
//! close_timeout_ms = 10000
//!
//! [pool]
//! group_name = "default"
//! idle_timeout_ms = 120000
//! lease_timeout_ms = 300000
//! max_outbound_connections_per_endpoint = 10
//!
//! [listener]
//! socket_path = "/run/user/1000/duplex/duplex.sock"
//! require_same_uid = true
//! ```
//!
//! Timeouts are milliseconds; `0` disables the timeout.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::transport::config::{ConnectionSettings, ListenerSettings};

// =============================================================================
// Error Types
// =============================================================================

/// Errors that can occur when loading configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read config file
    #[error("Failed to read config file at {path}: {source}")]
    ReadError {
        /// The path that was attempted
        path: PathBuf,
        /// The underlying IO error
        source: std::io::Error,
    },

    /// Failed to parse TOML
    #[error("Failed to parse TOML config: {0}")]
    ParseError(#[from] toml::de::Error),

    /// Invalid configuration value
    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

// =============================================================================
// Configuration Source Tracking
// =============================================================================

/// Tracks where a configuration value came from
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConfigSource {
    /// Value from command-line argument
    Cli,
    /// Value from environment variable
    Env,
    /// Value from TOML configuration file
    File,
    /// Default value
    #[default]
    Default,
}

impl std::fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Cli => write!(f, "CLI"),
            Self::Env => write!(f, "environment"),
            Self::File => write!(f, "config file"),
            Self::Default => write!(f, "default"),
        }
    }
}

// =============================================================================
// TOML Configuration Structures
// =============================================================================

/// Connection section of the TOML configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionToml {
    /// Socket send/receive buffer size in bytes
    pub buffer_size: Option<usize>,

    /// Timer coalescing divisor (0 = always reprogram)
    pub timer_coalescing_divisor: Option<u32>,

    /// Connect timeout in milliseconds
    pub connect_timeout_ms: Option<u64>,

    /// Read timeout in milliseconds (0 = no timeout)
    pub read_timeout_ms: Option<u64>,

    /// Write timeout in milliseconds (0 = no timeout)
    pub write_timeout_ms: Option<u64>,

    /// Close timeout in milliseconds (0 = no timeout)
    pub close_timeout_ms: Option<u64>,
}

/// Pool section of the TOML configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolToml {
    /// Pool partition key
    pub group_name: Option<String>,

    /// Idle timeout in milliseconds
    pub idle_timeout_ms: Option<u64>,

    /// Lease timeout in milliseconds
    pub lease_timeout_ms: Option<u64>,

    /// Concurrent outbound connections per endpoint
    pub max_outbound_connections_per_endpoint: Option<usize>,
}

/// Listener section of the TOML configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ListenerToml {
    /// Unix socket path to bind
    pub socket_path: Option<String>,

    /// Reject peers running as another user
    pub require_same_uid: Option<bool>,
}

/// Top-level TOML configuration structure
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DuplexToml {
    /// Connection configuration section
    pub connection: ConnectionToml,

    /// Pool configuration section
    pub pool: PoolToml,

    /// Listener configuration section
    pub listener: ListenerToml,
}

// =============================================================================
// Main Configuration Struct
// =============================================================================

/// Resolved configuration from every source
#[derive(Clone, Debug, Default)]
pub struct DuplexConfig {
    /// Settings applied to every connection
    pub connection: ConnectionSettings,

    /// Accept-side settings
    pub listener: ListenerSettings,

    /// Path to the config file that was loaded (if any)
    pub config_file_path: Option<PathBuf>,

    source: ConfigSource,
}

impl DuplexConfig {
    /// Create a new configuration with default values
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the primary source of this configuration
    #[must_use]
    pub fn source(&self) -> ConfigSource {
        self.source
    }

    /// Check values that would make connections unusable
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::ValidationError`] naming the offending value.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let connection = &self.connection;
        if connection.buffer_size == 0 {
            return Err(ConfigError::ValidationError(
                "connection.buffer_size must be greater than zero".to_string(),
            ));
        }
        if connection.pool.max_outbound_connections_per_endpoint == 0 {
            return Err(ConfigError::ValidationError(
                "pool.max_outbound_connections_per_endpoint must be greater than zero".to_string(),
            ));
        }
        if connection.pool.lease_timeout() < connection.pool.idle_timeout() {
            return Err(ConfigError::ValidationError(format!(
                "pool.lease_timeout_ms ({}) must not be shorter than pool.idle_timeout_ms ({})",
                connection.pool.lease_timeout_ms, connection.pool.idle_timeout_ms
            )));
        }
        Ok(())
    }
}

// =============================================================================
// Configuration Loading
// =============================================================================

/// Get the default configuration file path
///
/// Returns `$XDG_CONFIG_HOME/duplex/duplex.toml` or
/// `~/.config/duplex/duplex.toml` if `XDG_CONFIG_HOME` is not set.
#[must_use]
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("duplex").join("duplex.toml"))
}

/// Load configuration from all sources with proper priority
///
/// # Errors
///
/// Returns an error if the config file exists but cannot be parsed, or the
/// merged values fail validation. A missing config file is not an error.
pub fn load_config() -> Result<DuplexConfig, ConfigError> {
    load_config_from_path(default_config_path())
}

/// Load configuration from a specific path
///
/// # Arguments
///
/// * `path` - Optional path to the configuration file. If `None`, only defaults
///   and environment variables are used.
///
/// # Errors
///
/// Returns an error if the specified config file cannot be read or parsed,
/// or the merged values fail validation.
pub fn load_config_from_path(path: Option<PathBuf>) -> Result<DuplexConfig, ConfigError> {
    let mut config = load_file(path)?;
    apply_env_config(&mut config, |key| std::env::var(key).ok());
    config.validate()?;
    Ok(config)
}

/// Defaults merged with the file at `path`, if it exists
fn load_file(path: Option<PathBuf>) -> Result<DuplexConfig, ConfigError> {
    let mut config = DuplexConfig::default();

    if let Some(ref config_path) = path {
        if config_path.exists() {
            let toml_content =
                std::fs::read_to_string(config_path).map_err(|e| ConfigError::ReadError {
                    path: config_path.clone(),
                    source: e,
                })?;

            let toml_config: DuplexToml = toml::from_str(&toml_content)?;
            apply_toml_config(&mut config, &toml_config);
            config.config_file_path = Some(config_path.clone());
            config.source = ConfigSource::File;

            tracing::info!(
                path = %config_path.display(),
                "Loaded configuration from file"
            );
        } else {
            tracing::debug!(
                path = %config_path.display(),
                "Config file not found, using defaults"
            );
        }
    }

    Ok(config)
}

/// Apply TOML configuration values to the config struct
fn apply_toml_config(config: &mut DuplexConfig, toml: &DuplexToml) {
    let connection = &mut config.connection;

    if let Some(size) = toml.connection.buffer_size {
        connection.buffer_size = size;
    }
    if let Some(divisor) = toml.connection.timer_coalescing_divisor {
        connection.timer_coalescing_divisor = divisor;
    }
    if let Some(timeout) = toml.connection.connect_timeout_ms {
        connection.connect_timeout_ms = timeout;
    }
    if let Some(timeout) = toml.connection.read_timeout_ms {
        connection.read_timeout_ms = timeout;
    }
    if let Some(timeout) = toml.connection.write_timeout_ms {
        connection.write_timeout_ms = timeout;
    }
    if let Some(timeout) = toml.connection.close_timeout_ms {
        connection.close_timeout_ms = timeout;
    }

    // Pool settings
    if let Some(ref name) = toml.pool.group_name {
        connection.pool.group_name = name.clone();
    }
    if let Some(timeout) = toml.pool.idle_timeout_ms {
        connection.pool.idle_timeout_ms = timeout;
    }
    if let Some(timeout) = toml.pool.lease_timeout_ms {
        connection.pool.lease_timeout_ms = timeout;
    }
    if let Some(max) = toml.pool.max_outbound_connections_per_endpoint {
        connection.pool.max_outbound_connections_per_endpoint = max;
    }

    // Listener settings
    if let Some(ref path) = toml.listener.socket_path {
        config.listener.socket_path = Some(PathBuf::from(path));
    }
    if let Some(required) = toml.listener.require_same_uid {
        config.listener.require_same_uid = required;
    }
}

/// Apply `DUPLEX_*` overrides read through `var`
///
/// Unparsable values are ignored, as if unset.
fn apply_env_config<F>(config: &mut DuplexConfig, var: F)
where
    F: Fn(&str) -> Option<String>,
{
    fn parsed<T: std::str::FromStr>(var: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
        var(key).and_then(|value| value.trim().parse().ok())
    }

    let before = (config.connection.clone(), config.listener.clone());
    let connection = &mut config.connection;

    if let Some(size) = parsed(&var, "DUPLEX_BUFFER_SIZE") {
        connection.buffer_size = size;
    }
    if let Some(divisor) = parsed(&var, "DUPLEX_TIMER_COALESCING_DIVISOR") {
        connection.timer_coalescing_divisor = divisor;
    }
    if let Some(ms) = parsed(&var, "DUPLEX_CONNECT_TIMEOUT") {
        connection.connect_timeout_ms = ms;
    }
    if let Some(ms) = parsed(&var, "DUPLEX_READ_TIMEOUT") {
        connection.read_timeout_ms = ms;
    }
    if let Some(ms) = parsed(&var, "DUPLEX_WRITE_TIMEOUT") {
        connection.write_timeout_ms = ms;
    }
    if let Some(ms) = parsed(&var, "DUPLEX_CLOSE_TIMEOUT") {
        connection.close_timeout_ms = ms;
    }
    if let Some(max) = parsed(&var, "DUPLEX_MAX_OUTBOUND_CONNECTIONS") {
        connection.pool.max_outbound_connections_per_endpoint = max;
    }
    if let Some(group) = var("DUPLEX_POOL_GROUP") {
        connection.pool.group_name = group;
    }
    if let Some(path) = var("DUPLEX_SOCKET_PATH") {
        config.listener.socket_path = Some(PathBuf::from(path));
    }
    if let Some(required) = var("DUPLEX_REQUIRE_SAME_UID") {
        config.listener.require_same_uid = required != "0" && required.to_lowercase() != "false";
    }

    if before != (config.connection.clone(), config.listener.clone()) {
        config.source = ConfigSource::Env;
    }
}

// =============================================================================
// CLI Override Support
// =============================================================================

/// Builder for applying CLI overrides to configuration
///
/// Use this after [`load_config`] to apply command-line argument overrides.
#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    /// Socket path override
    pub socket_path: Option<PathBuf>,

    /// Connect timeout override (milliseconds)
    pub connect_timeout_ms: Option<u64>,

    /// Buffer size override
    pub buffer_size: Option<usize>,
}

impl ConfigOverrides {
    /// Create a new empty set of overrides
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set socket path override
    #[must_use]
    pub fn with_socket_path(mut self, path: PathBuf) -> Self {
        self.socket_path = Some(path);
        self
    }

    /// Set connect timeout override
    #[must_use]
    pub fn with_connect_timeout_ms(mut self, ms: u64) -> Self {
        self.connect_timeout_ms = Some(ms);
        self
    }

    /// Set buffer size override
    #[must_use]
    pub fn with_buffer_size(mut self, size: usize) -> Self {
        self.buffer_size = Some(size);
        self
    }

    /// Apply overrides to a configuration
    pub fn apply(&self, config: &mut DuplexConfig) {
        if self.socket_path.is_some()
            || self.connect_timeout_ms.is_some()
            || self.buffer_size.is_some()
        {
            config.source = ConfigSource::Cli;
        }

        if let Some(ref path) = self.socket_path {
            config.listener.socket_path = Some(path.clone());
        }
        if let Some(timeout) = self.connect_timeout_ms {
            config.connection.connect_timeout_ms = timeout;
        }
        if let Some(size) = self.buffer_size {
            config.connection.buffer_size = size;
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;
    use std::time::Duration;
    use tempfile::NamedTempFile;

    fn write_toml(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_default_config() {
        let config = DuplexConfig::default();
        assert_eq!(config.connection, ConnectionSettings::default());
        assert_eq!(config.source(), ConfigSource::Default);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_default_config_path() {
        if let Some(p) = default_config_path() {
            assert!(p.ends_with("duplex/duplex.toml"));
        }
    }

    #[test]
    fn test_parse_valid_toml() {
        let file = write_toml(
            r#"
[connection]
buffer_size = 4096
timer_coalescing_divisor = 0
read_timeout_ms = 0

[pool]
group_name = "billing"
max_outbound_connections_per_endpoint = 3

[listener]
socket_path = "/tmp/duplex-test/duplex.sock"
require_same_uid = false
"#,
        );

        let config = load_file(Some(file.path().to_path_buf())).unwrap();

        assert_eq!(config.connection.buffer_size, 4096);
        assert_eq!(config.connection.timer_coalescing_divisor, 0);
        assert_eq!(config.connection.read_timeout(), Duration::MAX);
        assert_eq!(config.connection.pool.group_name, "billing");
        assert_eq!(config.connection.pool.max_outbound_connections_per_endpoint, 3);
        assert_eq!(
            config.listener.socket_path,
            Some(PathBuf::from("/tmp/duplex-test/duplex.sock"))
        );
        assert!(!config.listener.require_same_uid);
        assert_eq!(config.source(), ConfigSource::File);
    }

    #[test]
    fn test_parse_partial_toml() {
        let file = write_toml("[connection]\nconnect_timeout_ms = 7500\n");
        let config = load_file(Some(file.path().to_path_buf())).unwrap();

        assert_eq!(config.connection.connect_timeout_ms, 7500);
        assert_eq!(config.connection.write_timeout_ms, 60_000);
        assert_eq!(config.connection.pool, crate::transport::PoolSettings::default());
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let config = load_file(Some(PathBuf::from("/nonexistent/duplex.toml"))).unwrap();
        assert_eq!(config.source(), ConfigSource::Default);
        assert!(config.config_file_path.is_none());
    }

    #[test]
    fn test_invalid_toml() {
        let file = write_toml("[connection\nbuffer_size = ");
        let result = load_file(Some(file.path().to_path_buf()));
        assert!(matches!(result, Err(ConfigError::ParseError(_))));
    }

    #[test]
    fn test_env_overrides_file() {
        let file = write_toml("[connection]\nbuffer_size = 4096\n");
        let mut config = load_file(Some(file.path().to_path_buf())).unwrap();

        apply_env_config(
            &mut config,
            env(&[
                ("DUPLEX_BUFFER_SIZE", "8192"),
                ("DUPLEX_READ_TIMEOUT", "250"),
                ("DUPLEX_REQUIRE_SAME_UID", "false"),
                ("DUPLEX_MAX_OUTBOUND_CONNECTIONS", "not-a-number"),
            ]),
        );

        assert_eq!(config.connection.buffer_size, 8192);
        assert_eq!(config.connection.read_timeout(), Duration::from_millis(250));
        assert!(!config.listener.require_same_uid);
        assert_eq!(config.connection.pool.max_outbound_connections_per_endpoint, 10);
        assert_eq!(config.source(), ConfigSource::Env);
    }

    #[test]
    fn test_empty_env_keeps_source() {
        let mut config = DuplexConfig::default();
        apply_env_config(&mut config, env(&[]));
        assert_eq!(config.source(), ConfigSource::Default);
    }

    #[test]
    fn test_cli_overrides() {
        let mut config = DuplexConfig::default();
        ConfigOverrides::new()
            .with_socket_path(PathBuf::from("/tmp/cli.sock"))
            .with_buffer_size(1024)
            .apply(&mut config);

        assert_eq!(config.listener.socket_path, Some(PathBuf::from("/tmp/cli.sock")));
        assert_eq!(config.connection.buffer_size, 1024);
        assert_eq!(config.source(), ConfigSource::Cli);
    }

    #[test]
    fn test_validation() {
        let mut config = DuplexConfig::default();
        config.connection.buffer_size = 0;
        assert!(matches!(config.validate(), Err(ConfigError::ValidationError(_))));

        let mut config = DuplexConfig::default();
        config.connection.pool.max_outbound_connections_per_endpoint = 0;
        assert!(config.validate().is_err());

        let mut config = DuplexConfig::default();
        config.connection.pool.idle_timeout_ms = 600_000;
        assert!(config.validate().is_err());

        // Unbounded lease outlives any idle timeout
        config.connection.pool.lease_timeout_ms = 0;
        assert!(config.validate().is_ok());
    }
}
