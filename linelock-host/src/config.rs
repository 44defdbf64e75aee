//! Configuration loading for linelock-host.
//!
//! Configuration is loaded from a TOML file (default: `linelock.toml`).
//! Every section and field is optional.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use linelock_channel::KdfParams;
use linelock_types::AccessLevel;
use serde::Deserialize;

/// Environment variable consulted when `database.secret` is unset.
pub const DB_SECRET_ENV: &str = "LINELOCK_DB_SECRET";

/// Root configuration for linelock-host.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Server configuration.
    #[serde(default)]
    pub server: ServerConfig,
    /// File sharing configuration.
    #[serde(default)]
    pub files: FilesConfig,
    /// Registration database configuration.
    #[serde(default)]
    pub database: DatabaseConfig,
    /// Timeouts, rate limits and trust.
    #[serde(default)]
    pub limits: LimitsConfig,
}

/// Server configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Bind address (default: 0.0.0.0:52700).
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    /// Address put into the project code. Derived from the bind address
    /// and the machine's outbound interface when unset.
    #[serde(default)]
    pub advertise_address: Option<String>,
    /// Directory whose top-level files are shared (default: `.`).
    #[serde(default = "default_project_dir")]
    pub project_dir: PathBuf,
    /// Username of the hosting user, the owner of the user index.
    #[serde(default = "default_host_username")]
    pub host_username: String,
    /// Maximum concurrent client connections (default: 16).
    #[serde(default = "default_max_clients")]
    pub max_clients: usize,
}

/// File sharing configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct FilesConfig {
    /// Access level for scanned files without an override (default: edit).
    #[serde(default)]
    pub default_access: AccessLevel,
    /// Per-file access levels.
    #[serde(default)]
    pub access: BTreeMap<String, AccessLevel>,
}

/// Key derivation cost.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KdfProfile {
    /// Scale with installed RAM.
    #[default]
    Auto,
    /// Minimal cost, for tests and small machines.
    Low,
}

/// Registration database configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DatabaseConfig {
    /// Database directory (default: `<project_dir>/.database`).
    #[serde(default)]
    pub directory: Option<PathBuf>,
    /// Secret the record keys are derived from. Falls back to
    /// `LINELOCK_DB_SECRET`.
    #[serde(default)]
    pub secret: Option<String>,
    /// Argon2id cost profile.
    #[serde(default)]
    pub kdf_profile: KdfProfile,
}

/// Timeouts, rate limits and trust.
#[derive(Debug, Clone, Deserialize)]
pub struct LimitsConfig {
    /// Receive poll interval in milliseconds (default: 200).
    #[serde(default = "default_receive_timeout_ms")]
    pub receive_timeout_ms: u64,
    /// Worker sleep when the command pool is empty, in milliseconds
    /// (default: 100).
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Time allowed for handshake and login, in seconds (default: 10).
    #[serde(default = "default_handshake_timeout_secs")]
    pub handshake_timeout_secs: u64,
    /// Messages per client per minute before penalties (default: 600).
    #[serde(default = "default_messages_per_minute")]
    pub messages_per_minute: u32,
    /// Connection attempts per IP per minute (default: 30).
    #[serde(default = "default_connections_per_minute")]
    pub connections_per_minute: u32,
    /// Trust factor given to new sessions (default: 50).
    #[serde(default = "default_initial_trust")]
    pub initial_trust: u8,
    /// Command pool capacity (default: 1024).
    #[serde(default = "default_pool_capacity")]
    pub pool_capacity: usize,
    /// How often idle rate limiter entries are evicted, in milliseconds
    /// (default: 60000).
    #[serde(default = "default_limiter_sweep_ms")]
    pub limiter_sweep_ms: u64,
}

// Default value functions
fn default_bind_address() -> String {
    "0.0.0.0:52700".to_string()
}

fn default_project_dir() -> PathBuf {
    PathBuf::from(".")
}

fn default_host_username() -> String {
    "host".to_string()
}

fn default_max_clients() -> usize {
    16
}

fn default_receive_timeout_ms() -> u64 {
    200
}

fn default_poll_interval_ms() -> u64 {
    100
}

fn default_handshake_timeout_secs() -> u64 {
    10
}

fn default_messages_per_minute() -> u32 {
    600
}

fn default_connections_per_minute() -> u32 {
    30
}

fn default_initial_trust() -> u8 {
    linelock_core::trust::DEFAULT_TRUST
}

fn default_pool_capacity() -> usize {
    1024
}

fn default_limiter_sweep_ms() -> u64 {
    60_000
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            advertise_address: None,
            project_dir: default_project_dir(),
            host_username: default_host_username(),
            max_clients: default_max_clients(),
        }
    }
}

impl Default for FilesConfig {
    fn default() -> Self {
        Self {
            default_access: AccessLevel::Edit,
            access: BTreeMap::new(),
        }
    }
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            receive_timeout_ms: default_receive_timeout_ms(),
            poll_interval_ms: default_poll_interval_ms(),
            handshake_timeout_secs: default_handshake_timeout_secs(),
            messages_per_minute: default_messages_per_minute(),
            connections_per_minute: default_connections_per_minute(),
            initial_trust: default_initial_trust(),
            pool_capacity: default_pool_capacity(),
            limiter_sweep_ms: default_limiter_sweep_ms(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            source: e,
        })?;

        toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            source: e,
        })
    }

    /// Access level for a scanned file.
    pub fn access_for(&self, name: &str) -> AccessLevel {
        self.files
            .access
            .get(name)
            .copied()
            .unwrap_or(self.files.default_access)
    }

    /// Resolved database directory.
    pub fn database_dir(&self) -> PathBuf {
        self.database
            .directory
            .clone()
            .unwrap_or_else(|| self.server.project_dir.join(".database"))
    }

    /// Database secret from the file or the environment.
    pub fn database_secret(&self) -> Option<String> {
        self.database
            .secret
            .clone()
            .or_else(|| std::env::var(DB_SECRET_ENV).ok())
            .filter(|s| !s.is_empty())
    }

    /// Argon2id parameters for the configured profile.
    pub fn kdf_params(&self) -> KdfParams {
        match self.database.kdf_profile {
            KdfProfile::Auto => KdfParams::default(),
            KdfProfile::Low => KdfParams::low_memory(),
        }
    }
}

impl LimitsConfig {
    /// Receive poll interval.
    pub fn receive_timeout(&self) -> Duration {
        Duration::from_millis(self.receive_timeout_ms)
    }

    /// Worker idle sleep.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Handshake and login deadline.
    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_secs(self.handshake_timeout_secs)
    }

    /// Interval between rate limiter sweeps.
    pub fn limiter_sweep(&self) -> Duration {
        Duration::from_millis(self.limiter_sweep_ms)
    }
}

/// Configuration error types.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read configuration file.
    #[error("failed to read config file {path}: {source}")]
    ReadError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },
    /// Failed to parse configuration file.
    #[error("failed to parse config file {path}: {source}")]
    ParseError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying TOML parse error.
        source: toml::de::Error,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = Config::default();
        assert_eq!(config.server.bind_address, "0.0.0.0:52700");
        assert_eq!(config.server.max_clients, 16);
        assert_eq!(config.limits.poll_interval(), Duration::from_millis(100));
        assert_eq!(config.limits.initial_trust, 50);
        assert_eq!(config.limits.limiter_sweep(), Duration::from_secs(60));
        assert_eq!(config.files.default_access, AccessLevel::Edit);
        assert_eq!(config.database_dir(), PathBuf::from("./.database"));
    }

    #[test]
    fn config_from_toml_string() {
        let toml = r#"
[server]
bind_address = "127.0.0.1:6000"
project_dir = "/srv/project"
host_username = "carol"

[files]
default_access = "limit"

[files.access]
"secrets.env" = "hidden"
"main.py" = "edit"

[database]
secret = "hunter2"
kdf_profile = "low"

[limits]
poll_interval_ms = 25
messages_per_minute = 60
"#;

        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.server.bind_address, "127.0.0.1:6000");
        assert_eq!(config.server.host_username, "carol");
        assert_eq!(config.access_for("secrets.env"), AccessLevel::Hidden);
        assert_eq!(config.access_for("main.py"), AccessLevel::Edit);
        assert_eq!(config.access_for("notes.txt"), AccessLevel::Limit);
        assert_eq!(config.database_secret().as_deref(), Some("hunter2"));
        assert_eq!(config.kdf_params(), KdfParams::low_memory());
        assert_eq!(config.database_dir(), PathBuf::from("/srv/project/.database"));
        assert_eq!(config.limits.poll_interval_ms, 25);
        assert_eq!(config.limits.receive_timeout_ms, 200);
    }

    #[test]
    fn config_missing_sections_use_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.server.max_clients, 16);
        assert_eq!(config.limits.handshake_timeout_secs, 10);
        assert!(config.files.access.is_empty());
    }

    #[test]
    fn unknown_access_level_is_a_parse_error() {
        let toml = "[files]\ndefault_access = \"secret\"\n";
        assert!(toml::from_str::<Config>(toml).is_err());
    }

    #[test]
    fn missing_file_is_a_read_error() {
        let err = Config::from_file(Path::new("/nonexistent/linelock.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::ReadError { .. }));
    }
}
