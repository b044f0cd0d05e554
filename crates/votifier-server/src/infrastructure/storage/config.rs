//! TOML configuration file for the vote receiver.
//!
//! ```toml
//! [server]
//! bind_address = "0.0.0.0"
//! port = 8192
//! timeout_ms = 5000
//! expose_raw_input = false
//!
//! [keys]
//! public_key_file = "public.key"
//! private_key_file = "private.key"
//!
//! [logging]
//! level = "info"
//! ```
//!
//! Every field has a `#[serde(default = "...")]` so that a partial file, or
//! no file at all on first run, still yields a usable configuration.
//! Relative key file paths are resolved against the directory that holds the
//! configuration file, not the working directory.

use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use votifier_core::ErrorKind;

/// File name used when `--config` is not given.
pub const DEFAULT_CONFIG_FILE: &str = "votifier.toml";

/// Error type for configuration file operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A file system I/O error occurred.
    #[error("I/O error accessing config at {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The TOML content could not be parsed.
    #[error("failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    /// The config could not be serialized to TOML.
    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    /// `server.bind_address` is not an IP address.
    #[error("invalid bind address '{0}': expected an IPv4 or IPv6 address")]
    InvalidBindAddress(String),
}

impl ConfigError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ConfigError::Io { .. } => ErrorKind::IoFailure,
            ConfigError::Parse(_)
            | ConfigError::Serialize(_)
            | ConfigError::InvalidBindAddress(_) => ErrorKind::ConfigFailure,
        }
    }
}

// ── Config schema types ───────────────────────────────────────────────────────

/// Top-level configuration stored on disk.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct VotifierConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub keys: KeysConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Listening socket and per-connection behaviour.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServerConfig {
    /// IP address to bind to.  `"0.0.0.0"` binds all IPv4 interfaces.
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    /// TCP port senders connect to.
    #[serde(default = "default_port")]
    pub port: u16,
    /// Deadline for a whole connection, in milliseconds.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// Attach raw bytes to decrypt/malformed exception events.
    #[serde(default)]
    pub expose_raw_input: bool,
}

/// Key file locations.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct KeysConfig {
    #[serde(default = "default_public_key_file")]
    pub public_key_file: PathBuf,
    #[serde(default = "default_private_key_file")]
    pub private_key_file: PathBuf,
}

/// Log output settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoggingConfig {
    /// `tracing` filter directive, e.g. `"info"` or `"votifier_server=debug"`.
    /// `RUST_LOG` overrides it.
    #[serde(default = "default_log_level")]
    pub level: String,
}

// ── Default helpers ───────────────────────────────────────────────────────────

fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    8192
}
fn default_timeout_ms() -> u64 {
    5000
}
fn default_public_key_file() -> PathBuf {
    PathBuf::from("public.key")
}
fn default_private_key_file() -> PathBuf {
    PathBuf::from("private.key")
}
fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            port: default_port(),
            timeout_ms: default_timeout_ms(),
            expose_raw_input: false,
        }
    }
}

impl Default for KeysConfig {
    fn default() -> Self {
        Self {
            public_key_file: default_public_key_file(),
            private_key_file: default_private_key_file(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl VotifierConfig {
    /// The socket address to bind.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidBindAddress`] if `bind_address` is not
    /// an IP literal.
    pub fn listen_addr(&self) -> Result<SocketAddr, ConfigError> {
        let ip: IpAddr = self
            .server
            .bind_address
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidBindAddress(self.server.bind_address.clone()))?;
        Ok(SocketAddr::new(ip, self.server.port))
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.server.timeout_ms)
    }

    /// Public and private key paths, resolved against `base_dir`.
    pub fn key_paths(&self, base_dir: &Path) -> (PathBuf, PathBuf) {
        (
            resolve(base_dir, &self.keys.public_key_file),
            resolve(base_dir, &self.keys.private_key_file),
        )
    }
}

// ── Config repository ─────────────────────────────────────────────────────────

/// Directory that relative paths inside the config file are resolved against.
pub fn config_base_dir(config_path: &Path) -> PathBuf {
    match config_path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

/// Loads the configuration at `path`, returning `VotifierConfig::default()`
/// if the file does not exist yet.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for file-system errors other than "not found",
/// and [`ConfigError::Parse`] if the TOML is malformed.
pub fn load_config(path: &Path) -> Result<VotifierConfig, ConfigError> {
    match std::fs::read_to_string(path) {
        Ok(content) => Ok(toml::from_str(&content)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(VotifierConfig::default()),
        Err(e) => Err(ConfigError::Io {
            path: path.to_path_buf(),
            source: e,
        }),
    }
}

/// Writes `config` to `path`, creating the parent directory if needed.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for file-system failures or
/// [`ConfigError::Serialize`] if serialization fails.
pub fn save_config(path: &Path, config: &VotifierConfig) -> Result<(), ConfigError> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir).map_err(|source| ConfigError::Io {
            path: dir.to_path_buf(),
            source,
        })?;
    }

    let content = toml::to_string_pretty(config)?;
    std::fs::write(path, content).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(())
}

fn resolve(base_dir: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base_dir.join(path)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_dir() -> PathBuf {
        let dir = std::env::temp_dir().join(format!("votifier_cfg_{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    // ── Defaults ──────────────────────────────────────────────────────────────

    #[test]
    fn test_default_config_listens_on_all_interfaces_port_8192() {
        // Arrange / Act
        let cfg = VotifierConfig::default();

        // Assert
        assert_eq!(cfg.listen_addr().unwrap().to_string(), "0.0.0.0:8192");
        assert_eq!(cfg.timeout(), Duration::from_secs(5));
        assert!(!cfg.server.expose_raw_input);
    }

    #[test]
    fn test_default_key_file_names() {
        let cfg = KeysConfig::default();
        assert_eq!(cfg.public_key_file, PathBuf::from("public.key"));
        assert_eq!(cfg.private_key_file, PathBuf::from("private.key"));
    }

    #[test]
    fn test_default_log_level_is_info() {
        assert_eq!(LoggingConfig::default().level, "info");
    }

    // ── TOML parsing ──────────────────────────────────────────────────────────

    #[test]
    fn test_empty_toml_uses_defaults() {
        let cfg: VotifierConfig = toml::from_str("").expect("deserialize empty");
        assert_eq!(cfg, VotifierConfig::default());
    }

    #[test]
    fn test_partial_server_section_overrides_defaults() {
        // Arrange
        let toml_str = r#"
[server]
port = 9999
timeout_ms = 250
"#;

        // Act
        let cfg: VotifierConfig = toml::from_str(toml_str).expect("deserialize partial");

        // Assert
        assert_eq!(cfg.server.port, 9999);
        assert_eq!(cfg.timeout(), Duration::from_millis(250));
        // Unspecified fields keep their defaults
        assert_eq!(cfg.server.bind_address, "0.0.0.0");
        assert_eq!(cfg.logging.level, "info");
    }

    #[test]
    fn test_config_round_trips_through_toml() {
        let mut cfg = VotifierConfig::default();
        cfg.server.bind_address = "::1".to_string();
        cfg.server.expose_raw_input = true;
        cfg.keys.private_key_file = PathBuf::from("/etc/votifier/private.key");

        let toml_str = toml::to_string_pretty(&cfg).expect("serialize");
        let restored: VotifierConfig = toml::from_str(&toml_str).expect("deserialize");

        assert_eq!(cfg, restored);
    }

    #[test]
    fn test_invalid_toml_is_parse_error() {
        let dir = temp_dir();
        let path = dir.join("votifier.toml");
        std::fs::write(&path, "[[[ not valid toml").unwrap();

        let err = load_config(&path).unwrap_err();

        assert!(matches!(err, ConfigError::Parse(_)));
        assert_eq!(err.kind(), ErrorKind::ConfigFailure);
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_hostname_bind_address_is_rejected() {
        let mut cfg = VotifierConfig::default();
        cfg.server.bind_address = "votes.example.org".to_string();

        let err = cfg.listen_addr().unwrap_err();

        assert!(matches!(err, ConfigError::InvalidBindAddress(_)));
        assert_eq!(err.kind(), ErrorKind::ConfigFailure);
    }

    #[test]
    fn test_ipv6_bind_address() {
        let mut cfg = VotifierConfig::default();
        cfg.server.bind_address = "::".to_string();
        cfg.server.port = 8193;

        assert_eq!(cfg.listen_addr().unwrap().to_string(), "[::]:8193");
    }

    // ── Paths ─────────────────────────────────────────────────────────────────

    #[test]
    fn test_relative_key_paths_resolve_against_base_dir() {
        let cfg = VotifierConfig::default();
        let (public, private) = cfg.key_paths(Path::new("/srv/votifier"));
        assert_eq!(public, PathBuf::from("/srv/votifier/public.key"));
        assert_eq!(private, PathBuf::from("/srv/votifier/private.key"));
    }

    #[test]
    fn test_absolute_key_paths_are_kept() {
        let mut cfg = VotifierConfig::default();
        cfg.keys.public_key_file = std::env::temp_dir().join("abs.pub");

        let (public, _) = cfg.key_paths(Path::new("/srv/votifier"));

        assert_eq!(public, std::env::temp_dir().join("abs.pub"));
    }

    #[test]
    fn test_config_base_dir_of_bare_file_name_is_current_dir() {
        assert_eq!(config_base_dir(Path::new("votifier.toml")), PathBuf::from("."));
        assert_eq!(
            config_base_dir(Path::new("/etc/votifier/votifier.toml")),
            PathBuf::from("/etc/votifier")
        );
    }

    // ── Load / save ───────────────────────────────────────────────────────────

    #[test]
    fn test_load_missing_file_returns_defaults() {
        let dir = temp_dir();

        let cfg = load_config(&dir.join("absent.toml")).unwrap();

        assert_eq!(cfg, VotifierConfig::default());
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_save_then_load_round_trip() {
        // Arrange
        let dir = temp_dir();
        let path = dir.join("nested").join("votifier.toml");
        let mut cfg = VotifierConfig::default();
        cfg.server.port = 18192;

        // Act
        save_config(&path, &cfg).unwrap();
        let loaded = load_config(&path).unwrap();

        // Assert
        assert_eq!(loaded, cfg);
        std::fs::remove_dir_all(&dir).ok();
    }
}
