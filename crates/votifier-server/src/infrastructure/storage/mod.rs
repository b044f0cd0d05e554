//! Storage infrastructure: configuration file persistence.
//!
//! Key files are handled by `votifier_core::keys`; this module only owns the
//! TOML configuration that points at them.

pub mod config;

pub use config::{load_config, save_config, ConfigError, VotifierConfig, DEFAULT_CONFIG_FILE};
