//! Harness configuration.
//!
//! Settings come from built-in defaults, then JSON (the `OPCUA_HARNESS_CONFIG`
//! environment variable or a `--settings` file), then command-line flags.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::transport::MAX_LINE_LENGTH;

/// Environment variable holding JSON settings.
pub const CONFIG_ENV: &str = "OPCUA_HARNESS_CONFIG";

/// Top-level configuration for the harness.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// How to start the OPC UA server.
    #[serde(default)]
    pub server: ServerConfig,

    /// Line channel limits.
    #[serde(default)]
    pub channel: ChannelConfig,
}

/// OPC UA server launch settings.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Server configuration file handed to the runtime's `start`.
    #[serde(default = "default_config_path")]
    pub config_path: PathBuf,

    /// Server executable. Without one the server cannot be started.
    #[serde(default)]
    pub exec: Option<String>,

    /// Extra arguments passed before the configuration path.
    #[serde(default)]
    pub args: Vec<String>,

    /// How long the server must stay up before it counts as started.
    #[serde(default = "default_startup_grace_ms")]
    pub startup_grace_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            config_path: default_config_path(),
            exec: None,
            args: Vec::new(),
            startup_grace_ms: default_startup_grace_ms(),
        }
    }
}

impl ServerConfig {
    pub const fn startup_grace(&self) -> Duration {
        Duration::from_millis(self.startup_grace_ms)
    }
}

/// Line channel settings.
#[derive(Debug, Clone, Deserialize)]
pub struct ChannelConfig {
    /// Longest accepted inbound line, in bytes.
    #[serde(default = "default_max_line_length")]
    pub max_line_length: usize,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            max_line_length: default_max_line_length(),
        }
    }
}

fn default_config_path() -> PathBuf {
    PathBuf::from("test-server").join("server.conf")
}

const fn default_startup_grace_ms() -> u64 {
    500
}

const fn default_max_line_length() -> usize {
    MAX_LINE_LENGTH
}

impl Config {
    /// Load configuration from the `OPCUA_HARNESS_CONFIG` environment variable.
    ///
    /// Falls back to defaults when the variable is not set.
    pub fn from_env() -> Result<Self> {
        match std::env::var(CONFIG_ENV) {
            Ok(json) => serde_json::from_str(&json)
                .with_context(|| format!("Failed to parse {CONFIG_ENV}")),
            Err(_) => Ok(Self::default()),
        }
    }

    /// Load configuration from a JSON file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read settings file {}", path.display()))?;
        serde_json::from_str(&json)
            .with_context(|| format!("Failed to parse settings file {}", path.display()))
    }

    /// Resolve the server configuration path to an absolute path.
    ///
    /// Relative paths are taken from the current directory.
    pub fn resolved_config_path(&self) -> PathBuf {
        let path = &self.server.config_path;
        if path.is_absolute() {
            path.clone()
        } else {
            std::env::current_dir().unwrap_or_default().join(path)
        }
    }

    /// Create a config from a JSON string (for testing).
    #[cfg(test)]
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json).context("Failed to parse JSON")?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = Config::default();
        assert_eq!(config.server.config_path, Path::new("test-server/server.conf"));
        assert!(config.server.exec.is_none());
        assert!(config.server.args.is_empty());
        assert_eq!(config.server.startup_grace(), Duration::from_millis(500));
        assert_eq!(config.channel.max_line_length, MAX_LINE_LENGTH);
    }

    #[test]
    fn parse_full_settings() {
        let json = r#"{
            "server": {
                "config_path": "/etc/opcua/test-server.conf",
                "exec": "/opt/opcua/bin/test-server",
                "args": ["--verbose"],
                "startup_grace_ms": 2000
            },
            "channel": {
                "max_line_length": 4096
            }
        }"#;

        let config = Config::from_json(json).unwrap();
        assert_eq!(
            config.server.config_path,
            PathBuf::from("/etc/opcua/test-server.conf")
        );
        assert_eq!(config.server.exec.as_deref(), Some("/opt/opcua/bin/test-server"));
        assert_eq!(config.server.args, vec!["--verbose"]);
        assert_eq!(config.server.startup_grace(), Duration::from_secs(2));
        assert_eq!(config.channel.max_line_length, 4096);
    }

    #[test]
    fn parse_partial_settings_applies_defaults() {
        let config = Config::from_json(r#"{"server": {"exec": "/bin/true"}}"#).unwrap();
        assert_eq!(config.server.exec.as_deref(), Some("/bin/true"));
        assert_eq!(config.server.startup_grace_ms, 500);
        assert_eq!(config.server.config_path, Path::new("test-server/server.conf"));
        assert_eq!(config.channel.max_line_length, MAX_LINE_LENGTH);

        let config = Config::from_json("{}").unwrap();
        assert!(config.server.exec.is_none());
    }

    #[test]
    fn from_file_reads_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("harness.json");
        std::fs::write(&path, r#"{"server": {"startup_grace_ms": 10}}"#).unwrap();

        let config = Config::from_file(&path).unwrap();
        assert_eq!(config.server.startup_grace_ms, 10);
    }

    #[test]
    fn from_file_missing_or_invalid() {
        let dir = tempfile::tempdir().unwrap();
        assert!(Config::from_file(&dir.path().join("missing.json")).is_err());

        let path = dir.path().join("bad.json");
        std::fs::write(&path, "{ not json").unwrap();
        let err = Config::from_file(&path).unwrap_err();
        assert!(err.to_string().contains("Failed to parse settings file"));
    }

    #[test]
    fn resolved_config_path_absolute() {
        let config =
            Config::from_json(r#"{"server": {"config_path": "/srv/opcua/server.conf"}}"#).unwrap();
        assert_eq!(
            config.resolved_config_path(),
            PathBuf::from("/srv/opcua/server.conf")
        );
    }

    #[test]
    fn resolved_config_path_relative() {
        let config = Config::default();
        let resolved = config.resolved_config_path();
        assert!(resolved.is_absolute());
        assert!(resolved.ends_with("test-server/server.conf"));
    }
}
