//! Configuration management for the WebShell daemon.
//!
//! This module provides TOML-based configuration file loading and saving.
//! The default configuration path is `~/.config/webshell/config.toml`.
//! A handful of environment variables override file values at startup.

use std::collections::BTreeMap;
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Default listen address.
pub const DEFAULT_BIND: &str = "127.0.0.1:8080";

/// Default upgrade endpoint path.
pub const DEFAULT_WS_PATH: &str = "/ws";

/// Origin allowed when none is configured.
pub const DEFAULT_ALLOWED_ORIGIN: &str = "http://localhost";

/// Largest accepted outbound read buffer.
pub const MAX_READ_BUFFER_SIZE: usize = 1024 * 1024;

/// Configuration validation errors.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("bind must be a socket address such as 127.0.0.1:8080, got {0}")]
    InvalidBindAddress(String),

    #[error("path must start with '/', got {0}")]
    InvalidPath(String),

    #[error("default_shell not found: {0}")]
    InvalidShellPath(String),

    #[error("read_buffer_size must be between 1 and {max}, got {0}", max = MAX_READ_BUFFER_SIZE)]
    InvalidReadBufferSize(usize),

    #[error("terminal size must be non-zero, got {cols}x{rows}")]
    InvalidTerminalSize { cols: u16, rows: u16 },

    #[error("allowed_origins is empty and allow_all_origins is false; no client could connect")]
    EmptyOriginList,

    #[error("log_level must be one of: trace, debug, info, warn, error; got {0}")]
    InvalidLogLevel(String),
}

/// Valid log level values for tracing configuration.
const VALID_LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

/// Main configuration structure for the WebShell daemon.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    /// General daemon configuration.
    pub daemon: DaemonConfig,

    /// Listener configuration.
    pub server: ServerConfig,

    /// Shell process configuration.
    pub session: SessionConfig,

    /// Origin policy.
    pub security: SecurityConfig,
}

/// General daemon configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DaemonConfig {
    /// Logging level (trace, debug, info, warn, error).
    pub log_level: String,
}

/// Listener configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServerConfig {
    /// Address to listen on.
    pub bind: String,

    /// HTTP path that accepts WebSocket upgrades.
    pub path: String,
}

/// Shell process configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SessionConfig {
    /// Shell to spawn for each connection.
    pub default_shell: String,

    /// Arguments passed to the shell.
    pub shell_args: Vec<String>,

    /// Value of `TERM` in the shell's environment.
    pub term: String,

    /// Initial terminal width.
    pub cols: u16,

    /// Initial terminal height.
    pub rows: u16,

    /// Bytes read from the terminal per outbound message.
    pub read_buffer_size: usize,

    /// Extra environment variables for the shell.
    pub env: BTreeMap<String, String>,
}

/// Origin policy settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SecurityConfig {
    /// Exact `Origin` header values allowed to connect.
    pub allowed_origins: Vec<String>,

    /// Accept any origin, including requests without an `Origin` header.
    pub allow_all_origins: bool,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: DEFAULT_BIND.to_string(),
            path: DEFAULT_WS_PATH.to_string(),
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            default_shell: default_shell(),
            shell_args: Vec::new(),
            term: "xterm-256color".to_string(),
            cols: 80,
            rows: 24,
            read_buffer_size: bridge::DEFAULT_READ_BUFFER_SIZE,
            env: BTreeMap::new(),
        }
    }
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            allowed_origins: vec![DEFAULT_ALLOWED_ORIGIN.to_string()],
            allow_all_origins: false,
        }
    }
}

/// Returns the default configuration file path.
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("webshell")
        .join("config.toml")
}

/// Returns the default shell for the current platform.
fn default_shell() -> String {
    if cfg!(windows) {
        "powershell.exe".to_string()
    } else {
        std::env::var("SHELL").unwrap_or_else(|_| "/bin/sh".to_string())
    }
}

/// Splits a comma-separated origin list, dropping blanks.
pub fn parse_origin_list(list: &str) -> Vec<String> {
    list.split(',')
        .map(str::trim)
        .filter(|origin| !origin.is_empty())
        .map(str::to_string)
        .collect()
}

/// A config value taken from the environment instead of the file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvOverride {
    /// Variable the value came from.
    pub var: &'static str,
    /// Config key it replaced.
    pub key: &'static str,
    pub value: String,
}

impl EnvOverride {
    fn new(var: &'static str, key: &'static str, value: String) -> Self {
        Self { var, key, value }
    }
}

impl SecurityConfig {
    /// Replaces the origin settings from a comma-separated list.
    ///
    /// A list consisting of `*` alone selects the allow-all policy.
    pub fn set_origins_from_list(&mut self, list: &str) {
        let origins = parse_origin_list(list);
        if origins.len() == 1 && origins[0] == "*" {
            self.allow_all_origins = true;
            self.allowed_origins.clear();
        } else {
            self.allow_all_origins = false;
            self.allowed_origins = origins;
        }
    }
}

impl Config {
    /// Apply environment variable overrides to the configuration.
    ///
    /// Environment variables take precedence over config file values.
    /// Empty values are ignored. Supported variables:
    /// - ALLOWED_ORIGINS: Comma-separated origin allow-list (`*` for any)
    /// - SHELL_COMMAND: Shell to spawn for each session
    /// - WEBSHELL_BIND: Listen address
    /// - WEBSHELL_LOG_LEVEL: Override log level (trace, debug, info, warn, error)
    ///
    /// Returns the overrides that were applied. This runs before logging is
    /// set up (the log level itself can be overridden), so reporting them is
    /// left to the caller.
    pub fn apply_env_overrides(&mut self) -> Vec<EnvOverride> {
        let mut applied = Vec::new();

        if let Some(origins) = non_empty_env("ALLOWED_ORIGINS") {
            self.security.set_origins_from_list(&origins);
            applied.push(EnvOverride::new("ALLOWED_ORIGINS", "allowed_origins", origins));
        }

        if let Some(shell) = non_empty_env("SHELL_COMMAND") {
            self.session.default_shell = shell.clone();
            applied.push(EnvOverride::new("SHELL_COMMAND", "default_shell", shell));
        }

        if let Some(bind) = non_empty_env("WEBSHELL_BIND") {
            self.server.bind = bind.clone();
            applied.push(EnvOverride::new("WEBSHELL_BIND", "bind", bind));
        }

        if let Some(level) = non_empty_env("WEBSHELL_LOG_LEVEL") {
            self.daemon.log_level = level.clone();
            applied.push(EnvOverride::new("WEBSHELL_LOG_LEVEL", "log_level", level));
        }

        applied
    }

    /// Validate the configuration values.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.bind.parse::<SocketAddr>().is_err() {
            return Err(ConfigError::InvalidBindAddress(self.server.bind.clone()));
        }

        if !self.server.path.starts_with('/') {
            return Err(ConfigError::InvalidPath(self.server.path.clone()));
        }

        let shell_path = Path::new(&self.session.default_shell);
        let shell_found = if shell_path.is_absolute() {
            shell_path.exists()
        } else {
            which::which(&self.session.default_shell).is_ok()
        };
        if !shell_found {
            return Err(ConfigError::InvalidShellPath(
                self.session.default_shell.clone(),
            ));
        }

        let size = self.session.read_buffer_size;
        if size == 0 || size > MAX_READ_BUFFER_SIZE {
            return Err(ConfigError::InvalidReadBufferSize(size));
        }

        if self.session.cols == 0 || self.session.rows == 0 {
            return Err(ConfigError::InvalidTerminalSize {
                cols: self.session.cols,
                rows: self.session.rows,
            });
        }

        if !self.security.allow_all_origins && self.security.allowed_origins.is_empty() {
            return Err(ConfigError::EmptyOriginList);
        }

        let level = self.daemon.log_level.to_lowercase();
        if !VALID_LOG_LEVELS.contains(&level.as_str()) {
            return Err(ConfigError::InvalidLogLevel(self.daemon.log_level.clone()));
        }

        Ok(())
    }

    /// Returns the listen address. Call after `validate`.
    pub fn bind_addr(&self) -> Result<SocketAddr> {
        self.server
            .bind
            .parse()
            .with_context(|| format!("Invalid bind address: {}", self.server.bind))
    }

    /// Load configuration from a file.
    ///
    /// If the file does not exist, returns the default configuration.
    /// If the file exists but is invalid TOML, returns an error with
    /// a helpful message.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            tracing::debug!("Config file not found at {:?}, using defaults", path);
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
        toml::from_str(toml_str)
            .map_err(|e| anyhow::anyhow!("Invalid TOML configuration: {}", format_toml_error(&e)))
    }

    /// Save configuration to a file.
    ///
    /// Creates parent directories if they don't exist.
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

        tracing::debug!("Configuration saved to {:?}", path);
        Ok(())
    }

    /// Serialize configuration to a TOML string.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to serialize configuration to TOML")
    }
}

fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|value| !value.is_empty())
}

/// Format a TOML deserialization error for user-friendly display.
fn format_toml_error(error: &toml::de::Error) -> String {
    let mut msg = error.message().to_string();

    if let Some(span) = error.span() {
        msg.push_str(&format!(" (at position {}..{})", span.start, span.end));
    }

    msg
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use tempfile::TempDir;

    const ENV_VARS: &[&str] = &[
        "ALLOWED_ORIGINS",
        "SHELL_COMMAND",
        "WEBSHELL_BIND",
        "WEBSHELL_LOG_LEVEL",
    ];

    fn clear_env() {
        for key in ENV_VARS {
            std::env::remove_var(key);
        }
    }

    fn valid_config() -> Config {
        let mut config = Config::default();
        config.session.default_shell = "/bin/sh".to_string();
        config
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();

        assert_eq!(config.daemon.log_level, "info");
        assert_eq!(config.server.bind, "127.0.0.1:8080");
        assert_eq!(config.server.path, "/ws");
        assert_eq!(config.session.read_buffer_size, 1024);
        assert_eq!((config.session.cols, config.session.rows), (80, 24));
        assert_eq!(config.session.term, "xterm-256color");
        assert_eq!(config.security.allowed_origins, vec!["http://localhost"]);
        assert!(!config.security.allow_all_origins);
    }

    #[test]
    fn test_default_shell() {
        let config = SessionConfig::default();
        assert!(!config.default_shell.is_empty());
        assert!(config.shell_args.is_empty());
        assert!(config.env.is_empty());
    }

    #[test]
    fn test_from_toml_empty() {
        let config = Config::from_toml("").unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_from_toml_partial() {
        let toml = r#"
[daemon]
log_level = "debug"

[server]
bind = "0.0.0.0:9000"
"#;
        let config = Config::from_toml(toml).unwrap();

        assert_eq!(config.daemon.log_level, "debug");
        assert_eq!(config.server.bind, "0.0.0.0:9000");
        assert_eq!(config.server.path, "/ws");
        assert_eq!(config.security.allowed_origins, vec!["http://localhost"]);
    }

    #[test]
    fn test_from_toml_full() {
        let toml = r#"
[daemon]
log_level = "trace"

[server]
bind = "0.0.0.0:8443"
path = "/terminal"

[session]
default_shell = "/bin/zsh"
shell_args = ["-l"]
term = "xterm"
cols = 132
rows = 43
read_buffer_size = 4096

[session.env]
LANG = "C.UTF-8"

[security]
allowed_origins = ["https://term.example.com", "http://localhost:3000"]
allow_all_origins = false
"#;
        let config = Config::from_toml(toml).unwrap();

        assert_eq!(config.daemon.log_level, "trace");
        assert_eq!(config.server.bind, "0.0.0.0:8443");
        assert_eq!(config.server.path, "/terminal");
        assert_eq!(config.session.default_shell, "/bin/zsh");
        assert_eq!(config.session.shell_args, vec!["-l"]);
        assert_eq!(config.session.term, "xterm");
        assert_eq!((config.session.cols, config.session.rows), (132, 43));
        assert_eq!(config.session.read_buffer_size, 4096);
        assert_eq!(config.session.env.get("LANG").map(String::as_str), Some("C.UTF-8"));
        assert_eq!(
            config.security.allowed_origins,
            vec!["https://term.example.com", "http://localhost:3000"]
        );
    }

    #[test]
    fn test_from_toml_invalid_syntax() {
        let toml = r#"
[daemon
log_level = "debug"
"#;
        let result = Config::from_toml(toml);
        assert!(result.is_err());
        let err = result.unwrap_err().to_string();
        assert!(err.contains("Invalid TOML"));
    }

    #[test]
    fn test_from_toml_wrong_type() {
        let toml = r#"
[session]
cols = "wide"
"#;
        assert!(Config::from_toml(toml).is_err());
    }

    #[test]
    fn test_unknown_fields_ignored() {
        let toml = r#"
[server]
bind = "127.0.0.1:1234"
tls = true
"#;
        let config = Config::from_toml(toml).unwrap();
        assert_eq!(config.server.bind, "127.0.0.1:1234");
    }

    #[test]
    fn test_roundtrip_custom() {
        let mut original = Config::default();
        original.daemon.log_level = "warn".to_string();
        original.server.path = "/pty".to_string();
        original.session.env.insert("FOO".to_string(), "bar".to_string());
        original.security.allow_all_origins = true;

        let loaded = Config::from_toml(&original.to_toml().unwrap()).unwrap();
        assert_eq!(original, loaded);
    }

    #[test]
    fn test_load_missing_file() {
        let config = Config::load("/nonexistent/path/config.toml").unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_save_and_load() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("nested").join("config.toml");

        let mut config = Config::default();
        config.server.bind = "127.0.0.1:7777".to_string();
        config.save(&path).unwrap();

        assert!(path.exists());
        let loaded = Config::load(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_load_invalid_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("config.toml");
        fs::write(&path, "this is not [valid toml").unwrap();

        let err = Config::load(&path).unwrap_err();
        assert!(format!("{:#}", err).contains("Failed to parse config file"));
    }

    #[test]
    fn test_default_config_path() {
        let path = default_config_path();
        assert!(path.ends_with("webshell/config.toml"));
    }

    #[test]
    fn test_parse_origin_list() {
        assert_eq!(
            parse_origin_list("http://a.test, https://b.test ,,"),
            vec!["http://a.test", "https://b.test"]
        );
        assert!(parse_origin_list(" , ").is_empty());
    }

    #[test]
    fn test_set_origins_wildcard() {
        let mut security = SecurityConfig::default();
        security.set_origins_from_list("*");
        assert!(security.allow_all_origins);
        assert!(security.allowed_origins.is_empty());

        security.set_origins_from_list("http://x.test");
        assert!(!security.allow_all_origins);
        assert_eq!(security.allowed_origins, vec!["http://x.test"]);
    }

    #[test]
    #[serial]
    fn test_env_override_allowed_origins() {
        clear_env();
        std::env::set_var("ALLOWED_ORIGINS", "http://localhost:3000,https://app.test");

        let mut config = Config::default();
        config.apply_env_overrides();

        assert_eq!(
            config.security.allowed_origins,
            vec!["http://localhost:3000", "https://app.test"]
        );
        clear_env();
    }

    #[test]
    #[serial]
    fn test_env_override_shell_and_bind() {
        clear_env();
        std::env::set_var("SHELL_COMMAND", "/bin/sh");
        std::env::set_var("WEBSHELL_BIND", "0.0.0.0:9999");

        let mut config = Config::default();
        let applied = config.apply_env_overrides();

        assert_eq!(config.session.default_shell, "/bin/sh");
        assert_eq!(config.server.bind, "0.0.0.0:9999");
        let vars: Vec<_> = applied.iter().map(|o| o.var).collect();
        assert_eq!(vars, vec!["SHELL_COMMAND", "WEBSHELL_BIND"]);
        clear_env();
    }

    #[test]
    #[serial]
    fn test_env_override_log_level() {
        clear_env();
        std::env::set_var("WEBSHELL_LOG_LEVEL", "debug");

        let mut config = Config::default();
        let applied = config.apply_env_overrides();

        assert_eq!(config.daemon.log_level, "debug");
        assert_eq!(
            applied,
            vec![EnvOverride::new("WEBSHELL_LOG_LEVEL", "log_level", "debug".to_string())]
        );
        clear_env();
    }

    #[test]
    #[serial]
    fn test_env_override_empty_does_not_override() {
        clear_env();
        std::env::set_var("ALLOWED_ORIGINS", "");
        std::env::set_var("SHELL_COMMAND", "");

        let mut config = Config::default();
        let original = config.clone();
        config.apply_env_overrides();

        assert_eq!(config, original);
        clear_env();
    }

    #[test]
    #[serial]
    fn test_env_override_unset_does_not_override() {
        clear_env();

        let mut config = Config::default();
        let original = config.clone();
        let applied = config.apply_env_overrides();

        assert_eq!(config, original);
        assert!(applied.is_empty());
    }

    #[test]
    fn test_validate_default_values() {
        assert!(valid_config().validate().is_ok());
    }

    #[test]
    fn test_validate_bind_address() {
        let mut config = valid_config();
        config.server.bind = "localhost".to_string();
        assert_eq!(
            config.validate(),
            Err(ConfigError::InvalidBindAddress("localhost".to_string()))
        );
    }

    #[test]
    fn test_validate_path() {
        let mut config = valid_config();
        config.server.path = "ws".to_string();
        assert_eq!(
            config.validate(),
            Err(ConfigError::InvalidPath("ws".to_string()))
        );
    }

    #[test]
    fn test_validate_shell_missing() {
        let mut config = valid_config();
        config.session.default_shell = "/nonexistent/shell".to_string();
        assert_eq!(
            config.validate(),
            Err(ConfigError::InvalidShellPath("/nonexistent/shell".to_string()))
        );

        config.session.default_shell = "definitely-not-a-real-shell-xyz".to_string();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidShellPath(_))
        ));
    }

    #[test]
    fn test_validate_shell_in_path() {
        let mut config = valid_config();
        config.session.default_shell = "sh".to_string();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_read_buffer_bounds() {
        let mut config = valid_config();
        config.session.read_buffer_size = 0;
        assert_eq!(config.validate(), Err(ConfigError::InvalidReadBufferSize(0)));

        config.session.read_buffer_size = MAX_READ_BUFFER_SIZE + 1;
        assert!(config.validate().is_err());

        config.session.read_buffer_size = MAX_READ_BUFFER_SIZE;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_terminal_size() {
        let mut config = valid_config();
        config.session.rows = 0;
        assert_eq!(
            config.validate(),
            Err(ConfigError::InvalidTerminalSize { cols: 80, rows: 0 })
        );
    }

    #[test]
    fn test_validate_empty_origins() {
        let mut config = valid_config();
        config.security.allowed_origins.clear();
        assert_eq!(config.validate(), Err(ConfigError::EmptyOriginList));

        config.security.allow_all_origins = true;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_log_level() {
        let mut config = valid_config();
        config.daemon.log_level = "verbose".to_string();
        assert_eq!(
            config.validate(),
            Err(ConfigError::InvalidLogLevel("verbose".to_string()))
        );

        config.daemon.log_level = "DEBUG".to_string();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_bind_addr() {
        let config = valid_config();
        let addr = config.bind_addr().unwrap();
        assert_eq!(addr.port(), 8080);
    }
}
