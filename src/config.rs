//! Application configuration.
//!
//! Configuration is loaded from a TOML file at:
//! 1. the `--config` command-line argument
//! 2. `$MAILPEEK_CONFIG` (environment variable)
//! 3. `~/.config/mailpeek/config.toml` (Linux/macOS)
//!    `%APPDATA%\mailpeek\config.toml` (Windows)
//! 4. Built-in defaults

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{MailError, Result};

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// General behavior settings.
    pub general: GeneralConfig,
    /// Mail server and credentials.
    pub account: AccountConfig,
    /// Output settings.
    pub display: DisplayConfig,
    /// Limits and timeouts.
    pub performance: PerformanceConfig,
}

/// General behavior settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Override cache directory for logs.
    pub cache_dir: Option<PathBuf>,
    /// Log level: "error", "warn", "info", "debug", "trace".
    pub log_level: String,
}

/// Mail server identity and credential source.
///
/// Exactly one password source is used, checked in this order:
/// `onepassword_item`, `password_command`, `password_env`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AccountConfig {
    /// IMAP server host name.
    pub host: String,
    /// IMAP server port (implicit TLS).
    pub port: u16,
    /// Login name. May be empty when a 1Password item supplies it.
    pub username: String,
    /// Mailbox to select when none is given on the command line.
    pub mailbox: String,
    /// Environment variable holding the password.
    pub password_env: String,
    /// Command (program + args) whose first stdout line is the password.
    pub password_command: Vec<String>,
    /// 1Password item whose `username`/`password` fields are used.
    pub onepassword_item: Option<String>,
}

/// Output settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DisplayConfig {
    /// Body lines shown in the summary view.
    pub summary_lines: usize,
    /// View used when `--view` is not given: "summary", "headers", "body", "full".
    pub default_view: String,
    /// Messages shown by `list` when `--limit` is not given.
    pub list_limit: u32,
}

/// Limits and timeouts.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PerformanceConfig {
    /// Messages larger than this are staged to a temporary file before parsing.
    pub staging_threshold: usize,
    /// Largest literal the client will accept (default: 256 MB).
    pub max_literal_size: usize,
    /// TCP connect timeout in seconds.
    pub connect_timeout_secs: u64,
    /// Socket read timeout in seconds.
    pub read_timeout_secs: u64,
}

// ── Default implementations ─────────────────────────────────────

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            cache_dir: None,
            log_level: "warn".to_string(),
        }
    }
}

impl Default for AccountConfig {
    fn default() -> Self {
        Self {
            host: "imap.gmail.com".to_string(),
            port: 993,
            username: String::new(),
            mailbox: "INBOX".to_string(),
            password_env: "MAILPEEK_PASSWORD".to_string(),
            password_command: Vec::new(),
            onepassword_item: None,
        }
    }
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            summary_lines: 10,
            default_view: "summary".to_string(),
            list_limit: 20,
        }
    }
}

impl Default for PerformanceConfig {
    fn default() -> Self {
        Self {
            staging_threshold: 8 * 1024 * 1024,  // 8 MB
            max_literal_size: 256 * 1024 * 1024, // 256 MB
            connect_timeout_secs: 30,
            read_timeout_secs: 60,
        }
    }
}

// ── Load ────────────────────────────────────────────────────────

/// Load configuration from `explicit` or the standard locations.
///
/// A missing file means defaults. A file given explicitly that cannot be
/// read or parsed is an error; a broken file in a standard location is
/// logged and replaced by defaults.
pub fn load_config(explicit: Option<&Path>) -> Result<Config> {
    if let Some(path) = explicit {
        if !path.exists() {
            return Err(MailError::FileNotFound(path.to_path_buf()));
        }
        return read_config_file(path);
    }

    if let Some(path) = config_file_path() {
        if path.exists() {
            match read_config_file(&path) {
                Ok(cfg) => return Ok(cfg),
                Err(e) => {
                    tracing::warn!(
                        path = %path.display(),
                        error = %e,
                        "Failed to load config, using defaults"
                    );
                }
            }
        }
    }
    Ok(Config::default())
}

fn read_config_file(path: &Path) -> Result<Config> {
    let contents = std::fs::read_to_string(path).map_err(|e| MailError::io(path, e))?;
    let cfg = toml::from_str::<Config>(&contents)
        .map_err(|e| MailError::Config(format!("{}: {e}", path.display())))?;
    tracing::info!(path = %path.display(), "Loaded config");
    Ok(cfg)
}

/// Determine the config file path (checking env var first, then standard dirs).
pub fn config_file_path() -> Option<PathBuf> {
    if let Ok(env_path) = std::env::var("MAILPEEK_CONFIG") {
        return Some(PathBuf::from(env_path));
    }
    dirs::config_dir().map(|d| d.join("mailpeek").join("config.toml"))
}

/// Return the cache directory for logs.
pub fn cache_dir(config: &Config) -> PathBuf {
    if let Some(ref dir) = config.general.cache_dir {
        return dir.clone();
    }
    dirs::cache_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("mailpeek")
}
