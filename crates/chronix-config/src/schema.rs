//! Configuration schema definitions.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

pub use chronix_core::{DispatcherConfig, WorkerConfig};

use crate::loader::ConfigLoader;

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub database: DatabaseConfig,

    #[serde(default)]
    pub dispatcher: DispatcherConfig,

    #[serde(default)]
    pub workers: WorkerConfig,

    #[serde(default)]
    pub reminder: ReminderConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// HTTP server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,
}

impl ServerConfig {
    /// `host:port` for binding.
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    3000
}

/// Task store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// SQLite database file. `~` is expanded.
    #[serde(default = "default_db_path")]
    pub path: String,

    /// Keep tasks in memory only; nothing survives a restart.
    #[serde(default)]
    pub in_memory: bool,
}

impl DatabaseConfig {
    /// Database path with `~` expanded.
    pub fn resolved_path(&self) -> PathBuf {
        PathBuf::from(ConfigLoader::expand_path(&self.path))
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
            in_memory: false,
        }
    }
}

fn default_db_path() -> String {
    "~/.chronix/chronix.db".to_string()
}

/// Reminder email configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReminderConfig {
    /// From address for reminder emails.
    #[serde(default = "default_sender")]
    pub sender: String,

    #[serde(default = "default_subject")]
    pub subject: String,

    /// SMTP relay. Without one, reminder emails are written to the log.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub smtp: Option<SmtpConfig>,
}

impl Default for ReminderConfig {
    fn default() -> Self {
        Self {
            sender: default_sender(),
            subject: default_subject(),
            smtp: None,
        }
    }
}

/// Outbound SMTP relay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SmtpConfig {
    pub host: String,

    #[serde(default = "default_smtp_port")]
    pub port: u16,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,

    /// Typically supplied through `${SMTP_PASSWORD}`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,

    /// Upgrade the connection with STARTTLS. Disable only for local relays.
    #[serde(default = "default_starttls")]
    pub starttls: bool,
}

fn default_smtp_port() -> u16 {
    587
}

fn default_starttls() -> bool {
    true
}

fn default_sender() -> String {
    "reminders@chronix.local".to_string()
}

fn default_subject() -> String {
    "Reminder".to_string()
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter directive; `RUST_LOG` takes precedence.
    #[serde(default = "default_level")]
    pub level: String,

    /// Emit JSON lines on the console.
    #[serde(default)]
    pub json: bool,

    /// Directory for daily log files. Defaults to `~/.chronix/logs`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub directory: Option<String>,
}

impl LoggingConfig {
    /// Log directory with `~` expanded.
    pub fn resolved_directory(&self) -> PathBuf {
        match &self.directory {
            Some(dir) => PathBuf::from(ConfigLoader::expand_path(dir)),
            None => ConfigLoader::chronix_dir().join("logs"),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
            json: false,
            directory: None,
        }
    }
}

fn default_level() -> String {
    "info".to_string()
}
