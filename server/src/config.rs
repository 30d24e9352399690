use clap::Parser;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::notify::DispatchSettings;

/// Consultation messaging server
///
/// Command-line layer. Only flags that were actually given are serialized,
/// so an unset flag never masks the TOML file or the environment.
#[derive(Parser, Serialize, Clone, Debug)]
#[command(name = "consult-server", version, about = "Consultation messaging server")]
pub struct Cli {
    /// Port to listen on [default: 5000]
    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,

    /// Bind address [default: 0.0.0.0]
    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bind_address: Option<String>,

    /// Path to TOML config file
    #[arg(long, default_value = "./consult.toml")]
    #[serde(skip)]
    pub config: String,

    /// Enable structured JSON logging (for Docker/production)
    #[arg(long)]
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub json_logs: bool,

    /// Output a commented TOML config template and exit
    #[arg(long)]
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub generate_config: bool,

    /// Data directory for the SQLite database [default: ./data]
    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_dir: Option<String>,
}

/// Resolved server configuration.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct Config {
    pub port: u16,
    pub bind_address: String,
    pub json_logs: bool,
    #[serde(default)]
    pub generate_config: bool,
    pub data_dir: String,

    /// Message store settings ([store] section)
    #[serde(default)]
    pub store: StoreConfig,

    /// Push notification settings ([notifications] section)
    #[serde(default)]
    pub notifications: NotificationsConfig,
}

/// Configuration for the message store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Upper bound on a single message write, in milliseconds (default: 5000)
    #[serde(default = "default_persist_timeout")]
    pub persist_timeout_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            persist_timeout_ms: default_persist_timeout(),
        }
    }
}

impl StoreConfig {
    pub fn persist_timeout(&self) -> Duration {
        Duration::from_millis(self.persist_timeout_ms)
    }
}

/// Configuration for the push notification dispatcher.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationsConfig {
    /// Concurrent provider calls (default: 4)
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Notifications buffered before new ones are dropped (default: 1024)
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// Timeout for one provider call, in milliseconds (default: 10000)
    #[serde(default = "default_send_timeout")]
    pub send_timeout_ms: u64,

    /// Extra attempts after a failed send (default: 0, no retry)
    #[serde(default)]
    pub max_retries: u32,

    /// Base delay between attempts, in milliseconds (default: 500)
    #[serde(default = "default_retry_backoff")]
    pub retry_backoff_ms: u64,

    /// HTTP endpoint that receives `{recipient_id, title, body}` as JSON.
    /// When unset, notifications are only logged.
    #[serde(default)]
    pub provider_url: Option<String>,
}

impl Default for NotificationsConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            queue_capacity: default_queue_capacity(),
            send_timeout_ms: default_send_timeout(),
            max_retries: 0,
            retry_backoff_ms: default_retry_backoff(),
            provider_url: None,
        }
    }
}

impl NotificationsConfig {
    pub fn dispatch_settings(&self) -> DispatchSettings {
        DispatchSettings {
            workers: self.workers,
            queue_capacity: self.queue_capacity,
            send_timeout: Duration::from_millis(self.send_timeout_ms),
            max_retries: self.max_retries,
            retry_backoff: Duration::from_millis(self.retry_backoff_ms),
        }
    }
}

fn default_persist_timeout() -> u64 {
    5000
}

fn default_workers() -> usize {
    4
}

fn default_queue_capacity() -> usize {
    1024
}

fn default_send_timeout() -> u64 {
    10_000
}

fn default_retry_backoff() -> u64 {
    500
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 5000,
            bind_address: "0.0.0.0".to_string(),
            json_logs: false,
            generate_config: false,
            data_dir: "./data".to_string(),
            store: StoreConfig::default(),
            notifications: NotificationsConfig::default(),
        }
    }
}

impl Config {
    /// Load config with layered precedence:
    /// built-in defaults < TOML file < env vars (CONSULT_*) < CLI args
    pub fn load() -> Result<Self, figment::Error> {
        Self::figment(&Cli::parse()).extract()
    }

    fn figment(cli: &Cli) -> Figment {
        Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::file(&cli.config))
            .merge(Env::prefixed("CONSULT_").split("__"))
            .merge(Serialized::defaults(cli))
    }
}

/// Generate a commented TOML config template
pub fn generate_config_template() -> String {
    r#"# Consultation Messaging Server Configuration
# Place this file at ./consult.toml or specify with --config <path>
# Settings can be overridden via environment variables (CONSULT_PORT,
# CONSULT_NOTIFICATIONS__WORKERS, etc.) or CLI flags (--port, etc.)

# Server port (default: 5000)
# port = 5000

# Bind address (default: 0.0.0.0, all interfaces)
# bind_address = "0.0.0.0"

# Enable structured JSON logging for Docker/production
# json_logs = false

# Data directory for the SQLite database
# data_dir = "./data"

# ---- Message Store ----
# [store]

# Upper bound on a single message write; slower writes are rolled back
# and reported to the sender as "Database error" (default: 5000)
# persist_timeout_ms = 5000

# ---- Push Notifications ----
# [notifications]

# Concurrent calls to the push provider (default: 4)
# workers = 4

# Pending notifications kept in memory; beyond this new ones are dropped (default: 1024)
# queue_capacity = 1024

# Timeout for one provider call (default: 10000)
# send_timeout_ms = 10000

# Retries after a failed send; 0 disables retrying (default: 0)
# max_retries = 0
# retry_backoff_ms = 500

# Endpoint receiving POST {"recipient_id", "title", "body"}.
# Leave unset to only log notifications.
# provider_url = "http://localhost:8081/push"
"#
    .to_string()
}
