use clap::{Args, Parser, ValueEnum};
use ipnetwork::IpNetwork;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub mod jsonc;
pub mod settings;

pub use settings::Settings;

/// Settings documents probed, in order, when no explicit path is given.
pub const DEFAULT_SETTINGS_PATHS: [&str; 2] = ["smtp_config.jsonc", "smtp_config.json"];

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("config file not found in paths: {0:?}")]
    NotFound(Vec<PathBuf>),
    #[error("failed to read config file {path}: {source}")]
    Read { path: PathBuf, source: std::io::Error },
    #[error("failed to parse config file {path}: {source}")]
    Parse { path: PathBuf, source: serde_json::Error },
}

#[derive(Clone, Debug, Parser)]
#[command(version, about, long_about = None)]
pub struct Config {
    /// Path to the settings document (comments are allowed when the name ends in .jsonc)
    #[arg(long, env = "MAIL_GATEWAY_SETTINGS")]
    pub settings: Option<PathBuf>,

    /// Root directory for outcome records and debug dumps
    #[arg(long, env = "MAIL_GATEWAY_DATA_DIR", default_value = "data")]
    pub data_dir: PathBuf,

    #[command(flatten)]
    pub server: ServerConfig,

    #[command(flatten)]
    pub cleanup: CleanupConfig,

    #[command(flatten)]
    pub telemetry: TelemetryConfig,
}

#[derive(Clone, Debug, Args)]
pub struct ServerConfig {
    /// Host to listen on
    #[arg(long, env = "MAIL_GATEWAY_HOST", default_value = "0.0.0.0")]
    pub host: String,

    /// Port to listen on (overrides the `port` key of the settings document)
    #[arg(long, env = "MAIL_GATEWAY_PORT")]
    pub port: Option<u16>,

    /// Comma-separated list of CIDRs whose X-Real-IP / X-Forwarded-For headers are trusted
    #[arg(
        long,
        env = "MAIL_GATEWAY_TRUSTED_PROXIES",
        default_value = "10.0.0.0/8,172.16.0.0/12,192.168.0.0/16,127.0.0.1/32",
        value_delimiter = ','
    )]
    pub trusted_proxies: Vec<IpNetwork>,

    /// How long to wait for in-flight dispatches during shutdown
    #[arg(long, env = "MAIL_GATEWAY_SHUTDOWN_TIMEOUT_SECS", default_value_t = 30)]
    pub shutdown_timeout_secs: u64,
}

#[derive(Clone, Debug, Args)]
pub struct CleanupConfig {
    /// How often to sweep staged attachments
    #[arg(long = "cleanup-interval-secs", env = "MAIL_GATEWAY_CLEANUP_INTERVAL_SECS", default_value_t = 3600)]
    pub interval_secs: u64,

    /// Age after which staged attachments are deleted (0 keeps them forever)
    #[arg(
        long = "attachment-retention-hours",
        env = "MAIL_GATEWAY_ATTACHMENT_RETENTION_HOURS",
        default_value_t = 0
    )]
    pub retention_hours: u64,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Clone, Debug, Args)]
pub struct TelemetryConfig {
    /// Log output format
    #[arg(long, env = "MAIL_GATEWAY_LOG_FORMAT", value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,

    /// OTLP/HTTP collector endpoint; traces and metrics are only exported when set
    #[arg(long, env = "MAIL_GATEWAY_OTLP_ENDPOINT")]
    pub otlp_endpoint: Option<String>,
}

impl Config {
    #[must_use]
    pub fn load() -> Self {
        Self::parse()
    }

    /// Resolves the settings document to read: the explicit path if one was
    /// given, otherwise the first default name that exists.
    ///
    /// # Errors
    /// Returns `ConfigError::NotFound` if no candidate exists.
    pub fn settings_path(&self) -> Result<PathBuf, ConfigError> {
        if let Some(path) = &self.settings {
            return Ok(path.clone());
        }

        DEFAULT_SETTINGS_PATHS
            .iter()
            .map(Path::new)
            .find(|p| p.exists())
            .map(Path::to_path_buf)
            .ok_or_else(|| ConfigError::NotFound(DEFAULT_SETTINGS_PATHS.iter().map(PathBuf::from).collect()))
    }

    /// Loads the settings document named by [`Config::settings_path`].
    ///
    /// # Errors
    /// Returns a `ConfigError` if the file is missing, unreadable or malformed.
    pub fn load_settings(&self) -> Result<Settings, ConfigError> {
        Settings::load(&self.settings_path()?)
    }

    /// Listen port: the CLI/env override, else the settings document.
    #[must_use]
    pub fn listen_port(&self, settings: &Settings) -> u16 {
        self.server.port.unwrap_or(settings.port)
    }
}
