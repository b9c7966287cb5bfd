//! Relay settings, merged from several sources.
//!
//! Each setting is taken from the first source that provides it:
//! command line, environment (via clap's `env`), the `[server]` table of
//! `~/.config/rendezvous-relay/config.toml`, then the built-in default.

use std::path::{Path, PathBuf};
use std::time::Duration;

/// Errors that can occur when loading relay configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The configuration file exists but could not be read.
    #[error("failed to read config file {path}: {source}")]
    ReadFile {
        /// Path that was attempted.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// The configuration file is not valid TOML for this schema.
    #[error("failed to parse config file: {0}")]
    ParseToml(#[from] toml::de::Error),

    /// A value is out of its accepted range.
    #[error("invalid value for {field}: {reason}")]
    Invalid {
        /// Name of the offending setting.
        field: &'static str,
        /// Why it was rejected.
        reason: String,
    },
}

/// Settings that may appear in the `[server]` table. Absent keys fall through.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct ServerTable {
    bind_addr: Option<String>,
    max_message_size: Option<usize>,
    outbound_queue_size: Option<usize>,
    send_timeout_ms: Option<u64>,
}

#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct ConfigFile {
    server: ServerTable,
}

/// Command-line interface of the relay binary.
#[derive(clap::Parser, Debug, Default)]
#[command(version, about = "Rendezvous signaling relay")]
pub struct RelayCliArgs {
    /// Address to listen on.
    #[arg(short, long, env = "RENDEZVOUS_ADDR")]
    pub bind: Option<String>,

    /// Config file to use instead of `~/.config/rendezvous-relay/config.toml`.
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Largest inbound text message accepted, in bytes.
    #[arg(long)]
    pub max_message_size: Option<usize>,

    /// Number of outbound messages buffered per peer.
    #[arg(long)]
    pub outbound_queue_size: Option<usize>,

    /// How long a send may wait on a full peer queue, in milliseconds.
    #[arg(long)]
    pub send_timeout_ms: Option<u64>,

    /// Log filter used when `RUST_LOG` is unset.
    #[arg(long, default_value = "info", env = "RENDEZVOUS_LOG")]
    pub log_level: String,
}

/// Effective relay settings.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Listen address, e.g. `0.0.0.0:8080`.
    pub bind_addr: String,
    /// Largest inbound text message accepted, in bytes.
    pub max_message_size: usize,
    /// Capacity of each peer's outbound queue.
    pub outbound_queue_size: usize,
    /// How long a single send may wait on a full peer queue.
    pub send_timeout: Duration,
    /// Log filter string.
    pub log_level: String,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:8080".to_string(),
            max_message_size: 64 * 1024,
            outbound_queue_size: 256,
            send_timeout: Duration::from_secs(2),
            log_level: "info".to_string(),
        }
    }
}

impl RelayConfig {
    /// Builds the effective configuration for `cli`.
    ///
    /// An explicit `--config` file must exist. The default file is optional.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if a config file cannot be read or parsed, or
    /// if a resulting value is out of range.
    pub fn load(cli: &RelayCliArgs) -> Result<Self, ConfigError> {
        let file = match cli.config.as_deref() {
            Some(path) => read_config_file(path)?,
            None => match default_config_path() {
                Some(path) if path.exists() => read_config_file(&path)?,
                _ => ConfigFile::default(),
            },
        };
        Self::merge(cli, &file.server).validate()
    }

    fn merge(cli: &RelayCliArgs, table: &ServerTable) -> Self {
        let defaults = Self::default();
        Self {
            bind_addr: cli
                .bind
                .clone()
                .or_else(|| table.bind_addr.clone())
                .unwrap_or(defaults.bind_addr),
            max_message_size: cli
                .max_message_size
                .or(table.max_message_size)
                .unwrap_or(defaults.max_message_size),
            outbound_queue_size: cli
                .outbound_queue_size
                .or(table.outbound_queue_size)
                .unwrap_or(defaults.outbound_queue_size),
            send_timeout: cli
                .send_timeout_ms
                .or(table.send_timeout_ms)
                .map_or(defaults.send_timeout, Duration::from_millis),
            log_level: cli.log_level.clone(),
        }
    }

    fn validate(self) -> Result<Self, ConfigError> {
        let positive = [
            ("max_message_size", self.max_message_size == 0),
            ("outbound_queue_size", self.outbound_queue_size == 0),
            ("send_timeout_ms", self.send_timeout.is_zero()),
        ];
        if let Some((field, _)) = positive.into_iter().find(|(_, is_zero)| *is_zero) {
            return Err(ConfigError::Invalid {
                field,
                reason: "must be at least 1".to_string(),
            });
        }
        Ok(self)
    }
}

fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("rendezvous-relay").join("config.toml"))
}

fn read_config_file(path: &Path) -> Result<ConfigFile, ConfigError> {
    let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::ReadFile {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(toml::from_str(&contents)?)
}
