//! Configuration structures for kstream.
//!
//! Configuration is loaded from TOML files and can be overridden via CLI flags.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Largest batch size the stream service accepts for a single fetch.
pub const MAX_BATCH_SIZE: usize = 10_000;

/// Region used when none is configured.
pub const DEFAULT_REGION: &str = "us-east-1";

/// Main configuration structure.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    /// Stream configuration
    pub stream: StreamConfig,

    /// Checkpoint configuration
    #[serde(default)]
    pub checkpoint: CheckpointConfig,

    /// Producer configuration
    #[serde(default)]
    pub producer: ProducerConfig,

    /// AWS client configuration
    #[serde(default)]
    pub aws: AwsConfig,

    /// Monitoring configuration
    #[serde(default)]
    pub monitoring: MonitoringConfig,
}

/// Stream read configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StreamConfig {
    /// Stream to read from or write to
    pub name: String,

    /// Records requested per fetch (a hint, at most `MAX_BATCH_SIZE`)
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Wall-clock budget for one consumer run, in minutes
    #[serde(default = "default_iteration_timeout_minutes")]
    pub iteration_timeout_minutes: u64,

    /// Empty-fetch retries before giving up
    #[serde(default = "default_retry_max_attempts")]
    pub retry_max_attempts: u32,

    /// Sleep between empty-fetch retries, in milliseconds
    #[serde(default = "default_retry_interval_ms")]
    pub retry_interval_ms: u64,
}

impl StreamConfig {
    /// Create a stream config with defaults for everything but the name.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            batch_size: default_batch_size(),
            iteration_timeout_minutes: default_iteration_timeout_minutes(),
            retry_max_attempts: default_retry_max_attempts(),
            retry_interval_ms: default_retry_interval_ms(),
        }
    }

    /// Iteration timeout as a duration.
    pub fn iteration_timeout(&self) -> Duration {
        Duration::from_secs(self.iteration_timeout_minutes * 60)
    }

    /// Retry interval as a duration.
    pub fn retry_interval(&self) -> Duration {
        Duration::from_millis(self.retry_interval_ms)
    }
}

/// Checkpoint configuration.
///
/// Checkpointing is all-or-nothing: when enabled, both the table name and
/// the logical process name must be set.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CheckpointConfig {
    /// Whether checkpointing is enabled
    #[serde(default)]
    pub enabled: bool,

    /// Lease table backing the checkpoints
    pub table_name: Option<String>,

    /// Namespace for checkpoint keys; changing it between runs loses resumability
    pub logical_name: Option<String>,

    /// Which run this is; the previous run's checkpoint is read on start
    #[serde(default)]
    pub iteration_number: u32,

    /// Minimum time between durable checkpoint writes, in milliseconds
    #[serde(default = "default_checkpoint_interval_ms")]
    pub interval_ms: u64,

    /// Read capacity used when the lease table is created
    #[serde(default = "default_read_capacity")]
    pub read_capacity: i64,

    /// Write capacity used when the lease table is created
    #[serde(default = "default_write_capacity")]
    pub write_capacity: i64,
}

impl CheckpointConfig {
    /// Checkpoint interval as a duration.
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

impl Default for CheckpointConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            table_name: None,
            logical_name: None,
            iteration_number: 0,
            interval_ms: default_checkpoint_interval_ms(),
            read_capacity: default_read_capacity(),
            write_capacity: default_write_capacity(),
        }
    }
}

/// Record producer configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProducerConfig {
    /// Fixed delay before retrying a throttled write, in milliseconds
    #[serde(default = "default_throttle_retry_ms")]
    pub throttle_retry_ms: u64,
}

impl ProducerConfig {
    /// Throttle retry delay as a duration.
    pub fn throttle_retry(&self) -> Duration {
        Duration::from_millis(self.throttle_retry_ms)
    }
}

impl Default for ProducerConfig {
    fn default() -> Self {
        Self {
            throttle_retry_ms: default_throttle_retry_ms(),
        }
    }
}

/// AWS client configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AwsConfig {
    /// Endpoint region
    #[serde(default = "default_region")]
    pub region: String,

    /// AWS access key ID
    pub access_key_id: Option<String>,

    /// AWS secret access key
    pub secret_access_key: Option<String>,

    /// Endpoint override (LocalStack, DynamoDB Local, ...)
    pub endpoint_url: Option<String>,
}

impl Default for AwsConfig {
    fn default() -> Self {
        Self {
            region: default_region(),
            access_key_id: None,
            secret_access_key: None,
            endpoint_url: None,
        }
    }
}

/// Monitoring configuration.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct MonitoringConfig {
    /// Log level
    #[serde(default)]
    pub log_level: LogLevel,

    /// Log format
    #[serde(default)]
    pub log_format: LogFormat,
}

/// Log level.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Trace level
    Trace,
    /// Debug level
    Debug,
    /// Info level (default)
    #[default]
    Info,
    /// Warn level
    Warn,
    /// Error level
    Error,
}

impl LogLevel {
    /// Directive string for an env filter.
    pub fn as_directive(&self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

/// Log format.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// JSON format (default)
    #[default]
    Json,
    /// Plain text format
    Text,
}

// Default value functions
fn default_batch_size() -> usize {
    1000
}
fn default_iteration_timeout_minutes() -> u64 {
    15
}
fn default_retry_max_attempts() -> u32 {
    3
}
fn default_retry_interval_ms() -> u64 {
    1000
}
fn default_checkpoint_interval_ms() -> u64 {
    60_000 // once a minute
}
fn default_read_capacity() -> i64 {
    50
}
fn default_write_capacity() -> i64 {
    10
}
fn default_throttle_retry_ms() -> u64 {
    10
}
fn default_region() -> String {
    DEFAULT_REGION.to_string()
}

impl Config {
    /// Create a config for a stream with every other section defaulted.
    pub fn for_stream(name: impl Into<String>) -> Self {
        Self {
            stream: StreamConfig::new(name),
            checkpoint: CheckpointConfig::default(),
            producer: ProducerConfig::default(),
            aws: AwsConfig::default(),
            monitoring: MonitoringConfig::default(),
        }
    }

    /// Load configuration from a TOML file.
    pub fn from_file(path: &std::path::Path) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> crate::Result<()> {
        if self.stream.name.is_empty() {
            return Err(crate::Error::Config("Stream name is required".into()));
        }

        if self.stream.batch_size == 0 || self.stream.batch_size > MAX_BATCH_SIZE {
            return Err(crate::Error::Config(format!(
                "Batch size must be between 1 and {}",
                MAX_BATCH_SIZE
            )));
        }

        if self.checkpoint.enabled {
            if is_blank(&self.checkpoint.table_name) {
                return Err(crate::Error::Config(
                    "Checkpoint table name is required when checkpointing is enabled".into(),
                ));
            }
            if is_blank(&self.checkpoint.logical_name) {
                return Err(crate::Error::Config(
                    "Logical name is required when checkpointing is enabled".into(),
                ));
            }
        }

        if self.aws.access_key_id.is_some() != self.aws.secret_access_key.is_some() {
            tracing::warn!(
                "Only one of access_key_id/secret_access_key is set, falling back to the default credential chain"
            );
        }

        Ok(())
    }
}

fn is_blank(value: &Option<String>) -> bool {
    value.as_deref().map_or(true, str::is_empty)
}
