//! Layered runtime configuration.
//!
//! Values are read from an optional TOML file and then overridden by
//! `CHANGESYNC_`-prefixed environment variables. Nested keys use a double
//! underscore, e.g. `CHANGESYNC_QUEUE__HOST=redis.internal` or
//! `CHANGESYNC_WORKER__FLUSH=batched`.
//!
//! ```toml
//! [server]
//! bind = "0.0.0.0:5000"
//!
//! [queue]
//! backend = "redis"
//! host = "redis"
//! port = 6379
//! key = "pr_queue"
//!
//! [worker]
//! poll_timeout_ms = 1000
//! idle_sleep_ms = 1000
//! flush = "every_event"
//!
//! [github]
//! token = "ghp_..."
//! ```

use std::net::SocketAddr;
use std::num::NonZeroUsize;
use std::path::Path;
use std::time::Duration;

use config::builder::DefaultState;
use config::{ConfigBuilder, Environment, File};
use github::GitHubConfig;
use listener::RedisQueueConfig;
use pipeline::Backoff;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use stages::{FlushPolicy, IngestionConfig, WorkerConfig};
use thiserror::Error;

/// File searched for when `--config` is not given (any supported extension).
const DEFAULT_CONFIG_NAME: &str = "changesync";

/// Prefix for environment variable overrides.
const ENV_PREFIX: &str = "CHANGESYNC";

/// Separator for nested keys in environment variables.
const ENV_SEPARATOR: &str = "__";

/// Errors raised while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A source could not be read or the merged result could not be deserialized.
    #[error("failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    /// The configuration was read but violates a constraint.
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Which [`pipeline::EventQueue`] implementation to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueBackend {
    /// Redis list; receiver and worker may run as separate processes.
    Redis,
    /// In-process queue; only usable when receiver and worker share a process.
    Memory,
}

/// Flush cadence as written in configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlushMode {
    /// Flush after every event.
    EveryEvent,
    /// Flush after `batch_max_events` events or when the queue drains.
    Batched,
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    /// JSON structured logs (for production).
    Json,
    /// Pretty-printed logs (for development).
    Pretty,
}

/// HTTP receiver settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    /// Address the webhook receiver binds to.
    pub bind: SocketAddr,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from(([0, 0, 0, 0], 5000)),
        }
    }
}

/// Queue broker settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct QueueSettings {
    /// Queue implementation.
    pub backend: QueueBackend,
    /// Broker host.
    pub host: String,
    /// Broker port.
    pub port: u16,
    /// List key.
    pub key: String,
    /// ACL user name.
    pub username: Option<String>,
    /// ACL password.
    pub password: Option<SecretString>,
    /// Connections used for pushes.
    pub pool_size: usize,
    /// Upper bound on any single broker command.
    pub command_timeout_secs: u64,
}

impl Default for QueueSettings {
    fn default() -> Self {
        let redis = RedisQueueConfig::default();
        Self {
            backend: QueueBackend::Redis,
            host: redis.host,
            port: redis.port,
            key: redis.key,
            username: None,
            password: None,
            pool_size: redis.pool_size,
            command_timeout_secs: redis.command_timeout.as_secs(),
        }
    }
}

/// Consolidation worker settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WorkerSettings {
    /// How long one pop waits.
    pub poll_timeout_ms: u64,
    /// Pause after an empty poll.
    pub idle_sleep_ms: u64,
    /// Flush cadence.
    pub flush: FlushMode,
    /// Batch size when `flush = "batched"`.
    pub batch_max_events: usize,
    /// Longest pause between retries while the queue is unavailable.
    pub max_error_backoff_secs: u64,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            poll_timeout_ms: 1_000,
            idle_sleep_ms: 1_000,
            flush: FlushMode::EveryEvent,
            batch_max_events: 50,
            max_error_backoff_secs: 30,
        }
    }
}

/// GitHub API settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GitHubSettings {
    /// REST API base URL (GitHub Enterprise: `https://host/api/v3`).
    pub api_url: String,
    /// Token used for the changed-files lookup.
    pub token: Option<SecretString>,
    /// Per-request timeout.
    pub timeout_secs: u64,
}

impl Default for GitHubSettings {
    fn default() -> Self {
        let defaults = GitHubConfig::default();
        Self {
            api_url: defaults.api_url,
            token: None,
            timeout_secs: defaults.request_timeout.as_secs(),
        }
    }
}

/// Ingestion endpoint settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct IngestionSettings {
    /// Upper bound on the whole changed-files lookup (all pages).
    pub lookup_timeout_secs: u64,
    /// Queue push attempts per accepted notification.
    pub push_attempts: u32,
}

impl Default for IngestionSettings {
    fn default() -> Self {
        let defaults = IngestionConfig::default();
        Self {
            lookup_timeout_secs: defaults.lookup_timeout.as_secs(),
            push_attempts: defaults.push_attempts,
        }
    }
}

/// Logging and tracing settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TelemetrySettings {
    /// Log line format.
    pub format: LogFormat,
    /// OTLP gRPC collector endpoint; spans are exported only when set.
    pub otlp_endpoint: Option<String>,
}

impl Default for TelemetrySettings {
    fn default() -> Self {
        Self {
            format: LogFormat::Json,
            otlp_endpoint: None,
        }
    }
}

/// The complete runtime configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// `[server]`: webhook receiver bind address.
    pub server: ServerSettings,
    /// `[queue]`: broker backend and connection.
    pub queue: QueueSettings,
    /// `[worker]`: poll cadence and flush policy.
    pub worker: WorkerSettings,
    /// `[github]`: changed-files lookup client.
    pub github: GitHubSettings,
    /// `[ingestion]`: lookup timeout and push retries.
    pub ingestion: IngestionSettings,
    /// `[telemetry]`: log format and span export.
    pub telemetry: TelemetrySettings,
}

impl Settings {
    /// Loads settings from `path` (required when given, otherwise the optional
    /// default file) merged with environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let file = match path {
            Some(path) => File::from(path).required(true),
            None => File::with_name(DEFAULT_CONFIG_NAME).required(false),
        };
        let builder = config::Config::builder().add_source(file).add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator(ENV_SEPARATOR)
                .try_parsing(true),
        );
        Self::build(builder)
    }

    fn build(builder: ConfigBuilder<DefaultState>) -> Result<Self, ConfigError> {
        let settings: Settings = builder.build()?.try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.worker.poll_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "worker.poll_timeout_ms must be greater than zero".into(),
            ));
        }
        if self.queue.backend == QueueBackend::Redis
            && Duration::from_millis(self.worker.poll_timeout_ms) >= self.redis_command_timeout()
        {
            return Err(ConfigError::Invalid(format!(
                "worker.poll_timeout_ms ({}) must be below queue.command_timeout_secs ({}s)",
                self.worker.poll_timeout_ms, self.queue.command_timeout_secs
            )));
        }
        if self.worker.flush == FlushMode::Batched && self.worker.batch_max_events == 0 {
            return Err(ConfigError::Invalid(
                "worker.batch_max_events must be at least 1".into(),
            ));
        }
        if self.ingestion.push_attempts == 0 {
            return Err(ConfigError::Invalid(
                "ingestion.push_attempts must be at least 1".into(),
            ));
        }
        if self.ingestion.lookup_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "ingestion.lookup_timeout_secs must be greater than zero".into(),
            ));
        }
        Ok(())
    }

    fn redis_command_timeout(&self) -> Duration {
        Duration::from_secs(self.queue.command_timeout_secs)
    }

    /// Worker tuning derived from `[worker]`.
    pub fn worker_config(&self) -> WorkerConfig {
        let flush_policy = match self.worker.flush {
            FlushMode::EveryEvent => FlushPolicy::EveryEvent,
            FlushMode::Batched => FlushPolicy::Batched {
                max_events: NonZeroUsize::new(self.worker.batch_max_events)
                    .unwrap_or(NonZeroUsize::MIN),
            },
        };
        let defaults = WorkerConfig::default();
        WorkerConfig {
            poll_timeout: Duration::from_millis(self.worker.poll_timeout_ms),
            idle_sleep: Duration::from_millis(self.worker.idle_sleep_ms),
            flush_policy,
            error_backoff: Backoff::new(
                defaults.error_backoff.initial,
                Duration::from_secs(self.worker.max_error_backoff_secs),
            ),
        }
    }

    /// Endpoint tuning derived from `[ingestion]`.
    pub fn ingestion_config(&self) -> IngestionConfig {
        IngestionConfig {
            lookup_timeout: Duration::from_secs(self.ingestion.lookup_timeout_secs),
            push_attempts: self.ingestion.push_attempts,
            ..IngestionConfig::default()
        }
    }

    /// Client settings derived from `[github]`.
    pub fn github_config(&self) -> GitHubConfig {
        GitHubConfig {
            api_url: self.github.api_url.clone(),
            token: self.github.token.clone(),
            request_timeout: Duration::from_secs(self.github.timeout_secs),
            ..GitHubConfig::default()
        }
    }

    /// Broker settings derived from `[queue]`.
    pub fn redis_config(&self) -> RedisQueueConfig {
        RedisQueueConfig {
            host: self.queue.host.clone(),
            port: self.queue.port,
            username: self.queue.username.clone(),
            password: self
                .queue
                .password
                .as_ref()
                .map(|p| p.expose_secret().clone()),
            key: self.queue.key.clone(),
            pool_size: self.queue.pool_size,
            command_timeout: self.redis_command_timeout(),
        }
    }
}
