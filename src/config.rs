//! Configuration types for proposal-export

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::{net::SocketAddr, path::PathBuf, time::Duration};

/// Main configuration
///
/// Sections:
/// - [`client`](ClientConfig): submission target, poll cadence and timeouts
/// - [`api`](ApiConfig): REST API bind address and access control
/// - [`processor`](ProcessorConfig): render workers and conversion tools
/// - [`persistence`](PersistenceConfig): job store and retention
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Config {
    /// Export client settings
    #[serde(default)]
    pub client: ClientConfig,

    /// REST API settings
    #[serde(default)]
    pub api: ApiConfig,

    /// Job processor settings
    #[serde(default)]
    pub processor: ProcessorConfig,

    /// Job store settings
    #[serde(default)]
    pub persistence: PersistenceConfig,
}

impl Config {
    /// Reject settings that would make the client or service misbehave
    pub fn validate(&self) -> Result<()> {
        if self.client.poll_interval.is_zero() {
            return Err(config_error(
                "client.poll_interval",
                "poll interval must be greater than zero",
            ));
        }
        if self.client.request_timeout.is_zero() {
            return Err(config_error(
                "client.request_timeout",
                "request timeout must be greater than zero",
            ));
        }
        if let Err(e) = url::Url::parse(&self.client.base_url) {
            return Err(config_error(
                "client.base_url",
                format!("invalid base URL '{}': {}", self.client.base_url, e),
            ));
        }
        if self.processor.max_concurrent_jobs == 0 {
            return Err(config_error(
                "processor.max_concurrent_jobs",
                "at least one concurrent job is required",
            ));
        }
        if self.processor.render_timeout.is_zero() {
            return Err(config_error(
                "processor.render_timeout",
                "render timeout must be greater than zero",
            ));
        }
        if self.persistence.cleanup_interval.is_zero() {
            return Err(config_error(
                "persistence.cleanup_interval",
                "cleanup interval must be greater than zero",
            ));
        }
        if let Some(retry) = &self.client.poll_retry
            && retry.backoff_multiplier < 1.0
        {
            return Err(config_error(
                "client.poll_retry.backoff_multiplier",
                "backoff multiplier must be at least 1.0",
            ));
        }
        Ok(())
    }
}

fn config_error(key: &str, message: impl Into<String>) -> Error {
    Error::Config {
        message: message.into(),
        key: Some(key.to_string()),
    }
}

/// Export client configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Base URL of the export service (default: "http://127.0.0.1:6790")
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Delay between status polls (default: 1 second)
    #[serde(default = "default_poll_interval", with = "duration_millis_serde")]
    pub poll_interval: Duration,

    /// Per-request timeout for submit, poll and download (default: 30 seconds)
    #[serde(default = "default_request_timeout", with = "duration_serde")]
    pub request_timeout: Duration,

    /// Retry transient poll failures with backoff (default: None = fail on first error)
    ///
    /// By default a single failed poll marks the job as failed locally, even though
    /// the server may still finish it. Setting this retries timeouts, connection
    /// errors and 5xx responses before giving up.
    #[serde(default)]
    pub poll_retry: Option<RetryConfig>,

    /// API key sent as X-Api-Key
    #[serde(default)]
    pub api_key: Option<String>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            poll_interval: default_poll_interval(),
            request_timeout: default_request_timeout(),
            poll_retry: None,
            api_key: None,
        }
    }
}

/// REST API configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ApiConfig {
    /// Address to bind to (default: 127.0.0.1:6790)
    #[serde(default = "default_bind_address")]
    pub bind_address: SocketAddr,

    /// Optional API key for authentication
    #[serde(default)]
    pub api_key: Option<String>,

    /// Enable CORS for browser access (default: true)
    #[serde(default = "default_true")]
    pub cors_enabled: bool,

    /// Allowed CORS origins (default: ["*"])
    #[serde(default = "default_cors_origins")]
    pub cors_origins: Vec<String>,

    /// Enable Swagger UI at /swagger-ui (default: true)
    #[serde(default = "default_true")]
    pub swagger_ui: bool,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            api_key: None,
            cors_enabled: true,
            cors_origins: default_cors_origins(),
            swagger_ui: true,
        }
    }
}

/// Job processor configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ProcessorConfig {
    /// Directory holding `{proposalId}.html` / `{proposalId}.docx` sources (default: "./proposals")
    #[serde(default = "default_source_dir")]
    pub source_dir: PathBuf,

    /// Directory receiving rendered PDFs (default: "./exports")
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,

    /// Maximum jobs rendered at once (default: 2)
    #[serde(default = "default_max_concurrent_jobs")]
    pub max_concurrent_jobs: usize,

    /// Upper bound on a single render (default: 120 seconds)
    #[serde(default = "default_render_timeout", with = "duration_serde")]
    pub render_timeout: Duration,

    /// Path to a Chromium-family browser (auto-detected if None)
    #[serde(default)]
    pub browser_path: Option<PathBuf>,

    /// Path to soffice/libreoffice (auto-detected if None)
    #[serde(default)]
    pub office_path: Option<PathBuf>,

    /// Whether to search PATH for tools if explicit paths are not set (default: true)
    #[serde(default = "default_true")]
    pub search_path: bool,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            source_dir: default_source_dir(),
            output_dir: default_output_dir(),
            max_concurrent_jobs: default_max_concurrent_jobs(),
            render_timeout: default_render_timeout(),
            browser_path: None,
            office_path: None,
            search_path: true,
        }
    }
}

/// Job store configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PersistenceConfig {
    /// SQLite database path (default: "./proposal-export.db")
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,

    /// How long terminal jobs and their artifacts are kept (default: 24 hours)
    #[serde(default = "default_job_retention", with = "duration_serde")]
    pub job_retention: Duration,

    /// How often the retention sweep runs (default: 10 minutes)
    #[serde(default = "default_cleanup_interval", with = "duration_serde")]
    pub cleanup_interval: Duration,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            job_retention: default_job_retention(),
            cleanup_interval: default_cleanup_interval(),
        }
    }
}

/// Retry configuration for transient failures
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum number of retry attempts (default: 3)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Initial delay before first retry (default: 500 ms)
    #[serde(default = "default_initial_delay", with = "duration_millis_serde")]
    pub initial_delay: Duration,

    /// Maximum delay between retries (default: 10 seconds)
    #[serde(default = "default_max_delay", with = "duration_millis_serde")]
    pub max_delay: Duration,

    /// Multiplier for exponential backoff (default: 2.0)
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    /// Add random jitter to delays (default: true)
    #[serde(default = "default_true")]
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay: default_initial_delay(),
            max_delay: default_max_delay(),
            backoff_multiplier: default_backoff_multiplier(),
            jitter: true,
        }
    }
}

fn default_base_url() -> String {
    "http://127.0.0.1:6790".to_string()
}

fn default_poll_interval() -> Duration {
    Duration::from_secs(1)
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_bind_address() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 6790))
}

fn default_cors_origins() -> Vec<String> {
    vec!["*".to_string()]
}

fn default_true() -> bool {
    true
}

fn default_source_dir() -> PathBuf {
    PathBuf::from("./proposals")
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("./exports")
}

fn default_max_concurrent_jobs() -> usize {
    2
}

fn default_render_timeout() -> Duration {
    Duration::from_secs(120)
}

fn default_database_path() -> PathBuf {
    PathBuf::from("./proposal-export.db")
}

fn default_job_retention() -> Duration {
    Duration::from_secs(24 * 60 * 60)
}

fn default_cleanup_interval() -> Duration {
    Duration::from_secs(10 * 60)
}

fn default_max_attempts() -> u32 {
    3
}

fn default_initial_delay() -> Duration {
    Duration::from_millis(500)
}

fn default_max_delay() -> Duration {
    Duration::from_secs(10)
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

// Duration serialization helper (whole seconds)
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}

// Duration serialization helper (milliseconds, for sub-second cadences)
mod duration_millis_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}
