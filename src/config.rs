//! Daemon configuration
//!
//! Loaded from a JSON file; every field has a default so a missing file or
//! a partial file both work. A few values can be overridden from the
//! environment.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::core::{AssistantError, AssistantResult};
use crate::runtime::{CoordinatorConfig, RetryPolicy, WorkerSettings};

/// Environment variable overriding `agent.base_url`
pub const ENV_BASE_URL: &str = "SHADOW_ASSISTANT_BASE_URL";
/// Environment variable overriding `agent.model`
pub const ENV_MODEL: &str = "SHADOW_ASSISTANT_MODEL";
/// Environment variable overriding `store.data_dir`
pub const ENV_DATA_DIR: &str = "SHADOW_ASSISTANT_DATA_DIR";
/// Environment variable supplying `agent.api_key`
pub const ENV_API_KEY: &str = "SHADOW_ASSISTANT_API_KEY";

/// Top-level daemon configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    pub agent: AgentHostConfig,
    pub session: PrimarySessionConfig,
    pub retry: RetryConfig,
    pub workers: WorkerConfig,
    pub store: StoreConfig,
    pub logging: LoggingConfig,
}

/// Where the agent host lives
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentHostConfig {
    /// Base URL of the agent host
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Bearer token, usually supplied through the environment
    #[serde(default, skip_serializing)]
    pub api_key: Option<String>,

    /// Model for the primary session
    #[serde(default = "default_model")]
    pub model: String,

    /// Timeout for non-streaming requests, in seconds
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

fn default_base_url() -> String {
    "http://127.0.0.1:4141".to_string()
}

fn default_model() -> String {
    "default".to_string()
}

fn default_request_timeout_secs() -> u64 {
    30
}

impl Default for AgentHostConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            api_key: None,
            model: default_model(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

/// Primary session behaviour
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrimarySessionConfig {
    /// System message for the primary session
    #[serde(default)]
    pub system_message: Option<String>,

    /// Stream partial output to channels
    #[serde(default = "default_true")]
    pub streaming: bool,

    #[serde(default = "default_liveness_interval_secs")]
    pub liveness_interval_secs: u64,

    #[serde(default = "default_turn_timeout_secs")]
    pub turn_timeout_secs: u64,

    /// Log entries summarized into a session created after a failed resume
    #[serde(default = "default_history_summary_entries")]
    pub history_summary_entries: usize,
}

fn default_true() -> bool {
    true
}

fn default_liveness_interval_secs() -> u64 {
    30
}

fn default_turn_timeout_secs() -> u64 {
    300
}

fn default_history_summary_entries() -> usize {
    20
}

impl Default for PrimarySessionConfig {
    fn default() -> Self {
        Self {
            system_message: None,
            streaming: true,
            liveness_interval_secs: default_liveness_interval_secs(),
            turn_timeout_secs: default_turn_timeout_secs(),
            history_summary_entries: default_history_summary_entries(),
        }
    }
}

/// Retry policy for recoverable turn failures
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Delays between attempts, in seconds; the last one repeats
    #[serde(default = "default_backoff_secs")]
    pub backoff_secs: Vec<u64>,
}

fn default_max_retries() -> u32 {
    3
}

fn default_backoff_secs() -> Vec<u64> {
    vec![1, 3, 10]
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            backoff_secs: default_backoff_secs(),
        }
    }
}

/// Worker session settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Model for workers; defaults to the primary model
    #[serde(default)]
    pub model: Option<String>,

    #[serde(default)]
    pub system_message: Option<String>,

    #[serde(default = "default_dispatch_timeout_secs")]
    pub dispatch_timeout_secs: u64,
}

fn default_dispatch_timeout_secs() -> u64 {
    300
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            model: None,
            system_message: None,
            dispatch_timeout_secs: default_dispatch_timeout_secs(),
        }
    }
}

/// Durable store location and bounds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    #[serde(default = "default_max_log_entries")]
    pub max_log_entries: usize,
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("./data")
}

fn default_max_log_entries() -> usize {
    crate::store::DEFAULT_MAX_LOG_ENTRIES
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            max_log_entries: default_max_log_entries(),
        }
    }
}

/// Log output settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter directive; `RUST_LOG` wins when set
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Directory for daily-rolling log files; stderr only when unset
    #[serde(default)]
    pub directory: Option<PathBuf>,

    /// Write JSON lines to the log file instead of text
    #[serde(default)]
    pub json: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            directory: None,
            json: false,
        }
    }
}

impl DaemonConfig {
    /// Load from `path`, falling back to defaults when the file is absent
    ///
    /// Environment overrides are applied and the result is validated.
    pub fn load(path: impl AsRef<Path>) -> AssistantResult<Self> {
        let path = path.as_ref();
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path)?;
            serde_json::from_str(&content).map_err(|e| {
                AssistantError::InvalidConfig(format!("{}: {}", path.display(), e))
            })?
        } else {
            tracing::debug!("[Config] {:?} not found, using defaults", path);
            Self::default()
        };

        config.apply_env(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Apply overrides from `lookup` (normally the process environment)
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(url) = lookup(ENV_BASE_URL) {
            self.agent.base_url = url;
        }
        if let Some(model) = lookup(ENV_MODEL) {
            self.agent.model = model;
        }
        if let Some(dir) = lookup(ENV_DATA_DIR) {
            self.store.data_dir = PathBuf::from(dir);
        }
        if let Some(key) = lookup(ENV_API_KEY).filter(|k| !k.is_empty()) {
            self.agent.api_key = Some(key);
        }
    }

    /// Reject values the daemon cannot run with
    pub fn validate(&self) -> AssistantResult<()> {
        if !self.agent.base_url.starts_with("http://") && !self.agent.base_url.starts_with("https://") {
            return Err(AssistantError::InvalidConfig(format!(
                "agent.base_url must be an http(s) URL, got '{}'",
                self.agent.base_url
            )));
        }
        if self.agent.model.trim().is_empty() {
            return Err(AssistantError::InvalidConfig("agent.model must not be empty".into()));
        }
        if self.session.liveness_interval_secs == 0 {
            return Err(AssistantError::InvalidConfig(
                "session.liveness_interval_secs must be positive".into(),
            ));
        }
        if self.session.turn_timeout_secs == 0 || self.workers.dispatch_timeout_secs == 0 {
            return Err(AssistantError::InvalidConfig("timeouts must be positive".into()));
        }
        if self.retry.backoff_secs.is_empty() {
            return Err(AssistantError::InvalidConfig("retry.backoff_secs must not be empty".into()));
        }
        if self.store.max_log_entries == 0 {
            return Err(AssistantError::InvalidConfig(
                "store.max_log_entries must be positive".into(),
            ));
        }
        Ok(())
    }

    /// Set the agent host base URL
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.agent.base_url = base_url.into();
        self
    }

    /// Set the primary model
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.agent.model = model.into();
        self
    }

    /// Set the data directory
    pub fn with_data_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.store.data_dir = dir.into();
        self
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.agent.request_timeout_secs)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.retry.max_retries,
            self.retry.backoff_secs.iter().map(|s| Duration::from_secs(*s)).collect(),
        )
    }

    /// Coordinator settings derived from this configuration
    pub fn coordinator_config(&self) -> CoordinatorConfig {
        let mut workers = WorkerSettings::new(
            self.workers
                .model
                .clone()
                .unwrap_or_else(|| self.agent.model.clone()),
        )
        .with_dispatch_timeout(Duration::from_secs(self.workers.dispatch_timeout_secs));
        if let Some(message) = &self.workers.system_message {
            workers = workers.with_system_message(message.clone());
        }

        let mut config = CoordinatorConfig::new(&self.agent.model)
            .with_retry(self.retry_policy())
            .with_workers(workers)
            .with_turn_timeout(Duration::from_secs(self.session.turn_timeout_secs))
            .with_liveness_interval(Duration::from_secs(self.session.liveness_interval_secs));
        config.system_message = self.session.system_message.clone();
        config.streaming = self.session.streaming;
        config.history_summary_entries = self.session.history_summary_entries;
        config
    }
}
