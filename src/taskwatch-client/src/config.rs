//! Subscriber configuration.
//!
//! Supports loading configuration from:
//! - TOML files
//! - Environment variables (`TASKWATCH_*`)
//! - Builder overrides

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use reqwest::header::{HeaderName, HeaderValue};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{Result, TaskwatchError};

/// Placeholder substituted with the encoded task id in `stream_path`.
pub const TASK_ID_PLACEHOLDER: &str = "{task_id}";

/// Configuration for task progress subscriptions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubscriberConfig {
    /// Base URL of the task service (e.g., "http://localhost:3000").
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Path template for the event stream; must contain `{task_id}`.
    #[serde(default = "default_stream_path")]
    pub stream_path: String,

    /// Maximum consecutive reconnect attempts.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Fixed delay before each reconnect, in milliseconds.
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,

    /// Connect timeout in seconds.
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,

    /// Give up on a connect or read that stays silent this many milliseconds.
    #[serde(default)]
    pub idle_timeout_ms: Option<u64>,

    /// Default deadline for `await_completion`, in milliseconds.
    #[serde(default = "default_completion_timeout_ms")]
    pub completion_timeout_ms: u64,

    /// Extra headers sent when opening the stream.
    #[serde(default)]
    pub headers: HashMap<String, String>,
}

fn default_base_url() -> String {
    "http://localhost:3000".to_string()
}

fn default_stream_path() -> String {
    "/api/tasks/{task_id}/progress".to_string()
}

fn default_max_retries() -> u32 {
    5
}

fn default_retry_delay_ms() -> u64 {
    2000
}

fn default_connect_timeout_secs() -> u64 {
    10
}

fn default_completion_timeout_ms() -> u64 {
    300_000 // 5 minutes
}

impl Default for SubscriberConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            stream_path: default_stream_path(),
            max_retries: default_max_retries(),
            retry_delay_ms: default_retry_delay_ms(),
            connect_timeout_secs: default_connect_timeout_secs(),
            idle_timeout_ms: None,
            completion_timeout_ms: default_completion_timeout_ms(),
            headers: HashMap::new(),
        }
    }
}

impl SubscriberConfig {
    /// Create a config pointing at the given base URL.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Default::default()
        }
    }

    /// Load configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            TaskwatchError::Config(format!("Failed to read {}: {}", path.display(), e))
        })?;
        let config: Self = toml::from_str(&content).map_err(|e| {
            TaskwatchError::Config(format!("Failed to parse {}: {}", path.display(), e))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Load from environment variables on top of the defaults.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    /// Overlay `TASKWATCH_*` environment variables onto this config.
    pub fn apply_env(&mut self) {
        if let Ok(url) = std::env::var("TASKWATCH_BASE_URL") {
            self.base_url = url;
        }

        if let Ok(path) = std::env::var("TASKWATCH_STREAM_PATH") {
            self.stream_path = path;
        }

        if let Ok(retries) = std::env::var("TASKWATCH_MAX_RETRIES") {
            match retries.parse() {
                Ok(n) => self.max_retries = n,
                Err(_) => warn!(value = %retries, "Ignoring invalid TASKWATCH_MAX_RETRIES"),
            }
        }

        if let Ok(delay) = std::env::var("TASKWATCH_RETRY_DELAY_MS") {
            match delay.parse() {
                Ok(ms) => self.retry_delay_ms = ms,
                Err(_) => warn!(value = %delay, "Ignoring invalid TASKWATCH_RETRY_DELAY_MS"),
            }
        }

        if let Ok(token) = std::env::var("TASKWATCH_AUTH_TOKEN") {
            self.headers
                .insert("Authorization".to_string(), format!("Bearer {}", token));
        }
    }

    /// Set reconnect budget.
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Set the fixed reconnect delay.
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay_ms = duration_ms(delay);
        self
    }

    /// Set the idle timeout.
    pub fn with_idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout_ms = Some(duration_ms(timeout));
        self
    }

    /// Set the stream path template.
    pub fn with_stream_path(mut self, path: impl Into<String>) -> Self {
        self.stream_path = path.into();
        self
    }

    /// Add a request header.
    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn idle_timeout(&self) -> Option<Duration> {
        self.idle_timeout_ms.map(Duration::from_millis)
    }

    pub fn completion_timeout(&self) -> Duration {
        Duration::from_millis(self.completion_timeout_ms)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        let base = url::Url::parse(&self.base_url)?;
        if !matches!(base.scheme(), "http" | "https") {
            return Err(TaskwatchError::Config(format!(
                "Unsupported URL scheme: {}",
                base.scheme()
            )));
        }

        if !self.stream_path.contains(TASK_ID_PLACEHOLDER) {
            return Err(TaskwatchError::Config(format!(
                "stream_path must contain {}",
                TASK_ID_PLACEHOLDER
            )));
        }

        if self.retry_delay_ms == 0 {
            return Err(TaskwatchError::Config(
                "retry_delay_ms must be greater than zero".to_string(),
            ));
        }

        if self.completion_timeout_ms == 0 {
            return Err(TaskwatchError::Config(
                "completion_timeout_ms must be greater than zero".to_string(),
            ));
        }

        if self.idle_timeout_ms == Some(0) {
            return Err(TaskwatchError::Config(
                "idle_timeout_ms must be greater than zero".to_string(),
            ));
        }

        for (name, value) in &self.headers {
            HeaderName::from_bytes(name.as_bytes()).map_err(|e| {
                TaskwatchError::Config(format!("Invalid header name {:?}: {}", name, e))
            })?;
            HeaderValue::from_str(value).map_err(|e| {
                TaskwatchError::Config(format!("Invalid value for header {}: {}", name, e))
            })?;
        }

        Ok(())
    }

    /// Build the stream URL for a task.
    pub fn stream_url(&self, task_id: &str) -> Result<url::Url> {
        let path = self
            .stream_path
            .replace(TASK_ID_PLACEHOLDER, &urlencoding::encode(task_id));
        let joined = format!("{}{}", self.base_url.trim_end_matches('/'), path);
        Ok(url::Url::parse(&joined)?)
    }
}

fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
