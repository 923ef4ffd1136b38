//! Error types for task progress subscriptions.
//!
//! Transport failures (`Http`, `Network`, `Stream`, `IdleTimeout`,
//! `Disconnected`) feed the reconnect loop and only reach the caller
//! wrapped in `RetriesExhausted`. Any other error from a connect attempt
//! ends the subscription immediately. Parse failures are logged and dropped.

use std::time::Duration;

use thiserror::Error;

/// Errors produced while watching a task.
#[derive(Error, Debug, Clone)]
pub enum TaskwatchError {
    /// Task id was empty.
    #[error("Task id must not be empty")]
    InvalidTaskId,

    /// Configuration error (bad URL, template or file).
    #[error("Configuration error: {0}")]
    Config(String),

    /// The progress endpoint answered with a non-success status.
    #[error("HTTP {status} from progress endpoint: {body}")]
    Http {
        /// Response status code.
        status: u16,
        /// Truncated response body.
        body: String,
    },

    /// Connect or read failure.
    #[error("Network error: {0}")]
    Network(String),

    /// SSE framing error.
    #[error("Event stream error: {0}")]
    Stream(String),

    /// No data arrived within the idle window.
    #[error("No data received for {0:?}")]
    IdleTimeout(Duration),

    /// The server closed the stream before a terminal event.
    #[error("Event stream closed by server")]
    Disconnected,

    /// An event payload could not be decoded.
    #[error("Malformed progress event: {0}")]
    Parse(String),

    /// The reconnect budget ran out.
    #[error("Gave up on task {task_id} after {attempts} reconnect attempts: {last_error}")]
    RetriesExhausted {
        /// Task being watched.
        task_id: String,
        /// Reconnect attempts made.
        attempts: u32,
        /// Error that ended the last attempt.
        last_error: Box<TaskwatchError>,
    },

    /// The completion wrapper's deadline elapsed.
    #[error("Task {task_id} did not finish within {timeout:?}")]
    Timeout {
        /// Task being watched.
        task_id: String,
        /// Deadline that elapsed.
        timeout: Duration,
    },

    /// The subscription was torn down before a result was available.
    #[error("Subscription cancelled")]
    Cancelled,
}

impl TaskwatchError {
    /// Whether this error should trigger a reconnect attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Http { .. }
                | Self::Network(_)
                | Self::Stream(_)
                | Self::IdleTimeout(_)
                | Self::Disconnected
        )
    }
}

impl From<reqwest::Error> for TaskwatchError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_builder() {
            TaskwatchError::Config(format!("Invalid request: {}", err))
        } else if err.is_timeout() {
            TaskwatchError::Network(format!("Request timed out: {}", err))
        } else if err.is_connect() {
            TaskwatchError::Network(format!("Connection failed: {}", err))
        } else {
            TaskwatchError::Network(err.to_string())
        }
    }
}

impl From<serde_json::Error> for TaskwatchError {
    fn from(err: serde_json::Error) -> Self {
        TaskwatchError::Parse(err.to_string())
    }
}

impl From<url::ParseError> for TaskwatchError {
    fn from(err: url::ParseError) -> Self {
        TaskwatchError::Config(format!("Invalid URL: {}", err))
    }
}

/// Result type for task progress operations.
pub type Result<T> = std::result::Result<T, TaskwatchError>;
