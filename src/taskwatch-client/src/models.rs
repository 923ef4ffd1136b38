//! Wire and caller-facing types for task progress.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Action text used for captcha notifications that carry no message.
pub const DEFAULT_CAPTCHA_ACTION: &str = "Solving captcha...";

/// Status reported by the remote task executor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Running,
    Paused,
    Completed,
    Failed,
}

impl TaskStatus {
    /// Whether no further progress is expected after this status.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// State of an automated challenge sub-flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CaptchaStatus {
    #[default]
    Detecting,
    Success,
    Failed,
}

/// One progress event as pushed by the server.
///
/// Only `status` is mandatory. The remaining fields depend on it:
/// step fields for `running`, `vncUrl`/`message` for `paused`,
/// `result` for `completed` and `error` for `failed`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskProgress {
    pub status: TaskStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_step: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_steps: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_action: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub captcha: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub captcha_status: Option<CaptchaStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub captcha_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vnc_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl TaskProgress {
    /// Create an event with only a status set.
    pub fn new(status: TaskStatus) -> Self {
        Self {
            status,
            current_step: None,
            total_steps: None,
            current_action: None,
            captcha: None,
            captcha_status: None,
            captcha_message: None,
            vnc_url: None,
            message: None,
            result: None,
            error: None,
        }
    }

    /// Parse one SSE data payload.
    pub fn parse(data: &str) -> Result<Self> {
        Ok(serde_json::from_str(data)?)
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Whether the running task is blocked on a captcha sub-flow.
    pub fn is_captcha(&self) -> bool {
        self.captcha.unwrap_or(false)
    }

    /// Pause projection, present only for `paused` events.
    pub fn pause_info(&self, task_id: &str) -> Option<PauseInfo> {
        if self.status != TaskStatus::Paused {
            return None;
        }
        Some(PauseInfo {
            task_id: task_id.to_string(),
            vnc_url: self.vnc_url.clone().unwrap_or_default(),
            message: self.message.clone().unwrap_or_default(),
        })
    }

    /// Step notification for a `running` event.
    ///
    /// Captcha events always project, falling back to
    /// [`DEFAULT_CAPTCHA_ACTION`]. Plain events project only when
    /// step, total and action are all present.
    pub fn step_progress(&self) -> Option<StepProgress> {
        if self.status != TaskStatus::Running {
            return None;
        }

        if self.is_captcha() {
            return Some(StepProgress {
                current_step: self.current_step.unwrap_or(0),
                total_steps: self.total_steps.unwrap_or(0),
                current_action: self
                    .captcha_message
                    .clone()
                    .unwrap_or_else(|| DEFAULT_CAPTCHA_ACTION.to_string()),
                captcha: Some(CaptchaProgress {
                    status: self.captcha_status.unwrap_or_default(),
                    message: self.captcha_message.clone(),
                }),
            });
        }

        match (self.current_step, self.total_steps, &self.current_action) {
            (Some(current_step), Some(total_steps), Some(action)) => Some(StepProgress {
                current_step,
                total_steps,
                current_action: action.clone(),
                captcha: None,
            }),
            _ => None,
        }
    }
}

/// Details needed to resolve a paused task by hand.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PauseInfo {
    pub task_id: String,
    pub vnc_url: String,
    pub message: String,
}

/// Captcha fields carried by a step notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaptchaProgress {
    pub status: CaptchaStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Step notification forwarded by the completion wrapper.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepProgress {
    pub current_step: u32,
    pub total_steps: u32,
    pub current_action: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub captcha: Option<CaptchaProgress>,
}

/// Final status reported by the completion wrapper.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompletionStatus {
    Completed,
    Failed,
    Paused,
}

/// Outcome of waiting for a task to finish.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskCompletionResult {
    pub status: CompletionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<Duration>,
}

impl TaskCompletionResult {
    /// Build a result from a terminal event.
    pub fn from_terminal(progress: &TaskProgress, duration: Option<Duration>) -> Option<Self> {
        let status = match progress.status {
            TaskStatus::Completed => CompletionStatus::Completed,
            TaskStatus::Failed => CompletionStatus::Failed,
            _ => return None,
        };
        Some(Self {
            status,
            result: progress.result.clone(),
            error: progress.error.clone(),
            duration,
        })
    }

    pub fn is_success(&self) -> bool {
        self.status == CompletionStatus::Completed
    }
}
