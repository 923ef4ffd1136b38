//! Waiting for a task to finish.
//!
//! [`TaskProgressSubscriber::await_completion`] wraps a subscription and
//! resolves on the first of: a terminal event, the deadline, or an
//! exhausted reconnect budget. Pauses are forwarded without tearing the
//! subscription down; the remote side resumes on the same stream once the
//! pause is resolved.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{info, warn};

use crate::error::{Result, TaskwatchError};
use crate::models::{PauseInfo, StepProgress, TaskCompletionResult, TaskProgress, TaskStatus};
use crate::subscriber::{ProgressHandler, TaskProgressSubscriber};

type StepFn = Box<dyn Fn(StepProgress) + Send + Sync>;
type PauseFn = Box<dyn Fn(PauseInfo) + Send + Sync>;

/// Options for [`TaskProgressSubscriber::await_completion`].
#[derive(Default)]
pub struct CompletionOptions {
    on_step_progress: Option<StepFn>,
    on_pause: Option<PauseFn>,
    timeout: Option<Duration>,
}

impl CompletionOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Receive step notifications for `running` events.
    pub fn with_step_progress(mut self, f: impl Fn(StepProgress) + Send + Sync + 'static) -> Self {
        self.on_step_progress = Some(Box::new(f));
        self
    }

    /// Receive pause notifications.
    pub fn with_pause(mut self, f: impl Fn(PauseInfo) + Send + Sync + 'static) -> Self {
        self.on_pause = Some(Box::new(f));
        self
    }

    /// Override the subscriber's default deadline.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

enum WatchEvent {
    Progress(TaskProgress),
    Pause(PauseInfo),
    Error(TaskwatchError),
}

/// Forwards subscription callbacks to the waiting task.
struct ChannelHandler {
    tx: mpsc::UnboundedSender<WatchEvent>,
}

impl ProgressHandler for ChannelHandler {
    fn on_progress(&self, progress: &TaskProgress) {
        let _ = self.tx.send(WatchEvent::Progress(progress.clone()));
    }

    fn on_pause(&self, info: PauseInfo) {
        let _ = self.tx.send(WatchEvent::Pause(info));
    }

    fn on_error(&self, error: TaskwatchError) {
        let _ = self.tx.send(WatchEvent::Error(error));
    }
}

impl TaskProgressSubscriber {
    /// Wait until the task completes or fails.
    ///
    /// The deadline is measured from this call and does not depend on how
    /// many reconnects happen. On timeout the subscription is cancelled and
    /// [`TaskwatchError::Timeout`] is returned.
    pub async fn await_completion(
        &self,
        task_id: impl Into<String>,
        options: CompletionOptions,
    ) -> Result<TaskCompletionResult> {
        let task_id = task_id.into();
        let timeout = options.timeout.unwrap_or(self.completion_timeout());
        let started = Instant::now();

        let (tx, mut rx) = mpsc::unbounded_channel();
        let subscription = self.subscribe(task_id.clone(), ChannelHandler { tx })?;

        let deadline = tokio::time::sleep(timeout);
        tokio::pin!(deadline);

        loop {
            tokio::select! {
                biased;
                event = rx.recv() => match event {
                    Some(WatchEvent::Progress(progress)) => {
                        if let Some(result) =
                            TaskCompletionResult::from_terminal(&progress, Some(started.elapsed()))
                        {
                            subscription.cancel();
                            info!(
                                task_id = %task_id,
                                status = %progress.status,
                                elapsed_ms = started.elapsed().as_millis() as u64,
                                "Task finished"
                            );
                            return Ok(result);
                        }

                        if progress.status == TaskStatus::Running {
                            if let (Some(on_step), Some(step)) =
                                (&options.on_step_progress, progress.step_progress())
                            {
                                on_step(step);
                            }
                        }
                    }
                    Some(WatchEvent::Pause(info)) => {
                        if let Some(ref on_pause) = options.on_pause {
                            on_pause(info);
                        }
                    }
                    Some(WatchEvent::Error(e)) => {
                        warn!(task_id = %task_id, error = %e, "Gave up waiting for task");
                        return Err(e);
                    }
                    None => return Err(TaskwatchError::Cancelled),
                },
                _ = &mut deadline => {
                    subscription.cancel();
                    warn!(task_id = %task_id, timeout_ms = timeout.as_millis() as u64, "Timed out waiting for task");
                    return Err(TaskwatchError::Timeout { task_id, timeout });
                }
            }
        }
    }
}
