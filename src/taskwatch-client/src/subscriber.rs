//! Task progress subscriptions.
//!
//! A [`TaskProgressSubscriber`] opens one event stream per task and runs a
//! small connection state machine on a tokio task:
//!
//! ```text
//! Connecting -> Open -> Completed      (completed/failed event)
//!     ^          |
//!     |          +-----> Reconnecting  (transport error, retries left)
//!     +------------------'   |
//!                            +-------> Failed (retries exhausted)
//! any state ---------------------> Cancelled (Subscription::cancel)
//! ```
//!
//! The retry counter resets on every successful open, so the budget is
//! spent only by consecutive failures. The delay between attempts is fixed.
//!
//! # Example
//!
//! ```rust,ignore
//! use taskwatch_client::{FnProgressHandler, SubscriberConfig, TaskProgressSubscriber};
//!
//! let subscriber = TaskProgressSubscriber::new(SubscriberConfig::from_env()?)?;
//! let subscription = subscriber.subscribe(
//!     "task-123",
//!     FnProgressHandler::new(|progress| println!("{}", progress.status)),
//! )?;
//! subscription.closed().await;
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;

use futures::StreamExt;
use parking_lot::{Mutex, ReentrantMutex};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, error, info, info_span, warn};

use crate::config::SubscriberConfig;
use crate::error::{Result, TaskwatchError};
use crate::models::{PauseInfo, TaskProgress};
use crate::transport::{EventStream, ProgressTransport, SseTransport};

/// Receives events from a subscription.
///
/// Callbacks run on the subscription's worker, one at a time, in the
/// order events arrive. None are invoked once the subscription has been
/// cancelled.
pub trait ProgressHandler: Send + Sync + 'static {
    /// Called for every well-formed progress event.
    fn on_progress(&self, progress: &TaskProgress);

    /// Called for `paused` events, after `on_progress`.
    fn on_pause(&self, _info: PauseInfo) {}

    /// Called once if the reconnect budget runs out.
    fn on_error(&self, _error: TaskwatchError) {}
}

impl<T: ProgressHandler> ProgressHandler for Arc<T> {
    fn on_progress(&self, progress: &TaskProgress) {
        (**self).on_progress(progress);
    }

    fn on_pause(&self, info: PauseInfo) {
        (**self).on_pause(info);
    }

    fn on_error(&self, error: TaskwatchError) {
        (**self).on_error(error);
    }
}

type ProgressFn = Box<dyn Fn(&TaskProgress) + Send + Sync>;
type PauseFn = Box<dyn Fn(PauseInfo) + Send + Sync>;
type ErrorFn = Box<dyn Fn(TaskwatchError) + Send + Sync>;

/// Handler built from closures.
pub struct FnProgressHandler {
    on_progress: ProgressFn,
    on_pause: Option<PauseFn>,
    on_error: Option<ErrorFn>,
}

impl FnProgressHandler {
    pub fn new(on_progress: impl Fn(&TaskProgress) + Send + Sync + 'static) -> Self {
        Self {
            on_progress: Box::new(on_progress),
            on_pause: None,
            on_error: None,
        }
    }

    /// Set the pause callback.
    pub fn with_pause(mut self, on_pause: impl Fn(PauseInfo) + Send + Sync + 'static) -> Self {
        self.on_pause = Some(Box::new(on_pause));
        self
    }

    /// Set the error callback.
    pub fn with_error(
        mut self,
        on_error: impl Fn(TaskwatchError) + Send + Sync + 'static,
    ) -> Self {
        self.on_error = Some(Box::new(on_error));
        self
    }
}

impl ProgressHandler for FnProgressHandler {
    fn on_progress(&self, progress: &TaskProgress) {
        (self.on_progress)(progress);
    }

    fn on_pause(&self, info: PauseInfo) {
        if let Some(ref f) = self.on_pause {
            f(info);
        }
    }

    fn on_error(&self, error: TaskwatchError) {
        if let Some(ref f) = self.on_error {
            f(error);
        }
    }
}

/// Connection state of a subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionState {
    Connecting,
    Open,
    Reconnecting,
    /// A `completed` or `failed` event was delivered.
    Completed,
    Cancelled,
    /// Reconnect attempts were exhausted.
    Failed,
}

impl SubscriptionState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled | Self::Failed)
    }
}

/// State shared between a [`Subscription`] and its worker.
struct Shared {
    task_id: String,
    state: Mutex<SubscriptionState>,
    retry_count: AtomicU32,
    cancelled: AtomicBool,
    completed: AtomicBool,
    cancel_token: CancellationToken,
    done: CancellationToken,
    /// Held while a callback runs. Reentrant so handlers may cancel.
    delivery: ReentrantMutex<()>,
}

impl Shared {
    fn new(task_id: String) -> Self {
        Self {
            task_id,
            state: Mutex::new(SubscriptionState::Connecting),
            retry_count: AtomicU32::new(0),
            cancelled: AtomicBool::new(false),
            completed: AtomicBool::new(false),
            cancel_token: CancellationToken::new(),
            done: CancellationToken::new(),
            delivery: ReentrantMutex::new(()),
        }
    }

    /// Move to `next` unless a terminal state was already reached.
    fn transition(&self, next: SubscriptionState) -> bool {
        let mut state = self.state.lock();
        if state.is_terminal() {
            return false;
        }
        *state = next;
        true
    }

    fn should_stop(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst) || self.completed.load(Ordering::SeqCst)
    }

    /// Run `f` unless cancelled. Returns whether it ran.
    fn deliver(&self, f: impl FnOnce()) -> bool {
        let _guard = self.delivery.lock();
        if self.cancelled.load(Ordering::SeqCst) {
            return false;
        }
        f();
        true
    }
}

/// Handle to one task's progress stream.
///
/// Dropping the handle cancels the subscription.
#[must_use = "dropping a Subscription cancels it"]
pub struct Subscription {
    shared: Arc<Shared>,
}

impl Subscription {
    pub fn task_id(&self) -> &str {
        &self.shared.task_id
    }

    pub fn state(&self) -> SubscriptionState {
        *self.shared.state.lock()
    }

    /// Consecutive failed attempts since the last successful open.
    pub fn retry_count(&self) -> u32 {
        self.shared.retry_count.load(Ordering::SeqCst)
    }

    pub fn is_cancelled(&self) -> bool {
        self.shared.cancelled.load(Ordering::SeqCst)
    }

    pub fn is_completed(&self) -> bool {
        self.shared.completed.load(Ordering::SeqCst)
    }

    /// Stop the subscription.
    ///
    /// Closes the live stream and interrupts any pending reconnect. Once
    /// this returns no callback will be invoked. Calling it again is a no-op.
    pub fn cancel(&self) {
        if self.shared.cancelled.swap(true, Ordering::SeqCst) {
            return;
        }
        self.shared.cancel_token.cancel();

        // Wait out a callback that is already running.
        let _guard = self.shared.delivery.lock();
        if self.shared.transition(SubscriptionState::Cancelled) {
            info!(task_id = %self.shared.task_id, "Progress subscription cancelled");
        }
    }

    /// Wait until the worker has stopped, for any reason.
    pub async fn closed(&self) {
        self.shared.done.cancelled().await;
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.cancel();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("task_id", &self.shared.task_id)
            .field("state", &self.state())
            .field("retry_count", &self.retry_count())
            .finish()
    }
}

/// Opens progress subscriptions against a transport.
#[derive(Clone)]
pub struct TaskProgressSubscriber {
    transport: Arc<dyn ProgressTransport>,
    max_retries: u32,
    retry_delay: Duration,
    idle_timeout: Option<Duration>,
    completion_timeout: Duration,
}

impl TaskProgressSubscriber {
    /// Create a subscriber using the SSE transport.
    pub fn new(config: SubscriberConfig) -> Result<Self> {
        let transport = SseTransport::new(config.clone())?;
        Ok(Self::with_transport(Arc::new(transport), &config))
    }

    /// Create a subscriber over a custom transport.
    pub fn with_transport(transport: Arc<dyn ProgressTransport>, config: &SubscriberConfig) -> Self {
        Self {
            transport,
            max_retries: config.max_retries,
            retry_delay: config.retry_delay(),
            idle_timeout: config.idle_timeout(),
            completion_timeout: config.completion_timeout(),
        }
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    pub fn retry_delay(&self) -> Duration {
        self.retry_delay
    }

    /// Default deadline used by `await_completion`.
    pub fn completion_timeout(&self) -> Duration {
        self.completion_timeout
    }

    /// Subscribe to a task's progress stream.
    ///
    /// The worker is spawned on the current tokio runtime and starts
    /// connecting immediately.
    pub fn subscribe<H: ProgressHandler>(
        &self,
        task_id: impl Into<String>,
        handler: H,
    ) -> Result<Subscription> {
        let task_id = task_id.into();
        if task_id.trim().is_empty() {
            return Err(TaskwatchError::InvalidTaskId);
        }

        let shared = Arc::new(Shared::new(task_id.clone()));
        let worker = Worker {
            shared: shared.clone(),
            transport: self.transport.clone(),
            handler: Box::new(handler),
            max_retries: self.max_retries,
            retry_delay: self.retry_delay,
            idle_timeout: self.idle_timeout,
        };

        tokio::spawn(
            worker
                .run()
                .instrument(info_span!("task_subscription", task_id = %task_id)),
        );

        Ok(Subscription { shared })
    }
}

/// How one connection ended.
enum StreamEnd {
    Terminal,
    Cancelled,
    Dropped(TaskwatchError),
}

struct Worker {
    shared: Arc<Shared>,
    transport: Arc<dyn ProgressTransport>,
    handler: Box<dyn ProgressHandler>,
    max_retries: u32,
    retry_delay: Duration,
    idle_timeout: Option<Duration>,
}

impl Worker {
    async fn run(self) {
        let shared = self.shared.clone();
        let token = shared.cancel_token.clone();

        loop {
            if shared.should_stop() {
                break;
            }
            shared.transition(SubscriptionState::Connecting);

            let connected = tokio::select! {
                biased;
                _ = token.cancelled() => break,
                result = with_idle_timeout(
                    self.idle_timeout,
                    self.transport.connect(&shared.task_id),
                ) => result.and_then(|connected| connected),
            };

            let error = match connected {
                Ok(stream) => {
                    shared.retry_count.store(0, Ordering::SeqCst);
                    shared.transition(SubscriptionState::Open);
                    info!("Progress stream open");

                    match self.read(stream).await {
                        StreamEnd::Terminal | StreamEnd::Cancelled => break,
                        StreamEnd::Dropped(e) => e,
                    }
                }
                Err(e) => e,
            };

            if shared.should_stop() {
                break;
            }

            if !error.is_retryable() {
                error!(error = %error, "Progress stream cannot be opened, giving up");
                shared.deliver(|| {
                    if shared.transition(SubscriptionState::Failed) {
                        self.handler.on_error(error);
                    }
                });
                break;
            }

            let attempts = shared.retry_count.load(Ordering::SeqCst);
            if attempts >= self.max_retries {
                error!(attempts, error = %error, "Progress stream unreachable, giving up");
                let failure = TaskwatchError::RetriesExhausted {
                    task_id: shared.task_id.clone(),
                    attempts,
                    last_error: Box::new(error),
                };
                shared.deliver(|| {
                    if shared.transition(SubscriptionState::Failed) {
                        self.handler.on_error(failure);
                    }
                });
                break;
            }

            let attempt = shared.retry_count.fetch_add(1, Ordering::SeqCst) + 1;
            shared.transition(SubscriptionState::Reconnecting);
            warn!(
                attempt,
                max_retries = self.max_retries,
                delay_ms = self.retry_delay.as_millis() as u64,
                error = %error,
                "Progress stream dropped, reconnecting"
            );

            tokio::select! {
                biased;
                _ = token.cancelled() => break,
                _ = tokio::time::sleep(self.retry_delay) => {}
            }
        }

        debug!(state = ?*shared.state.lock(), "Progress worker stopped");
        shared.done.cancel();
    }

    /// Deliver events from one connection until it ends.
    async fn read(&self, mut stream: EventStream) -> StreamEnd {
        let shared = &self.shared;

        loop {
            let next = tokio::select! {
                biased;
                _ = shared.cancel_token.cancelled() => return StreamEnd::Cancelled,
                next = with_idle_timeout(self.idle_timeout, stream.next()) => next,
            };

            let data = match next {
                Ok(Some(Ok(data))) => data,
                Ok(Some(Err(e))) | Err(e) => return StreamEnd::Dropped(e),
                Ok(None) => return StreamEnd::Dropped(TaskwatchError::Disconnected),
            };

            let progress = match TaskProgress::parse(&data) {
                Ok(progress) => progress,
                Err(e) => {
                    warn!(error = %e, data = %data, "Dropping malformed progress event");
                    continue;
                }
            };

            debug!(status = %progress.status, "Received progress event");
            let terminal = progress.is_terminal();

            let delivered = shared.deliver(|| {
                self.handler.on_progress(&progress);
                if let Some(info) = progress.pause_info(&shared.task_id) {
                    info!(vnc_url = %info.vnc_url, "Task paused for manual intervention");
                    self.handler.on_pause(info);
                }
                if terminal {
                    shared.completed.store(true, Ordering::SeqCst);
                    shared.transition(SubscriptionState::Completed);
                }
            });

            if !delivered {
                return StreamEnd::Cancelled;
            }
            if terminal {
                info!(status = %progress.status, "Task reached terminal state, closing stream");
                return StreamEnd::Terminal;
            }
        }
    }
}

/// Bound a connect or read by the idle timeout, if one is set.
async fn with_idle_timeout<F: Future>(
    idle_timeout: Option<Duration>,
    fut: F,
) -> Result<F::Output> {
    match idle_timeout {
        Some(limit) => tokio::time::timeout(limit, fut)
            .await
            .map_err(|_| TaskwatchError::IdleTimeout(limit)),
        None => Ok(fut.await),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::TaskStatus;
    use crate::testing::{Connection, Recorder, ScriptedTransport, event, refused};
    use pretty_assertions::assert_eq;
    use tokio::time::sleep;

    const RUNNING: &str =
        r#"{"status":"running","currentStep":1,"totalSteps":3,"currentAction":"Loading"}"#;
    const PAUSED: &str = r#"{"status":"paused","vncUrl":"https://vnc.local/s/1","message":"Solve the slider"}"#;
    const COMPLETED: &str = r#"{"status":"completed","result":{"rows":12}}"#;
    const FAILED: &str = r#"{"status":"failed","error":"profile not found"}"#;

    fn subscriber(transport: Arc<ScriptedTransport>) -> TaskProgressSubscriber {
        TaskProgressSubscriber::with_transport(transport, &SubscriberConfig::default())
    }

    fn statuses(recorder: &Recorder) -> Vec<TaskStatus> {
        recorder.progress.lock().iter().map(|p| p.status).collect()
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejects_empty_task_id() {
        let transport = ScriptedTransport::new(vec![]);
        let result = subscriber(transport.clone()).subscribe("  ", Recorder::default());
        assert!(matches!(result, Err(TaskwatchError::InvalidTaskId)));

        sleep(Duration::from_secs(1)).await;
        assert_eq!(transport.connect_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_terminal_event_closes_stream_once() {
        let transport = ScriptedTransport::new(vec![Connection::Close(vec![
            event(RUNNING),
            event(COMPLETED),
            event(RUNNING),
        ])]);
        let recorder = Arc::new(Recorder::default());

        let sub = subscriber(transport.clone())
            .subscribe("task-1", recorder.clone())
            .expect("subscribe");
        sub.closed().await;

        assert_eq!(statuses(&recorder), vec![TaskStatus::Running, TaskStatus::Completed]);
        assert_eq!(sub.state(), SubscriptionState::Completed);
        assert!(sub.is_completed());

        sleep(Duration::from_secs(30)).await;
        assert_eq!(transport.connect_count(), 1);
        assert_eq!(transport.closed(), 1);
        assert!(recorder.errors.lock().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_event_is_terminal() {
        let transport = ScriptedTransport::new(vec![Connection::Hang(vec![event(FAILED)])]);
        let recorder = Arc::new(Recorder::default());

        let sub = subscriber(transport.clone())
            .subscribe("task-1", recorder.clone())
            .expect("subscribe");
        sub.closed().await;

        assert_eq!(statuses(&recorder), vec![TaskStatus::Failed]);
        assert_eq!(sub.state(), SubscriptionState::Completed);
        assert_eq!(transport.closed(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnects_with_fixed_delay_within_budget() {
        let transport = ScriptedTransport::new(vec![
            refused(),
            refused(),
            refused(),
            Connection::Close(vec![event(COMPLETED)]),
        ]);
        let recorder = Arc::new(Recorder::default());

        let sub = subscriber(transport.clone())
            .subscribe("task-1", recorder.clone())
            .expect("subscribe");
        sub.closed().await;

        assert_eq!(transport.connect_count(), 4);
        assert_eq!(sub.state(), SubscriptionState::Completed);
        assert!(recorder.errors.lock().is_empty());

        let times = transport.connect_times();
        for pair in times.windows(2) {
            let gap = pair[1] - pair[0];
            assert!(gap >= Duration::from_millis(2000), "gap too short: {gap:?}");
            assert!(gap < Duration::from_millis(2100), "gap too long: {gap:?}");
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_retries_report_once() {
        let transport = ScriptedTransport::new(vec![]);
        let recorder = Arc::new(Recorder::default());

        let sub = subscriber(transport.clone())
            .subscribe("task-1", recorder.clone())
            .expect("subscribe");
        sub.closed().await;

        // Initial attempt plus five reconnects.
        assert_eq!(transport.connect_count(), 6);
        assert_eq!(sub.state(), SubscriptionState::Failed);

        let errors = recorder.errors.lock();
        assert_eq!(errors.len(), 1);
        match &errors[0] {
            TaskwatchError::RetriesExhausted {
                task_id, attempts, ..
            } => {
                assert_eq!(task_id, "task-1");
                assert_eq!(*attempts, 5);
            }
            other => panic!("unexpected error: {other:?}"),
        }
        drop(errors);

        sleep(Duration::from_secs(60)).await;
        assert_eq!(transport.connect_count(), 6);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_counter_resets_after_open() {
        let transport = ScriptedTransport::new(vec![
            refused(),
            refused(),
            Connection::Close(vec![event(RUNNING)]),
        ]);
        let recorder = Arc::new(Recorder::default());

        let sub = subscriber(transport.clone())
            .subscribe("task-1", recorder.clone())
            .expect("subscribe");
        sub.closed().await;

        // Two failures, one open that drops, then five more reconnects.
        assert_eq!(transport.connect_count(), 8);
        assert_eq!(statuses(&recorder), vec![TaskStatus::Running]);
        assert_eq!(recorder.errors.lock().len(), 1);
        assert_eq!(sub.retry_count(), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_malformed_event_is_skipped() {
        let transport = ScriptedTransport::new(vec![Connection::Hang(vec![
            event("{not valid json}"),
            event(r#"{"status":"unknown"}"#),
            event(RUNNING),
        ])]);
        let recorder = Arc::new(Recorder::default());

        let sub = subscriber(transport.clone())
            .subscribe("task-1", recorder.clone())
            .expect("subscribe");
        sleep(Duration::from_millis(10)).await;

        assert_eq!(statuses(&recorder), vec![TaskStatus::Running]);
        assert_eq!(sub.state(), SubscriptionState::Open);
        assert_eq!(transport.connect_count(), 1);

        let mut closed = tokio_test::task::spawn(sub.closed());
        tokio_test::assert_pending!(closed.poll());
        drop(closed);
        sub.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn test_pause_keeps_stream_open() {
        let transport = ScriptedTransport::new(vec![Connection::Close(vec![
            event(PAUSED),
            event(RUNNING),
            event(COMPLETED),
        ])]);
        let recorder = Arc::new(Recorder::default());

        let sub = subscriber(transport.clone())
            .subscribe("task-7", recorder.clone())
            .expect("subscribe");
        sub.closed().await;

        let pauses = recorder.pauses.lock().clone();
        assert_eq!(
            pauses,
            vec![PauseInfo {
                task_id: "task-7".to_string(),
                vnc_url: "https://vnc.local/s/1".to_string(),
                message: "Solve the slider".to_string(),
            }]
        );
        assert_eq!(
            statuses(&recorder),
            vec![TaskStatus::Paused, TaskStatus::Running, TaskStatus::Completed]
        );
        assert_eq!(transport.connect_count(), 1);
        assert_eq!(transport.closed(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_during_pending_reconnect() {
        let transport = ScriptedTransport::new(vec![refused()]);
        let recorder = Arc::new(Recorder::default());

        let sub = subscriber(transport.clone())
            .subscribe("task-1", recorder.clone())
            .expect("subscribe");
        sleep(Duration::from_millis(100)).await;
        assert_eq!(sub.state(), SubscriptionState::Reconnecting);
        assert_eq!(sub.retry_count(), 1);

        sub.cancel();
        sub.cancel();
        sub.closed().await;

        sleep(Duration::from_secs(60)).await;
        assert_eq!(transport.connect_count(), 1);
        assert_eq!(sub.state(), SubscriptionState::Cancelled);
        assert!(sub.is_cancelled());
        assert!(recorder.errors.lock().is_empty());
        assert!(recorder.progress.lock().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_closes_live_stream() {
        let transport = ScriptedTransport::new(vec![Connection::Hang(vec![event(RUNNING)])]);
        let recorder = Arc::new(Recorder::default());

        let sub = subscriber(transport.clone())
            .subscribe("task-1", recorder.clone())
            .expect("subscribe");
        sleep(Duration::from_millis(10)).await;
        assert_eq!(transport.opened(), 1);
        assert_eq!(transport.closed(), 0);

        sub.cancel();
        sub.closed().await;
        assert_eq!(transport.closed(), 1);
        assert_eq!(statuses(&recorder), vec![TaskStatus::Running]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_drop_cancels_subscription() {
        let transport = ScriptedTransport::new(vec![Connection::Hang(vec![])]);
        let recorder = Arc::new(Recorder::default());

        let sub = subscriber(transport.clone())
            .subscribe("task-1", recorder.clone())
            .expect("subscribe");
        sleep(Duration::from_millis(10)).await;
        drop(sub);

        sleep(Duration::from_secs(10)).await;
        assert_eq!(transport.opened(), transport.closed());
        assert!(transport.connect_count() <= 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_timeout_triggers_reconnect() {
        let transport = ScriptedTransport::new(vec![
            Connection::Hang(vec![event(RUNNING)]),
            Connection::Close(vec![event(COMPLETED)]),
        ]);
        let config = SubscriberConfig::default().with_idle_timeout(Duration::from_secs(30));
        let recorder = Arc::new(Recorder::default());

        let sub = TaskProgressSubscriber::with_transport(transport.clone(), &config)
            .subscribe("task-1", recorder.clone())
            .expect("subscribe");
        sub.closed().await;

        assert_eq!(transport.connect_count(), 2);
        assert_eq!(transport.closed(), 2);
        assert_eq!(statuses(&recorder), vec![TaskStatus::Running, TaskStatus::Completed]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_permanent_connect_error_fails_without_retry() {
        let transport = ScriptedTransport::new(vec![
            Connection::Refuse(TaskwatchError::Config("Invalid request: builder error".to_string())),
            Connection::Close(vec![event(COMPLETED)]),
        ]);
        let recorder = Arc::new(Recorder::default());

        let sub = subscriber(transport.clone())
            .subscribe("task-1", recorder.clone())
            .expect("subscribe");
        sub.closed().await;

        sleep(Duration::from_secs(30)).await;
        assert_eq!(transport.connect_count(), 1);
        assert_eq!(sub.state(), SubscriptionState::Failed);
        assert_eq!(sub.retry_count(), 0);

        let errors = recorder.errors.lock();
        assert_eq!(errors.len(), 1);
        assert!(matches!(errors[0], TaskwatchError::Config(_)));
        assert!(recorder.progress.lock().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_timeout_bounds_connect() {
        let transport = ScriptedTransport::new(vec![
            Connection::Stall,
            Connection::Close(vec![event(COMPLETED)]),
        ]);
        let config = SubscriberConfig::default().with_idle_timeout(Duration::from_secs(30));
        let recorder = Arc::new(Recorder::default());

        let sub = TaskProgressSubscriber::with_transport(transport.clone(), &config)
            .subscribe("task-1", recorder.clone())
            .expect("subscribe");

        sleep(Duration::from_secs(31)).await;
        assert_eq!(sub.state(), SubscriptionState::Reconnecting);
        assert_eq!(sub.retry_count(), 1);

        sub.closed().await;
        assert_eq!(transport.connect_count(), 2);
        assert_eq!(sub.state(), SubscriptionState::Completed);
        assert_eq!(statuses(&recorder), vec![TaskStatus::Completed]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fn_handler_callbacks() {
        let transport = ScriptedTransport::new(vec![]);
        let config = SubscriberConfig::default().with_max_retries(0);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let errors = seen.clone();

        let handler = FnProgressHandler::new(|_| {})
            .with_error(move |e| errors.lock().push(e.to_string()));
        let sub = TaskProgressSubscriber::with_transport(transport.clone(), &config)
            .subscribe("task-1", handler)
            .expect("subscribe");
        sub.closed().await;

        assert_eq!(transport.connect_count(), 1);
        assert_eq!(seen.lock().len(), 1);
        assert!(seen.lock()[0].contains("after 0 reconnect attempts"));
    }
}
