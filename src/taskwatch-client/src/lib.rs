//! Progress subscriptions for remote automation tasks.
//!
//! This crate watches long-running browser-automation tasks (scraping
//! workflows and the like) through a server-sent events stream:
//! - [`TaskProgressSubscriber::subscribe`] delivers every progress event to a
//!   [`ProgressHandler`] and reconnects on transient failures with a bounded
//!   retry budget and a fixed delay
//! - [`TaskProgressSubscriber::await_completion`] waits for a terminal event
//!   with a hard deadline, forwarding step and pause notifications
//!
//! # Example
//!
//! ```rust,ignore
//! use taskwatch_client::{CompletionOptions, SubscriberConfig, TaskProgressSubscriber};
//!
//! let subscriber = TaskProgressSubscriber::new(SubscriberConfig::from_env()?)?;
//! let result = subscriber
//!     .await_completion(
//!         "task-123",
//!         CompletionOptions::new().with_pause(|pause| {
//!             println!("Needs a human at {}", pause.vnc_url);
//!         }),
//!     )
//!     .await?;
//! ```
//!
//! # Configuration
//!
//! Environment variables read by [`SubscriberConfig::from_env`]:
//! - `TASKWATCH_BASE_URL` - Base URL of the task service
//! - `TASKWATCH_STREAM_PATH` - Stream path template containing `{task_id}`
//! - `TASKWATCH_MAX_RETRIES` - Reconnect budget (default 5)
//! - `TASKWATCH_RETRY_DELAY_MS` - Fixed reconnect delay (default 2000)
//! - `TASKWATCH_AUTH_TOKEN` - Sent as a bearer token

pub mod completion;
pub mod config;
pub mod error;
pub mod http_client;
pub mod models;
pub mod subscriber;
pub mod transport;

#[cfg(test)]
mod testing;

// Re-export main types
pub use completion::CompletionOptions;
pub use config::SubscriberConfig;
pub use error::{Result, TaskwatchError};
pub use models::{
    CaptchaProgress, CaptchaStatus, CompletionStatus, PauseInfo, StepProgress,
    TaskCompletionResult, TaskProgress, TaskStatus,
};
pub use subscriber::{
    FnProgressHandler, ProgressHandler, Subscription, SubscriptionState, TaskProgressSubscriber,
};
pub use transport::{EventStream, ProgressTransport, SseTransport};
