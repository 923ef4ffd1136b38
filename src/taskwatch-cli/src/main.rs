//! Taskwatch - follow remote automation tasks from the command line.

use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use parking_lot::Mutex;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use taskwatch_client::{
    CompletionOptions, FnProgressHandler, SubscriberConfig, SubscriptionState,
    TaskCompletionResult, TaskProgressSubscriber, TaskStatus, TaskwatchError,
};

/// Exit code for a task that completed.
const EXIT_OK: u8 = 0;
/// Exit code for a task that failed or could not be followed.
const EXIT_FAILED: u8 = 1;
/// Exit code for a task that did not finish in time.
const EXIT_TIMEOUT: u8 = 2;

/// Watch progress of remote automation tasks
#[derive(Parser, Debug)]
#[command(name = "taskwatch")]
#[command(about = "Follow progress of remote automation tasks over server-sent events")]
#[command(version)]
struct Args {
    /// Configuration file path (TOML)
    #[arg(short, long, global = true)]
    config: Option<String>,

    /// Base URL of the task service
    #[arg(long, global = true, env = "TASKWATCH_BASE_URL")]
    base_url: Option<String>,

    /// Maximum consecutive reconnect attempts
    #[arg(long, global = true)]
    max_retries: Option<u32>,

    /// Log level
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Enable JSON logging
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print every progress event as a JSON line until the task ends
    Watch {
        /// Task identifier
        task_id: String,
    },
    /// Wait for the task to finish and print the final result
    Wait {
        /// Task identifier
        task_id: String,

        /// Give up after this many milliseconds
        #[arg(long)]
        timeout_ms: Option<u64>,
    },
}

fn setup_logging(level: &str, json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let subscriber = tracing_subscriber::registry().with(filter);

    // stdout carries event output, logs go to stderr
    if json {
        subscriber
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        subscriber
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

fn load_config(args: &Args) -> Result<SubscriberConfig> {
    let mut config = match args.config {
        Some(ref path) => SubscriberConfig::load(path)
            .with_context(|| format!("Failed to load config from {}", path))?,
        None => SubscriberConfig::default(),
    };
    config.apply_env();

    if let Some(ref url) = args.base_url {
        config.base_url = url.clone();
    }
    if let Some(retries) = args.max_retries {
        config.max_retries = retries;
    }

    config.validate().context("Invalid configuration")?;
    Ok(config)
}

fn print_json<T: serde::Serialize>(value: &T) {
    match serde_json::to_string(value) {
        Ok(line) => println!("{line}"),
        Err(e) => warn!(error = %e, "Failed to serialize output"),
    }
}

/// Prints each event and keeps the last status seen.
fn watch_handler(last_status: Arc<Mutex<Option<TaskStatus>>>) -> FnProgressHandler {
    FnProgressHandler::new(move |progress| {
        print_json(progress);
        *last_status.lock() = Some(progress.status);
    })
    .with_pause(|pause| {
        info!(vnc_url = %pause.vnc_url, message = %pause.message, "Task paused, waiting for manual intervention");
    })
    .with_error(|e| error!(error = %e, "Lost the progress stream"))
}

async fn watch(subscriber: &TaskProgressSubscriber, task_id: String) -> Result<u8> {
    let last_status = Arc::new(Mutex::new(None::<TaskStatus>));

    let subscription = subscriber
        .subscribe(task_id, watch_handler(last_status.clone()))
        .context("Failed to subscribe")?;

    tokio::select! {
        _ = subscription.closed() => {}
        _ = tokio::signal::ctrl_c() => {
            info!("Interrupted, closing subscription");
            subscription.cancel();
            return Ok(EXIT_OK);
        }
    }

    let last = *last_status.lock();
    Ok(watch_exit_code(subscription.state(), last))
}

fn watch_exit_code(state: SubscriptionState, last: Option<TaskStatus>) -> u8 {
    match (state, last) {
        (SubscriptionState::Completed, Some(TaskStatus::Completed)) => EXIT_OK,
        (SubscriptionState::Cancelled, _) => EXIT_OK,
        _ => EXIT_FAILED,
    }
}

async fn wait(
    subscriber: &TaskProgressSubscriber,
    task_id: String,
    timeout_ms: Option<u64>,
) -> Result<u8> {
    let mut options = CompletionOptions::new()
        .with_step_progress(|step| {
            info!(
                step = step.current_step,
                total = step.total_steps,
                captcha = step.captcha.is_some(),
                "{}",
                step.current_action
            );
        })
        .with_pause(|pause| {
            warn!(vnc_url = %pause.vnc_url, message = %pause.message, "Task paused, waiting for manual intervention");
        });
    if let Some(ms) = timeout_ms {
        options = options.with_timeout(Duration::from_millis(ms));
    }

    let outcome = tokio::select! {
        outcome = subscriber.await_completion(task_id, options) => outcome,
        _ = tokio::signal::ctrl_c() => {
            info!("Interrupted");
            return Ok(EXIT_OK);
        }
    };

    Ok(wait_exit_code(&outcome))
}

fn wait_exit_code(outcome: &std::result::Result<TaskCompletionResult, TaskwatchError>) -> u8 {
    match outcome {
        Ok(result) => {
            print_json(result);
            if result.is_success() {
                EXIT_OK
            } else {
                EXIT_FAILED
            }
        }
        Err(e @ TaskwatchError::Timeout { .. }) => {
            error!(error = %e, "Task did not finish in time");
            EXIT_TIMEOUT
        }
        Err(e) => {
            error!(error = %e, "Failed to follow task");
            EXIT_FAILED
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    setup_logging(&args.log_level, args.json_logs);

    let config = match load_config(&args) {
        Ok(c) => c,
        Err(e) => {
            error!("{:#}", e);
            return ExitCode::FAILURE;
        }
    };

    let base_url = config.base_url.clone();
    let subscriber = match TaskProgressSubscriber::new(config) {
        Ok(s) => s,
        Err(e) => {
            error!(error = %e, "Failed to create subscriber");
            return ExitCode::FAILURE;
        }
    };

    info!(
        base_url = %base_url,
        max_retries = subscriber.max_retries(),
        retry_delay_ms = subscriber.retry_delay().as_millis() as u64,
        "Starting taskwatch"
    );

    let result = match args.command {
        Command::Watch { task_id } => watch(&subscriber, task_id).await,
        Command::Wait {
            task_id,
            timeout_ms,
        } => wait(&subscriber, task_id, timeout_ms).await,
    };

    match result {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}
