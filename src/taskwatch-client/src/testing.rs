//! Scripted transport and recording handler for unit tests.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use futures::stream::{self, BoxStream};
use futures::StreamExt;
use parking_lot::Mutex;
use tokio::time::Instant;

use crate::error::{Result, TaskwatchError};
use crate::models::{PauseInfo, TaskProgress};
use crate::subscriber::ProgressHandler;
use crate::transport::{EventStream, ProgressTransport};

/// What happens on one connect call.
pub(crate) enum Connection {
    /// Connect fails with this error.
    Refuse(TaskwatchError),
    /// Connect succeeds, yields these items, then closes.
    Close(Vec<Result<String>>),
    /// Connect succeeds, yields these items, then stays silent.
    Hang(Vec<Result<String>>),
    /// Connect never returns.
    Stall,
}

/// Transport that plays back a fixed list of connections.
///
/// Once the script runs out every connect is refused.
#[derive(Default)]
pub(crate) struct ScriptedTransport {
    script: Mutex<VecDeque<Connection>>,
    connects: Mutex<Vec<Instant>>,
    opened: Arc<AtomicUsize>,
    closed: Arc<AtomicUsize>,
}

struct CloseGuard(Arc<AtomicUsize>);

impl Drop for CloseGuard {
    fn drop(&mut self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }
}

impl ScriptedTransport {
    pub(crate) fn new(script: Vec<Connection>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script.into()),
            ..Default::default()
        })
    }

    pub(crate) fn connect_count(&self) -> usize {
        self.connects.lock().len()
    }

    pub(crate) fn connect_times(&self) -> Vec<Instant> {
        self.connects.lock().clone()
    }

    pub(crate) fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    pub(crate) fn closed(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }

    fn build(&self, items: Vec<Result<String>>, hang: bool) -> EventStream {
        self.opened.fetch_add(1, Ordering::SeqCst);
        let guard = CloseGuard(self.closed.clone());
        let tail: BoxStream<'static, Result<String>> = if hang {
            stream::pending().boxed()
        } else {
            stream::empty().boxed()
        };
        Box::pin(stream::iter(items).chain(tail).map(move |item| {
            let _guard = &guard;
            item
        }))
    }
}

#[async_trait]
impl ProgressTransport for ScriptedTransport {
    async fn connect(&self, _task_id: &str) -> Result<EventStream> {
        self.connects.lock().push(Instant::now());
        let next = self.script.lock().pop_front();
        match next {
            Some(Connection::Refuse(e)) => Err(e),
            Some(Connection::Close(items)) => Ok(self.build(items, false)),
            Some(Connection::Hang(items)) => Ok(self.build(items, true)),
            Some(Connection::Stall) => futures::future::pending().await,
            None => Err(TaskwatchError::Network("connection refused".to_string())),
        }
    }
}

pub(crate) fn event(json: &str) -> Result<String> {
    Ok(json.to_string())
}

pub(crate) fn refused() -> Connection {
    Connection::Refuse(TaskwatchError::Network("connection refused".to_string()))
}

/// Handler that records every callback.
#[derive(Default)]
pub(crate) struct Recorder {
    pub(crate) progress: Mutex<Vec<TaskProgress>>,
    pub(crate) pauses: Mutex<Vec<PauseInfo>>,
    pub(crate) errors: Mutex<Vec<TaskwatchError>>,
}

impl ProgressHandler for Recorder {
    fn on_progress(&self, progress: &TaskProgress) {
        self.progress.lock().push(progress.clone());
    }

    fn on_pause(&self, info: PauseInfo) {
        self.pauses.lock().push(info);
    }

    fn on_error(&self, error: TaskwatchError) {
        self.errors.lock().push(error);
    }
}
