//! Progress stream transport.
//!
//! A transport opens one event stream per call. The subscriber owns the
//! returned stream exclusively and closes it by dropping it.

use std::pin::Pin;

use async_trait::async_trait;
use eventsource_stream::{EventStreamError, Eventsource};
use futures::{Stream, StreamExt, future};
use reqwest::Client;
use reqwest::header::{ACCEPT, CACHE_CONTROL};
use tracing::{debug, info};

use crate::config::SubscriberConfig;
use crate::error::{Result, TaskwatchError};
use crate::http_client::create_streaming_client;

/// Maximum number of body characters kept in HTTP errors.
const ERROR_BODY_PREVIEW: usize = 200;

/// Raw event payloads from one connection.
///
/// Each `Ok` item is the data of one event. An `Err` item or the end of
/// the stream means the connection is gone.
pub type EventStream = Pin<Box<dyn Stream<Item = Result<String>> + Send>>;

/// Opens progress streams for tasks.
#[async_trait]
pub trait ProgressTransport: Send + Sync {
    /// Open a stream for the task. Returning `Ok` counts as a successful open.
    async fn connect(&self, task_id: &str) -> Result<EventStream>;
}

/// Server-sent events transport over HTTP.
pub struct SseTransport {
    client: Client,
    config: SubscriberConfig,
}

impl SseTransport {
    /// Create a transport with a client built from the config.
    pub fn new(config: SubscriberConfig) -> Result<Self> {
        config.validate()?;
        let client = create_streaming_client(config.connect_timeout())?;
        Ok(Self { client, config })
    }
}

#[async_trait]
impl ProgressTransport for SseTransport {
    async fn connect(&self, task_id: &str) -> Result<EventStream> {
        let url = self.config.stream_url(task_id)?;

        let mut req = self
            .client
            .get(url.clone())
            .header(ACCEPT, "text/event-stream")
            .header(CACHE_CONTROL, "no-cache");

        for (key, value) in &self.config.headers {
            req = req.header(key.as_str(), value.as_str());
        }

        debug!(url = %url, "Opening progress stream");
        let resp = req.send().await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            let preview: String = body.chars().take(ERROR_BODY_PREVIEW).collect();
            return Err(TaskwatchError::Http {
                status: status.as_u16(),
                body: preview,
            });
        }

        info!(url = %url, status = %resp.status(), "Progress stream connected");

        let stream = resp
            .bytes_stream()
            .eventsource()
            .filter_map(|event| {
                future::ready(match event {
                    Ok(event) if event.data.is_empty() => None,
                    Ok(event) => Some(Ok(event.data)),
                    Err(EventStreamError::Transport(e)) => Some(Err(TaskwatchError::from(e))),
                    Err(e) => Some(Err(TaskwatchError::Stream(e.to_string()))),
                })
            });

        Ok(Box::pin(stream))
    }
}
