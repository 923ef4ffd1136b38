//! HTTP client factory for progress streams.
//!
//! Event streams stay open for as long as the remote task runs, so the
//! clients built here carry a connect timeout but no total request
//! timeout. Stalled streams are caught by the subscriber's idle timeout
//! instead.

use std::time::Duration;

use reqwest::Client;

use crate::error::{Result, TaskwatchError};

/// User-Agent string for all progress requests.
pub const USER_AGENT: &str = concat!("taskwatch/", env!("CARGO_PKG_VERSION"));

/// Default timeout for establishing a connection (10 seconds).
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Connection pool idle timeout so DNS is re-resolved between reconnects.
pub const POOL_IDLE_TIMEOUT: Duration = Duration::from_secs(60);

/// Creates a client suited to long-lived SSE responses.
///
/// Includes: User-Agent, tcp_nodelay, connect timeout, pool idle timeout.
pub fn create_streaming_client(connect_timeout: Duration) -> Result<Client> {
    create_client_builder(connect_timeout)
        .build()
        .map_err(|e| TaskwatchError::Config(format!("Failed to build HTTP client: {e}")))
}

/// Creates a client builder with the standard streaming configuration.
fn create_client_builder(connect_timeout: Duration) -> reqwest::ClientBuilder {
    Client::builder()
        .user_agent(USER_AGENT)
        .connect_timeout(connect_timeout)
        .tcp_nodelay(true)
        .pool_idle_timeout(POOL_IDLE_TIMEOUT)
        .pool_max_idle_per_host(4)
}
