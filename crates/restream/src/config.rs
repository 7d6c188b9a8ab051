use std::time::Duration;

use reqwest::Client;
use reqwest::header::{HeaderMap, HeaderValue};
use tracing::debug;

use crate::RestreamError;

pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/142.0.0.0 Safari/537.36";

/// 16 MiB of live stream history shared by every consumer of a session.
pub const DEFAULT_BUFFER_CAPACITY: usize = 16 * 1024 * 1024;

/// Configurable options for a restream session
#[derive(Debug, Clone)]
pub struct RestreamConfig {
    /// Size of the circular buffer in bytes
    pub buffer_capacity: usize,

    /// Upper bound for a single consumer read
    pub read_chunk_size: usize,

    /// How long an idle reader sleeps before re-checking the write head
    /// when no write notification arrives
    pub poll_interval: Duration,

    /// Connection timeout (time to establish initial connection)
    pub connect_timeout: Duration,

    /// User agent string
    pub user_agent: String,

    /// Custom HTTP headers for upstream requests
    pub headers: HeaderMap,
}

impl Default for RestreamConfig {
    fn default() -> Self {
        Self {
            buffer_capacity: DEFAULT_BUFFER_CAPACITY,
            read_chunk_size: 64 * 1024,
            poll_interval: Duration::from_millis(50),
            connect_timeout: Duration::from_secs(30),
            user_agent: DEFAULT_USER_AGENT.to_owned(),
            headers: RestreamConfig::get_default_headers(),
        }
    }
}

impl RestreamConfig {
    pub fn with_buffer_capacity(mut self, capacity: usize) -> Self {
        self.buffer_capacity = capacity;
        self
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    pub fn validate(&self) -> Result<(), RestreamError> {
        if self.buffer_capacity == 0 {
            return Err(RestreamError::Configuration {
                reason: "buffer capacity must be greater than zero".to_string(),
            });
        }
        if self.read_chunk_size == 0 {
            return Err(RestreamError::Configuration {
                reason: "read chunk size must be greater than zero".to_string(),
            });
        }
        Ok(())
    }

    pub fn get_default_headers() -> HeaderMap {
        let mut default_headers = HeaderMap::new();
        default_headers.insert(reqwest::header::ACCEPT, HeaderValue::from_static("*/*"));
        default_headers.insert(
            reqwest::header::CONNECTION,
            HeaderValue::from_static("keep-alive"),
        );
        default_headers
    }
}

/// Create the upstream client.
///
/// Redirects are never followed automatically: the restreamer follows exactly
/// one hop by hand so a provider that downgrades https to http still works.
/// No overall request timeout is set because live bodies never end.
pub fn create_client(config: &RestreamConfig) -> Result<Client, RestreamError> {
    let mut client_builder = Client::builder()
        .user_agent(&config.user_agent)
        .default_headers(config.headers.clone())
        .tcp_nodelay(true)
        .redirect(reqwest::redirect::Policy::none());

    if !config.connect_timeout.is_zero() {
        client_builder = client_builder.connect_timeout(config.connect_timeout);
    }

    debug!(user_agent = %config.user_agent, "Building restream client");
    client_builder.build().map_err(RestreamError::from)
}
