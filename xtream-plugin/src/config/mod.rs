//! Plugin configuration.
//!
//! [`PluginConfig`] is the operator-editable settings document. Every field has
//! a default so partially filled documents deserialize, and
//! [`PluginConfig::normalized`] clamps tunables into their supported ranges.
//! [`ConfigHandle`] shares the current document between services and
//! broadcasts updates.

pub mod events;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use restream_engine::RestreamConfig;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use url::Url;

use crate::{Error, Result};

pub use events::{ConfigEventBroadcaster, ConfigUpdateEvent};

pub const MIN_PARALLELISM: u32 = 1;
pub const MAX_PARALLELISM: u32 = 10;
pub const MAX_REQUEST_DELAY_MS: u64 = 1000;
pub const MAX_RETRY_ATTEMPTS: u32 = 10;
pub const MIN_RETRY_INITIAL_DELAY_MS: u64 = 100;
pub const MAX_RETRY_INITIAL_DELAY_MS: u64 = 10_000;
const MIN_RESTREAM_BUFFER_BYTES: usize = 64 * 1024;

/// Number of hex characters of the settings digest used in cache keys.
const DATA_VERSION_LEN: usize = 12;

/// Operator-editable plugin settings.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PluginConfig {
    // Provider connection
    pub base_url: String,
    pub username: String,
    pub password: String,
    pub user_agent: Option<String>,

    // Visibility
    pub is_tv_visible: bool,
    pub is_catchup_visible: bool,
    pub is_series_visible: bool,
    pub is_vod_visible: bool,

    /// Selected category ids. Empty means every category.
    pub live_tv_categories: Vec<i32>,
    pub vod_categories: Vec<i32>,
    pub series_categories: Vec<i32>,

    // Series caching
    pub enable_series_caching: bool,
    pub refresh_parallelism: u32,
    pub request_delay_ms: u64,
    pub cache_ttl_hours: u32,
    pub enable_metadata_lookup: bool,

    // Retry policy
    pub retry_max_attempts: u32,
    pub retry_initial_delay_ms: u64,
    pub failure_suppression_hours: u32,
    pub raise_on_retry_exhaustion: bool,

    // Live restreaming
    pub enable_restreaming: bool,
    pub restream_buffer_bytes: usize,
}

impl Default for PluginConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            username: String::new(),
            password: String::new(),
            user_agent: None,
            is_tv_visible: true,
            is_catchup_visible: false,
            is_series_visible: true,
            is_vod_visible: true,
            live_tv_categories: Vec::new(),
            vod_categories: Vec::new(),
            series_categories: Vec::new(),
            enable_series_caching: true,
            refresh_parallelism: 3,
            request_delay_ms: 100,
            cache_ttl_hours: 24,
            enable_metadata_lookup: false,
            retry_max_attempts: 3,
            retry_initial_delay_ms: 1000,
            failure_suppression_hours: 24,
            raise_on_retry_exhaustion: false,
            enable_restreaming: true,
            restream_buffer_bytes: restream_engine::DEFAULT_BUFFER_CAPACITY,
        }
    }
}

impl fmt::Debug for PluginConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginConfig")
            .field("base_url", &self.base_url)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("enable_series_caching", &self.enable_series_caching)
            .field("refresh_parallelism", &self.refresh_parallelism)
            .field("request_delay_ms", &self.request_delay_ms)
            .field("retry_max_attempts", &self.retry_max_attempts)
            .finish_non_exhaustive()
    }
}

impl PluginConfig {
    /// Copy with every tunable clamped into its supported range.
    pub fn normalized(mut self) -> Self {
        self.base_url = self.base_url.trim().trim_end_matches('/').to_string();
        self.username = self.username.trim().to_string();
        self.refresh_parallelism = self
            .refresh_parallelism
            .clamp(MIN_PARALLELISM, MAX_PARALLELISM);
        self.request_delay_ms = self.request_delay_ms.min(MAX_REQUEST_DELAY_MS);
        self.cache_ttl_hours = self.cache_ttl_hours.max(1);
        self.retry_max_attempts = self.retry_max_attempts.min(MAX_RETRY_ATTEMPTS);
        self.retry_initial_delay_ms = self
            .retry_initial_delay_ms
            .clamp(MIN_RETRY_INITIAL_DELAY_MS, MAX_RETRY_INITIAL_DELAY_MS);
        self.failure_suppression_hours = self.failure_suppression_hours.max(1);
        self.restream_buffer_bytes = self.restream_buffer_bytes.max(MIN_RESTREAM_BUFFER_BYTES);
        self
    }

    /// Reject settings the plugin cannot work with.
    pub fn validate(&self) -> Result<()> {
        let url = Url::parse(&self.base_url)
            .map_err(|e| Error::config(format!("invalid provider URL `{}`: {e}", self.base_url)))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(Error::config(format!(
                "provider URL must be http or https, got `{}`",
                url.scheme()
            )));
        }
        if self.username.is_empty() {
            return Err(Error::config("provider username is empty"));
        }
        Ok(())
    }

    pub fn connection(&self) -> ConnectionInfo {
        ConnectionInfo::new(&self.base_url, &self.username, &self.password)
    }

    pub fn request_delay(&self) -> Duration {
        Duration::from_millis(self.request_delay_ms)
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(u64::from(self.cache_ttl_hours) * 3600)
    }

    pub fn failure_suppression(&self) -> Duration {
        Duration::from_secs(u64::from(self.failure_suppression_hours) * 3600)
    }

    pub fn restream_config(&self) -> RestreamConfig {
        let config = RestreamConfig::default().with_buffer_capacity(self.restream_buffer_bytes);
        match &self.user_agent {
            Some(ua) if !ua.is_empty() => config.with_user_agent(ua.clone()),
            _ => config,
        }
    }

    /// Short digest of the settings that change what gets cached.
    ///
    /// It prefixes every cache key, so changing any of these settings makes
    /// old entries unreachable.
    pub fn cache_data_version(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.base_url.as_bytes());
        hasher.update([0]);
        hasher.update(self.username.as_bytes());
        hasher.update([0]);
        for list in [&self.series_categories, &self.vod_categories] {
            let mut ids = list.clone();
            ids.sort_unstable();
            for id in ids {
                hasher.update(id.to_be_bytes());
            }
            hasher.update([0xff]);
        }
        hasher.update([u8::from(self.enable_metadata_lookup)]);

        let digest = hex::encode(hasher.finalize());
        digest[..DATA_VERSION_LEN].to_string()
    }
}

/// Provider credentials passed to every catalog call.
#[derive(Clone, PartialEq, Eq)]
pub struct ConnectionInfo {
    pub base_url: String,
    pub username: String,
    pub password: String,
}

impl ConnectionInfo {
    pub fn new(
        base_url: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        let base_url: String = base_url.into();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            username: username.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for ConnectionInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionInfo")
            .field("base_url", &self.base_url)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Shared, swappable view of the current configuration.
#[derive(Clone)]
pub struct ConfigHandle {
    current: Arc<RwLock<Arc<PluginConfig>>>,
    events: ConfigEventBroadcaster,
}

impl ConfigHandle {
    pub fn new(config: PluginConfig) -> Self {
        Self {
            current: Arc::new(RwLock::new(Arc::new(config.normalized()))),
            events: ConfigEventBroadcaster::new(),
        }
    }

    pub fn current(&self) -> Arc<PluginConfig> {
        Arc::clone(&self.current.read())
    }

    pub fn events(&self) -> &ConfigEventBroadcaster {
        &self.events
    }

    /// Replace the configuration and return the previous one.
    pub fn replace(&self, config: PluginConfig) -> Arc<PluginConfig> {
        let next = Arc::new(config.normalized());
        let previous = std::mem::replace(&mut *self.current.write(), Arc::clone(&next));

        if previous.cache_data_version() != next.cache_data_version() {
            self.events.publish(ConfigUpdateEvent::CacheDataVersionChanged {
                previous: previous.cache_data_version(),
                current: next.cache_data_version(),
            });
        }
        self.events.publish(ConfigUpdateEvent::Updated);
        previous
    }
}
