//! Service container for dependency injection.
//!
//! The ServiceContainer builds every plugin service from one configuration
//! and the host-provided collaborators, and keeps them in step when the
//! configuration changes.

use std::sync::Arc;
use std::time::Duration;

use restream_engine::RestreamRegistry;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::HostTaskScheduler;
use crate::cache::{CacheKeys, CatalogCache, KeyValueCache, MemoryCache};
use crate::catalog::{CatalogClient, XtreamClient};
use crate::channels::{CatchupChannel, Channel, SeriesChannel, VodChannel};
use crate::config::{ConfigHandle, PluginConfig};
use crate::failure::FailureTracker;
use crate::live::LiveTvService;
use crate::refresh::{
    CacheRefreshOrchestrator, HostLibraryStore, LibraryPopulator, MetadataProvider, ProgressSink,
    RefreshState, RefreshSummary,
};
use crate::retry::{RetryExecutor, RetryPolicy};
use crate::throttle::RequestThrottle;
use crate::Result;

/// Default shutdown timeout.
const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

/// Collaborators the host may supply; everything else has a default.
pub struct ServiceContainerBuilder {
    config: PluginConfig,
    client: Option<Arc<dyn CatalogClient>>,
    store: Option<Arc<dyn KeyValueCache>>,
    library: Option<Arc<dyn HostLibraryStore>>,
    metadata: Option<Arc<dyn MetadataProvider>>,
    progress_sink: Option<Arc<dyn ProgressSink>>,
    scheduler: Option<Arc<dyn HostTaskScheduler>>,
}

impl ServiceContainerBuilder {
    pub fn with_client(mut self, client: Arc<dyn CatalogClient>) -> Self {
        self.client = Some(client);
        self
    }

    pub fn with_cache_store(mut self, store: Arc<dyn KeyValueCache>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_library_store(mut self, library: Arc<dyn HostLibraryStore>) -> Self {
        self.library = Some(library);
        self
    }

    pub fn with_metadata_provider(mut self, provider: Arc<dyn MetadataProvider>) -> Self {
        self.metadata = Some(provider);
        self
    }

    pub fn with_progress_sink(mut self, sink: Arc<dyn ProgressSink>) -> Self {
        self.progress_sink = Some(sink);
        self
    }

    pub fn with_scheduler(mut self, scheduler: Arc<dyn HostTaskScheduler>) -> Self {
        self.scheduler = Some(scheduler);
        self
    }

    pub fn build(self) -> Result<ServiceContainer> {
        let config = ConfigHandle::new(self.config);
        let current = config.current();

        let client: Arc<dyn CatalogClient> = match self.client {
            Some(client) => client,
            None => Arc::new(XtreamClient::new(current.user_agent.as_deref())?),
        };
        let store = self
            .store
            .unwrap_or_else(|| Arc::new(MemoryCache::default()));

        let keys = Arc::new(CacheKeys::new(current.cache_data_version()));
        let cache = CatalogCache::new(store, Arc::clone(&keys), current.cache_ttl());
        let failures = Arc::new(FailureTracker::new(current.failure_suppression()));
        let retry = Arc::new(RetryExecutor::new(
            RetryPolicy::from_config(&current),
            Arc::clone(&failures),
        ));
        let throttle = Arc::new(RequestThrottle::new(current.request_delay()));
        let cancellation_token = CancellationToken::new();

        let mut orchestrator = CacheRefreshOrchestrator::new(
            Arc::clone(&client),
            cache.clone(),
            Arc::clone(&retry),
            Arc::clone(&throttle),
            config.clone(),
        )
        .with_shutdown_token(cancellation_token.child_token());
        if let Some(library) = self.library {
            orchestrator = orchestrator.with_library(Arc::new(LibraryPopulator::new(library)));
        }
        if let Some(provider) = self.metadata {
            orchestrator = orchestrator.with_metadata_provider(provider);
        }
        if let Some(sink) = self.progress_sink {
            orchestrator = orchestrator.with_progress_sink(sink);
        }

        let registry = Arc::new(RestreamRegistry::new(current.restream_config())?);

        debug!(data_version = %keys.data_version(), "Services created");
        Ok(ServiceContainer {
            series_channel: Arc::new(SeriesChannel::new(
                Arc::clone(&client),
                cache.clone(),
                Arc::clone(&retry),
                config.clone(),
            )),
            vod_channel: Arc::new(VodChannel::new(
                Arc::clone(&client),
                Arc::clone(&retry),
                config.clone(),
            )),
            catchup_channel: Arc::new(CatchupChannel::new(
                Arc::clone(&client),
                Arc::clone(&retry),
                config.clone(),
            )),
            live_tv: Arc::new(LiveTvService::new(
                Arc::clone(&client),
                Arc::clone(&retry),
                config.clone(),
                registry,
            )),
            orchestrator: Arc::new(orchestrator),
            config,
            keys,
            failures,
            retry,
            throttle,
            scheduler: self.scheduler,
            cancellation_token,
        })
    }
}

/// Snapshot for diagnostics.
#[derive(Debug, Clone, Serialize)]
pub struct ServiceStats {
    pub refresh_state: RefreshState,
    pub data_version: String,
    pub cache_generation: u64,
    pub suppressed_requests: usize,
    pub restream_sessions: usize,
}

/// Service container holding all plugin services.
pub struct ServiceContainer {
    /// Current configuration and its change events.
    pub config: ConfigHandle,
    /// Bulk series cache refresh.
    pub orchestrator: Arc<CacheRefreshOrchestrator>,
    pub series_channel: Arc<SeriesChannel>,
    pub vod_channel: Arc<VodChannel>,
    pub catchup_channel: Arc<CatchupChannel>,
    pub live_tv: Arc<LiveTvService>,
    keys: Arc<CacheKeys>,
    failures: Arc<FailureTracker>,
    retry: Arc<RetryExecutor>,
    throttle: Arc<RequestThrottle>,
    scheduler: Option<Arc<dyn HostTaskScheduler>>,
    /// Cancellation token for graceful shutdown.
    cancellation_token: CancellationToken,
}

impl ServiceContainer {
    pub fn builder(config: PluginConfig) -> ServiceContainerBuilder {
        ServiceContainerBuilder {
            config,
            client: None,
            store: None,
            library: None,
            metadata: None,
            progress_sink: None,
            scheduler: None,
        }
    }

    /// Browse channels the configuration makes visible.
    pub fn channels(&self) -> Vec<Arc<dyn Channel>> {
        let config = self.config.current();
        let all: [Arc<dyn Channel>; 3] = [
            self.catchup_channel.clone(),
            self.series_channel.clone(),
            self.vod_channel.clone(),
        ];
        all.into_iter().filter(|c| c.is_enabled(&config)).collect()
    }

    pub fn failures(&self) -> &FailureTracker {
        &self.failures
    }

    /// Apply a new configuration from the host.
    ///
    /// Runtime knobs (retry, throttle, suppression window, cache TTL) take
    /// effect immediately. When the cache data version changes the series
    /// cache is invalidated and the host is asked to re-read channels.
    pub fn update_config(&self, config: PluginConfig) -> Result<()> {
        let config = config.normalized();
        config.validate()?;

        let previous = self.config.replace(config);
        let current = self.config.current();

        self.retry.set_policy(RetryPolicy::from_config(&current));
        self.failures.set_ttl(current.failure_suppression());
        self.throttle.set_min_interval(current.request_delay());
        self.orchestrator.cache().set_ttl(current.cache_ttl());

        let version = current.cache_data_version();
        let previous_version = previous.cache_data_version();
        if version != previous_version {
            info!(
                previous = %previous_version,
                current = %version,
                "Cache data version changed, invalidating series cache"
            );
            self.keys.set_data_version(version);
            self.orchestrator.invalidate_cache();
            if let Some(scheduler) = &self.scheduler {
                scheduler.request_channel_refresh();
            }
        }

        if let Some(scheduler) = &self.scheduler {
            scheduler.refresh_settings_changed(&current, current.enable_series_caching);
        }
        debug!("Configuration applied");
        Ok(())
    }

    /// Entry point of the host's scheduled refresh task.
    ///
    /// `Ok(None)` when series caching is disabled.
    pub async fn run_scheduled_refresh(&self) -> Result<Option<RefreshSummary>> {
        let config = self.config.current();
        if !config.enable_series_caching {
            debug!("Series caching disabled, skipping scheduled refresh");
            return Ok(None);
        }
        config.validate()?;

        let summary = self.orchestrator.refresh().await?;
        if let Some(scheduler) = &self.scheduler {
            scheduler.request_channel_refresh();
        }
        Ok(Some(summary))
    }

    /// Shutdown all services gracefully.
    pub async fn shutdown(&self) -> Result<()> {
        self.shutdown_with_timeout(DEFAULT_SHUTDOWN_TIMEOUT).await
    }

    /// Shutdown all services gracefully with a custom timeout.
    pub async fn shutdown_with_timeout(&self, timeout: Duration) -> Result<()> {
        info!("Shutting down services (timeout: {:?})", timeout);

        // Signal all background work to stop
        self.cancellation_token.cancel();

        let registry = self.live_tv.registry();
        let sessions = registry.len();
        if tokio::time::timeout(timeout, registry.close_all())
            .await
            .is_err()
        {
            warn!(sessions, "Shutdown timeout reached while closing restream sessions");
        }

        info!("Services shut down");
        Ok(())
    }

    /// Get the cancellation token for external use.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancellation_token.clone()
    }

    /// Check if shutdown has been requested.
    pub fn is_shutting_down(&self) -> bool {
        self.cancellation_token.is_cancelled()
    }

    pub fn stats(&self) -> ServiceStats {
        ServiceStats {
            refresh_state: self.orchestrator.status().state,
            data_version: self.keys.data_version(),
            cache_generation: self.keys.generation(),
            suppressed_requests: self.failures.len(),
            restream_sessions: self.live_tv.registry().len(),
        }
    }
}
