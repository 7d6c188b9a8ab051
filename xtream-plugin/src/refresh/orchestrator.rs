use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use futures::TryStreamExt;
use parking_lot::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use super::population::{LibraryPopulator, expected_items};
use super::status::{
    CATEGORIES_END, MAX_PROGRESS_BEFORE_COMPLETION, PROCESSING_END, ProgressSink, RefreshState,
    RefreshStatus, RefreshSummary, SERIES_LISTS_END,
};
use crate::cache::CatalogCache;
use crate::catalog::{
    CatalogClient, CatalogError, CatalogRequest, Category, Series, SeriesStreamInfo,
};
use crate::config::{ConfigHandle, ConnectionInfo, PluginConfig};
use crate::retry::RetryExecutor;
use crate::throttle::RequestThrottle;
use crate::{Error, Result};

/// Secondary metadata lookup run after the catalog pass, e.g. against an
/// external movie database.
#[async_trait]
pub trait MetadataProvider: Send + Sync {
    async fn lookup(
        &self,
        series: &Series,
        info: &SeriesStreamInfo,
        cancel: &CancellationToken,
    ) -> std::result::Result<Option<serde_json::Value>, CatalogError>;
}

#[derive(Default)]
struct Counters {
    processed: AtomicUsize,
    seasons: AtomicUsize,
    episodes: AtomicUsize,
    errors: AtomicUsize,
    done: AtomicUsize,
}

/// Shared state of one refresh pass.
struct Pass {
    config: Arc<PluginConfig>,
    conn: ConnectionInfo,
    token: CancellationToken,
    counters: Counters,
}

/// Bulk-populates the catalog cache: categories, then series lists, then
/// every series' seasons and episodes with bounded parallelism.
///
/// At most one pass runs at a time; a request arriving during a pass is
/// rejected with [`Error::RefreshInProgress`]. Cancellation keeps whatever
/// was already cached.
pub struct CacheRefreshOrchestrator {
    client: Arc<dyn CatalogClient>,
    cache: CatalogCache,
    retry: Arc<RetryExecutor>,
    throttle: Arc<RequestThrottle>,
    config: ConfigHandle,
    metadata: Option<Arc<dyn MetadataProvider>>,
    library: Option<Arc<LibraryPopulator>>,
    progress_sink: Option<Arc<dyn ProgressSink>>,
    shutdown: CancellationToken,
    run_lock: tokio::sync::Mutex<()>,
    cancel_scope: Mutex<CancellationToken>,
    status: RwLock<RefreshStatus>,
}

impl CacheRefreshOrchestrator {
    pub fn new(
        client: Arc<dyn CatalogClient>,
        cache: CatalogCache,
        retry: Arc<RetryExecutor>,
        throttle: Arc<RequestThrottle>,
        config: ConfigHandle,
    ) -> Self {
        Self {
            client,
            cache,
            retry,
            throttle,
            config,
            metadata: None,
            library: None,
            progress_sink: None,
            shutdown: CancellationToken::new(),
            run_lock: tokio::sync::Mutex::new(()),
            cancel_scope: Mutex::new(CancellationToken::new()),
            status: RwLock::new(RefreshStatus::default()),
        }
    }

    pub fn with_metadata_provider(mut self, provider: Arc<dyn MetadataProvider>) -> Self {
        self.metadata = Some(provider);
        self
    }

    pub fn with_library(mut self, populator: Arc<LibraryPopulator>) -> Self {
        self.library = Some(populator);
        self
    }

    pub fn with_progress_sink(mut self, sink: Arc<dyn ProgressSink>) -> Self {
        self.progress_sink = Some(sink);
        self
    }

    /// Cancel every current and future pass when `token` is cancelled.
    pub fn with_shutdown_token(mut self, token: CancellationToken) -> Self {
        self.shutdown = token;
        self
    }

    pub fn cache(&self) -> &CatalogCache {
        &self.cache
    }

    pub fn status(&self) -> RefreshStatus {
        self.status.read().clone()
    }

    pub fn is_refreshing(&self) -> bool {
        self.status.read().is_refreshing
    }

    /// Signal the running pass to stop. Returns false when nothing is running.
    pub fn cancel_refresh(&self) -> bool {
        if !self.is_refreshing() {
            return false;
        }
        info!("Cache refresh cancellation requested");
        self.cancel_scope.lock().cancel();
        true
    }

    /// Orphan every cached entry; the next reads miss until repopulated.
    pub fn invalidate_cache(&self) {
        let generation = self.cache.invalidate();
        info!(generation, "Series cache invalidated");
    }

    /// Run one refresh pass.
    #[instrument(skip(self), name = "cache_refresh")]
    pub async fn refresh(&self) -> Result<RefreshSummary> {
        let Ok(_guard) = self.run_lock.try_lock() else {
            debug!("Refresh requested while another is running");
            return Err(Error::RefreshInProgress);
        };

        let token = self.shutdown.child_token();
        *self.cancel_scope.lock() = token.clone();

        let config = self.config.current();
        self.throttle.set_min_interval(config.request_delay());

        {
            let mut status = self.status.write();
            *status = RefreshStatus {
                state: RefreshState::Starting,
                is_refreshing: true,
                phase: RefreshState::Starting.label().to_string(),
                started_at: Some(Utc::now()),
                ..Default::default()
            };
        }
        self.report(0.0, RefreshState::Starting.label());
        info!(
            parallelism = config.refresh_parallelism,
            request_delay_ms = config.request_delay_ms,
            "Cache refresh started"
        );

        let pass = Pass {
            conn: config.connection(),
            config,
            token,
            counters: Counters::default(),
        };
        let result = self.run(&pass).await;
        self.finish(&pass, result)
    }

    fn finish(
        &self,
        pass: &Pass,
        result: Result<RefreshSummary>,
    ) -> Result<RefreshSummary> {
        let now = Utc::now();
        let mut status = self.status.write();
        status.is_refreshing = false;
        status.completed_at = Some(now);

        match result {
            Ok(summary) => {
                self.cache.mark_refreshed(now);
                status.state = RefreshState::Completed;
                status.progress = 1.0;
                status.phase = RefreshState::Completed.label().to_string();
                status.summary = Some(summary.clone());
                if let Some(sink) = &self.progress_sink {
                    sink.report(1.0, &status.phase);
                }
                info!(
                    categories = summary.categories,
                    series = summary.series_total,
                    processed = summary.series_processed,
                    seasons = summary.seasons,
                    episodes = summary.episodes,
                    errors = summary.errors,
                    "Cache refresh completed"
                );
                Ok(summary)
            }
            Err(e) if e.is_cancelled() => {
                status.state = RefreshState::Cancelled;
                status.phase = RefreshState::Cancelled.label().to_string();
                status.summary = Some(self.partial_summary(pass));
                warn!(
                    processed = pass.counters.processed.load(Ordering::Relaxed),
                    "Cache refresh cancelled, partial results kept"
                );
                Err(Error::Cancelled)
            }
            Err(e) => {
                status.state = RefreshState::Failed;
                status.phase = RefreshState::Failed.label().to_string();
                status.last_error = Some(e.to_string());
                status.summary = Some(self.partial_summary(pass));
                error!(error = %e, "Cache refresh failed");
                Err(e)
            }
        }
    }

    fn partial_summary(&self, pass: &Pass) -> RefreshSummary {
        let c = &pass.counters;
        RefreshSummary {
            series_processed: c.processed.load(Ordering::Relaxed),
            seasons: c.seasons.load(Ordering::Relaxed),
            episodes: c.episodes.load(Ordering::Relaxed),
            errors: c.errors.load(Ordering::Relaxed),
            ..Default::default()
        }
    }

    /// Enter `state` and announce its phase at the current progress.
    fn transition(&self, state: RefreshState) {
        debug!(%state, "Refresh state changed");
        let mut status = self.status.write();
        status.state = state;
        status.phase = state.label().to_string();
        if let Some(sink) = &self.progress_sink {
            sink.report(status.progress, &status.phase);
        }
    }

    /// Raise progress to `fraction` (never lowering it) and notify the sink.
    fn report(&self, fraction: f64, phase: &str) {
        let mut status = self.status.write();
        let capped = fraction.clamp(0.0, MAX_PROGRESS_BEFORE_COMPLETION);
        if capped > status.progress {
            status.progress = capped;
        }
        if status.phase != phase {
            status.phase = phase.to_string();
        }
        if let Some(sink) = &self.progress_sink {
            sink.report(status.progress, phase);
        }
    }

    async fn run(&self, pass: &Pass) -> Result<RefreshSummary> {
        self.transition(RefreshState::FetchingCategories);
        let categories = self.fetch_categories(pass).await?;
        self.report(CATEGORIES_END, RefreshState::FetchingCategories.label());

        self.transition(RefreshState::FetchingSeriesLists);
        let worklist = self.fetch_series_lists(pass, &categories).await?;

        self.transition(RefreshState::ProcessingSeriesParallel);
        self.process_series(pass, &worklist).await?;

        let c = &pass.counters;
        let mut summary = RefreshSummary {
            categories: categories.len(),
            series_total: worklist.len(),
            series_processed: c.processed.load(Ordering::Relaxed),
            seasons: c.seasons.load(Ordering::Relaxed),
            episodes: c.episodes.load(Ordering::Relaxed),
            errors: 0,
            metadata_updated: 0,
            library_added: 0,
        };

        let metadata = self
            .metadata
            .as_ref()
            .filter(|_| pass.config.enable_metadata_lookup);
        if metadata.is_some() || self.library.is_some() {
            self.transition(RefreshState::Enrichment);
        }
        if let Some(provider) = metadata {
            summary.metadata_updated = self.enrich(pass, provider.as_ref(), &worklist).await?;
        }

        if let Some(library) = &self.library {
            self.report(PROCESSING_END, "Updating library");
            let expected = expected_items(&self.cache, &worklist);
            let report = library.reconcile(&expected, &pass.token).await?;
            summary.library_added = report.added;
        }

        summary.errors = c.errors.load(Ordering::Relaxed);
        Ok(summary)
    }

    async fn fetch_categories(&self, pass: &Pass) -> Result<Vec<Category>> {
        let url = CatalogRequest::SeriesCategories.api_url(&pass.conn);

        let categories = self
            .retry
            .execute(&url, &pass.token, |_| async move {
                self.throttle.acquire(&pass.token).await?;
                self.client.series_categories(&pass.conn, &pass.token).await
            })
            .await?
            .ok_or_else(|| {
                Error::Other("series categories unavailable after repeated failures".to_string())
            })?;

        let selected = &pass.config.series_categories;
        let categories: Vec<Category> = categories
            .into_iter()
            .filter(|c| selected.is_empty() || selected.contains(&c.category_id))
            .collect();

        debug!(count = categories.len(), "Series categories fetched");
        Ok(self.cache.put_series_categories(categories).to_vec())
    }

    /// Fetch each category's series and flatten them into one worklist.
    async fn fetch_series_lists(
        &self,
        pass: &Pass,
        categories: &[Category],
    ) -> Result<Vec<(i32, Series)>> {
        let mut worklist = Vec::new();
        let mut seen = HashSet::new();
        let total = categories.len().max(1) as f64;

        for (index, category) in categories.iter().enumerate() {
            if pass.token.is_cancelled() {
                return Err(Error::Cancelled);
            }

            let request = CatalogRequest::Series {
                category_id: Some(category.category_id),
            };
            let url = request.api_url(&pass.conn);

            let fetched = self
                .retry
                .execute(&url, &pass.token, |_| async move {
                    self.throttle.acquire(&pass.token).await?;
                    self.client
                        .series(&pass.conn, Some(category.category_id), &pass.token)
                        .await
                })
                .await;

            match fetched {
                Ok(Some(series)) => {
                    let series = self.cache.put_series_list(category.category_id, series);
                    for show in series.iter() {
                        if seen.insert(show.series_id) {
                            worklist.push((category.category_id, show.clone()));
                        }
                    }
                }
                Ok(None) => {
                    pass.counters.errors.fetch_add(1, Ordering::Relaxed);
                    warn!(
                        category_id = category.category_id,
                        "Series list unavailable, skipping category"
                    );
                }
                Err(CatalogError::Cancelled) => return Err(Error::Cancelled),
                Err(e) => {
                    pass.counters.errors.fetch_add(1, Ordering::Relaxed);
                    warn!(
                        category_id = category.category_id,
                        error = %e,
                        "Failed to fetch series list"
                    );
                }
            }

            let fraction = CATEGORIES_END
                + (SERIES_LISTS_END - CATEGORIES_END) * (index + 1) as f64 / total;
            self.report(fraction, RefreshState::FetchingSeriesLists.label());
        }

        info!(series = worklist.len(), "Series worklist built");
        Ok(worklist)
    }

    async fn process_series(&self, pass: &Pass, worklist: &[(i32, Series)]) -> Result<()> {
        let parallelism = pass.config.refresh_parallelism.max(1) as usize;
        let total = worklist.len().max(1) as f64;

        futures::stream::iter(worklist.iter().map(Ok::<_, Error>))
            .try_for_each_concurrent(parallelism, |(_, show)| async move {
                if pass.token.is_cancelled() {
                    return Err(Error::Cancelled);
                }

                self.process_one(pass, show).await?;

                let done = pass.counters.done.fetch_add(1, Ordering::Relaxed) + 1;
                let fraction =
                    SERIES_LISTS_END + (PROCESSING_END - SERIES_LISTS_END) * done as f64 / total;
                self.report(fraction, RefreshState::ProcessingSeriesParallel.label());
                Ok(())
            })
            .await
    }

    /// Fetch one series' info once and cache seasons and episodes from it.
    ///
    /// Only cancellation is returned as an error; everything else is
    /// counted and skipped.
    async fn process_one(&self, pass: &Pass, show: &Series) -> Result<()> {
        let series_id = show.series_id;
        let url = CatalogRequest::SeriesInfo { series_id }.api_url(&pass.conn);

        let fetched = self
            .retry
            .execute(&url, &pass.token, |_| async move {
                self.throttle.acquire(&pass.token).await?;
                self.client.series_info(&pass.conn, series_id, &pass.token).await
            })
            .await;

        match fetched {
            Ok(Some(info)) => {
                let (seasons, episodes) = self.cache.put_series_info(series_id, info);
                let c = &pass.counters;
                c.processed.fetch_add(1, Ordering::Relaxed);
                c.seasons.fetch_add(seasons, Ordering::Relaxed);
                c.episodes.fetch_add(episodes, Ordering::Relaxed);
                debug!(series_id, seasons, episodes, "Series cached");
            }
            Ok(None) => {
                pass.counters.errors.fetch_add(1, Ordering::Relaxed);
                debug!(series_id, "Series info unavailable, skipped");
            }
            Err(CatalogError::Cancelled) => return Err(Error::Cancelled),
            Err(e) => {
                pass.counters.errors.fetch_add(1, Ordering::Relaxed);
                warn!(series_id, error = %e, "Failed to process series");
            }
        }
        Ok(())
    }

    async fn enrich(
        &self,
        pass: &Pass,
        provider: &dyn MetadataProvider,
        worklist: &[(i32, Series)],
    ) -> Result<usize> {
        let total = worklist.len().max(1) as f64;
        let mut updated = 0;

        for (index, (_, show)) in worklist.iter().enumerate() {
            if pass.token.is_cancelled() {
                return Err(Error::Cancelled);
            }
            let Some(info) = self.cache.series_info(show.series_id) else {
                continue;
            };

            match provider.lookup(show, &info, &pass.token).await {
                Ok(Some(metadata)) => {
                    self.cache.put_metadata(show.series_id, metadata);
                    updated += 1;
                }
                Ok(None) => {}
                Err(CatalogError::Cancelled) => return Err(Error::Cancelled),
                Err(e) => {
                    warn!(series_id = show.series_id, error = %e, "Metadata lookup failed");
                }
            }

            let fraction = PROCESSING_END + (1.0 - PROCESSING_END) * (index + 1) as f64 / total;
            self.report(fraction, RefreshState::Enrichment.label());
        }

        Ok(updated)
    }
}
