//! Cache refresh orchestration against an in-process provider.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use reqwest::StatusCode;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use xtream_plugin::cache::{CacheKeys, CatalogCache, MemoryCache};
use xtream_plugin::catalog::{
    CatalogClient, CatalogError, CatalogRequest, CatalogResult, Category, EpgListings, Episode,
    LiveStream, Series, SeriesStreamInfo, VodStream,
};
use xtream_plugin::config::{ConfigHandle, ConnectionInfo, PluginConfig};
use xtream_plugin::failure::FailureTracker;
use xtream_plugin::identifier::ItemId;
use xtream_plugin::refresh::{
    CacheRefreshOrchestrator, HostLibraryStore, LibraryItem, LibraryPopulator, ProgressSink,
    RefreshState,
};
use xtream_plugin::retry::{RetryExecutor, RetryPolicy};
use xtream_plugin::throttle::RequestThrottle;
use xtream_plugin::{Error, Result};

const SLOW_SERIES: i32 = 3;

#[derive(Default)]
struct FakeProvider {
    categories: Vec<Category>,
    series: HashMap<i32, Vec<Series>>,
    infos: HashMap<i32, SeriesStreamInfo>,
    unavailable: HashSet<i32>,
    categories_status: Option<StatusCode>,
    /// Series whose info only arrives after this delay.
    slow: Option<Duration>,
    category_calls: AtomicUsize,
    info_calls: AtomicUsize,
    info_started: Mutex<Vec<Instant>>,
}

#[async_trait]
impl CatalogClient for FakeProvider {
    async fn live_categories(
        &self,
        _: &ConnectionInfo,
        _: &CancellationToken,
    ) -> CatalogResult<Vec<Category>> {
        Ok(Vec::new())
    }

    async fn vod_categories(
        &self,
        _: &ConnectionInfo,
        _: &CancellationToken,
    ) -> CatalogResult<Vec<Category>> {
        Ok(Vec::new())
    }

    async fn series_categories(
        &self,
        _: &ConnectionInfo,
        _: &CancellationToken,
    ) -> CatalogResult<Vec<Category>> {
        self.category_calls.fetch_add(1, Ordering::SeqCst);
        match self.categories_status {
            Some(status) => Err(CatalogError::status(status, "categories")),
            None => Ok(self.categories.clone()),
        }
    }

    async fn live_streams(
        &self,
        _: &ConnectionInfo,
        _: Option<i32>,
        _: &CancellationToken,
    ) -> CatalogResult<Vec<LiveStream>> {
        Ok(Vec::new())
    }

    async fn vod_streams(
        &self,
        _: &ConnectionInfo,
        _: Option<i32>,
        _: &CancellationToken,
    ) -> CatalogResult<Vec<VodStream>> {
        Ok(Vec::new())
    }

    async fn series(
        &self,
        _: &ConnectionInfo,
        category_id: Option<i32>,
        _: &CancellationToken,
    ) -> CatalogResult<Vec<Series>> {
        Ok(category_id
            .and_then(|id| self.series.get(&id).cloned())
            .unwrap_or_default())
    }

    async fn series_info(
        &self,
        _: &ConnectionInfo,
        series_id: i32,
        cancel: &CancellationToken,
    ) -> CatalogResult<SeriesStreamInfo> {
        self.info_calls.fetch_add(1, Ordering::SeqCst);
        self.info_started.lock().push(Instant::now());
        if self.unavailable.contains(&series_id) {
            return Err(CatalogError::status(
                StatusCode::SERVICE_UNAVAILABLE,
                format!("series/{series_id}"),
            ));
        }
        if series_id == SLOW_SERIES
            && let Some(delay) = self.slow
        {
            tokio::select! {
                _ = cancel.cancelled() => return Err(CatalogError::Cancelled),
                _ = tokio::time::sleep(delay) => {}
            }
        }
        Ok(self.infos.get(&series_id).cloned().unwrap_or_default())
    }

    async fn epg(
        &self,
        _: &ConnectionInfo,
        _: i32,
        _: &CancellationToken,
    ) -> CatalogResult<EpgListings> {
        Ok(EpgListings::default())
    }
}

#[derive(Default)]
struct FakeLibrary {
    items: Mutex<HashMap<ItemId, Option<ItemId>>>,
}

#[async_trait]
impl HostLibraryStore for FakeLibrary {
    async fn contains(&self, id: ItemId) -> Result<bool> {
        Ok(self.items.lock().contains_key(&id))
    }

    async fn child_count(&self, id: ItemId) -> Result<usize> {
        Ok(self
            .items
            .lock()
            .values()
            .filter(|parent| **parent == Some(id))
            .count())
    }

    async fn add(&self, item: &LibraryItem) -> Result<()> {
        self.items.lock().insert(item.id, item.parent);
        Ok(())
    }

    async fn refresh_children(&self, _: ItemId) -> Result<()> {
        Ok(())
    }
}

#[derive(Default)]
struct RecordingSink {
    updates: Mutex<Vec<(f64, String)>>,
}

impl ProgressSink for RecordingSink {
    fn report(&self, progress: f64, phase: &str) {
        self.updates.lock().push((progress, phase.to_string()));
    }
}

fn category(id: i32) -> Category {
    Category {
        category_id: id,
        category_name: format!("Category {id}"),
        parent_id: 0,
    }
}

fn series(id: i32) -> Series {
    Series {
        series_id: id,
        name: format!("Series {id}"),
        ..Default::default()
    }
}

fn info(series_id: i32, seasons: i32, episodes_per_season: i32) -> SeriesStreamInfo {
    let mut episodes = BTreeMap::new();
    for season in 1..=seasons {
        let list = (1..=episodes_per_season)
            .map(|n| Episode {
                id: series_id * 1000 + season * 100 + n,
                episode_num: n,
                title: format!("S{season}E{n}"),
                season,
                ..Default::default()
            })
            .collect();
        episodes.insert(season, list);
    }
    SeriesStreamInfo {
        episodes,
        ..Default::default()
    }
}

/// Two categories; series 2 is listed in both.
fn provider() -> FakeProvider {
    FakeProvider {
        categories: vec![category(1), category(2)],
        series: HashMap::from([
            (1, vec![series(1), series(2)]),
            (2, vec![series(2), series(SLOW_SERIES)]),
        ]),
        infos: HashMap::from([
            (1, info(1, 2, 3)),
            (2, info(2, 1, 4)),
            (SLOW_SERIES, info(SLOW_SERIES, 1, 1)),
        ]),
        ..Default::default()
    }
}

fn config() -> PluginConfig {
    PluginConfig {
        base_url: "http://provider.example".to_string(),
        username: "user".to_string(),
        password: "pass".to_string(),
        refresh_parallelism: 1,
        request_delay_ms: 0,
        retry_max_attempts: 2,
        retry_initial_delay_ms: 100,
        ..Default::default()
    }
}

struct Harness {
    orchestrator: Arc<CacheRefreshOrchestrator>,
    provider: Arc<FakeProvider>,
    failures: Arc<FailureTracker>,
    sink: Arc<RecordingSink>,
    library: Arc<FakeLibrary>,
}

fn harness(provider: FakeProvider) -> Harness {
    harness_with(provider, config())
}

fn harness_with(provider: FakeProvider, config: PluginConfig) -> Harness {
    let config = ConfigHandle::new(config);
    let current = config.current();
    let provider = Arc::new(provider);
    let failures = Arc::new(FailureTracker::new(current.failure_suppression()));
    let retry = Arc::new(RetryExecutor::new(
        RetryPolicy::from_config(&current),
        Arc::clone(&failures),
    ));
    let cache = CatalogCache::new(
        Arc::new(MemoryCache::default()),
        Arc::new(CacheKeys::new(current.cache_data_version())),
        current.cache_ttl(),
    );
    let sink = Arc::new(RecordingSink::default());
    let library = Arc::new(FakeLibrary::default());

    let orchestrator = CacheRefreshOrchestrator::new(
        provider.clone(),
        cache,
        retry,
        Arc::new(RequestThrottle::new(Duration::ZERO)),
        config,
    )
    .with_progress_sink(sink.clone())
    .with_library(Arc::new(LibraryPopulator::new(library.clone())));

    Harness {
        orchestrator: Arc::new(orchestrator),
        provider,
        failures,
        sink,
        library,
    }
}

#[tokio::test(start_paused = true)]
async fn refresh_populates_every_series_once() {
    let h = harness(provider());

    let summary = h.orchestrator.refresh().await.unwrap();

    assert_eq!(summary.categories, 2);
    assert_eq!(summary.series_total, 3);
    assert_eq!(summary.series_processed, 3);
    assert_eq!(summary.seasons, 4);
    assert_eq!(summary.episodes, 2 * 3 + 4 + 1);
    assert_eq!(summary.errors, 0);
    assert_eq!(h.provider.info_calls.load(Ordering::SeqCst), 3);

    let cache = h.orchestrator.cache();
    assert_eq!(cache.seasons(1).unwrap().len(), 2);
    assert_eq!(cache.episodes(2, 1).unwrap().len(), 4);
    assert!(cache.last_refresh().is_some());

    let status = h.orchestrator.status();
    assert_eq!(status.state, RefreshState::Completed);
    assert!(!status.is_refreshing);
    assert_eq!(status.progress, 1.0);
    assert!(status.completed_at.is_some());
}

#[tokio::test(start_paused = true)]
async fn progress_is_monotonic_and_completes_at_one() {
    let h = harness(provider());
    h.orchestrator.refresh().await.unwrap();

    let updates = h.sink.updates.lock();
    assert!(updates.len() > 3);
    assert!(updates.windows(2).all(|w| w[0].0 <= w[1].0));

    let (last, phase) = updates.last().unwrap();
    assert_eq!(*last, 1.0);
    assert_eq!(phase, "Completed");
    assert!(updates[..updates.len() - 1].iter().all(|(p, _)| *p <= 0.99));
}

#[tokio::test(start_paused = true)]
async fn concurrent_refresh_is_rejected() {
    let h = harness(FakeProvider {
        slow: Some(Duration::from_secs(5)),
        ..provider()
    });

    let running = tokio::spawn({
        let orchestrator = Arc::clone(&h.orchestrator);
        async move { orchestrator.refresh().await }
    });
    while !h.orchestrator.is_refreshing() {
        tokio::task::yield_now().await;
    }

    let second = h.orchestrator.refresh().await;
    assert!(matches!(second, Err(Error::RefreshInProgress)));

    running.await.unwrap().unwrap();
    assert_eq!(h.provider.category_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn cancellation_keeps_partial_results() {
    let h = harness(FakeProvider {
        slow: Some(Duration::from_secs(3600)),
        ..provider()
    });
    assert!(!h.orchestrator.cancel_refresh());

    let running = tokio::spawn({
        let orchestrator = Arc::clone(&h.orchestrator);
        async move { orchestrator.refresh().await }
    });
    while h.orchestrator.cache().series_info(2).is_none() {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    assert!(h.orchestrator.cancel_refresh());
    let result = running.await.unwrap();
    assert!(matches!(result, Err(Error::Cancelled)));

    let status = h.orchestrator.status();
    assert_eq!(status.state, RefreshState::Cancelled);
    assert!(!status.is_refreshing);
    assert!(status.progress < 1.0);

    let cache = h.orchestrator.cache();
    assert!(cache.series_info(1).is_some());
    assert!(cache.series_info(2).is_some());
    assert!(cache.series_info(SLOW_SERIES).is_none());
    assert!(cache.last_refresh().is_none());
}

#[tokio::test(start_paused = true)]
async fn transient_series_failure_is_counted_not_fatal() {
    let h = harness(FakeProvider {
        unavailable: HashSet::from([2]),
        ..provider()
    });

    let summary = h.orchestrator.refresh().await.unwrap();
    assert_eq!(summary.series_processed, 2);
    assert_eq!(summary.errors, 1);
    // Two attempts for series 2, one each for the others.
    assert_eq!(h.provider.info_calls.load(Ordering::SeqCst), 4);

    let conn = config().connection();
    let url = CatalogRequest::SeriesInfo { series_id: 2 }.api_url(&conn);
    assert!(h.failures.is_known_failure(&url));

    // The next pass skips the suppressed series without calling it.
    h.orchestrator.refresh().await.unwrap();
    assert_eq!(h.provider.info_calls.load(Ordering::SeqCst), 6);
}

#[tokio::test(start_paused = true)]
async fn client_error_on_categories_fails_the_pass() {
    let h = harness(FakeProvider {
        categories_status: Some(StatusCode::UNAUTHORIZED),
        ..provider()
    });

    let err = h.orchestrator.refresh().await.unwrap_err();
    assert!(matches!(
        err,
        Error::Catalog(CatalogError::Status { status, .. }) if status == StatusCode::UNAUTHORIZED
    ));
    assert_eq!(h.provider.category_calls.load(Ordering::SeqCst), 1);

    let status = h.orchestrator.status();
    assert_eq!(status.state, RefreshState::Failed);
    assert!(status.last_error.unwrap().contains("401"));
    assert!(h.failures.is_empty());
}

#[tokio::test(start_paused = true)]
async fn invalidation_orphans_cached_entries() {
    let h = harness(provider());
    h.orchestrator.refresh().await.unwrap();
    assert!(h.orchestrator.cache().series_categories().is_some());

    h.orchestrator.invalidate_cache();

    let cache = h.orchestrator.cache();
    assert!(cache.series_categories().is_none());
    assert!(cache.series_info(1).is_none());
    assert!(cache.episodes(2, 1).is_none());
}

#[tokio::test(start_paused = true)]
async fn library_is_populated_then_left_alone() {
    let h = harness(provider());

    let first = h.orchestrator.refresh().await.unwrap();
    let expected = 2 + 3 + 4 + 11;
    assert_eq!(first.library_added, expected);
    assert_eq!(h.library.items.lock().len(), expected);

    let second = h.orchestrator.refresh().await.unwrap();
    assert_eq!(second.library_added, 0);
}

#[tokio::test(start_paused = true)]
async fn retried_requests_wait_for_their_own_throttle_slot() {
    let delay = Duration::from_millis(500);
    let h = harness_with(
        FakeProvider {
            unavailable: HashSet::from([2]),
            ..provider()
        },
        PluginConfig {
            request_delay_ms: delay.as_millis() as u64,
            ..config()
        },
    );

    h.orchestrator.refresh().await.unwrap();

    // Series 1, both attempts for series 2, then series 3.
    let started = h.provider.info_started.lock();
    assert_eq!(started.len(), 4);
    for pair in started.windows(2) {
        assert!(
            pair[1] - pair[0] >= delay,
            "requests only {:?} apart",
            pair[1] - pair[0]
        );
    }
}

#[tokio::test(start_paused = true)]
async fn enrichment_phase_is_only_entered_when_something_runs() {
    let enrichment = RefreshState::Enrichment.label();

    let h = harness(provider());
    h.orchestrator.refresh().await.unwrap();
    assert!(h.sink.updates.lock().iter().any(|(_, phase)| phase == enrichment));

    let current = config();
    let sink = Arc::new(RecordingSink::default());
    let orchestrator = CacheRefreshOrchestrator::new(
        Arc::new(provider()),
        CatalogCache::new(
            Arc::new(MemoryCache::default()),
            Arc::new(CacheKeys::new(current.cache_data_version())),
            current.cache_ttl(),
        ),
        Arc::new(RetryExecutor::new(
            RetryPolicy::from_config(&current),
            Arc::new(FailureTracker::default()),
        )),
        Arc::new(RequestThrottle::new(Duration::ZERO)),
        ConfigHandle::new(current),
    )
    .with_progress_sink(sink.clone());

    orchestrator.refresh().await.unwrap();
    let updates = sink.updates.lock();
    assert!(updates.iter().all(|(_, phase)| phase != enrichment));
    assert_eq!(updates.last().unwrap().1, "Completed");
}
