//! Catalog cache.
//!
//! The backing store is an abstract [`KeyValueCache`] with absolute per-entry
//! expiry and no enumeration or delete. Invalidation is done by changing the
//! key prefix ([`CacheKeys`]) and letting orphaned entries expire.

mod keys;
mod memory;

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use parking_lot::RwLock;

use crate::catalog::{Category, Episode, Season, Series, SeriesStreamInfo};

pub use keys::CacheKeys;
pub use memory::MemoryCache;

/// A cached catalog slice.
#[derive(Debug, Clone)]
pub enum CacheValue {
    Categories(Arc<Vec<Category>>),
    SeriesList(Arc<Vec<Series>>),
    SeriesInfo(Arc<SeriesStreamInfo>),
    Seasons(Arc<Vec<Season>>),
    Episodes(Arc<Vec<Episode>>),
    Metadata(Arc<serde_json::Value>),
    Timestamp(DateTime<Utc>),
}

/// Minimal key-value store the catalog cache is written against.
///
/// Implementations must allow concurrent reads while a writer is active.
pub trait KeyValueCache: Send + Sync {
    fn set(&self, key: &str, value: CacheValue, expires_at: DateTime<Utc>);

    /// `None` for a miss or an expired entry.
    fn try_get(&self, key: &str) -> Option<CacheValue>;
}

/// Typed access to the catalog entries in a [`KeyValueCache`].
#[derive(Clone)]
pub struct CatalogCache {
    store: Arc<dyn KeyValueCache>,
    keys: Arc<CacheKeys>,
    ttl: Arc<RwLock<Duration>>,
}

impl CatalogCache {
    pub fn new(store: Arc<dyn KeyValueCache>, keys: Arc<CacheKeys>, ttl: Duration) -> Self {
        Self {
            store,
            keys,
            ttl: Arc::new(RwLock::new(ttl)),
        }
    }

    pub fn ttl(&self) -> Duration {
        *self.ttl.read()
    }

    /// Applies to entries written from now on.
    pub fn set_ttl(&self, ttl: Duration) {
        *self.ttl.write() = ttl;
    }

    pub fn keys(&self) -> &CacheKeys {
        &self.keys
    }

    /// Orphan every entry written so far.
    pub fn invalidate(&self) -> u64 {
        self.keys.invalidate()
    }

    fn expires_at(&self) -> DateTime<Utc> {
        let ttl = TimeDelta::from_std(self.ttl()).unwrap_or(TimeDelta::MAX);
        Utc::now()
            .checked_add_signed(ttl)
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    fn put(&self, key: String, value: CacheValue) {
        self.store.set(&key, value, self.expires_at());
    }

    pub fn series_categories(&self) -> Option<Arc<Vec<Category>>> {
        match self.store.try_get(&self.keys.series_categories())? {
            CacheValue::Categories(v) => Some(v),
            _ => None,
        }
    }

    pub fn put_series_categories(&self, categories: Vec<Category>) -> Arc<Vec<Category>> {
        let value = Arc::new(categories);
        self.put(
            self.keys.series_categories(),
            CacheValue::Categories(Arc::clone(&value)),
        );
        value
    }

    pub fn series_list(&self, category_id: i32) -> Option<Arc<Vec<Series>>> {
        match self.store.try_get(&self.keys.series_list(category_id))? {
            CacheValue::SeriesList(v) => Some(v),
            _ => None,
        }
    }

    pub fn put_series_list(&self, category_id: i32, series: Vec<Series>) -> Arc<Vec<Series>> {
        let value = Arc::new(series);
        self.put(
            self.keys.series_list(category_id),
            CacheValue::SeriesList(Arc::clone(&value)),
        );
        value
    }

    pub fn series_info(&self, series_id: i32) -> Option<Arc<SeriesStreamInfo>> {
        match self.store.try_get(&self.keys.series_info(series_id))? {
            CacheValue::SeriesInfo(v) => Some(v),
            _ => None,
        }
    }

    pub fn seasons(&self, series_id: i32) -> Option<Arc<Vec<Season>>> {
        match self.store.try_get(&self.keys.seasons(series_id))? {
            CacheValue::Seasons(v) => Some(v),
            _ => None,
        }
    }

    pub fn episodes(&self, series_id: i32, season_number: i32) -> Option<Arc<Vec<Episode>>> {
        match self
            .store
            .try_get(&self.keys.episodes(series_id, season_number))?
        {
            CacheValue::Episodes(v) => Some(v),
            _ => None,
        }
    }

    /// Cache one series: the info blob, its season list and every season's
    /// episodes. Returns `(seasons, episodes)` written.
    pub fn put_series_info(&self, series_id: i32, info: SeriesStreamInfo) -> (usize, usize) {
        let seasons = info.effective_seasons();
        let mut episode_total = 0;

        for season in &seasons {
            let episodes = info.episodes_for(season.season_number).to_vec();
            episode_total += episodes.len();
            self.put(
                self.keys.episodes(series_id, season.season_number),
                CacheValue::Episodes(Arc::new(episodes)),
            );
        }

        let season_count = seasons.len();
        self.put(
            self.keys.seasons(series_id),
            CacheValue::Seasons(Arc::new(seasons)),
        );
        self.put(
            self.keys.series_info(series_id),
            CacheValue::SeriesInfo(Arc::new(info)),
        );
        (season_count, episode_total)
    }

    pub fn metadata(&self, series_id: i32) -> Option<Arc<serde_json::Value>> {
        match self.store.try_get(&self.keys.metadata(series_id))? {
            CacheValue::Metadata(v) => Some(v),
            _ => None,
        }
    }

    pub fn put_metadata(&self, series_id: i32, metadata: serde_json::Value) {
        self.put(
            self.keys.metadata(series_id),
            CacheValue::Metadata(Arc::new(metadata)),
        );
    }

    /// When the last successful refresh finished.
    pub fn last_refresh(&self) -> Option<DateTime<Utc>> {
        match self.store.try_get(&self.keys.refresh_marker())? {
            CacheValue::Timestamp(at) => Some(at),
            _ => None,
        }
    }

    pub fn mark_refreshed(&self, at: DateTime<Utc>) {
        self.put(self.keys.refresh_marker(), CacheValue::Timestamp(at));
    }
}
