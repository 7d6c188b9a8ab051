use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;

const NAMESPACE: &str = "xtream";

/// Builds versioned cache keys: `xtream:{data_version}:{generation}:{kind}:{ids}`.
///
/// The data version follows the cache-relevant configuration; the generation
/// is bumped by [`CacheKeys::invalidate`]. Either change makes every earlier
/// key unreachable.
#[derive(Debug)]
pub struct CacheKeys {
    data_version: RwLock<String>,
    generation: AtomicU64,
}

impl CacheKeys {
    pub fn new(data_version: impl Into<String>) -> Self {
        Self {
            data_version: RwLock::new(data_version.into()),
            generation: AtomicU64::new(0),
        }
    }

    pub fn data_version(&self) -> String {
        self.data_version.read().clone()
    }

    pub fn set_data_version(&self, version: impl Into<String>) {
        *self.data_version.write() = version.into();
    }

    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    /// Bump the generation and return the new value.
    pub fn invalidate(&self) -> u64 {
        self.generation.fetch_add(1, Ordering::AcqRel) + 1
    }

    pub fn prefix(&self) -> String {
        format!(
            "{NAMESPACE}:{}:{}",
            self.data_version.read(),
            self.generation()
        )
    }

    pub fn series_categories(&self) -> String {
        format!("{}:series_categories", self.prefix())
    }

    pub fn series_list(&self, category_id: i32) -> String {
        format!("{}:series_list:{category_id}", self.prefix())
    }

    pub fn series_info(&self, series_id: i32) -> String {
        format!("{}:series_info:{series_id}", self.prefix())
    }

    pub fn seasons(&self, series_id: i32) -> String {
        format!("{}:seasons:{series_id}", self.prefix())
    }

    pub fn episodes(&self, series_id: i32, season_number: i32) -> String {
        format!("{}:episodes:{series_id}:{season_number}", self.prefix())
    }

    pub fn metadata(&self, series_id: i32) -> String {
        format!("{}:metadata:{series_id}", self.prefix())
    }

    pub fn refresh_marker(&self) -> String {
        format!("{}:last_refresh", self.prefix())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_embed_version_and_generation() {
        let keys = CacheKeys::new("abc123");
        assert_eq!(keys.episodes(5, 2), "xtream:abc123:0:episodes:5:2");

        assert_eq!(keys.invalidate(), 1);
        assert_eq!(keys.seasons(5), "xtream:abc123:1:seasons:5");

        keys.set_data_version("def456");
        assert_eq!(keys.series_list(3), "xtream:def456:1:series_list:3");
    }
}
