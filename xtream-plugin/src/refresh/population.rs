//! Delta population of the host library from the catalog cache.
//!
//! The host keeps its own materialized copy of the series tree, keyed by the
//! same opaque identifiers. Reconciling compares the expected entity set
//! against it: missing entities are always added (parents first), and the
//! per-parent child verification sweep is skipped when the host already holds
//! nearly everything and a small sample confirms children are in place.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::cache::CatalogCache;
use crate::catalog::Series;
use crate::identifier::{ItemId, ItemKind};
use crate::{Error, Result};

/// Share of expected entities that must already be present for the fast path.
pub const FAST_PATH_THRESHOLD: f64 = 0.95;
/// Parents checked for children before trusting the fast path.
pub const FAST_PATH_SAMPLE_SIZE: usize = 5;

/// Entity the host library should contain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LibraryItem {
    pub id: ItemId,
    pub parent: Option<ItemId>,
    pub name: String,
    pub expected_children: usize,
}

/// The host's materialized library, as far as population needs it.
#[async_trait]
pub trait HostLibraryStore: Send + Sync {
    async fn contains(&self, id: ItemId) -> Result<bool>;

    async fn child_count(&self, id: ItemId) -> Result<usize>;

    async fn add(&self, item: &LibraryItem) -> Result<()>;

    /// Ask the host to re-scan an item whose children are incomplete.
    async fn refresh_children(&self, id: ItemId) -> Result<()>;
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PopulationReport {
    pub expected: usize,
    pub present: usize,
    pub added: usize,
    pub fast_path: bool,
    pub verified: usize,
    pub repaired: usize,
}

/// Build the expected tree for `series` from cached seasons and episodes,
/// parents before children.
///
/// Series without cached seasons are skipped and do not count towards their
/// category's expected children.
pub fn expected_items(cache: &CatalogCache, series: &[(i32, Series)]) -> Vec<LibraryItem> {
    let mut items = Vec::new();
    // category id -> index of its row in `items`
    let mut categories: HashMap<i32, usize> = HashMap::new();

    for (category_id, show) in series {
        let Some(seasons) = cache.seasons(show.series_id) else {
            continue;
        };

        let category = ItemId::new(ItemKind::SeriesCategory, *category_id, 0, 0);
        let row = *categories.entry(*category_id).or_insert_with(|| {
            items.push(LibraryItem {
                id: category,
                parent: None,
                name: format!("Category {category_id}"),
                expected_children: 0,
            });
            items.len() - 1
        });
        items[row].expected_children += 1;

        let series_id = ItemId::new(ItemKind::Series, show.series_id, 0, 0);
        items.push(LibraryItem {
            id: series_id,
            parent: Some(category),
            name: show.name.clone(),
            expected_children: seasons.len(),
        });

        for season in seasons.iter() {
            let episodes = cache
                .episodes(show.series_id, season.season_number)
                .unwrap_or_default();
            let season_id = ItemId::new(ItemKind::Season, show.series_id, season.season_number, 0);
            items.push(LibraryItem {
                id: season_id,
                parent: Some(series_id),
                name: season.name.clone(),
                expected_children: episodes.len(),
            });
            for episode in episodes.iter() {
                items.push(LibraryItem {
                    id: ItemId::new(
                        ItemKind::Episode,
                        show.series_id,
                        season.season_number,
                        episode.id,
                    ),
                    parent: Some(season_id),
                    name: episode.title.clone(),
                    expected_children: 0,
                });
            }
        }
    }

    items
}

fn depth(kind: ItemKind) -> u8 {
    match kind {
        ItemKind::SeriesCategory => 0,
        ItemKind::Series => 1,
        ItemKind::Season => 2,
        _ => 3,
    }
}

/// Evenly spaced picks so the sample is not biased towards one category.
fn sample<'a>(parents: &[&'a LibraryItem], size: usize) -> Vec<&'a LibraryItem> {
    if parents.len() <= size {
        return parents.to_vec();
    }
    let step = parents.len() / size;
    parents.iter().step_by(step).take(size).copied().collect()
}

pub struct LibraryPopulator {
    store: Arc<dyn HostLibraryStore>,
}

impl LibraryPopulator {
    pub fn new(store: Arc<dyn HostLibraryStore>) -> Self {
        Self { store }
    }

    pub async fn reconcile(
        &self,
        expected: &[LibraryItem],
        cancel: &CancellationToken,
    ) -> Result<PopulationReport> {
        let mut report = PopulationReport {
            expected: expected.len(),
            ..Default::default()
        };
        if expected.is_empty() {
            return Ok(report);
        }

        let mut ordered: Vec<&LibraryItem> = expected.iter().collect();
        ordered.sort_by_key(|item| depth(item.id.kind));

        let mut present = Vec::new();
        let mut missing = Vec::new();
        for item in ordered {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }
            if self.store.contains(item.id).await? {
                present.push(item);
            } else {
                missing.push(item);
            }
        }
        report.present = present.len();

        let ratio = present.len() as f64 / expected.len() as f64;
        let parents: Vec<&LibraryItem> = present
            .iter()
            .copied()
            .filter(|item| item.expected_children > 0)
            .collect();

        if ratio >= FAST_PATH_THRESHOLD {
            let mut sample_ok = true;
            for item in sample(&parents, FAST_PATH_SAMPLE_SIZE) {
                if self.store.child_count(item.id).await? < item.expected_children {
                    sample_ok = false;
                    break;
                }
            }
            report.fast_path = sample_ok;
        }
        debug!(
            expected = report.expected,
            present = report.present,
            fast_path = report.fast_path,
            "Library delta computed"
        );

        for item in missing {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }
            self.store.add(item).await?;
            report.added += 1;
        }

        if !report.fast_path {
            for item in parents {
                if cancel.is_cancelled() {
                    return Err(Error::Cancelled);
                }
                report.verified += 1;
                let actual = self.store.child_count(item.id).await?;
                if actual < item.expected_children {
                    warn!(
                        item = %item.id,
                        expected = item.expected_children,
                        actual,
                        "Library item is missing children"
                    );
                    self.store.refresh_children(item.id).await?;
                    report.repaired += 1;
                }
            }
        }

        info!(
            added = report.added,
            repaired = report.repaired,
            fast_path = report.fast_path,
            "Library population finished"
        );
        Ok(report)
    }
}
