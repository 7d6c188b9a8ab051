use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::{Channel, ChannelItem, MediaSourceInfo, fetch_or_default, is_selected};
use crate::cache::CatalogCache;
use crate::catalog::{
    CatalogClient, CatalogRequest, Category, Episode, Season, Series, SeriesStreamInfo, urls,
};
use crate::config::{ConfigHandle, PluginConfig};
use crate::identifier::{ItemId, ItemKind};
use crate::retry::RetryExecutor;
use crate::{Error, Result};

/// Series browsing: categories, series, seasons, episodes.
///
/// Reads go to the catalog cache first. A miss fetches from the provider and
/// writes the result back, so browsing also warms the cache between bulk
/// refreshes.
pub struct SeriesChannel {
    client: Arc<dyn CatalogClient>,
    cache: CatalogCache,
    retry: Arc<RetryExecutor>,
    config: ConfigHandle,
}

impl SeriesChannel {
    pub fn new(
        client: Arc<dyn CatalogClient>,
        cache: CatalogCache,
        retry: Arc<RetryExecutor>,
        config: ConfigHandle,
    ) -> Self {
        Self {
            client,
            cache,
            retry,
            config,
        }
    }

    async fn categories(&self, cancel: &CancellationToken) -> Result<Arc<Vec<Category>>> {
        if let Some(categories) = self.cache.series_categories() {
            return Ok(categories);
        }

        let config = self.config.current();
        let conn = config.connection();
        let url = CatalogRequest::SeriesCategories.api_url(&conn);
        let categories: Vec<Category> = fetch_or_default(&self.retry, &url, cancel, |_| {
            self.client.series_categories(&conn, cancel)
        })
        .await?;

        let categories = categories
            .into_iter()
            .filter(|c| is_selected(&config.series_categories, c.category_id))
            .collect();
        Ok(self.cache.put_series_categories(categories))
    }

    async fn series_list(
        &self,
        category_id: i32,
        cancel: &CancellationToken,
    ) -> Result<Arc<Vec<Series>>> {
        if let Some(series) = self.cache.series_list(category_id) {
            return Ok(series);
        }

        let conn = self.config.current().connection();
        let url = CatalogRequest::Series {
            category_id: Some(category_id),
        }
        .api_url(&conn);
        let series = fetch_or_default(&self.retry, &url, cancel, |_| {
            self.client.series(&conn, Some(category_id), cancel)
        })
        .await?;
        Ok(self.cache.put_series_list(category_id, series))
    }

    /// Fetch and cache one series. False when the provider had nothing.
    async fn load_series(&self, series_id: i32, cancel: &CancellationToken) -> Result<bool> {
        let conn = self.config.current().connection();
        let url = CatalogRequest::SeriesInfo { series_id }.api_url(&conn);
        let info: Option<SeriesStreamInfo> = self
            .retry
            .execute(&url, cancel, |_| {
                self.client.series_info(&conn, series_id, cancel)
            })
            .await?;

        let Some(info) = info else {
            return Ok(false);
        };
        let (seasons, episodes) = self.cache.put_series_info(series_id, info);
        debug!(series_id, seasons, episodes, "Series cached on demand");
        Ok(true)
    }

    async fn seasons(
        &self,
        series_id: i32,
        cancel: &CancellationToken,
    ) -> Result<Arc<Vec<Season>>> {
        if let Some(seasons) = self.cache.seasons(series_id) {
            return Ok(seasons);
        }
        self.load_series(series_id, cancel).await?;
        Ok(self.cache.seasons(series_id).unwrap_or_default())
    }

    async fn episodes(
        &self,
        series_id: i32,
        season_number: i32,
        cancel: &CancellationToken,
    ) -> Result<Arc<Vec<Episode>>> {
        if let Some(episodes) = self.cache.episodes(series_id, season_number) {
            return Ok(episodes);
        }
        self.load_series(series_id, cancel).await?;
        Ok(self
            .cache
            .episodes(series_id, season_number)
            .unwrap_or_default())
    }
}

fn episode_item(config: &PluginConfig, season: ItemId, episode: &Episode) -> ChannelItem {
    let id = ItemId::new(ItemKind::Episode, season.a, season.b, episode.id);
    let source = episode_source(config, id, episode);
    let name = if episode.title.is_empty() {
        format!("Episode {}", episode.episode_num)
    } else {
        episode.title.clone()
    };

    let mut item = ChannelItem::media(id, name, source)
        .with_image(&episode.info.movie_image)
        .with_overview(&episode.info.plot);
    item.run_time = episode
        .info
        .duration_secs
        .and_then(|secs| u64::try_from(secs).ok())
        .map(std::time::Duration::from_secs);
    item
}

fn episode_source(config: &PluginConfig, id: ItemId, episode: &Episode) -> MediaSourceInfo {
    let path = urls::episode_url(&config.connection(), episode.id, &episode.container_extension);
    MediaSourceInfo::file(
        ItemId::new(ItemKind::MediaSource, id.a, id.b, id.c),
        path,
        &episode.container_extension,
    )
}

#[async_trait]
impl Channel for SeriesChannel {
    fn name(&self) -> &'static str {
        "Series"
    }

    fn is_enabled(&self, config: &PluginConfig) -> bool {
        config.is_series_visible
    }

    async fn items(
        &self,
        folder: Option<ItemId>,
        cancel: &CancellationToken,
    ) -> Result<Vec<ChannelItem>> {
        let Some(folder) = folder else {
            let categories = self.categories(cancel).await?;
            return Ok(categories
                .iter()
                .map(|c| {
                    ChannelItem::folder(
                        ItemId::new(ItemKind::SeriesCategory, c.category_id, 0, 0),
                        c.category_name.clone(),
                    )
                })
                .collect());
        };

        match folder.kind {
            ItemKind::SeriesCategory => {
                let series = self.series_list(folder.a, cancel).await?;
                Ok(series
                    .iter()
                    .map(|s| {
                        let id = ItemId::new(ItemKind::Series, s.series_id, 0, 0);
                        ChannelItem::folder(id, &s.name)
                            .with_image(&s.cover)
                            .with_overview(&s.plot)
                    })
                    .collect())
            }
            ItemKind::Series => {
                let series_id = folder.a;
                let seasons = self.seasons(series_id, cancel).await?;
                Ok(seasons
                    .iter()
                    .map(|s| {
                        ChannelItem::folder(
                            ItemId::new(ItemKind::Season, series_id, s.season_number, 0),
                            &s.name,
                        )
                        .with_image(&s.cover)
                        .with_overview(&s.overview)
                    })
                    .collect())
            }
            ItemKind::Season => {
                let config = self.config.current();
                let episodes = self.episodes(folder.a, folder.b, cancel).await?;
                Ok(episodes
                    .iter()
                    .map(|e| episode_item(&config, folder, e))
                    .collect())
            }
            _ => Err(Error::not_found("series folder", folder.to_string())),
        }
    }

    async fn media_source(
        &self,
        id: ItemId,
        cancel: &CancellationToken,
    ) -> Result<MediaSourceInfo> {
        if id.kind != ItemKind::Episode {
            return Err(Error::not_found("episode", id.to_string()));
        }

        let episodes = self.episodes(id.a, id.b, cancel).await?;
        let episode = episodes
            .iter()
            .find(|e| e.id == id.c)
            .ok_or_else(|| Error::not_found("episode", id.c.to_string()))?;
        Ok(episode_source(&self.config.current(), id, episode))
    }
}

#[cfg(test)]
mod tests {
    use std::collections::{BTreeMap, HashMap};
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;
    use crate::cache::{CacheKeys, MemoryCache};
    use crate::catalog::EpisodeInfo;
    use crate::channels::testing::{ScriptedClient, config, retry};

    fn episode(id: i32, season: i32, num: i32) -> Episode {
        Episode {
            id,
            episode_num: num,
            title: format!("Ep {num}"),
            container_extension: "mkv".to_string(),
            season,
            info: EpisodeInfo {
                duration_secs: Some(1500),
                ..Default::default()
            },
        }
    }

    fn client() -> Arc<ScriptedClient> {
        let mut episodes = BTreeMap::new();
        episodes.insert(1, vec![episode(101, 1, 1), episode(102, 1, 2)]);
        episodes.insert(2, vec![episode(201, 2, 1)]);

        Arc::new(ScriptedClient {
            categories: vec![
                Category {
                    category_id: 10,
                    category_name: "Drama".to_string(),
                    parent_id: 0,
                },
                Category {
                    category_id: 11,
                    category_name: "Comedy".to_string(),
                    parent_id: 0,
                },
            ],
            series: HashMap::from([(
                10,
                vec![Series {
                    series_id: 7,
                    name: "Show".to_string(),
                    ..Default::default()
                }],
            )]),
            series_info: HashMap::from([(
                7,
                SeriesStreamInfo {
                    episodes,
                    ..Default::default()
                },
            )]),
            ..Default::default()
        })
    }

    fn channel(client: Arc<ScriptedClient>) -> SeriesChannel {
        let cache = CatalogCache::new(
            Arc::new(MemoryCache::default()),
            Arc::new(CacheKeys::new("test")),
            Duration::from_secs(3600),
        );
        SeriesChannel::new(client, cache, retry(), config())
    }

    #[tokio::test]
    async fn browses_down_to_episodes() {
        let channel = channel(client());
        let cancel = CancellationToken::new();

        let root = channel.items(None, &cancel).await.unwrap();
        assert_eq!(root.len(), 2);
        assert_eq!(root[0].id, ItemId::new(ItemKind::SeriesCategory, 10, 0, 0));

        let shows = channel.items(Some(root[0].id), &cancel).await.unwrap();
        assert_eq!(shows.len(), 1);
        assert_eq!(shows[0].id, ItemId::new(ItemKind::Series, 7, 0, 0));

        let seasons = channel.items(Some(shows[0].id), &cancel).await.unwrap();
        let numbers: Vec<i32> = seasons.iter().map(|s| s.id.b).collect();
        assert_eq!(numbers, vec![1, 2]);

        let episodes = channel.items(Some(seasons[0].id), &cancel).await.unwrap();
        assert_eq!(episodes.len(), 2);
        assert!(!episodes[0].is_folder());
        assert_eq!(episodes[0].id, ItemId::new(ItemKind::Episode, 7, 1, 101));
        assert_eq!(episodes[0].run_time, Some(Duration::from_secs(1500)));
        assert_eq!(
            episodes[0].media_sources[0].path,
            "http://provider.example/series/user/pass/101.mkv"
        );
    }

    #[tokio::test]
    async fn second_browse_is_served_from_cache() {
        let client = client();
        let channel = channel(Arc::clone(&client));
        let cancel = CancellationToken::new();
        let season = ItemId::new(ItemKind::Season, 7, 1, 0);

        channel.items(Some(season), &cancel).await.unwrap();
        let calls = client.calls();
        // The series info fetch also cached the season list and season 2.
        channel.items(Some(season), &cancel).await.unwrap();
        channel
            .items(Some(ItemId::new(ItemKind::Series, 7, 0, 0)), &cancel)
            .await
            .unwrap();
        channel
            .items(Some(ItemId::new(ItemKind::Season, 7, 2, 0)), &cancel)
            .await
            .unwrap();
        assert_eq!(client.calls(), calls);
    }

    #[tokio::test]
    async fn resolves_episode_media_source() {
        let channel = channel(client());
        let source = channel
            .media_source(ItemId::new(ItemKind::Episode, 7, 2, 201), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(source.path, "http://provider.example/series/user/pass/201.mkv");
        assert_eq!(source.container.as_deref(), Some("mkv"));
        assert!(!source.is_infinite);
    }

    #[tokio::test]
    async fn rejects_foreign_identifiers() {
        let channel = channel(client());
        let cancel = CancellationToken::new();
        let err = channel
            .items(Some(ItemId::new(ItemKind::CatchupDay, 1, 1, 0)), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotFound { .. }));

        let err = channel
            .media_source(ItemId::new(ItemKind::Episode, 7, 1, 999), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotFound { .. }));
    }
}
