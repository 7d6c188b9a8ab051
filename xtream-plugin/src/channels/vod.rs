use std::sync::Arc;

use async_trait::async_trait;
use chrono::DateTime;
use tokio_util::sync::CancellationToken;

use super::{Channel, ChannelItem, MediaSourceInfo, fetch_or_default, is_selected};
use crate::catalog::{CatalogClient, CatalogRequest, Category, VodStream, urls};
use crate::config::{ConfigHandle, ConnectionInfo, PluginConfig};
use crate::identifier::{ItemId, ItemKind};
use crate::retry::RetryExecutor;
use crate::{Error, Result};

/// Movies grouped by VOD category. Listings are not cached.
pub struct VodChannel {
    client: Arc<dyn CatalogClient>,
    retry: Arc<RetryExecutor>,
    config: ConfigHandle,
}

impl VodChannel {
    pub fn new(
        client: Arc<dyn CatalogClient>,
        retry: Arc<RetryExecutor>,
        config: ConfigHandle,
    ) -> Self {
        Self {
            client,
            retry,
            config,
        }
    }

    async fn streams(
        &self,
        conn: &ConnectionInfo,
        category_id: i32,
        cancel: &CancellationToken,
    ) -> Result<Vec<VodStream>> {
        let url = CatalogRequest::VodStreams {
            category_id: Some(category_id),
        }
        .api_url(conn);
        fetch_or_default(&self.retry, &url, cancel, |_| {
            self.client.vod_streams(conn, Some(category_id), cancel)
        })
        .await
    }
}

/// Movie ids carry their category so the source can be found again.
fn movie_id(stream: &VodStream, category_id: i32) -> ItemId {
    ItemId::new(ItemKind::VodStream, stream.stream_id, category_id, 0)
}

fn movie_source(conn: &ConnectionInfo, id: ItemId, stream: &VodStream) -> MediaSourceInfo {
    MediaSourceInfo::file(
        ItemId::new(ItemKind::MediaSource, id.a, id.b, ItemKind::VodStream.as_i32()),
        urls::vod_url(conn, stream.stream_id, &stream.container_extension),
        &stream.container_extension,
    )
}

#[async_trait]
impl Channel for VodChannel {
    fn name(&self) -> &'static str {
        "Movies"
    }

    fn is_enabled(&self, config: &PluginConfig) -> bool {
        config.is_vod_visible
    }

    async fn items(
        &self,
        folder: Option<ItemId>,
        cancel: &CancellationToken,
    ) -> Result<Vec<ChannelItem>> {
        let config = self.config.current();
        let conn = config.connection();

        let Some(folder) = folder else {
            let url = CatalogRequest::VodCategories.api_url(&conn);
            let categories: Vec<Category> = fetch_or_default(&self.retry, &url, cancel, |_| {
                self.client.vod_categories(&conn, cancel)
            })
            .await?;

            return Ok(categories
                .into_iter()
                .filter(|c| is_selected(&config.vod_categories, c.category_id))
                .map(|c| {
                    ChannelItem::folder(
                        ItemId::new(ItemKind::VodCategory, c.category_id, 0, 0),
                        c.category_name,
                    )
                })
                .collect());
        };

        if folder.kind != ItemKind::VodCategory {
            return Err(Error::not_found("movie folder", folder.to_string()));
        }

        let streams = self.streams(&conn, folder.a, cancel).await?;
        Ok(streams
            .iter()
            .map(|stream| {
                let id = movie_id(stream, folder.a);
                let mut item = ChannelItem::media(id, &stream.name, movie_source(&conn, id, stream))
                    .with_image(&stream.stream_icon);
                item.premiere_date = stream
                    .added
                    .and_then(|secs| DateTime::from_timestamp(secs, 0));
                item
            })
            .collect())
    }

    async fn media_source(
        &self,
        id: ItemId,
        cancel: &CancellationToken,
    ) -> Result<MediaSourceInfo> {
        if id.kind != ItemKind::VodStream {
            return Err(Error::not_found("movie", id.to_string()));
        }

        let conn = self.config.current().connection();
        let streams = self.streams(&conn, id.b, cancel).await?;
        let stream = streams
            .iter()
            .find(|s| s.stream_id == id.a)
            .ok_or_else(|| Error::not_found("movie", id.a.to_string()))?;
        Ok(movie_source(&conn, id, stream))
    }
}
