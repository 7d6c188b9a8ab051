//! Live TV: channel list, guide data and live stream sessions.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use restream_engine::{RestreamReader, RestreamRegistry};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::catalog::{CatalogClient, CatalogRequest, Category, EpgListings, LiveStream, urls};
use crate::channels::{MediaSourceInfo, fetch_or_default, is_selected};
use crate::config::{ConfigHandle, ConnectionInfo};
use crate::identifier::{ItemId, ItemKind};
use crate::retry::RetryExecutor;
use crate::{Error, Result};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LiveChannelInfo {
    pub id: ItemId,
    pub number: i32,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub epg_channel_id: Option<String>,
    pub has_archive: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProgrammeInfo {
    /// `EpgEntry(stream_id, start_minutes_since_epoch, listing_id)`
    pub id: ItemId,
    pub channel_id: ItemId,
    pub name: String,
    pub overview: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

/// A consumer attached to a shared live restream.
pub struct LiveStreamHandle {
    pub source: MediaSourceInfo,
    pub reader: RestreamReader,
}

impl std::fmt::Debug for LiveStreamHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LiveStreamHandle")
            .field("source", &self.source.id)
            .field("lag", &self.reader.lag())
            .finish()
    }
}

pub struct LiveTvService {
    client: Arc<dyn CatalogClient>,
    retry: Arc<RetryExecutor>,
    config: ConfigHandle,
    registry: Arc<RestreamRegistry>,
}

impl LiveTvService {
    pub fn new(
        client: Arc<dyn CatalogClient>,
        retry: Arc<RetryExecutor>,
        config: ConfigHandle,
        registry: Arc<RestreamRegistry>,
    ) -> Self {
        Self {
            client,
            retry,
            config,
            registry,
        }
    }

    pub fn registry(&self) -> &RestreamRegistry {
        &self.registry
    }

    /// Channels of the selected live categories, ordered by channel number.
    pub async fn channels(&self, cancel: &CancellationToken) -> Result<Vec<LiveChannelInfo>> {
        let config = self.config.current();
        let conn = config.connection();

        let streams = if config.live_tv_categories.is_empty() {
            self.streams(&conn, None, cancel).await?
        } else {
            let url = CatalogRequest::LiveCategories.api_url(&conn);
            let categories: Vec<Category> = fetch_or_default(&self.retry, &url, cancel, |_| {
                self.client.live_categories(&conn, cancel)
            })
            .await?;

            let mut streams = Vec::new();
            for category in categories
                .iter()
                .filter(|c| is_selected(&config.live_tv_categories, c.category_id))
            {
                streams.extend(self.streams(&conn, Some(category.category_id), cancel).await?);
            }
            streams
        };

        let mut channels: Vec<LiveChannelInfo> = streams
            .into_iter()
            .map(|s| LiveChannelInfo {
                id: ItemId::new(ItemKind::LiveChannel, s.stream_id, 0, 0),
                number: s.num,
                image_url: (!s.stream_icon.is_empty()).then_some(s.stream_icon),
                epg_channel_id: (!s.epg_channel_id.is_empty()).then_some(s.epg_channel_id),
                has_archive: s.tv_archive,
                name: s.name,
            })
            .collect();
        channels.sort_by_key(|c| c.number);
        debug!(count = channels.len(), "Live channels listed");
        Ok(channels)
    }

    async fn streams(
        &self,
        conn: &ConnectionInfo,
        category_id: Option<i32>,
        cancel: &CancellationToken,
    ) -> Result<Vec<LiveStream>> {
        let url = CatalogRequest::LiveStreams { category_id }.api_url(conn);
        fetch_or_default(&self.retry, &url, cancel, |_| {
            self.client.live_streams(conn, category_id, cancel)
        })
        .await
    }

    /// Guide entries of `channel` overlapping `[start, end)`.
    pub async fn programmes(
        &self,
        channel: ItemId,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        cancel: &CancellationToken,
    ) -> Result<Vec<ProgrammeInfo>> {
        let stream_id = live_stream_id(channel)?;
        let conn = self.config.current().connection();
        let url = CatalogRequest::Epg { stream_id }.api_url(&conn);
        let listings: EpgListings = fetch_or_default(&self.retry, &url, cancel, |_| {
            self.client.epg(&conn, stream_id, cancel)
        })
        .await?;

        let mut programmes: Vec<ProgrammeInfo> = listings
            .epg_listings
            .iter()
            .filter_map(|listing| {
                let (from, to) = (listing.start()?, listing.end()?);
                if to <= start || from >= end {
                    return None;
                }
                let minutes = i32::try_from(from.timestamp().div_euclid(60)).ok()?;
                Some(ProgrammeInfo {
                    id: ItemId::new(ItemKind::EpgEntry, stream_id, minutes, listing.id),
                    channel_id: channel,
                    name: listing.decoded_title(),
                    overview: listing.decoded_description(),
                    start: from,
                    end: to,
                })
            })
            .collect();
        programmes.sort_by_key(|p| p.start);
        Ok(programmes)
    }

    /// Direct provider source for `channel`.
    pub fn media_source(&self, channel: ItemId) -> Result<MediaSourceInfo> {
        let stream_id = live_stream_id(channel)?;
        let conn = self.config.current().connection();
        Ok(MediaSourceInfo::live(
            ItemId::new(ItemKind::MediaSource, stream_id, 0, 0),
            urls::live_stream_url(&conn, stream_id),
        ))
    }

    /// Attach a consumer to the shared restream of `channel`, connecting
    /// upstream on first use.
    #[instrument(skip(self), fields(channel = %channel))]
    pub async fn open_live_stream(&self, channel: ItemId) -> Result<LiveStreamHandle> {
        if !self.config.current().enable_restreaming {
            return Err(Error::config("restreaming is disabled"));
        }

        let source = self.media_source(channel)?;
        let key = source.id.to_string();
        let session = self.registry.get_or_create(&key, &source.path)?;

        if let Err(e) = session.open().await {
            warn!(error = %e, "Failed to open live stream");
            if session.consumer_count() == 0 {
                self.registry.close(&key).await?;
            }
            return Err(e.into());
        }

        let reader = session.reader_stream();
        info!(
            session = %session.session_id(),
            consumers = session.consumer_count(),
            "Live stream consumer attached"
        );
        Ok(LiveStreamHandle { source, reader })
    }

    /// Stop the upstream connection of `channel`; attached consumers see end
    /// of stream.
    pub async fn close_live_stream(&self, channel: ItemId) -> Result<()> {
        let source = self.media_source(channel)?;
        self.registry.close(&source.id.to_string()).await?;
        Ok(())
    }
}

fn live_stream_id(channel: ItemId) -> Result<i32> {
    match channel.kind {
        ItemKind::LiveChannel | ItemKind::MediaSource => Ok(channel.a),
        _ => Err(Error::not_found("live channel", channel.to_string())),
    }
}
