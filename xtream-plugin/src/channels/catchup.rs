use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::{Channel, ChannelItem, MediaSourceInfo, fetch_or_default, is_selected};
use crate::catalog::{
    CatalogClient, CatalogRequest, EpgListing, EpgListings, LiveStream, urls,
};
use crate::config::{ConfigHandle, ConnectionInfo, PluginConfig};
use crate::identifier::{ItemId, ItemKind};
use crate::retry::RetryExecutor;
use crate::{Error, Result};

/// Length of the whole-day item offered when a day has no guide data.
pub const FALLBACK_DURATION_MINUTES: i32 = 24 * 60;

const SECONDS_PER_DAY: i64 = 86_400;

/// Catch-up TV: archived channels, their recorded days, and the programmes
/// of each day.
///
/// Identifiers:
/// - `LiveChannel(stream_id, archive_days, 0)`
/// - `CatchupDay(stream_id, days_since_epoch, 0)`
/// - `CatchupStream(stream_id, start_minutes_since_epoch, duration_minutes)`
/// - `FallbackItem(stream_id, day_start_minutes_since_epoch, 1440)`
pub struct CatchupChannel {
    client: Arc<dyn CatalogClient>,
    retry: Arc<RetryExecutor>,
    config: ConfigHandle,
}

impl CatchupChannel {
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

    async fn archived_channels(
        &self,
        config: &PluginConfig,
        cancel: &CancellationToken,
    ) -> Result<Vec<LiveStream>> {
        let conn = config.connection();
        let url = CatalogRequest::LiveStreams { category_id: None }.api_url(&conn);
        let streams: Vec<LiveStream> = fetch_or_default(&self.retry, &url, cancel, |_| {
            self.client.live_streams(&conn, None, cancel)
        })
        .await?;

        Ok(streams
            .into_iter()
            .filter(|s| s.tv_archive && s.tv_archive_duration > 0)
            .filter(|s| {
                s.category_id
                    .is_none_or(|id| is_selected(&config.live_tv_categories, id))
            })
            .collect())
    }

    async fn listings(
        &self,
        conn: &ConnectionInfo,
        stream_id: i32,
        cancel: &CancellationToken,
    ) -> Result<Vec<EpgListing>> {
        let url = CatalogRequest::Epg { stream_id }.api_url(conn);
        let listings: EpgListings = fetch_or_default(&self.retry, &url, cancel, |_| {
            self.client.epg(conn, stream_id, cancel)
        })
        .await?;
        Ok(listings.epg_listings)
    }

    /// Listing as of `now`.
    pub async fn items_at(
        &self,
        folder: Option<ItemId>,
        now: DateTime<Utc>,
        cancel: &CancellationToken,
    ) -> Result<Vec<ChannelItem>> {
        let config = self.config.current();

        let Some(folder) = folder else {
            let channels = self.archived_channels(&config, cancel).await?;
            return Ok(channels
                .iter()
                .map(|s| {
                    ChannelItem::folder(
                        ItemId::new(ItemKind::LiveChannel, s.stream_id, s.tv_archive_duration, 0),
                        &s.name,
                    )
                    .with_image(&s.stream_icon)
                })
                .collect());
        };

        match folder.kind {
            ItemKind::LiveChannel => Ok(days(folder.a, folder.b, now)),
            ItemKind::CatchupDay => {
                let conn = config.connection();
                let listings = self.listings(&conn, folder.a, cancel).await?;
                Ok(programmes(&conn, folder.a, folder.b, &listings, now))
            }
            _ => Err(Error::not_found("catch-up folder", folder.to_string())),
        }
    }
}

fn day_start(day: i32) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp(i64::from(day) * SECONDS_PER_DAY, 0)
}

fn to_minutes(at: DateTime<Utc>) -> Option<i32> {
    i32::try_from(at.timestamp().div_euclid(60)).ok()
}

fn from_minutes(minutes: i32) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp(i64::from(minutes) * 60, 0)
}

/// Today and the previous `archive_days - 1` days, newest first.
fn days(stream_id: i32, archive_days: i32, now: DateTime<Utc>) -> Vec<ChannelItem> {
    let today = now.timestamp().div_euclid(SECONDS_PER_DAY);
    (0..i64::from(archive_days.max(1)))
        .filter_map(|offset| i32::try_from(today - offset).ok())
        .filter_map(|day| {
            let start = day_start(day)?;
            Some(ChannelItem::folder(
                ItemId::new(ItemKind::CatchupDay, stream_id, day, 0),
                start.format("%A %Y-%m-%d").to_string(),
            ))
        })
        .collect()
}

/// Programmes that started on `day` and have already finished airing.
fn programmes(
    conn: &ConnectionInfo,
    stream_id: i32,
    day: i32,
    listings: &[EpgListing],
    now: DateTime<Utc>,
) -> Vec<ChannelItem> {
    let Some(start_of_day) = day_start(day) else {
        return Vec::new();
    };
    let end_of_day = start_of_day + TimeDelta::days(1);

    let mut items: Vec<ChannelItem> = listings
        .iter()
        .filter_map(|listing| {
            let start = listing.start()?;
            let end = listing.end()?;
            if start < start_of_day || start >= end_of_day || end > now {
                return None;
            }
            let duration = listing.duration_minutes()?;
            let id = ItemId::new(ItemKind::CatchupStream, stream_id, to_minutes(start)?, duration);

            let source = timeshift_source(conn, id, start);
            let mut item = ChannelItem::media(id, listing.decoded_title(), source)
                .with_overview(&listing.decoded_description());
            item.premiere_date = Some(start);
            item.run_time = u64::try_from(duration).ok().map(|m| Duration::from_secs(m * 60));
            Some(item)
        })
        .collect();

    if items.is_empty() {
        debug!(stream_id, day, "No guide data, offering the whole day");
        if let Some(minutes) = to_minutes(start_of_day) {
            let id = ItemId::new(
                ItemKind::FallbackItem,
                stream_id,
                minutes,
                FALLBACK_DURATION_MINUTES,
            );
            let mut item = ChannelItem::media(
                id,
                format!("Full day {}", start_of_day.format("%Y-%m-%d")),
                timeshift_source(conn, id, start_of_day),
            );
            item.premiere_date = Some(start_of_day);
            items.push(item);
        }
    }

    items.sort_by_key(|item| item.premiere_date);
    items
}

fn timeshift_source(conn: &ConnectionInfo, id: ItemId, start: DateTime<Utc>) -> MediaSourceInfo {
    let mut source = MediaSourceInfo::file(
        ItemId::new(ItemKind::MediaSource, id.a, id.b, id.c),
        urls::timeshift_url(conn, id.a, start, id.c),
        "ts",
    );
    source.run_time = u64::try_from(id.c).ok().map(|m| Duration::from_secs(m * 60));
    source
}

#[async_trait]
impl Channel for CatchupChannel {
    fn name(&self) -> &'static str {
        "Catch-up"
    }

    fn is_enabled(&self, config: &PluginConfig) -> bool {
        config.is_catchup_visible
    }

    async fn items(
        &self,
        folder: Option<ItemId>,
        cancel: &CancellationToken,
    ) -> Result<Vec<ChannelItem>> {
        self.items_at(folder, Utc::now(), cancel).await
    }

    /// Built from the identifier alone; no provider call.
    async fn media_source(
        &self,
        id: ItemId,
        _cancel: &CancellationToken,
    ) -> Result<MediaSourceInfo> {
        if !matches!(id.kind, ItemKind::CatchupStream | ItemKind::FallbackItem) || id.c <= 0 {
            return Err(Error::not_found("catch-up programme", id.to_string()));
        }
        let start = from_minutes(id.b)
            .ok_or_else(|| Error::not_found("catch-up programme", id.to_string()))?;
        let conn = self.config.current().connection();
        Ok(timeshift_source(&conn, id, start))
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use base64::Engine;
    use base64::engine::general_purpose::STANDARD;
    use chrono::TimeZone;

    use super::*;
    use crate::channels::testing::{ScriptedClient, config, retry};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 10, 18, 0, 0).unwrap()
    }

    fn listing(title: &str, start: DateTime<Utc>, minutes: i64) -> EpgListing {
        EpgListing {
            id: 1,
            title: STANDARD.encode(title),
            description: STANDARD.encode("About"),
            start_timestamp: Some(start.timestamp()),
            stop_timestamp: Some((start + TimeDelta::minutes(minutes)).timestamp()),
            has_archive: true,
        }
    }

    fn channel() -> CatchupChannel {
        let today = Utc.with_ymd_and_hms(2024, 3, 10, 0, 0, 0).unwrap();
        let client = ScriptedClient {
            live: vec![
                LiveStream {
                    name: "News".to_string(),
                    stream_id: 5,
                    tv_archive: true,
                    tv_archive_duration: 3,
                    ..Default::default()
                },
                LiveStream {
                    name: "No archive".to_string(),
                    stream_id: 6,
                    ..Default::default()
                },
            ],
            epg: HashMap::from([(
                5,
                EpgListings {
                    epg_listings: vec![
                        listing("Evening", today + TimeDelta::hours(17), 30),
                        listing("Morning", today + TimeDelta::hours(8), 60),
                        // Still airing at `now`.
                        listing("Live", today + TimeDelta::minutes(17 * 60 + 45), 60),
                        listing("Yesterday", today - TimeDelta::hours(2), 60),
                    ],
                },
            )]),
            ..Default::default()
        };
        CatchupChannel::new(Arc::new(client), retry(), config())
    }

    #[tokio::test]
    async fn lists_only_archived_channels_and_their_days() {
        let channel = channel();
        let cancel = CancellationToken::new();

        let root = channel.items_at(None, now(), &cancel).await.unwrap();
        assert_eq!(root.len(), 1);
        assert_eq!(root[0].id, ItemId::new(ItemKind::LiveChannel, 5, 3, 0));

        let days = channel.items_at(Some(root[0].id), now(), &cancel).await.unwrap();
        let today = (now().timestamp() / SECONDS_PER_DAY) as i32;
        let ids: Vec<i32> = days.iter().map(|d| d.id.b).collect();
        assert_eq!(ids, vec![today, today - 1, today - 2]);
        assert!(days[0].name.contains("2024-03-10"));
    }

    #[tokio::test]
    async fn lists_finished_programmes_of_the_day() {
        let channel = channel();
        let today = (now().timestamp() / SECONDS_PER_DAY) as i32;
        let day = ItemId::new(ItemKind::CatchupDay, 5, today, 0);

        let items = channel
            .items_at(Some(day), now(), &CancellationToken::new())
            .await
            .unwrap();
        let names: Vec<&str> = items.iter().map(|i| i.name.as_str()).collect();
        assert_eq!(names, vec!["Morning", "Evening"]);

        let morning = &items[0];
        assert_eq!(morning.id.kind, ItemKind::CatchupStream);
        assert_eq!(morning.id.c, 60);
        assert!(
            morning.media_sources[0]
                .path
                .contains("start=2024-03-10%3A08-00&duration=60")
        );
    }

    #[tokio::test]
    async fn day_without_guide_data_gets_fallback_item() {
        let channel = channel();
        let today = (now().timestamp() / SECONDS_PER_DAY) as i32;
        let day = ItemId::new(ItemKind::CatchupDay, 5, today - 2, 0);

        let items = channel
            .items_at(Some(day), now(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].id.kind, ItemKind::FallbackItem);
        assert_eq!(items[0].id.c, FALLBACK_DURATION_MINUTES);
        assert_eq!(items[0].id.b, (today - 2) * 24 * 60);
    }

    #[tokio::test]
    async fn media_source_is_rebuilt_from_the_identifier() {
        let start = Utc.with_ymd_and_hms(2024, 3, 9, 21, 15, 0).unwrap();
        let id = ItemId::new(
            ItemKind::CatchupStream,
            5,
            (start.timestamp() / 60) as i32,
            45,
        );
        let source = channel()
            .media_source(id, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(
            source.path,
            "http://provider.example/streaming/timeshift.php?username=user&password=pass&stream=5&start=2024-03-09%3A21-15&duration=45"
        );
        assert_eq!(source.run_time, Some(Duration::from_secs(45 * 60)));

        let err = channel()
            .media_source(ItemId::new(ItemKind::Episode, 5, 0, 0), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotFound { .. }));
    }
}
