//! Host-facing channel browse services.
//!
//! The host hands back the opaque identifiers it was given; each channel
//! decodes them into an [`ItemId`] and maps it to a cached or freshly fetched
//! catalog slice.

mod catchup;
mod series;
mod vod;

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::Result;
use crate::catalog::CatalogResult;
use crate::config::PluginConfig;
use crate::identifier::ItemId;
use crate::retry::RetryExecutor;

pub use catchup::{CatchupChannel, FALLBACK_DURATION_MINUTES};
pub use series::SeriesChannel;
pub use vod::VodChannel;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelItemType {
    Folder,
    Media,
}

/// One entry of a channel folder listing.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChannelItem {
    pub id: ItemId,
    pub name: String,
    pub item_type: ChannelItemType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub overview: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub premiere_date: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run_time: Option<Duration>,
    /// Playback sources, filled for media items.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub media_sources: Vec<MediaSourceInfo>,
}

impl ChannelItem {
    pub fn folder(id: ItemId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            item_type: ChannelItemType::Folder,
            image_url: None,
            overview: None,
            premiere_date: None,
            run_time: None,
            media_sources: Vec::new(),
        }
    }

    pub fn media(id: ItemId, name: impl Into<String>, source: MediaSourceInfo) -> Self {
        Self {
            item_type: ChannelItemType::Media,
            media_sources: vec![source],
            ..Self::folder(id, name)
        }
    }

    pub fn with_image(mut self, url: &str) -> Self {
        if !url.is_empty() {
            self.image_url = Some(url.to_string());
        }
        self
    }

    pub fn with_overview(mut self, overview: &str) -> Self {
        if !overview.is_empty() {
            self.overview = Some(overview.to_string());
        }
        self
    }

    pub fn is_folder(&self) -> bool {
        self.item_type == ChannelItemType::Folder
    }
}

/// A playable HTTP source.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MediaSourceInfo {
    pub id: ItemId,
    pub path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub container: Option<String>,
    /// Live sources never end and cannot be seeked.
    pub is_infinite: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run_time: Option<Duration>,
}

impl MediaSourceInfo {
    pub fn file(id: ItemId, path: String, container: &str) -> Self {
        Self {
            id,
            path,
            container: (!container.is_empty()).then(|| container.to_string()),
            is_infinite: false,
            run_time: None,
        }
    }

    pub fn live(id: ItemId, path: String) -> Self {
        Self {
            id,
            path,
            container: Some("ts".to_string()),
            is_infinite: true,
            run_time: None,
        }
    }
}

/// A browsable channel as the host sees it.
#[async_trait]
pub trait Channel: Send + Sync {
    fn name(&self) -> &'static str;

    fn is_enabled(&self, config: &PluginConfig) -> bool;

    /// Children of `folder`, or the channel root for `None`.
    async fn items(
        &self,
        folder: Option<ItemId>,
        cancel: &CancellationToken,
    ) -> Result<Vec<ChannelItem>>;

    async fn media_source(
        &self,
        id: ItemId,
        cancel: &CancellationToken,
    ) -> Result<MediaSourceInfo>;
}

/// Run a catalog call under the retry policy. A suppressed or exhausted
/// request yields an empty result; cancellation and client errors propagate.
pub(crate) async fn fetch_or_default<T, F, Fut>(
    retry: &RetryExecutor,
    url: &str,
    cancel: &CancellationToken,
    operation: F,
) -> Result<T>
where
    T: Default,
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = CatalogResult<T>>,
{
    Ok(retry.execute(url, cancel, operation).await?.unwrap_or_default())
}

/// `selected` empty means every category.
pub(crate) fn is_selected(selected: &[i32], category_id: i32) -> bool {
    selected.is_empty() || selected.contains(&category_id)
}
