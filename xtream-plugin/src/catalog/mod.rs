//! Provider catalog access.
//!
//! [`CatalogClient`] is the seam between the plugin and the provider's JSON
//! API. [`XtreamClient`] implements it over HTTP; tests substitute fakes.

mod client;
pub(crate) mod de;
mod error;
pub mod models;
pub mod urls;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::config::ConnectionInfo;

pub use client::XtreamClient;
pub use error::CatalogError;
pub use models::{
    Category, EpgListing, EpgListings, Episode, EpisodeInfo, LiveStream, Season, Series,
    SeriesInfo, SeriesStreamInfo, VodStream,
};

pub type CatalogResult<T> = std::result::Result<T, CatalogError>;

/// One provider API call. Its URL is the call's identity for failure tracking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CatalogRequest {
    LiveCategories,
    VodCategories,
    SeriesCategories,
    LiveStreams { category_id: Option<i32> },
    VodStreams { category_id: Option<i32> },
    Series { category_id: Option<i32> },
    SeriesInfo { series_id: i32 },
    Epg { stream_id: i32 },
}

impl CatalogRequest {
    pub fn action(&self) -> &'static str {
        match self {
            Self::LiveCategories => "get_live_categories",
            Self::VodCategories => "get_vod_categories",
            Self::SeriesCategories => "get_series_categories",
            Self::LiveStreams { .. } => "get_live_streams",
            Self::VodStreams { .. } => "get_vod_streams",
            Self::Series { .. } => "get_series",
            Self::SeriesInfo { .. } => "get_series_info",
            Self::Epg { .. } => "get_simple_data_table",
        }
    }

    fn params(&self) -> Vec<(&'static str, String)> {
        let mut params = vec![("action", self.action().to_string())];
        match *self {
            Self::LiveStreams { category_id }
            | Self::VodStreams { category_id }
            | Self::Series { category_id } => {
                if let Some(id) = category_id {
                    params.push(("category_id", id.to_string()));
                }
            }
            Self::SeriesInfo { series_id } => params.push(("series_id", series_id.to_string())),
            Self::Epg { stream_id } => params.push(("stream_id", stream_id.to_string())),
            Self::LiveCategories | Self::VodCategories | Self::SeriesCategories => {}
        }
        params
    }

    pub fn api_url(&self, conn: &ConnectionInfo) -> String {
        urls::api_url(conn, &self.params())
    }
}

/// Async access to the provider catalog.
///
/// Every call takes the connection to use and a cancellation token; a
/// cancelled token resolves the call with [`CatalogError::Cancelled`].
#[async_trait]
pub trait CatalogClient: Send + Sync {
    async fn live_categories(
        &self,
        conn: &ConnectionInfo,
        cancel: &CancellationToken,
    ) -> CatalogResult<Vec<Category>>;

    async fn vod_categories(
        &self,
        conn: &ConnectionInfo,
        cancel: &CancellationToken,
    ) -> CatalogResult<Vec<Category>>;

    async fn series_categories(
        &self,
        conn: &ConnectionInfo,
        cancel: &CancellationToken,
    ) -> CatalogResult<Vec<Category>>;

    async fn live_streams(
        &self,
        conn: &ConnectionInfo,
        category_id: Option<i32>,
        cancel: &CancellationToken,
    ) -> CatalogResult<Vec<LiveStream>>;

    async fn vod_streams(
        &self,
        conn: &ConnectionInfo,
        category_id: Option<i32>,
        cancel: &CancellationToken,
    ) -> CatalogResult<Vec<VodStream>>;

    async fn series(
        &self,
        conn: &ConnectionInfo,
        category_id: Option<i32>,
        cancel: &CancellationToken,
    ) -> CatalogResult<Vec<Series>>;

    /// Seasons and episodes of one series in a single call.
    async fn series_info(
        &self,
        conn: &ConnectionInfo,
        series_id: i32,
        cancel: &CancellationToken,
    ) -> CatalogResult<SeriesStreamInfo>;

    async fn epg(
        &self,
        conn: &ConnectionInfo,
        stream_id: i32,
        cancel: &CancellationToken,
    ) -> CatalogResult<EpgListings>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_urls_carry_action_and_ids() {
        let conn = ConnectionInfo::new("http://p.example", "u", "pw");
        assert!(
            CatalogRequest::SeriesInfo { series_id: 12 }
                .api_url(&conn)
                .ends_with("action=get_series_info&series_id=12")
        );
        assert!(
            CatalogRequest::Series { category_id: None }
                .api_url(&conn)
                .ends_with("action=get_series")
        );
        assert_ne!(
            CatalogRequest::Epg { stream_id: 1 }.api_url(&conn),
            CatalogRequest::Epg { stream_id: 2 }.api_url(&conn)
        );
    }
}
