use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};

use super::{
    CatalogClient, CatalogError, CatalogRequest, CatalogResult, Category, EpgListings, LiveStream,
    Series, SeriesStreamInfo, VodStream, urls,
};
use crate::config::ConnectionInfo;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// HTTP implementation of [`CatalogClient`] against `player_api.php`.
#[derive(Clone)]
pub struct XtreamClient {
    client: Client,
}

impl XtreamClient {
    pub fn new(user_agent: Option<&str>) -> CatalogResult<Self> {
        let mut builder = Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .connect_timeout(Duration::from_secs(10));
        if let Some(ua) = user_agent {
            builder = builder.user_agent(ua);
        }
        let client = builder
            .build()
            .map_err(|e| CatalogError::transport("<client>", e))?;
        Ok(Self { client })
    }

    pub fn with_client(client: Client) -> Self {
        Self { client }
    }

    #[instrument(skip(self, conn, cancel), fields(action = request.action()))]
    async fn fetch<T: DeserializeOwned>(
        &self,
        conn: &ConnectionInfo,
        request: CatalogRequest,
        cancel: &CancellationToken,
    ) -> CatalogResult<T> {
        let url = request.api_url(conn);
        let display_url = urls::redact(&url, conn);

        let call = async {
            let response = self
                .client
                .get(&url)
                .send()
                .await
                .map_err(|e| CatalogError::transport(&display_url, e))?;

            let status = response.status();
            if !status.is_success() {
                return Err(CatalogError::status(status, &display_url));
            }

            let body = response
                .bytes()
                .await
                .map_err(|e| CatalogError::transport(&display_url, e))?;
            debug!(bytes = body.len(), "Catalog response received");

            serde_json::from_slice(&body).map_err(|e| CatalogError::Decode {
                url: display_url.clone(),
                reason: e.to_string(),
            })
        };

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(CatalogError::Cancelled),
            result = call => result,
        }
    }
}

#[async_trait]
impl CatalogClient for XtreamClient {
    async fn live_categories(
        &self,
        conn: &ConnectionInfo,
        cancel: &CancellationToken,
    ) -> CatalogResult<Vec<Category>> {
        self.fetch(conn, CatalogRequest::LiveCategories, cancel).await
    }

    async fn vod_categories(
        &self,
        conn: &ConnectionInfo,
        cancel: &CancellationToken,
    ) -> CatalogResult<Vec<Category>> {
        self.fetch(conn, CatalogRequest::VodCategories, cancel).await
    }

    async fn series_categories(
        &self,
        conn: &ConnectionInfo,
        cancel: &CancellationToken,
    ) -> CatalogResult<Vec<Category>> {
        self.fetch(conn, CatalogRequest::SeriesCategories, cancel)
            .await
    }

    async fn live_streams(
        &self,
        conn: &ConnectionInfo,
        category_id: Option<i32>,
        cancel: &CancellationToken,
    ) -> CatalogResult<Vec<LiveStream>> {
        self.fetch(conn, CatalogRequest::LiveStreams { category_id }, cancel)
            .await
    }

    async fn vod_streams(
        &self,
        conn: &ConnectionInfo,
        category_id: Option<i32>,
        cancel: &CancellationToken,
    ) -> CatalogResult<Vec<VodStream>> {
        self.fetch(conn, CatalogRequest::VodStreams { category_id }, cancel)
            .await
    }

    async fn series(
        &self,
        conn: &ConnectionInfo,
        category_id: Option<i32>,
        cancel: &CancellationToken,
    ) -> CatalogResult<Vec<Series>> {
        self.fetch(conn, CatalogRequest::Series { category_id }, cancel)
            .await
    }

    async fn series_info(
        &self,
        conn: &ConnectionInfo,
        series_id: i32,
        cancel: &CancellationToken,
    ) -> CatalogResult<SeriesStreamInfo> {
        self.fetch(conn, CatalogRequest::SeriesInfo { series_id }, cancel)
            .await
    }

    async fn epg(
        &self,
        conn: &ConnectionInfo,
        stream_id: i32,
        cancel: &CancellationToken,
    ) -> CatalogResult<EpgListings> {
        self.fetch(conn, CatalogRequest::Epg { stream_id }, cancel)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::collections::HashMap;

    use axum::Router;
    use axum::extract::Query;
    use axum::http::StatusCode;
    use axum::response::{IntoResponse, Response};
    use axum::routing::get;
    use reqwest::StatusCode as ReqwestStatus;
    use tokio::net::TcpListener;

    async fn player_api(Query(params): Query<HashMap<String, String>>) -> Response {
        if params.get("password").map(String::as_str) != Some("pw") {
            return StatusCode::FORBIDDEN.into_response();
        }
        match params.get("action").map(String::as_str) {
            Some("get_series_categories") => (
                [("content-type", "application/json")],
                r#"[{"category_id":"3","category_name":"Drama","parent_id":0}]"#,
            )
                .into_response(),
            Some("get_series") => "not json".into_response(),
            Some("get_live_streams") => {
                tokio::time::sleep(Duration::from_secs(5)).await;
                "[]".into_response()
            }
            _ => StatusCode::SERVICE_UNAVAILABLE.into_response(),
        }
    }

    async fn spawn_provider() -> ConnectionInfo {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let app = Router::new().route("/player_api.php", get(player_api));
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        ConnectionInfo::new(format!("http://{addr}"), "user", "pw")
    }

    #[tokio::test]
    async fn decodes_categories() {
        let conn = spawn_provider().await;
        let client = XtreamClient::new(None).unwrap();

        let categories = client
            .series_categories(&conn, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(categories.len(), 1);
        assert_eq!(categories[0].category_id, 3);
        assert_eq!(categories[0].category_name, "Drama");
    }

    #[tokio::test]
    async fn maps_status_and_decode_failures() {
        let conn = spawn_provider().await;
        let client = XtreamClient::new(None).unwrap();
        let cancel = CancellationToken::new();

        let err = client.series_info(&conn, 1, &cancel).await.unwrap_err();
        assert_eq!(err.status_code(), Some(ReqwestStatus::SERVICE_UNAVAILABLE));
        assert!(err.is_retryable());

        let err = client.series(&conn, None, &cancel).await.unwrap_err();
        assert!(matches!(err, CatalogError::Decode { .. }));
        assert!(!err.is_retryable());

        let bad_conn = ConnectionInfo::new(conn.base_url.clone(), "user", "wrong");
        let err = client.vod_categories(&bad_conn, &cancel).await.unwrap_err();
        assert!(err.is_client_error());
        assert!(!err.to_string().contains("wrong"));
    }

    #[tokio::test]
    async fn cancellation_interrupts_slow_calls() {
        let conn = spawn_provider().await;
        let client = XtreamClient::new(None).unwrap();
        let cancel = CancellationToken::new();

        let canceller = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            canceller.cancel();
        });

        let err = client.live_streams(&conn, None, &cancel).await.unwrap_err();
        assert!(matches!(err, CatalogError::Cancelled));
    }

    #[tokio::test]
    async fn unreachable_provider_is_a_transport_error() {
        let conn = ConnectionInfo::new("http://127.0.0.1:9", "user", "pw");
        let client = XtreamClient::new(None).unwrap();

        let err = client
            .live_categories(&conn, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, CatalogError::Transport { .. }));
        assert!(err.is_retryable());
    }
}
