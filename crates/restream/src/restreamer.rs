//! One upstream HTTP connection fanned out to many local consumers.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use bytes::Bytes;
use futures::StreamExt;
use futures::stream::BoxStream;
use reqwest::{Client, Response, StatusCode, header};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};
use url::Url;
use uuid::Uuid;

use crate::ring_buffer::{RingBuffer, RingReader, RingWriter};
use crate::{RestreamConfig, RestreamError, Result};

#[derive(Default)]
struct SessionState {
    task: Option<JoinHandle<()>>,
    token: CancellationToken,
    opened_once: bool,
}

/// Relays a single upstream byte stream into a [`RingBuffer`] and hands out
/// independent readers over it.
///
/// The upstream connection is opened at most once per running copy task no
/// matter how many consumers attach.
pub struct Restreamer {
    session_id: Uuid,
    url: Url,
    client: Client,
    config: RestreamConfig,
    buffer: RingBuffer,
    consumers: Arc<AtomicUsize>,
    running: Arc<AtomicBool>,
    state: Mutex<SessionState>,
}

impl std::fmt::Debug for Restreamer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Restreamer")
            .field("session_id", &self.session_id)
            .field("url", &self.url.as_str())
            .field("consumers", &self.consumer_count())
            .field("running", &self.is_open())
            .finish()
    }
}

impl Restreamer {
    pub fn new(url: &str, client: Client, config: RestreamConfig) -> Result<Self> {
        config.validate()?;

        let parsed = Url::parse(url).map_err(|e| RestreamError::invalid_url(url, e.to_string()))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(RestreamError::invalid_url(
                url,
                format!("unsupported scheme `{}`", parsed.scheme()),
            ));
        }

        let buffer = RingBuffer::with_capacity(config.buffer_capacity)?;

        Ok(Self {
            session_id: Uuid::new_v4(),
            url: parsed,
            client,
            config,
            buffer,
            consumers: Arc::new(AtomicUsize::new(0)),
            running: Arc::new(AtomicBool::new(false)),
            state: Mutex::new(SessionState::default()),
        })
    }

    /// Unique token identifying this session.
    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    pub fn url(&self) -> &str {
        self.url.as_str()
    }

    pub fn buffer(&self) -> &RingBuffer {
        &self.buffer
    }

    /// Number of live consumer readers. Advisory only; reaching zero does not
    /// close the session.
    pub fn consumer_count(&self) -> usize {
        self.consumers.load(Ordering::Acquire)
    }

    /// True while the background copy task is running.
    pub fn is_open(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Connect upstream and start copying into the buffer.
    ///
    /// Idempotent while a copy task is running. Re-opens once a previous
    /// upstream body has ended. HTTP failures here are returned to the caller.
    #[instrument(skip(self), fields(session = %self.session_id, url = %self.url))]
    pub async fn open(&self) -> Result<()> {
        let mut state = self.state.lock().await;

        if let Some(task) = state.task.as_ref()
            && !task.is_finished()
        {
            debug!("Restream already open");
            return Ok(());
        }
        if let Some(previous) = state.task.take() {
            // The finished task still owns nothing but its join result.
            let _ = previous.await;
        }

        let response = self.connect().await?;

        let writer = self.buffer.writer().ok_or_else(|| RestreamError::Internal {
            reason: "ring buffer writer is still attached".to_string(),
        })?;

        let token = CancellationToken::new();
        state.token = token.clone();
        self.running.store(true, Ordering::Release);
        state.task = Some(tokio::spawn(copy_loop(
            response,
            writer,
            token,
            self.session_id,
            Arc::clone(&self.running),
        )));
        state.opened_once = true;

        info!("Restream opened");
        Ok(())
    }

    /// Attach a new consumer.
    ///
    /// Starts the upstream connection in the background when the session is
    /// not open, including after a previous upstream body ended; the reader
    /// simply waits until bytes arrive. If that background open fails,
    /// waiting readers observe end of stream.
    pub fn reader_stream(self: &Arc<Self>) -> RestreamReader {
        // The copy task drops its writer before clearing `running`, so no
        // stale writer can mark the buffer finished after this point.
        let reopen = !self.is_open() && self.buffer.reopen();

        let reader = self
            .buffer
            .reader()
            .with_poll_interval(self.config.poll_interval);
        let consumers = self.consumers.fetch_add(1, Ordering::AcqRel) + 1;
        debug!(session = %self.session_id, consumers, "Consumer attached");

        if reopen {
            let this = Arc::clone(self);
            tokio::spawn(async move {
                if let Err(e) = this.open().await {
                    warn!(
                        session = %this.session_id,
                        error = %e,
                        "Background restream open failed"
                    );
                    this.buffer.finish();
                }
            });
        }

        RestreamReader {
            reader,
            chunk_size: self.config.read_chunk_size,
            guard: ConsumerGuard {
                consumers: Arc::clone(&self.consumers),
            },
        }
    }

    /// Cancel the copy task and wait for it to stop.
    ///
    /// Fails with [`RestreamError::NotOpened`] when `open` never succeeded.
    #[instrument(skip(self), fields(session = %self.session_id))]
    pub async fn close(&self) -> Result<()> {
        let mut state = self.state.lock().await;

        let Some(task) = state.task.take() else {
            return if state.opened_once {
                Ok(())
            } else {
                Err(RestreamError::NotOpened)
            };
        };

        state.token.cancel();
        task.await.map_err(|e| RestreamError::Internal {
            reason: format!("copy task failed: {e}"),
        })?;

        info!(consumers = self.consumer_count(), "Restream closed");
        Ok(())
    }

    async fn connect(&self) -> Result<Response> {
        // `send` resolves once the headers are in; the body is streamed later.
        let response = self.client.get(self.url.clone()).send().await?;

        let response = if is_redirect(response.status()) {
            let target = redirect_target(&self.url, &response)?;
            debug!(from = %self.url, to = %target, "Following upstream redirect");
            self.client.get(target).send().await?
        } else {
            response
        };

        let status = response.status();
        if !status.is_success() {
            return Err(RestreamError::http_status(
                status,
                response.url().as_str(),
                "restream open",
            ));
        }

        Ok(response)
    }
}

fn is_redirect(status: StatusCode) -> bool {
    matches!(
        status,
        StatusCode::MOVED_PERMANENTLY
            | StatusCode::FOUND
            | StatusCode::TEMPORARY_REDIRECT
            | StatusCode::PERMANENT_REDIRECT
    )
}

fn redirect_target(base: &Url, response: &Response) -> Result<Url> {
    let location = response
        .headers()
        .get(header::LOCATION)
        .ok_or_else(|| RestreamError::invalid_redirect(base.as_str(), "missing Location header"))?;
    let location = location.to_str().map_err(|_| {
        RestreamError::invalid_redirect(base.as_str(), "Location header is not valid UTF-8")
    })?;
    base.join(location)
        .map_err(|e| RestreamError::invalid_redirect(base.as_str(), e.to_string()))
}

async fn copy_loop(
    response: Response,
    mut writer: RingWriter,
    token: CancellationToken,
    session_id: Uuid,
    running: Arc<AtomicBool>,
) {
    let mut body = response.bytes_stream();
    let mut copied: u64 = 0;

    loop {
        tokio::select! {
            biased;
            _ = token.cancelled() => {
                debug!(session = %session_id, copied, "Restream copy cancelled");
                break;
            }
            chunk = body.next() => match chunk {
                Some(Ok(bytes)) => {
                    writer.write(&bytes);
                    copied += bytes.len() as u64;
                }
                Some(Err(e)) => {
                    warn!(
                        session = %session_id,
                        copied,
                        error = %e,
                        "Upstream read failed, restream stopped"
                    );
                    break;
                }
                None => {
                    info!(session = %session_id, copied, "Upstream stream ended");
                    break;
                }
            }
        }
    }

    drop(writer);
    running.store(false, Ordering::Release);
}

struct ConsumerGuard {
    consumers: Arc<AtomicUsize>,
}

impl Drop for ConsumerGuard {
    fn drop(&mut self) {
        self.consumers.fetch_sub(1, Ordering::AcqRel);
    }
}

/// A consumer's view of a restream session. Dropping it detaches the consumer.
pub struct RestreamReader {
    reader: RingReader,
    chunk_size: usize,
    guard: ConsumerGuard,
}

impl RestreamReader {
    /// See [`RingReader::read`].
    pub async fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        self.reader.read(buf).await
    }

    pub fn lag(&self) -> u64 {
        self.reader.lag()
    }

    /// Stream of chunks for handing to an HTTP response body.
    pub fn into_stream(self) -> BoxStream<'static, Result<Bytes>> {
        let guard = self.guard;
        self.reader
            .into_stream(self.chunk_size)
            .map(move |chunk| {
                let _ = &guard;
                chunk
            })
            .boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::convert::Infallible;
    use std::time::Duration;

    use axum::Router;
    use axum::body::Body;
    use axum::http::{StatusCode as AxumStatus, header as axum_header};
    use axum::response::IntoResponse;
    use axum::routing::get;
    use tokio::net::TcpListener;

    use crate::create_client;

    const BODY: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";

    fn endless_body() -> Body {
        let chunks = futures::stream::unfold(0u8, |n| async move {
            tokio::time::sleep(Duration::from_millis(5)).await;
            Some((Ok::<_, Infallible>(Bytes::from(vec![n; 8])), n.wrapping_add(1)))
        });
        Body::from_stream(chunks)
    }

    async fn spawn_upstream(hits: Arc<AtomicUsize>) -> String {
        let live_hits = Arc::clone(&hits);
        let app = Router::new()
            .route("/stream", get(|| async { BODY }))
            .route(
                "/live",
                get(move || {
                    let hits = Arc::clone(&live_hits);
                    async move {
                        hits.fetch_add(1, Ordering::SeqCst);
                        endless_body()
                    }
                }),
            )
            .route(
                "/redirect",
                get(|| async {
                    (AxumStatus::FOUND, [(axum_header::LOCATION, "/stream")]).into_response()
                }),
            )
            .route(
                "/double",
                get(|| async {
                    (AxumStatus::TEMPORARY_REDIRECT, [(axum_header::LOCATION, "/redirect")])
                        .into_response()
                }),
            )
            .route("/missing", get(|| async { AxumStatus::NOT_FOUND }));

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}")
    }

    fn restreamer(url: &str) -> Arc<Restreamer> {
        let config = RestreamConfig::default().with_buffer_capacity(4096);
        let client = create_client(&config).unwrap();
        Arc::new(Restreamer::new(url, client, config).unwrap())
    }

    async fn drain(reader: RestreamReader) -> Vec<u8> {
        let chunks: Vec<_> =
            tokio::time::timeout(Duration::from_secs(5), reader.into_stream().collect())
                .await
                .unwrap();
        chunks.into_iter().flat_map(|c| c.unwrap().to_vec()).collect()
    }

    #[test]
    fn rejects_non_http_urls() {
        let config = RestreamConfig::default();
        let client = create_client(&config).unwrap();
        let err = Restreamer::new("rtmp://example.com/live", client, config).unwrap_err();
        assert!(matches!(err, RestreamError::InvalidUrl { .. }));
    }

    #[tokio::test]
    async fn reader_stream_opens_and_relays_body() {
        let base = spawn_upstream(Arc::new(AtomicUsize::new(0))).await;
        let session = restreamer(&format!("{base}/stream"));

        let reader = session.reader_stream();
        assert_eq!(drain(reader).await, BODY);
    }

    #[tokio::test]
    async fn reader_attached_after_upstream_ended_reconnects() {
        let base = spawn_upstream(Arc::new(AtomicUsize::new(0))).await;
        let session = restreamer(&format!("{base}/stream"));

        assert_eq!(drain(session.reader_stream()).await, BODY);
        tokio::time::timeout(Duration::from_secs(5), async {
            while session.is_open() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
        assert!(session.buffer().is_finished());

        // The new consumer waits for the re-opened upstream instead of
        // seeing the old end of stream.
        assert_eq!(drain(session.reader_stream()).await, BODY);
    }

    #[tokio::test]
    async fn failed_background_open_ends_waiting_readers() {
        let base = spawn_upstream(Arc::new(AtomicUsize::new(0))).await;
        let session = restreamer(&format!("{base}/missing"));

        assert!(drain(session.reader_stream()).await.is_empty());
        assert!(!session.is_open());
    }

    #[tokio::test]
    async fn follows_exactly_one_redirect() {
        let base = spawn_upstream(Arc::new(AtomicUsize::new(0))).await;

        let session = restreamer(&format!("{base}/redirect"));
        let reader = session.reader_stream();
        assert_eq!(drain(reader).await, BODY);

        let session = restreamer(&format!("{base}/double"));
        let err = session.open().await.unwrap_err();
        assert!(matches!(
            err,
            RestreamError::HttpStatus { status, .. } if status == StatusCode::FOUND
        ));
    }

    #[tokio::test]
    async fn open_propagates_http_errors() {
        let base = spawn_upstream(Arc::new(AtomicUsize::new(0))).await;
        let session = restreamer(&format!("{base}/missing"));

        let err = session.open().await.unwrap_err();
        assert!(matches!(
            err,
            RestreamError::HttpStatus { status, .. } if status == StatusCode::NOT_FOUND
        ));
        assert!(!session.is_open());
    }

    #[tokio::test]
    async fn close_before_open_fails() {
        let session = restreamer("http://127.0.0.1:9/never");
        assert!(matches!(
            session.close().await,
            Err(RestreamError::NotOpened)
        ));
    }

    #[tokio::test]
    async fn open_is_idempotent_and_shares_one_upstream() {
        let hits = Arc::new(AtomicUsize::new(0));
        let base = spawn_upstream(Arc::clone(&hits)).await;
        let session = restreamer(&format!("{base}/live"));

        session.open().await.unwrap();
        session.open().await.unwrap();
        let mut first = session.reader_stream();
        let mut second = session.reader_stream();
        assert_eq!(session.consumer_count(), 2);

        let mut buf = [0u8; 64];
        assert!(first.read(&mut buf).await.unwrap() > 0);
        assert!(second.read(&mut buf).await.unwrap() > 0);
        assert_eq!(hits.load(Ordering::SeqCst), 1);

        drop(second);
        assert_eq!(session.consumer_count(), 1);

        session.close().await.unwrap();
    }

    #[tokio::test]
    async fn close_stops_copy_task_and_ends_readers() {
        let base = spawn_upstream(Arc::new(AtomicUsize::new(0))).await;
        let session = restreamer(&format!("{base}/live"));

        session.open().await.unwrap();
        let reader = session.reader_stream();
        assert!(session.is_open());

        session.close().await.unwrap();
        assert!(!session.is_open());
        assert!(session.buffer().is_finished());

        // Whatever was buffered drains, then the stream ends.
        let _ = drain(reader).await;
        assert_eq!(session.consumer_count(), 0);

        // A second close after a successful open is a no-op.
        session.close().await.unwrap();
    }
}
