//! Progressive HTTP delivery of the selected file.
//!
//! [`RangeStreamer`] answers one request against a snapshot of the active
//! file. Bytes are pulled from a [`PieceReader`] inside the response body, so
//! a read that waits on the swarm only holds up its own response.

use std::sync::Arc;

use axum::body::Body;
use axum::extract::State;
use axum::http::{HeaderMap, HeaderValue, Method, StatusCode, header};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use quickseed_core::config::StreamingConfig;
use quickseed_core::streaming::{
    ActiveStream, ByteRange, MediaFile, PieceProviderError, PieceReader, RangeError,
    parse_range_header, unsatisfiable_content_range,
};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, info, warn};

use crate::server::AppState;

/// Seconds a client should wait before retrying a stream that is not ready.
const RETRY_AFTER_SECS: &str = "2";

/// Failures that end a stream request before any body byte is sent.
#[derive(Debug, thiserror::Error)]
pub enum StreamError {
    #[error("No file available")]
    NoFile,

    #[error("Method {method} not allowed")]
    MethodNotAllowed { method: Method },

    #[error("Stream not ready")]
    NotReady,

    #[error("Invalid range: {source}")]
    InvalidRange {
        source: RangeError,
        total_length: u64,
    },

    #[error("Failed to open reader: {0}")]
    Reader(#[from] PieceProviderError),

    #[error("Failed to position reader: {0}")]
    Seek(#[from] std::io::Error),

    #[error("Server is shutting down")]
    ShuttingDown,
}

impl IntoResponse for StreamError {
    fn into_response(self) -> Response {
        let mut headers = HeaderMap::new();
        apply_cors(&mut headers);

        let (status, message) = match &self {
            StreamError::NoFile => (StatusCode::SERVICE_UNAVAILABLE, "No file available"),
            StreamError::MethodNotAllowed { .. } => {
                headers.insert(header::ALLOW, HeaderValue::from_static("GET, HEAD, OPTIONS"));
                (StatusCode::METHOD_NOT_ALLOWED, "Method not allowed")
            }
            StreamError::NotReady => {
                headers.insert(
                    header::RETRY_AFTER,
                    HeaderValue::from_static(RETRY_AFTER_SECS),
                );
                (StatusCode::SERVICE_UNAVAILABLE, "Stream is buffering")
            }
            StreamError::InvalidRange { total_length, .. } => {
                insert_text(
                    &mut headers,
                    header::CONTENT_RANGE,
                    &unsatisfiable_content_range(*total_length),
                );
                (StatusCode::RANGE_NOT_SATISFIABLE, "Range not satisfiable")
            }
            StreamError::Reader(_) | StreamError::Seek(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "Failed to read file")
            }
            StreamError::ShuttingDown => (StatusCode::SERVICE_UNAVAILABLE, "Server shutting down"),
        };

        (status, headers, message).into_response()
    }
}

/// Serves full-content and partial-content responses for one file snapshot.
///
/// Never touches scheduler or readiness state. Each streaming body holds a
/// permit from a shared semaphore for as long as it holds its reader.
#[derive(Clone)]
pub struct RangeStreamer {
    config: StreamingConfig,
    permits: Arc<Semaphore>,
}

impl RangeStreamer {
    pub fn new(config: StreamingConfig, max_concurrent_streams: usize) -> Self {
        Self {
            config,
            permits: Arc::new(Semaphore::new(max_concurrent_streams.max(1))),
        }
    }

    /// Streaming bodies that can start right now without waiting.
    pub fn available_permits(&self) -> usize {
        self.permits.available_permits()
    }

    /// Answers one request for `active`.
    ///
    /// # Errors
    ///
    /// - `StreamError::NoFile` - No file is selected
    /// - `StreamError::MethodNotAllowed` - Method other than GET, HEAD or OPTIONS
    /// - `StreamError::InvalidRange` - Range header is malformed or out of bounds
    /// - `StreamError::Reader` / `StreamError::Seek` - The provider could not position a reader
    pub async fn serve(
        &self,
        method: &Method,
        range: Option<&str>,
        active: Option<ActiveStream>,
    ) -> Result<Response, StreamError> {
        let active = active.ok_or(StreamError::NoFile)?;
        let file = &active.file;

        match *method {
            Method::OPTIONS => {
                let mut headers = HeaderMap::new();
                apply_cors(&mut headers);
                Ok((StatusCode::OK, headers).into_response())
            }
            Method::HEAD => {
                let mut headers = content_headers(file);
                headers.insert(header::CONTENT_LENGTH, HeaderValue::from(file.length));
                Ok((StatusCode::OK, headers).into_response())
            }
            Method::GET => match range {
                Some(range) => self.serve_partial(&active, range).await,
                None => self.serve_full(&active).await,
            },
            _ => Err(StreamError::MethodNotAllowed {
                method: method.clone(),
            }),
        }
    }

    async fn serve_full(&self, active: &ActiveStream) -> Result<Response, StreamError> {
        let file = &active.file;
        let mut headers = content_headers(file);
        headers.insert(header::CONTENT_LENGTH, HeaderValue::from(file.length));

        info!(
            "Streaming full file: {} ({} bytes)",
            file.path, file.length
        );

        let Some(range) = ByteRange::full(file.length) else {
            return Ok((StatusCode::OK, headers, Body::empty()).into_response());
        };
        let body = self
            .open_body(active, range, self.config.full_chunk_size)
            .await?;
        Ok((StatusCode::OK, headers, body).into_response())
    }

    async fn serve_partial(
        &self,
        active: &ActiveStream,
        header_value: &str,
    ) -> Result<Response, StreamError> {
        let file = &active.file;
        let range = parse_range_header(header_value, file.length).map_err(|source| {
            debug!("Rejecting range {} for {}: {}", header_value, file.path, source);
            StreamError::InvalidRange {
                source,
                total_length: file.length,
            }
        })?;

        let mut headers = content_headers(file);
        headers.insert(header::CONTENT_LENGTH, HeaderValue::from(range.len()));
        insert_text(&mut headers, header::CONTENT_RANGE, &range.content_range());

        info!(
            "Range request: bytes {}-{}/{} ({} bytes)",
            range.start(),
            range.end(),
            range.total_length(),
            range.len()
        );

        let body = self
            .open_body(active, range, self.config.range_chunk_size)
            .await?;
        Ok((StatusCode::PARTIAL_CONTENT, headers, body).into_response())
    }

    async fn open_body(
        &self,
        active: &ActiveStream,
        range: ByteRange,
        chunk_size: usize,
    ) -> Result<Body, StreamError> {
        let permit = self
            .permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| StreamError::ShuttingDown)?;

        let mut reader = active.provider.open_reader(&active.file).await?;
        reader.seek(range.start()).await?;

        let state = BodyState {
            reader,
            buffer: vec![0; chunk_size.max(1)],
            remaining: range.len(),
            sent: 0,
            since_flush: 0,
            flush_interval: self.config.flush_interval.max(1),
            path: active.file.path.clone(),
            failed: false,
            _permit: permit,
        };
        Ok(Body::from_stream(futures::stream::unfold(state, next_chunk)))
    }
}

/// Reader, buffer and permit owned by one response body.
///
/// Dropping it, whether the range was delivered or the client went away,
/// releases the reader and the stream permit.
struct BodyState {
    reader: Box<dyn PieceReader>,
    buffer: Vec<u8>,
    remaining: u64,
    sent: u64,
    since_flush: u64,
    flush_interval: u64,
    path: String,
    failed: bool,
    _permit: OwnedSemaphorePermit,
}

impl Drop for BodyState {
    fn drop(&mut self) {
        if self.remaining > 0 {
            debug!(
                "Stream of {} ended after {} bytes with {} bytes unsent",
                self.path, self.sent, self.remaining
            );
        } else {
            debug!("Stream of {} finished: {} bytes", self.path, self.sent);
        }
    }
}

async fn next_chunk(mut state: BodyState) -> Option<(Result<Bytes, std::io::Error>, BodyState)> {
    if state.remaining == 0 || state.failed {
        return None;
    }

    let want = (state.buffer.len() as u64).min(state.remaining) as usize;
    let read = match state.reader.read(&mut state.buffer[..want]).await {
        Ok(0) => {
            debug!("Reader for {} hit end of file early", state.path);
            return None;
        }
        Ok(read) => read,
        Err(e) => {
            // Surfacing the error aborts the connection instead of ending it cleanly.
            warn!("Read failed while streaming {}: {}", state.path, e);
            state.failed = true;
            return Some((Err(e), state));
        }
    };

    let chunk = Bytes::copy_from_slice(&state.buffer[..read]);
    state.remaining -= read as u64;
    state.sent += read as u64;
    state.since_flush += read as u64;

    if state.since_flush >= state.flush_interval {
        state.since_flush = 0;
        debug!("Streamed {} bytes of {}", state.sent, state.path);
        tokio::task::yield_now().await;
    }

    Some((Ok(chunk), state))
}

/// Stream endpoint accepting every method; disallowed ones get 405.
pub async fn stream_file(
    State(state): State<AppState>,
    method: Method,
    headers: HeaderMap,
) -> Response {
    let active = state.session.current();

    if state.config.streaming.require_ready
        && method == Method::GET
        && active.is_some()
        && !state.session.readiness().is_ready()
    {
        return StreamError::NotReady.into_response();
    }

    // A blank Range header asks for the whole file; undecodable bytes are malformed.
    let range = match headers.get(header::RANGE).map(HeaderValue::to_str) {
        Some(Ok(value)) if value.trim().is_empty() => None,
        Some(Ok(value)) => Some(value),
        Some(Err(_)) => Some("invalid"),
        None => None,
    };

    match state.streamer.serve(&method, range, active).await {
        Ok(mut response) => {
            apply_cors(response.headers_mut());
            response
        }
        Err(e) => e.into_response(),
    }
}

fn content_headers(file: &MediaFile) -> HeaderMap {
    let mut headers = HeaderMap::new();
    let mime = mime_guess::from_path(&file.path).first_or_octet_stream();
    insert_text(&mut headers, header::CONTENT_TYPE, mime.as_ref());
    headers.insert(header::ACCEPT_RANGES, HeaderValue::from_static("bytes"));
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    apply_cors(&mut headers);
    headers
}

/// Permissive CORS headers for in-browser players issuing range requests.
pub fn apply_cors(headers: &mut HeaderMap) {
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_ORIGIN,
        HeaderValue::from_static("*"),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_METHODS,
        HeaderValue::from_static("GET, HEAD, OPTIONS"),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_HEADERS,
        HeaderValue::from_static("Range, Content-Type"),
    );
    headers.insert(
        header::ACCESS_CONTROL_EXPOSE_HEADERS,
        HeaderValue::from_static("Content-Length, Content-Range, Accept-Ranges"),
    );
}

fn insert_text(headers: &mut HeaderMap, name: header::HeaderName, value: &str) {
    if let Ok(value) = HeaderValue::from_str(value) {
        headers.insert(name, value);
    }
}

#[cfg(test)]
mod tests {
    use axum::body::to_bytes;
    use quickseed_core::QuickseedConfig;
    use quickseed_core::streaming::SessionController;
    use quickseed_sim::{SimConfig, SimulatedSwarm};

    use super::*;

    fn pattern(len: usize) -> Bytes {
        Bytes::from((0..len).map(|i| (i % 251) as u8).collect::<Vec<_>>())
    }

    async fn active_stream(len: usize) -> (SimulatedSwarm, ActiveStream) {
        let swarm = SimulatedSwarm::new(
            "test",
            vec![("movie.mp4".to_string(), pattern(len))],
            SimConfig {
                piece_length: 1024,
                download_rate: 0,
                jitter: 0.0,
                ..Default::default()
            },
        );
        swarm.complete_all();
        let session = SessionController::new(Arc::new(swarm.clone()), &QuickseedConfig::for_testing());
        session.start(None).await.unwrap();
        (swarm, session.current().unwrap())
    }

    fn streamer() -> RangeStreamer {
        let config = QuickseedConfig::for_testing();
        RangeStreamer::new(config.streaming, 4)
    }

    fn header_str<'a>(response: &'a Response, name: header::HeaderName) -> &'a str {
        response.headers()[name].to_str().unwrap()
    }

    #[tokio::test]
    async fn test_full_content_response() {
        let (swarm, active) = active_stream(10_000).await;
        let response = streamer()
            .serve(&Method::GET, None, Some(active))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(header_str(&response, header::CONTENT_LENGTH), "10000");
        assert_eq!(header_str(&response, header::CONTENT_TYPE), "video/mp4");
        assert_eq!(header_str(&response, header::ACCEPT_RANGES), "bytes");
        assert_eq!(header_str(&response, header::CACHE_CONTROL), "no-cache");
        assert_eq!(header_str(&response, header::ACCESS_CONTROL_ALLOW_ORIGIN), "*");

        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(body, swarm.file_bytes(0).unwrap());
        assert_eq!(swarm.open_reader_count(), 0);
    }

    #[tokio::test]
    async fn test_partial_content_response() {
        let (swarm, active) = active_stream(10_000).await;
        let response = streamer()
            .serve(&Method::GET, Some("bytes=5000-"), Some(active))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::PARTIAL_CONTENT);
        assert_eq!(header_str(&response, header::CONTENT_RANGE), "bytes 5000-9999/10000");
        assert_eq!(header_str(&response, header::CONTENT_LENGTH), "5000");

        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(body, swarm.file_bytes(0).unwrap().slice(5000..));
    }

    #[tokio::test]
    async fn test_unsatisfiable_range() {
        let (swarm, active) = active_stream(100).await;
        let err = streamer()
            .serve(&Method::GET, Some("bytes=150-200"), Some(active))
            .await
            .unwrap_err();

        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::RANGE_NOT_SATISFIABLE);
        assert_eq!(header_str(&response, header::CONTENT_RANGE), "bytes */100");
        assert_eq!(swarm.open_reader_count(), 0);
    }

    #[tokio::test]
    async fn test_malformed_range_is_416() {
        let (_swarm, active) = active_stream(100).await;
        let err = streamer()
            .serve(&Method::GET, Some("bytes=abc"), Some(active))
            .await
            .unwrap_err();
        assert_eq!(err.into_response().status(), StatusCode::RANGE_NOT_SATISFIABLE);
    }

    #[tokio::test]
    async fn test_head_reports_length_without_reader() {
        let (swarm, active) = active_stream(4096).await;
        let response = streamer()
            .serve(&Method::HEAD, None, Some(active))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(header_str(&response, header::CONTENT_LENGTH), "4096");
        assert_eq!(swarm.open_reader_count(), 0);
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert!(body.is_empty());
    }

    #[tokio::test]
    async fn test_options_and_disallowed_methods() {
        let (_swarm, active) = active_stream(100).await;
        let response = streamer()
            .serve(&Method::OPTIONS, None, Some(active.clone()))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            header_str(&response, header::ACCESS_CONTROL_ALLOW_METHODS),
            "GET, HEAD, OPTIONS"
        );

        let err = streamer()
            .serve(&Method::POST, None, Some(active))
            .await
            .unwrap_err();
        assert_eq!(err.into_response().status(), StatusCode::METHOD_NOT_ALLOWED);
    }

    #[tokio::test]
    async fn test_no_file_is_503() {
        for method in [Method::GET, Method::HEAD, Method::OPTIONS] {
            let err = streamer().serve(&method, None, None).await.unwrap_err();
            assert!(matches!(err, StreamError::NoFile));
            assert_eq!(err.into_response().status(), StatusCode::SERVICE_UNAVAILABLE);
        }
    }

    #[tokio::test]
    async fn test_dropped_body_releases_reader_and_permit() {
        let (swarm, active) = active_stream(10_000).await;
        let streamer = streamer();
        let response = streamer
            .serve(&Method::GET, Some("bytes=0-"), Some(active))
            .await
            .unwrap();

        assert_eq!(swarm.open_reader_count(), 1);
        assert_eq!(streamer.available_permits(), 3);

        drop(response);
        assert_eq!(swarm.open_reader_count(), 0);
        assert_eq!(streamer.available_permits(), 4);
    }

    #[tokio::test]
    async fn test_early_eof_ends_body() {
        let (swarm, active) = active_stream(10_000).await;
        let response = streamer()
            .serve(&Method::GET, None, Some(active))
            .await
            .unwrap();
        swarm.shutdown();

        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert!(body.len() < 10_000);
    }

    struct BrokenReader;

    #[async_trait::async_trait]
    impl PieceReader for BrokenReader {
        async fn read(&mut self, _buf: &mut [u8]) -> std::io::Result<usize> {
            Err(std::io::Error::other("disk went away"))
        }

        async fn seek(&mut self, offset: u64) -> std::io::Result<u64> {
            Ok(offset)
        }
    }

    #[tokio::test]
    async fn test_read_error_aborts_body() {
        use futures::StreamExt;

        let permits = Arc::new(Semaphore::new(1));
        let state = BodyState {
            reader: Box::new(BrokenReader),
            buffer: vec![0; 64],
            remaining: 1000,
            sent: 0,
            since_flush: 0,
            flush_interval: 4096,
            path: "broken.mp4".to_string(),
            failed: false,
            _permit: permits.clone().acquire_owned().await.unwrap(),
        };

        let mut chunks = Box::pin(futures::stream::unfold(state, next_chunk));
        let first = chunks.next().await.expect("error should be yielded");
        assert_eq!(first.unwrap_err().to_string(), "disk went away");
        assert!(chunks.next().await.is_none());

        drop(chunks);
        assert_eq!(permits.available_permits(), 1);

        let state = BodyState {
            reader: Box::new(BrokenReader),
            buffer: vec![0; 64],
            remaining: 1000,
            sent: 0,
            since_flush: 0,
            flush_interval: 4096,
            path: "broken.mp4".to_string(),
            failed: false,
            _permit: permits.clone().acquire_owned().await.unwrap(),
        };
        let body = Body::from_stream(futures::stream::unfold(state, next_chunk));
        assert!(to_bytes(body, usize::MAX).await.is_err());
    }
}
