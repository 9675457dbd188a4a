//! Stream server: router construction and listener lifecycle.
//!
//! The router is built once per server and owns its state; nothing is
//! registered globally.

use std::future::Future;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;

use axum::Router;
use axum::routing::{any, get, post};
use quickseed_core::QuickseedConfig;
use quickseed_core::streaming::SessionController;
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tracing::info;

use crate::handlers::{
    RangeStreamer, index_page, list_files, not_found, seek, select_file, session_status,
    stream_file, stream_info, test_page,
};

/// Errors starting or running the stream server.
#[derive(Debug, thiserror::Error)]
pub enum WebError {
    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        source: std::io::Error,
    },

    #[error("Server error: {0}")]
    Serve(#[from] std::io::Error),
}

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub session: Arc<SessionController>,
    pub config: Arc<QuickseedConfig>,
    pub streamer: RangeStreamer,
    pub stream_url: String,
}

impl AppState {
    pub fn new(
        session: Arc<SessionController>,
        config: QuickseedConfig,
        stream_url: impl Into<String>,
    ) -> Self {
        Self {
            streamer: RangeStreamer::new(
                config.streaming.clone(),
                config.server.max_concurrent_streams,
            ),
            session,
            config: Arc::new(config),
            stream_url: stream_url.into(),
        }
    }
}

/// Builds the application router.
///
/// `/stream` sets its own CORS headers on every response; the remaining
/// routes go through a permissive CORS layer.
pub fn router(state: AppState) -> Router {
    let api = Router::new()
        .route("/", get(index_page))
        .route("/test", get(test_page))
        .route("/info", get(stream_info))
        .route("/status", get(session_status))
        .route("/files", get(list_files))
        .route("/api/select/{index}", post(select_file))
        .route("/api/seek", post(seek))
        .layer(CorsLayer::permissive());

    Router::new()
        .route("/stream", any(stream_file))
        .merge(api)
        .fallback(not_found)
        .with_state(state)
}

/// HTTP server bound to a listener, ready to serve one session.
pub struct StreamServer {
    listener: TcpListener,
    local_addr: SocketAddr,
    router: Router,
}

impl StreamServer {
    /// Binds the configured address and builds the router.
    ///
    /// # Errors
    ///
    /// - `WebError::Bind` - The address is invalid or already in use
    pub async fn bind(
        config: QuickseedConfig,
        session: Arc<SessionController>,
    ) -> Result<Self, WebError> {
        let addr = format!("{}:{}", config.server.host, config.server.port);
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|source| WebError::Bind {
                addr: addr.clone(),
                source,
            })?;
        let local_addr = listener
            .local_addr()
            .map_err(|source| WebError::Bind { addr, source })?;

        let state = AppState::new(session, config, stream_url_for(local_addr));
        Ok(Self {
            listener,
            local_addr,
            router: router(state),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// URL players should open, `http://<addr>/stream`.
    pub fn stream_url(&self) -> String {
        stream_url_for(self.local_addr)
    }

    /// Serves requests until `shutdown` completes.
    ///
    /// In-flight responses are allowed to finish before this returns.
    ///
    /// # Errors
    ///
    /// - `WebError::Serve` - The listener failed
    pub async fn serve<F>(self, shutdown: F) -> Result<(), WebError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        info!("Quickseed stream server listening on http://{}", self.local_addr);
        axum::serve(self.listener, self.router)
            .with_graceful_shutdown(shutdown)
            .await?;
        info!("Quickseed stream server stopped");
        Ok(())
    }
}

fn stream_url_for(addr: SocketAddr) -> String {
    let ip = match addr.ip() {
        ip if ip.is_unspecified() => IpAddr::V4(Ipv4Addr::LOCALHOST),
        ip => ip,
    };
    format!("http://{}/stream", SocketAddr::new(ip, addr.port()))
}
