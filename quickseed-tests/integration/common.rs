//! Shared fixtures for integration tests

#![allow(dead_code)]

use std::sync::Arc;

use axum::Router;
use axum::body::{Body, to_bytes};
use axum::http::{Request, header};
use axum::response::Response;
use bytes::Bytes;
use quickseed_core::QuickseedConfig;
use quickseed_core::streaming::SessionController;
use quickseed_sim::{SimConfig, SimulatedSwarm};
use quickseed_web::{AppState, router};
use tower::ServiceExt;

pub const PIECE_LENGTH: u64 = 1024;

/// Deterministic file contents so any slice can be checked.
pub fn pattern(len: usize) -> Bytes {
    Bytes::from((0..len).map(|i| (i % 251) as u8).collect::<Vec<_>>())
}

pub struct Fixture {
    pub swarm: SimulatedSwarm,
    pub session: Arc<SessionController>,
    pub app: Router,
}

pub fn swarm_with(files: &[(&str, usize)], piece_length: u64) -> SimulatedSwarm {
    SimulatedSwarm::new(
        "fixture",
        files
            .iter()
            .map(|(path, len)| (path.to_string(), pattern(*len)))
            .collect(),
        SimConfig {
            piece_length,
            download_rate: 0,
            jitter: 0.0,
            ..Default::default()
        },
    )
}

/// Builds a router over `swarm` without selecting a file.
pub fn unstarted(swarm: SimulatedSwarm, config: QuickseedConfig) -> Fixture {
    let session = Arc::new(SessionController::new(Arc::new(swarm.clone()), &config));
    let state = AppState::new(session.clone(), config, "http://127.0.0.1:0/stream");
    Fixture {
        swarm,
        session,
        app: router(state),
    }
}

/// Builds a started session over the given files; nothing is downloaded yet.
pub async fn fixture(files: &[(&str, usize)]) -> Fixture {
    fixture_with(files, QuickseedConfig::for_testing()).await
}

pub async fn fixture_with(files: &[(&str, usize)], config: QuickseedConfig) -> Fixture {
    let fixture = unstarted(swarm_with(files, PIECE_LENGTH), config);
    fixture.session.start(None).await.unwrap();
    fixture
}

pub async fn get_stream(app: &Router, range: Option<&str>) -> Response {
    let mut request = Request::get("/stream");
    if let Some(range) = range {
        request = request.header(header::RANGE, range);
    }
    app.clone()
        .oneshot(request.body(Body::empty()).unwrap())
        .await
        .unwrap()
}

pub async fn body_bytes(response: Response) -> Bytes {
    to_bytes(response.into_body(), usize::MAX).await.unwrap()
}

pub fn header_str(response: &Response, name: header::HeaderName) -> String {
    response.headers()[name].to_str().unwrap().to_string()
}
