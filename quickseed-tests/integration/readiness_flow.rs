//! Integration tests for readiness reporting, seeking and the readiness gate

use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode, header};
use quickseed_core::QuickseedConfig;
use quickseed_core::streaming::{PiecePriority, PieceStatus, ReadinessState};
use tower::ServiceExt;

use crate::common::{body_bytes, fixture, fixture_with, get_stream};

async fn status_json(app: &axum::Router) -> serde_json::Value {
    let response = app
        .clone()
        .oneshot(Request::get("/status").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    serde_json::from_slice(&body_bytes(response).await).unwrap()
}

#[tokio::test]
async fn test_start_primes_leading_pieces() {
    // 4000 pieces -> hot window of 10
    let fx = fixture(&[("movie.mp4", 4000 * 1024)]).await;

    for piece in 0..10 {
        assert_eq!(fx.swarm.priority_of(0, piece), PiecePriority::Now);
    }
    assert_eq!(fx.swarm.priority_of(0, 10), PiecePriority::Normal);
}

#[tokio::test]
async fn test_half_of_sample_is_not_ready() {
    // 200 pieces -> 10 sampled
    let fx = fixture(&[("movie.mp4", 200 * 1024)]).await;

    for piece in 0..5 {
        fx.swarm.complete_piece(0, piece);
    }
    let snapshot = fx.session.readiness();
    assert_eq!(snapshot.sample_pieces, 10);
    assert_eq!(snapshot.state, ReadinessState::Buffering);

    fx.swarm.complete_piece(0, 5);
    assert!(fx.session.readiness().is_ready());
}

#[tokio::test]
async fn test_status_endpoint_reports_progress() {
    let fx = fixture(&[("movie.mp4", 100 * 1024)]).await;
    for piece in 0..3 {
        fx.swarm.complete_piece(0, piece);
    }

    let status = status_json(&fx.app).await;
    assert_eq!(status["torrent_name"], "fixture");
    assert_eq!(status["total_size"], 100 * 1024);
    assert_eq!(status["downloaded"], 3 * 1024);
    assert_eq!(status["streaming_file"], "movie.mp4");
    assert_eq!(status["stream_ready"], true);
    assert_eq!(status["readiness"]["completed_pieces"], 3);
    assert_eq!(status["readiness"]["sample_pieces"], 5);
}

#[tokio::test]
async fn test_seek_prioritizes_target_window() {
    let fx = fixture(&[("movie.mp4", 4000 * 1024)]).await;

    let response = fx
        .app
        .clone()
        .oneshot(
            Request::post("/api/seek")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(r#"{"offset": 2048000}"#))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    for piece in 2000..2010 {
        assert_eq!(fx.swarm.priority_of(0, piece), PiecePriority::Now);
    }
    // The original window is not demoted.
    assert_eq!(fx.swarm.priority_of(0, 0), PiecePriority::Now);
    assert_eq!(fx.swarm.priority_of(0, 2010), PiecePriority::Normal);
}

#[tokio::test]
async fn test_seek_without_file_is_409() {
    let fx = crate::common::unstarted(
        crate::common::swarm_with(&[("movie.mp4", 4096)], 1024),
        QuickseedConfig::for_testing(),
    );
    let response = fx
        .app
        .clone()
        .oneshot(
            Request::post("/api/seek")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(r#"{"offset": 0}"#))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_downloader_brings_stream_to_ready() {
    let fx = fixture(&[("movie.mp4", 64 * 1024), ("extra.mkv", 8 * 1024)]).await;
    let downloader = fx.swarm.spawn_downloader();

    tokio::time::timeout(Duration::from_secs(5), async {
        while !fx.session.readiness().is_ready() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("stream should become ready");

    tokio::time::timeout(Duration::from_secs(5), downloader)
        .await
        .expect("downloader should finish")
        .unwrap();
    assert_eq!(fx.swarm.status_of(1, 7), PieceStatus::Complete);
    assert_eq!(fx.session.stats().progress, 1.0);
}

#[tokio::test]
async fn test_readiness_gate_holds_until_ready() {
    let mut config = QuickseedConfig::for_testing();
    config.streaming.require_ready = true;
    let fx = fixture_with(&[("movie.mp4", 20 * 1024)], config).await;

    let response = get_stream(&fx.app, Some("bytes=0-99")).await;
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(response.headers()[header::RETRY_AFTER], "2");

    let head = fx
        .app
        .clone()
        .oneshot(Request::head("/stream").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(head.status(), StatusCode::OK);

    for piece in 0..3 {
        fx.swarm.complete_piece(0, piece);
    }
    let response = get_stream(&fx.app, Some("bytes=0-99")).await;
    assert_eq!(response.status(), StatusCode::PARTIAL_CONTENT);
    assert_eq!(body_bytes(response).await.len(), 100);
}
