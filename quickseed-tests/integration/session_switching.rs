//! Integration tests for file selection and switching while streams are in flight

use axum::body::Body;
use axum::http::{Request, StatusCode, header};
use quickseed_core::QuickseedConfig;
use quickseed_core::streaming::{ReadinessState, SessionError};
use quickseed_sim::SimulatedSwarm;
use tower::ServiceExt;

use crate::common::{body_bytes, fixture, get_stream, header_str, pattern, unstarted};

#[tokio::test]
async fn test_largest_video_is_selected_by_default() {
    let fx = fixture(&[
        ("readme.txt", 90_000),
        ("episode1.mp4", 20_000),
        ("episode2.mkv", 30_000),
    ])
    .await;

    let active = fx.session.current().unwrap();
    assert_eq!(active.file.path, "episode2.mkv");
    assert_eq!(fx.swarm.active_file(), 2);
}

#[tokio::test]
async fn test_in_flight_stream_survives_reselect() {
    let fx = fixture(&[("first.mp4", 30_000), ("second.mp4", 12_000)]).await;
    fx.swarm.complete_all();
    assert_eq!(fx.session.current().unwrap().file.index, 0);

    let in_flight = get_stream(&fx.app, None).await;
    assert_eq!(header_str(&in_flight, header::CONTENT_LENGTH), "30000");

    let response = fx
        .app
        .clone()
        .oneshot(Request::post("/api/select/1").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    assert_eq!(body_bytes(in_flight).await, pattern(30_000));

    let next = get_stream(&fx.app, None).await;
    assert_eq!(header_str(&next, header::CONTENT_LENGTH), "12000");
    assert_eq!(body_bytes(next).await, pattern(12_000));
}

#[tokio::test]
async fn test_reselect_resets_readiness() {
    let fx = fixture(&[("first.mp4", 10_240), ("second.mp4", 10_240)]).await;
    for piece in 0..10 {
        fx.swarm.complete_piece(0, piece);
    }
    assert_eq!(fx.session.readiness().state, ReadinessState::Ready);

    fx.session.reselect(1).await.unwrap();
    let snapshot = fx.session.readiness();
    assert_eq!(snapshot.file_index, Some(1));
    assert_eq!(snapshot.state, ReadinessState::Initializing);

    fx.swarm.complete_piece(1, 0);
    assert_eq!(fx.session.readiness().state, ReadinessState::Buffering);
}

#[tokio::test]
async fn test_reselect_out_of_range_keeps_selection() {
    let fx = fixture(&[("only.mp4", 4096)]).await;

    let err = fx.session.reselect(3).await.unwrap_err();
    assert!(matches!(
        err,
        SessionError::IndexOutOfRange {
            index: 3,
            file_count: 1
        }
    ));
    assert_eq!(fx.session.current().unwrap().file.index, 0);

    let response = fx
        .app
        .clone()
        .oneshot(Request::post("/api/select/3").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_unresolvable_source_fails_start() {
    let fx = unstarted(
        SimulatedSwarm::unresolvable("no peers"),
        QuickseedConfig::for_testing(),
    );

    let err = fx.session.start(None).await.unwrap_err();
    assert!(matches!(err, SessionError::MetadataUnavailable { .. }));
    assert_eq!(
        get_stream(&fx.app, None).await.status(),
        StatusCode::SERVICE_UNAVAILABLE
    );
}

#[tokio::test]
async fn test_configured_file_index_wins() {
    let fx = unstarted(
        crate::common::swarm_with(&[("big.mp4", 50_000), ("small.mp4", 5_000)], 1024),
        QuickseedConfig::for_testing(),
    );

    let file = fx.session.start(Some(1)).await.unwrap();
    assert_eq!(file.path, "small.mp4");
    assert_eq!(fx.swarm.active_file(), 1);
}
