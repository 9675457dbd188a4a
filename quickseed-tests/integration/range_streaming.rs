//! Integration tests for HTTP range streaming against partially present files

use std::time::Duration;

use axum::body::Body;
use axum::http::{Method, Request, StatusCode, header};
use proptest::prelude::*;
use quickseed_core::QuickseedConfig;
use tower::ServiceExt;

use crate::common::{
    body_bytes, fixture, get_stream, header_str, pattern, swarm_with, unstarted,
};

#[tokio::test]
async fn test_open_ended_range_on_megabyte_file() {
    let fx = fixture(&[("movie.mp4", 1_000_000)]).await;
    fx.swarm.complete_all();

    let response = get_stream(&fx.app, Some("bytes=500000-")).await;
    assert_eq!(response.status(), StatusCode::PARTIAL_CONTENT);
    assert_eq!(
        header_str(&response, header::CONTENT_RANGE),
        "bytes 500000-999999/1000000"
    );
    assert_eq!(header_str(&response, header::CONTENT_LENGTH), "500000");

    let body = body_bytes(response).await;
    assert_eq!(body.len(), 500_000);
    assert_eq!(body, pattern(1_000_000).slice(500_000..));
}

#[tokio::test]
async fn test_empty_range_header_serves_full_file() {
    let fx = fixture(&[("movie.mp4", 4096)]).await;
    fx.swarm.complete_all();

    for blank in ["", "   "] {
        let response = get_stream(&fx.app, Some(blank)).await;
        assert_eq!(response.status(), StatusCode::OK, "Range: {blank:?}");
        assert_eq!(header_str(&response, header::CONTENT_LENGTH), "4096");
        assert!(response.headers().get(header::CONTENT_RANGE).is_none());
        assert_eq!(body_bytes(response).await, pattern(4096));
    }
}

#[tokio::test]
async fn test_out_of_bounds_range_is_416() {
    let fx = fixture(&[("clip.mp4", 100)]).await;

    let response = get_stream(&fx.app, Some("bytes=150-200")).await;
    assert_eq!(response.status(), StatusCode::RANGE_NOT_SATISFIABLE);
    assert_eq!(header_str(&response, header::CONTENT_RANGE), "bytes */100");
    assert_eq!(header_str(&response, header::ACCESS_CONTROL_ALLOW_ORIGIN), "*");
    assert_eq!(fx.swarm.open_reader_count(), 0);
}

#[tokio::test]
async fn test_no_selected_file_is_503_for_every_method() {
    let fx = unstarted(swarm_with(&[("movie.mp4", 4096)], 1024), QuickseedConfig::for_testing());

    for method in [Method::GET, Method::HEAD, Method::OPTIONS] {
        let response = fx
            .app
            .clone()
            .oneshot(
                Request::builder()
                    .method(method.clone())
                    .uri("/stream")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(
            response.status(),
            StatusCode::SERVICE_UNAVAILABLE,
            "{method} without a file"
        );
    }
}

#[tokio::test]
async fn test_head_reports_full_length_before_download() {
    let fx = fixture(&[("movie.mkv", 50_000)]).await;

    let response = fx
        .app
        .clone()
        .oneshot(
            Request::head("/stream")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(header_str(&response, header::CONTENT_LENGTH), "50000");
    assert_eq!(header_str(&response, header::ACCEPT_RANGES), "bytes");
    assert_eq!(header_str(&response, header::CONTENT_TYPE), "video/x-matroska");
    assert!(body_bytes(response).await.is_empty());
}

#[tokio::test]
async fn test_disallowed_method_is_405() {
    let fx = fixture(&[("movie.mp4", 4096)]).await;
    let response = fx
        .app
        .clone()
        .oneshot(Request::delete("/stream").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
}

#[tokio::test]
async fn test_range_waits_for_missing_pieces() {
    let fx = fixture(&[("movie.mp4", 8192)]).await;
    fx.swarm.complete_piece(0, 0);

    let response = get_stream(&fx.app, Some("bytes=2048-4095")).await;
    assert_eq!(response.status(), StatusCode::PARTIAL_CONTENT);
    let body = tokio::spawn(body_bytes(response));

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!body.is_finished());

    fx.swarm.complete_piece(0, 2);
    fx.swarm.complete_piece(0, 3);

    let body = tokio::time::timeout(Duration::from_secs(5), body)
        .await
        .expect("range body should finish once its pieces arrive")
        .unwrap();
    assert_eq!(body, pattern(8192).slice(2048..4096));
    assert_eq!(fx.swarm.open_reader_count(), 0);
}

#[tokio::test]
async fn test_overlapping_concurrent_ranges() {
    let fx = fixture(&[("movie.mp4", 64 * 1024)]).await;
    fx.swarm.complete_all();

    let (first, second) = tokio::join!(
        get_stream(&fx.app, Some("bytes=1000-40000")),
        get_stream(&fx.app, Some("bytes=20000-60000")),
    );
    let (first, second) = tokio::join!(body_bytes(first), body_bytes(second));

    let canonical = pattern(64 * 1024);
    assert_eq!(first, canonical.slice(1000..40001));
    assert_eq!(second, canonical.slice(20000..60001));
}

#[tokio::test]
async fn test_streams_beyond_limit_wait_for_a_permit() {
    let mut config = QuickseedConfig::for_testing();
    config.server.max_concurrent_streams = 1;
    let fx = crate::common::fixture_with(&[("movie.mp4", 8192)], config).await;
    fx.swarm.complete_all();

    let held = get_stream(&fx.app, None).await;
    let waiting = tokio::spawn({
        let app = fx.app.clone();
        async move { get_stream(&app, Some("bytes=0-99")).await.status() }
    });

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!waiting.is_finished());

    drop(held);
    let status = tokio::time::timeout(Duration::from_secs(5), waiting)
        .await
        .expect("waiting stream should start once the permit is released")
        .unwrap();
    assert_eq!(status, StatusCode::PARTIAL_CONTENT);
}

const PROP_FILE_LENGTH: usize = 10_000;

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn prop_valid_ranges_return_exact_slice(
        start in 0u64..PROP_FILE_LENGTH as u64,
        span in 0u64..PROP_FILE_LENGTH as u64,
    ) {
        let end = (start + span).min(PROP_FILE_LENGTH as u64 - 1);
        let body = runtime().block_on(async {
            let fx = fixture(&[("movie.mp4", PROP_FILE_LENGTH)]).await;
            fx.swarm.complete_all();
            let response = get_stream(&fx.app, Some(&format!("bytes={start}-{end}"))).await;
            assert_eq!(response.status(), StatusCode::PARTIAL_CONTENT);
            body_bytes(response).await
        });

        prop_assert_eq!(body.len() as u64, end - start + 1);
        prop_assert_eq!(body, pattern(PROP_FILE_LENGTH).slice(start as usize..=end as usize));
    }

    #[test]
    fn prop_invalid_ranges_are_416(
        start in 0u64..20_000,
        end in 0u64..20_000,
    ) {
        prop_assume!(start > end || end >= PROP_FILE_LENGTH as u64);
        let (status, content_range) = runtime().block_on(async {
            let fx = fixture(&[("movie.mp4", PROP_FILE_LENGTH)]).await;
            let response = get_stream(&fx.app, Some(&format!("bytes={start}-{end}"))).await;
            (response.status(), header_str(&response, header::CONTENT_RANGE))
        });

        prop_assert_eq!(status, StatusCode::RANGE_NOT_SATISFIABLE);
        prop_assert_eq!(content_range, format!("bytes */{PROP_FILE_LENGTH}"));
    }
}
