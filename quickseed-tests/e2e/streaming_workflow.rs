//! End-to-end streaming workflow test
//!
//! Local files → simulated swarm → session → HTTP server → reqwest client.

use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use futures::future;
use quickseed_core::QuickseedConfig;
use quickseed_core::streaming::SessionController;
use quickseed_sim::{SimConfig, SimulatedSwarm};
use quickseed_web::StreamServer;
use reqwest::StatusCode;
use reqwest::header;
use tempfile::NamedTempFile;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

fn media_file(suffix: &str, len: usize) -> NamedTempFile {
    let mut file = tempfile::Builder::new().suffix(suffix).tempfile().unwrap();
    file.write_all(&pattern(len)).unwrap();
    file
}

struct RunningServer {
    swarm: SimulatedSwarm,
    session: Arc<SessionController>,
    stream_url: String,
    base_url: String,
    stop: oneshot::Sender<()>,
    handle: JoinHandle<()>,
    _files: Vec<NamedTempFile>,
}

impl RunningServer {
    async fn start(files: Vec<NamedTempFile>) -> Self {
        let paths: Vec<_> = files.iter().map(|f| f.path().to_path_buf()).collect();
        let swarm = SimulatedSwarm::from_paths(
            &paths,
            SimConfig {
                piece_length: 16 * 1024,
                download_rate: 0,
                jitter: 0.0,
                ..Default::default()
            },
        )
        .await;

        let config = QuickseedConfig::for_testing();
        let session = Arc::new(SessionController::new(Arc::new(swarm.clone()), &config));
        session.start(None).await.unwrap();

        let server = StreamServer::bind(config, session.clone()).await.unwrap();
        let stream_url = server.stream_url();
        let base_url = format!("http://{}", server.local_addr());

        let (stop, stopped) = oneshot::channel::<()>();
        let shutdown_swarm = swarm.clone();
        let handle = tokio::spawn(async move {
            server
                .serve(async move {
                    let _ = stopped.await;
                    shutdown_swarm.shutdown();
                })
                .await
                .unwrap();
        });

        Self {
            swarm,
            session,
            stream_url,
            base_url,
            stop,
            handle,
            _files: files,
        }
    }

    async fn stop(self) {
        let _ = self.stop.send(());
        tokio::time::timeout(Duration::from_secs(5), self.handle)
            .await
            .expect("server should stop")
            .unwrap();
    }
}

#[tokio::test]
async fn test_range_streaming_over_http() {
    let server = RunningServer::start(vec![media_file(".mp4", 300_000)]).await;
    server.swarm.complete_all();
    let client = reqwest::Client::new();

    let response = client
        .get(&server.stream_url)
        .header(header::RANGE, "bytes=100000-199999")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::PARTIAL_CONTENT);
    assert_eq!(
        response.headers()[header::CONTENT_RANGE],
        "bytes 100000-199999/300000"
    );
    assert_eq!(response.headers()[header::CONTENT_TYPE], "video/mp4");
    let body = response.bytes().await.unwrap();
    assert_eq!(&body[..], &pattern(300_000)[100_000..200_000]);

    let response = client.head(&server.stream_url).send().await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[header::CONTENT_LENGTH], "300000");

    let response = client.get(&server.stream_url).send().await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.bytes().await.unwrap().len(), 300_000);

    server.stop().await;
}

#[tokio::test]
async fn test_concurrent_clients_get_independent_bytes() {
    let server = RunningServer::start(vec![media_file(".mkv", 256 * 1024)]).await;
    server.swarm.complete_all();
    let client = reqwest::Client::new();

    let ranges = [(0u64, 99_999u64), (50_000, 149_999), (200_000, 262_143)];
    let requests = ranges.iter().map(|&(start, end)| {
        let client = client.clone();
        let url = server.stream_url.clone();
        async move {
            let body = client
                .get(url)
                .header(header::RANGE, format!("bytes={start}-{end}"))
                .send()
                .await
                .unwrap()
                .bytes()
                .await
                .unwrap();
            (start, end, body)
        }
    });

    let canonical = pattern(256 * 1024);
    for (start, end, body) in future::join_all(requests).await {
        assert_eq!(&body[..], &canonical[start as usize..=end as usize]);
    }

    server.stop().await;
}

#[tokio::test]
async fn test_client_disconnect_releases_reader() {
    let server = RunningServer::start(vec![media_file(".mp4", 16 * 1024 * 1024)]).await;
    server.swarm.complete_all();
    let client = reqwest::Client::new();

    let mut response = client.get(&server.stream_url).send().await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let first = response.chunk().await.unwrap();
    assert!(first.is_some());
    assert_eq!(server.swarm.open_reader_count(), 1);
    drop(response);

    tokio::time::timeout(Duration::from_secs(5), async {
        while server.swarm.open_reader_count() > 0 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("reader should be released after the client disconnects");

    // The server keeps serving after the disconnect.
    let response = client
        .get(&server.stream_url)
        .header(header::RANGE, "bytes=0-9")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::PARTIAL_CONTENT);
    assert_eq!(response.bytes().await.unwrap().len(), 10);

    server.stop().await;
}

#[tokio::test]
async fn test_api_select_over_http() {
    let server = RunningServer::start(vec![
        media_file(".mp4", 40_000),
        media_file(".mp4", 10_000),
    ])
    .await;
    let client = reqwest::Client::new();

    let files: serde_json::Value = client
        .get(format!("{}/files", server.base_url))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(files.as_array().unwrap().len(), 2);
    assert_eq!(files[0]["selected"], true);

    let response = client
        .post(format!("{}/api/select/1", server.base_url))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(server.session.current().unwrap().file.index, 1);

    let info: serde_json::Value = client
        .get(format!("{}/info", server.base_url))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(info["size"], 10_000);
    assert_eq!(info["stream_url"], server.stream_url.as_str());

    let response = client
        .get(format!("{}/missing", server.base_url))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    server.stop().await;
}

#[tokio::test]
async fn test_shutdown_ends_waiting_stream() {
    let server = RunningServer::start(vec![media_file(".mp4", 64 * 1024)]).await;
    let client = reqwest::Client::new();

    let response = client
        .get(&server.stream_url)
        .header(header::RANGE, "bytes=0-1023")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::PARTIAL_CONTENT);
    let body = tokio::spawn(response.bytes());

    server.stop().await;

    // The body was cut short because its piece never arrived.
    let body = tokio::time::timeout(Duration::from_secs(5), body)
        .await
        .expect("client should observe the stream ending")
        .unwrap();
    assert!(body.map(|b| b.len() < 1024).unwrap_or(true));
}
