//! Streaming session: the single active (provider, file, hot window) triple.
//!
//! File switches and seeks are serialized through one writer. HTTP handlers
//! take an [`ActiveStream`] snapshot when a request starts and keep using it
//! even if the selection changes mid-response.

use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use thiserror::Error;
use tracing::info;

use super::media::{MediaFile, TorrentMetadata};
use super::readiness::{ReadinessSnapshot, ReadinessTracker};
use super::scheduler::{HotWindow, SequentialScheduler};
use super::traits::{PieceProvider, PieceProviderError};
use crate::config::QuickseedConfig;

/// Errors surfaced to callers of the session controller.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("file index {index} out of range ({file_count} files)")]
    IndexOutOfRange { index: usize, file_count: usize },

    #[error("metadata unavailable: {reason}")]
    MetadataUnavailable { reason: String },

    #[error("no video files found in source")]
    NoVideoFile,

    #[error("no file selected")]
    NoActiveFile,

    #[error("piece provider error: {0}")]
    Provider(PieceProviderError),
}

impl From<PieceProviderError> for SessionError {
    fn from(error: PieceProviderError) -> Self {
        match error {
            PieceProviderError::MetadataUnavailable { reason } => {
                SessionError::MetadataUnavailable { reason }
            }
            PieceProviderError::IndexOutOfRange { index, file_count } => {
                SessionError::IndexOutOfRange { index, file_count }
            }
            other => SessionError::Provider(other),
        }
    }
}

/// The file being streamed and the provider serving it, captured together.
#[derive(Clone)]
pub struct ActiveStream {
    pub file: MediaFile,
    pub provider: Arc<dyn PieceProvider>,
}

/// Runtime statistics for status reporting.
#[derive(Debug, Clone, Serialize)]
pub struct SessionStats {
    pub torrent_name: String,
    pub total_size: u64,
    pub downloaded: u64,
    /// Download progress (0.0 to 1.0)
    pub progress: f64,
    /// Bytes per second
    pub download_speed: f64,
    /// Bytes per second
    pub upload_speed: f64,
    pub peers: usize,
    pub seeders: usize,
    pub streaming_file: Option<String>,
    pub streaming_size: Option<u64>,
    pub stream_ready: bool,
    pub readiness: ReadinessSnapshot,
    pub hot_window: Option<HotWindow>,
    pub uptime_secs: u64,
    pub started_at: DateTime<Utc>,
}

/// Owns the selected file and wires scheduler and readiness to it.
pub struct SessionController {
    provider: Arc<dyn PieceProvider>,
    scheduler: SequentialScheduler,
    readiness: ReadinessTracker,
    metadata: RwLock<Option<TorrentMetadata>>,
    active: RwLock<Option<ActiveStream>>,
    switch_lock: tokio::sync::Mutex<()>,
    started: Instant,
    started_at: DateTime<Utc>,
}

impl SessionController {
    pub fn new(provider: Arc<dyn PieceProvider>, config: &QuickseedConfig) -> Self {
        Self {
            scheduler: SequentialScheduler::new(provider.clone(), config.scheduler.clone()),
            readiness: ReadinessTracker::new(provider.clone(), config.readiness.clone()),
            provider,
            metadata: RwLock::new(None),
            active: RwLock::new(None),
            switch_lock: tokio::sync::Mutex::new(()),
            started: Instant::now(),
            started_at: Utc::now(),
        }
    }

    /// Resolves the source and selects the file to stream.
    ///
    /// Uses `preferred` when it names a file of the source, otherwise the
    /// largest video file.
    ///
    /// # Errors
    ///
    /// - `SessionError::MetadataUnavailable` - The swarm cannot resolve the source
    /// - `SessionError::NoVideoFile` - No preference given and no video file exists
    pub async fn start(&self, preferred: Option<usize>) -> Result<MediaFile, SessionError> {
        let _writer = self.switch_lock.lock().await;
        let metadata = self.resolve_metadata().await?;

        let index = match preferred.filter(|&index| index < metadata.files.len()) {
            Some(index) => index,
            None => metadata
                .largest_video_file()
                .map(|file| file.index)
                .ok_or(SessionError::NoVideoFile)?,
        };

        let file = self.provider.switch_file(index).await?;
        info!(
            "Selected file: {} ({:.2} MB)",
            file.path,
            file.length as f64 / 1_048_576.0
        );
        self.select_initial(file.clone());
        Ok(file)
    }

    /// Makes `file` the active file, primes the scheduler and resets readiness.
    pub fn select_initial(&self, file: MediaFile) {
        let mut active = self.active.write();
        self.scheduler.prime_file(&file);
        self.readiness.reset(&file);
        *active = Some(ActiveStream {
            file,
            provider: self.provider.clone(),
        });
    }

    /// Switches streaming to the file at `index`.
    ///
    /// Requests already streaming keep the file and reader they started with.
    ///
    /// # Errors
    ///
    /// - `SessionError::IndexOutOfRange` - `index` is not a file of the source
    /// - `SessionError::MetadataUnavailable` - The source is not resolved
    pub async fn reselect(&self, index: usize) -> Result<MediaFile, SessionError> {
        let _writer = self.switch_lock.lock().await;
        let metadata = self.resolve_metadata().await?;
        if index >= metadata.files.len() {
            return Err(SessionError::IndexOutOfRange {
                index,
                file_count: metadata.files.len(),
            });
        }

        let file = self.provider.switch_file(index).await?;
        info!("Switched to file: {}", file.path);
        self.select_initial(file.clone());
        Ok(file)
    }

    /// Moves the hot window to the piece holding `offset` of the active file.
    ///
    /// # Errors
    ///
    /// - `SessionError::NoActiveFile` - No file is selected, or it has no pieces
    pub async fn seek(&self, offset: u64) -> Result<HotWindow, SessionError> {
        let _writer = self.switch_lock.lock().await;
        self.scheduler
            .on_seek(offset)
            .ok_or(SessionError::NoActiveFile)
    }

    /// Snapshot of the active file and its provider.
    pub fn current(&self) -> Option<ActiveStream> {
        self.active.read().clone()
    }

    pub fn readiness(&self) -> ReadinessSnapshot {
        self.readiness.snapshot()
    }

    pub fn hot_window(&self) -> Option<HotWindow> {
        self.scheduler.current_window()
    }

    /// Files of the resolved source, empty before `start`.
    pub fn files(&self) -> Vec<MediaFile> {
        self.metadata
            .read()
            .as_ref()
            .map(|metadata| metadata.files.clone())
            .unwrap_or_default()
    }

    pub fn provider(&self) -> &Arc<dyn PieceProvider> {
        &self.provider
    }

    /// Side-effect free statistics for status reporting.
    pub fn stats(&self) -> SessionStats {
        let swarm = self.provider.stats();
        let readiness = self.readiness.snapshot();
        let active = self.current();
        let progress = if swarm.total_bytes == 0 {
            0.0
        } else {
            swarm.downloaded_bytes as f64 / swarm.total_bytes as f64
        };

        SessionStats {
            torrent_name: swarm.name,
            total_size: swarm.total_bytes,
            downloaded: swarm.downloaded_bytes,
            progress,
            download_speed: swarm.download_rate,
            upload_speed: swarm.upload_rate,
            peers: swarm.peers,
            seeders: swarm.seeders,
            streaming_file: active.as_ref().map(|a| a.file.path.clone()),
            streaming_size: active.as_ref().map(|a| a.file.length),
            stream_ready: readiness.is_ready(),
            readiness,
            hot_window: self.scheduler.current_window(),
            uptime_secs: self.started.elapsed().as_secs(),
            started_at: self.started_at,
        }
    }

    async fn resolve_metadata(&self) -> Result<TorrentMetadata, SessionError> {
        let cached = self.metadata.read().clone();
        if let Some(metadata) = cached {
            return Ok(metadata);
        }
        let metadata = self.provider.metadata().await?;
        *self.metadata.write() = Some(metadata.clone());
        Ok(metadata)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::streaming::media::{PieceIndex, PiecePriority};
    use crate::streaming::readiness::ReadinessState;
    use crate::streaming::test_support::{RecordingProvider, fixture_byte};

    fn fixture_files() -> Vec<MediaFile> {
        vec![
            MediaFile::new(0, "show/sample.mkv", 20 * 64, 64),
            MediaFile::new(1, "show/notes.txt", 64, 64),
            MediaFile::new(2, "show/episode.mp4", 200 * 64, 64),
        ]
    }

    fn session(provider: &Arc<RecordingProvider>) -> SessionController {
        SessionController::new(provider.clone(), &QuickseedConfig::default())
    }

    #[tokio::test]
    async fn test_start_selects_largest_video() {
        let provider = Arc::new(RecordingProvider::new(fixture_files()));
        let session = session(&provider);

        let file = session.start(None).await.unwrap();

        assert_eq!(file.index, 2);
        assert_eq!(session.current().unwrap().file.index, 2);
        assert_eq!(provider.switches(), vec![2]);
        assert_eq!(provider.prioritized(2).len(), 10);
        assert_eq!(session.files().len(), 3);
    }

    #[tokio::test]
    async fn test_start_honors_valid_preference() {
        let provider = Arc::new(RecordingProvider::new(fixture_files()));
        let session = session(&provider);

        assert_eq!(session.start(Some(0)).await.unwrap().index, 0);
    }

    #[tokio::test]
    async fn test_start_ignores_out_of_range_preference() {
        let provider = Arc::new(RecordingProvider::new(fixture_files()));
        let session = session(&provider);

        assert_eq!(session.start(Some(9)).await.unwrap().index, 2);
    }

    #[tokio::test]
    async fn test_start_fails_on_unresolvable_source() {
        let provider = Arc::new(RecordingProvider::unresolvable());
        let session = session(&provider);

        let err = session.start(None).await.unwrap_err();
        assert!(matches!(err, SessionError::MetadataUnavailable { .. }));
        assert!(session.current().is_none());
    }

    #[tokio::test]
    async fn test_start_without_video_files() {
        let provider = Arc::new(RecordingProvider::new(vec![MediaFile::new(
            0, "notes.txt", 10, 64,
        )]));
        let err = session(&provider).start(None).await.unwrap_err();
        assert!(matches!(err, SessionError::NoVideoFile));
    }

    #[tokio::test]
    async fn test_reselect_rejects_unknown_index() {
        let provider = Arc::new(RecordingProvider::new(fixture_files()));
        let session = session(&provider);
        session.start(None).await.unwrap();

        let err = session.reselect(3).await.unwrap_err();

        assert!(matches!(
            err,
            SessionError::IndexOutOfRange {
                index: 3,
                file_count: 3
            }
        ));
        assert_eq!(session.current().unwrap().file.index, 2);
    }

    #[tokio::test]
    async fn test_reselect_resets_readiness() {
        let provider = Arc::new(RecordingProvider::new(fixture_files()));
        let session = session(&provider);
        session.start(Some(0)).await.unwrap();
        provider.complete(0, 0..20);
        assert_eq!(session.readiness().state, ReadinessState::Ready);

        let file = session.reselect(2).await.unwrap();

        assert_eq!(file.index, 2);
        let readiness = session.readiness();
        assert_eq!(readiness.state, ReadinessState::Initializing);
        assert_eq!(readiness.file_index, Some(2));
        assert_eq!(provider.priority_of(2, PieceIndex(0)), PiecePriority::Now);
    }

    #[tokio::test]
    async fn test_snapshot_survives_reselect() {
        let provider = Arc::new(RecordingProvider::new(fixture_files()));
        let session = session(&provider);
        session.start(Some(0)).await.unwrap();

        let snapshot = session.current().unwrap();
        session.reselect(2).await.unwrap();

        assert_eq!(snapshot.file.index, 0);
        let mut reader = snapshot.provider.open_reader(&snapshot.file).await.unwrap();
        let mut buf = vec![0u8; 4096];
        let mut total = 0;
        loop {
            let n = reader.read(&mut buf).await.unwrap();
            if n == 0 {
                break;
            }
            assert_eq!(buf[0], fixture_byte(total as u64));
            total += n;
        }
        assert_eq!(total as u64, snapshot.file.length);
    }

    #[tokio::test]
    async fn test_seek_requires_active_file() {
        let provider = Arc::new(RecordingProvider::new(fixture_files()));
        let session = session(&provider);

        assert!(matches!(
            session.seek(100).await,
            Err(SessionError::NoActiveFile)
        ));

        session.start(None).await.unwrap();
        let window = session.seek(100 * 64).await.unwrap();
        assert_eq!(window.first, PieceIndex(100));
        assert_eq!(session.hot_window(), Some(window));
    }

    #[tokio::test]
    async fn test_stats_report_selection() {
        let provider = Arc::new(RecordingProvider::new(fixture_files()));
        let session = session(&provider);

        let stats = session.stats();
        assert_eq!(stats.streaming_file, None);
        assert!(!stats.stream_ready);

        session.start(None).await.unwrap();
        let stats = session.stats();
        assert_eq!(stats.streaming_file.as_deref(), Some("show/episode.mp4"));
        assert_eq!(stats.streaming_size, Some(200 * 64));
        assert_eq!(stats.peers, 3);
        assert_eq!(stats.readiness.state, ReadinessState::Initializing);
    }
}
