//! In-process swarm that serves local files piece by piece.
//!
//! Pieces start out missing and are "downloaded" by a background task at a
//! configurable rate, highest priority first. Readers suspend until the
//! piece under their position is complete, the same way a real swarm-backed
//! reader does.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;
use quickseed_core::streaming::{
    MediaFile, PieceIndex, PiecePriority, PieceProvider, PieceProviderError, PieceReader,
    PieceState, PieceStatus, SwarmStats, TorrentMetadata,
};
use rand::Rng;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Tuning for the simulated swarm.
#[derive(Debug, Clone)]
pub struct SimConfig {
    /// Piece length used to split every file
    pub piece_length: u64,
    /// Simulated download rate in bytes per second (0 = no delay)
    pub download_rate: u64,
    /// Reported peer count
    pub peers: usize,
    /// Reported seeder count
    pub seeders: usize,
    /// Random spread applied to each piece's transfer time (0.0 to 1.0)
    pub jitter: f64,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            piece_length: 256 * 1024,       // 256 KiB
            download_rate: 4 * 1024 * 1024, // 4 MiB/s
            peers: 12,
            seeders: 4,
            jitter: 0.2,
        }
    }
}

struct SimFile {
    meta: MediaFile,
    data: Bytes,
}

struct SwarmState {
    pieces: Vec<Vec<PieceState>>,
    active: usize,
}

struct Shared {
    name: String,
    files: Vec<SimFile>,
    unresolved: Option<String>,
    config: SimConfig,
    state: Mutex<SwarmState>,
    piece_completed: Notify,
    open_readers: AtomicUsize,
    downloaded: AtomicU64,
    downloading: AtomicBool,
    closed: AtomicBool,
}

impl Shared {
    fn file(&self, index: usize) -> Result<&SimFile, PieceProviderError> {
        self.files
            .get(index)
            .ok_or(PieceProviderError::IndexOutOfRange {
                index,
                file_count: self.files.len(),
            })
    }

    fn is_complete(&self, file: usize, piece: u32) -> bool {
        self.state
            .lock()
            .pieces
            .get(file)
            .and_then(|pieces| pieces.get(piece as usize))
            .is_some_and(PieceState::is_complete)
    }

    fn raise_priority(&self, file: usize, piece: u32, priority: PiecePriority) {
        let mut state = self.state.lock();
        if let Some(piece) = state
            .pieces
            .get_mut(file)
            .and_then(|pieces| pieces.get_mut(piece as usize))
        {
            piece.priority = piece.priority.max(priority);
        }
    }

    fn complete(&self, file: usize, piece: u32) {
        let newly_complete = {
            let mut state = self.state.lock();
            match state
                .pieces
                .get_mut(file)
                .and_then(|pieces| pieces.get_mut(piece as usize))
            {
                Some(state) if !state.is_complete() => {
                    state.status = PieceStatus::Complete;
                    true
                }
                _ => false,
            }
        };

        if newly_complete {
            let bytes = self.files[file].meta.piece_bytes(PieceIndex(piece));
            self.downloaded
                .fetch_add(bytes.end - bytes.start, Ordering::AcqRel);
            self.piece_completed.notify_waiters();
        }
    }

    /// Picks the next piece to transfer and marks it requested.
    ///
    /// Active file first, then the others in order. Within a file the
    /// highest priority wins and ties go to the lowest index.
    fn next_piece(&self) -> Option<(usize, u32)> {
        let mut state = self.state.lock();
        let active = state.active;
        let order = std::iter::once(active).chain((0..state.pieces.len()).filter(|&f| f != active));

        let mut chosen = None;
        for file in order {
            let candidate = state.pieces[file]
                .iter()
                .enumerate()
                .filter(|(_, piece)| !piece.is_complete())
                .max_by(|(ia, a), (ib, b)| a.priority.cmp(&b.priority).then(ib.cmp(ia)))
                .map(|(index, _)| index as u32);
            if let Some(piece) = candidate {
                chosen = Some((file, piece));
                break;
            }
        }

        let (file, piece) = chosen?;
        state.pieces[file][piece as usize].status = PieceStatus::Requested;
        Some((file, piece))
    }
}

/// Simulated swarm implementing [`PieceProvider`] over in-memory files.
#[derive(Clone)]
pub struct SimulatedSwarm {
    shared: Arc<Shared>,
}

impl SimulatedSwarm {
    /// Creates a swarm over `(path, bytes)` pairs with every piece missing.
    pub fn new(name: impl Into<String>, files: Vec<(String, Bytes)>, config: SimConfig) -> Self {
        let unresolved = files
            .is_empty()
            .then(|| "source contains no files".to_string());
        Self::build(name.into(), files, config, unresolved)
    }

    /// Creates a swarm whose metadata never resolves.
    pub fn unresolvable(reason: impl Into<String>) -> Self {
        Self::build(
            "unresolved".to_string(),
            Vec::new(),
            SimConfig::default(),
            Some(reason.into()),
        )
    }

    fn build(
        name: String,
        files: Vec<(String, Bytes)>,
        config: SimConfig,
        unresolved: Option<String>,
    ) -> Self {
        let files: Vec<SimFile> = files
            .into_iter()
            .enumerate()
            .map(|(index, (path, data))| SimFile {
                meta: MediaFile::new(index, path, data.len() as u64, config.piece_length),
                data,
            })
            .collect();
        let pieces = files
            .iter()
            .map(|file| vec![PieceState::default(); file.meta.piece_count as usize])
            .collect();

        Self {
            shared: Arc::new(Shared {
                name,
                files,
                unresolved,
                config,
                state: Mutex::new(SwarmState { pieces, active: 0 }),
                piece_completed: Notify::new(),
                open_readers: AtomicUsize::new(0),
                downloaded: AtomicU64::new(0),
                downloading: AtomicBool::new(false),
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// Loads local files into a swarm.
    ///
    /// A path that cannot be read leaves the swarm unresolvable, reported
    /// through [`PieceProvider::metadata`].
    pub async fn from_paths(paths: &[PathBuf], config: SimConfig) -> Self {
        let mut files = Vec::with_capacity(paths.len());
        for path in paths {
            match tokio::fs::read(path).await {
                Ok(data) => files.push((display_path(path), Bytes::from(data))),
                Err(e) => {
                    return Self::unresolvable(format!("cannot read {}: {e}", path.display()));
                }
            }
        }
        let name = paths
            .first()
            .and_then(|path| path.file_stem())
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_else(|| "local".to_string());
        Self::new(name, files, config)
    }

    /// Starts the background downloader.
    ///
    /// The task ends once every piece is complete, the swarm shuts down, or
    /// the last handle to the swarm is dropped.
    pub fn spawn_downloader(&self) -> JoinHandle<()> {
        let weak = Arc::downgrade(&self.shared);
        self.shared.downloading.store(true, Ordering::Release);
        tokio::spawn(run_downloader(weak))
    }

    /// Marks one piece complete and wakes suspended readers.
    pub fn complete_piece(&self, file: usize, piece: u32) {
        self.shared.complete(file, piece);
    }

    /// Marks every piece of every file complete.
    pub fn complete_all(&self) {
        for (index, file) in self.shared.files.iter().enumerate() {
            for piece in 0..file.meta.piece_count {
                self.shared.complete(index, piece);
            }
        }
    }

    /// Number of readers currently open.
    pub fn open_reader_count(&self) -> usize {
        self.shared.open_readers.load(Ordering::Acquire)
    }

    /// Current priority hint of a piece.
    pub fn priority_of(&self, file: usize, piece: u32) -> PiecePriority {
        self.state_of(file, piece).priority
    }

    /// Current status of a piece.
    pub fn status_of(&self, file: usize, piece: u32) -> PieceStatus {
        self.state_of(file, piece).status
    }

    /// Index of the file the downloader favors.
    pub fn active_file(&self) -> usize {
        self.shared.state.lock().active
    }

    /// Raw bytes of a file, for comparing against streamed output.
    pub fn file_bytes(&self, file: usize) -> Option<Bytes> {
        self.shared.files.get(file).map(|file| file.data.clone())
    }

    /// Stops the downloader and makes suspended reads return end of file.
    pub fn shutdown(&self) {
        self.shared.closed.store(true, Ordering::Release);
        self.shared.downloading.store(false, Ordering::Release);
        self.shared.piece_completed.notify_waiters();
    }

    fn state_of(&self, file: usize, piece: u32) -> PieceState {
        self.shared
            .state
            .lock()
            .pieces
            .get(file)
            .and_then(|pieces| pieces.get(piece as usize))
            .copied()
            .unwrap_or_default()
    }
}

fn display_path(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

async fn run_downloader(weak: Weak<Shared>) {
    loop {
        let Some(shared) = weak.upgrade() else {
            return;
        };
        if shared.closed.load(Ordering::Acquire) {
            return;
        }
        let Some((file, piece)) = shared.next_piece() else {
            shared.downloading.store(false, Ordering::Release);
            info!("Simulated swarm {} finished downloading", shared.name);
            return;
        };

        let bytes = shared.files[file].meta.piece_bytes(PieceIndex(piece));
        let delay = transfer_time(bytes.end - bytes.start, &shared.config);
        drop(shared);

        if delay.is_zero() {
            tokio::task::yield_now().await;
        } else {
            tokio::time::sleep(delay).await;
        }

        let Some(shared) = weak.upgrade() else {
            return;
        };
        shared.complete(file, piece);
        debug!("Simulated swarm completed piece {} of file {}", piece, file);
    }
}

fn transfer_time(bytes: u64, config: &SimConfig) -> Duration {
    if config.download_rate == 0 {
        return Duration::ZERO;
    }
    let base = bytes as f64 / config.download_rate as f64;
    let jitter = config.jitter.clamp(0.0, 1.0);
    let factor = if jitter > 0.0 {
        rand::rng().random_range(1.0 - jitter..=1.0 + jitter)
    } else {
        1.0
    };
    Duration::from_secs_f64(base * factor)
}

#[async_trait::async_trait]
impl PieceProvider for SimulatedSwarm {
    async fn metadata(&self) -> Result<TorrentMetadata, PieceProviderError> {
        if let Some(reason) = &self.shared.unresolved {
            return Err(PieceProviderError::MetadataUnavailable {
                reason: reason.clone(),
            });
        }
        Ok(TorrentMetadata {
            name: self.shared.name.clone(),
            files: self.shared.files.iter().map(|f| f.meta.clone()).collect(),
        })
    }

    fn set_priority(&self, file: &MediaFile, piece: PieceIndex, priority: PiecePriority) {
        self.shared.raise_priority(file.index, piece.0, priority);
    }

    fn piece_state(&self, file: &MediaFile, piece: PieceIndex) -> PieceState {
        self.state_of(file.index, piece.0)
    }

    async fn open_reader(
        &self,
        file: &MediaFile,
    ) -> Result<Box<dyn PieceReader>, PieceProviderError> {
        if self.shared.closed.load(Ordering::Acquire) {
            return Err(PieceProviderError::Closed);
        }
        let meta = self.shared.file(file.index)?.meta.clone();
        self.shared.open_readers.fetch_add(1, Ordering::AcqRel);
        Ok(Box::new(SimReader {
            shared: self.shared.clone(),
            file: meta,
            position: 0,
        }))
    }

    async fn switch_file(&self, index: usize) -> Result<MediaFile, PieceProviderError> {
        if let Some(reason) = &self.shared.unresolved {
            return Err(PieceProviderError::MetadataUnavailable {
                reason: reason.clone(),
            });
        }
        let meta = self.shared.file(index)?.meta.clone();
        self.shared.state.lock().active = index;
        debug!("Simulated swarm now targets {}", meta.path);
        Ok(meta)
    }

    fn stats(&self) -> SwarmStats {
        let total_bytes = self.shared.files.iter().map(|f| f.meta.length).sum();
        let downloaded_bytes = self.shared.downloaded.load(Ordering::Acquire);
        let active = self.shared.downloading.load(Ordering::Acquire) && downloaded_bytes < total_bytes;
        SwarmStats {
            name: self.shared.name.clone(),
            total_bytes,
            downloaded_bytes,
            download_rate: if active {
                self.shared.config.download_rate as f64
            } else {
                0.0
            },
            upload_rate: 0.0,
            peers: self.shared.config.peers,
            seeders: self.shared.config.seeders,
        }
    }
}

/// Reader over one simulated file.
///
/// Waiting on a missing piece raises it to `High`, the way swarm readers
/// pull their readahead forward.
struct SimReader {
    shared: Arc<Shared>,
    file: MediaFile,
    position: u64,
}

#[async_trait::async_trait]
impl PieceReader for SimReader {
    async fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        loop {
            let completed = self.shared.piece_completed.notified();
            if self.shared.closed.load(Ordering::Acquire) || self.position >= self.file.length {
                return Ok(0);
            }

            let Some(piece) = self.file.piece_for_offset(self.position) else {
                return Ok(0);
            };
            if self.shared.is_complete(self.file.index, piece.0) {
                let piece_end = self.file.piece_bytes(piece).end;
                let count = (piece_end - self.position).min(buf.len() as u64) as usize;
                let start = self.position as usize;
                let data = &self.shared.files[self.file.index].data;
                buf[..count].copy_from_slice(&data[start..start + count]);
                self.position += count as u64;
                return Ok(count);
            }

            self.shared
                .raise_priority(self.file.index, piece.0, PiecePriority::High);
            completed.await;
        }
    }

    async fn seek(&mut self, offset: u64) -> io::Result<u64> {
        self.position = offset.min(self.file.length);
        Ok(self.position)
    }
}

impl Drop for SimReader {
    fn drop(&mut self) {
        self.shared.open_readers.fetch_sub(1, Ordering::AcqRel);
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use tokio_test::{assert_pending, assert_ready};

    use super::*;

    fn pattern(len: usize) -> Bytes {
        Bytes::from((0..len).map(|i| (i % 251) as u8).collect::<Vec<_>>())
    }

    fn swarm(len: usize, piece_length: u64) -> SimulatedSwarm {
        SimulatedSwarm::new(
            "test",
            vec![("movie.mp4".to_string(), pattern(len))],
            SimConfig {
                piece_length,
                download_rate: 0,
                jitter: 0.0,
                ..Default::default()
            },
        )
    }

    #[tokio::test]
    async fn metadata_describes_files() {
        let swarm = swarm(1000, 100);
        let metadata = swarm.metadata().await.unwrap();
        assert_eq!(metadata.name, "test");
        assert_eq!(metadata.files.len(), 1);
        assert_eq!(metadata.files[0].piece_count, 10);
        assert_eq!(metadata.files[0].length, 1000);
    }

    #[tokio::test]
    async fn unresolvable_swarm_reports_metadata_unavailable() {
        let swarm = SimulatedSwarm::unresolvable("tracker unreachable");
        let err = swarm.metadata().await.unwrap_err();
        assert!(matches!(err, PieceProviderError::MetadataUnavailable { reason } if reason == "tracker unreachable"));
        assert!(swarm.switch_file(0).await.is_err());
    }

    #[tokio::test]
    async fn read_suspends_until_piece_completes() {
        let swarm = swarm(1000, 100);
        let file = swarm.metadata().await.unwrap().files[0].clone();
        let mut reader = swarm.open_reader(&file).await.unwrap();
        reader.seek(250).await.unwrap();

        let mut buf = [0u8; 64];
        let mut read = tokio_test::task::spawn(reader.read(&mut buf));
        assert_pending!(read.poll());
        assert_eq!(swarm.priority_of(0, 2), PiecePriority::High);

        swarm.complete_piece(0, 3);
        assert!(read.is_woken());
        assert_pending!(read.poll());

        swarm.complete_piece(0, 2);
        let count = assert_ready!(read.poll()).unwrap();
        drop(read);

        assert_eq!(count, 50);
        assert_eq!(&buf[..count], &pattern(1000)[250..300]);
    }

    #[tokio::test]
    async fn dropping_readers_releases_them() {
        let swarm = swarm(1000, 100);
        let file = swarm.metadata().await.unwrap().files[0].clone();

        let first = swarm.open_reader(&file).await.unwrap();
        let second = swarm.open_reader(&file).await.unwrap();
        assert_eq!(swarm.open_reader_count(), 2);

        drop(first);
        assert_eq!(swarm.open_reader_count(), 1);
        drop(second);
        assert_eq!(swarm.open_reader_count(), 0);
    }

    #[tokio::test]
    async fn shutdown_ends_suspended_reads() {
        let swarm = swarm(1000, 100);
        let file = swarm.metadata().await.unwrap().files[0].clone();
        let mut reader = swarm.open_reader(&file).await.unwrap();

        let mut buf = [0u8; 16];
        let mut read = tokio_test::task::spawn(reader.read(&mut buf));
        assert_pending!(read.poll());

        swarm.shutdown();
        assert_eq!(assert_ready!(read.poll()).unwrap(), 0);
        drop(read);
        assert!(matches!(
            swarm.open_reader(&file).await,
            Err(PieceProviderError::Closed)
        ));
    }

    #[tokio::test]
    async fn downloader_prefers_now_priority() {
        let swarm = swarm(1000, 100);
        let file = swarm.metadata().await.unwrap().files[0].clone();
        swarm.set_priority(&file, PieceIndex(7), PiecePriority::Now);
        swarm.set_priority(&file, PieceIndex(5), PiecePriority::Now);

        assert_eq!(swarm.shared.next_piece(), Some((0, 5)));
        assert_eq!(swarm.shared.next_piece(), Some((0, 5)));
        swarm.complete_piece(0, 5);
        assert_eq!(swarm.shared.next_piece(), Some((0, 7)));
        swarm.complete_piece(0, 7);
        assert_eq!(swarm.shared.next_piece(), Some((0, 0)));
        assert_eq!(swarm.status_of(0, 0), PieceStatus::Requested);
    }

    #[tokio::test]
    async fn priorities_are_never_lowered() {
        let swarm = swarm(1000, 100);
        let file = swarm.metadata().await.unwrap().files[0].clone();
        swarm.set_priority(&file, PieceIndex(1), PiecePriority::Now);
        swarm.set_priority(&file, PieceIndex(1), PiecePriority::Normal);
        assert_eq!(swarm.priority_of(0, 1), PiecePriority::Now);
    }

    #[tokio::test]
    async fn downloader_completes_active_file_first() {
        let swarm = SimulatedSwarm::new(
            "pair",
            vec![
                ("a.mp4".to_string(), pattern(300)),
                ("b.mp4".to_string(), pattern(300)),
            ],
            SimConfig {
                piece_length: 100,
                download_rate: 0,
                jitter: 0.0,
                ..Default::default()
            },
        );
        swarm.switch_file(1).await.unwrap();
        assert_eq!(swarm.active_file(), 1);

        swarm.spawn_downloader().await.unwrap();

        let stats = swarm.stats();
        assert_eq!(stats.downloaded_bytes, 600);
        assert_eq!(stats.total_bytes, 600);
        assert_eq!(stats.download_rate, 0.0);
        assert_eq!(swarm.status_of(0, 2), PieceStatus::Complete);
    }

    #[tokio::test]
    async fn switch_file_rejects_unknown_index() {
        let swarm = swarm(1000, 100);
        assert!(matches!(
            swarm.switch_file(4).await,
            Err(PieceProviderError::IndexOutOfRange {
                index: 4,
                file_count: 1
            })
        ));
    }

    #[tokio::test]
    async fn from_paths_loads_files() {
        let mut temp = tempfile::Builder::new().suffix(".mkv").tempfile().unwrap();
        temp.write_all(&pattern(5000)).unwrap();
        let path = temp.path().to_path_buf();

        let swarm = SimulatedSwarm::from_paths(&[path.clone()], SimConfig::default()).await;
        let metadata = swarm.metadata().await.unwrap();

        assert_eq!(metadata.files[0].length, 5000);
        assert!(metadata.files[0].is_video());
        assert_eq!(swarm.file_bytes(0).unwrap(), pattern(5000));

        let missing = SimulatedSwarm::from_paths(&[path.with_extension("gone")], SimConfig::default()).await;
        assert!(matches!(
            missing.metadata().await,
            Err(PieceProviderError::MetadataUnavailable { .. })
        ));
    }
}
