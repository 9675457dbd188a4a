//! Swarm-facing abstractions for the streaming pipeline.
//!
//! The swarm engine (peers, choking, piece transfer, disk layout) lives
//! behind [`PieceProvider`]. Everything in this crate talks to the swarm
//! through these two traits only.

use std::io;

use thiserror::Error;

use super::media::{MediaFile, PieceIndex, PiecePriority, PieceState, SwarmStats, TorrentMetadata};

/// Piece-level state and byte access over a swarm-backed file set.
///
/// Priority and state queries never block. Reads suspend inside the
/// returned [`PieceReader`] until the swarm has delivered the bytes.
#[async_trait::async_trait]
pub trait PieceProvider: Send + Sync {
    /// Waits until the swarm has resolved the source and returns its files.
    ///
    /// # Errors
    ///
    /// - `PieceProviderError::MetadataUnavailable` - The source cannot be resolved
    async fn metadata(&self) -> Result<TorrentMetadata, PieceProviderError>;

    /// Hints the download priority of one piece of `file`.
    ///
    /// Fire-and-forget. Providers never lower an existing priority.
    fn set_priority(&self, file: &MediaFile, piece: PieceIndex, priority: PiecePriority);

    /// Latest known state of one piece of `file`.
    fn piece_state(&self, file: &MediaFile, piece: PieceIndex) -> PieceState;

    /// Opens an independent reader positioned at the start of `file`.
    ///
    /// Dropping the reader closes it and releases swarm-side resources.
    ///
    /// # Errors
    ///
    /// - `PieceProviderError::IndexOutOfRange` - `file` is not part of this source
    /// - `PieceProviderError::Closed` - The provider has shut down
    async fn open_reader(&self, file: &MediaFile)
    -> Result<Box<dyn PieceReader>, PieceProviderError>;

    /// Makes the file at `index` the swarm's active download target.
    ///
    /// Priorities issued for other files are superseded, not retracted.
    ///
    /// # Errors
    ///
    /// - `PieceProviderError::IndexOutOfRange` - No file has this index
    /// - `PieceProviderError::MetadataUnavailable` - The source is not resolved
    async fn switch_file(&self, index: usize) -> Result<MediaFile, PieceProviderError>;

    /// Cheap snapshot of swarm-level transfer statistics.
    fn stats(&self) -> SwarmStats;
}

/// Sequential byte access to one file of the swarm.
///
/// `read` suspends until at least one byte at the current position is
/// local. It returns `Ok(0)` at end of file or once the provider shuts down.
#[async_trait::async_trait]
pub trait PieceReader: Send {
    /// Reads into `buf`, returning the number of bytes copied.
    async fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    /// Moves the read position to `offset` bytes from the start of the file.
    async fn seek(&mut self, offset: u64) -> io::Result<u64>;
}

/// Errors reported by a piece provider.
#[derive(Debug, Error)]
pub enum PieceProviderError {
    /// The source (magnet, torrent file, path) could not be resolved.
    #[error("metadata unavailable: {reason}")]
    MetadataUnavailable { reason: String },

    /// A file index outside the source's file list was requested.
    #[error("file index {index} out of range ({file_count} files)")]
    IndexOutOfRange { index: usize, file_count: usize },

    /// The provider has been shut down.
    #[error("piece provider closed")]
    Closed,
}
