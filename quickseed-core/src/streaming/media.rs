//! Media file and piece state types shared by the scheduler, readiness
//! tracker, session and HTTP layer.

use std::fmt;
use std::ops::Range;
use std::path::Path;

use serde::Serialize;

/// Extensions treated as playable video when auto-selecting a file.
const VIDEO_EXTENSIONS: &[&str] = &[
    "mp4", "mkv", "avi", "mov", "wmv", "flv", "webm", "m4v", "3gp", "ts", "m2ts",
];

/// Zero-based index of a piece within a media file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct PieceIndex(pub u32);

impl PieceIndex {
    /// Creates PieceIndex from zero-based index.
    pub fn new(index: u32) -> Self {
        Self(index)
    }

    /// Returns the underlying index value.
    pub fn as_u32(self) -> u32 {
        self.0
    }
}

impl fmt::Display for PieceIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Download status of a single piece.
///
/// Pieces move forward only: once `Complete`, a piece stays complete.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PieceStatus {
    Missing,
    Requested,
    Complete,
}

/// Download priority hint for a piece.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize)]
pub enum PiecePriority {
    /// Default background priority
    #[default]
    Normal = 1,
    /// Wanted soon
    High = 2,
    /// Needed for imminent playback
    Now = 3,
}

/// Latest known status and priority of a piece.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PieceState {
    pub status: PieceStatus,
    pub priority: PiecePriority,
}

impl PieceState {
    pub fn is_complete(&self) -> bool {
        self.status == PieceStatus::Complete
    }
}

impl Default for PieceState {
    fn default() -> Self {
        Self {
            status: PieceStatus::Missing,
            priority: PiecePriority::Normal,
        }
    }
}

/// One file inside the swarm's file set.
///
/// Immutable once the swarm exposes metadata. Piece indices used with a
/// `MediaFile` are relative to the file: piece 0 covers its first
/// `piece_length` bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MediaFile {
    pub index: usize,
    pub path: String,
    pub length: u64,
    pub piece_length: u64,
    pub piece_count: u32,
}

impl MediaFile {
    /// Creates a media file description, deriving the piece count.
    ///
    /// A zero piece length is treated as one byte per piece. Piece lengths
    /// too small to index `length` with `u32` piece numbers are raised to the
    /// smallest length that can.
    pub fn new(index: usize, path: impl Into<String>, length: u64, piece_length: u64) -> Self {
        let min_piece_length = length.div_ceil(u64::from(u32::MAX));
        let piece_length = piece_length.max(min_piece_length).max(1);
        let piece_count = u32::try_from(length.div_ceil(piece_length)).unwrap_or(u32::MAX);
        Self {
            index,
            path: path.into(),
            length,
            piece_length,
            piece_count,
        }
    }

    /// Returns the piece containing `offset`, clamped to the last piece.
    ///
    /// Returns None for files without pieces.
    pub fn piece_for_offset(&self, offset: u64) -> Option<PieceIndex> {
        if self.piece_count == 0 {
            return None;
        }
        let piece = (offset / self.piece_length).min(u64::from(self.piece_count - 1));
        Some(PieceIndex(piece as u32))
    }

    /// Byte range covered by `piece` within this file.
    pub fn piece_bytes(&self, piece: PieceIndex) -> Range<u64> {
        let start = (u64::from(piece.0) * self.piece_length).min(self.length);
        let end = (start + self.piece_length).min(self.length);
        start..end
    }

    /// Lower-cased file extension, if any.
    pub fn extension(&self) -> Option<String> {
        Path::new(&self.path)
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.to_ascii_lowercase())
    }

    /// Whether the file name carries a known video extension.
    pub fn is_video(&self) -> bool {
        self.extension()
            .is_some_and(|ext| VIDEO_EXTENSIONS.contains(&ext.as_str()))
    }
}

/// Resolved source metadata: the torrent name and every file in it.
#[derive(Debug, Clone, Serialize)]
pub struct TorrentMetadata {
    pub name: String,
    pub files: Vec<MediaFile>,
}

impl TorrentMetadata {
    /// Total length of all files in bytes.
    pub fn total_length(&self) -> u64 {
        self.files.iter().map(|file| file.length).sum()
    }

    /// Largest file with a video extension, if any.
    pub fn largest_video_file(&self) -> Option<&MediaFile> {
        self.files
            .iter()
            .filter(|file| file.is_video())
            .max_by_key(|file| file.length)
    }
}

/// Swarm-level transfer statistics.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SwarmStats {
    pub name: String,
    pub total_bytes: u64,
    pub downloaded_bytes: u64,
    /// Bytes per second
    pub download_rate: f64,
    /// Bytes per second
    pub upload_rate: f64,
    pub peers: usize,
    pub seeders: usize,
}
