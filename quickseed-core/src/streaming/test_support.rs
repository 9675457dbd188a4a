//! In-memory piece provider that records priority hints for unit tests.

use std::collections::HashMap;
use std::io;

use parking_lot::Mutex;

use super::media::{
    MediaFile, PieceIndex, PiecePriority, PieceState, PieceStatus, SwarmStats, TorrentMetadata,
};
use super::traits::{PieceProvider, PieceProviderError, PieceReader};

/// Byte stored at `offset` of every fixture file.
pub fn fixture_byte(offset: u64) -> u8 {
    (offset % 251) as u8
}

pub struct RecordingProvider {
    files: Vec<MediaFile>,
    resolvable: bool,
    states: Mutex<HashMap<(usize, u32), PieceState>>,
    calls: Mutex<Vec<(usize, PieceIndex, PiecePriority)>>,
    switches: Mutex<Vec<usize>>,
}

impl RecordingProvider {
    pub fn new(files: Vec<MediaFile>) -> Self {
        Self {
            files,
            resolvable: true,
            states: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
            switches: Mutex::new(Vec::new()),
        }
    }

    pub fn unresolvable() -> Self {
        Self {
            resolvable: false,
            ..Self::new(Vec::new())
        }
    }

    pub fn file(&self, index: usize) -> MediaFile {
        self.files[index].clone()
    }

    pub fn complete(&self, file: usize, pieces: impl IntoIterator<Item = u32>) {
        let mut states = self.states.lock();
        for piece in pieces {
            states.entry((file, piece)).or_default().status = PieceStatus::Complete;
        }
    }

    pub fn request(&self, file: usize, piece: u32) {
        self.states.lock().entry((file, piece)).or_default().status = PieceStatus::Requested;
    }

    pub fn priority_calls(&self) -> Vec<(usize, PieceIndex, PiecePriority)> {
        self.calls.lock().clone()
    }

    pub fn clear_calls(&self) {
        self.calls.lock().clear();
    }

    /// Pieces of `file` hinted since the last clear, in call order.
    pub fn prioritized(&self, file: usize) -> Vec<PieceIndex> {
        self.calls
            .lock()
            .iter()
            .filter(|(f, _, _)| *f == file)
            .map(|(_, piece, _)| *piece)
            .collect()
    }

    pub fn priority_of(&self, file: usize, piece: PieceIndex) -> PiecePriority {
        self.states
            .lock()
            .get(&(file, piece.0))
            .map(|state| state.priority)
            .unwrap_or_default()
    }

    pub fn switches(&self) -> Vec<usize> {
        self.switches.lock().clone()
    }
}

#[async_trait::async_trait]
impl PieceProvider for RecordingProvider {
    async fn metadata(&self) -> Result<TorrentMetadata, PieceProviderError> {
        if !self.resolvable {
            return Err(PieceProviderError::MetadataUnavailable {
                reason: "unresolvable test source".to_string(),
            });
        }
        Ok(TorrentMetadata {
            name: "fixture".to_string(),
            files: self.files.clone(),
        })
    }

    fn set_priority(&self, file: &MediaFile, piece: PieceIndex, priority: PiecePriority) {
        self.calls.lock().push((file.index, piece, priority));
        let mut states = self.states.lock();
        let state = states.entry((file.index, piece.0)).or_default();
        state.priority = state.priority.max(priority);
    }

    fn piece_state(&self, file: &MediaFile, piece: PieceIndex) -> PieceState {
        self.states
            .lock()
            .get(&(file.index, piece.0))
            .copied()
            .unwrap_or_default()
    }

    async fn open_reader(
        &self,
        file: &MediaFile,
    ) -> Result<Box<dyn PieceReader>, PieceProviderError> {
        Ok(Box::new(FixtureReader {
            length: file.length,
            position: 0,
        }))
    }

    async fn switch_file(&self, index: usize) -> Result<MediaFile, PieceProviderError> {
        let file = self
            .files
            .get(index)
            .cloned()
            .ok_or(PieceProviderError::IndexOutOfRange {
                index,
                file_count: self.files.len(),
            })?;
        self.switches.lock().push(index);
        Ok(file)
    }

    fn stats(&self) -> SwarmStats {
        SwarmStats {
            name: "fixture".to_string(),
            total_bytes: self.files.iter().map(|f| f.length).sum(),
            peers: 3,
            seeders: 1,
            ..Default::default()
        }
    }
}

struct FixtureReader {
    length: u64,
    position: u64,
}

#[async_trait::async_trait]
impl PieceReader for FixtureReader {
    async fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let remaining = self.length.saturating_sub(self.position);
        let count = (buf.len() as u64).min(remaining) as usize;
        for (i, byte) in buf[..count].iter_mut().enumerate() {
            *byte = fixture_byte(self.position + i as u64);
        }
        self.position += count as u64;
        Ok(count)
    }

    async fn seek(&mut self, offset: u64) -> io::Result<u64> {
        self.position = offset.min(self.length);
        Ok(self.position)
    }
}
