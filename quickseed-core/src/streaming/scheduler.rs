//! Sequential piece scheduling for progressive playback.
//!
//! Keeps a short run of pieces ahead of the playback position at `Now`
//! priority so sequential reads do not stall behind pieces the swarm
//! scheduled far ahead.

use std::ops::Range;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use tracing::debug;

use super::media::{MediaFile, PieceIndex, PiecePriority};
use super::traits::PieceProvider;
use crate::config::SchedulerConfig;

/// Contiguous run of pieces elevated to `Now` priority.
///
/// Half-open: covers `[first, first + width)`, clipped to the file's piece
/// count. `first` is always a valid piece of the file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct HotWindow {
    pub first: PieceIndex,
    pub width: u32,
    pub piece_count: u32,
}

impl HotWindow {
    /// Piece indices covered by the window.
    pub fn pieces(&self) -> Range<u32> {
        let end = self.first.0.saturating_add(self.width).min(self.piece_count);
        self.first.0..end
    }
}

/// Width of the hot window for a file with `piece_count` pieces.
///
/// `min(max_window, max(min_window, piece_count / window_divisor))`, so at
/// least `min_window` pieces are prioritized even for tiny files.
pub fn hot_window_width(piece_count: u32, config: &SchedulerConfig) -> u32 {
    let proportional = piece_count / config.window_divisor.max(1);
    proportional.max(config.min_window).min(config.max_window)
}

/// Translates playback positions into piece priority hints.
///
/// Never blocks: priority hints are fire-and-forget calls on the provider.
/// Superseded windows are left as they are; nothing is demoted.
pub struct SequentialScheduler {
    provider: Arc<dyn PieceProvider>,
    config: SchedulerConfig,
    current: Mutex<Option<(MediaFile, HotWindow)>>,
}

impl SequentialScheduler {
    pub fn new(provider: Arc<dyn PieceProvider>, config: SchedulerConfig) -> Self {
        Self {
            provider,
            config,
            current: Mutex::new(None),
        }
    }

    /// Makes `file` the scheduling target and prioritizes its first pieces.
    ///
    /// Returns None (and issues nothing) for a file without pieces.
    pub fn prime_file(&self, file: &MediaFile) -> Option<HotWindow> {
        let window = self.window_at(file, PieceIndex(0));
        let mut current = self.current.lock();
        *current = window.map(|window| (file.clone(), window));
        if let Some(window) = window {
            self.issue(file, &window);
            debug!(
                "Primed {} with hot window {:?} ({} pieces)",
                file.path,
                window.pieces(),
                file.piece_count
            );
        }
        window
    }

    /// Moves the hot window to the piece containing `target_offset`.
    ///
    /// Offsets past the end of the file land on the last piece. Returns None
    /// when no file has been primed.
    pub fn on_seek(&self, target_offset: u64) -> Option<HotWindow> {
        let mut current = self.current.lock();
        let (file, window) = current.as_mut()?;
        let first = file.piece_for_offset(target_offset)?;
        let new_window = self.window_at(file, first)?;
        self.issue(file, &new_window);
        debug!(
            "Seek to byte {} in {}: hot window {:?} -> {:?}",
            target_offset,
            file.path,
            window.pieces(),
            new_window.pieces()
        );
        *window = new_window;
        Some(new_window)
    }

    /// The currently active window, if a file has been primed.
    pub fn current_window(&self) -> Option<HotWindow> {
        self.current.lock().as_ref().map(|(_, window)| *window)
    }

    fn window_at(&self, file: &MediaFile, first: PieceIndex) -> Option<HotWindow> {
        if file.piece_count == 0 || first.0 >= file.piece_count {
            return None;
        }
        Some(HotWindow {
            first,
            width: hot_window_width(file.piece_count, &self.config),
            piece_count: file.piece_count,
        })
    }

    fn issue(&self, file: &MediaFile, window: &HotWindow) {
        for piece in window.pieces() {
            self.provider
                .set_priority(file, PieceIndex(piece), PiecePriority::Now);
        }
    }
}
