//! Readiness gating: can a client start playback of the selected file now?
//!
//! Readiness is measured over the leading pieces of the selected file,
//! whatever the current seek position.

use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};

use parking_lot::RwLock;
use serde::Serialize;

use super::media::{MediaFile, PieceIndex};
use super::traits::PieceProvider;
use crate::config::ReadinessConfig;

/// Playback readiness of the selected file.
///
/// Only moves forward for a given selection; selecting a file starts over at
/// `Initializing`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub enum ReadinessState {
    /// No sampled piece is complete yet
    Initializing = 0,
    /// Some sampled pieces are complete, not enough to play
    Buffering = 1,
    /// More than the threshold of sampled pieces are complete
    Ready = 2,
}

impl ReadinessState {
    fn from_u8(value: u8) -> Self {
        match value {
            2 => ReadinessState::Ready,
            1 => ReadinessState::Buffering,
            _ => ReadinessState::Initializing,
        }
    }
}

/// Point-in-time readiness, derived from current piece states.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReadinessSnapshot {
    pub state: ReadinessState,
    /// Completed fraction of the sample window (0.0 to 1.0)
    pub completed_fraction: f64,
    pub completed_pieces: u32,
    pub sample_pieces: u32,
    pub file_index: Option<usize>,
}

impl ReadinessSnapshot {
    pub fn is_ready(&self) -> bool {
        self.state == ReadinessState::Ready
    }

    fn unselected() -> Self {
        Self {
            state: ReadinessState::Initializing,
            completed_fraction: 0.0,
            completed_pieces: 0,
            sample_pieces: 0,
            file_index: None,
        }
    }
}

/// Number of leading pieces sampled for a file with `piece_count` pieces.
///
/// `max(min_sample_pieces, floor(sample_fraction * piece_count))`, clamped to
/// the file's piece count.
///
/// The clamp is not part of the bare formula. Without it a file with fewer
/// than `min_sample_pieces` pieces would never reach `Ready`; with it such a
/// file is judged on all of its pieces (see `test_tiny_file_can_become_ready`).
pub fn sample_window(piece_count: u32, config: &ReadinessConfig) -> u32 {
    let proportional = (config.sample_fraction * f64::from(piece_count)).floor() as u32;
    proportional
        .max(config.min_sample_pieces)
        .min(piece_count)
}

struct Selection {
    file: MediaFile,
    reached: AtomicU8,
}

/// Tracks readiness of the currently selected file.
///
/// `snapshot` only reads piece state; it never touches priorities and is
/// cheap enough to call on every request and from periodic reporters.
pub struct ReadinessTracker {
    provider: Arc<dyn PieceProvider>,
    config: ReadinessConfig,
    selection: RwLock<Option<Selection>>,
}

impl ReadinessTracker {
    pub fn new(provider: Arc<dyn PieceProvider>, config: ReadinessConfig) -> Self {
        Self {
            provider,
            config,
            selection: RwLock::new(None),
        }
    }

    /// Starts tracking `file` from `Initializing`.
    pub fn reset(&self, file: &MediaFile) {
        *self.selection.write() = Some(Selection {
            file: file.clone(),
            reached: AtomicU8::new(ReadinessState::Initializing as u8),
        });
    }

    pub fn snapshot(&self) -> ReadinessSnapshot {
        let selection = self.selection.read();
        let Some(selection) = selection.as_ref() else {
            return ReadinessSnapshot::unselected();
        };

        let file = &selection.file;
        let sample_pieces = sample_window(file.piece_count, &self.config);
        let completed_pieces = (0..sample_pieces)
            .filter(|&piece| {
                self.provider
                    .piece_state(file, PieceIndex(piece))
                    .is_complete()
            })
            .count() as u32;

        let completed_fraction = if sample_pieces == 0 {
            0.0
        } else {
            f64::from(completed_pieces) / f64::from(sample_pieces)
        };

        let observed = if sample_pieces > 0
            && f64::from(completed_pieces) > self.config.ready_threshold * f64::from(sample_pieces)
        {
            ReadinessState::Ready
        } else if completed_pieces > 0 {
            ReadinessState::Buffering
        } else {
            ReadinessState::Initializing
        };

        let reached = selection
            .reached
            .fetch_max(observed as u8, Ordering::AcqRel)
            .max(observed as u8);

        ReadinessSnapshot {
            state: ReadinessState::from_u8(reached),
            completed_fraction,
            completed_pieces,
            sample_pieces,
            file_index: Some(file.index),
        }
    }
}
