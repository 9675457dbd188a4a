//! Quickseed Core - Piece-aware progressive streaming
//!
//! This crate decides which pieces of a partially downloaded media file to
//! fetch first, when enough of it has arrived to start playback, and owns the
//! session state that the HTTP layer streams from. The swarm itself sits
//! behind the [`PieceProvider`](streaming::PieceProvider) trait.

pub mod config;
pub mod streaming;
pub mod tracing_setup;

// Re-export main types for convenient access
pub use config::QuickseedConfig;
pub use streaming::{
    ByteRange, MediaFile, PieceIndex, PiecePriority, PieceProvider, PieceProviderError,
    PieceReader, PieceState, PieceStatus, RangeError, ReadinessSnapshot, ReadinessState,
    ReadinessTracker, SequentialScheduler, SessionController, SessionError, SessionStats,
};

/// Errors reported to the user of the quickseed binary.
#[derive(Debug, thiserror::Error)]
pub enum QuickseedError {
    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    #[error("Configuration error: {reason}")]
    Configuration { reason: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl QuickseedError {
    /// Returns a user-friendly error message suitable for display.
    pub fn user_message(&self) -> String {
        match self {
            QuickseedError::Session(e) => match e {
                SessionError::IndexOutOfRange { index, file_count } => {
                    format!("File index {index} is out of range (source has {file_count} files)")
                }
                SessionError::MetadataUnavailable { reason } => {
                    format!("Could not resolve source: {reason}")
                }
                SessionError::NoVideoFile => "No video files found in source".to_string(),
                SessionError::NoActiveFile => "No file is selected for streaming".to_string(),
                SessionError::Provider(_) => "Swarm error occurred".to_string(),
            },
            QuickseedError::Configuration { reason } => format!("Configuration error: {reason}"),
            QuickseedError::Io(e) => format!("File system error: {e}"),
        }
    }

    /// Checks if this error is due to user input validation.
    pub fn is_user_error(&self) -> bool {
        matches!(
            self,
            QuickseedError::Configuration { .. }
                | QuickseedError::Session(SessionError::IndexOutOfRange { .. })
                | QuickseedError::Session(SessionError::NoVideoFile)
        )
    }
}

pub type Result<T> = std::result::Result<T, QuickseedError>;
