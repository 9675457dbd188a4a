//! Progressive piece-aware streaming.
//!
//! [`SequentialScheduler`] turns playback positions into piece priorities,
//! [`ReadinessTracker`] decides when playback can start, and
//! [`SessionController`] owns the selected file both of them work on. The
//! swarm is reached only through [`PieceProvider`].

pub mod media;
pub mod range;
pub mod readiness;
pub mod scheduler;
pub mod session;
pub mod traits;

#[cfg(test)]
pub(crate) mod test_support;

pub use media::{
    MediaFile, PieceIndex, PiecePriority, PieceState, PieceStatus, SwarmStats, TorrentMetadata,
};
pub use range::{ByteRange, RangeError, parse_range_header, unsatisfiable_content_range};
pub use readiness::{ReadinessSnapshot, ReadinessState, ReadinessTracker, sample_window};
pub use scheduler::{HotWindow, SequentialScheduler, hot_window_width};
pub use session::{ActiveStream, SessionController, SessionError, SessionStats};
pub use traits::{PieceProvider, PieceProviderError, PieceReader};
