//! Quickseed simulated swarm.
//!
//! Provides [`SimulatedSwarm`], a [`quickseed_core::streaming::PieceProvider`]
//! backed by local files whose pieces arrive over time. Used by the CLI to
//! serve files without a network swarm and by tests to drive piece
//! availability by hand.
//!
//! # Example
//!
//! ```rust,no_run
//! use bytes::Bytes;
//! use quickseed_sim::{SimConfig, SimulatedSwarm};
//!
//! # async fn run() {
//! let swarm = SimulatedSwarm::new(
//!     "demo",
//!     vec![("movie.mp4".to_string(), Bytes::from(vec![0u8; 4096]))],
//!     SimConfig::default(),
//! );
//! let downloader = swarm.spawn_downloader();
//! # let _ = downloader.await;
//! # }
//! ```

#![warn(missing_docs)]

/// Swarm simulation and its piece reader.
pub mod swarm;

pub use swarm::{SimConfig, SimulatedSwarm};
