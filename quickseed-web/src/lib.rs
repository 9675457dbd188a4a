//! Quickseed Web - HTTP range streaming server

#![warn(clippy::missing_errors_doc)]
#![deny(clippy::missing_panics_doc)]
#![warn(clippy::too_many_lines)]
//!
//! Serves the selected file of a streaming session over HTTP with range
//! support, plus a small JSON API for status, file selection and seeking.

pub mod handlers;
pub mod server;

pub use handlers::{RangeStreamer, StreamError};
pub use server::{AppState, StreamServer, WebError, router};
