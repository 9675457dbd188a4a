//! HTTP request handlers organized by functionality

pub mod info;
pub mod stream;

pub use info::{
    ApiError, FileEntry, SeekRequest, index_page, list_files, not_found, seek, select_file,
    session_status, stream_info, test_page,
};
pub use stream::{RangeStreamer, StreamError, apply_cors, stream_file};
