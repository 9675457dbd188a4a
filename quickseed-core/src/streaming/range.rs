//! HTTP Range header parsing for single byte ranges.
//!
//! Supports the `bytes=<start>-<end>` form with either bound optional: a
//! missing start means 0 and a missing end means the last byte. A
//! [`ByteRange`] only exists once it has been checked against the total
//! length.

use thiserror::Error;

/// Inclusive byte range `[start, end]` with `start <= end < total_length`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    start: u64,
    end: u64,
    total_length: u64,
}

impl ByteRange {
    /// Validates `[start, end]` against `total_length`.
    ///
    /// # Errors
    ///
    /// - `RangeError::Unsatisfiable` - `start > end` or `end >= total_length`
    pub fn new(start: u64, end: u64, total_length: u64) -> Result<Self, RangeError> {
        if start > end || end >= total_length {
            return Err(RangeError::Unsatisfiable {
                start,
                end,
                total_length,
            });
        }
        Ok(Self {
            start,
            end,
            total_length,
        })
    }

    /// Range covering the whole resource, None when it is empty.
    pub fn full(total_length: u64) -> Option<Self> {
        Self::new(0, total_length.checked_sub(1)?, total_length).ok()
    }

    pub fn start(&self) -> u64 {
        self.start
    }

    pub fn end(&self) -> u64 {
        self.end
    }

    pub fn total_length(&self) -> u64 {
        self.total_length
    }

    /// Number of bytes in the range.
    pub fn len(&self) -> u64 {
        self.end - self.start + 1
    }

    /// Always false: a validated range holds at least one byte.
    pub fn is_empty(&self) -> bool {
        false
    }

    /// `Content-Range` value for a 206 response.
    pub fn content_range(&self) -> String {
        format!("bytes {}-{}/{}", self.start, self.end, self.total_length)
    }
}

/// Reasons a Range header cannot be served.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RangeError {
    #[error("range header does not use the bytes unit: {header}")]
    MissingUnit { header: String },

    #[error("malformed range header: {header}")]
    Malformed { header: String },

    #[error("range {start}-{end} not satisfiable for length {total_length}")]
    Unsatisfiable {
        start: u64,
        end: u64,
        total_length: u64,
    },
}

/// `Content-Range` value telling a client the valid length after a 416.
pub fn unsatisfiable_content_range(total_length: u64) -> String {
    format!("bytes */{total_length}")
}

/// Parses a `Range` header value against a resource of `total_length` bytes.
///
/// # Errors
///
/// - `RangeError::MissingUnit` - The header is not a `bytes=` range
/// - `RangeError::Malformed` - Bounds are missing a separator, non-numeric or a list
/// - `RangeError::Unsatisfiable` - The bounds fall outside `[0, total_length)` or are reversed
///
/// # Examples
/// ```
/// use quickseed_core::streaming::range::parse_range_header;
///
/// let range = parse_range_header("bytes=500000-", 1_000_000).unwrap();
/// assert_eq!(range.content_range(), "bytes 500000-999999/1000000");
/// assert_eq!(range.len(), 500_000);
/// ```
pub fn parse_range_header(header: &str, total_length: u64) -> Result<ByteRange, RangeError> {
    let spec = header
        .trim()
        .strip_prefix("bytes=")
        .ok_or_else(|| RangeError::MissingUnit {
            header: header.to_string(),
        })?;

    let malformed = || RangeError::Malformed {
        header: header.to_string(),
    };

    let (start_str, end_str) = spec.split_once('-').ok_or_else(malformed)?;
    let (start_str, end_str) = (start_str.trim(), end_str.trim());

    let start = if start_str.is_empty() {
        0
    } else {
        start_str.parse::<u64>().map_err(|_| malformed())?
    };

    let end = if end_str.is_empty() {
        match total_length.checked_sub(1) {
            Some(last) => last,
            None => {
                return Err(RangeError::Unsatisfiable {
                    start,
                    end: 0,
                    total_length,
                });
            }
        }
    } else {
        end_str.parse::<u64>().map_err(|_| malformed())?
    };

    ByteRange::new(start, end, total_length)
}
