//! `Range` header parsing for single byte ranges.

use thiserror::Error;

/// Inclusive byte span `[start, end]` within an object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub start: u64,
    pub end: u64,
}

impl ByteRange {
    pub fn len(&self) -> u64 {
        self.end - self.start + 1
    }

    /// Value for the `Content-Range` response header.
    pub fn content_range(&self, size: u64) -> String {
        format!("bytes {}-{}/{}", self.start, self.end, size)
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RangeError {
    #[error("malformed range `{0}`")]
    Malformed(String),
    #[error("only single byte ranges are supported")]
    MultipleRanges,
    #[error("range not satisfiable for object of {size} bytes")]
    Unsatisfiable { size: u64 },
}

/// Parse a `Range` header value against an object of `size` bytes.
///
/// Accepts `bytes=start-end`, `bytes=start-` and the suffix form `bytes=-n`.
/// An `end` past the object is clamped to the last byte; a `start` past the
/// object, `end < start` and any range over an empty object are
/// unsatisfiable.
pub fn parse_range(value: &str, size: u64) -> Result<ByteRange, RangeError> {
    let malformed = || RangeError::Malformed(value.to_string());

    let spec = value.trim().strip_prefix("bytes=").ok_or_else(malformed)?;
    if spec.contains(',') {
        return Err(RangeError::MultipleRanges);
    }
    let (start_part, end_part) = spec.trim().split_once('-').ok_or_else(malformed)?;
    let start_part = start_part.trim();
    let end_part = end_part.trim();

    if start_part.is_empty() {
        let suffix: u64 = parse_position(end_part).ok_or_else(malformed)?;
        if suffix == 0 || size == 0 {
            return Err(RangeError::Unsatisfiable { size });
        }
        return Ok(ByteRange {
            start: size.saturating_sub(suffix),
            end: size - 1,
        });
    }

    let start = parse_position(start_part).ok_or_else(malformed)?;
    let end = if end_part.is_empty() {
        None
    } else {
        Some(parse_position(end_part).ok_or_else(malformed)?)
    };

    if start >= size {
        return Err(RangeError::Unsatisfiable { size });
    }
    let end = match end {
        Some(end) if end < start => return Err(RangeError::Unsatisfiable { size }),
        Some(end) => end.min(size - 1),
        None => size - 1,
    };

    Ok(ByteRange { start, end })
}

/// Digits only: `u64::from_str` would also accept a leading `+`.
fn parse_position(raw: &str) -> Option<u64> {
    if raw.is_empty() || !raw.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    raw.parse().ok()
}
