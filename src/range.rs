//! Parsing of HTTP `Range: bytes=...` headers into inclusive byte windows.

use thiserror::Error;

const BYTES_PREFIX: &str = "bytes=";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RangeError {
    #[error("invalid range format: {0}")]
    InvalidFormat(String),

    #[error("invalid range segment: {0}")]
    InvalidSegment(String),

    #[error("invalid range start: {0}")]
    InvalidStart(String),

    #[error("invalid range end: {0}")]
    InvalidEnd(String),

    #[error("invalid range: {start}-{end}")]
    Unsatisfiable { start: i64, end: i64 },
}

/// An inclusive `[start, end]` byte window of an object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub start: i64,
    pub end: i64,
}

impl ByteRange {
    /// Builds a window, checking it lies inside an object of `content_length` bytes.
    pub fn new(start: i64, end: i64, content_length: i64) -> Result<Self, RangeError> {
        if start < 0 || start > end || end >= content_length {
            return Err(RangeError::Unsatisfiable { start, end });
        }
        Ok(Self { start, end })
    }

    /// The whole object.
    pub fn full(content_length: i64) -> Result<Self, RangeError> {
        Self::new(0, content_length - 1, content_length)
    }

    /// Number of bytes in the window.
    pub fn len(&self) -> i64 {
        self.end - self.start + 1
    }

    pub fn is_empty(&self) -> bool {
        self.len() <= 0
    }

    /// Value for a `Content-Range` response header.
    pub fn content_range(&self, content_length: i64) -> String {
        format!("bytes {}-{}/{}", self.start, self.end, content_length)
    }

    /// Parses every window of a `Range` header value.
    ///
    /// Supports `a-b`, open ended `a-` and suffix `-n` segments. A last byte
    /// position past the end of the object is clamped to the final byte.
    pub fn parse(content_length: i64, header: &str) -> Result<Vec<Self>, RangeError> {
        let Some(ranges) = header.trim().strip_prefix(BYTES_PREFIX) else {
            return Err(RangeError::InvalidFormat(header.to_string()));
        };

        ranges
            .split(',')
            .map(|segment| Self::parse_segment(content_length, segment))
            .collect()
    }

    /// Parses a header and keeps only its first window.
    pub fn parse_first(content_length: i64, header: &str) -> Result<Self, RangeError> {
        Self::parse(content_length, header)?
            .into_iter()
            .next()
            .ok_or_else(|| RangeError::InvalidFormat(header.to_string()))
    }

    fn parse_segment(content_length: i64, segment: &str) -> Result<Self, RangeError> {
        let segment = segment.trim();
        let bounds: Vec<&str> = segment.split('-').collect();
        let [first, last] = bounds.as_slice() else {
            return Err(RangeError::InvalidSegment(segment.to_string()));
        };
        let (first, last) = (first.trim(), last.trim());

        let (start, end) = if first.is_empty() {
            let suffix =
                parse_position(last).ok_or_else(|| RangeError::InvalidEnd(last.to_string()))?;
            let start = content_length
                .checked_sub(suffix)
                .ok_or_else(|| RangeError::InvalidEnd(last.to_string()))?;
            (start, content_length - 1)
        } else {
            let start =
                parse_position(first).ok_or_else(|| RangeError::InvalidStart(first.to_string()))?;
            let end = if last.is_empty() {
                content_length - 1
            } else {
                parse_position(last)
                    .ok_or_else(|| RangeError::InvalidEnd(last.to_string()))?
                    .min(content_length - 1)
            };
            (start, end)
        };

        Self::new(start, end, content_length)
    }
}

/// A byte position: plain ASCII digits, no sign.
fn parse_position(value: &str) -> Option<i64> {
    if value.is_empty() || !value.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    value.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_closed_range() {
        let ranges = ByteRange::parse(1000, "bytes=0-499").unwrap();
        assert_eq!(ranges, vec![ByteRange { start: 0, end: 499 }]);
        assert_eq!(ranges[0].len(), 500);
    }

    #[test]
    fn test_parse_open_ended_range() {
        let range = ByteRange::parse_first(1000, "bytes=900-").unwrap();
        assert_eq!(range, ByteRange { start: 900, end: 999 });
    }

    #[test]
    fn test_parse_suffix_range() {
        let range = ByteRange::parse_first(1000, "bytes=-100").unwrap();
        assert_eq!(range, ByteRange { start: 900, end: 999 });
    }

    #[test]
    fn test_parse_multiple_ranges() {
        let ranges = ByteRange::parse(1000, "bytes=0-9, 20-29").unwrap();
        assert_eq!(ranges.len(), 2);
        assert_eq!(ranges[1], ByteRange { start: 20, end: 29 });
    }

    #[test]
    fn test_end_past_object_is_clamped() {
        let range = ByteRange::parse_first(1000, "bytes=500-5000").unwrap();
        assert_eq!(range, ByteRange { start: 500, end: 999 });
    }

    #[test]
    fn test_rejects_bad_headers() {
        assert!(matches!(
            ByteRange::parse(1000, "items=0-1"),
            Err(RangeError::InvalidFormat(_))
        ));
        assert!(matches!(
            ByteRange::parse(1000, "bytes=12"),
            Err(RangeError::InvalidSegment(_))
        ));
        assert!(matches!(
            ByteRange::parse(1000, "bytes=a-10"),
            Err(RangeError::InvalidStart(_))
        ));
        assert!(matches!(
            ByteRange::parse(1000, "bytes=0-b"),
            Err(RangeError::InvalidEnd(_))
        ));
    }

    #[test]
    fn test_rejects_unsatisfiable_windows() {
        assert_eq!(
            ByteRange::parse(1000, "bytes=1000-"),
            Err(RangeError::Unsatisfiable {
                start: 1000,
                end: 999
            })
        );
        assert!(ByteRange::parse(1000, "bytes=10-5").is_err());
        assert!(ByteRange::parse(1000, "bytes=-2000").is_err());
        assert!(ByteRange::new(0, 0, 0).is_err());
    }

    #[test]
    fn test_rejects_signed_positions() {
        assert!(matches!(
            ByteRange::parse(1000, "bytes=--5"),
            Err(RangeError::InvalidSegment(_))
        ));
        assert!(matches!(
            ByteRange::parse(1000, "bytes=--9223372036854775807"),
            Err(RangeError::InvalidSegment(_))
        ));
        assert!(matches!(
            ByteRange::parse(1000, "bytes=+5-10"),
            Err(RangeError::InvalidStart(_))
        ));
        assert!(matches!(
            ByteRange::parse(1000, "bytes=-+5"),
            Err(RangeError::InvalidEnd(_))
        ));
        assert!(matches!(
            ByteRange::parse(1000, "bytes=0-5-9"),
            Err(RangeError::InvalidSegment(_))
        ));
    }

    #[test]
    fn test_huge_suffix_does_not_overflow() {
        assert!(matches!(
            ByteRange::parse(1000, "bytes=-9223372036854775807"),
            Err(RangeError::Unsatisfiable { .. })
        ));
        assert!(matches!(
            ByteRange::parse(-2, "bytes=-9223372036854775807"),
            Err(RangeError::InvalidEnd(_))
        ));
        assert!(matches!(
            ByteRange::parse(1000, "bytes=-99999999999999999999"),
            Err(RangeError::InvalidEnd(_))
        ));
    }

    #[test]
    fn test_content_range_header() {
        let range = ByteRange::new(100, 199, 1000).unwrap();
        assert_eq!(range.content_range(1000), "bytes 100-199/1000");
        assert_eq!(ByteRange::full(1000).unwrap().len(), 1000);
    }
}
