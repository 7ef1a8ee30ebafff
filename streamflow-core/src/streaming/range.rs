//! HTTP Range header parsing
//!
//! Single `bytes=<start>-[<end>]` ranges only. An end past the last byte is
//! clamped (RFC 7233 §2.1); everything else that cannot be served exactly is
//! rejected.

use crate::transfer::TransferError;

/// Inclusive byte range of a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub start: u64,
    pub end: u64,
}

impl ByteRange {
    /// Number of bytes in the range.
    pub fn content_length(&self) -> u64 {
        self.end - self.start + 1
    }

    /// `Content-Range` header value for a file of `length` bytes.
    pub fn content_range(&self, length: u64) -> String {
        format!("bytes {}-{}/{length}", self.start, self.end)
    }
}

/// Parses a `Range` header against a file of `length` bytes.
///
/// # Errors
/// - `TransferError::UnsatisfiableRange` - Malformed, multi-part, suffix,
///   inverted or out-of-bounds range
///
/// # Examples
/// ```
/// use streamflow_core::streaming::range::{ByteRange, parse_range_header};
///
/// let range = parse_range_header("bytes=100-", 1000).unwrap();
/// assert_eq!(range, ByteRange { start: 100, end: 999 });
/// assert_eq!(range.content_length(), 900);
/// ```
pub fn parse_range_header(header: &str, length: u64) -> Result<ByteRange, TransferError> {
    let unsatisfiable = || TransferError::UnsatisfiableRange { length };

    let spec = header
        .trim()
        .strip_prefix("bytes=")
        .ok_or_else(unsatisfiable)?;
    if spec.contains(',') {
        return Err(unsatisfiable());
    }

    let (start, end) = spec.split_once('-').ok_or_else(unsatisfiable)?;
    let (start, end) = (start.trim(), end.trim());
    if !is_decimal(start) {
        return Err(unsatisfiable());
    }
    let start: u64 = start.parse().map_err(|_| unsatisfiable())?;
    if start >= length {
        return Err(unsatisfiable());
    }

    let last_byte = length - 1;
    let end = if end.is_empty() {
        last_byte
    } else {
        if !is_decimal(end) {
            return Err(unsatisfiable());
        }
        let end: u64 = end.parse().map_err(|_| unsatisfiable())?;
        if end < start {
            return Err(unsatisfiable());
        }
        end.min(last_byte)
    };

    Ok(ByteRange { start, end })
}

fn is_decimal(value: &str) -> bool {
    !value.is_empty() && value.bytes().all(|b| b.is_ascii_digit())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bounded_range() {
        let range = parse_range_header("bytes=0-99", 1000).unwrap();
        assert_eq!(range, ByteRange { start: 0, end: 99 });
        assert_eq!(range.content_length(), 100);
        assert_eq!(range.content_range(1000), "bytes 0-99/1000");
    }

    #[test]
    fn test_open_and_clamped_ranges() {
        assert_eq!(
            parse_range_header("bytes=500-", 1000).unwrap(),
            ByteRange {
                start: 500,
                end: 999
            }
        );
        assert_eq!(
            parse_range_header("bytes=900-5000", 1000).unwrap(),
            ByteRange {
                start: 900,
                end: 999
            }
        );
        assert_eq!(
            parse_range_header("bytes=999-999", 1000)
                .unwrap()
                .content_length(),
            1
        );
    }

    #[test]
    fn test_unsatisfiable_ranges() {
        let rejected = [
            "bytes=1000-1010",
            "bytes=5-4",
            "bytes=-100",
            "bytes=abc-",
            "bytes=0-1x",
            "bytes=0-1,5-6",
            "items=0-1",
            "bytes=",
            "bytes=+1-2",
        ];
        for header in rejected {
            assert_eq!(
                parse_range_header(header, 1000),
                Err(TransferError::UnsatisfiableRange { length: 1000 }),
                "{header}"
            );
        }
    }

    #[test]
    fn test_empty_file_rejects_any_range() {
        assert!(parse_range_header("bytes=0-", 0).is_err());
    }
}
