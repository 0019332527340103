//! Pure validation of chunk ranges and chunk coverage.
//!
//! Nothing here touches the database or the disk; the upload service calls
//! these before persisting anything.

use super::{UploadError, UploadResult, digest};
use crate::models::upload::UploadChunk;
use std::str::FromStr;
use uuid::Uuid;

/// A parsed `Content-Range: bytes <start>-<end>/<total>` header.
///
/// `end` is inclusive, as on the wire. `total` is `None` for `*`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContentRange {
    pub start: i64,
    pub end: i64,
    pub total: Option<i64>,
}

impl ContentRange {
    pub fn new(start: i64, end: i64, total: Option<i64>) -> UploadResult<Self> {
        if start < 0 {
            return Err(UploadError::InvalidContentRange(format!(
                "start {} is negative",
                start
            )));
        }
        if end < start {
            return Err(UploadError::InvalidContentRange(format!(
                "end {} is before start {}",
                end, start
            )));
        }
        if end == i64::MAX {
            return Err(UploadError::InvalidContentRange(format!(
                "end {} is not addressable",
                end
            )));
        }
        if let Some(total) = total {
            if total < 0 {
                return Err(UploadError::InvalidContentRange(format!(
                    "total {} is negative",
                    total
                )));
            }
        }
        Ok(Self { start, end, total })
    }

    /// Number of bytes the header announces.
    pub fn len(&self) -> i64 {
        self.end - self.start + 1
    }

    /// Exclusive end offset.
    pub fn end_exclusive(&self) -> i64 {
        self.end + 1
    }
}

impl FromStr for ContentRange {
    type Err = UploadError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let invalid = || UploadError::InvalidContentRange(format!("`{}`", raw));

        let spec = raw
            .trim()
            .strip_prefix("bytes")
            .ok_or_else(invalid)?
            .trim_start();
        let (range, total) = spec.split_once('/').ok_or_else(invalid)?;
        let (start, end) = range.split_once('-').ok_or_else(invalid)?;

        let parse = |s: &str| s.trim().parse::<i64>().map_err(|_| invalid());
        let total = match total.trim() {
            "*" => None,
            other => Some(parse(other)?),
        };

        ContentRange::new(parse(start)?, parse(end)?, total)
    }
}

/// Check a received chunk against its header and the upload it targets.
pub fn validate_range(
    range: &ContentRange,
    payload_len: i64,
    upload_size: i64,
) -> UploadResult<()> {
    if range.end_exclusive() > upload_size {
        return Err(UploadError::OutOfRange {
            start: range.start,
            end: range.end,
            size: upload_size,
        });
    }
    if let Some(total) = range.total {
        if total != upload_size {
            return Err(UploadError::InvalidContentRange(format!(
                "total {} does not match upload size {}",
                total, upload_size
            )));
        }
    }
    if payload_len != range.len() {
        return Err(UploadError::InvalidContentRange(format!(
            "range covers {} bytes but {} were sent",
            range.len(),
            payload_len
        )));
    }
    Ok(())
}

/// Fail with `ChecksumMismatch` unless `declared` matches `computed`.
pub fn verify_checksum(declared: &str, computed: &str) -> UploadResult<()> {
    if digest::digest_matches(declared, computed) {
        Ok(())
    } else {
        Err(UploadError::ChecksumMismatch {
            expected: declared.to_string(),
            actual: computed.to_string(),
        })
    }
}

/// How a new chunk relates to the chunks already stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placement {
    /// Touches no existing chunk.
    Fresh,
    /// Covers exactly the same bytes as an existing chunk, which it replaces.
    Replaces(Uuid),
}

/// Same range replaces, any other intersection is rejected.
pub fn place_chunk(existing: &[UploadChunk], range: &ContentRange) -> UploadResult<Placement> {
    let start = range.start;
    let end = range.end_exclusive();

    for chunk in existing {
        if chunk.offset == start && chunk.end() == end {
            return Ok(Placement::Replaces(chunk.id));
        }
        if chunk.offset < end && start < chunk.end() {
            return Err(UploadError::ChunkOverlap {
                start,
                end: range.end,
                existing_start: chunk.offset,
                existing_end: chunk.end() - 1,
            });
        }
    }
    Ok(Placement::Fresh)
}

/// Require `chunks` (sorted by offset) to tile `[0, size)` exactly.
pub fn check_coverage(size: i64, chunks: &[UploadChunk]) -> UploadResult<()> {
    let mut expected = 0;
    for chunk in chunks {
        if chunk.offset > expected {
            return Err(UploadError::IncompleteUpload(format!(
                "missing bytes {}-{}",
                expected,
                chunk.offset - 1
            )));
        }
        if chunk.offset < expected {
            return Err(UploadError::IncompleteUpload(format!(
                "chunk at offset {} overlaps bytes before {}",
                chunk.offset, expected
            )));
        }
        expected = chunk.end();
    }

    if expected < size {
        return Err(UploadError::IncompleteUpload(format!(
            "missing bytes {}-{}",
            expected,
            size - 1
        )));
    }
    if expected > size {
        return Err(UploadError::IncompleteUpload(format!(
            "chunks extend to byte {} past the declared size {}",
            expected - 1,
            size
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn chunk(offset: i64, size: i64) -> UploadChunk {
        UploadChunk {
            id: Uuid::new_v4(),
            upload_id: Uuid::nil(),
            offset,
            size,
            sha256: String::new(),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn parses_content_range() {
        let range: ContentRange = "bytes 6291456-10485759/10485760".parse().unwrap();
        assert_eq!(range.start, 6291456);
        assert_eq!(range.len(), 4194304);
        assert_eq!(range.total, Some(10485760));

        let unknown_total: ContentRange = "bytes 0-9/*".parse().unwrap();
        assert_eq!(unknown_total.total, None);
    }

    #[test]
    fn rejects_malformed_content_range() {
        for raw in [
            "",
            "bytes",
            "0-9/10",
            "bytes 0-9",
            "bytes 9-0/10",
            "bytes a-b/10",
            "bytes -1-4/10",
            "bytes 0-9223372036854775807/10",
        ] {
            assert!(
                matches!(raw.parse::<ContentRange>(), Err(UploadError::InvalidContentRange(_))),
                "{raw:?} should be rejected"
            );
        }
    }

    #[test]
    fn range_must_fit_the_upload() {
        let range = ContentRange::new(5, 10, Some(10)).unwrap();
        assert!(matches!(
            validate_range(&range, 6, 10),
            Err(UploadError::OutOfRange { .. })
        ));

        let range = ContentRange::new(0, 4, Some(12)).unwrap();
        assert!(matches!(
            validate_range(&range, 5, 10),
            Err(UploadError::InvalidContentRange(_))
        ));

        let range = ContentRange::new(0, 4, Some(10)).unwrap();
        assert!(matches!(
            validate_range(&range, 3, 10),
            Err(UploadError::InvalidContentRange(_))
        ));
        assert!(validate_range(&range, 5, 10).is_ok());

        let range = ContentRange::new(0, i64::MAX - 1, None).unwrap();
        assert!(matches!(
            validate_range(&range, 10, 10),
            Err(UploadError::OutOfRange { .. })
        ));
    }

    #[test]
    fn same_range_replaces_partial_overlap_is_rejected() {
        let first = chunk(0, 5);
        let existing = vec![first.clone(), chunk(5, 5)];

        let same = ContentRange::new(0, 4, Some(10)).unwrap();
        assert_eq!(place_chunk(&existing, &same).unwrap(), Placement::Replaces(first.id));

        let straddling = ContentRange::new(3, 7, Some(10)).unwrap();
        assert!(matches!(
            place_chunk(&existing, &straddling),
            Err(UploadError::ChunkOverlap { existing_start: 0, existing_end: 4, .. })
        ));

        let shorter = ContentRange::new(0, 2, Some(10)).unwrap();
        assert!(place_chunk(&existing, &shorter).is_err());

        let disjoint = ContentRange::new(10, 11, Some(12)).unwrap();
        assert_eq!(place_chunk(&existing, &disjoint).unwrap(), Placement::Fresh);
    }

    #[test]
    fn coverage_requires_exact_tiling() {
        assert!(check_coverage(10, &[chunk(0, 6), chunk(6, 4)]).is_ok());
        assert!(check_coverage(0, &[]).is_ok());

        let gap = check_coverage(10, &[chunk(0, 4), chunk(6, 4)]);
        assert!(matches!(gap, Err(UploadError::IncompleteUpload(msg)) if msg.contains("4-5")));

        let short = check_coverage(10, &[chunk(0, 6)]);
        assert!(matches!(short, Err(UploadError::IncompleteUpload(_))));

        let overlap = check_coverage(10, &[chunk(0, 6), chunk(4, 6)]);
        assert!(matches!(overlap, Err(UploadError::IncompleteUpload(_))));

        let too_long = check_coverage(8, &[chunk(0, 6), chunk(6, 4)]);
        assert!(matches!(too_long, Err(UploadError::IncompleteUpload(_))));

        assert!(check_coverage(4, &[]).is_err());
    }
}
